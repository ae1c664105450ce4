//! Owner inbox and collaborator replies.

use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::ManagerEvent;

/// Sending half of the owner inbox.
pub type EventSender = mpsc::UnboundedSender<ManagerEvent>;

/// Receiving half of the owner inbox.
pub type EventReceiver = mpsc::UnboundedReceiver<ManagerEvent>;

/// The manager's inbox plus the token that closes it.
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: EventSender,
    token: CancellationToken,
}

impl Mailbox {
    pub fn new() -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mailbox = Self {
            sender,
            token: CancellationToken::new(),
        };
        (mailbox, receiver)
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Create a reply that wraps its value with `wrap`.
    pub fn reply<T, F>(&self, wrap: F) -> Reply<T>
    where
        F: FnOnce(T) -> ManagerEvent + Send + 'static,
    {
        Reply {
            sender: self.sender.clone(),
            token: self.token.child_token(),
            wrap: Box::new(wrap),
        }
    }

    /// Post an event unless the mailbox is closed.
    pub fn post(&self, event: ManagerEvent) {
        if self.token.is_cancelled() {
            trace!(event = event.name(), "Mailbox closed, dropping event");
            return;
        }
        let _ = self.sender.send(event);
    }

    /// Stop accepting replies. Outstanding replies become no-ops.
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// One-shot continuation handed to a collaborator.
///
/// Fulfilling it from any thread enqueues the wrapped event on the owner
/// inbox. Dropping it without sending is allowed and simply means the
/// continuation never runs.
pub struct Reply<T> {
    sender: EventSender,
    token: CancellationToken,
    wrap: Box<dyn FnOnce(T) -> ManagerEvent + Send>,
}

impl<T> Reply<T> {
    pub fn send(self, value: T) {
        if self.token.is_cancelled() {
            trace!("Manager shut down, dropping reply");
            return;
        }
        let event = (self.wrap)(value);
        if self.sender.send(event).is_err() {
            trace!("Owner inbox gone, dropping reply");
        }
    }

    /// True once the manager has shut down.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
