//! Execution contexts and cross-context messaging.
//!
//! The manager runs on a single owner task. Two kinds of work leave it:
//!
//! - collaborator calls, which report back through a [`Reply`] that turns
//!   the result into a [`ManagerEvent`] on the owner's inbox;
//! - blocking file-system work, wrapped in an [`IoTask`] and posted to an
//!   [`IoContext`].
//!
//! Both queues are drained in arrival order. Every `Reply` carries a child
//! of the manager's cancellation token, so results that arrive after
//! shutdown are dropped instead of touching a dead manager.

mod event;
mod io;
mod reply;

pub use event::{ManagerEvent, OwnerTask};
pub use io::{DeferredIoContext, IoContext, IoTask, IoThread};
pub use reply::{EventReceiver, EventSender, Mailbox, Reply};
