//! The I/O execution context.
//!
//! File-system work (directory creation, writability probes, placeholder
//! files, existence checks, deletes, renames) never runs on the owner task.
//! It is wrapped in an [`IoTask`] and posted to an [`IoContext`], which runs
//! tasks one at a time in the order they were posted.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

/// A named unit of blocking work.
pub struct IoTask {
    name: &'static str,
    work: Box<dyn FnOnce() + Send>,
}

impl IoTask {
    pub fn new<F>(name: &'static str, work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name,
            work: Box::new(work),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn run(self) {
        trace!(task = self.name, "Running I/O task");
        (self.work)()
    }
}

impl fmt::Debug for IoTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoTask").field("name", &self.name).finish()
    }
}

/// Somewhere to run blocking file-system work.
///
/// Implementations must run tasks in FIFO order.
pub trait IoContext: Send + Sync {
    fn post(&self, task: IoTask);
}

// =============================================================================
// Dedicated thread
// =============================================================================

/// A dedicated worker thread draining a FIFO queue.
///
/// Dropping the context closes the queue, lets the worker finish what was
/// already posted, and joins it.
pub struct IoThread {
    sender: Option<mpsc::UnboundedSender<IoTask>>,
    handle: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Start the worker thread.
    pub fn spawn(name: &str) -> io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<IoTask>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(task) = receiver.blocking_recv() {
                    let task_name = task.name();
                    if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
                        error!(task = task_name, "I/O task panicked");
                    }
                }
                debug!("I/O thread exiting");
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }
}

impl IoContext for IoThread {
    fn post(&self, task: IoTask) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(mpsc::error::SendError(task)) = sender.send(task) {
            warn!(task = task.name(), "I/O thread gone, dropping task");
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            // The last reference may be released by a task on the worker itself.
            if handle.thread().id() != thread::current().id() {
                handle.join().ok();
            }
        }
    }
}

impl fmt::Debug for IoThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoThread")
            .field("running", &self.sender.is_some())
            .finish()
    }
}

// =============================================================================
// Deferred queue
// =============================================================================

/// A queue that only runs tasks when explicitly drained.
///
/// Used by tests and by embedders that want to control exactly when file
/// system work happens.
#[derive(Default)]
pub struct DeferredIoContext {
    queue: Mutex<VecDeque<IoTask>>,
}

impl DeferredIoContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest task. Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        // The lock must be released before running: tasks may post more work.
        let task = self.queue.lock().pop_front();
        match task {
            Some(task) => {
                task.run();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks posted while
    /// draining. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }
}

impl IoContext for DeferredIoContext {
    fn post(&self, task: IoTask) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for DeferredIoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredIoContext")
            .field("pending", &self.pending())
            .finish()
    }
}
