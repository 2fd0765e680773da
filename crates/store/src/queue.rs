//! FIFO operation serializer.
//!
//! Every storage operation runs through an [`OperationQueue`]. The queue keeps
//! a single tail reference representing "all work submitted so far"; each new
//! operation waits on the previous tail and installs its own completion signal
//! as the new tail. At most one operation runs at a time, in the order `run`
//! was called.

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::oneshot;

/// Serializes asynchronous operations in submission order.
///
/// Enqueueing happens when [`run`](Self::run) is called, not when the returned
/// future is first polled. The returned future owns its place in the queue and
/// does not borrow the queue, so it may be spawned onto another task.
///
/// An operation that fails, panics, or is dropped before completion releases
/// the next operation exactly like one that succeeds.
#[derive(Debug, Default)]
pub struct OperationQueue {
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl OperationQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `op` behind every previously submitted operation.
    ///
    /// The output of `op` (including any error it carries) is delivered to this
    /// caller only; it has no effect on operations queued after it.
    pub fn run<F, T>(&self, op: F) -> impl Future<Output = T> + use<F, T>
    where
        F: Future<Output = T>,
    {
        let (release, next) = oneshot::channel::<()>();
        let previous = self.tail.lock().replace(next);

        async move {
            // Held until this operation completes or is dropped.
            let _release = release;
            if let Some(previous) = previous {
                // A RecvError only means the predecessor's sender is gone, which
                // is exactly the signal we wait for.
                let _ = previous.await;
            }
            op.await
        }
    }
}
