//! Cooperative pause/cancel control shared between a task handle and its worker.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::status::TaskSnapshot;

/// A task that can be observed and steered from any thread.
///
/// Implemented by every long-running worker in the crate. All methods are
/// non-blocking: pausing and cancelling take effect at the worker's next
/// chunk boundary, not immediately.
pub trait ObservableTask: Send + Sync {
    /// Holds the worker at its next chunk boundary until resumed or cancelled.
    fn pause(&self);

    /// Releases a paused worker.
    fn resume(&self);

    /// Stops the worker at its next chunk boundary. Partial output is kept.
    fn cancel(&self);

    /// Returns a copy of the current state.
    fn snapshot(&self) -> TaskSnapshot;
}

/// Marker returned by [`TaskControl::checkpoint`] when the worker must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Pause gate plus cancellation token.
///
/// Cloning yields another handle to the same gate.
#[derive(Debug, Clone)]
pub struct TaskControl {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    /// Creates an open (not paused, not cancelled) control.
    #[must_use]
    pub fn new() -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(pause),
        }
    }

    /// Closes the pause gate.
    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    /// Opens the pause gate.
    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    /// Requests cancellation. Irreversible.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true while the pause gate is closed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Called by the worker between chunks.
    ///
    /// Returns immediately when the gate is open, waits while it is closed,
    /// and returns `Err(Cancelled)` as soon as cancellation is requested.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] when the worker must stop.
    pub async fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if !self.is_paused() {
            return Ok(());
        }

        let mut gate = self.pause.subscribe();
        tokio::select! {
            () = self.cancel.cancelled() => Err(Cancelled),
            opened = async { gate.wait_for(|paused| !*paused).await.is_ok() } => {
                if opened && !self.cancel.is_cancelled() {
                    Ok(())
                } else {
                    Err(Cancelled)
                }
            }
        }
    }
}
