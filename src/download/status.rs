//! Transfer status and point-in-time task snapshots.

use std::fmt;

/// Lifecycle of a task or transfer: `Pending → Running → {Done | Error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    /// Created, not started.
    #[default]
    Pending,
    /// Started and not yet terminal (includes paused).
    Running,
    /// Finished successfully.
    Done,
    /// Failed or was cancelled.
    Error,
}

impl TransferStatus {
    /// Returns true once no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Returns the status after attempting to move to `next`.
    ///
    /// Terminal states absorb every transition, and a task never moves back to `Pending`.
    #[must_use]
    pub fn advance(self, next: Self) -> Self {
        match (self, next) {
            (current, _) if current.is_terminal() => current,
            (_, Self::Pending) => self,
            (_, next) => next,
        }
    }

    /// Stable lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Copy of a task's observable state.
///
/// Mutated only by the owning task; readers always receive a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskSnapshot {
    /// Whether the origin supports range resumption, `None` if not yet known.
    pub resumable: Option<bool>,
    /// Size of the remote resource or range, `None` if not yet known.
    pub size_remote: Option<u64>,
    /// Bytes present locally for this task.
    pub size_local: u64,
    /// Lifecycle state.
    pub status: TransferStatus,
    /// Number of workers currently running (1 for a running range task).
    pub active_workers: u32,
    /// Set while the task is held at its pause gate.
    pub paused: bool,
    /// Set when the task stopped because it was cancelled.
    pub cancelled: bool,
}

impl TaskSnapshot {
    /// Fraction complete in `[0.0, 1.0]`, `None` when the remote size is unknown or zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        let total = self.size_remote.filter(|total| *total > 0)?;
        Some((self.size_local as f64 / total as f64).min(1.0))
    }
}
