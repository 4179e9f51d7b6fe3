//! Thread-safe progress and exception accumulation for concurrent workers.
//!
//! Every worker (range task, transfer, media job) embeds a [`ProgressAggregator`].
//! The worker writes `(current, total, text)` updates and captured errors; any
//! other thread reads consistent copies. One lock guards the whole tuple so a
//! reader never sees a half-applied update, and the lock is never held across
//! I/O or an `.await`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A consistent reading of a worker's progress.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Progress {
    /// Units completed (bytes for downloads).
    pub current: u64,
    /// Units expected, 0 when unknown.
    pub total: u64,
    /// Human-readable status, prefixed by the worker's display name when set.
    pub text: String,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.text, self.current, self.total)
    }
}

#[derive(Debug)]
struct ProgressState<E> {
    current: u64,
    total: u64,
    text: String,
    name: String,
    exceptions: Vec<Arc<E>>,
}

/// Shared `(current, total, text)` tuple plus a list of captured errors.
///
/// Cloning is cheap and yields a handle to the same state.
#[derive(Debug)]
pub struct ProgressAggregator<E> {
    state: Arc<Mutex<ProgressState<E>>>,
}

impl<E> Clone for ProgressAggregator<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<E> Default for ProgressAggregator<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ProgressAggregator<E> {
    /// Creates an aggregator in the initial `(0, 0, "pending")` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProgressState {
                current: 0,
                total: 0,
                text: "pending".to_string(),
                name: String::new(),
                exceptions: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState<E>> {
        // Updates only assign plain values, so a poisoned tuple is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Updates any subset of the tuple. Omitted fields keep their previous value.
    pub fn report(&self, current: Option<u64>, total: Option<u64>, text: Option<&str>) {
        let mut state = self.lock();
        if let Some(current) = current {
            state.current = current;
        }
        if let Some(total) = total {
            state.total = total;
        }
        if let Some(text) = text {
            text.clone_into(&mut state.text);
        }
    }

    /// Updates the status text only.
    pub fn set_text(&self, text: &str) {
        self.report(None, None, Some(text));
    }

    /// Sets the display name prefixed to the status text.
    pub fn set_name(&self, name: &str) {
        name.clone_into(&mut self.lock().name);
    }

    /// Returns a consistent copy of the tuple.
    #[must_use]
    pub fn observe(&self) -> Progress {
        let state = self.lock();
        let text = if state.name.is_empty() {
            state.text.clone()
        } else {
            format!("{} - {}", state.name, state.text)
        };
        Progress {
            current: state.current,
            total: state.total,
            text,
        }
    }

    /// Captures an error.
    pub fn record_exception(&self, error: E) {
        self.record_shared_exception(Arc::new(error));
    }

    /// Captures an error that is already shared with another aggregator.
    pub fn record_shared_exception(&self, error: Arc<E>) {
        self.lock().exceptions.push(error);
    }

    /// Returns a copy of the captured errors, oldest first.
    #[must_use]
    pub fn exceptions(&self) -> Vec<Arc<E>> {
        self.lock().exceptions.clone()
    }

    /// Returns true if at least one error was captured.
    #[must_use]
    pub fn has_exceptions(&self) -> bool {
        !self.lock().exceptions.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_initial_state_is_pending() {
        let progress = ProgressAggregator::<String>::new();
        assert_eq!(
            progress.observe(),
            Progress {
                current: 0,
                total: 0,
                text: "pending".to_string()
            }
        );
        assert!(progress.exceptions().is_empty());
    }

    #[test]
    fn test_omitted_fields_keep_previous_value() {
        let progress = ProgressAggregator::<String>::new();
        progress.report(Some(10), Some(100), Some("downloading"));
        progress.report(Some(20), None, None);
        let seen = progress.observe();
        assert_eq!(seen.current, 20);
        assert_eq!(seen.total, 100);
        assert_eq!(seen.text, "downloading");
    }

    #[test]
    fn test_name_prefixes_text() {
        let progress = ProgressAggregator::<String>::new();
        progress.set_name("BV1xx411c7mD P1");
        progress.set_text("video stream");
        assert_eq!(progress.observe().text, "BV1xx411c7mD P1 - video stream");
    }

    #[test]
    fn test_exceptions_returns_snapshot_copy() {
        let progress = ProgressAggregator::<String>::new();
        progress.record_exception("first".to_string());
        let snapshot = progress.exceptions();
        progress.record_exception("second".to_string());

        assert_eq!(snapshot.len(), 1, "earlier copy must not see later errors");
        assert_eq!(progress.exceptions().len(), 2);
        assert!(progress.has_exceptions());
    }

    #[test]
    fn test_concurrent_writers_never_tear_tuple() {
        let progress = ProgressAggregator::<String>::new();
        let writers: Vec<_> = (0..4_u64)
            .map(|worker| {
                let progress = progress.clone();
                thread::spawn(move || {
                    for step in 0..500_u64 {
                        let value = worker * 1000 + step;
                        // current and total always written together as equal values
                        progress.report(Some(value), Some(value), None);
                    }
                })
            })
            .collect();

        for _ in 0..1000 {
            let seen = progress.observe();
            assert_eq!(seen.current, seen.total, "torn read: {seen:?}");
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }
}
