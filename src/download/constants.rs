//! Constants for the download module (timeouts, parallelism, polling, file naming).

use std::time::Duration;

/// Default HTTP connect timeout (10 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-read timeout (30 seconds). Applies to each body read, not the whole transfer.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Default number of parallel range tasks per transfer.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Minimum allowed parallelism.
pub const MIN_PARALLEL: usize = 1;

/// Maximum allowed parallelism.
pub const MAX_PARALLEL: usize = 32;

/// Default interval at which the coordinator polls child snapshots.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Suffix appended to a task's output path while its bytes are in flight.
pub const IN_FLIGHT_SUFFIX: &str = ".download";

/// Infix used for per-range chunk files: `<dest>.part-<start>-<end>`.
pub const CHUNK_INFIX: &str = ".part-";
