//! Resumable, parallel HTTP transfer engine.
//!
//! A [`TransferCoordinator`] downloads one resource from an ordered list of
//! mirrors. It probes each mirror with a single `HEAD` ([`probe`]), and when
//! the origin honors byte ranges and reports a length it splits the resource
//! into contiguous [`ByteRange`]s, runs one [`RangeTask`] per range on its
//! own tokio task, then merges the chunk files in offset order
//! ([`MergePlan`]). Otherwise it streams the whole body through a single task,
//! falling back to the next mirror on transient failures.
//!
//! Every in-flight file carries the `.download` suffix and is renamed into
//! place only once complete, so an existing destination is always a finished
//! download and a re-run resumes from what is already on disk.
//!
//! # Example
//!
//! ```no_run
//! use mediafetch_core::download::{HttpClient, TransferCoordinator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transfer = TransferCoordinator::new(
//!     HttpClient::new(),
//!     ["https://cdn-a.example.com/v.m4s", "https://cdn-b.example.com/v.m4s"],
//!     "./downloads/v.m4s",
//!     8,
//! )?;
//! let report = transfer.run().await?;
//! println!("{} bytes from {:?}", report.bytes, report.mirror);
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
pub mod constants;
mod control;
mod coordinator;
mod error;
mod merge;
mod probe;
mod range;
mod retry;
mod status;
mod task;

pub use client::HttpClient;
pub use config::{InvalidHeader, TransferConfig};
pub use control::{Cancelled, ObservableTask, TaskControl};
pub use coordinator::{Strategy, TransferCoordinator, TransferReport, plan_strategy};
pub use error::{DownloadError, TransferError};
pub use merge::{ChunkFile, MergePlan};
pub use probe::{Capability, probe};
pub use range::{ByteRange, chunk_path, in_flight_path};
pub use retry::{FailureType, classify_error};
pub use status::{TaskSnapshot, TransferStatus};
pub use task::RangeTask;

// Note: no module-local Result aliases.
// Use `Result<T, DownloadError>` / `Result<T, TransferError>` explicitly.
