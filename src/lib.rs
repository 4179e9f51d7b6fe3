//! Mediafetch Core Library
//!
//! Resumable, concurrent downloading of media streams that are published as
//! separate audio and video renditions behind several mirror URLs.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`select`] - Stream quality selection and DASH catalog parsing
//! - [`download`] - Range probing, parallel range tasks, merge and mirror fallback
//! - [`progress`] - Thread-safe progress and error accumulation
//! - [`job`] - Select, download audio and video, post-process
//! - [`image_set`] - Numbered batch download of an image set
//! - [`postprocess`] - External muxer seam (`ffmpeg`)

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod image_set;
pub mod job;
pub mod postprocess;
pub mod progress;
pub mod select;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use download::{
    ByteRange, DownloadError, HttpClient, ObservableTask, TaskSnapshot, TransferConfig,
    TransferCoordinator, TransferError, TransferReport, TransferStatus,
};
pub use image_set::{ImageSetJob, ImageSetReport};
pub use job::{JobError, JobOptions, JobOutcome, MediaJob};
pub use postprocess::{Ffmpeg, PostProcessError, PostProcessor};
pub use progress::{Progress, ProgressAggregator};
pub use select::{CodecConstraint, DashCatalog, QualityPreference, StreamVariant, select};
