//! Transfer coordinator: probes mirrors, picks a strategy, supervises range
//! tasks and assembles the final file.
//!
//! # Overview
//!
//! 1. If the destination already exists the transfer is done without any request.
//! 2. Mirrors are probed in order; the first successful probe decides the strategy.
//! 3. A resumable origin with a known, non-zero length is split into up to
//!    `max_parallel` ranges downloaded concurrently; anything else is a single
//!    stream written to `<dest>.download`.
//! 4. Children are polled on a fixed interval. When all are done the chunks are
//!    merged in offset order; when one fails its siblings are stopped and the
//!    chunk files are kept for a later resumed attempt.
//! 5. A single stream that fails transiently is restarted from zero on the next
//!    mirror, if one remains.
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
//!     "./v.m4s",
//!     8,
//! )?;
//! let report = transfer.run().await?;
//! println!("{} bytes from {:?}", report.bytes, report.mirror);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::client::HttpClient;
use super::config::TransferConfig;
use super::control::{ObservableTask, TaskControl};
use super::error::{DownloadError, TransferError};
use super::merge::MergePlan;
use super::probe::{Capability, probe};
use super::range::{ByteRange, in_flight_path};
use super::retry::classify_error;
use super::status::{TaskSnapshot, TransferStatus};
use super::task::RangeTask;
use crate::progress::ProgressAggregator;

/// How a probed resource will be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Zero-length resource: create an empty file, no body request.
    Empty,
    /// One task for the whole resource. `resumable` allows continuing a
    /// partial `<dest>.download` with an open-ended range.
    SingleStream {
        /// Whether the origin honors byte ranges.
        resumable: bool,
    },
    /// One task per range, merged afterwards.
    Parallel(Vec<ByteRange>),
}

/// Chooses the strategy for a probed resource.
///
/// A split that would produce a single range is treated as a resumable single
/// stream, which skips the merge step.
///
/// ```
/// use mediafetch_core::download::{Capability, Strategy, plan_strategy};
///
/// let capability = Capability { accepts_ranges: true, content_length: Some(1000) };
/// assert!(matches!(plan_strategy(&capability, 4), Strategy::Parallel(ranges) if ranges.len() == 4));
///
/// let unknown = Capability { accepts_ranges: false, content_length: None };
/// assert_eq!(plan_strategy(&unknown, 4), Strategy::SingleStream { resumable: false });
/// ```
#[must_use]
pub fn plan_strategy(capability: &Capability, max_parallel: usize) -> Strategy {
    match capability.content_length {
        Some(0) => Strategy::Empty,
        Some(length) if capability.accepts_ranges => {
            let ranges = ByteRange::split(length, max_parallel);
            if ranges.len() > 1 {
                Strategy::Parallel(ranges)
            } else {
                Strategy::SingleStream { resumable: true }
            }
        }
        _ => Strategy::SingleStream { resumable: false },
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Final file.
    pub path: PathBuf,
    /// Size of the final file.
    pub bytes: u64,
    /// Mirror the bytes came from, `None` when skipped.
    pub mirror: Option<String>,
    /// Number of range tasks used.
    pub tasks: usize,
    /// True when the destination already existed and nothing was fetched.
    pub skipped: bool,
}

/// Why a supervised batch stopped without finishing.
enum BatchFailure {
    Cancelled,
    Panicked,
    Failed(Vec<Arc<DownloadError>>),
}

#[derive(Debug)]
struct CoordinatorInner {
    client: HttpClient,
    mirrors: Vec<String>,
    dest: PathBuf,
    config: TransferConfig,
    control: TaskControl,
    state: Mutex<TaskSnapshot>,
    children: Mutex<Vec<RangeTask>>,
    progress: ProgressAggregator<DownloadError>,
    handle: Mutex<Option<JoinHandle<Result<TransferReport, TransferError>>>>,
}

/// Handle to one logical download (one audio or video stream).
///
/// Cloning yields another handle to the same transfer, so one clone can run
/// it while another pauses, resumes, cancels or observes it.
#[derive(Debug, Clone)]
pub struct TransferCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TransferCoordinator {
    /// Creates a transfer of `mirrors` (tried in order) to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidParallelism`] if `max_parallel` is
    /// outside the supported range.
    pub fn new<I, S>(
        client: HttpClient,
        mirrors: I,
        dest: impl Into<PathBuf>,
        max_parallel: usize,
    ) -> Result<Self, TransferError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = TransferConfig::default().with_max_parallel(max_parallel);
        Self::with_config(client, mirrors, dest, config)
    }

    /// Creates a transfer with full configuration.
    ///
    /// # Errors
    ///
    /// Returns the error of [`TransferConfig::validate`].
    #[instrument(level = "debug", skip(client, mirrors, dest, config))]
    pub fn with_config<I, S>(
        client: HttpClient,
        mirrors: I,
        dest: impl Into<PathBuf>,
        config: TransferConfig,
    ) -> Result<Self, TransferError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        config.validate()?;
        let inner = CoordinatorInner {
            client,
            mirrors: mirrors.into_iter().map(Into::into).collect(),
            dest: dest.into(),
            config,
            control: TaskControl::new(),
            state: Mutex::new(TaskSnapshot::default()),
            children: Mutex::new(Vec::new()),
            progress: ProgressAggregator::new(),
            handle: Mutex::new(None),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Destination path.
    #[must_use]
    pub fn dest(&self) -> &Path {
        &self.inner.dest
    }

    /// Mirrors in the order they will be tried.
    #[must_use]
    pub fn mirrors(&self) -> &[String] {
        &self.inner.mirrors
    }

    /// Runs the transfer on the current task.
    ///
    /// # Errors
    ///
    /// See [`TransferError`]; every variant except `InvalidParallelism` and
    /// `TaskPanicked` can be produced here.
    #[instrument(skip(self), fields(dest = %self.inner.dest.display(), mirrors = self.inner.mirrors.len()))]
    pub async fn run(&self) -> Result<TransferReport, TransferError> {
        self.inner.update(|s| s.status = s.status.advance(TransferStatus::Running));
        self.inner.progress.set_text("running");

        let result = self.inner.transfer().await;

        match &result {
            Ok(report) => {
                self.inner.update(|s| {
                    s.status = s.status.advance(TransferStatus::Done);
                    s.size_local = report.bytes;
                    s.size_remote = s.size_remote.or(Some(report.bytes));
                    s.active_workers = 0;
                });
                self.inner
                    .progress
                    .report(Some(report.bytes), Some(report.bytes), Some("done"));
            }
            Err(TransferError::Cancelled) => {
                self.inner.update(|s| {
                    s.status = s.status.advance(TransferStatus::Error);
                    s.active_workers = 0;
                    s.cancelled = true;
                });
                self.inner.progress.set_text("cancelled");
            }
            Err(error) => {
                warn!(error = %error, "transfer failed");
                self.inner.update(|s| {
                    s.status = s.status.advance(TransferStatus::Error);
                    s.active_workers = 0;
                });
                self.inner.progress.set_text("error");
            }
        }
        result
    }

    /// Spawns [`run`](Self::run) on its own tokio task. Subsequent calls have no effect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() || self.inner.read().status != TransferStatus::Pending {
            return;
        }
        let this = self.clone();
        let span = info_span!("transfer", dest = %self.inner.dest.display());
        *handle = Some(tokio::spawn(async move { this.run().await }.instrument(span)));
    }

    /// Waits for a transfer started with [`start`](Self::start), starting it
    /// first if needed.
    ///
    /// # Errors
    ///
    /// Returns the transfer's error, or [`TransferError::TaskPanicked`] if
    /// the spawned task panicked or this result was already taken by another
    /// waiter.
    pub async fn wait(&self) -> Result<TransferReport, TransferError> {
        self.start();
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| TransferError::TaskPanicked(e.to_string()))?,
            None => Err(TransferError::TaskPanicked(
                "transfer result already taken".to_string(),
            )),
        }
    }

    /// Progress of the whole transfer in bytes.
    #[must_use]
    pub fn progress(&self) -> &ProgressAggregator<DownloadError> {
        &self.inner.progress
    }

    /// Every error captured during the transfer: failed probes and failed range tasks.
    #[must_use]
    pub fn exceptions(&self) -> Vec<Arc<DownloadError>> {
        self.inner.progress.exceptions()
    }

    /// Snapshots of the range tasks of the current batch, in range order.
    #[must_use]
    pub fn child_snapshots(&self) -> Vec<TaskSnapshot> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ObservableTask::snapshot)
            .collect()
    }
}

impl ObservableTask for TransferCoordinator {
    fn pause(&self) {
        self.inner.control.pause();
        for child in self.inner.children_guard().iter() {
            child.pause();
        }
    }

    fn resume(&self) {
        self.inner.control.resume();
        for child in self.inner.children_guard().iter() {
            child.resume();
        }
    }

    fn cancel(&self) {
        self.inner.control.cancel();
        for child in self.inner.children_guard().iter() {
            child.cancel();
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        self.inner.read()
    }
}

impl CoordinatorInner {
    fn update(&self, apply: impl FnOnce(&mut TaskSnapshot)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state);
    }

    fn read(&self) -> TaskSnapshot {
        let mut snapshot = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.paused = self.control.is_paused() && snapshot.status == TransferStatus::Running;
        snapshot
    }

    fn children_guard(&self) -> std::sync::MutexGuard<'_, Vec<RangeTask>> {
        self.children.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the current batch. New children inherit the transfer's pause
    /// and cancel state under the same lock `pause`/`cancel` propagate through.
    fn adopt(&self, tasks: &[RangeTask]) {
        let mut children = self.children_guard();
        children.clear();
        for task in tasks {
            if self.control.is_paused() {
                task.pause();
            }
            if self.control.is_cancelled() {
                task.cancel();
            }
            children.push(task.clone());
        }
    }

    async fn transfer(&self) -> Result<TransferReport, TransferError> {
        if let Ok(meta) = tokio::fs::metadata(&self.dest).await {
            info!(bytes = meta.len(), "destination exists, skipping");
            self.progress.set_text("skipped: file already exists");
            return Ok(TransferReport {
                path: self.dest.clone(),
                bytes: meta.len(),
                mirror: None,
                tasks: 0,
                skipped: true,
            });
        }
        if let Some(parent) = self.dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        let mut last_probe_error = None;
        let mut attempted = 0;
        for (index, url) in self.mirrors.iter().enumerate() {
            if self.control.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            attempted += 1;
            self.progress.set_text("probing");

            let capability = match probe(&self.client, url, &self.config.headers).await {
                Ok(capability) => capability,
                Err(error) => {
                    warn!(url = %url, error = %error, "probe failed, trying next mirror");
                    let error = Arc::new(error);
                    self.progress.record_shared_exception(Arc::clone(&error));
                    last_probe_error = Some(error);
                    continue;
                }
            };
            self.update(|s| {
                s.resumable = Some(capability.accepts_ranges);
                s.size_remote = capability.content_length;
            });
            if let Some(length) = capability.content_length {
                self.progress.report(None, Some(length), None);
            }

            let strategy = plan_strategy(&capability, self.config.max_parallel);
            debug!(url = %url, ?strategy, "strategy chosen");
            match strategy {
                Strategy::Empty => return self.create_empty(url).await,
                Strategy::Parallel(ranges) => {
                    return self.run_parallel(url, capability, ranges).await;
                }
                Strategy::SingleStream { resumable } => {
                    let remaining = self.mirrors.len() - index - 1;
                    match self.run_single(url, capability, resumable).await {
                        Ok(report) => return Ok(report),
                        Err(BatchFailure::Cancelled) => return Err(TransferError::Cancelled),
                        Err(BatchFailure::Panicked) => {
                            return Err(TransferError::TaskPanicked(
                                "range task exited without a final status".to_string(),
                            ));
                        }
                        Err(BatchFailure::Failed(errors)) => {
                            let Some(error) = errors.last().cloned() else {
                                return Err(TransferError::Cancelled);
                            };
                            if remaining > 0 && classify_error(&error).allows_fallback() {
                                warn!(url = %url, error = %error, "stream failed, restarting on next mirror");
                                self.discard_partial().await;
                                continue;
                            }
                            return Err(TransferError::Stream { source: error });
                        }
                    }
                }
            }
        }

        Err(TransferError::NoViableSource {
            attempted,
            last: last_probe_error,
        })
    }

    async fn create_empty(&self, url: &str) -> Result<TransferReport, TransferError> {
        tokio::fs::File::create(&self.dest)
            .await
            .map_err(|e| TransferError::io(&self.dest, e))?;
        info!("zero-length resource, created empty file");
        Ok(TransferReport {
            path: self.dest.clone(),
            bytes: 0,
            mirror: Some(url.to_string()),
            tasks: 0,
            skipped: false,
        })
    }

    async fn discard_partial(&self) {
        let temp = in_flight_path(&self.dest);
        match tokio::fs::remove_file(&temp).await {
            Ok(()) => debug!(path = %temp.display(), "discarded partial stream"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %temp.display(), error = %e, "failed to discard partial stream"),
        }
    }

    async fn run_single(
        &self,
        url: &str,
        capability: Capability,
        resumable: bool,
    ) -> Result<TransferReport, BatchFailure> {
        let task = RangeTask::new(
            self.client.clone(),
            url,
            &self.dest,
            None,
            self.config.headers.clone(),
        )
        .with_resumable(Some(resumable))
        .with_expected_size(capability.content_length);
        let tasks = [task];

        self.progress.set_text("downloading");
        self.supervise(&tasks).await?;

        let bytes = tasks[0].snapshot().size_local;
        Ok(TransferReport {
            path: self.dest.clone(),
            bytes,
            mirror: Some(url.to_string()),
            tasks: 1,
            skipped: false,
        })
    }

    async fn run_parallel(
        &self,
        url: &str,
        capability: Capability,
        ranges: Vec<ByteRange>,
    ) -> Result<TransferReport, TransferError> {
        let total = capability.content_length.unwrap_or_default();
        let plan = MergePlan::for_ranges(&self.dest, total, &ranges)?;
        let tasks: Vec<RangeTask> = plan
            .chunks()
            .iter()
            .map(|chunk| {
                RangeTask::new(
                    self.client.clone(),
                    url,
                    &chunk.path,
                    Some(chunk.range),
                    self.config.headers.clone(),
                )
                .with_resumable(Some(true))
                .with_expected_size(Some(total))
            })
            .collect();
        info!(tasks = tasks.len(), bytes = total, "starting parallel transfer");

        self.progress.set_text("downloading");
        match self.supervise(&tasks).await {
            Ok(()) => {}
            Err(BatchFailure::Cancelled) => return Err(TransferError::Cancelled),
            Err(BatchFailure::Panicked) => {
                return Err(TransferError::TaskPanicked(
                    "range task exited without a final status".to_string(),
                ));
            }
            Err(BatchFailure::Failed(errors)) => {
                return Err(TransferError::Chunks {
                    total: tasks.len(),
                    errors,
                });
            }
        }

        self.progress.set_text("merging");
        let bytes = plan.merge().await?;
        Ok(TransferReport {
            path: self.dest.clone(),
            bytes,
            mirror: Some(url.to_string()),
            tasks: tasks.len(),
            skipped: false,
        })
    }

    /// Starts `tasks` and polls them until all are done or one fails.
    async fn supervise(&self, tasks: &[RangeTask]) -> Result<(), BatchFailure> {
        self.adopt(tasks);
        for task in tasks {
            task.start();
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let outcome = loop {
            ticker.tick().await;
            let snapshots: Vec<TaskSnapshot> = tasks.iter().map(ObservableTask::snapshot).collect();
            self.aggregate(&snapshots);

            if snapshots.iter().all(|s| s.status == TransferStatus::Done) {
                break Ok(());
            }
            let failed = snapshots.iter().any(|s| s.status == TransferStatus::Error);
            let vanished = tasks
                .iter()
                .zip(&snapshots)
                .any(|(task, s)| !s.status.is_terminal() && task.has_exited());
            if failed || vanished {
                for task in tasks {
                    task.cancel();
                }
                break Err(vanished);
            }
        };

        for task in tasks {
            task.wait().await;
        }
        let snapshots: Vec<TaskSnapshot> = tasks.iter().map(ObservableTask::snapshot).collect();
        self.aggregate(&snapshots);
        self.children_guard().clear();

        let vanished = match outcome {
            Ok(()) => return Ok(()),
            Err(vanished) => vanished,
        };
        let errors: Vec<Arc<DownloadError>> = tasks.iter().flat_map(RangeTask::exceptions).collect();
        for error in &errors {
            self.progress.record_shared_exception(Arc::clone(error));
        }
        if !errors.is_empty() {
            Err(BatchFailure::Failed(errors))
        } else if vanished {
            Err(BatchFailure::Panicked)
        } else {
            Err(BatchFailure::Cancelled)
        }
    }

    fn aggregate(&self, snapshots: &[TaskSnapshot]) {
        let size_local: u64 = snapshots.iter().map(|s| s.size_local).sum();
        let active = snapshots
            .iter()
            .filter(|s| s.status == TransferStatus::Running)
            .count();
        let active_workers = u32::try_from(active).unwrap_or(u32::MAX);
        self.update(|s| {
            s.size_local = size_local;
            s.active_workers = active_workers;
        });
        self.progress.report(Some(size_local), None, None);
    }
}
