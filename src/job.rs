//! Media job: select streams, download audio and video, post-process.
//!
//! A [`MediaJob`] owns one resource. It picks a video and an audio rendition
//! from a [`DashCatalog`], downloads each through its own
//! [`TransferCoordinator`] (the variant's primary and backup URLs are the
//! mirrors), then hands the temporary stream files to a [`PostProcessor`].
//!
//! Errors never cross the task boundary: they are captured in the job's
//! [`ProgressAggregator`] and read back through [`MediaJob::exceptions`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;

use crate::download::{
    DownloadError, HttpClient, ObservableTask, RangeTask, TaskControl, TaskSnapshot,
    TransferConfig, TransferCoordinator, TransferError, TransferReport, TransferStatus,
};
use crate::postprocess::{PostProcessError, PostProcessor};
use crate::progress::{Progress, ProgressAggregator};
use crate::select::{
    CatalogError, CatalogStream, CodecConstraint, DashCatalog, QualityPreference,
    audio_quality_name, select_streams, video_quality_name,
};

/// Errors captured by a media job.
#[derive(Debug, Error)]
pub enum JobError {
    /// Stream selection failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Downloading one of the streams failed.
    #[error("{stream} stream: {source}")]
    Transfer {
        /// `audio` or `video`.
        stream: &'static str,
        #[source]
        source: TransferError,
    },

    /// Downloading the cover image failed.
    #[error("cover: {source}")]
    Cover {
        #[source]
        source: Arc<DownloadError>,
    },

    /// The post-processor failed. Temporary stream files are kept.
    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    /// Local filesystem error.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The job task panicked.
    #[error("media job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The final file was produced.
    Done(PathBuf),
    /// The final file already existed; nothing was fetched.
    Skipped(PathBuf),
    /// Audio-only was requested but the resource has no audio track.
    NoAudio,
    /// Stopped by [`ObservableTask::cancel`].
    Cancelled,
    /// Failed; see [`MediaJob::exceptions`].
    Failed,
}

/// What a job downloads and produces.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Directory receiving temporary and final files.
    pub output_dir: PathBuf,
    /// Base file name, sanitized before use.
    pub name: String,
    /// Video quality preference.
    pub video_quality: QualityPreference,
    /// Audio quality preference.
    pub audio_quality: QualityPreference,
    /// Video codec constraint.
    pub video_codec: Option<CodecConstraint>,
    /// Produce an audio file instead of a video.
    pub audio_only: bool,
    /// Cover image saved next to the output as `<output>.<ext>`.
    pub cover_url: Option<String>,
    /// Configuration for both stream transfers.
    pub transfer: TransferConfig,
}

impl JobOptions {
    /// Best quality of everything, written to `output_dir/name_*`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            name: name.into(),
            video_quality: QualityPreference::Max,
            audio_quality: QualityPreference::Max,
            video_codec: None,
            audio_only: false,
            cover_url: None,
            transfer: TransferConfig::default(),
        }
    }
}

/// Chosen streams and the files derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    /// Video rendition and its temporary file.
    pub video: (CatalogStream, PathBuf),
    /// Audio rendition and its temporary file, absent without an audio track.
    pub audio: Option<(CatalogStream, PathBuf)>,
    /// Final output file.
    pub output: PathBuf,
    /// Cover side file, present when a cover URL is set.
    pub cover: Option<PathBuf>,
}

impl JobPlan {
    /// Selects streams and derives file names.
    ///
    /// Temporary files are `<name>_<vid>_video.m4v` and
    /// `<name>_<aid>_audio.m4a` (`.flac` when lossless). The output is
    /// `<name>_<QUALITY>.mp4`, `.mkv` with lossless audio, or `.mp3`/`.flac`
    /// when audio-only. The cover is `<output>.<ext>`, with the extension
    /// taken from the cover URL (`jpg` when it has none).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NoVideo`] for a catalog without video.
    pub fn build(catalog: &DashCatalog, options: &JobOptions) -> Result<Self, CatalogError> {
        let chosen = select_streams(
            catalog,
            &options.video_quality,
            &options.audio_quality,
            options.video_codec.as_ref(),
        )?;
        let name = sanitize_filename(&options.name);
        let dir = &options.output_dir;

        let video_id = chosen.video.variant.id;
        let video_temp = dir.join(format!("{name}_{video_id}_video.m4v"));

        let lossless = chosen.audio.as_ref().is_some_and(|a| a.variant.lossless);
        let audio = chosen.audio.map(|stream| {
            let ext = if stream.variant.lossless { "flac" } else { "m4a" };
            let temp = dir.join(format!("{name}_{}_audio.{ext}", stream.variant.id));
            (stream, temp)
        });

        let (quality, ext) = if options.audio_only {
            let id = audio.as_ref().map_or(0, |(stream, _)| stream.variant.id);
            let quality = audio_quality_name(id).map_or_else(|| id.to_string(), str::to_string);
            (quality, if lossless { "flac" } else { "mp3" })
        } else {
            let quality =
                video_quality_name(video_id).map_or_else(|| video_id.to_string(), str::to_string);
            (quality, if lossless { "mkv" } else { "mp4" })
        };
        let output_name = format!("{name}_{}.{ext}", sanitize_filename(&quality));
        let cover = options
            .cover_url
            .as_deref()
            .map(|url| dir.join(format!("{output_name}.{}", cover_extension(url))));
        let output = dir.join(output_name);

        Ok(Self {
            video: (chosen.video, video_temp),
            audio,
            output,
            cover,
        })
    }

    fn audio_conversion_quality(&self) -> Option<String> {
        let (stream, _) = self.audio.as_ref()?;
        if stream.variant.lossless {
            return None;
        }
        Some(
            audio_quality_name(stream.variant.id)
                .unwrap_or("192K")
                .to_ascii_lowercase(),
        )
    }
}

fn cover_extension(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|url| {
            Path::new(url.path())
                .extension()
                .map(|ext| sanitize_filename(&ext.to_string_lossy()))
        })
        .unwrap_or_else(|| "jpg".to_string())
}

/// Replaces characters that are illegal in file names on common filesystems
/// with their full-width forms, and control characters with `_`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' => '／',
            '\\' => '＼',
            ':' => '：',
            '*' => '＊',
            '?' => '？',
            '"' => '＂',
            '<' => '＜',
            '>' => '＞',
            '|' => '｜',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        "_".to_string()
    } else if trimmed == "." || trimmed == ".." {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}

struct JobInner {
    client: HttpClient,
    catalog: DashCatalog,
    options: JobOptions,
    post: Arc<dyn PostProcessor>,
    control: TaskControl,
    state: Mutex<TaskSnapshot>,
    progress: ProgressAggregator<JobError>,
    active: Mutex<Option<TransferCoordinator>>,
    handle: Mutex<Option<JoinHandle<JobOutcome>>>,
    outcome: watch::Sender<Option<JobOutcome>>,
}

impl std::fmt::Debug for JobInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobInner")
            .field("name", &self.options.name)
            .field("output_dir", &self.options.output_dir)
            .finish_non_exhaustive()
    }
}

enum Stop {
    Cancelled,
    Failed(JobError),
}

impl From<JobError> for Stop {
    fn from(error: JobError) -> Self {
        Self::Failed(error)
    }
}

/// One resource's job. Cloning yields another handle to the same job.
#[derive(Debug, Clone)]
pub struct MediaJob {
    inner: Arc<JobInner>,
}

impl MediaJob {
    /// Creates a pending job.
    #[must_use]
    pub fn new(
        client: HttpClient,
        catalog: DashCatalog,
        options: JobOptions,
        post: Arc<dyn PostProcessor>,
    ) -> Self {
        let progress = ProgressAggregator::new();
        progress.set_name(&options.name);
        Self {
            inner: Arc::new(JobInner {
                client,
                catalog,
                options,
                post,
                control: TaskControl::new(),
                state: Mutex::new(TaskSnapshot::default()),
                progress,
                active: Mutex::new(None),
                handle: Mutex::new(None),
                outcome: watch::Sender::new(None),
            }),
        }
    }

    /// Spawns [`run`](Self::run) on its own tokio task. Subsequent calls have no effect.
    pub fn start(&self) {
        let mut handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() || self.snapshot().status != TransferStatus::Pending {
            return;
        }
        self.inner.update(|s| s.status = s.status.advance(TransferStatus::Running));
        let this = self.clone();
        let span = info_span!("media_job", name = %self.inner.options.name);
        *handle = Some(tokio::spawn(async move { this.run().await }.instrument(span)));
    }

    /// Starts the job if needed and waits for it.
    pub async fn wait(&self) -> JobOutcome {
        self.start();
        let handle = self
            .inner
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return self.settled_outcome().await;
        };
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inner.progress.record_exception(JobError::Panicked(e.to_string()));
                self.inner.update(|s| s.status = s.status.advance(TransferStatus::Error));
                self.inner.outcome.send_replace(Some(JobOutcome::Failed));
                JobOutcome::Failed
            }
        }
    }

    /// Runs the job on the current task.
    #[instrument(skip(self), fields(name = %self.inner.options.name))]
    pub async fn run(&self) -> JobOutcome {
        let outcome = self.finish().await;
        self.inner.outcome.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn finish(&self) -> JobOutcome {
        self.inner.update(|s| s.status = s.status.advance(TransferStatus::Running));
        match self.inner.execute().await {
            Ok(outcome) => {
                self.inner.update(|s| {
                    s.status = s.status.advance(TransferStatus::Done);
                    s.active_workers = 0;
                });
                outcome
            }
            Err(Stop::Cancelled) => {
                self.inner.update(|s| {
                    s.status = s.status.advance(TransferStatus::Error);
                    s.active_workers = 0;
                    s.cancelled = true;
                });
                self.inner.progress.set_text("cancelled");
                JobOutcome::Cancelled
            }
            Err(Stop::Failed(error)) => {
                warn!(error = %error, "media job failed");
                self.inner.update(|s| {
                    s.status = s.status.advance(TransferStatus::Error);
                    s.active_workers = 0;
                });
                self.inner.progress.set_text("error");
                self.inner.progress.record_exception(error);
                JobOutcome::Failed
            }
        }
    }

    /// Consistent `(current, total, "<name> - <text>")` reading.
    #[must_use]
    pub fn observe(&self) -> Progress {
        self.inner.progress.observe()
    }

    /// Errors captured so far.
    #[must_use]
    pub fn exceptions(&self) -> Vec<Arc<JobError>> {
        self.inner.progress.exceptions()
    }

    /// Streams and file names this job will use.
    ///
    /// # Errors
    ///
    /// See [`JobPlan::build`].
    pub fn plan(&self) -> Result<JobPlan, CatalogError> {
        JobPlan::build(&self.inner.catalog, &self.inner.options)
    }

    /// Waits for the outcome of a run whose handle another waiter holds.
    async fn settled_outcome(&self) -> JobOutcome {
        let mut settled = self.inner.outcome.subscribe();
        let stored = settled
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone());
        stored.unwrap_or(JobOutcome::Failed)
    }
}

impl ObservableTask for MediaJob {
    fn pause(&self) {
        let active = self.inner.active_guard();
        self.inner.control.pause();
        if let Some(transfer) = active.as_ref() {
            transfer.pause();
        }
    }

    fn resume(&self) {
        let active = self.inner.active_guard();
        self.inner.control.resume();
        if let Some(transfer) = active.as_ref() {
            transfer.resume();
        }
    }

    fn cancel(&self) {
        let active = self.inner.active_guard();
        self.inner.control.cancel();
        if let Some(transfer) = active.as_ref() {
            transfer.cancel();
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        let mut snapshot = self.inner.read();
        snapshot.paused = self.inner.control.is_paused() && snapshot.status == TransferStatus::Running;
        snapshot
    }
}

impl JobInner {
    fn update(&self, apply: impl FnOnce(&mut TaskSnapshot)) {
        apply(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn read(&self) -> TaskSnapshot {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active_guard(&self) -> MutexGuard<'_, Option<TransferCoordinator>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `transfer` the target of pause/resume/cancel, inheriting the
    /// job's current state.
    fn adopt(&self, transfer: Option<TransferCoordinator>) {
        let mut active = self.active_guard();
        if let Some(transfer) = &transfer {
            if self.control.is_paused() {
                transfer.pause();
            }
            if self.control.is_cancelled() {
                transfer.cancel();
            }
        }
        *active = transfer;
    }

    async fn checkpoint(&self) -> Result<(), Stop> {
        self.control.checkpoint().await.map_err(|_| Stop::Cancelled)
    }

    async fn execute(&self) -> Result<JobOutcome, Stop> {
        let plan = JobPlan::build(&self.catalog, &self.options).map_err(JobError::from)?;

        if plan.audio.is_none() && self.options.audio_only {
            info!("no audio track, nothing to do");
            self.progress
                .set_text("terminated: no audio stream to download");
            return Ok(JobOutcome::NoAudio);
        }
        let exists = tokio::fs::try_exists(&plan.output)
            .await
            .map_err(|e| JobError::io(&plan.output, e))?;
        if exists {
            info!(output = %plan.output.display(), "output exists, skipping");
            self.progress.set_text("skipped: file already exists");
            return Ok(JobOutcome::Skipped(plan.output));
        }
        tokio::fs::create_dir_all(&self.options.output_dir)
            .await
            .map_err(|e| JobError::io(&self.options.output_dir, e))?;

        if let (Some(url), Some(cover)) = (&self.options.cover_url, &plan.cover) {
            self.checkpoint().await?;
            self.progress.set_text("cover");
            self.fetch_cover(url, cover).await?;
        }

        let mut offset = 0;
        if let Some((stream, temp)) = &plan.audio {
            self.checkpoint().await?;
            self.progress.set_text("audio stream");
            offset = self.fetch("audio", stream, temp, 0).await?;
        }

        if self.options.audio_only {
            let Some((_, audio_temp)) = &plan.audio else {
                return Ok(JobOutcome::NoAudio);
            };
            self.checkpoint().await?;
            self.progress.set_text("converting");
            let quality = plan.audio_conversion_quality();
            self.post
                .convert_audio(audio_temp, &plan.output, quality.as_deref())
                .await
                .map_err(JobError::from)?;
            remove_temp(audio_temp).await;
        } else {
            let (video, video_temp) = &plan.video;
            self.checkpoint().await?;
            self.progress.set_text("video stream");
            self.fetch("video", video, video_temp, offset).await?;

            self.checkpoint().await?;
            self.progress.set_text("merging");
            let audio_temp = plan.audio.as_ref().map(|(_, temp)| temp.as_path());
            self.post
                .merge(audio_temp, video_temp, &plan.output)
                .await
                .map_err(JobError::from)?;
            if let Some(audio_temp) = audio_temp {
                remove_temp(audio_temp).await;
            }
            remove_temp(video_temp).await;
        }

        info!(output = %plan.output.display(), "media job finished");
        self.progress.set_text("done");
        Ok(JobOutcome::Done(plan.output))
    }

    /// Downloads the cover image whole into `dest`.
    async fn fetch_cover(&self, url: &str, dest: &Path) -> Result<(), Stop> {
        debug!(url, dest = %dest.display(), "fetching cover");
        let task = RangeTask::new(
            self.client.clone(),
            url,
            dest,
            None,
            self.options.transfer.headers.clone(),
        );
        let snapshot = task.run().await;
        if snapshot.status == TransferStatus::Done {
            return Ok(());
        }
        if snapshot.cancelled {
            return Err(Stop::Cancelled);
        }
        let error = match task.exceptions().into_iter().next() {
            Some(source) => JobError::Cover { source },
            None => JobError::Panicked("cover task ended without an error".to_string()),
        };
        Err(error.into())
    }

    /// Downloads one stream, mirroring its byte progress (shifted by
    /// `offset`) into the job's progress. Returns the stream's size.
    async fn fetch(
        &self,
        kind: &'static str,
        stream: &CatalogStream,
        dest: &Path,
        offset: u64,
    ) -> Result<u64, Stop> {
        let transfer = TransferCoordinator::with_config(
            self.client.clone(),
            stream.variant.mirrors(),
            dest,
            self.options.transfer.clone(),
        )
        .map_err(|source| JobError::Transfer {
            stream: kind,
            source,
        })?;
        debug!(kind, id = stream.variant.id, dest = %dest.display(), "fetching stream");
        self.adopt(Some(transfer.clone()));
        self.update(|s| s.active_workers = 1);

        let result = self
            .follow(&transfer, offset, self.options.transfer.poll_interval)
            .await;
        self.adopt(None);
        self.update(|s| s.active_workers = 0);

        match result {
            Ok(report) => Ok(report.bytes),
            Err(TransferError::Cancelled) => Err(Stop::Cancelled),
            Err(source) => Err(Stop::Failed(JobError::Transfer {
                stream: kind,
                source,
            })),
        }
    }

    async fn follow(
        &self,
        transfer: &TransferCoordinator,
        offset: u64,
        poll_interval: Duration,
    ) -> Result<TransferReport, TransferError> {
        let wait = transfer.wait();
        tokio::pin!(wait);
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                result = &mut wait => {
                    self.mirror(transfer, offset);
                    return result;
                }
                _ = ticker.tick() => self.mirror(transfer, offset),
            }
        }
    }

    fn mirror(&self, transfer: &TransferCoordinator, offset: u64) {
        let progress = transfer.progress().observe();
        let current = offset + progress.current;
        let total = offset + progress.total;
        self.progress.report(Some(current), Some(total), None);
        self.update(|s| {
            s.size_local = current;
            s.size_remote = (progress.total > 0).then_some(total);
        });
    }
}

async fn remove_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove temporary stream");
    }
}
