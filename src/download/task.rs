//! Range task: downloads one contiguous byte range (or a whole resource) to disk.
//!
//! Bytes are written to `<target>.download` and renamed to `<target>` once the
//! range is complete, so a file at the target path is always whole. A partial
//! in-flight file survives cancellation and errors and is resumed on the next
//! start when the origin is known to be resumable.
//!
//! A task never returns its failure across the spawn boundary: the error is
//! recorded on the task and its snapshot ends in [`TransferStatus::Error`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, HeaderMap};
use reqwest::{Response, StatusCode};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use super::client::HttpClient;
use super::control::{Cancelled, ObservableTask, TaskControl};
use super::error::DownloadError;
use super::range::{ByteRange, in_flight_path, open_range_header, parse_content_range};
use super::status::{TaskSnapshot, TransferStatus};
use crate::progress::ProgressAggregator;

/// Parameters of one range download. Fixed once the task starts.
#[derive(Debug, Clone)]
struct TaskRequest {
    client: HttpClient,
    url: String,
    target: PathBuf,
    range: Option<ByteRange>,
    headers: HeaderMap,
    resumable: Option<bool>,
    expected_size: Option<u64>,
}

#[derive(Debug, Default)]
struct TaskShared {
    control: TaskControl,
    state: Mutex<TaskSnapshot>,
    progress: ProgressAggregator<DownloadError>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskShared {
    fn update(&self, apply: impl FnOnce(&mut TaskSnapshot)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut state);
    }

    fn read(&self) -> TaskSnapshot {
        let mut snapshot = *self.state.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.paused = self.control.is_paused() && snapshot.status == TransferStatus::Running;
        snapshot
    }

    fn set_local(&self, bytes: u64) {
        self.update(|s| s.size_local = bytes);
        self.progress.report(Some(bytes), None, None);
    }

    fn set_remote(&self, size: Option<u64>) {
        if let Some(size) = size {
            self.update(|s| s.size_remote = Some(size));
            self.progress.report(None, Some(size), None);
        }
    }
}

/// Why a run stopped early.
enum Stop {
    Cancelled,
    Failed(DownloadError),
}

impl From<Cancelled> for Stop {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<DownloadError> for Stop {
    fn from(error: DownloadError) -> Self {
        Self::Failed(error)
    }
}

/// Handle to a single range download running on its own tokio task.
///
/// Cloning yields another handle to the same task.
///
/// # Example
///
/// ```no_run
/// use mediafetch_core::download::{ByteRange, HttpClient, RangeTask, TransferStatus};
/// use std::path::Path;
///
/// # async fn example() {
/// let range = ByteRange::new(0, 1_048_575);
/// let task = RangeTask::new(
///     HttpClient::new(),
///     "https://cdn.example.com/v.m4s",
///     Path::new("./v.m4s.part-0-1048575"),
///     range,
///     Default::default(),
/// )
/// .with_resumable(Some(true));
/// task.start();
/// let snapshot = task.wait().await;
/// assert!(snapshot.status.is_terminal());
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RangeTask {
    request: TaskRequest,
    shared: Arc<TaskShared>,
}

impl RangeTask {
    /// Creates a pending task that will write `range` of `url` to `target`.
    ///
    /// `range = None` downloads the whole resource with an open-ended request.
    /// `headers` are sent in addition to the client's default headers.
    #[must_use]
    pub fn new(
        client: HttpClient,
        url: impl Into<String>,
        target: impl Into<PathBuf>,
        range: Option<ByteRange>,
        headers: HeaderMap,
    ) -> Self {
        let shared = TaskShared::default();
        shared.update(|s| s.size_remote = range.map(|r| r.len()));
        if let Some(range) = range {
            shared.progress.report(None, Some(range.len()), None);
        }
        Self {
            request: TaskRequest {
                client,
                url: url.into(),
                target: target.into(),
                range,
                headers,
                resumable: None,
                expected_size: None,
            },
            shared: Arc::new(shared),
        }
    }

    /// Declares whether the origin is known to honor ranges for this URL.
    ///
    /// A partial in-flight file is only resumed when this is `Some(true)`;
    /// otherwise it is discarded and the range restarts from zero.
    #[must_use]
    pub fn with_resumable(mut self, resumable: Option<bool>) -> Self {
        self.request.resumable = resumable;
        self.shared.update(|s| s.resumable = resumable);
        self
    }

    /// Sets the probed size of the whole resource.
    ///
    /// A `206` whose `Content-Range` reports a different total fails the task.
    /// When `range` is `None` the body length is also verified against it.
    #[must_use]
    pub fn with_expected_size(mut self, size: Option<u64>) -> Self {
        self.request.expected_size = size;
        if self.request.range.is_none() {
            self.shared.set_remote(size);
        }
        self
    }

    /// Final path of this task's bytes.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.request.target
    }

    /// Byte range this task covers, `None` for a whole-resource task.
    #[must_use]
    pub fn range(&self) -> Option<ByteRange> {
        self.request.range
    }

    /// URL this task downloads from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.request.url
    }

    /// Spawns the download. Calling `start` more than once has no effect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut handle = self
            .shared
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() || self.shared.read().status != TransferStatus::Pending {
            return;
        }
        self.shared.update(|s| {
            s.status = s.status.advance(TransferStatus::Running);
            s.active_workers = 1;
        });
        self.shared.progress.set_text("running");

        let request = self.request.clone();
        let shared = Arc::clone(&self.shared);
        let span = info_span!("range_task", url = %request.url, target = %request.target.display());
        *handle = Some(tokio::spawn(
            async move { execute(&request, &shared).await }.instrument(span),
        ));
    }

    /// Waits for the spawned download to end and returns the final snapshot.
    ///
    /// Returns the current snapshot immediately if the task was never started
    /// or another caller is already waiting.
    pub async fn wait(&self) -> TaskSnapshot {
        let handle = self
            .shared
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && let Err(join_error) = handle.await
        {
            warn!(error = %join_error, "range task panicked");
            self.shared.update(|s| {
                s.status = s.status.advance(TransferStatus::Error);
                s.active_workers = 0;
            });
        }
        self.snapshot()
    }

    /// Starts the task and waits for it to end.
    pub async fn run(&self) -> TaskSnapshot {
        self.start();
        self.wait().await
    }

    /// Returns true once the spawned future has finished, whatever its outcome.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.shared
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or_else(|| self.shared.read().status.is_terminal(), JoinHandle::is_finished)
    }

    /// Progress of this task in bytes.
    #[must_use]
    pub fn progress(&self) -> &ProgressAggregator<DownloadError> {
        &self.shared.progress
    }

    /// Errors captured by this task, oldest first.
    #[must_use]
    pub fn exceptions(&self) -> Vec<Arc<DownloadError>> {
        self.shared.progress.exceptions()
    }
}

impl ObservableTask for RangeTask {
    fn pause(&self) {
        self.shared.control.pause();
    }

    fn resume(&self) {
        self.shared.control.resume();
    }

    fn cancel(&self) {
        self.shared.control.cancel();
    }

    fn snapshot(&self) -> TaskSnapshot {
        self.shared.read()
    }
}

async fn execute(request: &TaskRequest, shared: &TaskShared) {
    let outcome = download(request, shared).await;
    match outcome {
        Ok(()) => {
            shared.update(|s| {
                s.status = s.status.advance(TransferStatus::Done);
                s.active_workers = 0;
            });
            shared.progress.set_text("done");
        }
        Err(Stop::Cancelled) => {
            debug!("range task cancelled, partial file kept");
            shared.update(|s| {
                s.status = s.status.advance(TransferStatus::Error);
                s.active_workers = 0;
                s.cancelled = true;
            });
            shared.progress.set_text("cancelled");
        }
        Err(Stop::Failed(error)) => {
            warn!(error = %error, "range task failed");
            shared.update(|s| {
                s.status = s.status.advance(TransferStatus::Error);
                s.active_workers = 0;
            });
            shared.progress.set_text("error");
            shared.progress.record_exception(error);
        }
    }
}

async fn download(request: &TaskRequest, shared: &TaskShared) -> Result<(), Stop> {
    let target = request.target.as_path();
    let temp = in_flight_path(target);

    if let Some(len) = file_len(target).await? {
        let temp_exists = file_len(&temp).await?.is_some();
        match request.range {
            None => {
                debug!(bytes = len, "target already present");
                shared.set_local(len);
                return Ok(());
            }
            Some(range) if len == range.len() => {
                debug!(bytes = len, "chunk already complete");
                shared.set_local(len);
                return Ok(());
            }
            Some(range) if len < range.len() && !temp_exists => {
                debug!(bytes = len, "short chunk moved back in flight");
                rename(target, &temp).await?;
            }
            Some(_) => remove(target).await?,
        }
    }

    let mut existing = file_len(&temp).await?.unwrap_or(0);
    let limit = request.range.map(|r| r.len()).or(request.expected_size);
    if existing > 0 && request.resumable != Some(true) {
        debug!(bytes = existing, "origin not known resumable, discarding partial file");
        existing = 0;
    }
    if limit.is_some_and(|limit| existing > limit) {
        debug!(bytes = existing, "partial file longer than expected, restarting");
        existing = 0;
    }
    shared.set_local(existing);

    if existing > 0 && limit == Some(existing) {
        debug!(bytes = existing, "partial file already complete");
        return finish(target, &temp).await;
    }

    shared.control.checkpoint().await?;

    let (range_header, requested_start) = match request.range {
        Some(range) => (range.header_from(existing), range.start() + existing),
        None if existing > 0 => (Some(open_range_header(existing)), existing),
        None => (None, 0),
    };
    debug!(offset = requested_start, range = ?range_header, "requesting bytes");

    let response = request
        .client
        .get(&request.url, &request.headers, range_header.as_deref())
        .await?;

    let status = response.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        // Only a whole-resource resume may treat 416 as "nothing left to send".
        let complete = request.range.is_none()
            && existing > 0
            && request.expected_size.is_none_or(|size| size == existing);
        if complete {
            info!(bytes = existing, "origin reports range past end, partial file complete");
            return finish(target, &temp).await;
        }
        return Err(DownloadError::http_status(&request.url, status.as_u16()).into());
    }

    let append = if status == StatusCode::PARTIAL_CONTENT {
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let actual_start = content_range.map(|(start, _, _)| start);
        if actual_start != Some(requested_start) {
            return Err(
                DownloadError::range_not_honored(&request.url, requested_start, actual_start)
                    .into(),
            );
        }
        let origin_total = content_range.and_then(|(_, _, total)| total);
        if let Some(probed) = request.expected_size
            && let Some(total) = origin_total
            && total != probed
        {
            warn!(probed, total, "origin changed the resource length");
            return Err(DownloadError::integrity(&temp, probed, total).into());
        }
        shared.update(|s| s.resumable = Some(true));
        if request.range.is_none() {
            shared.set_remote(request.expected_size.or(origin_total));
        }
        existing > 0
    } else if range_header.is_some() {
        // 200 to a ranged request: the body is the whole resource.
        shared.update(|s| s.resumable = Some(false));
        if request.range.is_some() {
            return Err(DownloadError::range_not_honored(&request.url, requested_start, None).into());
        }
        debug!("origin ignored range, restarting from zero");
        existing = 0;
        shared.set_local(0);
        shared.set_remote(request.expected_size.or(response.content_length()));
        false
    } else {
        if request.range.is_none() {
            shared.set_remote(request.expected_size.or(response.content_length()));
        }
        false
    };

    let expected = match request.range {
        Some(range) => Some(range.len()),
        None => shared.read().size_remote,
    };
    let written = stream_body(request, shared, response, &temp, existing, append, expected).await?;

    if let Some(expected) = expected
        && written != expected
    {
        return Err(DownloadError::integrity(&temp, expected, written).into());
    }

    finish(target, &temp).await?;
    info!(bytes = written, "range complete");
    Ok(())
}

/// Streams the response body into `temp`, checking the pause gate and the
/// cancellation token before every chunk write. Returns total bytes on disk.
async fn stream_body(
    request: &TaskRequest,
    shared: &TaskShared,
    response: Response,
    temp: &Path,
    existing: u64,
    append: bool,
    limit: Option<u64>,
) -> Result<u64, Stop> {
    let file = if append {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(temp)
            .await
    } else {
        File::create(temp).await
    }
    .map_err(|e| DownloadError::io(temp, e))?;

    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut on_disk = existing;

    let outcome: Result<(), Stop> = loop {
        let Some(chunk) = stream.next().await else {
            break Ok(());
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => break Err(DownloadError::from_reqwest(&request.url, e).into()),
        };
        if let Err(cancelled) = shared.control.checkpoint().await {
            break Err(cancelled.into());
        }
        let len = chunk.len() as u64;
        if let Some(limit) = limit
            && on_disk + len > limit
        {
            break Err(DownloadError::integrity(temp, limit, on_disk + len).into());
        }
        if let Err(e) = writer.write_all(&chunk).await {
            break Err(DownloadError::io(temp, e).into());
        }
        on_disk += len;
        shared.set_local(on_disk);
    };

    // Flush on every path so a kept partial file holds everything received.
    let flushed = writer.flush().await.map_err(|e| DownloadError::io(temp, e));
    outcome?;
    flushed?;
    Ok(on_disk)
}

async fn finish(target: &Path, temp: &Path) -> Result<(), Stop> {
    rename(temp, target).await
}

async fn file_len(path: &Path) -> Result<Option<u64>, DownloadError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DownloadError::io(path, e)),
    }
}

async fn rename(from: &Path, to: &Path) -> Result<(), Stop> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|e| DownloadError::io(to, e).into())
}

async fn remove(path: &Path) -> Result<(), Stop> {
    tokio::fs::remove_file(path)
        .await
        .map_err(|e| DownloadError::io(path, e).into())
}
