//! Batch download of an ordered image set into numbered files.
//!
//! Every URL is fetched whole (no HEAD request, no range split) into
//! `<dir>/001.jpg`, `<dir>/002.jpg`, ... with at most
//! [`IMAGE_SET_CONCURRENCY`] downloads in flight. A failed image does not stop
//! the batch: its error is captured in the job's [`ProgressAggregator`] and the
//! remaining images carry on.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::HeaderMap;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::download::{
    DownloadError, HttpClient, ObservableTask, RangeTask, TaskControl, TransferStatus,
};
use crate::progress::{Progress, ProgressAggregator};

/// Default number of images downloaded at the same time.
pub const IMAGE_SET_CONCURRENCY: usize = 8;

/// File name of the image at zero-based `index`: `001.jpg` for index 0.
#[must_use]
pub fn image_file_name(index: usize) -> String {
    format!("{:03}.jpg", index + 1)
}

/// Result of an image-set run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSetReport {
    /// Files written, in URL order.
    pub saved: Vec<PathBuf>,
    /// Images that failed; their errors are in [`ImageSetJob::exceptions`].
    pub failed: usize,
    /// Set when the run stopped because it was cancelled.
    pub cancelled: bool,
}

/// Downloads a list of image URLs into one directory.
#[derive(Debug, Clone)]
pub struct ImageSetJob {
    client: HttpClient,
    urls: Vec<String>,
    dir: PathBuf,
    headers: HeaderMap,
    concurrency: usize,
    control: TaskControl,
    progress: ProgressAggregator<DownloadError>,
}

enum ItemOutcome {
    Saved(PathBuf),
    Failed,
    Cancelled,
}

impl ImageSetJob {
    /// Creates a job writing `urls` into `dir`.
    #[must_use]
    pub fn new(client: HttpClient, urls: Vec<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            urls,
            dir: dir.into(),
            headers: HeaderMap::new(),
            concurrency: IMAGE_SET_CONCURRENCY,
            control: TaskControl::new(),
            progress: ProgressAggregator::new(),
        }
    }

    /// Headers sent with every image request.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Maximum downloads in flight, at least 1.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Display name used as the progress text prefix.
    #[must_use]
    pub fn with_name(self, name: &str) -> Self {
        self.progress.set_name(name);
        self
    }

    /// Directory receiving the images.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `(finished images, total images, text)`.
    #[must_use]
    pub fn observe(&self) -> Progress {
        self.progress.observe()
    }

    /// Errors captured so far, one per failed image.
    #[must_use]
    pub fn exceptions(&self) -> Vec<Arc<DownloadError>> {
        self.progress.exceptions()
    }

    /// Stops queued images from starting and cancels the ones in flight.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Downloads every image and returns once all have finished.
    #[instrument(skip(self), fields(dir = %self.dir.display(), images = self.urls.len()))]
    pub async fn run(&self) -> ImageSetReport {
        let total = self.urls.len() as u64;
        self.progress.report(Some(0), Some(total), Some("downloading"));

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!(error = %e, "cannot create image directory");
            self.progress.record_exception(DownloadError::io(&self.dir, e));
            self.progress.set_text("error");
            return ImageSetReport {
                failed: self.urls.len(),
                ..ImageSetReport::default()
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let finished = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(self.urls.len());

        for (index, url) in self.urls.iter().enumerate() {
            let target = self.dir.join(image_file_name(index));
            let semaphore = Arc::clone(&semaphore);
            let finished = Arc::clone(&finished);
            let task = RangeTask::new(
                self.client.clone(),
                url.as_str(),
                &target,
                None,
                self.headers.clone(),
            );
            let control = self.control.clone();
            let progress = self.progress.clone();

            handles.push(tokio::spawn(async move {
                let outcome = fetch_image(&semaphore, &control, &task, &progress).await;
                let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
                progress.report(Some(done), Some(total), None);
                outcome
            }));
        }

        let mut report = ImageSetReport::default();
        for handle in handles {
            match handle.await {
                Ok(ItemOutcome::Saved(path)) => report.saved.push(path),
                Ok(ItemOutcome::Failed) => report.failed += 1,
                Ok(ItemOutcome::Cancelled) => report.cancelled = true,
                Err(e) => {
                    warn!(error = %e, "image task panicked");
                    report.failed += 1;
                }
            }
        }

        let text = if report.cancelled {
            "cancelled"
        } else if report.failed > 0 {
            "done with errors"
        } else {
            "done"
        };
        let done = finished.load(Ordering::SeqCst);
        self.progress.report(Some(done), Some(total), Some(text));
        info!(
            saved = report.saved.len(),
            failed = report.failed,
            cancelled = report.cancelled,
            "image set finished"
        );
        report
    }
}

async fn fetch_image(
    semaphore: &Semaphore,
    control: &TaskControl,
    task: &RangeTask,
    progress: &ProgressAggregator<DownloadError>,
) -> ItemOutcome {
    // The semaphore is never closed.
    let Ok(_permit) = semaphore.acquire().await else {
        return ItemOutcome::Cancelled;
    };
    if control.is_cancelled() {
        return ItemOutcome::Cancelled;
    }

    task.start();
    let watcher = tokio::spawn({
        let task = task.clone();
        let control = control.clone();
        async move {
            control.cancelled().await;
            task.cancel();
        }
    });
    let snapshot = task.wait().await;
    watcher.abort();

    match snapshot.status {
        TransferStatus::Done => {
            debug!(url = task.url(), target = %task.target().display(), "image saved");
            ItemOutcome::Saved(task.target().to_path_buf())
        }
        _ if snapshot.cancelled => ItemOutcome::Cancelled,
        _ => {
            for error in task.exceptions() {
                warn!(url = task.url(), error = %error, "image download failed");
                progress.record_shared_exception(error);
            }
            ItemOutcome::Failed
        }
    }
}
