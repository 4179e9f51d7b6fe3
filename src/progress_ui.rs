//! Progress bar for transfers and media jobs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mediafetch_core::Progress;

const REFRESH: Duration = Duration::from_millis(120);

/// Spawns the progress bar when requested, polling `observe` until stopped.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `enabled` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui<F>(
    enabled: bool,
    observe: F,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>)
where
    F: Fn() -> Progress + Send + 'static,
{
    if !enabled {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bar_inner(observe, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_bar_inner<F>(observe: F, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Progress + Send + 'static,
{
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} {msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        loop {
            let stopping = stop.load(Ordering::SeqCst);
            render(&bar, &observe());
            if stopping {
                break;
            }
            tokio::time::sleep(REFRESH).await;
        }

        bar.finish_and_clear();
    })
}

fn render(bar: &ProgressBar, progress: &Progress) {
    if progress.total > 0 {
        bar.set_length(progress.total);
    }
    bar.set_position(progress.current);
    bar.set_message(progress.text.clone());
}
