//! CLI entry point for mediafetch.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use mediafetch_core::download::ObservableTask;
use mediafetch_core::image_set::ImageSetJob;
use mediafetch_core::job::{JobOptions, JobOutcome, MediaJob};
use mediafetch_core::select::{CatalogStream, SelectedStreams, select_streams};
use mediafetch_core::{
    CodecConstraint, DashCatalog, Ffmpeg, Progress, QualityPreference, TransferConfig,
    TransferCoordinator,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress_ui;

use app_config::FileConfig;
use cli::{Args, Command, FetchArgs, ImagesArgs, JobArgs, NetArgs, QualityArgs, SelectArgs};
use progress_ui::spawn_progress_ui;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_file_config(args.config.as_deref())?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config verbosity > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config.verbosity.map_or("info", |v| v.filter()),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match args.command {
        Command::Fetch(fetch) => run_fetch(fetch, &file_config, args.quiet).await,
        Command::Select(select) => run_select(&select, &file_config),
        Command::Job(job) => run_job(job, &file_config, args.quiet).await,
        Command::Images(images) => run_images(images, &file_config, args.quiet).await,
    }
}

fn transfer_config(net: &NetArgs, file: &FileConfig) -> Result<TransferConfig> {
    let mut config = TransferConfig::default();
    if let Some(parallel) = net.parallel.map(usize::from).or(file.max_parallel) {
        config = config.with_max_parallel(parallel);
    }
    if let Some(poll) = file.poll_interval_ms {
        config = config.with_poll_interval(Duration::from_millis(poll));
    }
    let connect = file
        .connect_timeout_secs
        .map_or(config.connect_timeout, Duration::from_secs);
    let read = file
        .read_timeout_secs
        .map_or(config.read_timeout, Duration::from_secs);
    config = config.with_timeouts(connect, read);

    if let Some(user_agent) = net.user_agent.as_ref().or(file.user_agent.as_ref()) {
        config = config.with_header("user-agent", user_agent)?;
    }
    if let Some(referer) = net.referer.as_ref().or(file.referer.as_ref()) {
        config = config.with_header("referer", referer)?;
    }
    config.validate()?;
    Ok(config)
}

fn preference(cli: Option<&String>, file: Option<&String>) -> QualityPreference {
    cli.or(file)
        .map_or(QualityPreference::Max, |value| QualityPreference::parse(value))
}

fn codec(quality: &QualityArgs, file: &FileConfig) -> Option<CodecConstraint> {
    quality
        .codec
        .as_ref()
        .or(file.video_codec.as_ref())
        .map(|value| CodecConstraint::parse(value))
}

fn read_catalog(path: &Path) -> Result<DashCatalog> {
    let raw = if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog '{}'", path.display()))?
    };
    DashCatalog::from_json(&raw)
        .with_context(|| format!("Failed to parse catalog '{}'", path.display()))
}

/// Cancels `task` on the first Ctrl-C.
fn cancel_on_ctrl_c<T>(task: T)
where
    T: ObservableTask + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping at the next chunk boundary");
            task.cancel();
        }
    });
}

async fn with_progress<F, Fut, T>(enabled: bool, observe: F, work: Fut) -> T
where
    F: Fn() -> Progress + Send + 'static,
    Fut: std::future::Future<Output = T>,
{
    let (handle, stop) = spawn_progress_ui(enabled, observe);
    let result = work.await;
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = handle
        && let Err(e) = handle.await
    {
        debug!(error = %e, "progress bar task failed");
    }
    result
}

async fn run_fetch(args: FetchArgs, file: &FileConfig, quiet: bool) -> Result<()> {
    let config = transfer_config(&args.net, file)?;
    let client = config.build_client()?;
    let transfer = TransferCoordinator::with_config(client, args.urls, &args.dest, config)?;
    cancel_on_ctrl_c(transfer.clone());

    let progress = transfer.progress().clone();
    let report = with_progress(
        !quiet && !args.net.no_progress,
        move || progress.observe(),
        transfer.wait(),
    )
    .await?;

    for error in transfer.exceptions() {
        debug!(error = %error, "recovered failure");
    }
    if report.skipped {
        info!(path = %report.path.display(), "already downloaded");
    } else {
        info!(
            path = %report.path.display(),
            bytes = report.bytes,
            tasks = report.tasks,
            mirror = report.mirror.as_deref().unwrap_or("-"),
            "download complete"
        );
    }
    Ok(())
}

fn describe(kind: &str, stream: &CatalogStream) -> String {
    let variant = &stream.variant;
    let mut line = format!("{kind}: id={}", variant.id);
    if let (Some(width), Some(height)) = (stream.width, stream.height) {
        line.push_str(&format!(" {width}x{height}"));
    }
    if let Some(codec) = &variant.codec {
        line.push_str(&format!(" codec={codec}"));
    }
    if let Some(bandwidth) = variant.size_hint {
        line.push_str(&format!(" bandwidth={bandwidth}"));
    }
    if variant.lossless {
        line.push_str(" lossless");
    }
    line.push_str(&format!(" mirrors={}", variant.mirrors().len()));
    line
}

fn run_select(args: &SelectArgs, file: &FileConfig) -> Result<()> {
    let catalog = read_catalog(&args.catalog)?;
    let chosen: SelectedStreams = select_streams(
        &catalog,
        &preference(args.quality.video_quality.as_ref(), file.video_quality.as_ref()),
        &preference(args.quality.audio_quality.as_ref(), file.audio_quality.as_ref()),
        codec(&args.quality, file).as_ref(),
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&chosen)?);
    } else {
        println!("{}", describe("video", &chosen.video));
        match &chosen.audio {
            Some(audio) => println!("{}", describe("audio", audio)),
            None => println!("audio: none"),
        }
    }
    Ok(())
}

async fn run_job(args: JobArgs, file: &FileConfig, quiet: bool) -> Result<()> {
    let catalog = read_catalog(&args.catalog)?;
    let config = transfer_config(&args.net, file)?;
    let client = config.build_client()?;

    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let mut options = JobOptions::new(output_dir, args.name.clone());
    options.video_quality =
        preference(args.quality.video_quality.as_ref(), file.video_quality.as_ref());
    options.audio_quality =
        preference(args.quality.audio_quality.as_ref(), file.audio_quality.as_ref());
    options.video_codec = codec(&args.quality, file);
    options.audio_only = args.audio_only;
    options.cover_url = args.cover.clone();
    options.transfer = config;

    let job = MediaJob::new(
        client,
        catalog,
        options,
        Arc::new(Ffmpeg::with_program(args.ffmpeg.clone())),
    );
    cancel_on_ctrl_c(job.clone());

    let observer = job.clone();
    let outcome = with_progress(
        !quiet && !args.net.no_progress,
        move || observer.observe(),
        job.wait(),
    )
    .await;

    match outcome {
        JobOutcome::Done(path) => info!(path = %path.display(), "media job complete"),
        JobOutcome::Skipped(path) => info!(path = %path.display(), "already exists, skipped"),
        JobOutcome::NoAudio => warn!("no audio stream to download"),
        JobOutcome::Cancelled => bail!("media job cancelled"),
        JobOutcome::Failed => {
            let exceptions = job.exceptions();
            let Some(last) = exceptions.last() else {
                bail!("media job failed");
            };
            bail!("media job failed: {last}");
        }
    }
    Ok(())
}

async fn run_images(args: ImagesArgs, file: &FileConfig, quiet: bool) -> Result<()> {
    let config = transfer_config(&args.net, file)?;
    let client = config.build_client()?;
    let job = ImageSetJob::new(client, args.urls, &args.dir)
        .with_concurrency(usize::from(args.concurrency));

    let interrupt = job.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping queued and running images");
            interrupt.cancel();
        }
    });

    let observer = job.clone();
    let report = with_progress(
        !quiet && !args.net.no_progress,
        move || observer.observe(),
        job.run(),
    )
    .await;

    for error in job.exceptions() {
        warn!(error = %error, "image failed");
    }
    if report.cancelled {
        bail!("image download cancelled");
    }
    if report.failed > 0 {
        bail!("{} of {} images failed", report.failed, report.failed + report.saved.len());
    }
    info!(dir = %args.dir.display(), images = report.saved.len(), "image set complete");
    Ok(())
}
