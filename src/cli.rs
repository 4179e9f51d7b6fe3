//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resumable, concurrent media stream downloader.
///
/// Downloads a resource from an ordered list of mirrors using parallel byte
/// ranges where the origin allows it, or runs a full media job from a DASH
/// stream catalog.
#[derive(Parser, Debug)]
#[command(name = "mediafetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Read defaults from this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download one resource, trying each URL as a mirror in order
    Fetch(FetchArgs),
    /// Print the streams a catalog offers and the ones that would be chosen
    Select(SelectArgs),
    /// Select, download and mux the streams of a catalog
    Job(JobArgs),
    /// Download an image set into numbered files (001.jpg, 002.jpg, ...)
    Images(ImagesArgs),
}

/// Network options shared by every subcommand that downloads.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct NetArgs {
    /// Parallel range tasks per stream (1-32)
    #[arg(short = 'j', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub parallel: Option<u8>,

    /// `User-Agent` header for every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// `Referer` header for every request
    #[arg(long)]
    pub referer: Option<String>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// Quality options shared by `select` and `job`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct QualityArgs {
    /// Video quality: max, min, an id (80) or a name (1080P)
    #[arg(long)]
    pub video_quality: Option<String>,

    /// Audio quality: max, min, an id (30280) or a name (192K)
    #[arg(long)]
    pub audio_quality: Option<String>,

    /// Video codec family: avc, hevc or av1
    #[arg(long)]
    pub codec: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Destination file
    pub dest: PathBuf,

    /// Mirror URLs, tried in order
    #[arg(required = true, num_args = 1..)]
    pub urls: Vec<String>,

    #[command(flatten)]
    pub net: NetArgs,
}

#[derive(clap::Args, Debug)]
pub struct SelectArgs {
    /// DASH catalog JSON file (`-` for stdin)
    pub catalog: PathBuf,

    #[command(flatten)]
    pub quality: QualityArgs,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct JobArgs {
    /// DASH catalog JSON file (`-` for stdin)
    pub catalog: PathBuf,

    /// Base name of the output file
    pub name: String,

    /// Directory for temporary and final files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Produce an audio file only
    #[arg(long)]
    pub audio_only: bool,

    /// Cover image URL, saved next to the output file
    #[arg(long, value_name = "URL")]
    pub cover: Option<String>,

    /// ffmpeg binary to use
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[command(flatten)]
    pub quality: QualityArgs,

    #[command(flatten)]
    pub net: NetArgs,
}

#[derive(clap::Args, Debug)]
pub struct ImagesArgs {
    /// Directory receiving the numbered images
    pub dir: PathBuf,

    /// Image URLs, in page order
    #[arg(required = true, num_args = 1..)]
    pub urls: Vec<String>,

    /// Images downloaded at the same time
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: u8,

    #[command(flatten)]
    pub net: NetArgs,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_fetch_parses_dest_and_mirrors() {
        let args = parse(&["mediafetch", "fetch", "out.m4s", "https://a/v", "https://b/v"]);
        let Command::Fetch(fetch) = args.command else {
            panic!("expected fetch");
        };
        assert_eq!(fetch.dest, PathBuf::from("out.m4s"));
        assert_eq!(fetch.urls, vec!["https://a/v", "https://b/v"]);
        assert_eq!(fetch.net.parallel, None);
        assert!(!fetch.net.no_progress);
    }

    #[test]
    fn test_cli_fetch_requires_a_url() {
        let err = Args::try_parse_from(["mediafetch", "fetch", "out.m4s"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_parallel_flag_and_bounds() {
        let args = parse(&["mediafetch", "fetch", "o", "https://a/v", "-j", "4"]);
        let Command::Fetch(fetch) = args.command else {
            panic!("expected fetch");
        };
        assert_eq!(fetch.net.parallel, Some(4));

        for bad in ["0", "33"] {
            let err =
                Args::try_parse_from(["mediafetch", "fetch", "o", "https://a/v", "-j", bad])
                    .unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_global_verbosity_flags() {
        let args = parse(&["mediafetch", "-vv", "select", "c.json"]);
        assert_eq!(args.verbose, 2);
        let args = parse(&["mediafetch", "select", "c.json", "-q"]);
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_select_quality_options() {
        let args = parse(&[
            "mediafetch",
            "select",
            "c.json",
            "--video-quality",
            "1080P",
            "--audio-quality",
            "min",
            "--codec",
            "hevc",
            "--json",
        ]);
        let Command::Select(select) = args.command else {
            panic!("expected select");
        };
        assert_eq!(select.quality.video_quality.as_deref(), Some("1080P"));
        assert_eq!(select.quality.audio_quality.as_deref(), Some("min"));
        assert_eq!(select.quality.codec.as_deref(), Some("hevc"));
        assert!(select.json);
    }

    #[test]
    fn test_cli_job_options() {
        let args = parse(&[
            "mediafetch",
            "job",
            "c.json",
            "My Video",
            "-o",
            "/srv/media",
            "--audio-only",
            "--referer",
            "https://www.example.com",
        ]);
        let Command::Job(job) = args.command else {
            panic!("expected job");
        };
        assert_eq!(job.name, "My Video");
        assert_eq!(job.output_dir, Some(PathBuf::from("/srv/media")));
        assert!(job.audio_only);
        assert_eq!(job.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(job.net.referer.as_deref(), Some("https://www.example.com"));
    }

    #[test]
    fn test_cli_job_cover_url() {
        let args = parse(&[
            "mediafetch",
            "job",
            "c.json",
            "clip",
            "--cover",
            "https://i.example.com/c.png",
        ]);
        let Command::Job(job) = args.command else {
            panic!("expected job");
        };
        assert_eq!(job.cover.as_deref(), Some("https://i.example.com/c.png"));
    }

    #[test]
    fn test_cli_images_defaults_to_eight_in_flight() {
        let args = parse(&["mediafetch", "images", "ep1", "https://i/1.jpg", "https://i/2.jpg"]);
        let Command::Images(images) = args.command else {
            panic!("expected images");
        };
        assert_eq!(images.dir, PathBuf::from("ep1"));
        assert_eq!(images.urls.len(), 2);
        assert_eq!(images.concurrency, 8);

        let err = Args::try_parse_from(["mediafetch", "images", "ep1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["mediafetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["mediafetch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let result = Args::try_parse_from(["mediafetch"]);
        assert!(result.is_err());
    }
}
