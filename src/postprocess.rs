//! External muxer seam.
//!
//! Downloaded audio and video streams are combined (or the audio converted)
//! by a [`PostProcessor`]. [`Ffmpeg`] shells out to the `ffmpeg` binary; tests
//! substitute an in-process fake.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Errors from the external tool.
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// The tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but reported failure.
    #[error("{program} exited with {code} while writing {}", output.display())]
    Failed {
        /// Program that was invoked.
        program: String,
        /// Exit code, `-1` when terminated by a signal.
        code: i32,
        /// File the tool was asked to produce.
        output: PathBuf,
    },
}

/// Combines or converts downloaded streams.
#[async_trait]
pub trait PostProcessor: Send + Sync {
    /// Muxes `video` with an optional `audio` track into `output` without
    /// re-encoding.
    async fn merge(
        &self,
        audio: Option<&Path>,
        video: &Path,
        output: &Path,
    ) -> Result<(), PostProcessError>;

    /// Converts an audio stream into `output`, at `quality` (for example
    /// `192k`) when lossy.
    async fn convert_audio(
        &self,
        input: &Path,
        output: &Path,
        quality: Option<&str>,
    ) -> Result<(), PostProcessError>;
}

/// [`PostProcessor`] backed by the `ffmpeg` command line tool.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: OsString,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new()
    }
}

impl Ffmpeg {
    /// Uses `ffmpeg` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    /// Uses an explicit binary.
    #[must_use]
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn merge_args(audio: Option<&Path>, video: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if let Some(audio) = audio {
            args.push("-i".into());
            args.push(audio.into());
        }
        args.push("-i".into());
        args.push(video.into());
        args.push("-vcodec".into());
        args.push("copy".into());
        if audio.is_some() {
            args.push("-acodec".into());
            args.push("copy".into());
        }
        args.push(output.into());
        args
    }

    fn convert_args(input: &Path, output: &Path, quality: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        if let Some(quality) = quality {
            args.push("-b:a".into());
            args.push(quality.into());
        }
        args.push(output.into());
        args
    }

    async fn run(&self, args: Vec<OsString>, output: &Path) -> Result<(), PostProcessError> {
        let program = self.program.to_string_lossy().into_owned();
        debug!(program = %program, ?args, "running post-processor");
        let status = Command::new(&self.program)
            .args(["-loglevel", "quiet", "-nostdin", "-hide_banner", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|source| PostProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(PostProcessError::Failed {
                program,
                code: status.code().unwrap_or(-1),
                output: output.to_path_buf(),
            })
        }
    }
}

#[async_trait]
impl PostProcessor for Ffmpeg {
    #[instrument(skip(self), fields(output = %output.display()))]
    async fn merge(
        &self,
        audio: Option<&Path>,
        video: &Path,
        output: &Path,
    ) -> Result<(), PostProcessError> {
        self.run(Self::merge_args(audio, video, output), output).await
    }

    #[instrument(skip(self), fields(output = %output.display()))]
    async fn convert_audio(
        &self,
        input: &Path,
        output: &Path,
        quality: Option<&str>,
    ) -> Result<(), PostProcessError> {
        self.run(Self::convert_args(input, output, quality), output)
            .await
    }
}
