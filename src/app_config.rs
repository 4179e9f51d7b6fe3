//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use mediafetch_core::download::constants::{MAX_PARALLEL, MIN_PARALLEL};

/// TOML-backed file configuration for mediafetch defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default output directory for media jobs.
    pub output_dir: Option<PathBuf>,
    /// Default number of parallel range tasks.
    pub max_parallel: Option<usize>,
    /// Connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// Per-read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// Supervision poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Default video quality preference (`max`, `min`, id or name).
    pub video_quality: Option<String>,
    /// Default audio quality preference.
    pub audio_quality: Option<String>,
    /// Default video codec constraint.
    pub video_codec: Option<String>,
    /// `User-Agent` sent with every request.
    pub user_agent: Option<String>,
    /// `Referer` sent with every request.
    pub referer: Option<String>,
    /// Default verbosity mode.
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_parallel) = self.max_parallel
            && !(MIN_PARALLEL..=MAX_PARALLEL).contains(&max_parallel)
        {
            bail!(
                "Invalid config value for `max_parallel`: {max_parallel}. Expected range: {MIN_PARALLEL}..={MAX_PARALLEL}"
            );
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(poll) = self.poll_interval_ms
            && !(10..=10_000).contains(&poll)
        {
            bail!("Invalid config value for `poll_interval_ms`: {poll}. Expected range: 10..=10000");
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Returns the stable string label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Verbose => "verbose",
            Self::Quiet => "quiet",
            Self::Debug => "debug",
        }
    }

    /// Tracing filter directive for this setting.
    #[must_use]
    pub fn filter(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mediafetch/config.toml`
/// 2. `$HOME/.config/mediafetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("mediafetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mediafetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from `explicit`, or from the default path if present.
///
/// An explicit path must exist; a missing default file yields the defaults.
pub fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    if let Some(path) = explicit {
        return read_file_config(path);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path),
        _ => Ok(FileConfig::default()),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "max_parallel" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                cfg.max_parallel = Some(usize::try_from(parsed).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "poll_interval_ms" => {
                cfg.poll_interval_ms = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "video_quality" => {
                cfg.video_quality = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "audio_quality" => {
                cfg.audio_quality = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "video_codec" => {
                cfg.video_codec = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "user_agent" => {
                cfg.user_agent = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "referer" => {
                cfg.referer = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!("Invalid `verbosity` value '{parsed}' on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
max_parallel = 4
verbosity = "verbose"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.max_parallel, Some(4));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Verbose));
        assert!(cfg.output_dir.is_none());
    }

    #[test]
    fn test_parse_config_all_fields() {
        let cfg = parse_config_str(
            r#"
output_dir = "/srv/media"
max_parallel = 16
connect_timeout_secs = 5
read_timeout_secs = 60
poll_interval_ms = 250
video_quality = "1080P"
audio_quality = "max"
video_codec = "hevc"
user_agent = "Mozilla/5.0"
referer = "https://www.example.com"
verbosity = "debug"
"#,
        )
        .expect("full config should parse");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/srv/media")));
        assert_eq!(cfg.max_parallel, Some(16));
        assert_eq!(cfg.connect_timeout_secs, Some(5));
        assert_eq!(cfg.read_timeout_secs, Some(60));
        assert_eq!(cfg.poll_interval_ms, Some(250));
        assert_eq!(cfg.video_quality.as_deref(), Some("1080P"));
        assert_eq!(cfg.audio_quality.as_deref(), Some("max"));
        assert_eq!(cfg.video_codec.as_deref(), Some("hevc"));
        assert_eq!(cfg.user_agent.as_deref(), Some("Mozilla/5.0"));
        assert_eq!(cfg.referer.as_deref(), Some("https://www.example.com"));
        assert_eq!(cfg.verbosity, Some(VerbositySetting::Debug));
    }

    #[test]
    fn test_parse_config_rejects_invalid_max_parallel() {
        for raw in ["max_parallel = 0", "max_parallel = 33"] {
            let err = parse_config_str(raw).expect_err("out-of-range parallelism expected");
            assert!(err.to_string().contains("max_parallel"), "{err}");
        }
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("max_parallel = 4 trailing")
            .expect_err("expected trailing token error");
        assert!(err.to_string().contains("max_parallel"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err =
            parse_config_str("connect_timeout_secs = 0").expect_err("invalid timeout expected");
        assert!(err.to_string().contains("connect_timeout_secs"));
        let err = parse_config_str("read_timeout_secs = 3601").expect_err("invalid timeout expected");
        assert!(err.to_string().contains("read_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_poll_interval() {
        let err = parse_config_str("poll_interval_ms = 1").expect_err("too fast");
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r##"
max_parallel = 4 # workers
referer = "https://a.example/#anchor" # hash inside the string is kept
"##,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.max_parallel, Some(4));
        assert_eq!(cfg.referer.as_deref(), Some("https://a.example/#anchor"));
    }

    #[test]
    fn test_parse_config_requires_quoted_strings() {
        let err = parse_config_str("video_quality = 1080P").expect_err("unquoted string");
        assert!(err.to_string().contains("video_quality"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("concurrency = 4").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("max_parallel 4").expect_err("syntax error expected");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_verbosity_labels_and_filters() {
        assert_eq!(VerbositySetting::Default.as_str(), "default");
        assert_eq!(VerbositySetting::Quiet.filter(), "error");
        assert_eq!(VerbositySetting::Verbose.filter(), "debug");
        assert_eq!(VerbositySetting::Debug.filter(), "trace");
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "max_parallel = 2\n").expect("write config");
        let cfg = load_file_config(Some(&path)).expect("config loads");
        assert_eq!(cfg.max_parallel, Some(2));

        let missing = dir.path().join("absent.toml");
        let err = load_file_config(Some(&missing)).expect_err("missing explicit file");
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
