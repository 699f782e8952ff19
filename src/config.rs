//! Pipeline configuration.
//!
//! Configuration is resolved in layers, later layers winning:
//! 1. Built-in defaults (every option has one)
//! 2. `storyboard.toml` in the working directory, if present
//! 3. `STORYBOARD_*` environment variables

use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Whether every scene yields a video or only the first segment's scenes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum VideoMode {
    /// Only segment 1 produces videos; later segments are marked SKIP
    #[default]
    Basic,
    /// Every scene produces a video
    Full,
}

impl std::fmt::Display for VideoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoMode::Basic => write!(f, "basic"),
            VideoMode::Full => write!(f, "full"),
        }
    }
}

/// Recognized tunables, all with defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Fan-out limit for concurrent LLM calls within a stage
    #[serde(default = "default_max_parallel_api")]
    pub max_parallel_api: usize,

    /// Director entries per scene-planning call
    #[serde(default = "default_stage6_batch_size")]
    pub stage6_batch_size: usize,

    /// Director entries per scene-prompt call
    #[serde(default = "default_stage7_batch_size")]
    pub stage7_batch_size: usize,

    /// Maximum attempts per LLM request
    #[serde(default = "default_llm_retry_max")]
    pub llm_retry_max: u32,

    /// Base for the exponential backoff schedule, in seconds
    #[serde(default = "default_llm_retry_base_seconds")]
    pub llm_retry_base_seconds: u64,

    /// Per-request timeout, in seconds
    #[serde(default = "default_llm_request_timeout_seconds")]
    pub llm_request_timeout_seconds: u64,

    /// Video note policy
    #[serde(default)]
    pub video_mode: VideoMode,

    /// Batch-wide duplicate-prompt ratio above which duplicates are
    /// replaced with deterministic fallbacks
    #[serde(default = "default_fallback_duplicate_ratio")]
    pub fallback_duplicate_ratio: f64,

    /// Continuous-mode scan interval, in seconds
    #[serde(default = "default_scan_interval_seconds")]
    pub scan_interval_seconds: u64,

    /// Directory scanned for incoming `{CODE}/{CODE}.srt`
    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: PathBuf,

    /// Directory holding imported projects
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,

    /// Chat-completion endpoint URL
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,

    /// Model name sent with every request
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    /// API keys, rotated on rate limits
    #[serde(default)]
    pub llm_api_keys: Vec<String>,
}

fn default_max_parallel_api() -> usize {
    10
}
fn default_stage6_batch_size() -> usize {
    15
}
fn default_stage7_batch_size() -> usize {
    10
}
fn default_llm_retry_max() -> u32 {
    15
}
fn default_llm_retry_base_seconds() -> u64 {
    3
}
fn default_llm_request_timeout_seconds() -> u64 {
    120
}
fn default_fallback_duplicate_ratio() -> f64 {
    0.8
}
fn default_scan_interval_seconds() -> u64 {
    60
}
fn default_inbox_dir() -> PathBuf {
    PathBuf::from("INBOX")
}
fn default_projects_dir() -> PathBuf {
    PathBuf::from("PROJECTS")
}
fn default_llm_endpoint() -> String {
    "https://api.deepseek.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        // Deserializing an empty table applies every serde default.
        toml_empty()
    }
}

fn toml_empty() -> PipelineConfig {
    toml::from_str("").expect("defaults deserialize from empty config")
}

impl PipelineConfig {
    /// Load configuration from `storyboard.toml` and the environment.
    ///
    /// Both sources are optional; missing values fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` errors for unreadable files or type mismatches.
    pub fn load() -> StoryboardResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an explicit file path.
    pub fn load_from(path: Option<&std::path::Path>) -> StoryboardResult<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(p) => builder.add_source(
                File::from(p.to_path_buf()).format(FileFormat::Toml).required(true),
            ),
            None => builder.add_source(
                File::with_name("storyboard")
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };

        let settings = builder
            .add_source(Environment::with_prefix("STORYBOARD").try_parsing(true))
            .build()
            .map_err(|e| StoryboardError::new(StoryboardErrorKind::Config(e.to_string())))?;

        settings
            .try_deserialize()
            .map_err(|e| StoryboardError::new(StoryboardErrorKind::Config(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_parallel_api, 10);
        assert_eq!(config.stage6_batch_size, 15);
        assert_eq!(config.stage7_batch_size, 10);
        assert_eq!(config.llm_retry_max, 15);
        assert_eq!(config.llm_retry_base_seconds, 3);
        assert_eq!(config.llm_request_timeout_seconds, 120);
        assert_eq!(config.video_mode, VideoMode::Basic);
        assert_eq!(config.scan_interval_seconds, 60);
        assert!(config.llm_api_keys.is_empty());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: PipelineConfig =
            toml::from_str("max_parallel_api = 4\nvideo_mode = \"full\"").unwrap();
        assert_eq!(config.max_parallel_api, 4);
        assert_eq!(config.video_mode, VideoMode::Full);
        assert_eq!(config.stage7_batch_size, 10);
    }
}
