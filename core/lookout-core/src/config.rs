//! Pipeline configuration.
//!
//! Every knob has a default so the agent runs usefully with no config file
//! at all. A partial file overrides only the keys it names.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LookoutError, Result};
use crate::labels::Label;
use crate::preview::PreviewResolution;
use crate::retry::RetryPolicy;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".lookout/config.toml";

/// How the playback link positions within the archived stream.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Follow the stream head.
    Live,
    /// Start from a point in the recent past and keep following.
    LiveReplay,
}

impl Default for PlaybackMode {
    fn default() -> Self {
        Self::Live
    }
}

/// Where a live-replay link starts playback.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplayAnchor {
    /// Anchor at the detection event's own timestamp.
    EventTime,
    /// Anchor at the earliest archived fragment in the trailing window.
    EarliestFragment,
}

impl Default for ReplayAnchor {
    fn default() -> Self {
        Self::EventTime
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PreviewConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_preview_resolution")]
    pub resolution: String,
    #[serde(default = "default_preview_fifo_path")]
    pub fifo_path: PathBuf,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            resolution: default_preview_resolution(),
            fifo_path: default_preview_fifo_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// The label that counts as a hit for recording and alerting.
    #[serde(default = "default_target_label")]
    pub target_label: Label,
    /// Minimum confidence for a target-label detection to qualify.
    #[serde(default = "default_target_confidence")]
    pub target_confidence: f32,
    /// Detections below this confidence are discarded at intake, whatever
    /// their label.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
    /// Recording stops once this many seconds pass with no qualifying
    /// detection. Strictly greater than; an exact tie keeps recording.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: i64,
    /// Minimum seconds between outbound alerts.
    #[serde(default = "default_min_notify_interval_secs")]
    pub min_notify_interval_secs: i64,
    /// Playback link resolution attempts before giving up.
    #[serde(default = "default_resolve_attempts")]
    pub resolve_attempts: u32,
    /// Pause between resolution attempts, in milliseconds.
    #[serde(default = "default_resolve_delay_ms")]
    pub resolve_delay_ms: u64,
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    #[serde(default)]
    pub playback_mode: PlaybackMode,
    #[serde(default)]
    pub replay_anchor: ReplayAnchor,
    /// Trailing window scanned for archived fragments, in seconds.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: i64,
    /// How long a resolved playback link stays valid, in seconds.
    #[serde(default = "default_link_expiry_secs")]
    pub link_expiry_secs: u64,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_alert_topic")]
    pub alert_topic: String,
    #[serde(default = "default_alert_subject")]
    pub alert_subject: String,
    #[serde(default)]
    pub preview: PreviewConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_label: default_target_label(),
            target_confidence: default_target_confidence(),
            score_threshold: default_score_threshold(),
            stop_timeout_secs: default_stop_timeout_secs(),
            min_notify_interval_secs: default_min_notify_interval_secs(),
            resolve_attempts: default_resolve_attempts(),
            resolve_delay_ms: default_resolve_delay_ms(),
            stream_name: default_stream_name(),
            playback_mode: PlaybackMode::default(),
            replay_anchor: ReplayAnchor::default(),
            replay_window_secs: default_replay_window_secs(),
            link_expiry_secs: default_link_expiry_secs(),
            device_id: default_device_id(),
            alert_topic: default_alert_topic(),
            alert_subject: default_alert_subject(),
            preview: PreviewConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads from `path`, or from `~/.lookout/config.toml` when `path` is
    /// `None`. A missing file yields the defaults; a present but malformed
    /// or invalid file is an error.
    pub fn load(path: Option<&Path>) -> Result<PipelineConfig> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        if !config_path.exists() {
            return Ok(PipelineConfig::default());
        }

        let content =
            fs_err::read_to_string(&config_path).map_err(|err| LookoutError::ConfigRead {
                path: config_path.clone(),
                source: err,
            })?;
        let config: PipelineConfig =
            toml::from_str(&content).map_err(|err| LookoutError::ConfigMalformed {
                path: config_path.clone(),
                details: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_unit_range("target_confidence", self.target_confidence)?;
        validate_unit_range("score_threshold", self.score_threshold)?;
        if self.stop_timeout_secs <= 0 {
            return Err(invalid("stop_timeout_secs", "must be greater than zero"));
        }
        if self.min_notify_interval_secs < 0 {
            return Err(invalid("min_notify_interval_secs", "must not be negative"));
        }
        if self.resolve_attempts == 0 {
            return Err(invalid("resolve_attempts", "must be at least 1"));
        }
        if self.replay_window_secs <= 0 {
            return Err(invalid("replay_window_secs", "must be greater than zero"));
        }
        if self.link_expiry_secs == 0 {
            return Err(invalid("link_expiry_secs", "must be greater than zero"));
        }
        if self.stream_name.trim().is_empty() {
            return Err(invalid("stream_name", "must not be empty"));
        }
        if self.device_id.trim().is_empty() {
            return Err(invalid("device_id", "must not be empty"));
        }
        PreviewResolution::parse(&self.preview.resolution)?;
        Ok(())
    }

    pub fn stop_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stop_timeout_secs)
    }

    pub fn replay_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.replay_window_secs)
    }

    pub fn link_expiry(&self) -> Duration {
        Duration::from_secs(self.link_expiry_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.resolve_attempts,
            Duration::from_millis(self.resolve_delay_ms),
        )
    }

    pub fn preview_resolution(&self) -> Result<PreviewResolution> {
        PreviewResolution::parse(&self.preview.resolution)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(LookoutError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

fn validate_unit_range(field: &'static str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, "must be within [0, 1]"));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: &str) -> LookoutError {
    LookoutError::ConfigInvalid {
        field,
        reason: reason.to_string(),
    }
}

fn default_target_label() -> Label {
    Label::Person
}

fn default_target_confidence() -> f32 {
    0.72
}

fn default_score_threshold() -> f32 {
    0.25
}

fn default_stop_timeout_secs() -> i64 {
    120
}

fn default_min_notify_interval_secs() -> i64 {
    30
}

fn default_resolve_attempts() -> u32 {
    15
}

fn default_resolve_delay_ms() -> u64 {
    1000
}

fn default_stream_name() -> String {
    "LookoutCamera".to_string()
}

fn default_replay_window_secs() -> i64 {
    120
}

fn default_link_expiry_secs() -> u64 {
    43_200
}

fn default_device_id() -> String {
    "lookout-0".to_string()
}

fn default_alert_topic() -> String {
    "lookout-alerts".to_string()
}

fn default_alert_subject() -> String {
    "Lookout detection alert".to_string()
}

fn default_preview_resolution() -> String {
    "480p".to_string()
}

fn default_preview_fifo_path() -> PathBuf {
    PathBuf::from("/tmp/lookout-preview.mjpeg")
}
