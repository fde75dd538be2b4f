//! Playback link resolution against the video archive.
//!
//! A freshly started recording takes a few seconds to land in the archive,
//! so resolution retries on a fixed cadence rather than failing the first
//! time. Every attempt re-resolves the archive endpoints; a stale endpoint
//! from a previous attempt must not poison the rest of the budget.

use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{PipelineConfig, PlaybackMode, ReplayAnchor};
use crate::retry::Clock;

/// Which archive API an endpoint lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveApi {
    HlsSession,
    ListFragments,
}

impl ArchiveApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveApi::HlsSession => "get_hls_streaming_session_url",
            ArchiveApi::ListFragments => "list_fragments",
        }
    }
}

/// Parameters for minting one playback URL.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub mode: PlaybackMode,
    /// Playback start position. `None` in live mode, which always follows
    /// the stream head.
    pub start: Option<DateTime<Utc>>,
    /// How long the minted link stays valid.
    pub expiry: Duration,
}

/// An archived chunk of video, as the archive indexes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    pub number: u64,
    pub producer_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Client for the video archive service. Errors are transient by
/// assumption; the resolver retries them within its budget.
pub trait ArchiveClient: Send + Sync {
    /// Resolves the data endpoint serving `api` for `stream`.
    fn data_endpoint(&self, api: ArchiveApi, stream: &str) -> Result<String, String>;

    /// Mints a playback URL against a previously resolved endpoint.
    fn playback_url(
        &self,
        endpoint: &str,
        stream: &str,
        request: &PlaybackRequest,
    ) -> Result<String, String>;

    /// Lists archived fragments of `stream` within `window`.
    fn list_fragments(
        &self,
        endpoint: &str,
        stream: &str,
        window: &TimeWindow,
    ) -> Result<Vec<Fragment>, String>;
}

pub struct LinkResolver<A: ArchiveClient> {
    archive: A,
    config: PipelineConfig,
}

impl<A: ArchiveClient> LinkResolver<A> {
    pub fn new(archive: A, config: PipelineConfig) -> Self {
        Self { archive, config }
    }

    /// Resolves a playback link for a detection observed at `event_time`,
    /// retrying within the configured budget. `None` means the budget is
    /// spent or `cancel` was set; the caller decides what an alert without
    /// a link looks like.
    pub fn resolve(
        &self,
        clock: &dyn Clock,
        cancel: &AtomicBool,
        event_time: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let policy = self.config.retry_policy();
        let resolved = policy.run(clock, cancel, |_attempt| self.attempt(clock, event_time));
        match &resolved {
            Some(url) => debug!(url = %url, "Playback link resolved"),
            None => warn!(
                attempts = self.config.resolve_attempts,
                stream = %self.config.stream_name,
                "Playback link resolution exhausted its retry budget"
            ),
        }
        resolved
    }

    fn attempt(
        &self,
        clock: &dyn Clock,
        event_time: Option<DateTime<Utc>>,
    ) -> Result<String, String> {
        let endpoint = self
            .archive
            .data_endpoint(ArchiveApi::HlsSession, &self.config.stream_name)?;

        let start = match self.config.playback_mode {
            PlaybackMode::Live => None,
            PlaybackMode::LiveReplay => Some(self.replay_start(clock, event_time)?),
        };

        self.archive.playback_url(
            &endpoint,
            &self.config.stream_name,
            &PlaybackRequest {
                mode: self.config.playback_mode,
                start,
                expiry: self.config.link_expiry(),
            },
        )
    }

    fn replay_start(
        &self,
        clock: &dyn Clock,
        event_time: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, String> {
        if self.config.replay_anchor == ReplayAnchor::EventTime {
            if let Some(event_time) = event_time {
                return Ok(event_time);
            }
        }
        self.earliest_fragment_start(clock)
    }

    /// Scans the trailing replay window and anchors at the oldest fragment,
    /// by fragment number. An empty window is a transient failure: the
    /// archive may simply not have ingested the recording yet.
    fn earliest_fragment_start(&self, clock: &dyn Clock) -> Result<DateTime<Utc>, String> {
        let endpoint = self
            .archive
            .data_endpoint(ArchiveApi::ListFragments, &self.config.stream_name)?;
        let end = clock.now();
        let window = TimeWindow {
            start: end - self.config.replay_window(),
            end,
        };
        let fragments = self
            .archive
            .list_fragments(&endpoint, &self.config.stream_name, &window)?;
        fragments
            .iter()
            .min_by_key(|fragment| fragment.number)
            .map(|fragment| fragment.producer_timestamp)
            .ok_or_else(|| {
                format!(
                    "no fragments within the trailing {}s window",
                    self.config.replay_window_secs
                )
            })
    }
}
