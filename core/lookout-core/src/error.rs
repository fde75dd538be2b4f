//! Error types for lookout-core operations.

use std::path::PathBuf;

/// All errors that can occur in lookout-core operations.
///
/// Collaborator seams (streaming sessions, archive lookups, alert and
/// telemetry channels) deliberately use plain `String` errors instead;
/// those are adapter failures the pipeline absorbs rather than propagates.
#[derive(Debug, thiserror::Error)]
pub enum LookoutError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Config file unreadable: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Invalid config value for {field}: {reason}")]
    ConfigInvalid { field: &'static str, reason: String },

    #[error("Home directory could not be determined")]
    HomeDirNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Send Gate Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Send gate state unreadable: {path}: {source}")]
    GateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Send gate state unwritable: {path}: {source}")]
    GateWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Send gate record malformed: {path}: {details}")]
    GateMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Preview Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Unknown preview resolution: {0}")]
    UnknownResolution(String),

    #[error("Frame decode failed: {0}")]
    FrameDecode(String),

    #[error("Frame encode failed: {0}")]
    FrameEncode(String),
}

/// Convenience type alias for Results using LookoutError.
pub type Result<T> = std::result::Result<T, LookoutError>;

// Conversion for string error compatibility
impl From<LookoutError> for String {
    fn from(err: LookoutError) -> String {
        err.to_string()
    }
}
