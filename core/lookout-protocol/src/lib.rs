//! IPC protocol types and validation for lookout-agent.
//!
//! This crate is shared by the agent and its clients to prevent schema drift.
//! The agent remains the authority on validation, but clients can reuse the
//! same types to construct valid requests.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetStatus,
    Frame,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub frame: Option<FrameReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// One inference pass over a captured frame, as reported by the camera-side
/// producer. Observations carry raw model label codes; the agent maps them to
/// labels and decides what to do.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FrameReport {
    pub frame_id: String,
    pub observed_at: String,
    pub observations: Vec<WireObservation>,
    /// JPEG bytes of the frame, base64-encoded. Optional; only needed when
    /// the preview stream is enabled on the agent.
    #[serde(default)]
    pub frame_jpeg: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WireObservation {
    pub code: u32,
    pub confidence: f32,
    #[serde(default)]
    pub bbox: Option<WireBox>,
}

/// Corner-form bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WireBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl FrameReport {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.frame_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_frame_id", "frame_id is required"));
        }
        if self.frame_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_frame_id",
                "frame_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.observed_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "observed_at must be RFC3339",
            ));
        }

        for (index, observation) in self.observations.iter().enumerate() {
            validate_observation(index, observation)?;
        }

        Ok(())
    }
}

fn validate_observation(index: usize, observation: &WireObservation) -> Result<(), ErrorInfo> {
    if !observation.confidence.is_finite()
        || observation.confidence < 0.0
        || observation.confidence > 1.0
    {
        return Err(ErrorInfo::new(
            "invalid_confidence",
            format!("observation {} confidence must be within [0, 1]", index),
        ));
    }

    if let Some(bbox) = &observation.bbox {
        let corners = [bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax];
        if corners.iter().any(|corner| !corner.is_finite()) {
            return Err(ErrorInfo::new(
                "invalid_bbox",
                format!("observation {} bbox corners must be finite", index),
            ));
        }
        if bbox.xmin > bbox.xmax || bbox.ymin > bbox.ymax {
            return Err(ErrorInfo::new(
                "invalid_bbox",
                format!("observation {} bbox corners are out of order", index),
            ));
        }
    }

    Ok(())
}

/// Payload for a successful `get_health` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthData {
    pub status: String,
    pub pid: u32,
    pub version: String,
    pub protocol_version: u32,
}

/// Payload for a successful `get_status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusData {
    pub recording_state: String,
    pub last_qualifying_at: Option<String>,
    pub frames_processed: u64,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
    pub alerts_dropped: u64,
}

/// Payload for a successful `frame` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameData {
    pub accepted: bool,
    pub recording_state: String,
    pub command: Option<String>,
    pub dispatched: bool,
}
