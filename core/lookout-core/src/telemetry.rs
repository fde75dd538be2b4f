//! Per-frame telemetry published to the device channel.
//!
//! Every processed frame produces one summary payload on the device topic,
//! whether or not anything was detected. Operational messages (recording
//! transitions) travel as plain strings on the same topic.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::detection::Detection;
use crate::labels::Label;

/// Channel detections and operational messages are published on. Publish
/// failures are the pipeline's to log, not to propagate; telemetry must
/// never stall frame processing.
pub trait TelemetryChannel: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), String>;
}

/// Topic carrying inference output for one device.
pub fn telemetry_topic(device_id: &str) -> String {
    format!("devices/{}/infer", device_id)
}

/// What one frame's inference found: per label, the confidence of the last
/// detection of that label within the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    observed_at: DateTime<Utc>,
    scores: BTreeMap<Label, f32>,
}

impl FrameSummary {
    pub fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            scores: BTreeMap::new(),
        }
    }

    pub fn from_detections(detections: &[Detection], observed_at: DateTime<Utc>) -> Self {
        let mut summary = Self::new(observed_at);
        for detection in detections {
            summary.record(detection);
        }
        summary
    }

    /// Records one detection. A later detection of the same label replaces
    /// the earlier one.
    pub fn record(&mut self, detection: &Detection) {
        self.scores.insert(detection.label, detection.confidence);
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// JSON payload: one key per detected label plus a `timestamp` key in
    /// ISO-8601 UTC.
    pub fn to_json(&self) -> String {
        let mut payload = Map::new();
        for (label, confidence) in &self.scores {
            payload.insert(label.as_str().to_string(), Value::from(*confidence));
        }
        payload.insert(
            "timestamp".to_string(),
            Value::from(
                self.observed_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ),
        );
        serde_json::to_string(&Value::Object(payload)).unwrap_or_else(|_| "{}".to_string())
    }
}
