//! Detection value types shared across the pipeline.

use chrono::{DateTime, Utc};

use crate::labels::Label;

/// Corner-form bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

/// A single model observation within one frame, already mapped to a label.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub label: Label,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// A detection lifted out of its frame: what was seen, how confidently,
/// and when. This is the unit the recorder and dispatcher reason about.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    pub label: Label,
    pub confidence: f32,
    pub observed_at: DateTime<Utc>,
}

impl Detection {
    pub fn into_event(self, observed_at: DateTime<Utc>) -> DetectionEvent {
        DetectionEvent {
            label: self.label,
            confidence: self.confidence,
            observed_at,
        }
    }
}
