//! Per-frame orchestration.
//!
//! One [`FrameAgent`] call fans a frame's observations out to the recorder,
//! the dispatch worker, telemetry, and the preview buffer. Everything here
//! is recoverable per frame: bad labels, bad JPEGs, and channel failures
//! are logged and the frame keeps flowing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::detection::{BoundingBox, Detection};
use crate::dispatch::DispatchHandle;
use crate::error::LookoutError;
use crate::labels::Label;
use crate::preview::{encode_frame, FrameBuffer, PreviewResolution};
use crate::recorder::{qualifies, Recorder, RecordingCommand, RecordingState, StreamingSession};
use crate::telemetry::{telemetry_topic, FrameSummary, TelemetryChannel};

/// One model observation as it arrives off the wire: numeric label code,
/// confidence, optional box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawObservation {
    pub code: u32,
    pub confidence: f32,
    pub bbox: Option<BoundingBox>,
}

/// What one frame did to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameOutcome {
    pub state: RecordingState,
    pub command: Option<RecordingCommand>,
    pub dispatched: bool,
}

pub struct FrameAgent<S: StreamingSession, T: TelemetryChannel> {
    recorder: Recorder<S>,
    telemetry: T,
    topic: String,
    dispatch: DispatchHandle,
    preview: Option<Arc<FrameBuffer>>,
    resolution: PreviewResolution,
    config: PipelineConfig,
}

impl<S: StreamingSession, T: TelemetryChannel> FrameAgent<S, T> {
    pub fn new(
        session: S,
        telemetry: T,
        dispatch: DispatchHandle,
        preview: Option<Arc<FrameBuffer>>,
        config: PipelineConfig,
    ) -> Result<Self, LookoutError> {
        let resolution = config.preview_resolution()?;
        let topic = telemetry_topic(&config.device_id);
        Ok(Self {
            recorder: Recorder::new(session, config.clone()),
            telemetry,
            topic,
            dispatch,
            preview,
            resolution,
            config,
        })
    }

    /// Runs one frame through the pipeline. `now` is the frame observation
    /// instant; every decision in the frame is made against it.
    pub fn process_frame(
        &mut self,
        observations: &[RawObservation],
        frame_jpeg: Option<&[u8]>,
        now: DateTime<Utc>,
    ) -> FrameOutcome {
        let detections = self.map_observations(observations);
        let summary = FrameSummary::from_detections(&detections, now);
        let description = summary.to_json();

        let mut command = None;
        let mut dispatched = false;
        if detections.is_empty() {
            // No retained detections still advances the clock, which is
            // what eventually stops a quiet recording.
            if let Some(issued) = self.recorder.tick(now) {
                command = Some(issued);
                self.publish_transition(issued);
            }
        } else {
            for detection in detections {
                let event = detection.into_event(now);
                if let Some(issued) = self.recorder.observe(&event, now) {
                    command = Some(issued);
                    self.publish_transition(issued);
                }
                if qualifies(&event, &self.config) {
                    dispatched |= self.dispatch.offer(event, description.clone());
                }
            }
        }

        self.publish(&description);

        if let (Some(buffer), Some(jpeg)) = (self.preview.as_ref(), frame_jpeg) {
            match encode_frame(jpeg, self.resolution) {
                Ok(frame) => buffer.publish(frame),
                Err(err) => warn!(error = %err, "Preview frame dropped"),
            }
        }

        FrameOutcome {
            state: *self.recorder.state(),
            command,
            dispatched,
        }
    }

    pub fn state(&self) -> &RecordingState {
        self.recorder.state()
    }

    fn map_observations(&self, observations: &[RawObservation]) -> Vec<Detection> {
        observations
            .iter()
            .filter(|observation| observation.confidence >= self.config.score_threshold)
            .filter_map(|observation| match Label::from_code(observation.code) {
                Some(label) => Some(Detection {
                    label,
                    confidence: observation.confidence,
                    bbox: observation.bbox,
                }),
                None => {
                    warn!(
                        code = observation.code,
                        "Unknown detection label code; skipping"
                    );
                    None
                }
            })
            .collect()
    }

    fn publish_transition(&self, command: RecordingCommand) {
        let message = match command {
            RecordingCommand::Start => "Recording session started",
            RecordingCommand::Stop => "Recording session stopped",
        };
        self.publish(message);
    }

    fn publish(&self, payload: &str) {
        if let Err(err) = self.telemetry.publish(&self.topic, payload) {
            warn!(error = %err, topic = %self.topic, "Telemetry publish failed");
        }
    }
}
