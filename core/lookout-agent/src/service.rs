//! Request handling for the agent socket.
//!
//! One [`AgentService`] is shared across connection threads. The frame
//! pipeline itself runs single-threaded behind a mutex; the dispatch worker
//! and preview renderer are owned here so shutdown can stop them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::{DateTime, Utc};
use tracing::warn;

use lookout_core::agent::{FrameAgent, RawObservation};
use lookout_core::detection::BoundingBox;
use lookout_core::dispatch::{DispatchStats, DispatchWorker};
use lookout_core::preview::PreviewRenderer;
use lookout_protocol::{
    FrameData, FrameReport, HealthData, Method, Request, Response, StatusData, PROTOCOL_VERSION,
};

use crate::adapters::LogTelemetry;
use crate::outbox::OutboxSession;

pub struct AgentService {
    agent: Mutex<FrameAgent<OutboxSession, LogTelemetry>>,
    worker: Mutex<Option<DispatchWorker>>,
    renderer: Mutex<Option<PreviewRenderer>>,
    stats: Arc<DispatchStats>,
    frames_processed: AtomicU64,
}

impl AgentService {
    pub fn new(
        agent: FrameAgent<OutboxSession, LogTelemetry>,
        worker: DispatchWorker,
        renderer: Option<PreviewRenderer>,
    ) -> Self {
        let stats = worker.handle().stats();
        Self {
            agent: Mutex::new(agent),
            worker: Mutex::new(Some(worker)),
            renderer: Mutex::new(renderer),
            stats,
            frames_processed: AtomicU64::new(0),
        }
    }

    pub fn handle_request(&self, request: Request) -> Response {
        if request.protocol_version != PROTOCOL_VERSION {
            return Response::error(
                request.id,
                "protocol_mismatch",
                "unsupported protocol version",
            );
        }

        match request.method {
            Method::GetHealth => self.handle_health(request.id),
            Method::GetStatus => self.handle_status(request.id),
            Method::Frame => self.handle_frame(request.id, request.frame),
            Method::Shutdown => Response::ok(request.id, serde_json::json!({ "stopping": true })),
        }
    }

    /// Stops the background threads. Connection handling keeps working;
    /// only the dispatch worker and renderer go away.
    pub fn shutdown(&self) {
        let renderer = self
            .renderer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(renderer) = renderer {
            renderer.stop();
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }

    fn handle_health(&self, id: Option<String>) -> Response {
        let data = HealthData {
            status: "ok".to_string(),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
        };
        to_ok_response(id, &data)
    }

    fn handle_status(&self, id: Option<String>) -> Response {
        let state = {
            let agent = self
                .agent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *agent.state()
        };

        let counts = self.stats.counts();
        let data = StatusData {
            recording_state: state.as_str().to_string(),
            last_qualifying_at: state
                .last_qualifying_at()
                .map(|instant| instant.to_rfc3339()),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            alerts_sent: counts.sent,
            alerts_suppressed: counts.suppressed,
            alerts_dropped: counts.dropped,
        };
        to_ok_response(id, &data)
    }

    fn handle_frame(&self, id: Option<String>, frame: Option<FrameReport>) -> Response {
        let report = match frame {
            Some(report) => report,
            None => return Response::error(id, "invalid_params", "frame payload is required"),
        };
        if let Err(err) = report.validate() {
            return Response::error_with_info(id, err);
        }

        let observed_at = match DateTime::parse_from_rfc3339(&report.observed_at) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(_) => return Response::error(id, "invalid_timestamp", "observed_at must be RFC3339"),
        };

        let observations: Vec<RawObservation> = report
            .observations
            .iter()
            .map(|observation| RawObservation {
                code: observation.code,
                confidence: observation.confidence,
                bbox: observation.bbox.map(|bbox| BoundingBox {
                    xmin: bbox.xmin,
                    ymin: bbox.ymin,
                    xmax: bbox.xmax,
                    ymax: bbox.ymax,
                }),
            })
            .collect();

        // A malformed frame payload only loses the preview frame; the
        // observations are still valid input.
        let frame_jpeg = report.frame_jpeg.as_deref().and_then(|encoded| {
            match base64::engine::general_purpose::STANDARD.decode(encoded) {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!(
                        error = %err,
                        frame_id = %report.frame_id,
                        "Frame JPEG was not valid base64; ignoring"
                    );
                    None
                }
            }
        });

        let outcome = {
            let mut agent = self
                .agent
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            agent.process_frame(&observations, frame_jpeg.as_deref(), observed_at)
        };
        self.frames_processed.fetch_add(1, Ordering::Relaxed);

        let data = FrameData {
            accepted: true,
            recording_state: outcome.state.as_str().to_string(),
            command: outcome.command.map(|command| command.as_str().to_string()),
            dispatched: outcome.dispatched,
        };
        to_ok_response(id, &data)
    }
}

fn to_ok_response<T: serde::Serialize>(id: Option<String>, data: &T) -> Response {
    match serde_json::to_value(data) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}
