//! Recording state machine.
//!
//! Recording starts on the first qualifying detection and keeps running
//! while qualifying detections continue to arrive. It stops only after a
//! full quiet period with none, so a person walking in and out of frame
//! produces one session, not a burst of short clips.
//!
//! The transition logic is a pure function over an explicit `now`; the
//! [`Recorder`] wrapper owns the state and drives the streaming session.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::detection::DetectionEvent;

/// Recorder state. The last qualifying instant only exists while recording,
/// so it lives inside the variant rather than alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording { last_qualifying_at: DateTime<Utc> },
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording { .. } => "recording",
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Recording { .. })
    }

    pub fn last_qualifying_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RecordingState::Idle => None,
            RecordingState::Recording { last_qualifying_at } => Some(*last_qualifying_at),
        }
    }
}

/// Side effect a transition asks for. At most one per transition, and only
/// on an actual edge: refreshing an active recording issues nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingCommand {
    Start,
    Stop,
}

impl RecordingCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingCommand::Start => "start",
            RecordingCommand::Stop => "stop",
        }
    }
}

/// Does this event count as a hit for the configured target?
pub fn qualifies(event: &DetectionEvent, config: &PipelineConfig) -> bool {
    event.label == config.target_label && event.confidence >= config.target_confidence
}

/// Computes the next state and the command (if any) for one input: either a
/// detection event or, with `event` absent, the bare passage of time.
pub fn next_transition(
    state: &RecordingState,
    event: Option<&DetectionEvent>,
    now: DateTime<Utc>,
    config: &PipelineConfig,
) -> (RecordingState, Option<RecordingCommand>) {
    let qualifying = event.map(|event| qualifies(event, config)).unwrap_or(false);

    match state {
        RecordingState::Idle => {
            if qualifying {
                (
                    RecordingState::Recording {
                        last_qualifying_at: now,
                    },
                    Some(RecordingCommand::Start),
                )
            } else {
                (RecordingState::Idle, None)
            }
        }
        RecordingState::Recording { last_qualifying_at } => {
            if qualifying {
                (
                    RecordingState::Recording {
                        last_qualifying_at: now,
                    },
                    None,
                )
            } else if now.signed_duration_since(*last_qualifying_at) > config.stop_timeout() {
                (RecordingState::Idle, Some(RecordingCommand::Stop))
            } else {
                (*state, None)
            }
        }
    }
}

/// Client controlling the actual video capture session. Both calls are
/// idempotent from the recorder's point of view: it only issues them on
/// state edges.
pub trait StreamingSession: Send + Sync {
    fn start(&self) -> Result<(), String>;
    fn stop(&self) -> Result<(), String>;
}

pub struct Recorder<S: StreamingSession> {
    session: S,
    state: RecordingState,
    config: PipelineConfig,
}

impl<S: StreamingSession> Recorder<S> {
    pub fn new(session: S, config: PipelineConfig) -> Self {
        Self {
            session,
            state: RecordingState::Idle,
            config,
        }
    }

    /// Feeds one detection event through the state machine.
    pub fn observe(&mut self, event: &DetectionEvent, now: DateTime<Utc>) -> Option<RecordingCommand> {
        let (next, command) = next_transition(&self.state, Some(event), now, &self.config);
        self.apply(next, command)
    }

    /// Advances the state machine on time alone, for frames with nothing in
    /// them. This is what eventually stops an abandoned recording.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<RecordingCommand> {
        let (next, command) = next_transition(&self.state, None, now, &self.config);
        self.apply(next, command)
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    fn apply(
        &mut self,
        next: RecordingState,
        command: Option<RecordingCommand>,
    ) -> Option<RecordingCommand> {
        // The state advances before the session call so recording intent
        // keeps tracking the frame stream even when the client fails.
        self.state = next;
        if let Some(command) = command {
            let outcome = match command {
                RecordingCommand::Start => self.session.start(),
                RecordingCommand::Stop => self.session.stop(),
            };
            match outcome {
                Ok(()) => info!(command = command.as_str(), "Recording session command issued"),
                Err(err) => warn!(
                    error = %err,
                    command = command.as_str(),
                    "Recording session command failed"
                ),
            }
        }
        command
    }
}
