//! # lookout-core
//!
//! Core library for Lookout, an edge video-analytics agent: the recording
//! state machine, the alert send gate, playback link resolution, alert
//! dispatch, telemetry summaries, and the live preview buffer.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The two slow paths (link
//!   resolution, preview writes) run on plain worker threads.
//! - **Traits at the edges**: Every external collaborator (streaming
//!   session, archive, alert and telemetry channels, preview sink, gate
//!   storage) is a trait, so the pipeline runs against fakes in tests.
//! - **Explicit time**: State transitions take `now` as an argument and
//!   waiting goes through a [`retry::Clock`], keeping timing testable.
//! - **Graceful degradation**: A missing gate file means "never sent", a
//!   missing config file means defaults, and per-frame failures are
//!   logged rather than propagated.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use lookout_core::FrameAgent;
//!
//! let mut agent = FrameAgent::new(session, telemetry, dispatch, None, config)?;
//! let outcome = agent.process_frame(&observations, None, Utc::now());
//! ```

// Public modules
pub mod agent;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod labels;
pub mod preview;
pub mod recorder;
pub mod resolver;
pub mod retry;
pub mod telemetry;

// Re-export commonly used items at crate root
pub use agent::{FrameAgent, FrameOutcome, RawObservation};
pub use config::PipelineConfig;
pub use detection::{BoundingBox, Detection, DetectionEvent};
pub use error::{LookoutError, Result};
pub use labels::Label;
pub use recorder::{RecordingCommand, RecordingState};
