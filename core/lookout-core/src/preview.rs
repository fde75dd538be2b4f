//! Live preview: a latest-frame buffer and the renderer that drains it.
//!
//! The buffer holds exactly one frame. Publishing replaces it; the renderer
//! always writes the newest frame and a slow sink only costs staleness,
//! never memory.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::LookoutError;

const PLACEHOLDER_WIDTH: u32 = 640;
const PLACEHOLDER_HEIGHT: u32 = 480;
const SINK_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Output resolution for the preview stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewResolution {
    P1080,
    P720,
    P480,
}

impl PreviewResolution {
    pub fn parse(name: &str) -> Result<Self, LookoutError> {
        match name {
            "1080p" => Ok(PreviewResolution::P1080),
            "720p" => Ok(PreviewResolution::P720),
            "480p" => Ok(PreviewResolution::P480),
            other => Err(LookoutError::UnknownResolution(other.to_string())),
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            PreviewResolution::P1080 => (1920, 1080),
            PreviewResolution::P720 => (1280, 720),
            PreviewResolution::P480 => (858, 480),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PreviewResolution::P1080 => "1080p",
            PreviewResolution::P720 => "720p",
            PreviewResolution::P480 => "480p",
        }
    }
}

/// Single-slot cell holding the most recent preview frame as encoded JPEG.
///
/// Starts out holding a white placeholder so a consumer attached before the
/// first camera frame still renders something.
pub struct FrameBuffer {
    frame: Mutex<Arc<Vec<u8>>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            frame: Mutex::new(Arc::new(placeholder_jpeg())),
        }
    }

    /// Replaces the buffered frame. Readers holding the previous frame keep
    /// it; nothing queues behind the slot.
    pub fn publish(&self, frame: Vec<u8>) {
        let mut slot = self
            .frame
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Arc::new(frame);
    }

    pub fn latest(&self) -> Arc<Vec<u8>> {
        let slot = self
            .frame
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&slot)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn placeholder_jpeg() -> Vec<u8> {
    let image = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        PLACEHOLDER_WIDTH,
        PLACEHOLDER_HEIGHT,
        image::Rgb([255, 255, 255]),
    ));
    let mut bytes = Vec::new();
    if let Err(err) = image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg) {
        warn!(error = %err, "Placeholder frame encode failed");
        bytes.clear();
    }
    bytes
}

/// Re-encodes a camera JPEG at the preview resolution.
pub fn encode_frame(jpeg: &[u8], resolution: PreviewResolution) -> Result<Vec<u8>, LookoutError> {
    let decoded =
        image::load_from_memory(jpeg).map_err(|err| LookoutError::FrameDecode(err.to_string()))?;
    let (width, height) = resolution.dimensions();
    let resized = decoded.resize_exact(width, height, image::imageops::FilterType::Triangle);
    let mut bytes = Vec::new();
    resized
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .map_err(|err| LookoutError::FrameEncode(err.to_string()))?;
    Ok(bytes)
}

/// Local destination for preview frames. Writes may block for as long as
/// the consumer takes to drain them.
pub trait PreviewSink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), String>;
}

/// Owns the thread that feeds the sink from the frame buffer.
pub struct PreviewRenderer {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PreviewRenderer {
    pub fn spawn<S: PreviewSink + 'static>(mut sink: S, buffer: Arc<FrameBuffer>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = thread::spawn(move || {
            while !worker_stop.load(Ordering::SeqCst) {
                let frame = buffer.latest();
                if frame.is_empty() {
                    thread::sleep(SINK_RETRY_DELAY);
                    continue;
                }
                if let Err(err) = sink.write_frame(&frame) {
                    debug!(error = %err, "Preview sink write failed");
                    thread::sleep(SINK_RETRY_DELAY);
                }
            }
            debug!("Preview renderer stopped");
        });
        Self {
            stop,
            worker: Some(worker),
        }
    }

    /// Stops the renderer. An in-flight sink write completes first.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Preview renderer thread panicked");
            }
        }
    }
}

impl Drop for PreviewRenderer {
    fn drop(&mut self) {
        self.halt();
    }
}
