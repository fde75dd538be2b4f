//! Concrete clients for the pipeline's collaborator traits.
//!
//! The FIFO sink is the only adapter with real I/O behind it. The archive
//! client stays an explicit stub until a vendor SDK is wired in, and
//! telemetry goes to the structured log.

use std::ffi::CString;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use lookout_core::preview::PreviewSink;
use lookout_core::resolver::{ArchiveApi, ArchiveClient, Fragment, PlaybackRequest, TimeWindow};
use lookout_core::telemetry::TelemetryChannel;

/// Named-pipe MJPEG sink for the local preview consumer.
///
/// The FIFO is created eagerly but opened lazily: opening a FIFO for
/// writing does not succeed until a reader attaches, and that wait belongs
/// on the renderer thread, not in agent startup.
pub struct FifoSink {
    path: PathBuf,
    file: Option<std::fs::File>,
}

impl FifoSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        make_fifo(&path)?;
        Ok(Self { path, file: None })
    }

    fn ensure_open(&mut self) -> Result<(), String> {
        if self.file.is_some() {
            return Ok(());
        }
        // A plain write-open would block forever with no reader. Open
        // non-blocking (fails fast with ENXIO), then clear the flag so
        // later writes pace against the consumer.
        let file = std::fs::OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|err| format!("No preview consumer on {}: {}", self.path.display(), err))?;
        clear_nonblocking(&file)?;
        debug!(path = %self.path.display(), "Preview consumer attached");
        self.file = Some(file);
        Ok(())
    }
}

impl PreviewSink for FifoSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), String> {
        self.ensure_open()?;
        let outcome = match self.file.as_mut() {
            Some(file) => file
                .write_all(frame)
                .and_then(|_| file.flush())
                .map_err(|err| format!("Preview write failed: {}", err)),
            None => Err("Preview sink not open".to_string()),
        };
        if outcome.is_err() {
            // The consumer went away; reopen when the next one attaches.
            self.file = None;
        }
        outcome
    }
}

fn make_fifo(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs_err::create_dir_all(parent)
            .map_err(|err| format!("Failed to create preview directory: {}", err))?;
    }
    let raw = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| format!("Preview path contains a NUL byte: {}", path.display()))?;
    let rc = unsafe { libc::mkfifo(raw.as_ptr(), 0o644) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::AlreadyExists {
        return Ok(());
    }
    Err(format!(
        "Failed to create preview FIFO {}: {}",
        path.display(),
        err
    ))
}

fn clear_nonblocking(file: &std::fs::File) -> Result<(), String> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(format!(
            "Failed to read preview FIFO flags: {}",
            std::io::Error::last_os_error()
        ));
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(format!(
            "Failed to clear preview FIFO non-blocking flag: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

/// Placeholder archive client for builds without a vendor SDK. Every call
/// fails, so link resolution runs its full retry budget and alerts go out
/// with an empty link.
pub struct UnconfiguredArchive;

impl ArchiveClient for UnconfiguredArchive {
    fn data_endpoint(&self, _api: ArchiveApi, _stream: &str) -> Result<String, String> {
        Err("archive client is not configured".to_string())
    }

    fn playback_url(
        &self,
        _endpoint: &str,
        _stream: &str,
        _request: &PlaybackRequest,
    ) -> Result<String, String> {
        Err("archive client is not configured".to_string())
    }

    fn list_fragments(
        &self,
        _endpoint: &str,
        _stream: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<Fragment>, String> {
        Err("archive client is not configured".to_string())
    }
}

/// Telemetry channel that lands every payload in the structured log.
pub struct LogTelemetry;

impl TelemetryChannel for LogTelemetry {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), String> {
        info!(topic = %topic, payload = %payload, "Telemetry published");
        Ok(())
    }
}
