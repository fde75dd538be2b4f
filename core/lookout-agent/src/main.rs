//! Lookout agent entrypoint.
//!
//! A small single-writer service: one unix socket listener, strict request
//! validation, and the frame pipeline behind it. The camera-side producer
//! connects per request and speaks newline-framed JSON both ways.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use clap::Parser;
use lookout_core::agent::FrameAgent;
use lookout_core::config::PipelineConfig;
use lookout_core::dispatch::{DispatchWorker, Dispatcher};
use lookout_core::gate::{FileGateStore, SendGate};
use lookout_core::preview::{FrameBuffer, PreviewRenderer};
use lookout_core::resolver::LinkResolver;
use lookout_core::retry::SystemClock;
use lookout_protocol::{ErrorInfo, Method, Request, Response, MAX_REQUEST_BYTES};

mod adapters;
mod outbox;
mod service;

use adapters::{FifoSink, LogTelemetry, UnconfiguredArchive};
use outbox::{Outbox, OutboxAlertChannel, OutboxSession};
use service::AgentService;

const SOCKET_NAME: &str = "agent.sock";
const SOCKET_ENV: &str = "LOOKOUT_AGENT_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

#[derive(Parser)]
#[command(name = "lookout-agent")]
#[command(about = "Edge video-analytics agent")]
#[command(version)]
struct Cli {
    /// Path to the pipeline config (defaults to ~/.lookout/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the agent socket (defaults to ~/.lookout/agent.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Print the effective config and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let _logging_guard = init_logging();
    let cli = Cli::parse();

    let config = match PipelineConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load pipeline config");
            std::process::exit(1);
        }
    };

    if cli.print_config {
        println!("{:#?}", config);
        return;
    }

    let state_dir = match agent_state_dir() {
        Ok(dir) => dir,
        Err(err) => {
            error!(error = %err, "Failed to resolve agent state directory");
            std::process::exit(1);
        }
    };

    let socket_path = cli
        .socket
        .or_else(socket_path_from_env)
        .unwrap_or_else(|| state_dir.join(SOCKET_NAME));

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare agent socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind agent socket");
            std::process::exit(1);
        }
    };

    let service = match build_service(&config, &state_dir) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            error!(error = %err, "Failed to build agent pipeline");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        stream = %config.stream_name,
        target_label = %config.target_label,
        "Lookout agent started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let service = Arc::clone(&service);
                thread::spawn(|| handle_connection(stream, service));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept agent connection");
            }
        }
    }
}

fn build_service(config: &PipelineConfig, state_dir: &Path) -> Result<AgentService, String> {
    let outbox = Arc::new(Outbox::new(state_dir.join("outbox.ndjson")));

    let gate = SendGate::new(FileGateStore::new(state_dir.join("last_sent.json")));
    let resolver = LinkResolver::new(UnconfiguredArchive, config.clone());
    let alerts = OutboxAlertChannel::new(Arc::clone(&outbox));
    let dispatcher = Dispatcher::new(gate, resolver, alerts, config.clone());
    let worker = DispatchWorker::spawn(dispatcher, Arc::new(SystemClock));

    let (buffer, renderer) = if config.preview.enabled {
        let buffer = Arc::new(FrameBuffer::new());
        let sink = FifoSink::new(&config.preview.fifo_path)?;
        let renderer = PreviewRenderer::spawn(sink, Arc::clone(&buffer));
        info!(
            path = %config.preview.fifo_path.display(),
            resolution = %config.preview.resolution,
            "Preview renderer started"
        );
        (Some(buffer), Some(renderer))
    } else {
        (None, None)
    };

    let agent = FrameAgent::new(
        OutboxSession::new(outbox),
        LogTelemetry,
        worker.handle(),
        buffer,
        config.clone(),
    )
    .map_err(|err| err.to_string())?;

    Ok(AgentService::new(agent, worker, renderer))
}

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let debug_enabled = env::var("LOOKOUT_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    match env::var("LOOKOUT_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "lookout-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn agent_state_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".lookout"))
}

fn socket_path_from_env() -> Option<PathBuf> {
    env::var_os(SOCKET_ENV).map(PathBuf::from)
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, service: Arc<AgentService>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Agent request received");
    let stopping = request.method == Method::Shutdown;
    let response = service.handle_request(request);
    let _ = write_response(&mut stream, response);

    if stopping {
        service.shutdown();
        info!("Lookout agent stopped");
        std::process::exit(0);
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
