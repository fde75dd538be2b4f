use chrono::Utc;
use lookout_protocol::{
    FrameReport, Method, Request, Response, WireObservation, PROTOCOL_VERSION,
};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct AgentGuard {
    child: Child,
}

impl Drop for AgentGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn write_test_config(home: &Path) {
    let dir = home.join(".lookout");
    std::fs::create_dir_all(&dir).expect("create config dir");
    // A short retry budget keeps dispatch fast against the unconfigured
    // archive stub.
    std::fs::write(
        dir.join("config.toml"),
        "resolve_attempts = 2\nresolve_delay_ms = 10\n",
    )
    .expect("write config");
}

fn spawn_agent(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_lookout-agent"))
        .env("HOME", home)
        .env_remove("LOOKOUT_AGENT_SOCKET")
        .env_remove("LOOKOUT_LOG_DIR")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn lookout-agent")
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".lookout").join("agent.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for agent socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to agent socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn simple_request(method: Method, id: &str) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(id.to_string()),
        frame: None,
    }
}

fn frame_request(id: &str, observations: Vec<WireObservation>) -> Request {
    Request {
        protocol_version: PROTOCOL_VERSION,
        method: Method::Frame,
        id: Some(id.to_string()),
        frame: Some(FrameReport {
            frame_id: id.to_string(),
            observed_at: Utc::now().to_rfc3339(),
            observations,
            frame_jpeg: None,
        }),
    }
}

fn person(confidence: f32) -> WireObservation {
    WireObservation {
        code: 15,
        confidence,
        bbox: None,
    }
}

fn get_status(socket: &Path) -> serde_json::Value {
    let response = send_request(socket, simple_request(Method::GetStatus, "status"));
    assert!(response.ok, "status response was not ok");
    response.data.expect("status data")
}

fn outbox_kinds(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|value| {
                value
                    .get("kind")
                    .and_then(|kind| kind.as_str())
                    .map(String::from)
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn wait_until(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for {}", what);
}

#[test]
fn agent_ipc_detection_pipeline_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_test_config(home.path());
    let socket = socket_path(home.path());
    let outbox = home.path().join(".lookout").join("outbox.ndjson");
    let mut guard = AgentGuard {
        child: spawn_agent(home.path()),
    };

    wait_for_socket(&socket, Duration::from_secs(2));

    let health = send_request(&socket, simple_request(Method::GetHealth, "health"));
    assert!(health.ok, "health response was not ok");
    let health_data = health.data.expect("health data");
    assert_eq!(health_data["status"], "ok");
    assert_eq!(health_data["protocol_version"], 1);

    let status = get_status(&socket);
    assert_eq!(status["recording_state"], "idle");
    assert_eq!(status["frames_processed"], 0);
    assert_eq!(status["alerts_sent"], 0);

    // First person frame: recording starts and an alert goes out.
    let frame = send_request(&socket, frame_request("frame-1", vec![person(0.9)]));
    assert!(frame.ok, "frame response was not ok");
    let frame_data = frame.data.expect("frame data");
    assert_eq!(frame_data["accepted"], true);
    assert_eq!(frame_data["recording_state"], "recording");
    assert_eq!(frame_data["command"], "start");
    assert_eq!(frame_data["dispatched"], true);

    wait_until("session start in outbox", Duration::from_secs(3), || {
        outbox_kinds(&outbox).contains(&"session_start".to_string())
    });
    wait_until("alert in outbox", Duration::from_secs(3), || {
        outbox_kinds(&outbox).contains(&"alert".to_string())
    });
    wait_until("alert counted", Duration::from_secs(3), || {
        get_status(&socket)["alerts_sent"] == 1
    });
    assert!(
        home.path().join(".lookout").join("last_sent.json").exists(),
        "send gate record was not persisted"
    );

    // A second person frame inside the 30s window is suppressed.
    let frame = send_request(&socket, frame_request("frame-2", vec![person(0.8)]));
    assert!(frame.ok);
    assert_eq!(frame.data.expect("frame data")["dispatched"], true);
    wait_until("suppression counted", Duration::from_secs(3), || {
        get_status(&socket)["alerts_suppressed"] == 1
    });

    let status = get_status(&socket);
    assert_eq!(status["recording_state"], "recording");
    assert_eq!(status["frames_processed"], 2);
    assert_eq!(status["alerts_sent"], 1);
    assert!(status["last_qualifying_at"].is_string());

    let shutdown = send_request(&socket, simple_request(Method::Shutdown, "bye"));
    assert!(shutdown.ok, "shutdown response was not ok");

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(Some(exit)) = guard.child.try_wait() {
            assert!(exit.success(), "agent exited with failure: {:?}", exit);
            break;
        }
        if Instant::now() > deadline {
            panic!("agent did not exit after shutdown");
        }
        sleep(Duration::from_millis(25));
    }
}

#[test]
fn agent_ipc_rejects_invalid_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_test_config(home.path());
    let socket = socket_path(home.path());
    let _guard = AgentGuard {
        child: spawn_agent(home.path()),
    };

    wait_for_socket(&socket, Duration::from_secs(2));

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: 99,
            method: Method::GetHealth,
            id: None,
            frame: None,
        },
    );
    assert!(!mismatch.ok);
    assert_eq!(mismatch.error.expect("error").code, "protocol_mismatch");

    let bad_confidence = send_request(&socket, frame_request("frame-bad", vec![person(1.5)]));
    assert!(!bad_confidence.ok);
    assert_eq!(
        bad_confidence.error.expect("error").code,
        "invalid_confidence"
    );

    // A bad preview payload only loses the preview frame.
    let mut with_bad_jpeg = frame_request("frame-jpeg", vec![person(0.9)]);
    if let Some(report) = with_bad_jpeg.frame.as_mut() {
        report.frame_jpeg = Some("%%% not base64 %%%".to_string());
    }
    let response = send_request(&socket, with_bad_jpeg);
    assert!(response.ok, "frame with bad jpeg was rejected");
    assert_eq!(response.data.expect("frame data")["accepted"], true);
}
