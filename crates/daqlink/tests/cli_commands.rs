#![cfg(all(unix, feature = "cli"))]

use std::io::{BufRead, BufReader, Read};
use std::net::SocketAddr;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use daqlink_peer::{ClientConfig, ClientSession, GRABBER};
use daqlink_transport::TcpTransport;

struct Serve {
    child: Child,
    stdout: BufReader<ChildStdout>,
    port: u16,
}

impl Serve {
    fn spawn(extra: &[&str]) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_daqlink"))
            .args(["--log-level", "error", "--format", "json", "serve"])
            .args(["--host", "127.0.0.1", "--port", "0", "--tick", "10ms"])
            .args(extra)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve should start");
        let mut stdout = BufReader::new(child.stdout.take().expect("stdout is piped"));

        let mut first = String::new();
        stdout.read_line(&mut first).expect("listening line");
        let event: serde_json::Value =
            serde_json::from_str(&first).expect("listening line should be JSON");
        assert_eq!(event["event"], "listening", "{first}");
        let addr: SocketAddr = event["address"]
            .as_str()
            .expect("address field")
            .parse()
            .expect("address should parse");

        Self {
            child,
            stdout,
            port: addr.port(),
        }
    }

    /// Every remaining event line, after the server exits on its own.
    fn finish(mut self) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        for line in self.stdout.by_ref().lines() {
            let line = line.expect("stdout line");
            events.push(serde_json::from_str(&line).expect("event line should be JSON"));
        }
        let status = wait_with_deadline(&mut self.child, Duration::from_secs(10));
        assert!(status.success(), "serve exited with {status:?}");
        events
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("process did not exit in time");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn has_event(events: &[serde_json::Value], event: &str, key: &str, value: &str) -> bool {
    events
        .iter()
        .any(|e| e["event"] == event && e[key] == value)
}

fn free_port() -> u16 {
    let probe = TcpTransport::bind("127.0.0.1", 0).expect("probe bind");
    probe.local_addr().port()
}

#[test]
fn version_prints_name() {
    let output = Command::new(env!("CARGO_BIN_EXE_daqlink"))
        .arg("version")
        .output()
        .expect("version should run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("daqlink "));
}

#[test]
fn serve_reports_client_and_snapshot() {
    let serve = Serve::spawn(&["--count", "1"]);

    let mut session = ClientSession::new(
        ClientConfig::new(GRABBER)
            .with_address("127.0.0.1", serve.port)
            .with_settings_xml("<settings/>"),
    );
    session.connect().expect("client should connect");

    let events = serve.finish();
    assert!(has_event(&events, "client_connected", "role", GRABBER));
    assert!(has_event(&events, "command_dispatched", "command", "Infos"));
    assert_eq!(events.last().map(|e| &e["event"]), Some(&serde_json::json!("server_closed")));
}

#[test]
fn serve_rejects_unknown_role() {
    let serve = Serve::spawn(&["--count", "1"]);

    let mut intruder = ClientSession::new(
        ClientConfig::new("WIDGET").with_address("127.0.0.1", serve.port),
    );
    intruder.connect().expect("tcp connect succeeds before the role check");

    let mut session =
        ClientSession::new(ClientConfig::new(GRABBER).with_address("127.0.0.1", serve.port));
    session.connect().expect("client should connect");

    let events = serve.finish();
    assert!(has_event(&events, "client_rejected", "role", "WIDGET"));
    assert!(has_event(&events, "client_connected", "role", GRABBER));
}

#[test]
fn mock_grabber_answers_acquisition_request() {
    let serve = Serve::spawn(&["--grab", "2d", "--count", "4"]);

    let mut grabber = Command::new(env!("CARGO_BIN_EXE_daqlink"))
        .args(["--log-level", "error", "--format", "json", "grabber"])
        .args(["--host", "127.0.0.1", "--port", &serve.port.to_string()])
        .args(["--width", "8", "--height", "4", "--count", "1", "--poll-interval", "5ms"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("grabber should start");

    let events = serve.finish();
    assert!(has_event(&events, "command_dispatched", "command", "x_axis"));
    assert!(has_event(&events, "command_dispatched", "command", "Done"));

    let status = wait_with_deadline(&mut grabber, Duration::from_secs(10));
    assert!(status.success(), "grabber exited with {status:?}");
}

#[test]
fn mock_actuator_completes_move() {
    let serve = Serve::spawn(&["--role", "actuator", "--move-to", "12.5", "--count", "3"]);

    let actuator = Command::new(env!("CARGO_BIN_EXE_daqlink"))
        .args(["--log-level", "error", "--format", "json", "actuator"])
        .args(["--host", "127.0.0.1", "--port", &serve.port.to_string()])
        .args(["--count", "1", "--poll-interval", "5ms"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("actuator should start");

    let events = serve.finish();
    assert!(has_event(&events, "command_dispatched", "command", "position_is"));
    assert!(has_event(&events, "command_dispatched", "command", "move_done"));

    let output = actuator.wait_with_output().expect("actuator output");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"command\":\"move_abs\""), "{stdout}");
    assert!(stdout.contains("\"position\":12.5"), "{stdout}");
}

#[test]
fn grabber_without_server_exits_with_failure() {
    let port = free_port();
    let output = Command::new(env!("CARGO_BIN_EXE_daqlink"))
        .args(["--log-level", "error", "--format", "json", "grabber"])
        .args(["--host", "127.0.0.1", "--port", &port.to_string()])
        .output()
        .expect("grabber should run");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"event\":\"disconnected\""), "{stdout}");
}

#[test]
fn serve_on_busy_port_returns_transport_error() {
    let holder = TcpTransport::bind("127.0.0.1", 0).expect("bind");
    let port = holder.local_addr().port().to_string();

    let output = Command::new(env!("CARGO_BIN_EXE_daqlink"))
        .args(["--log-level", "error", "serve", "--host", "127.0.0.1", "--port", &port])
        .output()
        .expect("serve should run");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bind failed"), "{stderr}");
}
