#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use cerberus_api::protocol::types;
use cerberus_core::{
    ConnectionState, CoreError, Endpoint, Envelope, ProbeConfig, ProbeConfigUpdate,
    ProbeConnector, ProbeHandler,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

// ── Blocking fake daemon ─────────────────────────────────────────────

struct Daemon {
    endpoint: Endpoint,
    sessions: mpsc::Receiver<TcpStream>,
}

struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Daemon {
    fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (tx, sessions) = mpsc::channel();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                if tx.send(stream).is_err() {
                    break;
                }
            }
        });
        Self { endpoint, sessions }
    }

    fn accept(&self) -> Session {
        let stream = self.sessions.recv_timeout(WAIT).expect("probe did not connect");
        stream.set_read_timeout(Some(WAIT)).unwrap();
        Session {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
        }
    }
}

impl Session {
    fn recv_line(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).expect("no frame from probe");
        assert!(n > 0, "probe closed the socket");
        line.trim_end().to_owned()
    }

    fn recv(&mut self) -> serde_json::Value {
        serde_json::from_str(&self.recv_line()).unwrap()
    }

    fn send(&mut self, frame: &serde_json::Value) {
        writeln!(self.writer, "{frame}").unwrap();
        self.writer.flush().unwrap();
    }
}

fn config_for(daemon: &Daemon) -> ProbeConfig {
    let mut config = ProbeConfig::new(daemon.endpoint.clone(), 4242, "1.2.0");
    config.reconnect_delay = Duration::from_millis(100);
    config.poll_interval = Duration::from_millis(20);
    config
}

fn wait_for_state(probe: &ProbeConnector, state: ConnectionState) {
    let deadline = Instant::now() + WAIT;
    while probe.state() != state {
        assert!(Instant::now() < deadline, "probe never reached {state}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn config_update(package: &str) -> serde_json::Value {
    json!({
        "type": types::PROBE_CONFIG_UPDATE,
        "payload": {
            "policies": [{ "package_name": package, "user_id": 0, "policy": 3 }],
            "frozen_apps": [{ "package_name": package, "user_id": 0 }],
        },
    })
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn probe_hello_precedes_events() {
    let daemon = Daemon::bind();
    let mut probe = ProbeConnector::new(config_for(&daemon), |_update: ProbeConfigUpdate| {});
    probe.start().unwrap();

    let mut session = daemon.accept();
    insta::assert_snapshot!(
        session.recv_line(),
        @r#"{"v":1,"type":"event.probe_hello","payload":{"pid":4242,"version":"1.2.0"}}"#
    );
    wait_for_state(&probe, ConnectionState::Connected);

    probe.sender().app_started("com.example.game", 0).unwrap();
    let event = session.recv();
    assert_eq!(event["type"], types::APP_START);
    assert_eq!(event["payload"]["package_name"], "com.example.game");
    assert!(event.get("req_id").is_none());
    probe.stop();
}

#[test]
fn events_queued_offline_follow_the_next_hello() {
    let daemon = Daemon::bind();
    let mut probe = ProbeConnector::new(config_for(&daemon), |_update: ProbeConfigUpdate| {});
    probe.start().unwrap();

    let mut first = daemon.accept();
    first.recv_line();
    wait_for_state(&probe, ConnectionState::Connected);
    drop(first);

    // Wait until the probe noticed, then queue while it is offline.
    let deadline = Instant::now() + WAIT;
    while probe.state() == ConnectionState::Connected {
        assert!(Instant::now() < deadline, "probe never noticed the close");
        std::thread::sleep(Duration::from_millis(5));
    }
    let sender = probe.sender();
    sender.app_started("com.a", 0).unwrap();
    sender.app_foreground("com.b", 0).unwrap();
    sender.app_killed("com.c", 10).unwrap();

    let mut second = daemon.accept();
    let types_seen: Vec<String> = (0..4)
        .map(|_| second.recv()["type"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(
        types_seen,
        [
            types::PROBE_HELLO,
            types::APP_START,
            types::APP_FOREGROUND,
            types::APP_KILLED
        ]
    );
    probe.stop();
}

#[test]
fn event_burst_is_written_without_per_frame_polling() {
    let daemon = Daemon::bind();
    let mut probe = ProbeConnector::new(config_for(&daemon), |_update: ProbeConfigUpdate| {});
    probe.start().unwrap();

    let mut session = daemon.accept();
    session.recv_line();
    wait_for_state(&probe, ConnectionState::Connected);

    // One inbound poll per event would take several seconds for this many.
    let sender = probe.sender();
    let started = Instant::now();
    for uid in 0..300 {
        sender.app_started("com.example.burst", uid).unwrap();
    }
    for uid in 0..300 {
        let event = session.recv();
        assert_eq!(event["type"], types::APP_START);
        assert_eq!(event["payload"]["user_id"], uid);
    }
    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "burst took {:?}",
        started.elapsed()
    );
    probe.stop();
}

#[test]
fn config_updates_reach_the_handler() {
    let daemon = Daemon::bind();
    let (tx, updates) = mpsc::channel();
    let mut probe = ProbeConnector::new(config_for(&daemon), move |update: ProbeConfigUpdate| {
        let _ = tx.send(update);
    });
    probe.start().unwrap();

    let mut session = daemon.accept();
    session.recv_line();
    session.send(&json!({ "type": "stream.unrelated", "payload": {} }));
    session.send(&config_update("com.example.chat"));

    let update = updates.recv_timeout(WAIT).unwrap();
    assert!(update.is_frozen("com.example.chat", 0));
    assert_eq!(update.policies.len(), 1);
    probe.stop();
}

struct FlakyHandler {
    calls: usize,
    seen: mpsc::Sender<String>,
}

impl ProbeHandler for FlakyHandler {
    fn on_config_update(&mut self, update: ProbeConfigUpdate) {
        self.calls += 1;
        assert!(self.calls > 1, "first update rejected");
        let package = update.policies[0].package_name.clone();
        let _ = self.seen.send(package);
    }

    fn on_frame(&mut self, envelope: &Envelope) {
        let _ = self.seen.send(format!("frame:{}", envelope.msg_type));
    }
}

#[test]
fn panicking_handler_does_not_kill_the_probe() {
    let daemon = Daemon::bind();
    let (seen, rx) = mpsc::channel();
    let mut probe = ProbeConnector::new(config_for(&daemon), FlakyHandler { calls: 0, seen });
    probe.start().unwrap();

    let mut session = daemon.accept();
    session.recv_line();
    session.send(&config_update("com.first"));
    session.send(&config_update("com.second"));
    session.send(&json!({ "type": "event.ping" }));

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "com.second");
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "frame:event.ping");
    assert!(probe.is_running());
    assert_eq!(probe.state(), ConnectionState::Connected);

    // Same socket still works for outbound traffic.
    probe.sender().app_background("com.second", 0).unwrap();
    assert_eq!(session.recv()["type"], types::APP_BACKGROUND);
    probe.stop();
}

#[test]
fn silent_daemon_gets_recycled() {
    let daemon = Daemon::bind();
    let mut config = config_for(&daemon);
    config.liveness_timeout = Duration::from_millis(200);
    let mut probe = ProbeConnector::new(config, |_update: ProbeConfigUpdate| {});
    probe.start().unwrap();

    let mut first = daemon.accept();
    first.recv_line();
    let mut second = daemon.accept();
    assert_eq!(second.recv()["type"], types::PROBE_HELLO);
    probe.stop();
}

#[test]
fn stop_is_idempotent_and_restartable() {
    let daemon = Daemon::bind();
    let mut probe = ProbeConnector::new(config_for(&daemon), |_update: ProbeConfigUpdate| {});
    probe.start().unwrap();
    probe.start().unwrap();

    let mut session = daemon.accept();
    session.recv_line();

    probe.stop();
    probe.stop();
    assert!(!probe.is_running());
    assert_eq!(probe.state(), ConnectionState::Disconnected);
    assert!(matches!(
        probe.sender().app_started("com.a", 0),
        Err(CoreError::NotRunning)
    ));

    probe.start().unwrap();
    let mut again = daemon.accept();
    assert_eq!(again.recv()["type"], types::PROBE_HELLO);
    probe.stop();
}

#[test]
fn unreachable_daemon_keeps_retrying_quietly() {
    // Bind and drop to get a port with nothing behind it.
    let endpoint = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        Endpoint::tcp(listener.local_addr().unwrap().to_string())
    };
    let mut config = ProbeConfig::new(endpoint, 1, "test");
    config.reconnect_delay = Duration::from_millis(20);
    let mut probe = ProbeConnector::new(config, |_update: ProbeConfigUpdate| {});
    probe.start().unwrap();

    std::thread::sleep(Duration::from_millis(100));
    assert!(probe.is_running());
    assert_ne!(probe.state(), ConnectionState::Connected);
    probe.sender().app_killed("com.a", 0).unwrap();
    probe.stop();
}
