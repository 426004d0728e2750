#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Connection manager against an in-process fake daemon.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cerberus_api::transport::FramedTransport;
use cerberus_api::{
    ConnectionConfig, ConnectionManager, ConnectionState, Endpoint, Envelope, NoopHandler,
    OfflinePolicy, ReconnectConfig,
};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

/// Accepted sessions, as seen from the daemon side.
struct FakeDaemon {
    endpoint: Endpoint,
    sessions: mpsc::UnboundedReceiver<FramedTransport>,
    peak_live: Arc<AtomicUsize>,
}

async fn fake_daemon() -> FakeDaemon {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
    let (tx, sessions) = mpsc::unbounded_channel();
    let peak_live = Arc::new(AtomicUsize::new(0));

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if tx.send(FramedTransport::from_stream(stream)).is_err() {
                break;
            }
        }
    });

    FakeDaemon {
        endpoint,
        sessions,
        peak_live,
    }
}

impl FakeDaemon {
    async fn accept(&mut self) -> FramedTransport {
        tokio::time::timeout(WAIT, self.sessions.recv())
            .await
            .expect("client did not connect")
            .unwrap()
    }
}

async fn next_line(session: &mut FramedTransport) -> String {
    tokio::time::timeout(WAIT, session.read_frame())
        .await
        .expect("no frame from client")
        .unwrap()
        .expect("client closed")
}

async fn wait_for_state(mgr: &ConnectionManager, want: ConnectionState) {
    let mut rx = mgr.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == want))
        .await
        .expect("state not reached")
        .unwrap();
}

fn config(endpoint: Endpoint, offline: OfflinePolicy) -> ConnectionConfig {
    let mut config = ConnectionConfig::new(endpoint, Envelope::new("hello.ui"));
    config.offline = offline;
    config.reconnect = ReconnectConfig {
        delay: Duration::from_millis(100),
        max_retries: None,
    };
    config
}

#[tokio::test]
async fn hello_is_the_first_frame() {
    let mut daemon = fake_daemon().await;
    let mgr = ConnectionManager::new(
        config(daemon.endpoint.clone(), OfflinePolicy::Drop),
        Arc::new(NoopHandler),
    );
    mgr.start().await;

    let mut session = daemon.accept().await;
    assert_eq!(next_line(&mut session).await, r#"{"v":1,"type":"hello.ui"}"#);

    wait_for_state(&mgr, ConnectionState::Connected).await;
    mgr.send(&Envelope::new("cmd.reload_adj_rules")).unwrap();
    assert_eq!(
        next_line(&mut session).await,
        r#"{"v":1,"type":"cmd.reload_adj_rules"}"#
    );

    mgr.stop().await;
    assert_eq!(mgr.state(), ConnectionState::Disconnected);
    assert_eq!(tokio::time::timeout(WAIT, session.read_frame()).await.unwrap().unwrap(), None);
}

#[tokio::test]
async fn peer_close_reconnects_and_resends_hello() {
    let mut daemon = fake_daemon().await;
    let mgr = ConnectionManager::new(
        config(daemon.endpoint.clone(), OfflinePolicy::Drop),
        Arc::new(NoopHandler),
    );
    let mut states = mgr.watch_state();
    mgr.start().await;

    let mut first = daemon.accept().await;
    assert_eq!(next_line(&mut first).await, r#"{"v":1,"type":"hello.ui"}"#);
    wait_for_state(&mgr, ConnectionState::Connected).await;

    first.close().await;

    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Connecting))
        .await
        .unwrap()
        .unwrap();

    let mut second = daemon.accept().await;
    assert_eq!(next_line(&mut second).await, r#"{"v":1,"type":"hello.ui"}"#);
    wait_for_state(&mgr, ConnectionState::Connected).await;
    assert_eq!(mgr.live_sockets(), 1);

    mgr.stop().await;
    assert_eq!(mgr.live_sockets(), 0);
}

#[tokio::test]
async fn never_holds_two_sockets() {
    let mut daemon = fake_daemon().await;
    let mgr = ConnectionManager::new(
        config(daemon.endpoint.clone(), OfflinePolicy::Drop),
        Arc::new(NoopHandler),
    );
    let peak = Arc::clone(&daemon.peak_live);
    let probe = mgr.clone();
    let sampler = tokio::spawn(async move {
        loop {
            peak.fetch_max(probe.live_sockets(), Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    mgr.start().await;
    for _ in 0..3 {
        let mut session = daemon.accept().await;
        next_line(&mut session).await;
        session.close().await;
    }
    let _last = daemon.accept().await;
    mgr.stop().await;
    sampler.abort();

    assert_eq!(daemon.peak_live.load(Ordering::SeqCst), 1);
    assert_eq!(mgr.live_sockets(), 0);
}

#[tokio::test]
async fn start_is_idempotent() {
    let mut daemon = fake_daemon().await;
    let mgr = ConnectionManager::new(
        config(daemon.endpoint.clone(), OfflinePolicy::Drop),
        Arc::new(NoopHandler),
    );
    mgr.start().await;
    mgr.start().await;
    mgr.start().await;

    let mut session = daemon.accept().await;
    next_line(&mut session).await;
    wait_for_state(&mgr, ConnectionState::Connected).await;

    // A second socket would show up here.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), daemon.sessions.recv())
            .await
            .is_err()
    );
    mgr.stop().await;
}

#[tokio::test]
async fn queued_frames_follow_hello_after_reconnect() {
    let mut daemon = fake_daemon().await;
    let mgr = ConnectionManager::new(
        config(daemon.endpoint.clone(), OfflinePolicy::Queue),
        Arc::new(NoopHandler),
    );
    mgr.start().await;

    let mut first = daemon.accept().await;
    next_line(&mut first).await;
    wait_for_state(&mgr, ConnectionState::Connected).await;
    first.close().await;
    wait_for_state(&mgr, ConnectionState::Disconnected).await;

    mgr.send(&Envelope::new("event.app_start")).unwrap();
    mgr.send(&Envelope::new("event.app_killed")).unwrap();

    let mut second = daemon.accept().await;
    assert_eq!(next_line(&mut second).await, r#"{"v":1,"type":"hello.ui"}"#);
    assert_eq!(next_line(&mut second).await, r#"{"v":1,"type":"event.app_start"}"#);
    assert_eq!(next_line(&mut second).await, r#"{"v":1,"type":"event.app_killed"}"#);
    mgr.stop().await;
}

#[tokio::test]
async fn inbound_frames_are_broadcast_and_garbage_skipped() {
    let mut daemon = fake_daemon().await;
    let mgr = ConnectionManager::new(
        config(daemon.endpoint.clone(), OfflinePolicy::Drop),
        Arc::new(NoopHandler),
    );
    let mut frames = mgr.subscribe_frames();
    mgr.start().await;

    let mut session = daemon.accept().await;
    next_line(&mut session).await;
    session.write_frame("{not json").await.unwrap();
    session
        .write_frame(r#"{"type":"stream.dashboard_update","payload":{}}"#)
        .await
        .unwrap();

    let envelope = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.msg_type, "stream.dashboard_update");
    assert_eq!(envelope.version, 1);
    assert_eq!(mgr.state(), ConnectionState::Connected);
    mgr.stop().await;
}

#[tokio::test]
async fn non_utf8_line_keeps_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
    let mgr = ConnectionManager::new(
        config(endpoint, OfflinePolicy::Drop),
        Arc::new(NoopHandler),
    );
    let mut frames = mgr.subscribe_frames();
    mgr.start().await;

    let (stream, _) = tokio::time::timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    assert_eq!(
        lines.next_line().await.unwrap().as_deref(),
        Some(r#"{"v":1,"type":"hello.ui"}"#)
    );
    wait_for_state(&mgr, ConnectionState::Connected).await;

    write
        .write_all(b"{\"type\":\"stream.x\",\"payload\":\"\xff\xfe\"}\n{\"type\":\"stream.after\"}\n")
        .await
        .unwrap();

    let envelope = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    assert_eq!(envelope.msg_type, "stream.after");
    assert_eq!(mgr.state(), ConnectionState::Connected);
    assert_eq!(mgr.live_sockets(), 1);
    // Same socket: no second dial.
    assert!(
        tokio::time::timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err()
    );
    mgr.stop().await;
}

#[tokio::test]
async fn silent_daemon_trips_read_timeout() {
    let mut daemon = fake_daemon().await;
    let mut cfg = config(daemon.endpoint.clone(), OfflinePolicy::Drop);
    cfg.read_timeout = Duration::from_millis(200);
    let mgr = ConnectionManager::new(cfg, Arc::new(NoopHandler));
    mgr.start().await;

    let mut first = daemon.accept().await;
    next_line(&mut first).await;

    // No traffic: the client drops the socket and dials again.
    let mut second = daemon.accept().await;
    assert_eq!(next_line(&mut second).await, r#"{"v":1,"type":"hello.ui"}"#);
    mgr.stop().await;
}
