//! Reconnecting connection manager.
//!
//! Owns at most one live socket to the daemon and drives the state machine
//!
//! ```text
//! Disconnected ──start()──▶ Connecting ──ok──▶ Connected
//!       ▲                      ▲   │              │
//!       │                      │   └─fail─┐       │ EOF / I/O error / read timeout
//!       │                      └─delay────┴───────┘
//!       └──────────────stop()─────────────────────┘
//! ```
//!
//! A single background task does everything that touches the socket: it
//! connects, writes the identification handshake, drains the outbound queue
//! and reads inbound lines. Decoded envelopes are handed to a
//! [`FrameHandler`] and fanned out on a raw broadcast channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::protocol::{Envelope, codec};
use crate::transport::{Endpoint, FrameWriter, FramedTransport};

// ── Defaults ─────────────────────────────────────────────────────────

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const FRAME_CHANNEL_CAPACITY: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

// ── Configuration ────────────────────────────────────────────────────

/// What `send` does while no socket is connected.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OfflinePolicy {
    /// Log a warning and reject the send with [`Error::NotConnected`].
    #[default]
    Drop,
    /// Hold frames in FIFO order and flush them after the next handshake.
    Queue,
}

/// Flat-delay reconnection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Pause between a fault and the next connection attempt.
    pub delay: Duration,

    /// Consecutive failed connection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            max_retries: None,
        }
    }
}

/// Everything the manager needs to run. Built by `cerberus-core`.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    /// Written first on every new socket, before the state turns `Connected`.
    pub handshake: Envelope,
    pub reconnect: ReconnectConfig,
    pub connect_timeout: Duration,
    /// Longest silence tolerated on a connected socket.
    pub read_timeout: Duration,
    pub offline: OfflinePolicy,
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint, handshake: Envelope) -> Self {
        Self {
            endpoint,
            handshake,
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            offline: OfflinePolicy::default(),
        }
    }
}

// ── FrameHandler ─────────────────────────────────────────────────────

/// Receives every decoded inbound envelope, in arrival order.
///
/// Called from the connection task; implementations must not block.
pub trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, envelope: Arc<Envelope>);

    /// The socket went away (fault or stop). May repeat for one loss.
    fn on_disconnect(&self) {}
}

/// Handler that ignores everything; raw frames are still broadcast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl FrameHandler for NoopHandler {
    fn on_frame(&self, _envelope: Arc<Envelope>) {}
}

// ── SessionEnd ───────────────────────────────────────────────────────

/// Why a connected session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The daemon closed the socket.
    PeerClosed,
    /// No inbound frame within the read timeout.
    ReadTimeout,
    /// Read or write failed.
    Io(Error),
    /// `stop()` was called.
    Cancelled,
}

// ── ConnectionManager ────────────────────────────────────────────────

/// Cheaply cloneable handle to one daemon connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    handler: Arc<dyn FrameHandler>,
    state: watch::Sender<ConnectionState>,
    frames: broadcast::Sender<Arc<Envelope>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Parked here while no connection task owns it.
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    run: Mutex<Option<RunHandle>>,
    running: AtomicBool,
    live_sockets: AtomicUsize,
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<mpsc::UnboundedReceiver<String>>,
}

impl ConnectionManager {
    /// Create a stopped manager. Nothing connects until [`start`](Self::start).
    pub fn new(config: ConnectionConfig, handler: Arc<dyn FrameHandler>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Inner {
                config,
                handler,
                state,
                frames,
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                run: Mutex::new(None),
                running: AtomicBool::new(false),
                live_sockets: AtomicUsize::new(0),
            }),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the connection task. A no-op while it is already running.
    pub async fn start(&self) {
        let mut run = self.inner.run.lock().await;

        if let Some(handle) = run.as_ref() {
            if !handle.task.is_finished() {
                tracing::debug!("connection manager already running");
                return;
            }
        }

        // A task that gave up on its own hands the queue back when joined.
        if let Some(finished) = run.take() {
            self.reclaim(finished.task).await;
        }

        let Some(outbound) = self.inner.outbound_rx.lock().await.take() else {
            tracing::error!("outbound queue unavailable, cannot start connection");
            return;
        };

        let cancel = CancellationToken::new();
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connecting);

        let task = tokio::spawn(connection_loop(
            Arc::clone(&self.inner),
            outbound,
            cancel.clone(),
        ));
        *run = Some(RunHandle { cancel, task });

        tracing::info!(endpoint = %self.inner.config.endpoint, "connection manager started");
    }

    /// Cancel the reconnect loop, close the socket and discard queued sends.
    ///
    /// Idempotent. Returns once the socket is released.
    pub async fn stop(&self) {
        let handle = self.inner.run.lock().await.take();
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(handle) = handle {
            handle.cancel.cancel();
            self.reclaim(handle.task).await;
            tracing::info!("connection manager stopped");
        }

        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.handler.on_disconnect();
    }

    async fn reclaim(&self, task: JoinHandle<mpsc::UnboundedReceiver<String>>) {
        match task.await {
            Ok(mut outbound) => {
                let discarded = drain(&mut outbound);
                if discarded > 0 {
                    tracing::debug!(discarded, "discarded queued frames");
                }
                *self.inner.outbound_rx.lock().await = Some(outbound);
            }
            Err(e) => tracing::error!(error = %e, "connection task failed"),
        }
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Encode and enqueue an envelope for the writer.
    pub fn send(&self, envelope: &Envelope) -> Result<(), Error> {
        let line = codec::encode(envelope)?;
        self.send_line(&envelope.msg_type, line)
    }

    fn send_line(&self, msg_type: &str, line: String) -> Result<(), Error> {
        if !self.inner.running.load(Ordering::SeqCst) {
            tracing::warn!(msg_type, "cannot send message, connection manager is stopped");
            return Err(Error::Stopped);
        }
        if self.inner.config.offline == OfflinePolicy::Drop
            && self.state() != ConnectionState::Connected
        {
            tracing::warn!(msg_type, "cannot send message, not connected to daemon");
            return Err(Error::NotConnected);
        }
        self.inner
            .outbound_tx
            .send(line)
            .map_err(|_| Error::Closed)?;
        tracing::trace!(msg_type, "frame queued");
        Ok(())
    }

    // ── Observation ──────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that yields every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Every decoded inbound envelope, unfiltered.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.frames.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Sockets currently open. Never exceeds one.
    pub fn live_sockets(&self) -> usize {
        self.inner.live_sockets.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "connection state changed");
        }
    }

    fn dispatch(&self, line: &str) {
        tracing::trace!(line, "frame received");
        match codec::decode(line) {
            Ok(envelope) => {
                let envelope = Arc::new(envelope);
                // Handler first: raw observers see a frame only after it was routed.
                self.handler.on_frame(Arc::clone(&envelope));
                let _ = self.frames.send(envelope);
            }
            Err(e) => {
                tracing::debug!(error = %e, "discarding undecodable frame");
            }
        }
    }
}

fn drain(outbound: &mut mpsc::UnboundedReceiver<String>) -> usize {
    let mut discarded = 0;
    while outbound.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

// ── Background connection loop ───────────────────────────────────────

/// connect → handshake → session → on fault, flat delay → reconnect.
async fn connection_loop(
    inner: Arc<Inner>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<String> {
    let reconnect = inner.config.reconnect.clone();
    let mut attempt: u32 = 0;
    // Frame whose write failed mid-session; retried first under `Queue`.
    let mut carry: Option<String> = None;

    loop {
        inner.set_state(ConnectionState::Connecting);
        tracing::info!(endpoint = %inner.config.endpoint, attempt, "connecting to daemon");

        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = FramedTransport::connect(&inner.config.endpoint, inner.config.connect_timeout) => result,
        };

        match connected {
            Ok(transport) => {
                attempt = 0;
                let end = run_session(&inner, transport, &mut outbound, &mut carry, &cancel).await;

                inner.set_state(ConnectionState::Disconnected);
                if inner.config.offline == OfflinePolicy::Drop {
                    carry = None;
                    let discarded = drain(&mut outbound);
                    if discarded > 0 {
                        tracing::warn!(discarded, "dropped frames queued before disconnect");
                    }
                }
                inner.handler.on_disconnect();

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::PeerClosed => tracing::info!("daemon closed the connection"),
                    SessionEnd::ReadTimeout => tracing::warn!(
                        timeout_ms = millis(inner.config.read_timeout),
                        "no traffic from daemon, dropping connection"
                    ),
                    SessionEnd::Io(e) => tracing::warn!(error = %e, "connection lost"),
                }
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                attempt = attempt.saturating_add(1);
                tracing::warn!(error = %e, attempt, "connection attempt failed");

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(max_retries = max, "reconnection limit reached, giving up");
                        break;
                    }
                }
            }
        }

        tracing::info!(delay_ms = millis(reconnect.delay), "waiting before reconnect");
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(reconnect.delay) => {}
        }
    }

    inner.running.store(false, Ordering::SeqCst);
    inner.set_state(ConnectionState::Disconnected);
    inner.handler.on_disconnect();
    tracing::debug!("connection loop exiting");
    outbound
}

// ── Single session ───────────────────────────────────────────────────

/// Holds the live-socket count up while a session owns its socket.
struct SocketGuard<'a>(&'a AtomicUsize);

impl<'a> SocketGuard<'a> {
    fn acquire(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for SocketGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn run_session(
    inner: &Inner,
    transport: FramedTransport,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    carry: &mut Option<String>,
    cancel: &CancellationToken,
) -> SessionEnd {
    // Declared first so it is dropped after both socket halves.
    let _guard = SocketGuard::acquire(&inner.live_sockets);
    let (mut reader, mut writer) = transport.into_split();

    if let Err(e) = handshake(inner, &mut writer).await {
        return SessionEnd::Io(e);
    }
    inner.set_state(ConnectionState::Connected);
    tracing::info!(endpoint = %inner.config.endpoint, "connected to daemon");

    if let Some(frame) = carry.take() {
        if let Err(e) = writer.write_frame(&frame).await {
            *carry = Some(frame);
            return SessionEnd::Io(e);
        }
    }

    let read_timeout = inner.config.read_timeout;
    let deadline = tokio::time::sleep(read_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                writer.close().await;
                return SessionEnd::Cancelled;
            }
            () = &mut deadline => return SessionEnd::ReadTimeout,
            line = reader.read_frame() => match line {
                Ok(Some(line)) => {
                    deadline.as_mut().reset(Instant::now() + read_timeout);
                    inner.dispatch(&line);
                }
                Ok(None) => return SessionEnd::PeerClosed,
                Err(e) => return SessionEnd::Io(e),
            },
            Some(frame) = outbound.recv() => {
                if let Err(e) = writer.write_frame(&frame).await {
                    if inner.config.offline == OfflinePolicy::Queue {
                        *carry = Some(frame);
                    }
                    return SessionEnd::Io(e);
                }
                tracing::trace!(frame = %frame, "frame sent");
            }
        }
    }
}

async fn handshake(inner: &Inner, writer: &mut FrameWriter) -> Result<(), Error> {
    let hello = codec::encode(&inner.config.handshake)?;
    writer.write_frame(&hello).await?;
    tracing::debug!(msg_type = %inner.config.handshake.msg_type, "handshake sent");
    Ok(())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Tests ────────────────────────────────────────────────────────────
