// ── Blocking probe connector ──
//
// For hosts that cannot run an async runtime. One dedicated OS thread owns
// the socket and a FIFO queue of outbound frames; it connects, identifies
// with `event.probe_hello`, flushes whatever queued up while offline, and
// then alternates between draining the queue and polling for inbound
// config updates. Nothing that goes wrong in here reaches the host.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cerberus_api::protocol::codec;
use cerberus_api::protocol::payloads::{AppInstance, ProbeConfigUpdate};
use cerberus_api::protocol::types;
use cerberus_api::transport::blocking::{BlockingTransport, FramePoll};
use cerberus_api::{ConnectionState, Envelope, SessionEnd};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::config::ProbeConfig;
use crate::error::CoreError;

const THREAD_NAME: &str = "cerberus-probe";
const READ_POLL: Duration = Duration::from_millis(10);

// ── Handler ──────────────────────────────────────────────────────────

/// Receives what the daemon pushes to the probe. Runs on the probe thread.
pub trait ProbeHandler: Send + 'static {
    fn on_config_update(&mut self, update: ProbeConfigUpdate);

    /// Any other decoded inbound envelope.
    fn on_frame(&mut self, _envelope: &Envelope) {}
}

impl<F> ProbeHandler for F
where
    F: FnMut(ProbeConfigUpdate) + Send + 'static,
{
    fn on_config_update(&mut self, update: ProbeConfigUpdate) {
        self(update);
    }
}

// ── Shared state ─────────────────────────────────────────────────────

enum Outbound {
    Frame(String),
    Shutdown,
}

struct Shared {
    running: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        };
        self.state.store(raw, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::SeqCst) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// What the worker thread hands back when it exits.
struct Parked {
    rx: mpsc::Receiver<Outbound>,
    handler: Box<dyn ProbeHandler>,
}

// ── ProbeSender ──────────────────────────────────────────────────────

/// Cloneable, thread-safe enqueue handle.
#[derive(Clone)]
pub struct ProbeSender {
    tx: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
    protocol_version: u32,
}

impl ProbeSender {
    /// Queue a catalogued command. Never blocks.
    pub fn send(&self, command: &Command) -> Result<(), CoreError> {
        let envelope = command.to_envelope()?.version(self.protocol_version);
        self.send_envelope(&envelope)
    }

    /// Queue an arbitrary envelope. Never blocks.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), CoreError> {
        if !self.shared.running.load(Ordering::SeqCst) {
            debug!(msg_type = %envelope.msg_type, "probe not running, message dropped");
            return Err(CoreError::NotRunning);
        }
        let line = codec::encode(envelope)?;
        self.tx
            .send(Outbound::Frame(line))
            .map_err(|_| CoreError::NotRunning)
    }

    pub fn app_started(&self, package_name: &str, user_id: i32) -> Result<(), CoreError> {
        self.send(&Command::AppStarted(AppInstance::new(package_name, user_id)?))
    }

    pub fn app_killed(&self, package_name: &str, user_id: i32) -> Result<(), CoreError> {
        self.send(&Command::AppKilled(AppInstance::new(package_name, user_id)?))
    }

    pub fn app_foreground(&self, package_name: &str, user_id: i32) -> Result<(), CoreError> {
        self.send(&Command::AppForeground(AppInstance::new(package_name, user_id)?))
    }

    pub fn app_background(&self, package_name: &str, user_id: i32) -> Result<(), CoreError> {
        self.send(&Command::AppBackground(AppInstance::new(package_name, user_id)?))
    }
}

// ── ProbeConnector ───────────────────────────────────────────────────

/// Owner of the probe thread.
pub struct ProbeConnector {
    config: ProbeConfig,
    sender: ProbeSender,
    parked: Option<Parked>,
    worker: Option<JoinHandle<Parked>>,
}

impl ProbeConnector {
    /// Create a stopped connector. `handler` receives config updates.
    pub fn new(config: ProbeConfig, handler: impl ProbeHandler) -> Self {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(false),
            state: AtomicU8::new(0),
        });
        Self {
            sender: ProbeSender {
                tx,
                shared,
                protocol_version: config.protocol_version,
            },
            config,
            parked: Some(Parked {
                rx,
                handler: Box::new(handler),
            }),
            worker: None,
        }
    }

    /// Spawn the probe thread. Idempotent.
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.sender.shared.running.load(Ordering::SeqCst) {
            debug!("probe connector already running");
            return Ok(());
        }
        // The thread may have exited on its own; take its parts back.
        self.join_worker();

        let Some(parked) = self.parked.take() else {
            return Err(CoreError::Internal("probe queue unavailable".into()));
        };

        self.sender.shared.running.store(true, Ordering::SeqCst);
        let worker = Worker {
            config: self.config.clone(),
            shared: Arc::clone(&self.sender.shared),
            rx: parked.rx,
            handler: parked.handler,
        };

        let handle = std::thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.sender.shared.running.store(false, Ordering::SeqCst);
                CoreError::Internal(format!("cannot spawn probe thread: {e}"))
            })?;
        self.worker = Some(handle);
        info!(endpoint = %self.config.endpoint, "probe connector started");
        Ok(())
    }

    /// Stop the thread, close the socket and drop queued messages. Idempotent.
    pub fn stop(&mut self) {
        if self.sender.shared.running.swap(false, Ordering::SeqCst) {
            // Wakes the thread if it is waiting on the queue or in backoff.
            let _ = self.sender.tx.send(Outbound::Shutdown);
        }
        self.join_worker();
        self.sender.shared.set_state(ConnectionState::Disconnected);
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(parked) => {
                let discarded = parked
                    .rx
                    .try_iter()
                    .filter(|m| matches!(m, Outbound::Frame(_)))
                    .count();
                if discarded > 0 {
                    debug!(discarded, "discarded queued probe messages");
                }
                self.parked = Some(parked);
                info!("probe connector stopped");
            }
            Err(_) => error!("probe thread panicked"),
        }
    }

    pub fn sender(&self) -> ProbeSender {
        self.sender.clone()
    }

    pub fn send(&self, command: &Command) -> Result<(), CoreError> {
        self.sender.send(command)
    }

    pub fn is_running(&self) -> bool {
        self.sender.shared.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.sender.shared.state()
    }
}

impl Drop for ProbeConnector {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Worker thread ────────────────────────────────────────────────────

struct Worker {
    config: ProbeConfig,
    shared: Arc<Shared>,
    rx: mpsc::Receiver<Outbound>,
    handler: Box<dyn ProbeHandler>,
}

impl Worker {
    fn run(mut self) -> Parked {
        // Frames pulled off the queue while offline, oldest first.
        let mut backlog: VecDeque<String> = VecDeque::new();

        while self.shared.running.load(Ordering::SeqCst) {
            self.shared.set_state(ConnectionState::Connecting);
            info!(endpoint = %self.config.endpoint, "probe connecting to daemon");

            match BlockingTransport::connect(
                &self.config.endpoint,
                self.config.connect_timeout,
                READ_POLL,
                self.config.liveness_timeout,
            ) {
                Ok(transport) => {
                    let end = self.session(transport, &mut backlog);
                    self.shared.set_state(ConnectionState::Disconnected);
                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::PeerClosed => info!("daemon closed the probe connection"),
                        SessionEnd::ReadTimeout => warn!("probe connection idle too long, recycling"),
                        SessionEnd::Io(e) => warn!(error = %e, "probe connection lost"),
                    }
                }
                Err(e) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    warn!(error = %e, "probe connection failed");
                }
            }

            if !self.backoff(&mut backlog) {
                break;
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        debug!(queued = backlog.len(), "probe loop exiting");
        Parked {
            rx: self.rx,
            handler: self.handler,
        }
    }

    /// Sleep out the reconnect delay while still accepting queued frames.
    /// Returns `false` on shutdown.
    fn backoff(&self, backlog: &mut VecDeque<String>) -> bool {
        let deadline = Instant::now() + self.config.reconnect_delay;
        debug!(
            delay_ms = u64::try_from(self.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "probe waiting before reconnect"
        );
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.shared.running.load(Ordering::SeqCst);
            }
            match self.rx.recv_timeout(remaining) {
                Ok(Outbound::Frame(frame)) => backlog.push_back(frame),
                Ok(Outbound::Shutdown) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    fn session(
        &mut self,
        mut transport: BlockingTransport,
        backlog: &mut VecDeque<String>,
    ) -> SessionEnd {
        let handshake = self.config.role().handshake(self.config.protocol_version);
        let hello = match codec::encode(&handshake) {
            Ok(line) => line,
            Err(e) => return SessionEnd::Io(e),
        };
        if let Err(e) = transport.write_frame(&hello) {
            return SessionEnd::Io(e);
        }
        self.shared.set_state(ConnectionState::Connected);
        info!(endpoint = %self.config.endpoint, pid = self.config.pid, "probe connected to daemon");

        while let Some(frame) = backlog.pop_front() {
            if let Err(e) = transport.write_frame(&frame) {
                backlog.push_front(frame);
                return SessionEnd::Io(e);
            }
        }

        let mut last_activity = Instant::now();
        let end = loop {
            if !self.shared.running.load(Ordering::SeqCst) {
                break SessionEnd::Cancelled;
            }

            match self.rx.recv_timeout(self.config.poll_interval) {
                Ok(Outbound::Frame(frame)) => {
                    if let Err(end) = self.flush_outbound(&mut transport, frame, backlog) {
                        break end;
                    }
                    last_activity = Instant::now();
                }
                Ok(Outbound::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    break SessionEnd::Cancelled;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            match self.drain_inbound(&mut transport) {
                Ok(true) => last_activity = Instant::now(),
                Ok(false) => {}
                Err(end) => break end,
            }

            if last_activity.elapsed() >= self.config.liveness_timeout {
                break SessionEnd::ReadTimeout;
            }
        };
        transport.close();
        end
    }

    /// Write `first` and everything already queued behind it, so a burst
    /// goes out before the next inbound poll.
    fn flush_outbound(
        &mut self,
        transport: &mut BlockingTransport,
        first: String,
        backlog: &mut VecDeque<String>,
    ) -> Result<(), SessionEnd> {
        let mut next = Some(first);
        while let Some(frame) = next.take() {
            if let Err(e) = transport.write_frame(&frame) {
                backlog.push_front(frame);
                return Err(SessionEnd::Io(e));
            }
            next = match self.rx.try_recv() {
                Ok(Outbound::Frame(frame)) => Some(frame),
                Ok(Outbound::Shutdown) | Err(TryRecvError::Disconnected) => {
                    return Err(SessionEnd::Cancelled);
                }
                Err(TryRecvError::Empty) => None,
            };
        }
        Ok(())
    }

    /// Handle every complete inbound frame. `Ok(true)` if any arrived.
    fn drain_inbound(&mut self, transport: &mut BlockingTransport) -> Result<bool, SessionEnd> {
        let mut any = false;
        loop {
            match transport.poll_frame() {
                Ok(FramePoll::Frame(line)) => {
                    any = true;
                    self.dispatch(&line);
                }
                Ok(FramePoll::Idle) => return Ok(any),
                Ok(FramePoll::Closed) => return Err(SessionEnd::PeerClosed),
                Err(e) => return Err(SessionEnd::Io(e)),
            }
        }
    }

    fn dispatch(&mut self, line: &str) {
        let envelope = match codec::decode(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "probe discarding undecodable frame");
                return;
            }
        };

        let handler = &mut self.handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if envelope.msg_type == types::PROBE_CONFIG_UPDATE {
                match envelope.decode_payload::<ProbeConfigUpdate>() {
                    Ok(update) => {
                        debug!(
                            policies = update.policies.len(),
                            frozen = update.frozen_apps.len(),
                            "probe config update received"
                        );
                        handler.on_config_update(update);
                    }
                    Err(e) => warn!(error = %e, "malformed probe config update"),
                }
            } else {
                handler.on_frame(&envelope);
            }
        }));
        if outcome.is_err() {
            error!(msg_type = %envelope.msg_type, "probe handler panicked; message dropped");
        }
    }
}
