// ── Daemon client facade ──
//
// The one object consumers hold. Wires the connection manager to the
// correlator (replies) and the multiplexer (pushes), and exposes typed
// operations for every message the daemon understands. Construction never
// connects; call `start()`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use cerberus_api::protocol::payloads::{
    AdjRulesContent, AppPolicy, AppRuntimeState, DashboardUpdate, FullConfig, GlobalStats,
    LogEntry, LogQuery, MasterConfig, MetricsRecord, ProbeConfigUpdate,
};
use cerberus_api::protocol::types;
use cerberus_api::{
    ConnectionManager, ConnectionState, Envelope, FrameHandler, MessageKind,
};
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::command::{Command, Query};
use crate::config::ClientConfig;
use crate::correlator::Correlator;
use crate::error::CoreError;
use crate::stream::{Multiplexer, RawSubscription, Subscription, distinct_until_changed};

// ── Router ───────────────────────────────────────────────────────────

/// Inbound side: sorts decoded envelopes by kind.
struct Router {
    correlator: Correlator,
    streams: Multiplexer,
    last_dashboard: ArcSwapOption<DashboardUpdate>,
}

impl FrameHandler for Router {
    fn on_frame(&self, envelope: Arc<Envelope>) {
        match envelope.kind() {
            MessageKind::Response | MessageKind::Error => {
                if envelope.request_id.is_none() && envelope.kind() == MessageKind::Error {
                    warn!(msg_type = %envelope.msg_type, payload = %envelope.payload, "daemon reported an error");
                    return;
                }
                self.correlator.complete(envelope);
            }
            MessageKind::Stream | MessageKind::Event => {
                if envelope.msg_type == types::DASHBOARD_UPDATE {
                    match envelope.decode_payload::<DashboardUpdate>() {
                        Ok(update) => self.last_dashboard.store(Some(Arc::new(update))),
                        Err(e) => debug!(error = %e, "dashboard snapshot not cached"),
                    }
                }
                self.streams.publish(envelope);
            }
            _ => debug!(msg_type = %envelope.msg_type, "ignoring message with unroutable type"),
        }
    }

    fn on_disconnect(&self) {
        self.correlator.fail_all();
    }
}

// ── DaemonClient ─────────────────────────────────────────────────────

/// Handle to the cerberusd daemon.
///
/// Cheaply cloneable; clones share one connection.
#[derive(Clone)]
pub struct DaemonClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    connection: ConnectionManager,
    router: Arc<Router>,
}

impl DaemonClient {
    /// Create a client. Does NOT connect -- call [`start()`](Self::start).
    pub fn new(config: ClientConfig) -> Self {
        let router = Arc::new(Router {
            correlator: Correlator::new(),
            streams: Multiplexer::new(config.streams.clone()),
            last_dashboard: ArcSwapOption::empty(),
        });
        let handler: Arc<dyn FrameHandler> = router.clone();
        let connection = ConnectionManager::new(config.connection_config(), handler);

        Self {
            inner: Arc::new(ClientInner {
                config,
                connection,
                router,
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Begin connecting in the background. Idempotent.
    pub async fn start(&self) {
        self.inner.connection.start().await;
    }

    /// Close the connection and fail every pending request with
    /// [`CoreError::ConnectionLost`]. Subscriptions stay open but idle.
    pub async fn stop(&self) {
        self.inner.connection.stop().await;
        info!("daemon client stopped");
    }

    /// Wait until the handshake has gone out, or fail after `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut state = self.inner.connection.watch_state();
        let connected = tokio::time::timeout(
            timeout,
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await;
        match connected {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CoreError::NotRunning),
            Err(_) => Err(CoreError::ConnectionFailed {
                endpoint: self.inner.config.endpoint.to_string(),
                reason: format!("not connected after {}ms", timeout.as_millis()),
            }),
        }
    }

    /// Start, wait for the connection, run `f`, stop.
    ///
    /// Convenience for one-shot tools that need a single exchange.
    pub async fn oneshot<F, Fut, T>(
        config: ClientConfig,
        connect_timeout: Duration,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(DaemonClient) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let client = DaemonClient::new(config);
        client.start().await;
        if let Err(e) = client.wait_connected(connect_timeout).await {
            client.stop().await;
            return Err(e);
        }
        let result = f(client.clone()).await;
        client.stop().await;
        result
    }

    // ── State observation ────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    /// Connection state as a stream, starting with the current value.
    pub fn connection_state_stream(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.inner.connection.watch_state())
    }

    /// Every decoded inbound envelope, unfiltered.
    pub fn raw_frames(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.inner.connection.subscribe_frames()
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.router.correlator.len()
    }

    /// Sockets the client currently holds open (0 or 1).
    pub fn live_sockets(&self) -> usize {
        self.inner.connection.live_sockets()
    }

    // ── Generic messaging ────────────────────────────────────────

    /// Fire-and-forget message with an arbitrary type and payload.
    pub fn send_command<P: Serialize + ?Sized>(
        &self,
        msg_type: &str,
        payload: &P,
    ) -> Result<(), CoreError> {
        let envelope = Envelope::with_payload(msg_type, payload)?
            .version(self.inner.config.protocol_version);
        self.inner.connection.send(&envelope)?;
        Ok(())
    }

    /// Correlated request with an arbitrary type; returns the raw reply.
    ///
    /// `timeout` defaults to the configured request timeout.
    pub async fn query<P: Serialize + ?Sized>(
        &self,
        msg_type: &str,
        payload: &P,
        timeout: Option<Duration>,
    ) -> Result<Arc<Envelope>, CoreError> {
        let envelope = Envelope::with_payload(msg_type, payload)?;
        self.request(envelope, timeout).await
    }

    async fn request(
        &self,
        envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<Arc<Envelope>, CoreError> {
        let envelope = envelope.version(self.inner.config.protocol_version);
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        let connection = &self.inner.connection;
        self.inner
            .router
            .correlator
            .request(envelope, timeout, |env| connection.send(env))
            .await
    }

    /// Send a catalogued command.
    pub fn execute(&self, command: &Command) -> Result<(), CoreError> {
        let envelope = command
            .to_envelope()?
            .version(self.inner.config.protocol_version);
        self.inner.connection.send(&envelope)?;
        debug!(msg_type = command.message_type(), "command sent");
        Ok(())
    }

    /// Run a catalogued query and decode its reply payload.
    pub async fn ask<T: DeserializeOwned>(&self, query: &Query) -> Result<T, CoreError> {
        let reply = self.request(query.to_envelope()?, None).await?;
        if reply.msg_type != query.response_type() {
            return Err(CoreError::UnexpectedResponse {
                request: query.message_type().to_owned(),
                expected: query.response_type().to_owned(),
                actual: reply.msg_type.clone(),
            });
        }
        reply.decode_payload().map_err(|e| CoreError::Decode {
            msg_type: reply.msg_type.clone(),
            message: e.to_string(),
        })
    }

    // ── Typed commands ───────────────────────────────────────────

    pub fn set_policy(&self, policy: AppPolicy) -> Result<(), CoreError> {
        self.execute(&Command::SetPolicy(policy))
    }

    pub fn set_master_config(&self, config: MasterConfig) -> Result<(), CoreError> {
        self.execute(&Command::SetMasterConfig(config))
    }

    pub fn reload_adj_rules(&self) -> Result<(), CoreError> {
        self.execute(&Command::ReloadAdjRules)
    }

    /// Ask for an immediate dashboard push; the answer arrives on [`dashboard`](Self::dashboard).
    pub fn refresh_dashboard(&self) -> Result<(), CoreError> {
        self.execute(&Command::RefreshDashboard)
    }

    // ── Typed queries ────────────────────────────────────────────

    pub async fn all_policies(&self) -> Result<FullConfig, CoreError> {
        self.ask(&Query::AllPolicies).await
    }

    pub async fn log_files(&self) -> Result<Vec<String>, CoreError> {
        self.ask(&Query::LogFiles).await
    }

    pub async fn logs(&self, query: LogQuery) -> Result<Vec<LogEntry>, CoreError> {
        self.ask(&Query::Logs(query)).await
    }

    pub async fn history_stats(&self) -> Result<Vec<MetricsRecord>, CoreError> {
        self.ask(&Query::HistoryStats).await
    }

    pub async fn adj_rules_content(&self) -> Result<String, CoreError> {
        let content: AdjRulesContent = self.ask(&Query::AdjRulesContent).await?;
        Ok(content.content)
    }

    pub async fn data_app_packages(&self) -> Result<Vec<String>, CoreError> {
        self.ask(&Query::DataAppPackages).await
    }

    // ── Streams ──────────────────────────────────────────────────

    /// Subscribe to one exact `stream.*` / `event.*` type.
    pub fn stream_of(&self, msg_type: &str) -> RawSubscription {
        self.inner.router.streams.subscribe(msg_type)
    }

    /// Typed subscription; undecodable payloads are skipped.
    pub fn subscribe<T: DeserializeOwned>(&self, msg_type: &str) -> Subscription<T> {
        self.stream_of(msg_type).typed()
    }

    pub fn dashboard(&self) -> impl Stream<Item = DashboardUpdate> + Send + 'static {
        self.subscribe::<DashboardUpdate>(types::DASHBOARD_UPDATE)
            .into_stream()
    }

    /// Global stats, with consecutive duplicates suppressed.
    pub fn global_stats(&self) -> impl Stream<Item = GlobalStats> + Send + 'static {
        distinct_until_changed(self.dashboard().map(|update| update.global_stats))
    }

    pub fn app_states(&self) -> impl Stream<Item = Vec<AppRuntimeState>> + Send + 'static {
        self.dashboard().map(|update| update.apps_runtime_state)
    }

    pub fn log_entries(&self) -> impl Stream<Item = LogEntry> + Send + 'static {
        self.subscribe::<LogEntry>(types::NEW_LOG_ENTRY).into_stream()
    }

    pub fn stats_records(&self) -> impl Stream<Item = MetricsRecord> + Send + 'static {
        self.subscribe::<MetricsRecord>(types::NEW_STATS_RECORD)
            .into_stream()
    }

    pub fn probe_config(&self) -> impl Stream<Item = ProbeConfigUpdate> + Send + 'static {
        self.subscribe::<ProbeConfigUpdate>(types::PROBE_CONFIG_UPDATE)
            .into_stream()
    }

    /// Last dashboard received on this client, if any.
    pub fn last_dashboard(&self) -> Option<Arc<DashboardUpdate>> {
        self.inner.router.last_dashboard.load_full()
    }
}
