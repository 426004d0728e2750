// ── Runtime client configuration ──
//
// These types describe *how* to talk to cerberusd: where it listens, which
// role this client identifies as, and the timing knobs of the reconnect
// loop. They never touch disk. The CLI (or an embedding app) builds a
// `ClientConfig` and hands it in.

use std::collections::HashMap;
use std::time::Duration;

use cerberus_api::connection::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use cerberus_api::protocol::payloads::ProbeHello;
use cerberus_api::protocol::types;
use cerberus_api::{ConnectionConfig, Endpoint, Envelope, OfflinePolicy, PROTOCOL_VERSION};

pub use cerberus_api::ReconnectConfig;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const PROBE_RECONNECT_DELAY: Duration = Duration::from_secs(5);

// ── ClientRole ───────────────────────────────────────────────────────

/// What this client identifies as in its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientRole {
    /// Management UI: `hello.ui`.
    #[default]
    Ui,
    /// In-process probe: `event.probe_hello{pid, version}`.
    Probe { pid: u32, version: String },
}

impl ClientRole {
    /// The identification frame written first on every connection.
    pub fn handshake(&self, protocol_version: u32) -> Envelope {
        match self {
            Self::Ui => Envelope::new(types::HELLO_UI).version(protocol_version),
            Self::Probe { pid, version } => {
                let hello = ProbeHello {
                    pid: *pid,
                    version: version.clone(),
                };
                Envelope {
                    version: protocol_version,
                    msg_type: types::PROBE_HELLO.to_owned(),
                    request_id: None,
                    payload: serde_json::json!(hello),
                }
            }
        }
    }

    /// Offline send policy this role uses unless overridden.
    pub fn default_offline_policy(&self) -> OfflinePolicy {
        match self {
            Self::Ui => OfflinePolicy::Drop,
            Self::Probe { .. } => OfflinePolicy::Queue,
        }
    }

    pub fn default_reconnect_delay(&self) -> Duration {
        match self {
            Self::Ui => cerberus_api::connection::DEFAULT_RECONNECT_DELAY,
            Self::Probe { .. } => PROBE_RECONNECT_DELAY,
        }
    }
}

// ── StreamConfig ─────────────────────────────────────────────────────

/// Replay and buffering for one stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Most recent values replayed to a new subscriber.
    pub replay: usize,
    /// Per-subscriber buffer; a slower subscriber skips ahead.
    pub capacity: usize,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            replay: 1,
            capacity: 64,
        }
    }
}

/// Stream multiplexer settings with per-type overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub default: StreamPolicy,
    pub overrides: HashMap<String, StreamPolicy>,
}

impl StreamConfig {
    pub fn policy_for(&self, msg_type: &str) -> StreamPolicy {
        self.overrides
            .get(msg_type)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        // Log lines keep a deeper history so a reopened log view is not empty.
        let overrides = HashMap::from([(
            types::NEW_LOG_ENTRY.to_owned(),
            StreamPolicy {
                replay: 20,
                capacity: 84,
            },
        )]);
        Self {
            default: StreamPolicy::default(),
            overrides,
        }
    }
}

// ── ClientConfig ─────────────────────────────────────────────────────

/// Configuration for one [`DaemonClient`](crate::DaemonClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub role: ClientRole,
    /// Written as `v` on outbound envelopes.
    pub protocol_version: u32,
    pub reconnect: ReconnectConfig,
    pub connect_timeout: Duration,
    /// Longest silence tolerated on a connected socket.
    pub read_timeout: Duration,
    /// Default deadline for correlated queries.
    pub request_timeout: Duration,
    pub offline: OfflinePolicy,
    pub streams: StreamConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::for_role(Endpoint::default(), ClientRole::Ui)
    }
}

impl ClientConfig {
    /// Defaults appropriate for `role`.
    pub fn for_role(endpoint: Endpoint, role: ClientRole) -> Self {
        Self {
            endpoint,
            protocol_version: PROTOCOL_VERSION,
            reconnect: ReconnectConfig {
                delay: role.default_reconnect_delay(),
                max_retries: None,
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            offline: role.default_offline_policy(),
            streams: StreamConfig::default(),
            role,
        }
    }

    /// UI client on the daemon's loopback TCP port.
    pub fn tcp_loopback() -> Self {
        Self::for_role(Endpoint::default_tcp(), ClientRole::Ui)
    }

    pub fn handshake(&self) -> Envelope {
        self.role.handshake(self.protocol_version)
    }

    pub(crate) fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.endpoint.clone(),
            handshake: self.handshake(),
            reconnect: self.reconnect.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            offline: self.offline,
        }
    }
}

// ── ProbeConfig ──────────────────────────────────────────────────────

/// Configuration for the blocking [`ProbeConnector`](crate::ProbeConnector).
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub endpoint: Endpoint,
    pub pid: u32,
    /// Build tag reported in the probe hello.
    pub version: String,
    pub protocol_version: u32,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Longest combined read/write silence before the socket is recycled.
    pub liveness_timeout: Duration,
    /// How long one loop iteration waits for outbound work.
    pub poll_interval: Duration,
}

impl ProbeConfig {
    pub fn new(endpoint: Endpoint, pid: u32, version: impl Into<String>) -> Self {
        Self {
            endpoint,
            pid,
            version: version.into(),
            protocol_version: PROTOCOL_VERSION,
            reconnect_delay: PROBE_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            liveness_timeout: DEFAULT_READ_TIMEOUT,
            poll_interval: Duration::from_millis(200),
        }
    }

    pub fn role(&self) -> ClientRole {
        ClientRole::Probe {
            pid: self.pid,
            version: self.version.clone(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
