// cerberus-core: Client facade, correlation and stream fan-out on top of cerberus-api.

pub mod client;
pub mod command;
pub mod config;
pub mod correlator;
pub mod error;
pub mod history;
pub mod probe;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::DaemonClient;
pub use command::{Command, Query};
pub use config::{ClientConfig, ClientRole, ProbeConfig, ReconnectConfig, StreamConfig, StreamPolicy};
pub use error::CoreError;
pub use history::{MetricsHistory, SlidingWindow};
pub use probe::{ProbeConnector, ProbeHandler, ProbeSender};
pub use stream::{RawSubscription, Subscription, distinct_until_changed};

// Wire types consumers need without depending on cerberus-api directly.
pub use cerberus_api::protocol::payloads::{
    AppInstance, AppPolicy, AppRuntimeState, DashboardUpdate, DisplayStatus, FreezeMode,
    FullConfig, GlobalStats, LogEntry, LogLevel, LogQuery, MasterConfig, MetricsRecord, Policy,
    ProbeConfigUpdate,
};
pub use cerberus_api::protocol::types;
pub use cerberus_api::{ConnectionState, Endpoint, Envelope, MessageKind, OfflinePolicy};
