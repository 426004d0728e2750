//! The cerberusd message protocol.
//!
//! Every message is a single JSON object on its own line:
//! `{"v": 1, "type": "cmd.set_policy", "req_id": "...", "payload": {...}}`.
//! Types are dot-namespaced; the prefix before the first `.` decides how a
//! message is routed (see [`MessageKind`]).

pub mod codec;
pub mod envelope;
pub mod payloads;

pub use codec::{decode, encode};
pub use envelope::Envelope;

use serde::{Deserialize, Serialize};

/// Protocol version written into outbound envelopes by default.
///
/// The daemon omits `v` in its replies; a missing version decodes as this value.
pub const PROTOCOL_VERSION: u32 = 1;

// ── MessageKind ──────────────────────────────────────────────────────

/// Routing class of a message, derived from its type prefix.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageKind {
    /// `hello.*` identification handshake.
    Hello,
    /// `cmd.*` fire-and-forget instruction.
    #[strum(serialize = "cmd")]
    Command,
    /// `query.*` request (correlated when it carries a `req_id`).
    Query,
    /// `resp.*` reply to a correlated query.
    #[strum(serialize = "resp")]
    Response,
    /// `stream.*` periodic push from the daemon.
    Stream,
    /// `event.*` one-shot notification (either direction).
    Event,
    /// `error.*` failure reply.
    Error,
    /// Anything else. Discarded by routers.
    Unknown,
}

impl MessageKind {
    /// Classify a full message type such as `"resp.all_policies"`.
    pub fn of(msg_type: &str) -> Self {
        let Some((prefix, _)) = msg_type.split_once('.') else {
            return Self::Unknown;
        };
        match prefix.parse::<Self>() {
            Ok(Self::Unknown) | Err(_) => Self::Unknown,
            Ok(kind) => kind,
        }
    }

    /// Replies routed to the request correlator.
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }

    /// Pushes routed to the stream multiplexer.
    pub fn is_push(self) -> bool {
        matches!(self, Self::Stream | Self::Event)
    }
}

// ── Message types ────────────────────────────────────────────────────

/// Well-known message type names.
pub mod types {
    // Handshake
    pub const HELLO_UI: &str = "hello.ui";
    pub const PROBE_HELLO: &str = "event.probe_hello";

    // Commands
    pub const SET_POLICY: &str = "cmd.set_policy";
    pub const SET_MASTER_CONFIG: &str = "cmd.set_master_config";
    pub const RELOAD_ADJ_RULES: &str = "cmd.reload_adj_rules";

    // Queries
    pub const GET_ALL_POLICIES: &str = "query.get_all_policies";
    pub const REFRESH_DASHBOARD: &str = "query.refresh_dashboard";
    pub const GET_LOG_FILES: &str = "query.get_log_files";
    pub const GET_LOGS: &str = "query.get_logs";
    pub const GET_HISTORY_STATS: &str = "query.get_history_stats";
    pub const GET_ADJ_RULES_CONTENT: &str = "query.get_adj_rules_content";
    pub const GET_DATA_APP_PACKAGES: &str = "query.get_data_app_packages";

    // Responses
    pub const RESP_ALL_POLICIES: &str = "resp.all_policies";
    pub const RESP_LOG_FILES: &str = "resp.get_log_files";
    pub const RESP_LOGS: &str = "resp.get_logs";
    pub const RESP_HISTORY_STATS: &str = "resp.history_stats";
    pub const RESP_ADJ_RULES_CONTENT: &str = "resp.adj_rules_content";
    pub const RESP_DATA_APP_PACKAGES: &str = "resp.data_app_packages";

    // Streams
    pub const DASHBOARD_UPDATE: &str = "stream.dashboard_update";
    pub const PROBE_CONFIG_UPDATE: &str = "stream.probe_config_update";
    pub const NEW_LOG_ENTRY: &str = "stream.new_log_entry";
    pub const NEW_STATS_RECORD: &str = "stream.new_stats_record";

    // App lifecycle events (probe → daemon)
    pub const APP_START: &str = "event.app_start";
    pub const APP_KILLED: &str = "event.app_killed";
    pub const APP_FOREGROUND: &str = "event.app_foreground";
    pub const APP_BACKGROUND: &str = "event.app_background";
}

// ── Tests ────────────────────────────────────────────────────────────
