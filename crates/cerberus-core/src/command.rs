// ── Outbound message catalogue ──
//
// Every message the client can send, as a tagged variant with a fixed-field
// payload. `Command`s are fire-and-forget; `Query`s are correlated and name
// the reply type they expect.

use cerberus_api::Envelope;
use cerberus_api::protocol::payloads::{AppInstance, AppPolicy, Empty, LogQuery, MasterConfig};
use cerberus_api::protocol::types;

/// Fire-and-forget instruction or notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPolicy(AppPolicy),
    SetMasterConfig(MasterConfig),
    ReloadAdjRules,
    /// Ask the daemon to push a fresh `stream.dashboard_update`.
    RefreshDashboard,

    // App lifecycle events reported by the probe.
    AppStarted(AppInstance),
    AppKilled(AppInstance),
    AppForeground(AppInstance),
    AppBackground(AppInstance),
}

impl Command {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::SetPolicy(_) => types::SET_POLICY,
            Self::SetMasterConfig(_) => types::SET_MASTER_CONFIG,
            Self::ReloadAdjRules => types::RELOAD_ADJ_RULES,
            Self::RefreshDashboard => types::REFRESH_DASHBOARD,
            Self::AppStarted(_) => types::APP_START,
            Self::AppKilled(_) => types::APP_KILLED,
            Self::AppForeground(_) => types::APP_FOREGROUND,
            Self::AppBackground(_) => types::APP_BACKGROUND,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, cerberus_api::Error> {
        let msg_type = self.message_type();
        match self {
            Self::SetPolicy(policy) => Envelope::with_payload(msg_type, policy),
            Self::SetMasterConfig(config) => Envelope::with_payload(msg_type, config),
            Self::ReloadAdjRules | Self::RefreshDashboard => {
                Envelope::with_payload(msg_type, &Empty {})
            }
            Self::AppStarted(app)
            | Self::AppKilled(app)
            | Self::AppForeground(app)
            | Self::AppBackground(app) => Envelope::with_payload(msg_type, app),
        }
    }
}

/// Correlated request. The reply arrives as [`response_type`](Self::response_type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    AllPolicies,
    LogFiles,
    Logs(LogQuery),
    HistoryStats,
    AdjRulesContent,
    DataAppPackages,
}

impl Query {
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::AllPolicies => types::GET_ALL_POLICIES,
            Self::LogFiles => types::GET_LOG_FILES,
            Self::Logs(_) => types::GET_LOGS,
            Self::HistoryStats => types::GET_HISTORY_STATS,
            Self::AdjRulesContent => types::GET_ADJ_RULES_CONTENT,
            Self::DataAppPackages => types::GET_DATA_APP_PACKAGES,
        }
    }

    pub fn response_type(&self) -> &'static str {
        match self {
            Self::AllPolicies => types::RESP_ALL_POLICIES,
            Self::LogFiles => types::RESP_LOG_FILES,
            Self::Logs(_) => types::RESP_LOGS,
            Self::HistoryStats => types::RESP_HISTORY_STATS,
            Self::AdjRulesContent => types::RESP_ADJ_RULES_CONTENT,
            Self::DataAppPackages => types::RESP_DATA_APP_PACKAGES,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, cerberus_api::Error> {
        match self {
            Self::Logs(query) => Envelope::with_payload(self.message_type(), query),
            _ => Envelope::with_payload(self.message_type(), &Empty {}),
        }
    }
}
