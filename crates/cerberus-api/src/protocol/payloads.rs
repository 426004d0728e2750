//! Fixed-field payload types, one per message type.
//!
//! Every field the daemon may omit carries a serde default so that partial
//! payloads from older daemons still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Policy ───────────────────────────────────────────────────────────

/// Freeze policy tier. Integer on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(into = "u8", from = "u8")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Policy {
    /// Never frozen.
    #[default]
    Exempted,
    Important,
    Standard,
    Strict,
}

impl From<Policy> for u8 {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Exempted => 0,
            Policy::Important => 1,
            Policy::Standard => 2,
            Policy::Strict => 3,
        }
    }
}

/// Unknown tiers fall back to `Exempted`, the daemon's own fallback.
impl From<u8> for Policy {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Important,
            2 => Self::Standard,
            3 => Self::Strict,
            _ => Self::Exempted,
        }
    }
}

// ── App identity ─────────────────────────────────────────────────────

/// One installed app instance. `user_id > 0` is a cloned / work-profile copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppInstance {
    pub package_name: String,
    #[serde(default)]
    pub user_id: i32,
}

impl AppInstance {
    pub fn new(package_name: impl Into<String>, user_id: i32) -> Result<Self, Error> {
        let package_name = package_name.into();
        validate_package_name(&package_name)?;
        Ok(Self {
            package_name,
            user_id,
        })
    }
}

fn validate_package_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidPayload {
            field: "package_name",
            reason: "must not be empty".into(),
        });
    }
    if name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidPayload {
            field: "package_name",
            reason: format!("'{name}' contains whitespace"),
        });
    }
    Ok(())
}

// ── Policies (cmd.set_policy / resp.all_policies) ────────────────────

/// Per-app policy. Payload of `cmd.set_policy` and an element of
/// `resp.all_policies`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPolicy {
    pub package_name: String,
    #[serde(default)]
    pub user_id: i32,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub force_playback_exempt: bool,
    #[serde(default)]
    pub force_network_exempt: bool,
}

impl AppPolicy {
    /// Validated constructor; exemptions default to off.
    pub fn new(
        package_name: impl Into<String>,
        user_id: i32,
        policy: Policy,
    ) -> Result<Self, Error> {
        let package_name = package_name.into();
        validate_package_name(&package_name)?;
        Ok(Self {
            package_name,
            user_id,
            policy,
            force_playback_exempt: false,
            force_network_exempt: false,
        })
    }

    pub fn playback_exempt(mut self, exempt: bool) -> Self {
        self.force_playback_exempt = exempt;
        self
    }

    pub fn network_exempt(mut self, exempt: bool) -> Self {
        self.force_network_exempt = exempt;
        self
    }

    pub fn instance(&self) -> AppInstance {
        AppInstance {
            package_name: self.package_name.clone(),
            user_id: self.user_id,
        }
    }
}

/// Payload of `resp.all_policies`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullConfig {
    /// Packages the daemon never touches, regardless of policy.
    #[serde(default)]
    pub hard_safety_net: Vec<String>,
    #[serde(default)]
    pub policies: Vec<AppPolicy>,
}

impl FullConfig {
    pub fn policy_for(&self, package_name: &str, user_id: i32) -> Option<&AppPolicy> {
        self.policies
            .iter()
            .find(|p| p.package_name == package_name && p.user_id == user_id)
    }

    pub fn is_safety_net(&self, package_name: &str) -> bool {
        self.hard_safety_net.iter().any(|p| p == package_name)
    }
}

/// Payload of `cmd.set_master_config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterConfig {
    pub standard_timeout_sec: u32,
    pub is_timed_unfreeze_enabled: bool,
    pub timed_unfreeze_interval_sec: u32,
}

// ── Dashboard (stream.dashboard_update) ──────────────────────────────

/// Payload of `stream.dashboard_update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardUpdate {
    #[serde(default)]
    pub global_stats: GlobalStats,
    #[serde(default)]
    pub apps_runtime_state: Vec<AppRuntimeState>,
}

/// System-wide figures shown in the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    #[serde(default)]
    pub total_cpu_usage_percent: f32,
    #[serde(default)]
    pub total_mem_kb: i64,
    #[serde(default)]
    pub avail_mem_kb: i64,
    #[serde(default)]
    pub swap_total_kb: i64,
    #[serde(default)]
    pub swap_free_kb: i64,
    #[serde(default)]
    pub active_profile_name: String,
}

impl GlobalStats {
    pub fn used_mem_kb(&self) -> i64 {
        self.total_mem_kb.saturating_sub(self.avail_mem_kb)
    }

    pub fn used_swap_kb(&self) -> i64 {
        self.swap_total_kb.saturating_sub(self.swap_free_kb)
    }
}

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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "snake_case")]
pub enum DisplayStatus {
    Stopped,
    Foreground,
    ForegroundGame,
    BackgroundActive,
    BackgroundIdle,
    AwaitingFreeze,
    Frozen,
    Killed,
    Exempted,
    #[default]
    #[serde(other)]
    Unknown,
}

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
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "lowercase")]
pub enum FreezeMode {
    Cgroup,
    Sigstop,
    #[serde(other)]
    Unknown,
}

/// Live state of one app instance.
///
/// The activity flags and the freeze countdown are camelCase on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRuntimeState {
    pub package_name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub user_id: i32,
    #[serde(default)]
    pub display_status: DisplayStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_freeze_mode: Option<FreezeMode>,
    #[serde(default)]
    pub mem_usage_kb: i64,
    #[serde(default)]
    pub swap_usage_kb: i64,
    #[serde(default)]
    pub cpu_usage_percent: f32,
    #[serde(default)]
    pub is_whitelisted: bool,
    #[serde(default)]
    pub is_foreground: bool,
    #[serde(default, rename = "hasPlayback")]
    pub has_playback: bool,
    #[serde(default, rename = "hasNotification")]
    pub has_notification: bool,
    #[serde(default, rename = "hasNetworkActivity")]
    pub has_network_activity: bool,
    #[serde(default, rename = "pendingFreezeSec")]
    pub pending_freeze_sec: i32,
}

// ── Probe (event.probe_hello / stream.probe_config_update) ───────────

/// Payload of `event.probe_hello`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeHello {
    pub pid: u32,
    pub version: String,
}

/// Payload of `stream.probe_config_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfigUpdate {
    #[serde(default)]
    pub policies: Vec<AppPolicy>,
    #[serde(default)]
    pub frozen_apps: Vec<AppInstance>,
}

impl ProbeConfigUpdate {
    pub fn is_frozen(&self, package_name: &str, user_id: i32) -> bool {
        self.frozen_apps
            .iter()
            .any(|a| a.package_name == package_name && a.user_id == user_id)
    }
}

// ── Logs (query.get_logs / stream.new_log_entry) ─────────────────────

/// Daemon log severity / category. Integer on the wire.
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
#[serde(into = "u8", from = "u8")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Info,
    Success,
    Warn,
    Error,
    Event,
    Doze,
    Battery,
    Report,
    ActionOpen,
    ActionClose,
    ActionFreeze,
    ActionUnfreeze,
    ActionDelay,
    Timer,
    BatchParent,
}

const LOG_LEVELS: [LogLevel; 15] = [
    LogLevel::Info,
    LogLevel::Success,
    LogLevel::Warn,
    LogLevel::Error,
    LogLevel::Event,
    LogLevel::Doze,
    LogLevel::Battery,
    LogLevel::Report,
    LogLevel::ActionOpen,
    LogLevel::ActionClose,
    LogLevel::ActionFreeze,
    LogLevel::ActionUnfreeze,
    LogLevel::ActionDelay,
    LogLevel::Timer,
    LogLevel::BatchParent,
];

impl From<LogLevel> for u8 {
    fn from(level: LogLevel) -> Self {
        LOG_LEVELS
            .iter()
            .position(|l| *l == level)
            .and_then(|i| u8::try_from(i).ok())
            .unwrap_or(0)
    }
}

/// Unknown levels decode as `Info`.
impl From<u8> for LogLevel {
    fn from(value: u8) -> Self {
        LOG_LEVELS
            .get(usize::from(value))
            .copied()
            .unwrap_or_default()
    }
}

/// One daemon log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default = "no_user")]
    pub user_id: i32,
}

fn no_user() -> i32 {
    -1
}

impl LogEntry {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Payload of `query.get_logs`. Bounds are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl LogQuery {
    pub fn file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }
}

// ── Metrics (query.get_history_stats / stream.new_stats_record) ──────

/// One sample of device-wide metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub cpu_usage_percent: f32,
    #[serde(default)]
    pub mem_used_kb: i64,
    #[serde(default)]
    pub battery_level: i32,
    #[serde(default)]
    pub battery_temp_celsius: f32,
    #[serde(default)]
    pub battery_power_watt: f32,
    #[serde(default)]
    pub is_charging: bool,
    #[serde(default)]
    pub is_screen_on: bool,
    #[serde(default)]
    pub is_audio_playing: bool,
    #[serde(default)]
    pub is_location_active: bool,
}

impl MetricsRecord {
    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

// ── Misc replies ─────────────────────────────────────────────────────

/// Payload of `resp.adj_rules_content`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjRulesContent {
    #[serde(default)]
    pub content: String,
}

/// Payload of an `error.*` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonErrorPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Empty `{}` payload for argument-less queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

// ── Tests ────────────────────────────────────────────────────────────
