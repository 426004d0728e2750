//! Shared configuration for cerberusd client tools.
//!
//! TOML profiles merged with `CERBERUS_`-prefixed environment variables,
//! and translation to `cerberus_core::ClientConfig` / `ProbeConfig`. The CLI
//! layers its own flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cerberus_core::{
    ClientConfig, ClientRole, Endpoint, OfflinePolicy, ProbeConfig, StreamPolicy,
};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PROFILE: &str = "default";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{name}' (known: {known})")]
    UnknownProfile { name: String, known: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named daemon profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some(DEFAULT_PROFILE.into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    5
}

/// A named daemon profile. Unset fields fall back to the client defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// `tcp://host:port`, `unix:/path` or `@abstract-name`.
    pub endpoint: Option<Endpoint>,

    /// `v` written on outbound envelopes.
    pub protocol_version: Option<u32>,

    /// `drop` or `queue`.
    pub offline: Option<OfflinePolicy>,

    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub reconnect_delay_ms: Option<u64>,

    /// Give up after this many consecutive failed attempts.
    pub max_retries: Option<u32>,

    /// Per-stream replay/buffer overrides keyed by message type.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub streams: HashMap<String, StreamOverride>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamOverride {
    pub replay: Option<usize>,
    pub capacity: Option<usize>,
}

impl StreamOverride {
    fn apply(self, base: StreamPolicy) -> StreamPolicy {
        StreamPolicy {
            replay: self.replay.unwrap_or(base.replay),
            capacity: self.capacity.unwrap_or(base.capacity),
        }
    }
}

impl Config {
    /// Name of the profile to use: `requested`, else `default_profile`.
    pub fn profile_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .or(self.default_profile.as_deref())
            .unwrap_or(DEFAULT_PROFILE)
    }

    /// Look up a profile. A missing `"default"` profile resolves to an
    /// empty one, so a fresh install works without a config file.
    pub fn profile(&self, name: &str) -> Result<Profile, ConfigError> {
        if let Some(profile) = self.profiles.get(name) {
            return Ok(profile.clone());
        }
        if name == DEFAULT_PROFILE {
            return Ok(Profile::default());
        }
        let mut known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        known.sort_unstable();
        Err(ConfigError::UnknownProfile {
            name: name.into(),
            known: if known.is_empty() {
                "none".into()
            } else {
                known.join(", ")
            },
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "cerberus", "cerberus").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("cerberus");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `CERBERUS_*` variables.
///
/// Nested keys use a double underscore:
/// `CERBERUS_PROFILES__DEFAULT__ENDPOINT=tcp://127.0.0.1:28900`.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CERBERUS_").split("__"))
}

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment_for(path).extract()?)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation to runtime config ───────────────────────────────────

/// Build a UI `ClientConfig` from a profile. No CLI flag overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let endpoint = profile.endpoint.clone().unwrap_or_default();
    let mut config = ClientConfig::for_role(endpoint, ClientRole::Ui);

    if let Some(version) = profile.protocol_version {
        config.protocol_version = positive("protocol_version", version)?;
    }
    if let Some(offline) = profile.offline {
        config.offline = offline;
    }
    if let Some(ms) = profile.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(positive("connect_timeout_ms", ms)?);
    }
    if let Some(secs) = profile.read_timeout_secs {
        config.read_timeout = Duration::from_secs(positive("read_timeout_secs", secs)?);
    }
    config.request_timeout = match profile.request_timeout_ms {
        Some(ms) => Duration::from_millis(positive("request_timeout_ms", ms)?),
        None => Duration::from_secs(positive("defaults.timeout", defaults.timeout)?),
    };
    if let Some(ms) = profile.reconnect_delay_ms {
        config.reconnect.delay = Duration::from_millis(ms);
    }
    config.reconnect.max_retries = profile.max_retries;

    for (msg_type, over) in &profile.streams {
        let base = config.streams.policy_for(msg_type);
        config
            .streams
            .overrides
            .insert(msg_type.clone(), over.apply(base));
    }

    Ok(config)
}

/// Build a `ProbeConfig` from a profile for the given host process.
pub fn profile_to_probe_config(
    profile: &Profile,
    pid: u32,
    version: &str,
) -> Result<ProbeConfig, ConfigError> {
    let endpoint = profile.endpoint.clone().unwrap_or_else(Endpoint::default_tcp);
    let mut config = ProbeConfig::new(endpoint, pid, version);

    if let Some(v) = profile.protocol_version {
        config.protocol_version = positive("protocol_version", v)?;
    }
    if let Some(ms) = profile.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(positive("connect_timeout_ms", ms)?);
    }
    if let Some(secs) = profile.read_timeout_secs {
        config.liveness_timeout = Duration::from_secs(positive("read_timeout_secs", secs)?);
    }
    if let Some(ms) = profile.reconnect_delay_ms {
        config.reconnect_delay = Duration::from_millis(ms);
    }
    Ok(config)
}

fn positive<T: PartialEq + Default>(field: &str, value: T) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(toml: &str) -> Config {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml))
            .extract()
            .unwrap()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse("");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.profile_name(None), DEFAULT_PROFILE);
        assert_eq!(cfg.profile(DEFAULT_PROFILE).unwrap(), Profile::default());
    }

    #[test]
    fn profile_overrides_reach_client_config() {
        let cfg = parse(
            r#"
            default_profile = "phone"

            [defaults]
            timeout = 9

            [profiles.phone]
            endpoint = "tcp://127.0.0.1:28900"
            offline = "queue"
            read_timeout_secs = 60
            reconnect_delay_ms = 500
            max_retries = 4

            [profiles.phone.streams."stream.dashboard_update"]
            replay = 3
            "#,
        );
        let name = cfg.profile_name(None);
        assert_eq!(name, "phone");
        let profile = cfg.profile(name).unwrap();
        let client = profile_to_client_config(&profile, &cfg.defaults).unwrap();

        assert_eq!(client.endpoint, Endpoint::default_tcp());
        assert_eq!(client.offline, OfflinePolicy::Queue);
        assert_eq!(client.read_timeout, Duration::from_secs(60));
        assert_eq!(client.request_timeout, Duration::from_secs(9));
        assert_eq!(client.reconnect.delay, Duration::from_millis(500));
        assert_eq!(client.reconnect.max_retries, Some(4));

        let dash = client.streams.policy_for("stream.dashboard_update");
        assert_eq!(dash.replay, 3);
        assert_eq!(dash.capacity, StreamPolicy::default().capacity);
    }

    #[test]
    fn unknown_profile_lists_known_ones() {
        let cfg = parse("[profiles.b]\n[profiles.a]\n");
        let err = cfg.profile("c").unwrap_err();
        assert_eq!(err.to_string(), "no profile named 'c' (known: a, b)");
    }

    #[test]
    fn bad_endpoint_is_a_load_error() {
        let result: Result<Config, _> = Figment::new()
            .merge(Toml::string("[profiles.x]\nendpoint = \"http://nope\"\n"))
            .extract();
        assert!(result.is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let profile = Profile {
            request_timeout_ms: Some(0),
            ..Profile::default()
        };
        let err = profile_to_client_config(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "request_timeout_ms"));
    }

    #[test]
    fn probe_defaults_to_loopback_tcp() {
        let probe = profile_to_probe_config(&Profile::default(), 77, "2.0").unwrap();
        assert_eq!(probe.endpoint, Endpoint::default_tcp());
        assert_eq!(probe.pid, 77);
        assert_eq!(probe.version, "2.0");
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert(
            "lab".into(),
            Profile {
                endpoint: Some(Endpoint::unix("/data/local/tmp/cerberus.sock")),
                request_timeout_ms: Some(2500),
                ..Profile::default()
            },
        );
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.profiles["lab"], cfg.profiles["lab"]);
    }
}
