//! CLI configuration: thin wrapper around `cerberus_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--profile, --endpoint, --timeout).

use std::time::Duration;

use cerberus_core::{ClientConfig, Endpoint, ProbeConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use cerberus_config::{
    Config, DEFAULT_PROFILE, Profile, config_path, load_config, save_config,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    config.profile_name(global.profile.as_deref()).to_owned()
}

/// The active profile with `--endpoint` applied.
fn active_profile(global: &GlobalOpts, cfg: &Config) -> Result<Profile, CliError> {
    let name = active_profile_name(global, cfg);
    let mut profile = cfg.profile(&name)?;
    if let Some(endpoint) = global.endpoint.as_deref() {
        profile.endpoint = Some(parse_endpoint(endpoint)?);
    }
    Ok(profile)
}

pub fn parse_endpoint(text: &str) -> Result<Endpoint, CliError> {
    text.parse::<Endpoint>().map_err(|e| CliError::Validation {
        field: "endpoint".into(),
        reason: e.to_string(),
    })
}

/// Translate config file + global flags into a UI `ClientConfig`.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_client_config(global: &GlobalOpts) -> Result<ClientConfig, CliError> {
    let cfg = load_config()?;
    let profile = active_profile(global, &cfg)?;
    let mut client = cerberus_config::profile_to_client_config(&profile, &cfg.defaults)?;

    if let Some(secs) = global.timeout {
        if secs == 0 {
            return Err(CliError::Validation {
                field: "timeout".into(),
                reason: "must be greater than zero".into(),
            });
        }
        client.request_timeout = Duration::from_secs(secs);
    }
    Ok(client)
}

/// Probe config for `cerberusctl probe`, same override rules.
pub fn resolve_probe_config(
    global: &GlobalOpts,
    pid: u32,
    version: &str,
) -> Result<ProbeConfig, CliError> {
    let profile = active_profile(global, &load_config()?)?;
    Ok(cerberus_config::profile_to_probe_config(
        &profile, pid, version,
    )?)
}
