//! Config subcommand handlers. None of these touch the daemon.

use std::fmt::Write as _;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::commands::util;
use crate::config::{self, Config, DEFAULT_PROFILE, Profile};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

fn to_toml(cfg: &Config) -> Result<String, CliError> {
    toml::to_string_pretty(cfg).map_err(|e| CliError::Render(e.to_string()))
}

fn sorted_names(cfg: &Config) -> Vec<&str> {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}

/// One name per line, the default marked with `*`.
fn format_profiles(cfg: &Config) -> String {
    let default = cfg.default_profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let mut out = String::new();
    for name in sorted_names(cfg) {
        let marker = if name == default { " *" } else { "" };
        let endpoint = cfg.profiles[name]
            .endpoint
            .as_ref()
            .map_or_else(|| "(default endpoint)".to_owned(), ToString::to_string);
        let _ = writeln!(out, "{name}{marker}  {endpoint}");
    }
    out.trim_end().to_owned()
}

/// Insert `profile`, making it the default when the current default names
/// no saved profile.
fn add_profile(cfg: &mut Config, name: &str, profile: Profile) {
    let default_missing = cfg
        .default_profile
        .as_ref()
        .is_none_or(|d| !cfg.profiles.contains_key(d));
    cfg.profiles.insert(name.to_owned(), profile);
    if default_missing {
        cfg.default_profile = Some(name.to_owned());
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => to_toml(&cfg)?.trim_end().to_owned(),
                format => output::render_single(format, &cfg, |_| String::new(), |_| String::new())?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { name, force } => {
            let mut cfg = config::load_config()?;
            if cfg.profiles.contains_key(&name) && !force {
                return Err(CliError::ProfileExists { name });
            }

            let profile = Profile {
                endpoint: global
                    .endpoint
                    .as_deref()
                    .map(config::parse_endpoint)
                    .transpose()?,
                ..Profile::default()
            };
            add_profile(&mut cfg, &name, profile);

            let path = config::save_config(&cfg)?;
            util::note(
                &format!("✓ Profile '{name}' written to {}", path.display()),
                global,
            );
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config()?;
            if cfg.profiles.is_empty() {
                util::note("No profiles configured. Run: cerberusctl config init", global);
                return Ok(());
            }
            let out = match global.output {
                OutputFormat::Table => format_profiles(&cfg),
                OutputFormat::Plain => sorted_names(&cfg).join("\n"),
                format => output::render_single(
                    format,
                    &cfg.profiles,
                    |_| String::new(),
                    |_| String::new(),
                )?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                let available = sorted_names(&cfg);
                return Err(CliError::ProfileNotFound {
                    available: if available.is_empty() {
                        "(none)".into()
                    } else {
                        available.join(", ")
                    },
                    name,
                });
            }

            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            util::note(&format!("✓ Default profile set to '{name}'"), global);
            Ok(())
        }
    }
}
