//! `cerberusctl probe`: stand in for the in-process probe.
//!
//! The probe connector is blocking and owns its own thread; this command
//! only starts it, queues the requested lifecycle events and waits.

use std::time::Duration;

use cerberus_core::{ProbeConfigUpdate, ProbeConnector, ProbeHandler, ProbeSender};

use crate::cli::{GlobalOpts, OutputFormat, ProbeArgs};
use crate::commands::util;
use crate::config;
use crate::error::CliError;
use crate::output;

// ── Lifecycle events ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Start,
    Killed,
    Foreground,
    Background,
}

#[derive(Debug, PartialEq, Eq)]
struct LifecycleEvent {
    kind: EventKind,
    package: String,
    user: i32,
}

impl LifecycleEvent {
    /// `KIND:PACKAGE[:USER]`
    fn parse(text: &str) -> Result<Self, CliError> {
        let invalid = |reason: &str| CliError::Validation {
            field: "send".into(),
            reason: format!("'{text}': {reason}"),
        };
        let mut parts = text.splitn(3, ':');
        let kind = match parts.next().unwrap_or_default() {
            "start" => EventKind::Start,
            "killed" => EventKind::Killed,
            "foreground" | "fg" => EventKind::Foreground,
            "background" | "bg" => EventKind::Background,
            _ => return Err(invalid("kind must be start, killed, foreground or background")),
        };
        let package = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| invalid("missing package name"))?
            .to_owned();
        let user = match parts.next() {
            Some(user) => user
                .parse()
                .map_err(|_| invalid("user id must be an integer"))?,
            None => 0,
        };
        Ok(Self {
            kind,
            package,
            user,
        })
    }

    fn send(&self, sender: &ProbeSender) -> Result<(), CliError> {
        let (package, user) = (self.package.as_str(), self.user);
        match self.kind {
            EventKind::Start => sender.app_started(package, user),
            EventKind::Killed => sender.app_killed(package, user),
            EventKind::Foreground => sender.app_foreground(package, user),
            EventKind::Background => sender.app_background(package, user),
        }?;
        Ok(())
    }
}

// ── Handler ──────────────────────────────────────────────────────────

/// Prints every config push on the probe thread.
struct PrintUpdates {
    format: OutputFormat,
    quiet: bool,
}

fn summary(update: &ProbeConfigUpdate) -> String {
    let frozen: Vec<String> = update
        .frozen_apps
        .iter()
        .map(|a| format!("{}:{}", a.package_name, a.user_id))
        .collect();
    format!(
        "config update: {} policies, frozen [{}]",
        update.policies.len(),
        frozen.join(", ")
    )
}

impl ProbeHandler for PrintUpdates {
    fn on_config_update(&mut self, update: ProbeConfigUpdate) {
        match output::render_record(self.format, &update, summary) {
            Ok(out) => output::print_output(&out, self.quiet),
            Err(e) => tracing::warn!(error = %e, "cannot render config update"),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────────

pub async fn handle(args: ProbeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let events = args
        .events
        .iter()
        .map(|e| LifecycleEvent::parse(e))
        .collect::<Result<Vec<_>, _>>()?;

    let pid = args.pid.unwrap_or_else(std::process::id);
    let probe_config = config::resolve_probe_config(global, pid, &args.probe_version)?;
    util::note(
        &format!("probe {pid} connecting to {}", probe_config.endpoint),
        global,
    );

    let mut connector = ProbeConnector::new(
        probe_config,
        PrintUpdates {
            format: global.output,
            quiet: global.quiet,
        },
    );
    connector.start()?;

    // Queued until the hello has gone out.
    let sender = connector.sender();
    let sent = events.iter().try_for_each(|e| e.send(&sender));

    if sent.is_ok() {
        match args.duration {
            Some(secs) => {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(secs)) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            None => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    tokio::task::spawn_blocking(move || connector.stop())
        .await
        .map_err(|e| CliError::Internal(format!("probe shutdown failed: {e}")))?;
    sent
}
