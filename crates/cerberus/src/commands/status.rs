//! `cerberusctl status`

use cerberus_core::{DaemonClient, DashboardUpdate, DisplayStatus};
use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct Status {
    endpoint: String,
    state: String,
    protocol_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<SystemSummary>,
}

#[derive(Debug, Serialize)]
struct SystemSummary {
    active_profile: String,
    cpu_percent: f32,
    mem_used_kb: i64,
    mem_total_kb: i64,
    swap_used_kb: i64,
    apps: usize,
    frozen: usize,
    foreground: Option<String>,
}

impl From<&DashboardUpdate> for SystemSummary {
    fn from(update: &DashboardUpdate) -> Self {
        let stats = &update.global_stats;
        let apps = &update.apps_runtime_state;
        Self {
            active_profile: stats.active_profile_name.clone(),
            cpu_percent: stats.total_cpu_usage_percent,
            mem_used_kb: stats.used_mem_kb(),
            mem_total_kb: stats.total_mem_kb,
            swap_used_kb: stats.used_swap_kb(),
            apps: apps.len(),
            frozen: apps
                .iter()
                .filter(|a| a.display_status == DisplayStatus::Frozen)
                .count(),
            foreground: apps
                .iter()
                .find(|a| a.is_foreground)
                .map(|a| a.package_name.clone()),
        }
    }
}

fn detail(status: &Status, color: bool) -> String {
    let mut lines = vec![format!(
        "{} {} (protocol v{})",
        output::status(&status.state, color),
        status.endpoint,
        status.protocol_version
    )];
    match &status.system {
        Some(s) => {
            lines.push(format!(
                "cpu {:.1}%  mem {} / {}  swap {}",
                s.cpu_percent,
                output::kib(s.mem_used_kb),
                output::kib(s.mem_total_kb),
                output::kib(s.swap_used_kb),
            ));
            lines.push(format!(
                "profile {}  apps {}  frozen {}  foreground {}",
                s.active_profile,
                s.apps,
                s.frozen,
                s.foreground.as_deref().unwrap_or("-"),
            ));
        }
        None => lines.push(output::dim("no dashboard received", color)),
    }
    lines.join("\n")
}

pub async fn handle(client: &DaemonClient, global: &GlobalOpts) -> Result<(), CliError> {
    // Subscribe before asking so the pushed snapshot cannot be missed.
    let updates = client.dashboard();
    client.refresh_dashboard()?;
    let update = util::first(updates, client.config().request_timeout).await;

    let status = Status {
        endpoint: client.config().endpoint.to_string(),
        state: client.state().to_string(),
        protocol_version: client.config().protocol_version,
        system: update.as_ref().map(SystemSummary::from),
    };

    let color = output::should_color(global.color);
    let out = output::render_single(
        global.output,
        &status,
        |s| detail(s, color),
        |s| s.state.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
