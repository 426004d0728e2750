//! `cerberusctl dashboard`

use cerberus_core::{AppRuntimeState, DaemonClient, DashboardUpdate, DisplayStatus};
use futures_util::StreamExt;
use tabled::Tabled;

use crate::cli::{DashboardArgs, GlobalOpts, OutputFormat};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "User")]
    user: i32,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Mem")]
    mem: String,
    #[tabled(rename = "Swap")]
    swap: String,
    #[tabled(rename = "CPU %")]
    cpu: String,
    #[tabled(rename = "Activity")]
    activity: String,
    #[tabled(rename = "Freeze in")]
    pending: String,
}

fn activity(app: &AppRuntimeState) -> String {
    let flags = [
        (app.is_foreground, 'F'),
        (app.has_playback, 'P'),
        (app.has_notification, 'N'),
        (app.has_network_activity, 'W'),
        (app.is_whitelisted, 'X'),
    ];
    let s: String = flags.iter().filter(|(on, _)| *on).map(|(_, c)| *c).collect();
    if s.is_empty() { "-".into() } else { s }
}

fn row(app: &AppRuntimeState, color: bool) -> AppRow {
    let status = match app.active_freeze_mode {
        Some(mode) if app.display_status == DisplayStatus::Frozen => {
            format!("{} ({mode})", output::status("frozen", color))
        }
        _ => output::status(&app.display_status.to_string(), color),
    };
    AppRow {
        package: app.package_name.clone(),
        user: app.user_id,
        status,
        mem: output::kib(app.mem_usage_kb),
        swap: output::kib(app.swap_usage_kb),
        cpu: format!("{:.1}", app.cpu_usage_percent),
        activity: activity(app),
        pending: if app.pending_freeze_sec > 0 {
            format!("{}s", app.pending_freeze_sec)
        } else {
            "-".into()
        },
    }
}

fn is_active(app: &AppRuntimeState) -> bool {
    app.is_foreground
        || app.has_playback
        || app.has_network_activity
        || app.cpu_usage_percent > 0.0
}

fn render(
    update: &DashboardUpdate,
    args: &DashboardArgs,
    global: &GlobalOpts,
) -> Result<String, CliError> {
    let color = output::should_color(global.color);
    let mut apps: Vec<&AppRuntimeState> = update
        .apps_runtime_state
        .iter()
        .filter(|a| !args.active || is_active(a))
        .collect();
    apps.sort_by(|a, b| b.mem_usage_kb.cmp(&a.mem_usage_kb));

    // Followed updates stay one record per line outside table mode.
    if args.follow && global.output != OutputFormat::Table {
        return output::render_record(global.output, &apps, |apps| {
            apps.iter()
                .map(|a| a.package_name.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        });
    }

    let table = output::render_list(
        global.output,
        &apps,
        |a| row(a, color),
        |a| a.package_name.clone(),
    )?;
    if global.output != OutputFormat::Table {
        return Ok(table);
    }
    let stats = &update.global_stats;
    let header = format!(
        "cpu {:.1}%  mem {} / {}  profile {}",
        stats.total_cpu_usage_percent,
        output::kib(stats.used_mem_kb()),
        output::kib(stats.total_mem_kb),
        stats.active_profile_name,
    );
    Ok(format!("{}\n{table}", output::dim(&header, color)))
}

pub async fn handle(
    client: &DaemonClient,
    args: DashboardArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut updates = Box::pin(client.dashboard());
    client.refresh_dashboard()?;

    if !args.follow {
        let update = util::first(&mut updates, client.config().request_timeout)
            .await
            .ok_or_else(|| CliError::Timeout {
                msg_type: cerberus_core::types::DASHBOARD_UPDATE.into(),
                timeout_ms: u64::try_from(client.config().request_timeout.as_millis())
                    .unwrap_or(u64::MAX),
            })?;
        output::print_output(&render(&update, &args, global)?, global.quiet);
        return Ok(());
    }

    util::until_interrupted(async {
        while let Some(update) = updates.next().await {
            output::print_output(&render(&update, &args, global)?, global.quiet);
        }
        Ok(())
    })
    .await
}
