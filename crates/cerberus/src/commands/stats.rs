//! `cerberusctl stats`

use std::time::Duration;

use cerberus_core::{DaemonClient, MetricsHistory, MetricsRecord};
use futures_util::StreamExt;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{GlobalOpts, OutputFormat, StatsArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "CPU %")]
    cpu: String,
    #[tabled(rename = "Mem used")]
    mem: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Screen")]
    screen: &'static str,
}

fn row(r: &MetricsRecord) -> SampleRow {
    SampleRow {
        time: output::clock(r.timestamp),
        cpu: format!("{:.1}", r.cpu_usage_percent),
        mem: output::kib(r.mem_used_kb),
        battery: format!(
            "{}%{} {:.1}°C",
            r.battery_level,
            if r.is_charging { "+" } else { "" },
            r.battery_temp_celsius
        ),
        power: format!("{:.2} W", r.battery_power_watt),
        screen: if r.is_screen_on { "on" } else { "off" },
    }
}

fn line(r: &MetricsRecord) -> String {
    let row = row(r);
    format!(
        "{}  cpu {:>5}%  mem {:>9}  bat {}  {}  screen {}",
        row.time, row.cpu, row.mem, row.battery, row.power, row.screen
    )
}

/// Aggregates over the retained window.
#[derive(Debug, Serialize, PartialEq)]
struct Summary {
    samples: usize,
    span_secs: u64,
    avg_cpu_percent: f32,
    peak_mem_used_kb: i64,
    battery_drop: i32,
}

fn summarize(history: &MetricsHistory) -> Option<Summary> {
    let first = history.iter().next()?;
    let last = history.latest()?;
    let count = history.len();
    let cpu_total: f32 = history.iter().map(|r| r.cpu_usage_percent).sum();
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    let avg_cpu_percent = cpu_total / count as f32;
    Some(Summary {
        samples: count,
        span_secs: history.span().as_secs(),
        avg_cpu_percent,
        peak_mem_used_kb: history.iter().map(|r| r.mem_used_kb).max().unwrap_or(0),
        battery_drop: first.battery_level - last.battery_level,
    })
}

fn summary_line(s: &Summary) -> String {
    format!(
        "{} samples over {}s  avg cpu {:.1}%  peak mem {}  battery -{}%",
        s.samples,
        s.span_secs,
        s.avg_cpu_percent,
        output::kib(s.peak_mem_used_kb),
        s.battery_drop
    )
}

pub async fn handle(
    client: &DaemonClient,
    args: StatsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // Subscribe first so nothing between the history reply and the stream is lost.
    let live = client.stats_records();

    let mut history = MetricsHistory::new(Duration::from_secs(args.window));
    history.extend(client.history_stats().await?);

    let tail: Vec<MetricsRecord> = history
        .iter()
        .skip(history.len().saturating_sub(args.tail))
        .cloned()
        .collect();
    let out = output::render_list(global.output, &tail, row, line)?;
    output::print_output(&out, global.quiet);

    if global.output == OutputFormat::Table {
        if let Some(summary) = summarize(&history) {
            let color = output::should_color(global.color);
            output::print_output(&output::dim(&summary_line(&summary), color), global.quiet);
        }
    }

    if !args.follow {
        return Ok(());
    }

    let newest = history.latest().map_or(i64::MIN, |r| r.timestamp);
    util::until_interrupted(async {
        let mut live = std::pin::pin!(live);
        while let Some(record) = live.next().await {
            // The replayed sample may already be in the history reply.
            if record.timestamp <= newest {
                continue;
            }
            history.insert(record.clone());
            let out = output::render_record(global.output, &record, line)?;
            output::print_output(&out, global.quiet);
        }
        Ok(())
    })
    .await
}
