//! `cerberusctl logs`

use cerberus_core::{DaemonClient, LogEntry, LogQuery};
use futures_util::StreamExt;
use tabled::Tabled;

use crate::cli::{GlobalOpts, LogsArgs, LogsCommand};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct LogRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "File")]
    name: String,
}

fn row(entry: &LogEntry) -> LogRow {
    LogRow {
        time: output::clock(entry.timestamp),
        level: entry.level.to_string(),
        category: entry.category.clone(),
        package: entry.package_name.clone().unwrap_or_else(|| "-".into()),
        message: entry.message.clone(),
    }
}

fn line(entry: &LogEntry) -> String {
    let package = entry
        .package_name
        .as_deref()
        .map(|p| format!(" [{p}]"))
        .unwrap_or_default();
    format!(
        "{} {:<15} {}{package} {}",
        output::clock(entry.timestamp),
        entry.level,
        entry.category,
        entry.message
    )
}

fn matches(entry: &LogEntry, category: Option<&str>, package: Option<&str>) -> bool {
    category.is_none_or(|c| entry.category.eq_ignore_ascii_case(c))
        && package.is_none_or(|p| entry.package_name.as_deref() == Some(p))
}

pub async fn handle(
    client: &DaemonClient,
    args: LogsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        LogsCommand::Files => {
            let files = client.log_files().await?;
            let out = output::render_list(
                global.output,
                &files,
                |f| FileRow { name: f.clone() },
                Clone::clone,
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
        LogsCommand::Show {
            file,
            limit,
            since,
            before,
        } => {
            let query = LogQuery {
                since: since.as_deref().map(|s| util::parse_time(s, "since")).transpose()?,
                before: before
                    .as_deref()
                    .map(|s| util::parse_time(s, "before"))
                    .transpose()?,
                limit,
                ..LogQuery::file(file)
            };
            if let (Some(s), Some(b)) = (query.since, query.before) {
                if s >= b {
                    return Err(CliError::Validation {
                        field: "since".into(),
                        reason: "since must be earlier than before".into(),
                    });
                }
            }
            let entries = client.logs(query).await?;
            let out = output::render_list(global.output, &entries, row, line)?;
            output::print_output(&out, global.quiet);
            Ok(())
        }
        LogsCommand::Follow { category, package } => {
            let entries = client.log_entries();
            util::until_interrupted(async {
                let mut entries = std::pin::pin!(entries);
                while let Some(entry) = entries.next().await {
                    if !matches(&entry, category.as_deref(), package.as_deref()) {
                        continue;
                    }
                    let out = output::render_record(global.output, &entry, line)?;
                    output::print_output(&out, global.quiet);
                }
                Ok(())
            })
            .await
        }
    }
}
