//! Shared helpers for command handlers.

use std::future::Future;
use std::io::IsTerminal;
use std::time::Duration;

use cerberus_core::{ClientConfig, DaemonClient};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Start a client and wait for its handshake, with a spinner on a TTY.
pub async fn connect(config: ClientConfig, global: &GlobalOpts) -> Result<DaemonClient, CliError> {
    let endpoint = config.endpoint.to_string();
    let wait = config.connect_timeout;
    let client = DaemonClient::new(config);

    let spinner = if global.quiet || !std::io::stderr().is_terminal() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    };
    spinner.set_message(format!("connecting to {endpoint}"));

    client.start().await;
    let connected = client.wait_connected(wait).await;
    spinner.finish_and_clear();

    if let Err(e) = connected {
        client.stop().await;
        return Err(e.into());
    }
    Ok(client)
}

/// First item of `stream` within `timeout`.
pub async fn first<T>(stream: impl Stream<Item = T>, timeout: Duration) -> Option<T> {
    let mut stream = std::pin::pin!(stream);
    tokio::time::timeout(timeout, stream.next()).await.ok().flatten()
}

/// Run `fut` until it finishes or Ctrl-C arrives.
pub async fn until_interrupted<F>(fut: F) -> Result<(), CliError>
where
    F: Future<Output = Result<(), CliError>>,
{
    tokio::select! {
        result = fut => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::debug!("interrupted");
            Ok(())
        }
    }
}

/// Status line on stderr, suppressed by --quiet.
pub fn note(message: &str, global: &GlobalOpts) {
    if !global.quiet {
        eprintln!("{message}");
    }
}

/// Unix milliseconds or RFC3339, as epoch milliseconds.
pub fn parse_time(value: &str, field: &str) -> Result<i64, CliError> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|_| CliError::Validation {
            field: field.into(),
            reason: format!("invalid timestamp '{value}' (use Unix milliseconds or RFC3339)"),
        })
}
