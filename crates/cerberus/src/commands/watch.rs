//! `cerberusctl watch`

use cerberus_core::{DaemonClient, Envelope, MessageKind};
use futures_util::StreamExt;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

/// Only pushes can be watched; replies belong to the request that asked.
fn check_watchable(msg_type: &str) -> Result<(), CliError> {
    if MessageKind::of(msg_type).is_push() {
        Ok(())
    } else {
        Err(CliError::Validation {
            field: "msg_type".into(),
            reason: format!("'{msg_type}' is not a stream.* or event.* message type"),
        })
    }
}

fn line(envelope: &Envelope) -> String {
    if envelope.payload.is_null() {
        envelope.msg_type.clone()
    } else {
        format!("{} {}", envelope.msg_type, envelope.payload)
    }
}

pub async fn handle(
    client: &DaemonClient,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    check_watchable(&args.msg_type)?;

    let frames = client.stream_of(&args.msg_type).into_stream();
    let limit = args.count.unwrap_or(usize::MAX);
    util::until_interrupted(async {
        let frames = frames.take(limit);
        let mut frames = std::pin::pin!(frames);
        while let Some(envelope) = frames.next().await {
            let out = output::render_record(global.output, envelope.as_ref(), line)?;
            output::print_output(&out, global.quiet);
        }
        Ok(())
    })
    .await
}
