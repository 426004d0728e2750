//! Command dispatch: bridges CLI args -> daemon client calls -> output formatting.

pub mod config_cmd;
pub mod dashboard;
pub mod logs;
pub mod policies;
pub mod probe;
pub mod rules;
pub mod stats;
pub mod status;
pub mod util;
pub mod watch;

use cerberus_core::ClientConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Connect, run one daemon-bound command, disconnect.
pub async fn dispatch(
    cmd: Command,
    config: ClientConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = util::connect(config, global).await?;

    let result = match cmd {
        Command::Status => status::handle(&client, global).await,
        Command::Dashboard(args) => dashboard::handle(&client, args, global).await,
        Command::Policies(args) => policies::handle(&client, args, global).await,
        Command::Logs(args) => logs::handle(&client, args, global).await,
        Command::Stats(args) => stats::handle(&client, args, global).await,
        Command::Watch(args) => watch::handle(&client, args, global).await,
        Command::Rules(args) => rules::handle(&client, args, global).await,
        Command::Packages => rules::packages(&client, global).await,
        Command::Refresh => {
            client.refresh_dashboard()?;
            util::note("dashboard refresh requested", global);
            Ok(())
        }
        // Handled before a client exists
        Command::Config(_) | Command::Completions(_) | Command::Probe(_) => {
            Err(CliError::Internal("command needs no daemon connection".into()))
        }
    };

    client.stop().await;
    result
}
