//! `cerberusctl rules` and `cerberusctl packages`

use cerberus_core::DaemonClient;
use tabled::Tabled;

use crate::cli::{GlobalOpts, RulesArgs, RulesCommand};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct PackageRow {
    #[tabled(rename = "Package")]
    name: String,
}

pub async fn handle(
    client: &DaemonClient,
    args: RulesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        RulesCommand::Show => {
            let content = client.adj_rules_content().await?;
            let out = output::render_single(
                global.output,
                &serde_json::json!({ "content": content }),
                |_| content.trim_end().to_owned(),
                |_| content.trim_end().to_owned(),
            )?;
            output::print_output(&out, global.quiet);
        }
        RulesCommand::Reload => {
            client.reload_adj_rules()?;
            util::note("rules reload requested", global);
        }
    }
    Ok(())
}

pub async fn packages(client: &DaemonClient, global: &GlobalOpts) -> Result<(), CliError> {
    let mut packages = client.data_app_packages().await?;
    packages.sort();
    let out = output::render_list(
        global.output,
        &packages,
        |p| PackageRow { name: p.clone() },
        Clone::clone,
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
