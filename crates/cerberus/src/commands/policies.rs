//! `cerberusctl policies`

use cerberus_core::{AppPolicy, CoreError, DaemonClient, FullConfig, MasterConfig, Policy};
use tabled::Tabled;

use crate::cli::{GlobalOpts, OutputFormat, PoliciesArgs, PoliciesCommand, PolicyArg};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

impl From<PolicyArg> for Policy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Exempted => Policy::Exempted,
            PolicyArg::Important => Policy::Important,
            PolicyArg::Standard => Policy::Standard,
            PolicyArg::Strict => Policy::Strict,
        }
    }
}

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "User")]
    user: i32,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Playback exempt")]
    playback: &'static str,
    #[tabled(rename = "Network exempt")]
    network: &'static str,
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "-" }
}

fn row(policy: &AppPolicy, color: bool) -> PolicyRow {
    PolicyRow {
        package: policy.package_name.clone(),
        user: policy.user_id,
        policy: output::status(&policy.policy.to_string(), color),
        playback: yes_no(policy.force_playback_exempt),
        network: yes_no(policy.force_network_exempt),
    }
}

fn list(
    config: &FullConfig,
    filter: Option<Policy>,
    global: &GlobalOpts,
) -> Result<String, CliError> {
    let color = output::should_color(global.color);
    let mut policies: Vec<AppPolicy> = config
        .policies
        .iter()
        .filter(|p| filter.is_none_or(|f| p.policy == f))
        .cloned()
        .collect();
    policies.sort_by(|a, b| {
        b.policy
            .cmp(&a.policy)
            .then_with(|| a.package_name.cmp(&b.package_name))
    });

    // Unfiltered structured output keeps the safety net alongside the policies.
    let structured = matches!(
        global.output,
        OutputFormat::Json | OutputFormat::JsonCompact | OutputFormat::Yaml
    );
    if filter.is_none() && structured {
        return output::render_single(global.output, config, |_| String::new(), |_| String::new());
    }

    let table = output::render_list(
        global.output,
        &policies,
        |p| row(p, color),
        |p| format!("{}:{}", p.package_name, p.user_id),
    )?;
    if global.output != OutputFormat::Table || config.hard_safety_net.is_empty() {
        return Ok(table);
    }
    let net = format!("safety net: {}", config.hard_safety_net.join(", "));
    Ok(format!("{table}\n{}", output::dim(&net, color)))
}

pub async fn handle(
    client: &DaemonClient,
    args: PoliciesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        PoliciesCommand::List { policy } => {
            let config = client.all_policies().await?;
            let out = list(&config, policy.map(Policy::from), global)?;
            output::print_output(&out, global.quiet);
        }
        PoliciesCommand::Set {
            package,
            policy,
            user,
            playback_exempt,
            network_exempt,
        } => {
            let policy = AppPolicy::new(package, user, policy.into())
                .map_err(CoreError::from)?
                .playback_exempt(playback_exempt)
                .network_exempt(network_exempt);
            let summary = format!(
                "{}:{} set to {}",
                policy.package_name, policy.user_id, policy.policy
            );
            client.set_policy(policy)?;
            util::note(&summary, global);
        }
        PoliciesCommand::Master {
            standard_timeout,
            timed_unfreeze,
            unfreeze_interval,
        } => {
            if standard_timeout == 0 {
                return Err(CliError::Validation {
                    field: "standard-timeout".into(),
                    reason: "must be greater than zero".into(),
                });
            }
            client.set_master_config(MasterConfig {
                standard_timeout_sec: standard_timeout,
                is_timed_unfreeze_enabled: timed_unfreeze,
                timed_unfreeze_interval_sec: unfreeze_interval,
            })?;
            util::note("master config sent", global);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cli::ColorMode;

    fn global(output: OutputFormat) -> GlobalOpts {
        GlobalOpts {
            profile: None,
            endpoint: None,
            output,
            color: ColorMode::Never,
            verbose: 0,
            quiet: false,
            timeout: None,
        }
    }

    fn config() -> FullConfig {
        FullConfig {
            hard_safety_net: vec!["com.android.phone".into()],
            policies: vec![
                AppPolicy::new("com.b", 0, Policy::Standard).unwrap(),
                AppPolicy::new("com.a", 0, Policy::Strict).unwrap(),
                AppPolicy::new("com.c", 10, Policy::Strict).unwrap(),
            ],
        }
    }

    #[test]
    fn plain_lists_strictest_first() {
        let out = list(&config(), None, &global(OutputFormat::Plain)).unwrap();
        assert_eq!(out, "com.a:0\ncom.c:10\ncom.b:0");
    }

    #[test]
    fn filter_by_policy() {
        let out = list(&config(), Some(Policy::Standard), &global(OutputFormat::Plain)).unwrap();
        assert_eq!(out, "com.b:0");
    }

    #[test]
    fn table_mentions_safety_net() {
        let out = list(&config(), None, &global(OutputFormat::Table)).unwrap();
        assert!(out.contains("safety net: com.android.phone"));
        assert!(out.contains("strict"));
    }
}
