//! Clap derive structures for the `cerberusctl` CLI.
//!
//! Depends on clap alone so `build.rs` can include it for man pages.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// cerberusctl -- talk to the cerberusd freezer daemon
#[derive(Debug, Parser)]
#[command(
    name = "cerberusctl",
    version,
    about = "Inspect and steer the cerberusd daemon from the command line",
    long_about = "Connects to cerberusd over its JSON-lines socket.\n\n\
        Reads the live dashboard, logs and metrics, edits per-app policies,\n\
        and can stand in for an in-process probe when testing the daemon.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Daemon profile to use
    #[arg(long, short = 'p', env = "CERBERUS_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Daemon endpoint: tcp://host:port, unix:/path or @abstract (overrides profile)
    #[arg(long, short = 'e', env = "CERBERUS_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CERBERUS_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, short = 't', env = "CERBERUS_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check the connection and print a one-line system summary
    Status,

    /// Show per-app runtime state from the live dashboard
    #[command(alias = "dash")]
    Dashboard(DashboardArgs),

    /// List and change per-app freeze policies
    #[command(alias = "pol")]
    Policies(PoliciesArgs),

    /// Browse and follow daemon logs
    Logs(LogsArgs),

    /// Show recent device metrics
    Stats(StatsArgs),

    /// Print every message of one stream or event type as it arrives
    Watch(WatchArgs),

    /// Ask the daemon to push a fresh dashboard
    Refresh,

    /// Inspect or reload the OOM-adjustment rules
    Rules(RulesArgs),

    /// List packages that have a data directory
    Packages,

    /// Connect as an in-process probe and print config pushes
    Probe(ProbeArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Dashboard ────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DashboardArgs {
    /// Keep printing updates until interrupted
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Only show apps in the foreground or with activity
    #[arg(long)]
    pub active: bool,
}

// ── Policies ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PoliciesArgs {
    #[command(subcommand)]
    pub command: PoliciesCommand,
}

#[derive(Debug, Subcommand)]
pub enum PoliciesCommand {
    /// List every configured policy and the safety net
    #[command(alias = "ls")]
    List {
        /// Only show apps with this policy
        #[arg(long)]
        policy: Option<PolicyArg>,
    },

    /// Set the policy of one app
    Set {
        /// Package name, e.g. com.example.app
        package: String,

        /// Policy tier
        policy: PolicyArg,

        /// Android user id
        #[arg(long, short = 'u', default_value = "0")]
        user: i32,

        /// Keep the app awake while it plays audio
        #[arg(long)]
        playback_exempt: bool,

        /// Keep the app awake while it has network activity
        #[arg(long)]
        network_exempt: bool,
    },

    /// Replace the global freezer settings
    Master {
        /// Seconds in the background before a standard app is frozen
        #[arg(long)]
        standard_timeout: u32,

        /// Periodically thaw frozen apps
        #[arg(long)]
        timed_unfreeze: bool,

        /// Seconds between timed thaws
        #[arg(long, default_value = "1800")]
        unfreeze_interval: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Exempted,
    Important,
    Standard,
    Strict,
}

// ── Logs ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LogsArgs {
    #[command(subcommand)]
    pub command: LogsCommand,
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// List log files the daemon keeps
    Files,

    /// Print entries from one log file
    Show {
        /// Log file name (see `logs files`)
        file: String,

        /// Maximum entries to return
        #[arg(long, short = 'l')]
        limit: Option<u32>,

        /// Only entries at or after this time (Unix ms or RFC3339)
        #[arg(long)]
        since: Option<String>,

        /// Only entries before this time (Unix ms or RFC3339)
        #[arg(long)]
        before: Option<String>,
    },

    /// Stream new log entries as they are written
    Follow {
        /// Only entries of this category
        #[arg(long, short = 'c')]
        category: Option<String>,

        /// Only entries about this package
        #[arg(long)]
        package: Option<String>,
    },
}

// ── Stats ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Keep printing new samples until interrupted
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Seconds of history to keep and summarize
    #[arg(long, short = 'w', default_value = "600")]
    pub window: u64,

    /// Rows to print from the end of the window
    #[arg(long, short = 'n', default_value = "20")]
    pub tail: usize,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Message type, e.g. stream.dashboard_update or event.app_start
    pub msg_type: String,

    /// Stop after this many messages
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Rules ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// Print the rules file as the daemon sees it
    Show,
    /// Make the daemon re-read the rules file
    Reload,
}

// ── Probe ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Process id to report in the probe hello (defaults to this process)
    #[arg(long)]
    pub pid: Option<u32>,

    /// Probe build tag to report
    #[arg(long, default_value = env!("CARGO_PKG_VERSION"))]
    pub probe_version: String,

    /// Lifecycle event to send after connecting, as KIND:PACKAGE[:USER]
    /// where KIND is start, killed, foreground or background (repeatable)
    #[arg(long = "send", short = 's', value_name = "EVENT")]
    pub events: Vec<String>,

    /// Exit after this many seconds instead of waiting for Ctrl-C
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current resolved configuration
    Show,

    /// Write a config file with one profile
    Init {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Overwrite an existing profile of the same name
        #[arg(long)]
        force: bool,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
