//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use cerberus_config::ConfigError;
use cerberus_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to cerberusd at {endpoint}")]
    #[diagnostic(
        code(cerberus::connection_failed),
        help(
            "Check that the daemon is running and listening on that socket.\n\
             Override the endpoint with --endpoint, e.g. --endpoint tcp://127.0.0.1:28900"
        )
    )]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Connection to cerberusd was lost")]
    #[diagnostic(
        code(cerberus::connection_lost),
        help("The daemon closed the socket or went silent. Retry the command.")
    )]
    ConnectionLost,

    // ── Daemon replies ───────────────────────────────────────────────
    #[error("No reply to '{msg_type}' within {timeout_ms}ms")]
    #[diagnostic(
        code(cerberus::timeout),
        help("Increase the timeout with --timeout or check daemon responsiveness.")
    )]
    Timeout { msg_type: String, timeout_ms: u64 },

    #[error("cerberusd rejected '{msg_type}': {message}")]
    #[diagnostic(code(cerberus::rejected))]
    Rejected { msg_type: String, message: String },

    #[error("Unexpected reply from cerberusd: {detail}")]
    #[diagnostic(
        code(cerberus::protocol),
        help("The daemon may be running a different protocol version.")
    )]
    Protocol { detail: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(cerberus::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(cerberus::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: cerberusctl config init --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Profile '{name}' already exists")]
    #[diagnostic(
        code(cerberus::profile_exists),
        help("Pass --force to overwrite it.")
    )]
    ProfileExists { name: String },

    #[error(transparent)]
    #[diagnostic(code(cerberus::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render output: {0}")]
    #[diagnostic(code(cerberus::render))]
    Render(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(cerberus::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ProfileExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { endpoint, reason } => {
                CliError::ConnectionFailed { endpoint, reason }
            }
            CoreError::ConnectionLost | CoreError::NotRunning => CliError::ConnectionLost,
            CoreError::Timeout {
                msg_type,
                timeout_ms,
            } => CliError::Timeout {
                msg_type,
                timeout_ms,
            },
            CoreError::Daemon {
                msg_type, message, ..
            } => CliError::Rejected { msg_type, message },
            CoreError::UnexpectedResponse {
                request,
                expected,
                actual,
            } => CliError::Protocol {
                detail: format!("'{request}' answered with {actual}, expected {expected}"),
            },
            CoreError::Decode { msg_type, message } => CliError::Protocol {
                detail: format!("{msg_type}: {message}"),
            },
            CoreError::Validation { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile { name, known } => CliError::ProfileNotFound {
                name,
                available: known,
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}
