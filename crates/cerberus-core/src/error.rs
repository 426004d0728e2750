// ── Core error types ──
//
// Request-level errors from cerberus-core. Consumers never see socket or
// framing failures directly: the `From<cerberus_api::Error>` impl folds
// them into the outcomes a caller can act on.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Request outcomes ─────────────────────────────────────────────
    #[error("No reply to '{msg_type}' within {timeout_ms}ms")]
    Timeout { msg_type: String, timeout_ms: u64 },

    #[error("Connection to daemon lost")]
    ConnectionLost,

    #[error("Daemon rejected '{msg_type}': {message}")]
    Daemon {
        msg_type: String,
        message: String,
        /// Error type sent by the daemon, e.g. `"error.invalid_payload"`.
        code: Option<String>,
    },

    #[error("Unexpected reply to '{request}': expected {expected}, got {actual}")]
    UnexpectedResponse {
        request: String,
        expected: String,
        actual: String,
    },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Cannot decode {msg_type} payload: {message}")]
    Decode { msg_type: String, message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Client is not running")]
    NotRunning,

    #[error("Cannot connect to daemon at {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` if resending the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ConnectionLost | Self::ConnectionFailed { .. }
        )
    }
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<cerberus_api::Error> for CoreError {
    fn from(err: cerberus_api::Error) -> Self {
        use cerberus_api::Error as Api;

        match err {
            Api::NotConnected | Api::Closed => CoreError::ConnectionLost,
            Api::Stopped => CoreError::NotRunning,
            Api::Connect { endpoint, source } => CoreError::ConnectionFailed {
                endpoint,
                reason: source.to_string(),
            },
            Api::ConnectTimeout {
                endpoint,
                timeout_ms,
            } => CoreError::ConnectionFailed {
                endpoint,
                reason: format!("timed out after {timeout_ms}ms"),
            },
            Api::Io(e) => CoreError::ConnectionFailed {
                endpoint: String::new(),
                reason: e.to_string(),
            },
            Api::InvalidEndpoint { input, reason } => CoreError::Config {
                message: format!("invalid endpoint '{input}': {reason}"),
            },
            Api::Unsupported(what) => CoreError::Config {
                message: what.to_owned(),
            },
            Api::InvalidPayload { field, reason } => CoreError::Validation {
                message: format!("{field}: {reason}"),
            },
            Api::InvalidFrame(message) => CoreError::Internal(format!("invalid frame: {message}")),
            Api::Encode(e) => CoreError::Internal(format!("encoding failed: {e}")),
            Api::Decode { message, line: _ } => CoreError::Decode {
                msg_type: String::new(),
                message,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn queue_failures_map_to_connection_lost() {
        assert!(matches!(
            CoreError::from(cerberus_api::Error::NotConnected),
            CoreError::ConnectionLost
        ));
        assert!(matches!(
            CoreError::from(cerberus_api::Error::Stopped),
            CoreError::NotRunning
        ));
    }

    #[test]
    fn payload_validation_maps_to_validation() {
        let err = CoreError::from(cerberus_api::Error::InvalidPayload {
            field: "package_name",
            reason: "must not be empty".into(),
        });
        assert_eq!(err.to_string(), "Validation failed: package_name: must not be empty");
        assert!(!err.is_retryable());
    }
}
