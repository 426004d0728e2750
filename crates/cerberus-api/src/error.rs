use thiserror::Error;

/// Top-level error type for the `cerberus-api` crate.
///
/// Covers every failure mode of the wire layer: establishing a socket,
/// framing, envelope (de)serialization and the outbound queue.
/// `cerberus-core` maps these into request-level outcomes.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The socket could not be opened (daemon not running, refused, etc.)
    #[error("Cannot connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Connecting took longer than the configured connect timeout.
    #[error("Connecting to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    /// Mid-session I/O failure (reset, broken pipe, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Endpoint string could not be parsed.
    #[error("Invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },

    /// Endpoint kind not available on this platform.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    // ── Framing ─────────────────────────────────────────────────────
    /// A frame handed to the writer contained a raw newline.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// An inbound line is not a valid envelope. The line is kept for debugging.
    #[error("Malformed frame: {message}")]
    Decode { message: String, line: String },

    /// Envelope or payload could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// A payload does not satisfy the field constraints of its message type.
    #[error("Invalid {field}: {reason}")]
    InvalidPayload { field: &'static str, reason: String },

    // ── Outbound queue ──────────────────────────────────────────────
    /// Send attempted while disconnected under the `Drop` offline policy.
    #[error("Not connected to daemon")]
    NotConnected,

    /// Send attempted while the connection manager is stopped.
    #[error("Connection manager is not running")]
    Stopped,

    /// The outbound queue was torn down.
    #[error("Connection closed")]
    Closed,
}

impl Error {
    /// Returns `true` if a later attempt may succeed without any change
    /// on the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ConnectTimeout { .. } | Self::Io(_) | Self::NotConnected
        )
    }

    /// Returns `true` if this error means the frame never reached a live socket.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotConnected | Self::Stopped | Self::Closed)
    }
}
