//! Line codec: one envelope per line, UTF-8, terminated by a single `\n`.
//!
//! [`encode`] produces the line *without* its terminator; the transport adds
//! it. `serde_json` escapes control characters inside strings, so an encoded
//! envelope never contains a raw newline.

use super::envelope::Envelope;
use crate::error::Error;

/// Serialize an envelope to a single line.
pub fn encode(envelope: &Envelope) -> Result<String, Error> {
    serde_json::to_string(envelope).map_err(Error::Encode)
}

/// Parse one line into an envelope.
///
/// Trailing `\r` / whitespace is ignored. Errors are discardable: callers log
/// them and keep the connection.
pub fn decode(line: &str) -> Result<Envelope, Error> {
    serde_json::from_str(line.trim_end()).map_err(|e| Error::Decode {
        message: e.to_string(),
        line: line.to_owned(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────
