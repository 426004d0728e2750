use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MessageKind, PROTOCOL_VERSION};
use crate::error::Error;

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

// ── Envelope ─────────────────────────────────────────────────────────

/// One protocol message.
///
/// The payload stays an untyped [`Value`] until a consumer that knows the
/// message type asks for it with [`decode_payload`](Self::decode_payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version. Missing on the wire means [`PROTOCOL_VERSION`].
    #[serde(rename = "v", default = "default_version")]
    pub version: u32,

    /// Dot-namespaced message type, e.g. `"resp.all_policies"`.
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Correlation id. Present on correlated queries and their replies.
    #[serde(rename = "req_id", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Message body. `Null` is omitted on the wire.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Envelope with no payload and the default protocol version.
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: msg_type.into(),
            request_id: None,
            payload: Value::Null,
        }
    }

    /// Envelope carrying a serialized payload.
    pub fn with_payload<T: Serialize + ?Sized>(
        msg_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, Error> {
        let payload = serde_json::to_value(payload).map_err(Error::Encode)?;
        Ok(Self {
            payload,
            ..Self::new(msg_type)
        })
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::of(&self.msg_type)
    }

    /// Resolve the payload into the fixed-field type for this message.
    ///
    /// A missing payload is treated as an empty object so that payload types
    /// whose fields all have defaults still decode.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let value = match &self.payload {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| Error::Decode {
            message: format!("{} payload: {e}", self.msg_type),
            line: self.payload.to_string(),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Content {
        #[serde(default)]
        content: String,
    }

    #[test]
    fn builder_sets_fields() {
        let env = Envelope::new("query.get_all_policies")
            .request_id("abc")
            .version(2);
        assert_eq!(env.version, 2);
        assert_eq!(env.request_id.as_deref(), Some("abc"));
        assert_eq!(env.kind(), MessageKind::Query);
        assert!(env.payload.is_null());
    }

    #[test]
    fn decode_typed_payload() {
        let env = Envelope {
            payload: json!({"content": "rules"}),
            ..Envelope::new("resp.adj_rules_content")
        };
        let content: Content = env.decode_payload().unwrap();
        assert_eq!(content.content, "rules");
    }

    #[test]
    fn missing_payload_decodes_as_empty_object() {
        let env = Envelope::new("resp.adj_rules_content");
        let content: Content = env.decode_payload().unwrap();
        assert_eq!(content, Content { content: String::new() });
    }

    #[test]
    fn payload_type_mismatch_is_decode_error() {
        let env = Envelope {
            payload: json!({"content": 42}),
            ..Envelope::new("resp.adj_rules_content")
        };
        let err = env.decode_payload::<Content>().unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
