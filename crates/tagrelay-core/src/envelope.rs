//! Wire envelope and decoding.
//!
//! Every message posted to the relay, or received on a streaming
//! connection, is an envelope:
//!
//! ```json
//! { "target": {"customer": "acme"}, "notification": <any>, "sendSynchronicity": false }
//! ```
//!
//! The envelope arrives either as JSON or as BSON. Routing only needs
//! `target` and `sendSynchronicity`; the whole original message is what gets
//! delivered to recipients, so `notification` is never inspected.

use bytes::Bytes;
use serde::Deserialize;

use crate::attributes::Attributes;
use crate::errors::DecodeError;

/// Supported envelope serializations. JSON is tried first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeFormat {
    /// `serde_json`.
    Json,
    /// `bson`.
    Bson,
}

impl EnvelopeFormat {
    /// Decode the routing header of an envelope in this format.
    pub fn decode(self, message: &[u8]) -> Result<Envelope, String> {
        match self {
            Self::Json => serde_json::from_slice(message).map_err(|e| e.to_string()),
            Self::Bson => bson::from_slice(message).map_err(|e| e.to_string()),
        }
    }
}

/// Routing header of a wire envelope.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Destination query. `null` and absent are both treated as empty.
    #[serde(default)]
    pub target: Option<Attributes>,
    /// Deliver to each recipient before returning.
    #[serde(default)]
    pub send_synchronicity: bool,
}

/// A decoded, routable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Destination query.
    pub target: Attributes,
    /// The original message bytes, forwarded verbatim.
    pub payload: Bytes,
    /// Whether fan-out should complete before the caller continues.
    pub synchronous: bool,
}

/// Decode a message into a [`Notification`], trying JSON then BSON.
///
/// Fails when neither format accepts the bytes or when the target is empty.
pub fn decode_notification(message: Bytes) -> Result<Notification, DecodeError> {
    let envelope = match EnvelopeFormat::Json.decode(&message) {
        Ok(envelope) => envelope,
        Err(json) => EnvelopeFormat::Bson
            .decode(&message)
            .map_err(|bson| DecodeError::Unrecognized { json, bson })?,
    };

    let target = envelope.target.unwrap_or_default();
    if target.is_empty() {
        return Err(DecodeError::EmptyTarget);
    }

    Ok(Notification {
        target,
        payload: message,
        synchronous: envelope.send_synchronicity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn json_bytes(value: &serde_json::Value) -> Bytes {
        Bytes::from(serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn decodes_json_envelope() {
        let message = json_bytes(&json!({
            "target": {"customer": "acme", "cluster": "c1"},
            "notification": {"kind": "scan"},
            "sendSynchronicity": true,
        }));
        let n = decode_notification(message.clone()).unwrap();
        assert_eq!(n.target.get("customer"), Some("acme"));
        assert_eq!(n.target.get("cluster"), Some("c1"));
        assert!(n.synchronous);
        assert_eq!(n.payload, message);
    }

    #[test]
    fn synchronicity_defaults_to_false() {
        let message = json_bytes(&json!({"target": {"customer": "acme"}}));
        let n = decode_notification(message).unwrap();
        assert!(!n.synchronous);
    }

    #[test]
    fn falls_back_to_bson() {
        let doc = bson::doc! {
            "target": {"customer": "acme"},
            "notification": "ComponentTest special message",
            "sendSynchronicity": true,
        };
        let message = Bytes::from(bson::to_vec(&doc).unwrap());
        let n = decode_notification(message).unwrap();
        assert_eq!(n.target.get("customer"), Some("acme"));
        assert!(n.synchronous);
    }

    #[test]
    fn garbage_is_unrecognized() {
        let err = decode_notification(Bytes::from_static(b"not an envelope")).unwrap_err();
        assert!(matches!(err, DecodeError::Unrecognized { .. }));
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = decode_notification(json_bytes(&json!({"notification": 1}))).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyTarget));
    }

    #[test]
    fn null_target_is_rejected() {
        let err = decode_notification(json_bytes(&json!({"target": null}))).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyTarget));
    }

    #[test]
    fn empty_target_is_rejected() {
        let err = decode_notification(json_bytes(&json!({"target": {}}))).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyTarget));
    }

    #[test]
    fn non_string_target_values_fail_both_formats() {
        let err =
            decode_notification(json_bytes(&json!({"target": {"customer": 7}}))).unwrap_err();
        assert!(matches!(err, DecodeError::Unrecognized { .. }));
    }

    #[test]
    fn format_decode_reports_errors_as_text() {
        assert!(EnvelopeFormat::Json.decode(b"{").is_err());
        assert!(EnvelopeFormat::Bson.decode(b"{").is_err());
    }
}
