//! Error types for envelope decoding.

use thiserror::Error;

/// Why an inbound message could not be turned into a routable notification.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Neither supported serialization accepted the bytes.
    #[error("message is neither valid JSON ({json}) nor valid BSON ({bson})")]
    Unrecognized {
        /// JSON decoder error.
        json: String,
        /// BSON decoder error.
        bson: String,
    },
    /// The envelope decoded but addresses nobody.
    #[error("notification target is empty")]
    EmptyTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_display_names_both_formats() {
        let err = DecodeError::Unrecognized {
            json: "expected value".into(),
            bson: "end of stream".into(),
        };
        let text = err.to_string();
        assert!(text.contains("JSON (expected value)"));
        assert!(text.contains("BSON (end of stream)"));
    }

    #[test]
    fn empty_target_display() {
        assert_eq!(
            DecodeError::EmptyTarget.to_string(),
            "notification target is empty"
        );
    }
}
