//! Decoding of incoming photo messages
//!
//! Payloads are UTF-8 JSON objects. Only the `photo` key is interpreted; it
//! carries the base64 encoded image. Every other key is ignored.
//!
//! ```json
//! { "photo": "/9j/4AAQSkZJRgABAQ..." }
//! ```

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// JSON key holding the base64 encoded image
pub const PHOTO_KEY: &str = "photo";

/// Failures while turning a payload into a photo field
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("\"photo\" is not a string")]
    PhotoNotAString,
}

/// Extracts the `photo` field from a raw payload
///
/// Returns `Ok(None)` for a well formed object without a photo. That is a
/// valid "nothing to show" message, not an error.
pub fn decode_photo_field(payload: &[u8]) -> Result<Option<String>, DecodeError> {
    let text = std::str::from_utf8(payload)?;
    let value: Value = serde_json::from_str(text)?;

    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    match object.get(PHOTO_KEY) {
        None => {
            debug!("Message without photo field ({} keys)", object.len());
            Ok(None)
        }
        Some(Value::String(photo)) => Ok(Some(photo.clone())),
        Some(_) => Err(DecodeError::PhotoNotAString),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_photo_string() {
        let photo = decode_photo_field(br#"{"photo":"aGVsbG8=","caption":"x"}"#).unwrap();
        assert_eq!(photo.as_deref(), Some("aGVsbG8="));
    }

    #[test]
    fn missing_photo_is_not_an_error() {
        assert!(decode_photo_field(b"{}").unwrap().is_none());
        assert!(decode_photo_field(br#"{"picture":"aGVsbG8="}"#).unwrap().is_none());
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let err = decode_photo_field(&[0xff, 0xfe, 0x7b]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidUtf8(_)));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            decode_photo_field(br#"{"photo": "#).unwrap_err(),
            DecodeError::InvalidJson(_)
        ));
        assert!(matches!(
            decode_photo_field(b"").unwrap_err(),
            DecodeError::InvalidJson(_)
        ));
    }

    #[test]
    fn non_object_json_is_reported() {
        assert!(matches!(
            decode_photo_field(br#"["photo"]"#).unwrap_err(),
            DecodeError::NotAnObject
        ));
        assert!(matches!(
            decode_photo_field(b"\"photo\"").unwrap_err(),
            DecodeError::NotAnObject
        ));
    }

    #[test]
    fn non_string_photo_is_reported() {
        for payload in [
            &br#"{"photo":null}"#[..],
            br#"{"photo":42}"#,
            br#"{"photo":{"data":"aGVsbG8="}}"#,
        ] {
            assert!(matches!(
                decode_photo_field(payload).unwrap_err(),
                DecodeError::PhotoNotAString
            ));
        }
    }
}
