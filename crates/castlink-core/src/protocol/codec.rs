//! JSON codec for encoding and decoding CastLink wire frames.
//!
//! Wire format: one JSON object per WebSocket text frame (see
//! [`crate::protocol::frames`]). There is no length prefix — WebSocket
//! framing already delimits messages — so the codec is a thin, validated
//! layer over `serde_json` with a hard size limit.

use thiserror::Error;

use crate::protocol::frames::Frame;

/// Maximum accepted size of a single frame in bytes.
///
/// Command payloads are small JSON documents; anything near this limit is
/// a misbehaving peer, not a legitimate frame.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text is larger than [`MAX_FRAME_SIZE`].
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// The text is not a valid frame (bad JSON, unknown `type`, wrong
    /// field types).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Frame`] into the JSON text sent as one WebSocket frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails and
/// [`ProtocolError::FrameTooLarge`] if the encoded text exceeds
/// [`MAX_FRAME_SIZE`].
///
/// # Examples
///
/// ```rust
/// use castlink_core::{decode_frame, encode_frame, Frame};
///
/// let frame = Frame::request("c1-1", "cast://audio/volume-up", None);
/// let text = encode_frame(&frame).unwrap();
/// assert_eq!(decode_frame(&text).unwrap(), frame);
/// ```
pub fn encode_frame(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_SIZE });
    }
    Ok(text)
}

/// Decodes one [`Frame`] from the text of a WebSocket frame.
///
/// Unknown object keys are ignored so that newer devices can add fields
/// without breaking older clients; an unknown `type` value is rejected.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] or
/// [`ProtocolError::MalformedFrame`].
pub fn decode_frame(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_SIZE });
    }
    serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frames::{keys, FrameType};
    use serde_json::json;

    #[test]
    fn test_encode_request_frame_produces_expected_shape() {
        // Arrange
        let frame = Frame::request("c4f2a1-2", "cast://audio/volume-up", Some(json!({"step": 1})));

        // Act
        let text = encode_frame(&frame).expect("encode");
        let value: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");

        // Assert
        assert_eq!(value["type"], "request");
        assert_eq!(value["id"], "c4f2a1-2");
        assert_eq!(value["uri"], "cast://audio/volume-up");
        assert_eq!(value["payload"]["step"], 1);
        assert!(value.get("error").is_none(), "absent fields must be omitted");
    }

    #[test]
    fn test_decode_registered_frame() {
        // Arrange: a device-issued registration confirmation
        let text = format!(
            r#"{{"type":"registered","id":"r-1","payload":{{"{}":"tok-42"}}}}"#,
            keys::SECRET_TOKEN
        );

        // Act
        let frame = decode_frame(&text).expect("decode");

        // Assert
        assert_eq!(frame.frame_type, FrameType::Registered);
        assert_eq!(frame.secret_token(), Some("tok-42"));
    }

    #[test]
    fn test_decode_ignores_unknown_keys() {
        let text = r#"{"type":"response","id":"a","payload":{},"device-ts":123456}"#;
        let frame = decode_frame(text).expect("unknown keys must be tolerated");
        assert_eq!(frame.frame_type, FrameType::Response);
    }

    #[test]
    fn test_decode_rejects_unknown_frame_type() {
        let result = decode_frame(r#"{"type":"subscribe","id":"a"}"#);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let result = decode_frame("{{{ not json");
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_oversize_frame() {
        // Arrange: a syntactically irrelevant text past the size limit
        let text = "x".repeat(MAX_FRAME_SIZE + 1);

        // Act
        let result = decode_frame(&text);

        // Assert
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_round_trip_preserves_error_frame() {
        let frame = Frame::error("c1-9", "403 permission denied");
        let text = encode_frame(&frame).expect("encode");
        assert_eq!(decode_frame(&text).expect("decode"), frame);
    }
}
