// Unit tests for the wire codec
// Tests frame shape, round-trip decode, EOF handling, and corruption limits

use crate::error::transport::TransportError;
use crate::transport::codec::{
    FRAME_PREFIX_LEN, MAX_FRAME_BYTES, decode_payload, encode_frame, read_frame,
};

use models::Message;

use serde_json::Value;

// ============================================
// UNIT TESTS: Frame Encoding
// ============================================

/// **VALUE**: Verifies the outer frame layout: 4-byte little-endian length
/// prefix followed by exactly that many payload bytes.
///
/// **WHY THIS MATTERS**: The previewer process parses this layout with no
/// tolerance. A prefix in the wrong byte order or counting the prefix
/// itself desynchronizes the whole stream.
///
/// **BUG THIS CATCHES**: Switching to big-endian, or including the prefix
/// in the declared length.
#[test]
fn given_message_when_encode_frame_then_prefix_is_le_payload_length() {
    let message = Message::ClientRenderInfo {
        dpi_x: 96.0,
        dpi_y: 96.0,
    };

    let frame = encode_frame(&message).unwrap();

    let declared = u32::from_le_bytes(frame[..FRAME_PREFIX_LEN].try_into().unwrap());
    assert_eq!(declared as usize, frame.len() - FRAME_PREFIX_LEN);
}

/// **VALUE**: Verifies the payload is a tagged JSON object with the
/// protocol type name and camelCase fields.
///
/// **WHY THIS MATTERS**: The tag string and field names ARE the protocol.
/// The remote dispatches on `"type"` and reads `dpiX`/`dpiY` by name.
///
/// **BUG THIS CATCHES**: Renaming a variant or dropping the serde rename
/// attributes would silently break the remote without any local error.
#[test]
fn given_render_info_when_encode_frame_then_payload_is_tagged_json() {
    let message = Message::ClientRenderInfo {
        dpi_x: 144.0,
        dpi_y: 144.0,
    };

    let frame = encode_frame(&message).unwrap();
    let payload: Value = serde_json::from_slice(&frame[FRAME_PREFIX_LEN..]).unwrap();

    assert_eq!(payload["type"], "ClientRenderInfoMessage");
    assert_eq!(payload["dpiX"], 144.0);
    assert_eq!(payload["dpiY"], 144.0);
}

// ============================================
// UNIT TESTS: Frame Reading
// ============================================

/// **VALUE**: Verifies a complete encoded frame reads back as the same
/// message.
///
/// **WHY THIS MATTERS**: encode/read are the two halves of every exchange;
/// any asymmetry between them breaks all communication.
///
/// **BUG THIS CATCHES**: An off-by-one in prefix handling would either
/// truncate the payload or read into the next frame.
#[tokio::test]
async fn given_encoded_frame_when_read_frame_then_returns_original_message() {
    let message = Message::UpdateXaml {
        assembly_path: "/tmp/app.dll".to_string(),
        xaml: "<Window />".to_string(),
        owner_window_x: 10,
        owner_window_y: 20,
    };

    let frame = encode_frame(&message).unwrap();
    let mut reader = frame.as_slice();

    let decoded = read_frame(&mut reader).await.unwrap();

    assert_eq!(decoded, Some(message));
}

/// **VALUE**: Verifies end-of-stream at a frame boundary reads as `None`
/// rather than an error.
///
/// **WHY THIS MATTERS**: The previewer closing its socket after the last
/// complete frame is the normal shutdown path, not a fault.
///
/// **BUG THIS CATCHES**: Treating clean EOF as an error would report every
/// orderly shutdown as a transport fault.
#[tokio::test]
async fn given_empty_stream_when_read_frame_then_returns_none() {
    let mut reader: &[u8] = &[];

    let result = read_frame(&mut reader).await.unwrap();

    assert!(result.is_none());
}

/// **VALUE**: Verifies a stream that ends inside the length prefix is a
/// framing error, not a clean close.
///
/// **WHY THIS MATTERS**: Bytes lost mid-prefix mean the remote died
/// mid-write; callers must be able to tell that apart from shutdown.
///
/// **BUG THIS CATCHES**: Reading the prefix with a plain `read` would
/// accept 2 stray bytes and return EOF as if nothing were wrong.
#[tokio::test]
async fn given_truncated_prefix_when_read_frame_then_framing_error() {
    let mut reader: &[u8] = &[0x05, 0x00];

    let error = read_frame(&mut reader).await.unwrap_err();

    assert!(matches!(error, TransportError::Framing { .. }));
}

/// **VALUE**: Verifies a payload shorter than its declared length is a
/// framing error.
///
/// **WHY THIS MATTERS**: The length prefix is a promise; a short payload
/// means the stream is desynchronized and nothing after it can be trusted.
///
/// **BUG THIS CATCHES**: Returning a partial payload to the JSON decoder
/// would surface as a confusing parse error instead of a framing fault.
#[tokio::test]
async fn given_truncated_payload_when_read_frame_then_framing_error() {
    let mut frame = 10u32.to_le_bytes().to_vec();
    frame.extend_from_slice(b"shrt");
    let mut reader = frame.as_slice();

    let error = read_frame(&mut reader).await.unwrap_err();

    assert!(matches!(error, TransportError::Framing { .. }));
}

/// **VALUE**: Verifies a declared length above the frame cap is rejected
/// before any allocation.
///
/// **WHY THIS MATTERS**: A corrupted prefix can declare 4 GiB; allocating
/// that on faith is a trivial way for stream corruption to take the
/// process down.
///
/// **BUG THIS CATCHES**: Removing the cap check would turn a single
/// flipped bit into an out-of-memory abort.
#[tokio::test]
async fn given_oversized_length_when_read_frame_then_framing_error() {
    let mut frame = (MAX_FRAME_BYTES + 1).to_le_bytes().to_vec();
    frame.extend_from_slice(&[0u8; 16]);
    let mut reader = frame.as_slice();

    let error = read_frame(&mut reader).await.unwrap_err();

    assert!(matches!(error, TransportError::Framing { .. }));
}

// ============================================
// UNIT TESTS: Payload Decoding
// ============================================

/// **VALUE**: Verifies an undecodable payload is a recoverable error.
///
/// **WHY THIS MATTERS**: One bad frame from a newer or buggy previewer
/// must not tear down the whole connection; the receive loop keeps going
/// only for errors flagged recoverable.
///
/// **BUG THIS CATCHES**: Classifying decode failures as fatal would turn
/// every unknown-but-valid-length frame into a dead connection.
#[test]
fn given_garbage_payload_when_decode_then_recoverable_decode_error() {
    let error = decode_payload(b"not json at all").unwrap_err();

    assert!(matches!(error, TransportError::PayloadDecode { .. }));
    assert!(error.is_recoverable());
}
