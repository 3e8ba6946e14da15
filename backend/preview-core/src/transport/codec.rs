//! Wire codec for protocol frames.
//!
//! The payload encoding is JSON: self-describing, tagged by type name,
//! tolerant of unknown fields - which is what the protocol's additive
//! evolution contract requires. Byte-level compatibility with any other
//! encoding of the same logical schema is explicitly not a goal; only the
//! outer framing and the field/tag names are fixed.

use crate::error::transport::TransportError;

use common::ErrorLocation;

use models::Message;

use std::panic::Location;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length prefix.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Declared payload lengths above this are treated as stream corruption.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Encode a message into one complete frame (prefix + payload).
#[track_caller]
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(message).map_err(|e| TransportError::PayloadDecode {
        message: format!("Failed to encode {}: {e}", message.tag()),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let length = payload.len() as u32;
    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend(payload);
    Ok(frame)
}

/// Decode a payload that has already been stripped of its length prefix.
#[track_caller]
pub fn decode_payload(payload: &[u8]) -> Result<Message, TransportError> {
    serde_json::from_slice(payload).map_err(|e| TransportError::PayloadDecode {
        message: format!("Failed to decode {}-byte payload: {e}", payload.len()),
        location: ErrorLocation::from(Location::caller()),
    })
}

/// Read one frame from the stream.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary. A
/// stream that ends inside the prefix or inside the declared payload is a
/// [`TransportError::Framing`] error - the length prefix must match the
/// payload exactly.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_PREFIX_LEN];

    // The first byte decides between clean EOF and a truncated prefix.
    let first = reader
        .read(&mut prefix[..1])
        .await
        .map_err(|e| TransportError::Io {
            message: format!("Failed to read frame prefix: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })?;

    if first == 0 {
        return Ok(None);
    }

    reader
        .read_exact(&mut prefix[1..])
        .await
        .map_err(|e| framing_or_io("connection closed inside a frame prefix", e))?;

    let length = u32::from_le_bytes(prefix);

    if length > MAX_FRAME_BYTES {
        return Err(TransportError::Framing {
            message: format!("Declared payload length {length} exceeds {MAX_FRAME_BYTES} bytes"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let mut payload = vec![0u8; length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| framing_or_io("connection closed before the declared payload arrived", e))?;

    decode_payload(&payload).map(Some)
}

#[track_caller]
fn framing_or_io(context: &str, error: std::io::Error) -> TransportError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::Framing {
            message: context.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    } else {
        TransportError::Io {
            message: format!("{context}: {error}"),
            location: ErrorLocation::from(Location::caller()),
            source: error,
        }
    }
}
