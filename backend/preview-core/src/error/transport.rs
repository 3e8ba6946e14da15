use common::ErrorLocation;

use thiserror::Error as ThisError;

/// Failures of the framed message channel.
///
/// `PayloadDecode` is the only recoverable variant: the offending frame is
/// dropped and the channel stays up. Every other variant marks the
/// connection unusable.
#[derive(Debug, ThisError)]
pub enum TransportError {
    /// The byte stream violated the length-prefixed framing.
    #[error("Framing Error: {message} {location}")]
    Framing {
        message: String,
        location: ErrorLocation,
    },

    /// A complete frame arrived but its payload did not parse.
    #[error("Payload Decode Error: {message} {location}")]
    PayloadDecode {
        message: String,
        location: ErrorLocation,
    },

    #[error("I/O Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
        #[source]
        source: std::io::Error,
    },

    /// The connection was disposed locally.
    #[error("Connection Closed: {message} {location}")]
    Closed {
        message: String,
        location: ErrorLocation,
    },

    /// A previous transport fault marked the connection unusable.
    #[error("Connection Faulted: {message} {location}")]
    Faulted {
        message: String,
        location: ErrorLocation,
    },
}

impl TransportError {
    /// Whether the receive loop may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::PayloadDecode { .. })
    }
}
