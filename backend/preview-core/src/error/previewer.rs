use crate::error::transport::TransportError;

use common::ErrorLocation;

use std::path::PathBuf;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum PreviewerError {
    /// Caller bug: a required argument was blank or of the wrong kind.
    #[error("Argument Error: {message} {location}")]
    Argument {
        message: String,
        location: ErrorLocation,
    },

    /// One of the three required files does not exist at start time.
    #[error(
        "File Not Found: could not find '{}'. \
         Please build your project to enable previewing. {location}",
        .path.display()
    )]
    FileNotFound {
        path: PathBuf,
        location: ErrorLocation,
    },

    /// API misuse: double start, or update/input before ready.
    #[error("Invalid Operation: {message} {location}")]
    InvalidOperation {
        message: String,
        location: ErrorLocation,
    },

    /// The previewer process terminated before the connection was
    /// initialized; carries the observed exit code (None when killed by
    /// a signal).
    #[error("Process Exit Error: previewer exited unexpectedly with code {exit_code:?} {location}")]
    ProcessExited {
        exit_code: Option<i32>,
        location: ErrorLocation,
    },

    #[error("Spawn Error: {message} {location}")]
    Spawn {
        message: String,
        location: ErrorLocation,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout Error: {message} {location}")]
    Timeout {
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}
