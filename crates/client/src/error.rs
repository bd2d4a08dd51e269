//! Error types for the upload client.

use std::path::PathBuf;

/// Errors produced by the upload driver.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rejected by server ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("no upload record for {0:?}")]
    UnknownFile(PathBuf),

    #[error("file name is not valid UTF-8: {0:?}")]
    InvalidFilename(PathBuf),

    #[error("a submission is already in flight for this file")]
    AlreadyInFlight,

    #[error("no session established; start the upload first")]
    MissingSession,
}
