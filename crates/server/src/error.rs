//! Error taxonomy for the upload server.
//!
//! Every rejection path carries a stable machine code plus a
//! human-readable message; nothing is silently swallowed.

use chunkport_protocol::{RangeError, Rejection, SessionCredentials};

/// Errors produced by the session store.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("missing 'filename'")]
    MissingFilename,

    #[error("missing content range")]
    MissingRange,

    #[error("missing session id")]
    MissingSessionId,

    #[error("malformed range descriptor: {0:?}")]
    MalformedRange(String),

    #[error("invalid range bounds: start={start} end={end} total={total}")]
    InvalidRangeBounds { start: u64, end: u64, total: u64 },

    #[error("no session with provided credentials: {session_id}/{filename}")]
    SessionNotFound {
        session_id: String,
        filename: String,
    },

    #[error("chunk offset mismatch: {persisted} bytes persisted, chunk starts at {declared}")]
    ChunkOffsetMismatch { persisted: u64, declared: u64 },

    #[error("partial write could not be rolled back: {0}")]
    PartialWriteFailure(std::io::Error),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),
}

impl From<RangeError> for UploadError {
    fn from(err: RangeError) -> Self {
        match err {
            RangeError::Malformed(text) => UploadError::MalformedRange(text),
            RangeError::InvalidBounds { start, end, total } => {
                UploadError::InvalidRangeBounds { start, end, total }
            }
        }
    }
}

impl UploadError {
    /// Stable machine-readable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::MissingFilename => "missing_filename",
            UploadError::MissingRange => "missing_range",
            UploadError::MissingSessionId => "missing_session_id",
            UploadError::MalformedRange(_) => "malformed_range",
            UploadError::InvalidRangeBounds { .. } => "invalid_range_bounds",
            UploadError::SessionNotFound { .. } => "session_not_found",
            UploadError::ChunkOffsetMismatch { .. } => "chunk_offset_mismatch",
            UploadError::PartialWriteFailure(_) => "partial_write_failure",
            UploadError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// HTTP-equivalent status for transport adapters.
    pub fn status(&self) -> u16 {
        match self {
            UploadError::MissingFilename
            | UploadError::MissingRange
            | UploadError::MissingSessionId
            | UploadError::MalformedRange(_)
            | UploadError::InvalidRangeBounds { .. }
            | UploadError::ChunkOffsetMismatch { .. } => 400,
            UploadError::SessionNotFound { .. } => 404,
            UploadError::PartialWriteFailure(_) | UploadError::StorageUnavailable(_) => 500,
        }
    }

    /// `true` if the client can recover by re-querying status and
    /// resuming from the reported offset.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            UploadError::SessionNotFound { .. } | UploadError::ChunkOffsetMismatch { .. }
        )
    }

    /// Builds the wire-level rejection body.
    ///
    /// Server-local failures are surfaced as a generic internal error so
    /// no partial state leaks to the client.
    pub fn to_rejection(&self) -> Rejection {
        let message = match self {
            UploadError::PartialWriteFailure(_) | UploadError::StorageUnavailable(_) => {
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let credentials = match self {
            UploadError::SessionNotFound {
                session_id,
                filename,
            } => Some(SessionCredentials {
                session_id: session_id.clone(),
                filename: filename.clone(),
            }),
            _ => None,
        };
        Rejection {
            code: self.code().to_string(),
            message,
            credentials,
        }
    }
}
