//! Request and response bodies for the upload endpoints.
//!
//! Bodies are JSON with camelCase keys. Chunk bytes themselves travel
//! out-of-band (multipart field [`CHUNK_FIELD`](crate::CHUNK_FIELD));
//! only metadata is modeled here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Creates a new upload session for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub filename: String,
}

/// Queries how many bytes are persisted for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub filename: String,
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response to [`CreateSessionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Response to [`StatusQuery`]: the resume offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub bytes_persisted: u64,
}

/// The `(sessionId, filename)` pair echoed back on lookup failures so a
/// client can tell which of its records the rejection refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredentials {
    pub session_id: String,
    pub filename: String,
}

/// Error body returned for any rejected request.
///
/// `code` is a stable machine-readable identifier; `message` is for
/// humans. `credentials` is present only on session-not-found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SessionCredentials>,
}
