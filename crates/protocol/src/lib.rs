//! Wire types shared by the upload client and server.
//!
//! The protocol is deliberately small: a session is created for a
//! filename, chunks are submitted as contiguous byte ranges, and either
//! side can query how many bytes are durably persisted. Everything here
//! is transport-agnostic — HTTP, WebSocket, or an in-process loopback
//! can carry these types unchanged.

pub mod messages;
pub mod range;

pub use messages::{
    CreateSessionRequest, CreateSessionResponse, Rejection, SessionCredentials, StatusQuery,
    StatusResponse,
};
pub use range::{ContentRange, RangeError};

/// Multipart form field carrying the raw chunk bytes.
pub const CHUNK_FIELD: &str = "chunk";

/// Header carrying the session id on chunk submissions.
pub const SESSION_ID_HEADER: &str = "x-file-id";

/// Header carrying the `bytes=<start>-<end>/<total>` range descriptor.
pub const CONTENT_RANGE_HEADER: &str = "content-range";
