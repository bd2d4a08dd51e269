//! Server side of the resumable upload protocol.
//!
//! A [`SessionStore`] roots all upload state in a single storage
//! directory. The backing object for a session is also the session
//! record: "does this session exist" is answered by "does the backing
//! object exist", so recovery after a crash needs no durable state
//! beyond the persisted byte count.
//!
//! Three operations, one resolution path:
//! - [`SessionStore::create_session`] issues an id and creates the
//!   empty backing object.
//! - [`SessionStore::submit_chunk`] admits a byte range iff its start
//!   equals the currently persisted size, then appends the stream.
//! - [`SessionStore::persisted_bytes`] reports the resume offset.

pub mod error;
pub mod locator;
pub mod receiver;
pub mod status;
pub mod store;

pub use error::UploadError;
pub use receiver::validate_submission;
pub use store::SessionStore;

/// Read buffer size for appending an incoming chunk stream (64 KB).
pub const APPEND_BUFFER_SIZE: usize = 64 * 1024;
