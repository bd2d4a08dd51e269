//! Client side of the resumable upload protocol.
//!
//! The [`UploadDriver`] owns a state machine per queued file: it obtains
//! a session, submits the remaining byte range as a single chunk, and
//! exposes pause/resume/abort. Resumption — not fixed-size chunking —
//! is what splits a transfer across multiple submissions: after an
//! interruption the driver asks the server how many bytes are persisted
//! and re-submits only the tail.
//!
//! The actual wire transport (HTTP, WebSocket, in-process) is injected
//! through the [`UploadTransport`] trait.

pub mod driver;
pub mod error;
pub mod progress;
pub mod slice;
pub mod transport;

pub use driver::{UploadDriver, UploadEvent, UploadStatus};
pub use error::ClientError;
pub use progress::{ProgressMeter, ProgressSnapshot};
pub use slice::FileSlice;
pub use transport::{ChunkOutcome, ChunkSubmission, TransportFuture, UploadTransport};
