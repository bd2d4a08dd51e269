//! Transport seam between the driver and the wire.
//!
//! The driver models one submission as a cancellable asynchronous task
//! with a separate progress channel, rather than independent callback
//! slots: the transport resolves to a single [`ChunkOutcome`] and
//! reports transport-acknowledged bytes on the channel as it goes.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chunkport_protocol::ContentRange;

use crate::error::ClientError;

/// A boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One byte-range submission handed to the transport.
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub session_id: String,
    pub filename: String,
    pub range: ContentRange,
    pub data: Vec<u8>,
}

/// Terminal result of a chunk submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The server acknowledged the whole chunk.
    Completed,
    /// The cancellation token fired before the chunk was acknowledged.
    Aborted,
    /// Transport failure or server rejection; the reason is
    /// human-readable and the driver surfaces it verbatim.
    Failed(String),
}

/// Abstract connection to the upload server.
///
/// Implementations wrap whatever actually carries the bytes — an HTTP
/// client, a WebSocket, or an in-process loopback for tests. Using a
/// trait keeps the driver decoupled from transport and testable with
/// mocks.
pub trait UploadTransport: Send + Sync {
    /// Creates an upload session for `filename`, returning the session id.
    fn create_session(&self, filename: &str) -> TransportFuture<'_, Result<String, ClientError>>;

    /// Submits one chunk.
    ///
    /// `progress` carries the cumulative number of bytes handed to the
    /// wire for this attempt — bytes *sent*, not bytes durably
    /// persisted; the two can diverge under retry. `cancel` must be
    /// honored mid-flight: once it fires the transport stops sending
    /// and resolves to [`ChunkOutcome::Aborted`].
    fn send_chunk(
        &self,
        submission: ChunkSubmission,
        progress: mpsc::Sender<u64>,
        cancel: CancellationToken,
    ) -> TransportFuture<'_, ChunkOutcome>;

    /// Queries the number of bytes persisted for a session.
    fn fetch_status(
        &self,
        session_id: &str,
        filename: &str,
    ) -> TransportFuture<'_, Result<u64, ClientError>>;
}
