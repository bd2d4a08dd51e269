//! Status oracle: the resume offset for a session.

use crate::error::UploadError;
use crate::store::SessionStore;

impl SessionStore {
    /// Returns the number of bytes currently persisted for a session —
    /// the offset a client should resume from.
    ///
    /// Resolves the backing object exactly like the chunk receiver does,
    /// so query and mutate paths can never disagree about existence. May
    /// run concurrently with a submission; the observed size is either
    /// the pre- or post-append value (monotonically non-decreasing).
    pub async fn persisted_bytes(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<u64, UploadError> {
        let path = self.resolve(session_id, filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(UploadError::SessionNotFound {
                    session_id: session_id.to_string(),
                    filename: filename.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}
