//! Chunk receiver: admission gate and crash-safe append.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use chunkport_protocol::ContentRange;

use crate::APPEND_BUFFER_SIZE;
use crate::error::UploadError;
use crate::store::SessionStore;

/// Validates the submission headers before any storage access.
///
/// Checks in protocol order: range present, session id present, range
/// well-formed, bounds valid. Returns the parsed pieces for
/// [`SessionStore::submit_chunk`].
pub fn validate_submission<'a>(
    session_id: Option<&'a str>,
    range_header: Option<&str>,
) -> Result<(&'a str, ContentRange), UploadError> {
    let header = range_header.ok_or(UploadError::MissingRange)?;
    let session_id = session_id.ok_or(UploadError::MissingSessionId)?;
    let range = ContentRange::parse(header)?;
    Ok((session_id, range))
}

impl SessionStore {
    /// Appends one chunk to a session's backing object.
    ///
    /// The admission gate accepts the chunk iff `range.start` equals
    /// the currently persisted size — this single check rejects both
    /// duplicate resends of already-applied chunks and out-of-order or
    /// overlapping chunks. The size check and the append run inside the
    /// session's exclusive section; submissions for different sessions
    /// proceed in parallel.
    ///
    /// The append is all-or-nothing: a mid-stream failure truncates the
    /// object back to its pre-append size and surfaces
    /// [`UploadError::StorageUnavailable`]. Only if that rollback itself
    /// fails is [`UploadError::PartialWriteFailure`] returned, at which
    /// point the persisted size must be re-queried before the next
    /// submission.
    ///
    /// The declared `total` is never checked against the persisted size
    /// on completion; whether the transfer is finished is inferred by
    /// the client.
    pub async fn submit_chunk<R>(
        &self,
        session_id: &str,
        filename: &str,
        range: ContentRange,
        body: R,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let path = self.resolve(session_id, filename)?;

        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.gate_and_append(&path, session_id, filename, range, body)
                .await
        };
        self.release_session_lock(session_id, lock);
        result
    }

    /// Admission gate and append. Caller holds the session's exclusive
    /// section.
    async fn gate_and_append<R>(
        &self,
        path: &std::path::Path,
        session_id: &str,
        filename: &str,
        range: ContentRange,
        body: R,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let persisted = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(UploadError::SessionNotFound {
                    session_id: session_id.to_string(),
                    filename: filename.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if persisted != range.start {
            debug!(
                session_id = %session_id,
                persisted,
                declared = range.start,
                "chunk rejected by admission gate"
            );
            return Err(UploadError::ChunkOffsetMismatch {
                persisted,
                declared: range.start,
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await?;

        match append_stream(&mut file, body).await {
            Ok(appended) => {
                debug!(
                    session_id = %session_id,
                    offset = range.start,
                    appended,
                    "chunk accepted"
                );
                Ok(())
            }
            Err(io_err) => {
                // Pending buffered writes must not land after the
                // truncate; drop the append handle before rolling back.
                drop(file);
                match rollback(path, persisted).await {
                    Ok(()) => {
                        warn!(
                            session_id = %session_id,
                            error = %io_err,
                            "append failed, rolled back to pre-append size"
                        );
                        Err(UploadError::StorageUnavailable(io_err))
                    }
                    Err(rollback_err) => {
                        warn!(
                            session_id = %session_id,
                            error = %rollback_err,
                            "append failed and rollback failed, persisted size unknown"
                        );
                        Err(UploadError::PartialWriteFailure(rollback_err))
                    }
                }
            }
        }
    }
}

/// Streams `body` to the end of `file`, returning the appended length.
async fn append_stream<R>(file: &mut tokio::fs::File, mut body: R) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; APPEND_BUFFER_SIZE];
    let mut appended: u64 = 0;
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        appended += n as u64;
    }
    file.flush().await?;
    Ok(appended)
}

/// Truncates the backing object to `size`.
async fn rollback(path: &std::path::Path, size: u64) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(size).await?;
    file.sync_data().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    async fn session_with(store: &SessionStore, filename: &str) -> String {
        store.create_session(filename).await.unwrap()
    }

    fn range(start: u64, end: u64, total: u64) -> ContentRange {
        ContentRange::new(start, end, total).unwrap()
    }

    async fn contents(store: &SessionStore, id: &str, filename: &str) -> Vec<u8> {
        let path = store.resolve(id, filename).unwrap();
        tokio::fs::read(&path).await.unwrap()
    }

    // -----------------------------------------------------------------
    // validate_submission
    // -----------------------------------------------------------------

    #[test]
    fn missing_range_checked_before_session_id() {
        let err = validate_submission(None, None).unwrap_err();
        assert!(matches!(err, UploadError::MissingRange));
    }

    #[test]
    fn missing_session_id() {
        let err = validate_submission(None, Some("bytes=0-5/10")).unwrap_err();
        assert!(matches!(err, UploadError::MissingSessionId));
    }

    #[test]
    fn malformed_range_needs_no_storage() {
        // Pure validation: no store in sight.
        let err = validate_submission(Some("s1"), Some("bytes=abc")).unwrap_err();
        assert!(matches!(err, UploadError::MalformedRange(_)));
    }

    #[test]
    fn invalid_bounds_detected_at_validation() {
        let err = validate_submission(Some("s1"), Some("bytes=5-5/10")).unwrap_err();
        assert!(matches!(err, UploadError::InvalidRangeBounds { .. }));
    }

    #[test]
    fn valid_submission_parses() {
        let (id, r) = validate_submission(Some("s1"), Some("bytes=6-10/10")).unwrap();
        assert_eq!(id, "s1");
        assert_eq!(r, range(6, 10, 10));
    }

    // -----------------------------------------------------------------
    // submit_chunk
    // -----------------------------------------------------------------

    #[tokio::test]
    async fn sequential_chunks_reassemble_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        store
            .submit_chunk(&id, "a.txt", range(0, 6, 10), &b"abcdef"[..])
            .await
            .unwrap();
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 6);

        store
            .submit_chunk(&id, "a.txt", range(6, 10, 10), &b"ghij"[..])
            .await
            .unwrap();
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 10);

        assert_eq!(contents(&store, &id, "a.txt").await, b"abcdefghij");
    }

    #[tokio::test]
    async fn whole_file_in_one_submission() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        store
            .submit_chunk(&id, "a.txt", range(0, 10, 10), &b"0123456789"[..])
            .await
            .unwrap();
        assert_eq!(contents(&store, &id, "a.txt").await, b"0123456789");
    }

    #[tokio::test]
    async fn final_single_byte_submission() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        store
            .submit_chunk(&id, "a.txt", range(0, 9, 10), &b"012345678"[..])
            .await
            .unwrap();
        store
            .submit_chunk(&id, "a.txt", range(9, 10, 10), &b"9"[..])
            .await
            .unwrap();
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn duplicate_submission_rejected_and_size_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        store
            .submit_chunk(&id, "a.txt", range(0, 5, 10), &b"01234"[..])
            .await
            .unwrap();

        let err = store
            .submit_chunk(&id, "a.txt", range(0, 5, 10), &b"01234"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::ChunkOffsetMismatch {
                persisted: 5,
                declared: 0
            }
        ));
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 5);
        assert_eq!(contents(&store, &id, "a.txt").await, b"01234");
    }

    #[tokio::test]
    async fn gapped_submission_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        let err = store
            .submit_chunk(&id, "a.txt", range(4, 10, 10), &b"456789"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::ChunkOffsetMismatch {
                persisted: 0,
                declared: 4
            }
        ));
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_session_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let err = store
            .submit_chunk(
                "a3f1c2d4-0000-4abc-8def-123456789abc",
                "a.txt",
                range(0, 5, 10),
                &b"01234"[..],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn mismatched_filename_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        // Filename is part of the locator, not a secondary key.
        let err = store
            .submit_chunk(&id, "b.txt", range(0, 5, 10), &b"01234"[..])
            .await
            .unwrap_err();
        match err {
            UploadError::SessionNotFound {
                session_id,
                filename,
            } => {
                assert_eq!(session_id, id);
                assert_eq!(filename, "b.txt");
            }
            other => panic!("expected SessionNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mid_stream_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = session_with(&store, "a.txt").await;

        store
            .submit_chunk(&id, "a.txt", range(0, 4, 10), &b"0123"[..])
            .await
            .unwrap();

        // A body that yields some bytes, then errors.
        let body = FailingBody {
            data: b"45".to_vec(),
            pos: 0,
        };
        let err = store
            .submit_chunk(&id, "a.txt", range(4, 10, 10), body)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::StorageUnavailable(_)));

        // Size must be exactly what it was before the failed append.
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 4);
        assert_eq!(contents(&store, &id, "a.txt").await, b"0123");

        // The session remains usable from the rolled-back offset.
        store
            .submit_chunk(&id, "a.txt", range(4, 10, 10), &b"456789"[..])
            .await
            .unwrap();
        assert_eq!(contents(&store, &id, "a.txt").await, b"0123456789");
    }

    #[tokio::test]
    async fn concurrent_same_session_submissions_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SessionStore::new(dir.path()));
        let id = session_with(&store, "a.txt").await;

        // Two identical submissions race: exactly one passes the gate.
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let store = std::sync::Arc::clone(&store);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .submit_chunk(&id, "a.txt", range(0, 5, 10), &b"01234"[..])
                    .await
            }));
        }

        let mut accepted = 0;
        let mut mismatched = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(UploadError::ChunkOffsetMismatch { .. }) => mismatched += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(accepted, 1);
        assert_eq!(mismatched, 1);
        assert_eq!(store.persisted_bytes(&id, "a.txt").await.unwrap(), 5);
        assert_eq!(contents(&store, &id, "a.txt").await, b"01234");
    }

    #[tokio::test]
    async fn independent_sessions_proceed_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(SessionStore::new(dir.path()));
        let a = session_with(&store, "a.txt").await;
        let b = session_with(&store, "b.txt").await;

        let ta = {
            let store = std::sync::Arc::clone(&store);
            let a = a.clone();
            tokio::spawn(
                async move { store.submit_chunk(&a, "a.txt", range(0, 3, 3), &b"AAA"[..]).await },
            )
        };
        let tb = {
            let store = std::sync::Arc::clone(&store);
            let b = b.clone();
            tokio::spawn(
                async move { store.submit_chunk(&b, "b.txt", range(0, 3, 3), &b"BBB"[..]).await },
            )
        };
        ta.await.unwrap().unwrap();
        tb.await.unwrap().unwrap();

        assert_eq!(contents(&store, &a, "a.txt").await, b"AAA");
        assert_eq!(contents(&store, &b, "b.txt").await, b"BBB");
    }

    /// AsyncRead that returns its data, then an I/O error.
    struct FailingBody {
        data: Vec<u8>,
        pos: usize,
    }

    impl AsyncRead for FailingBody {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.pos < self.data.len() {
                let data = self.data[self.pos..].to_vec();
                buf.put_slice(&data);
                self.pos = self.data.len();
                Poll::Ready(Ok(()))
            } else {
                Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "stream interrupted",
                )))
            }
        }
    }
}
