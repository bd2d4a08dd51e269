//! Session registry: id issuance and backing-object creation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::info;
use uuid::Uuid;

use crate::error::UploadError;
use crate::locator;

/// Storage-rooted upload state shared by the registry, the chunk
/// receiver, and the status oracle.
///
/// Holds no per-session metadata beyond an in-memory lock table used to
/// serialize submissions: the backing objects themselves are the
/// durable session records.
pub struct SessionStore {
    root: PathBuf,
    /// Per-session exclusive sections for the check-then-append pair.
    /// Entries are created lazily and live for the process lifetime.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionStore {
    /// Creates a store rooted at `root`. The directory is created on
    /// first session creation, not here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the storage root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Issues a fresh session id for `filename` and creates the empty
    /// backing object, truncating any leftover with the same name.
    ///
    /// The object's existence is the durable proof the session exists;
    /// there is no separate index to lose on crash.
    pub async fn create_session(&self, filename: &str) -> Result<String, UploadError> {
        if filename.is_empty() {
            return Err(UploadError::MissingFilename);
        }

        let session_id = Uuid::new_v4().to_string();
        let path = self.root.join(locator::backing_name(&session_id, filename));

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::File::create(&path).await?;

        info!(session_id = %session_id, filename = %filename, "upload session created");
        Ok(session_id)
    }

    /// Resolves the backing-object path for `(session_id, filename)`.
    ///
    /// Does not touch storage; an id outside the UUID charset resolves
    /// to not-found without ever reaching the filesystem.
    pub(crate) fn resolve(&self, session_id: &str, filename: &str) -> Result<PathBuf, UploadError> {
        if !locator::is_valid_session_id(session_id) {
            return Err(UploadError::SessionNotFound {
                session_id: session_id.to_string(),
                filename: filename.to_string(),
            });
        }
        Ok(self.root.join(locator::backing_name(session_id, filename)))
    }

    /// Returns the exclusive section for a session, creating it lazily.
    pub(crate) fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Returns a lock handle obtained from [`session_lock`](Self::session_lock).
    ///
    /// Evicts the table entry when no other submission holds a handle,
    /// so the table stays bounded by in-flight sessions rather than
    /// growing for the process lifetime. Holding the table mutex makes
    /// the strong-count check race-free: nobody can clone the entry
    /// while we decide.
    pub(crate) fn release_session_lock(&self, session_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        // Table entry plus our handle: no waiters left.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_session_creates_empty_backing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let id = store.create_session("a.txt").await.unwrap();
        let path = store.resolve(&id, "a.txt").unwrap();
        let meta = tokio::fs::metadata(&path).await.unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[tokio::test]
    async fn create_session_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let a = store.create_session("a.txt").await.unwrap();
        let b = store.create_session("a.txt").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn create_session_rejects_empty_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let err = store.create_session("").await.unwrap_err();
        assert!(matches!(err, UploadError::MissingFilename));
    }

    #[tokio::test]
    async fn create_session_with_hostile_filename_stays_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        let id = store.create_session("../../escape.txt").await.unwrap();
        let path = store.resolve(&id, "../../escape.txt").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }

    #[tokio::test]
    async fn create_session_fails_when_root_is_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the root directory should be.
        let blocked = dir.path().join("not-a-dir");
        tokio::fs::write(&blocked, b"x").await.unwrap();
        let store = SessionStore::new(&blocked);

        let err = store.create_session("a.txt").await.unwrap_err();
        assert!(matches!(err, UploadError::StorageUnavailable(_)));
    }

    #[test]
    fn resolve_rejects_invalid_session_id() {
        let store = SessionStore::new("/tmp/unused");
        let err = store.resolve("../escape", "a.txt").unwrap_err();
        assert!(matches!(err, UploadError::SessionNotFound { .. }));
    }

    #[test]
    fn session_lock_is_shared_per_session() {
        let store = SessionStore::new("/tmp/unused");
        let a = store.session_lock("s1");
        let b = store.session_lock("s1");
        let c = store.session_lock("s2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn released_lock_is_evicted_unless_contended() {
        let store = SessionStore::new("/tmp/unused");

        let only = store.session_lock("s1");
        store.release_session_lock("s1", only);
        assert!(store.locks.lock().unwrap().is_empty());

        // A second holder keeps the entry alive.
        let first = store.session_lock("s1");
        let second = store.session_lock("s1");
        store.release_session_lock("s1", first);
        assert_eq!(store.locks.lock().unwrap().len(), 1);
        store.release_session_lock("s1", second);
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_table_stays_bounded_across_submissions() {
        use chunkport_protocol::ContentRange;

        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        for _ in 0..4 {
            let id = store.create_session("a.txt").await.unwrap();
            store
                .submit_chunk(
                    &id,
                    "a.txt",
                    ContentRange::new(0, 3, 3).unwrap(),
                    &b"abc"[..],
                )
                .await
                .unwrap();
        }
        assert!(store.locks.lock().unwrap().is_empty());
    }
}
