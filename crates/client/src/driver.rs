//! Per-file upload state machine.
//!
//! Each queued file moves through `Pending → Uploading → {Paused,
//! Completed, Failed}`, with `Paused → Uploading` on resume. At most one
//! submission is in flight per file; every attempt carries a generation
//! number so a cancelled attempt can never update the record or emit
//! events after a newer attempt has started.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunkport_protocol::ContentRange;

use crate::error::ClientError;
use crate::progress::ProgressMeter;
use crate::slice::FileSlice;
use crate::transport::{ChunkOutcome, ChunkSubmission, UploadTransport};

/// Event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress channel capacity per attempt.
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// Current state of a queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

/// Events emitted by the driver, in order per file.
///
/// `Progress.loaded` counts bytes the transport has sent, not bytes the
/// server has durably persisted; under an interrupted attempt the two
/// diverge and only a status query tells the truth.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Progress {
        path: PathBuf,
        loaded: u64,
        total: u64,
        percentage: f64,
        bytes_per_sec: f64,
        eta: Option<Duration>,
    },
    Completed {
        path: PathBuf,
    },
    Paused {
        path: PathBuf,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
}

/// Client-side record for one queued file.
struct FileRecord {
    size: u64,
    session_id: Option<String>,
    status: UploadStatus,
    /// Last known persisted offset; the start byte of the next attempt.
    last_known_offset: u64,
    /// Generation counter; bumped whenever an attempt starts or is
    /// invalidated, so stale attempts cannot report results.
    attempt: u64,
    cancel: Option<CancellationToken>,
}

/// Drives uploads for a set of files over an [`UploadTransport`].
pub struct UploadDriver {
    transport: Arc<dyn UploadTransport>,
    records: Arc<Mutex<HashMap<PathBuf, FileRecord>>>,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl UploadDriver {
    /// Creates a driver over the given transport.
    pub fn new(transport: Arc<dyn UploadTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            records: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Queues a file, recording its size. The file stays `Pending`
    /// until [`start`](Self::start).
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref().to_path_buf();
        let size = tokio::fs::metadata(&path).await?.len();

        let mut records = self.lock_records();
        if let Some(existing) = records.get(&path)
            && existing.status == UploadStatus::Uploading
        {
            return Err(ClientError::AlreadyInFlight);
        }
        records.insert(
            path,
            FileRecord {
                size,
                session_id: None,
                status: UploadStatus::Pending,
                last_known_offset: 0,
                attempt: 0,
                cancel: None,
            },
        );
        Ok(())
    }

    /// Creates a session and submits the whole file `[0, size)` as one
    /// chunk. Transitions to `Uploading`.
    ///
    /// An empty file has nothing to submit: its session alone is the
    /// complete transfer, and the record goes straight to `Completed`.
    pub async fn start(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref().to_path_buf();
        let filename = file_name_of(&path)?;

        {
            let records = self.lock_records();
            let record = records
                .get(&path)
                .ok_or_else(|| ClientError::UnknownFile(path.clone()))?;
            if record.status == UploadStatus::Uploading {
                return Err(ClientError::AlreadyInFlight);
            }
        }

        let session_id = self.transport.create_session(&filename).await?;
        info!(session_id = %session_id, filename = %filename, "upload session obtained");

        let armed = {
            let mut records = self.lock_records();
            let record = records
                .get_mut(&path)
                .ok_or_else(|| ClientError::UnknownFile(path.clone()))?;
            // The status check before create_session ran under an
            // earlier lock acquisition; a concurrent start may have
            // armed an attempt in between. Re-check before touching the
            // record, so exactly one caller wins.
            if record.status == UploadStatus::Uploading {
                debug!(session_id = %session_id, "concurrent start lost the race, session discarded");
                return Err(ClientError::AlreadyInFlight);
            }
            record.session_id = Some(session_id.clone());
            record.last_known_offset = 0;
            if record.size == 0 {
                record.status = UploadStatus::Completed;
                None
            } else {
                Some((arm_attempt(record), record.size))
            }
        };

        match armed {
            None => {
                let _ = self
                    .events_tx
                    .send(UploadEvent::Completed { path: path.clone() })
                    .await;
                info!(path = %path.display(), "empty file completed at session creation");
                Ok(())
            }
            Some(((attempt, cancel), size)) => {
                self.spawn_attempt(path, filename, session_id, 0, size, attempt, cancel);
                Ok(())
            }
        }
    }

    /// Cancels the in-flight submission, if any, and transitions to
    /// `Paused`.
    ///
    /// The cancellation is observed by the transport and by the
    /// driver's own event pump before it returns, so once the caller
    /// sees the `Paused` event, no further progress or completion from
    /// the aborted attempt will appear — a later [`resume`](Self::resume)
    /// starts a clean attempt.
    pub fn abort(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref().to_path_buf();

        let mut records = self.lock_records();
        let record = records
            .get_mut(&path)
            .ok_or_else(|| ClientError::UnknownFile(path.clone()))?;
        // Invalidate the in-flight attempt before releasing anything.
        record.attempt += 1;
        if let Some(cancel) = record.cancel.take() {
            cancel.cancel();
        }
        if record.status == UploadStatus::Uploading {
            record.status = UploadStatus::Paused;
            debug!(path = %path.display(), "upload aborted");
            // Emitted while still holding the records lock: the event
            // pump emits progress under the same lock after checking
            // the attempt generation, so no stale progress event can
            // follow this one.
            let _ = self.events_tx.try_send(UploadEvent::Paused { path });
        }
        Ok(())
    }

    /// Queries the server for the persisted byte count and re-submits
    /// `[bytes_persisted, size)`. Already-persisted bytes are never
    /// re-sent.
    pub async fn resume(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref().to_path_buf();
        let filename = file_name_of(&path)?;

        let session_id = {
            let records = self.lock_records();
            let record = records
                .get(&path)
                .ok_or_else(|| ClientError::UnknownFile(path.clone()))?;
            if record.status == UploadStatus::Uploading {
                return Err(ClientError::AlreadyInFlight);
            }
            record.session_id.clone().ok_or(ClientError::MissingSession)?
        };

        let persisted = self.transport.fetch_status(&session_id, &filename).await?;
        debug!(
            session_id = %session_id,
            persisted,
            "resume offset fetched"
        );

        let armed = {
            let mut records = self.lock_records();
            let record = records
                .get_mut(&path)
                .ok_or_else(|| ClientError::UnknownFile(path.clone()))?;
            // Same race as in start: a concurrent resume may have armed
            // an attempt while fetch_status was in flight.
            if record.status == UploadStatus::Uploading {
                return Err(ClientError::AlreadyInFlight);
            }
            record.last_known_offset = persisted;
            if persisted >= record.size {
                record.status = UploadStatus::Completed;
                None
            } else {
                Some((arm_attempt(record), record.size))
            }
        };

        match armed {
            None => {
                let _ = self
                    .events_tx
                    .send(UploadEvent::Completed { path: path.clone() })
                    .await;
                Ok(())
            }
            Some(((attempt, cancel), size)) => {
                self.spawn_attempt(path, filename, session_id, persisted, size, attempt, cancel);
                Ok(())
            }
        }
    }

    /// Aborts any in-flight submission and discards the record. No
    /// further resume is possible through this driver.
    pub fn clear(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref().to_path_buf();
        let record = {
            let mut records = self.lock_records();
            records
                .remove(&path)
                .ok_or_else(|| ClientError::UnknownFile(path.clone()))?
        };
        if let Some(cancel) = record.cancel {
            cancel.cancel();
        }
        debug!(path = %path.display(), "upload record cleared");
        Ok(())
    }

    /// Current status of a queued file.
    pub fn status(&self, path: impl AsRef<Path>) -> Option<UploadStatus> {
        self.lock_records().get(path.as_ref()).map(|r| r.status)
    }

    /// Session id of a queued file, once established.
    pub fn session_id(&self, path: impl AsRef<Path>) -> Option<String> {
        self.lock_records()
            .get(path.as_ref())
            .and_then(|r| r.session_id.clone())
    }

    /// Last known persisted offset for a queued file.
    pub fn last_known_offset(&self, path: impl AsRef<Path>) -> Option<u64> {
        self.lock_records()
            .get(path.as_ref())
            .map(|r| r.last_known_offset)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, FileRecord>> {
        self.records.lock().expect("upload records poisoned")
    }

    /// Spawns one submission attempt plus its progress pump.
    fn spawn_attempt(
        &self,
        path: PathBuf,
        filename: String,
        session_id: String,
        start: u64,
        size: u64,
        attempt: u64,
        cancel: CancellationToken,
    ) {
        let transport = Arc::clone(&self.transport);
        let records = Arc::clone(&self.records);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);

            let pump = tokio::spawn(pump_progress(
                progress_rx,
                events.clone(),
                Arc::clone(&records),
                path.clone(),
                start,
                size,
                attempt,
            ));

            let outcome = run_attempt(
                transport.as_ref(),
                &path,
                &filename,
                &session_id,
                start,
                size,
                progress_tx,
                cancel,
            )
            .await;

            let _ = pump.await;

            let event = {
                let mut records = records.lock().expect("upload records poisoned");
                let Some(record) = records.get_mut(&path) else {
                    return; // cleared mid-flight
                };
                if record.attempt != attempt {
                    return; // superseded by abort or a newer attempt
                }
                record.cancel = None;
                match outcome {
                    ChunkOutcome::Completed => {
                        record.status = UploadStatus::Completed;
                        record.last_known_offset = size;
                        Some(UploadEvent::Completed { path: path.clone() })
                    }
                    ChunkOutcome::Aborted => {
                        record.status = UploadStatus::Paused;
                        Some(UploadEvent::Paused { path: path.clone() })
                    }
                    ChunkOutcome::Failed(reason) => {
                        warn!(path = %path.display(), error = %reason, "upload attempt failed");
                        record.status = UploadStatus::Failed;
                        Some(UploadEvent::Failed {
                            path: path.clone(),
                            error: reason,
                        })
                    }
                }
            };
            if let Some(event) = event {
                let _ = events.send(event).await;
            }
        });
    }
}

/// Bumps the attempt generation and installs a fresh token.
fn arm_attempt(record: &mut FileRecord) -> (u64, CancellationToken) {
    record.attempt += 1;
    record.status = UploadStatus::Uploading;
    let cancel = CancellationToken::new();
    record.cancel = Some(cancel.clone());
    (record.attempt, cancel)
}

fn file_name_of(path: &Path) -> Result<String, ClientError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| ClientError::InvalidFilename(path.to_path_buf()))
}

/// Reads the remaining byte range and hands it to the transport.
#[allow(clippy::too_many_arguments)]
async fn run_attempt(
    transport: &dyn UploadTransport,
    path: &Path,
    filename: &str,
    session_id: &str,
    start: u64,
    size: u64,
    progress_tx: mpsc::Sender<u64>,
    cancel: CancellationToken,
) -> ChunkOutcome {
    let mut slice = match FileSlice::open(path, start, 0).await {
        Ok(slice) => slice,
        Err(e) => return ChunkOutcome::Failed(format!("failed to open file: {e}")),
    };

    let mut data = Vec::with_capacity((size - start) as usize);
    loop {
        if cancel.is_cancelled() {
            return ChunkOutcome::Aborted;
        }
        match slice.next_buf().await {
            Ok(Some(buf)) => data.extend_from_slice(&buf),
            Ok(None) => break,
            Err(e) => return ChunkOutcome::Failed(format!("failed to read file: {e}")),
        }
    }

    let range = match ContentRange::new(start, size, size) {
        Ok(range) => range,
        Err(e) => return ChunkOutcome::Failed(e.to_string()),
    };

    let submission = ChunkSubmission {
        session_id: session_id.to_string(),
        filename: filename.to_string(),
        range,
        data,
    };
    transport.send_chunk(submission, progress_tx, cancel).await
}

/// Converts transport byte counts into progress events.
///
/// Each emit happens under the records lock, after verifying the
/// attempt generation is still current. `abort` bumps the generation
/// and emits its `Paused` event under the same lock, so a paused
/// attempt can never be followed by one of its own progress events.
/// Progress uses `try_send`: under backpressure a reading is dropped
/// rather than stalling the pump, and the cumulative counts keep later
/// readings accurate.
async fn pump_progress(
    mut progress_rx: mpsc::Receiver<u64>,
    events: mpsc::Sender<UploadEvent>,
    records: Arc<Mutex<HashMap<PathBuf, FileRecord>>>,
    path: PathBuf,
    start: u64,
    total: u64,
    attempt: u64,
) {
    let mut meter = ProgressMeter::new(start, total);

    while let Some(sent) = progress_rx.recv().await {
        let snapshot = meter.record(sent);

        let guard = records.lock().expect("upload records poisoned");
        let current = guard.get(&path).is_some_and(|r| r.attempt == attempt);
        if !current {
            break;
        }
        let _ = events.try_send(UploadEvent::Progress {
            path: path.clone(),
            loaded: snapshot.loaded,
            total: snapshot.total,
            percentage: snapshot.percentage,
            bytes_per_sec: snapshot.bytes_per_sec,
            eta: snapshot.eta,
        });
    }
}
