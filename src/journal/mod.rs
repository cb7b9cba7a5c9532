//! Append-only status journal: the durable record of every upload's state
//! transitions, and the source of truth replayed into the recorder on
//! startup.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::transfer::progress::{StatusRecordEntry, UploadProgress};
use crate::utils::errors::Result;

const CHANNEL_CAPACITY: usize = 256;

/// Handle to the journal's writer. Cheap to clone; `record` enqueues onto a
/// channel consumed by a single background task that owns the file.
#[derive(Clone)]
pub struct StatusJournal {
    sender: Sender<StatusRecordEntry>,
}

impl StatusJournal {
    /// Open `path` for append and spawn the consumer task. Returns the
    /// journal handle and the consumer's join handle, which resolves once
    /// the channel is closed and draining completes.
    pub fn open(path: PathBuf, cancel: CancellationToken) -> (Self, tokio::task::JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(run_consumer(path, receiver, cancel));
        (Self { sender }, handle)
    }

    /// Enqueue a status entry. If `context_id` is empty, a fresh UUID is
    /// generated and returned; otherwise the supplied context id is
    /// returned unchanged. Never blocks: a full channel drops the record
    /// with a logged warning rather than stalling the caller.
    pub fn record(
        &self,
        system: &str,
        operation: &str,
        status: &str,
        context_id: &str,
        comments: &str,
    ) -> String {
        let context_id = if context_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            context_id.to_string()
        };

        let entry = StatusRecordEntry {
            time: chrono::Utc::now(),
            system: system.to_string(),
            operation: operation.to_string(),
            status: status.to_string(),
            context_id: context_id.clone(),
            comments: comments.to_string(),
        };

        match self.sender.try_send(entry) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("journal channel full, dropping status record ({operation}/{status})");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("journal closed, dropping status record ({operation}/{status})");
            }
        }

        context_id
    }

    /// Replay `path`, reconstructing the last known progress per
    /// fingerprint. A missing file yields an empty map, not an error.
    pub fn replay(path: &Path) -> Result<HashMap<String, UploadProgress>> {
        let mut result = HashMap::new();

        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e.into()),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry = match StatusRecordEntry::from_line(&line) {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping malformed journal line: {e}");
                    continue;
                }
            };
            if entry.operation != "FileUpload" {
                continue;
            }

            match entry.status.as_str() {
                "Success" => {
                    result.insert(
                        entry.context_id.clone(),
                        UploadProgress {
                            reference: entry.comments.clone(),
                            complete: true,
                            ..Default::default()
                        },
                    );
                }
                "Partial" => {
                    if let Ok(progress) = serde_json::from_str::<UploadProgress>(&entry.comments) {
                        result.insert(entry.context_id.clone(), progress);
                    }
                }
                _ => {}
            }
        }

        Ok(result)
    }
}

async fn run_consumer(
    path: PathBuf,
    mut receiver: mpsc::Receiver<StatusRecordEntry>,
    cancel: CancellationToken,
) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            error!("journal: failed to open {}: {e}; entering degraded mode", path.display());
            drain_degraded(&mut receiver, &cancel).await;
            return;
        }
    };

    let mut degraded = false;

    loop {
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                receiver.close();
                while let Ok(entry) = receiver.try_recv() {
                    write_entry(&mut file, &entry, &mut degraded).await;
                }
                break;
            }
            entry = receiver.recv() => entry,
        };

        let Some(entry) = entry else { break };
        write_entry(&mut file, &entry, &mut degraded).await;
    }

    let _ = file.flush().await;
}

async fn write_entry(
    file: &mut tokio::fs::File,
    entry: &StatusRecordEntry,
    degraded: &mut bool,
) {
    if *degraded {
        return;
    }

    let line = match entry.to_line() {
        Ok(l) => l,
        Err(e) => {
            error!("journal: failed to encode entry: {e}");
            return;
        }
    };

    if write_once(file, &line).await.is_ok() {
        return;
    }

    warn!("journal: write failed, retrying once");
    if write_once(file, &line).await.is_err() {
        error!("journal: write failed twice; entering degraded mode (no further records persisted)");
        *degraded = true;
    }
}

async fn write_once(file: &mut tokio::fs::File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await
}

async fn drain_degraded(
    receiver: &mut mpsc::Receiver<StatusRecordEntry>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            entry = receiver.recv() => {
                if entry.is_none() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn replay_of_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.recordStatus");
        let result = StatusJournal::replay(&path).unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn record_and_replay_round_trip_success() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.recordStatus");
        let cancel = CancellationToken::new();
        let (journal, handle) = StatusJournal::open(path.clone(), cancel.clone());

        journal.record("worker", "FileUpload", "Success", "fp1", "R1");
        drop(journal);
        cancel.cancel();
        let _ = handle.await;

        let replayed = StatusJournal::replay(&path).unwrap();
        assert_eq!(replayed["fp1"].reference, "R1");
        assert!(replayed["fp1"].complete);
    }

    #[tokio::test]
    async fn record_and_replay_round_trip_partial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.recordStatus");
        let cancel = CancellationToken::new();
        let (journal, handle) = StatusJournal::open(path.clone(), cancel.clone());

        let progress = UploadProgress { reference: "R2".into(), part: 3, complete: false, failed_attempts: 1 };
        let comments = serde_json::to_string(&progress).unwrap();
        journal.record("worker", "FileUpload", "Partial", "fp2", &comments);
        drop(journal);
        cancel.cancel();
        let _ = handle.await;

        let replayed = StatusJournal::replay(&path).unwrap();
        assert_eq!(replayed["fp2"].part, 3);
        assert!(!replayed["fp2"].complete);
    }

    #[tokio::test]
    async fn empty_context_id_generates_uuid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.recordStatus");
        let cancel = CancellationToken::new();
        let (journal, _handle) = StatusJournal::open(path, cancel);
        let id = journal.record("worker", "Searching", "Started", "", "");
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
