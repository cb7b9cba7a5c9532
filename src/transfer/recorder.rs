//! In-memory admission control: at most one worker may hold a fingerprint
//! in flight at a time.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::transfer::progress::{LiveProgress, UploadProgress};

/// Tracks, per fingerprint, whether an upload is in flight and its last
/// known progress. Backed by a single mutex so the admission decision and
/// the state mutation happen atomically.
#[derive(Default)]
pub struct TransferRecorder {
    entries: Mutex<HashMap<String, LiveProgress>>,
}

impl TransferRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the recorder from replayed journal state. Existing entries for
    /// the same fingerprint are overwritten.
    pub fn seed(&self, seeded: HashMap<String, UploadProgress>) {
        let mut entries = self.entries.lock().unwrap();
        for (fingerprint, progress) in seeded {
            entries.insert(fingerprint, LiveProgress { progress, in_progress: false });
        }
    }

    /// Attempt to admit `fingerprint` for upload. Returns the progress the
    /// caller should resume from, and whether admission succeeded.
    pub fn start_record(
        &self,
        fingerprint: &str,
        proposed: UploadProgress,
    ) -> (UploadProgress, bool) {
        let mut entries = self.entries.lock().unwrap();

        match entries.get_mut(fingerprint) {
            None => {
                let in_progress = !proposed.complete;
                entries.insert(
                    fingerprint.to_string(),
                    LiveProgress { progress: proposed.clone(), in_progress },
                );
                (proposed, true)
            }
            Some(entry) if entry.in_progress => (entry.progress.clone(), false),
            Some(entry) if entry.progress.complete => (entry.progress.clone(), false),
            Some(entry) => {
                entry.in_progress = true;
                (entry.progress.clone(), true)
            }
        }
    }

    /// Record the outcome of an upload attempt. Returns `true` if the
    /// caller should re-enqueue the file for another attempt.
    pub fn stop_record(&self, fingerprint: &str, final_progress: UploadProgress) -> bool {
        let mut entries = self.entries.lock().unwrap();

        let Some(entry) = entries.get(fingerprint) else {
            return false;
        };
        if !entry.in_progress {
            return false;
        }

        if final_progress.reference.is_empty() && entry.progress.reference.is_empty() {
            entries.remove(fingerprint);
            return false;
        }

        if final_progress.complete {
            entries.insert(
                fingerprint.to_string(),
                LiveProgress { progress: final_progress, in_progress: false },
            );
            return false;
        }

        if final_progress.failed_attempts > 2 {
            entries.remove(fingerprint);
            return false;
        }

        entries.insert(
            fingerprint.to_string(),
            LiveProgress { progress: final_progress, in_progress: false },
        );
        true
    }
}
