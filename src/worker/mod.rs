//! Bounded-concurrency consumer of found files: admits each file to the
//! recorder, drives the upload protocol, and reflects the outcome in the
//! journal and process exit code.

use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fs::finder::FoundFile;
use crate::fs::metadata::build_metadata;
use crate::journal::StatusJournal;
use crate::transfer::progress::UploadProgress;
use crate::transfer::recorder::TransferRecorder;
use crate::upload::UploadClient;

const PARTIAL_RETRY_DELAY: Duration = Duration::from_secs(120);

pub const EXIT_UPLOAD_FAILED: i32 = 2;

/// Shared state every worker and the re-enqueue task needs a handle to.
pub struct WorkerContext {
    pub recorder: Arc<TransferRecorder>,
    pub journal: StatusJournal,
    pub upload: Arc<UploadClient>,
    pub token: String,
    pub cancel: CancellationToken,
    pub exit_code: Arc<AtomicI32>,
}

/// Run `worker_count` (clamped to at least one) workers draining `receiver`
/// until the channel closes or cancellation fires.
///
/// `requeue` is the sender used to schedule a partial-progress retry after
/// the 120-second delay. It must be `None` for a single, non-service pass:
/// if a worker held a live sender for the whole pool's lifetime, the
/// channel's sender count would never reach zero, and the target
/// scheduler's own "drop my sender when search completes" signal could
/// never close the channel, so workers would block forever. In service
/// mode the pool keeps running until cancellation regardless, so holding a
/// requeue sender for that lifetime is safe.
pub async fn run_pool(
    worker_count: usize,
    receiver: Receiver<FoundFile>,
    requeue: Option<Sender<FoundFile>>,
    ctx: Arc<WorkerContext>,
) {
    let worker_count = worker_count.max(1);
    let receiver = Arc::new(Mutex::new(receiver));

    let mut handles = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let receiver = receiver.clone();
        let requeue = requeue.clone();
        let ctx = ctx.clone();
        handles.push(tokio::spawn(async move {
            worker_loop(id, receiver, requeue, ctx).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<Mutex<Receiver<FoundFile>>>,
    requeue: Option<Sender<FoundFile>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let found = {
            let mut guard = receiver.lock().await;
            tokio::select! {
                _ = ctx.cancel.cancelled() => None,
                item = guard.recv() => item,
            }
        };

        let Some(found) = found else {
            info!("worker {id} exiting: channel closed or cancelled");
            return;
        };

        process_one(found, requeue.as_ref(), &ctx).await;
    }
}

async fn process_one(found: FoundFile, requeue: Option<&Sender<FoundFile>>, ctx: &WorkerContext) {
    let fingerprint = found.fingerprint();

    let (resumed, admitted) = ctx.recorder.start_record(&fingerprint, found.progress.clone());
    if !admitted {
        ctx.journal.record("Worker", "FileUpload", "Skipped", &fingerprint, "already in flight or complete");
        return;
    }

    let context_id = ctx.journal.record("Worker", "FileUpload", "Started", &fingerprint, "");

    let metadata = build_metadata(&found, &found.target);
    let upload_result = ctx
        .upload
        .upload(&found.uri, found.size, metadata, resumed, &ctx.token, &ctx.cancel)
        .await;

    match upload_result {
        Ok(progress) => on_success(&found, progress, &context_id, ctx).await,
        Err((progress, err)) => on_failure(&found, progress, err, &context_id, requeue, ctx).await,
    }
}

async fn on_success(
    found: &FoundFile,
    progress: UploadProgress,
    context_id: &str,
    ctx: &WorkerContext,
) {
    let fingerprint = found.fingerprint();
    ctx.recorder.stop_record(&fingerprint, progress.clone());
    ctx.journal.record("Worker", "FileUpload", "Success", context_id, &progress.reference);

    if !found.target.onsuccess.trim().is_empty() {
        if let Err(e) = run_success_hook(&found.target.onsuccess, found.uri.as_path(), &progress.reference).await
        {
            warn!("success hook failed for {}: {e}", found.uri.display());
            ctx.journal.record("Worker", "SuccessHook", "Failed", context_id, &e.to_string());
        }
    }
}

async fn on_failure(
    found: &FoundFile,
    progress: UploadProgress,
    err: crate::upload::UploadError,
    context_id: &str,
    requeue: Option<&Sender<FoundFile>>,
    ctx: &WorkerContext,
) {
    let fingerprint = found.fingerprint();
    let still_partial = ctx.recorder.stop_record(&fingerprint, progress.clone());

    ctx.exit_code.fetch_max(EXIT_UPLOAD_FAILED, Ordering::SeqCst);

    if !still_partial {
        ctx.journal.record("Worker", "FileUpload", "Failed", context_id, &err.to_string());
        return;
    }

    let comments = serde_json::to_string(&progress).unwrap_or_default();
    ctx.journal.record("Worker", "FileUpload", "Partial", context_id, &comments);

    if ctx.cancel.is_cancelled() {
        return;
    }

    let Some(requeue) = requeue else {
        return;
    };

    let mut retry_file = found.clone();
    retry_file.progress = progress;

    let sender = requeue.clone();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(PARTIAL_RETRY_DELAY) => {
                let _ = sender.send(retry_file).await;
            }
        }
    });
}

async fn run_success_hook(template: &str, file: &Path, storage_ref: &str) -> std::io::Result<()> {
    let command_line = template
        .replace("$file", &file.display().to_string())
        .replace("$storageref", storage_ref);

    let status = Command::new("sh").arg("-c").arg(command_line).status().await?;

    if !status.success() {
        return Err(std::io::Error::other(format!("hook exited with {status}")));
    }
    Ok(())
}
