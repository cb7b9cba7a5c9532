//! Per-target search loop: finds files under a [`Target`]'s location and
//! feeds them to the worker pool, polling on an interval in service mode.

use tokio::sync::mpsc::Sender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Target;
use crate::fs::finder::{find_files, FoundFile};
use crate::journal::StatusJournal;
use crate::utils::errors::AgentError;

/// Spawn one task per target. The returned `JoinSet` resolves as each
/// target's loop exits; `sender` is dropped once all targets have exited,
/// closing the channel for the worker pool.
pub fn spawn_all(
    targets: Vec<Target>,
    sender: Sender<FoundFile>,
    journal: StatusJournal,
    run_as_service: bool,
    cancel: CancellationToken,
) -> JoinSet<()> {
    let mut set = JoinSet::new();
    for target in targets.into_iter().filter(|t| t.active) {
        let sender = sender.clone();
        let journal = journal.clone();
        let cancel = cancel.clone();
        set.spawn(async move {
            run_target_loop(target, sender, journal, run_as_service, cancel).await;
        });
    }
    set
}

async fn run_target_loop(
    target: Target,
    sender: Sender<FoundFile>,
    journal: StatusJournal,
    run_as_service: bool,
    cancel: CancellationToken,
) {
    loop {
        let context_id = journal.record("TargetScheduler", &target.name, "Searching", "", "");

        let result = find_files(target.clone(), sender.clone(), cancel.clone()).await;

        match &result {
            Ok(()) => {
                journal.record("TargetScheduler", &target.name, "SearchComplete", &context_id, "");
            }
            Err(AgentError::Terminating) => {
                journal.record("TargetScheduler", &target.name, "Stopped", &context_id, "");
                return;
            }
            Err(e) => {
                warn!("target {} search failed: {e}", target.name);
                journal.record(
                    "TargetScheduler",
                    &target.name,
                    "Failed",
                    &context_id,
                    &e.to_string(),
                );
            }
        }

        if !run_as_service || cancel.is_cancelled() {
            return;
        }

        if target.pollinterval == 0 {
            return;
        }

        info!("target {} sleeping {}s before next search", target.name, target.pollinterval);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(std::time::Duration::from_secs(target.pollinterval)) => {}
        }
    }
}
