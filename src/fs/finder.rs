//! Directory walk, filename matching, and content fingerprinting.

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::Target;
use crate::transfer::progress::UploadProgress;
use crate::utils::errors::{AgentError, Result};

/// A file discovered under a target's location, ready for upload.
#[derive(Debug, Clone)]
pub struct FoundFile {
    pub uri: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub hash: String,
    pub target: Target,
    pub progress: UploadProgress,
}

impl FoundFile {
    /// The recorder/journal key: `sha256(content) + "~" + absolute_path`.
    pub fn fingerprint(&self) -> String {
        format!("{}~{}", self.hash, self.uri.display())
    }
}

const READ_BUFFER: usize = 64 * 1024;

fn compute_sha256(path: &std::path::Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Walk `target.location`, matching files against `target.match`, and emit a
/// [`FoundFile`] for each match on `sender`.
///
/// Runs the (synchronous) directory walk and hashing inside a blocking task;
/// cancellation is polled between files so a stop request is honored without
/// waiting for a large walk to finish.
pub async fn find_files(
    target: Target,
    sender: Sender<FoundFile>,
    cancel: CancellationToken,
) -> Result<()> {
    let task_target = target.clone();
    tokio::task::spawn_blocking(move || walk_blocking(task_target, sender, cancel))
        .await
        .map_err(|e| AgentError::Config(format!("finder task panicked: {e}")))?
}

fn walk_blocking(
    target: Target,
    sender: Sender<FoundFile>,
    cancel: CancellationToken,
) -> Result<()> {
    let pattern = Regex::new(&target.r#match)?;
    let root = &target.location;

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if !entry.file_type().is_dir() {
            return true;
        }
        // The root is always descended; any other directory is skipped
        // when the target isn't recursive.
        entry.path() == root || target.recursive
    });

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(AgentError::Terminating);
        }

        let entry = entry.map_err(|e| {
            AgentError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("walk error")
            }))
        })?;

        if entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path();
        let path_str = path.to_string_lossy();
        if !pattern.is_match(&path_str) {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| {
            AgentError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::other("metadata error")
            }))
        })?;

        let hash = compute_sha256(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();

        let found = FoundFile {
            uri: path.to_path_buf(),
            size: metadata.len(),
            modified,
            hash,
            target: target.clone(),
            progress: UploadProgress::default(),
        };

        debug!("found {} ({} bytes)", found.uri.display(), found.size);
        if !blocking_send_or_cancel(&sender, found, &cancel) {
            return Err(AgentError::Terminating);
        }
    }

    Ok(())
}

/// Send `item` on a bounded channel from blocking code, preferring
/// cancellation when both the send and the cancellation are ready.
fn blocking_send_or_cancel(
    sender: &Sender<FoundFile>,
    mut item: FoundFile,
    cancel: &CancellationToken,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        match sender.try_send(item) {
            Ok(()) => return true,
            Err(tokio::sync::mpsc::error::TrySendError::Full(returned)) => {
                item = returned;
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => return false,
        }
    }
}

/// Epoch helper retained for tests that need a stable mtime.
#[allow(dead_code)]
pub fn unix_epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn target(dir: &std::path::Path, recursive: bool, pattern: &str) -> Target {
        Target {
            name: "t".into(),
            active: true,
            tenant: "tenant".into(),
            location: dir.to_path_buf(),
            recursive,
            r#match: pattern.into(),
            datatype: "dt".into(),
            dataformat: "df".into(),
            pathencodedmetadatatags: vec![],
            statictags: vec![],
            pollinterval: 0,
            onsuccess: String::new(),
        }
    }

    #[tokio::test]
    async fn finds_matching_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.abc"), b"hello").unwrap();
        fs::write(dir.path().join("a.txt"), b"skip me").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let t = target(dir.path(), true, r"^.*\.abc$");
        find_files(t, tx, CancellationToken::new()).await.unwrap();

        let found = rx.recv().await.unwrap();
        assert!(found.uri.ends_with("a.abc"));
        assert_eq!(found.size, 5);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn non_recursive_walk_skips_subdirectories() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.abc"), b"one").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.abc"), b"two").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let t = target(dir.path(), false, r"^.*\.abc$");
        find_files(t, tx, CancellationToken::new()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.uri.ends_with("a.abc"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_is_terminating_not_an_error() {
        let dir = TempDir::new().unwrap();
        for i in 0..50 {
            fs::write(dir.path().join(format!("{i}.abc")), b"x").unwrap();
        }
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let t = target(dir.path(), true, r"^.*\.abc$");
        let result = find_files(t, tx, cancel).await;
        assert!(matches!(result, Err(AgentError::Terminating)));
    }

    #[test]
    fn fingerprint_combines_hash_and_path() {
        let found = FoundFile {
            uri: PathBuf::from("/a/b.txt"),
            size: 1,
            modified: Utc::now(),
            hash: "deadbeef".into(),
            target: target(std::path::Path::new("/a"), true, ".*"),
            progress: UploadProgress::default(),
        };
        assert_eq!(found.fingerprint(), "deadbeef~/a/b.txt");
    }
}
