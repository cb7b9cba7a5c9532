//! Configuration management for the upload agent.
//!
//! Loads the per-client configuration from the `<clientid>.json` file
//! described by the wire format in the external interfaces section of the
//! spec: a JSON document naming the client's credentials, endpoint, and the
//! `targets` it should search.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{AgentError, Result};

/// Chunk size used by the chunked upload protocol when none is configured.
/// Matches the fixed 8,000,000-byte chunk size of the original implementation.
pub fn default_chunk_size() -> u64 {
    8_000_000
}

fn default_concurrent_uploads() -> usize {
    1
}

/// Root configuration for a single client ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "clientid")]
    pub client_id: String,

    pub secret: String,

    #[serde(rename = "tokenurl")]
    pub token_url: String,

    pub endpoint: String,

    #[serde(rename = "concurrentuploads", default = "default_concurrent_uploads")]
    pub concurrent_uploads: usize,

    #[serde(rename = "runasservice", default)]
    pub run_as_service: bool,

    #[serde(rename = "chunksize", default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default)]
    pub targets: Vec<Target>,
}

/// A single search target: where to look, what to match, and how to label
/// what's found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub active: bool,

    #[serde(default)]
    pub tenant: String,

    #[serde(default)]
    pub location: PathBuf,

    #[serde(default)]
    pub recursive: bool,

    #[serde(default = "default_match")]
    pub r#match: String,

    #[serde(default)]
    pub datatype: String,

    #[serde(default)]
    pub dataformat: String,

    #[serde(default)]
    pub pathencodedmetadatatags: Vec<PathEncodedMetadataTag>,

    #[serde(default)]
    pub statictags: Vec<StaticTag>,

    #[serde(default)]
    pub pollinterval: u64,

    #[serde(default)]
    pub onsuccess: String,
}

fn default_match() -> String {
    ".*".to_string()
}

impl Default for Target {
    fn default() -> Self {
        Self {
            name: String::new(),
            active: false,
            tenant: String::new(),
            location: PathBuf::new(),
            recursive: false,
            r#match: default_match(),
            datatype: String::new(),
            dataformat: String::new(),
            pathencodedmetadatatags: Vec::new(),
            statictags: Vec::new(),
            pollinterval: 0,
            onsuccess: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEncodedMetadataTag {
    pub tag: String,
    pub r#match: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticTag {
    pub tag: String,
    pub value: String,
}

impl Config {
    /// Load configuration for `client_id` from `<client_id>.json` in the
    /// current directory.
    pub fn load(client_id: &str) -> Result<Self> {
        Self::from_file(Path::new(&format!("{client_id}.json")))
    }

    /// Load configuration from an explicit JSON file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("reading {}: {e}", path.display())))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| AgentError::Config(format!("parsing {}: {e}", path.display())))?;
        Ok(config)
    }

    /// Journal file path for this client: `<clientid>.recordStatus`.
    pub fn journal_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.recordStatus", self.client_id))
    }

    /// Restrict `targets` to those named in `names`, forcing them active.
    /// If `names` is empty, targets are left untouched (the `active` flag on
    /// each target governs whether Auto mode searches it).
    pub fn filter_targets(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let wanted: std::collections::HashSet<&str> = names.iter().map(String::as_str).collect();
        self.targets.retain_mut(|t| {
            let keep = wanted.contains(t.name.as_str());
            if keep {
                t.active = true;
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let json = r#"{
            "clientid": "acme",
            "secret": "s3cr3t",
            "tokenurl": "https://auth.example.com/token",
            "endpoint": "https://store.example.com",
            "concurrentuploads": 4,
            "runasservice": true,
            "targets": [
                {
                    "name": "logs",
                    "active": true,
                    "tenant": "t1",
                    "location": "/var/log/app",
                    "recursive": true,
                    "match": "^.*\\.log$",
                    "datatype": "log",
                    "dataformat": "text",
                    "pollinterval": 60,
                    "onsuccess": "",
                    "pathencodedmetadatatags": [{"tag": "date", "match": "(\\d{4}-\\d{2}-\\d{2})"}],
                    "statictags": [{"tag": "env", "value": "prod"}]
                }
            ]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.client_id, "acme");
        assert_eq!(config.concurrent_uploads, 4);
        assert!(config.run_as_service);
        assert_eq!(config.chunk_size, default_chunk_size());
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].statictags[0].value, "prod");
    }

    #[test]
    fn filter_targets_forces_active() {
        let mut config = Config {
            client_id: "acme".into(),
            secret: String::new(),
            token_url: String::new(),
            endpoint: String::new(),
            concurrent_uploads: 1,
            run_as_service: false,
            chunk_size: default_chunk_size(),
            targets: vec![
                Target { name: "a".into(), active: false, ..Default::default() },
                Target { name: "b".into(), active: false, ..Default::default() },
            ],
        };
        config.filter_targets(&["b".to_string()]);
        assert_eq!(config.targets.len(), 1);
        assert_eq!(config.targets[0].name, "b");
        assert!(config.targets[0].active);
    }

    #[test]
    fn journal_path_matches_client_id() {
        let config = Config {
            client_id: "acme".into(),
            secret: String::new(),
            token_url: String::new(),
            endpoint: String::new(),
            concurrent_uploads: 1,
            run_as_service: false,
            chunk_size: default_chunk_size(),
            targets: vec![],
        };
        assert_eq!(config.journal_path(), PathBuf::from("acme.recordStatus"));
    }
}
