//! Per-file upload progress and the journal's on-disk record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::errors::{AgentError, Result};

/// Progress of a single file's upload, as tracked by the recorder and
/// persisted in the journal's `Partial` comments field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Server-assigned reference; empty before the upload has started.
    #[serde(default)]
    pub reference: String,

    /// Count of parts successfully uploaded.
    #[serde(default)]
    pub part: u64,

    #[serde(default)]
    pub complete: bool,

    /// Failures observed since the last successful part.
    #[serde(default)]
    pub failed_attempts: u32,
}

/// The recorder's in-memory entry: a progress snapshot plus whether a
/// worker currently holds this fingerprint in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveProgress {
    pub progress: UploadProgress,
    pub in_progress: bool,
}

/// One line of the append-only status journal.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecordEntry {
    pub time: DateTime<Utc>,
    pub system: String,
    pub operation: String,
    pub status: String,
    pub context_id: String,
    pub comments: String,
}

impl StatusRecordEntry {
    /// Encode as a single CSV record (no header, no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(vec![]);
        writer.write_record([
            self.time.to_rfc3339(),
            self.system.clone(),
            self.operation.clone(),
            self.status.clone(),
            self.context_id.clone(),
            self.comments.clone(),
        ])?;
        writer.flush()?;
        let bytes = writer.into_inner().map_err(|e| {
            AgentError::Config(format!("journal encode error: {e}"))
        })?;
        let line = String::from_utf8(bytes)
            .map_err(|e| AgentError::Config(format!("journal encode error: {e}")))?;
        Ok(line.trim_end().to_string())
    }

    /// Decode a single CSV record previously produced by [`to_line`].
    ///
    /// [`to_line`]: StatusRecordEntry::to_line
    pub fn from_line(line: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(line.as_bytes());
        let record = reader
            .records()
            .next()
            .ok_or_else(|| AgentError::Config("empty journal line".to_string()))??;

        if record.len() != 6 {
            return Err(AgentError::Config(format!(
                "malformed journal line: expected 6 fields, got {}",
                record.len()
            )));
        }

        let time = DateTime::parse_from_rfc3339(&record[0])
            .map_err(|e| AgentError::Config(format!("bad journal timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            time,
            system: record[1].to_string(),
            operation: record[2].to_string(),
            status: record[3].to_string(),
            context_id: record[4].to_string(),
            comments: record[5].to_string(),
        })
    }
}
