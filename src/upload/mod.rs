//! The chunked upload protocol: single-shot for small files, start/part/complete
//! for everything over the configured chunk size.

use std::collections::HashMap;
use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncSeekExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::fs::metadata::MetadataValue;
use crate::transfer::copy::{stream_bounded, CopyError};
use crate::transfer::progress::UploadProgress;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    ServerStatus { status: u16, body: String },

    #[error("part checksum mismatch: expected {expected}, server reported {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("streaming copy failed: {0}")]
    Copy(#[from] CopyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file missing: {0}")]
    MissingFile(String),

    #[error("response decode error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Server response from the single-shot and complete endpoints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileMetadata {
    pub data_store_ref: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    md5_checksum: String,
}

/// Drives the chunked/single-shot upload protocol against `endpoint`.
pub struct UploadClient {
    http: Client,
    endpoint: String,
    chunk_size: u64,
}

impl UploadClient {
    pub fn new(http: Client, endpoint: impl Into<String>, chunk_size: u64) -> Self {
        Self { http, endpoint: endpoint.into(), chunk_size }
    }

    /// Upload `path` (a file of `size` bytes), resuming from `progress` if
    /// it already has a reference, and returning the final progress.
    ///
    /// `progress.complete == true` on entry short-circuits to a no-op
    /// success, matching the protocol's resume semantics.
    pub async fn upload(
        &self,
        path: &Path,
        size: u64,
        metadata: HashMap<String, MetadataValue>,
        mut progress: UploadProgress,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadProgress, (UploadProgress, UploadError)> {
        if progress.complete {
            return Ok(progress);
        }

        if size <= self.chunk_size {
            return self.upload_single_shot(path, size, metadata, token).await.map_err(|e| {
                progress.failed_attempts += 1;
                (progress.clone(), e)
            });
        }

        self.upload_chunked(path, size, metadata, progress, token, cancel).await
    }

    async fn upload_single_shot(
        &self,
        path: &Path,
        size: u64,
        metadata: HashMap<String, MetadataValue>,
        token: &str,
    ) -> Result<UploadProgress, UploadError> {
        let url = format!("{}/api/v1/files?size={size}", self.endpoint);
        let file_bytes = tokio::fs::read(path)
            .await
            .map_err(|_| UploadError::MissingFile(path.display().to_string()))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());

        let metadata_json = serde_json::to_string(&flatten(&metadata))?;
        let form = Form::new()
            .text("metadata", metadata_json)
            .part("input_file", Part::bytes(file_bytes).file_name(file_name));

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let file_metadata = decode_ok::<FileMetadata>(response).await?;
        Ok(UploadProgress {
            reference: file_metadata.data_store_ref,
            part: 0,
            complete: true,
            failed_attempts: 0,
        })
    }

    async fn upload_chunked(
        &self,
        path: &Path,
        size: u64,
        metadata: HashMap<String, MetadataValue>,
        mut progress: UploadProgress,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadProgress, (UploadProgress, UploadError)> {
        let (notifiable, non_notifiable): (HashMap<_, _>, HashMap<_, _>) =
            metadata.into_iter().partition(|(_, v)| v.notify);

        if progress.reference.is_empty() {
            match self.start_parts(&non_notifiable, token).await {
                Ok(reference) => progress.reference = reference,
                Err(e) => {
                    progress.failed_attempts += 1;
                    return Err((progress, e));
                }
            }
        }

        let number_of_parts = size.div_ceil(self.chunk_size).max(1);

        while progress.part < number_of_parts {
            let part_index = progress.part;
            let is_last = part_index + 1 == number_of_parts;
            let remainder = size % self.chunk_size;
            let part_size = if is_last && remainder != 0 { remainder } else { self.chunk_size };

            match self
                .upload_part(path, &progress.reference, part_index, part_size, token, cancel)
                .await
            {
                Ok(()) => {
                    progress.failed_attempts = 0;
                    progress.part += 1;
                }
                Err(e) => {
                    progress.failed_attempts += 1;
                    return Err((progress, e));
                }
            }
        }

        match self.complete_upload(&progress.reference, &notifiable, token).await {
            Ok(file_metadata) => {
                progress.reference = file_metadata.data_store_ref;
                progress.complete = true;
                Ok(progress)
            }
            Err(e) => {
                progress.failed_attempts += 1;
                Err((progress, e))
            }
        }
    }

    async fn start_parts(
        &self,
        metadata: &HashMap<String, MetadataValue>,
        token: &str,
    ) -> Result<String, UploadError> {
        let url = format!("{}/api/v1/files/chunked", self.endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&flatten(metadata))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::ServerStatus { status: status.as_u16(), body });
        }
        Ok(body)
    }

    async fn upload_part(
        &self,
        path: &Path,
        reference: &str,
        part_index: u64,
        part_size: u64,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|_| UploadError::MissingFile(path.display().to_string()))?;
        file.seek(SeekFrom::Start(part_index * self.chunk_size)).await?;

        let mut buf: Vec<u8> = Vec::with_capacity(part_size as usize);
        let (local_md5, copy_result) = stream_bounded(cancel, &mut buf, file, part_size).await;
        copy_result?;

        let part_number = part_index + 1;
        let url = format!(
            "{}/api/v1/files/chunked/{reference}/part/{part_number}?size={part_size}",
            self.endpoint
        );

        let form = Form::new()
            .part("input_file", Part::bytes(buf).file_name("part"))
            .text("md5hash", local_md5.clone());

        let response = self.http.post(&url).bearer_auth(token).multipart(form).send().await?;
        let part_response = decode_ok::<PartResponse>(response).await?;

        if part_response.md5_checksum != local_md5 {
            return Err(UploadError::ChecksumMismatch {
                expected: local_md5,
                actual: part_response.md5_checksum,
            });
        }

        debug!("uploaded part {part_number} of {reference} ({part_size} bytes)");
        Ok(())
    }

    async fn complete_upload(
        &self,
        reference: &str,
        notifiable: &HashMap<String, MetadataValue>,
        token: &str,
    ) -> Result<FileMetadata, UploadError> {
        let url = format!("{}/api/v1/files/chunked/{reference}/complete", self.endpoint);
        let metadata_json = serde_json::to_string(&flatten(notifiable))?;

        let form = Form::new().text("metadata", metadata_json).text("checksums", "{}");

        let response = self.http.post(&url).bearer_auth(token).multipart(form).send().await?;
        decode_ok::<FileMetadata>(response).await
    }
}

fn flatten(metadata: &HashMap<String, MetadataValue>) -> HashMap<String, String> {
    metadata.iter().map(|(k, v)| (k.clone(), v.value.clone())).collect()
}

async fn decode_ok<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, UploadError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(UploadError::ServerStatus { status: status.as_u16(), body });
    }
    serde_json::from_str(&body).map_err(|e| {
        warn!("failed to decode response body: {body}");
        UploadError::Json(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_metadata() -> HashMap<String, MetadataValue> {
        let mut m = HashMap::new();
        m.insert(
            "tenant".to_string(),
            MetadataValue { value: "acme".into(), immutable: true, notify: false },
        );
        m
    }

    #[tokio::test]
    async fn single_shot_upload_marks_complete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data_store_ref": "ref-123",
                "metadata": {}
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let file_path = dir.path().join("small.txt");
        tokio::fs::write(&file_path, b"hello world").await.unwrap();

        let client = UploadClient::new(Client::new(), server.uri(), 1_000_000);
        let result = client
            .upload(
                &file_path,
                11,
                sample_metadata(),
                UploadProgress::default(),
                "tok",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.complete);
        assert_eq!(result.reference, "ref-123");
    }

    #[tokio::test]
    async fn complete_progress_short_circuits() {
        let client = UploadClient::new(Client::new(), "http://unused".to_string(), 10);
        let progress = UploadProgress { reference: "r".into(), part: 1, complete: true, failed_attempts: 0 };
        let dir = tempfile::TempDir::new().unwrap();
        let file_path = dir.path().join("f.txt");
        tokio::fs::write(&file_path, b"x").await.unwrap();

        let result = client
            .upload(&file_path, 1, sample_metadata(), progress.clone(), "tok", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, progress);
    }

    #[tokio::test]
    async fn chunked_upload_exact_multiple_uses_full_chunk_for_last_part() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/files/chunked"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ref-xyz"))
            .mount(&server)
            .await;

        let expected_md5 = format!("{:x}", md5::compute([b'a'; 10]));
        Mock::given(method("POST"))
            .and(path("/api/v1/files/chunked/ref-xyz/part/1"))
            .and(wiremock::matchers::query_param("size", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "md5_checksum": expected_md5
            })))
            .mount(&server)
            .await;

        // The second (last) part is also a full 10 bytes, since 20 is an exact
        // multiple of the 10-byte chunk size: the remainder is 0, and the last
        // part must still use the full chunk size rather than a zero-size part.
        Mock::given(method("POST"))
            .and(path("/api/v1/files/chunked/ref-xyz/part/2"))
            .and(wiremock::matchers::query_param("size", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "md5_checksum": expected_md5
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/api/v1/files/chunked/ref-xyz/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data_store_ref": "ref-final",
                "metadata": {}
            })))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let file_path = dir.path().join("big.bin");
        tokio::fs::write(&file_path, vec![b'a'; 20]).await.unwrap();

        let client = UploadClient::new(Client::new(), server.uri(), 10);
        let result = client
            .upload(
                &file_path,
                20,
                sample_metadata(),
                UploadProgress::default(),
                "tok",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.complete);
        assert_eq!(result.reference, "ref-final");
    }

    #[test]
    fn last_part_size_is_full_chunk_on_exact_multiple() {
        let size: u64 = 20;
        let chunk_size: u64 = 10;
        let number_of_parts = size.div_ceil(chunk_size).max(1);
        assert_eq!(number_of_parts, 2);

        let remainder = size % chunk_size;
        for part_index in 0..number_of_parts {
            let is_last = part_index + 1 == number_of_parts;
            let part_size = if is_last && remainder != 0 { remainder } else { chunk_size };
            assert_eq!(part_size, 10);
        }
    }
}
