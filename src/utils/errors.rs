//! Custom error types for the upload agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid filename pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("authentication error: {0}")]
    Authentication(String),

    #[error("upload error: {0}")]
    Upload(#[from] crate::upload::UploadError),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("terminating")]
    Terminating,

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
