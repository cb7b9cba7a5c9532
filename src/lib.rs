//! Upload Agent Library
//!
//! A resumable, resilient file-upload agent: discovers files under
//! declarative targets, attaches metadata, and transfers them in ordered
//! chunks to a remote content store, journaling progress so interrupted
//! transfers resume without duplication.

pub mod auth;
pub mod cli;
pub mod config;
pub mod fs;
pub mod journal;
pub mod supervisor;
pub mod target;
pub mod transfer;
pub mod upload;
pub mod utils;
pub mod worker;

pub use config::Config;
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
