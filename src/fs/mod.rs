//! Directory search and metadata assembly for upload targets.
//!
//! This module is the File Finder component: it walks a [`Target`]'s
//! location, matches candidate files against the target's regular
//! expression, fingerprints them, and emits [`FoundFile`] records for the
//! worker pool to consume.

pub mod finder;
pub mod metadata;

pub use finder::{find_files, FoundFile};
pub use metadata::build_metadata;
