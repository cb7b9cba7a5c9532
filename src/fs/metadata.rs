//! Metadata assembly for a found file.

use regex::Regex;
use std::collections::HashMap;

use crate::config::Target;
use crate::fs::finder::FoundFile;

/// A single metadata entry: its value plus whether it may change later and
/// whether it should be withheld until completion of a chunked upload.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataValue {
    pub value: String,
    pub immutable: bool,
    pub notify: bool,
}

impl MetadataValue {
    fn fixed(value: impl Into<String>) -> Self {
        Self { value: value.into(), immutable: true, notify: false }
    }
}

/// Assemble the full metadata map for `found`: the fixed descriptive fields,
/// the target's static tags, then its path-encoded tags.
pub fn build_metadata(found: &FoundFile, target: &Target) -> HashMap<String, MetadataValue> {
    let mut metadata = HashMap::new();

    metadata.insert("tenant".to_string(), MetadataValue::fixed(&target.tenant));
    metadata.insert("datatype".to_string(), MetadataValue::fixed(&target.datatype));
    metadata.insert("dataformat".to_string(), MetadataValue::fixed(&target.dataformat));
    metadata.insert(
        "original-filename".to_string(),
        MetadataValue::fixed(
            found
                .uri
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        ),
    );
    metadata.insert("source_host".to_string(), MetadataValue::fixed(source_host()));
    metadata.insert("file_size".to_string(), MetadataValue::fixed(found.size.to_string()));
    metadata.insert(
        "last_modified".to_string(),
        MetadataValue::fixed(found.modified.to_rfc3339()),
    );
    metadata.insert("sha256".to_string(), MetadataValue::fixed(&found.hash));

    for tag in &target.statictags {
        metadata.insert(tag.tag.clone(), MetadataValue::fixed(&tag.value));
    }

    let uri = found.uri.to_string_lossy();
    for tag in &target.pathencodedmetadatatags {
        let Ok(re) = Regex::new(&tag.r#match) else {
            continue;
        };
        let Some(caps) = re.captures(&uri) else {
            continue;
        };
        let Some(group) = caps.get(1) else {
            continue;
        };
        metadata.insert(
            tag.tag.clone(),
            MetadataValue { value: group.as_str().to_string(), immutable: false, notify: false },
        );
    }

    metadata
}

fn source_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PathEncodedMetadataTag, StaticTag};
    use crate::transfer::progress::UploadProgress;
    use chrono::Utc;
    use std::path::PathBuf;

    fn sample_target() -> Target {
        Target {
            name: "t".into(),
            active: true,
            tenant: "acme".into(),
            location: PathBuf::from("/data"),
            recursive: true,
            r#match: ".*".into(),
            datatype: "log".into(),
            dataformat: "text".into(),
            pathencodedmetadatatags: vec![PathEncodedMetadataTag {
                tag: "date".into(),
                r#match: r"(\d{4}-\d{2}-\d{2})".into(),
            }],
            statictags: vec![StaticTag { tag: "env".into(), value: "prod".into() }],
            pollinterval: 0,
            onsuccess: String::new(),
        }
    }

    fn sample_found() -> FoundFile {
        FoundFile {
            uri: PathBuf::from("/data/2024-01-02/report.log"),
            size: 42,
            modified: Utc::now(),
            hash: "abc123".into(),
            target: sample_target(),
            progress: UploadProgress::default(),
        }
    }

    #[test]
    fn fixed_fields_are_immutable() {
        let found = sample_found();
        let metadata = build_metadata(&found, &found.target);
        assert!(metadata["tenant"].immutable);
        assert_eq!(metadata["tenant"].value, "acme");
        assert_eq!(metadata["file_size"].value, "42");
    }

    #[test]
    fn static_tags_are_immutable() {
        let found = sample_found();
        let metadata = build_metadata(&found, &found.target);
        assert!(metadata["env"].immutable);
        assert_eq!(metadata["env"].value, "prod");
    }

    #[test]
    fn path_encoded_tags_use_first_capture_group() {
        let found = sample_found();
        let metadata = build_metadata(&found, &found.target);
        let date = &metadata["date"];
        assert!(!date.immutable);
        assert_eq!(date.value, "2024-01-02");
    }

    #[test]
    fn path_encoded_tag_without_capture_group_is_skipped() {
        let mut found = sample_found();
        found.target.pathencodedmetadatatags = vec![PathEncodedMetadataTag {
            tag: "year".into(),
            r#match: r"\d{4}".into(),
        }];
        let metadata = build_metadata(&found, &found.target);
        assert!(!metadata.contains_key("year"));
    }
}
