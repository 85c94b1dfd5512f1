//! Durable object storage for archived masters and thumbnails.

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{CollectionId, RecordId};

pub mod fs;
#[cfg(feature = "s3")]
pub mod s3;

pub use fs::FsObjectStore;
#[cfg(feature = "s3")]
pub use s3::{S3Config, S3ObjectStore};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store the file at `source` under `key`, returning the key written.
    async fn upload(
        &self,
        source: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError>;
}

/// `masters/{collection}/{record}{.ext}`; the extension comes from the
/// uploaded file name and is lowercased.
pub fn master_key(collection_id: CollectionId, record_id: RecordId, file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("masters/{collection_id}/{record_id}{extension}")
}

pub fn thumbnail_key(record_id: RecordId) -> String {
    format!("thumbnails/{record_id}.jpg")
}

pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Rejects keys that could escape a storage root.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_deterministic_per_collection() {
        let collection = CollectionId::new();
        let record = RecordId::new();
        assert_eq!(
            master_key(collection, record, "Heat 3.MOV"),
            format!("masters/{collection}/{record}.mov")
        );
        assert_eq!(
            master_key(collection, record, "no-extension"),
            format!("masters/{collection}/{record}")
        );
        assert_eq!(thumbnail_key(record), format!("thumbnails/{record}.jpg"));
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a.MP4"), "video/mp4");
        assert_eq!(content_type_for("a.mov"), "video/quicktime");
        assert_eq!(content_type_for("thumb.jpg"), "image/jpeg");
        assert_eq!(content_type_for("weird.bin"), "application/octet-stream");
    }

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_key("masters/a/b.mp4").is_ok());
        for key in ["", "/abs", "../up", "a/../b", "a//b", "a\\b", "a/./b"] {
            assert!(validate_key(key).is_err(), "{key:?} should be rejected");
        }
    }
}
