//! Bucket configuration.
//!
//! A `BucketConfig` carries every naming override and tuning knob of a
//! bucket. All fields have defaults, so a JSON config only needs the fields
//! it changes:
//!
//! ```json
//! {"bucket_name": "media", "chunk_size": 1048576, "max_concurrent_writes": 8}
//! ```

use std::path::Path;

use regrid_doc_store::CollectionOptions;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default chunk size: 255 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Default cap on chunk writes in flight during a concurrent upload.
pub const DEFAULT_MAX_CONCURRENT_WRITES: usize = 16;

/// Naming and tuning for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    /// Prefix shared by the bucket's collections.
    pub bucket_name: String,
    /// Files collection suffix; the collection is `{bucket_name}_{files_table_name}`.
    pub files_table_name: String,
    /// Chunks collection suffix; the collection is `{bucket_name}_{chunks_table_name}`.
    pub chunks_table_name: String,
    pub file_index: String,
    pub file_prefix_index: String,
    pub chunk_index: String,
    /// Bytes per chunk for new uploads.
    pub chunk_size: usize,
    /// Forwarded to the store when the bucket's collections are created.
    pub table_create_options: CollectionOptions,
    pub max_concurrent_writes: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bucket_name: "fs".to_string(),
            files_table_name: "files".to_string(),
            chunks_table_name: "chunks".to_string(),
            file_index: "file_index".to_string(),
            file_prefix_index: "prefix_index".to_string(),
            chunk_index: "chunk_index".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            table_create_options: CollectionOptions::default(),
            max_concurrent_writes: DEFAULT_MAX_CONCURRENT_WRITES,
        }
    }
}

impl BucketConfig {
    /// Config for a named bucket with every other field defaulted.
    pub fn named(bucket_name: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_max_concurrent_writes(mut self, max: usize) -> Self {
        self.max_concurrent_writes = max;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BucketConfig = serde_json::from_str(json).map_err(|e| Error::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// Name of the files collection.
    pub fn files_collection(&self) -> String {
        format!("{}_{}", self.bucket_name, self.files_table_name)
    }

    /// Name of the chunks collection.
    pub fn chunks_collection(&self) -> String {
        format!("{}_{}", self.bucket_name, self.chunks_table_name)
    }

    /// Reject configs no bucket can work with.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("bucket_name", &self.bucket_name),
            ("files_table_name", &self.files_table_name),
            ("chunks_table_name", &self.chunks_table_name),
            ("file_index", &self.file_index),
            ("file_prefix_index", &self.file_prefix_index),
            ("chunk_index", &self.chunk_index),
        ];
        for (field, value) in names {
            if value.is_empty() {
                return Err(Error::Config {
                    message: format!("{} must not be empty", field),
                });
            }
        }
        if self.file_index == self.file_prefix_index {
            return Err(Error::Config {
                message: "file_index and file_prefix_index must differ".to_string(),
            });
        }
        if let Some(problem) = chunk_size_problem(self.chunk_size) {
            return Err(Error::Config {
                message: format!("chunk_size {}", problem),
            });
        }
        if self.max_concurrent_writes == 0 {
            return Err(Error::Config {
                message: "max_concurrent_writes must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Why a chunk size is unusable, if it is.
///
/// Chunk sizes are stored as 64-bit signed integers.
pub(crate) fn chunk_size_problem(chunk_size: usize) -> Option<&'static str> {
    if chunk_size == 0 {
        Some("must be positive")
    } else if i64::try_from(chunk_size).is_err() {
        Some("does not fit in a stored integer")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regrid_doc_store::Durability;

    #[test]
    fn defaults_match_collection_naming() {
        let config = BucketConfig::default();
        assert_eq!(config.files_collection(), "fs_files");
        assert_eq!(config.chunks_collection(), "fs_chunks");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = BucketConfig::from_json_str(
            r#"{
                "bucket_name": "media",
                "chunk_size": 4,
                "table_create_options": {"replicas": 3, "durability": "soft"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.files_collection(), "media_files");
        assert_eq!(config.chunk_size, 4);
        assert_eq!(config.file_prefix_index, "prefix_index");
        assert_eq!(config.table_create_options.replicas, Some(3));
        assert_eq!(
            config.table_create_options.durability,
            Some(Durability::Soft)
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = BucketConfig::from_json_str(r#"{"chunk_size": 0}"#).unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn huge_chunk_sizes_are_checked() {
        BucketConfig::default()
            .with_chunk_size(usize::MAX >> 1)
            .validate()
            .unwrap();

        #[cfg(target_pointer_width = "64")]
        {
            let err = BucketConfig::default()
                .with_chunk_size(usize::MAX)
                .validate()
                .unwrap_err();
            assert!(matches!(err, Error::Config { .. }));
            assert!(err.to_string().contains("chunk_size"));
        }
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let err = BucketConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn clashing_index_names_are_rejected() {
        let mut config = BucketConfig::named("x");
        config.file_prefix_index = config.file_index.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.json");
        let config = BucketConfig::named("photos").with_chunk_size(1024);
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        assert_eq!(BucketConfig::from_json_file(&path).unwrap(), config);
        assert!(BucketConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
