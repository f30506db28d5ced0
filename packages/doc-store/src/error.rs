//! Error types for backing stores.

use crate::DocumentId;

/// Errors a [`DocumentStore`](crate::DocumentStore) reports.
///
/// Schema errors (unknown collection, duplicate index) are distinguished
/// from transport failures so callers can tolerate the benign ones, such as
/// losing an index-creation race to another process.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database does not exist.
    #[error("no such database: {database}")]
    NoSuchDatabase { database: String },

    /// The collection does not exist.
    #[error("no such collection: {database}.{collection}")]
    NoSuchCollection {
        database: String,
        collection: String,
    },

    /// The index does not exist on the collection.
    #[error("no such index '{index}' on {collection}")]
    NoSuchIndex { collection: String, index: String },

    /// An index with this name already exists.
    #[error("index '{index}' already exists on {collection}")]
    IndexExists { collection: String, index: String },

    /// Update target does not exist.
    #[error("no document {id} in {collection}")]
    NoSuchDocument { collection: String, id: DocumentId },

    /// The document was rejected (not a map, bad primary key, ...).
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    /// Generic I/O or transport failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Generic error with message.
    #[error("{message}")]
    Other { message: String },
}

impl StoreError {
    pub fn other(message: impl Into<String>) -> Self {
        StoreError::Other {
            message: message.into(),
        }
    }

    /// Whether this is the "index already exists" schema error.
    pub fn is_index_exists(&self) -> bool {
        matches!(self, StoreError::IndexExists { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Transport(Box::new(e))
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn error_display() {
        let e = StoreError::NoSuchCollection {
            database: "db".to_string(),
            collection: "fs_files".to_string(),
        };
        assert_eq!(e.to_string(), "no such collection: db.fs_files");

        let e = StoreError::IndexExists {
            collection: "fs_chunks".to_string(),
            index: "chunk_index".to_string(),
        };
        assert!(e.to_string().contains("chunk_index"));
        assert!(e.is_index_exists());
    }

    #[test]
    fn io_error_becomes_transport() {
        let e: StoreError = std::io::Error::other("connection reset").into();
        assert!(matches!(e, StoreError::Transport(_)));
        assert!(e.to_string().contains("connection reset"));
        assert!(StdError::source(&e).is_some());
    }
}
