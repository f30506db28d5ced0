//! Error types for buckets and upload streams.

use regrid_doc_store::{DocumentId, StoreError};

use crate::document::DocumentError;
use crate::path::PathError;

/// Broad category of an [`Error`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The API was called out of order or with bad arguments.
    Usage,
    /// Collection or index provisioning failed.
    Schema,
    /// A file or chunk write failed.
    Write,
    /// A stream was released without reaching completion.
    StreamIntegrity,
    /// The byte source failed.
    Read,
    /// The upload was cancelled.
    Cancelled,
    /// Any other store failure.
    Store,
}

/// Errors that can occur in a bucket.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The API was used out of order (upload before mount, stream re-entry, ...).
    #[error("usage error: {message}")]
    Usage { message: String },

    /// The bucket configuration is invalid.
    #[error("invalid bucket config: {message}")]
    Config { message: String },

    /// A virtual file path was invalid.
    #[error("invalid file path: {0}")]
    Path(#[from] PathError),

    /// Creating or waiting for a collection or index failed.
    #[error("schema error on {collection}: {source}")]
    Schema {
        collection: String,
        source: StoreError,
    },

    /// Inserting or updating a document failed.
    #[error("write to {collection} failed: {source}")]
    Write {
        collection: String,
        source: StoreError,
    },

    /// The stream was released before the upload finished; the file record
    /// stays incomplete.
    #[error("stream for file {file_id} ended prematurely: {message}")]
    StreamIntegrity { file_id: DocumentId, message: String },

    /// Reading the byte source failed.
    #[error("reading source of file {file_id} failed: {source}")]
    Read {
        file_id: DocumentId,
        source: std::io::Error,
    },

    /// The upload's cancellation token fired.
    #[error("upload of file {file_id} was cancelled")]
    Cancelled { file_id: DocumentId },

    /// A store read failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A stored document did not have the expected shape.
    #[error("malformed document: {0}")]
    Document(#[from] DocumentError),
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Error::Usage {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Usage { .. } | Error::Config { .. } | Error::Path(_) => ErrorKind::Usage,
            Error::Schema { .. } => ErrorKind::Schema,
            Error::Write { .. } => ErrorKind::Write,
            Error::StreamIntegrity { .. } => ErrorKind::StreamIntegrity,
            Error::Read { .. } => ErrorKind::Read,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Store(_) | Error::Document(_) => ErrorKind::Store,
        }
    }
}

/// Result type alias for bucket operations.
pub type Result<T> = std::result::Result<T, Error>;
