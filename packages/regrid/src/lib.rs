//! regrid: chunked-file buckets over a document store
//!
//! A bucket stores large files as two collections:
//! - `{bucket}_files`: one record per upload, `incomplete` until finalized
//! - `{bucket}_chunks`: the file's bytes as numbered chunk documents
//!
//! Uploads run through an [`UploadStream`], which reads a byte source in
//! `chunk_size` slices and writes them one at a time or with a bounded
//! number of writes in flight. Closing a drained stream marks the file
//! `complete`; any other outcome leaves it `incomplete`, which readers treat
//! as not there.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use regrid::{Bucket, BucketConfig, UploadMode};
//! use regrid_memory_store::MemoryDocumentStore;
//!
//! let store = Arc::new(MemoryDocumentStore::with_database("pyregrid"));
//! let mut bucket = Bucket::new(store, "pyregrid", BucketConfig::default())?;
//! bucket.mount().await?;
//!
//! let mut stream = bucket.file_uploader("/notes/a.txt", &b"hello"[..]).await?;
//! stream.upload_sequential().await?;
//! let summary = stream.close().await?;
//! assert_eq!(summary.length, 5);
//! ```

mod bucket;
mod config;
mod document;
mod error;
mod path;
mod stream;

pub use bucket::{Bucket, FileReport};
pub use config::{BucketConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENT_WRITES};
pub use document::{
    chunk_index_key, fields, file_index_key, prefix_index_key, ChunkDocument, DocumentError,
    FileDocument, FileStatus,
};
pub use error::{Error, ErrorKind, Result};
pub use path::{FilePath, PathError};
pub use stream::{ChunkInsert, FileSummary, StreamState, UploadMode, UploadStream};

pub use tokio_util::sync::CancellationToken;
