//! Buckets: schema bootstrap and upload stream factory.

use std::collections::BTreeSet;
use std::sync::Arc;

use regrid_doc_store::{DocumentId, DocumentStore, IndexSpec, StoreError, Value};
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::config::{chunk_size_problem, BucketConfig};
use crate::document::{
    chunk_index_key, file_index_key, prefix_index_key, ChunkDocument, FileDocument, FileStatus,
};
use crate::error::{Error, Result};
use crate::path::FilePath;
use crate::stream::{FileSummary, StreamTarget, UploadMode, UploadStream};

/// A named pair of collections holding chunked files.
///
/// Constructing a bucket does no I/O. [`mount`](Self::mount) provisions the
/// collections and indexes and must run before any upload. The `mounted`
/// flag only saves round trips within one process: mounting is idempotent
/// against the store itself, so any number of processes can mount the same
/// bucket concurrently.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use regrid::{Bucket, BucketConfig, UploadMode};
/// use regrid_memory_store::MemoryDocumentStore;
///
/// let store = Arc::new(MemoryDocumentStore::with_database("pyregrid"));
/// let mut bucket = Bucket::new(store, "pyregrid", BucketConfig::default())?;
/// bucket.mount().await?;
///
/// let source = tokio::fs::File::open("big.gz").await?;
/// let summary = bucket
///     .upload("/files/big.gz", source, UploadMode::Concurrent)
///     .await?;
/// ```
pub struct Bucket {
    store: Arc<dyn DocumentStore>,
    database_name: String,
    config: BucketConfig,
    files_collection: String,
    chunks_collection: String,
    mounted: bool,
}

/// Readability check of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub file_id: DocumentId,
    pub file_name: String,
    pub status: FileStatus,
    /// Length recorded on the file document, once complete.
    pub length: Option<u64>,
    pub chunk_count: u64,
    /// Sum of the stored chunks' payload sizes.
    pub chunk_bytes: u64,
    /// Chunk numbers are exactly `0..chunk_count`.
    pub dense: bool,
    /// Safe to read: complete, length matches the chunks, numbering dense.
    pub readable: bool,
}

impl Bucket {
    /// Create a bucket handle. Pure; validates the config only.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        database_name: impl Into<String>,
        config: BucketConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            database_name: database_name.into(),
            files_collection: config.files_collection(),
            chunks_collection: config.chunks_collection(),
            config,
            mounted: false,
        })
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn bucket_name(&self) -> &str {
        &self.config.bucket_name
    }

    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    pub fn files_collection(&self) -> &str {
        &self.files_collection
    }

    pub fn chunks_collection(&self) -> &str {
        &self.chunks_collection
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Make sure the bucket's collections and indexes exist and are ready.
    ///
    /// The first successful call in a process marks the bucket mounted and
    /// later calls return without touching the store. If any step fails the
    /// bucket stays unmounted and the call can be retried.
    pub async fn mount(&mut self) -> Result<()> {
        if self.mounted {
            return Ok(());
        }

        tracing::debug!(
            database = %self.database_name,
            bucket = %self.config.bucket_name,
            "mounting bucket"
        );

        let file_indexes = vec![
            IndexSpec::new(self.config.file_index.clone(), file_index_key),
            IndexSpec::new(self.config.file_prefix_index.clone(), prefix_index_key),
        ];
        self.ensure_collection(&self.files_collection, file_indexes)
            .await?;

        let chunk_indexes = vec![IndexSpec::new(
            self.config.chunk_index.clone(),
            chunk_index_key,
        )];
        self.ensure_collection(&self.chunks_collection, chunk_indexes)
            .await?;

        self.mounted = true;
        tracing::info!(
            database = %self.database_name,
            bucket = %self.config.bucket_name,
            "bucket mounted"
        );
        Ok(())
    }

    /// Check-or-create one collection, then its indexes.
    ///
    /// A freshly created collection gets every index. An existing one is
    /// inspected and only missing indexes are created, which repairs a
    /// collection whose creator died before indexing it. Losing an index
    /// creation race to another mounter is fine.
    async fn ensure_collection(&self, collection: &str, indexes: Vec<IndexSpec>) -> Result<()> {
        let db = self.database_name.as_str();
        let schema_error = |source: StoreError| Error::Schema {
            collection: collection.to_string(),
            source,
        };

        let outcome = self
            .store
            .ensure_collection(db, collection, &self.config.table_create_options)
            .await
            .map_err(schema_error)?;

        let names: Vec<String> = indexes.iter().map(|i| i.name.clone()).collect();
        let missing: Vec<IndexSpec> = if outcome.was_created() {
            tracing::debug!(collection, "collection created");
            indexes
        } else {
            let existing: BTreeSet<String> = self
                .store
                .list_indexes(db, collection)
                .await
                .map_err(schema_error)?
                .into_iter()
                .collect();
            indexes
                .into_iter()
                .filter(|i| !existing.contains(&i.name))
                .collect()
        };

        for index in missing {
            let name = index.name.clone();
            match self.store.create_index(db, collection, index).await {
                Ok(()) => tracing::debug!(collection, index = %name, "index created"),
                Err(e) if e.is_index_exists() => {
                    tracing::warn!(collection, index = %name, "index created concurrently")
                }
                Err(e) => return Err(schema_error(e)),
            }
        }

        for name in &names {
            self.store
                .wait_index_ready(db, collection, name)
                .await
                .map_err(schema_error)?;
        }
        Ok(())
    }

    /// Start an upload with the bucket's chunk size.
    ///
    /// Inserts the incomplete file record and returns the stream that fills
    /// it. The returned stream must be driven and then closed.
    ///
    /// `file_name` is normalized before it is stored: empty components are
    /// dropped and a leading `/` is added, so `files//a.bin` is recorded as
    /// `/files/a.bin`. Names with `.` or `..` components or control
    /// characters are rejected with [`Error::Path`].
    pub async fn file_uploader<R>(&self, file_name: &str, source: R) -> Result<UploadStream<R>>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.file_uploader_with_chunk_size(file_name, source, self.config.chunk_size)
            .await
    }

    /// Start an upload with an explicit chunk size for this file.
    pub async fn file_uploader_with_chunk_size<R>(
        &self,
        file_name: &str,
        source: R,
        chunk_size: usize,
    ) -> Result<UploadStream<R>>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.require_mounted()?;
        if let Some(problem) = chunk_size_problem(chunk_size) {
            return Err(Error::usage(format!("chunk size {} {}", chunk_size, problem)));
        }
        let file_name = FilePath::parse(file_name)?;

        let file_id = self
            .store
            .insert(
                &self.database_name,
                &self.files_collection,
                FileDocument::new_value(&file_name, chunk_size),
            )
            .await
            .map_err(|source| Error::Write {
                collection: self.files_collection.clone(),
                source,
            })?;
        tracing::debug!(%file_id, %file_name, chunk_size, "file record created");

        let target = Arc::new(StreamTarget {
            store: self.store.clone(),
            database: self.database_name.clone(),
            files_collection: self.files_collection.clone(),
            chunks_collection: self.chunks_collection.clone(),
        });
        Ok(UploadStream::new(
            target,
            file_id,
            file_name,
            source,
            chunk_size,
            self.config.max_concurrent_writes,
        ))
    }

    /// Upload a whole source as one file and close the stream.
    pub async fn upload<R>(
        &self,
        file_name: &str,
        source: R,
        mode: UploadMode,
    ) -> Result<FileSummary>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.file_uploader(file_name, source).await?.run(mode).await
    }

    /// Fetch a file record.
    pub async fn file_document(&self, file_id: &DocumentId) -> Result<Option<FileDocument>> {
        self.require_mounted()?;
        let value = self
            .store
            .get(&self.database_name, &self.files_collection, file_id)
            .await?;
        match value {
            Some(value) => Ok(Some(FileDocument::from_value(file_id.clone(), &value)?)),
            None => Ok(None),
        }
    }

    /// Every chunk stored for a file, ordered by chunk number.
    pub async fn chunk_documents(&self, file_id: &DocumentId) -> Result<Vec<ChunkDocument>> {
        self.require_mounted()?;
        let rows = self
            .store
            .scan_index(
                &self.database_name,
                &self.chunks_collection,
                &self.config.chunk_index,
                &[Value::from(file_id)],
            )
            .await?;
        rows.iter()
            .map(|(_, value)| ChunkDocument::from_value(value).map_err(Error::from))
            .collect()
    }

    /// Check whether a stored file is safe to read.
    pub async fn verify_file(&self, file_id: &DocumentId) -> Result<FileReport> {
        let file = self.file_document(file_id).await?.ok_or_else(|| {
            Error::Store(StoreError::NoSuchDocument {
                collection: self.files_collection.clone(),
                id: file_id.clone(),
            })
        })?;
        let chunks = self.chunk_documents(file_id).await?;

        let chunk_count = chunks.len() as u64;
        let chunk_bytes: u64 = chunks.iter().map(|c| c.data.len() as u64).sum();
        // Ordered by num, so dense means chunk i has num i.
        let dense = chunks.iter().zip(0u64..).all(|(c, i)| c.num == i);
        let readable = file.status == FileStatus::Complete
            && file.length == Some(chunk_bytes)
            && dense;

        Ok(FileReport {
            file_id: file.id,
            file_name: file.file_name,
            status: file.status,
            length: file.length,
            chunk_count,
            chunk_bytes,
            dense,
            readable,
        })
    }

    fn require_mounted(&self) -> Result<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(Error::usage(format!(
                "bucket '{}' is not mounted",
                self.config.bucket_name
            )))
        }
    }
}
