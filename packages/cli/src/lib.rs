//! Upload a local file into a bucket backed by an in-memory store and
//! report what was stored.

use std::path::PathBuf;
use std::sync::Arc;

use regrid::{Bucket, BucketConfig, FileReport, UploadMode};
use regrid_doc_store::StoreError;
use regrid_memory_store::MemoryDocumentStore;
use serde::Serialize;

/// Errors surfaced by the CLI.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Regrid(#[from] regrid::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// Everything one upload needs.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub local_file: PathBuf,
    pub virtual_path: String,
    pub database: String,
    /// JSON bucket config, applied before the overrides below.
    pub config: Option<PathBuf>,
    pub bucket: Option<String>,
    pub chunk_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub mode: UploadMode,
    pub dump: bool,
}

/// One stored document, rendered for display.
#[derive(Debug, Serialize)]
pub struct DumpedDocument {
    pub id: String,
    pub document: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct Dump {
    pub files: Vec<DumpedDocument>,
    pub chunks: Vec<DumpedDocument>,
}

/// What `regrid upload` prints.
#[derive(Debug, Serialize)]
pub struct UploadOutput {
    pub mode: UploadMode,
    pub report: FileReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump: Option<Dump>,
}

impl UploadRequest {
    fn bucket_config(&self) -> Result<BucketConfig> {
        let mut config = match &self.config {
            Some(path) => BucketConfig::from_json_file(path)?,
            None => BucketConfig::default(),
        };
        if let Some(bucket) = &self.bucket {
            config.bucket_name = bucket.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_writes = concurrency;
        }
        Ok(config)
    }
}

/// Mount a fresh in-memory bucket, upload the file, verify it.
pub async fn upload(request: &UploadRequest) -> Result<UploadOutput> {
    let config = request.bucket_config()?;
    let store = Arc::new(MemoryDocumentStore::with_database(&request.database));
    let mut bucket = Bucket::new(store.clone(), request.database.clone(), config)?;
    bucket.mount().await?;

    let source = tokio::fs::File::open(&request.local_file)
        .await
        .map_err(|source| CliError::Open {
            path: request.local_file.clone(),
            source,
        })?;

    let summary = bucket
        .upload(&request.virtual_path, source, request.mode)
        .await?;
    tracing::info!(
        file_id = %summary.file_id,
        length = summary.length,
        chunks = summary.chunks,
        "upload finished"
    );

    let report = bucket.verify_file(&summary.file_id).await?;
    let dump = if request.dump {
        Some(Dump {
            files: dump_collection(&store, &bucket, bucket.files_collection())?,
            chunks: dump_collection(&store, &bucket, bucket.chunks_collection())?,
        })
    } else {
        None
    };

    Ok(UploadOutput {
        mode: request.mode,
        report,
        dump,
    })
}

fn dump_collection(
    store: &MemoryDocumentStore,
    bucket: &Bucket,
    collection: &str,
) -> Result<Vec<DumpedDocument>> {
    Ok(store
        .documents(bucket.database_name(), collection)?
        .into_iter()
        .map(|(id, doc)| DumpedDocument {
            id: id.to_string(),
            document: doc.to_json(),
        })
        .collect())
}
