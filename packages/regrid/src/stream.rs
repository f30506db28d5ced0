//! Upload streams: slice a byte source into chunk documents.
//!
//! A stream is single-use. It is created by
//! [`Bucket::file_uploader`](crate::Bucket::file_uploader) with its file
//! record already inserted, driven once in one of two modes, and then
//! closed, which is where the file record is marked complete.
//!
//! ```text
//!   Open ──upload_*──▶ Uploading ──end of source──▶ Drained ──close──▶ Closed
//!                          │
//!                          └──write/read error, cancel──▶ Failed
//! ```
//!
//! Chunk numbers are assigned while reading, which is always sequential.
//! Only the writes run concurrently in [`UploadMode::Concurrent`], so the
//! stored `num` field, never write completion order, defines chunk order.

use std::sync::Arc;

use regrid_doc_store::{DocumentId, DocumentStore};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::document::{ChunkDocument, FileDocument};
use crate::error::{Error, Result};
use crate::path::FilePath;

/// Largest buffer reserved before a chunk's bytes are read.
const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// How an upload dispatches its chunk writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// One write in flight; each chunk is stored before the next is read.
    Sequential,
    /// Writes run as concurrent tasks, up to the bucket's write limit.
    Concurrent,
}

/// Lifecycle state of an [`UploadStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created; nothing read yet.
    Open,
    /// Chunks are being produced.
    Uploading,
    /// End of source reached and every write the stream issued succeeded.
    Drained,
    /// The upload aborted. The file record stays incomplete for good.
    Failed,
    /// The file record was finalized.
    Closed,
}

/// Where a stream's documents go. Shared with in-flight write tasks.
pub(crate) struct StreamTarget {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) database: String,
    pub(crate) files_collection: String,
    pub(crate) chunks_collection: String,
}

/// A chunk insert that has been prepared but not sent.
///
/// Returned by [`UploadStream::produce_next_chunk`] so callers can decide
/// how to dispatch it.
pub struct ChunkInsert {
    target: Arc<StreamTarget>,
    chunk: ChunkDocument,
}

impl ChunkInsert {
    pub fn chunk(&self) -> &ChunkDocument {
        &self.chunk
    }

    /// Send the insert and wait for the store to acknowledge it.
    pub async fn execute(self) -> Result<DocumentId> {
        let ChunkInsert { target, chunk } = self;
        let num = chunk.num;
        let id = target
            .store
            .insert(&target.database, &target.chunks_collection, chunk.into_value())
            .await
            .map_err(|source| Error::Write {
                collection: target.chunks_collection.clone(),
                source,
            })?;
        tracing::trace!(num, chunk_id = %id, "chunk stored");
        Ok(id)
    }
}

/// What a finished upload produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub file_id: DocumentId,
    pub file_name: String,
    pub length: u64,
    pub chunks: u64,
}

/// A single-use upload of one byte source into one file.
pub struct UploadStream<R> {
    target: Arc<StreamTarget>,
    file_id: DocumentId,
    file_name: FilePath,
    source: R,
    chunk_size: usize,
    max_concurrent_writes: usize,
    cancel: CancellationToken,
    next_num: u64,
    length: u64,
    state: StreamState,
    released: bool,
}

impl<R: AsyncRead + Unpin + Send> UploadStream<R> {
    pub(crate) fn new(
        target: Arc<StreamTarget>,
        file_id: DocumentId,
        file_name: FilePath,
        source: R,
        chunk_size: usize,
        max_concurrent_writes: usize,
    ) -> Self {
        Self {
            target,
            file_id,
            file_name,
            source,
            chunk_size,
            max_concurrent_writes,
            cancel: CancellationToken::new(),
            next_num: 0,
            length: 0,
            state: StreamState::Open,
            released: false,
        }
    }

    /// Abort the upload when `token` is cancelled.
    ///
    /// Cancellation is observed while reading the source and while waiting
    /// for writes. The file record stays incomplete.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn file_id(&self) -> &DocumentId {
        &self.file_id
    }

    pub fn file_name(&self) -> &FilePath {
        &self.file_name
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Bytes read from the source so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Chunks produced so far.
    pub fn chunk_count(&self) -> u64 {
        self.next_num
    }

    /// Read the next chunk and return its insert without sending it.
    ///
    /// Returns `Ok(None)` at end of source, after which the stream is
    /// drained and ready to [`close`](Self::close). The caller owns every
    /// returned insert and must have executed all of them successfully
    /// before closing, or the file will claim chunks it does not have.
    pub async fn produce_next_chunk(&mut self) -> Result<Option<ChunkInsert>> {
        match self.state {
            StreamState::Open => self.state = StreamState::Uploading,
            StreamState::Uploading => {}
            state => {
                return Err(Error::usage(format!(
                    "cannot read from a stream in state {:?}",
                    state
                )))
            }
        }

        let next = self.next_chunk().await;
        match &next {
            Ok(None) => self.state = StreamState::Drained,
            Ok(Some(_)) => {}
            Err(_) => self.state = StreamState::Failed,
        }
        next
    }

    /// Store every chunk, one write at a time.
    pub async fn upload_sequential(&mut self) -> Result<()> {
        self.begin(UploadMode::Sequential)?;
        let result = self.drive_sequential().await;
        self.settle(result)
    }

    /// Store every chunk with up to `max_concurrent_writes` writes in flight.
    ///
    /// Reading stays sequential. The first failed write aborts the writes
    /// still running and fails the upload.
    pub async fn upload_concurrent(&mut self) -> Result<()> {
        self.begin(UploadMode::Concurrent)?;
        let result = self.drive_concurrent().await;
        self.settle(result)
    }

    /// Upload in the given mode, then close.
    ///
    /// The stream is closed on every path. When the upload fails its error
    /// is returned and the file record stays incomplete.
    pub async fn run(mut self, mode: UploadMode) -> Result<FileSummary> {
        let uploaded = match mode {
            UploadMode::Sequential => self.upload_sequential().await,
            UploadMode::Concurrent => self.upload_concurrent().await,
        };
        let closed = self.close().await;
        uploaded.and(closed)
    }

    /// Finalize the file record.
    ///
    /// Only a drained stream can be closed successfully: the file is updated
    /// to `complete` with its length and finish time, exactly once. Closing
    /// a stream that was never driven, or whose upload failed, leaves the
    /// file incomplete and returns [`Error::StreamIntegrity`].
    pub async fn close(mut self) -> Result<FileSummary> {
        self.released = true;
        match self.state {
            StreamState::Drained => self.finalize().await,
            StreamState::Open => Err(self.integrity("released before any upload ran")),
            StreamState::Uploading => {
                Err(self.integrity("released before the end of the source was reached"))
            }
            StreamState::Failed => Err(self.integrity("upload failed")),
            StreamState::Closed => Err(Error::usage("stream is already closed")),
        }
    }

    fn begin(&mut self, mode: UploadMode) -> Result<()> {
        if self.state != StreamState::Open {
            return Err(Error::usage(format!(
                "{:?} upload on a stream in state {:?}",
                mode, self.state
            )));
        }
        tracing::debug!(file_id = %self.file_id, ?mode, "upload started");
        self.state = StreamState::Uploading;
        Ok(())
    }

    fn settle(&mut self, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => self.state = StreamState::Drained,
            Err(e) => {
                tracing::warn!(file_id = %self.file_id, error = %e, "upload aborted");
                self.state = StreamState::Failed;
            }
        }
        result
    }

    async fn drive_sequential(&mut self) -> Result<()> {
        while let Some(insert) = self.next_chunk().await? {
            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                written = insert.execute() => Some(written),
            };
            match written {
                Some(written) => {
                    written?;
                }
                None => return Err(self.cancelled()),
            }
        }
        Ok(())
    }

    async fn drive_concurrent(&mut self) -> Result<()> {
        // Dropping the set on an early return aborts the writes still running.
        let mut writes: JoinSet<Result<DocumentId>> = JoinSet::new();

        loop {
            if writes.len() >= self.max_concurrent_writes {
                self.join_next_write(&mut writes).await?;
            }
            match self.next_chunk().await? {
                Some(insert) => {
                    writes.spawn(insert.execute());
                }
                None => break,
            }
        }

        while !writes.is_empty() {
            self.join_next_write(&mut writes).await?;
        }
        Ok(())
    }

    async fn join_next_write(&self, writes: &mut JoinSet<Result<DocumentId>>) -> Result<()> {
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            joined = writes.join_next() => Some(joined),
        };

        match joined {
            None => Err(self.cancelled()),
            Some(None) => Ok(()),
            Some(Some(Ok(written))) => written.map(|_| ()),
            Some(Some(Err(join_error))) => Err(Error::Write {
                collection: self.target.chunks_collection.clone(),
                source: regrid_doc_store::StoreError::other(format!(
                    "chunk write task failed: {}",
                    join_error
                )),
            }),
        }
    }

    /// Read up to `chunk_size` bytes and wrap them as the next chunk.
    async fn next_chunk(&mut self) -> Result<Option<ChunkInsert>> {
        // The buffer grows as bytes arrive, so a chunk size far larger than
        // the source costs nothing up front.
        let mut data = Vec::with_capacity(self.chunk_size.min(READ_BUFFER_CAPACITY));
        let limit = self.chunk_size as u64;

        // read_to_end on a bounded reader keeps reading through short reads,
        // so only the last chunk of a file can be smaller than chunk_size.
        let mut reader = (&mut self.source).take(limit);
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            read = reader.read_to_end(&mut data) => Some(read),
        };
        let read = match read {
            Some(read) => read.map_err(|source| Error::Read {
                file_id: self.file_id.clone(),
                source,
            })?,
            None => return Err(self.cancelled()),
        };

        if read == 0 {
            return Ok(None);
        }

        data.shrink_to_fit();
        let chunk = ChunkDocument {
            file_id: self.file_id.clone(),
            num: self.next_num,
            data: data.into(),
        };
        tracing::trace!(file_id = %self.file_id, num = chunk.num, bytes = read, "chunk read");
        self.next_num += 1;
        self.length += read as u64;

        Ok(Some(ChunkInsert {
            target: self.target.clone(),
            chunk,
        }))
    }

    async fn finalize(&mut self) -> Result<FileSummary> {
        let target = self.target.clone();
        let updated = target
            .store
            .update(
                &target.database,
                &target.files_collection,
                &self.file_id,
                FileDocument::completion_value(self.length),
            )
            .await;
        if let Err(source) = updated {
            self.state = StreamState::Failed;
            return Err(Error::Write {
                collection: target.files_collection.clone(),
                source,
            });
        }

        self.state = StreamState::Closed;
        tracing::info!(
            file_id = %self.file_id,
            file_name = %self.file_name,
            length = self.length,
            chunks = self.next_num,
            "file complete"
        );

        Ok(FileSummary {
            file_id: self.file_id.clone(),
            file_name: self.file_name.to_string(),
            length: self.length,
            chunks: self.next_num,
        })
    }

    fn integrity(&self, message: &str) -> Error {
        tracing::error!(file_id = %self.file_id, state = ?self.state, "{}; file left incomplete", message);
        Error::StreamIntegrity {
            file_id: self.file_id.clone(),
            message: message.to_string(),
        }
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            file_id: self.file_id.clone(),
        }
    }
}

impl<R> Drop for UploadStream<R> {
    fn drop(&mut self) {
        if !self.released {
            tracing::error!(
                file_id = %self.file_id,
                state = ?self.state,
                "upload stream dropped without close; file left incomplete"
            );
        }
    }
}
