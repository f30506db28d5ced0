use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regrid::{Bucket, BucketConfig, ErrorKind};
use regrid_doc_store::{
    CollectionOptions, DocumentId, DocumentStore, EnsureOutcome, IndexSpec, Result, Value,
};
use regrid_memory_store::test_utils::{InstrumentedStore, Operation};
use regrid_memory_store::MemoryDocumentStore;

const DB: &str = "pyregrid";

fn store() -> Arc<InstrumentedStore<MemoryDocumentStore>> {
    Arc::new(InstrumentedStore::new(MemoryDocumentStore::with_database(
        DB,
    )))
}

async fn sorted_indexes(store: &dyn DocumentStore, collection: &str) -> Vec<String> {
    let mut names = store.list_indexes(DB, collection).await.unwrap();
    names.sort();
    names
}

#[tokio::test]
async fn test_second_mount_does_not_touch_the_store() {
    let store = store();
    let mut bucket = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();

    bucket.mount().await.unwrap();
    let after_first = store.total_calls();
    assert!(after_first > 0);

    bucket.mount().await.unwrap();
    assert_eq!(store.total_calls(), after_first);
}

#[tokio::test]
async fn test_two_buckets_mount_the_same_collections() {
    let store = store();
    let mut first = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();
    let mut second = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();

    first.mount().await.unwrap();
    second.mount().await.unwrap();

    // The second mount inspected the existing collections instead of
    // recreating their indexes.
    assert_eq!(store.calls(Operation::CreateIndex), 3);
    assert_eq!(store.calls(Operation::ListIndexes), 2);
    assert!(second.is_mounted());

    let mut collections = store.list_collections(DB).await.unwrap();
    collections.sort();
    assert_eq!(collections, vec!["fs_chunks", "fs_files"]);
}

#[tokio::test]
async fn test_concurrent_mounts_both_succeed() {
    let store = store();
    let mut a = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();
    let mut b = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();

    let (ra, rb) = tokio::join!(a.mount(), b.mount());
    ra.unwrap();
    rb.unwrap();

    assert_eq!(
        sorted_indexes(store.as_ref(), "fs_files").await,
        vec!["file_index", "prefix_index"]
    );
    assert_eq!(
        sorted_indexes(store.as_ref(), "fs_chunks").await,
        vec!["chunk_index"]
    );
}

#[tokio::test]
async fn test_buckets_with_different_names_coexist() {
    let store = store();
    let mut fs = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();
    let mut media = Bucket::new(store.clone(), DB, BucketConfig::named("media")).unwrap();

    fs.mount().await.unwrap();
    media.mount().await.unwrap();

    let mut collections = store.list_collections(DB).await.unwrap();
    collections.sort();
    assert_eq!(
        collections,
        vec!["fs_chunks", "fs_files", "media_chunks", "media_files"]
    );
}

#[tokio::test]
async fn test_custom_names_from_json_config() {
    let config = BucketConfig::from_json_str(
        r#"{
            "bucket_name": "media",
            "files_table_name": "meta",
            "chunks_table_name": "blobs",
            "file_index": "by_name",
            "file_prefix_index": "by_dir",
            "chunk_index": "by_file"
        }"#,
    )
    .unwrap();
    let store = store();
    let mut bucket = Bucket::new(store.clone(), DB, config).unwrap();
    bucket.mount().await.unwrap();

    assert_eq!(bucket.files_collection(), "media_meta");
    assert_eq!(bucket.chunks_collection(), "media_blobs");
    assert_eq!(
        sorted_indexes(store.as_ref(), "media_meta").await,
        vec!["by_dir", "by_name"]
    );
    assert_eq!(
        sorted_indexes(store.as_ref(), "media_blobs").await,
        vec!["by_file"]
    );
}

#[tokio::test]
async fn test_mount_fails_when_database_is_missing() {
    let store = Arc::new(MemoryDocumentStore::new());
    let mut bucket = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();

    let err = bucket.mount().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(!bucket.is_mounted());

    store.create_database(DB).unwrap();
    bucket.mount().await.unwrap();
    assert!(bucket.is_mounted());
}

#[tokio::test]
async fn test_failed_index_creation_leaves_bucket_unmounted() {
    let store = store();
    store.fail_always(Operation::CreateIndex);
    let mut bucket = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();

    let err = bucket.mount().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
    assert!(!bucket.is_mounted());

    // The collection exists now; a retry only adds the indexes.
    store.heal(Operation::CreateIndex);
    bucket.mount().await.unwrap();
    assert_eq!(
        sorted_indexes(store.as_ref(), "fs_files").await,
        vec!["file_index", "prefix_index"]
    );
}

/// Hides every index from `list_indexes`, as a mounter racing another one
/// would see before the other's index creation lands.
struct StaleListing(MemoryDocumentStore);

#[async_trait]
impl DocumentStore for StaleListing {
    async fn list_collections(&self, database: &str) -> Result<Vec<String>> {
        self.0.list_collections(database).await
    }

    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        options: &CollectionOptions,
    ) -> Result<EnsureOutcome> {
        self.0.ensure_collection(database, collection, options).await
    }

    async fn list_indexes(&self, _database: &str, _collection: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: IndexSpec,
    ) -> Result<()> {
        self.0.create_index(database, collection, index).await
    }

    async fn wait_index_ready(
        &self,
        database: &str,
        collection: &str,
        index: &str,
    ) -> Result<()> {
        self.0.wait_index_ready(database, collection, index).await
    }

    async fn insert(&self, database: &str, collection: &str, document: Value) -> Result<DocumentId> {
        self.0.insert(database, collection, document).await
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        patch: Value,
    ) -> Result<()> {
        self.0.update(database, collection, id, patch).await
    }

    async fn get(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Value>> {
        self.0.get(database, collection, id).await
    }

    async fn scan_index(
        &self,
        database: &str,
        collection: &str,
        index: &str,
        prefix: &[Value],
    ) -> Result<Vec<(DocumentId, Value)>> {
        self.0.scan_index(database, collection, index, prefix).await
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        self.0.now().await
    }
}

#[tokio::test]
async fn test_losing_an_index_race_is_not_an_error() {
    let store = Arc::new(StaleListing(MemoryDocumentStore::with_database(DB)));
    let mut first = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();
    first.mount().await.unwrap();

    // Every index looks missing, so each creation hits IndexExists.
    let mut second = Bucket::new(store.clone(), DB, BucketConfig::default()).unwrap();
    second.mount().await.unwrap();
    assert!(second.is_mounted());
}
