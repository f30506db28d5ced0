//! The backing-store capability trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{CollectionOptions, DocumentId, EnsureOutcome, IndexKey, IndexSpec, Result, Value};

/// A document database, as far as a bucket needs one.
///
/// Every call is a single round trip and is atomic on its own; there are no
/// multi-document transactions. Implementations must allow many calls to be
/// in flight at once from clones of the same handle.
///
/// # Object Safety
///
/// This trait is object-safe: buckets hold an `Arc<dyn DocumentStore>`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of the collections in a database.
    async fn list_collections(&self, database: &str) -> Result<Vec<String>>;

    /// Create a collection unless it already exists.
    ///
    /// The check and the creation are one atomic step: when several callers
    /// race, exactly one of them sees [`EnsureOutcome::Created`].
    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        options: &CollectionOptions,
    ) -> Result<EnsureOutcome>;

    /// Names of the secondary indexes on a collection.
    async fn list_indexes(&self, database: &str, collection: &str) -> Result<Vec<String>>;

    /// Create a secondary index.
    ///
    /// Fails with [`StoreError::IndexExists`](crate::StoreError::IndexExists)
    /// if the name is taken.
    async fn create_index(&self, database: &str, collection: &str, index: IndexSpec)
        -> Result<()>;

    /// Block until an index can serve queries.
    async fn wait_index_ready(&self, database: &str, collection: &str, index: &str)
        -> Result<()>;

    /// Insert a new document and return its generated id.
    ///
    /// `Value::ServerTime` placeholders are resolved with [`now`](Self::now).
    async fn insert(&self, database: &str, collection: &str, document: Value)
        -> Result<DocumentId>;

    /// Merge a partial document into an existing one.
    async fn update(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        partial: Value,
    ) -> Result<()>;

    /// Fetch a document by primary key.
    async fn get(&self, database: &str, collection: &str, id: &DocumentId)
        -> Result<Option<Value>>;

    /// All documents whose key in `index` starts with `prefix`, in key order.
    ///
    /// An empty prefix returns every indexed document.
    async fn scan_index(
        &self,
        database: &str,
        collection: &str,
        index: &str,
        prefix: &[Value],
    ) -> Result<Vec<(DocumentId, Value)>>;

    /// The store's clock. Never goes backwards.
    async fn now(&self) -> Result<DateTime<Utc>>;
}

// Blanket implementations for shared handles

#[async_trait]
impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    async fn list_collections(&self, database: &str) -> Result<Vec<String>> {
        self.as_ref().list_collections(database).await
    }

    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        options: &CollectionOptions,
    ) -> Result<EnsureOutcome> {
        self.as_ref()
            .ensure_collection(database, collection, options)
            .await
    }

    async fn list_indexes(&self, database: &str, collection: &str) -> Result<Vec<String>> {
        self.as_ref().list_indexes(database, collection).await
    }

    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: IndexSpec,
    ) -> Result<()> {
        self.as_ref().create_index(database, collection, index).await
    }

    async fn wait_index_ready(
        &self,
        database: &str,
        collection: &str,
        index: &str,
    ) -> Result<()> {
        self.as_ref()
            .wait_index_ready(database, collection, index)
            .await
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        document: Value,
    ) -> Result<DocumentId> {
        self.as_ref().insert(database, collection, document).await
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        partial: Value,
    ) -> Result<()> {
        self.as_ref().update(database, collection, id, partial).await
    }

    async fn get(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Value>> {
        self.as_ref().get(database, collection, id).await
    }

    async fn scan_index(
        &self,
        database: &str,
        collection: &str,
        index: &str,
        prefix: &[Value],
    ) -> Result<Vec<(DocumentId, Value)>> {
        self.as_ref()
            .scan_index(database, collection, index, prefix)
            .await
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        self.as_ref().now().await
    }
}

/// Whether `key` starts with `prefix` under [`Value::total_cmp`] equality.
pub fn key_has_prefix(key: &IndexKey, prefix: &[Value]) -> bool {
    prefix.len() <= key.len()
        && key
            .iter()
            .zip(prefix.iter())
            .all(|(k, p)| k.total_cmp(p) == std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        let key = vec![Value::from("f1"), Value::from(3i64)];
        assert!(key_has_prefix(&key, &[]));
        assert!(key_has_prefix(&key, &[Value::from("f1")]));
        assert!(key_has_prefix(&key, &[Value::from("f1"), Value::from(3.0f64)]));
        assert!(!key_has_prefix(&key, &[Value::from("f2")]));
        assert!(!key_has_prefix(
            &key,
            &[Value::from("f1"), Value::from(3i64), Value::Null]
        ));
    }
}
