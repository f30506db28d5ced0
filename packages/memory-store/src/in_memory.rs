//! In-memory document store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regrid_doc_store::{
    key_has_prefix, CollectionOptions, DocumentId, DocumentStore, EnsureOutcome, IndexKey,
    IndexSpec, Result, StoreError, Value,
};

const DEFAULT_PRIMARY_KEY: &str = "id";

/// A `DocumentStore` that keeps everything in process memory.
///
/// Secondary indexes are maintained eagerly: every insert or update
/// recomputes the document's key for each index of the collection. A key
/// function that fails leaves the document out of that index, and the write
/// itself still succeeds. Indexes are ready as soon as they are created.
///
/// Clones of an `Arc<MemoryDocumentStore>` share one state, so several
/// buckets (standing in for several processes) can mount against it.
///
/// # Example
///
/// ```rust,ignore
/// use regrid_memory_store::MemoryDocumentStore;
///
/// let store = MemoryDocumentStore::new();
/// store.create_database("pyregrid")?;
/// ```
pub struct MemoryDocumentStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    databases: BTreeMap<String, Database>,
    last_now: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Database {
    collections: BTreeMap<String, Collection>,
}

struct Collection {
    options: CollectionOptions,
    documents: BTreeMap<DocumentId, Value>,
    indexes: BTreeMap<String, Index>,
}

struct Index {
    spec: IndexSpec,
    entries: BTreeMap<DocumentId, IndexKey>,
}

impl Index {
    fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeMap::new(),
        }
    }

    fn reindex(&mut self, id: &DocumentId, doc: &Value) {
        match self.spec.key_for(doc) {
            Ok(key) => {
                self.entries.insert(id.clone(), key);
            }
            Err(e) => {
                tracing::trace!(index = %self.spec.name, %id, error = %e, "document not indexed");
                self.entries.remove(id);
            }
        }
    }
}

impl Collection {
    fn new(options: CollectionOptions) -> Self {
        Self {
            options,
            documents: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    fn primary_key(&self) -> &str {
        self.options
            .primary_key
            .as_deref()
            .unwrap_or(DEFAULT_PRIMARY_KEY)
    }

    fn put(&mut self, id: DocumentId, doc: Value) {
        for index in self.indexes.values_mut() {
            index.reindex(&id, &doc);
        }
        self.documents.insert(id, doc);
    }
}

impl State {
    fn database(&self, database: &str) -> Result<&Database> {
        self.databases
            .get(database)
            .ok_or_else(|| StoreError::NoSuchDatabase {
                database: database.to_string(),
            })
    }

    fn database_mut(&mut self, database: &str) -> Result<&mut Database> {
        self.databases
            .get_mut(database)
            .ok_or_else(|| StoreError::NoSuchDatabase {
                database: database.to_string(),
            })
    }

    fn collection(&self, database: &str, collection: &str) -> Result<&Collection> {
        self.database(database)?
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::NoSuchCollection {
                database: database.to_string(),
                collection: collection.to_string(),
            })
    }

    fn collection_mut(&mut self, database: &str, collection: &str) -> Result<&mut Collection> {
        self.database_mut(database)?
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NoSuchCollection {
                database: database.to_string(),
                collection: collection.to_string(),
            })
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = match self.last_now {
            Some(last) => Utc::now().max(last),
            None => Utc::now(),
        };
        self.last_now = Some(now);
        now
    }
}

impl MemoryDocumentStore {
    /// Create a store with no databases.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Create a store with one empty database.
    pub fn with_database(name: &str) -> Self {
        let mut state = State::default();
        state
            .databases
            .insert(name.to_string(), Database::default());
        Self {
            state: Mutex::new(state),
        }
    }

    /// Create a database unless it already exists.
    pub fn create_database(&self, name: &str) -> Result<EnsureOutcome> {
        let mut state = self.lock()?;
        if state.databases.contains_key(name) {
            return Ok(EnsureOutcome::Existed);
        }
        state
            .databases
            .insert(name.to_string(), Database::default());
        Ok(EnsureOutcome::Created)
    }

    /// Options a collection was created with.
    pub fn collection_options(
        &self,
        database: &str,
        collection: &str,
    ) -> Result<CollectionOptions> {
        Ok(self.lock()?.collection(database, collection)?.options.clone())
    }

    /// Every document of a collection, by primary key.
    pub fn documents(&self, database: &str, collection: &str) -> Result<Vec<(DocumentId, Value)>> {
        let state = self.lock()?;
        Ok(state
            .collection(database, collection)?
            .documents
            .iter()
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::other("lock poisoned"))
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn list_collections(&self, database: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        Ok(state.database(database)?.collections.keys().cloned().collect())
    }

    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        options: &CollectionOptions,
    ) -> Result<EnsureOutcome> {
        let mut state = self.lock()?;
        let db = state.database_mut(database)?;
        if db.collections.contains_key(collection) {
            return Ok(EnsureOutcome::Existed);
        }
        tracing::debug!(database, collection, "creating collection");
        db.collections
            .insert(collection.to_string(), Collection::new(options.clone()));
        Ok(EnsureOutcome::Created)
    }

    async fn list_indexes(&self, database: &str, collection: &str) -> Result<Vec<String>> {
        let state = self.lock()?;
        Ok(state
            .collection(database, collection)?
            .indexes
            .keys()
            .cloned()
            .collect())
    }

    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: IndexSpec,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let coll = state.collection_mut(database, collection)?;
        if coll.indexes.contains_key(&index.name) {
            return Err(StoreError::IndexExists {
                collection: collection.to_string(),
                index: index.name,
            });
        }

        tracing::debug!(database, collection, index = %index.name, "creating index");
        let mut built = Index::new(index);
        for (id, doc) in &coll.documents {
            built.reindex(id, doc);
        }
        coll.indexes.insert(built.spec.name.clone(), built);
        Ok(())
    }

    async fn wait_index_ready(
        &self,
        database: &str,
        collection: &str,
        index: &str,
    ) -> Result<()> {
        let state = self.lock()?;
        if state
            .collection(database, collection)?
            .indexes
            .contains_key(index)
        {
            Ok(())
        } else {
            Err(StoreError::NoSuchIndex {
                collection: collection.to_string(),
                index: index.to_string(),
            })
        }
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        mut document: Value,
    ) -> Result<DocumentId> {
        if !document.is_map() {
            return Err(StoreError::InvalidDocument {
                message: "document must be a map".to_string(),
            });
        }

        let mut state = self.lock()?;
        let now = state.tick();
        let coll = state.collection_mut(database, collection)?;
        let primary_key = coll.primary_key().to_string();

        let id = match document.field(&primary_key) {
            None => DocumentId::generate(),
            Some(Value::String(given)) => DocumentId::new(given.clone()),
            Some(_) => {
                return Err(StoreError::InvalidDocument {
                    message: format!("primary key '{}' must be a string", primary_key),
                })
            }
        };
        if coll.documents.contains_key(&id) {
            return Err(StoreError::InvalidDocument {
                message: format!("duplicate primary key {}", id),
            });
        }

        document.set_field(primary_key, Value::from(&id));
        document.resolve_server_time(now);
        coll.put(id.clone(), document);
        Ok(id)
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        mut partial: Value,
    ) -> Result<()> {
        let mut state = self.lock()?;
        let now = state.tick();
        let coll = state.collection_mut(database, collection)?;

        if let Some(pk) = partial.field(coll.primary_key()) {
            if pk != &Value::from(id) {
                return Err(StoreError::InvalidDocument {
                    message: "primary key cannot be changed".to_string(),
                });
            }
        }

        let Some(mut doc) = coll.documents.remove(id) else {
            return Err(StoreError::NoSuchDocument {
                collection: collection.to_string(),
                id: id.clone(),
            });
        };
        partial.resolve_server_time(now);
        doc.merge(partial);
        coll.put(id.clone(), doc);
        Ok(())
    }

    async fn get(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Value>> {
        let state = self.lock()?;
        Ok(state
            .collection(database, collection)?
            .documents
            .get(id)
            .cloned())
    }

    async fn scan_index(
        &self,
        database: &str,
        collection: &str,
        index: &str,
        prefix: &[Value],
    ) -> Result<Vec<(DocumentId, Value)>> {
        let state = self.lock()?;
        let coll = state.collection(database, collection)?;
        let idx = coll
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::NoSuchIndex {
                collection: collection.to_string(),
                index: index.to_string(),
            })?;

        let mut hits: Vec<(&IndexKey, &DocumentId)> = idx
            .entries
            .iter()
            .filter(|(_, key)| key_has_prefix(key, prefix))
            .map(|(id, key)| (key, id))
            .collect();
        hits.sort_by(|(ka, ia), (kb, ib)| {
            Value::Array(ka.to_vec())
                .total_cmp(&Value::Array(kb.to_vec()))
                .then_with(|| ia.cmp(ib))
        });

        Ok(hits
            .into_iter()
            .filter_map(|(_, id)| coll.documents.get(id).map(|doc| (id.clone(), doc.clone())))
            .collect())
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        Ok(self.lock()?.tick())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regrid_doc_store::IndexKeyError;

    const DB: &str = "test";

    fn doc(fields: &[(&str, Value)]) -> Value {
        fields.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    async fn store_with(collection: &str) -> MemoryDocumentStore {
        let store = MemoryDocumentStore::with_database(DB);
        store
            .ensure_collection(DB, collection, &CollectionOptions::default())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_collection_is_check_or_create() {
        let store = MemoryDocumentStore::with_database(DB);
        let options = CollectionOptions {
            shards: Some(2),
            ..Default::default()
        };

        let first = store.ensure_collection(DB, "things", &options).await.unwrap();
        let second = store
            .ensure_collection(DB, "things", &CollectionOptions::default())
            .await
            .unwrap();

        assert_eq!(first, EnsureOutcome::Created);
        assert_eq!(second, EnsureOutcome::Existed);
        assert_eq!(store.list_collections(DB).await.unwrap(), vec!["things"]);
        assert_eq!(store.collection_options(DB, "things").unwrap(), options);
    }

    #[tokio::test]
    async fn missing_database_is_an_error() {
        let store = MemoryDocumentStore::new();
        let err = store.list_collections("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchDatabase { .. }));

        assert_eq!(store.create_database("nope").unwrap(), EnsureOutcome::Created);
        assert_eq!(store.create_database("nope").unwrap(), EnsureOutcome::Existed);
        assert!(store.list_collections("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_generates_id_and_resolves_server_time() {
        let store = store_with("things").await;
        let id = store
            .insert(DB, "things", doc(&[("at", Value::ServerTime)]))
            .await
            .unwrap();

        let stored = store.get(DB, "things", &id).await.unwrap().unwrap();
        assert_eq!(stored.field("id"), Some(&Value::from(&id)));
        assert!(stored.field("at").and_then(Value::as_timestamp).is_some());
    }

    #[tokio::test]
    async fn insert_rejects_non_maps_and_duplicates() {
        let store = store_with("things").await;
        let err = store.insert(DB, "things", Value::from(1i64)).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument { .. }));

        store
            .insert(DB, "things", doc(&[("id", Value::from("x"))]))
            .await
            .unwrap();
        let err = store
            .insert(DB, "things", doc(&[("id", Value::from("x"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument { .. }));
    }

    #[tokio::test]
    async fn update_merges_and_reindexes() {
        let store = store_with("files").await;
        store
            .create_index(DB, "files", IndexSpec::compound("by_status", &["status"]))
            .await
            .unwrap();

        let id = store
            .insert(DB, "files", doc(&[("status", Value::from("incomplete"))]))
            .await
            .unwrap();
        store
            .update(DB, "files", &id, doc(&[("status", Value::from("complete"))]))
            .await
            .unwrap();

        let complete = store
            .scan_index(DB, "files", "by_status", &[Value::from("complete")])
            .await
            .unwrap();
        assert_eq!(complete.len(), 1);
        assert_eq!(complete[0].0, id);

        let incomplete = store
            .scan_index(DB, "files", "by_status", &[Value::from("incomplete")])
            .await
            .unwrap();
        assert!(incomplete.is_empty());
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = store_with("files").await;
        let err = store
            .update(DB, "files", &DocumentId::new("ghost"), Value::map())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchDocument { .. }));
    }

    #[tokio::test]
    async fn failing_key_function_skips_document() {
        let store = store_with("files").await;
        store
            .create_index(
                DB,
                "files",
                IndexSpec::new("done_only", |doc: &Value| {
                    match doc.field("done") {
                        Some(Value::Bool(true)) => Ok(vec![Value::from(true)]),
                        _ => Err(IndexKeyError::rejected("not done")),
                    }
                }),
            )
            .await
            .unwrap();

        store
            .insert(DB, "files", doc(&[("done", Value::from(false))]))
            .await
            .unwrap();
        store
            .insert(DB, "files", doc(&[("done", Value::from(true))]))
            .await
            .unwrap();

        let hits = store.scan_index(DB, "files", "done_only", &[]).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.field("done"), Some(&Value::from(true)));
    }

    #[tokio::test]
    async fn index_creation_covers_existing_documents_and_rejects_duplicates() {
        let store = store_with("chunks").await;
        for num in [2i64, 0, 1] {
            store
                .insert(
                    DB,
                    "chunks",
                    doc(&[("file_id", Value::from("f")), ("num", Value::from(num))]),
                )
                .await
                .unwrap();
        }

        let spec = IndexSpec::compound("chunk_index", &["file_id", "num"]);
        store.create_index(DB, "chunks", spec.clone()).await.unwrap();
        store
            .wait_index_ready(DB, "chunks", "chunk_index")
            .await
            .unwrap();

        let err = store.create_index(DB, "chunks", spec).await.unwrap_err();
        assert!(err.is_index_exists());

        let nums: Vec<i64> = store
            .scan_index(DB, "chunks", "chunk_index", &[Value::from("f")])
            .await
            .unwrap()
            .iter()
            .filter_map(|(_, doc)| doc.field("num").and_then(Value::as_i64))
            .collect();
        assert_eq!(nums, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn wait_on_unknown_index_fails() {
        let store = store_with("chunks").await;
        let err = store
            .wait_index_ready(DB, "chunks", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchIndex { .. }));
    }

    #[tokio::test]
    async fn clock_is_monotonic() {
        let store = MemoryDocumentStore::new();
        let mut last = store.now().await.unwrap();
        for _ in 0..100 {
            let now = store.now().await.unwrap();
            assert!(now >= last);
            last = now;
        }
    }
}
