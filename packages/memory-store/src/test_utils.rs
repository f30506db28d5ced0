//! Instrumentation for exercising bucket code against a store.
//!
//! [`InstrumentedStore`] wraps any `DocumentStore`, counts calls per
//! operation, tracks how many inserts are in flight at once, and can inject
//! failures or delays.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regrid_doc_store::{
    CollectionOptions, DocumentId, DocumentStore, EnsureOutcome, IndexSpec, Result, StoreError,
    Value,
};

/// The store operations, for counting and failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    ListCollections,
    EnsureCollection,
    ListIndexes,
    CreateIndex,
    WaitIndexReady,
    Insert,
    Update,
    Get,
    ScanIndex,
    Now,
}

#[derive(Default)]
struct Faults {
    always: BTreeSet<Operation>,
    /// collection -> number of inserts allowed to succeed
    insert_budget: BTreeMap<String, usize>,
    insert_delay: Option<Duration>,
}

/// A `DocumentStore` wrapper that records and perturbs traffic.
pub struct InstrumentedStore<S> {
    inner: S,
    calls: Mutex<BTreeMap<Operation, usize>>,
    faults: Mutex<Faults>,
    inserts_in_flight: AtomicUsize,
    max_inserts_in_flight: AtomicUsize,
    delay_counter: AtomicUsize,
}

impl<S: DocumentStore> InstrumentedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            inserts_in_flight: AtomicUsize::new(0),
            max_inserts_in_flight: AtomicUsize::new(0),
            delay_counter: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Calls made so far for one operation.
    pub fn calls(&self, op: Operation) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Calls made so far across all operations.
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Highest number of inserts observed running at the same time.
    pub fn max_inserts_in_flight(&self) -> usize {
        self.max_inserts_in_flight.load(Ordering::SeqCst)
    }

    /// Make every call of `op` fail.
    pub fn fail_always(&self, op: Operation) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.always.insert(op);
        }
    }

    /// Stop failing `op`.
    pub fn heal(&self, op: Operation) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.always.remove(&op);
        }
    }

    /// Let `successes` more inserts into `collection` succeed, then fail the rest.
    pub fn fail_inserts_after(&self, collection: &str, successes: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults
                .insert_budget
                .insert(collection.to_string(), successes);
        }
    }

    /// Delay inserts by a varying multiple of `base` so that concurrent
    /// writes finish out of submission order.
    pub fn delay_inserts(&self, base: Duration) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert_delay = Some(base);
        }
    }

    fn record(&self, op: Operation) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(op).or_insert(0) += 1;
        }
        let faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::other("lock poisoned"))?;
        if faults.always.contains(&op) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn take_insert_budget(&self, collection: &str) -> Result<Option<Duration>> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::other("lock poisoned"))?;
        if let Some(budget) = faults.insert_budget.get_mut(collection) {
            if *budget == 0 {
                return Err(injected(Operation::Insert));
            }
            *budget -= 1;
        }
        Ok(faults.insert_delay)
    }
}

fn injected(op: Operation) -> StoreError {
    StoreError::Transport(Box::new(std::io::Error::other(format!(
        "injected {:?} failure",
        op
    ))))
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for InstrumentedStore<S> {
    async fn list_collections(&self, database: &str) -> Result<Vec<String>> {
        self.record(Operation::ListCollections)?;
        self.inner.list_collections(database).await
    }

    async fn ensure_collection(
        &self,
        database: &str,
        collection: &str,
        options: &CollectionOptions,
    ) -> Result<EnsureOutcome> {
        self.record(Operation::EnsureCollection)?;
        self.inner
            .ensure_collection(database, collection, options)
            .await
    }

    async fn list_indexes(&self, database: &str, collection: &str) -> Result<Vec<String>> {
        self.record(Operation::ListIndexes)?;
        self.inner.list_indexes(database, collection).await
    }

    async fn create_index(
        &self,
        database: &str,
        collection: &str,
        index: IndexSpec,
    ) -> Result<()> {
        self.record(Operation::CreateIndex)?;
        self.inner.create_index(database, collection, index).await
    }

    async fn wait_index_ready(
        &self,
        database: &str,
        collection: &str,
        index: &str,
    ) -> Result<()> {
        self.record(Operation::WaitIndexReady)?;
        self.inner
            .wait_index_ready(database, collection, index)
            .await
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        document: Value,
    ) -> Result<DocumentId> {
        self.record(Operation::Insert)?;

        let running = self.inserts_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inserts_in_flight
            .fetch_max(running, Ordering::SeqCst);
        let _guard = InFlight {
            counter: &self.inserts_in_flight,
        };

        let delay = self.take_insert_budget(collection)?;
        if let Some(base) = delay {
            let n = self.delay_counter.fetch_add(1, Ordering::SeqCst);
            // 3, 1, 2, 0, 3, 1, ... multiples of base
            let factor = [3u32, 1, 2, 0][n % 4];
            tokio::time::sleep(base * factor).await;
        }
        self.inner.insert(database, collection, document).await
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
        partial: Value,
    ) -> Result<()> {
        self.record(Operation::Update)?;
        self.inner.update(database, collection, id, partial).await
    }

    async fn get(
        &self,
        database: &str,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Value>> {
        self.record(Operation::Get)?;
        self.inner.get(database, collection, id).await
    }

    async fn scan_index(
        &self,
        database: &str,
        collection: &str,
        index: &str,
        prefix: &[Value],
    ) -> Result<Vec<(DocumentId, Value)>> {
        self.record(Operation::ScanIndex)?;
        self.inner
            .scan_index(database, collection, index, prefix)
            .await
    }

    async fn now(&self) -> Result<DateTime<Utc>> {
        self.record(Operation::Now)?;
        self.inner.now().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDocumentStore;

    #[tokio::test]
    async fn counts_calls_and_injects_failures() {
        let store = InstrumentedStore::new(MemoryDocumentStore::with_database("db"));
        store
            .ensure_collection("db", "c", &CollectionOptions::default())
            .await
            .unwrap();
        assert_eq!(store.calls(Operation::EnsureCollection), 1);

        store.fail_always(Operation::ListCollections);
        assert!(store.list_collections("db").await.is_err());
        store.heal(Operation::ListCollections);
        assert!(store.list_collections("db").await.is_ok());
        assert_eq!(store.calls(Operation::ListCollections), 2);
        assert_eq!(store.total_calls(), 3);
    }

    #[tokio::test]
    async fn insert_budget_runs_out() {
        let store = InstrumentedStore::new(MemoryDocumentStore::with_database("db"));
        store
            .ensure_collection("db", "c", &CollectionOptions::default())
            .await
            .unwrap();
        store.fail_inserts_after("c", 1);

        assert!(store.insert("db", "c", Value::map()).await.is_ok());
        assert!(store.insert("db", "c", Value::map()).await.is_err());
        assert_eq!(store.max_inserts_in_flight(), 1);
    }
}
