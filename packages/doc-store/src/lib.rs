//! regrid document-store layer
//!
//! The capability contract a bucket needs from its backing database:
//! - `Value`: the document tree (maps, scalars, bytes, timestamps)
//! - `DocumentStore`: collections, secondary indexes, insert/update/get
//! - `IndexSpec`: named index with a store-evaluated key function
//! - `StoreError`: schema and transport failures
//!
//! Nothing here knows about files or chunks. Drivers for real databases
//! implement `DocumentStore`; `regrid-memory-store` provides an in-process
//! implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use regrid_doc_store::{DocumentStore, Value};
//!
//! async fn add(store: &dyn DocumentStore) -> regrid_doc_store::Result<()> {
//!     let doc: Value = [("name", Value::from("a"))].into_iter().collect();
//!     let id = store.insert("db", "things", doc).await?;
//!     assert!(store.get("db", "things", &id).await?.is_some());
//!     Ok(())
//! }
//! ```

pub use bytes::Bytes;

mod error;
mod id;
mod index;
mod options;
mod traits;
mod value;

pub use error::{Result, StoreError};
pub use id::DocumentId;
pub use index::{IndexKey, IndexKeyError, IndexKeyFn, IndexSpec};
pub use options::{CollectionOptions, Durability, EnsureOutcome};
pub use traits::{key_has_prefix, DocumentStore};
pub use value::Value;
