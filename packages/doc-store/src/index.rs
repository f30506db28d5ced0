//! Secondary index definitions.
//!
//! An index is a name plus a key function. The store evaluates the key
//! function for every document it holds in the collection; a document whose
//! key computation fails is left out of that index instead of failing the
//! write. This is how conditional indexes (for example "complete files
//! only") are expressed.

use std::fmt;
use std::sync::Arc;

use crate::Value;

/// Errors raised while computing an index key for one document.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexKeyError {
    /// The document lacks a field the key needs.
    #[error("missing field '{field}'")]
    MissingField { field: String },

    /// A field has the wrong kind of value.
    #[error("field '{field}' is not a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    /// The key function rejected the document on purpose.
    #[error("{message}")]
    Rejected { message: String },
}

impl IndexKeyError {
    pub fn rejected(message: impl Into<String>) -> Self {
        IndexKeyError::Rejected {
            message: message.into(),
        }
    }
}

/// A composite index key, compared with [`Value::total_cmp`] element-wise.
pub type IndexKey = Vec<Value>;

/// Computes the index key of a document.
pub type IndexKeyFn = Arc<dyn Fn(&Value) -> Result<IndexKey, IndexKeyError> + Send + Sync>;

/// A named secondary index.
#[derive(Clone)]
pub struct IndexSpec {
    pub name: String,
    pub key: IndexKeyFn,
}

impl IndexSpec {
    /// Index with an arbitrary key function.
    pub fn new<F>(name: impl Into<String>, key: F) -> Self
    where
        F: Fn(&Value) -> Result<IndexKey, IndexKeyError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            key: Arc::new(key),
        }
    }

    /// Compound index over top-level fields, in order.
    ///
    /// Missing fields contribute `Null` to the key.
    pub fn compound(name: impl Into<String>, fields: &[&str]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        Self::new(name, move |doc: &Value| {
            Ok(fields
                .iter()
                .map(|field| doc.field(field).cloned().unwrap_or(Value::Null))
                .collect())
        })
    }

    /// Compute this index's key for a document.
    pub fn key_for(&self, doc: &Value) -> Result<IndexKey, IndexKeyError> {
        (self.key)(doc)
    }
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_key_uses_null_for_missing_fields() {
        let index = IndexSpec::compound("by_status", &["status", "finished_at"]);
        let doc: Value = [("status", Value::from("incomplete"))].into_iter().collect();

        let key = index.key_for(&doc).unwrap();
        assert_eq!(key, vec![Value::from("incomplete"), Value::Null]);
    }

    #[test]
    fn custom_key_can_reject() {
        let index = IndexSpec::new("never", |_doc: &Value| {
            Err(IndexKeyError::rejected("not indexed"))
        });
        let err = index.key_for(&Value::map()).unwrap_err();
        assert_eq!(err.to_string(), "not indexed");
    }

    #[test]
    fn debug_shows_name() {
        let index = IndexSpec::compound("chunk_index", &["file_id", "num"]);
        assert!(format!("{:?}", index).contains("chunk_index"));
    }
}
