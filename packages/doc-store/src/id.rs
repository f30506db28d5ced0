//! Generated document identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The primary key a store generates for an inserted document.
///
/// Stores are free to choose the format; the in-memory store uses random
/// UUIDs, like most document databases do for generated keys.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap an identifier produced by a store.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&DocumentId> for crate::Value {
    fn from(id: &DocumentId) -> Self {
        crate::Value::String(id.0.clone())
    }
}

impl From<DocumentId> for crate::Value {
    fn from(id: DocumentId) -> Self {
        crate::Value::String(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        let a = DocumentId::generate();
        let b = DocumentId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn display_and_value_conversion() {
        let id = DocumentId::new("abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(crate::Value::from(&id), crate::Value::from("abc"));
    }
}
