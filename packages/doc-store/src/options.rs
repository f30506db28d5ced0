//! Collection creation options.

use serde::{Deserialize, Serialize};

/// Write durability requested for a collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    #[default]
    Hard,
    Soft,
}

/// Options forwarded to the store when a collection is created.
///
/// Every field is optional; a store applies its own defaults for anything
/// left unset and ignores options it has no notion of.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    /// Name of the primary key field.
    pub primary_key: Option<String>,
    /// Number of shards.
    pub shards: Option<u32>,
    /// Replicas per shard.
    pub replicas: Option<u32>,
    pub durability: Option<Durability>,
}

/// Result of an atomic check-or-create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// This call created the collection.
    Created,
    /// The collection was already there.
    Existed,
}

impl EnsureOutcome {
    pub fn was_created(self) -> bool {
        matches!(self, EnsureOutcome::Created)
    }
}
