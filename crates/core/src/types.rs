//! Basic value types shared across tidemark

use serde::{Deserialize, Serialize};

/// Sequence/change number assigned by the upstream source
///
/// SCNs are source-scoped and caller-supplied; tidemark only compares them.
pub type Scn = u64;

/// A change to apply to a store: a new value or a tombstone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation<V> {
    /// Write `V` under the key
    Put(V),
    /// Remove the key
    Delete,
}

impl<V> Mutation<V> {
    /// True for the tombstone variant
    pub fn is_delete(&self) -> bool {
        matches!(self, Mutation::Delete)
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Put(_) => "put",
            Mutation::Delete => "delete",
        }
    }
}

impl<V> From<Option<V>> for Mutation<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(v) => Mutation::Put(v),
            None => Mutation::Delete,
        }
    }
}
