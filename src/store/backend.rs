//! Storage medium abstraction.
//!
//! A `KvBackend` is an ordered byte map. It knows nothing about grants: the
//! [`GrantStore`](crate::store::GrantStore) encodes keys and values on top of it.

use std::ops::Bound;

use crate::error::StorageError;

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WriteOp {
    Put {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Delete {
        #[serde(with = "serde_bytes")]
        key: Vec<u8>,
    },
}

/// Mutations applied together: a reader observes all of them or none.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Ordered key-value medium underneath the grant store.
///
/// Implementations must make each `write` atomic and each `range` call a consistent read.
/// Nothing is held between calls, so scans that span several `range` calls may observe
/// writes committed in between.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn write(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// Returns up to `limit` entries within the bounds, in ascending key order.
    fn range(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;
}

/// Whether the bounds select nothing. `BTreeMap::range` panics on inverted bounds, so
/// backends check this first.
pub(crate) fn is_empty_range(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
        (Bound::Included(lo), Bound::Excluded(hi))
        | (Bound::Excluded(lo), Bound::Included(hi))
        | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_range_detection() {
        let a: &[u8] = &[1];
        let b: &[u8] = &[2];
        assert!(!is_empty_range(Bound::Included(a), Bound::Included(a)));
        assert!(is_empty_range(Bound::Excluded(a), Bound::Excluded(a)));
        assert!(is_empty_range(Bound::Included(b), Bound::Excluded(a)));
        assert!(!is_empty_range(Bound::Excluded(a), Bound::Excluded(b)));
        assert!(!is_empty_range(Bound::Unbounded, Bound::Excluded(a)));
    }

    #[test]
    fn test_batch_builder() {
        let mut batch = WriteBatch::new();
        batch.put(vec![1], vec![9]).delete(vec![2]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.ops[1], WriteOp::Delete { key: vec![2] });
    }
}
