//! Append-only vector store with delete-by-id.
//!
//! Records live in insertion-ordered slots; a deleted record leaves a
//! tombstone that is squeezed out once tombstones outnumber live records.
//! Overwriting an id keeps its original position.

use crate::error::{StorageError, StorageResult};
use rand::Rng;
use sculpin_core::{VectorId, VectorRecord};
use std::collections::HashMap;

/// Tombstones are never compacted below this many slots.
const MIN_COMPACT_SLOTS: usize = 64;

#[derive(Debug, Clone)]
struct Slot {
    id: VectorId,
    vector: Vec<f32>,
    payload: Option<serde_json::Value>,
}

/// Mapping from id to fixed-dimension vector for one collection.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    slots: Vec<Option<Slot>>,
    positions: HashMap<VectorId, usize>,
}

impl VectorStore {
    /// Create an empty store for vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            slots: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Rebuild a store from records in insertion order.
    pub fn from_records(dimension: usize, records: Vec<VectorRecord>) -> StorageResult<Self> {
        let mut store = Self::new(dimension);
        for record in records {
            store.put(record.id, record.vector, record.payload, false)?;
        }
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.positions.contains_key(&id)
    }

    /// Check that `vector` could be stored here.
    pub fn validate(&self, vector: &[f32]) -> StorageResult<()> {
        if vector.len() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
            return Err(StorageError::InvalidVector(format!(
                "component {} is not a finite number",
                pos
            )));
        }
        Ok(())
    }

    /// Store a vector.
    ///
    /// Returns `true` when an existing vector was replaced, which is only
    /// allowed with `overwrite`.
    pub fn put(
        &mut self,
        id: VectorId,
        vector: Vec<f32>,
        payload: Option<serde_json::Value>,
        overwrite: bool,
    ) -> StorageResult<bool> {
        self.validate(&vector)?;

        let slot = Slot {
            id,
            vector,
            payload,
        };

        match self.positions.get(&id) {
            Some(_) if !overwrite => Err(StorageError::DuplicateId(id)),
            Some(&pos) => {
                self.slots[pos] = Some(slot);
                Ok(true)
            }
            None => {
                self.positions.insert(id, self.slots.len());
                self.slots.push(Some(slot));
                Ok(false)
            }
        }
    }

    fn slot(&self, id: VectorId) -> StorageResult<&Slot> {
        self.positions
            .get(&id)
            .and_then(|&pos| self.slots[pos].as_ref())
            .ok_or(StorageError::NotFound(id))
    }

    /// Fetch a vector.
    pub fn get(&self, id: VectorId) -> StorageResult<&[f32]> {
        self.slot(id).map(|slot| slot.vector.as_slice())
    }

    /// Fetch the payload attached to a vector, if any.
    pub fn payload(&self, id: VectorId) -> StorageResult<Option<&serde_json::Value>> {
        self.slot(id).map(|slot| slot.payload.as_ref())
    }

    /// Fetch a full owned record.
    pub fn record(&self, id: VectorId) -> StorageResult<VectorRecord> {
        self.slot(id).map(|slot| VectorRecord {
            id: slot.id,
            vector: slot.vector.clone(),
            payload: slot.payload.clone(),
        })
    }

    /// Remove a vector. Absent ids are not an error; returns whether a
    /// vector was removed.
    pub fn delete(&mut self, id: VectorId) -> bool {
        let Some(pos) = self.positions.remove(&id) else {
            return false;
        };
        self.slots[pos] = None;

        if self.slots.len() >= MIN_COMPACT_SLOTS && self.slots.len() > 2 * self.positions.len() {
            self.compact();
        }
        true
    }

    fn compact(&mut self) {
        let before = self.slots.len();
        self.slots.retain(Option::is_some);
        for (pos, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                self.positions.insert(slot.id, pos);
            }
        }
        tracing::debug!("Compacted store slots {} -> {}", before, self.slots.len());
    }

    /// Iterate live `(id, vector)` pairs in insertion order.
    ///
    /// Each call starts a fresh pass.
    pub fn scan(&self) -> Scan<'_> {
        Scan {
            slots: self.slots.iter(),
        }
    }

    /// Live ids in insertion order.
    pub fn ids(&self) -> Vec<VectorId> {
        self.scan().map(|(id, _)| id).collect()
    }

    /// Owned copies of every live record in insertion order.
    pub fn to_records(&self) -> Vec<VectorRecord> {
        self.slots
            .iter()
            .flatten()
            .map(|slot| VectorRecord {
                id: slot.id,
                vector: slot.vector.clone(),
                payload: slot.payload.clone(),
            })
            .collect()
    }

    /// Up to `n` vectors chosen uniformly without replacement.
    ///
    /// When `n` covers the whole store every vector is returned in
    /// insertion order.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<Vec<f32>> {
        let live: Vec<&Slot> = self.slots.iter().flatten().collect();
        if n >= live.len() {
            return live.into_iter().map(|slot| slot.vector.clone()).collect();
        }

        rand::seq::index::sample(rng, live.len(), n)
            .into_iter()
            .map(|i| live[i].vector.clone())
            .collect()
    }
}

/// Lazy insertion-order pass over a [`VectorStore`].
#[derive(Clone)]
pub struct Scan<'a> {
    slots: std::slice::Iter<'a, Option<Slot>>,
}

impl<'a> Iterator for Scan<'a> {
    type Item = (VectorId, &'a [f32]);

    fn next(&mut self) -> Option<Self::Item> {
        self.slots
            .by_ref()
            .flatten()
            .next()
            .map(|slot| (slot.id, slot.vector.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn id(n: u64) -> VectorId {
        VectorId(n)
    }

    #[test]
    fn test_put_then_get_returns_same_vector() {
        let mut store = VectorStore::new(3);
        store.put(id(1), vec![0.25, -1.5, 3.0], None, false).unwrap();
        assert_eq!(store.get(id(1)).unwrap(), &[0.25, -1.5, 3.0]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut store = VectorStore::new(3);
        let err = store.put(id(1), vec![1.0, 2.0], None, false).unwrap_err();
        assert!(matches!(
            err,
            StorageError::DimensionMismatch { expected: 3, got: 2 }
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut store = VectorStore::new(2);
        let err = store.put(id(1), vec![1.0, f32::NAN], None, false).unwrap_err();
        assert!(matches!(err, StorageError::InvalidVector(_)));
    }

    #[test]
    fn test_duplicate_and_overwrite() {
        let mut store = VectorStore::new(1);
        store.put(id(1), vec![1.0], None, false).unwrap();
        store.put(id(2), vec![2.0], None, false).unwrap();

        let err = store.put(id(1), vec![9.0], None, false).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(VectorId(1))));
        assert_eq!(store.get(id(1)).unwrap(), &[1.0]);

        let replaced = store
            .put(id(1), vec![9.0], Some(serde_json::json!("x")), true)
            .unwrap();
        assert!(replaced);
        assert_eq!(store.get(id(1)).unwrap(), &[9.0]);
        // Overwrite keeps the original insertion position.
        assert_eq!(store.ids(), vec![id(1), id(2)]);
        assert_eq!(store.payload(id(1)).unwrap(), Some(&serde_json::json!("x")));
    }

    #[test]
    fn test_get_missing() {
        let store = VectorStore::new(2);
        assert!(matches!(store.get(id(5)), Err(StorageError::NotFound(VectorId(5)))));
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut store = VectorStore::new(1);
        assert!(!store.delete(id(42)));
        store.put(id(42), vec![0.0], None, false).unwrap();
        assert!(store.delete(id(42)));
        assert!(!store.contains(id(42)));
        assert!(store.get(id(42)).is_err());
    }

    #[test]
    fn test_scan_is_ordered_and_restartable() {
        let mut store = VectorStore::new(1);
        for n in [5, 3, 9, 1] {
            store.put(id(n), vec![n as f32], None, false).unwrap();
        }
        store.delete(id(9));

        let scan = store.scan();
        let first: Vec<VectorId> = scan.clone().map(|(i, _)| i).collect();
        let second: Vec<VectorId> = scan.map(|(i, _)| i).collect();
        assert_eq!(first, vec![id(5), id(3), id(1)]);
        assert_eq!(first, second);
        assert_eq!(store.scan().count(), 3);
    }

    #[test]
    fn test_compaction_preserves_order_and_lookups() {
        let mut store = VectorStore::new(1);
        for n in 0..200u64 {
            store.put(id(n), vec![n as f32], None, false).unwrap();
        }
        for n in (0..200u64).filter(|n| n % 4 != 0) {
            store.delete(id(n));
        }

        assert_eq!(store.len(), 50);
        let ids = store.ids();
        assert_eq!(ids.first(), Some(&id(0)));
        assert_eq!(ids.last(), Some(&id(196)));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        for n in (0..200u64).step_by(4) {
            assert_eq!(store.get(id(n)).unwrap(), &[n as f32]);
        }
    }

    #[test]
    fn test_sample_without_replacement() {
        let mut store = VectorStore::new(1);
        for n in 0..100u64 {
            store.put(id(n), vec![n as f32], None, false).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(3);

        let mut picked: Vec<u32> = store
            .sample(30, &mut rng)
            .iter()
            .map(|v| v[0] as u32)
            .collect();
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), 30);

        assert_eq!(store.sample(500, &mut rng).len(), 100);
    }

    #[test]
    fn test_records_roundtrip_through_from_records() {
        let mut store = VectorStore::new(2);
        store
            .put(id(7), vec![1.0, 2.0], Some(serde_json::json!({"a": 1})), false)
            .unwrap();
        store.put(id(3), vec![3.0, 4.0], None, false).unwrap();

        let rebuilt = VectorStore::from_records(2, store.to_records()).unwrap();
        assert_eq!(rebuilt.ids(), vec![id(7), id(3)]);
        assert_eq!(rebuilt.record(id(7)).unwrap(), store.record(id(7)).unwrap());
    }
}
