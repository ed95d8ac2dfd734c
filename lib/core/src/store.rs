use crate::{Error, ItemId, Result, Vector};
use ahash::AHashMap;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

/// Keyed storage for the raw item vectors of a forest.
///
/// Vectors live in one contiguous buffer, `dim` floats per slot. Slots are
/// assigned in insertion order and re-inserting an id overwrites its slot in
/// place, so iteration order is stable and independent of hashing.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawStore")]
pub struct VectorStore {
    dim: usize,
    data: Vec<f32>,
    ids: Vec<ItemId>,
    slots: AHashMap<ItemId, usize>,
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            ids: Vec::new(),
            slots: AHashMap::new(),
        }
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Store `vector` under `id`, overwriting any previous vector.
    ///
    /// The store is left untouched when validation fails.
    pub fn insert(&mut self, id: ItemId, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidArgument(format!(
                "item {id} has non-finite components"
            )));
        }

        match self.slots.get(&id) {
            Some(&slot) => {
                let start = slot * self.dim;
                self.data[start..start + self.dim].copy_from_slice(vector);
            }
            None => {
                self.slots.insert(id, self.ids.len());
                self.ids.push(id);
                self.data.extend_from_slice(vector);
            }
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, id: ItemId) -> Result<&[f32]> {
        self.slots
            .get(&id)
            .map(|&slot| self.slot(slot))
            .ok_or(Error::UnknownItem(id))
    }

    pub fn get_vector(&self, id: ItemId) -> Result<Vector> {
        self.get(id).map(Vector::from_slice)
    }

    #[inline]
    pub fn contains(&self, id: ItemId) -> bool {
        self.slots.contains_key(&id)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Item ids in insertion order
    #[inline]
    pub fn ids(&self) -> &[ItemId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &[f32])> {
        self.ids
            .iter()
            .enumerate()
            .map(move |(slot, id)| (*id, self.slot(slot)))
    }

    #[inline(always)]
    fn slot(&self, slot: usize) -> &[f32] {
        let start = slot * self.dim;
        &self.data[start..start + self.dim]
    }
}

impl Serialize for VectorStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("VectorStore", 3)?;
        state.serialize_field("dim", &self.dim)?;
        state.serialize_field("ids", &self.ids)?;
        state.serialize_field("data", &self.data)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct RawStore {
    dim: usize,
    ids: Vec<ItemId>,
    data: Vec<f32>,
}

impl TryFrom<RawStore> for VectorStore {
    type Error = Error;

    fn try_from(raw: RawStore) -> Result<Self> {
        if raw.data.len() != raw.ids.len() * raw.dim {
            return Err(Error::Corrupted(format!(
                "vector buffer holds {} floats, expected {} items x {} dims",
                raw.data.len(),
                raw.ids.len(),
                raw.dim
            )));
        }

        let mut slots = AHashMap::with_capacity(raw.ids.len());
        for (slot, id) in raw.ids.iter().enumerate() {
            if slots.insert(*id, slot).is_some() {
                return Err(Error::Corrupted(format!("duplicate item id {id}")));
            }
        }

        Ok(Self {
            dim: raw.dim,
            data: raw.data,
            ids: raw.ids,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut store = VectorStore::new(2);
        store.insert(7, &[1.0, 2.0]).unwrap();
        store.insert(-3, &[3.0, 4.0]).unwrap();

        assert_eq!(store.count(), 2);
        assert_eq!(store.get(7).unwrap(), &[1.0, 2.0]);
        assert_eq!(store.get(-3).unwrap(), &[3.0, 4.0]);
        assert_eq!(store.ids(), &[7, -3]);
    }

    #[test]
    fn test_reinsert_overwrites() {
        let mut store = VectorStore::new(2);
        store.insert(1, &[1.0, 1.0]).unwrap();
        store.insert(2, &[2.0, 2.0]).unwrap();
        store.insert(1, &[9.0, 9.0]).unwrap();

        assert_eq!(store.count(), 2);
        assert_eq!(store.get(1).unwrap(), &[9.0, 9.0]);
        assert_eq!(store.ids(), &[1, 2]);
    }

    #[test]
    fn test_dimension_mismatch_leaves_store_unchanged() {
        let mut store = VectorStore::new(3);
        store.insert(1, &[0.0, 0.0, 0.0]).unwrap();

        let err = store.insert(2, &[1.0, 2.0]).unwrap_err();
        assert_eq!(err, Error::DimensionMismatch { expected: 3, actual: 2 });
        assert_eq!(store.count(), 1);
        assert!(!store.contains(2));
    }

    #[test]
    fn test_rejects_non_finite() {
        let mut store = VectorStore::new(1);
        assert!(matches!(
            store.insert(1, &[f32::NAN]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_item() {
        let store = VectorStore::new(2);
        assert_eq!(store.get(42).unwrap_err(), Error::UnknownItem(42));
    }
}
