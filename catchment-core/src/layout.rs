//! Storage addressing.
//!
//! Parameters, inputs and results live in flat arrays. Entities that vary over
//! the same ordered list of index sets share a *storage unit*; within a unit
//! values are laid out index-combination-major, so all entities of the unit for
//! one index combination are adjacent. The last index set varies fastest.
//!
//! The address of a value is a pure function of the entity's ordered index set
//! list and the index counts, so external readers and writers can reconstruct it
//! from a serialized [`StorageStructure`].

use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{Index, IndexSetH};
use crate::index_set::IndexStructure;
use serde::{Deserialize, Serialize};

/// Anything that can say which index is selected for an index set.
pub trait TupleLookup {
    fn position(&self, set: IndexSetH) -> usize;
}

/// The index currently selected in every index set of a model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexTuple(Vec<usize>);

impl IndexTuple {
    pub fn new(index_set_count: usize) -> Self {
        Self(vec![0; index_set_count])
    }

    pub fn get(&self, set: IndexSetH) -> usize {
        self.0[set.0 as usize]
    }

    pub fn set(&mut self, set: IndexSetH, position: usize) {
        self.0[set.0 as usize] = position;
    }

    /// Override some index sets with explicit indices.
    pub fn pinned<'a>(&'a self, pins: &'a [Index]) -> PinnedTuple<'a> {
        PinnedTuple { base: self, pins }
    }
}

impl TupleLookup for IndexTuple {
    fn position(&self, set: IndexSetH) -> usize {
        self.get(set)
    }
}

/// An [`IndexTuple`] with some index sets explicitly pinned.
#[derive(Debug, Clone, Copy)]
pub struct PinnedTuple<'a> {
    base: &'a IndexTuple,
    pins: &'a [Index],
}

impl TupleLookup for PinnedTuple<'_> {
    fn position(&self, set: IndexSetH) -> usize {
        self.pins
            .iter()
            .find(|pin| pin.set == set)
            .map_or_else(|| self.base.get(set), |pin| pin.position)
    }
}

impl TupleLookup for [Index] {
    /// Index sets missing from the slice resolve to the first index.
    fn position(&self, set: IndexSetH) -> usize {
        self.iter()
            .find(|pin| pin.set == set)
            .map_or(0, |pin| pin.position)
    }
}

/// Address of one entity: ordered index sets with their strides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    pub index_sets: Vec<IndexSetH>,
    pub strides: Vec<usize>,
    pub base: usize,
}

impl StorageLayout {
    /// Position of the value for the given index combination.
    pub fn offset<T: TupleLookup + ?Sized>(&self, tuple: &T) -> usize {
        self.index_sets
            .iter()
            .zip(&self.strides)
            .fold(self.base, |acc, (set, stride)| {
                acc + stride * tuple.position(*set)
            })
    }

    /// First index set of the layout that `pins` does not mention.
    pub fn missing_index(&self, pins: &[Index]) -> Option<IndexSetH> {
        self.index_sets
            .iter()
            .copied()
            .find(|set| !pins.iter().any(|pin| pin.set == *set))
    }

    /// Every offset of the entity, in index order.
    pub fn all_offsets(&self, indices: &IndexStructure) -> Vec<usize> {
        let counts: Vec<usize> = self.index_sets.iter().map(|s| indices.count(*s)).collect();
        let total: usize = counts.iter().product();
        let mut offsets = Vec::with_capacity(total);
        let mut position = vec![0usize; counts.len()];
        for _ in 0..total {
            let offset = self
                .strides
                .iter()
                .zip(&position)
                .fold(self.base, |acc, (stride, p)| acc + stride * p);
            offsets.push(offset);
            for level in (0..counts.len()).rev() {
                position[level] += 1;
                if position[level] < counts[level] {
                    break;
                }
                position[level] = 0;
            }
        }
        offsets
    }
}

/// Entities sharing one ordered index set list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub index_sets: Vec<IndexSetH>,
    /// Handle positions of the entities in the unit.
    pub members: Vec<usize>,
    pub base: usize,
    pub size: usize,
}

/// Addressing of one kind of storage (parameters, inputs or results).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStructure {
    pub names: Vec<String>,
    layouts: Vec<Option<StorageLayout>>,
    units: Vec<StorageUnit>,
    size: usize,
}

impl StorageStructure {
    /// Lay out entities. `entries[i]` holds the index sets of the entity with handle
    /// position `i`, or `None` if it has no storage. Index set lists are sorted by handle.
    pub fn build(
        names: Vec<String>,
        entries: &[Option<Vec<IndexSetH>>],
        indices: &IndexStructure,
    ) -> Self {
        let mut units: Vec<StorageUnit> = Vec::new();
        for (position, entry) in entries.iter().enumerate() {
            let Some(sets) = entry else { continue };
            let mut sets = sets.clone();
            sets.sort();
            sets.dedup();
            match units.iter_mut().find(|u| u.index_sets == sets) {
                Some(unit) => unit.members.push(position),
                None => units.push(StorageUnit {
                    index_sets: sets,
                    members: vec![position],
                    base: 0,
                    size: 0,
                }),
            }
        }

        let mut layouts: Vec<Option<StorageLayout>> = vec![None; entries.len()];
        let mut base = 0;
        for unit in units.iter_mut() {
            let member_count = unit.members.len();
            let mut strides = vec![0; unit.index_sets.len()];
            let mut stride = member_count;
            for (k, set) in unit.index_sets.iter().enumerate().rev() {
                strides[k] = stride;
                stride *= indices.count(*set);
            }
            unit.base = base;
            unit.size = stride;
            for (local, member) in unit.members.iter().enumerate() {
                layouts[*member] = Some(StorageLayout {
                    index_sets: unit.index_sets.clone(),
                    strides: strides.clone(),
                    base: base + local,
                });
            }
            base += stride;
        }

        Self {
            names,
            layouts,
            units,
            size: base,
        }
    }

    /// Total number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn layout(&self, position: usize) -> Option<&StorageLayout> {
        self.layouts.get(position).and_then(Option::as_ref)
    }

    /// Layout of an entity that must have storage.
    pub fn require(&self, position: usize, kind: &'static str) -> CatchmentResult<&StorageLayout> {
        self.layout(position).ok_or(CatchmentError::UnknownHandle {
            kind,
            handle: position as u32,
        })
    }

    pub fn units(&self) -> &[StorageUnit] {
        &self.units
    }

    pub fn name(&self, position: usize) -> &str {
        self.names
            .get(position)
            .map_or("<unknown>", String::as_str)
    }
}
