//! Index sets: the named, finite dimensions that model values vary over.
//!
//! A flat index set is an ordered list of named indices. A branched index set
//! additionally records, for every index, the indices of the same set that feed
//! into it (for example the upstream reaches of a river reach). Branch inputs
//! must be declared before the index they feed so that index order is always an
//! upstream-first evaluation order.

use crate::errors::{CatchmentError, CatchmentResult};
use crate::handles::{Handle, Index, IndexSetH};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Topology of an index set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexSetKind {
    Flat,
    Branched,
}

/// The indices of one index set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSetData {
    pub name: String,
    pub kind: IndexSetKind,
    pub indices: Vec<String>,
    /// Upstream indices of each index. Empty for flat index sets.
    pub branch_inputs: Vec<Vec<usize>>,
}

impl IndexSetData {
    pub fn flat(name: &str, indices: &[&str]) -> CatchmentResult<Self> {
        let data = Self {
            name: name.to_string(),
            kind: IndexSetKind::Flat,
            indices: indices.iter().map(|s| s.to_string()).collect(),
            branch_inputs: vec![],
        };
        data.check_unique()?;
        Ok(data)
    }

    /// Build a branched index set from `(index, [branch inputs])` pairs.
    pub fn branched(name: &str, indices: &[(&str, &[&str])]) -> CatchmentResult<Self> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut branch_inputs = Vec::with_capacity(indices.len());
        for (position, (index, inputs)) in indices.iter().enumerate() {
            let mut resolved = Vec::with_capacity(inputs.len());
            for input in inputs.iter() {
                match positions.get(input) {
                    Some(&p) => resolved.push(p),
                    None => {
                        return Err(CatchmentError::InvalidBranchInput {
                            index_set: name.to_string(),
                            index: index.to_string(),
                            input: input.to_string(),
                        })
                    }
                }
            }
            branch_inputs.push(resolved);
            positions.insert(index, position);
        }

        let data = Self {
            name: name.to_string(),
            kind: IndexSetKind::Branched,
            indices: indices.iter().map(|(index, _)| index.to_string()).collect(),
            branch_inputs,
        };
        data.check_unique()?;
        Ok(data)
    }

    pub fn count(&self) -> usize {
        self.indices.len()
    }

    pub fn position(&self, index: &str) -> Option<usize> {
        self.indices.iter().position(|i| i == index)
    }

    pub fn branch_inputs(&self, position: usize) -> &[usize] {
        self.branch_inputs
            .get(position)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn check_unique(&self) -> CatchmentResult<()> {
        for (i, index) in self.indices.iter().enumerate() {
            if self.indices[..i].contains(index) {
                return Err(CatchmentError::DuplicateName {
                    kind: "index",
                    name: format!("{}/{}", self.name, index),
                });
            }
        }
        Ok(())
    }
}

/// All index sets of a finalized model, addressed by handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStructure {
    sets: Vec<IndexSetData>,
}

impl IndexStructure {
    pub fn new(sets: Vec<IndexSetData>) -> Self {
        Self { sets }
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of indices in the set. Unknown handles count zero.
    pub fn count(&self, set: IndexSetH) -> usize {
        self.sets.get(set.position()).map_or(0, IndexSetData::count)
    }

    pub fn data(&self, set: IndexSetH) -> CatchmentResult<&IndexSetData> {
        self.sets
            .get(set.position())
            .ok_or(CatchmentError::UnknownHandle {
                kind: IndexSetH::KIND,
                handle: set.0,
            })
    }

    pub fn name(&self, set: IndexSetH) -> &str {
        self.sets
            .get(set.position())
            .map_or("<unknown>", |s| s.name.as_str())
    }

    pub fn index_name(&self, set: IndexSetH, position: usize) -> &str {
        self.sets
            .get(set.position())
            .and_then(|s| s.indices.get(position))
            .map_or("<unknown>", String::as_str)
    }

    pub fn branch_inputs(&self, set: IndexSetH, position: usize) -> &[usize] {
        self.sets
            .get(set.position())
            .map(|s| s.branch_inputs(position))
            .unwrap_or(&[])
    }

    /// Resolve an index by index set handle and index name.
    pub fn index(&self, set: IndexSetH, name: &str) -> CatchmentResult<Index> {
        let data = self.data(set)?;
        data.position(name)
            .map(|position| Index::new(set, position))
            .ok_or_else(|| CatchmentError::UnknownName {
                kind: "index",
                name: format!("{}/{}", data.name, name),
            })
    }

    pub fn find(&self, name: &str) -> CatchmentResult<IndexSetH> {
        self.sets
            .iter()
            .position(|s| s.name == name)
            .map(IndexSetH::from_position)
            .ok_or_else(|| CatchmentError::UnknownName {
                kind: IndexSetH::KIND,
                name: name.to_string(),
            })
    }

    /// Checks that an explicit index is within range.
    pub fn check(&self, index: Index) -> CatchmentResult<()> {
        let count = self.data(index.set)?.count();
        if index.position >= count {
            return Err(CatchmentError::IndexOutOfRange {
                index_set: self.name(index.set).to_string(),
                index: index.position,
                count,
            });
        }
        Ok(())
    }
}
