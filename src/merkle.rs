//! Authenticated map backed by a fixed-height Poseidon Merkle tree.
//!
//! Leaves are laid out in insertion order: the `i`-th distinct key inserted
//! occupies leaf `i`, holding `H(key || value)`, and unused leaves are zero.
//! Every non-empty node is cached, so an insertion rehashes only its own path
//! and a witness is read straight from the cache.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use pasta_curves::pallas;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::FieldBytes;
use crate::utils::poseidon_hash;
use crate::MAP_HEIGHT;

/// Maximum number of entries a map of height [`MAP_HEIGHT`] can hold.
pub const MAP_CAPACITY: usize = 1 << MAP_HEIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("authenticated map is full ({0} entries)")]
pub struct MapFull(pub usize);

/// Proof that `key -> value` is present in a map with a given root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipWitness {
    pub key: FieldBytes,
    pub value: FieldBytes,
    pub index: usize,
    pub siblings: Vec<FieldBytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MapSnapshot", into = "MapSnapshot")]
pub struct MerkleMap {
    positions: BTreeMap<FieldBytes, usize>,
    leaves: Vec<(FieldBytes, FieldBytes)>,
    /// `nodes[h]` holds the non-empty nodes at height `h`; `nodes[MAP_HEIGHT]`
    /// is the root once anything has been inserted.
    nodes: Vec<Vec<pallas::Base>>,
}

/// Persisted form: entries in leaf order. Nodes are never stored.
#[derive(Serialize, Deserialize)]
struct MapSnapshot {
    entries: Vec<(FieldBytes, FieldBytes)>,
}

impl TryFrom<MapSnapshot> for MerkleMap {
    type Error = MapFull;

    fn try_from(snapshot: MapSnapshot) -> Result<Self, MapFull> {
        MerkleMap::from_entries(snapshot.entries)
    }
}

impl From<MerkleMap> for MapSnapshot {
    fn from(map: MerkleMap) -> Self {
        MapSnapshot {
            entries: map.leaves,
        }
    }
}

fn leaf_hash(key: &FieldBytes, value: &FieldBytes) -> pallas::Base {
    poseidon_hash(key.to_field(), value.to_field())
}

/// Roots of all-empty subtrees, indexed by level (0 = leaf).
fn empty_subtrees() -> &'static [pallas::Base] {
    static ZEROS: OnceLock<Vec<pallas::Base>> = OnceLock::new();
    ZEROS.get_or_init(|| {
        let mut zeros = Vec::with_capacity(MAP_HEIGHT + 1);
        zeros.push(pallas::Base::zero());
        for level in 0..MAP_HEIGHT {
            let below = zeros[level];
            zeros.push(poseidon_hash(below, below));
        }
        zeros
    })
}

impl Default for MerkleMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MerkleMap {
    pub fn new() -> Self {
        MerkleMap {
            positions: BTreeMap::new(),
            leaves: Vec::new(),
            nodes: vec![Vec::new(); MAP_HEIGHT + 1],
        }
    }

    /// Builds a map from entries in leaf order, hashing every level once.
    ///
    /// A repeated key keeps its first position and takes the last value.
    pub fn from_entries<I>(entries: I) -> Result<Self, MapFull>
    where
        I: IntoIterator<Item = (FieldBytes, FieldBytes)>,
    {
        let mut map = MerkleMap::new();
        for (key, value) in entries {
            match map.positions.get(&key) {
                Some(&position) => map.leaves[position].1 = value,
                None if map.leaves.len() >= MAP_CAPACITY => return Err(MapFull(MAP_CAPACITY)),
                None => {
                    map.positions.insert(key, map.leaves.len());
                    map.leaves.push((key, value));
                }
            }
        }
        map.rebuild();
        Ok(map)
    }

    /// Inserts `key -> value`.
    ///
    /// Returns `Ok(false)` without touching the root when the key is already
    /// present with the same value. A new value for an existing key replaces
    /// the leaf in place.
    pub fn insert(&mut self, key: FieldBytes, value: FieldBytes) -> Result<bool, MapFull> {
        let position = match self.positions.get(&key) {
            Some(&position) if self.leaves[position].1 == value => return Ok(false),
            Some(&position) => {
                self.leaves[position].1 = value;
                position
            }
            None if self.leaves.len() >= MAP_CAPACITY => return Err(MapFull(MAP_CAPACITY)),
            None => {
                let position = self.leaves.len();
                self.positions.insert(key, position);
                self.leaves.push((key, value));
                position
            }
        };
        self.update_path(position, leaf_hash(&key, &value));
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, key: &FieldBytes) -> bool {
        self.positions.contains_key(key)
    }

    #[must_use]
    pub fn root(&self) -> FieldBytes {
        let root = self.nodes[MAP_HEIGHT]
            .first()
            .copied()
            .unwrap_or(empty_subtrees()[MAP_HEIGHT]);
        FieldBytes::from_field(root)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Keys in ascending numeric order.
    pub fn keys(&self) -> impl Iterator<Item = &FieldBytes> {
        self.positions.keys()
    }

    /// Builds a membership witness for `key` against the current root.
    #[must_use]
    pub fn witness(&self, key: &FieldBytes) -> Option<MembershipWitness> {
        let index = *self.positions.get(key)?;
        let zeros = empty_subtrees();

        let siblings = (0..MAP_HEIGHT)
            .map(|height| {
                let sibling = (index >> height) ^ 1;
                let node = self.nodes[height].get(sibling).copied();
                FieldBytes::from_field(node.unwrap_or(zeros[height]))
            })
            .collect();

        Some(MembershipWitness {
            key: *key,
            value: self.leaves[index].1,
            index,
            siblings,
        })
    }

    /// Rehashes the path from leaf `position` to the root.
    fn update_path(&mut self, position: usize, leaf: pallas::Base) {
        let zeros = empty_subtrees();
        let mut position = position;
        let mut current = leaf;

        for height in 0..=MAP_HEIGHT {
            let level = &mut self.nodes[height];
            if position == level.len() {
                level.push(current);
            } else {
                level[position] = current;
            }
            if height == MAP_HEIGHT {
                break;
            }

            let sibling = level.get(position ^ 1).copied().unwrap_or(zeros[height]);
            current = if position % 2 == 0 {
                poseidon_hash(current, sibling)
            } else {
                poseidon_hash(sibling, current)
            };
            position /= 2;
        }
    }

    /// Recomputes every cached level from the leaves.
    fn rebuild(&mut self) {
        let zeros = empty_subtrees();
        let mut level: Vec<pallas::Base> = self
            .leaves
            .iter()
            .map(|(key, value)| leaf_hash(key, value))
            .collect();

        let mut nodes = Vec::with_capacity(MAP_HEIGHT + 1);
        for height in 0..MAP_HEIGHT {
            let next = level
                .chunks(2)
                .map(|pair| poseidon_hash(pair[0], pair.get(1).copied().unwrap_or(zeros[height])))
                .collect();
            nodes.push(level);
            level = next;
        }
        nodes.push(level);
        self.nodes = nodes;
    }
}

impl MembershipWitness {
    /// Recomputes the root from the leaf and siblings and compares it with
    /// `root`.
    #[must_use]
    pub fn verify(&self, root: &FieldBytes) -> bool {
        if self.siblings.len() != MAP_HEIGHT || self.index >= MAP_CAPACITY {
            return false;
        }

        let mut current = leaf_hash(&self.key, &self.value);
        let mut index = self.index;

        for sibling in &self.siblings {
            if index % 2 == 0 {
                current = poseidon_hash(current, sibling.to_field());
            } else {
                current = poseidon_hash(sibling.to_field(), current);
            }
            index /= 2;
        }

        FieldBytes::from_field(current) == *root
    }
}

impl fmt::Display for MembershipWitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MembershipWitness:\n  Key: {}\n  Value: {}\n  Index: {}\n  Siblings: {}",
            self.key,
            self.value,
            self.index,
            self.siblings.len()
        )
    }
}
