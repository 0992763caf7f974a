//! Group membership and per-claim nullifier sets.
//!
//! Both are thin wrappers over [`MerkleMap`] with presence flag `1`. Groups are
//! insert-only; re-inserting an existing member is a no-op. Members enrolled
//! through an ownership check also carry the public key their commitment was
//! proven against, and only those members can vote.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::Address;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{RollupError, RollupResult};
use crate::merkle::{MembershipWitness, MerkleMap};
use crate::types::{Commitment, FieldBytes, Nullifier};

fn present() -> FieldBytes {
    FieldBytes::from(1u64)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredGroup", into = "StoredGroup")]
pub struct Group {
    id: String,
    members: MerkleMap,
    keys: BTreeMap<Commitment, Address>,
    updated_at: u64,
}

/// A member's witness together with the key bound to its commitment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub witness: MembershipWitness,
    pub public_key: Address,
}

/// Persisted form. `root` and `size` are informational and are checked
/// against the rebuilt map on load.
#[derive(Serialize, Deserialize)]
struct StoredGroup {
    id: String,
    size: usize,
    root: FieldBytes,
    updated_at: u64,
    members: MerkleMap,
    #[serde(default)]
    keys: Vec<(Commitment, Address)>,
}

impl TryFrom<StoredGroup> for Group {
    type Error = String;

    fn try_from(stored: StoredGroup) -> Result<Self, Self::Error> {
        if stored.members.root() != stored.root || stored.members.len() != stored.size {
            return Err(format!(
                "stored group '{}' does not match its members (root {}, size {})",
                stored.id, stored.root, stored.size
            ));
        }
        if let Some((stray, _)) = stored
            .keys
            .iter()
            .find(|(commitment, _)| !stored.members.contains(commitment))
        {
            return Err(format!(
                "stored group '{}' binds a key to non-member {stray}",
                stored.id
            ));
        }
        Ok(Group {
            id: stored.id,
            members: stored.members,
            keys: stored.keys.into_iter().collect(),
            updated_at: stored.updated_at,
        })
    }
}

impl From<Group> for StoredGroup {
    fn from(group: Group) -> Self {
        StoredGroup {
            size: group.members.len(),
            root: group.members.root(),
            id: group.id,
            updated_at: group.updated_at,
            members: group.members,
            keys: group.keys.into_iter().collect(),
        }
    }
}

impl Group {
    pub fn create(id: &str) -> Self {
        Group {
            id: id.to_string(),
            members: MerkleMap::new(),
            keys: BTreeMap::new(),
            updated_at: unix_now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds `commitment`. Returns `false` if it was already a member.
    pub fn insert(&mut self, commitment: Commitment) -> RollupResult<bool> {
        let added = self
            .members
            .insert(commitment, present())
            .map_err(|full| RollupError::GroupFull {
                id: self.id.clone(),
                capacity: full.0,
            })?;
        if added {
            self.updated_at = unix_now();
            debug!(
                "Group '{}' now has {} members, root {}",
                self.id,
                self.members.len(),
                self.members.root()
            );
        }
        Ok(added)
    }

    /// Adds `commitment` bound to `public_key`, whose ownership the caller
    /// has already checked. A member keeps the key it was first enrolled
    /// with; re-enrolling is a no-op that returns `false`.
    pub fn enroll(&mut self, commitment: Commitment, public_key: Address) -> RollupResult<bool> {
        if self.keys.contains_key(&commitment) {
            return Ok(false);
        }
        self.insert(commitment)?;
        self.keys.insert(commitment, public_key);
        Ok(true)
    }

    /// Key bound to `commitment`, if it was enrolled with one.
    pub fn public_key(&self, commitment: &Commitment) -> Option<Address> {
        self.keys.get(commitment).copied()
    }

    /// Witness plus bound key. `None` for non-members and for members added
    /// without an ownership check.
    pub fn enrollment(&self, commitment: &Commitment) -> Option<Enrollment> {
        Some(Enrollment {
            public_key: self.public_key(commitment)?,
            witness: self.witness(commitment)?,
        })
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.members.contains(commitment)
    }

    pub fn root(&self) -> FieldBytes {
        self.members.root()
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Members sorted by numeric value of the commitment.
    pub fn members(&self) -> Vec<Commitment> {
        self.members.keys().copied().collect()
    }

    pub fn witness(&self, commitment: &Commitment) -> Option<MembershipWitness> {
        self.members.witness(commitment)
    }
}

/// Spent nullifiers of one claim, plus the electors whose votes were counted.
///
/// Only the nullifiers are authenticated; the elector ledger stops one member
/// from voting twice under different nullifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullifierSet {
    nullifiers: MerkleMap,
    #[serde(default)]
    voters: BTreeSet<Commitment>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, nullifier: &Nullifier) -> bool {
        self.nullifiers.contains(nullifier)
    }

    pub fn has_voted(&self, elector: &Commitment) -> bool {
        self.voters.contains(elector)
    }

    /// Marks `nullifier` as used by `elector`. Returns `false` if both were
    /// already recorded.
    pub fn spend(&mut self, nullifier: Nullifier, elector: Commitment) -> RollupResult<bool> {
        let added = self
            .nullifiers
            .insert(nullifier, present())
            .map_err(|full| RollupError::GroupFull {
                id: "nullifiers".to_string(),
                capacity: full.0,
            })?;
        Ok(self.voters.insert(elector) || added)
    }

    pub fn root(&self) -> FieldBytes {
        self.nullifiers.root()
    }

    pub fn len(&self) -> usize {
        self.nullifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nullifiers.is_empty()
    }

    pub fn nullifiers(&self) -> Vec<Nullifier> {
        self.nullifiers.keys().copied().collect()
    }
}
