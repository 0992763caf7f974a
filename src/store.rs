//! Key-value persistence for groups, nullifier sets, claims and rollups.
//!
//! The engine only needs `get`/`put`/`remove` of JSON documents, plus
//! [`KvStore::put_all`] for writes that must land together. [`MemoryStore`]
//! keeps them in a map, [`FileStore`] writes one JSON file per key.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::group::{Group, NullifierSet};
use crate::rollup::ClaimRollupProof;
use crate::types::{Claim, Plan};

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Deletes `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Writes every entry or none of them.
    ///
    /// The default implementation writes in order and, if a write fails,
    /// restores the keys it already wrote to their previous values.
    fn put_all(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut previous = Vec::with_capacity(entries.len());
        for (key, _) in &entries {
            previous.push(self.get(key)?);
        }

        let mut written: Vec<(String, Option<Value>)> = Vec::with_capacity(entries.len());
        for ((key, value), before) in entries.into_iter().zip(previous) {
            if let Err(err) = self.put(&key, value) {
                for (key, before) in written.into_iter().rev() {
                    let restored = match before {
                        Some(value) => self.put(&key, value),
                        None => self.remove(&key),
                    };
                    if let Err(restore_err) = restored {
                        warn!("Failed to restore '{key}' after a failed batch: {restore_err:#}");
                    }
                }
                return Err(err);
            }
            written.push((key, before));
        }
        Ok(())
    }
}

pub fn group_key(group_id: &str) -> String {
    format!("groups.{group_id}")
}

pub fn nullifiers_key(claim_id: &str) -> String {
    format!("nullifiers.{claim_id}")
}

pub fn claim_key(claim_id: &str) -> String {
    format!("claims.{claim_id}")
}

pub fn rollup_key(claim_id: &str) -> String {
    format!("rollups.{claim_id}")
}

pub fn community_key(community_id: &str) -> String {
    format!("communities.{community_id}")
}

pub fn plan_key(plan_id: &str) -> String {
    format!("plans.{plan_id}")
}

/// Typed access on top of any [`KvStore`].
pub trait TypedStore: KvStore {
    fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .with_context(|| format!("Failed to decode stored value '{key}'")),
            None => Ok(None),
        }
    }

    fn put_as<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .with_context(|| format!("Failed to encode value for '{key}'"))?;
        self.put(key, value)
    }

    fn get_group(&self, group_id: &str) -> Result<Option<Group>> {
        self.get_as(&group_key(group_id))
    }

    fn put_group(&self, group: &Group) -> Result<()> {
        self.put_as(&group_key(group.id()), group)
    }

    /// Missing sets are empty.
    fn get_nullifiers(&self, claim_id: &str) -> Result<NullifierSet> {
        Ok(self
            .get_as(&nullifiers_key(claim_id))?
            .unwrap_or_default())
    }

    fn get_claim(&self, claim_id: &str) -> Result<Option<Claim>> {
        self.get_as(&claim_key(claim_id))
    }

    fn put_claim(&self, claim: &Claim) -> Result<()> {
        self.put_as(&claim_key(&claim.id), claim)
    }

    fn get_rollup(&self, claim_id: &str) -> Result<Option<ClaimRollupProof>> {
        self.get_as(&rollup_key(claim_id))
    }

    /// Persists a rollup together with the nullifier set it spent, so that
    /// neither is stored without the other.
    fn commit_rollup(
        &self,
        claim_id: &str,
        nullifiers: &NullifierSet,
        proof: &ClaimRollupProof,
    ) -> Result<()> {
        let encode = |what: &str, value: serde_json::Result<Value>| {
            value.with_context(|| format!("Failed to encode {what} for claim '{claim_id}'"))
        };
        self.put_all(vec![
            (
                nullifiers_key(claim_id),
                encode("nullifiers", serde_json::to_value(nullifiers))?,
            ),
            (
                rollup_key(claim_id),
                encode("rollup", serde_json::to_value(proof))?,
            ),
        ])
    }

    fn get_plan(&self, plan_id: &str) -> Result<Option<Plan>> {
        self.get_as(&plan_key(plan_id))
    }

    fn put_plan(&self, plan: &Plan) -> Result<()> {
        self.put_as(&plan_key(&plan.id), plan)
    }
}

impl<S: KvStore + ?Sized> TypedStore for S {}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }

    /// Applies the whole batch under one write lock.
    fn put_all(&self, batch: Vec<(String, Value)>) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("Memory store lock poisoned"))?;
        entries.extend(batch);
        Ok(())
    }
}

/// One pretty-printed JSON file per key under `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create store directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            || key.starts_with('.')
        {
            return Err(anyhow::anyhow!("Invalid store key '{key}'"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(value))
    }

    fn put(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        let content =
            serde_json::to_string_pretty(&value).context("Failed to serialize store value")?;

        // Write then rename so readers never see a half-written file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;
        debug!("Stored '{key}' at {}", path.display());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
            debug!("Removed '{key}'");
        }
        Ok(())
    }
}
