//! Key-value store abstraction
//!
//! # Implementations
//!
//! - [`MemoryStore`] - ordered in-memory map (tests, local replay)
//! - [`CacheStore`] - write buffer over any other store; `commit` or drop
//! - [`crate::RocksStore`] - RocksDB-backed persistent store
//!
//! All scans return entries in ascending key order, which is what makes
//! block processing deterministic across replicas.

use crate::Result;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A single buffered write: `Some(value)` sets, `None` deletes
pub type WriteOp = (Vec<u8>, Option<Vec<u8>>);

/// Ordered key-value store
pub trait KvStore: fmt::Debug {
    /// Get raw value
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set raw value
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete key (no-op if absent)
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// All entries whose key starts with `prefix`, ascending by key
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Check key existence
    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply a batch of writes
    ///
    /// Backends that support it apply the batch atomically.
    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        for (key, value) in ops {
            match value {
                Some(value) => self.set(&key, &value)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

/// Typed access on top of [`KvStore`] (bincode-encoded values)
pub trait KvStoreExt: KvStore {
    /// Get and decode, `None` if absent
    fn get_typed<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get and decode, `T::default()` if absent
    fn get_or_default<T: DeserializeOwned + Default>(&self, key: &[u8]) -> Result<T> {
        Ok(self.get_typed(key)?.unwrap_or_default())
    }

    /// Encode and set
    fn put_typed<T: Serialize>(&mut self, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.set(key, &bytes)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// In-memory ordered store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

/// Write-buffering overlay
///
/// Reads see buffered writes first, then the parent. Nothing reaches the
/// parent until [`CacheStore::commit`]; dropping the cache discards every
/// buffered write. Caches nest: a cache over a cache commits into the outer
/// buffer only.
pub struct CacheStore<'a> {
    parent: &'a mut dyn KvStore,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> CacheStore<'a> {
    /// Create overlay over `parent`
    pub fn new(parent: &'a mut dyn KvStore) -> Self {
        Self {
            parent,
            writes: BTreeMap::new(),
        }
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Flush buffered writes into the parent as one batch
    pub fn commit(self) -> Result<()> {
        let CacheStore { parent, writes } = self;
        if writes.is_empty() {
            return Ok(());
        }
        parent.write_batch(writes.into_iter().collect())
    }
}

impl fmt::Debug for CacheStore<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("pending_writes", &self.writes.len())
            .finish()
    }
}

impl KvStore for CacheStore<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.parent.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.parent.prefix_scan(prefix)?.into_iter().collect();

        for (key, value) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        self.writes.extend(ops);
        Ok(())
    }
}

/// SHA-256 digest over every entry, in key order
///
/// Two replicas that applied the same blocks produce the same digest.
pub fn state_digest(store: &dyn KvStore) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    for (key, value) in store.prefix_scan(&[])? {
        hasher.update((key.len() as u32).to_be_bytes());
        hasher.update(&key);
        hasher.update((value.len() as u32).to_be_bytes());
        hasher.update(&value);
    }
    Ok(hasher.finalize().into())
}
