//! RocksDB-backed [`KvStore`]
//!
//! # Column Families
//!
//! - `state` - every namespaced entity (key: namespace byte || segments)
//!
//! One column family keeps the whole key space in a single ordering, so
//! [`state_digest`](crate::state_digest) and prefix scans behave exactly
//! as they do on [`MemoryStore`](crate::MemoryStore).

use crate::{
    config::StoreConfig,
    error::{Error, Result},
    store::{KvStore, WriteOp},
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, DBWithThreadMode, Direction,
    IteratorMode, Options, SingleThreaded, WriteBatch,
};
use std::fmt;
use std::path::PathBuf;

/// Column family name
const CF_STATE: &str = "state";

/// Persistent store
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create database under `config.data_dir`
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.data_dir.clone();
        std::fs::create_dir_all(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(
            CF_STATE,
            Self::cf_options_state(),
        )];

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &path,
            cf_descriptors,
        )?;

        tracing::info!(path = ?path, "Opened RocksDB state store");

        Ok(Self { db, path })
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Hot read path: LZ4 plus bloom filters for point lookups
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_STATE)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_STATE)))
    }

    /// Approximate number of stored keys
    pub fn approximate_len(&self) -> Result<u64> {
        let count = self
            .db
            .property_int_value_cf(self.cf()?, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }

    /// Flush and close (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush_cf(self.cf()?)?;
        drop(self.db);
        tracing::info!(path = ?self.path, "RocksDB closed gracefully");
        Ok(())
    }
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore").field("path", &self.path).finish()
    }
}

impl KvStore for RocksStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf()?, key)?)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_cf(self.cf()?, key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.db.delete_cf(self.cf()?, key)?;
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let iter = self
            .db
            .iterator_cf(self.cf()?, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<()> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        let count = ops.len();
        for (key, value) in ops {
            match value {
                Some(value) => batch.put_cf(cf, &key, &value),
                None => batch.delete_cf(cf, &key),
            }
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(writes = count, "Committed write batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{state_digest, CacheStore, MemoryStore};

    fn open_temp() -> (tempfile::TempDir, RocksStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let store = RocksStore::open(&config).unwrap();
        (dir, store)
    }

    #[test]
    fn test_prefix_scan_stops_at_prefix_end() {
        let (_dir, mut store) = open_temp();
        store.set(b"a1", b"x").unwrap();
        store.set(b"b1", b"1").unwrap();
        store.set(b"b2", b"2").unwrap();
        store.set(b"c1", b"y").unwrap();

        let keys: Vec<Vec<u8>> = store
            .prefix_scan(b"b")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);
    }

    #[test]
    fn test_cache_commit_reaches_disk() {
        let (_dir, mut store) = open_temp();
        store.set(b"gone", b"1").unwrap();

        let mut cache = CacheStore::new(&mut store);
        cache.set(b"kept", b"2").unwrap();
        cache.delete(b"gone").unwrap();
        cache.commit().unwrap();

        assert_eq!(store.get(b"kept").unwrap(), Some(b"2".to_vec()));
        assert!(!store.has(b"gone").unwrap());
    }

    #[test]
    fn test_digest_matches_memory_store() {
        let (_dir, mut rocks) = open_temp();
        let mut memory = MemoryStore::new();
        let entries: [(&[u8], &[u8]); 3] = [(b"k1", b"v1"), (b"k0", b"v0"), (b"z", b"")];
        for (k, v) in entries {
            rocks.set(k, v).unwrap();
            memory.set(k, v).unwrap();
        }
        assert_eq!(state_digest(&rocks).unwrap(), state_digest(&memory).unwrap());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        {
            let mut store = RocksStore::open(&config).unwrap();
            store.set(b"k", b"v").unwrap();
            store.close().unwrap();
        }
        let store = RocksStore::open(&config).unwrap();
        assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
