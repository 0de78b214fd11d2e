//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `deliveries` - Delivery requests (key: delivery id)
//! - `payments` - Escrow payments (key: payment id)
//! - `ratings` - Ratings (key: delivery id)
//! - `reputation` - Per-participant aggregates (key: address)
//! - `balances` - Value credited by the ledgers (key: address)
//! - `indices` - Secondary indices (key: index || address || ordinal || id)
//! - `events` - Committed event log (key: stream || sequence)
//! - `sealed` - Confidential payloads and their grants (key: handle)
//! - `meta` - Counters and singletons
//!
//! Every mutating ledger operation stages its writes in one [`WriteSet`] and
//! commits once. Dropping a `WriteSet` without committing discards all of it.

use crate::{
    error::{Error, Result},
    types::{Address, RecordId},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Delivery requests
pub const CF_DELIVERIES: &str = "deliveries";
/// Escrow payments
pub const CF_PAYMENTS: &str = "payments";
/// Ratings keyed by delivery id
pub const CF_RATINGS: &str = "ratings";
/// Reputation aggregates keyed by address
pub const CF_REPUTATION: &str = "reputation";
/// Credited balances keyed by address
pub const CF_BALANCES: &str = "balances";
/// Secondary indices
pub const CF_INDICES: &str = "indices";
/// Event log
pub const CF_EVENTS: &str = "events";
/// Confidential payloads
pub const CF_SEALED: &str = "sealed";
/// Counters and singletons
pub const CF_META: &str = "meta";

const COLUMN_FAMILIES: [&str; 9] = [
    CF_DELIVERIES,
    CF_PAYMENTS,
    CF_RATINGS,
    CF_REPUTATION,
    CF_BALANCES,
    CF_INDICES,
    CF_EVENTS,
    CF_SEALED,
    CF_META,
];

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    sync_writes: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = COLUMN_FAMILIES.len(),
            "Opened RocksDB"
        );

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            // Prefix scans, benefit from bloom filters
            CF_INDICES | CF_EVENTS => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            // Ciphertext does not compress
            CF_SEALED => {
                opts.set_compression_type(rocksdb::DBCompressionType::None);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Point reads

    /// Read and decode a value
    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf_handle(cf)?;
        match self.db.get_cf(handle, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check for a key without decoding
    pub fn contains(&self, cf: &str, key: &[u8]) -> Result<bool> {
        let handle = self.cf_handle(cf)?;
        Ok(self.db.get_pinned_cf(handle, key)?.is_some())
    }

    /// Write a single value outside any batch
    ///
    /// Only for state that is not part of a ledger transaction (sealed
    /// payloads owned by the confidential store).
    pub fn put_direct<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.cf_handle(cf)?;
        let bytes = bincode::serialize(value)?;
        self.db.put_cf_opt(handle, key, bytes, &self.write_options())?;
        Ok(())
    }

    /// Read a persisted counter (0 if never written)
    pub fn counter(&self, name: &str) -> Result<u64> {
        Ok(self.get::<u64>(CF_META, name.as_bytes())?.unwrap_or(0))
    }

    // Scans

    /// Ids recorded under `index` for `owner`, in ordinal order
    pub fn scan_index(&self, index: &str, owner: &Address) -> Result<Vec<RecordId>> {
        let prefix = index_prefix(index, owner);
        let mut ids = Vec::new();

        for (key, _) in self.scan_prefix(CF_INDICES, &prefix, &prefix)? {
            // Last 32 bytes of the key are the record id
            if key.len() >= prefix.len() + 8 + 32 {
                let mut id = [0u8; 32];
                id.copy_from_slice(&key[key.len() - 32..]);
                ids.push(RecordId::from_bytes(id));
            }
        }

        Ok(ids)
    }

    /// Raw key/value pairs under `prefix`, starting at `start` (inclusive)
    pub fn scan_prefix(
        &self,
        cf: &str,
        prefix: &[u8],
        start: &[u8],
    ) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let handle = self.cf_handle(cf)?;
        let iter = self
            .db
            .iterator_cf(handle, IteratorMode::From(start, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }

        Ok(entries)
    }

    // Batches

    /// Start staging an atomic write
    pub fn write_set(&self) -> WriteSet<'_> {
        WriteSet {
            storage: self,
            batch: WriteBatch::default(),
        }
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.sync_writes);
        opts
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            deliveries: self.approximate_count(CF_DELIVERIES)?,
            payments: self.approximate_count(CF_PAYMENTS)?,
            ratings: self.approximate_count(CF_RATINGS)?,
            events: self.approximate_count(CF_EVENTS)?,
        })
    }

    fn approximate_count(&self, cf: &str) -> Result<u64> {
        let handle = self.cf_handle(cf)?;
        let prop = self
            .db
            .property_int_value_cf(handle, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }
}

/// Staged writes for one ledger operation
///
/// Nothing reaches the database until [`WriteSet::commit`].
pub struct WriteSet<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
}

impl<'a> WriteSet<'a> {
    /// Stage an encoded value
    pub fn put<T: Serialize>(&mut self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let handle = self.storage.cf_handle(cf)?;
        let bytes = bincode::serialize(value)?;
        self.batch.put_cf(handle, key, bytes);
        Ok(())
    }

    /// Stage a counter update
    pub fn put_counter(&mut self, name: &str, value: u64) -> Result<()> {
        self.put(CF_META, name.as_bytes(), &value)
    }

    /// Stage an index entry `index || owner || ordinal || id`
    pub fn index(&mut self, index: &str, owner: &Address, ordinal: u64, id: &RecordId) -> Result<()> {
        let handle = self.storage.cf_handle(CF_INDICES)?;
        let mut key = index_prefix(index, owner);
        key.extend_from_slice(&ordinal.to_be_bytes());
        key.extend_from_slice(id.as_bytes());
        self.batch.put_cf(handle, key, b"");
        Ok(())
    }

    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// No writes staged
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Atomically apply every staged write
    pub fn commit(self) -> Result<()> {
        let writes = self.batch.len();
        self.storage
            .db
            .write_opt(self.batch, &self.storage.write_options())?;
        tracing::debug!(writes, "Write set committed");
        Ok(())
    }
}

fn index_prefix(index: &str, owner: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.len() + 1 + 20 + 8 + 32);
    key.extend_from_slice(index.as_bytes());
    key.push(b'|');
    key.extend_from_slice(owner.as_bytes());
    key
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate delivery count
    pub deliveries: u64,
    /// Approximate payment count
    pub payments: u64,
    /// Approximate rating count
    pub ratings: u64,
    /// Approximate event count
    pub events: u64,
}
