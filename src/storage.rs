use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::address::{self, ExternalAddress};
use crate::crypto::Key;
use crate::error::{Result, WalletError};

// Owned outputs and block views are bincode; small maps shared with other
// tooling (gOutIndex, address memos) are JSON. Reads accept zstd-compressed
// values as well.

pub const WALLET_CF: &str = "wallet";

pub struct Store {
    pub db: DB,
    path: String,
}

impl Store {
    pub fn open(base_path: &str) -> Result<Self> {
        let mut cf_opts = Options::default();
        cf_opts.set_write_buffer_size(16 * 1024 * 1024);
        cf_opts.set_max_write_buffer_number(2);
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ["default", WALLET_CF]
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        std::fs::create_dir_all(base_path).map_err(|e| WalletError::save("db-dir", e))?;

        // Durability comes from synced batch writes; the WAL may drop a torn tail.
        db_opts.set_use_fsync(false);
        db_opts.set_wal_recovery_mode(rocksdb::DBRecoveryMode::TolerateCorruptedTailRecords);
        db_opts.set_keep_log_file_num(10);
        db_opts.set_max_open_files(256);

        let db = DB::open_cf_descriptors(&db_opts, base_path, cf_descriptors)
            .map_err(|e| WalletError::save("db-open", format!("{base_path}: {e}")))?;
        let store = Store { db, path: base_path.to_string() };
        store.health_check()?;
        debug!(path = %store.path, "wallet store opened");
        Ok(store)
    }

    /// Write, read back and delete a marker key.
    pub fn health_check(&self) -> Result<()> {
        let marker = b"health_check";
        self.db.put(marker, b"ok").map_err(|e| WalletError::save("health-check", e))?;
        let value = self.db.get(marker).map_err(|e| WalletError::Inner(e.to_string()))?;
        if value.as_deref() != Some(&b"ok"[..]) {
            return Err(WalletError::Inner("database read/write consistency check failed".into()));
        }
        self.db.delete(marker).map_err(|e| WalletError::save("health-check", e))?;
        Ok(())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn cf(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(WALLET_CF)
            .ok_or_else(|| WalletError::Inner(format!("column family '{WALLET_CF}' missing")))
    }

    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = bincode::serialize(value).map_err(|e| WalletError::save("serialize", e))?;
        self.put_raw(key, &data)
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) -> Result<()> {
        let cf = self.cf()?;
        self.db
            .put_cf_opt(cf, key.as_bytes(), value, &WriteOptions::default())
            .map_err(|e| WalletError::save("put", format!("{key}: {e}")))
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf()?;
        self.db
            .get_cf(cf, key.as_bytes())
            .map_err(|e| WalletError::Inner(format!("read {key}: {e}")))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get_raw(key)? else {
            return Ok(None);
        };
        if let Ok(decompressed) = zstd::decode_all(&value[..]) {
            if let Ok(v) = bincode::deserialize(&decompressed) {
                return Ok(Some(v));
            }
        }
        bincode::deserialize(&value)
            .map(Some)
            .map_err(|e| WalletError::Inner(format!("corrupt record {key}: {e}")))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(v) => serde_json::from_slice(&v)
                .map(Some)
                .map_err(|e| WalletError::Inner(format!("corrupt json {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Keys starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let cf = self.cf()?;
        let mut keys = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward));
        for item in iter {
            let (k, _) = item.map_err(|e| WalletError::Inner(e.to_string()))?;
            if !k.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(String::from_utf8_lossy(&k).into_owned());
        }
        Ok(keys)
    }

    pub fn batch(&self) -> StoreBatch<'_> {
        StoreBatch { store: self, batch: WriteBatch::default(), error: None }
    }

    /// Atomically applies a set of writes.
    pub fn write_batch(&self, batch: StoreBatch<'_>) -> Result<()> {
        if let Some(e) = batch.error {
            return Err(e);
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db
            .write_opt(batch.batch, &write_opts)
            .map_err(|e| WalletError::BatchCommitFail(e.to_string()))
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| WalletError::save("flush", e))?;
        if let Err(e) = self.db.flush_wal(true) {
            warn!("wal flush failed: {e}");
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.db.cancel_all_background_work(true);
        Ok(())
    }
}

/// A pending atomic write. Encoding failures are remembered and reported by
/// [`Store::write_batch`], so nothing of a failed batch reaches disk.
pub struct StoreBatch<'a> {
    store: &'a Store,
    batch: WriteBatch,
    error: Option<WalletError>,
}

impl StoreBatch<'_> {
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) {
        match bincode::serialize(value) {
            Ok(data) => self.put_raw(key, &data),
            Err(e) => self.fail(format!("{key}: {e}")),
        }
    }

    pub fn put_json<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(data) => self.put_raw(key, &data),
            Err(e) => self.fail(format!("{key}: {e}")),
        }
    }

    pub fn put_raw(&mut self, key: &str, value: &[u8]) {
        match self.store.cf() {
            Ok(cf) => self.batch.put_cf(cf, key.as_bytes(), value),
            Err(e) => self.error = Some(e),
        }
    }

    pub fn delete(&mut self, key: &str) {
        match self.store.cf() {
            Ok(cf) => self.batch.delete_cf(cf, key.as_bytes()),
            Err(e) => self.error = Some(e),
        }
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    fn fail(&mut self, reason: String) {
        if self.error.is_none() {
            self.error = Some(WalletError::BatchSaveFail(reason));
        }
    }
}

/// Per-wallet key names; every key carries the wallet's external address so
/// several wallets can share one store.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(owner: &ExternalAddress) -> Self {
        KeySpace { prefix: format!("{}_", address::external_to_string(owner)) }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn local_height(&self) -> String {
        format!("{}localHeight", self.prefix)
    }

    pub fn g_out_index(&self) -> String {
        format!("{}gOutIndex", self.prefix)
    }

    pub fn transfers_count(&self) -> String {
        format!("{}transfersCnt", self.prefix)
    }

    pub fn transfer(&self, n: usize) -> String {
        format!("{}transfers_{n}", self.prefix)
    }

    pub fn sub_count(&self) -> String {
        format!("{}accountSubCnt", self.prefix)
    }

    pub fn utxo_tx(&self, hash: &Key) -> String {
        format!("{}utxoTx_{}", self.prefix, hex::encode(hash))
    }

    pub fn block_hash(&self, height: u64) -> String {
        format!("{}blockHash_{height}", self.prefix)
    }

    pub fn block_txs(&self, height: u64) -> String {
        format!("{}blockTxs_{height}", self.prefix)
    }

    pub fn add_info(&self, hash: &Key) -> String {
        format!("{}utxoAddInfo_{}", self.prefix, hex::encode(hash))
    }

    pub fn tx_keys(&self, hash: &Key) -> String {
        format!("{}{}_txKeys", self.prefix, hex::encode(hash))
    }
}
