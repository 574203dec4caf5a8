//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: player uuid)
//! - `names` - Lowercase name index (key: name, value: player uuid)
//! - `multipliers` - Multiplier rows (key: id, big-endian)
//! - `meta` - Counters (key: counter name)

use crate::{
    error::{Error, Result},
    store::{LedgerStore, MultiplierFilter},
    types::{Account, Multiplier, PlayerId},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_NAMES: &str = "names";
const CF_MULTIPLIERS: &str = "multipliers";
const CF_META: &str = "meta";

const KEY_NEXT_MULTIPLIER_ID: &[u8] = b"next_multiplier_id";

/// Node-local RocksDB store
pub struct RocksStore {
    db: Arc<DB>,
    // Serializes check-then-insert paths (account creation, id allocation)
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_NAMES, Self::cf_options_index()),
            ColumnFamilyDescriptor::new(CF_MULTIPLIERS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB ledger store");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_index() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn read_account(&self, id: PlayerId) -> Result<Option<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(&cf, id.as_uuid().as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn id_by_name(&self, name: &str) -> Result<Option<PlayerId>> {
        let cf = self.cf(CF_NAMES)?;
        match self.db.get_cf(&cf, name.to_lowercase().as_bytes())? {
            Some(value) => {
                let uuid = Uuid::from_slice(&value)
                    .map_err(|e| Error::Serialization(format!("Corrupt name index: {}", e)))?;
                Ok(Some(PlayerId::new(uuid)))
            }
            None => Ok(None),
        }
    }

    fn next_multiplier_id(&self) -> Result<i64> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, KEY_NEXT_MULTIPLIER_ID)? {
            Some(value) => {
                let bytes: [u8; 8] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Serialization("Corrupt multiplier id counter".into()))?;
                Ok(i64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl LedgerStore for RocksStore {
    fn create_account(&self, id: PlayerId, name: &str, balance: Decimal) -> Result<()> {
        let _guard = self.write_lock.lock();

        if self.read_account(id)?.is_some() || self.id_by_name(name)?.is_some() {
            return Ok(());
        }

        let account = Account::new(id, name, balance);
        let cf_accounts = self.cf(CF_ACCOUNTS)?;
        let cf_names = self.cf(CF_NAMES)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, id.as_uuid().as_bytes(), bincode::serialize(&account)?);
        batch.put_cf(&cf_names, account.name.as_bytes(), id.as_uuid().as_bytes());
        self.db.write(batch)?;

        tracing::debug!(player = %id, name = %account.name, "Account created");
        Ok(())
    }

    fn read_balance(&self, id: PlayerId) -> Result<Option<Decimal>> {
        Ok(self.read_account(id)?.map(|a| a.balance))
    }

    fn write_balance(&self, id: PlayerId, balance: Decimal) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut account = self
            .read_account(id)?
            .ok_or_else(|| Error::unknown_player(id))?;
        account.balance = balance;

        let cf = self.cf(CF_ACCOUNTS)?;
        self.db
            .put_cf(&cf, id.as_uuid().as_bytes(), bincode::serialize(&account)?)?;
        Ok(())
    }

    fn account_exists(&self, id: PlayerId) -> Result<bool> {
        Ok(self.read_account(id)?.is_some())
    }

    fn account_exists_by_name(&self, name: &str) -> Result<bool> {
        Ok(self.id_by_name(name)?.is_some())
    }

    fn account_by_name(&self, name: &str) -> Result<Option<Account>> {
        match self.id_by_name(name)? {
            Some(id) => self.read_account(id),
            None => Ok(None),
        }
    }

    fn top_n(&self, n: usize) -> Result<Vec<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;

        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            accounts.push(bincode::deserialize::<Account>(&value)?);
        }

        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.name.cmp(&b.name)));
        accounts.truncate(n);
        Ok(accounts)
    }

    fn create_multiplier(&self, multiplier: &Multiplier) -> Result<i64> {
        let _guard = self.write_lock.lock();

        let id = self.next_multiplier_id()?;
        let mut row = multiplier.clone();
        row.assign_id(id);

        let cf_multipliers = self.cf(CF_MULTIPLIERS)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_multipliers, id.to_be_bytes(), bincode::serialize(&row)?);
        batch.put_cf(&cf_meta, KEY_NEXT_MULTIPLIER_ID, (id + 1).to_be_bytes());
        self.db.write(batch)?;

        tracing::debug!(multiplier_id = id, "Multiplier persisted");
        Ok(id)
    }

    fn read_multiplier(&self, id: i64) -> Result<Option<Multiplier>> {
        let cf = self.cf(CF_MULTIPLIERS)?;
        match self.db.get_cf(&cf, id.to_be_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn list_multipliers(&self, filter: Option<&MultiplierFilter>) -> Result<Vec<Multiplier>> {
        let cf = self.cf(CF_MULTIPLIERS)?;

        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let row: Multiplier = bincode::deserialize(&value)?;
            if filter.map_or(true, |f| f.matches(&row)) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn delete_multiplier(&self, id: i64) -> Result<()> {
        let cf = self.cf(CF_MULTIPLIERS)?;
        self.db.delete_cf(&cf, id.to_be_bytes())?;
        Ok(())
    }

    fn update_multiplier(&self, multiplier: &Multiplier) -> Result<()> {
        let _guard = self.write_lock.lock();

        let id = multiplier.id();
        if self.read_multiplier(id)?.is_none() {
            return Err(Error::UnknownMultiplier(id));
        }

        let cf = self.cf(CF_MULTIPLIERS)?;
        self.db
            .put_cf(&cf, id.to_be_bytes(), bincode::serialize(multiplier)?)?;
        Ok(())
    }

    fn is_shared(&self) -> bool {
        false
    }
}
