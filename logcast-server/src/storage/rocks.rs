//! RocksDB-backed log store.
//!
//! Column families:
//! - `logs`   : log rows keyed by `log_id` (8 bytes big-endian), LZ4 compressed
//! - `metrics`: metric samples keyed by `metric_id` (8 bytes big-endian)
//! - `meta`   : id high-water marks, written in the same batch as each append
//!
//! Big-endian keys make iteration order equal id order. Deleting the newest
//! rows does not lower the high-water mark, so ids are never reissued.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};

use logcast_core::{
    DateRange, Environment, Level, LogRecord, MetricCounters, MetricSample, PendingLog,
};

use super::{LogStore, StoreError};

const CF_LOGS: &str = "logs";
const CF_METRICS: &str = "metrics";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_LOGS, CF_METRICS, CF_META];

const LOG_SEQ_KEY: &[u8] = b"log_seq";
const METRIC_SEQ_KEY: &[u8] = b"metric_seq";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logcast_data"),
            block_cache_size: 64 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// On-disk row. The id lives in the key.
#[derive(Serialize, Deserialize)]
struct StoredLog {
    server_id: String,
    message: String,
    message_lower: String,
    level: Level,
    environment: Environment,
    userid: Option<u64>,
    logged_at_ms: i64,
}

#[derive(Serialize, Deserialize)]
struct StoredMetric {
    counters: MetricCounters,
    recorded_at_ms: i64,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Deserialization(format!("timestamp out of range: {ms}")))
}

fn key_id(key: &[u8]) -> Result<u64, StoreError> {
    let bytes: [u8; 8] = key
        .get(..8)
        .and_then(|k| k.try_into().ok())
        .ok_or_else(|| StoreError::Deserialization("short key".into()))?;
    Ok(u64::from_be_bytes(bytes))
}

impl StoredLog {
    fn from_record(record: &LogRecord) -> Self {
        Self {
            server_id: record.server_id.clone(),
            message: record.message.clone(),
            message_lower: record.message_lower.clone(),
            level: record.level,
            environment: record.environment,
            userid: record.userid,
            logged_at_ms: record.logged_at.timestamp_millis(),
        }
    }

    fn into_record(self, log_id: u64) -> Result<LogRecord, StoreError> {
        Ok(LogRecord {
            log_id,
            server_id: self.server_id,
            message: self.message,
            message_lower: self.message_lower,
            level: self.level,
            environment: self.environment,
            userid: self.userid,
            logged_at: timestamp(self.logged_at_ms)?,
            count: None,
        })
    }
}

/// Next-id counters. Guarded by one lock so id order matches commit order.
struct Sequences {
    last_log_id: u64,
    last_metric_id: u64,
}

/// RocksDB-backed [`LogStore`].
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    sequences: Mutex<Sequences>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let sequences = Sequences {
            last_log_id: Self::recover_last_id(&db, CF_LOGS, LOG_SEQ_KEY)?,
            last_metric_id: Self::recover_last_id(&db, CF_METRICS, METRIC_SEQ_KEY)?,
        };
        log::info!(
            "Opened log store at {} (last log id {}, last metric id {})",
            config.path.display(),
            sequences.last_log_id,
            sequences.last_metric_id
        );

        Ok(Self {
            db,
            config,
            sequences: Mutex::new(sequences),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_LOGS => {
                // Text compresses well and rows are scanned in bulk.
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.set_max_write_buffer_number(4);
            }
            CF_METRICS => {
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(2);
            }
            _ => {}
        }
        opts
    }

    /// Highest id ever issued for a column family: the stored high-water
    /// mark, or the last key for databases written before the mark existed.
    fn recover_last_id(
        db: &DBWithThreadMode<SingleThreaded>,
        cf_name: &'static str,
        seq_key: &[u8],
    ) -> Result<u64, StoreError> {
        let cf = db
            .cf_handle(cf_name)
            .ok_or(StoreError::MissingColumnFamily(cf_name))?;
        let meta = db
            .cf_handle(CF_META)
            .ok_or(StoreError::MissingColumnFamily(CF_META))?;

        let marked = match db.get_cf(meta, seq_key)? {
            Some(bytes) => key_id(&bytes)?,
            None => 0,
        };
        let last_key = match db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                key_id(&key)?
            }
            None => 0,
        };
        Ok(marked.max(last_key))
    }

    fn cf(&self, name: &'static str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    /// Force memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

impl LogStore for RocksStore {
    fn append_logs(&self, batch: Vec<PendingLog>) -> Result<Vec<LogRecord>, StoreError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let cf = self.cf(CF_LOGS)?;
        let meta = self.cf(CF_META)?;

        let mut sequences = self.sequences.lock();
        let logged_at = Utc::now();
        let mut next_id = sequences.last_log_id;
        let mut write = WriteBatch::default();
        let mut stored = Vec::with_capacity(batch.len());
        for pending in batch {
            next_id += 1;
            let record = pending.into_record(next_id, logged_at);
            write.put_cf(cf, next_id.to_be_bytes(), encode(&StoredLog::from_record(&record))?);
            stored.push(record);
        }
        write.put_cf(meta, LOG_SEQ_KEY, next_id.to_be_bytes());

        self.db.write_opt(write, &self.write_options())?;
        sequences.last_log_id = next_id;
        Ok(stored)
    }

    fn scan_logs(
        &self,
        visit: &mut dyn FnMut(&LogRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let cf = self.cf(CF_LOGS)?;
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (key, value) = item?;
            let record = decode::<StoredLog>(&value)?.into_record(key_id(&key)?)?;
            if visit(&record).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn delete_logs(&self, predicate: &dyn Fn(&LogRecord) -> bool) -> Result<usize, StoreError> {
        let cf = self.cf(CF_LOGS)?;
        let _writes = self.sequences.lock();

        let mut batch = WriteBatch::default();
        let mut deleted = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let record = decode::<StoredLog>(&value)?.into_record(key_id(&key)?)?;
            if predicate(&record) {
                batch.delete_cf(cf, &key);
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.db.write_opt(batch, &self.write_options())?;
        }
        Ok(deleted)
    }

    fn append_metrics(&self, counters: MetricCounters) -> Result<MetricSample, StoreError> {
        let cf = self.cf(CF_METRICS)?;
        let meta = self.cf(CF_META)?;

        let mut sequences = self.sequences.lock();
        let metric_id = sequences.last_metric_id + 1;
        let recorded_at = Utc::now();
        let stored = StoredMetric {
            counters,
            recorded_at_ms: recorded_at.timestamp_millis(),
        };
        let mut write = WriteBatch::default();
        write.put_cf(cf, metric_id.to_be_bytes(), encode(&stored)?);
        write.put_cf(meta, METRIC_SEQ_KEY, metric_id.to_be_bytes());
        self.db.write_opt(write, &self.write_options())?;
        sequences.last_metric_id = metric_id;

        Ok(MetricSample {
            metric_id,
            counters,
            recorded_at,
        })
    }

    fn metrics_between(&self, range: DateRange) -> Result<Vec<MetricSample>, StoreError> {
        let cf = self.cf(CF_METRICS)?;
        let mut samples = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let stored: StoredMetric = decode(&value)?;
            let recorded_at = timestamp(stored.recorded_at_ms)?;
            if range.contains(recorded_at) {
                samples.push(MetricSample {
                    metric_id: key_id(&key)?,
                    counters: stored.counters,
                    recorded_at,
                });
            }
        }
        Ok(samples)
    }
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
