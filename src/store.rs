use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};

use crate::error::{Error, Result};
use crate::metrics::BlockSummary;

const CF_BLOCKS: &str = "block_db";
const CF_SCHEDULES: &str = "schedule_db";

/// Fixed-width key layout: byte order equals chronological order.
const KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Ordered persistent state, two subspaces:
///
/// * `block_db` — ISO-8601 timestamp → bincode `BlockSummary` snapshot
/// * `schedule_db` — little-endian u64 schedule version → producer names
///
/// Writes are durable on return. RocksDB iterators pin a consistent view,
/// so the query side can scan snapshots while the aggregator commits new
/// ones.
pub struct Store {
    db: DB,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let families = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_SCHEDULES, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, families)?;
        Ok(Self { db })
    }

    fn blocks(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_BLOCKS)
            .expect("block_db column family opened with the database")
    }

    fn schedules(&self) -> &ColumnFamily {
        self.db
            .cf_handle(CF_SCHEDULES)
            .expect("schedule_db column family opened with the database")
    }

    /// Persist a snapshot under its timestamp. Re-writing the same key is
    /// idempotent; last write wins (this only happens replaying blocks after
    /// a restart).
    pub fn put_snapshot(&self, at: DateTime<Utc>, summary: &BlockSummary) -> Result<()> {
        let value = bincode::serialize(summary)?;
        self.db.put_cf(self.blocks(), snapshot_key(at), value)?;
        Ok(())
    }

    pub fn first_snapshot(&self) -> Result<Option<(DateTime<Utc>, BlockSummary)>> {
        self.snapshot_from(IteratorMode::Start)
    }

    pub fn last_snapshot(&self) -> Result<Option<(DateTime<Utc>, BlockSummary)>> {
        self.snapshot_from(IteratorMode::End)
    }

    /// The earliest snapshot whose key is `>= at`, if any.
    pub fn snapshot_at_or_after(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Option<(DateTime<Utc>, BlockSummary)>> {
        let key = snapshot_key(at);
        self.snapshot_from(IteratorMode::From(key.as_bytes(), Direction::Forward))
    }

    fn snapshot_from(&self, mode: IteratorMode<'_>) -> Result<Option<(DateTime<Utc>, BlockSummary)>> {
        match self.db.iterator_cf(self.blocks(), mode).next() {
            None => Ok(None),
            Some(entry) => {
                let (key, value) = entry?;
                Ok(Some((parse_snapshot_key(&key)?, bincode::deserialize(&value)?)))
            }
        }
    }

    pub fn put_schedule(&self, version: u64, producers: &[String]) -> Result<()> {
        let value = bincode::serialize(producers)?;
        self.db.put_cf(self.schedules(), version.to_le_bytes(), value)?;
        Ok(())
    }

    pub fn schedule(&self, version: u64) -> Result<Option<Vec<String>>> {
        match self.db.get_cf(self.schedules(), version.to_le_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }
}

/// The ASCII key a snapshot at `at` is stored under.
pub fn snapshot_key(at: DateTime<Utc>) -> String {
    at.format(KEY_FORMAT).to_string()
}

fn parse_snapshot_key(raw: &[u8]) -> Result<DateTime<Utc>> {
    let text = String::from_utf8_lossy(raw);
    NaiveDateTime::parse_from_str(&text, KEY_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| Error::Timestamp {
            value: text.into_owned(),
            source,
        })
}
