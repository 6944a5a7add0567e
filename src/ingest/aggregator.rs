use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::chain::{Block, BlockHeaderState};
use crate::classify::Classifiers;
use crate::error::{Error, Result};
use crate::metrics::BlockSummary;
use crate::slots::{self, SLOT_MS, SNAPSHOT_INTERVAL_SLOTS};
use crate::store::Store;

/// Schedule version 0 predates any on-chain schedule.
const GENESIS_SCHEDULE: &[&str] = &["eosio"];

/// The single owner of the in-memory aggregate and the snapshot-store write
/// side. Blocks must be fed in strictly ascending block-number order; the
/// tailer serializes them.
///
/// `cursor` is the timestamp of the most recently incorporated slot, real or
/// imputed.
pub struct Aggregator {
    store: Arc<Store>,
    classifiers: Classifiers,
    current: BlockSummary,
    cursor: DateTime<Utc>,
    missing_schedules: HashSet<u64>,
}

impl Aggregator {
    /// Resume from the newest persisted snapshot, if there is one.
    pub fn resume(store: Arc<Store>, classifiers: Classifiers) -> Result<Option<Self>> {
        let Some((cursor, current)) = store.last_snapshot()? else {
            return Ok(None);
        };
        info!(
            last_block_num = current.last_block_num,
            cursor = %cursor,
            "resuming from persisted snapshot"
        );
        Ok(Some(Self {
            store,
            classifiers,
            current,
            cursor,
            missing_schedules: HashSet::new(),
        }))
    }

    /// Seed a fresh store from the configured starting block: persist the
    /// node's active (and pending, when non-empty) schedule and an initial
    /// snapshot keyed by the block's timestamp.
    pub fn seed(
        store: Arc<Store>,
        classifiers: Classifiers,
        block: &Block,
        header_state: &BlockHeaderState,
    ) -> Result<Self> {
        let cursor = block.timestamp()?;

        let active = &header_state.active_schedule;
        store.put_schedule(active.version, &active.names())?;
        if let Some(pending) = &header_state.pending_schedule {
            let pending = pending.schedule();
            if !pending.producers.is_empty() {
                store.put_schedule(pending.version, &pending.names())?;
            }
        }

        let current = BlockSummary {
            last_block_num: block.block_num,
            last_schedule_num: block.schedule_version,
            ..Default::default()
        };
        store.put_snapshot(cursor, &current)?;
        info!(block_num = block.block_num, cursor = %cursor, "seeded fresh store");

        Ok(Self {
            store,
            classifiers,
            current,
            cursor,
            missing_schedules: HashSet::new(),
        })
    }

    pub fn last_block_num(&self) -> u64 {
        self.current.last_block_num
    }

    /// Incorporate the next irreversible block.
    pub fn apply(&mut self, block: &Block) -> Result<()> {
        let block_time = block.timestamp()?;

        if let Some(new_producers) = &block.new_producers {
            info!(
                version = new_producers.version,
                block_num = block.block_num,
                "persisting new producer schedule"
            );
            self.store
                .put_schedule(new_producers.version, &new_producers.names())?;
        }

        self.impute_missed_slots(block_time)?;

        let position = match self.schedule(block.schedule_version)? {
            Some(schedule) => {
                let (expected, position) = slots::producer_for_timestamp(block_time, &schedule);
                if expected != block.producer {
                    return Err(Error::ProducerMismatch {
                        block_num: block.block_num,
                        expected: expected.to_owned(),
                        actual: block.producer.clone(),
                    });
                }
                position
            }
            // Without the schedule the producer cannot be cross-checked, but
            // the slot position needs no schedule.
            None => slots::slot_position(block_time),
        };

        self.current
            .producer_mut(&block.producer)
            .process_block(block, position, &self.classifiers);
        self.current.last_block_num = block.block_num;
        self.current.last_schedule_num = block.schedule_version;
        self.maybe_snapshot()?;
        self.cursor = block_time;
        Ok(())
    }

    /// Attribute every half-second slot strictly between the cursor and the
    /// incoming block to the producer who owed it.
    ///
    /// Gaps resolve against the schedule in force at the *previous* block;
    /// at a schedule transition this can attribute up to one window of
    /// imputed slots under the outgoing schedule. That matches the deployed
    /// behavior and is kept intentionally.
    fn impute_missed_slots(&mut self, block_time: DateTime<Utc>) -> Result<()> {
        let gap = (block_time - self.cursor).num_milliseconds() / SLOT_MS - 1;
        if gap <= 0 {
            return Ok(());
        }
        let Some(schedule) = self.schedule(self.current.last_schedule_num)? else {
            return Ok(());
        };

        let base = self.cursor;
        for i in 1..=gap {
            let missed_at = base + Duration::milliseconds(SLOT_MS * i);
            let (producer, position) = slots::producer_for_timestamp(missed_at, &schedule);
            self.cursor = missed_at;
            self.current.producer_mut(producer).miss_block(position);
            self.maybe_snapshot()?;
        }
        Ok(())
    }

    /// Persist the running aggregate whenever the cursor lands on an epoch
    /// boundary (every ten full rotations, ~21 minutes of chain time).
    fn maybe_snapshot(&self) -> Result<()> {
        let slot = slots::timestamp_to_slot(self.cursor);
        if slot % SNAPSHOT_INTERVAL_SLOTS != 0 {
            return Ok(());
        }
        info!(
            block_num = self.current.last_block_num,
            cursor = %self.cursor,
            "persisting snapshot"
        );
        self.store.put_snapshot(self.cursor, &self.current)
    }

    fn schedule(&mut self, version: u64) -> Result<Option<Vec<String>>> {
        if version == 0 {
            return Ok(Some(
                GENESIS_SCHEDULE.iter().map(|name| name.to_string()).collect(),
            ));
        }
        match self.store.schedule(version)? {
            Some(schedule) => Ok(Some(schedule)),
            None => {
                if self.missing_schedules.insert(version) {
                    warn!(version, "schedule version missing from store");
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::slots::parse_timestamp;

    fn epoch() -> DateTime<Utc> {
        parse_timestamp("2000-01-01T00:00:00").unwrap()
    }

    fn slot_time(k: i64) -> DateTime<Utc> {
        epoch() + Duration::milliseconds(SLOT_MS * k)
    }

    fn schedule_names() -> Vec<String> {
        (0..21).map(|i| format!("bp{i:02}")).collect()
    }

    fn producer_at(slot: i64) -> String {
        schedule_names()[(slot as usize % 252) / 12].clone()
    }

    fn block_at(slot: i64, block_num: u64, schedule_version: u64) -> Block {
        Block {
            timestamp: slot_time(slot).format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            producer: producer_at(slot),
            block_num,
            schedule_version,
            new_producers: None,
            transactions: Vec::new(),
        }
    }

    fn aggregator_at(slot: i64, store: Arc<Store>, schedule_version: u64) -> Aggregator {
        Aggregator {
            store,
            classifiers: Classifiers::default(),
            current: BlockSummary {
                last_block_num: 100,
                last_schedule_num: schedule_version,
                ..Default::default()
            },
            cursor: slot_time(slot),
            missing_schedules: HashSet::new(),
        }
    }

    fn temp_store_with_schedule(version: u64) -> (tempfile::TempDir, Arc<Store>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        store.put_schedule(version, &schedule_names()).unwrap();
        (dir, store)
    }

    #[test]
    fn gap_imputation_charges_the_scheduled_producers() {
        let (_dir, store) = temp_store_with_schedule(1);
        // Not a snapshot boundary anywhere in the window under test.
        let k = 1_000_000;
        let mut aggregator = aggregator_at(k, store, 1);

        aggregator.apply(&block_at(k + 5, 101, 1)).unwrap();

        // Four slots between cursor and block were missed.
        let summary = &aggregator.current;
        let passed_total: u64 = summary
            .producers
            .values()
            .map(|data| data.slots_passed_total())
            .sum();
        let produced_total: u64 = summary
            .producers
            .values()
            .map(|data| data.blocks_produced_total())
            .sum();
        assert_eq!(passed_total, 5);
        assert_eq!(produced_total, 1);

        for missed in (k + 1)..(k + 5) {
            let owner = producer_at(missed);
            let position = (missed % 12) as usize;
            let data = &summary.producers[&owner];
            assert!(
                data.slots_passed[position] >= 1,
                "slot {missed} not charged to {owner} at position {position}"
            );
            assert_eq!(data.blocks_produced[position], 0);
        }

        let producer = producer_at(k + 5);
        assert_eq!(summary.producers[&producer].blocks_produced[(k as usize + 5) % 12], 1);
        assert_eq!(summary.last_block_num, 101);
        assert_eq!(aggregator.cursor, slot_time(k + 5));
    }

    #[test]
    fn consecutive_blocks_impute_nothing() {
        let (_dir, store) = temp_store_with_schedule(1);
        let k = 1_000_000;
        let mut aggregator = aggregator_at(k, store, 1);

        aggregator.apply(&block_at(k + 1, 101, 1)).unwrap();

        let passed_total: u64 = aggregator
            .current
            .producers
            .values()
            .map(|data| data.slots_passed_total())
            .sum();
        assert_eq!(passed_total, 1);
    }

    #[test]
    fn producer_mismatch_fails_the_batch() {
        let (_dir, store) = temp_store_with_schedule(1);
        let k = 1_000_000;
        let mut aggregator = aggregator_at(k, store, 1);

        let mut block = block_at(k + 1, 101, 1);
        block.producer = "impostor".into();

        let err = aggregator.apply(&block).unwrap_err();
        assert!(matches!(err, Error::ProducerMismatch { block_num: 101, .. }));
    }

    #[test]
    fn missing_schedule_skips_imputation_but_applies_the_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        let k = 1_000_000;
        let mut aggregator = aggregator_at(k, store, 99);

        let mut block = block_at(k + 5, 101, 99);
        block.producer = "whoever".into();
        aggregator.apply(&block).unwrap();

        // No imputed slots, no mismatch check; the block itself lands.
        assert_eq!(aggregator.current.producers.len(), 1);
        let data = &aggregator.current.producers["whoever"];
        assert_eq!(data.slots_passed_total(), 1);
        assert_eq!(data.blocks_produced[(k as usize + 5) % 12], 1);
        assert_eq!(aggregator.current.last_block_num, 101);
    }

    #[test]
    fn new_producers_are_persisted_before_use() {
        use crate::chain::{NewProducers, ProducerKey};

        let (_dir, store) = temp_store_with_schedule(1);
        let k = 1_000_000;
        let mut aggregator = aggregator_at(k, store.clone(), 1);

        let mut block = block_at(k + 1, 101, 1);
        block.new_producers = Some(NewProducers {
            version: 2,
            producers: schedule_names()
                .into_iter()
                .rev()
                .map(|producer_name| ProducerKey { producer_name })
                .collect(),
        });
        aggregator.apply(&block).unwrap();

        let stored = store.schedule(2).unwrap().unwrap();
        assert_eq!(stored.len(), 21);
        assert_eq!(stored[0], "bp20");
    }

    #[test]
    fn snapshot_written_when_an_imputed_slot_hits_the_boundary() {
        let (_dir, store) = temp_store_with_schedule(1);
        let boundary = SNAPSHOT_INTERVAL_SLOTS * 400;
        let mut aggregator = aggregator_at(boundary - 3, store.clone(), 1);

        aggregator.apply(&block_at(boundary + 2, 101, 1)).unwrap();

        let (at, snapshot) = store.last_snapshot().unwrap().unwrap();
        assert_eq!(at, slot_time(boundary));
        // The boundary snapshot was cut mid-gap, before the block landed.
        assert_eq!(snapshot.last_block_num, 100);
    }

    #[test]
    fn slot_accounting_matches_elapsed_time() {
        let (_dir, store) = temp_store_with_schedule(1);
        let k = 1_000_000;
        let mut aggregator = aggregator_at(k, store, 1);

        // Five blocks with assorted gaps covering 12 slots total.
        let mut slot = k;
        let mut block_num = 100;
        for gap in [1, 3, 2, 5, 1] {
            slot += gap;
            block_num += 1;
            aggregator.apply(&block_at(slot, block_num, 1)).unwrap();
        }

        let passed_total: u64 = aggregator
            .current
            .producers
            .values()
            .map(|data| data.slots_passed_total())
            .sum();
        assert_eq!(passed_total, (slot - k) as u64);

        for data in aggregator.current.producers.values() {
            for i in 0..data.slots_passed.len() {
                assert!(data.blocks_produced[i] <= data.slots_passed[i]);
            }
        }
    }

    #[test]
    fn seed_then_resume_restores_state() {
        use crate::chain::{BlockHeaderState, PendingSchedule, ProducerSchedule, ProducerKey};

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());

        let k = 1_000_000;
        let block = block_at(k, 500, 3);
        let header_state = BlockHeaderState {
            active_schedule: ProducerSchedule {
                version: 3,
                producers: schedule_names()
                    .into_iter()
                    .map(|producer_name| ProducerKey { producer_name })
                    .collect(),
            },
            pending_schedule: Some(PendingSchedule::Inline(ProducerSchedule {
                version: 4,
                producers: Vec::new(),
            })),
        };

        let seeded = Aggregator::seed(
            store.clone(),
            Classifiers::default(),
            &block,
            &header_state,
        )
        .unwrap();
        assert_eq!(seeded.last_block_num(), 500);
        assert!(store.schedule(3).unwrap().is_some());
        // Empty pending schedules are not worth persisting.
        assert!(store.schedule(4).unwrap().is_none());

        let resumed = Aggregator::resume(store, Classifiers::default())
            .unwrap()
            .expect("seed left a snapshot behind");
        assert_eq!(resumed.last_block_num(), 500);
        assert_eq!(resumed.cursor, slot_time(k));
    }
}
