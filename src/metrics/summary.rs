use std::collections::{BTreeMap, BTreeSet};
use std::ops::Sub;

use serde::{Deserialize, Serialize};

use super::bp_data::BpData;

/// Cumulative aggregate since ingest start.
///
/// Persisted snapshots of this type are append-only and monotone: for two
/// snapshots with `a.last_block_num <= b.last_block_num`, `&b - &a` is
/// non-negative in every component. Range queries hand out exactly those
/// differences, never the cumulative values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub producers: BTreeMap<String, BpData>,
    pub last_block_num: u64,
    pub last_schedule_num: u64,
}

impl BlockSummary {
    /// Per-producer totals, default-constructed on first touch.
    pub fn producer_mut(&mut self, name: &str) -> &mut BpData {
        self.producers.entry(name.to_owned()).or_default()
    }

    /// Strip zero-count action classes from every producer.
    pub fn minify(&mut self) {
        for data in self.producers.values_mut() {
            data.minify();
        }
    }
}

impl Sub<&BlockSummary> for &BlockSummary {
    type Output = BlockSummary;

    fn sub(self, other: &BlockSummary) -> BlockSummary {
        let keys: BTreeSet<&String> = self.producers.keys().chain(other.producers.keys()).collect();
        let mut producers = BTreeMap::new();
        for key in keys {
            let minuend = self.producers.get(key).cloned().unwrap_or_default();
            let delta = match other.producers.get(key) {
                Some(subtrahend) => &minuend - subtrahend,
                None => minuend,
            };
            producers.insert(key.clone(), delta);
        }
        BlockSummary {
            producers,
            last_block_num: self.last_block_num,
            last_schedule_num: self.last_schedule_num,
        }
    }
}
