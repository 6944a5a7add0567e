use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use super::histogram::Stats;
use crate::chain::{Block, Trx};
use crate::classify::Classifiers;
use crate::slots::SLOTS_PER_WINDOW;

/// Running totals for one block producer.
///
/// Slot arrays are indexed by position within the producer's six-second
/// window; `blocks_produced[i] <= slots_passed[i]` always. `tx_data` keys
/// are display categories from the classifier table, falling back to the
/// raw `account:name` action signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BpData {
    pub tx_data: BTreeMap<String, Stats>,
    pub slots_passed: [u64; SLOTS_PER_WINDOW],
    pub blocks_produced: [u64; SLOTS_PER_WINDOW],
}

impl BpData {
    /// The producer owed this slot but no block arrived.
    pub fn miss_block(&mut self, slot: usize) {
        self.slots_passed[slot] += 1;
    }

    /// Fold a produced block into the totals.
    ///
    /// Only transactions in the structured `trx` form that carry exactly one
    /// action contribute CPU observations; a multi-action transaction's cost
    /// cannot be attributed to a single action class, and the packed string
    /// form carries no action data at all.
    pub fn process_block(&mut self, block: &Block, slot: usize, classifiers: &Classifiers) {
        self.slots_passed[slot] += 1;
        self.blocks_produced[slot] += 1;
        for tx in &block.transactions {
            let Trx::Signed(signed) = &tx.trx else {
                continue;
            };
            let [action] = signed.transaction.actions.as_slice() else {
                continue;
            };
            let key = match classifiers.classify(action) {
                Some(category) => category.to_owned(),
                None => format!("{}:{}", action.account, action.name),
            };
            self.tx_data
                .entry(key)
                .or_default()
                .observe(tx.cpu_usage_us as f64);
        }
    }

    pub fn slots_passed_total(&self) -> u64 {
        self.slots_passed.iter().sum()
    }

    pub fn blocks_produced_total(&self) -> u64 {
        self.blocks_produced.iter().sum()
    }

    /// Drop action classes with no observations. Applied to query deltas
    /// before they leave the crate.
    pub fn minify(&mut self) {
        self.tx_data.retain(|_, stats| stats.count() > 0);
    }
}

fn merged_keys<'a>(a: &'a BpData, b: &'a BpData) -> BTreeSet<&'a String> {
    a.tx_data.keys().chain(b.tx_data.keys()).collect()
}

impl Add<&BpData> for &BpData {
    type Output = BpData;

    fn add(self, other: &BpData) -> BpData {
        let mut tx_data = BTreeMap::new();
        for key in merged_keys(self, other) {
            let mut merged = self.tx_data.get(key).cloned().unwrap_or_default();
            if let Some(stats) = other.tx_data.get(key) {
                merged += stats;
            }
            tx_data.insert(key.clone(), merged);
        }
        BpData {
            tx_data,
            slots_passed: std::array::from_fn(|i| self.slots_passed[i] + other.slots_passed[i]),
            blocks_produced: std::array::from_fn(|i| {
                self.blocks_produced[i] + other.blocks_produced[i]
            }),
        }
    }
}

impl Sub<&BpData> for &BpData {
    type Output = BpData;

    fn sub(self, other: &BpData) -> BpData {
        let mut tx_data = BTreeMap::new();
        for key in merged_keys(self, other) {
            let minuend = self.tx_data.get(key).cloned().unwrap_or_default();
            let delta = match other.tx_data.get(key) {
                Some(subtrahend) => &minuend - subtrahend,
                None => minuend,
            };
            tx_data.insert(key.clone(), delta);
        }
        BpData {
            tx_data,
            slots_passed: std::array::from_fn(|i| self.slots_passed[i] - other.slots_passed[i]),
            blocks_produced: std::array::from_fn(|i| {
                self.blocks_produced[i] - other.blocks_produced[i]
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Action, SignedTrx, TransactionBody, TransactionReceipt};
    use crate::classify::{Classifier, Classifiers};

    fn tx(account: &str, name: &str, cpu_usage_us: u64) -> TransactionReceipt {
        TransactionReceipt {
            cpu_usage_us,
            trx: Trx::Signed(SignedTrx {
                transaction: TransactionBody {
                    actions: vec![Action {
                        account: account.into(),
                        name: name.into(),
                        data: serde_json::Value::Null,
                    }],
                },
            }),
        }
    }

    fn block(transactions: Vec<TransactionReceipt>) -> Block {
        Block {
            timestamp: "2018-06-09T11:56:30.500".into(),
            producer: "testproducer".into(),
            block_num: 1,
            schedule_version: 0,
            new_producers: None,
            transactions,
        }
    }

    #[test]
    fn one_block_and_one_miss() {
        let classifiers = Classifiers::default();
        let mut data = BpData::default();
        data.process_block(&block(vec![tx("testtesttest", "testmethod", 600)]), 1, &classifiers);
        data.miss_block(2);

        assert_eq!(data.blocks_produced_total(), 1);
        assert_eq!(data.slots_passed_total(), 2);
        assert_eq!(data.tx_data["testtesttest:testmethod"].mean(), 600.0);
    }

    #[test]
    fn delta_between_snapshots() {
        let classifiers = Classifiers::default();
        let mut data = BpData::default();
        data.process_block(&block(vec![tx("testtesttest", "testmethod", 600)]), 1, &classifiers);
        data.miss_block(2);

        let earlier = data.clone();
        data.process_block(
            &block(vec![
                tx("testtesttest", "testmethod", 800),
                tx("testtesttest", "testmethod", 1000),
                tx("testertester", "method2", 100),
            ]),
            3,
            &classifiers,
        );

        let diff = &data - &earlier;
        assert_eq!(diff.blocks_produced_total(), 1);
        assert_eq!(diff.slots_passed_total(), 1);
        assert_eq!(diff.tx_data["testtesttest:testmethod"].mean(), 900.0);
        assert_eq!(diff.tx_data["testertester:method2"].mean(), 100.0);
    }

    #[test]
    fn string_form_and_multi_action_transactions_are_skipped() {
        let classifiers = Classifiers::default();
        let mut multi = tx("eosio.token", "transfer", 450);
        if let Trx::Signed(signed) = &mut multi.trx {
            signed.transaction.actions.push(Action {
                account: "eosio.token".into(),
                name: "transfer".into(),
                data: serde_json::Value::Null,
            });
        }
        let packed = TransactionReceipt {
            cpu_usage_us: 999,
            trx: Trx::Id("0f2a...".into()),
        };

        let mut data = BpData::default();
        data.process_block(&block(vec![multi, packed]), 0, &classifiers);

        assert_eq!(data.blocks_produced_total(), 1);
        assert!(data.tx_data.is_empty());
    }

    #[test]
    fn classifier_categories_replace_raw_signatures() {
        let classifiers = Classifiers::new(vec![Classifier {
            account: "eosio.token".into(),
            name: "transfer".into(),
            data_equals: BTreeMap::new(),
            category: "Simple Transfer".into(),
        }]);

        let mut data = BpData::default();
        data.process_block(
            &block(vec![tx("eosio.token", "transfer", 300), tx("eosio", "buyram", 700)]),
            0,
            &classifiers,
        );

        assert_eq!(data.tx_data["Simple Transfer"].mean(), 300.0);
        assert_eq!(data.tx_data["eosio:buyram"].mean(), 700.0);
    }

    #[test]
    fn minify_drops_empty_action_classes() {
        let classifiers = Classifiers::default();
        let mut data = BpData::default();
        data.process_block(&block(vec![tx("testtesttest", "testmethod", 600)]), 0, &classifiers);

        // A subtraction that cancels the only observation leaves a zero-count
        // entry behind; minify removes it.
        let mut delta = &data - &data;
        assert_eq!(delta.tx_data.len(), 1);
        delta.minify();
        assert!(delta.tx_data.is_empty());
    }
}
