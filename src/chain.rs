use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::{Error, Result};
use crate::slots;

/// Seconds slept before each successive attempt; the first try is immediate.
/// After the last attempt fails the error propagates to the caller.
const BACKOFF_SCHEDULE: [u64; 10] = [0, 5, 10, 15, 20, 30, 60, 120, 300, 900];

/// Thin client over the node's chain API.
///
/// Every RPC is independently wrapped in the escalating retry schedule:
/// transport faults, non-success statuses, and body decode failures all
/// count as transient until the schedule is exhausted.
#[derive(Debug, Clone)]
pub struct ChainClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ChainClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
        }
    }

    /// `GET /v1/chain/get_info`.
    pub async fn get_info(&self) -> Result<ChainInfo> {
        self.with_backoff("get_info", || async {
            let response = self
                .http
                .get(format!("{}/v1/chain/get_info", self.endpoint))
                .send()
                .await?;
            let info: ChainInfo = response.error_for_status()?.json().await?;
            Ok(info)
        })
        .await
    }

    /// `POST /v1/chain/get_block`.
    pub async fn get_block(&self, block_num: u64) -> Result<Block> {
        self.with_backoff("get_block", || async {
            let response = self
                .http
                .post(format!("{}/v1/chain/get_block", self.endpoint))
                .json(&json!({ "block_num_or_id": block_num }))
                .send()
                .await?;
            let block: Block = response.error_for_status()?.json().await?;
            Ok(block)
        })
        .await
    }

    /// `POST /v1/chain/get_block_header_state` — used once, to bootstrap the
    /// schedule store when the snapshot database is empty.
    pub async fn get_block_header_state(&self, block_num: u64) -> Result<BlockHeaderState> {
        self.with_backoff("get_block_header_state", || async {
            let response = self
                .http
                .post(format!("{}/v1/chain/get_block_header_state", self.endpoint))
                .json(&json!({ "block_num_or_id": block_num }))
                .send()
                .await?;
            let state: BlockHeaderState = response.error_for_status()?.json().await?;
            Ok(state)
        })
        .await
    }

    async fn with_backoff<T, F, Fut>(&self, rpc: &'static str, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, reqwest::Error>>,
    {
        let final_attempt = BACKOFF_SCHEDULE.len() - 1;
        for (attempt, &delay) in BACKOFF_SCHEDULE.iter().enumerate() {
            if delay > 0 {
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < final_attempt => {
                    warn!(rpc, attempt, error = %err, "transient chain rpc failure, retrying");
                }
                Err(err) => return Err(Error::Rpc(err)),
            }
        }
        unreachable!("backoff schedule is never empty")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub last_irreversible_block_num: u64,
    pub head_block_num: u64,
}

/// The subset of a block the aggregate cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: String,
    pub producer: String,
    pub block_num: u64,
    pub schedule_version: u64,
    #[serde(default)]
    pub new_producers: Option<NewProducers>,
    #[serde(default)]
    pub transactions: Vec<TransactionReceipt>,
}

impl Block {
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        slots::parse_timestamp(&self.timestamp)
    }
}

/// Schedule change embedded in the block that enacts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProducers {
    pub version: u64,
    pub producers: Vec<ProducerKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerKey {
    pub producer_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub cpu_usage_us: u64,
    pub trx: Trx,
}

/// The node reports `trx` either as a bare transaction id or as the
/// structured object carrying the signed transaction body. Only the
/// structured form contributes statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trx {
    Id(String),
    Signed(SignedTrx),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTrx {
    pub transaction: TransactionBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBody {
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub account: String,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeaderState {
    pub active_schedule: ProducerSchedule,
    #[serde(default)]
    pub pending_schedule: Option<PendingSchedule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProducerSchedule {
    pub version: u64,
    pub producers: Vec<ProducerKey>,
}

impl ProducerSchedule {
    pub fn names(&self) -> Vec<String> {
        self.producers
            .iter()
            .map(|key| key.producer_name.clone())
            .collect()
    }
}

impl NewProducers {
    pub fn names(&self) -> Vec<String> {
        self.producers
            .iter()
            .map(|key| key.producer_name.clone())
            .collect()
    }
}

/// Older node versions inline the pending schedule; newer ones wrap it
/// alongside its hash and LIB number.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PendingSchedule {
    Wrapped { schedule: ProducerSchedule },
    Inline(ProducerSchedule),
}

impl PendingSchedule {
    pub fn schedule(&self) -> &ProducerSchedule {
        match self {
            Self::Wrapped { schedule } => schedule,
            Self::Inline(schedule) => schedule,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn backoff_schedule_is_the_prescribed_one() {
        assert_eq!(BACKOFF_SCHEDULE, [0, 5, 10, 15, 20, 30, 60, 120, 300, 900]);
    }

    #[test]
    fn block_deserializes_both_trx_forms() {
        let block: Block = serde_json::from_value(json!({
            "timestamp": "2018-06-09T11:56:30.500",
            "producer": "eosnewyorkio",
            "block_num": 1234567,
            "schedule_version": 12,
            "new_producers": null,
            "transactions": [
                {"cpu_usage_us": 523, "trx": "74f2cf1d94e64eb2fe485453e9f0f4f7e7b25e53ba5ed7c9b2e5e3e7f5ba41aa"},
                {
                    "cpu_usage_us": 812,
                    "trx": {
                        "id": "aa12",
                        "transaction": {
                            "actions": [
                                {"account": "eosio.token", "name": "transfer", "data": {"memo": "hi"}}
                            ]
                        }
                    }
                }
            ]
        }))
        .unwrap();

        assert_eq!(block.block_num, 1_234_567);
        assert!(matches!(block.transactions[0].trx, Trx::Id(_)));
        let Trx::Signed(signed) = &block.transactions[1].trx else {
            panic!("expected structured trx");
        };
        assert_eq!(signed.transaction.actions[0].account, "eosio.token");
        assert_eq!(block.timestamp().unwrap().timestamp_subsec_millis(), 500);
    }

    #[test]
    fn block_with_new_producers() {
        let block: Block = serde_json::from_value(json!({
            "timestamp": "2018-06-10T00:00:00.000",
            "producer": "eosio",
            "block_num": 42,
            "schedule_version": 0,
            "new_producers": {
                "version": 1,
                "producers": [
                    {"producer_name": "alice", "block_signing_key": "EOS1..."},
                    {"producer_name": "bob", "block_signing_key": "EOS2..."}
                ]
            },
            "transactions": []
        }))
        .unwrap();

        let new_producers = block.new_producers.unwrap();
        assert_eq!(new_producers.version, 1);
        assert_eq!(new_producers.names(), ["alice", "bob"]);
    }

    #[test]
    fn header_state_accepts_both_pending_shapes() {
        let wrapped: BlockHeaderState = serde_json::from_value(json!({
            "active_schedule": {"version": 3, "producers": [{"producer_name": "alice"}]},
            "pending_schedule": {
                "schedule_lib_num": 7,
                "schedule": {"version": 4, "producers": [{"producer_name": "bob"}]}
            }
        }))
        .unwrap();
        assert_eq!(wrapped.active_schedule.version, 3);
        assert_eq!(wrapped.pending_schedule.unwrap().schedule().version, 4);

        let inline: BlockHeaderState = serde_json::from_value(json!({
            "active_schedule": {"version": 3, "producers": [{"producer_name": "alice"}]},
            "pending_schedule": {"version": 5, "producers": []}
        }))
        .unwrap();
        assert_eq!(inline.pending_schedule.unwrap().schedule().version, 5);
    }
}
