use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::chain::ChainClient;
use crate::error::Result;

use super::aggregator::Aggregator;

/// Blocks fetched concurrently within a batch.
const FETCH_WORKERS: usize = 8;

/// Batch ceiling; keeps the snapshot cadence regular on deep backlogs.
const MAX_BATCH: u64 = 1000;

/// Wait when the irreversible frontier hasn't moved.
const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Pause after a batch fails, on top of whatever backoff the chain client
/// already spent.
const FAILURE_WAIT: Duration = Duration::from_secs(60);

/// Driver of the ingest side: polls the irreversible frontier, fans block
/// fetches out over a bounded worker pool, and feeds the results to the
/// aggregator strictly in block-number order. Fetching is the bottleneck;
/// aggregation stays serial.
pub struct Tailer {
    client: ChainClient,
    aggregator: Aggregator,
    stop: Arc<AtomicBool>,
}

impl Tailer {
    pub fn new(client: ChainClient, aggregator: Aggregator, stop: Arc<AtomicBool>) -> Self {
        Self {
            client,
            aggregator,
            stop,
        }
    }

    /// Run until the stop flag flips. On stop, in-flight fetches are
    /// dropped with the batch; nothing is force-flushed.
    pub async fn run(mut self) {
        info!(last_block_num = self.aggregator.last_block_num(), "tailer started");
        while !self.stop.load(Ordering::Relaxed) {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => sleep(IDLE_WAIT).await,
                Err(err) => {
                    // The aggregator's position only advances on success, so
                    // resuming re-fetches the failed range and nothing else.
                    error!(error = %err, "ingest batch failed, pausing before retry");
                    sleep(FAILURE_WAIT).await;
                }
            }
        }
        info!("tailer stopped");
    }

    /// One poll-fetch-apply round. `Ok(false)` means the frontier hasn't
    /// moved past what is already ingested.
    async fn step(&mut self) -> Result<bool> {
        let last = self.aggregator.last_block_num();
        let info = self.client.get_info().await?;
        let frontier = info.last_irreversible_block_num;
        if frontier <= last {
            return Ok(false);
        }

        let target = frontier.min(last + MAX_BATCH);
        info!(
            from = last + 1,
            to = target,
            frontier,
            head = info.head_block_num,
            "fetching finalized blocks"
        );

        // `buffered` keeps up to FETCH_WORKERS requests in flight but yields
        // completions in submission order, so the aggregator only ever sees
        // ascending block numbers.
        let client = self.client.clone();
        let mut blocks = stream::iter(last + 1..=target)
            .map(|block_num| {
                let client = client.clone();
                async move { client.get_block(block_num).await }
            })
            .buffered(FETCH_WORKERS);

        while let Some(fetched) = blocks.next().await {
            let block = fetched?;
            debug!(block_num = block.block_num, "applying block");
            self.aggregator.apply(&block)?;
        }
        Ok(true)
    }
}
