//! Confirmation by polling transaction queries

use super::{race_deadline, ConfirmationOutcome, ConfirmationTracker, OutcomeBook};
use crate::config::ConfirmationConfig;
use crate::error::Result;
use crate::ledger::ShardClient;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Query every pending id once per round until all are found
#[derive(Debug, Clone)]
pub struct Polling {
    interval: Duration,
    max_concurrent: usize,
}

impl Polling {
    /// Create a polling tracker
    pub fn new(interval: Duration, max_concurrent: usize) -> Self {
        Polling {
            interval,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Create from configuration
    pub fn from_config(config: &ConfirmationConfig) -> Self {
        Self::new(
            Duration::from_millis(config.poll_interval_ms),
            config.max_concurrent_queries,
        )
    }

    async fn poll_until_done(&self, client: &dyn ShardClient, book: &OutcomeBook) -> Result<()> {
        let mut round = 0u32;
        loop {
            let pending = book.pending();
            if pending.is_empty() {
                return Ok(());
            }
            round += 1;

            let results: Vec<_> = stream::iter(pending)
                .map(|tx_id| async move {
                    let result = client.query_tx(&tx_id).await;
                    (tx_id, result)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

            for (tx_id, result) in results {
                match result {
                    Ok(Some(committed)) => {
                        book.record(ConfirmationOutcome::from_result(&committed));
                    }
                    Ok(None) => {}
                    Err(e) => debug!(tx = %tx_id, "Query failed, retrying next round: {}", e),
                }
            }

            if book.is_complete() {
                debug!(shard = client.shard_name(), rounds = round, "All transactions resolved");
                return Ok(());
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

impl Default for Polling {
    fn default() -> Self {
        Self::from_config(&ConfirmationConfig::default())
    }
}

#[async_trait]
impl ConfirmationTracker for Polling {
    fn name(&self) -> &'static str {
        "polling"
    }

    async fn confirm(
        &self,
        client: Arc<dyn ShardClient>,
        tx_ids: &[String],
        timeout: Duration,
    ) -> HashMap<String, ConfirmationOutcome> {
        let book = OutcomeBook::new(tx_ids);
        let deadline = Instant::now() + timeout;

        race_deadline(&book, deadline, self.poll_until_done(client.as_ref(), &book)).await;
        book.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, broadcast_stores};

    #[tokio::test]
    async fn test_polling_confirms_batch() {
        let (_network, manager) = testutil::connected(1).await;
        let ids = broadcast_stores(&manager, "data-0", 5, 1_000_000).await;

        let tracker = Polling::new(Duration::from_millis(10), 4);
        let outcomes = tracker
            .confirm(manager.client("data-0").unwrap(), &ids, Duration::from_secs(5))
            .await;

        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.values().all(|o| o.success && o.block_height.is_some()));
    }

    #[tokio::test]
    async fn test_polling_reports_execution_failure() {
        let (_network, manager) = testutil::connected(1).await;
        let ids = broadcast_stores(&manager, "data-0", 2, 10).await;

        let outcomes = Polling::new(Duration::from_millis(10), 4)
            .confirm(manager.client("data-0").unwrap(), &ids, Duration::from_secs(5))
            .await;

        assert!(outcomes.values().all(|o| !o.success && !o.is_timeout()));
    }

    #[tokio::test]
    async fn test_polling_times_out() {
        let (network, manager) = testutil::connected(1).await;
        network.shard("data-0").unwrap().update_faults(|f| f.halted = true);
        let ids = broadcast_stores(&manager, "data-0", 2, 1_000_000).await;

        let started = std::time::Instant::now();
        let outcomes = Polling::new(Duration::from_millis(10), 4)
            .confirm(manager.client("data-0").unwrap(), &ids, Duration::from_millis(150))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.values().all(ConfirmationOutcome::is_timeout));
    }

    #[tokio::test]
    async fn test_unknown_id_times_out() {
        let (_network, manager) = testutil::connected(1).await;
        let ids = vec!["DEADBEEF".to_string()];

        let outcomes = Polling::new(Duration::from_millis(10), 1)
            .confirm(manager.client("data-0").unwrap(), &ids, Duration::from_millis(100))
            .await;

        assert!(outcomes["DEADBEEF"].is_timeout());
    }
}
