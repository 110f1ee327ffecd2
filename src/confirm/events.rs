//! Confirmation by transaction-event subscription
//!
//! One subscription per call. After subscribing, every pending id is queried
//! once so transactions that committed before the stream was open are not
//! missed. The subscription is closed exactly once: explicitly when the
//! watch loop ends, or by drop when the deadline cancels it.

use super::{race_deadline, ConfirmationOutcome, ConfirmationTracker, OutcomeBook};
use crate::error::{Error, Result};
use crate::ledger::{ShardClient, TxSubscription};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Resolve transactions from the shard's push event stream
#[derive(Debug, Default, Clone, Copy)]
pub struct EventSubscribe;

impl EventSubscribe {
    async fn watch(client: &dyn ShardClient, book: &OutcomeBook) -> Result<()> {
        let mut subscription = client.subscribe_tx_events().await?;
        let outcome = Self::drain(client, book, &mut subscription).await;
        subscription.unsubscribe();
        outcome
    }

    async fn drain(
        client: &dyn ShardClient,
        book: &OutcomeBook,
        subscription: &mut TxSubscription,
    ) -> Result<()> {
        for tx_id in book.pending() {
            if let Some(committed) = client.query_tx(&tx_id).await? {
                debug!(tx = %tx_id, "Resolved by catch-up query");
                book.record(ConfirmationOutcome::from_result(&committed));
            }
        }

        while !book.is_complete() {
            match subscription.next_event().await {
                Some(event) => {
                    if book.is_pending(&event.hash) {
                        book.record(ConfirmationOutcome::from_result(&event));
                    }
                }
                None => {
                    return Err(Error::Disconnected(format!(
                        "{} (event stream ended)",
                        client.shard_name()
                    )))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfirmationTracker for EventSubscribe {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn confirm(
        &self,
        client: Arc<dyn ShardClient>,
        tx_ids: &[String],
        timeout: Duration,
    ) -> HashMap<String, ConfirmationOutcome> {
        let book = OutcomeBook::new(tx_ids);
        if tx_ids.is_empty() {
            return book.finish();
        }

        if !client.supports_streaming() {
            warn!(
                shard = client.shard_name(),
                "Transport has no event stream, cannot confirm by subscription"
            );
            book.fail_pending("event subscriptions are not supported by this transport");
            return book.finish();
        }

        let deadline = Instant::now() + timeout;
        race_deadline(&book, deadline, Self::watch(client.as_ref(), &book)).await;
        book.finish()
    }
}
