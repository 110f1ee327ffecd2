//! Confirmation tracking module
//!
//! Waits for a set of broadcast transactions to reach finality. Every
//! tracker races its detection loop against a deadline; whatever is still
//! unresolved when the deadline fires is reported as a failed outcome whose
//! error is [`CONFIRMATION_TIMEOUT`], so `confirm` always returns.

mod events;
mod polling;

pub use events::EventSubscribe;
pub use polling::Polling;

use crate::error::Result;
use crate::ledger::{ShardClient, TxResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Error reported for transactions unresolved at the deadline
pub const CONFIRMATION_TIMEOUT: &str = "confirmation timeout";

/// Final state of one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationOutcome {
    pub tx_id: String,
    pub success: bool,
    pub block_height: Option<u64>,
    pub gas_used: Option<u64>,
    pub error: Option<String>,
}

impl ConfirmationOutcome {
    /// Outcome of a committed transaction
    pub fn from_result(result: &TxResult) -> Self {
        ConfirmationOutcome {
            tx_id: result.hash.clone(),
            success: result.is_success(),
            block_height: Some(result.height),
            gas_used: Some(result.gas_used),
            error: if result.is_success() {
                None
            } else {
                Some(format!("code {}: {}", result.code, result.log))
            },
        }
    }

    /// Outcome of a transaction that could not be confirmed
    pub fn failed(tx_id: &str, reason: &str) -> Self {
        ConfirmationOutcome {
            tx_id: tx_id.to_string(),
            success: false,
            block_height: None,
            gas_used: None,
            error: Some(reason.to_string()),
        }
    }

    /// Whether this outcome is a deadline miss
    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(CONFIRMATION_TIMEOUT)
    }
}

/// Finality detection strategy
#[async_trait]
pub trait ConfirmationTracker: Send + Sync {
    /// Strategy name for logs and reports
    fn name(&self) -> &'static str;

    /// Wait for `tx_ids` on the shard behind `client`, at most `timeout`
    ///
    /// The returned map has exactly one outcome per requested id.
    async fn confirm(
        &self,
        client: Arc<dyn ShardClient>,
        tx_ids: &[String],
        timeout: Duration,
    ) -> HashMap<String, ConfirmationOutcome>;
}

/// Outcomes collected so far for one confirmation call
pub(crate) struct OutcomeBook {
    expected: Vec<String>,
    outcomes: Mutex<HashMap<String, ConfirmationOutcome>>,
}

impl OutcomeBook {
    pub(crate) fn new(tx_ids: &[String]) -> Self {
        OutcomeBook {
            expected: tx_ids.to_vec(),
            outcomes: Mutex::new(HashMap::with_capacity(tx_ids.len())),
        }
    }

    /// Record an outcome for a still-pending id; anything else is ignored
    pub(crate) fn record(&self, outcome: ConfirmationOutcome) -> bool {
        if !self.expected.contains(&outcome.tx_id) {
            return false;
        }
        let mut outcomes = self.outcomes.lock();
        if outcomes.contains_key(&outcome.tx_id) {
            return false;
        }
        outcomes.insert(outcome.tx_id.clone(), outcome);
        true
    }

    pub(crate) fn is_pending(&self, tx_id: &str) -> bool {
        self.expected.iter().any(|id| id == tx_id) && !self.outcomes.lock().contains_key(tx_id)
    }

    pub(crate) fn pending(&self) -> Vec<String> {
        let outcomes = self.outcomes.lock();
        self.expected
            .iter()
            .filter(|id| !outcomes.contains_key(*id))
            .cloned()
            .collect()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.outcomes.lock().len() >= self.unique_expected()
    }

    fn unique_expected(&self) -> usize {
        let mut ids: Vec<&String> = self.expected.iter().collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }

    /// Mark every pending id failed with `reason`
    pub(crate) fn fail_pending(&self, reason: &str) {
        for id in self.pending() {
            self.record(ConfirmationOutcome::failed(&id, reason));
        }
    }

    /// Final map; anything unresolved is a timeout
    pub(crate) fn finish(self) -> HashMap<String, ConfirmationOutcome> {
        let mut outcomes = self.outcomes.into_inner();
        for id in self.expected {
            outcomes
                .entry(id.clone())
                .or_insert_with(|| ConfirmationOutcome::failed(&id, CONFIRMATION_TIMEOUT));
        }
        outcomes
    }
}

/// Run `attempt` until it finishes or `deadline` passes
///
/// An attempt that errors marks every pending id failed with the error.
/// A deadline miss leaves pending ids for [`OutcomeBook::finish`] to time out.
pub(crate) async fn race_deadline<F>(book: &OutcomeBook, deadline: Instant, attempt: F)
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout_at(deadline, attempt).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Confirmation attempt failed: {}", e);
            book.fail_pending(&e.to_string());
        }
        Err(_) => {
            debug!("Confirmation deadline reached with {} pending", book.pending().len());
        }
    }
}
