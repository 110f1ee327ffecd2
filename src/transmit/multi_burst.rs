//! Pipelined burst transmission

use super::{fee_for, placement, resolve_gas_limit, store_msg, TransmitReport, Transmitter};
use crate::allocate::Job;
use crate::config::GasConfig;
use crate::confirm::ConfirmationTracker;
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::ledger::{AuthInfo, TxBody};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Sign a whole batch on consecutive sequences and put it in flight at once
///
/// The shard's counter is resynced with the chain first, then one block of
/// sequence numbers is reserved for the batch. Completion is delegated to
/// the confirmation tracker; the batch succeeds only if every transaction
/// does.
pub struct MultiBurst {
    tracker: Arc<dyn ConfirmationTracker>,
    timeout: Duration,
}

impl MultiBurst {
    /// Create a burst transmitter confirming through `tracker`
    pub fn new(tracker: Arc<dyn ConfirmationTracker>, timeout: Duration) -> Self {
        MultiBurst { tracker, timeout }
    }
}

#[async_trait]
impl Transmitter for MultiBurst {
    fn name(&self) -> &'static str {
        "multiburst"
    }

    async fn transmit(
        &self,
        job: &Job,
        gas: &GasConfig,
        connections: &ConnectionManager,
    ) -> Result<TransmitReport> {
        let shard = job.shard_name.as_str();
        let mut report = TransmitReport {
            shard_name: shard.to_string(),
            ..Default::default()
        };
        if job.batch.is_empty() {
            return Ok(report);
        }

        let client = connections.client(shard)?;
        let signer = connections.signer(shard)?;
        let account_number = connections.account(shard)?.account_number;

        connections.resync(shard).await?;
        let count = job.batch.len() as u64;
        let first = connections.reserve_sequence(shard, count)?;
        let end = first + count;

        // Offline signing
        let mut signed = Vec::with_capacity(job.batch.len());
        for (offset, fragment) in job.batch.iter().enumerate() {
            let msgs = vec![store_msg(signer.address(), fragment)];
            let gas_limit = resolve_gas_limit(client.as_ref(), &signer, &msgs, gas).await;
            let auth = AuthInfo {
                chain_id: shard.to_string(),
                signer: signer.address().to_string(),
                account_number,
                sequence: first + offset as u64,
                fee: fee_for(gas_limit, gas),
            };
            let bytes = signer
                .sign_tx(TxBody::new(msgs), auth)
                .and_then(|tx| tx.encode());
            match bytes {
                Ok(bytes) => signed.push(bytes),
                Err(e) => {
                    connections.release_unused(shard, first, end)?;
                    return Err(e);
                }
            }
        }

        // Fire-and-forget broadcast
        let mut tx_ids = Vec::with_capacity(signed.len());
        for (offset, bytes) in signed.into_iter().enumerate() {
            match client.broadcast_async(bytes).await {
                Ok(tx_id) => tx_ids.push(tx_id),
                Err(e) => {
                    let unsent = first + offset as u64;
                    if !connections.release_unused(shard, unsent, end)? {
                        warn!(shard, from = unsent, to = end, "Sequence numbers burned by failed broadcast");
                    }
                    if tx_ids.is_empty() {
                        return Err(e);
                    }
                    // Settle what was admitted before reporting
                    warn!(shard, "Broadcast stopped after {} of {}: {}", tx_ids.len(), count, e);
                    let outcomes = self.tracker.confirm(Arc::clone(&client), &tx_ids, self.timeout).await;
                    let confirmed = outcomes.values().filter(|o| o.success).count();
                    return Err(Error::BatchFailed {
                        shard: shard.to_string(),
                        failed: job.batch.len() - confirmed,
                        total: job.batch.len(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.tx_count = tx_ids.len();
        debug!(shard, first, count, "Burst in flight");

        let outcomes = self.tracker.confirm(Arc::clone(&client), &tx_ids, self.timeout).await;

        let mut failed = 0;
        let mut first_error = None;
        for (fragment, tx_id) in job.batch.iter().zip(&tx_ids) {
            match outcomes.get(tx_id) {
                Some(outcome) if outcome.success => {
                    report.gas_used += outcome.gas_used.unwrap_or(0);
                    report.placements.push(placement(fragment, shard));
                }
                Some(outcome) => {
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(format!(
                            "{}: {}",
                            fragment.index,
                            outcome.error.as_deref().unwrap_or("failed")
                        ));
                    }
                }
                None => {
                    failed += 1;
                    first_error.get_or_insert_with(|| format!("{}: no outcome", fragment.index));
                }
            }
        }

        if failed > 0 {
            return Err(Error::BatchFailed {
                shard: shard.to_string(),
                failed,
                total: job.batch.len(),
                reason: first_error.unwrap_or_default(),
            });
        }

        info!(
            shard,
            txs = report.tx_count,
            gas_used = report.gas_used,
            "Burst confirmed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::{EventSubscribe, Polling};
    use crate::testutil;

    fn polling() -> Arc<dyn ConfirmationTracker> {
        Arc::new(Polling::new(Duration::from_millis(10), 8))
    }

    #[tokio::test]
    async fn test_burst_confirms_all() {
        let (network, manager) = testutil::connected(1).await;
        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(6, 64),
        };

        let report = MultiBurst::new(polling(), Duration::from_secs(5))
            .transmit(&job, &GasConfig::default(), &manager)
            .await
            .unwrap();

        assert_eq!(report.tx_count, 6);
        assert_eq!(report.placements.len(), 6);
        assert_eq!(manager.current_sequence("data-0").unwrap(), 6);

        let shard = network.shard("data-0").unwrap();
        assert!(job.batch.iter().all(|f| shard.has_fragment(&f.index)));
    }

    #[tokio::test]
    async fn test_consecutive_bursts_with_events() {
        let (_network, manager) = testutil::connected(1).await;
        let transmitter = MultiBurst::new(Arc::new(EventSubscribe), Duration::from_secs(5));
        let fragments = testutil::fragments(8, 32);

        for batch in fragments.chunks(4) {
            let job = Job {
                shard_name: "data-0".into(),
                batch: batch.to_vec(),
            };
            let report = transmitter
                .transmit(&job, &GasConfig::default(), &manager)
                .await
                .unwrap();
            assert_eq!(report.placements.len(), 4);
        }
        assert_eq!(manager.current_sequence("data-0").unwrap(), 8);
    }

    #[tokio::test]
    async fn test_concurrent_bursts_on_one_shard() {
        let (_network, manager) = testutil::connected(1).await;
        let transmitter = MultiBurst::new(polling(), Duration::from_secs(5));
        let fragments = testutil::fragments(9, 32);
        let jobs: Vec<Job> = fragments
            .chunks(3)
            .map(|batch| Job {
                shard_name: "data-0".into(),
                batch: batch.to_vec(),
            })
            .collect();

        let gas = GasConfig::default();
        let results = futures::future::join_all(
            jobs.iter()
                .map(|job| transmitter.transmit(job, &gas, &manager)),
        )
        .await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(manager.current_sequence("data-0").unwrap(), 9);
    }

    #[tokio::test]
    async fn test_one_failed_fragment_fails_batch() {
        let (network, manager) = testutil::connected(1).await;
        network
            .shard("data-0")
            .unwrap()
            .update_faults(|f| {
                f.reject_fragments.insert(2);
            });
        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(5, 64),
        };

        let err = MultiBurst::new(polling(), Duration::from_secs(5))
            .transmit(&job, &GasConfig::default(), &manager)
            .await
            .unwrap_err();

        match err {
            Error::BatchFailed { failed, total, .. } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 5);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_resync_recovers_stale_counter() {
        let (_network, manager) = testutil::connected(1).await;
        let transmitter = MultiBurst::new(polling(), Duration::from_secs(5));

        // Advance the chain behind the manager's back
        let client = manager.client("data-0").unwrap();
        let signer = manager.signer("data-0").unwrap();
        let stray = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(1, 16),
        };
        client
            .sign_and_broadcast(
                &signer,
                vec![crate::transmit::store_msg(signer.address(), &stray.batch[0])],
                fee_for(1_000_000, &GasConfig::default()),
            )
            .await
            .unwrap();
        assert_eq!(manager.current_sequence("data-0").unwrap(), 0);

        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(3, 32),
        };
        transmitter
            .transmit(&job, &GasConfig::default(), &manager)
            .await
            .unwrap();
        assert_eq!(manager.current_sequence("data-0").unwrap(), 4);
    }

    #[tokio::test]
    async fn test_halted_shard_times_out() {
        let (network, manager) = testutil::connected(1).await;
        network.shard("data-0").unwrap().update_faults(|f| f.halted = true);
        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(2, 32),
        };

        let err = MultiBurst::new(polling(), Duration::from_millis(100))
            .transmit(&job, &GasConfig::default(), &manager)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("confirmation timeout"));
    }
}
