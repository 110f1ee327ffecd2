//! Sequential blocking transmission

use super::{fee_for, placement, resolve_gas_limit, store_msg, TransmitReport, Transmitter};
use crate::allocate::Job;
use crate::config::GasConfig;
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tracing::{debug, error};

/// One fragment per transaction, each waited on until committed
///
/// The ledger's own commit wait orders the transactions, so no sequence
/// numbers are reserved. The first failure abandons the rest of the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneByOne;

#[async_trait]
impl Transmitter for OneByOne {
    fn name(&self) -> &'static str {
        "onebyone"
    }

    async fn transmit(
        &self,
        job: &Job,
        gas: &GasConfig,
        connections: &ConnectionManager,
    ) -> Result<TransmitReport> {
        let client = connections.client(&job.shard_name)?;
        let signer = connections.signer(&job.shard_name)?;

        let mut report = TransmitReport {
            shard_name: job.shard_name.clone(),
            ..Default::default()
        };

        for fragment in &job.batch {
            let msgs = vec![store_msg(signer.address(), fragment)];
            let gas_limit = resolve_gas_limit(client.as_ref(), &signer, &msgs, gas).await;

            let result = client
                .sign_and_broadcast(&signer, msgs, fee_for(gas_limit, gas))
                .await?;
            report.tx_count += 1;

            if !result.is_success() {
                error!(
                    shard = %job.shard_name,
                    fragment = %fragment.index,
                    code = result.code,
                    "Fragment transaction failed: {}",
                    result.log
                );
                return Err(Error::TxFailed {
                    hash: result.hash,
                    code: result.code,
                    log: result.log,
                });
            }

            debug!(
                shard = %job.shard_name,
                fragment = %fragment.index,
                height = result.height,
                gas_used = result.gas_used,
                "Fragment stored"
            );
            report.gas_used += result.gas_used;
            report.placements.push(placement(fragment, &job.shard_name));
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GasLimit;
    use crate::testutil;

    #[tokio::test]
    async fn test_stores_in_order() {
        let (network, manager) = testutil::connected(1).await;
        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(3, 64),
        };

        let report = OneByOne
            .transmit(&job, &GasConfig::default(), &manager)
            .await
            .unwrap();

        assert_eq!(report.tx_count, 3);
        assert!(report.gas_used > 0);
        let indices: Vec<&str> = report.placements.iter().map(|p| p.fragment_index.as_str()).collect();
        let expected: Vec<&str> = job.batch.iter().map(|f| f.index.as_str()).collect();
        assert_eq!(indices, expected);

        let shard = network.shard("data-0").unwrap();
        assert!(job.batch.iter().all(|f| shard.has_fragment(&f.index)));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining() {
        let (network, manager) = testutil::connected(1).await;
        let shard = network.shard("data-0").unwrap();
        shard.update_faults(|f| {
            f.reject_fragments.insert(1);
        });
        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(4, 64),
        };

        let err = OneByOne
            .transmit(&job, &GasConfig::default(), &manager)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TxFailed { .. }));
        assert!(shard.has_fragment(&job.batch[0].index));
        assert!(!shard.has_fragment(&job.batch[2].index));
        assert!(!shard.has_fragment(&job.batch[3].index));
    }

    #[tokio::test]
    async fn test_out_of_gas_fails() {
        let (_network, manager) = testutil::connected(1).await;
        let job = Job {
            shard_name: "data-0".into(),
            batch: testutil::fragments(1, 64),
        };
        let gas = GasConfig {
            limit: GasLimit::Fixed(1),
            ..Default::default()
        };

        assert!(OneByOne.transmit(&job, &gas, &manager).await.is_err());
    }
}
