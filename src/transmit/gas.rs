//! Gas limit and fee resolution

use crate::config::{GasConfig, GasLimit};
use crate::ledger::{Fee, LedgerMsg, ShardClient, ShardSigner};
use tracing::{debug, warn};

/// Gas limit for a transaction carrying `msgs`
///
/// `Auto` simulates and scales by the adjustment factor. A failed
/// simulation never fails the upload: the configured fallback is used.
pub async fn resolve_gas_limit(
    client: &dyn ShardClient,
    signer: &ShardSigner,
    msgs: &[LedgerMsg],
    config: &GasConfig,
) -> u64 {
    match config.limit {
        GasLimit::Fixed(units) => units,
        GasLimit::Auto => match client.simulate_gas(signer, msgs).await {
            Ok(estimate) => {
                let limit = (estimate as f64 * config.adjustment).ceil() as u64;
                debug!(shard = client.shard_name(), estimate, limit, "Simulated gas");
                limit
            }
            Err(e) => {
                warn!(
                    shard = client.shard_name(),
                    fallback = config.fallback_limit,
                    "Gas simulation failed, using fallback: {}",
                    e
                );
                config.fallback_limit
            }
        },
    }
}

/// Fee for a gas limit at the configured price
pub fn fee_for(gas_limit: u64, config: &GasConfig) -> Fee {
    Fee {
        amount: (gas_limit as f64 * config.price).ceil() as u128,
        denom: config.denom.clone(),
        gas_limit,
    }
}
