//! Upload transmission module
//!
//! Drives one job's fragments onto its shard and reports where each fragment
//! landed once it is durable. Two pacing policies are provided:
//! - `OneByOne`: blocking sign-broadcast-commit per fragment
//! - `MultiBurst`: offline-sign the whole batch on reserved consecutive
//!   sequences, fire-and-forget broadcast, then confirm together

mod gas;
mod multi_burst;
mod one_by_one;

pub use crate::chunk::FragmentPlacement;
pub use gas::{fee_for, resolve_gas_limit};
pub use multi_burst::MultiBurst;
pub use one_by_one::OneByOne;

use crate::allocate::Job;
use crate::chunk::Fragment;
use crate::config::GasConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::ledger::LedgerMsg;
use async_trait::async_trait;

/// What one successful job produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitReport {
    pub shard_name: String,
    /// One placement per fragment, in batch order
    pub placements: Vec<FragmentPlacement>,
    pub tx_count: usize,
    pub gas_used: u64,
}

/// Upload transmission strategy
#[async_trait]
pub trait Transmitter: Send + Sync {
    /// Strategy name for logs and reports
    fn name(&self) -> &'static str;

    /// Store every fragment of `job`; fails if any fragment is not durable
    async fn transmit(
        &self,
        job: &Job,
        gas: &GasConfig,
        connections: &ConnectionManager,
    ) -> Result<TransmitReport>;
}

/// Message storing one fragment
pub(crate) fn store_msg(creator: &str, fragment: &Fragment) -> LedgerMsg {
    LedgerMsg::StoreFragment {
        creator: creator.to_string(),
        index: fragment.index.clone(),
        data: fragment.data.to_vec(),
    }
}

pub(crate) fn placement(fragment: &Fragment, shard_name: &str) -> FragmentPlacement {
    FragmentPlacement {
        fragment_index: fragment.index.clone(),
        shard_name: shard_name.to_string(),
    }
}
