//! Ledger transport module
//!
//! Defines the wire-level client the orchestration engine drives for each
//! shard:
//! - Account queries and sequence-aware signing
//! - Blocking and fire-and-forget broadcast
//! - Transaction queries and push subscriptions
//! - Mempool load queries and gas simulation
//! - Fragment and manifest reads
//!
//! `sim` provides an in-process implementation used by the CLI's simulated
//! runs and by the test suite.

pub mod signer;
pub mod sim;
mod subscription;
pub mod tx;

pub use signer::ShardSigner;
pub use subscription::TxSubscription;
pub use tx::{AccountState, AuthInfo, Fee, LedgerMsg, SignedTx, TxBody, TxResult};

use crate::directory::ShardInfo;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Client for one shard
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Shard (chain) name this client talks to
    fn shard_name(&self) -> &str;

    /// On-chain account state
    async fn account(&self, address: &str) -> Result<AccountState>;

    /// Sign with the current on-chain sequence, broadcast, and wait until committed
    async fn sign_and_broadcast(
        &self,
        signer: &ShardSigner,
        msgs: Vec<LedgerMsg>,
        fee: Fee,
    ) -> Result<TxResult>;

    /// Submit pre-signed bytes without waiting for finality; returns the tx id
    async fn broadcast_async(&self, tx_bytes: Vec<u8>) -> Result<String>;

    /// Look up a committed transaction; None while still pending or unknown
    async fn query_tx(&self, hash: &str) -> Result<Option<TxResult>>;

    /// Whether this transport can hold a persistent event stream
    fn supports_streaming(&self) -> bool;

    /// Subscribe to committed-transaction events
    async fn subscribe_tx_events(&self) -> Result<TxSubscription>;

    /// Bytes currently waiting in the mempool
    async fn mempool_bytes(&self) -> Result<u64>;

    /// Estimated gas units for the given messages
    async fn simulate_gas(&self, signer: &ShardSigner, msgs: &[LedgerMsg]) -> Result<u64>;

    /// Read a stored fragment
    async fn fetch_fragment(&self, index: &str) -> Result<Option<Bytes>>;

    /// Read a stored manifest
    async fn fetch_manifest(&self, path: &str) -> Result<Option<String>>;

    /// Close the client
    async fn close(&self) -> Result<()>;
}

/// Opens shard clients over a shared transport
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    /// Connect to one shard
    async fn connect(&self, shard: &ShardInfo, rpc: &str, api: &str)
        -> Result<Arc<dyn ShardClient>>;

    /// Tear down the shared transport
    async fn shutdown(&self) -> Result<()>;
}
