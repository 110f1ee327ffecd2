//! Shard connection manager
//!
//! Owns one client, signing identity and local sequence counter per shard.
//! The counter is the single source of truth for the next unused sequence
//! number on a shard and is only advanced through
//! [`ConnectionManager::reserve_sequence`], under that shard's lock.

use crate::config::ConnectionConfig;
use crate::directory::{ShardDirectory, ShardInfo, ShardRole};
use crate::error::{Error, Result};
use crate::ledger::{LedgerConnector, ShardClient, ShardSigner};
use crate::retry::{retry_fixed, retry_with_backoff, ExponentialBackoff};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of one shard's account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAccount {
    pub shard_name: String,
    pub address: String,
    pub account_number: u64,
    pub sequence: u64,
}

struct ShardHandle {
    info: ShardInfo,
    client: Arc<dyn ShardClient>,
    signer: Arc<ShardSigner>,
    account_number: u64,
    sequence: Mutex<u64>,
}

/// Connections and sequence state for every shard in a run
pub struct ConnectionManager {
    connector: Arc<dyn LedgerConnector>,
    config: ConnectionConfig,
    shards: DashMap<String, Arc<ShardHandle>>,
    disconnected: AtomicBool,
}

impl ConnectionManager {
    /// Create a manager; no connections are opened until [`init`](Self::init)
    pub fn new(connector: Arc<dyn LedgerConnector>, config: ConnectionConfig) -> Self {
        ConnectionManager {
            connector,
            config,
            shards: DashMap::new(),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Connect to every shard in the directory
    ///
    /// Shards are registered as soon as they are up, so a failure part way
    /// through still leaves the already-open clients for
    /// [`disconnect_all`](Self::disconnect_all) to close.
    pub async fn init(&self, directory: &dyn ShardDirectory) -> Result<()> {
        if !self.shards.is_empty() {
            return Err(Error::Internal("connections already initialized".to_string()));
        }

        let shards = directory.list_shards().await?;
        if shards.is_empty() {
            return Err(Error::Directory("directory lists no shards".to_string()));
        }

        for info in shards {
            let handle = self.connect_shard(directory, info).await?;
            self.shards.insert(handle.info.name.clone(), Arc::new(handle));
        }

        info!("Connected to {} shards", self.shards.len());
        Ok(())
    }

    async fn connect_shard(&self, directory: &dyn ShardDirectory, info: ShardInfo) -> Result<ShardHandle> {
        let rpc = directory.rpc_endpoint(&info.name).await?;
        let api = directory.api_endpoint(&info.name).await?;
        let credential = directory.credential(&info.name).await?;
        let signer = ShardSigner::from_credential(&info.name, &self.config.address_prefix, &credential)?;

        let backoff = ExponentialBackoff::new(self.config.connect_base_delay_ms, self.config.connect_attempts)
            .with_max_delay(Duration::from_millis(self.config.connect_max_delay_ms))
            .with_jitter(self.config.connect_jitter);
        let client = retry_with_backoff(&format!("connect {}", info.name), backoff, || {
            self.connector.connect(&info, &rpc, &api)
        })
        .await?;

        let attempts = self.config.account_query_attempts;
        let account = retry_fixed(
            &format!("account query on {}", info.name),
            attempts,
            Duration::from_millis(self.config.account_query_delay_ms),
            || client.account(signer.address()),
        )
        .await;

        let account = match account {
            Ok(account) => account,
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!(shard = %info.name, "Failed to close client: {}", close_err);
                }
                return Err(Error::AccountQuery {
                    shard: info.name.clone(),
                    attempts,
                    reason: e.to_string(),
                });
            }
        };

        info!(
            shard = %info.name,
            role = %info.role,
            address = signer.address(),
            account_number = account.account_number,
            sequence = account.sequence,
            "Shard connected"
        );

        Ok(ShardHandle {
            info,
            client,
            signer: Arc::new(signer),
            account_number: account.account_number,
            sequence: Mutex::new(account.sequence),
        })
    }

    fn handle(&self, name: &str) -> Result<Arc<ShardHandle>> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::Disconnected(name.to_string()));
        }
        self.shards
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::UnknownShard(name.to_string()))
    }

    /// Reserve `count` consecutive sequence numbers; returns the first
    pub fn reserve_sequence(&self, name: &str, count: u64) -> Result<u64> {
        let handle = self.handle(name)?;
        let mut sequence = handle.sequence.lock();
        let first = *sequence;
        *sequence += count;
        debug!(shard = name, first, count, "Reserved sequence numbers");
        Ok(first)
    }

    /// Hand back the tail `from..to` of a reservation that was never broadcast
    ///
    /// Only succeeds when nothing was reserved after it. Otherwise the numbers
    /// stay burned: `resync` keeps the larger local value, so the gap stays
    /// until the counter is reset by hand.
    pub fn release_unused(&self, name: &str, from: u64, to: u64) -> Result<bool> {
        let handle = self.handle(name)?;
        let mut sequence = handle.sequence.lock();
        if *sequence == to && from <= to {
            *sequence = from;
            debug!(shard = name, from, to, "Released unused sequence numbers");
            return Ok(true);
        }
        Ok(false)
    }

    /// Re-query the on-chain sequence and adopt the larger of chain and local
    ///
    /// A local counter that is ahead (transactions signed and in flight) is
    /// never rolled back. Returns the adopted value.
    pub async fn resync(&self, name: &str) -> Result<u64> {
        let handle = self.handle(name)?;
        let chain = handle.client.account(handle.signer.address()).await?.sequence;

        let mut sequence = handle.sequence.lock();
        let local = *sequence;
        let adopted = chain.max(local);
        if chain > local {
            warn!(shard = name, local, chain, "Local sequence was stale, adopting on-chain value");
        } else if chain < local {
            warn!(shard = name, local, chain, "Local sequence ahead of chain, keeping local value");
        }
        *sequence = adopted;
        Ok(adopted)
    }

    /// Next unreserved sequence number
    pub fn current_sequence(&self, name: &str) -> Result<u64> {
        Ok(*self.handle(name)?.sequence.lock())
    }

    /// Client for a shard
    pub fn client(&self, name: &str) -> Result<Arc<dyn ShardClient>> {
        Ok(Arc::clone(&self.handle(name)?.client))
    }

    /// Signing identity for a shard
    pub fn signer(&self, name: &str) -> Result<Arc<ShardSigner>> {
        Ok(Arc::clone(&self.handle(name)?.signer))
    }

    /// Account snapshot for a shard
    pub fn account(&self, name: &str) -> Result<ShardAccount> {
        let handle = self.handle(name)?;
        let sequence = *handle.sequence.lock();
        Ok(ShardAccount {
            shard_name: handle.info.name.clone(),
            address: handle.signer.address().to_string(),
            account_number: handle.account_number,
            sequence,
        })
    }

    /// Role of a shard
    pub fn role(&self, name: &str) -> Result<ShardRole> {
        Ok(self.handle(name)?.info.role)
    }

    /// Connected data shards, sorted by name
    pub fn data_shards(&self) -> Vec<String> {
        self.shards_with_role(ShardRole::Data)
    }

    /// The index shard
    pub fn index_shard(&self) -> Result<String> {
        self.shards_with_role(ShardRole::Index)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoShards("no index shard connected".to_string()))
    }

    fn shards_with_role(&self, role: ShardRole) -> Vec<String> {
        let mut names: Vec<String> = self
            .shards
            .iter()
            .filter(|entry| entry.value().info.role == role)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Whether a shard is connected
    pub fn is_connected(&self, name: &str) -> bool {
        self.handle(name).is_ok()
    }

    /// Close every client and the transport, exactly once
    ///
    /// Individual close failures are logged and do not stop the others.
    pub async fn disconnect_all(&self) -> Result<()> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handles: Vec<Arc<ShardHandle>> = self
            .shards
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.shards.clear();

        for handle in &handles {
            match handle.client.close().await {
                Ok(()) => debug!(shard = %handle.info.name, "Closed shard client"),
                Err(e) => warn!(shard = %handle.info.name, "Failed to close shard client: {}", e),
            }
        }

        if let Err(e) = self.connector.shutdown().await {
            warn!("Failed to shut down ledger transport: {}", e);
        }

        info!("Disconnected {} shards", handles.len());
        Ok(())
    }
}
