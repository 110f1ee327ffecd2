//! In-process simulated ledger
//!
//! Each [`SimShard`] is a tiny single-validator chain: broadcasts pass a
//! CheckTx-style admission (signature, chain id, account sequence) into a
//! mempool, and a timer task cuts blocks from the mempool, executes the
//! messages, meters gas and publishes the results as events. Faults can be
//! injected at runtime to exercise failure paths.

use crate::chunk::fragment_ordinal;
use crate::directory::{ShardEntry, ShardInfo, ShardRole, StaticDirectory};
use crate::error::{Error, Result};
use crate::ledger::signer::{self, ShardSigner};
use crate::ledger::tx::{
    self, AccountState, AuthInfo, Fee, LedgerMsg, SignedTx, TxBody, TxResult,
};
use crate::ledger::{LedgerConnector, ShardClient, TxSubscription};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

/// Capacity of each shard's event channel
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Behaviour of one simulated shard
#[derive(Debug, Clone)]
pub struct SimShardConfig {
    /// Time between blocks
    pub block_interval: Duration,
    /// Maximum transactions included per block
    pub max_txs_per_block: usize,
    /// Whether clients can subscribe to tx events
    pub streaming: bool,
    /// Fixed gas charged per transaction
    pub base_gas: u64,
    /// Gas charged per payload byte
    pub gas_per_byte: u64,
    /// How long a blocking broadcast waits for inclusion
    pub commit_timeout: Duration,
}

impl Default for SimShardConfig {
    fn default() -> Self {
        SimShardConfig {
            block_interval: Duration::from_millis(200),
            max_txs_per_block: 1000,
            streaming: true,
            base_gas: 60_000,
            gas_per_byte: 2,
            commit_timeout: Duration::from_secs(30),
        }
    }
}

impl SimShardConfig {
    /// Short blocks for tests
    pub fn fast() -> Self {
        SimShardConfig {
            block_interval: Duration::from_millis(10),
            commit_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }
}

/// Injectable faults
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Stop producing blocks
    pub halted: bool,
    /// Phantom bytes added to the reported mempool size
    pub backlog_bytes: u64,
    /// Fragment ordinals whose store transaction fails on execution
    pub reject_fragments: HashSet<usize>,
    /// Fragment ordinals whose reads fail
    pub unreadable_fragments: HashSet<usize>,
    /// Number of upcoming account queries that fail
    pub account_query_failures: u32,
    /// Refuse new connections
    pub refuse_connect: bool,
    /// Report an error when a client closes
    pub fail_close: bool,
    /// Fail gas simulation
    pub fail_simulation: bool,
    /// Mempool size queries never answer
    pub stall_mempool: bool,
}

struct SimAccount {
    number: u64,
    /// Committed sequence
    sequence: u64,
    /// Sequence expected by the next admitted transaction
    pending_sequence: u64,
}

struct PendingTx {
    hash: String,
    size: usize,
    tx: SignedTx,
}

#[derive(Default)]
struct ChainState {
    height: u64,
    accounts: HashMap<String, SimAccount>,
    mempool: VecDeque<PendingTx>,
    committed: HashMap<String, TxResult>,
    fragments: HashMap<String, Bytes>,
    manifests: HashMap<String, String>,
}

impl ChainState {
    fn account_mut(&mut self, address: &str) -> &mut SimAccount {
        let number = self.accounts.len() as u64 + 1;
        self.accounts
            .entry(address.to_string())
            .or_insert(SimAccount {
                number,
                sequence: 0,
                pending_sequence: 0,
            })
    }
}

/// One simulated shard
pub struct SimShard {
    info: ShardInfo,
    config: SimShardConfig,
    state: Mutex<ChainState>,
    faults: Mutex<SimFaults>,
    events: broadcast::Sender<TxResult>,
    heights: watch::Sender<u64>,
    active_subscriptions: Arc<AtomicUsize>,
    unsubscribes: Arc<AtomicUsize>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl SimShard {
    /// Create a shard
    pub fn new(name: &str, role: ShardRole, config: SimShardConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (heights, _) = watch::channel(0);

        SimShard {
            info: ShardInfo {
                name: name.to_string(),
                role,
            },
            config,
            state: Mutex::new(ChainState::default()),
            faults: Mutex::new(SimFaults::default()),
            events,
            heights,
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Shard identity
    pub fn info(&self) -> &ShardInfo {
        &self.info
    }

    /// Mutate the injected faults
    pub fn update_faults<F: FnOnce(&mut SimFaults)>(&self, f: F) {
        f(&mut self.faults.lock());
    }

    /// Latest block height
    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Transactions waiting in the mempool
    pub fn mempool_len(&self) -> usize {
        self.state.lock().mempool.len()
    }

    /// Transactions committed so far
    pub fn committed_count(&self) -> usize {
        self.state.lock().committed.len()
    }

    /// Number of stored fragments
    pub fn fragment_count(&self) -> usize {
        self.state.lock().fragments.len()
    }

    /// Whether a fragment is stored
    pub fn has_fragment(&self, index: &str) -> bool {
        self.state.lock().fragments.contains_key(index)
    }

    /// Number of stored manifests
    pub fn manifest_count(&self) -> usize {
        self.state.lock().manifests.len()
    }

    /// Committed sequence of an account, if it exists
    pub fn account_sequence(&self, address: &str) -> Option<u64> {
        self.state.lock().accounts.get(address).map(|a| a.sequence)
    }

    /// Subscriptions currently open
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Total unsubscribe calls observed
    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    /// Total client connections opened
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Total client closes observed
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Gas charged for a set of messages
    pub fn gas_for(&self, msgs: &[LedgerMsg]) -> u64 {
        let payload: usize = msgs.iter().map(LedgerMsg::payload_len).sum();
        self.config.base_gas + self.config.gas_per_byte * payload as u64
    }

    /// Admit encoded transaction bytes into the mempool
    fn check_tx(&self, tx_bytes: Vec<u8>) -> Result<String> {
        let reject = |code: u32, log: String| Error::BroadcastRejected {
            shard: self.info.name.clone(),
            code,
            log,
        };

        let tx = SignedTx::decode(&tx_bytes)
            .map_err(|e| reject(tx::CODE_UNAUTHORIZED, format!("tx parse error: {}", e)))?;
        signer::verify(&tx).map_err(|e| reject(tx::CODE_UNAUTHORIZED, e.to_string()))?;
        if tx.auth.chain_id != self.info.name {
            return Err(reject(
                tx::CODE_UNAUTHORIZED,
                format!(
                    "chain id mismatch: expected {}, got {}",
                    self.info.name, tx.auth.chain_id
                ),
            ));
        }

        let hash = tx::tx_hash(&tx_bytes);
        let mut state = self.state.lock();

        if state.committed.contains_key(&hash) || state.mempool.iter().any(|p| p.hash == hash) {
            return Err(reject(tx::CODE_DUPLICATE_TX, "tx already exists in cache".to_string()));
        }

        let account = state.account_mut(&tx.auth.signer);
        if tx.auth.sequence != account.pending_sequence {
            return Err(reject(
                tx::CODE_SEQUENCE_MISMATCH,
                format!(
                    "account sequence mismatch, expected {}, got {}",
                    account.pending_sequence, tx.auth.sequence
                ),
            ));
        }
        account.pending_sequence += 1;

        state.mempool.push_back(PendingTx {
            hash: hash.clone(),
            size: tx_bytes.len(),
            tx,
        });

        Ok(hash)
    }

    /// Cut one block from the mempool; returns the number of included txs
    pub fn produce_block(&self) -> usize {
        let faults = self.faults.lock().clone();
        if faults.halted {
            return 0;
        }

        let (height, results) = {
            let mut state = self.state.lock();
            state.height += 1;
            let height = state.height;

            let count = state.mempool.len().min(self.config.max_txs_per_block);
            let included: Vec<PendingTx> = state.mempool.drain(..count).collect();

            let mut results = Vec::with_capacity(included.len());
            for pending in included {
                let result = self.deliver(&mut state, pending, height, &faults);
                state.committed.insert(result.hash.clone(), result.clone());
                results.push(result);
            }
            (height, results)
        };

        let included = results.len();
        for result in results {
            // No subscribers is fine
            let _ = self.events.send(result);
        }
        self.heights.send_replace(height);

        if included > 0 {
            debug!(shard = %self.info.name, height, included, "Produced block");
        }
        included
    }

    fn deliver(
        &self,
        state: &mut ChainState,
        pending: PendingTx,
        height: u64,
        faults: &SimFaults,
    ) -> TxResult {
        let PendingTx { hash, tx, .. } = pending;
        let gas_needed = self.gas_for(&tx.body.msgs);
        let gas_limit = tx.auth.fee.gas_limit;

        state.account_mut(&tx.auth.signer).sequence += 1;

        let failed = |code: u32, gas_used: u64, log: String| TxResult {
            hash: hash.clone(),
            height,
            code,
            gas_used,
            log,
        };

        if gas_needed > gas_limit {
            return failed(
                tx::CODE_OUT_OF_GAS,
                gas_limit,
                format!("out of gas: limit {}, needed {}", gas_limit, gas_needed),
            );
        }

        for msg in &tx.body.msgs {
            if let LedgerMsg::StoreFragment { index, .. } = msg {
                let rejected = fragment_ordinal(index)
                    .map(|ordinal| faults.reject_fragments.contains(&ordinal))
                    .unwrap_or(false);
                if rejected {
                    return failed(
                        tx::CODE_EXECUTION_FAILED,
                        gas_needed,
                        format!("fragment {} rejected", index),
                    );
                }
            }
        }

        for msg in tx.body.msgs {
            match msg {
                LedgerMsg::StoreFragment { index, data, .. } => {
                    state.fragments.insert(index, Bytes::from(data));
                }
                LedgerMsg::PublishManifest { path, manifest, .. } => {
                    state.manifests.insert(path, manifest);
                }
            }
        }

        TxResult {
            hash,
            height,
            code: tx::CODE_OK,
            gas_used: gas_needed,
            log: String::new(),
        }
    }
}

fn spawn_producer(shard: Arc<SimShard>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = shard.config.block_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            shard.produce_block();
        }
    })
}

/// Client handle for one simulated shard
pub struct SimClient {
    shard: Arc<SimShard>,
    producer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SimClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Disconnected(self.shard.info.name.clone()));
        }
        Ok(())
    }

    async fn wait_for_commit(&self, hash: &str) -> Result<TxResult> {
        let mut heights = self.shard.heights.subscribe();
        let started = Instant::now();
        let deadline = started + self.shard.config.commit_timeout;

        loop {
            let committed = self.shard.state.lock().committed.get(hash).cloned();
            if let Some(result) = committed {
                return Ok(result);
            }
            match tokio::time::timeout_at(deadline, heights.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(Error::Disconnected(self.shard.info.name.clone())),
                Err(_) => {
                    return Err(Error::Timeout {
                        what: format!("commit of {} on {}", hash, self.shard.info.name),
                        elapsed: started.elapsed(),
                    })
                }
            }
        }
    }
}

impl Drop for SimClient {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.lock().take() {
            producer.abort();
        }
    }
}

#[async_trait]
impl ShardClient for SimClient {
    fn shard_name(&self) -> &str {
        &self.shard.info.name
    }

    async fn account(&self, address: &str) -> Result<AccountState> {
        self.ensure_open()?;
        {
            let mut faults = self.shard.faults.lock();
            if faults.account_query_failures > 0 {
                faults.account_query_failures -= 1;
                return Err(Error::Connection {
                    shard: self.shard.info.name.clone(),
                    reason: "account query failed".to_string(),
                });
            }
        }

        let mut state = self.shard.state.lock();
        let account = state.account_mut(address);
        Ok(AccountState {
            account_number: account.number,
            sequence: account.sequence,
        })
    }

    async fn sign_and_broadcast(
        &self,
        signer: &ShardSigner,
        msgs: Vec<LedgerMsg>,
        fee: Fee,
    ) -> Result<TxResult> {
        let account = self.account(signer.address()).await?;
        let auth = AuthInfo {
            chain_id: self.shard.info.name.clone(),
            signer: signer.address().to_string(),
            account_number: account.account_number,
            sequence: account.sequence,
            fee,
        };
        let tx_bytes = signer.sign_tx(TxBody::new(msgs), auth)?.encode()?;
        let hash = self.broadcast_async(tx_bytes).await?;
        self.wait_for_commit(&hash).await
    }

    async fn broadcast_async(&self, tx_bytes: Vec<u8>) -> Result<String> {
        self.ensure_open()?;
        self.shard.check_tx(tx_bytes)
    }

    async fn query_tx(&self, hash: &str) -> Result<Option<TxResult>> {
        self.ensure_open()?;
        Ok(self.shard.state.lock().committed.get(hash).cloned())
    }

    fn supports_streaming(&self) -> bool {
        self.shard.config.streaming
    }

    async fn subscribe_tx_events(&self) -> Result<TxSubscription> {
        self.ensure_open()?;
        if !self.shard.config.streaming {
            return Err(Error::Unsupported(format!(
                "transport for shard {} has no event stream",
                self.shard.info.name
            )));
        }

        let receiver = self.shard.events.subscribe();
        self.shard.active_subscriptions.fetch_add(1, Ordering::SeqCst);

        let active = Arc::clone(&self.shard.active_subscriptions);
        let unsubscribes = Arc::clone(&self.shard.unsubscribes);
        let events = BroadcastStream::new(receiver)
            .filter_map(|item| futures::future::ready(item.ok()))
            .boxed();

        Ok(TxSubscription::new(events, move || {
            active.fetch_sub(1, Ordering::SeqCst);
            unsubscribes.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn mempool_bytes(&self) -> Result<u64> {
        self.ensure_open()?;
        let (backlog, stalled) = {
            let faults = self.shard.faults.lock();
            (faults.backlog_bytes, faults.stall_mempool)
        };
        if stalled {
            futures::future::pending::<()>().await;
        }
        let pending: u64 = self
            .shard
            .state
            .lock()
            .mempool
            .iter()
            .map(|p| p.size as u64)
            .sum();
        Ok(pending + backlog)
    }

    async fn simulate_gas(&self, _signer: &ShardSigner, msgs: &[LedgerMsg]) -> Result<u64> {
        self.ensure_open()?;
        if self.shard.faults.lock().fail_simulation {
            return Err(Error::Internal("gas simulation unavailable".to_string()));
        }
        Ok(self.shard.gas_for(msgs))
    }

    async fn fetch_fragment(&self, index: &str) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        let unreadable = fragment_ordinal(index)
            .map(|ordinal| self.shard.faults.lock().unreadable_fragments.contains(&ordinal))
            .unwrap_or(false);
        if unreadable {
            return Err(Error::Connection {
                shard: self.shard.info.name.clone(),
                reason: format!("read of fragment {} failed", index),
            });
        }
        Ok(self.shard.state.lock().fragments.get(index).cloned())
    }

    async fn fetch_manifest(&self, path: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.shard.state.lock().manifests.get(path).cloned())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(producer) = self.producer.lock().take() {
            producer.abort();
        }
        self.shard.closes.fetch_add(1, Ordering::SeqCst);

        if self.shard.faults.lock().fail_close {
            return Err(Error::Connection {
                shard: self.shard.info.name.clone(),
                reason: "close failed".to_string(),
            });
        }
        Ok(())
    }
}

/// A set of simulated shards sharing one in-process "transport"
#[derive(Default)]
pub struct SimNetwork {
    shards: BTreeMap<String, Arc<SimShard>>,
    shutdowns: AtomicUsize,
}

impl SimNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// `data_shards` data shards named `data-N` plus one `index` shard
    pub fn uniform(data_shards: usize, config: SimShardConfig) -> Self {
        let mut network = SimNetwork::new();
        for i in 0..data_shards {
            network = network.with_shard(&format!("data-{}", i), ShardRole::Data, config.clone());
        }
        network.with_shard("index", ShardRole::Index, config)
    }

    /// Add a shard
    pub fn with_shard(mut self, name: &str, role: ShardRole, config: SimShardConfig) -> Self {
        self.shards
            .insert(name.to_string(), Arc::new(SimShard::new(name, role, config)));
        self
    }

    /// Look up a shard
    pub fn shard(&self, name: &str) -> Option<Arc<SimShard>> {
        self.shards.get(name).cloned()
    }

    /// All shards, ordered by name
    pub fn shards(&self) -> impl Iterator<Item = &Arc<SimShard>> {
        self.shards.values()
    }

    /// Directory entries describing this network
    pub fn entries(&self) -> Vec<ShardEntry> {
        self.shards
            .values()
            .map(|shard| ShardEntry {
                name: shard.info.name.clone(),
                role: shard.info.role,
                rpc: format!("sim://{}/rpc", shard.info.name),
                api: format!("sim://{}/api", shard.info.name),
                credential: Some(format!("sim-credential-{}", shard.info.name)),
            })
            .collect()
    }

    /// Directory matching this network
    pub fn directory(&self) -> Result<StaticDirectory> {
        StaticDirectory::from_entries(&self.entries())
    }

    /// Times the shared transport was shut down
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerConnector for SimNetwork {
    async fn connect(
        &self,
        shard: &ShardInfo,
        rpc: &str,
        _api: &str,
    ) -> Result<Arc<dyn ShardClient>> {
        let sim = self
            .shard(&shard.name)
            .ok_or_else(|| Error::UnknownShard(shard.name.clone()))?;

        if sim.faults.lock().refuse_connect {
            return Err(Error::Connection {
                shard: shard.name.clone(),
                reason: format!("{} refused connection", rpc),
            });
        }

        sim.connects.fetch_add(1, Ordering::SeqCst);
        let producer = spawn_producer(Arc::clone(&sim));
        debug!(shard = %shard.name, rpc, "Connected simulated shard");

        Ok(Arc::new(SimClient {
            shard: sim,
            producer: Mutex::new(Some(producer)),
            closed: AtomicBool::new(false),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        info!("Simulated transport shut down");
        Ok(())
    }
}
