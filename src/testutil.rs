//! Shared fixtures for unit tests

use crate::chunk::{create_fragments, Fragment};
use crate::config::ConnectionConfig;
use crate::connection::ConnectionManager;
use crate::ledger::sim::{SimNetwork, SimShardConfig};
use crate::ledger::{AuthInfo, Fee, LedgerMsg, TxBody};
use bytes::Bytes;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;

pub fn fast_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        account_query_attempts: 2,
        account_query_delay_ms: 1,
        connect_attempts: 1,
        connect_base_delay_ms: 1,
        connect_max_delay_ms: 1,
        connect_jitter: false,
        ..Default::default()
    }
}

/// Connect a manager to every shard of `network`
pub async fn connected_with(
    network: SimNetwork,
) -> (Arc<SimNetwork>, Arc<ConnectionManager>) {
    let network = Arc::new(network);
    let manager = Arc::new(ConnectionManager::new(network.clone(), fast_connection_config()));
    manager.init(&network.directory().unwrap()).await.unwrap();
    (network, manager)
}

pub async fn connected(data_shards: usize) -> (Arc<SimNetwork>, Arc<ConnectionManager>) {
    connected_with(SimNetwork::uniform(data_shards, SimShardConfig::fast())).await
}

pub fn random_bytes(len: usize, seed: u64) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rngs::StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    Bytes::from(data)
}

pub fn fragments(count: usize, size: usize) -> Vec<Fragment> {
    create_fragments(&random_bytes(count * size, count as u64), size).unwrap()
}

/// Sign and broadcast `count` store transactions through the manager's sequence counter
pub async fn broadcast_stores(
    manager: &ConnectionManager,
    shard: &str,
    count: u64,
    gas_limit: u64,
) -> Vec<String> {
    let client = manager.client(shard).unwrap();
    let signer = manager.signer(shard).unwrap();
    let account = manager.account(shard).unwrap();
    let first = manager.reserve_sequence(shard, count).unwrap();

    let mut ids = Vec::new();
    for i in 0..count {
        let auth = AuthInfo {
            chain_id: shard.to_string(),
            signer: signer.address().to_string(),
            account_number: account.account_number,
            sequence: first + i,
            fee: Fee {
                amount: 0,
                denom: "stake".into(),
                gas_limit,
            },
        };
        let msg = LedgerMsg::StoreFragment {
            creator: signer.address().to_string(),
            index: format!("ab-{}", first + i),
            data: vec![0; 16],
        };
        let bytes = signer.sign_tx(TxBody::new(vec![msg]), auth).unwrap().encode().unwrap();
        ids.push(client.broadcast_async(bytes).await.unwrap());
    }
    ids
}
