//! Transaction types and wire encoding
//!
//! Transactions are bincode-encoded. The transaction id is the upper-case hex
//! BLAKE3 digest of the encoded bytes, so it is known before broadcast.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Result code for a successful transaction
pub const CODE_OK: u32 = 0;

/// Result code for a failed message execution
pub const CODE_EXECUTION_FAILED: u32 = 5;

/// Result code for out-of-gas
pub const CODE_OUT_OF_GAS: u32 = 11;

/// Result code for a duplicate transaction
pub const CODE_DUPLICATE_TX: u32 = 19;

/// Result code for an account sequence mismatch
pub const CODE_SEQUENCE_MISMATCH: u32 = 32;

/// Result code for an unauthorized (bad signature / wrong chain) transaction
pub const CODE_UNAUTHORIZED: u32 = 4;

/// Messages understood by the shards
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum LedgerMsg {
    /// Store one content fragment on a data shard
    StoreFragment {
        creator: String,
        index: String,
        data: Vec<u8>,
    },
    /// Store a manifest on the index shard
    PublishManifest {
        creator: String,
        path: String,
        manifest: String,
    },
}

impl LedgerMsg {
    /// Payload size counted for gas metering
    pub fn payload_len(&self) -> usize {
        match self {
            LedgerMsg::StoreFragment { index, data, .. } => index.len() + data.len(),
            LedgerMsg::PublishManifest { path, manifest, .. } => path.len() + manifest.len(),
        }
    }
}

/// Fee attached to a transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fee {
    pub amount: u128,
    pub denom: String,
    pub gas_limit: u64,
}

/// Transaction body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxBody {
    pub msgs: Vec<LedgerMsg>,
    pub memo: String,
}

impl TxBody {
    /// Body with the given messages and no memo
    pub fn new(msgs: Vec<LedgerMsg>) -> Self {
        TxBody {
            msgs,
            memo: String::new(),
        }
    }
}

/// Signer information covered by the signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthInfo {
    pub chain_id: String,
    pub signer: String,
    pub account_number: u64,
    pub sequence: u64,
    pub fee: Fee,
}

/// A signed transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedTx {
    pub body: TxBody,
    pub auth: AuthInfo,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedTx {
    /// Canonical bytes covered by the signature
    pub fn sign_bytes(body: &TxBody, auth: &AuthInfo) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(body, auth))?)
    }

    /// Encode for broadcast
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode broadcast bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Transaction id for encoded transaction bytes
pub fn tx_hash(tx_bytes: &[u8]) -> String {
    blake3::hash(tx_bytes).to_hex().to_uppercase()
}

/// Committed transaction as reported by a shard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxResult {
    pub hash: String,
    pub height: u64,
    pub code: u32,
    pub gas_used: u64,
    pub log: String,
}

impl TxResult {
    /// Whether the transaction executed successfully
    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }
}

/// On-chain account state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    pub account_number: u64,
    pub sequence: u64,
}
