//! Per-shard signing identity
//!
//! The credential handed out by the directory is stretched into an Ed25519
//! seed with BLAKE3 key derivation. The account address is derived from the
//! public key, so the same credential always yields the same address.

use crate::error::{Error, Result};
use crate::ledger::tx::{AuthInfo, SignedTx, TxBody};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use std::fmt;
use zeroize::Zeroizing;

/// Context string for seed derivation
const SEED_CONTEXT: &str = "shardload 2024 ed25519 signing seed v1";

/// Number of public-key hash bytes in an address
const ADDRESS_HASH_LEN: usize = 20;

/// Signing identity for one shard account
pub struct ShardSigner {
    key_pair: Ed25519KeyPair,
    address: String,
}

impl ShardSigner {
    /// Derive a signer from a credential
    pub fn from_credential(shard: &str, prefix: &str, credential: &str) -> Result<Self> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(Error::Credential {
                shard: shard.to_string(),
                reason: "credential is empty".to_string(),
            });
        }

        let seed = Zeroizing::new(blake3::derive_key(SEED_CONTEXT, credential.as_bytes()));
        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed[..]).map_err(|e| {
            Error::Credential {
                shard: shard.to_string(),
                reason: format!("key derivation rejected: {}", e),
            }
        })?;
        let address = address_for(prefix, key_pair.public_key().as_ref());

        Ok(ShardSigner { key_pair, address })
    }

    /// Account address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw Ed25519 public key
    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    /// Sign a transaction offline
    pub fn sign_tx(&self, body: TxBody, auth: AuthInfo) -> Result<SignedTx> {
        let message = SignedTx::sign_bytes(&body, &auth)?;
        let signature = self.key_pair.sign(&message);

        Ok(SignedTx {
            body,
            auth,
            public_key: self.public_key().to_vec(),
            signature: signature.as_ref().to_vec(),
        })
    }
}

impl fmt::Debug for ShardSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Address for a public key
pub fn address_for(prefix: &str, public_key: &[u8]) -> String {
    let digest = blake3::hash(public_key);
    format!("{}1{}", prefix, hex::encode(&digest.as_bytes()[..ADDRESS_HASH_LEN]))
}

/// Verify a transaction's signature and that its signer address matches the key
pub fn verify(tx: &SignedTx) -> Result<()> {
    let expected_suffix = hex::encode(&blake3::hash(&tx.public_key).as_bytes()[..ADDRESS_HASH_LEN]);
    if !tx.auth.signer.ends_with(&expected_suffix) {
        return Err(Error::Signature(format!(
            "signer {} does not match public key",
            tx.auth.signer
        )));
    }

    let message = SignedTx::sign_bytes(&tx.body, &tx.auth)?;
    UnparsedPublicKey::new(&ED25519, &tx.public_key)
        .verify(&message, &tx.signature)
        .map_err(|_| Error::Signature("signature verification failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tx::{Fee, LedgerMsg};

    fn auth(signer: &ShardSigner, sequence: u64) -> AuthInfo {
        AuthInfo {
            chain_id: "data-0".into(),
            signer: signer.address().to_string(),
            account_number: 1,
            sequence,
            fee: Fee {
                amount: 0,
                denom: "stake".into(),
                gas_limit: 200_000,
            },
        }
    }

    #[test]
    fn test_signer_is_deterministic() {
        let a = ShardSigner::from_credential("data-0", "shard", "correct horse").unwrap();
        let b = ShardSigner::from_credential("data-0", "shard", "correct horse").unwrap();
        let c = ShardSigner::from_credential("data-0", "shard", "battery staple").unwrap();

        assert_eq!(a.address(), b.address());
        assert_ne!(a.address(), c.address());
        assert!(a.address().starts_with("shard1"));
    }

    #[test]
    fn test_empty_credential_rejected() {
        let err = ShardSigner::from_credential("data-0", "shard", "   ").unwrap_err();
        assert!(matches!(err, Error::Credential { .. }));
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = ShardSigner::from_credential("data-0", "shard", "secret").unwrap();
        let body = TxBody::new(vec![LedgerMsg::StoreFragment {
            creator: signer.address().to_string(),
            index: "ff-0".into(),
            data: b"payload".to_vec(),
        }]);

        let tx = signer.sign_tx(body, auth(&signer, 0)).unwrap();
        assert!(verify(&tx).is_ok());

        let mut tampered = tx.clone();
        tampered.auth.sequence = 9;
        assert!(verify(&tampered).is_err());
    }

    #[test]
    fn test_verify_rejects_foreign_signer_address() {
        let signer = ShardSigner::from_credential("data-0", "shard", "secret").unwrap();
        let other = ShardSigner::from_credential("data-0", "shard", "other").unwrap();

        let mut info = auth(&signer, 0);
        info.signer = other.address().to_string();
        let tx = signer.sign_tx(TxBody::new(Vec::new()), info).unwrap();

        assert!(verify(&tx).is_err());
    }
}
