//! Shard directory
//!
//! Resolves shard names to their role, endpoints and signing credential.
//! Discovery itself lives outside this crate; the core only consumes the
//! [`ShardDirectory`] trait and treats its answers as stable for a run.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What a shard stores
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ShardRole {
    /// Holds content fragments
    Data,
    /// Holds file manifests
    Index,
}

impl fmt::Display for ShardRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardRole::Data => write!(f, "data"),
            ShardRole::Index => write!(f, "index"),
        }
    }
}

/// A discovered shard
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShardInfo {
    pub name: String,
    pub role: ShardRole,
}

/// Directory entry as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardEntry {
    /// Shard (chain) name
    pub name: String,
    /// Shard role
    pub role: ShardRole,
    /// RPC endpoint (tx submission, events)
    pub rpc: String,
    /// API endpoint (queries)
    pub api: String,
    /// Signing secret; falls back to `SHARDLOAD_CREDENTIAL_<NAME>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Source of shard names, endpoints and credentials
#[async_trait]
pub trait ShardDirectory: Send + Sync {
    /// All known shards
    async fn list_shards(&self) -> Result<Vec<ShardInfo>>;

    /// RPC endpoint for a shard
    async fn rpc_endpoint(&self, name: &str) -> Result<String>;

    /// Query API endpoint for a shard
    async fn api_endpoint(&self, name: &str) -> Result<String>;

    /// Signing secret for a shard
    async fn credential(&self, name: &str) -> Result<String>;
}

/// Directory backed by a fixed list of entries
///
/// All lookups are resolved once at construction and served from private
/// maps afterwards.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    shards: Vec<ShardInfo>,
    rpc: HashMap<String, String>,
    api: HashMap<String, String>,
    credentials: HashMap<String, String>,
}

impl StaticDirectory {
    /// Build a directory from configuration entries
    pub fn from_entries(entries: &[ShardEntry]) -> Result<Self> {
        let mut directory = StaticDirectory::default();

        for entry in entries {
            if entry.name.trim().is_empty() {
                return Err(Error::Directory("shard entry with empty name".to_string()));
            }
            if directory.rpc.contains_key(&entry.name) {
                return Err(Error::Directory(format!(
                    "shard {} listed more than once",
                    entry.name
                )));
            }

            directory.shards.push(ShardInfo {
                name: entry.name.clone(),
                role: entry.role,
            });
            directory.rpc.insert(entry.name.clone(), entry.rpc.clone());
            directory.api.insert(entry.name.clone(), entry.api.clone());

            let credential = entry
                .credential
                .clone()
                .or_else(|| std::env::var(credential_env_var(&entry.name)).ok());
            if let Some(credential) = credential {
                directory.credentials.insert(entry.name.clone(), credential);
            }
        }

        Ok(directory)
    }

    /// Number of shards in the directory
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    fn lookup<'a>(map: &'a HashMap<String, String>, name: &str, what: &str) -> Result<&'a str> {
        map.get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::Directory(format!("no {} for shard {}", what, name)))
    }
}

#[async_trait]
impl ShardDirectory for StaticDirectory {
    async fn list_shards(&self) -> Result<Vec<ShardInfo>> {
        Ok(self.shards.clone())
    }

    async fn rpc_endpoint(&self, name: &str) -> Result<String> {
        Self::lookup(&self.rpc, name, "rpc endpoint").map(str::to_string)
    }

    async fn api_endpoint(&self, name: &str) -> Result<String> {
        Self::lookup(&self.api, name, "api endpoint").map(str::to_string)
    }

    async fn credential(&self, name: &str) -> Result<String> {
        Self::lookup(&self.credentials, name, "credential").map(str::to_string)
    }
}

/// Environment variable consulted for a shard's credential
pub fn credential_env_var(shard: &str) -> String {
    let normalized: String = shard
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("SHARDLOAD_CREDENTIAL_{}", normalized)
}
