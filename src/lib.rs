//! shardload - Sharded ledger upload and download engine
//!
//! This library splits byte streams into fragments, spreads them over a set
//! of independent ledger shards, records their placement in a manifest on an
//! index shard, and reconstructs the original bytes from that manifest.

pub mod allocate;
pub mod chunk;
pub mod config;
pub mod confirm;
pub mod connection;
pub mod directory;
pub mod download;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod progress;
pub mod publish;
pub mod retry;
pub mod transmit;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{run_orchestration, Orchestrator, RunResult};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::connection::ConnectionManager;
    pub use crate::directory::{ShardDirectory, StaticDirectory};
    pub use crate::error::{Error, Result};
    pub use crate::ledger::{LedgerConnector, ShardClient};
    pub use crate::orchestrator::{IterationResult, Orchestrator, RunResult, RunSummary};
}
