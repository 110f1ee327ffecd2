//! Chunk allocation module
//!
//! Maps a task's fragments onto per-shard jobs before anything is sent.
//! Four policies are provided:
//! - `Static`: fragments dealt round-robin, one job per shard
//! - `RoundRobin`: fixed-size batches dealt round-robin
//! - `Random`: fixed-size batches sent to a uniformly random shard
//! - `Available`: batches sent to the least-loaded shard under a mempool
//!   ceiling, waiting while every shard is over it

mod available;
mod spread;

pub use available::Available;
pub use spread::{Random, RoundRobin, Static};

use crate::chunk::Fragment;
use crate::config::{TaskSpec, TransmitterKind};
use crate::connection::ConnectionManager;
use crate::directory::ShardRole;
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Fragments destined for one shard in one network round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub shard_name: String,
    pub batch: Vec<Fragment>,
}

impl Job {
    /// Payload bytes in the batch
    pub fn bytes(&self) -> u64 {
        self.batch.iter().map(|f| f.len() as u64).sum()
    }
}

/// Per-task allocation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationContext {
    /// Number of data shards to use
    pub shard_count: usize,
    /// Send everything to this shard
    pub target_shard: Option<String>,
    /// Fragments per batch
    pub batch_size: usize,
}

impl AllocationContext {
    /// Context for a task; one-by-one transmission always uses single-fragment batches
    pub fn for_task(task: &TaskSpec, transmitter: TransmitterKind, burst_size: usize) -> Self {
        let batch_size = match transmitter {
            TransmitterKind::OneByOne => 1,
            TransmitterKind::MultiBurst => burst_size.max(1),
        };
        AllocationContext {
            shard_count: task.shard_count,
            target_shard: task.target_shard.clone(),
            batch_size,
        }
    }
}

/// Chunk allocation strategy
#[async_trait]
pub trait Allocator: Send + Sync {
    /// Strategy name for logs and reports
    fn name(&self) -> &'static str;

    /// Plan the jobs for a set of fragments
    async fn allocate(
        &self,
        fragments: &[Fragment],
        ctx: &AllocationContext,
        connections: &ConnectionManager,
    ) -> Result<Vec<Job>>;
}

/// Shards a task may use: the target shard, or the first `shard_count` data shards by name
pub fn candidate_shards(ctx: &AllocationContext, connections: &ConnectionManager) -> Result<Vec<String>> {
    if let Some(target) = &ctx.target_shard {
        if connections.role(target)? != ShardRole::Data {
            return Err(Error::InvalidConfig(format!(
                "target shard {} is not a data shard",
                target
            )));
        }
        return Ok(vec![target.clone()]);
    }

    let mut shards = connections.data_shards();
    shards.truncate(ctx.shard_count);
    if shards.is_empty() {
        return Err(Error::NoShards("no data shards connected".to_string()));
    }
    Ok(shards)
}

/// Split fragments into consecutive batches of at most `batch_size`
pub fn make_batches(fragments: &[Fragment], batch_size: usize) -> Vec<Vec<Fragment>> {
    fragments
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
