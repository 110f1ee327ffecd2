//! Feedback-free allocators

use super::{candidate_shards, make_batches, AllocationContext, Allocator, Job};
use crate::chunk::Fragment;
use crate::connection::ConnectionManager;
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Deal fragments round-robin over the candidate shards, one job per shard
#[derive(Debug, Default, Clone, Copy)]
pub struct Static;

#[async_trait]
impl Allocator for Static {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn allocate(
        &self,
        fragments: &[Fragment],
        ctx: &AllocationContext,
        connections: &ConnectionManager,
    ) -> Result<Vec<Job>> {
        let shards = candidate_shards(ctx, connections)?;

        let mut batches: Vec<Vec<Fragment>> = vec![Vec::new(); shards.len()];
        for (i, fragment) in fragments.iter().enumerate() {
            batches[i % shards.len()].push(fragment.clone());
        }

        let jobs: Vec<Job> = shards
            .into_iter()
            .zip(batches)
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(shard_name, batch)| Job { shard_name, batch })
            .collect();

        debug!("Static allocation: {} fragments over {} jobs", fragments.len(), jobs.len());
        Ok(jobs)
    }
}

/// Deal fixed-size batches round-robin over the candidate shards
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

#[async_trait]
impl Allocator for RoundRobin {
    fn name(&self) -> &'static str {
        "roundrobin"
    }

    async fn allocate(
        &self,
        fragments: &[Fragment],
        ctx: &AllocationContext,
        connections: &ConnectionManager,
    ) -> Result<Vec<Job>> {
        let shards = candidate_shards(ctx, connections)?;

        let jobs: Vec<Job> = make_batches(fragments, ctx.batch_size)
            .into_iter()
            .enumerate()
            .map(|(i, batch)| Job {
                shard_name: shards[i % shards.len()].clone(),
                batch,
            })
            .collect();

        debug!("Round-robin allocation: {} batches over {} shards", jobs.len(), shards.len());
        Ok(jobs)
    }
}

/// Send each fixed-size batch to a uniformly random candidate shard
pub struct Random {
    rng: Mutex<StdRng>,
}

impl Random {
    /// Seeded for reproducible runs, or from OS entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Random { rng: Mutex::new(rng) }
    }
}

#[async_trait]
impl Allocator for Random {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn allocate(
        &self,
        fragments: &[Fragment],
        ctx: &AllocationContext,
        connections: &ConnectionManager,
    ) -> Result<Vec<Job>> {
        let shards = candidate_shards(ctx, connections)?;
        let batches = make_batches(fragments, ctx.batch_size);

        let jobs: Vec<Job> = {
            let mut rng = self.rng.lock();
            batches
                .into_iter()
                .map(|batch| Job {
                    shard_name: shards[rng.gen_range(0..shards.len())].clone(),
                    batch,
                })
                .collect()
        };

        debug!("Random allocation: {} batches over {} shards", jobs.len(), shards.len());
        Ok(jobs)
    }
}
