//! Load-aware allocation
//!
//! Before each batch is placed, every candidate shard's mempool is sampled.
//! Shards at or above the ceiling are skipped; among the rest the batch goes
//! to the one with the smallest projected load (observed backlog plus what
//! this allocation already handed it). When no shard is below the ceiling
//! sampling is repeated until the wait ceiling runs out. A sample that has
//! not answered by then counts against the same ceiling.

use super::{candidate_shards, make_batches, AllocationContext, Allocator, Job};
use crate::chunk::Fragment;
use crate::config::AllocationConfig;
use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use crate::ledger::ShardClient;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Mempool-aware allocator with admission control
#[derive(Debug, Clone)]
pub struct Available {
    ceiling_bytes: u64,
    poll_interval: Duration,
    wait_ceiling: Duration,
}

impl Available {
    /// Create an allocator
    pub fn new(ceiling_bytes: u64, poll_interval: Duration, wait_ceiling: Duration) -> Self {
        Available {
            ceiling_bytes,
            poll_interval,
            wait_ceiling,
        }
    }

    /// Create from configuration
    pub fn from_config(config: &AllocationConfig) -> Self {
        Self::new(
            config.mempool_ceiling_bytes,
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.wait_ceiling_ms),
        )
    }

    /// Sample every shard's mempool; unreachable shards report None
    async fn sample_mempools(
        &self,
        clients: &[(String, Arc<dyn ShardClient>)],
    ) -> Vec<(String, Option<u64>)> {
        join_all(clients.iter().map(|(name, client)| async move {
            match client.mempool_bytes().await {
                Ok(bytes) => (name.clone(), Some(bytes)),
                Err(e) => {
                    warn!(shard = %name, "Mempool query failed: {}", e);
                    (name.clone(), None)
                }
            }
        }))
        .await
    }

    fn timed_out(&self, started: Instant) -> Error {
        Error::AllocationTimeout {
            waited_ms: started.elapsed().as_millis() as u64,
            ceiling_bytes: self.ceiling_bytes,
        }
    }

    fn pick<'a>(
        &self,
        loads: &'a [(String, Option<u64>)],
        assigned: &HashMap<String, u64>,
    ) -> Option<&'a str> {
        loads
            .iter()
            .filter_map(|(name, observed)| {
                let observed = (*observed)?;
                if observed >= self.ceiling_bytes {
                    return None;
                }
                let projected = observed + assigned.get(name).copied().unwrap_or(0);
                Some((name.as_str(), projected))
            })
            .min_by_key(|(_, projected)| *projected)
            .map(|(name, _)| name)
    }
}

#[async_trait]
impl Allocator for Available {
    fn name(&self) -> &'static str {
        "available"
    }

    async fn allocate(
        &self,
        fragments: &[Fragment],
        ctx: &AllocationContext,
        connections: &ConnectionManager,
    ) -> Result<Vec<Job>> {
        let clients = candidate_shards(ctx, connections)?
            .into_iter()
            .map(|name| {
                let client = connections.client(&name)?;
                Ok((name, client))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pending: VecDeque<Vec<Fragment>> = make_batches(fragments, ctx.batch_size).into();
        let mut assigned: HashMap<String, u64> = HashMap::new();
        let mut jobs = Vec::with_capacity(pending.len());

        let started = Instant::now();
        let deadline = started + self.wait_ceiling;

        while let Some(batch) = pending.pop_front() {
            loop {
                let loads = match timeout_at(deadline, self.sample_mempools(&clients)).await {
                    Ok(loads) => loads,
                    Err(_) => {
                        warn!("Mempool queries outlived the wait ceiling");
                        return Err(self.timed_out(started));
                    }
                };
                if let Some(shard) = self.pick(&loads, &assigned) {
                    let job = Job {
                        shard_name: shard.to_string(),
                        batch,
                    };
                    *assigned.entry(job.shard_name.clone()).or_insert(0) += job.bytes();
                    jobs.push(job);
                    break;
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(self.timed_out(started));
                }

                debug!(
                    pending = pending.len() + 1,
                    "Every shard is at the mempool ceiling, waiting"
                );
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        }

        info!(
            "Load-aware allocation: {} batches in {:?}",
            jobs.len(),
            started.elapsed()
        );
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocate::tests::assert_coverage;
    use crate::testutil;

    fn ctx(shard_count: usize, batch_size: usize) -> AllocationContext {
        AllocationContext {
            shard_count,
            target_shard: None,
            batch_size,
        }
    }

    fn allocator(ceiling: u64, wait_ms: u64) -> Available {
        Available::new(ceiling, Duration::from_millis(20), Duration::from_millis(wait_ms))
    }

    #[tokio::test]
    async fn test_avoids_overloaded_shard() {
        let (network, manager) = testutil::connected(3).await;
        network
            .shard("data-0")
            .unwrap()
            .update_faults(|f| f.backlog_bytes = 10_000);
        let fragments = testutil::fragments(12, 100);

        let jobs = allocator(5_000, 1_000)
            .allocate(&fragments, &ctx(3, 2), &manager)
            .await
            .unwrap();

        assert_coverage(&fragments, &jobs);
        assert!(jobs.iter().all(|j| j.shard_name != "data-0"));
        assert!(jobs.iter().any(|j| j.shard_name == "data-1"));
        assert!(jobs.iter().any(|j| j.shard_name == "data-2"));
    }

    #[tokio::test]
    async fn test_prefers_smallest_backlog() {
        let (network, manager) = testutil::connected(2).await;
        network
            .shard("data-0")
            .unwrap()
            .update_faults(|f| f.backlog_bytes = 700);
        let fragments = testutil::fragments(1, 100);

        let jobs = allocator(5_000, 1_000)
            .allocate(&fragments, &ctx(2, 1), &manager)
            .await
            .unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].shard_name, "data-1");
    }

    #[tokio::test]
    async fn test_backpressure_times_out() {
        let (network, manager) = testutil::connected(2).await;
        for shard in network.shards() {
            shard.update_faults(|f| f.backlog_bytes = 1_000_000);
        }
        let fragments = testutil::fragments(3, 100);

        let started = std::time::Instant::now();
        let err = allocator(5_000, 200)
            .allocate(&fragments, &ctx(2, 1), &manager)
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(matches!(err, Error::AllocationTimeout { ceiling_bytes: 5_000, .. }));
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_stalled_mempool_query_times_out() {
        let (network, manager) = testutil::connected(2).await;
        network
            .shard("data-1")
            .unwrap()
            .update_faults(|f| f.stall_mempool = true);
        let fragments = testutil::fragments(2, 100);

        let started = std::time::Instant::now();
        let err = allocator(5_000, 200)
            .allocate(&fragments, &ctx(2, 1), &manager)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AllocationTimeout { ceiling_bytes: 5_000, .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_waits_for_capacity() {
        let (network, manager) = testutil::connected(1).await;
        let shard = network.shard("data-0").unwrap();
        shard.update_faults(|f| f.backlog_bytes = 1_000_000);

        let relief = Arc::clone(&shard);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            relief.update_faults(|f| f.backlog_bytes = 0);
        });

        let fragments = testutil::fragments(2, 100);
        let jobs = allocator(5_000, 5_000)
            .allocate(&fragments, &ctx(1, 1), &manager)
            .await
            .unwrap();

        assert_eq!(jobs.len(), 2);
        assert_coverage(&fragments, &jobs);
    }

    #[tokio::test]
    async fn test_spreads_by_projected_load() {
        let (_network, manager) = testutil::connected(2).await;
        let fragments = testutil::fragments(4, 100);

        let jobs = allocator(5_000, 1_000)
            .allocate(&fragments, &ctx(2, 1), &manager)
            .await
            .unwrap();

        let on_first = jobs.iter().filter(|j| j.shard_name == "data-0").count();
        assert_eq!(on_first, 2);
    }
}
