//! Task orchestration
//!
//! A run connects to every shard once, then drives each task of each
//! iteration through chunk, allocate, transmit, publish, download and
//! verify. A failing task is recorded as a failed [`IterationResult`] and
//! the run moves on; only a failure to bring up the connections aborts the
//! run. Connections are torn down whether or not the run succeeded.

mod report;
mod strategy;

pub use report::{IterationResult, RunResult, RunSummary};
pub use strategy::Strategy;

use crate::allocate::{AllocationContext, Job};
use crate::chunk::{create_fragments, FragmentPlacement};
use crate::config::{Config, PayloadSpec, TaskSpec};
use crate::connection::ConnectionManager;
use crate::directory::{ShardDirectory, ShardRole};
use crate::download::download;
use crate::error::{Error, Result};
use crate::ledger::LedgerConnector;
use crate::progress::{NoopProgress, ProgressReporter};
use crate::publish::{base_path, publish_manifest};
use crate::transmit::TransmitReport;
use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives one run
pub struct Orchestrator {
    config: Config,
    connections: Arc<ConnectionManager>,
    strategy: Strategy,
    progress: Arc<dyn ProgressReporter>,
    run_id: String,
}

impl Orchestrator {
    /// Validate the configuration and compose its strategies
    pub fn new(config: Config, connector: Arc<dyn LedgerConnector>) -> Result<Self> {
        config.validate()?;
        let connections = Arc::new(ConnectionManager::new(connector, config.connection.clone()));
        let strategy = Strategy::from_config(&config);

        Ok(Orchestrator {
            config,
            connections,
            strategy,
            progress: Arc::new(NoopProgress),
            run_id: Uuid::new_v4().simple().to_string(),
        })
    }

    /// Report progress through `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Identifier embedded in every manifest key of this run
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Connect, run every task of every iteration, disconnect
    pub async fn run(self, directory: &dyn ShardDirectory) -> Result<RunResult> {
        let outcome = self.run_connected(directory).await;

        if let Err(e) = self.connections.disconnect_all().await {
            warn!("Teardown failed: {}", e);
        }

        if let Err(e) = &outcome {
            error!(run_id = %self.run_id, "Run aborted: {}", e);
        }
        outcome
    }

    async fn run_connected(&self, directory: &dyn ShardDirectory) -> Result<RunResult> {
        let started_at = Utc::now();
        let started = Instant::now();

        info!(
            run_id = %self.run_id,
            strategy = %self.strategy,
            iterations = self.config.run.iterations,
            tasks = self.config.run.tasks.len(),
            "Starting run"
        );

        self.connections.init(directory).await?;
        self.check_topology()?;

        let mut results = Vec::new();
        for iteration in 1..=self.config.run.iterations {
            for task in &self.config.run.tasks {
                results.push(self.run_task(iteration, task).await);
            }
        }

        let run = RunResult::new(
            self.run_id.clone(),
            self.strategy.to_string(),
            started_at,
            started.elapsed().as_millis() as u64,
            results,
        );

        info!(
            run_id = %self.run_id,
            succeeded = run.summary.succeeded,
            total = run.summary.total,
            elapsed_ms = run.elapsed_ms,
            "Run complete"
        );
        Ok(run)
    }

    /// Shard checks that need the directory's view of the network
    fn check_topology(&self) -> Result<()> {
        let index = self.connections.index_shard()?;
        debug!(index = %index, data_shards = self.connections.data_shards().len(), "Topology resolved");

        for task in &self.config.run.tasks {
            if let Some(target) = &task.target_shard {
                if self.connections.role(target).ok() != Some(ShardRole::Data) {
                    return Err(Error::InvalidConfig(format!(
                        "Task {}: unknown target shard {}",
                        task.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    async fn run_task(&self, iteration: u32, task: &TaskSpec) -> IterationResult {
        let mut result = IterationResult::new(iteration, &task.name);

        match self.upload_and_verify(iteration, task, &mut result).await {
            Ok(()) => info!(
                task = %task.name,
                iteration,
                fragments = result.fragment_count,
                shards = result.shards_used,
                upload_ms = result.upload_ms,
                download_ms = result.download_ms,
                "Task verified"
            ),
            Err(e) => {
                error!(task = %task.name, iteration, "Task failed: {}", e);
                result.error = Some(e.to_string());
            }
        }

        result
    }

    async fn upload_and_verify(
        &self,
        iteration: u32,
        task: &TaskSpec,
        result: &mut IterationResult,
    ) -> Result<()> {
        let payload = load_payload(&task.payload, iteration).await?;
        result.payload_bytes = payload.len() as u64;

        let fragments = create_fragments(&payload, task.fragment_size)?;
        result.fragment_count = fragments.len();
        debug!(task = %task.name, fragments = fragments.len(), bytes = payload.len(), "Payload chunked");

        let upload_started = Instant::now();
        let ctx = AllocationContext::for_task(
            task,
            self.config.strategy.transmitter,
            self.config.allocation.burst_size,
        );
        let jobs = self
            .strategy
            .allocator
            .allocate(&fragments, &ctx, &self.connections)
            .await?;

        let placements = self.transmit_all(task, jobs, fragments.len(), result).await?;
        if placements.len() != fragments.len() {
            return Err(Error::Internal(format!(
                "{} placements for {} fragments",
                placements.len(),
                fragments.len()
            )));
        }

        let base = base_path(&self.config.run.base_url, &task.name, iteration, &self.run_id);
        let published = publish_manifest(
            &self.connections,
            placements,
            &base,
            &task.file_name,
            &self.config.gas,
        )
        .await?;
        result.tx_count += 1;
        result.gas_used += published.gas_used;
        result.upload_ms = upload_started.elapsed().as_millis() as u64;
        result.url = Some(published.url.clone());
        result.success = true;

        let download_started = Instant::now();
        let downloaded = download(
            &self.connections,
            &published.url,
            self.config.download.max_in_flight,
        )
        .await?;
        result.download_ms = download_started.elapsed().as_millis() as u64;

        if downloaded != payload {
            return Err(Error::Verification(format!(
                "downloaded {} bytes differ from the {} bytes uploaded",
                downloaded.len(),
                payload.len()
            )));
        }
        result.verified = true;
        Ok(())
    }

    /// Run every job; one queue per shard, shards in parallel
    ///
    /// Jobs for the same shard run one after another so that their
    /// sequence blocks reach the shard in reservation order.
    async fn transmit_all(
        &self,
        task: &TaskSpec,
        jobs: Vec<Job>,
        fragment_total: usize,
        result: &mut IterationResult,
    ) -> Result<Vec<FragmentPlacement>> {
        let mut queues: BTreeMap<String, Vec<Job>> = BTreeMap::new();
        for job in jobs {
            queues.entry(job.shard_name.clone()).or_default().push(job);
        }
        result.shards_used = queues.len();

        self.progress
            .start_bar(&format!("upload {}", task.name), fragment_total as u64);
        let outcomes = join_all(
            queues
                .into_iter()
                .map(|(shard, jobs)| self.drain_queue(shard, jobs)),
        )
        .await;
        self.progress.stop();

        let mut placements = Vec::with_capacity(fragment_total);
        let mut first_error = None;
        for (reports, failure) in outcomes {
            for report in reports {
                result.tx_count += report.tx_count;
                result.gas_used += report.gas_used;
                placements.extend(report.placements);
            }
            if let Some(e) = failure {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(placements),
        }
    }

    async fn drain_queue(&self, shard: String, jobs: Vec<Job>) -> (Vec<TransmitReport>, Option<Error>) {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let transmitted = self
                .strategy
                .transmitter
                .transmit(job, &self.config.gas, &self.connections)
                .await;
            match transmitted {
                Ok(report) => {
                    self.progress
                        .advance(report.placements.len() as u64, &shard);
                    reports.push(report);
                }
                Err(e) => {
                    warn!(shard = %shard, fragments = job.batch.len(), "Job failed: {}", e);
                    return (reports, Some(e));
                }
            }
        }
        (reports, None)
    }
}

/// Connect, run and tear down with the default progress reporter
pub async fn run_orchestration(
    config: Config,
    connector: Arc<dyn LedgerConnector>,
    directory: &dyn ShardDirectory,
) -> Result<RunResult> {
    Orchestrator::new(config, connector)?.run(directory).await
}

/// Produce a task's payload for one iteration
///
/// A seeded random payload still differs between iterations.
pub async fn load_payload(source: &PayloadSpec, iteration: u32) -> Result<Bytes> {
    match source {
        PayloadSpec::Random { size, seed } => {
            let mut data = vec![0u8; *size];
            match seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(iteration as u64)).fill_bytes(&mut data),
                None => rand::thread_rng().fill_bytes(&mut data),
            }
            Ok(Bytes::from(data))
        }
        PayloadSpec::File { path } => {
            let data = tokio::fs::read(path).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("payload {:?}: {}", path, e),
                ))
            })?;
            Ok(Bytes::from(data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{encode_path, parse_manifest};
    use crate::config::{AllocatorKind, ConfirmationKind, TransmitterKind};
    use crate::ledger::sim::{SimNetwork, SimShardConfig};
    use crate::publish::split_url;
    use crate::testutil;
    use tempfile::tempdir;

    fn random_task(name: &str, size: usize, fragment_size: usize, shard_count: usize) -> TaskSpec {
        TaskSpec {
            name: name.to_string(),
            payload: PayloadSpec::Random {
                size,
                seed: Some(42),
            },
            shard_count,
            fragment_size,
            target_shard: None,
            file_name: "payload.bin".to_string(),
        }
    }

    fn config_for(network: &SimNetwork, tasks: Vec<TaskSpec>) -> Config {
        let mut config = Config::default();
        config.run.tasks = tasks;
        config.shards = network.entries();
        config.connection = testutil::fast_connection_config();
        config.confirmation.timeout_ms = 5_000;
        config.confirmation.poll_interval_ms = 10;
        config.allocation.poll_interval_ms = 10;
        config
    }

    async fn run(network: &Arc<SimNetwork>, config: Config) -> Result<RunResult> {
        let directory = network.directory()?;
        run_orchestration(config, network.clone(), &directory).await
    }

    /// Fetch the manifest behind a download URL over a fresh connection
    async fn manifest_fragments(network: &Arc<SimNetwork>, url: &str) -> usize {
        let manager = ConnectionManager::new(network.clone(), testutil::fast_connection_config());
        manager.init(&network.directory().unwrap()).await.unwrap();
        let (base, file) = split_url(url).unwrap();
        let raw = manager
            .client("index")
            .unwrap()
            .fetch_manifest(&encode_path(base))
            .await
            .unwrap()
            .unwrap();
        let count = parse_manifest(&raw).unwrap().locate(&encode_path(file)).unwrap().len();
        manager.disconnect_all().await.unwrap();
        count
    }

    #[tokio::test]
    async fn test_static_one_by_one_ten_mib() {
        let network = Arc::new(SimNetwork::uniform(4, SimShardConfig::fast()));
        let config = config_for(
            &network,
            vec![random_task("ten-mib", 10 * 1024 * 1024, 1024 * 1024, 4)],
        );

        let run = run(&network, config).await.unwrap();

        assert_eq!(run.iterations.len(), 1);
        let result = &run.iterations[0];
        assert!(result.success, "{:?}", result.error);
        assert!(result.verified);
        assert_eq!(result.fragment_count, 10);
        assert_eq!(result.shards_used, 4);
        assert_eq!(result.payload_bytes, 10 * 1024 * 1024);
        assert_eq!(result.tx_count, 11);
        assert_eq!(run.summary.succeeded, 1);
        assert_eq!(run.strategy, "static/onebyone/polling");

        let stored: usize = (0..4)
            .map(|i| network.shard(&format!("data-{}", i)).unwrap().fragment_count())
            .sum();
        assert_eq!(stored, 10);
        assert_eq!(network.shard("index").unwrap().manifest_count(), 1);

        let url = result.url.clone().unwrap();
        assert_eq!(manifest_fragments(&network, &url).await, 10);
    }

    #[tokio::test]
    async fn test_failed_fragment_under_multi_burst() {
        let network = Arc::new(SimNetwork::uniform(2, SimShardConfig::fast()));
        for name in ["data-0", "data-1"] {
            network.shard(name).unwrap().update_faults(|f| {
                f.reject_fragments.insert(3);
            });
        }
        let mut config = config_for(&network, vec![random_task("burst", 8 * 64, 64, 2)]);
        config.strategy.allocator = AllocatorKind::RoundRobin;
        config.strategy.transmitter = TransmitterKind::MultiBurst;
        config.allocation.burst_size = 2;

        let run = run(&network, config).await.unwrap();

        let result = &run.iterations[0];
        assert!(!result.success);
        assert!(!result.verified);
        assert!(result.url.is_none());
        assert!(result.error.as_deref().unwrap().contains("Batch"));
        assert_eq!(network.shard("index").unwrap().manifest_count(), 0);
        assert_eq!(run.summary.failed, 1);
        assert_eq!(network.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_round_trip_across_strategies() {
        let combos = [
            (AllocatorKind::Static, TransmitterKind::MultiBurst, ConfirmationKind::Events),
            (AllocatorKind::RoundRobin, TransmitterKind::OneByOne, ConfirmationKind::Polling),
            (AllocatorKind::Random, TransmitterKind::MultiBurst, ConfirmationKind::Polling),
            (AllocatorKind::Available, TransmitterKind::MultiBurst, ConfirmationKind::Events),
        ];

        for (allocator, transmitter, confirmation) in combos {
            let network = Arc::new(SimNetwork::uniform(3, SimShardConfig::fast()));
            let mut config = config_for(
                &network,
                vec![
                    random_task("odd", 5_000, 512, 3),
                    random_task("tiny", 7, 512, 2),
                ],
            );
            config.run.iterations = 2;
            config.strategy.allocator = allocator;
            config.strategy.transmitter = transmitter;
            config.strategy.confirmation = confirmation;
            config.allocation.burst_size = 3;
            config.allocation.random_seed = Some(1);

            let run = run(&network, config).await.unwrap();

            assert_eq!(run.summary.total, 4);
            for result in &run.iterations {
                assert!(
                    result.verified,
                    "{}/{}/{} {}: {:?}",
                    allocator, transmitter, confirmation, result.task, result.error
                );
            }
            assert_eq!(run.summary.success_rate, 1.0);
        }
    }

    #[tokio::test]
    async fn test_failed_task_does_not_stop_the_next() {
        let network = Arc::new(SimNetwork::uniform(2, SimShardConfig::fast()));
        network.shard("data-0").unwrap().update_faults(|f| {
            f.reject_fragments.insert(0);
        });

        let mut doomed = random_task("doomed", 300, 100, 1);
        doomed.target_shard = Some("data-0".to_string());
        let mut fine = random_task("fine", 300, 100, 1);
        fine.target_shard = Some("data-1".to_string());
        let config = config_for(&network, vec![doomed, fine]);

        let run = run(&network, config).await.unwrap();

        assert_eq!(run.iterations.len(), 2);
        assert!(!run.iterations[0].verified);
        assert!(run.iterations[0].error.is_some());
        assert!(run.iterations[1].verified);
        assert_eq!(run.summary.succeeded, 1);
    }

    #[tokio::test]
    async fn test_shards_from_directory_only() {
        let network = Arc::new(SimNetwork::uniform(2, SimShardConfig::fast()));
        let mut config = config_for(&network, vec![random_task("external", 700, 100, 2)]);
        config.shards.clear();

        let run = run(&network, config).await.unwrap();

        let result = &run.iterations[0];
        assert!(result.verified, "{:?}", result.error);
        assert_eq!(result.shards_used, 2);
    }

    #[tokio::test]
    async fn test_unknown_target_from_directory_aborts_run() {
        let network = Arc::new(SimNetwork::uniform(2, SimShardConfig::fast()));
        let mut task = random_task("lost", 100, 10, 1);
        task.target_shard = Some("data-9".to_string());
        let mut config = config_for(&network, vec![task]);
        config.shards.clear();

        let err = run(&network, config).await.unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(network.shutdown_count(), 1);
        assert_eq!(network.shard("index").unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_init_failure_still_tears_down() {
        let network = Arc::new(SimNetwork::uniform(2, SimShardConfig::fast()));
        network
            .shard("data-1")
            .unwrap()
            .update_faults(|f| f.refuse_connect = true);
        let config = config_for(&network, vec![random_task("never", 100, 10, 2)]);

        let err = run(&network, config).await.unwrap_err();

        assert!(matches!(err, Error::Connection { .. }));
        assert_eq!(network.shutdown_count(), 1);
        assert_eq!(network.shard("data-0").unwrap().close_count(), 1);
        assert_eq!(network.shard("index").unwrap().connect_count(), 0);
    }

    #[tokio::test]
    async fn test_file_and_empty_payloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input.bin");
        std::fs::write(&path, testutil::random_bytes(2_500, 3)).unwrap();

        let network = Arc::new(SimNetwork::uniform(2, SimShardConfig::fast()));
        let file_task = TaskSpec {
            payload: PayloadSpec::File { path },
            ..random_task("file", 0, 1_000, 2)
        };
        let config = config_for(&network, vec![file_task, random_task("empty", 0, 1_000, 2)]);

        let run = run(&network, config).await.unwrap();

        let file = &run.iterations[0];
        assert!(file.verified, "{:?}", file.error);
        assert_eq!(file.payload_bytes, 2_500);
        assert_eq!(file.fragment_count, 3);

        let empty = &run.iterations[1];
        assert!(empty.verified, "{:?}", empty.error);
        assert_eq!(empty.fragment_count, 0);
        assert_eq!(empty.shards_used, 0);
    }

    #[tokio::test]
    async fn test_progress_and_invalid_config() {
        let network = Arc::new(SimNetwork::uniform(1, SimShardConfig::fast()));
        let mut config = config_for(&network, vec![random_task("one", 256, 64, 1)]);

        let progress = Arc::new(crate::progress::LoggingProgress::new());
        let orchestrator = Orchestrator::new(config.clone(), network.clone())
            .unwrap()
            .with_progress(progress.clone());
        assert_eq!(orchestrator.run_id().len(), 32);
        let run = orchestrator.run(&network.directory().unwrap()).await.unwrap();
        assert!(run.iterations[0].verified);
        assert_eq!(progress.done(), None);

        config.shards.retain(|s| s.role != ShardRole::Index);
        assert!(matches!(
            Orchestrator::new(config, network.clone()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_seeded_payload_varies_by_iteration() {
        let source = PayloadSpec::Random {
            size: 64,
            seed: Some(9),
        };
        let first = load_payload(&source, 1).await.unwrap();
        assert_eq!(first, load_payload(&source, 1).await.unwrap());
        assert_ne!(first, load_payload(&source, 2).await.unwrap());
    }
}
