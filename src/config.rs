//! Configuration management for shardload

use crate::directory::{ShardEntry, ShardRole};
use crate::error::{Error, Result};
use crate::ledger::sim::SimShardConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default fragment size: 1 MiB
pub const DEFAULT_FRAGMENT_SIZE: usize = 1024 * 1024;

/// Default fragments per burst
pub const DEFAULT_BURST_SIZE: usize = 10;

/// Default mempool ceiling for the load-aware allocator: 4 MiB
pub const DEFAULT_MEMPOOL_CEILING: u64 = 4 * 1024 * 1024;

/// Default download fan-out
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// What to run
    pub run: RunConfig,

    /// Strategy selection
    pub strategy: StrategyConfig,

    /// Allocation tuning
    pub allocation: AllocationConfig,

    /// Confirmation tuning
    pub confirmation: ConfirmationConfig,

    /// Gas and fees
    pub gas: GasConfig,

    /// Download tuning
    pub download: DownloadConfig,

    /// Shard bring-up
    pub connection: ConnectionConfig,

    /// Shard directory entries
    pub shards: Vec<ShardEntry>,

    /// In-process ledger parameters
    pub simulation: SimulationConfig,
}

/// Iterations and tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of passes over the task list
    pub iterations: u32,

    /// Tasks run in order within each iteration
    pub tasks: Vec<TaskSpec>,

    /// Prefix for generated manifest keys
    pub base_url: String,

    /// Write a CSV report here when set
    pub csv_path: Option<PathBuf>,
}

/// One upload/download task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task name, unique within a run
    pub name: String,

    /// What to upload
    pub payload: PayloadSpec,

    /// Number of data shards to spread over
    pub shard_count: usize,

    /// Fragment size in bytes
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,

    /// Send every fragment to this shard instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_shard: Option<String>,

    /// File name recorded in the manifest
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

/// Payload source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PayloadSpec {
    /// Fresh random bytes every iteration
    Random {
        size: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<u64>,
    },
    /// Contents of a local file
    File { path: PathBuf },
}

/// Strategy selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub allocator: AllocatorKind,
    pub transmitter: TransmitterKind,
    pub confirmation: ConfirmationKind,
}

/// Allocation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Fragments per batch for burst transmission
    pub burst_size: usize,

    /// Backlog above which a shard receives no new work
    pub mempool_ceiling_bytes: u64,

    /// Delay between mempool samples when every shard is busy (ms)
    pub poll_interval_ms: u64,

    /// Give up allocating after this long (ms)
    pub wait_ceiling_ms: u64,

    /// Seed for the random allocator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<u64>,
}

/// Confirmation tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Deadline for a batch of transactions (ms)
    pub timeout_ms: u64,

    /// Delay between polling rounds (ms)
    pub poll_interval_ms: u64,

    /// Concurrent tx queries per polling round
    pub max_concurrent_queries: usize,
}

/// Gas and fee settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// `"auto"` or a fixed number of units
    pub limit: GasLimit,

    /// Fee per gas unit
    pub price: f64,

    /// Fee denomination
    pub denom: String,

    /// Units used when simulation fails
    pub fallback_limit: u64,

    /// Multiplier applied to simulated gas
    pub adjustment: f64,
}

/// Download tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Fragments fetched concurrently
    pub max_in_flight: usize,
}

/// Shard bring-up settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Attempts for the initial account query
    pub account_query_attempts: u32,

    /// Fixed delay between account query attempts (ms)
    pub account_query_delay_ms: u64,

    /// Connection attempts per shard
    pub connect_attempts: u32,

    /// Base delay for exponential backoff (ms)
    pub connect_base_delay_ms: u64,

    /// Cap on the backoff delay (ms)
    pub connect_max_delay_ms: u64,

    /// Randomize backoff delays
    pub connect_jitter: bool,

    /// Account address prefix
    pub address_prefix: String,
}

/// In-process ledger parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub block_interval_ms: u64,
    pub max_txs_per_block: usize,
    pub streaming: bool,
    pub base_gas: u64,
    pub gas_per_byte: u64,
    pub commit_timeout_ms: u64,
}

fn default_fragment_size() -> usize {
    DEFAULT_FRAGMENT_SIZE
}

fn default_file_name() -> String {
    "payload.bin".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            iterations: 1,
            tasks: Vec::new(),
            base_url: "shardload://uploads".to_string(),
            csv_path: None,
        }
    }
}

impl Default for AllocationConfig {
    fn default() -> Self {
        AllocationConfig {
            burst_size: DEFAULT_BURST_SIZE,
            mempool_ceiling_bytes: DEFAULT_MEMPOOL_CEILING,
            poll_interval_ms: 250,
            wait_ceiling_ms: 30_000,
            random_seed: None,
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        ConfirmationConfig {
            timeout_ms: 60_000,
            poll_interval_ms: 1000,
            max_concurrent_queries: 16,
        }
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        GasConfig {
            limit: GasLimit::Auto,
            price: 0.0025,
            denom: "stake".to_string(),
            fallback_limit: 4_000_000,
            adjustment: 1.3,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            account_query_attempts: 5,
            account_query_delay_ms: 1000,
            connect_attempts: 3,
            connect_base_delay_ms: 500,
            connect_max_delay_ms: 10_000,
            connect_jitter: true,
            address_prefix: "shard".to_string(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let shard = SimShardConfig::default();
        SimulationConfig {
            block_interval_ms: shard.block_interval.as_millis() as u64,
            max_txs_per_block: shard.max_txs_per_block,
            streaming: shard.streaming,
            base_gas: shard.base_gas,
            gas_per_byte: shard.gas_per_byte,
            commit_timeout_ms: shard.commit_timeout.as_millis() as u64,
        }
    }
}

impl SimulationConfig {
    /// Parameters for each simulated shard
    pub fn shard_config(&self) -> SimShardConfig {
        SimShardConfig {
            block_interval: Duration::from_millis(self.block_interval_ms),
            max_txs_per_block: self.max_txs_per_block,
            streaming: self.streaming,
            base_gas: self.base_gas,
            gas_per_byte: self.gas_per_byte,
            commit_timeout: Duration::from_millis(self.commit_timeout_ms),
        }
    }
}

/// Gas limit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GasLimitRepr", into = "GasLimitRepr")]
pub enum GasLimit {
    /// Simulate and scale by the adjustment factor
    Auto,
    /// Fixed number of units
    Fixed(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum GasLimitRepr {
    Units(u64),
    Keyword(String),
}

impl TryFrom<GasLimitRepr> for GasLimit {
    type Error = String;

    fn try_from(repr: GasLimitRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            GasLimitRepr::Units(units) => Ok(GasLimit::Fixed(units)),
            GasLimitRepr::Keyword(word) if word.trim().eq_ignore_ascii_case("auto") => Ok(GasLimit::Auto),
            GasLimitRepr::Keyword(word) => word
                .trim()
                .parse()
                .map(GasLimit::Fixed)
                .map_err(|_| format!("gas limit must be \"auto\" or a number, got {:?}", word)),
        }
    }
}

impl From<GasLimit> for GasLimitRepr {
    fn from(limit: GasLimit) -> Self {
        match limit {
            GasLimit::Auto => GasLimitRepr::Keyword("auto".to_string()),
            GasLimit::Fixed(units) => GasLimitRepr::Units(units),
        }
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(*c, '-' | '_') && !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
}

macro_rules! strategy_name {
    ($kind:ident, $what:literal) => {
        impl TryFrom<String> for $kind {
            type Error = Error;

            fn try_from(name: String) -> Result<Self> {
                name.parse()
            }
        }

        impl From<$kind> for String {
            fn from(kind: $kind) -> Self {
                kind.to_string()
            }
        }

        impl FromStr for $kind {
            type Err = Error;

            fn from_str(name: &str) -> Result<Self> {
                Self::from_normalized(&normalize(name)).ok_or_else(|| {
                    Error::InvalidConfig(format!("unknown {} strategy: {}", $what, name))
                })
            }
        }
    };
}

/// Chunk allocation strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AllocatorKind {
    #[default]
    Static,
    RoundRobin,
    Random,
    Available,
}

impl AllocatorKind {
    fn from_normalized(name: &str) -> Option<Self> {
        match name {
            "static" => Some(AllocatorKind::Static),
            "roundrobin" => Some(AllocatorKind::RoundRobin),
            "random" => Some(AllocatorKind::Random),
            "available" => Some(AllocatorKind::Available),
            _ => None,
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocatorKind::Static => write!(f, "static"),
            AllocatorKind::RoundRobin => write!(f, "roundrobin"),
            AllocatorKind::Random => write!(f, "random"),
            AllocatorKind::Available => write!(f, "available"),
        }
    }
}

strategy_name!(AllocatorKind, "allocator");

/// Upload transmission strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransmitterKind {
    #[default]
    OneByOne,
    MultiBurst,
}

impl TransmitterKind {
    fn from_normalized(name: &str) -> Option<Self> {
        match name {
            "onebyone" => Some(TransmitterKind::OneByOne),
            "multiburst" => Some(TransmitterKind::MultiBurst),
            _ => None,
        }
    }
}

impl fmt::Display for TransmitterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitterKind::OneByOne => write!(f, "onebyone"),
            TransmitterKind::MultiBurst => write!(f, "multiburst"),
        }
    }
}

strategy_name!(TransmitterKind, "transmitter");

/// Finality detection strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConfirmationKind {
    #[default]
    Polling,
    Events,
}

impl ConfirmationKind {
    fn from_normalized(name: &str) -> Option<Self> {
        match name {
            "polling" | "poll" => Some(ConfirmationKind::Polling),
            "events" | "event" | "subscribe" | "eventsubscribe" => Some(ConfirmationKind::Events),
            _ => None,
        }
    }
}

impl fmt::Display for ConfirmationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationKind::Polling => write!(f, "polling"),
            ConfirmationKind::Events => write!(f, "events"),
        }
    }
}

strategy_name!(ConfirmationKind, "confirmation");

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = if is_yaml(path) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        };

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(iterations) = get("SHARDLOAD_ITERATIONS") {
            match iterations.parse() {
                Ok(n) => self.run.iterations = n,
                Err(_) => warn!("Ignoring invalid SHARDLOAD_ITERATIONS: {}", iterations),
            }
        }

        if let Some(timeout) = get("SHARDLOAD_CONFIRM_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.confirmation.timeout_ms = ms,
                Err(_) => warn!("Ignoring invalid SHARDLOAD_CONFIRM_TIMEOUT_MS: {}", timeout),
            }
        }

        if let Some(base_url) = get("SHARDLOAD_BASE_URL") {
            self.run.base_url = base_url;
        }

        // Strategies
        if let Some(name) = get("SHARDLOAD_ALLOCATOR") {
            match name.parse() {
                Ok(kind) => self.strategy.allocator = kind,
                Err(e) => warn!("Ignoring SHARDLOAD_ALLOCATOR: {}", e),
            }
        }

        if let Some(name) = get("SHARDLOAD_TRANSMITTER") {
            match name.parse() {
                Ok(kind) => self.strategy.transmitter = kind,
                Err(e) => warn!("Ignoring SHARDLOAD_TRANSMITTER: {}", e),
            }
        }

        if let Some(name) = get("SHARDLOAD_CONFIRMATION") {
            match name.parse() {
                Ok(kind) => self.strategy.confirmation = kind,
                Err(e) => warn!("Ignoring SHARDLOAD_CONFIRMATION: {}", e),
            }
        }
    }

    /// A small runnable configuration: four data shards, one index shard, one task
    pub fn example() -> Self {
        let mut shards: Vec<ShardEntry> = (0..4)
            .map(|i| ShardEntry {
                name: format!("data-{}", i),
                role: ShardRole::Data,
                rpc: format!("http://127.0.0.1:{}", 26657 + i * 10),
                api: format!("http://127.0.0.1:{}", 1317 + i * 10),
                credential: Some(format!("example-credential-data-{}", i)),
            })
            .collect();
        shards.push(ShardEntry {
            name: "index".to_string(),
            role: ShardRole::Index,
            rpc: "http://127.0.0.1:26757".to_string(),
            api: "http://127.0.0.1:1417".to_string(),
            credential: Some("example-credential-index".to_string()),
        });

        Config {
            run: RunConfig {
                tasks: vec![TaskSpec {
                    name: "random-10mib".to_string(),
                    payload: PayloadSpec::Random {
                        size: 10 * 1024 * 1024,
                        seed: None,
                    },
                    shard_count: 4,
                    fragment_size: DEFAULT_FRAGMENT_SIZE,
                    target_shard: None,
                    file_name: default_file_name(),
                }],
                ..Default::default()
            },
            shards,
            ..Default::default()
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.run.iterations == 0 {
            return Err(Error::InvalidConfig(
                "Iterations must be greater than 0".to_string(),
            ));
        }

        if self.run.tasks.is_empty() {
            return Err(Error::InvalidConfig("At least one task is required".to_string()));
        }

        if self.allocation.burst_size == 0 {
            return Err(Error::InvalidConfig(
                "Burst size must be greater than 0".to_string(),
            ));
        }

        if self.download.max_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "Download fan-out must be greater than 0".to_string(),
            ));
        }

        if self.confirmation.timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "Confirmation timeout must be greater than 0".to_string(),
            ));
        }

        // With no shards listed the directory supplies them; they are checked after connecting
        let check_shards = !self.shards.is_empty();
        if check_shards && !self.shards.iter().any(|s| s.role == ShardRole::Index) {
            return Err(Error::InvalidConfig("No index shard configured".to_string()));
        }

        let data_shards: HashSet<&str> = self
            .shards
            .iter()
            .filter(|s| s.role == ShardRole::Data)
            .map(|s| s.name.as_str())
            .collect();

        let mut names = HashSet::new();
        for task in &self.run.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate task name: {}",
                    task.name
                )));
            }

            if task.fragment_size == 0 {
                return Err(Error::InvalidConfig(format!(
                    "Task {}: fragment size must be greater than 0",
                    task.name
                )));
            }

            if task.shard_count == 0 {
                return Err(Error::InvalidConfig(format!(
                    "Task {}: shard count must be greater than 0",
                    task.name
                )));
            }

            if let Some(target) = task.target_shard.as_ref().filter(|_| check_shards) {
                if !data_shards.contains(target.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "Task {}: unknown target shard {}",
                        task.name, target
                    )));
                }
            }
        }

        Ok(())
    }

    /// Confirmation deadline
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_example_is_valid() {
        let config = Config::example();
        config.validate().unwrap();
        assert_eq!(config.shards.len(), 5);
        assert_eq!(config.gas.limit, GasLimit::Auto);
    }

    #[test]
    fn test_default_requires_tasks() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!("Static".parse::<AllocatorKind>().unwrap(), AllocatorKind::Static);
        assert_eq!("round-robin".parse::<AllocatorKind>().unwrap(), AllocatorKind::RoundRobin);
        assert_eq!("AVAILABLE".parse::<AllocatorKind>().unwrap(), AllocatorKind::Available);
        assert_eq!("MultiBurst".parse::<TransmitterKind>().unwrap(), TransmitterKind::MultiBurst);
        assert_eq!("one_by_one".parse::<TransmitterKind>().unwrap(), TransmitterKind::OneByOne);
        assert_eq!("poll".parse::<ConfirmationKind>().unwrap(), ConfirmationKind::Polling);
        assert_eq!("EventSubscribe".parse::<ConfirmationKind>().unwrap(), ConfirmationKind::Events);
        assert!("fastest".parse::<AllocatorKind>().is_err());
    }

    #[test]
    fn test_gas_limit_serde() {
        let auto: GasLimit = serde_json::from_str("\"auto\"").unwrap();
        let fixed: GasLimit = serde_json::from_str("250000").unwrap();
        let quoted: GasLimit = serde_json::from_str("\"300000\"").unwrap();

        assert_eq!(auto, GasLimit::Auto);
        assert_eq!(fixed, GasLimit::Fixed(250_000));
        assert_eq!(quoted, GasLimit::Fixed(300_000));
        assert!(serde_json::from_str::<GasLimit>("\"lots\"").is_err());
        assert_eq!(serde_json::to_string(&GasLimit::Auto).unwrap(), "\"auto\"");
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("SHARDLOAD_ITERATIONS", "7"),
            ("SHARDLOAD_CONFIRM_TIMEOUT_MS", "1500"),
            ("SHARDLOAD_BASE_URL", "https://files.example"),
            ("SHARDLOAD_ALLOCATOR", "random"),
            ("SHARDLOAD_TRANSMITTER", "bogus"),
            ("SHARDLOAD_CONFIRMATION", "subscribe"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::example();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.run.iterations, 7);
        assert_eq!(config.confirmation.timeout_ms, 1500);
        assert_eq!(config.run.base_url, "https://files.example");
        assert_eq!(config.strategy.allocator, AllocatorKind::Random);
        assert_eq!(config.strategy.transmitter, TransmitterKind::OneByOne);
        assert_eq!(config.strategy.confirmation, ConfirmationKind::Events);
    }

    #[test]
    fn test_validation_rules() {
        let mut config = Config::example();
        config.run.iterations = 0;
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.run.tasks[0].fragment_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.run.tasks[0].shard_count = 0;
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.run.tasks.push(config.run.tasks[0].clone());
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.run.tasks[0].target_shard = Some("index".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.run.tasks[0].target_shard = Some("data-2".to_string());
        assert!(config.validate().is_ok());

        let mut config = Config::example();
        config.shards.retain(|s| s.role != ShardRole::Index);
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.shards.clear();
        config.run.tasks[0].target_shard = Some("anywhere".to_string());
        assert!(config.validate().is_ok());

        let mut config = Config::example();
        config.allocation.burst_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::example();
        config.download.max_in_flight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_json_and_yaml() {
        let dir = tempdir().unwrap();
        let mut config = Config::example();
        config.strategy.allocator = AllocatorKind::Available;
        config.gas.limit = GasLimit::Fixed(123_456);

        for file in ["config.json", "config.yaml"] {
            let path = dir.path().join(file);
            config.save(&path).unwrap();
            let loaded = Config::load(&path).unwrap();

            assert_eq!(loaded.run.tasks.len(), 1);
            assert_eq!(loaded.shards.len(), 5);
            assert_eq!(loaded.gas.limit, GasLimit::Fixed(123_456));
        }
    }

    #[test]
    fn test_sparse_file_gets_defaults() {
        let raw = r#"{
            "run": { "tasks": [{ "name": "t", "payload": { "kind": "random", "size": 10 }, "shard_count": 2 }] },
            "strategy": { "allocator": "RoundRobin", "transmitter": "multi-burst" },
            "shards": [{ "name": "idx", "role": "index", "rpc": "r", "api": "a" }]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();

        assert_eq!(config.run.iterations, 1);
        assert_eq!(config.run.tasks[0].fragment_size, DEFAULT_FRAGMENT_SIZE);
        assert_eq!(config.run.tasks[0].file_name, "payload.bin");
        assert_eq!(config.strategy.transmitter, TransmitterKind::MultiBurst);
        assert_eq!(config.strategy.confirmation, ConfirmationKind::Polling);
        assert_eq!(config.allocation.poll_interval_ms, 250);
        assert_eq!(config.connection.account_query_attempts, 5);
        config.validate().unwrap();
    }
}
