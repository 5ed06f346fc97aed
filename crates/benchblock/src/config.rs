use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::{BenchError, BenchResult},
    store::MEMORY_SOURCE,
};

/// Port used for static node list entries when no base port is configured.
const DEFAULT_STATIC_NODE_PORT: u16 = 8545;

/// How a progress counter is surfaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Counters are not reported.
    None,
    /// Counters are kept and reported in logs and the final summary.
    Counting,
    /// Counters are kept and rendered as progress bars.
    #[default]
    Visual,
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "off" | "disabled" => Ok(Self::None),
            "counting" | "count" | "log" => Ok(Self::Counting),
            "visual" | "bar" | "bars" => Ok(Self::Visual),
            _ => Err(format!("Unknown progress mode: {s}. Use 'none', 'counting', or 'visual'")),
        }
    }
}

impl fmt::Display for ProgressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Counting => write!(f, "counting"),
            Self::Visual => write!(f, "visual"),
        }
    }
}

/// Where worker connections point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// JSON-RPC endpoint. Each worker adds its index to the port unless
    /// `single_node` is set.
    pub eth: Option<String>,
    /// Alternative to `eth`: a static-nodes.json style list of hosts.
    pub static_nodes: Option<PathBuf>,
    /// Overrides the endpoint port (or the static node port).
    pub base_port: Option<u16>,
    /// Number of distinct nodes to spread workers over. Defaults to the thread count.
    pub nodes: Option<usize>,
    /// Pin every worker to the first node.
    pub single_node: bool,
    /// Resolve hostnames to a single IP once at startup.
    pub resolve_hosts: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            eth: None,
            static_nodes: None,
            base_port: None,
            nodes: None,
            single_node: false,
            resolve_hosts: true,
        }
    }
}

impl EndpointConfig {
    pub fn static_node_port(&self) -> u16 {
        self.base_port.unwrap_or(DEFAULT_STATIC_NODE_PORT)
    }
}

/// Settings shared by every RPC call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Retry budget for receipt checks and block fetches.
    pub retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(60), retries: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub transactions: u64,
    pub threads: usize,
    pub thread_accounts: usize,
    pub tps: u32,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub deploy_gas_limit: u64,
    /// Hex private key used to deploy the contract. A fresh key is generated when unset.
    pub deploy_key: Option<String>,
    pub check_receipts: bool,
    /// Expected time to mine a transaction. Bounds each receipt poll.
    #[serde(with = "duration_str")]
    pub expected_latency: Duration,
    /// Opaque recipient keys for privacy enabled networks.
    pub private_for: Vec<String>,
    pub run_one: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            transactions: 5000,
            threads: 12,
            thread_accounts: 6,
            tps: 221,
            gas_limit: 60_000,
            gas_price: 0,
            deploy_gas_limit: 600_000,
            deploy_key: None,
            check_receipts: false,
            expected_latency: Duration::from_secs(10),
            private_for: Vec::new(),
            run_one: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// SQLite data source. `:memory:` collects without keeping results, unset
    /// disables the collector.
    pub db_source: Option<String>,
    /// Allow appending to an existing database file.
    pub db_share: bool,
    pub start_block: Option<u64>,
    pub end_block: Option<u64>,
    #[serde(with = "duration_str")]
    pub interval: Duration,
    /// Completion target for a standalone collection. Load runs use the
    /// normalized load target instead.
    pub transactions: Option<u64>,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            db_source: None,
            db_share: false,
            start_block: None,
            end_block: None,
            interval: Duration::from_secs(10),
            transactions: None,
        }
    }
}

/// Complete configuration for a run, built once and passed down by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub endpoint: EndpointConfig,
    pub client: ClientConfig,
    pub load: LoadConfig,
    pub collect: CollectConfig,
    pub progress: ProgressMode,
    /// Directory relative paths (static node list) are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Reads a YAML configuration file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: Self =
            serde_yaml::from_str(&contents).context("failed to parse config YAML")?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub const fn collector_attached(&self) -> bool {
        self.collect.db_source.is_some()
    }

    /// The block store source with a relative file path resolved like every
    /// other path in the config. `:memory:` and `sqlite:`/`file:` URLs are
    /// passed through.
    pub fn db_source(&self) -> Option<String> {
        let source = self.collect.db_source.as_deref()?;
        let is_url = ["sqlite:", "file:"].iter().any(|prefix| source.starts_with(prefix));
        if source == MEMORY_SOURCE || is_url {
            return Some(source.to_string());
        }
        Some(self.resolve_path(Path::new(source)).to_string_lossy().into_owned())
    }

    /// Resolves a path from the config against the config file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Checks the options shared by every subcommand.
    pub fn validate_endpoint(&self) -> BenchResult<()> {
        match (&self.endpoint.eth, &self.endpoint.static_nodes) {
            (Some(_), Some(_)) => {
                Err(BenchError::config("set only one of the eth endpoint or the static nodes file"))
            }
            (None, None) => {
                Err(BenchError::config("you must provide either an eth endpoint or a static nodes file"))
            }
            _ => Ok(()),
        }?;
        if self.endpoint.nodes == Some(0) {
            return Err(BenchError::config("nodes must be at least 1"));
        }
        if self.client.retries == 0 {
            return Err(BenchError::config("retries must be at least 1"));
        }
        if self.collect.interval.is_zero() {
            return Err(BenchError::config("collect interval must be non-zero"));
        }
        if let (Some(start), Some(end)) = (self.collect.start_block, self.collect.end_block) {
            if end < start {
                return Err(BenchError::config("start block can't be greater than end block"));
            }
        }
        Ok(())
    }

    /// Checks the load options.
    pub fn validate_load(&self) -> BenchResult<()> {
        self.validate_endpoint()?;
        let load = &self.load;
        if load.threads == 0 {
            return Err(BenchError::config("threads must be at least 1"));
        }
        if load.thread_accounts == 0 {
            return Err(BenchError::config("thread accounts must be at least 1"));
        }
        if load.transactions < self.accounts_total() {
            return Err(BenchError::config(format!(
                "transactions ({}) must cover at least one batch per account ({})",
                load.transactions,
                self.accounts_total()
            )));
        }
        if load.tps == 0 {
            return Err(BenchError::config("tps must be positive"));
        }
        // The deployment always waits on a receipt bounded by this latency.
        if load.expected_latency.is_zero() {
            return Err(BenchError::config("expected latency must be non-zero"));
        }
        Ok(())
    }

    /// Number of accounts across all workers, the size of one round of batches.
    pub const fn accounts_total(&self) -> u64 {
        (self.load.threads * self.load.thread_accounts) as u64
    }

    /// Rounds the load target so every worker serves the same number of whole
    /// batches, updating `load.transactions` in place.
    pub fn normalize_target(&mut self) -> TargetAdjustment {
        let adjustment = TargetAdjustment::new(self.load.transactions, self.accounts_total());
        self.load.transactions = adjustment.normalized;
        adjustment
    }

    pub const fn batches_per_worker(&self) -> u64 {
        self.load.transactions / self.accounts_total()
    }
}

/// Result of rounding the requested transaction count to whole batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetAdjustment {
    pub requested: u64,
    pub normalized: u64,
}

impl TargetAdjustment {
    /// Rounds `requested` down to a multiple of `per_round`. A request smaller
    /// than one round normalizes to zero, which load validation rejects.
    pub const fn new(requested: u64, per_round: u64) -> Self {
        Self { requested, normalized: requested - requested % per_round }
    }

    /// Transactions dropped by rounding, always below one round.
    pub const fn delta(&self) -> u64 {
        self.requested - self.normalized
    }

    pub const fn is_adjusted(&self) -> bool {
        self.requested != self.normalized
    }
}

/// Serde adapter for human readable durations ("10s", "1m 30s").
pub(crate) mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }
}
