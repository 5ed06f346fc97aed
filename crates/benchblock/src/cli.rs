//! Command line surface. Flags override values from `--config`, which override
//! the built in defaults.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{ProgressMode, RunConfig};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "benchblock", version)]
#[command(about = "Transaction load generator and block collector for EVM JSON-RPC networks")]
pub struct Cli {
    /// YAML configuration file
    #[arg(long, short = 'c', global = true, env = "BENCHBLOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format (text|json)
    #[arg(long, global = true, env = "BENCHBLOCK_LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,

    /// Default log filter, used when RUST_LOG is not set
    #[arg(long, global = true, env = "BENCHBLOCK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the get/set/add contract and issue load against it
    Load(LoadArgs),
    /// Collect block statistics without issuing load
    Collect(CollectArgs),
}

/// Options shared by both subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct CommonArgs {
    /// JSON-RPC endpoint. Worker i uses port + i unless --single-node is set
    #[arg(long, env = "BENCHBLOCK_ETH")]
    pub eth: Option<String>,

    /// static-nodes.json style list of nodes, instead of --eth
    #[arg(long, env = "BENCHBLOCK_STATIC_NODES")]
    pub static_nodes: Option<PathBuf>,

    /// Port for the first node. Defaults to the --eth port, or 8545 for static nodes
    #[arg(long, env = "BENCHBLOCK_BASE_PORT")]
    pub base_port: Option<u16>,

    /// Number of nodes to spread workers over. Defaults to the thread count
    #[arg(long, short = 'n', env = "BENCHBLOCK_NODES")]
    pub nodes: Option<usize>,

    /// Send everything to the first node
    #[arg(long, env = "BENCHBLOCK_SINGLE_NODE")]
    pub single_node: bool,

    /// Resolve hostnames to a single IP at startup
    #[arg(long, env = "BENCHBLOCK_RESOLVE_HOSTS", value_name = "BOOL")]
    pub resolve_hosts: Option<bool>,

    /// Timeout for each RPC request
    #[arg(long, env = "BENCHBLOCK_CLIENT_TIMEOUT", value_parser = humantime::parse_duration)]
    pub client_timeout: Option<Duration>,

    /// Attempts for receipt checks and block fetches
    #[arg(long, env = "BENCHBLOCK_RETRIES")]
    pub retries: Option<u32>,

    /// Progress display (none|counting|visual)
    #[arg(long, env = "BENCHBLOCK_PROGRESS")]
    pub progress: Option<ProgressMode>,

    /// SQLite data source for block statistics. :memory: counts without keeping results
    #[arg(long, env = "BENCHBLOCK_DBSOURCE")]
    pub dbsource: Option<String>,

    /// Allow appending to an existing database
    #[arg(long, env = "BENCHBLOCK_DBSHARE")]
    pub dbshare: bool,

    /// Collect blocks after this one. Defaults to the head at startup
    #[arg(long, env = "BENCHBLOCK_START_BLOCK")]
    pub start_block: Option<u64>,

    /// Stop collecting once a block past this one is stored
    #[arg(long, env = "BENCHBLOCK_END_BLOCK")]
    pub end_block: Option<u64>,

    /// Interval between head polls
    #[arg(long, env = "BENCHBLOCK_COLLECT_INTERVAL", value_parser = humantime::parse_duration)]
    pub collect_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct LoadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Target number of transactions, rounded down to whole batches
    #[arg(long, short = 't', env = "BENCHBLOCK_TRANSACTIONS")]
    pub transactions: Option<u64>,

    /// Number of workers, each with its own connection
    #[arg(long, env = "BENCHBLOCK_THREADS")]
    pub threads: Option<usize>,

    /// Accounts per worker
    #[arg(long, short = 'a', env = "BENCHBLOCK_THREAD_ACCOUNTS")]
    pub thread_accounts: Option<usize>,

    /// Aggregate issue rate across all workers
    #[arg(long, env = "BENCHBLOCK_TPS")]
    pub tps: Option<u32>,

    #[arg(long, env = "BENCHBLOCK_GAS_LIMIT")]
    pub gas_limit: Option<u64>,

    #[arg(long, env = "BENCHBLOCK_GAS_PRICE")]
    pub gas_price: Option<u64>,

    #[arg(long, env = "BENCHBLOCK_DEPLOY_GAS_LIMIT")]
    pub deploy_gas_limit: Option<u64>,

    /// Hex private key for the contract deployment. A fresh key when unset
    #[arg(long, env = "BENCHBLOCK_DEPLOY_KEY", hide_env_values = true)]
    pub deploy_key: Option<String>,

    /// Wait for every receipt in a batch before starting the next
    #[arg(long, short = 'r', env = "BENCHBLOCK_CHECK_RECEIPTS")]
    pub check_receipts: bool,

    /// Time a transaction is expected to take to mine
    #[arg(long, env = "BENCHBLOCK_EXPECTED_LATENCY", value_parser = humantime::parse_duration)]
    pub expected_latency: Option<Duration>,

    /// Recipient keys for privacy enabled networks
    #[arg(long, env = "BENCHBLOCK_PRIVATE_FOR", value_delimiter = ',')]
    pub private_for: Vec<String>,

    /// Issue a single transaction and report its outcome
    #[arg(long, short = 'o')]
    pub one: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct CollectArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Stop once this many transactions have been mined
    #[arg(long, short = 't', env = "BENCHBLOCK_TRANSACTIONS")]
    pub transactions: Option<u64>,
}

impl Cli {
    /// Builds the run configuration: defaults, then the config file, then flags.
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load_file(path)?,
            None => RunConfig::default(),
        };
        match &self.command {
            Command::Load(args) => args.apply(&mut config),
            Command::Collect(args) => args.apply(&mut config),
        }
        Ok(config)
    }
}

impl CommonArgs {
    fn apply(&self, config: &mut RunConfig) {
        let endpoint = &mut config.endpoint;
        if let Some(eth) = &self.eth {
            endpoint.eth = Some(eth.clone());
        }
        if let Some(path) = &self.static_nodes {
            endpoint.static_nodes = Some(path.clone());
        }
        endpoint.base_port = self.base_port.or(endpoint.base_port);
        endpoint.nodes = self.nodes.or(endpoint.nodes);
        endpoint.single_node |= self.single_node;
        if let Some(resolve) = self.resolve_hosts {
            endpoint.resolve_hosts = resolve;
        }

        if let Some(timeout) = self.client_timeout {
            config.client.timeout = timeout;
        }
        if let Some(retries) = self.retries {
            config.client.retries = retries;
        }
        if let Some(progress) = self.progress {
            config.progress = progress;
        }

        let collect = &mut config.collect;
        if let Some(source) = &self.dbsource {
            // An empty source on the command line disables collection.
            collect.db_source = (!source.is_empty()).then(|| source.clone());
        }
        collect.db_share |= self.dbshare;
        collect.start_block = self.start_block.or(collect.start_block);
        collect.end_block = self.end_block.or(collect.end_block);
        if let Some(interval) = self.collect_interval {
            collect.interval = interval;
        }
    }
}

impl LoadArgs {
    fn apply(&self, config: &mut RunConfig) {
        self.common.apply(config);
        let load = &mut config.load;
        if let Some(v) = self.transactions {
            load.transactions = v;
        }
        if let Some(v) = self.threads {
            load.threads = v;
        }
        if let Some(v) = self.thread_accounts {
            load.thread_accounts = v;
        }
        if let Some(v) = self.tps {
            load.tps = v;
        }
        if let Some(v) = self.gas_limit {
            load.gas_limit = v;
        }
        if let Some(v) = self.gas_price {
            load.gas_price = v;
        }
        if let Some(v) = self.deploy_gas_limit {
            load.deploy_gas_limit = v;
        }
        if let Some(key) = &self.deploy_key {
            load.deploy_key = Some(key.clone());
        }
        load.check_receipts |= self.check_receipts;
        if let Some(v) = self.expected_latency {
            load.expected_latency = v;
        }
        if !self.private_for.is_empty() {
            load.private_for = self.private_for.clone();
        }
        load.run_one |= self.one;
    }
}

impl CollectArgs {
    fn apply(&self, config: &mut RunConfig) {
        self.common.apply(config);
        config.collect.transactions = self.transactions.or(config.collect.transactions);
    }
}
