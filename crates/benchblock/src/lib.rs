//! Benchblock - transaction load generator for EVM JSON-RPC networks.
//!
//! A load run deploys a small get/set/add contract, then spreads `add`
//! transactions over a pool of workers, each owning a handful of generated
//! accounts and sharing one rate limiter. An optional collector follows the
//! chain head and records per block statistics in SQLite until every issued
//! transaction has been mined.

pub mod accounts;
pub mod backoff;
pub mod cli;
pub mod collector;
pub mod config;
pub mod contract;
pub mod endpoints;
pub mod error;
pub mod progress;
pub mod rate;
pub mod receipt;
pub mod report;
pub mod rpc;
pub mod runner;
pub mod store;
pub mod worker;

pub use cli::{Cli, Command, LogFormat};
pub use collector::{CollectorReport, CollectorState};
pub use config::{ProgressMode, RunConfig, TargetAdjustment};
pub use error::{BenchError, BenchResult};
pub use report::RunReport;
pub use rpc::{AlloyChainClient, BlockRecord, ChainClient, ReceiptStatus, SignedTx};
pub use runner::{LoadTest, run_collect, run_collection, run_load_test, run_single_transaction};
pub use store::{BlockStore, MEMORY_SOURCE};
