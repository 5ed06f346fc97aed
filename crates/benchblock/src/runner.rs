//! Orchestration for the `load` and `collect` commands.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{
    accounts::{AccountSet, TxOptions, parse_private_key},
    collector::{Collector, CollectorReport, CollectorSettings},
    config::{ProgressMode, RunConfig, TargetAdjustment},
    contract::{ADD_PROBE_VALUE, add_calldata, deploy},
    endpoints::resolve_worker_urls,
    error::{BenchError, BenchResult},
    progress::ProgressTracker,
    rate::RateLimiter,
    receipt::ReceiptVerifier,
    report::RunReport,
    rpc::{AlloyChainClient, ChainClient, create_shared_client},
    store::BlockStore,
    worker::{Worker, WorkerSettings},
};

/// A load run with every connection open and the contract deployed. Nothing
/// has been issued yet.
pub struct LoadTest<C> {
    config: RunConfig,
    adjustment: TargetAdjustment,
    workers: Vec<(C, AccountSet)>,
    collector: Option<(C, BlockStore)>,
    contract: Address,
    opts: TxOptions,
    verifier: ReceiptVerifier,
}

impl<C: ChainClient + 'static> LoadTest<C> {
    /// Validates and normalizes `config`, connects one client and account set
    /// per worker and deploys the contract. `connect` opens a client for a
    /// resolved endpoint URL. Every error here aborts the run.
    pub async fn prepare<F>(mut config: RunConfig, connect: F) -> BenchResult<Self>
    where
        F: Fn(&str) -> BenchResult<C>,
    {
        config.validate_load()?;
        let adjustment = config.normalize_target();
        if adjustment.is_adjusted() {
            warn!(
                requested = adjustment.requested,
                normalized = adjustment.normalized,
                delta = adjustment.delta(),
                "Adjusted target number of transactions"
            );
        }

        let deployer = match &config.load.deploy_key {
            Some(key) => {
                parse_private_key(key).map_err(|e| BenchError::config(format!("{e:#}")))?
            }
            None => PrivateKeySigner::random(),
        };

        // Refuse an unusable block store before anything is deployed.
        let store = match config.db_source() {
            Some(source) => Some(BlockStore::open(&source, config.collect.db_share).await?),
            None => None,
        };

        let urls = resolve_worker_urls(&config, config.load.threads).await?;
        let mut workers = Vec::with_capacity(urls.len());
        for (worker, url) in urls.iter().enumerate() {
            let client = connect(url)?;
            let accounts = AccountSet::generate(&client, config.load.thread_accounts)
                .await
                .map_err(|e| {
                    BenchError::connection(format!("building account set on {url}: {e:#}"))
                })?;
            info!(worker, url = %url, accounts = accounts.len(), "Account set ready");
            workers.push((client, accounts));
        }

        let (first, _) =
            workers.first().ok_or_else(|| BenchError::config("threads must be at least 1"))?;
        let chain_id = first.chain_id().await.map_err(|e| {
            BenchError::connection(format!("eth_chainId on {}: {e:#}", first.endpoint()))
        })?;
        info!(chain_id, endpoint = first.endpoint(), "Connected to chain");

        let opts = TxOptions {
            chain_id,
            gas_limit: config.load.gas_limit,
            gas_price: u128::from(config.load.gas_price),
            private_for: config.load.private_for.clone(),
        };
        let verifier = ReceiptVerifier::new(config.client.retries, config.load.expected_latency);
        let contract =
            deploy(first, deployer, &opts, config.load.deploy_gas_limit, &verifier).await?;

        let collector = match (store, urls.first()) {
            (Some(store), Some(url)) => Some((connect(url)?, store)),
            _ => None,
        };

        Ok(Self { config, adjustment, workers, collector, contract, opts, verifier })
    }

    pub const fn contract(&self) -> Address {
        self.contract
    }

    pub const fn adjustment(&self) -> TargetAdjustment {
        self.adjustment
    }

    /// Runs every worker and the collector, if attached, to completion.
    pub async fn run(self) -> BenchResult<RunReport> {
        let Self { config, adjustment, workers, collector, contract, opts, verifier } = self;

        let mined_mode = if collector.is_some() { config.progress } else { ProgressMode::None };
        let progress = Arc::new(ProgressTracker::new(
            Some(config.load.transactions),
            config.progress,
            mined_mode,
        ));

        let collector_handle = match collector {
            Some((client, store)) => {
                let settings = collector_settings(&config);
                let mut collector =
                    Collector::new(client, store, Arc::clone(&progress), settings);
                // Read the head before the first submission.
                collector.init().await;
                Some(tokio::spawn(collector.run()))
            }
            None => None,
        };

        let limiter = Arc::new(RateLimiter::per_second(config.load.tps)?);
        let batches = config.batches_per_worker();
        let settings = WorkerSettings { contract, batches, opts };
        let handles: Vec<_> = workers
            .into_iter()
            .enumerate()
            .map(|(id, (client, accounts))| {
                let mut worker = Worker::new(
                    id,
                    client,
                    accounts,
                    Arc::clone(&limiter),
                    Arc::clone(&progress),
                    settings.clone(),
                );
                if config.load.check_receipts {
                    worker = worker.with_receipt_checks(verifier.clone());
                }
                tokio::spawn(worker.run())
            })
            .collect();
        info!(
            workers = handles.len(),
            batches,
            tps = config.load.tps,
            target = config.load.transactions,
            "Load running"
        );

        let mut report = RunReport {
            adjustment: Some(adjustment),
            contract: Some(contract),
            ..Default::default()
        };
        for handle in handles {
            match handle.await {
                Ok(worker) => report.workers.push(worker),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        if let Some(handle) = collector_handle {
            let (collector, interrupted) = wait_for_collector(handle).await;
            report.collector = collector;
            report.interrupted = interrupted;
        }
        progress.finish();
        Ok(report)
    }

    /// Diagnostic: issues a single `add` call from the first account of the
    /// first worker and waits for its receipt.
    pub async fn run_one(self) -> BenchResult<B256> {
        let Self { config, workers, contract, opts, .. } = self;
        let (client, mut accounts) = workers
            .into_iter()
            .next()
            .ok_or_else(|| BenchError::config("threads must be at least 1"))?;

        let nonce = accounts
            .refresh_nonce(&client, 0)
            .await
            .map_err(|e| BenchError::connection(format!("{e:#}")))?;
        let submit_err = |e: anyhow::Error| BenchError::Submit { nonce, reason: format!("{e:#}") };
        let tx = accounts
            .sign_call(0, contract, add_calldata(ADD_PROBE_VALUE), &opts)
            .await
            .map_err(submit_err)?;
        let hash = client.submit_transaction(&tx).await.map_err(submit_err)?;
        info!(tx_hash = %hash, from = %tx.from, nonce, "Probe transaction submitted");

        ReceiptVerifier::new(config.client.retries, config.client.timeout)
            .check(&client, hash)
            .await
            .into_result(hash)?;
        info!(tx_hash = %hash, "Probe transaction mined");
        Ok(hash)
    }
}

/// Runs only the collector against the first endpoint.
pub async fn run_collection<C, F>(config: RunConfig, connect: F) -> BenchResult<RunReport>
where
    C: ChainClient + 'static,
    F: Fn(&str) -> BenchResult<C>,
{
    config.validate_endpoint()?;
    let source = config.db_source().ok_or_else(|| {
        BenchError::config("a db source is required to collect (use :memory: to only count)")
    })?;
    let store = BlockStore::open(&source, config.collect.db_share).await?;

    let url = resolve_worker_urls(&config, 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| BenchError::config("no endpoint to collect from"))?;
    let client = connect(&url)?;

    let progress = Arc::new(ProgressTracker::new(
        config.collect.transactions,
        ProgressMode::None,
        config.progress,
    ));
    let collector =
        Collector::new(client, store, Arc::clone(&progress), collector_settings(&config));
    let (collector, interrupted) = wait_for_collector(tokio::spawn(collector.run())).await;
    progress.finish();

    Ok(RunReport { collector, interrupted, ..Default::default() })
}

/// `load` against real nodes.
pub async fn run_load_test(config: RunConfig) -> BenchResult<RunReport> {
    let connect = alloy_connector(&config)?;
    LoadTest::prepare(config, connect).await?.run().await
}

/// `load --one` against real nodes.
pub async fn run_single_transaction(config: RunConfig) -> BenchResult<B256> {
    let connect = alloy_connector(&config)?;
    LoadTest::prepare(config, connect).await?.run_one().await
}

/// `collect` against a real node.
pub async fn run_collect(config: RunConfig) -> BenchResult<RunReport> {
    let connect = alloy_connector(&config)?;
    run_collection(config, connect).await
}

fn alloy_connector(
    config: &RunConfig,
) -> BenchResult<impl Fn(&str) -> BenchResult<AlloyChainClient>> {
    let http = create_shared_client(config.client.timeout)
        .map_err(|e| BenchError::connection(format!("{e:#}")))?;
    Ok(move |url: &str| {
        AlloyChainClient::new(http.clone(), url)
            .map_err(|e| BenchError::connection(format!("{e:#}")))
    })
}

fn collector_settings(config: &RunConfig) -> CollectorSettings {
    CollectorSettings {
        start_block: config.collect.start_block,
        end_block: config.collect.end_block,
        interval: config.collect.interval,
        retries: config.client.retries,
    }
}

/// Waits for the collector, giving up on Ctrl-C. Returns the report, if any,
/// and whether the wait was interrupted.
async fn wait_for_collector(
    mut handle: JoinHandle<CollectorReport>,
) -> (Option<CollectorReport>, bool) {
    tokio::select! {
        joined = &mut handle => match joined {
            Ok(report) => (Some(report), false),
            Err(e) => {
                error!(error = %e, "Collector task failed");
                (None, false)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping collector");
            handle.abort();
            (None, true)
        }
    }
}
