use std::sync::Arc;

use alloy_primitives::{Address, B256, Bytes};
use tracing::{debug, error, info, warn};

use crate::{
    accounts::{AccountSet, TxOptions},
    contract::{ADD_LOAD_VALUE, add_calldata},
    error::BenchError,
    progress::ProgressTracker,
    rate::RateLimiter,
    receipt::ReceiptVerifier,
    rpc::ChainClient,
};

/// Summary of one worker's run.
#[derive(Debug)]
pub struct WorkerReport {
    pub worker: usize,
    pub batches_issued: u64,
    pub issued: u64,
    pub receipt_failures: u64,
    /// Set when the worker stopped before issuing all of its batches.
    pub error: Option<BenchError>,
}

impl WorkerReport {
    const fn new(worker: usize) -> Self {
        Self { worker, batches_issued: 0, issued: 0, receipt_failures: 0, error: None }
    }

    pub const fn stopped_early(&self) -> bool {
        self.error.is_some()
    }
}

/// What every worker issues, identical across workers.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub contract: Address,
    /// Batches per worker; each batch is one transaction per account.
    pub batches: u64,
    pub opts: TxOptions,
}

/// Issues batches of contract calls from its own accounts over its own
/// connection. Only the rate limiter and progress tracker are shared.
pub struct Worker<C> {
    id: usize,
    client: C,
    accounts: AccountSet,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressTracker>,
    settings: WorkerSettings,
    verifier: Option<ReceiptVerifier>,
}

impl<C: ChainClient> Worker<C> {
    pub fn new(
        id: usize,
        client: C,
        accounts: AccountSet,
        limiter: Arc<RateLimiter>,
        progress: Arc<ProgressTracker>,
        settings: WorkerSettings,
    ) -> Self {
        Self { id, client, accounts, limiter, progress, settings, verifier: None }
    }

    /// Verify every transaction of a batch once the batch is issued.
    pub fn with_receipt_checks(mut self, verifier: ReceiptVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Runs all batches. A submission error ends the worker; receipt failures
    /// are counted and the next batch proceeds.
    pub async fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::new(self.id);
        let calldata = add_calldata(ADD_LOAD_VALUE);
        let mut pending = Vec::with_capacity(self.accounts.len());

        info!(
            worker = self.id,
            endpoint = self.client.endpoint(),
            accounts = self.accounts.len(),
            batches = self.settings.batches,
            "Worker started"
        );

        for batch in 0..self.settings.batches {
            pending.clear();
            for index in 0..self.accounts.len() {
                if let Err(e) = self.limiter.acquire().await {
                    report.error = Some(e);
                    return report;
                }
                match self.issue(index, &calldata).await {
                    Ok(hash) => pending.push(hash),
                    Err(e) => {
                        error!(
                            worker = self.id,
                            batch,
                            account = index,
                            error = %e,
                            "Submit failed, stopping worker"
                        );
                        report.error = Some(e);
                        return report;
                    }
                }
                report.issued += 1;
            }
            report.batches_issued += 1;
            debug!(worker = self.id, batch, "Batch issued");

            if let Some(verifier) = &self.verifier {
                for hash in &pending {
                    if let Err(e) = verifier.check(&self.client, *hash).await.into_result(*hash) {
                        warn!(worker = self.id, batch, error = %e, "Receipt check failed");
                        report.receipt_failures += 1;
                    }
                }
            }
        }

        info!(
            worker = self.id,
            issued = report.issued,
            receipt_failures = report.receipt_failures,
            "Worker finished"
        );
        report
    }

    async fn issue(&mut self, index: usize, calldata: &Bytes) -> Result<B256, BenchError> {
        let nonce = self.accounts.nonce(index);
        let submit_err = |e: anyhow::Error| BenchError::Submit { nonce, reason: format!("{e:#}") };

        let tx = self
            .accounts
            .sign_call(index, self.settings.contract, calldata.clone(), &self.settings.opts)
            .await
            .map_err(submit_err)?;
        let hash = self.client.submit_transaction(&tx).await.map_err(submit_err)?;

        self.progress.issued_increment();
        self.accounts.advance(index);
        Ok(hash)
    }
}
