use std::time::Duration;

use alloy_primitives::B256;
use tracing::debug;

use crate::{
    backoff::Backoff,
    error::BenchError,
    rpc::{ChainClient, ReceiptStatus},
};

/// Outcome of waiting for a transaction receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    /// Mined with a success status.
    Success(ReceiptStatus),
    /// Mined with a failure status.
    Failed,
    /// No receipt within the retry budget.
    TimedOut,
}

impl ReceiptOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Converts a non-success outcome into a [`BenchError::Receipt`].
    pub fn into_result(self, hash: B256) -> Result<ReceiptStatus, BenchError> {
        match self {
            Self::Success(status) => Ok(status),
            Self::Failed => {
                Err(BenchError::Receipt(format!("transaction {hash} failed on chain")))
            }
            Self::TimedOut => {
                Err(BenchError::Receipt(format!("no receipt for transaction {hash}")))
            }
        }
    }
}

/// Polls for a receipt with a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct ReceiptVerifier {
    retries: u32,
    attempt_timeout: Duration,
    backoff: Backoff,
}

impl ReceiptVerifier {
    /// Each attempt is bounded by `expected_latency`.
    pub fn new(retries: u32, expected_latency: Duration) -> Self {
        Self { retries, attempt_timeout: expected_latency, backoff: Backoff::default() }
    }

    pub async fn check<C: ChainClient + ?Sized>(&self, client: &C, hash: B256) -> ReceiptOutcome {
        for attempt in 0..self.retries as usize {
            match tokio::time::timeout(self.attempt_timeout, client.transaction_receipt(hash)).await
            {
                Ok(Ok(Some(status))) if status.success => return ReceiptOutcome::Success(status),
                Ok(Ok(Some(_))) => return ReceiptOutcome::Failed,
                Ok(Ok(None)) => debug!(tx_hash = %hash, attempt, "Receipt not available yet"),
                Ok(Err(e)) => debug!(tx_hash = %hash, attempt, error = %e, "Receipt lookup failed"),
                Err(_) => debug!(tx_hash = %hash, attempt, "Receipt lookup timed out"),
            }
            if attempt + 1 < self.retries as usize {
                self.backoff.sleep(attempt).await;
            }
        }
        ReceiptOutcome::TimedOut
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use alloy_primitives::{Address, B256};
    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use super::*;
    use crate::rpc::{BlockRecord, SignedTx};

    /// Returns no receipt for the first `pending_polls` calls, then `status`.
    struct ReceiptClient {
        calls: Arc<AtomicU32>,
        pending_polls: u32,
        status: Option<bool>,
        fail_rpc: bool,
    }

    impl ReceiptClient {
        fn new(pending_polls: u32, status: Option<bool>) -> Self {
            Self { calls: Arc::new(AtomicU32::new(0)), pending_polls, status, fail_rpc: false }
        }
    }

    #[async_trait]
    impl ChainClient for ReceiptClient {
        fn endpoint(&self) -> &str {
            "mock"
        }

        async fn chain_id(&self) -> Result<u64> {
            Ok(1)
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(0)
        }

        async fn block_by_number(&self, _number: u64) -> Result<Option<BlockRecord>> {
            Ok(None)
        }

        async fn pending_nonce(&self, _address: Address) -> Result<u64> {
            Ok(0)
        }

        async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256> {
            Ok(tx.hash)
        }

        async fn transaction_receipt(&self, _hash: B256) -> Result<Option<ReceiptStatus>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_rpc {
                bail!("connection refused");
            }
            if n < self.pending_polls {
                return Ok(None);
            }
            Ok(self.status.map(|success| ReceiptStatus { success, contract_address: None }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_pending_polls() {
        let client = ReceiptClient::new(3, Some(true));
        let verifier = ReceiptVerifier::new(10, Duration::from_secs(1));
        let outcome = verifier.check(&client, B256::ZERO).await;
        assert!(outcome.is_success());
        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_status_stops_immediately() {
        let client = ReceiptClient::new(0, Some(false));
        let verifier = ReceiptVerifier::new(10, Duration::from_secs(1));
        assert_eq!(verifier.check(&client, B256::ZERO).await, ReceiptOutcome::Failed);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_retries_times_out() {
        let client = ReceiptClient::new(u32::MAX, None);
        let verifier = ReceiptVerifier::new(5, Duration::from_secs(1));
        assert_eq!(verifier.check(&client, B256::ZERO).await, ReceiptOutcome::TimedOut);
        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_errors_are_retried() {
        let mut client = ReceiptClient::new(0, Some(true));
        client.fail_rpc = true;
        let verifier = ReceiptVerifier::new(3, Duration::from_secs(1));
        let outcome = verifier.check(&client, B256::ZERO).await;
        assert_eq!(outcome, ReceiptOutcome::TimedOut);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert!(outcome.into_result(B256::ZERO).is_err());
    }
}
