//! Chain head poller that stores block metadata and decides run completion.

use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::{
    backoff::{Backoff, fetch_block_with_retry},
    error::BenchError,
    progress::ProgressTracker,
    rpc::ChainClient,
    store::BlockStore,
};

#[derive(Debug)]
pub enum CollectorState {
    Initializing,
    /// Waiting for blocks after `last`, the most recently processed block.
    Polling { last: u64 },
    Complete { last: u64 },
    Failed(BenchError),
}

impl CollectorState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed(_))
    }

    pub const fn last_block(&self) -> Option<u64> {
        match self {
            Self::Polling { last } | Self::Complete { last } => Some(*last),
            _ => None,
        }
    }
}

/// Where and how often to collect.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Blocks after this one are collected. Defaults to the head at startup.
    pub start_block: Option<u64>,
    /// Collection completes once a block past this one is processed.
    pub end_block: Option<u64>,
    pub interval: Duration,
    pub retries: u32,
}

#[derive(Debug)]
pub struct CollectorReport {
    pub state: CollectorState,
    pub blocks_stored: u64,
    pub store_failures: u64,
    /// Transactions counted in processed blocks.
    pub mined: u64,
}

pub struct Collector<C> {
    client: C,
    store: BlockStore,
    progress: Arc<ProgressTracker>,
    settings: CollectorSettings,
    backoff: Backoff,
    state: CollectorState,
    blocks_stored: u64,
    store_failures: u64,
    mined: u64,
}

impl<C: ChainClient> Collector<C> {
    pub fn new(
        client: C,
        store: BlockStore,
        progress: Arc<ProgressTracker>,
        settings: CollectorSettings,
    ) -> Self {
        Self {
            client,
            store,
            progress,
            settings,
            backoff: Backoff::default(),
            state: CollectorState::Initializing,
            blocks_stored: 0,
            store_failures: 0,
            mined: 0,
        }
    }

    pub const fn state(&self) -> &CollectorState {
        &self.state
    }

    /// Picks the block collection starts after. Transactions mined between
    /// the head query and the first worker submission are not an issue, but a
    /// transaction issued just before the head query can be missed.
    pub async fn init(&mut self) -> &CollectorState {
        if !matches!(self.state, CollectorState::Initializing) {
            return &self.state;
        }
        let last = match self.settings.start_block {
            Some(start) => start,
            None => match self.client.block_number().await {
                Ok(head) => head,
                Err(e) => return self.fail(0, e),
            },
        };
        info!(start = last, endpoint = self.client.endpoint(), "Collector polling");
        self.state = CollectorState::Polling { last };
        &self.state
    }

    /// Processes every block between the last processed block and the
    /// current head.
    pub async fn poll_once(&mut self) -> &CollectorState {
        let CollectorState::Polling { last } = self.state else {
            return &self.state;
        };

        let head = match self.client.block_number().await {
            Ok(head) => head,
            Err(e) => return self.fail(last + 1, e),
        };
        if head <= last {
            if head < last {
                warn!(head, last, "Chain head went backwards, possible reorg");
            }
            debug!(head, "No new blocks");
            return &self.state;
        }

        for number in last + 1..=head {
            let block = match fetch_block_with_retry(
                &self.client,
                number,
                self.settings.retries,
                &self.backoff,
            )
            .await
            {
                Ok(block) => block,
                Err(e) => return self.fail(number, e),
            };

            match self.store.insert(&block).await {
                Ok(()) => self.blocks_stored += 1,
                Err(e) => {
                    warn!(block = number, error = %e, "Failed to store block");
                    self.store_failures += 1;
                }
            }
            self.state = CollectorState::Polling { last: number };
            self.mined += block.tx_count as u64;

            let mined_target = self.progress.mined_complete(block.tx_count as u64);
            let past_end = self.settings.end_block.is_some_and(|end| number > end);
            if mined_target || past_end {
                info!(
                    block = number,
                    mined = ?self.progress.current_mined(),
                    "Collection complete"
                );
                self.state = CollectorState::Complete { last: number };
                return &self.state;
            }
        }
        &self.state
    }

    /// Runs until complete or failed. The first poll happens one interval
    /// after initialisation.
    pub async fn run(mut self) -> CollectorReport {
        self.init().await;

        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !self.state.is_terminal() {
            ticker.tick().await;
            self.poll_once().await;
        }

        CollectorReport {
            state: self.state,
            blocks_stored: self.blocks_stored,
            store_failures: self.store_failures,
            mined: self.mined,
        }
    }

    fn fail(&mut self, block: u64, e: anyhow::Error) -> &CollectorState {
        error!(block, error = %e, "Collector stopped");
        self.state =
            CollectorState::Failed(BenchError::Collection { block, reason: format!("{e:#}") });
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
    };

    use alloy_primitives::{Address, B256, Bytes};
    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::ProgressMode,
        rpc::{BlockRecord, ReceiptStatus, SignedTx},
        store::MEMORY_SOURCE,
    };

    #[derive(Default)]
    struct ChainState {
        head: u64,
        /// Added to the head after every head query.
        growth: u64,
        tx_counts: HashMap<u64, usize>,
        missing: HashSet<u64>,
        head_error: bool,
    }

    #[derive(Default)]
    struct MockChain {
        state: Mutex<ChainState>,
    }

    impl MockChain {
        fn at(head: u64) -> Arc<Self> {
            let chain = Self::default();
            chain.state.lock().unwrap().head = head;
            Arc::new(chain)
        }

        fn set_head(&self, head: u64) {
            self.state.lock().unwrap().head = head;
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn endpoint(&self) -> &str {
            "mock"
        }

        async fn chain_id(&self) -> Result<u64> {
            Ok(1337)
        }

        async fn block_number(&self) -> Result<u64> {
            let mut state = self.state.lock().unwrap();
            if state.head_error {
                bail!("connection reset");
            }
            let head = state.head;
            state.head += state.growth;
            Ok(head)
        }

        async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>> {
            let state = self.state.lock().unwrap();
            if state.missing.contains(&number) || number > state.head {
                return Ok(None);
            }
            Ok(Some(BlockRecord {
                number,
                timestamp: 1_000 + number,
                size: 512,
                gas_used: 0,
                gas_limit: 30_000_000,
                tx_count: state.tx_counts.get(&number).copied().unwrap_or(1),
                extra_data: Bytes::new(),
            }))
        }

        async fn pending_nonce(&self, _address: Address) -> Result<u64> {
            Ok(0)
        }

        async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256> {
            Ok(tx.hash)
        }

        async fn transaction_receipt(&self, _hash: B256) -> Result<Option<ReceiptStatus>> {
            Ok(None)
        }
    }

    fn settings() -> CollectorSettings {
        CollectorSettings {
            start_block: None,
            end_block: None,
            interval: Duration::from_secs(1),
            retries: 2,
        }
    }

    async fn collector(
        chain: &Arc<MockChain>,
        target: Option<u64>,
        settings: CollectorSettings,
    ) -> (Collector<Arc<MockChain>>, BlockStore) {
        let store = BlockStore::open(MEMORY_SOURCE, false).await.unwrap();
        let progress =
            Arc::new(ProgressTracker::new(target, ProgressMode::None, ProgressMode::Counting));
        (Collector::new(Arc::clone(chain), store.clone(), progress, settings), store)
    }

    #[tokio::test]
    async fn unset_start_without_new_blocks_inserts_nothing() {
        let chain = MockChain::at(5);
        let (mut collector, store) = collector(&chain, Some(10), settings()).await;

        assert_eq!(collector.init().await.last_block(), Some(5));
        assert_eq!(collector.poll_once().await.last_block(), Some(5));
        assert!(!collector.state().is_terminal());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn new_blocks_are_stored_until_target_is_mined() {
        let chain = MockChain::at(5);
        let (mut collector, store) = collector(&chain, Some(5), settings()).await;
        collector.init().await;

        chain.set_head(6);
        {
            let mut state = chain.state.lock().unwrap();
            state.tx_counts.extend([(6, 2), (7, 2), (8, 2)]);
        }
        assert_eq!(collector.poll_once().await.last_block(), Some(6));

        chain.set_head(9);
        let state = collector.poll_once().await;
        assert!(matches!(state, CollectorState::Complete { last: 8 }));
        assert_eq!(store.block_numbers().await.unwrap(), vec![6, 7, 8]);
    }

    #[tokio::test]
    async fn explicit_start_block_is_the_baseline() {
        let chain = MockChain::at(4);
        let settings = CollectorSettings { start_block: Some(2), ..settings() };
        let (mut collector, store) = collector(&chain, None, settings).await;

        collector.init().await;
        assert_eq!(collector.poll_once().await.last_block(), Some(4));
        assert_eq!(store.block_numbers().await.unwrap(), vec![3, 4]);
    }

    #[tokio::test]
    async fn passing_end_block_completes() {
        let chain = MockChain::at(10);
        let settings = CollectorSettings { start_block: Some(0), end_block: Some(3), ..settings() };
        let (mut collector, store) = collector(&chain, None, settings).await;

        collector.init().await;
        assert!(matches!(collector.poll_once().await, CollectorState::Complete { last: 4 }));
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn head_going_backwards_is_a_no_op() {
        let chain = MockChain::at(8);
        let (mut collector, store) = collector(&chain, None, settings()).await;
        collector.init().await;

        chain.set_head(6);
        assert_eq!(collector.poll_once().await.last_block(), Some(8));
        assert_eq!(store.count().await.unwrap(), 0);

        chain.set_head(9);
        assert_eq!(collector.poll_once().await.last_block(), Some(9));
        assert_eq!(store.block_numbers().await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn unavailable_block_fails_the_collector() {
        let chain = MockChain::at(1);
        let (mut collector, store) = collector(&chain, None, settings()).await;
        collector.init().await;

        chain.set_head(3);
        chain.state.lock().unwrap().missing.insert(3);
        let state = collector.poll_once().await;
        assert!(matches!(state, CollectorState::Failed(BenchError::Collection { block: 3, .. })));
        assert_eq!(store.block_numbers().await.unwrap(), vec![2]);

        // Terminal states are sticky.
        chain.state.lock().unwrap().missing.clear();
        assert!(collector.poll_once().await.is_terminal());
    }

    #[tokio::test]
    async fn head_query_error_fails_the_collector() {
        let chain = MockChain::at(1);
        let (mut collector, _store) = collector(&chain, None, settings()).await;
        collector.init().await;

        chain.state.lock().unwrap().head_error = true;
        assert!(matches!(collector.poll_once().await, CollectorState::Failed(_)));
    }

    #[tokio::test]
    async fn store_failures_are_skipped() {
        let chain = MockChain::at(0);
        let (mut collector, store) = collector(&chain, None, settings()).await;
        collector.init().await;

        let existing = chain.block_by_number(0).await.unwrap().unwrap();
        store.insert(&BlockRecord { number: 2, ..existing }).await.unwrap();

        chain.set_head(3);
        assert_eq!(collector.poll_once().await.last_block(), Some(3));
        assert_eq!(store.block_numbers().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(collector.store_failures, 1);
        assert_eq!(collector.blocks_stored, 2);
    }

    #[tokio::test]
    async fn run_polls_on_interval_until_complete() {
        let chain = MockChain::at(0);
        chain.state.lock().unwrap().growth = 1;
        let settings = CollectorSettings { interval: Duration::from_millis(20), ..settings() };
        let (collector, store) = collector(&chain, Some(3), settings).await;

        let start = Instant::now();
        let report = collector.run().await;
        assert!(matches!(report.state, CollectorState::Complete { last: 3 }));
        assert_eq!(report.blocks_stored, 3);
        assert_eq!(report.mined, 3);
        assert_eq!(store.count().await.unwrap(), 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
