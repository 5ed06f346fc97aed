//! End to end load runs against an in-process chain.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{Address, B256, Bytes};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use benchblock::{
    BlockRecord, BlockStore, ChainClient, CollectorState, LoadTest, MEMORY_SOURCE, ProgressMode,
    ReceiptStatus, RunConfig, SignedTx,
};

#[derive(Default)]
struct Ledger {
    pending: Vec<B256>,
    mined: HashMap<B256, u64>,
    blocks: BTreeMap<u64, usize>,
    submitted: Vec<(Address, u64)>,
}

impl Ledger {
    /// Seals everything pending into a new block.
    fn seal(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let number = self.head() + 1;
        self.blocks.insert(number, self.pending.len());
        for hash in self.pending.drain(..) {
            self.mined.insert(hash, number);
        }
    }

    fn head(&self) -> u64 {
        self.blocks.keys().next_back().copied().unwrap_or(0)
    }
}

/// Accepts every transaction and seals a block whenever the head or a
/// receipt is queried.
#[derive(Default)]
struct SimulatedChain {
    ledger: Mutex<Ledger>,
}

#[async_trait]
impl ChainClient for SimulatedChain {
    fn endpoint(&self) -> &str {
        "sim"
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(10)
    }

    async fn block_number(&self) -> Result<u64> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.seal();
        Ok(ledger.head())
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.blocks.get(&number).map(|&tx_count| BlockRecord {
            number,
            timestamp: 1_700_000_000 + number,
            size: 600 + 100 * tx_count as u64,
            gas_used: 26_000 * tx_count as u64,
            gas_limit: 30_000_000,
            tx_count,
            extra_data: Bytes::from_static(b"sim"),
        }))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        let ledger = self.ledger.lock().unwrap();
        Ok(ledger.submitted.iter().filter(|(from, _)| *from == address).count() as u64)
    }

    async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256> {
        let mut ledger = self.ledger.lock().unwrap();
        let expected = ledger.submitted.iter().filter(|(from, _)| *from == tx.from).count() as u64;
        if tx.nonce != expected {
            return Err(anyhow!("nonce too low: have {}, want {expected}", tx.nonce));
        }
        ledger.submitted.push((tx.from, tx.nonce));
        ledger.pending.push(tx.hash);
        Ok(tx.hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>> {
        let mut ledger = self.ledger.lock().unwrap();
        ledger.seal();
        Ok(ledger
            .mined
            .contains_key(&hash)
            .then_some(ReceiptStatus { success: true, contract_address: None }))
    }
}

fn config(db_source: &str) -> RunConfig {
    let mut config = RunConfig::default();
    config.endpoint.eth = Some("http://127.0.0.1:8545".to_string());
    config.load.transactions = 100;
    config.load.threads = 5;
    config.load.thread_accounts = 2;
    config.load.tps = 1_000;
    config.client.retries = 3;
    config.collect.db_source = Some(db_source.to_string());
    config.collect.interval = Duration::from_millis(20);
    config.progress = ProgressMode::None;
    config
}

#[tokio::test]
async fn load_run_is_collected_until_every_transaction_is_mined() {
    let chain = Arc::new(SimulatedChain::default());
    let load = LoadTest::prepare(config(MEMORY_SOURCE), |_| Ok(Arc::clone(&chain))).await.unwrap();
    assert!(!load.adjustment().is_adjusted());

    let report = load.run().await.unwrap();
    assert_eq!(report.workers.len(), 5);
    assert!(report.workers.iter().all(|w| w.batches_issued == 10 && w.issued == 20));
    assert_eq!(report.issued(), 100);
    assert_eq!(report.stopped_workers(), 0);
    assert_eq!(report.mined(), Some(100));
    let collector = report.collector.unwrap();
    assert!(matches!(collector.state, CollectorState::Complete { .. }));

    // The deployment plus ten consecutive nonces from each of ten accounts.
    let ledger = chain.ledger.lock().unwrap();
    assert_eq!(ledger.submitted.len(), 101);
    let mut per_account: HashMap<Address, Vec<u64>> = HashMap::new();
    for (from, nonce) in &ledger.submitted {
        per_account.entry(*from).or_default().push(*nonce);
    }
    let load_accounts: Vec<_> = per_account.values().filter(|n| n.len() > 1).collect();
    assert_eq!(load_accounts.len(), 10);
    assert!(load_accounts.iter().all(|nonces| **nonces == (0..10).collect::<Vec<u64>>()));
}

#[tokio::test]
async fn receipt_checked_run_persists_blocks_after_the_deployment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.db");
    let source = path.to_str().unwrap();

    let chain = Arc::new(SimulatedChain::default());
    let mut config = config(source);
    config.load.check_receipts = true;
    config.load.expected_latency = Duration::from_millis(200);

    let load = LoadTest::prepare(config, |_| Ok(Arc::clone(&chain))).await.unwrap();
    let report = load.run().await.unwrap();
    assert_eq!(report.receipt_failures(), 0);
    assert_eq!(report.mined(), Some(100));
    let collector = report.collector.unwrap();
    assert_eq!(collector.store_failures, 0);

    // A second run must not silently append to the same file.
    assert!(BlockStore::open(source, false).await.is_err());

    let store = BlockStore::open(source, true).await.unwrap();
    let numbers = store.block_numbers().await.unwrap();
    assert_eq!(numbers.len() as u64, collector.blocks_stored);
    // Block 1 holds only the deployment and predates the collector.
    assert!(numbers.iter().all(|n| *n > 1));
    assert_eq!(numbers.last().copied(), collector.state.last_block());
    store.close().await;
}
