//! JSON-RPC capability surface used by the load generator and collector.
//!
//! Everything above this module talks to a [`ChainClient`], which keeps the
//! workers and collector testable without a node.

use std::time::Duration;

use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, B256, Bytes};
use alloy_provider::{Provider as _, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::BlockNumberOrTag;
use alloy_transport_http::Http;
use anyhow::{Context, Result};
use async_trait::async_trait;

/// Transaction signed locally and ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone)]
pub struct SignedTx {
    pub from: Address,
    pub nonce: u64,
    pub hash: B256,
    pub raw: Bytes,
    /// Recipients for privacy enabled networks. Empty for public transactions.
    pub private_for: Vec<String>,
}

/// Metadata persisted for every collected block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub number: u64,
    /// Header timestamp exactly as reported by the node.
    pub timestamp: u64,
    pub size: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: usize,
    pub extra_data: Bytes,
}

/// Terminal state of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub success: bool,
    pub contract_address: Option<Address>,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// URL this client is connected to, for logging.
    fn endpoint(&self) -> &str;

    async fn chain_id(&self) -> Result<u64>;

    async fn block_number(&self) -> Result<u64>;

    /// Returns `None` when the node does not have the block yet.
    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>>;

    async fn pending_nonce(&self, address: Address) -> Result<u64>;

    async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256>;

    /// Returns `None` while the transaction is not mined.
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for std::sync::Arc<T> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    async fn chain_id(&self) -> Result<u64> {
        (**self).chain_id().await
    }

    async fn block_number(&self) -> Result<u64> {
        (**self).block_number().await
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>> {
        (**self).block_by_number(number).await
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        (**self).pending_nonce(address).await
    }

    async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256> {
        (**self).submit_transaction(tx).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>> {
        (**self).transaction_receipt(hash).await
    }
}

/// Creates a shared HTTP client. Every request is bounded by `timeout`.
pub fn create_shared_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// [`ChainClient`] backed by an alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct AlloyChainClient {
    url: String,
    provider: RootProvider,
}

impl AlloyChainClient {
    pub fn new(http_client: reqwest::Client, rpc_url: &str) -> Result<Self> {
        let url: url::Url = rpc_url.parse().with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;
        let http = Http::with_client(http_client, url);
        let rpc_client = RpcClient::new(http, false);
        Ok(Self { url: rpc_url.to_string(), provider: RootProvider::new(rpc_client) })
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider.get_chain_id().await.context("eth_chainId")
    }

    async fn block_number(&self) -> Result<u64> {
        self.provider.get_block_number().await.context("eth_blockNumber")
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockRecord>> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await
            .with_context(|| format!("eth_getBlockByNumber {number}"))?;

        Ok(block.map(|block| BlockRecord {
            number: block.header.number,
            timestamp: block.header.timestamp,
            size: block.header.size.map(|s| s.saturating_to::<u64>()).unwrap_or_default(),
            gas_used: block.header.gas_used,
            gas_limit: block.header.gas_limit,
            tx_count: block.transactions.len(),
            extra_data: block.header.extra_data.clone(),
        }))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(address)
            .block_id(BlockNumberOrTag::Pending.into())
            .await
            .context("eth_getTransactionCount")
    }

    async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256> {
        if tx.private_for.is_empty() {
            let pending = self
                .provider
                .send_raw_transaction(&tx.raw)
                .await
                .context("eth_sendRawTransaction")?;
            return Ok(*pending.tx_hash());
        }

        let args = serde_json::json!({ "privateFor": tx.private_for });
        self.provider
            .raw_request::<_, B256>("eth_sendRawPrivateTransaction".into(), (tx.raw.clone(), args))
            .await
            .context("eth_sendRawPrivateTransaction")
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<ReceiptStatus>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .context("eth_getTransactionReceipt")?;

        Ok(receipt.map(|r| ReceiptStatus {
            success: r.status(),
            contract_address: r.contract_address(),
        }))
    }
}
