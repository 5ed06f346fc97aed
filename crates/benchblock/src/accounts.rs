use alloy_consensus::TxEnvelope;
use alloy_network::{
    Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder, eip2718::Encodable2718,
};
use alloy_primitives::{Address, Bytes, U256};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use tracing::debug;

use crate::rpc::{ChainClient, SignedTx};

/// Parameters applied to every transaction a worker signs.
#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    pub chain_id: u64,
    pub gas_limit: u64,
    /// Legacy gas price. Permissioned networks typically run at zero.
    pub gas_price: u128,
    pub private_for: Vec<String>,
}

struct Account {
    address: Address,
    wallet: EthereumWallet,
    nonce: u64,
}

/// Ephemeral signing identities owned by exactly one worker.
///
/// Keys are generated fresh each run so the nonces are ours to manage: the
/// pending nonce is read once when the set is created and afterwards only
/// advanced in memory after each successful submission. Methods that touch
/// nonces take `&mut self`, so sharing a set between tasks does not compile.
pub struct AccountSet {
    accounts: Vec<Account>,
}

impl std::fmt::Debug for AccountSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSet").field("addresses", &self.addresses()).finish()
    }
}

impl AccountSet {
    /// Generates `count` fresh keys and reads their pending nonces from `client`.
    pub async fn generate<C: ChainClient + ?Sized>(client: &C, count: usize) -> Result<Self> {
        let signers = (0..count).map(|_| PrivateKeySigner::random()).collect();
        Self::from_signers(client, signers).await
    }

    pub async fn from_signers<C: ChainClient + ?Sized>(
        client: &C,
        signers: Vec<PrivateKeySigner>,
    ) -> Result<Self> {
        let mut accounts = Vec::with_capacity(signers.len());
        for signer in signers {
            let address = signer.address();
            let nonce = client
                .pending_nonce(address)
                .await
                .with_context(|| format!("Failed to get pending nonce for {address}"))?;
            debug!(address = %address, nonce, endpoint = client.endpoint(), "Account initialised");
            accounts.push(Account { address, wallet: EthereumWallet::from(signer), nonce });
        }
        Ok(Self { accounts })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(|a| a.address).collect()
    }

    /// Nonce the next transaction from account `index` will use.
    pub fn nonce(&self, index: usize) -> u64 {
        self.accounts[index].nonce
    }

    /// Re-reads the pending nonce for one account. Only used outside batch
    /// issuance, by the single transaction diagnostic.
    pub async fn refresh_nonce<C: ChainClient + ?Sized>(
        &mut self,
        client: &C,
        index: usize,
    ) -> Result<u64> {
        let account = &mut self.accounts[index];
        account.nonce =
            client.pending_nonce(account.address).await.context("Failed to refresh nonce")?;
        Ok(account.nonce)
    }

    /// Signs a call from account `index` at its current nonce. The nonce is not
    /// advanced; call [`AccountSet::advance`] once the submission succeeds.
    pub async fn sign_call(
        &self,
        index: usize,
        to: Address,
        input: Bytes,
        opts: &TxOptions,
    ) -> Result<SignedTx> {
        let account = &self.accounts[index];
        let tx = TransactionRequest::default()
            .with_from(account.address)
            .with_to(to)
            .with_value(U256::ZERO)
            .with_input(input)
            .with_nonce(account.nonce)
            .with_chain_id(opts.chain_id)
            .with_gas_price(opts.gas_price)
            .with_gas_limit(opts.gas_limit);
        let mut signed = sign_request(&account.wallet, tx).await?;
        signed.private_for = opts.private_for.clone();
        Ok(signed)
    }

    pub fn advance(&mut self, index: usize) {
        self.accounts[index].nonce += 1;
    }
}

/// Signs a fully populated request with `wallet`.
pub(crate) async fn sign_request(
    wallet: &EthereumWallet,
    tx: TransactionRequest,
) -> Result<SignedTx> {
    let from = tx.from.unwrap_or_else(|| {
        <EthereumWallet as NetworkWallet<Ethereum>>::default_signer_address(wallet)
    });
    let nonce = tx.nonce.context("transaction nonce not set")?;
    let envelope: TxEnvelope =
        <EthereumWallet as NetworkWallet<Ethereum>>::sign_request(wallet, tx)
            .await
            .context("Failed to sign transaction")?;

    Ok(SignedTx {
        from,
        nonce,
        hash: *envelope.tx_hash(),
        raw: Bytes::from(envelope.encoded_2718()),
        private_for: Vec::new(),
    })
}

/// Parses a private key from hex (with or without 0x prefix).
pub fn parse_private_key(hex_key: &str) -> Result<PrivateKeySigner> {
    let key = hex_key.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    key.parse::<PrivateKeySigner>().context("Failed to parse private key")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_primitives::{B256, address};
    use async_trait::async_trait;

    use super::*;
    use crate::rpc::{BlockRecord, ReceiptStatus};

    struct NonceClient {
        start: u64,
        queried: Mutex<Vec<Address>>,
    }

    #[async_trait]
    impl ChainClient for NonceClient {
        fn endpoint(&self) -> &str {
            "mock"
        }

        async fn chain_id(&self) -> Result<u64> {
            Ok(1337)
        }

        async fn block_number(&self) -> Result<u64> {
            Ok(0)
        }

        async fn block_by_number(&self, _number: u64) -> Result<Option<BlockRecord>> {
            Ok(None)
        }

        async fn pending_nonce(&self, address: Address) -> Result<u64> {
            self.queried.lock().unwrap().push(address);
            Ok(self.start)
        }

        async fn submit_transaction(&self, tx: &SignedTx) -> Result<B256> {
            Ok(tx.hash)
        }

        async fn transaction_receipt(&self, _hash: B256) -> Result<Option<ReceiptStatus>> {
            Ok(None)
        }
    }

    fn opts() -> TxOptions {
        TxOptions { chain_id: 1337, gas_limit: 60_000, gas_price: 0, private_for: Vec::new() }
    }

    #[tokio::test]
    async fn generate_queries_each_account_once() {
        let client = NonceClient { start: 4, queried: Mutex::new(Vec::new()) };
        let set = AccountSet::generate(&client, 3).await.unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(*client.queried.lock().unwrap(), set.addresses());
        assert!((0..3).all(|i| set.nonce(i) == 4));
    }

    #[tokio::test]
    async fn signing_uses_current_nonce_and_advance_increments() {
        let client = NonceClient { start: 9, queried: Mutex::new(Vec::new()) };
        let mut set = AccountSet::generate(&client, 2).await.unwrap();
        let to = address!("1000000000000000000000000000000000000001");

        let first = set.sign_call(1, to, Bytes::new(), &opts()).await.unwrap();
        assert_eq!(first.nonce, 9);
        assert_eq!(first.from, set.addresses()[1]);

        // Signing alone does not consume the nonce.
        let again = set.sign_call(1, to, Bytes::new(), &opts()).await.unwrap();
        assert_eq!(again.nonce, 9);
        assert_eq!(again.hash, first.hash);

        set.advance(1);
        let next = set.sign_call(1, to, Bytes::new(), &opts()).await.unwrap();
        assert_eq!(next.nonce, 10);
        assert_ne!(next.hash, first.hash);
        assert_eq!(set.nonce(0), 9);
    }

    #[tokio::test]
    async fn private_recipients_are_carried() {
        let client = NonceClient { start: 0, queried: Mutex::new(Vec::new()) };
        let set = AccountSet::generate(&client, 1).await.unwrap();
        let mut opts = opts();
        opts.private_for = vec!["QfeDAys9MPDs2XHExtc84jKGHxZg/aj52DTh0vtA3Xc=".to_string()];
        let tx = set.sign_call(0, Address::ZERO, Bytes::new(), &opts).await.unwrap();
        assert_eq!(tx.private_for, opts.private_for);
    }

    #[test]
    fn parses_keys_with_and_without_prefix() {
        let key = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        let a = parse_private_key(key).unwrap();
        let b = parse_private_key(&format!("0x{key}")).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address(), address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert!(parse_private_key("not-a-key").is_err());
    }
}
