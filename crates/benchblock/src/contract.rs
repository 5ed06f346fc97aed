//! The get/set/add contract used to generate state changing load.

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, Bytes, U256, bytes};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, sol};
use tracing::info;

use crate::{
    accounts::{TxOptions, sign_request},
    error::BenchError,
    receipt::ReceiptVerifier,
    rpc::ChainClient,
};

sol! {
    interface GetSetAdd {
        function add(uint256 x) external;
        function set(uint256 x) external;
        function get() external view returns (uint256 retVal);
    }
}

/// Value passed to `add` by load transactions.
pub const ADD_LOAD_VALUE: u64 = 2;
/// Value passed to `add` by the single transaction diagnostic.
pub const ADD_PROBE_VALUE: u64 = 3;

/// Creation bytecode for the get/set/add contract.
pub fn bytecode() -> Bytes {
    bytes!(
        "608060405234801561001057600080fd5b50610126806100206000396000f3fe6080604052348015600f57600080fd5b50600436106059576000357c0100000000000000000000000000000000000000000000000000000000900480631003e2d214605e57806360fe47b11460895780636d4ce63c1460b4575b600080fd5b608760048036036020811015607257600080fd5b810190808035906020019092919050505060d0565b005b60b260048036036020811015609d57600080fd5b810190808035906020019092919050505060de565b005b60ba60e8565b6040518082815260200191505060405180910390f35b806000540160008190555050565b8060008190555050565b6000805490509056fea265627a7a72315820c8bd9d7613946c0a0455d5dcd9528916cebe6d6599909a4b2527a8252b40d20564736f6c634300050b0032"
    )
}

/// ABI encoded `add(x)` call.
pub fn add_calldata(x: u64) -> Bytes {
    GetSetAdd::addCall { x: U256::from(x) }.abi_encode().into()
}

/// Deploys the contract with `deployer` and blocks until the deployment is
/// mined. Any failure here is fatal to the run.
pub async fn deploy<C: ChainClient + ?Sized>(
    client: &C,
    deployer: PrivateKeySigner,
    opts: &TxOptions,
    deploy_gas_limit: u64,
    verifier: &ReceiptVerifier,
) -> Result<Address, BenchError> {
    let from = deployer.address();
    let nonce = client
        .pending_nonce(from)
        .await
        .map_err(|e| BenchError::Deploy(format!("nonce for deployer {from}: {e:#}")))?;

    let tx = TransactionRequest::default()
        .with_from(from)
        .with_deploy_code(bytecode())
        .with_nonce(nonce)
        .with_chain_id(opts.chain_id)
        .with_gas_price(opts.gas_price)
        .with_gas_limit(deploy_gas_limit);
    let signed = sign_request(&EthereumWallet::from(deployer), tx)
        .await
        .map_err(|e| BenchError::Deploy(format!("{e:#}")))?;

    let hash = client
        .submit_transaction(&signed)
        .await
        .map_err(|e| BenchError::Deploy(format!("submitting deploy transaction: {e:#}")))?;
    info!(
        deployer = %from,
        tx_hash = %hash,
        endpoint = client.endpoint(),
        "Contract deploy submitted"
    );

    let status = verifier
        .check(client, hash)
        .await
        .into_result(hash)
        .map_err(|e| BenchError::Deploy(format!("failed to deploy contract: {e}")))?;

    let address = status.contract_address.unwrap_or_else(|| from.create(nonce));
    info!(contract = %address, "Contract deployed");
    Ok(address)
}
