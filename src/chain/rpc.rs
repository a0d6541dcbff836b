use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use jsonrpsee::{core::client::ClientT, http_client::HttpClient, rpc_params};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    types::{parse_hex_u64, BlockHeader, CallRequest, LogEntry, LogFilter, TransactionReceipt},
    ChainClient,
};
use crate::{
    errors::{BridgeError, Result},
    utils::{
        retry_policy::ExponentialBackoff,
        rpc_client::{create_rpc_client, execute_with_retries},
    },
};

/// JSON-RPC backed [`ChainClient`]
///
/// Every request is retried with exponential backoff (3 retries over roughly 10
/// seconds). Callers above this layer never retry on their own.
#[derive(Debug, Clone)]
pub(crate) struct RpcChainClient {
    chain_id: u64,
    client: HttpClient,
    retry_policy: ExponentialBackoff,
}

impl RpcChainClient {
    pub(crate) fn new(chain_id: u64, rpc_url: &str) -> Result<Self> {
        Ok(Self {
            chain_id,
            client: create_rpc_client(rpc_url)?,
            retry_policy: ExponentialBackoff::new(3, 10, 1.5),
        })
    }

    pub(crate) fn with_retry_policy(mut self, retry_policy: ExponentialBackoff) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    async fn request<T, P>(&self, method: &'static str, params: P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Fn() -> jsonrpsee::core::params::ArrayParams,
    {
        let operation_name = format!("{method} on chain {}", self.chain_id);
        let result = execute_with_retries(
            || {
                let client = self.client.clone();
                let params = params();
                async move { client.request::<T, _>(method, params).await }
            },
            &operation_name,
            self.retry_policy,
        )
        .await?;
        debug!(chain_id = self.chain_id, method, "RPC request succeeded");
        Ok(result)
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_block_number(&self) -> Result<u64> {
        let hex_str: String = self.request("eth_blockNumber", || rpc_params![]).await?;
        parse_hex_u64(&hex_str).map_err(|e| BridgeError::Decode(e.to_string()))
    }

    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>> {
        self.request("eth_getBlockByNumber", || {
            rpc_params![format!("{number:#x}"), false]
        })
        .await
    }

    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<BlockHeader>> {
        self.request("eth_getBlockByHash", || rpc_params![hash, false])
            .await
    }

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        self.request("eth_getTransactionReceipt", || rpc_params![hash])
            .await
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let params = filter.to_rpc_params();
        self.request("eth_getLogs", || rpc_params![params.clone()])
            .await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.request("eth_getCode", || rpc_params![address, "latest"])
            .await
    }

    async fn get_balance(&self, address: Address) -> Result<U256> {
        self.request("eth_getBalance", || rpc_params![address, "latest"])
            .await
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes> {
        self.request("eth_call", || rpc_params![request.clone(), "latest"])
            .await
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
        let hex_str: String = self
            .request("eth_estimateGas", || rpc_params![request.clone()])
            .await?;
        parse_hex_u64(&hex_str).map_err(|e| BridgeError::Decode(e.to_string()))
    }
}
