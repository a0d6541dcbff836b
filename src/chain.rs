//! Chain client capability consumed by the reconciliation engine.

pub(crate) mod outbox;
pub(crate) mod rpc;
pub(crate) mod types;

use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::{collections::HashMap, fmt::Debug, sync::Arc};

use crate::errors::{BridgeError, Result};
use types::{BlockHeader, CallRequest, LogEntry, LogFilter, TransactionReceipt};

/// Read access to one chain
#[async_trait]
pub(crate) trait ChainClient: Send + Sync + Debug {
    /// Chain id this client is bound to
    fn chain_id(&self) -> u64;

    async fn get_block_number(&self) -> Result<u64>;

    async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>>;

    async fn get_block_by_hash(&self, hash: B256) -> Result<Option<BlockHeader>>;

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>>;

    async fn get_code(&self, address: Address) -> Result<Bytes>;

    /// Native balance of `address` at the latest block
    async fn get_balance(&self, address: Address) -> Result<U256>;

    async fn call(&self, request: &CallRequest) -> Result<Bytes>;

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64>;
}

/// Chain clients keyed by chain id
#[derive(Debug, Clone, Default)]
pub(crate) struct ChainRegistry {
    clients: HashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub(crate) fn register(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain_id(), client);
    }

    /// Client for `chain_id`, missing clients are a configuration error
    pub(crate) fn client(&self, chain_id: u64) -> Result<Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .cloned()
            .ok_or(BridgeError::UnknownChain(chain_id))
    }
}

/// Parent and child chain ids of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChainPair {
    pub(crate) parent: u64,
    pub(crate) child: u64,
}

impl ChainPair {
    pub(crate) fn new(parent: u64, child: u64) -> Result<Self> {
        if parent == child {
            return Err(BridgeError::UnsupportedChainPair { parent, child });
        }
        Ok(Self { parent, child })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory chain used by unit tests across the crate.

    use super::*;
    use std::sync::Mutex;

    type CallHandler = Box<dyn Fn(&CallRequest) -> Result<Bytes> + Send + Sync>;
    type LogsHandler = Box<dyn Fn(&LogFilter) -> Result<Vec<LogEntry>> + Send + Sync>;

    #[derive(Default)]
    pub(crate) struct MockChain {
        pub(crate) chain_id: u64,
        pub(crate) head: u64,
        pub(crate) blocks: HashMap<B256, BlockHeader>,
        pub(crate) blocks_by_number: HashMap<u64, BlockHeader>,
        pub(crate) receipts: HashMap<B256, TransactionReceipt>,
        pub(crate) code: HashMap<Address, Bytes>,
        pub(crate) balances: HashMap<Address, U256>,
        /// Makes `estimate_gas` fail with this message
        pub(crate) estimate_error: Option<String>,
        pub(crate) call_handler: Option<CallHandler>,
        pub(crate) logs_handler: Option<LogsHandler>,
        pub(crate) log_filters: Mutex<Vec<LogFilter>>,
        pub(crate) calls: Mutex<Vec<CallRequest>>,
        pub(crate) receipt_requests: Mutex<Vec<B256>>,
    }

    impl Debug for MockChain {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockChain")
                .field("chain_id", &self.chain_id)
                .field("head", &self.head)
                .finish()
        }
    }

    impl MockChain {
        pub(crate) fn new(chain_id: u64, head: u64) -> Self {
            Self {
                chain_id,
                head,
                ..Default::default()
            }
        }

        pub(crate) fn total_requests(&self) -> usize {
            self.log_filters.lock().unwrap().len()
                + self.calls.lock().unwrap().len()
                + self.receipt_requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        fn chain_id(&self) -> u64 {
            self.chain_id
        }

        async fn get_block_number(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn get_block(&self, number: u64) -> Result<Option<BlockHeader>> {
            Ok(self.blocks_by_number.get(&number).cloned())
        }

        async fn get_block_by_hash(&self, hash: B256) -> Result<Option<BlockHeader>> {
            Ok(self.blocks.get(&hash).cloned())
        }

        async fn get_transaction_receipt(
            &self,
            hash: B256,
        ) -> Result<Option<TransactionReceipt>> {
            self.receipt_requests.lock().unwrap().push(hash);
            Ok(self.receipts.get(&hash).cloned())
        }

        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
            self.log_filters.lock().unwrap().push(filter.clone());
            match &self.logs_handler {
                Some(handler) => handler(filter),
                None => Ok(Vec::new()),
            }
        }

        async fn get_code(&self, address: Address) -> Result<Bytes> {
            Ok(self.code.get(&address).cloned().unwrap_or_default())
        }

        async fn get_balance(&self, address: Address) -> Result<U256> {
            Ok(self.balances.get(&address).copied().unwrap_or_default())
        }

        async fn call(&self, request: &CallRequest) -> Result<Bytes> {
            self.calls.lock().unwrap().push(request.clone());
            match &self.call_handler {
                Some(handler) => handler(request),
                None => Err(BridgeError::Rpc("no call handler".to_string())),
            }
        }

        async fn estimate_gas(&self, request: &CallRequest) -> Result<u64> {
            self.calls.lock().unwrap().push(request.clone());
            match &self.estimate_error {
                Some(message) => Err(BridgeError::Rpc(message.clone())),
                None => Ok(21_000),
            }
        }
    }
}
