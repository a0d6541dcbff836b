//! Parent chain reads that determine the state of an L2 to L1 message.

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall, SolEvent};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, warn};

use super::{
    types::{CallRequest, LogFilter},
    ChainClient,
};
use crate::{
    errors::{BridgeError, Result},
    indexer::{
        batch::{fetch_in_batches, BatchOptions},
        events::decode_log,
    },
    types::{BlockRange, MessageCoordinates, OutgoingMessage, OutgoingMessageState},
};

sol! {
    interface IOutbox {
        function isSpent(uint256 index) external view returns (bool);
    }

    interface IClassicOutbox {
        function outboxEntryExists(uint256 batchNum) external view returns (bool);

        #[derive(Debug)]
        event OutBoxTransactionExecuted(
            address indexed destAddr,
            address indexed l2Sender,
            uint256 indexed outboxEntryIndex,
            uint256 transactionIndex
        );
    }

    interface IRollup {
        #[derive(Debug)]
        struct Node {
            bytes32 stateHash;
            bytes32 challengeHash;
            bytes32 confirmData;
            uint64 prevNum;
            uint64 deadlineBlock;
            uint64 noChildConfirmedBeforeBlock;
            uint64 stakerCount;
            uint64 childStakerCount;
            uint64 firstChildBlock;
            uint64 latestChildNumber;
            uint64 createdAtBlock;
            bytes32 nodeHash;
        }

        function latestConfirmed() external view returns (uint64);
        function getNode(uint64 nodeNum) external view returns (Node memory);

        #[derive(Debug)]
        event NodeConfirmed(uint64 indexed nodeNum, bytes32 blockHash, bytes32 sendRoot);
    }
}

/// Reads the on-chain state of an outgoing message
#[async_trait]
pub(crate) trait MessageStatusReader: Send + Sync + Debug {
    async fn message_state(&self, message: &OutgoingMessage) -> Result<OutgoingMessageState>;
}

/// Contract addresses consulted by [`OutboxStatusReader`]
#[derive(Debug, Clone, Default)]
pub(crate) struct OutboxContracts {
    pub(crate) outbox: Option<Address>,
    pub(crate) rollup: Option<Address>,
    pub(crate) classic_outboxes: Vec<Address>,
}

/// [`MessageStatusReader`] backed by the parent and child chain clients
#[derive(Debug, Clone)]
pub(crate) struct OutboxStatusReader {
    parent: Arc<dyn ChainClient>,
    child: Arc<dyn ChainClient>,
    contracts: OutboxContracts,
    batch: BatchOptions,
}

impl OutboxStatusReader {
    pub(crate) fn new(
        parent: Arc<dyn ChainClient>,
        child: Arc<dyn ChainClient>,
        contracts: OutboxContracts,
        batch: BatchOptions,
    ) -> Self {
        Self {
            parent,
            child,
            contracts,
            batch,
        }
    }

    async fn view<C: SolCall>(&self, to: Address, call: C) -> Result<C::Return> {
        let request = CallRequest {
            from: None,
            to,
            data: Bytes::from(call.abi_encode()),
        };
        let output = self.parent.call(&request).await?;
        Ok(C::abi_decode_returns(&output, true)?)
    }

    /// Nitro: spent → executed; child send count at the confirmed node → confirmed.
    async fn nitro_state(&self, position: U256) -> Result<OutgoingMessageState> {
        let outbox = self
            .contracts
            .outbox
            .ok_or_else(|| BridgeError::Config("outbox address not configured".to_string()))?;
        let rollup = self
            .contracts
            .rollup
            .ok_or_else(|| BridgeError::Config("rollup address not configured".to_string()))?;

        let child_head = self.child.get_block_number().await?;
        if let Some(send_count) = self
            .child
            .get_block(child_head)
            .await?
            .and_then(|block| block.send_count)
        {
            if position >= U256::from(send_count) {
                return Ok(OutgoingMessageState::NotFound);
            }
        }

        let spent = self.view(outbox, IOutbox::isSpentCall { index: position }).await?;
        if spent._0 {
            return Ok(OutgoingMessageState::Executed);
        }

        let node_num = self.view(rollup, IRollup::latestConfirmedCall {}).await?._0;
        let Some(confirmed_send_count) = self.confirmed_send_count(rollup, node_num).await? else {
            return Ok(OutgoingMessageState::Unconfirmed);
        };

        if position < U256::from(confirmed_send_count) {
            Ok(OutgoingMessageState::Confirmed)
        } else {
            Ok(OutgoingMessageState::Unconfirmed)
        }
    }

    /// Send count of the child block asserted by confirmed node `node_num`.
    ///
    /// A node is confirmed after it is created, so its `NodeConfirmed` log lies
    /// between the node's creation block and the parent head.
    async fn confirmed_send_count(&self, rollup: Address, node_num: u64) -> Result<Option<u64>> {
        let node = self
            .view(rollup, IRollup::getNodeCall { nodeNum: node_num })
            .await?
            ._0;
        let head = self.parent.get_block_number().await?;
        let Some(range) = BlockRange::new(node.createdAtBlock, head) else {
            return Ok(None);
        };
        let filter = LogFilter::new(
            rollup,
            range,
            vec![
                Some(IRollup::NodeConfirmed::SIGNATURE_HASH),
                Some(U256::from(node_num).into()),
            ],
        );

        let logs = fetch_in_batches(
            range,
            |chunk| {
                let filter = filter.with_range(chunk);
                let parent = Arc::clone(&self.parent);
                async move { parent.get_logs(&filter).await }
            },
            &self.batch,
        )
        .await;

        let Some(log) = logs.last() else {
            warn!(node_num, ?range, "NodeConfirmed log not found since node creation");
            return Ok(None);
        };
        let event = decode_log::<IRollup::NodeConfirmed>(log)?;
        let block = self.child.get_block_by_hash(event.blockHash).await?;
        debug!(node_num, block_hash = %event.blockHash, "Latest confirmed node");
        Ok(block.and_then(|block| block.send_count))
    }

    /// Classic: an execution log on any classic outbox → executed, an existing
    /// outbox entry for the batch → confirmed.
    async fn classic_state(
        &self,
        batch_number: U256,
        index_in_batch: U256,
        origin_parent_block: u64,
    ) -> Result<OutgoingMessageState> {
        if self.contracts.classic_outboxes.is_empty() {
            return Err(BridgeError::Config(
                "classic outbox addresses not configured".to_string(),
            ));
        }

        let head = self.parent.get_block_number().await?;
        if let Some(range) = BlockRange::new(origin_parent_block, head) {
            for outbox in &self.contracts.classic_outboxes {
                let filter = LogFilter::new(
                    *outbox,
                    range,
                    vec![
                        Some(IClassicOutbox::OutBoxTransactionExecuted::SIGNATURE_HASH),
                        None,
                        None,
                        Some(batch_number.into()),
                    ],
                );
                let logs = fetch_in_batches(
                    range,
                    |chunk| {
                        let filter = filter.with_range(chunk);
                        let parent = Arc::clone(&self.parent);
                        async move { parent.get_logs(&filter).await }
                    },
                    &self.batch,
                )
                .await;

                for log in &logs {
                    let event = decode_log::<IClassicOutbox::OutBoxTransactionExecuted>(log)?;
                    if event.transactionIndex == index_in_batch {
                        return Ok(OutgoingMessageState::Executed);
                    }
                }
            }
        }

        for outbox in &self.contracts.classic_outboxes {
            let exists = self
                .view(
                    *outbox,
                    IClassicOutbox::outboxEntryExistsCall {
                        batchNum: batch_number,
                    },
                )
                .await?;
            if exists._0 {
                return Ok(OutgoingMessageState::Confirmed);
            }
        }

        Ok(OutgoingMessageState::Unconfirmed)
    }
}

#[async_trait]
impl MessageStatusReader for OutboxStatusReader {
    async fn message_state(&self, message: &OutgoingMessage) -> Result<OutgoingMessageState> {
        match message.coordinates {
            MessageCoordinates::Nitro { position } => self.nitro_state(position).await,
            MessageCoordinates::Classic {
                batch_number,
                index_in_batch,
            } => {
                self.classic_state(batch_number, index_in_batch, message.origin_parent_block)
                    .await
            }
        }
    }
}
