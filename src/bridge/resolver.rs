//! Outgoing message state resolution.
//!
//! The executed messages cache is consulted before any chain read; a cached message is
//! executed without asking the chain.

use alloy_primitives::U256;
use alloy_sol_types::SolEvent;
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use tracing::{debug, warn};

use super::executed::ExecutedMessagesCache;
use crate::{
    chain::{
        outbox::MessageStatusReader,
        types::{CallRequest, TransactionReceipt},
        ChainClient,
    },
    config::ResolverConfig,
    errors::{BridgeError, Result},
    indexer::events::{decode_log, L2ToL1Transaction, L2ToL1Tx, ARB_SYS_ADDRESS},
    types::{MessageCoordinates, OutgoingMessage, OutgoingMessageState, Transfer},
};

/// Submits the outbox execution of a confirmed message
///
/// Signing and submission belong to the wallet layer; the engine only reads the
/// success bit of the returned receipt.
#[async_trait]
pub(crate) trait OutboxExecutor: Send + Sync + Debug {
    /// Parent chain call that executes `message`, used for gas estimation
    fn claim_request(&self, message: &OutgoingMessage) -> Result<CallRequest>;

    async fn execute(
        &self,
        message: &OutgoingMessage,
        gas_limit: u64,
    ) -> Result<TransactionReceipt>;
}

/// Parent chain blocks left before a message can be claimed.
pub(crate) fn blocks_until_claimable(
    challenge_period_blocks: u64,
    current_parent_block: u64,
    origin_parent_block: u64,
) -> u64 {
    let elapsed = current_parent_block.saturating_sub(origin_parent_block);
    challenge_period_blocks.saturating_sub(elapsed)
}

/// Resolves outgoing message states and claim ETAs
#[derive(Debug, Clone)]
pub(crate) struct MessageResolver {
    reader: Arc<dyn MessageStatusReader>,
    cache: ExecutedMessagesCache,
    parent: Arc<dyn ChainClient>,
    config: ResolverConfig,
}

impl MessageResolver {
    pub(crate) fn new(
        reader: Arc<dyn MessageStatusReader>,
        cache: ExecutedMessagesCache,
        parent: Arc<dyn ChainClient>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            reader,
            cache,
            parent,
            config,
        }
    }

    pub(crate) fn cache(&self) -> &ExecutedMessagesCache {
        &self.cache
    }

    /// Current state of `message`.
    ///
    /// A message the chain does not know fails with [`BridgeError::MessageNotFound`].
    pub(crate) async fn resolve(&self, message: &OutgoingMessage) -> Result<OutgoingMessageState> {
        if self.cache.contains(&message.unique_id).await? {
            debug!(unique_id = %message.unique_id, "Executed per cache");
            return Ok(OutgoingMessageState::Executed);
        }

        match self.reader.message_state(message).await? {
            OutgoingMessageState::NotFound => {
                Err(BridgeError::MessageNotFound(message.unique_id.clone()))
            }
            OutgoingMessageState::Executed => {
                self.cache.add(&message.unique_id).await?;
                Ok(OutgoingMessageState::Executed)
            }
            state => Ok(state),
        }
    }

    /// Estimated seconds until `message` is claimable, given the parent chain height.
    pub(crate) fn eta_seconds(&self, message: &OutgoingMessage, current_parent_block: u64) -> u64 {
        let blocks = blocks_until_claimable(
            self.config.challenge_period_blocks(),
            current_parent_block,
            message.origin_parent_block,
        );
        blocks.saturating_mul(self.config.parent_block_time().as_secs())
    }

    /// State of `message` with an ETA for unconfirmed ones.
    pub(crate) async fn refresh(
        &self,
        message: &OutgoingMessage,
    ) -> Result<(OutgoingMessageState, Option<u64>)> {
        let state = self.resolve(message).await?;
        if state != OutgoingMessageState::Unconfirmed {
            return Ok((state, None));
        }

        // the ETA is a display aid, a missing head only drops it
        let eta = match self.parent.get_block_number().await {
            Ok(head) => Some(self.eta_seconds(message, head)),
            Err(e) => {
                warn!(unique_id = %message.unique_id, error = %e, "Could not compute claim ETA");
                None
            }
        };
        Ok((state, eta))
    }
}

fn u64_from(value: U256) -> u64 {
    value.try_into().unwrap_or(u64::MAX)
}

/// The single outgoing message emitted by a withdrawal receipt.
///
/// Zero or several L2 to L1 events in one receipt is a data anomaly and fails with
/// [`BridgeError::UnexpectedMessageCount`].
pub(crate) fn outgoing_message_from_receipt(
    receipt: &TransactionReceipt,
    transfer: &Transfer,
) -> Result<OutgoingMessage> {
    let mut found = Vec::new();
    for log in receipt
        .logs
        .iter()
        .filter(|log| log.address == *ARB_SYS_ADDRESS)
    {
        match log.topics.first() {
            Some(topic) if *topic == L2ToL1Tx::SIGNATURE_HASH => {
                let event = decode_log::<L2ToL1Tx>(log)?;
                found.push((
                    MessageCoordinates::Nitro {
                        position: event.position,
                    },
                    u64_from(event.ethBlockNum),
                ));
            }
            Some(topic) if *topic == L2ToL1Transaction::SIGNATURE_HASH => {
                let event = decode_log::<L2ToL1Transaction>(log)?;
                found.push((
                    MessageCoordinates::Classic {
                        batch_number: event.batchNumber,
                        index_in_batch: event.indexInBatch,
                    },
                    u64_from(event.ethBlockNum),
                ));
            }
            _ => {}
        }
    }

    match found.as_slice() {
        [(coordinates, origin_parent_block)] => Ok(OutgoingMessage::new(
            *coordinates,
            transfer,
            *origin_parent_block,
        )),
        _ => Err(BridgeError::UnexpectedMessageCount {
            tx_hash: format!("{:#x}", receipt.transaction_hash),
            found: found.len(),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::{
            executed::{KeyValueStore, MemoryKeyValueStore},
            store::testing::{receipt, transfer},
        },
        chain::{outbox::testing::ScriptedStatusReader, testing::MockChain},
        indexer::events::testing::{classic_withdrawal, log_from, nitro_withdrawal},
        types::Direction,
    };
    use alloy_primitives::{Address, B256};

    const ALICE: Address = Address::with_last_byte(0xa1);

    fn classic_message() -> OutgoingMessage {
        OutgoingMessage::new(
            MessageCoordinates::Classic {
                batch_number: U256::from(5),
                index_in_batch: U256::from(2),
            },
            &transfer(Direction::Withdrawal, 1),
            12_000_000,
        )
    }

    fn resolver(
        reader: Arc<ScriptedStatusReader>,
        store: Arc<dyn KeyValueStore>,
        parent_head: u64,
    ) -> MessageResolver {
        MessageResolver::new(
            reader,
            ExecutedMessagesCache::new(store, 42161),
            Arc::new(MockChain::new(1, parent_head)),
            ResolverConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_confirmed_message_is_not_cached() {
        let reader = Arc::new(ScriptedStatusReader::with_state(
            "classic-5-2",
            OutgoingMessageState::Confirmed,
        ));
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
        let resolver = resolver(reader.clone(), store.clone(), 0);

        let state = resolver.resolve(&classic_message()).await.unwrap();

        assert_eq!(state, OutgoingMessageState::Confirmed);
        assert!(!store.has("42161:classic-5-2").await.unwrap());
        assert_eq!(reader.request_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_message_skips_chain() {
        let reader = Arc::new(ScriptedStatusReader::default());
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
        store.set("42161:classic-5-2", true).await.unwrap();
        let resolver = resolver(reader.clone(), store, 0);

        let state = resolver.resolve(&classic_message()).await.unwrap();

        assert_eq!(state, OutgoingMessageState::Executed);
        assert_eq!(reader.request_count(), 0);
    }

    #[tokio::test]
    async fn test_executed_on_chain_is_cached() {
        let reader = Arc::new(ScriptedStatusReader::with_state(
            "classic-5-2",
            OutgoingMessageState::Executed,
        ));
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::default());
        let resolver = resolver(reader.clone(), store.clone(), 0);

        resolver.resolve(&classic_message()).await.unwrap();
        resolver.resolve(&classic_message()).await.unwrap();

        assert!(store.has("42161:classic-5-2").await.unwrap());
        assert_eq!(reader.request_count(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_surfaced() {
        let reader = Arc::new(ScriptedStatusReader::with_state(
            "classic-5-2",
            OutgoingMessageState::NotFound,
        ));
        let resolver = resolver(reader, Arc::new(MemoryKeyValueStore::default()), 0);

        let result = resolver.resolve(&classic_message()).await;

        assert!(matches!(result, Err(BridgeError::MessageNotFound(id)) if id == "classic-5-2"));
    }

    #[tokio::test]
    async fn test_unconfirmed_refresh_has_eta() {
        let reader = Arc::new(ScriptedStatusReader::with_state(
            "classic-5-2",
            OutgoingMessageState::Unconfirmed,
        ));
        // 45_818 block challenge period, 818 blocks elapsed
        let resolver = resolver(reader, Arc::new(MemoryKeyValueStore::default()), 12_000_818);

        let (state, eta) = resolver.refresh(&classic_message()).await.unwrap();

        assert_eq!(state, OutgoingMessageState::Unconfirmed);
        assert_eq!(eta, Some(45_000 * 12));
    }

    #[test]
    fn test_blocks_until_claimable_saturates() {
        assert_eq!(blocks_until_claimable(100, 150, 100), 50);
        assert_eq!(blocks_until_claimable(100, 500, 100), 0);
        // head behind the origin block, nothing elapsed
        assert_eq!(blocks_until_claimable(100, 90, 100), 100);
    }

    #[test]
    fn test_message_from_nitro_receipt() {
        let withdrawal = transfer(Direction::Withdrawal, 1);
        let mut receipt = receipt(1, 1);
        receipt.logs.push(log_from(
            &nitro_withdrawal(ALICE, ALICE, 77, 10),
            *ARB_SYS_ADDRESS,
            120,
            B256::with_last_byte(1),
        ));

        let message = outgoing_message_from_receipt(&receipt, &withdrawal).unwrap();

        assert_eq!(message.unique_id, "nitro-77");
        assert_eq!(message.origin_parent_block, 17_000_000);
        assert_eq!(message.transfer_id, withdrawal.id);
        assert_eq!(message.state, OutgoingMessageState::Unconfirmed);
    }

    #[test]
    fn test_message_count_anomalies() {
        let withdrawal = transfer(Direction::Withdrawal, 1);
        let empty = receipt(1, 1);

        let mut doubled = receipt(1, 1);
        for batch in [5, 6] {
            doubled.logs.push(log_from(
                &classic_withdrawal(ALICE, ALICE, batch, 2),
                *ARB_SYS_ADDRESS,
                120,
                B256::with_last_byte(1),
            ));
        }

        assert!(matches!(
            outgoing_message_from_receipt(&empty, &withdrawal),
            Err(BridgeError::UnexpectedMessageCount { found: 0, .. })
        ));
        assert!(matches!(
            outgoing_message_from_receipt(&doubled, &withdrawal),
            Err(BridgeError::UnexpectedMessageCount { found: 2, .. })
        ));
    }
}
