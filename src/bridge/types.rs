use alloy_primitives::{Address, B256, U256};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{atomic::AtomicBool, Arc};
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

use super::{
    pending::PendingWithdrawalMap,
    resolver::{MessageResolver, OutboxExecutor},
    store::TransactionStore,
};
use crate::{
    chain::{ChainPair, ChainRegistry},
    errors::{BridgeError, Result},
    indexer::fetcher::TransferFetcher,
    types::{
        Asset, AssetKind, Direction, OutgoingMessage, OutgoingMessageState, Transfer,
        TransferStatus,
    },
    wallets::traits::BalanceRefresh,
};

/// User-initiated transfer, as submitted by the wallet layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TransferRequest {
    pub(crate) direction: Direction,
    pub(crate) asset: Asset,
    pub(crate) amount: U256,
    pub(crate) sender: Address,
    /// Defaults to `sender` when absent
    pub(crate) destination: Option<Address>,
}

/// Destination of `request`.
///
/// A contract wallet has no counterpart at the same address on the other chain, so a
/// token withdrawal from one must name its destination explicitly.
pub(crate) fn validate_transfer_request(
    request: &TransferRequest,
    sender_is_contract: bool,
) -> Result<Address> {
    match request.destination {
        Some(destination) => Ok(destination),
        None if sender_is_contract
            && request.direction == Direction::Withdrawal
            && request.asset.kind() == AssetKind::Erc20 =>
        {
            Err(BridgeError::MissingDestination)
        }
        None => Ok(request.sender),
    }
}

/// Response of `GET /api/transactions`
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub(crate) struct TransactionsResponse {
    pub(crate) transfers: Vec<Transfer>,
}

/// Response of `POST /api/transactions/clear_pending`
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub(crate) struct ClearPendingResponse {
    pub(crate) cleared: usize,
}

/// Shared context of the bridge monitoring tasks and handlers
///
/// The store and the pending map are always locked in that order.
#[derive(Debug)]
pub(crate) struct BridgeContext {
    pub(crate) chains: ChainRegistry,
    pub(crate) chain_pair: ChainPair,
    pub(crate) fetcher: TransferFetcher,
    pub(crate) resolver: MessageResolver,
    pub(crate) store: RwLock<TransactionStore>,
    pub(crate) pending: RwLock<PendingWithdrawalMap>,
    pub(crate) watched_addresses: Vec<Address>,
    pub(crate) history_available: AtomicBool,
    pub(crate) initial_history_complete: Arc<Notify>,
}

impl BridgeContext {
    pub(crate) fn new(
        chains: ChainRegistry,
        chain_pair: ChainPair,
        fetcher: TransferFetcher,
        resolver: MessageResolver,
        balance_refresh: Arc<dyn BalanceRefresh>,
        watched_addresses: Vec<Address>,
    ) -> Self {
        Self {
            chains,
            chain_pair,
            fetcher,
            resolver,
            store: RwLock::new(TransactionStore::new(balance_refresh)),
            pending: RwLock::new(PendingWithdrawalMap::default()),
            watched_addresses,
            history_available: AtomicBool::new(false),
            initial_history_complete: Arc::new(Notify::new()),
        }
    }

    fn chain_ids(&self, direction: Direction) -> (u64, u64) {
        match direction {
            Direction::Deposit => (self.chain_pair.parent, self.chain_pair.child),
            Direction::Withdrawal => (self.chain_pair.child, self.chain_pair.parent),
        }
    }

    /// Starts tracking a transfer the user just submitted.
    pub(crate) async fn record_submitted_transfer(
        &self,
        request: TransferRequest,
        source_tx_hash: B256,
    ) -> Result<Transfer> {
        let (source_chain_id, destination_chain_id) = self.chain_ids(request.direction);
        let source = self.chains.client(source_chain_id)?;

        // only an ERC-20 withdrawal without destination needs to know the wallet kind
        let needs_code_check = request.destination.is_none()
            && request.direction == Direction::Withdrawal
            && request.asset.kind() == AssetKind::Erc20;
        let sender_is_contract =
            needs_code_check && !source.get_code(request.sender).await?.is_empty();
        let destination = validate_transfer_request(&request, sender_is_contract)?;

        let transfer = Transfer {
            id: Transfer::id_for(source_tx_hash),
            direction: request.direction,
            asset: request.asset,
            amount: request.amount,
            sender: request.sender,
            destination,
            source_chain_id,
            destination_chain_id,
            source_tx_hash,
            source_block: 0,
            destination_tx_hash: None,
            status: TransferStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            is_classic: false,
            l2_message_data: None,
        };

        self.store.write().await.add(transfer.clone())?;
        Ok(transfer)
    }

    /// Executes a confirmed outgoing message.
    ///
    /// The claim is estimated on the parent chain first; a failing estimate returns
    /// before anything is submitted. On a successful receipt the executed cache, the pending map and the transfer are
    /// updated under both locks, cache first, so readers never observe a partial claim.
    /// A reverted claim changes nothing and fails with [`BridgeError::ClaimFailed`].
    pub(crate) async fn claim_withdrawal(
        &self,
        unique_id: &str,
        executor: &dyn OutboxExecutor,
    ) -> Result<OutgoingMessage> {
        let message = self
            .pending
            .read()
            .await
            .get(unique_id)
            .cloned()
            .ok_or_else(|| BridgeError::WithdrawalNotFound(unique_id.to_string()))?;

        if message.state != OutgoingMessageState::Confirmed {
            return Err(BridgeError::NotClaimable {
                unique_id: unique_id.to_string(),
                state: message.state,
            });
        }

        let request = executor.claim_request(&message)?;
        let gas_limit = self
            .chains
            .client(self.chain_pair.parent)?
            .estimate_gas(&request)
            .await?;
        let receipt = executor.execute(&message, gas_limit).await?;
        let claim_tx = format!("{:#x}", receipt.transaction_hash);
        if !receipt.is_success() {
            warn!(%unique_id, %claim_tx, "Claim transaction reverted");
            return Err(BridgeError::ClaimFailed(claim_tx));
        }

        let mut store = self.store.write().await;
        let mut pending = self.pending.write().await;

        self.resolver.cache().add(unique_id).await?;
        pending.set_state(unique_id, OutgoingMessageState::Executed, None)?;
        match store.set_confirmed(&message.transfer_id, Some(receipt.transaction_hash)) {
            Ok(_) => {}
            Err(BridgeError::TransferNotFound(id)) => {
                warn!(%unique_id, transfer_id = %id, "Claimed message has no tracked transfer");
            }
            Err(e) => return Err(e),
        }

        info!(%unique_id, %claim_tx, "Withdrawal claimed");
        pending
            .get(unique_id)
            .cloned()
            .ok_or_else(|| BridgeError::WithdrawalNotFound(unique_id.to_string()))
    }
}
