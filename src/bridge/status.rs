use alloy_primitives::B256;
use axum::{http::StatusCode, Json};
use futures::future::join_all;
use serde::Deserialize;
use std::sync::{atomic::Ordering, Arc};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use super::{
    resolver::outgoing_message_from_receipt,
    types::{BridgeContext, ClearPendingResponse, TransactionsResponse, TransferRequest},
};
use crate::{
    chain::types::TransactionReceipt,
    errors::BridgeError,
    indexer::fetcher::FetchRequest,
    types::{Direction, OutgoingMessage, OutgoingMessageState, Transfer, TransferStatus},
};

/// Receipt of `transfer` on its source chain, `None` while not yet mined or unreadable.
async fn source_receipt(context: &BridgeContext, transfer: &Transfer) -> Option<TransactionReceipt> {
    let client = match context.chains.client(transfer.source_chain_id) {
        Ok(client) => client,
        Err(e) => {
            error!(id = %transfer.id, error = %e, "No client for source chain");
            return None;
        }
    };

    match client.get_transaction_receipt(transfer.source_tx_hash).await {
        Ok(receipt) => receipt,
        Err(e) => {
            warn!(id = %transfer.id, chain_id = transfer.source_chain_id, error = %e, "Receipt lookup failed");
            None
        }
    }
}

/// Enters the outgoing message of a successful withdrawal into the pending map.
async fn track_outgoing_message(
    context: &BridgeContext,
    receipt: &TransactionReceipt,
    transfer: &Transfer,
) {
    match outgoing_message_from_receipt(receipt, transfer) {
        Ok(message) => {
            context.pending.write().await.insert(message);
        }
        Err(e) => error!(id = %transfer.id, error = %e, "Withdrawal has no usable outgoing message"),
    }
}

/// Re-checks pending transfers and re-resolves unexecuted outgoing messages.
pub(crate) async fn poll_pending(context: &BridgeContext) {
    let pending = context
        .store
        .read()
        .await
        .filter_transfers(|status| *status == TransferStatus::Pending);
    debug!(count = pending.len(), "Polling pending transfers");

    for transfer in pending {
        let Some(receipt) = source_receipt(context, &transfer).await else {
            continue;
        };

        // the retryable sub-status of deposits is owned by the bridge SDK
        let updated = context.store.write().await.update_from_receipt(&receipt, None);
        match updated {
            Ok(true) if receipt.is_success() && transfer.direction == Direction::Withdrawal => {
                track_outgoing_message(context, &receipt, &transfer).await;
            }
            Ok(_) => {}
            Err(e) => warn!(id = %transfer.id, error = %e, "Could not apply receipt"),
        }
    }

    resolve_outgoing_messages(context).await;
}

/// Refreshes state and ETA of every outgoing message that is not executed yet.
pub(crate) async fn resolve_outgoing_messages(context: &BridgeContext) {
    let messages: Vec<OutgoingMessage> = context.pending.read().await.unresolved();
    let results = join_all(
        messages
            .iter()
            .map(|message| context.resolver.refresh(message)),
    )
    .await;

    for (message, result) in messages.iter().zip(results) {
        let (state, eta) = match result {
            Ok(resolved) => resolved,
            Err(BridgeError::MessageNotFound(unique_id)) => {
                error!(%unique_id, transfer_id = %message.transfer_id, "Outgoing message not found on chain");
                (OutgoingMessageState::NotFound, None)
            }
            Err(e) => {
                warn!(unique_id = %message.unique_id, error = %e, "Could not resolve outgoing message");
                continue;
            }
        };

        let mut store = context.store.write().await;
        let mut pending = context.pending.write().await;
        if let Err(e) = pending.set_state(&message.unique_id, state, eta) {
            warn!(unique_id = %message.unique_id, error = %e, "Outgoing message vanished");
            continue;
        }
        if state == OutgoingMessageState::Executed {
            // executed elsewhere, the claim is done
            if let Err(e) = store.set_confirmed(&message.transfer_id, None) {
                debug!(transfer_id = %message.transfer_id, error = %e, "No transfer to confirm");
            }
        }
    }
}

/// Loads the history of every watched address into the store.
pub(crate) async fn refresh_history(context: &BridgeContext) {
    for address in &context.watched_addresses {
        let requests = [
            FetchRequest::for_address(Direction::Deposit, *address),
            FetchRequest::for_address(Direction::Withdrawal, *address),
        ];
        let fetched = join_all(
            requests
                .iter()
                .map(|request| context.fetcher.fetch_transfers(request)),
        )
        .await;

        let transfers: Vec<Transfer> = fetched.into_iter().flatten().collect();
        let inserted = context
            .store
            .write()
            .await
            .merge_discovered(transfers.clone());
        info!(%address, found = transfers.len(), inserted, "Refreshed transfer history");

        for withdrawal in transfers.iter().filter(|t| {
            t.direction == Direction::Withdrawal && t.status == TransferStatus::Success
        }) {
            if context.pending.read().await.contains_transfer(&withdrawal.id) {
                continue;
            }
            if let Some(receipt) = source_receipt(context, withdrawal).await {
                track_outgoing_message(context, &receipt, withdrawal).await;
            }
        }
    }
}

/// Periodically re-check pending transfers and outgoing messages
pub(crate) async fn pending_poll_task(context: Arc<BridgeContext>, period: Duration) {
    info!(?period, "Starting pending transfer poll task");
    let mut interval = interval(period);

    loop {
        interval.tick().await;
        poll_pending(&context).await;
    }
}

/// Periodically reload the history of the watched addresses
pub(crate) async fn history_refresh_task(context: Arc<BridgeContext>, period: Duration) {
    info!(?period, "Starting history refresh task");
    let mut interval = interval(period);

    loop {
        interval.tick().await;
        refresh_history(&context).await;

        mark_history_available(&context);
    }
}

/// Mark initial history load as complete and notify waiters
fn mark_history_available(context: &BridgeContext) {
    if !context.history_available.load(Ordering::Acquire) {
        context.history_available.store(true, Ordering::Release);
        context.initial_history_complete.notify_waiters();
    }
}

/// Waits until the first history refresh has finished.
///
/// The waiter is registered before the flag is re-checked, so a notification sent
/// between the two is not lost.
async fn wait_for_initial_history(context: &BridgeContext) {
    if context.history_available.load(Ordering::Acquire) {
        return;
    }
    let notified = context.initial_history_complete.notified();
    tokio::pin!(notified);
    notified.as_mut().enable();
    if !context.history_available.load(Ordering::Acquire) {
        info!("Waiting for initial history load to complete");
        notified.await;
    }
}

/// Return every tracked transfer, newest first
pub(crate) async fn get_transactions(context: Arc<BridgeContext>) -> Json<TransactionsResponse> {
    wait_for_initial_history(&context).await;

    let store = context.store.read().await;
    Json(TransactionsResponse {
        transfers: store.transfers(),
    })
}

/// Body of `POST /api/transactions`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SubmittedTransfer {
    #[serde(flatten)]
    pub(crate) request: TransferRequest,
    pub(crate) source_tx_hash: B256,
}

fn error_status(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::DuplicateId(_) => StatusCode::CONFLICT,
        BridgeError::MissingDestination => StatusCode::BAD_REQUEST,
        e if e.is_transient() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Start tracking a transfer the user just submitted
pub(crate) async fn record_transaction(
    context: Arc<BridgeContext>,
    submitted: SubmittedTransfer,
) -> Result<Json<Transfer>, (StatusCode, String)> {
    context
        .record_submitted_transfer(submitted.request, submitted.source_tx_hash)
        .await
        .map(Json)
        .map_err(|e| (error_status(&e), e.to_string()))
}

/// Return every tracked outgoing message
pub(crate) async fn get_pending_withdrawals(
    context: Arc<BridgeContext>,
) -> Json<Vec<OutgoingMessage>> {
    let pending = context.pending.read().await;
    Json(pending.messages())
}

/// Forget every pending transfer
pub(crate) async fn clear_pending_transactions(
    context: Arc<BridgeContext>,
) -> Json<ClearPendingResponse> {
    let cleared = context.store.write().await.clear_pending();
    Json(ClearPendingResponse { cleared })
}
