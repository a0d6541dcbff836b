//! Transaction lifecycle store.
//!
//! Process-local and single-writer per mutation: callers hold the store behind one
//! `RwLock`. Two mutations of the same transfer that race (a receipt update and a
//! claim, say) are applied in lock order and the last write wins; there is no merge.

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use std::{collections::HashMap, fmt::Debug, sync::Arc};
use tracing::{debug, info};

use crate::{
    chain::types::TransactionReceipt,
    errors::{BridgeError, Result},
    types::{Direction, Transfer, TransferStatus},
    wallets::traits::{BalanceRefresh, BalanceRefreshRequest},
};

/// Store entry with its last mutation time
#[derive(Debug, Clone)]
pub(crate) struct StoreEntry {
    pub(crate) transfer: Transfer,
    pub(crate) last_updated: DateTime<Utc>,
}

impl StoreEntry {
    fn new(transfer: Transfer) -> Self {
        Self {
            transfer,
            last_updated: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// In-memory store of every tracked transfer
#[derive(Debug)]
pub(crate) struct TransactionStore {
    entries: HashMap<String, StoreEntry>,
    balance_refresh: Arc<dyn BalanceRefresh>,
}

impl TransactionStore {
    pub(crate) fn new(balance_refresh: Arc<dyn BalanceRefresh>) -> Self {
        Self {
            entries: HashMap::new(),
            balance_refresh,
        }
    }

    fn notify(&self, transfer: &Transfer) {
        for request in BalanceRefreshRequest::for_transfer(transfer) {
            self.balance_refresh.refresh(request);
        }
    }

    /// Inserts a freshly submitted transfer as pending.
    pub(crate) fn add(&mut self, mut transfer: Transfer) -> Result<()> {
        if self.entries.contains_key(&transfer.id) {
            return Err(BridgeError::DuplicateId(transfer.id));
        }
        transfer.status = TransferStatus::Pending;
        transfer.resolved_at = None;

        info!(id = %transfer.id, direction = ?transfer.direction, "Tracking transfer");
        self.notify(&transfer);
        self.entries
            .insert(transfer.id.clone(), StoreEntry::new(transfer));
        Ok(())
    }

    /// Inserts transfers discovered by a history load, keeping their inferred status.
    ///
    /// Ids already tracked are left untouched. Returns how many were inserted.
    pub(crate) fn merge_discovered(&mut self, transfers: Vec<Transfer>) -> usize {
        let mut inserted = 0;
        for transfer in transfers {
            if self.entries.contains_key(&transfer.id) {
                continue;
            }
            self.notify(&transfer);
            self.entries
                .insert(transfer.id.clone(), StoreEntry::new(transfer));
            inserted += 1;
        }
        if inserted > 0 {
            debug!(inserted, "Merged discovered transfers");
        }
        inserted
    }

    /// Resolves a pending transfer from its source receipt.
    ///
    /// `l2_message_data` is attached to deposits only. Returns `false` when the transfer
    /// was already terminal and nothing changed.
    pub(crate) fn update_from_receipt(
        &mut self,
        receipt: &TransactionReceipt,
        l2_message_data: Option<serde_json::Value>,
    ) -> Result<bool> {
        let id = Transfer::id_for(receipt.transaction_hash);
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| BridgeError::TransferNotFound(id.clone()))?;

        if entry.transfer.status.is_terminal() {
            return Ok(false);
        }

        let transfer = &mut entry.transfer;
        transfer.status = if receipt.is_success() {
            TransferStatus::Success
        } else {
            TransferStatus::Failure
        };
        transfer.resolved_at = Some(Utc::now());
        transfer.source_block = receipt.block_number;
        if transfer.direction == Direction::Deposit {
            transfer.l2_message_data = l2_message_data;
        }
        entry.touch();

        info!(%id, status = ?entry.transfer.status, "Transfer resolved from receipt");
        let transfer = entry.transfer.clone();
        self.notify(&transfer);
        Ok(true)
    }

    /// Marks a transfer confirmed after its outbox execution landed.
    ///
    /// Pending and successful transfers move to confirmed; confirmed and failed ones are
    /// left as they are.
    pub(crate) fn set_confirmed(
        &mut self,
        id: &str,
        destination_tx_hash: Option<B256>,
    ) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| BridgeError::TransferNotFound(id.to_string()))?;

        if matches!(
            entry.transfer.status,
            TransferStatus::Confirmed | TransferStatus::Failure
        ) {
            return Ok(false);
        }

        entry.transfer.status = TransferStatus::Confirmed;
        entry.transfer.resolved_at = Some(Utc::now());
        if destination_tx_hash.is_some() {
            entry.transfer.destination_tx_hash = destination_tx_hash;
        }
        entry.touch();

        info!(%id, "Transfer confirmed");
        let transfer = entry.transfer.clone();
        self.notify(&transfer);
        Ok(true)
    }

    /// Marks a pending transfer failed. A no-op on any terminal transfer.
    pub(crate) fn set_failure(&mut self, id: &str) -> Result<bool> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| BridgeError::TransferNotFound(id.to_string()))?;

        if entry.transfer.status.is_terminal() {
            return Ok(false);
        }

        entry.transfer.status = TransferStatus::Failure;
        entry.transfer.resolved_at = Some(Utc::now());
        entry.touch();

        info!(%id, "Transfer failed");
        let transfer = entry.transfer.clone();
        self.notify(&transfer);
        Ok(true)
    }

    /// Forgets every pending transfer. Only ever called on explicit user request.
    pub(crate) fn clear_pending(&mut self) -> usize {
        let pending: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.transfer.status == TransferStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &pending {
            if let Some(entry) = self.entries.remove(id) {
                self.notify(&entry.transfer);
            }
        }

        info!(cleared = pending.len(), "Cleared pending transfers");
        pending.len()
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Transfer> {
        self.entries.get(id).map(|entry| &entry.transfer)
    }

    /// Every transfer, newest first
    pub(crate) fn transfers(&self) -> Vec<Transfer> {
        self.filter_transfers(|_| true)
    }

    /// Filter transfers based on status condition, newest first
    pub(crate) fn filter_transfers<F>(&self, filter: F) -> Vec<Transfer>
    where
        F: Fn(&TransferStatus) -> bool,
    {
        let mut transfers: Vec<Transfer> = self
            .entries
            .values()
            .filter(|entry| filter(&entry.transfer.status))
            .map(|entry| entry.transfer.clone())
            .collect();
        transfers.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        transfers
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
