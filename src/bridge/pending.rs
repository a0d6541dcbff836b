use std::collections::HashMap;
use tracing::debug;

use crate::{
    errors::{BridgeError, Result},
    types::{OutgoingMessage, OutgoingMessageState},
};

/// Outgoing messages of tracked withdrawals, keyed by unique id
#[derive(Debug, Default, Clone)]
pub(crate) struct PendingWithdrawalMap {
    messages: HashMap<String, OutgoingMessage>,
}

impl PendingWithdrawalMap {
    /// Inserts `message` unless its unique id is already tracked.
    pub(crate) fn insert(&mut self, message: OutgoingMessage) -> bool {
        if self.messages.contains_key(&message.unique_id) {
            return false;
        }
        debug!(unique_id = %message.unique_id, "Tracking outgoing message");
        self.messages.insert(message.unique_id.clone(), message);
        true
    }

    pub(crate) fn get(&self, unique_id: &str) -> Option<&OutgoingMessage> {
        self.messages.get(unique_id)
    }

    /// Records a freshly resolved state and ETA.
    ///
    /// Executed is terminal; later updates of an executed message are ignored.
    pub(crate) fn set_state(
        &mut self,
        unique_id: &str,
        state: OutgoingMessageState,
        eta_seconds: Option<u64>,
    ) -> Result<()> {
        let message = self
            .messages
            .get_mut(unique_id)
            .ok_or_else(|| BridgeError::WithdrawalNotFound(unique_id.to_string()))?;
        if message.state == OutgoingMessageState::Executed {
            return Ok(());
        }
        message.state = state;
        message.eta_seconds = eta_seconds;
        Ok(())
    }

    /// Messages that have not reached executed yet
    pub(crate) fn unresolved(&self) -> Vec<OutgoingMessage> {
        self.messages
            .values()
            .filter(|message| message.state != OutgoingMessageState::Executed)
            .cloned()
            .collect()
    }

    /// Every message, ordered by unique id
    pub(crate) fn messages(&self) -> Vec<OutgoingMessage> {
        let mut messages: Vec<OutgoingMessage> = self.messages.values().cloned().collect();
        messages.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        messages
    }

    pub(crate) fn contains_transfer(&self, transfer_id: &str) -> bool {
        self.messages
            .values()
            .any(|message| message.transfer_id == transfer_id)
    }
}
