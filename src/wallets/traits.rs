use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{
    errors::Result,
    types::{Asset, Transfer},
};

/// Balance that may have changed after a transfer mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct BalanceRefreshRequest {
    pub(crate) chain_id: u64,
    pub(crate) account: Address,
    pub(crate) asset: Asset,
}

impl BalanceRefreshRequest {
    /// Both legs of `transfer`: the sender on the source chain and the destination on the
    /// destination chain.
    pub(crate) fn for_transfer(transfer: &Transfer) -> [Self; 2] {
        [
            Self {
                chain_id: transfer.source_chain_id,
                account: transfer.sender,
                asset: transfer.asset.clone(),
            },
            Self {
                chain_id: transfer.destination_chain_id,
                account: transfer.destination,
                asset: transfer.asset.clone(),
            },
        ]
    }
}

/// Collaborator notified whenever a transfer is mutated
///
/// Implementations must not block; the store calls this while holding its lock.
pub(crate) trait BalanceRefresh: Send + Sync + Debug {
    fn refresh(&self, request: BalanceRefreshRequest);
}

/// Represents a balance provider that can fetch balances from a chain
#[async_trait]
pub(crate) trait BalanceProvider: Send + Sync + Debug {
    /// Chain the provider reads from
    fn chain_id(&self) -> u64;

    /// Fetch the balance of `account` in `asset`
    async fn fetch_balance(&self, account: Address, asset: &Asset) -> Result<U256>;
}
