use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;

use crate::wallets::traits::BalanceProvider;

/// Shared context for balance monitoring
#[derive(Debug)]
pub(crate) struct BalanceContext {
    balances: Arc<RwLock<WalletBalances>>,
    providers: HashMap<u64, Arc<dyn BalanceProvider>>,
}

impl BalanceContext {
    pub(crate) fn new(providers: Vec<Arc<dyn BalanceProvider>>) -> Self {
        Self {
            balances: Arc::new(RwLock::new(WalletBalances::default())),
            providers: providers
                .into_iter()
                .map(|provider| (provider.chain_id(), provider))
                .collect(),
        }
    }

    pub(crate) fn balances(&self) -> &Arc<RwLock<WalletBalances>> {
        &self.balances
    }

    pub(crate) fn provider(&self, chain_id: u64) -> Option<&Arc<dyn BalanceProvider>> {
        self.providers.get(&chain_id)
    }
}

/// Last known balance of one account in one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AccountBalance {
    pub(crate) chain_id: u64,
    pub(crate) account: Address,
    /// Parent chain token address, `None` for the native asset
    pub(crate) token_address: Option<Address>,
    pub(crate) symbol: String,
    pub(crate) balance: U256,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Balances of every account touched by a tracked transfer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WalletBalances {
    accounts: Vec<AccountBalance>,
}

impl WalletBalances {
    /// Replaces the entry for the same chain, account and token, or appends.
    pub(crate) fn upsert(&mut self, balance: AccountBalance) {
        match self.accounts.iter_mut().find(|existing| {
            existing.chain_id == balance.chain_id
                && existing.account == balance.account
                && existing.token_address == balance.token_address
        }) {
            Some(existing) => *existing = balance,
            None => self.accounts.push(balance),
        }
    }

    pub(crate) fn accounts(&self) -> &[AccountBalance] {
        &self.accounts
    }
}
