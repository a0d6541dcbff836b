use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::{
    chain::{types::CallRequest, ChainClient},
    errors::{BridgeError, Result},
    indexer::tokens::IERC20,
    types::Asset,
    wallets::{
        context::{AccountBalance, BalanceContext, WalletBalances},
        traits::{BalanceProvider, BalanceRefresh, BalanceRefreshRequest},
    },
};

/// Capacity of the refresh channel; slow consumers skip older requests.
const REFRESH_CHANNEL_CAPACITY: usize = 256;

/// [`BalanceRefresh`] that fans requests out over a broadcast channel
#[derive(Debug, Clone)]
pub(crate) struct BalanceNotifier {
    sender: broadcast::Sender<BalanceRefreshRequest>,
}

impl BalanceNotifier {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(REFRESH_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<BalanceRefreshRequest> {
        self.sender.subscribe()
    }
}

impl BalanceRefresh for BalanceNotifier {
    fn refresh(&self, request: BalanceRefreshRequest) {
        // no subscribers is fine, nobody is watching balances
        if self.sender.send(request).is_err() {
            debug!("No balance subscribers");
        }
    }
}

/// Reads balances from one chain
///
/// ERC-20 balances are read with `balanceOf` on the parent chain only, since the token
/// address carried by a transfer is the parent chain address.
#[derive(Debug)]
pub(crate) struct ChainBalanceProvider {
    client: Arc<dyn ChainClient>,
    is_parent: bool,
}

impl ChainBalanceProvider {
    pub(crate) fn new(client: Arc<dyn ChainClient>, is_parent: bool) -> Self {
        Self { client, is_parent }
    }
}

#[async_trait]
impl BalanceProvider for ChainBalanceProvider {
    fn chain_id(&self) -> u64 {
        self.client.chain_id()
    }

    async fn fetch_balance(&self, account: Address, asset: &Asset) -> Result<U256> {
        match asset {
            Asset::Native => self.client.get_balance(account).await,
            Asset::Erc20(token) if self.is_parent => {
                let call = IERC20::balanceOfCall { account };
                let request = CallRequest {
                    from: None,
                    to: token.token_address,
                    data: Bytes::from(call.abi_encode()),
                };
                let output = self.client.call(&request).await?;
                Ok(IERC20::balanceOfCall::abi_decode_returns(&output, true)?._0)
            }
            Asset::Erc20(token) => Err(BridgeError::Config(format!(
                "no child chain address known for token {}",
                token.token_address
            ))),
        }
    }
}

async fn refresh_balance(context: &BalanceContext, request: &BalanceRefreshRequest) {
    let Some(provider) = context.provider(request.chain_id) else {
        debug!(chain_id = request.chain_id, "No balance provider for chain");
        return;
    };

    match provider.fetch_balance(request.account, &request.asset).await {
        Ok(balance) => {
            let mut balances = context.balances().write().await;
            balances.upsert(AccountBalance {
                chain_id: request.chain_id,
                account: request.account,
                token_address: request.asset.token_address(),
                symbol: request.asset.symbol().to_string(),
                balance,
                updated_at: Utc::now(),
            });
        }
        Err(e) => warn!(
            chain_id = request.chain_id,
            account = %request.account,
            error = %e,
            "Balance refresh failed"
        ),
    }
}

/// Background task that refreshes balances as transfers change
pub(crate) async fn balance_monitoring_task(
    context: Arc<BalanceContext>,
    mut requests: broadcast::Receiver<BalanceRefreshRequest>,
) {
    info!("Starting wallet balance monitoring task");

    loop {
        match requests.recv().await {
            Ok(request) => refresh_balance(&context, &request).await,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Balance refresh requests dropped");
            }
            Err(RecvError::Closed) => {
                info!("Balance refresh channel closed, stopping");
                break;
            }
        }
    }
}

/// API endpoint to get current balances
pub(crate) async fn get_balances(context: Arc<BalanceContext>) -> axum::Json<WalletBalances> {
    let balances = context.balances().read().await;
    axum::Json(balances.clone())
}
