//! ERC-20 metadata lookups, cached per token for the life of the process.

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::{sol, SolCall};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    chain::{types::CallRequest, ChainClient},
    errors::Result,
    types::TokenInfo,
};

sol! {
    interface IERC20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
    }
}

/// Token metadata read from the parent chain
#[derive(Debug, Clone)]
pub(crate) struct TokenRegistry {
    parent: Arc<dyn ChainClient>,
    cache: Arc<RwLock<HashMap<Address, TokenInfo>>>,
}

impl TokenRegistry {
    pub(crate) fn new(parent: Arc<dyn ChainClient>) -> Self {
        Self {
            parent,
            cache: Arc::default(),
        }
    }

    async fn read<C: SolCall>(&self, token: Address, call: C) -> Result<C::Return> {
        let request = CallRequest {
            from: None,
            to: token,
            data: Bytes::from(call.abi_encode()),
        };
        let output = self.parent.call(&request).await?;
        Ok(C::abi_decode_returns(&output, true)?)
    }

    /// Metadata for `token`, falling back to its address and 18 decimals when the
    /// contract does not expose them.
    pub(crate) async fn token_info(&self, token: Address) -> TokenInfo {
        if let Some(info) = self.cache.read().await.get(&token) {
            return info.clone();
        }

        let symbol = self.read(token, IERC20::symbolCall {}).await;
        let decimals = self.read(token, IERC20::decimalsCall {}).await;
        let info = match (symbol, decimals) {
            (Ok(symbol), Ok(decimals)) => TokenInfo {
                token_address: token,
                symbol: symbol._0,
                decimals: decimals._0,
            },
            (symbol, decimals) => {
                warn!(
                    %token,
                    symbol_error = ?symbol.err(),
                    decimals_error = ?decimals.err(),
                    "Token metadata unavailable, using fallback"
                );
                // not cached, a later lookup may succeed
                return TokenInfo::fallback(token);
            }
        };

        self.cache.write().await.insert(token, info.clone());
        info
    }

    /// Metadata for every token in `tokens`
    pub(crate) async fn token_infos(
        &self,
        tokens: impl IntoIterator<Item = Address>,
    ) -> HashMap<Address, TokenInfo> {
        let mut infos = HashMap::new();
        for token in tokens {
            if !infos.contains_key(&token) {
                let info = self.token_info(token).await;
                infos.insert(token, info);
            }
        }
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::testing::MockChain, errors::BridgeError};
    use alloy_sol_types::SolValue;

    const USDC: Address = Address::with_last_byte(0xc0);

    fn erc20_chain() -> MockChain {
        let mut chain = MockChain::new(1, 0);
        chain.call_handler = Some(Box::new(|request| {
            if request.to != USDC {
                return Err(BridgeError::Rpc("execution reverted".to_string()));
            }
            if request.data[..4] == IERC20::symbolCall::SELECTOR {
                Ok(Bytes::from("USDC".to_string().abi_encode()))
            } else {
                Ok(Bytes::from(<alloy_sol_types::sol_data::Uint<8> as alloy_sol_types::SolType>::abi_encode(&6u8)))
            }
        }));
        chain
    }

    #[tokio::test]
    async fn test_metadata_is_read_once() {
        let chain = Arc::new(erc20_chain());
        let registry = TokenRegistry::new(chain.clone());

        let first = registry.token_info(USDC).await;
        let second = registry.token_info(USDC).await;

        assert_eq!(first.symbol, "USDC");
        assert_eq!(first.decimals, 6);
        assert_eq!(first, second);
        assert_eq!(chain.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_token_falls_back() {
        let registry = TokenRegistry::new(Arc::new(erc20_chain()));
        let other = Address::with_last_byte(0xdd);

        let info = registry.token_info(other).await;

        assert_eq!(info, TokenInfo::fallback(other));
        assert_eq!(info.decimals, 18);
    }
}
