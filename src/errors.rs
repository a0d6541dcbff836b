use std::time::Duration;

use thiserror::Error;

use crate::types::OutgoingMessageState;

/// Error types for transfer tracking and reconciliation
#[derive(Debug, Error)]
pub(crate) enum BridgeError {
    #[error("transfer {0} already exists")]
    DuplicateId(String),

    #[error("transfer {0} not found")]
    TransferNotFound(String),

    #[error("pending withdrawal {0} not found")]
    WithdrawalNotFound(String),

    #[error("expected exactly one outgoing message in {tx_hash}, found {found}")]
    UnexpectedMessageCount { tx_hash: String, found: usize },

    #[error("outgoing message {0} does not exist on chain")]
    MessageNotFound(String),

    #[error("message {unique_id} is {state}, only confirmed messages can be claimed")]
    NotClaimable {
        unique_id: String,
        state: OutgoingMessageState,
    },

    #[error("claim transaction {0} reverted")]
    ClaimFailed(String),

    #[error("token withdrawal from a contract wallet requires a destination address")]
    MissingDestination,

    #[error("no chain client registered for chain {0}")]
    UnknownChain(u64),

    #[error("unsupported chain pair {parent} -> {child}")]
    UnsupportedChainPair { parent: u64, child: u64 },

    #[error("RPC request failed: {0}")]
    Rpc(String),

    #[error("subgraph request failed: {0}")]
    Subgraph(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(e: reqwest::Error) -> Self {
        BridgeError::Subgraph(e.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Decode(e.to_string())
    }
}

impl From<jsonrpsee::core::ClientError> for BridgeError {
    fn from(e: jsonrpsee::core::ClientError) -> Self {
        BridgeError::Rpc(e.to_string())
    }
}

impl From<alloy_sol_types::Error> for BridgeError {
    fn from(e: alloy_sol_types::Error) -> Self {
        BridgeError::Decode(e.to_string())
    }
}

impl BridgeError {
    /// Whether the failure is transient I/O that a later poll may recover from.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            BridgeError::Rpc(_) | BridgeError::Subgraph(_) | BridgeError::Timeout(_)
        )
    }
}

pub(crate) type Result<T> = std::result::Result<T, BridgeError>;
