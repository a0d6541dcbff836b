//! Domain types shared by the fetcher, the stores and the resolver.

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Symbol of the parent chain's native currency
pub(crate) const NATIVE_SYMBOL: &str = "ETH";

/// Decimals of the parent chain's native currency
pub(crate) const NATIVE_DECIMALS: u8 = 18;

/// Transfer direction
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Direction {
    /// Parent chain to child chain
    Deposit,
    /// Child chain back to parent chain
    Withdrawal,
}

/// Asset kind without token metadata, used for filtering
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AssetKind {
    Native,
    Erc20,
}

/// ERC-20 token metadata
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TokenInfo {
    /// Token address on the parent chain
    pub(crate) token_address: Address,
    pub(crate) symbol: String,
    pub(crate) decimals: u8,
}

impl TokenInfo {
    /// Metadata for a token whose `symbol()`/`decimals()` could not be read
    pub(crate) fn fallback(token_address: Address) -> Self {
        Self {
            token_address,
            symbol: format!("{token_address:#x}"),
            decimals: NATIVE_DECIMALS,
        }
    }
}

/// Bridged asset
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum Asset {
    Native,
    Erc20(TokenInfo),
}

impl Asset {
    pub(crate) fn kind(&self) -> AssetKind {
        match self {
            Asset::Native => AssetKind::Native,
            Asset::Erc20(_) => AssetKind::Erc20,
        }
    }

    pub(crate) fn symbol(&self) -> &str {
        match self {
            Asset::Native => NATIVE_SYMBOL,
            Asset::Erc20(token) => &token.symbol,
        }
    }

    pub(crate) fn decimals(&self) -> u8 {
        match self {
            Asset::Native => NATIVE_DECIMALS,
            Asset::Erc20(token) => token.decimals,
        }
    }

    pub(crate) fn token_address(&self) -> Option<Address> {
        match self {
            Asset::Native => None,
            Asset::Erc20(token) => Some(token.token_address),
        }
    }
}

/// Transfer status
///
/// ```text
/// pending -> success
///         -> failure
///         -> confirmed   (withdrawals, after outbox execution)
/// ```
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TransferStatus {
    Pending,
    Success,
    Failure,
    Confirmed,
}

impl TransferStatus {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

/// One bridging operation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct Transfer {
    /// Stable identifier, the source transaction hash
    pub(crate) id: String,
    pub(crate) direction: Direction,
    pub(crate) asset: Asset,
    /// Amount in the asset's smallest unit
    pub(crate) amount: U256,
    pub(crate) sender: Address,
    pub(crate) destination: Address,
    pub(crate) source_chain_id: u64,
    pub(crate) destination_chain_id: u64,
    pub(crate) source_tx_hash: B256,
    /// Block of the source transaction on the source chain
    pub(crate) source_block: u64,
    /// Retryable redemption or outbox execution, once landed
    pub(crate) destination_tx_hash: Option<B256>,
    pub(crate) status: TransferStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) resolved_at: Option<DateTime<Utc>>,
    /// Created before the protocol upgrade
    pub(crate) is_classic: bool,
    /// Retryable ticket sub-status of a deposit, owned by the bridge SDK
    pub(crate) l2_message_data: Option<serde_json::Value>,
}

impl Transfer {
    pub(crate) fn id_for(tx_hash: B256) -> String {
        format!("{tx_hash:#x}")
    }
}

/// Coordinates of an L2 to L1 message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(tag = "era", rename_all = "lowercase")]
pub(crate) enum MessageCoordinates {
    Classic {
        batch_number: U256,
        index_in_batch: U256,
    },
    Nitro {
        position: U256,
    },
}

impl MessageCoordinates {
    pub(crate) fn is_classic(&self) -> bool {
        matches!(self, MessageCoordinates::Classic { .. })
    }

    /// Canonical identifier used as pending map key and executed cache key.
    pub(crate) fn unique_id(&self) -> String {
        match self {
            MessageCoordinates::Classic {
                batch_number,
                index_in_batch,
            } => format!("classic-{batch_number}-{index_in_batch}"),
            MessageCoordinates::Nitro { position } => format!("nitro-{position}"),
        }
    }
}

/// Outgoing message state
///
/// ```text
/// NOT_FOUND -> UNCONFIRMED -> CONFIRMED -> EXECUTED
/// ```
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum OutgoingMessageState {
    NotFound,
    Unconfirmed,
    Confirmed,
    Executed,
}

impl fmt::Display for OutgoingMessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutgoingMessageState::NotFound => "NOT_FOUND",
            OutgoingMessageState::Unconfirmed => "UNCONFIRMED",
            OutgoingMessageState::Confirmed => "CONFIRMED",
            OutgoingMessageState::Executed => "EXECUTED",
        };
        write!(f, "{s}")
    }
}

/// L2 to L1 leg of a withdrawal
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct OutgoingMessage {
    pub(crate) coordinates: MessageCoordinates,
    pub(crate) unique_id: String,
    pub(crate) state: OutgoingMessageState,
    /// Id of the originating transfer
    pub(crate) transfer_id: String,
    pub(crate) value: U256,
    pub(crate) asset: Asset,
    pub(crate) destination: Address,
    /// Parent chain block number recorded when the message was emitted
    pub(crate) origin_parent_block: u64,
    /// Estimated seconds until the message can be claimed
    pub(crate) eta_seconds: Option<u64>,
}

impl OutgoingMessage {
    pub(crate) fn new(
        coordinates: MessageCoordinates,
        transfer: &Transfer,
        origin_parent_block: u64,
    ) -> Self {
        Self {
            unique_id: coordinates.unique_id(),
            coordinates,
            state: OutgoingMessageState::Unconfirmed,
            transfer_id: transfer.id.clone(),
            value: transfer.amount,
            asset: transfer.asset.clone(),
            destination: transfer.destination,
            origin_parent_block,
            eta_seconds: None,
        }
    }

    pub(crate) fn is_classic(&self) -> bool {
        self.coordinates.is_classic()
    }

    pub(crate) fn symbol(&self) -> &str {
        self.asset.symbol()
    }

    pub(crate) fn decimals(&self) -> u8 {
        self.asset.decimals()
    }
}

/// Inclusive block range, `from_block <= to_block`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BlockRange {
    pub(crate) from_block: u64,
    pub(crate) to_block: u64,
}

impl BlockRange {
    /// Returns `None` when `from_block > to_block`.
    pub(crate) fn new(from_block: u64, to_block: u64) -> Option<Self> {
        (from_block <= to_block).then_some(Self {
            from_block,
            to_block,
        })
    }

    /// Number of blocks covered
    pub(crate) fn len(&self) -> u64 {
        self.to_block - self.from_block + 1
    }
}

/// Upper bound of a block query
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BlockTag {
    Number(u64),
    Latest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_id_is_tagged_by_era() {
        let classic = MessageCoordinates::Classic {
            batch_number: U256::from(5),
            index_in_batch: U256::from(2),
        };
        let nitro = MessageCoordinates::Nitro {
            position: U256::from(5),
        };

        assert_eq!(classic.unique_id(), "classic-5-2");
        assert_eq!(nitro.unique_id(), "nitro-5");
        assert!(classic.is_classic());
        assert!(!nitro.is_classic());
    }

    #[test]
    fn test_block_range_rejects_inverted_bounds() {
        assert!(BlockRange::new(10, 9).is_none());
        assert_eq!(BlockRange::new(10, 10).map(|r| r.len()), Some(1));
        assert_eq!(BlockRange::new(0, 9_999).map(|r| r.len()), Some(10_000));
    }

    #[test]
    fn test_only_pending_is_not_terminal() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Success.is_terminal());
        assert!(TransferStatus::Failure.is_terminal());
        assert!(TransferStatus::Confirmed.is_terminal());
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&OutgoingMessageState::NotFound).unwrap();
        assert_eq!(json, "\"NOT_FOUND\"");
        assert_eq!(OutgoingMessageState::Confirmed.to_string(), "CONFIRMED");
    }
}
