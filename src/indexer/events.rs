//! Bridge event definitions and their decoding into [`Transfer`] records.
//!
//! The rollup emitted different events before and after its protocol upgrade. Block
//! ranges are split at the upgrade block and each segment is decoded with the shape
//! of its era.

use alloy_primitives::{Address, LogData, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use chrono::{DateTime, Utc};
use hex_literal::hex;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::warn;

use crate::{
    chain::types::LogEntry,
    errors::{BridgeError, Result},
    types::{Asset, BlockRange, Direction, TokenInfo, Transfer, TransferStatus},
};

/// ArbSys precompile, emits the L2 to L1 events in both eras
pub(crate) static ARB_SYS_ADDRESS: Lazy<Address> =
    Lazy::new(|| Address::from(hex!("0000000000000000000000000000000000000064")));

/// `MessageDelivered.kind` of a native deposit
pub(crate) const ETH_DEPOSIT_MESSAGE_KIND: u8 = 12;

sol! {
    /// Nitro L2 to L1 message
    #[derive(Debug, PartialEq, Eq)]
    event L2ToL1Tx(
        address caller,
        address indexed destination,
        uint256 indexed hash,
        uint256 indexed position,
        uint256 arbBlockNum,
        uint256 ethBlockNum,
        uint256 timestamp,
        uint256 callvalue,
        bytes data
    );

    /// Classic L2 to L1 message
    #[derive(Debug, PartialEq, Eq)]
    event L2ToL1Transaction(
        address caller,
        address indexed destination,
        uint256 indexed uniqueId,
        uint256 indexed batchNumber,
        uint256 indexInBatch,
        uint256 arbBlockNum,
        uint256 ethBlockNum,
        uint256 timestamp,
        uint256 callvalue,
        bytes data
    );

    /// Child gateway token withdrawal
    #[derive(Debug, PartialEq, Eq)]
    event WithdrawalInitiated(
        address l1Token,
        address indexed _from,
        address indexed _to,
        uint256 indexed _l2ToL1Id,
        uint256 _exitNum,
        uint256 _amount
    );

    /// Parent gateway token deposit
    #[derive(Debug, PartialEq, Eq)]
    event DepositInitiated(
        address l1Token,
        address indexed _from,
        address indexed _to,
        uint256 indexed _sequenceNumber,
        uint256 _amount
    );

    /// Bridge inbox message, carries the sender
    #[derive(Debug, PartialEq, Eq)]
    event MessageDelivered(
        uint256 indexed messageIndex,
        bytes32 indexed beforeInboxAcc,
        address inbox,
        uint8 kind,
        address sender,
        bytes32 messageDataHash,
        uint256 baseFeeL1,
        uint64 timestamp
    );

    /// Inbox message payload, carries destination and amount of a native deposit
    #[derive(Debug, PartialEq, Eq)]
    event InboxMessageDelivered(uint256 indexed messageNum, bytes data);
}

/// Protocol era of a block segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Era {
    Classic,
    Nitro,
}

impl Era {
    pub(crate) fn is_classic(&self) -> bool {
        matches!(self, Era::Classic)
    }
}

/// Splits `range` at `nitro_genesis_block`, classic segment first.
///
/// A genesis block of 0 means the chain never ran the classic protocol.
pub(crate) fn split_by_era(range: BlockRange, nitro_genesis_block: u64) -> Vec<(Era, BlockRange)> {
    let mut segments = Vec::with_capacity(2);
    if range.from_block < nitro_genesis_block {
        let classic_end = range.to_block.min(nitro_genesis_block - 1);
        if let Some(classic) = BlockRange::new(range.from_block, classic_end) {
            segments.push((Era::Classic, classic));
        }
    }
    if let Some(nitro) = BlockRange::new(range.from_block.max(nitro_genesis_block), range.to_block) {
        segments.push((Era::Nitro, nitro));
    }
    segments
}

/// Decodes `log` as event `E`, validating topic 0.
pub(crate) fn decode_log<E: SolEvent>(log: &LogEntry) -> Result<E> {
    let data = LogData::new_unchecked(log.topics.clone(), log.data.clone());
    E::decode_log_data(&data, true).map_err(|e| {
        BridgeError::Decode(format!(
            "{} in tx {:#x}: {e}",
            E::SIGNATURE,
            log.transaction_hash
        ))
    })
}

/// Chain ids, era, block timestamps and token metadata needed to decode one batch of logs
#[derive(Debug, Clone, Default)]
pub(crate) struct DecodeContext {
    pub(crate) parent_chain_id: u64,
    pub(crate) child_chain_id: u64,
    pub(crate) era: Option<Era>,
    pub(crate) block_times: HashMap<u64, DateTime<Utc>>,
    pub(crate) tokens: HashMap<Address, TokenInfo>,
}

impl DecodeContext {
    fn is_classic(&self) -> bool {
        self.era.map(|era| era.is_classic()).unwrap_or(false)
    }

    fn block_time(&self, block_number: u64) -> DateTime<Utc> {
        self.block_times
            .get(&block_number)
            .copied()
            .unwrap_or_else(Utc::now)
    }

    fn token(&self, address: Address) -> TokenInfo {
        self.tokens
            .get(&address)
            .cloned()
            .unwrap_or_else(|| TokenInfo::fallback(address))
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &self,
        log: &LogEntry,
        direction: Direction,
        asset: Asset,
        amount: U256,
        sender: Address,
        destination: Address,
        created_at: DateTime<Utc>,
    ) -> Transfer {
        let (source_chain_id, destination_chain_id) = match direction {
            Direction::Deposit => (self.parent_chain_id, self.child_chain_id),
            Direction::Withdrawal => (self.child_chain_id, self.parent_chain_id),
        };
        Transfer {
            id: Transfer::id_for(log.transaction_hash),
            direction,
            asset,
            amount,
            sender,
            destination,
            source_chain_id,
            destination_chain_id,
            source_tx_hash: log.transaction_hash,
            source_block: log.block_number,
            destination_tx_hash: None,
            // the log exists, so the source transaction landed
            status: TransferStatus::Success,
            created_at,
            resolved_at: Some(created_at),
            is_classic: self.is_classic(),
            l2_message_data: None,
        }
    }
}

fn timestamp_from(seconds: U256) -> Option<DateTime<Utc>> {
    let seconds: u64 = seconds.try_into().ok()?;
    DateTime::from_timestamp(i64::try_from(seconds).ok()?, 0)
}

/// Native withdrawal from an ArbSys log of either era
pub(crate) fn decode_native_withdrawal(log: &LogEntry, ctx: &DecodeContext) -> Result<Transfer> {
    let (caller, destination, callvalue, timestamp) = if ctx.is_classic() {
        let event = decode_log::<L2ToL1Transaction>(log)?;
        (event.caller, event.destination, event.callvalue, event.timestamp)
    } else {
        let event = decode_log::<L2ToL1Tx>(log)?;
        (event.caller, event.destination, event.callvalue, event.timestamp)
    };

    let created_at = timestamp_from(timestamp).unwrap_or_else(|| ctx.block_time(log.block_number));
    Ok(ctx.transfer(
        log,
        Direction::Withdrawal,
        Asset::Native,
        callvalue,
        caller,
        destination,
        created_at,
    ))
}

/// Token withdrawal from a child gateway `WithdrawalInitiated` log
pub(crate) fn decode_token_withdrawal(log: &LogEntry, ctx: &DecodeContext) -> Result<Transfer> {
    let event = decode_log::<WithdrawalInitiated>(log)?;
    Ok(ctx.transfer(
        log,
        Direction::Withdrawal,
        Asset::Erc20(ctx.token(event.l1Token)),
        event._amount,
        event._from,
        event._to,
        ctx.block_time(log.block_number),
    ))
}

/// Token deposit from a parent gateway `DepositInitiated` log
pub(crate) fn decode_token_deposit(log: &LogEntry, ctx: &DecodeContext) -> Result<Transfer> {
    let event = decode_log::<DepositInitiated>(log)?;
    Ok(ctx.transfer(
        log,
        Direction::Deposit,
        Asset::Erc20(ctx.token(event.l1Token)),
        event._amount,
        event._from,
        event._to,
        ctx.block_time(log.block_number),
    ))
}

/// Joins bridge `MessageDelivered` logs with inbox `InboxMessageDelivered` logs
/// into native deposits.
///
/// Messages of any other kind, messages without a matching payload and logs that do
/// not decode are skipped. Payloads are `destination (20 bytes) || amount (32 bytes)`.
pub(crate) fn decode_native_deposits(
    message_logs: &[LogEntry],
    inbox_logs: &[LogEntry],
    ctx: &DecodeContext,
) -> Vec<Transfer> {
    let mut payloads: HashMap<U256, (Address, U256)> = HashMap::new();
    for log in inbox_logs {
        let event = match decode_log::<InboxMessageDelivered>(log) {
            Ok(event) => event,
            Err(e) => {
                warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping undecodable inbox log");
                continue;
            }
        };
        if event.data.len() < 52 {
            continue;
        }
        let destination = Address::from_slice(&event.data[..20]);
        let amount = U256::from_be_slice(&event.data[20..52]);
        payloads.insert(event.messageNum, (destination, amount));
    }

    let mut deposits = Vec::new();
    for log in message_logs {
        let event = match decode_log::<MessageDelivered>(log) {
            Ok(event) => event,
            Err(e) => {
                warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping undecodable bridge log");
                continue;
            }
        };
        if event.kind != ETH_DEPOSIT_MESSAGE_KIND {
            continue;
        }
        let Some((destination, amount)) = payloads.get(&event.messageIndex) else {
            continue;
        };
        let created_at = DateTime::from_timestamp(event.timestamp as i64, 0)
            .unwrap_or_else(|| ctx.block_time(log.block_number));
        deposits.push(ctx.transfer(
            log,
            Direction::Deposit,
            Asset::Native,
            *amount,
            event.sender,
            *destination,
            created_at,
        ));
    }
    deposits
}

/// Parent chain token address of a gateway token log
pub(crate) fn token_address(log: &LogEntry) -> Option<Address> {
    match log.topics.first() {
        Some(topic) if *topic == WithdrawalInitiated::SIGNATURE_HASH => {
            decode_log::<WithdrawalInitiated>(log).ok().map(|e| e.l1Token)
        }
        Some(topic) if *topic == DepositInitiated::SIGNATURE_HASH => {
            decode_log::<DepositInitiated>(log).ok().map(|e| e.l1Token)
        }
        _ => None,
    }
}

/// Topic 0 for the native withdrawal event of `era`
pub(crate) fn native_withdrawal_topic(era: Era) -> B256 {
    match era {
        Era::Classic => L2ToL1Transaction::SIGNATURE_HASH,
        Era::Nitro => L2ToL1Tx::SIGNATURE_HASH,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Log builders shared by the indexer and resolver tests.

    use super::*;
    use alloy_primitives::Bytes;

    pub(crate) fn log_from<E: SolEvent>(
        event: &E,
        address: Address,
        block_number: u64,
        tx_hash: B256,
    ) -> LogEntry {
        let data = event.encode_log_data();
        LogEntry {
            address,
            data: Bytes::from(data.data.to_vec()),
            topics: data.topics().to_vec(),
            block_number,
            transaction_hash: tx_hash,
        }
    }

    pub(crate) fn nitro_withdrawal(
        caller: Address,
        destination: Address,
        position: u64,
        callvalue: u64,
    ) -> L2ToL1Tx {
        L2ToL1Tx {
            caller,
            destination,
            hash: U256::from(position + 1_000),
            position: U256::from(position),
            arbBlockNum: U256::from(100),
            ethBlockNum: U256::from(17_000_000),
            timestamp: U256::from(1_700_000_000u64),
            callvalue: U256::from(callvalue),
            data: Default::default(),
        }
    }

    pub(crate) fn classic_withdrawal(
        caller: Address,
        destination: Address,
        batch_number: u64,
        index_in_batch: u64,
    ) -> L2ToL1Transaction {
        L2ToL1Transaction {
            caller,
            destination,
            uniqueId: U256::from(batch_number * 1_000 + index_in_batch),
            batchNumber: U256::from(batch_number),
            indexInBatch: U256::from(index_in_batch),
            arbBlockNum: U256::from(50),
            ethBlockNum: U256::from(12_000_000),
            timestamp: U256::from(1_600_000_000u64),
            callvalue: U256::from(1u64),
            data: Default::default(),
        }
    }
}
