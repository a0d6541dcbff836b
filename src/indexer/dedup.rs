//! Merges overlapping sender and receiver query results.

use std::collections::HashSet;

use alloy_primitives::B256;

use crate::types::Transfer;

/// Keeps the first record seen for every source transaction hash, preserving input order.
///
/// Sender and receiver filtered queries over the same logs return the same transaction
/// for self transfers; later duplicates are assumed identical and dropped. A classic and
/// a nitro record cannot share a hash because the eras cover disjoint block ranges.
pub(crate) fn dedup_transfers(transfers: impl IntoIterator<Item = Transfer>) -> Vec<Transfer> {
    let mut seen: HashSet<B256> = HashSet::new();
    transfers
        .into_iter()
        .filter(|transfer| seen.insert(transfer.source_tx_hash))
        .collect()
}

/// Concatenates query results and deduplicates them
pub(crate) fn merge_results(results: Vec<Vec<Transfer>>) -> Vec<Transfer> {
    dedup_transfers(results.into_iter().flatten())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asset, Direction, TransferStatus};
    use alloy_primitives::{Address, U256};
    use chrono::Utc;
    use hex_literal::hex;

    fn transfer(tx_hash: B256, amount: u64) -> Transfer {
        Transfer {
            id: Transfer::id_for(tx_hash),
            direction: Direction::Withdrawal,
            asset: Asset::Native,
            amount: U256::from(amount),
            sender: Address::with_last_byte(0xa),
            destination: Address::with_last_byte(0xa),
            source_chain_id: 42161,
            destination_chain_id: 1,
            source_tx_hash: tx_hash,
            source_block: 1,
            destination_tx_hash: None,
            status: TransferStatus::Success,
            created_at: Utc::now(),
            resolved_at: None,
            is_classic: false,
            l2_message_data: None,
        }
    }

    #[test]
    fn test_self_transfer_merges_to_one_record() {
        let dead = B256::from(hex!(
            "dead000000000000000000000000000000000000000000000000000000000000"
        ));
        let by_sender = vec![transfer(dead, 1), transfer(B256::with_last_byte(1), 2)];
        let by_receiver = vec![transfer(dead, 1)];

        let merged = merge_results(vec![by_sender, by_receiver]);

        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged.iter().filter(|t| t.source_tx_hash == dead).count(),
            1
        );
    }

    #[test]
    fn test_first_seen_wins() {
        let hash = B256::with_last_byte(7);
        let merged = dedup_transfers(vec![transfer(hash, 1), transfer(hash, 2)]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].amount, U256::from(1));
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let inputs = vec![
            transfer(B256::with_last_byte(1), 1),
            transfer(B256::with_last_byte(2), 2),
            transfer(B256::with_last_byte(1), 1),
            transfer(B256::with_last_byte(3), 3),
            transfer(B256::with_last_byte(2), 2),
        ];

        let once = dedup_transfers(inputs.clone());
        let twice = dedup_transfers(once.clone());

        assert_eq!(once, twice);
        assert!(once.len() <= inputs.len());
        let unique: HashSet<B256> = once.iter().map(|t| t.source_tx_hash).collect();
        assert_eq!(unique.len(), once.len());
    }

    #[test]
    fn test_empty_input() {
        assert!(dedup_transfers(Vec::new()).is_empty());
    }
}
