use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::BlockRange;

/// Represents a subset of an Ethereum log entry returned by `eth_getLogs`.
///
/// `logIndex`, `transactionIndex`, `removed` and `blockHash` are not used by the
/// transfer decoders and are omitted.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub(crate) struct LogEntry {
    /// The emitting contract address
    pub(crate) address: Address,
    /// ABI-encoded event data
    #[serde(deserialize_with = "from_hex_bytes")]
    pub(crate) data: Bytes,
    /// Indexed event parameters, the first is the event signature
    pub(crate) topics: Vec<B256>,

    /// Block number containing the log
    #[serde(rename = "blockNumber", deserialize_with = "from_hex_u64")]
    pub(crate) block_number: u64,

    /// Hash of the emitting transaction
    #[serde(rename = "transactionHash")]
    pub(crate) transaction_hash: B256,
}

/// Subset of `eth_getTransactionReceipt`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub(crate) struct TransactionReceipt {
    #[serde(rename = "transactionHash")]
    pub(crate) transaction_hash: B256,

    #[serde(rename = "blockNumber", deserialize_with = "from_hex_u64")]
    pub(crate) block_number: u64,

    /// `0x1` on success, `0x0` on revert
    #[serde(deserialize_with = "from_hex_u64")]
    pub(crate) status: u64,

    pub(crate) from: Address,

    #[serde(default)]
    pub(crate) to: Option<Address>,

    #[serde(default)]
    pub(crate) logs: Vec<LogEntry>,
}

impl TransactionReceipt {
    pub(crate) fn is_success(&self) -> bool {
        self.status == 1
    }
}

/// Subset of `eth_getBlockByNumber`/`eth_getBlockByHash`
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub(crate) struct BlockHeader {
    #[serde(deserialize_with = "from_hex_u64")]
    pub(crate) number: u64,

    pub(crate) hash: B256,

    #[serde(deserialize_with = "from_hex_u64")]
    pub(crate) timestamp: u64,

    /// Number of L2 to L1 messages sent up to and including this block (Arbitrum only)
    #[serde(rename = "sendCount", default, deserialize_with = "from_opt_hex_u64")]
    pub(crate) send_count: Option<u64>,

    /// Parent chain block number recorded by an Arbitrum block
    #[serde(rename = "l1BlockNumber", default, deserialize_with = "from_opt_hex_u64")]
    pub(crate) l1_block_number: Option<u64>,
}

/// `eth_getLogs` filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LogFilter {
    pub(crate) address: Address,
    pub(crate) range: BlockRange,
    /// Topic positions; `None` matches anything
    pub(crate) topics: Vec<Option<B256>>,
}

impl LogFilter {
    pub(crate) fn new(address: Address, range: BlockRange, topics: Vec<Option<B256>>) -> Self {
        Self {
            address,
            range,
            topics,
        }
    }

    /// Same filter over another range
    pub(crate) fn with_range(&self, range: BlockRange) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    pub(crate) fn to_rpc_params(&self) -> serde_json::Value {
        serde_json::json!({
            "fromBlock": format!("{:#x}", self.range.from_block),
            "toBlock": format!("{:#x}", self.range.to_block),
            "address": format!("{:#x}", self.address),
            "topics": self.topics,
        })
    }
}

/// `eth_call`/`eth_estimateGas` request
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) from: Option<Address>,
    pub(crate) to: Address,
    pub(crate) data: Bytes,
}

/// Left-pads an address into a topic word
pub(crate) fn address_topic(address: Address) -> B256 {
    address.into_word()
}

/// Parses a `0x` prefixed hex quantity
pub(crate) fn parse_hex_u64(hex_str: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(hex_str.trim_start_matches("0x"), 16)
}

fn from_hex_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str: String = Deserialize::deserialize(deserializer)?;
    parse_hex_u64(&hex_str).map_err(serde::de::Error::custom)
}

fn from_opt_hex_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str: Option<String> = Deserialize::deserialize(deserializer)?;
    hex_str
        .map(|s| parse_hex_u64(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn from_hex_bytes<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str: String = Deserialize::deserialize(deserializer)?;
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| serde::de::Error::custom(format!("invalid hex: {e}")))?;
    Ok(Bytes::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_receipt_deserializes_hex_quantities() {
        let receipt: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
            "blockNumber": "0x10",
            "status": "0x1",
            "from": "0x0000000000000000000000000000000000000001",
            "to": null,
            "logs": [{
                "address": "0x0000000000000000000000000000000000000064",
                "data": "0x",
                "topics": [],
                "blockNumber": "0x10",
                "transactionHash": "0x00000000000000000000000000000000000000000000000000000000000000aa"
            }]
        }))
        .unwrap();

        assert_eq!(receipt.block_number, 16);
        assert!(receipt.is_success());
        assert_eq!(receipt.to, None);
        assert_eq!(receipt.logs.len(), 1);
        assert!(receipt.logs[0].data.is_empty());
    }

    #[test]
    fn test_block_header_reads_arbitrum_fields() {
        let header: BlockHeader = serde_json::from_value(json!({
            "number": "0xff",
            "hash": "0x00000000000000000000000000000000000000000000000000000000000000bb",
            "timestamp": "0x5",
            "sendCount": "0x2a"
        }))
        .unwrap();

        assert_eq!(header.number, 255);
        assert_eq!(header.send_count, Some(42));
        assert_eq!(header.l1_block_number, None);
    }

    #[test]
    fn test_log_filter_params_are_hex() {
        let filter = LogFilter::new(
            Address::with_last_byte(0x64),
            BlockRange::new(16, 32).unwrap(),
            vec![Some(B256::with_last_byte(1)), None],
        );
        let params = filter.to_rpc_params();

        assert_eq!(params["fromBlock"], "0x10");
        assert_eq!(params["toBlock"], "0x20");
        assert_eq!(
            params["address"],
            "0x0000000000000000000000000000000000000064"
        );
        assert!(params["topics"][1].is_null());
    }
}
