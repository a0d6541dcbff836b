//! Indexed transfer history served by bridge subgraphs.
//!
//! Subgraphs are best effort: a chain may have no subgraph at all, and a subgraph may
//! lag the chain head. Every page reports the last block the subgraph has indexed so
//! the caller can scan the remaining tail by raw logs.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::{collections::HashMap, fmt::Debug, str::FromStr};
use tracing::debug;

use crate::{
    errors::{BridgeError, Result},
    types::{Asset, Direction, TokenInfo, Transfer, TransferStatus},
};

/// Default page size of subgraph queries
pub(crate) const DEFAULT_PAGE_SIZE: usize = 100;

/// Filter of one subgraph page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubgraphQuery {
    pub(crate) direction: Direction,
    pub(crate) sender: Option<Address>,
    pub(crate) receiver: Option<Address>,
    pub(crate) from_block: u64,
    pub(crate) to_block: Option<u64>,
    pub(crate) page: usize,
    pub(crate) page_size: usize,
    /// Transaction hash prefix to look for
    pub(crate) search: Option<String>,
}

/// One page of transfers and the subgraph's indexing head
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubgraphPage {
    pub(crate) transfers: Vec<Transfer>,
    pub(crate) last_indexed_block: u64,
}

/// Query access to transfer subgraphs, one per chain id
#[async_trait]
pub(crate) trait SubgraphClient: Send + Sync + Debug {
    /// Whether a subgraph is known for `chain_id`
    fn supports(&self, chain_id: u64) -> bool;

    async fn query(&self, chain_id: u64, query: &SubgraphQuery) -> Result<SubgraphPage>;
}

/// GraphQL [`SubgraphClient`] over HTTP
#[derive(Debug, Clone)]
pub(crate) struct HttpSubgraphClient {
    http: reqwest::Client,
    urls: HashMap<u64, String>,
    parent_chain_id: u64,
    child_chain_id: u64,
}

impl HttpSubgraphClient {
    pub(crate) fn new(urls: HashMap<u64, String>, parent_chain_id: u64, child_chain_id: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            urls,
            parent_chain_id,
            child_chain_id,
        }
    }

    fn where_clause(query: &SubgraphQuery) -> Value {
        let (block_field, hash_field) = match query.direction {
            Direction::Deposit => ("blockCreatedAt", "transactionHash"),
            Direction::Withdrawal => ("l2BlockNum", "l2TxHash"),
        };

        let mut base = serde_json::Map::new();
        base.insert(format!("{block_field}_gte"), json!(query.from_block.to_string()));
        if let Some(to_block) = query.to_block {
            base.insert(format!("{block_field}_lte"), json!(to_block.to_string()));
        }
        if let Some(search) = &query.search {
            base.insert(format!("{hash_field}_starts_with"), json!(search.to_lowercase()));
        }

        let party = |field: &str, address: Address| {
            let mut clause = base.clone();
            clause.insert(field.to_string(), json!(format!("{address:#x}")));
            Value::Object(clause)
        };

        match (query.sender, query.receiver) {
            (Some(sender), Some(receiver)) => {
                json!({ "or": [party("sender", sender), party("receiver", receiver)] })
            }
            (Some(sender), None) => party("sender", sender),
            (None, Some(receiver)) => party("receiver", receiver),
            (None, None) => Value::Object(base.clone()),
        }
    }

    fn graphql(query: &SubgraphQuery) -> Value {
        let document = match query.direction {
            Direction::Deposit => {
                "query Deposits($where: Deposit_filter, $first: Int, $skip: Int) {
                    deposits(where: $where, orderBy: blockCreatedAt, orderDirection: desc, first: $first, skip: $skip) {
                        id type sender receiver ethValue tokenAmount isClassic
                        l1Token { id symbol decimals }
                        timestamp transactionHash blockCreatedAt
                    }
                    _meta { block { number } }
                }"
            }
            Direction::Withdrawal => {
                "query Withdrawals($where: Withdrawal_filter, $first: Int, $skip: Int) {
                    withdrawals(where: $where, orderBy: l2BlockNum, orderDirection: desc, first: $first, skip: $skip) {
                        id type sender receiver ethValue tokenAmount isClassic
                        l1Token { id symbol decimals }
                        l2BlockTimestamp l2TxHash l2BlockNum
                    }
                    _meta { block { number } }
                }"
            }
        };

        json!({
            "query": document,
            "variables": {
                "where": Self::where_clause(query),
                "first": query.page_size,
                "skip": query.page * query.page_size,
            }
        })
    }
}

#[async_trait]
impl SubgraphClient for HttpSubgraphClient {
    fn supports(&self, chain_id: u64) -> bool {
        self.urls.contains_key(&chain_id)
    }

    async fn query(&self, chain_id: u64, query: &SubgraphQuery) -> Result<SubgraphPage> {
        let url = self.urls.get(&chain_id).ok_or_else(|| {
            BridgeError::Subgraph(format!("no subgraph configured for chain {chain_id}"))
        })?;

        let resp = self
            .http
            .post(url)
            .json(&Self::graphql(query))
            .send()
            .await?
            .error_for_status()?;
        let body: GraphQlResponse = resp.json().await?;

        if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
            let messages: Vec<String> = errors.into_iter().map(|e| e.message).collect();
            return Err(BridgeError::Subgraph(messages.join("; ")));
        }
        let data = body
            .data
            .ok_or_else(|| BridgeError::Subgraph("response without data".to_string()))?;

        let transfers = match query.direction {
            Direction::Deposit => data
                .deposits
                .into_iter()
                .map(|d| d.into_transfer(self.parent_chain_id, self.child_chain_id))
                .collect::<Result<Vec<_>>>()?,
            Direction::Withdrawal => data
                .withdrawals
                .into_iter()
                .map(|w| w.into_transfer(self.child_chain_id, self.parent_chain_id))
                .collect::<Result<Vec<_>>>()?,
        };

        debug!(
            chain_id,
            count = transfers.len(),
            last_indexed_block = data.meta.block.number,
            "Subgraph page fetched"
        );

        Ok(SubgraphPage {
            transfers,
            last_indexed_block: data.meta.block.number,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    #[serde(default)]
    deposits: Vec<SubgraphTransfer>,
    #[serde(default)]
    withdrawals: Vec<SubgraphTransfer>,
    #[serde(rename = "_meta")]
    meta: SubgraphMeta,
}

#[derive(Debug, Deserialize)]
struct SubgraphMeta {
    block: SubgraphMetaBlock,
}

#[derive(Debug, Deserialize)]
struct SubgraphMetaBlock {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct SubgraphToken {
    id: Address,
    symbol: Option<String>,
    #[serde(default, deserialize_with = "from_opt_decimal_u64")]
    decimals: Option<u64>,
}

/// Deposit or withdrawal entity; the two share their asset fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubgraphTransfer {
    #[serde(rename = "type")]
    kind: String,
    sender: Address,
    receiver: Address,
    #[serde(default, deserialize_with = "from_opt_decimal_u256")]
    eth_value: Option<U256>,
    #[serde(default, deserialize_with = "from_opt_decimal_u256")]
    token_amount: Option<U256>,
    #[serde(default)]
    is_classic: bool,
    l1_token: Option<SubgraphToken>,

    // deposit fields
    #[serde(default, deserialize_with = "from_opt_decimal_u64")]
    timestamp: Option<u64>,
    transaction_hash: Option<B256>,
    #[serde(default, deserialize_with = "from_opt_decimal_u64")]
    block_created_at: Option<u64>,

    // withdrawal fields
    #[serde(default, deserialize_with = "from_opt_decimal_u64")]
    l2_block_timestamp: Option<u64>,
    l2_tx_hash: Option<B256>,
    #[serde(default, deserialize_with = "from_opt_decimal_u64")]
    l2_block_num: Option<u64>,
}

impl SubgraphTransfer {
    fn into_transfer(self, source_chain_id: u64, destination_chain_id: u64) -> Result<Transfer> {
        let direction = if self.l2_tx_hash.is_some() {
            Direction::Withdrawal
        } else {
            Direction::Deposit
        };
        let tx_hash = self
            .l2_tx_hash
            .or(self.transaction_hash)
            .ok_or_else(|| BridgeError::Decode("subgraph transfer without tx hash".to_string()))?;
        let timestamp = self.l2_block_timestamp.or(self.timestamp).unwrap_or_default();
        let created_at = DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_default();

        let is_token = self.kind.starts_with("Token");
        let (asset, amount) = match (is_token, self.l1_token) {
            (true, Some(token)) => (
                Asset::Erc20(TokenInfo {
                    token_address: token.id,
                    symbol: token.symbol.unwrap_or_else(|| format!("{:#x}", token.id)),
                    decimals: token
                        .decimals
                        .and_then(|d| u8::try_from(d).ok())
                        .unwrap_or(18),
                }),
                self.token_amount.unwrap_or_default(),
            ),
            _ => (Asset::Native, self.eth_value.unwrap_or_default()),
        };

        Ok(Transfer {
            id: Transfer::id_for(tx_hash),
            direction,
            asset,
            amount,
            sender: self.sender,
            destination: self.receiver,
            source_chain_id,
            destination_chain_id,
            source_tx_hash: tx_hash,
            source_block: self.l2_block_num.or(self.block_created_at).unwrap_or_default(),
            destination_tx_hash: None,
            status: TransferStatus::Success,
            created_at,
            resolved_at: Some(created_at),
            is_classic: self.is_classic,
            l2_message_data: None,
        })
    }
}

/// Subgraph `BigInt`/`BigDecimal` values arrive as decimal strings
fn from_opt_decimal_u256<'de, D>(deserializer: D) -> std::result::Result<Option<U256>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Deserialize::deserialize(deserializer)?;
    raw.map(|s| U256::from_str_radix(&s, 10).map_err(serde::de::Error::custom))
        .transpose()
}

fn from_opt_decimal_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Value> = Deserialize::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid number {n}"))),
        Some(Value::String(s)) => u64::from_str(&s).map(Some).map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!("unexpected value {other}"))),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const USER: &str = "0x000000000000000000000000000000000000000a";

    fn query(direction: Direction) -> SubgraphQuery {
        let user = Address::from_str(USER).unwrap();
        SubgraphQuery {
            direction,
            sender: Some(user),
            receiver: Some(user),
            from_block: 0,
            to_block: Some(1_000),
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            search: None,
        }
    }

    #[test]
    fn test_where_clause_ors_sender_and_receiver() {
        let clause = HttpSubgraphClient::where_clause(&query(Direction::Withdrawal));

        assert_eq!(clause["or"][0]["sender"], USER);
        assert_eq!(clause["or"][1]["receiver"], USER);
        assert_eq!(clause["or"][0]["l2BlockNum_gte"], "0");
        assert_eq!(clause["or"][1]["l2BlockNum_lte"], "1000");
    }

    #[tokio::test]
    async fn test_withdrawals_page_is_decoded() {
        let mut server = Server::new_async().await;
        let mock_endpoint = server
            .mock("POST", "/")
            .match_body(Matcher::Regex("withdrawals".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "data": {
                        "withdrawals": [
                            {
                                "id": "1",
                                "type": "EthWithdrawal",
                                "sender": USER,
                                "receiver": USER,
                                "ethValue": "1000000000000000000",
                                "tokenAmount": null,
                                "isClassic": false,
                                "l1Token": null,
                                "l2BlockTimestamp": "1700000000",
                                "l2TxHash": "0x00000000000000000000000000000000000000000000000000000000000000aa",
                                "l2BlockNum": "900"
                            },
                            {
                                "id": "2",
                                "type": "TokenWithdrawal",
                                "sender": USER,
                                "receiver": USER,
                                "ethValue": "0",
                                "tokenAmount": "5000000",
                                "isClassic": true,
                                "l1Token": {
                                    "id": "0x00000000000000000000000000000000000000c0",
                                    "symbol": "USDC",
                                    "decimals": 6
                                },
                                "l2BlockTimestamp": "1600000000",
                                "l2TxHash": "0x00000000000000000000000000000000000000000000000000000000000000bb",
                                "l2BlockNum": "10"
                            }
                        ],
                        "_meta": { "block": { "number": 950 } }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpSubgraphClient::new(HashMap::from([(42161, server.url())]), 1, 42161);
        let page = client
            .query(42161, &query(Direction::Withdrawal))
            .await
            .unwrap();

        mock_endpoint.assert_async().await;
        assert_eq!(page.last_indexed_block, 950);
        assert_eq!(page.transfers.len(), 2);

        let native = &page.transfers[0];
        assert_eq!(native.direction, Direction::Withdrawal);
        assert_eq!(native.asset, Asset::Native);
        assert_eq!(native.amount, U256::from(10u64.pow(18)));
        assert_eq!(native.source_chain_id, 42161);
        assert_eq!(native.destination_chain_id, 1);
        assert_eq!(native.source_block, 900);

        let token = &page.transfers[1];
        assert_eq!(token.asset.symbol(), "USDC");
        assert_eq!(token.asset.decimals(), 6);
        assert_eq!(token.amount, U256::from(5_000_000));
        assert!(token.is_classic);
    }

    #[tokio::test]
    async fn test_graphql_errors_are_subgraph_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "errors": [{ "message": "indexing_error" }] }).to_string())
            .create_async()
            .await;

        let client = HttpSubgraphClient::new(HashMap::from([(1, server.url())]), 1, 42161);
        let result = client.query(1, &query(Direction::Deposit)).await;

        assert!(matches!(result, Err(BridgeError::Subgraph(msg)) if msg.contains("indexing_error")));
    }

    #[tokio::test]
    async fn test_http_failure_is_subgraph_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpSubgraphClient::new(HashMap::from([(1, server.url())]), 1, 42161);
        let result = client.query(1, &query(Direction::Deposit)).await;

        assert!(matches!(result, Err(BridgeError::Subgraph(_))));
    }

    #[tokio::test]
    async fn test_unsupported_chain() {
        let client = HttpSubgraphClient::new(HashMap::new(), 1, 42161);

        assert!(!client.supports(1));
        assert!(client.query(1, &query(Direction::Deposit)).await.is_err());
    }
}
