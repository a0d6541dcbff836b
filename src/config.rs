use alloy_primitives::Address;
use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use std::{collections::HashMap, str::FromStr, time::Duration};
use tracing::info;

/// Default chunk size for event-log scans, in blocks
pub(crate) const DEFAULT_LOGS_MAX_BLOCK_RANGE: u64 = 10_000;

/// Default number of chunks fetched concurrently
pub(crate) const DEFAULT_LOGS_PARALLEL_REQUESTS: usize = 3;

/// Default per-request timeout for event-log scans in milliseconds
const DEFAULT_LOGS_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Default delay between priority tiers in milliseconds
const DEFAULT_PRIORITY_TIER_DELAY_MS: u64 = 2_000;

/// Default challenge period, about 6.4 days of 12 second parent blocks
const DEFAULT_CHALLENGE_PERIOD_BLOCKS: u64 = 45_818;

/// Default average parent block time in seconds
const DEFAULT_PARENT_BLOCK_TIME_S: u64 = 12;

/// Default pending transaction poll interval in seconds
const DEFAULT_PENDING_POLL_INTERVAL_S: u64 = 15;

/// Default history refresh interval in seconds
const DEFAULT_HISTORY_REFRESH_INTERVAL_S: u64 = 120;

/// Default HTTP listen port
const DEFAULT_LISTEN_PORT: u16 = 3000;

/// Gateway contracts of one chain, in the order their logs are scanned
#[derive(Debug, Clone, Default)]
pub(crate) struct GatewaySet {
    pub(crate) standard: Option<Address>,
    pub(crate) weth: Option<Address>,
    pub(crate) custom: Option<Address>,
    pub(crate) other: Vec<Address>,
}

impl GatewaySet {
    /// All configured gateways, standard first
    pub(crate) fn all(&self) -> Vec<Address> {
        self.standard
            .iter()
            .chain(self.weth.iter())
            .chain(self.custom.iter())
            .chain(self.other.iter())
            .copied()
            .collect()
    }

    fn from_env(prefix: &str) -> anyhow::Result<Self> {
        Ok(Self {
            standard: env_address(&format!("{prefix}_STANDARD_GATEWAY"))?,
            weth: env_address(&format!("{prefix}_WETH_GATEWAY"))?,
            custom: env_address(&format!("{prefix}_CUSTOM_GATEWAY"))?,
            other: parse_addresses(&env_or(&format!("{prefix}_OTHER_GATEWAYS"), ""))?,
        })
    }
}

/// Core protocol contracts
#[derive(Debug, Clone, Default)]
pub(crate) struct ProtocolContracts {
    /// Bridge on the parent chain, emits `MessageDelivered`
    pub(crate) bridge: Option<Address>,
    /// Inbox on the parent chain, emits `InboxMessageDelivered`
    pub(crate) inbox: Option<Address>,
    /// Nitro outbox on the parent chain
    pub(crate) outbox: Option<Address>,
    /// Rollup on the parent chain
    pub(crate) rollup: Option<Address>,
    /// Outboxes used before the upgrade
    pub(crate) classic_outboxes: Vec<Address>,
}

/// Parent/child chain pair configuration
#[derive(Debug, Clone)]
pub(crate) struct ChainPairConfig {
    parent_chain_id: u64,
    child_chain_id: u64,
    parent_rpc_url: String,
    child_rpc_url: String,
    /// Orbit chains always scan withdrawals through the batch processor
    is_orbit: bool,
    /// First nitro block on the parent chain, 0 if the pair never ran classic
    nitro_genesis_parent_block: u64,
    /// First nitro block on the child chain, 0 if the pair never ran classic
    nitro_genesis_child_block: u64,
    contracts: ProtocolContracts,
    parent_gateways: GatewaySet,
    child_gateways: GatewaySet,
}

impl ChainPairConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let parent_chain_id = env_parse("PARENT_CHAIN_ID", 1u64)?;
        let child_chain_id = env_parse("CHILD_CHAIN_ID", 42_161u64)?;
        let parent_rpc_url = env_or("PARENT_RPC_URL", "http://localhost:8545");
        let child_rpc_url = env_or("CHILD_RPC_URL", "http://localhost:8547");
        let is_orbit = env_parse("IS_ORBIT", false)?;
        let nitro_genesis_parent_block = env_parse("NITRO_GENESIS_PARENT_BLOCK", 0u64)?;
        let nitro_genesis_child_block = env_parse("NITRO_GENESIS_CHILD_BLOCK", 0u64)?;

        let contracts = ProtocolContracts {
            bridge: env_address("BRIDGE_ADDRESS")?,
            inbox: env_address("INBOX_ADDRESS")?,
            outbox: env_address("OUTBOX_ADDRESS")?,
            rollup: env_address("ROLLUP_ADDRESS")?,
            classic_outboxes: parse_addresses(&env_or("CLASSIC_OUTBOX_ADDRESSES", ""))?,
        };

        let parent_gateways = GatewaySet::from_env("PARENT")?;
        let child_gateways = GatewaySet::from_env("CHILD")?;

        info!(
            parent_chain_id,
            child_chain_id,
            %parent_rpc_url,
            %child_rpc_url,
            is_orbit,
            "Loaded chain pair config:"
        );

        Ok(ChainPairConfig {
            parent_chain_id,
            child_chain_id,
            parent_rpc_url,
            child_rpc_url,
            is_orbit,
            nitro_genesis_parent_block,
            nitro_genesis_child_block,
            contracts,
            parent_gateways,
            child_gateways,
        })
    }

    /// Getter for `parent_chain_id`
    pub(crate) fn parent_chain_id(&self) -> u64 {
        self.parent_chain_id
    }

    /// Getter for `child_chain_id`
    pub(crate) fn child_chain_id(&self) -> u64 {
        self.child_chain_id
    }

    /// Getter for `parent_rpc_url`
    pub(crate) fn parent_rpc_url(&self) -> &str {
        &self.parent_rpc_url
    }

    /// Getter for `child_rpc_url`
    pub(crate) fn child_rpc_url(&self) -> &str {
        &self.child_rpc_url
    }

    /// Getter for `is_orbit`
    pub(crate) fn is_orbit(&self) -> bool {
        self.is_orbit
    }

    /// Getter for `nitro_genesis_parent_block`
    pub(crate) fn nitro_genesis_parent_block(&self) -> u64 {
        self.nitro_genesis_parent_block
    }

    /// Getter for `nitro_genesis_child_block`
    pub(crate) fn nitro_genesis_child_block(&self) -> u64 {
        self.nitro_genesis_child_block
    }

    /// Getter for `contracts`
    pub(crate) fn contracts(&self) -> &ProtocolContracts {
        &self.contracts
    }

    /// Getter for `parent_gateways`
    pub(crate) fn parent_gateways(&self) -> &GatewaySet {
        &self.parent_gateways
    }

    /// Getter for `child_gateways`
    pub(crate) fn child_gateways(&self) -> &GatewaySet {
        &self.child_gateways
    }
}

#[cfg(test)]
impl ChainPairConfig {
    /// Ethereum/Arbitrum One style pair with the given contracts
    pub(crate) fn for_test(
        is_orbit: bool,
        nitro_genesis: (u64, u64),
        contracts: ProtocolContracts,
        parent_gateways: GatewaySet,
        child_gateways: GatewaySet,
    ) -> Self {
        Self {
            parent_chain_id: 1,
            child_chain_id: 42_161,
            parent_rpc_url: "http://localhost:8545".to_string(),
            child_rpc_url: "http://localhost:8547".to_string(),
            is_orbit,
            nitro_genesis_parent_block: nitro_genesis.0,
            nitro_genesis_child_block: nitro_genesis.1,
            contracts,
            parent_gateways,
            child_gateways,
        }
    }
}

/// Subgraph endpoints keyed by the chain id they index
#[derive(Debug, Clone, Default)]
pub(crate) struct SubgraphConfig {
    urls: HashMap<u64, String>,
}

impl SubgraphConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let urls = parse_subgraph_urls(&env_or("SUBGRAPH_URLS", ""))?;
        info!(?urls, "Loaded subgraph config:");
        Ok(Self { urls })
    }

    /// Getter for `urls`
    pub(crate) fn urls(&self) -> &HashMap<u64, String> {
        &self.urls
    }
}

/// Event-log scanning limits
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchFetchConfig {
    /// Maximum blocks per `eth_getLogs` call
    pub(crate) max_range: u64,
    /// Chunks fetched concurrently per wave
    pub(crate) parallel_requests: usize,
    /// Per-call timeout
    pub(crate) request_timeout: Option<Duration>,
    /// Pause between priority tiers of the sequential fetcher
    pub(crate) priority_tier_delay: Duration,
}

impl Default for BatchFetchConfig {
    fn default() -> Self {
        Self {
            max_range: DEFAULT_LOGS_MAX_BLOCK_RANGE,
            parallel_requests: DEFAULT_LOGS_PARALLEL_REQUESTS,
            request_timeout: Some(Duration::from_millis(DEFAULT_LOGS_REQUEST_TIMEOUT_MS)),
            priority_tier_delay: Duration::from_millis(DEFAULT_PRIORITY_TIER_DELAY_MS),
        }
    }
}

impl BatchFetchConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        let timeout_ms = env_parse("LOGS_REQUEST_TIMEOUT_MS", DEFAULT_LOGS_REQUEST_TIMEOUT_MS)?;
        let config = Self {
            max_range: env_parse("LOGS_MAX_BLOCK_RANGE", DEFAULT_LOGS_MAX_BLOCK_RANGE)?.max(1),
            parallel_requests: env_parse(
                "LOGS_PARALLEL_REQUESTS",
                DEFAULT_LOGS_PARALLEL_REQUESTS,
            )?
            .max(1),
            request_timeout: (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms)),
            priority_tier_delay: Duration::from_millis(env_parse(
                "PRIORITY_TIER_DELAY_MS",
                DEFAULT_PRIORITY_TIER_DELAY_MS,
            )?),
        };
        info!(?config, "Loaded event-log batching config:");
        Ok(config)
    }
}

/// Outgoing message resolver settings
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolverConfig {
    challenge_period_blocks: u64,
    parent_block_time_s: u64,
}

impl ResolverConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        Ok(Self {
            challenge_period_blocks: env_parse(
                "CHALLENGE_PERIOD_BLOCKS",
                DEFAULT_CHALLENGE_PERIOD_BLOCKS,
            )?,
            parent_block_time_s: env_parse("PARENT_BLOCK_TIME_S", DEFAULT_PARENT_BLOCK_TIME_S)?,
        })
    }

    /// Getter for `challenge_period_blocks`
    pub(crate) fn challenge_period_blocks(&self) -> u64 {
        self.challenge_period_blocks
    }

    /// Getter for `parent_block_time_s`
    pub(crate) fn parent_block_time(&self) -> Duration {
        Duration::from_secs(self.parent_block_time_s)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            challenge_period_blocks: DEFAULT_CHALLENGE_PERIOD_BLOCKS,
            parent_block_time_s: DEFAULT_PARENT_BLOCK_TIME_S,
        }
    }
}

/// Bridge monitoring configuration
#[derive(Debug, Clone)]
pub(crate) struct BridgeMonitoringConfig {
    chain_pair: ChainPairConfig,
    subgraph: SubgraphConfig,
    batch: BatchFetchConfig,
    resolver: ResolverConfig,

    /// Addresses whose history is refreshed periodically
    watched_addresses: Vec<Address>,

    /// Pending transaction poll interval in seconds
    pending_poll_interval_s: u64,

    /// History refresh interval in seconds
    history_refresh_interval_s: u64,

    /// Database URL of the executed messages cache
    executed_messages_db_url: String,

    /// HTTP listen port
    listen_port: u16,
}

impl BridgeMonitoringConfig {
    pub(crate) fn new() -> anyhow::Result<Self> {
        dotenv().ok(); // Load `.env` file if present

        let watched_addresses = parse_addresses(&env_or("WATCHED_ADDRESSES", ""))
            .context("invalid WATCHED_ADDRESSES")?;

        let config = BridgeMonitoringConfig {
            chain_pair: ChainPairConfig::new()?,
            subgraph: SubgraphConfig::new()?,
            batch: BatchFetchConfig::new()?,
            resolver: ResolverConfig::new()?,
            watched_addresses,
            pending_poll_interval_s: env_parse(
                "PENDING_POLL_INTERVAL_S",
                DEFAULT_PENDING_POLL_INTERVAL_S,
            )?,
            history_refresh_interval_s: env_parse(
                "HISTORY_REFRESH_INTERVAL_S",
                DEFAULT_HISTORY_REFRESH_INTERVAL_S,
            )?,
            executed_messages_db_url: env_or(
                "EXECUTED_MESSAGES_DB_URL",
                "sqlite://executed_messages.db?mode=rwc",
            ),
            listen_port: env_parse("LISTEN_PORT", DEFAULT_LISTEN_PORT)?,
        };

        info!(
            watched = config.watched_addresses.len(),
            pending_poll_interval_s = config.pending_poll_interval_s,
            history_refresh_interval_s = config.history_refresh_interval_s,
            "Loaded Bridge monitoring config:"
        );

        Ok(config)
    }

    /// Getter for `chain_pair`
    pub(crate) fn chain_pair(&self) -> &ChainPairConfig {
        &self.chain_pair
    }

    /// Getter for `subgraph`
    pub(crate) fn subgraph(&self) -> &SubgraphConfig {
        &self.subgraph
    }

    /// Getter for `batch`
    pub(crate) fn batch(&self) -> BatchFetchConfig {
        self.batch
    }

    /// Getter for `resolver`
    pub(crate) fn resolver(&self) -> ResolverConfig {
        self.resolver
    }

    /// Getter for `watched_addresses`
    pub(crate) fn watched_addresses(&self) -> &[Address] {
        &self.watched_addresses
    }

    /// Getter for `pending_poll_interval_s`
    pub(crate) fn pending_poll_interval(&self) -> u64 {
        self.pending_poll_interval_s
    }

    /// Getter for `history_refresh_interval_s`
    pub(crate) fn history_refresh_interval(&self) -> u64 {
        self.history_refresh_interval_s
    }

    /// Getter for `executed_messages_db_url`
    pub(crate) fn executed_messages_db_url(&self) -> &str {
        &self.executed_messages_db_url
    }

    /// Getter for `listen_port`
    pub(crate) fn listen_port(&self) -> u16 {
        self.listen_port
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_address(key: &str) -> anyhow::Result<Option<Address>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<Address>()
            .map(Some)
            .with_context(|| format!("invalid address in {key}")),
        _ => Ok(None),
    }
}

/// Parses a comma separated address list, ignoring empty entries
fn parse_addresses(raw: &str) -> anyhow::Result<Vec<Address>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Address>().with_context(|| format!("invalid address {s}")))
        .collect()
}

/// Parses `chainId=url` pairs separated by commas
fn parse_subgraph_urls(raw: &str) -> anyhow::Result<HashMap<u64, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (chain_id, url) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("expected chainId=url, got {entry}"))?;
            let chain_id = chain_id
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid chain id in {entry}"))?;
            Ok((chain_id, url.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addresses_skips_blanks() {
        let parsed = parse_addresses(
            " 0x0000000000000000000000000000000000000001, ,0x0000000000000000000000000000000000000002",
        )
        .unwrap();

        assert_eq!(
            parsed,
            vec![Address::with_last_byte(1), Address::with_last_byte(2)]
        );
        assert!(parse_addresses("").unwrap().is_empty());
        assert!(parse_addresses("0x1234").is_err());
    }

    #[test]
    fn test_parse_subgraph_urls() {
        let urls =
            parse_subgraph_urls("42161=https://example.com/arb, 1=https://example.com/eth").unwrap();

        assert_eq!(urls.len(), 2);
        assert_eq!(urls.get(&42161).map(String::as_str), Some("https://example.com/arb"));
        assert_eq!(urls.get(&1).map(String::as_str), Some("https://example.com/eth"));
        assert!(parse_subgraph_urls("no-separator").is_err());
        assert!(parse_subgraph_urls("abc=https://x").is_err());
    }

    #[test]
    fn test_gateway_set_orders_standard_first() {
        let gateways = GatewaySet {
            standard: Some(Address::with_last_byte(1)),
            weth: None,
            custom: Some(Address::with_last_byte(3)),
            other: vec![Address::with_last_byte(4)],
        };

        assert_eq!(
            gateways.all(),
            vec![
                Address::with_last_byte(1),
                Address::with_last_byte(3),
                Address::with_last_byte(4)
            ]
        );
    }

    #[test]
    fn test_batch_defaults() {
        let batch = BatchFetchConfig::default();
        assert_eq!(batch.max_range, 10_000);
        assert_eq!(batch.parallel_requests, 3);
    }
}
