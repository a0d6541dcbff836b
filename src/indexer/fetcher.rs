//! Dual-source transfer fetcher: subgraph first, raw event logs for whatever the
//! subgraph does not cover.

use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;
use futures::future::join_all;
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, info, warn};

use super::{
    batch::{fetch_in_batches, resolve_range, BatchOptions},
    dedup::merge_results,
    events::{
        decode_native_deposits, decode_native_withdrawal, decode_token_deposit,
        decode_token_withdrawal, native_withdrawal_topic, split_by_era, token_address,
        DecodeContext, DepositInitiated, Era, InboxMessageDelivered, MessageDelivered,
        WithdrawalInitiated, ARB_SYS_ADDRESS,
    },
    priority::{run_prioritized, token_withdrawal_queries, GatewayQuery, QueryRole},
    tokens::TokenRegistry,
};
use crate::{
    chain::{
        types::{address_topic, LogEntry, LogFilter},
        ChainClient,
    },
    config::{BatchFetchConfig, ChainPairConfig},
    errors::Result,
    subgraph::{SubgraphClient, SubgraphQuery, DEFAULT_PAGE_SIZE},
    types::{AssetKind, BlockRange, BlockTag, Direction, Transfer},
    utils::rpc_client::with_timeout,
};

type Decoder = fn(&LogEntry, &DecodeContext) -> Result<Transfer>;

/// History request for one direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchRequest {
    pub(crate) direction: Direction,
    /// `None` fetches both native and token transfers
    pub(crate) asset_kind: Option<AssetKind>,
    pub(crate) sender: Option<Address>,
    pub(crate) receiver: Option<Address>,
    pub(crate) from_block: u64,
    pub(crate) to_block: BlockTag,
    pub(crate) page: usize,
    pub(crate) page_size: usize,
}

impl FetchRequest {
    /// Everything sent or received by `address` in `direction`
    pub(crate) fn for_address(direction: Direction, address: Address) -> Self {
        Self {
            direction,
            asset_kind: None,
            sender: Some(address),
            receiver: Some(address),
            from_block: 0,
            to_block: BlockTag::Latest,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    fn wants(&self, kind: AssetKind) -> bool {
        self.asset_kind.map(|k| k == kind).unwrap_or(true)
    }

    fn matches(&self, transfer: &Transfer) -> bool {
        let party = self.sender.is_some_and(|s| s == transfer.sender)
            || self.receiver.is_some_and(|r| r == transfer.destination);
        party && self.wants(transfer.asset.kind())
    }
}

/// Log scan calls issued while serving one request, and how many of them failed
#[derive(Debug, Default)]
struct ScanTally {
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl ScanTally {
    fn record<T>(&self, outcome: &Result<T>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if outcome.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn all_failed(&self) -> bool {
        let calls = self.calls.load(Ordering::Relaxed);
        calls > 0 && self.failures.load(Ordering::Relaxed) == calls
    }
}

/// Fetches transfer history for the configured chain pair
#[derive(Debug, Clone)]
pub(crate) struct TransferFetcher {
    parent: Arc<dyn ChainClient>,
    child: Arc<dyn ChainClient>,
    subgraph: Arc<dyn SubgraphClient>,
    tokens: TokenRegistry,
    chain_pair: ChainPairConfig,
    batch: BatchFetchConfig,
}

impl TransferFetcher {
    pub(crate) fn new(
        parent: Arc<dyn ChainClient>,
        child: Arc<dyn ChainClient>,
        subgraph: Arc<dyn SubgraphClient>,
        chain_pair: ChainPairConfig,
        batch: BatchFetchConfig,
    ) -> Self {
        Self {
            tokens: TokenRegistry::new(Arc::clone(&parent)),
            parent,
            child,
            subgraph,
            chain_pair,
            batch,
        }
    }

    fn source(&self, direction: Direction) -> &Arc<dyn ChainClient> {
        match direction {
            Direction::Deposit => &self.parent,
            Direction::Withdrawal => &self.child,
        }
    }

    /// Transfers matching `request`, newest log-scanned records first.
    ///
    /// Never fails: a source that errors or times out contributes nothing and the
    /// result may be empty. Querying without a sender or receiver returns nothing.
    pub(crate) async fn fetch_transfers(&self, request: &FetchRequest) -> Vec<Transfer> {
        if request.sender.is_none() && request.receiver.is_none() {
            debug!("Refusing transfer query without sender or receiver");
            return Vec::new();
        }

        let source = self.source(request.direction);
        let chain_id = source.chain_id();
        let range = match resolve_range(source.as_ref(), request.from_block, request.to_block).await
        {
            Ok(Some(range)) => range,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(chain_id, error = %e, "Could not resolve block range, no transfers fetched");
                return Vec::new();
            }
        };

        let mut fallback_from = range.from_block;
        let mut indexed = Vec::new();
        let mut subgraph_ok = false;
        if self.subgraph.supports(chain_id) {
            let query = SubgraphQuery {
                direction: request.direction,
                sender: request.sender,
                receiver: request.receiver,
                from_block: range.from_block,
                to_block: Some(range.to_block),
                page: request.page,
                page_size: request.page_size,
                search: None,
            };
            match with_timeout(self.batch.request_timeout, self.subgraph.query(chain_id, &query)).await
            {
                Ok(page) => {
                    subgraph_ok = true;
                    fallback_from = fallback_from.max(page.last_indexed_block.saturating_add(1));
                    indexed = page
                        .transfers
                        .into_iter()
                        .filter(|t| request.wants(t.asset.kind()))
                        .collect();
                }
                Err(e) => {
                    warn!(chain_id, ?range, error = %e, "Subgraph query failed, scanning logs");
                }
            }
        }

        // the log-scanned tail is newer than anything on later subgraph pages
        let mut scanned = Vec::new();
        let tally = ScanTally::default();
        if request.page == 0 {
            if let Some(tail) = BlockRange::new(fallback_from, range.to_block) {
                info!(chain_id, ?tail, direction = ?request.direction, "Scanning event logs");
                scanned = self.scan_transfers(request, tail, &tally).await;
                scanned.sort_by(|a, b| b.source_block.cmp(&a.source_block));
            }
        }

        if !subgraph_ok && tally.all_failed() {
            warn!(
                chain_id,
                ?range,
                direction = ?request.direction,
                "All transfer sources failed, no transfers fetched"
            );
        }

        merge_results(vec![scanned, indexed])
    }

    async fn scan_transfers(
        &self,
        request: &FetchRequest,
        range: BlockRange,
        tally: &ScanTally,
    ) -> Vec<Transfer> {
        let mut results = Vec::new();
        match request.direction {
            Direction::Withdrawal => {
                if request.wants(AssetKind::Native) {
                    results.push(self.scan_native_withdrawals(request, range, tally).await);
                }
                if request.wants(AssetKind::Erc20) {
                    results.push(self.scan_token_withdrawals(request, range, tally).await);
                }
            }
            Direction::Deposit => {
                if request.wants(AssetKind::Native) {
                    results.push(self.scan_native_deposits(request, range, tally).await);
                }
                if request.wants(AssetKind::Erc20) {
                    results.push(self.scan_token_deposits(request, range, tally).await);
                }
            }
        }
        merge_results(results)
            .into_iter()
            .filter(|t| request.matches(t))
            .collect()
    }

    /// Scans one filter. Withdrawals on orbit chains always go through the batch
    /// processor; elsewhere a range within one chunk is a single direct call.
    async fn scan_logs(
        &self,
        client: &Arc<dyn ChainClient>,
        filter: LogFilter,
        tally: &ScanTally,
    ) -> Vec<LogEntry> {
        let options = BatchOptions::from(self.batch);
        let force_batching =
            self.chain_pair.is_orbit() && client.chain_id() == self.child.chain_id();
        let range = filter.range;

        if !force_batching && range.to_block - range.from_block <= options.max_range {
            let outcome = with_timeout(options.timeout, client.get_logs(&filter)).await;
            tally.record(&outcome);
            return match outcome {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(
                        chain_id = client.chain_id(),
                        address = %filter.address,
                        ?range,
                        error = %e,
                        "Log scan failed"
                    );
                    Vec::new()
                }
            };
        }

        // chunk timeouts are applied here so the tally sees them
        let timeout = options.timeout;
        let options = BatchOptions {
            timeout: None,
            ..options
        };
        fetch_in_batches(
            range,
            |chunk| {
                let filter = filter.with_range(chunk);
                let client = Arc::clone(client);
                async move {
                    let outcome = with_timeout(timeout, client.get_logs(&filter)).await;
                    tally.record(&outcome);
                    outcome
                }
            },
            &options,
        )
        .await
    }

    /// Decodes `logs` of one era, skipping anomalies.
    async fn decode_logs(
        &self,
        logs: Vec<LogEntry>,
        era: Era,
        source: &Arc<dyn ChainClient>,
        decode: Decoder,
    ) -> Vec<Transfer> {
        let mut ctx = DecodeContext {
            parent_chain_id: self.parent.chain_id(),
            child_chain_id: self.child.chain_id(),
            era: Some(era),
            ..Default::default()
        };

        let tokens: BTreeSet<Address> = logs.iter().filter_map(token_address).collect();
        if !tokens.is_empty() {
            ctx.tokens = self.tokens.token_infos(tokens).await;

            let blocks: BTreeSet<u64> = logs.iter().map(|log| log.block_number).collect();
            let headers = join_all(blocks.iter().map(|n| source.get_block(*n))).await;
            ctx.block_times = headers
                .into_iter()
                .filter_map(|header| header.ok().flatten())
                .filter_map(|header| {
                    chrono::DateTime::from_timestamp(header.timestamp as i64, 0)
                        .map(|time| (header.number, time))
                })
                .collect();
        }

        logs.iter()
            .filter_map(|log| match decode(log, &ctx) {
                Ok(transfer) => Some(transfer),
                Err(e) => {
                    warn!(tx_hash = %log.transaction_hash, error = %e, "Skipping undecodable log");
                    None
                }
            })
            .collect()
    }

    async fn scan_native_withdrawals(
        &self,
        request: &FetchRequest,
        range: BlockRange,
        tally: &ScanTally,
    ) -> Vec<Transfer> {
        let genesis = self.chain_pair.nitro_genesis_child_block();
        let mut results = Vec::new();

        for (era, segment) in split_by_era(range, genesis) {
            let topic0 = Some(native_withdrawal_topic(era));
            let mut filters = Vec::new();
            // `caller` is not indexed, sender queries are filtered after decoding
            if request.sender.is_some() {
                filters.push(LogFilter::new(*ARB_SYS_ADDRESS, segment, vec![topic0]));
            }
            if let Some(receiver) = request.receiver {
                filters.push(LogFilter::new(
                    *ARB_SYS_ADDRESS,
                    segment,
                    vec![topic0, Some(address_topic(receiver))],
                ));
            }

            for filter in filters {
                let logs = self.scan_logs(&self.child, filter, tally).await;
                results.push(
                    self.decode_logs(logs, era, &self.child, decode_native_withdrawal)
                        .await,
                );
            }
        }
        merge_results(results)
    }

    fn gateway_filter(query: &GatewayQuery, topic0: B256, range: BlockRange) -> LogFilter {
        let party = Some(address_topic(query.address));
        let topics = match query.role {
            QueryRole::Sender => vec![Some(topic0), party],
            QueryRole::Receiver => vec![Some(topic0), None, party],
        };
        LogFilter::new(query.gateway, range, topics)
    }

    async fn scan_gateway(
        &self,
        query: GatewayQuery,
        range: BlockRange,
        direction: Direction,
        tally: &ScanTally,
    ) -> Vec<Transfer> {
        let (source, genesis, topic0, decode): (_, _, _, Decoder) = match direction {
            Direction::Withdrawal => (
                &self.child,
                self.chain_pair.nitro_genesis_child_block(),
                WithdrawalInitiated::SIGNATURE_HASH,
                decode_token_withdrawal,
            ),
            Direction::Deposit => (
                &self.parent,
                self.chain_pair.nitro_genesis_parent_block(),
                DepositInitiated::SIGNATURE_HASH,
                decode_token_deposit,
            ),
        };

        let mut results = Vec::new();
        for (era, segment) in split_by_era(range, genesis) {
            let logs = self
                .scan_logs(source, Self::gateway_filter(&query, topic0, segment), tally)
                .await;
            results.push(self.decode_logs(logs, era, source, decode).await);
        }
        merge_results(results)
    }

    /// Token withdrawals go through the sequential priority fetcher
    async fn scan_token_withdrawals(
        &self,
        request: &FetchRequest,
        range: BlockRange,
        tally: &ScanTally,
    ) -> Vec<Transfer> {
        let queries = token_withdrawal_queries(
            self.chain_pair.child_gateways(),
            request.sender,
            request.receiver,
        );
        let transfers = run_prioritized(
            queries,
            |query| {
                let query = *query;
                async move { Ok(self.scan_gateway(query, range, Direction::Withdrawal, tally).await) }
            },
            self.batch.priority_tier_delay,
        )
        .await;
        merge_results(vec![transfers])
    }

    async fn scan_token_deposits(
        &self,
        request: &FetchRequest,
        range: BlockRange,
        tally: &ScanTally,
    ) -> Vec<Transfer> {
        let mut queries = Vec::new();
        for gateway in self.chain_pair.parent_gateways().all() {
            if let Some(sender) = request.sender {
                queries.push(GatewayQuery {
                    gateway,
                    role: QueryRole::Sender,
                    address: sender,
                });
            }
            if let Some(receiver) = request.receiver {
                queries.push(GatewayQuery {
                    gateway,
                    role: QueryRole::Receiver,
                    address: receiver,
                });
            }
        }

        let results = join_all(
            queries
                .into_iter()
                .map(|query| self.scan_gateway(query, range, Direction::Deposit, tally)),
        )
        .await;
        merge_results(results)
    }

    /// Native deposits are read from the bridge and inbox of the nitro era only;
    /// classic era native deposits are served by the subgraph alone.
    async fn scan_native_deposits(
        &self,
        request: &FetchRequest,
        range: BlockRange,
        tally: &ScanTally,
    ) -> Vec<Transfer> {
        let contracts = self.chain_pair.contracts();
        let (Some(bridge), Some(inbox)) = (contracts.bridge, contracts.inbox) else {
            debug!("Bridge or inbox not configured, skipping native deposit scan");
            return Vec::new();
        };
        let genesis = self.chain_pair.nitro_genesis_parent_block();
        let Some(range) = BlockRange::new(range.from_block.max(genesis), range.to_block) else {
            return Vec::new();
        };

        let (message_logs, inbox_logs) = futures::join!(
            self.scan_logs(
                &self.parent,
                LogFilter::new(bridge, range, vec![Some(MessageDelivered::SIGNATURE_HASH)]),
                tally,
            ),
            self.scan_logs(
                &self.parent,
                LogFilter::new(inbox, range, vec![Some(InboxMessageDelivered::SIGNATURE_HASH)]),
                tally,
            ),
        );

        let ctx = DecodeContext {
            parent_chain_id: self.parent.chain_id(),
            child_chain_id: self.child.chain_id(),
            era: Some(Era::Nitro),
            ..Default::default()
        };
        decode_native_deposits(&message_logs, &inbox_logs, &ctx)
            .into_iter()
            .filter(|t| request.matches(t))
            .collect()
    }
}
