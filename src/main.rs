mod bridge;
mod chain;
mod config;
mod errors;
mod indexer;
mod subgraph;
mod types;
mod utils;
mod wallets;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use dotenvy::dotenv;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::{
    bridge::{
        executed::{init_pool, run_migrations, ExecutedMessagesCache, SqliteKeyValueStore},
        resolver::MessageResolver,
        status::{
            clear_pending_transactions, get_pending_withdrawals, get_transactions,
            history_refresh_task, pending_poll_task, record_transaction, SubmittedTransfer,
        },
        types::BridgeContext,
    },
    chain::{
        outbox::{OutboxContracts, OutboxStatusReader},
        rpc::RpcChainClient,
        ChainClient, ChainPair, ChainRegistry,
    },
    config::BridgeMonitoringConfig,
    indexer::{batch::BatchOptions, fetcher::TransferFetcher},
    subgraph::HttpSubgraphClient,
    wallets::{
        balance::{balance_monitoring_task, get_balances, BalanceNotifier, ChainBalanceProvider},
        context::BalanceContext,
        traits::BalanceProvider,
    },
};

/// Cross-chain transfer monitor for Arbitrum and Orbit chains
#[derive(Debug, Parser)]
struct Cli {
    /// Environment file loaded before `.env`
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Overrides `LISTEN_PORT`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path)
            .with_context(|| format!("could not load {}", path.display()))?;
    }
    dotenv().ok();

    let config = BridgeMonitoringConfig::new()?;
    let pair = config.chain_pair();
    let chain_pair = ChainPair::new(pair.parent_chain_id(), pair.child_chain_id())?;

    let parent: Arc<dyn ChainClient> =
        Arc::new(RpcChainClient::new(chain_pair.parent, pair.parent_rpc_url())?);
    let child: Arc<dyn ChainClient> =
        Arc::new(RpcChainClient::new(chain_pair.child, pair.child_rpc_url())?);
    let mut chains = ChainRegistry::default();
    chains.register(Arc::clone(&parent));
    chains.register(Arc::clone(&child));

    // executed messages survive restarts
    let pool = init_pool(config.executed_messages_db_url())
        .await
        .context("could not open executed messages database")?;
    run_migrations(&pool).await?;
    let executed = ExecutedMessagesCache::new(
        Arc::new(SqliteKeyValueStore::new(pool)),
        chain_pair.child,
    );

    let contracts = pair.contracts();
    let reader = OutboxStatusReader::new(
        Arc::clone(&parent),
        Arc::clone(&child),
        OutboxContracts {
            outbox: contracts.outbox,
            rollup: contracts.rollup,
            classic_outboxes: contracts.classic_outboxes.clone(),
        },
        BatchOptions::from(config.batch()),
    );
    let resolver = MessageResolver::new(
        Arc::new(reader),
        executed,
        Arc::clone(&parent),
        config.resolver(),
    );

    let subgraph = Arc::new(HttpSubgraphClient::new(
        config.subgraph().urls().clone(),
        chain_pair.parent,
        chain_pair.child,
    ));
    let fetcher = TransferFetcher::new(
        Arc::clone(&parent),
        Arc::clone(&child),
        subgraph,
        pair.clone(),
        config.batch(),
    );

    // balance monitoring
    let notifier = BalanceNotifier::new();
    let providers: Vec<Arc<dyn BalanceProvider>> = vec![
        Arc::new(ChainBalanceProvider::new(Arc::clone(&parent), true)),
        Arc::new(ChainBalanceProvider::new(Arc::clone(&child), false)),
    ];
    let balance_context = Arc::new(BalanceContext::new(providers));
    tokio::spawn(balance_monitoring_task(
        Arc::clone(&balance_context),
        notifier.subscribe(),
    ));

    // bridge monitoring
    let bridge_context = Arc::new(BridgeContext::new(
        chains,
        chain_pair,
        fetcher,
        resolver,
        Arc::new(notifier),
        config.watched_addresses().to_vec(),
    ));
    tokio::spawn(pending_poll_task(
        Arc::clone(&bridge_context),
        Duration::from_secs(config.pending_poll_interval()),
    ));
    tokio::spawn(history_refresh_task(
        Arc::clone(&bridge_context),
        Duration::from_secs(config.history_refresh_interval()),
    ));

    let cors = CorsLayer::new().allow_origin(Any);

    let transactions_context = Arc::clone(&bridge_context);
    let record_context = Arc::clone(&bridge_context);
    let withdrawals_context = Arc::clone(&bridge_context);
    let app = Router::new()
        .route(
            "/api/transactions",
            get(move || get_transactions(Arc::clone(&transactions_context))).post(
                move |Json(submitted): Json<SubmittedTransfer>| {
                    record_transaction(Arc::clone(&record_context), submitted)
                },
            ),
        )
        .route(
            "/api/pending_withdrawals",
            get(move || get_pending_withdrawals(Arc::clone(&withdrawals_context))),
        )
        .route(
            "/api/transactions/clear_pending",
            post(move || clear_pending_transactions(Arc::clone(&bridge_context))),
        )
        .route(
            "/api/balances",
            get(move || get_balances(Arc::clone(&balance_context))),
        )
        .layer(cors);

    let port = cli.port.unwrap_or(config.listen_port());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Server running at http://");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
