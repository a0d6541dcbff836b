//! Sequential priority fetcher for token withdrawal log scans.
//!
//! When the subgraph is unavailable every gateway is scanned by raw logs, which easily
//! trips provider rate limits. Queries are grouped into priority tiers; a tier is issued
//! only once the previous tier has fully completed, followed by a fixed pause.

use alloy_primitives::Address;
use futures::future::join_all;
use std::{collections::BTreeMap, future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{config::GatewaySet, errors::Result};

/// Which side of a transfer a query filters on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum QueryRole {
    Sender,
    Receiver,
}

/// One gateway scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GatewayQuery {
    pub(crate) gateway: Address,
    pub(crate) role: QueryRole,
    pub(crate) address: Address,
}

/// A query and its tier, lower runs first
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PrioritizedQuery<Q> {
    pub(crate) priority: u32,
    pub(crate) query: Q,
}

/// Builds the token withdrawal queries for `gateways`.
///
/// Standard, WETH and custom gateways each get their own tier, sender before receiver.
/// The remaining gateways share one sender tier and one receiver tier.
pub(crate) fn token_withdrawal_queries(
    gateways: &GatewaySet,
    sender: Option<Address>,
    receiver: Option<Address>,
) -> Vec<PrioritizedQuery<GatewayQuery>> {
    let mut queries = Vec::new();
    let mut priority = 0;

    let mut push_tier = |tier_gateways: &[Address]| {
        for (role, address) in [(QueryRole::Sender, sender), (QueryRole::Receiver, receiver)] {
            let Some(address) = address else { continue };
            if tier_gateways.is_empty() {
                continue;
            }
            priority += 1;
            for gateway in tier_gateways {
                queries.push(PrioritizedQuery {
                    priority,
                    query: GatewayQuery {
                        gateway: *gateway,
                        role,
                        address,
                    },
                });
            }
        }
    };

    for gateway in [gateways.standard, gateways.weth, gateways.custom]
        .into_iter()
        .flatten()
    {
        push_tier(&[gateway]);
    }
    push_tier(&gateways.other);

    queries
}

/// Runs `queries` tier by tier.
///
/// Queries of one tier run concurrently. A failed query contributes nothing and is
/// logged. Results are concatenated in tier order, then query order within a tier.
pub(crate) async fn run_prioritized<Q, T, F, Fut>(
    queries: Vec<PrioritizedQuery<Q>>,
    run: F,
    tier_delay: Duration,
) -> Vec<T>
where
    Q: std::fmt::Debug,
    F: Fn(&Q) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut tiers: BTreeMap<u32, Vec<Q>> = BTreeMap::new();
    for PrioritizedQuery { priority, query } in queries {
        tiers.entry(priority).or_default().push(query);
    }

    let tier_count = tiers.len();
    let mut results = Vec::new();
    for (index, (priority, tier)) in tiers.into_iter().enumerate() {
        debug!(priority, queries = tier.len(), "Running priority tier");
        let outcomes = join_all(tier.iter().map(&run)).await;

        for (query, outcome) in tier.iter().zip(outcomes) {
            match outcome {
                Ok(items) => results.extend(items),
                Err(e) => warn!(priority, ?query, error = %e, "Prioritized query failed"),
            }
        }

        if index + 1 < tier_count && !tier_delay.is_zero() {
            sleep(tier_delay).await;
        }
    }
    results
}
