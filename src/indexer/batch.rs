//! Batch range processor: bounded, partially failure tolerant block range scans.

use futures::future::join_all;
use std::{future::Future, time::Duration};
use tracing::{debug, warn};

use crate::{
    chain::ChainClient,
    config::{BatchFetchConfig, DEFAULT_LOGS_MAX_BLOCK_RANGE, DEFAULT_LOGS_PARALLEL_REQUESTS},
    errors::Result,
    types::{BlockRange, BlockTag},
    utils::rpc_client::with_timeout,
};

/// Chunking options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchOptions {
    /// Maximum blocks per chunk
    pub(crate) max_range: u64,
    /// Chunks fetched concurrently per wave
    pub(crate) parallel_request_size: usize,
    /// Per-call timeout
    pub(crate) timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_range: DEFAULT_LOGS_MAX_BLOCK_RANGE,
            parallel_request_size: DEFAULT_LOGS_PARALLEL_REQUESTS,
            timeout: None,
        }
    }
}

impl From<BatchFetchConfig> for BatchOptions {
    fn from(config: BatchFetchConfig) -> Self {
        Self {
            max_range: config.max_range.max(1),
            parallel_request_size: config.parallel_requests.max(1),
            timeout: config.request_timeout,
        }
    }
}

/// Splits `range` into contiguous, non-overlapping chunks in ascending order.
///
/// A range with `to_block - from_block <= max_range` is returned as a single chunk.
/// Otherwise every chunk spans at most `max_range` blocks; only the last may be shorter.
pub(crate) fn chunk_ranges(range: BlockRange, max_range: u64) -> Vec<BlockRange> {
    let max_range = max_range.max(1);
    if range.to_block - range.from_block <= max_range {
        return vec![range];
    }

    let mut chunks = Vec::new();
    let mut start = range.from_block;
    loop {
        let end = start.saturating_add(max_range - 1).min(range.to_block);
        chunks.push(BlockRange {
            from_block: start,
            to_block: end,
        });
        if end == range.to_block {
            break;
        }
        start = end + 1;
    }
    chunks
}

/// Resolves `to` against the chain head once and builds the scan range.
///
/// Returns `None` when the range is empty (e.g. `from` is above the head).
pub(crate) async fn resolve_range(
    client: &dyn ChainClient,
    from_block: u64,
    to: BlockTag,
) -> Result<Option<BlockRange>> {
    let to_block = match to {
        BlockTag::Number(n) => n,
        BlockTag::Latest => client.get_block_number().await?,
    };
    Ok(BlockRange::new(from_block, to_block))
}

/// Runs `fetch` over every chunk of `range`
///
/// Chunks are processed in sequential waves of `parallel_request_size` concurrent
/// calls. A chunk that errors or times out contributes nothing and is logged;
/// it never aborts its siblings. Results are concatenated in chunk order.
pub(crate) async fn fetch_in_batches<T, F, Fut>(
    range: BlockRange,
    fetch: F,
    options: &BatchOptions,
) -> Vec<T>
where
    F: Fn(BlockRange) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let chunks = chunk_ranges(range, options.max_range);
    let wave_size = options.parallel_request_size.max(1);
    debug!(?range, chunks = chunks.len(), wave_size, "Scanning block range");

    let mut results = Vec::new();
    for wave in chunks.chunks(wave_size) {
        let outcomes = join_all(
            wave.iter()
                .map(|chunk| with_timeout(options.timeout, fetch(*chunk))),
        )
        .await;

        for (chunk, outcome) in wave.iter().zip(outcomes) {
            match outcome {
                Ok(items) => results.extend(items),
                Err(e) => {
                    warn!(
                        from_block = chunk.from_block,
                        to_block = chunk.to_block,
                        error = %e,
                        "Block range chunk failed, skipping"
                    );
                }
            }
        }
    }

    results
}

/// Resolves `to` and scans `[from_block, to]` in batches.
///
/// A failure to resolve the head is the only error; chunk failures degrade to
/// missing results.
pub(crate) async fn process_block_range<T, F, Fut>(
    client: &dyn ChainClient,
    from_block: u64,
    to: BlockTag,
    fetch: F,
    options: &BatchOptions,
) -> Result<Vec<T>>
where
    F: Fn(BlockRange) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    match resolve_range(client, from_block, to).await? {
        Some(range) => Ok(fetch_in_batches(range, fetch, options).await),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{chain::testing::MockChain, errors::BridgeError};
    use std::sync::Mutex;
    use tokio::time::{sleep, Instant};

    fn range(from_block: u64, to_block: u64) -> BlockRange {
        BlockRange::new(from_block, to_block).unwrap()
    }

    #[test]
    fn test_chunks_for_25000_blocks() {
        let chunks = chunk_ranges(range(0, 25_000), 10_000);
        assert_eq!(
            chunks,
            vec![range(0, 9_999), range(10_000, 19_999), range(20_000, 25_000)]
        );
    }

    #[test]
    fn test_split_chunks_never_exceed_max_range() {
        let chunks = chunk_ranges(range(0, 20_000), 10_000);
        assert_eq!(
            chunks,
            vec![range(0, 9_999), range(10_000, 19_999), range(20_000, 20_000)]
        );
        assert!(chunks.iter().all(|c| c.len() <= 10_000));
    }

    #[test]
    fn test_small_range_is_one_chunk() {
        assert_eq!(chunk_ranges(range(5, 10_005), 10_000), vec![range(5, 10_005)]);
        assert_eq!(chunk_ranges(range(7, 7), 10_000), vec![range(7, 7)]);
    }

    #[test]
    fn test_chunks_cover_range_without_gaps_or_overlaps() {
        let cases = [
            (0, 25_000, 10_000),
            (3, 3, 1),
            (100, 1_000, 7),
            (1, 99, 10),
            (0, 50_000, 10_000),
            (12_345, 67_890, 999),
        ];

        for (from_block, to_block, max_range) in cases {
            let chunks = chunk_ranges(range(from_block, to_block), max_range);

            assert_eq!(chunks.first().map(|c| c.from_block), Some(from_block));
            assert_eq!(chunks.last().map(|c| c.to_block), Some(to_block));
            for pair in chunks.windows(2) {
                assert_eq!(pair[0].to_block + 1, pair[1].from_block);
            }
            let covered: u64 = chunks.iter().map(|c| c.len()).sum();
            assert_eq!(covered, to_block - from_block + 1);
        }
    }

    #[tokio::test]
    async fn test_three_chunks_issued_in_one_wave() {
        let issued = Mutex::new(Vec::new());
        let options = BatchOptions {
            max_range: 10_000,
            parallel_request_size: 3,
            timeout: None,
        };

        let results = fetch_in_batches(
            range(0, 25_000),
            |chunk| {
                issued.lock().unwrap().push(chunk);
                async move { Ok(vec![chunk.from_block]) }
            },
            &options,
        )
        .await;

        // all three futures are created before the wave is awaited
        assert_eq!(issued.lock().unwrap().len(), 3);
        assert_eq!(results, vec![0, 10_000, 20_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_and_timed_out_chunks_are_isolated() {
        let options = BatchOptions {
            max_range: 10,
            parallel_request_size: 2,
            timeout: Some(Duration::from_secs(1)),
        };

        // chunks: [0,9] [10,19] [20,29] [30,39] [40,45]
        let results = fetch_in_batches(
            range(0, 45),
            |chunk| async move {
                match chunk.from_block {
                    10 => Err(BridgeError::Rpc("boom".to_string())),
                    30 => {
                        sleep(Duration::from_secs(5)).await;
                        Ok(vec![chunk.from_block])
                    }
                    _ => Ok(vec![chunk.from_block]),
                }
            },
            &options,
        )
        .await;

        assert_eq!(results, vec![0, 20, 40]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_follow_chunk_order_not_completion_order() {
        let options = BatchOptions {
            max_range: 10,
            parallel_request_size: 3,
            timeout: None,
        };

        let results = fetch_in_batches(
            range(0, 29),
            |chunk| async move {
                // earlier chunks finish last
                sleep(Duration::from_millis(100 - chunk.from_block)).await;
                Ok(vec![chunk.from_block])
            },
            &options,
        )
        .await;

        assert_eq!(results, vec![0, 10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waves_run_sequentially() {
        let options = BatchOptions {
            max_range: 10,
            parallel_request_size: 2,
            timeout: None,
        };
        let started = Mutex::new(Vec::new());
        let origin = Instant::now();

        fetch_in_batches(
            range(0, 39),
            |chunk| {
                let started = &started;
                async move {
                    started
                        .lock()
                        .unwrap()
                        .push((chunk.from_block, origin.elapsed().as_millis()));
                    sleep(Duration::from_millis(50)).await;
                    Ok(Vec::<u64>::new())
                }
            },
            &options,
        )
        .await;

        let started = started.into_inner().unwrap();
        assert_eq!(started.len(), 4);
        // second wave starts only after the first wave's 50ms calls complete
        assert!(started.iter().filter(|(_, t)| *t < 50).count() == 2);
        assert!(started
            .iter()
            .filter(|(from, _)| *from >= 20)
            .all(|(_, t)| *t >= 50));
    }

    #[tokio::test]
    async fn test_latest_is_resolved_against_head() {
        let chain = MockChain::new(42161, 120);
        let options = BatchOptions {
            max_range: 50,
            parallel_request_size: 3,
            timeout: None,
        };

        let results = process_block_range(
            &chain,
            0,
            BlockTag::Latest,
            |chunk| async move { Ok(vec![chunk]) },
            &options,
        )
        .await
        .unwrap();

        assert_eq!(results, vec![range(0, 49), range(50, 99), range(100, 120)]);
    }

    #[tokio::test]
    async fn test_from_above_head_is_empty() {
        let chain = MockChain::new(1, 10);
        let results: Vec<u64> = process_block_range(
            &chain,
            11,
            BlockTag::Latest,
            |_| async { Ok(vec![1]) },
            &BatchOptions::default(),
        )
        .await
        .unwrap();

        assert!(results.is_empty());
    }
}
