//! The query planner: pure transformations from an import state and the
//! current chain head into a bounded, prioritized list of ranges to fetch
//! next. No clocks, no randomness; identical inputs produce identical
//! output.

use chrono::{DateTime, Duration, Utc};
use model::import_state::ImportRanges;
use model::ranges::{
    range_exclude, range_split_to_max_length, range_split_to_max_length_from_end, Range,
};

/// Blocks this close to the head are left for the next tick so slow nodes
/// behind a load balancer have seen them.
pub const BLOCK_PROPAGATION_SAFETY_MARGIN: u64 = 5;

/// Trailing timesteps averaged when extrapolating the share rate block list
/// to the current head.
const EXTRAPOLATION_WINDOW: usize = 40;

#[derive(Clone, Copy, Debug)]
pub struct PlannerConfig {
    pub max_blocks_per_query: u64,
    pub ms_per_block: u64,
    pub max_ranges_to_generate: usize,
}

/// The recent tail query: one range ending a safety margin below the head,
/// spanning at most an hour's worth of blocks and never reaching past what
/// was already imported or before the contract existed.
pub fn latest_block_query(
    contract_created_at_block: u64,
    last_imported: Option<u64>,
    head: u64,
    config: &PlannerConfig,
) -> Option<Range<u64>> {
    let margin = BLOCK_PROPAGATION_SAFETY_MARGIN;
    if head <= margin {
        return None;
    }
    let blocks_in_one_hour = (60 * 60 * 1_000 / config.ms_per_block.max(1)).max(1);
    let last = last_imported.unwrap_or(contract_created_at_block);
    let target = config
        .max_blocks_per_query
        .min(blocks_in_one_hour)
        .min(head.saturating_sub(last).saturating_sub(1));
    let to = head.saturating_sub(margin);
    let from = head
        .saturating_sub(target)
        .saturating_sub(margin)
        .max(contract_created_at_block);
    if from > to {
        return None;
    }
    Some(Range::new(from, to))
}

/// Historical catch-up: the whole span from contract creation to the head
/// minus what is already covered, split into query sized chunks ordered
/// newest first (the head end is the most likely to succeed on providers
/// that prune old state), followed by the retry ranges oldest first, all
/// truncated to the configured bound.
pub fn historical_block_ranges(
    state: &ImportRanges<u64>,
    contract_created_at_block: u64,
    head: u64,
    config: &PlannerConfig,
) -> Vec<Range<u64>> {
    let to = head.saturating_sub(BLOCK_PROPAGATION_SAFETY_MARGIN);
    if contract_created_at_block > to {
        return Vec::new();
    }
    let full = Range::new(contract_created_at_block, to);
    prioritize(
        range_exclude(&[full], &state.covered_ranges),
        &state.to_retry,
        to,
        config.max_blocks_per_query,
        config.max_ranges_to_generate,
    )
}

/// Historical oracle price catch-up, the same shape with date arithmetic.
pub fn historical_date_ranges(
    state: &ImportRanges<DateTime<Utc>>,
    first_date: DateTime<Utc>,
    now: DateTime<Utc>,
    max_range: Duration,
    max_ranges_to_generate: usize,
) -> Vec<Range<DateTime<Utc>>> {
    let full = Range::new(first_date, now);
    if full.is_empty() {
        return Vec::new();
    }
    let primary = range_exclude(&[full], &state.covered_ranges);
    let mut result: Vec<Range<DateTime<Utc>>> = primary
        .iter()
        .flat_map(|range| range_split_to_max_length_from_end(*range, max_range))
        .collect();
    result.sort_by(|a, b| b.from.cmp(&a.from));

    let retries = range_exclude(&state.to_retry, &[Range::new(now, DateTime::<Utc>::MAX_UTC)]);
    let mut retries: Vec<_> = retries
        .iter()
        .flat_map(|range| range_split_to_max_length(*range, max_range))
        .collect();
    retries.sort_by_key(|range| range.from);

    result.extend(retries);
    result.truncate(max_ranges_to_generate);
    result
}

/// One datetime to block number correspondence, measured (from imported
/// transfer rows) or interpolated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockSample {
    pub datetime: DateTime<Utc>,
    pub block_number: u64,
}

/// Share rate sampling: given the per timestep block list of a product,
/// emits the block ranges whose share rate samples are still missing.
///
/// Only timesteps inside the parent investment import's covered ranges are
/// trustworthy; beyond the last sample the list is extrapolated to the head
/// using the average block delta of the trailing timesteps.
pub fn interval_block_ranges(
    block_list: &[BlockSample],
    parent_covered: &[Range<u64>],
    state: &ImportRanges<u64>,
    head: u64,
    config: &PlannerConfig,
) -> Vec<Range<u64>> {
    let to = head.saturating_sub(BLOCK_PROPAGATION_SAFETY_MARGIN);
    let mut blocks: Vec<u64> = block_list
        .iter()
        .map(|sample| sample.block_number)
        .filter(|block| parent_covered.iter().any(|range| range.contains(*block)))
        .collect();
    blocks.sort_unstable();
    blocks.dedup();
    if blocks.is_empty() {
        return Vec::new();
    }

    let average_delta = average_trailing_delta(&blocks);
    let mut next = blocks.last().expect("non empty block list") + average_delta;
    while next <= to {
        blocks.push(next);
        next += average_delta;
    }

    // Consecutive sample blocks become the ranges one share rate query has
    // to cover: everything between two samples belongs to the older one.
    let mut ranges: Vec<Range<u64>> = blocks
        .windows(2)
        .map(|pair| Range::new(pair[0], pair[1] - 1))
        .collect();
    if let Some(last) = blocks.last() {
        if *last <= to {
            ranges.push(Range::new(*last, to));
        }
    }

    let range_max_length = average_delta.min(config.max_blocks_per_query).max(1);
    prioritize(
        range_exclude(&ranges, &state.covered_ranges),
        &state.to_retry,
        to,
        range_max_length,
        config.max_ranges_to_generate,
    )
}

/// Average block delta of the trailing [`EXTRAPOLATION_WINDOW`] samples.
fn average_trailing_delta(blocks: &[u64]) -> u64 {
    let tail = &blocks[blocks.len().saturating_sub(EXTRAPOLATION_WINDOW)..];
    if tail.len() < 2 {
        return 1;
    }
    let span = tail.last().unwrap() - tail.first().unwrap();
    (span / (tail.len() as u64 - 1)).max(1)
}

/// The shared tail of every historical planner: split primary work newest
/// first with a full sized newest chunk, append retries oldest first, drop
/// anything beyond the head margin, truncate.
fn prioritize(
    primary: Vec<Range<u64>>,
    to_retry: &[Range<u64>],
    to: u64,
    max_length: u64,
    max_ranges: usize,
) -> Vec<Range<u64>> {
    let beyond_head = [Range::new(to.saturating_add(1), u64::MAX)];

    let mut result: Vec<Range<u64>> = range_exclude(&primary, &beyond_head)
        .iter()
        .flat_map(|range| range_split_to_max_length_from_end(*range, max_length))
        .collect();
    result.sort_by(|a, b| b.from.cmp(&a.from));

    let mut retries: Vec<Range<u64>> = range_exclude(to_retry, &beyond_head)
        .iter()
        .flat_map(|range| range_split_to_max_length(*range, max_length))
        .collect();
    retries.sort_by_key(|range| range.from);

    result.extend(retries);
    result.truncate(max_ranges);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block(from: u64, to: u64) -> Range<u64> {
        Range::new(from, to)
    }

    fn config(max_blocks: u64) -> PlannerConfig {
        PlannerConfig {
            max_blocks_per_query: max_blocks,
            ms_per_block: 3_000,
            max_ranges_to_generate: 100,
        }
    }

    fn ranges_state(covered: Vec<Range<u64>>, to_retry: Vec<Range<u64>>) -> ImportRanges<u64> {
        ImportRanges {
            covered_ranges: covered,
            to_retry,
            last_import_date: Utc.timestamp_opt(1_650_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn empty_state_is_chunked_newest_first() {
        let ranges =
            historical_block_ranges(&ranges_state(vec![], vec![]), 900, 1_000, &config(40));
        // Upper bound is the head minus the safety margin; the newest chunk
        // is full sized, the remainder lands at the contract creation end.
        assert_eq!(
            ranges,
            vec![block(956, 995), block(916, 955), block(900, 915)]
        );
    }

    #[test]
    fn covered_prefix_leaves_only_the_gap() {
        let ranges = historical_block_ranges(
            &ranges_state(vec![block(900, 950)], vec![]),
            900,
            1_000,
            &config(40),
        );
        assert_eq!(ranges, vec![block(956, 995), block(951, 955)]);
    }

    #[test]
    fn retries_are_appended_oldest_first_behind_new_work() {
        let ranges = historical_block_ranges(
            &ranges_state(
                vec![block(900, 950), block(960, 995)],
                vec![block(910, 915), block(902, 903)],
            ),
            900,
            1_000,
            &config(40),
        );
        assert_eq!(
            ranges,
            vec![block(951, 959), block(902, 903), block(910, 915)]
        );
    }

    #[test]
    fn output_never_reaches_past_the_head_margin() {
        let ranges = historical_block_ranges(
            &ranges_state(vec![], vec![block(990, 1_100)]),
            900,
            1_000,
            &config(1_000),
        );
        for range in &ranges {
            assert!(range.to <= 995);
        }
    }

    #[test]
    fn output_is_truncated_to_the_configured_bound() {
        let config = PlannerConfig {
            max_ranges_to_generate: 3,
            ..config(10)
        };
        let ranges = historical_block_ranges(&ranges_state(vec![], vec![]), 0, 1_000, &config);
        assert_eq!(ranges.len(), 3);
        // Newest work survives truncation.
        assert_eq!(ranges[0], block(986, 995));
    }

    #[test]
    fn planner_is_deterministic() {
        let state = ranges_state(vec![block(900, 950)], vec![block(910, 915)]);
        let first = historical_block_ranges(&state, 900, 1_000, &config(40));
        let second = historical_block_ranges(&state, 900, 1_000, &config(40));
        assert_eq!(first, second);
    }

    #[test]
    fn latest_query_is_capped_and_clamped() {
        // Far behind the head: window capped by max blocks per query.
        let range = latest_block_query(0, Some(100), 10_000, &config(40)).unwrap();
        assert_eq!(range, block(9_955, 9_995));

        // The from bound must not underflow past contract creation.
        let range = latest_block_query(990, Some(990), 1_000, &config(40)).unwrap();
        assert_eq!(range, block(990, 995));

        // A head below the margin yields nothing.
        assert_eq!(latest_block_query(0, None, 3, &config(40)), None);
    }

    #[test]
    fn latest_query_is_bounded_by_an_hour_of_blocks() {
        let config = PlannerConfig {
            ms_per_block: 1_000_000,
            max_blocks_per_query: 1_000,
            max_ranges_to_generate: 100,
        };
        // 3.6 blocks per hour, rounded down.
        let range = latest_block_query(0, Some(0), 10_000, &config).unwrap();
        assert_eq!(range.to - range.from, 3);
    }

    #[test]
    fn date_ranges_follow_the_same_shape() {
        let date = |seconds: i64| Utc.timestamp_opt(seconds, 0).unwrap();
        let state = ImportRanges {
            covered_ranges: vec![Range::new(date(0), date(1_000))],
            to_retry: vec![Range::new(date(100), date(200))],
            last_import_date: date(0),
        };
        let ranges =
            historical_date_ranges(&state, date(0), date(2_000), Duration::seconds(600), 100);
        assert_eq!(
            ranges,
            vec![
                Range::new(date(1_400), date(2_000)),
                Range::new(date(1_000), date(1_400)),
                Range::new(date(100), date(200)),
            ]
        );
    }

    #[test]
    fn interval_ranges_sample_between_timesteps() {
        let sample = |seconds: i64, block_number: u64| BlockSample {
            datetime: Utc.timestamp_opt(seconds, 0).unwrap(),
            block_number,
        };
        let block_list = vec![
            sample(0, 100),
            sample(900, 400),
            sample(1_800, 700),
            // Outside the parent coverage, dropped.
            sample(2_700, 1_000_000),
        ];
        let state = ranges_state(vec![block(100, 399)], vec![]);
        let ranges = interval_block_ranges(
            &block_list,
            &[block(0, 2_000)],
            &state,
            1_400,
            &config(10_000),
        );
        // Samples 100/400/700, extrapolated by the 300 block average to
        // 1000 and 1300; the covered [100, 399] span is excluded and the
        // remainder emitted newest first.
        assert!(!ranges.is_empty());
        for range in &ranges {
            assert!(range.from >= 400 || range.from == 100);
            assert!(range.to <= 1_395);
        }
        assert!(ranges.windows(2).all(|pair| pair[0].from >= pair[1].from));
    }
}
