use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An interval of block numbers or instants.
///
/// Block ranges are inclusive on both ends: `[from, to]` covers
/// `to - from + 1` blocks. Date ranges are half open: `[from, to)` and two
/// date ranges are adjacent when one ends exactly where the other starts.
/// The [`RangeBound`] implementations absorb this difference so the algebra
/// below is written once for both.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Range<T> {
    pub from: T,
    pub to: T,
}

impl<T: RangeBound> Range<T> {
    pub fn new(from: T, to: T) -> Self {
        Self { from, to }
    }

    pub fn is_empty(&self) -> bool {
        T::is_empty(self.from, self.to)
    }

    pub fn contains(&self, value: T) -> bool {
        T::contains(self.from, self.to, value)
    }
}

/// A value usable as a range endpoint.
pub trait RangeBound: Copy + Ord {
    /// Measure of how much a range covers, used to cap range lengths.
    type Len: Copy + Ord;

    /// True when `[_, to]` directly touches `[from, _]` with nothing
    /// representable in between, so the two merge into one interval.
    fn adjacent(to: Self, from: Self) -> bool;
    /// The last covered position before `from`.
    fn before(from: Self) -> Self;
    /// The first position after the covered end `to`.
    fn after(to: Self) -> Self;
    fn is_empty(from: Self, to: Self) -> bool;
    fn contains(from: Self, to: Self, value: Self) -> bool;
    /// End bound of a chunk starting at `from` covering at most `max_len`,
    /// clamped to `to`.
    fn chunk_end(from: Self, max_len: Self::Len, to: Self) -> Self;
    /// Start bound of a chunk ending at `to` covering at most `max_len`,
    /// clamped to `from`.
    fn chunk_start(to: Self, max_len: Self::Len, from: Self) -> Self;
}

impl RangeBound for u64 {
    type Len = u64;

    fn adjacent(to: Self, from: Self) -> bool {
        to.checked_add(1) == Some(from)
    }

    fn before(from: Self) -> Self {
        from.saturating_sub(1)
    }

    fn after(to: Self) -> Self {
        to.saturating_add(1)
    }

    fn is_empty(from: Self, to: Self) -> bool {
        from > to
    }

    fn contains(from: Self, to: Self, value: Self) -> bool {
        from <= value && value <= to
    }

    fn chunk_end(from: Self, max_len: Self::Len, to: Self) -> Self {
        to.min(from.saturating_add(max_len.saturating_sub(1)))
    }

    fn chunk_start(to: Self, max_len: Self::Len, from: Self) -> Self {
        from.max(to.saturating_sub(max_len.saturating_sub(1)))
    }
}

impl RangeBound for DateTime<Utc> {
    type Len = Duration;

    fn adjacent(to: Self, from: Self) -> bool {
        to == from
    }

    fn before(from: Self) -> Self {
        from
    }

    fn after(to: Self) -> Self {
        to
    }

    fn is_empty(from: Self, to: Self) -> bool {
        from >= to
    }

    fn contains(from: Self, to: Self, value: Self) -> bool {
        from <= value && value < to
    }

    fn chunk_end(from: Self, max_len: Self::Len, to: Self) -> Self {
        to.min(from + max_len)
    }

    fn chunk_start(to: Self, max_len: Self::Len, from: Self) -> Self {
        from.max(to - max_len)
    }
}

/// Sorts ranges by their lower bound. The sort is stable so ranges sharing a
/// lower bound keep their relative order.
pub fn range_sort<T: RangeBound>(mut ranges: Vec<Range<T>>) -> Vec<Range<T>> {
    ranges.sort_by_key(|range| range.from);
    ranges
}

/// Collapses overlapping and adjacent ranges into a sorted list of disjoint,
/// non adjacent ranges. Empty ranges are dropped.
pub fn range_merge<T: RangeBound>(ranges: Vec<Range<T>>) -> Vec<Range<T>> {
    let ranges = range_sort(ranges.into_iter().filter(|r| !r.is_empty()).collect());
    let mut result: Vec<Range<T>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match result.last_mut() {
            Some(last) if range.from <= last.to || T::adjacent(last.to, range.from) => {
                last.to = last.to.max(range.to);
            }
            _ => result.push(range),
        }
    }
    result
}

/// Set subtraction: every position covered by `ranges` but by none of
/// `exclusions`.
pub fn range_exclude<T: RangeBound>(
    ranges: &[Range<T>],
    exclusions: &[Range<T>],
) -> Vec<Range<T>> {
    let mut result: Vec<Range<T>> = ranges.iter().copied().filter(|r| !r.is_empty()).collect();
    for exclusion in exclusions.iter().filter(|r| !r.is_empty()) {
        let mut remaining = Vec::with_capacity(result.len() + 1);
        for range in result {
            subtract(range, *exclusion, &mut remaining);
        }
        result = remaining;
    }
    result
}

fn subtract<T: RangeBound>(range: Range<T>, exclusion: Range<T>, out: &mut Vec<Range<T>>) {
    let intersection = Range {
        from: range.from.max(exclusion.from),
        to: range.to.min(exclusion.to),
    };
    if intersection.is_empty() {
        out.push(range);
        return;
    }
    if intersection.from > range.from {
        out.push(Range {
            from: range.from,
            to: T::before(intersection.from),
        });
    }
    if intersection.to < range.to {
        out.push(Range {
            from: T::after(intersection.to),
            to: range.to,
        });
    }
}

/// Splits a range into a chain of adjacent ranges none of which covers more
/// than `max_len`. The union of the parts equals the input.
pub fn range_split_to_max_length<T: RangeBound>(
    range: Range<T>,
    max_len: T::Len,
) -> Vec<Range<T>> {
    let mut result = Vec::new();
    if range.is_empty() {
        return result;
    }
    let mut from = range.from;
    loop {
        let to = T::chunk_end(from, max_len, range.to);
        result.push(Range { from, to });
        if to >= range.to {
            break;
        }
        from = T::after(to);
    }
    result
}

/// Like [`range_split_to_max_length`] but anchored at the end of the range,
/// so a remainder shorter than `max_len` lands at the start. Used where the
/// newest part of a range is processed first and should be full size.
/// Output is still sorted ascending.
pub fn range_split_to_max_length_from_end<T: RangeBound>(
    range: Range<T>,
    max_len: T::Len,
) -> Vec<Range<T>> {
    let mut result = Vec::new();
    if range.is_empty() {
        return result;
    }
    let mut to = range.to;
    loop {
        let from = T::chunk_start(to, max_len, range.from);
        result.push(Range { from, to });
        if from <= range.from {
            break;
        }
        to = T::before(from);
    }
    result.reverse();
    result
}

/// [`range_split_to_max_length`] applied to every range of a list.
pub fn ranges_split_to_max_length<T: RangeBound>(
    ranges: &[Range<T>],
    max_len: T::Len,
) -> Vec<Range<T>> {
    ranges
        .iter()
        .flat_map(|range| range_split_to_max_length(*range, max_len))
        .collect()
}

/// True when any range of the list contains `value`.
pub fn range_list_contains<T: RangeBound>(ranges: &[Range<T>], value: T) -> bool {
    ranges.iter().any(|range| range.contains(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block(from: u64, to: u64) -> Range<u64> {
        Range::new(from, to)
    }

    fn date(from: i64, to: i64) -> Range<DateTime<Utc>> {
        Range::new(
            Utc.timestamp_opt(from, 0).unwrap(),
            Utc.timestamp_opt(to, 0).unwrap(),
        )
    }

    #[test]
    fn merge_collapses_overlapping_and_adjacent_blocks() {
        assert_eq!(
            range_merge(vec![block(40, 50), block(10, 20), block(21, 30)]),
            vec![block(10, 30), block(40, 50)]
        );
    }

    #[test]
    fn merge_collapses_touching_date_ranges() {
        assert_eq!(
            range_merge(vec![date(0, 100), date(100, 200), date(300, 400)]),
            vec![date(0, 200), date(300, 400)]
        );
    }

    #[test]
    fn exclude_splits_around_holes() {
        assert_eq!(
            range_exclude(&[block(0, 100)], &[block(10, 20), block(30, 40)]),
            vec![block(0, 9), block(21, 29), block(41, 100)]
        );
    }

    #[test]
    fn exclude_handles_full_and_zero_overlap() {
        assert_eq!(range_exclude(&[block(10, 20)], &[block(0, 100)]), vec![]);
        assert_eq!(
            range_exclude(&[block(10, 20)], &[block(30, 40)]),
            vec![block(10, 20)]
        );
        // An exclusion starting at the very first block must not leave a
        // phantom `[0, 0]` behind.
        assert_eq!(
            range_exclude(&[block(0, 10)], &[block(0, 5)]),
            vec![block(6, 10)]
        );
    }

    #[test]
    fn exclude_dates_is_half_open() {
        assert_eq!(
            range_exclude(&[date(0, 100)], &[date(50, 100)]),
            vec![date(0, 50)]
        );
        assert_eq!(
            range_exclude(&[date(100, 200)], &[date(0, 100)]),
            vec![date(100, 200)]
        );
    }

    #[test]
    fn split_covers_input_exactly() {
        assert_eq!(
            range_split_to_max_length(block(900, 1000), 40),
            vec![block(900, 939), block(940, 979), block(980, 1000)]
        );
        assert_eq!(
            range_split_to_max_length(date(0, 100), Duration::seconds(40)),
            vec![date(0, 40), date(40, 80), date(80, 100)]
        );
    }

    #[test]
    fn split_from_end_puts_the_remainder_first() {
        assert_eq!(
            range_split_to_max_length_from_end(block(951, 995), 40),
            vec![block(951, 955), block(956, 995)]
        );
        assert_eq!(
            range_split_to_max_length_from_end(block(900, 995), 40),
            vec![block(900, 915), block(916, 955), block(956, 995)]
        );
        assert_eq!(
            range_split_to_max_length_from_end(date(0, 100), Duration::seconds(40)),
            vec![date(0, 20), date(20, 60), date(60, 100)]
        );
    }

    #[test]
    fn contains_respects_bound_conventions() {
        assert!(block(10, 20).contains(20));
        assert!(!date(10, 20).contains(
            Utc.timestamp_opt(20, 0).unwrap()
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_ranges() -> impl Strategy<Value = Vec<Range<u64>>> {
            proptest::collection::vec((0u64..10_000, 0u64..200), 0..20).prop_map(|pairs| {
                pairs
                    .into_iter()
                    .map(|(from, len)| block(from, from + len))
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn merge_is_sorted_disjoint_non_adjacent(ranges in arb_ranges()) {
                let merged = range_merge(ranges);
                for window in merged.windows(2) {
                    prop_assert!(window[0].to < window[1].from);
                    prop_assert!(!RangeBound::adjacent(window[0].to, window[1].from));
                }
            }

            #[test]
            fn excluding_a_merged_list_from_itself_is_empty(ranges in arb_ranges()) {
                let merged = range_merge(ranges);
                prop_assert!(range_exclude(&merged, &merged).is_empty());
            }

            #[test]
            fn split_union_equals_input(from in 0u64..10_000, len in 0u64..500, max in 1u64..100) {
                let range = block(from, from + len);
                let parts = range_split_to_max_length(range, max);
                for part in &parts {
                    prop_assert!(part.to - part.from + 1 <= max);
                }
                prop_assert_eq!(range_merge(parts), vec![range]);
            }

            #[test]
            fn exclude_agrees_with_contains(
                ranges in arb_ranges(),
                exclusions in arb_ranges(),
                value in 0u64..11_000,
            ) {
                let result = range_exclude(&ranges, &exclusions);
                let expected = range_list_contains(&ranges, value)
                    && !range_list_contains(&exclusions, value);
                prop_assert_eq!(range_list_contains(&result, value), expected);
            }
        }
    }
}
