//! Linear endpoint extrapolation of sparse per-partition statistics.
//!
//! The aggregator observes statistics for a subset of the requested
//! partitions only. Each observed (pseudo-)partition contributes one sample
//! `(adjusted index, summary)`; every scalar field is then extended linearly
//! from its lowest- and highest-valued samples out to the right border of the
//! requested partition range.

use std::collections::HashMap;

use itertools::Itertools;

use crate::stats::StringColumnStats;

/// One observed sample: adjusted partition index paired with its summary.
struct Sample<'a> {
    index: f64,
    stats: &'a StringColumnStats,
}

/// Extrapolates the observed samples to a summary for all `num_parts`
/// partitions.
///
/// `adjusted_index` and `adjusted_stats` are keyed by (pseudo-)partition name
/// and must be non-empty and cover the same keys. `density_avg` is accepted
/// for signature parity with the numeric column variants and is unused for
/// string columns.
pub(crate) fn extrapolate(
    num_parts: usize,
    num_parts_with_stats: usize,
    adjusted_index: &HashMap<String, f64>,
    adjusted_stats: &HashMap<String, StringColumnStats>,
    _density_avg: f64,
) -> StringColumnStats {
    let right_border = num_parts as f64;

    let samples = adjusted_stats
        .iter()
        .map(|(name, stats)| Sample {
            index: adjusted_index[name],
            stats,
        })
        .collect_vec();

    let avg_len = {
        let ordered = samples
            .iter()
            .sorted_by(|a, b| a.stats.avg_len.total_cmp(&b.stats.avg_len))
            .collect_vec();
        let (lowest, highest) = (ordered[0], ordered[ordered.len() - 1]);
        endpoint_extrapolate(
            lowest.stats.avg_len,
            highest.stats.avg_len,
            lowest.index,
            highest.index,
            right_border,
        )
    };

    let max_len = {
        let ordered = samples
            .iter()
            .sorted_by_key(|sample| sample.stats.max_len)
            .collect_vec();
        let (lowest, highest) = (ordered[0], ordered[ordered.len() - 1]);
        // The endpoint values read avg_len even though the sort key is
        // max_len. The original aggregator does this; kept as-is.
        endpoint_extrapolate(
            lowest.stats.avg_len,
            highest.stats.avg_len,
            lowest.index,
            highest.index,
            right_border,
        ) as u64
    };

    let distinct_count = {
        let ordered = samples
            .iter()
            .sorted_by_key(|sample| sample.stats.distinct_count)
            .collect_vec();
        let (lowest, highest) = (ordered[0], ordered[ordered.len() - 1]);
        endpoint_extrapolate(
            lowest.stats.distinct_count as f64,
            highest.stats.distinct_count as f64,
            lowest.index,
            highest.index,
            right_border,
        ) as u64
    };

    // Nulls scale up uniformly with the partition count rather than following
    // the endpoint model. Multiply before dividing, in u128 so the scale-up
    // cannot overflow.
    let observed_nulls: u128 = adjusted_stats
        .values()
        .map(|stats| u128::from(stats.null_count))
        .sum();
    let null_count = (observed_nulls * num_parts as u128 / num_parts_with_stats as u128)
        .min(u128::from(u64::MAX)) as u64;

    StringColumnStats {
        max_len,
        avg_len,
        null_count,
        distinct_count,
        ndv_sketch: None,
    }
}

/// Extends the line through the lowest-valued sample (`lo` at `min_ind`) and
/// the highest-valued sample (`hi` at `max_ind`) to the border of the
/// partition range.
fn endpoint_extrapolate(lo: f64, hi: f64, min_ind: f64, max_ind: f64, right_border: f64) -> f64 {
    if min_ind == max_ind {
        lo
    } else if min_ind < max_ind {
        // the right border carries the maximum
        lo + (hi - lo) * (right_border - min_ind) / (max_ind - min_ind)
    } else {
        // the left border carries the maximum
        lo + (hi - lo) * min_ind / (min_ind - max_ind)
    }
}
