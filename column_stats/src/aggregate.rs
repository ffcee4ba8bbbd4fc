//! Merging of per-partition string-column statistics.

use std::collections::{HashMap, HashSet};

use ndv_sketch::Hll;
use snafu::{ensure, ResultExt, Snafu};
use tracing::debug;

use crate::extrapolate::extrapolate;
use crate::stats::{ColumnStatsData, ColumnStatsObj, PartitionStats, StringColumnStats};

/// Aggregation errors.
///
/// Every variant reports input the aggregator cannot use; there is no
/// partial output.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The call carried no per-partition statistics at all.
    #[snafu(display("no partition statistics supplied for column {column}"))]
    NoPartitionStats {
        /// Column the aggregation was requested for.
        column: String,
    },

    /// A per-partition record did not contain exactly one column summary.
    #[snafu(display(
        "the number of columns should be exactly one in aggregated statistics, but found {found}"
    ))]
    UnexpectedColumnCount {
        /// Column summaries found in the offending record.
        found: usize,
    },

    /// A per-partition record referenced a partition that was not requested.
    #[snafu(display("partition {partition} does not appear in the requested partition list"))]
    UnknownPartition {
        /// Name of the unrequested partition.
        partition: String,
    },

    /// Two per-partition records referenced the same partition.
    #[snafu(display("partition {partition} appears more than once in the input statistics"))]
    DuplicatePartition {
        /// Name of the repeated partition.
        partition: String,
    },

    /// A partition carried an NDV sketch blob that does not decode.
    #[snafu(display("undecodable NDV sketch for partition {partition}: {source}"))]
    SketchDecode {
        /// Partition carrying the blob.
        partition: String,
        /// Decode failure reported by the sketch library.
        source: ndv_sketch::Error,
    },
}

/// Result type for aggregation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Aggregates per-partition statistics of the string column `column_name`
/// over the partitions listed in `partition_names`.
///
/// `partition_names` fixes the canonical partition order: the canonical
/// index of a partition is its position in the list. `stats` carries one
/// summary per observed partition, in observation order, and may cover any
/// subset of the requested partitions; the strict-subset case is answered by
/// linear extrapolation over the canonical order (see the crate docs).
///
/// The declared column type of the output is taken from the first summary.
pub fn aggregate(
    column_name: &str,
    partition_names: &[String],
    stats: &[PartitionStats],
) -> Result<ColumnStatsObj> {
    ensure!(
        !stats.is_empty(),
        NoPartitionStatsSnafu {
            column: column_name
        }
    );

    let index_map: HashMap<&str, usize> = partition_names
        .iter()
        .enumerate()
        .map(|(index, name)| (name.as_str(), index))
        .collect();

    let mut seen = HashSet::with_capacity(stats.len());
    for partition in stats {
        ensure!(
            partition.columns.len() == 1,
            UnexpectedColumnCountSnafu {
                found: partition.columns.len()
            }
        );
        ensure!(
            index_map.contains_key(partition.partition_name.as_str()),
            UnknownPartitionSnafu {
                partition: partition.partition_name.as_str()
            }
        );
        ensure!(
            seen.insert(partition.partition_name.as_str()),
            DuplicatePartitionSnafu {
                partition: partition.partition_name.as_str()
            }
        );
    }

    let all_present = partition_names.len() == stats.len();
    debug!(
        column = column_name,
        all_present, "classified partition statistics"
    );

    let sketches = decode_compatible_sketches(stats)?;
    debug!(
        column = column_name,
        sketch_merge = sketches.is_some(),
        "checked NDV sketch mergeability"
    );

    let aggregated = if all_present || stats.len() < 2 {
        direct_merge(stats, sketches.as_deref())
    } else {
        debug!(
            column = column_name,
            "extrapolating from partial partition statistics"
        );
        let (adjusted_index, adjusted_stats) = match sketches {
            None => ungrouped_samples(stats, &index_map),
            Some(decoded) => grouped_samples(stats, &decoded, &index_map),
        };
        extrapolate(
            partition_names.len(),
            stats.len(),
            &adjusted_index,
            &adjusted_stats,
            -1.0,
        )
    };

    debug!(
        column = column_name,
        ndv = aggregated.distinct_count,
        requested = partition_names.len(),
        found = stats.len(),
        "aggregated string column statistics"
    );

    Ok(ColumnStatsObj {
        column_name: column_name.to_string(),
        column_type: stats[0].columns[0].column_type.clone(),
        data: ColumnStatsData::String(aggregated),
    })
}

/// The single string summary of a validated per-partition record.
fn string_stats(partition: &PartitionStats) -> &StringColumnStats {
    partition.columns[0].data.as_string()
}

/// Decodes every partition's NDV sketch, committing to sketch-based NDV
/// aggregation only when all partitions carry one and all of them are
/// pairwise mergeable.
///
/// The scan stops at the first partition without a sketch or with a sketch
/// incompatible with the first one; distinct counts then fall back to the
/// scalar summaries. A sketch that is present but does not decode fails the
/// whole aggregation.
fn decode_compatible_sketches(stats: &[PartitionStats]) -> Result<Option<Vec<Hll>>> {
    let mut decoded: Vec<Hll> = Vec::with_capacity(stats.len());
    for partition in stats {
        let Some(blob) = string_stats(partition).sketch_bytes() else {
            return Ok(None);
        };
        let sketch = Hll::from_bytes(blob).context(SketchDecodeSnafu {
            partition: partition.partition_name.as_str(),
        })?;
        if let Some(first) = decoded.first() {
            if !first.can_merge(&sketch) {
                return Ok(None);
            }
        }
        decoded.push(sketch);
    }
    Ok(Some(decoded))
}

/// Direct merge, taken when every requested partition carries statistics or
/// there are fewer than two summaries.
fn direct_merge(stats: &[PartitionStats], sketches: Option<&[Hll]>) -> StringColumnStats {
    let mut aggregated = string_stats(&stats[0]).clone();
    for partition in &stats[1..] {
        let next = string_stats(partition);
        aggregated.max_len = aggregated.max_len.max(next.max_len);
        aggregated.avg_len = aggregated.avg_len.max(next.avg_len);
        aggregated.null_count += next.null_count;
        aggregated.distinct_count = aggregated.distinct_count.max(next.distinct_count);
    }
    if let Some(decoded) = sketches {
        // the merged sketches subsume the scalar worst-case maximum
        let mut merged = decoded[0].empty_like();
        for sketch in decoded {
            merged.merge(sketch);
        }
        aggregated.distinct_count = merged.estimate();
    }
    aggregated
}

/// Extrapolation inputs keyed by (pseudo-)partition name.
type AdjustedSamples = (HashMap<String, f64>, HashMap<String, StringColumnStats>);

/// Extrapolation inputs when sketches are unavailable: every observed
/// partition is its own sample at its canonical index.
fn ungrouped_samples(
    stats: &[PartitionStats],
    index_map: &HashMap<&str, usize>,
) -> AdjustedSamples {
    let mut adjusted_index = HashMap::with_capacity(stats.len());
    let mut adjusted_stats = HashMap::with_capacity(stats.len());
    for partition in stats {
        let index = index_map[partition.partition_name.as_str()];
        adjusted_index.insert(partition.partition_name.clone(), index as f64);
        adjusted_stats.insert(
            partition.partition_name.clone(),
            string_stats(partition).clone(),
        );
    }
    (adjusted_index, adjusted_stats)
}

/// Extrapolation inputs when every observed partition carries a mergeable
/// sketch: runs of contiguously indexed partitions collapse into single
/// pseudo-partitions placed at the mean of their member indices, and each
/// run's merged sketch yields its distinct-value sample.
///
/// The sweep follows the order of `stats`; a summary whose canonical index
/// is not the expected successor of the previous one closes the current run.
fn grouped_samples(
    stats: &[PartitionStats],
    sketches: &[Hll],
    index_map: &HashMap<&str, usize>,
) -> AdjustedSamples {
    let mut adjusted_index = HashMap::new();
    let mut adjusted_stats = HashMap::new();
    let mut group: Option<PseudoPartition> = None;

    for (partition, sketch) in stats.iter().zip(sketches) {
        let index = index_map[partition.partition_name.as_str()];
        group = Some(match group.take() {
            Some(mut current) if current.next_index == index => {
                current.push(partition, index, sketch);
                current
            }
            Some(current) => {
                let (name, mean_index, group_stats) = current.finish();
                adjusted_index.insert(name.clone(), mean_index);
                adjusted_stats.insert(name, group_stats);
                PseudoPartition::start(partition, index, sketch)
            }
            None => PseudoPartition::start(partition, index, sketch),
        });
    }
    if let Some(current) = group {
        let (name, mean_index, group_stats) = current.finish();
        adjusted_index.insert(name.clone(), mean_index);
        adjusted_stats.insert(name, group_stats);
    }

    (adjusted_index, adjusted_stats)
}

/// Running state for one run of contiguously indexed observed partitions.
struct PseudoPartition {
    /// Concatenation of the member partition names.
    name: String,
    index_sum: f64,
    len: usize,
    /// Canonical index the next summary must have for the run to continue.
    next_index: usize,
    stats: StringColumnStats,
    sketch: Hll,
}

impl PseudoPartition {
    fn start(partition: &PartitionStats, index: usize, sketch: &Hll) -> Self {
        Self {
            name: partition.partition_name.clone(),
            index_sum: index as f64,
            len: 1,
            next_index: index + 1,
            stats: string_stats(partition).clone(),
            sketch: sketch.clone(),
        }
    }

    fn push(&mut self, partition: &PartitionStats, index: usize, sketch: &Hll) {
        let next = string_stats(partition);
        self.name.push_str(&partition.partition_name);
        self.index_sum += index as f64;
        self.len += 1;
        self.next_index = index + 1;
        self.stats.avg_len = self.stats.avg_len.min(next.avg_len);
        self.stats.max_len = self.stats.max_len.max(next.max_len);
        self.stats.null_count += next.null_count;
        self.sketch.merge(sketch);
    }

    /// Closes the run; its merged sketch provides the sample's NDV.
    fn finish(mut self) -> (String, f64, StringColumnStats) {
        self.stats.distinct_count = self.sketch.estimate();
        (self.name, self.index_sum / self.len as f64, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use proptest::prelude::*;

    const COLUMN: &str = "c";

    fn part_names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("p{i}")).collect()
    }

    fn summary(
        max_len: u64,
        avg_len: f64,
        null_count: u64,
        distinct_count: u64,
    ) -> StringColumnStats {
        StringColumnStats {
            max_len,
            avg_len,
            null_count,
            distinct_count,
            ndv_sketch: None,
        }
    }

    fn with_sketch(mut stats: StringColumnStats, sketch: &Hll) -> StringColumnStats {
        stats.ndv_sketch = Some(sketch.to_bytes());
        stats
    }

    fn partition(name: &str, stats: StringColumnStats) -> PartitionStats {
        PartitionStats {
            partition_name: name.to_string(),
            columns: vec![ColumnStatsObj {
                column_name: COLUMN.to_string(),
                column_type: "string".to_string(),
                data: ColumnStatsData::String(stats),
            }],
        }
    }

    fn sketch_of(values: impl IntoIterator<Item = u32>) -> Hll {
        let mut sketch = Hll::new(12).unwrap();
        sketch.extend(values.into_iter().map(|v| format!("v{v}").into_bytes()));
        sketch
    }

    fn output(result: ColumnStatsObj) -> StringColumnStats {
        match result.data {
            ColumnStatsData::String(stats) => stats,
        }
    }

    #[test]
    fn test_all_partitions_present_without_sketches() {
        let requested = part_names(2);
        let stats = vec![
            partition("p0", summary(10, 5.0, 3, 7)),
            partition("p1", summary(20, 4.0, 2, 4)),
        ];

        let result = aggregate(COLUMN, &requested, &stats).unwrap();
        assert_eq!(result.column_name, "c");
        assert_eq!(result.column_type, "string");

        let out = output(result);
        assert_eq!(out.max_len, 20);
        assert_eq!(out.avg_len, 5.0);
        assert_eq!(out.null_count, 5);
        assert_eq!(out.distinct_count, 7);
    }

    #[test]
    fn test_all_partitions_present_with_mergeable_sketches() {
        let requested = part_names(2);
        let s0 = sketch_of(0..7);
        let s1 = sketch_of(3..11); // union is 11 distinct values
        let stats = vec![
            partition("p0", with_sketch(summary(10, 5.0, 3, 7), &s0)),
            partition("p1", with_sketch(summary(20, 4.0, 2, 4), &s1)),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());

        let mut reference = s0.clone();
        reference.merge(&s1);
        assert_eq!(out.distinct_count, reference.estimate());
        assert!(
            (out.distinct_count as i64 - 11).abs() <= 1,
            "ndv {} too far from 11",
            out.distinct_count
        );
        assert_eq!(out.max_len, 20);
        assert_eq!(out.avg_len, 5.0);
        assert_eq!(out.null_count, 5);
        // the aggregate is seeded from a copy of the first summary, sketch
        // blob included
        assert_eq!(out.ndv_sketch, Some(s0.to_bytes()));
    }

    #[test]
    fn test_incompatible_sketches_fall_back_to_scalar_ndv() {
        let requested = part_names(2);
        let mut narrow = Hll::new(12).unwrap();
        narrow.add(b"x");
        let mut wide = Hll::new(13).unwrap();
        wide.add(b"y");
        let stats = vec![
            partition("p0", with_sketch(summary(10, 5.0, 3, 7), &narrow)),
            partition("p1", with_sketch(summary(20, 4.0, 2, 4), &wide)),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
        assert_eq!(out.distinct_count, 7);
    }

    #[test]
    fn test_partially_missing_sketches_fall_back_to_scalar_ndv() {
        let requested = part_names(3);
        let s0 = sketch_of(0..5);
        let stats = vec![
            partition("p0", with_sketch(summary(10, 5.0, 1, 5), &s0)),
            partition("p1", summary(10, 5.0, 1, 9)),
            partition("p2", with_sketch(summary(10, 5.0, 1, 2), &s0)),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
        assert_eq!(out.distinct_count, 9);
        assert_eq!(out.null_count, 3);
    }

    #[test]
    fn test_empty_sketch_blob_counts_as_missing() {
        let requested = part_names(2);
        let mut no_sketch = summary(10, 5.0, 0, 7);
        no_sketch.ndv_sketch = Some(Bytes::new());
        let stats = vec![
            partition("p0", no_sketch),
            partition("p1", with_sketch(summary(20, 4.0, 0, 4), &sketch_of(0..4))),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
        assert_eq!(out.distinct_count, 7);
    }

    #[test]
    fn test_sparse_partitions_extrapolate() {
        let requested = part_names(4);
        let stats = vec![
            partition("p0", summary(10, 6.0, 4, 8)),
            partition("p2", summary(30, 2.0, 6, 20)),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
        assert_eq!(out.null_count, 20);
        assert_eq!(out.distinct_count, 32);
        assert_eq!(out.avg_len, 6.0);
    }

    #[test]
    fn test_sparse_contiguous_sketches_group_into_one_sample() {
        let requested = part_names(4);
        let s0 = sketch_of(0..9);
        let s1 = sketch_of(5..15); // union is 15 distinct values
        let stats = vec![
            partition("p0", with_sketch(summary(10, 6.0, 4, 9), &s0)),
            partition("p1", with_sketch(summary(30, 4.0, 6, 10), &s1)),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());

        // one pseudo-partition at index 0.5; a single sample extrapolates to
        // itself
        let mut reference = s0.clone();
        reference.merge(&s1);
        assert_eq!(out.distinct_count, reference.estimate());
        assert!(
            (out.distinct_count as i64 - 15).abs() <= 1,
            "ndv {} too far from 15",
            out.distinct_count
        );
        // the run fold keeps the smaller avg_len
        assert_eq!(out.avg_len, 4.0);
        // a single sample's extrapolated max_len reads its avg_len
        assert_eq!(out.max_len, 4);
        assert_eq!(out.null_count, (4 + 6) * 4 / 2);
    }

    #[test]
    fn test_sparse_sketches_with_gap_form_two_samples() {
        let requested = part_names(4);
        let s0 = sketch_of(0..4);
        let s2 = sketch_of(0..8);
        let stats = vec![
            partition("p0", with_sketch(summary(10, 3.0, 2, 4), &s0)),
            partition("p2", with_sketch(summary(12, 3.0, 2, 8), &s2)),
        ];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());

        let (e0, e2) = (s0.estimate(), s2.estimate());
        assert!(e0 < e2, "need distinct sample estimates, got {e0} and {e2}");
        // lowest estimate at index 0, highest at index 2, extended to the
        // right border 4
        let expected = e0 as f64 + (e2 - e0) as f64 * (4.0 - 0.0) / 2.0;
        assert_eq!(out.distinct_count, expected as u64);
    }

    #[test]
    fn test_single_summary_for_multiple_requested_partitions() {
        let requested = part_names(2);
        let stats = vec![partition("p0", summary(10, 5.0, 3, 7))];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
        assert_eq!(out, summary(10, 5.0, 3, 7));
    }

    #[test]
    fn test_single_summary_with_sketch_uses_sketch_ndv() {
        let requested = part_names(2);
        let sketch = sketch_of(0..9);
        let stats = vec![partition("p1", with_sketch(summary(10, 5.0, 3, 7), &sketch))];

        let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
        assert_eq!(out.distinct_count, sketch.estimate());
        assert_eq!(out.max_len, 10);
        assert_eq!(out.ndv_sketch, Some(sketch.to_bytes()));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        assert_matches!(
            aggregate(COLUMN, &part_names(2), &[]),
            Err(Error::NoPartitionStats { .. })
        );
    }

    #[test]
    fn test_input_must_carry_exactly_one_column() {
        let requested = part_names(1);
        let mut stats = partition("p0", summary(1, 1.0, 0, 1));
        stats.columns.push(stats.columns[0].clone());

        assert_matches!(
            aggregate(COLUMN, &requested, &[stats]),
            Err(Error::UnexpectedColumnCount { found: 2 })
        );
    }

    #[test]
    fn test_unknown_partition_is_rejected() {
        let requested = part_names(2);
        let stats = vec![partition("somewhere_else", summary(1, 1.0, 0, 1))];

        assert_matches!(
            aggregate(COLUMN, &requested, &stats),
            Err(Error::UnknownPartition { .. })
        );
    }

    #[test]
    fn test_duplicate_partition_is_rejected() {
        let requested = part_names(2);
        let stats = vec![
            partition("p0", summary(1, 1.0, 0, 1)),
            partition("p0", summary(1, 1.0, 0, 1)),
        ];

        assert_matches!(
            aggregate(COLUMN, &requested, &stats),
            Err(Error::DuplicatePartition { .. })
        );
    }

    #[test]
    fn test_corrupt_sketch_fails_the_aggregation() {
        let requested = part_names(2);
        let mut corrupt = summary(1, 1.0, 0, 1);
        corrupt.ndv_sketch = Some(Bytes::from_static(b"not a sketch"));
        let stats = vec![
            partition("p0", corrupt),
            partition("p1", with_sketch(summary(1, 1.0, 0, 1), &sketch_of(0..3))),
        ];

        assert_matches!(
            aggregate(COLUMN, &requested, &stats),
            Err(Error::SketchDecode { .. })
        );
    }

    proptest! {
        #[test]
        fn all_present_sums_nulls_exactly(
            null_counts in prop::collection::vec(0u64..1_000, 1..8),
        ) {
            let requested = part_names(null_counts.len());
            let stats: Vec<_> = null_counts
                .iter()
                .enumerate()
                .map(|(i, &nulls)| partition(&format!("p{i}"), summary(10, 2.0, nulls, 3)))
                .collect();

            let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
            prop_assert_eq!(out.null_count, null_counts.iter().sum::<u64>());
        }

        #[test]
        fn scaled_null_count_never_shrinks(
            null_counts in prop::collection::vec(0u64..1_000, 2..6),
            extra in 1usize..4,
        ) {
            let requested = part_names(null_counts.len() + extra);
            let stats: Vec<_> = null_counts
                .iter()
                .enumerate()
                .map(|(i, &nulls)| partition(&format!("p{i}"), summary(10, 2.0, nulls, 3)))
                .collect();

            let out = output(aggregate(COLUMN, &requested, &stats).unwrap());
            prop_assert!(out.null_count >= null_counts.iter().sum::<u64>());
        }
    }
}
