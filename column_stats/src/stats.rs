//! Column-statistics records exchanged with the aggregator.

use bytes::Bytes;

/// Statistics describing the values of one string column over some row set.
#[derive(Debug, Clone, PartialEq)]
pub struct StringColumnStats {
    /// Length in bytes of the longest observed value.
    pub max_len: u64,
    /// Mean length in bytes over the non-null values.
    pub avg_len: f64,
    /// Number of null values.
    pub null_count: u64,
    /// Best known distinct-value count.
    pub distinct_count: u64,
    /// Serialized NDV sketch covering the same row set, if one was collected.
    ///
    /// Absent or zero-length means "no sketch".
    pub ndv_sketch: Option<Bytes>,
}

impl StringColumnStats {
    /// The serialized NDV sketch, treating a zero-length blob as absent.
    pub fn sketch_bytes(&self) -> Option<&[u8]> {
        self.ndv_sketch.as_deref().filter(|blob| !blob.is_empty())
    }
}

/// Per-type column statistics.
///
/// Aggregation is implemented per column type; only string columns are
/// covered so far, and the enum is non-exhaustive so further types can be
/// added without breaking downstream matches.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ColumnStatsData {
    /// Statistics for a string-typed column.
    String(StringColumnStats),
}

impl ColumnStatsData {
    pub(crate) fn as_string(&self) -> &StringColumnStats {
        match self {
            Self::String(stats) => stats,
        }
    }
}

/// Statistics for one named column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnStatsObj {
    /// Name of the column the statistics describe.
    pub column_name: String,
    /// Declared type of the column, e.g. `"string"` or `"varchar(20)"`.
    pub column_type: String,
    /// The per-type statistics payload.
    pub data: ColumnStatsData,
}

/// Column statistics collected on a single partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStats {
    /// Partition the statistics were collected on.
    pub partition_name: String,
    /// Statistics for the columns of this partition covered by the record.
    ///
    /// Aggregation requires exactly one entry: the column being aggregated.
    pub columns: Vec<ColumnStatsObj>,
}
