//! Aggregation of per-partition column statistics into a single summary.
//!
//! Statistics are collected per partition and stored per partition; answering
//! "what do the statistics of this column look like over these N partitions"
//! therefore requires merging N independent summaries. [`aggregate`] does
//! this for string-typed columns:
//!
//! - When every requested partition has a summary (or there are fewer than
//!   two summaries), the summaries are folded together directly. If every
//!   summary additionally carries a mergeable NDV sketch, the folded
//!   distinct-value count comes from the merged sketch instead of a
//!   worst-case maximum.
//! - When only a subset of the requested partitions has a summary, the
//!   observed summaries are treated as samples over the canonical partition
//!   order and extrapolated linearly to the full partition range. Runs of
//!   contiguously indexed observed partitions with mergeable sketches are
//!   first collapsed into pseudo-partitions so each run contributes one
//!   sketch-backed NDV sample.
//!
//! Aggregation is purely synchronous and does not mutate its inputs; callers
//! may aggregate different columns concurrently.

#![warn(missing_docs)]

mod aggregate;
mod extrapolate;
mod stats;

pub use aggregate::{aggregate, Error, Result};
pub use stats::{ColumnStatsData, ColumnStatsObj, PartitionStats, StringColumnStats};
