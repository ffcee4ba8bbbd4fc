//! Mergeable distinct-value (NDV) sketches for partitioned column statistics.
//!
//! Statistics collectors run independently per partition and persist their
//! sketch next to the scalar column summary as an opaque blob. A later
//! aggregation pass decodes the blobs, checks that they are structurally
//! compatible via [`Hll::can_merge`], folds them together with [`Hll::merge`]
//! and reads a distinct-value estimate for the union of the partitions from
//! [`Hll::estimate`].
//!
//! Hashing uses SipHash 2-4 under fixed keys so that blobs produced by one
//! process merge correctly with blobs produced by another.

#![warn(missing_docs)]

mod hll;

pub use hll::{Error, Hll, Result, DEFAULT_PRECISION, MAX_PRECISION, MIN_PRECISION};
