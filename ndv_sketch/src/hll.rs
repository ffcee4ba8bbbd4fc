//! A dense HyperLogLog sketch with a stable byte encoding.

use bytes::Bytes;
use siphasher::sip::SipHasher24;
use snafu::{ensure, Snafu};

/// Blob tag identifying the sketch family ("HLL") and encoding version (1).
const MAGIC: [u8; 4] = *b"HLL\x01";

/// Fixed SipHash keys. Changing these invalidates every previously persisted
/// sketch, so they must never change within an encoding version.
const HASH_KEY0: u64 = 0x6a25_6fd1_33fc_7a4b;
const HASH_KEY1: u64 = 0x91b3_07a0_5cde_2e8f;

/// Smallest supported register-index width.
pub const MIN_PRECISION: u8 = 4;
/// Largest supported register-index width.
pub const MAX_PRECISION: u8 = 18;
/// Precision used by collectors that have no reason to pick another one.
pub const DEFAULT_PRECISION: u8 = 14;

/// Sketch decoding errors.
#[derive(Debug, Snafu, PartialEq)]
pub enum Error {
    /// The blob is shorter than the fixed header.
    #[snafu(display("sketch blob too short: {len} bytes"))]
    Truncated {
        /// Length of the rejected blob.
        len: usize,
    },

    /// The blob does not start with a known family/version tag.
    #[snafu(display("unrecognized sketch family or encoding version"))]
    UnrecognizedFamily,

    /// The encoded precision is outside the supported range.
    #[snafu(display(
        "sketch precision {precision} out of range {MIN_PRECISION}..={MAX_PRECISION}"
    ))]
    PrecisionOutOfRange {
        /// The rejected precision.
        precision: u8,
    },

    /// The register payload does not match the encoded precision.
    #[snafu(display("sketch register payload has {actual} bytes, expected {expected}"))]
    RegisterLengthMismatch {
        /// Register count implied by the encoded precision.
        expected: usize,
        /// Register bytes actually present.
        actual: usize,
    },
}

/// Result type for sketch operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A dense HyperLogLog distinct-value sketch.
///
/// The sketch keeps `2^precision` one-byte registers. Inserting a value
/// hashes it, uses the low `precision` bits of the hash to select a register
/// and stores the maximum observed rank of the remaining bits. Merging two
/// sketches of the same precision is a register-wise maximum, which makes the
/// estimate depend only on the set of values inserted, not on how the inserts
/// were distributed over sketches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hll {
    precision: u8,
    registers: Vec<u8>,
}

impl Hll {
    /// Creates an empty sketch with `2^precision` registers.
    pub fn new(precision: u8) -> Result<Self> {
        ensure!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            PrecisionOutOfRangeSnafu { precision }
        );
        Ok(Self {
            precision,
            registers: vec![0; 1 << precision],
        })
    }

    /// Creates an empty sketch with [`DEFAULT_PRECISION`].
    pub fn with_default_precision() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
            registers: vec![0; 1 << DEFAULT_PRECISION],
        }
    }

    /// The register-index width of this sketch.
    pub fn precision(&self) -> u8 {
        self.precision
    }

    /// Returns an empty sketch with the same parameters as `self`.
    ///
    /// The returned sketch is the identity for [`merge`](Self::merge).
    pub fn empty_like(&self) -> Self {
        Self {
            precision: self.precision,
            registers: vec![0; self.registers.len()],
        }
    }

    /// Inserts one value.
    pub fn add(&mut self, value: &[u8]) {
        let hash = SipHasher24::new_with_keys(HASH_KEY0, HASH_KEY1).hash(value);
        let idx = (hash & (self.registers.len() as u64 - 1)) as usize;
        let rest = hash >> self.precision;
        let max_rank = 64 - self.precision + 1;
        let rank = if rest == 0 {
            max_rank
        } else {
            (rest.trailing_zeros() as u8 + 1).min(max_rank)
        };
        if rank > self.registers[idx] {
            self.registers[idx] = rank;
        }
    }

    /// Inserts every value yielded by `values`.
    pub fn extend<I, T>(&mut self, values: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        for value in values {
            self.add(value.as_ref());
        }
    }

    /// Returns true iff `other` can be folded into `self`.
    ///
    /// Symmetric and reflexive: sketches merge iff they use the same
    /// precision. Family compatibility is already established by the fact
    /// that both blobs decoded.
    pub fn can_merge(&self, other: &Self) -> bool {
        self.precision == other.precision
    }

    /// Folds `other` into `self` by register-wise maximum.
    ///
    /// Associative and commutative; the resulting estimate depends only on
    /// the multiset of inserted values.
    ///
    /// # Panics
    ///
    /// Panics if the sketches are incompatible; callers check
    /// [`can_merge`](Self::can_merge) first.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(
            self.precision, other.precision,
            "cannot merge sketches of different precision"
        );
        for (register, other_register) in self.registers.iter_mut().zip(&other.registers) {
            *register = (*register).max(*other_register);
        }
    }

    /// Current distinct-value estimate, rounded to the nearest integer.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;
        let harmonic_sum: f64 = self
            .registers
            .iter()
            .map(|&register| (-f64::from(register)).exp2())
            .sum();
        let alpha = match self.registers.len() {
            16 => 0.673,
            32 => 0.697,
            64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };
        let raw = alpha * m * m / harmonic_sum;

        // Linear counting is more accurate while most registers are zero.
        let zero_registers = self.registers.iter().filter(|&&register| register == 0).count();
        let corrected = if raw <= 2.5 * m && zero_registers > 0 {
            m * (m / zero_registers as f64).ln()
        } else {
            raw
        };
        corrected.round() as u64
    }

    /// Serializes the sketch into its opaque blob form.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(MAGIC.len() + 1 + self.registers.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(self.precision);
        buf.extend_from_slice(&self.registers);
        buf.into()
    }

    /// Decodes a blob produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        ensure!(data.len() > MAGIC.len(), TruncatedSnafu { len: data.len() });
        ensure!(data[..MAGIC.len()] == MAGIC, UnrecognizedFamilySnafu);
        let precision = data[MAGIC.len()];
        ensure!(
            (MIN_PRECISION..=MAX_PRECISION).contains(&precision),
            PrecisionOutOfRangeSnafu { precision }
        );
        let registers = &data[MAGIC.len() + 1..];
        let expected = 1usize << precision;
        ensure!(
            registers.len() == expected,
            RegisterLengthMismatchSnafu {
                expected,
                actual: registers.len()
            }
        );
        Ok(Self {
            precision,
            registers: registers.to_vec(),
        })
    }
}
