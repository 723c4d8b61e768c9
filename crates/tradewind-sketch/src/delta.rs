//! The XOR set-reconciliation sketch.

use std::collections::BTreeSet;

use tradewind_core::{Key, Salt};

use crate::error::{Result, SketchError};
use crate::estimate::CAPACITY_TIERS;

/// Width of the key space; table-size exponents must sum to exactly this.
pub const KEY_BITS: u32 = 64;

/// Exclusive upper limit for a single table-size exponent.
pub const MAX_TABLE_EXPONENT: u8 = 32;

/// Odd 32-bit multiplier scrambling a key into its encoded form.
///
/// Odd, so the mapping is a bijection on u64 and destination indices are
/// uniformly spread even for structured key sets.
const KEY_SCRAMBLE: u64 = 0x9E37_79B9;

/// One XOR accumulator cell.
///
/// `key_sum` accumulates the keys themselves; `check_sum` accumulates an
/// independent mix of each key. A cell only counts as pure when both sums
/// agree on the same single key, which keeps coincidental XOR collisions
/// from being accepted as decode results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    /// XOR of all keys routed to this cell.
    pub key_sum: u64,
    /// XOR of the check hashes of all keys routed to this cell.
    pub check_sum: u64,
}

impl Cell {
    /// True when no key (or a cancelling pair) is present.
    pub fn is_empty(&self) -> bool {
        self.key_sum == 0 && self.check_sum == 0
    }

    fn xor_key(&mut self, key: Key) {
        self.key_sum ^= key;
        self.check_sum ^= check_hash(key);
    }

    fn xor_cell(&mut self, other: &Cell) {
        self.key_sum ^= other.key_sum;
        self.check_sum ^= other.check_sum;
    }
}

/// Independent per-key mix feeding the cell check accumulator
/// (SplitMix64 finalizer).
fn check_hash(key: Key) -> u64 {
    let mut z = key.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// A fixed-size XOR sketch of a 64-bit key set.
///
/// Two sketches are only combinable when built with identical parameters
/// (salt, bounds, exponents). See the crate docs for the algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySetDelta {
    salt: Salt,
    lower_bound: u64,
    upper_bound: u64,
    exponents: Vec<u8>,
    /// Cumulative exponent sums; `prefixes[i]` is how many leading bits of
    /// the encoded key address table `i`.
    prefixes: Vec<u32>,
    tables: Vec<Vec<Cell>>,
}

impl KeySetDelta {
    /// Create an empty sketch with an inclusive key-range filter.
    pub fn new(salt: Salt, lower_bound: u64, upper_bound: u64, exponents: &[u8]) -> Result<Self> {
        if exponents.is_empty() {
            return Err(SketchError::NoTables);
        }
        if lower_bound > upper_bound {
            return Err(SketchError::InvertedRange {
                lower: lower_bound,
                upper: upper_bound,
            });
        }
        let mut prefixes = Vec::with_capacity(exponents.len());
        let mut sum = 0u32;
        for &e in exponents {
            if e >= MAX_TABLE_EXPONENT {
                return Err(SketchError::ExponentOutOfRange(e));
            }
            sum += u32::from(e);
            prefixes.push(sum);
        }
        if sum != KEY_BITS {
            return Err(SketchError::ExponentSumMismatch(sum));
        }
        let tables = exponents
            .iter()
            .map(|&e| vec![Cell::default(); 1usize << e])
            .collect();
        Ok(Self {
            salt,
            lower_bound,
            upper_bound,
            exponents: exponents.to_vec(),
            prefixes,
            tables,
        })
    }

    /// Create an empty sketch covering the whole key space.
    pub fn unfiltered(salt: Salt, exponents: &[u8]) -> Result<Self> {
        Self::new(salt, 0, u64::MAX, exponents)
    }

    /// Size a sketch for an estimated key-set cardinality.
    ///
    /// Picks the smallest capacity tier whose unfiltered capacity covers
    /// the estimate; if even the largest tier cannot, that tier is used
    /// with an upper bound that filters the key space down proportionally.
    pub fn for_capacity(salt: Salt, estimated_keys: u64) -> Self {
        for tier in &CAPACITY_TIERS {
            if estimated_keys <= tier.max_unfiltered {
                // Parameters are compile-time constants, validated by tests.
                return Self::unfiltered(salt, tier.exponents).expect("tier exponents are valid");
            }
        }
        let tier = &CAPACITY_TIERS[CAPACITY_TIERS.len() - 1];
        let upper = ((u128::from(tier.max_unfiltered) * u128::from(u64::MAX))
            / u128::from(estimated_keys)) as u64;
        Self::new(salt, 0, upper, tier.exponents).expect("tier exponents are valid")
    }

    /// The salt the sketch was built with.
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Inclusive lower bound of the accepted key range.
    pub fn lower_bound(&self) -> u64 {
        self.lower_bound
    }

    /// Inclusive upper bound of the accepted key range.
    pub fn upper_bound(&self) -> u64 {
        self.upper_bound
    }

    /// True when no range filtering is in effect.
    pub fn is_unfiltered(&self) -> bool {
        self.lower_bound == 0 && self.upper_bound == u64::MAX
    }

    /// The table-size exponent list.
    pub fn exponents(&self) -> &[u8] {
        &self.exponents
    }

    /// The accumulator tables, lowest resolution first.
    pub fn tables(&self) -> &[Vec<Cell>] {
        &self.tables
    }

    /// Total cell count across all tables.
    pub fn cell_count(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }

    /// Rebuild a sketch from parameters plus a flat cell list in table
    /// order. Used by wire decoding; `cells` length must match the
    /// exponent profile exactly.
    pub fn from_parts(
        salt: Salt,
        lower_bound: u64,
        upper_bound: u64,
        exponents: &[u8],
        cells: &[Cell],
    ) -> Result<Self> {
        let mut sketch = Self::new(salt, lower_bound, upper_bound, exponents)?;
        let expected = sketch.cell_count();
        if cells.len() != expected {
            return Err(SketchError::TruncatedWire {
                expected,
                got: cells.len(),
            });
        }
        let mut offset = 0;
        for table in &mut sketch.tables {
            let len = table.len();
            table.copy_from_slice(&cells[offset..offset + len]);
            offset += len;
        }
        Ok(sketch)
    }

    /// Whether a key passes the range filter.
    pub fn accepts(&self, key: Key) -> bool {
        (self.lower_bound..=self.upper_bound).contains(&key)
    }

    /// XOR a key into its destination cell in every table, ignoring the
    /// range filter. Self-inverse: applying it twice removes the key.
    pub fn xor_key(&mut self, key: Key) {
        let encoded = encode_key(key);
        for t in 0..self.tables.len() {
            let idx = self.destination(t, encoded);
            self.tables[t][idx].xor_key(key);
        }
    }

    /// XOR every in-range key from `keys` into the sketch. Returns how
    /// many keys passed the filter.
    pub fn xor_filtered(&mut self, keys: impl IntoIterator<Item = Key>) -> usize {
        let mut accepted = 0;
        for key in keys {
            if self.accepts(key) {
                self.xor_key(key);
                accepted += 1;
            }
        }
        accepted
    }

    /// Combine with another sketch by XOR-ing every cell pairwise.
    ///
    /// Only sketches built with identical parameters are combinable; the
    /// result is the sketch of the symmetric difference of the two sets.
    pub fn xor_all(&mut self, other: &Self) -> Result<()> {
        if self.salt != other.salt {
            return Err(SketchError::ParameterMismatch("salt"));
        }
        if self.lower_bound != other.lower_bound || self.upper_bound != other.upper_bound {
            return Err(SketchError::ParameterMismatch("key range"));
        }
        if self.exponents != other.exponents {
            return Err(SketchError::ParameterMismatch("table exponents"));
        }
        for (mine, theirs) in self.tables.iter_mut().zip(&other.tables) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                a.xor_cell(b);
            }
        }
        Ok(())
    }

    /// True when every cell in every table is empty.
    pub fn is_zero(&self) -> bool {
        self.tables.iter().flatten().all(Cell::is_empty)
    }

    /// Recover the keys of a (combined) difference sketch by peeling.
    ///
    /// Peeling passes run over the tables in order, extracting pure cells
    /// and removing each recovered key from every table, until a full pass
    /// extracts nothing new. Iteration is deterministic (indexed vectors
    /// in ascending order), so repeating the decode from the same state
    /// cannot change the outcome and no retry loop exists.
    ///
    /// Returns `None` when the sketch was too dense to fully unravel; the
    /// caller falls back to a full (non-sketch) exchange.
    pub fn decode(&self) -> Option<BTreeSet<Key>> {
        let mut work = self.clone();
        let mut recovered = BTreeSet::new();

        loop {
            let mut progress = false;
            for t in 0..work.tables.len() {
                // A fully saturated table rarely contains extractable pure
                // cells; scanning it wastes time.
                if !work.tables[t].iter().any(Cell::is_empty) {
                    continue;
                }
                let pure: Vec<Key> = work.tables[t]
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, cell)| work.pure_key(t, idx, cell))
                    .collect();
                for key in pure {
                    if recovered.insert(key) {
                        work.xor_key(key);
                        progress = true;
                    }
                }
            }
            if !progress {
                break;
            }
        }

        if work.is_zero() {
            Some(recovered)
        } else {
            None
        }
    }

    /// Pure-cell test: the cell's key sum must route back to the cell's
    /// own index *and* reproduce the cell's check sum.
    pub(crate) fn pure_key(&self, table: usize, idx: usize, cell: &Cell) -> Option<Key> {
        if cell.is_empty() {
            return None;
        }
        let key = cell.key_sum;
        if cell.check_sum != check_hash(key) {
            return None;
        }
        if self.destination(table, encode_key(key)) != idx {
            return None;
        }
        Some(key)
    }

    /// Destination cell index of an encoded key in table `t`: the top
    /// `prefixes[t]` bits, modulo the table length.
    fn destination(&self, t: usize, encoded: u64) -> usize {
        let prefix = self.prefixes[t];
        let top = if prefix == 0 {
            0
        } else {
            encoded >> (KEY_BITS - prefix)
        };
        (top % self.tables[t].len() as u64) as usize
    }
}

fn encode_key(key: Key) -> u64 {
    key.wrapping_mul(KEY_SCRAMBLE)
}
