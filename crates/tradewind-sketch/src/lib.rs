//! # Tradewind Sketch
//!
//! XOR set-reconciliation for 64-bit key sets.
//!
//! Two peers each hold a set of keys (derived from their replicated-store
//! contents). Each builds a [`KeySetDelta`] with identical parameters,
//! one side XOR-combines the two, and the combined sketch decodes to the
//! symmetric difference of the sets - in space proportional to the
//! *expected size of the difference*, not the size of either set.
//!
//! ## How it works
//!
//! A sketch is an ordered list of tables of XOR accumulator cells. The
//! table-size exponents sum to exactly 64, so the cumulative sums
//! partition the key space into nested resolutions. Inserting a key XORs
//! it into one cell of every table; inserting it twice cancels. Keys
//! present in both sets therefore vanish under combination, and the
//! survivors are recovered by iteratively peeling "pure" cells (cells
//! holding exactly one key).
//!
//! ## Sizing
//!
//! Sketch size is fixed once parameters are chosen, so
//! [`estimate_unfiltered_delta_size`] estimates the true cardinality from
//! an unfiltered probe sketch, and [`KeySetDelta::for_capacity`] picks the
//! smallest capacity tier that covers it - or range-filters the key space
//! down proportionally when even the largest tier cannot.

pub mod delta;
pub mod error;
pub mod estimate;
pub mod wire;

pub use delta::{Cell, KeySetDelta, KEY_BITS, MAX_TABLE_EXPONENT};
pub use error::{Result, SketchError};
pub use estimate::{
    estimate_unfiltered_delta_size, maximum_likelihood_density_estimate, CapacityTier,
    CAPACITY_TIERS,
};
pub use wire::{decode_sketch, encode_sketch};
