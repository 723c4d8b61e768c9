//! Bit-exact wire format for sketches.
//!
//! Layout: `salt (16 bytes) | lower_bound (u64 BE) | upper_bound (u64 BE)
//! | exponent count (u8) | exponents (u8 each) | cells`, where each cell
//! is `key_sum (u64 BE) | check_sum (u64 BE)` and cells are concatenated
//! in table order. An empty or default-valued message decodes to `None`
//! ("no sketch yet"); per-table boundaries are reconstructed purely from
//! the exponent list.

use bytes::{Buf, BufMut};
use tradewind_core::Salt;

use crate::delta::{Cell, KeySetDelta};
use crate::error::{Result, SketchError};

const HEADER_LEN: usize = 16 + 8 + 8 + 1;
const CELL_LEN: usize = 16;

/// Serialize a sketch to its wire form.
pub fn encode_sketch(sketch: &KeySetDelta) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + sketch.exponents().len() + CELL_LEN * sketch.cell_count());
    buf.put_slice(sketch.salt().as_bytes());
    buf.put_u64(sketch.lower_bound());
    buf.put_u64(sketch.upper_bound());
    buf.put_u8(sketch.exponents().len() as u8);
    buf.put_slice(sketch.exponents());
    for table in sketch.tables() {
        for cell in table {
            buf.put_u64(cell.key_sum);
            buf.put_u64(cell.check_sum);
        }
    }
    buf
}

/// Deserialize a sketch from its wire form.
///
/// Returns `Ok(None)` for an empty or default-valued message. Rejects
/// exponents outside `[0, 32)`, profiles not summing to 64, and any
/// length mismatch between the declared profile and the cell data.
pub fn decode_sketch(data: &[u8]) -> Result<Option<KeySetDelta>> {
    if data.is_empty() {
        return Ok(None);
    }
    if data.len() < HEADER_LEN {
        return Err(SketchError::TruncatedWire {
            expected: HEADER_LEN,
            got: data.len(),
        });
    }
    let mut buf = data;
    let mut salt_bytes = [0u8; 16];
    buf.copy_to_slice(&mut salt_bytes);
    let salt = Salt::from_bytes(salt_bytes);
    let lower_bound = buf.get_u64();
    let upper_bound = buf.get_u64();
    let count = buf.get_u8() as usize;

    // A default-valued message signals "I don't have a sketch yet".
    if salt == Salt::ZERO && lower_bound == 0 && upper_bound == 0 && count == 0 && buf.is_empty() {
        return Ok(None);
    }

    if buf.remaining() < count {
        return Err(SketchError::TruncatedWire {
            expected: HEADER_LEN + count,
            got: data.len(),
        });
    }
    let mut exponents = vec![0u8; count];
    buf.copy_to_slice(&mut exponents);

    let num_cells: usize = exponents
        .iter()
        .map(|&e| {
            if e < 32 {
                Ok(1usize << e)
            } else {
                Err(SketchError::ExponentOutOfRange(e))
            }
        })
        .sum::<Result<usize>>()?;

    let expected = num_cells * CELL_LEN;
    if buf.remaining() < expected {
        return Err(SketchError::TruncatedWire {
            expected: HEADER_LEN + count + expected,
            got: data.len(),
        });
    }
    let mut cells = Vec::with_capacity(num_cells);
    for _ in 0..num_cells {
        cells.push(Cell {
            key_sum: buf.get_u64(),
            check_sum: buf.get_u64(),
        });
    }
    if buf.has_remaining() {
        return Err(SketchError::TrailingBytes);
    }

    KeySetDelta::from_parts(salt, lower_bound, upper_bound, &exponents, &cells).map(Some)
}
