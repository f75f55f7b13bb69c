//! Small numeric helpers for sequence and capacity arithmetic.

use crate::sequence::Sequence;
use std::sync::Arc;

/// Rounds `x` up to the next power of two, inclusive.
///
/// Values below 1 round up to 1. Saturates at the largest power of two that
/// fits in a `usize`.
pub fn ceiling_next_power_of_two(x: usize) -> usize {
    x.checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

/// Position of the highest set bit of `x`, i.e. `floor(log2(x))`.
///
/// Returns 0 for 0 and 1.
pub fn log2(x: usize) -> u32 {
    x.checked_ilog2().unwrap_or(0)
}

/// Minimum value across `sequences`, or `default` when there are none or
/// when every member is ahead of it.
pub fn minimum_sequence(sequences: &[Arc<Sequence>], default: i64) -> i64 {
    sequences
        .iter()
        .map(|s| s.get())
        .fold(default, i64::min)
}
