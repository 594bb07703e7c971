//! Static Trace-Repair Tables
//!
//! Process-wide read-only constants for the (n = 9, k = 6) profile: the
//! helper projection table, the recovery combination table, the dual-basis
//! table and the bandwidth table. The tables are precomputed offline and
//! checked against each other at codec construction; the accessors below
//! return borrowed views into the constants.
//!
//! Table semantics:
//!
//! - `helper_row(i, j)`: trace bandwidth `bw` followed by `bw` GF(2^8)
//!   projection masks. Helper `i` turns source byte `x` into trace bit `a`
//!   via `parity8(mask[a] & x)`.
//! - `recovery_row(i, j)`: the same `bw` followed by `t = 8` combination
//!   integers; the big-endian `bw`-bit expansion of integer `s` selects which
//!   of helper `i`'s trace bits XOR into target trace `s`.
//! - `dual_basis(j)`: 8 bytes projecting the target traces back into the
//!   recovered byte of stripe position `j`.
//!
//! All of them are undefined for `i == j`.

mod generated;

use generated::{
    BANDWIDTH_TABLE_9_6, DUAL_BASIS_TABLE_9_6, HELPER_TABLE_9_6, RECOVERY_TABLE_9_6,
};

use crate::error::{Error, Result};

/// Number of sub-symbols per source byte (symbol size in bits).
pub const SUB_SYMBOLS: usize = 8;

/// Total stripe width the tables cover.
pub const TABLE_UNITS: usize = 9;

/// Data units the tables cover.
pub const TABLE_DATA_UNITS: usize = 6;

/// Trace bandwidth in bits per source byte for helper `i` repairing `j`.
#[inline]
pub fn bandwidth(i: usize, j: usize) -> u8 {
    debug_assert!(i != j, "bandwidth undefined for i == j");
    BANDWIDTH_TABLE_9_6[i][j]
}

/// Helper projection row for helper `i` repairing `j`: `[bw, masks..]`.
#[inline]
pub fn helper_row(i: usize, j: usize) -> &'static [u8; 9] {
    debug_assert!(i != j, "helper row undefined for i == j");
    &HELPER_TABLE_9_6[i][j]
}

/// Recovery combination row for helper `i` repairing `j`: `[bw, r_1..r_8]`.
#[inline]
pub fn recovery_row(i: usize, j: usize) -> &'static [u8; 9] {
    debug_assert!(i != j, "recovery row undefined for i == j");
    &RECOVERY_TABLE_9_6[i][j]
}

/// Dual-basis bytes for erased index `j`.
#[inline]
pub fn dual_basis(j: usize) -> &'static [u8; 8] {
    &DUAL_BASIS_TABLE_9_6[j]
}

/// Cross-check the four tables for internal consistency.
///
/// The helper and recovery tables carry the bandwidth redundantly; any
/// divergence between them (or with the standalone bandwidth table) means
/// the table bundle is corrupt and every repair built on it would produce
/// garbage, so this fails with [`Error::CorruptInput`].
pub fn validate_bundle() -> Result<()> {
    for j in 0..TABLE_UNITS {
        let basis = dual_basis(j);
        if basis.iter().all(|&b| b == 0) {
            return Err(Error::CorruptInput(format!(
                "dual basis for erased index {} is degenerate",
                j
            )));
        }
        for i in 0..TABLE_UNITS {
            if i == j {
                continue;
            }
            let bw = bandwidth(i, j);
            let helper = helper_row(i, j);
            let recovery = recovery_row(i, j);
            if !(1..=SUB_SYMBOLS as u8).contains(&bw) {
                return Err(Error::CorruptInput(format!(
                    "bandwidth {} out of range for helper {} erased {}",
                    bw, i, j
                )));
            }
            if helper[0] != bw || recovery[0] != bw {
                return Err(Error::CorruptInput(format!(
                    "bandwidth mismatch for helper {} erased {}: \
                     bandwidth table {}, helper row {}, recovery row {}",
                    i, j, bw, helper[0], recovery[0]
                )));
            }
            // Combination integers must fit in bw bits.
            let limit = 1u16 << bw;
            for s in 1..=SUB_SYMBOLS {
                if recovery[s] as u16 >= limit {
                    return Err(Error::CorruptInput(format!(
                        "recovery integer {} exceeds {} bits for helper {} erased {}",
                        recovery[s], bw, i, j
                    )));
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
