//! Trace-Repair Decoder
//!
//! Reconstructs one erased shard from the bit-packed traces of the n - 1
//! surviving helpers. Per source byte, each helper's trace bits are combined
//! through the recovery table into a length-t column trace; column traces
//! XOR across helpers into target traces, which project through the dual
//! basis into the recovered byte.

use tracing::instrument;

use super::gf;
use crate::config::CodecOptions;
use crate::error::{Error, Result};
use crate::tables::{self, SUB_SYMBOLS};

/// Trace-repair decoder. Immutable after construction.
pub struct TrDecoder {
    options: CodecOptions,
}

impl TrDecoder {
    /// Create a decoder for the given codec options.
    pub fn new(options: CodecOptions) -> Result<Self> {
        options.validate()?;
        if options.all_units() != tables::TABLE_UNITS
            || options.data_units != tables::TABLE_DATA_UNITS
        {
            return Err(Error::InvalidArgument(format!(
                "trace-repair tables cover (n = {}, k = {}), got (n = {}, k = {})",
                tables::TABLE_UNITS,
                tables::TABLE_DATA_UNITS,
                options.all_units(),
                options.data_units
            )));
        }
        tables::validate_bundle()?;
        Ok(Self { options })
    }

    /// Total number of units (n).
    #[inline]
    pub fn all_units(&self) -> usize {
        self.options.all_units()
    }

    /// Recover the erased shard from helper traces.
    ///
    /// `inputs` is an n-slot array with the erased slot empty; every other
    /// slot must hold that helper's trace of exactly
    /// `decode_length * bandwidth(i, erased_index) / 8` bytes. The recovered
    /// `decode_length` bytes are written to `output` at `output_offset`.
    #[instrument(skip(self, inputs, output), fields(erased = erased_index, len = decode_length))]
    pub fn decode(
        &self,
        inputs: &[Option<&[u8]>],
        erased_index: usize,
        output: &mut [u8],
        output_offset: usize,
        decode_length: usize,
    ) -> Result<()> {
        let n = self.all_units();
        if erased_index >= n {
            return Err(Error::InvalidArgument(format!(
                "erased index {} out of range (n = {})",
                erased_index, n
            )));
        }
        if inputs.len() != n {
            return Err(Error::InvalidArgument(format!(
                "expected {} input slots, got {}",
                n,
                inputs.len()
            )));
        }
        if inputs[erased_index].is_some() {
            return Err(Error::InvalidArgument(format!(
                "erased slot {} must be empty",
                erased_index
            )));
        }
        let helper_count = inputs.iter().filter(|slot| slot.is_some()).count();
        if helper_count != n - 1 {
            return Err(Error::InvalidArgument(format!(
                "expected {} helper buffers, got {}",
                n - 1,
                helper_count
            )));
        }
        if decode_length == 0 || decode_length % 8 != 0 {
            return Err(Error::InvalidArgument(format!(
                "decode length {} must be a positive multiple of 8",
                decode_length
            )));
        }
        if output_offset + decode_length > output.len() {
            return Err(Error::InvalidArgument(format!(
                "output too short: offset {} + len {} > {}",
                output_offset,
                decode_length,
                output.len()
            )));
        }

        // Bit s of targets[p] accumulates target trace s for position p.
        // Column traces commute under XOR, so helpers fold in directly in
        // ascending index order without changing the result.
        let mut targets = vec![0u8; decode_length];
        for i in 0..n {
            if i == erased_index {
                continue;
            }
            let buffer = inputs[i].ok_or_else(|| {
                Error::InvalidArgument(format!("missing helper buffer at slot {}", i))
            })?;
            self.fold_column_traces(i, erased_index, buffer, decode_length, &mut targets)?;
        }

        let basis = tables::dual_basis(erased_index);
        let out = &mut output[output_offset..output_offset + decode_length];
        for (p, slot) in out.iter_mut().enumerate() {
            let mut value = 0u8;
            for (s, &basis_byte) in basis.iter().enumerate() {
                if targets[p] >> s & 1 == 1 {
                    value ^= basis_byte;
                }
            }
            *slot = value;
        }
        Ok(())
    }

    /// Unpack helper `i`'s trace and XOR its column traces into `targets`.
    ///
    /// The trace stream is a-major: bit `a * decode_length + p` carries the
    /// projection of position `p` under mask `a`, MSB-first per byte. The
    /// recovery integers are big-endian over the bandwidth, so packing this
    /// position's trace bits with bit `bw - 1 - a` = trace bit `a` turns
    /// each combination into a masked parity.
    fn fold_column_traces(
        &self,
        helper: usize,
        erased_index: usize,
        buffer: &[u8],
        decode_length: usize,
        targets: &mut [u8],
    ) -> Result<()> {
        let row = tables::recovery_row(helper, erased_index);
        let bw = row[0] as usize;
        if bw == 0 || bw > SUB_SYMBOLS {
            return Err(Error::CorruptInput(format!(
                "recovery bandwidth {} out of range for helper {} erased {}",
                bw, helper, erased_index
            )));
        }
        if bw != tables::bandwidth(helper, erased_index) as usize {
            return Err(Error::CorruptInput(format!(
                "table bundle divergence for helper {} erased {}",
                helper, erased_index
            )));
        }
        let expected = decode_length * bw / 8;
        if buffer.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "helper {} buffer length {} does not match {} (L = {}, bw = {})",
                helper,
                buffer.len(),
                expected,
                decode_length,
                bw
            )));
        }

        for (p, target) in targets.iter_mut().enumerate() {
            let mut packed = 0u8;
            for a in 0..bw {
                let idx = a * decode_length + p;
                let bit = buffer[idx >> 3] >> (7 - (idx & 7)) & 1;
                packed |= bit << (bw - 1 - a);
            }
            for s in 0..SUB_SYMBOLS {
                *target ^= (gf::parity8(row[1 + s] & packed)) << s;
            }
        }
        Ok(())
    }
}

/// Expand the big-endian `bw`-bit binary representation of `m` into a mask
/// where position `a` holds bit `bw - 1 - a` of `m`.
#[cfg(test)]
fn binary_rep(bw: usize, m: u8) -> Vec<bool> {
    (0..bw).map(|a| m >> (bw - 1 - a) & 1 == 1).collect()
}

// =============================================================================
// Tests
// =============================================================================
