//! Trace-Repair Encoder
//!
//! RS-encodes a stripe over the Cauchy generator matrix, then produces the
//! bit-packed repair trace each surviving node would transmit toward the
//! repair of a declared erased index.

use tracing::{debug, instrument};

use super::gf;
use super::TraceSet;
use crate::config::CodecOptions;
use crate::error::{Error, Result};
use crate::tables;

/// One encode call's inputs.
///
/// `inputs` are the `k` data shards, `outputs` the caller-supplied parity
/// regions; both carry per-buffer offsets. `encode_length` bytes are
/// consumed from and produced into each buffer at its offset.
pub struct EncodeRequest<'req, 'buf> {
    /// The k data shards
    pub inputs: &'req [&'buf [u8]],

    /// Read offset per data shard
    pub input_offsets: &'req [usize],

    /// The m caller-supplied parity regions
    pub outputs: &'req mut [&'buf mut [u8]],

    /// Write offset per parity region
    pub output_offsets: &'req [usize],

    /// Cell length L; must be a positive multiple of 8
    pub encode_length: usize,

    /// Stripe position being repaired
    pub erased_index: usize,

    /// Narrow trace output to a single helper node; `None` emits one trace
    /// per non-erased node
    pub requested_node_index: Option<usize>,
}

/// Trace-repair encoder.
///
/// Immutable after construction; the generator matrix and multiply tables
/// are shared freely across threads.
pub struct TrEncoder {
    options: CodecOptions,

    /// Cauchy generator matrix, `n x k` row-major
    encode_matrix: Vec<u8>,

    /// Nibble product tables for the parity rows
    gf_tables: Vec<u8>,
}

impl TrEncoder {
    /// Create an encoder for the given codec options.
    ///
    /// Fails with `InvalidArgument` when `k + m >= 256` or the options do
    /// not match the static table profile.
    pub fn new(options: CodecOptions) -> Result<Self> {
        options.validate()?;
        validate_table_profile(&options)?;
        tables::validate_bundle()?;

        let n = options.all_units();
        let k = options.data_units;
        let encode_matrix = gf::gen_cauchy_matrix(n, k)?;
        let gf_tables = gf::init_tables(k, options.parity_units, &encode_matrix);

        if options.allow_verbose_dump {
            debug!(
                matrix = %hex_dump(&encode_matrix),
                tables = %hex_dump(&gf_tables),
                "trace-repair encode matrix"
            );
        }

        Ok(Self {
            options,
            encode_matrix,
            gf_tables,
        })
    }

    /// Number of data units (k).
    #[inline]
    pub fn data_units(&self) -> usize {
        self.options.data_units
    }

    /// Number of parity units (m).
    #[inline]
    pub fn parity_units(&self) -> usize {
        self.options.parity_units
    }

    /// Total number of units (n).
    #[inline]
    pub fn all_units(&self) -> usize {
        self.options.all_units()
    }

    /// The generator matrix (for diagnostics).
    pub fn encode_matrix(&self) -> &[u8] {
        &self.encode_matrix
    }

    /// RS-encode parity only, without trace generation.
    pub fn encode_parity(
        &self,
        encode_length: usize,
        inputs: &[&[u8]],
        input_offsets: &[usize],
        outputs: &mut [&mut [u8]],
        output_offsets: &[usize],
    ) -> Result<()> {
        self.validate_shape(encode_length, inputs.len(), outputs.len())?;
        gf::encode_data(
            &self.gf_tables,
            encode_length,
            inputs,
            input_offsets,
            outputs,
            output_offsets,
        )
    }

    /// Encode a stripe and emit repair traces for the declared erased index.
    ///
    /// Parity is produced into the caller's output regions first; the
    /// returned [`TraceSet`] holds one trace per non-erased node (or only
    /// the requested node's when `requested_node_index` narrows the output).
    /// Traces are computed identically either way; the coordinator decides
    /// what is actually transmitted.
    #[instrument(skip(self, request), fields(erased = request.erased_index, len = request.encode_length))]
    pub fn encode(&self, request: &mut EncodeRequest<'_, '_>) -> Result<TraceSet> {
        let n = self.all_units();
        self.validate_shape(
            request.encode_length,
            request.inputs.len(),
            request.outputs.len(),
        )?;
        if request.erased_index >= n {
            return Err(Error::InvalidArgument(format!(
                "erased index {} out of range (n = {})",
                request.erased_index, n
            )));
        }
        if let Some(node) = request.requested_node_index {
            if node >= n || node == request.erased_index {
                return Err(Error::InvalidArgument(format!(
                    "requested node index {} invalid for erased index {}",
                    node, request.erased_index
                )));
            }
        }

        gf::encode_data(
            &self.gf_tables,
            request.encode_length,
            request.inputs,
            request.input_offsets,
            request.outputs,
            request.output_offsets,
        )?;

        let sources = self.combine_sources(request);

        let mut traces: TraceSet = vec![None; n];
        match request.requested_node_index {
            Some(node) => {
                traces[node] = Some(repair_trace(node, request.erased_index, &sources[node]));
            }
            None => {
                for node in 0..n {
                    if node == request.erased_index {
                        continue;
                    }
                    traces[node] = Some(repair_trace(node, request.erased_index, &sources[node]));
                }
            }
        }
        Ok(traces)
    }

    /// Union the data and parity sources into a length-n array of cells.
    fn combine_sources(&self, request: &EncodeRequest<'_, '_>) -> Vec<Vec<u8>> {
        let len = request.encode_length;
        let mut sources = Vec::with_capacity(self.all_units());
        for (d, input) in request.inputs.iter().enumerate() {
            let off = request.input_offsets[d];
            sources.push(input[off..off + len].to_vec());
        }
        for (p, output) in request.outputs.iter().enumerate() {
            let off = request.output_offsets[p];
            sources.push(output[off..off + len].to_vec());
        }
        sources
    }

    fn validate_shape(
        &self,
        encode_length: usize,
        input_count: usize,
        output_count: usize,
    ) -> Result<()> {
        if encode_length == 0 || encode_length % 8 != 0 {
            return Err(Error::InvalidArgument(format!(
                "encode length {} must be a positive multiple of 8",
                encode_length
            )));
        }
        if input_count != self.data_units() {
            return Err(Error::InvalidArgument(format!(
                "expected {} data inputs, got {}",
                self.data_units(),
                input_count
            )));
        }
        if output_count != self.parity_units() {
            return Err(Error::InvalidArgument(format!(
                "expected {} parity outputs, got {}",
                self.parity_units(),
                output_count
            )));
        }
        Ok(())
    }
}

/// Compute the bit-packed repair trace node `i` ships toward the repair of
/// `erased_index`, over any contiguous run of its source bytes.
///
/// This is also the projection a helper node applies when serving a trace
/// read for a block range. Bit order within the unit: all `a = 0` bits
/// across the positions first, then `a = 1`, up to `a = bw - 1`; the
/// earliest bit of each byte is bit 7.
pub fn repair_trace(node: usize, erased_index: usize, source: &[u8]) -> Vec<u8> {
    debug_assert_ne!(node, erased_index);
    debug_assert_eq!(source.len() % 8, 0);
    let len = source.len();
    let row = tables::helper_row(node, erased_index);
    let bw = row[0] as usize;

    let mut trace = vec![0u8; bw * len / 8];
    let mut idx = 0usize;
    for a in 0..bw {
        let mask = row[1 + a];
        for &byte in source {
            if gf::parity8(mask & byte) != 0 {
                trace[idx >> 3] |= 1 << (7 - (idx & 7));
            }
            idx += 1;
        }
    }
    trace
}

/// Reject options the static tables do not cover.
fn validate_table_profile(options: &CodecOptions) -> Result<()> {
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
    Ok(())
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
