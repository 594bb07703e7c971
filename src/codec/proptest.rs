//! Property-Based Tests for the Trace-Repair Codec
//!
//! Uses proptest to verify encoder/decoder correctness across random
//! stripes, lengths and erased indices.
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: decode(encode(S, j)) recovers S[j]
//! 2. **Length Contract**: every trace is exactly L * bw / 8 bytes
//! 3. **Determinism**: same stripe always produces the same traces
//! 4. **Narrowing Consistency**: a requested-node encode matches the
//!    corresponding slot of a full encode

#![cfg(test)]

use proptest::prelude::*;

use super::decoder::TrDecoder;
use super::encoder::{EncodeRequest, TrEncoder};
use crate::config::CodecOptions;
use crate::tables::bandwidth;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for stripe cell lengths: positive multiples of 8.
fn cell_len_strategy() -> impl Strategy<Value = usize> {
    (1usize..=16).prop_map(|chunks| chunks * 8)
}

/// Strategy for a full stripe of 6 data units of the given length.
fn stripe_strategy(len: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), len..=len), 6)
}

fn encode_all(
    encoder: &TrEncoder,
    data: &[Vec<u8>],
    erased: usize,
    requested: Option<usize>,
) -> (Vec<Vec<u8>>, Vec<Option<Vec<u8>>>) {
    let len = data[0].len();
    let inputs: Vec<&[u8]> = data.iter().map(|d| d.as_slice()).collect();
    let mut parity = vec![vec![0u8; len]; 3];
    let traces = {
        let mut outputs: Vec<&mut [u8]> =
            parity.iter_mut().map(|p| p.as_mut_slice()).collect();
        let mut request = EncodeRequest {
            inputs: &inputs,
            input_offsets: &[0; 6],
            outputs: &mut outputs,
            output_offsets: &[0; 3],
            encode_length: len,
            erased_index: erased,
            requested_node_index: requested,
        };
        encoder.encode(&mut request).unwrap()
    };
    (parity, traces)
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: for every erased index, decoding the n - 1 traces yields
    /// exactly the erased shard.
    #[test]
    fn prop_roundtrip_recovers_erased_shard(
        len in cell_len_strategy(),
        erased in 0usize..9,
        data in stripe_strategy(128),
    ) {
        let data: Vec<Vec<u8>> = data.into_iter().map(|mut d| {
            d.truncate(len);
            d
        }).collect();

        let encoder = TrEncoder::new(CodecOptions::tr_default())?;
        let decoder = TrDecoder::new(CodecOptions::tr_default())?;

        let (parity, traces) = encode_all(&encoder, &data, erased, None);
        let inputs: Vec<Option<&[u8]>> = traces.iter().map(|t| t.as_deref()).collect();
        let mut output = vec![0u8; len];
        decoder.decode(&inputs, erased, &mut output, 0, len)?;

        let expected: &[u8] = if erased < 6 {
            &data[erased]
        } else {
            &parity[erased - 6]
        };
        prop_assert_eq!(output.as_slice(), expected,
            "roundtrip failed for erased={}, len={}", erased, len);
    }

    /// Property: trace lengths satisfy |trace| * 8 == L * bw(i, j).
    #[test]
    fn prop_trace_length_contract(
        len in cell_len_strategy(),
        erased in 0usize..9,
    ) {
        let data: Vec<Vec<u8>> = (0..6).map(|d| vec![d as u8; len]).collect();
        let encoder = TrEncoder::new(CodecOptions::tr_default())?;
        let (_, traces) = encode_all(&encoder, &data, erased, None);
        for (i, trace) in traces.iter().enumerate() {
            if i == erased {
                prop_assert!(trace.is_none());
                continue;
            }
            let trace = trace.as_ref().unwrap();
            prop_assert_eq!(trace.len() * 8, len * bandwidth(i, erased) as usize);
        }
    }

    /// Property: encoding is deterministic.
    #[test]
    fn prop_encoding_deterministic(
        erased in 0usize..9,
        data in stripe_strategy(16),
    ) {
        let encoder = TrEncoder::new(CodecOptions::tr_default())?;
        let (parity1, traces1) = encode_all(&encoder, &data, erased, None);
        let (parity2, traces2) = encode_all(&encoder, &data, erased, None);
        prop_assert_eq!(parity1, parity2);
        prop_assert_eq!(traces1, traces2);
    }

    /// Property: narrowing to one requested node reproduces the same trace
    /// a full encode would have placed in that slot.
    #[test]
    fn prop_requested_node_consistent(
        erased in 0usize..9,
        node in 0usize..9,
        data in stripe_strategy(8),
    ) {
        prop_assume!(node != erased);
        let encoder = TrEncoder::new(CodecOptions::tr_default())?;
        let (_, full) = encode_all(&encoder, &data, erased, None);
        let (_, narrowed) = encode_all(&encoder, &data, erased, Some(node));
        prop_assert_eq!(narrowed.iter().filter(|t| t.is_some()).count(), 1);
        prop_assert_eq!(&narrowed[node], &full[node]);
    }
}
