// Allow dead code for library-style API methods not yet used by the repair path
#![allow(dead_code)]

//! Trace-Repair Codec
//!
//! The CPU-bound heart of the engine: Reed-Solomon encoding over a Cauchy
//! generator matrix plus per-helper repair trace generation and trace-based
//! recovery of a single erased shard.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         Trace-Repair Codec                           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  ┌──────────────┐      ┌──────────────┐      ┌───────────────────┐   │
//! │  │  TrEncoder   │      │  TrDecoder   │      │  Static Tables    │   │
//! │  │ (RS + trace) │      │ (column /    │      │  (helper/recovery │   │
//! │  │              │      │  target)     │      │   /dual basis)    │   │
//! │  └──────┬───────┘      └──────┬───────┘      └─────────┬─────────┘   │
//! │         │                     │                        │             │
//! │         ▼                     ▼                        ▼             │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │            GF(2^8) Arithmetic & Encode Kernel (gf)             │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - **GF kernel** (`gf.rs`): field arithmetic, Cauchy matrix generation,
//!   nibble multiply tables and the byte-wise encode loop.
//!
//! - **Encoder** (`encoder.rs`): RS-encodes a stripe of `k` data units into
//!   `m` parity units, then emits per-helper repair traces targeted at an
//!   erased index. Each trace compresses a helper shard into
//!   `bandwidth(i, j)` bits per source byte.
//!
//! - **Decoder** (`decoder.rs`): combines helper traces through the recovery
//!   table into per-byte target traces and projects them through the dual
//!   basis to reconstruct the erased shard byte by byte.
//!
//! # Wire format
//!
//! A helper trace is `encode_length * bandwidth / 8` bytes. All `a = 0` bits
//! across the positions come first, then `a = 1`, and so on; within a byte
//! the earliest bit occupies bit 7. This layout is a compatibility surface
//! and must not change.

pub mod decoder;
pub mod encoder;
pub mod gf;

#[cfg(test)]
mod proptest;

pub use decoder::TrDecoder;
pub use encoder::{repair_trace, EncodeRequest, TrEncoder};

/// Per-node repair traces produced by one encode call: an `n`-slot vector
/// where slot `i` holds the trace helper `i` would ship toward the repair,
/// and the erased slot (plus any slots outside a requested narrowing) is
/// empty.
pub type TraceSet = Vec<Option<Vec<u8>>>;
