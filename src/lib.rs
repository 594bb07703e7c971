//! Tracestor - Trace-Repair Erasure Coding Engine
//!
//! An erasure-coding engine for distributed block storage that repairs a
//! single lost shard from compressed "trace" sketches instead of whole
//! shards. A stripe is Reed-Solomon encoded over a Cauchy matrix into 6 data
//! and 3 parity shards; when one shard is lost, each of the 8 survivors
//! ships only `bandwidth(i, j)` bits per source byte (typically 3-6 instead
//! of 8), and the decoder reassembles the lost shard from those traces via a
//! dual-basis projection over GF(2).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Tracestor                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │  TrEncoder   │    │ Repair       │    │  TrDecoder   │       │
//! │  │  (RS + trace │    │ Coordinator  │───▶│  (trace →    │       │
//! │  │   emission)  │    │ (fetch/retry)│    │   shard)     │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │          │                  │                   │               │
//! │          ▼                  ▼                   ▼               │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │   GF(2^8) kernel  ·  static tables  ·  buffer pool      │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`codec`] - GF(2^8) kernel, trace-repair encoder and decoder
//! - [`config`] - codec options and coordinator configuration
//! - [`error`] - error types
//! - [`metrics`] - append-only metric timer log
//! - [`repair`] - repair coordinator, helper readers, buffer pool
//! - [`tables`] - static helper/recovery/dual-basis/bandwidth tables
//!
//! # Example
//!
//! ```rust,ignore
//! use tracestor::{CodecOptions, RepairConfig, RepairCoordinator, RepairTask};
//!
//! let task = RepairTask {
//!     block_group: 4711,
//!     erased_index: 2,
//!     live_indices: (0..8).collect(),
//!     sources,                      // one TraceSource per survivor
//!     block_lens: vec![cell_len; 9],
//!     target_count: 1,
//! };
//! let coordinator =
//!     RepairCoordinator::new(CodecOptions::tr_default(), RepairConfig::default(), task)?;
//! let result = coordinator.run().await?;
//! assert_eq!(result.data.len(), cell_len as usize);
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod repair;
pub mod tables;

// The GF kernel is used across module boundaries; keep a crate-level alias
// so siblings don't reach through `codec`.
pub(crate) use codec::gf;

// Re-export commonly used types
pub use codec::{repair_trace, EncodeRequest, TrDecoder, TrEncoder, TraceSet};
pub use config::{CodecOptions, RepairConfig};
pub use error::{Error, Result};
pub use repair::{
    ChecksumKind, RepairCoordinator, RepairHandle, RepairResult, RepairTask, TraceSource,
    TraceStream,
};
