//! Error types for the trace-repair engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the trace-repair engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed codec parameters, offsets, buffer sizes or indices
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation path intentionally not provided
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// A single helper read failed or timed out; recovered by rescheduling
    #[error("Source read failed on slot {source_index}: {reason}")]
    SourceRead { source_index: usize, reason: String },

    /// Fewer helpers than required produced data after all rescheduling
    #[error(
        "Insufficient sources for reconstruction of block group {block_group}: \
         have {available}, need {required}"
    )]
    InsufficientSources {
        available: usize,
        required: usize,
        block_group: u64,
    },

    /// Buffer contents incompatible with the declared trace bandwidth,
    /// or the static table bundle is internally inconsistent
    #[error("Corrupt input: {0}")]
    CorruptInput(String),

    /// Repair aborted externally; buffers released
    #[error("Repair cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the failure is local to one helper and the repair may continue
    /// by rescheduling onto another source.
    pub fn is_source_local(&self) -> bool {
        matches!(self, Error::SourceRead { .. })
    }
}
