//! Helper Readers and the Transport Seam
//!
//! [`TraceSource`] is the coordinator's view of a remote helper endpoint:
//! it advertises its checksum capability and opens positional streams over
//! the helper's trace bytes. [`HelperReader`] wraps one source with the
//! per-repair state the coordinator tracks for it: the stripe/helper role
//! it plays, its pooled read buffer, and the currently open stream, if any.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::debug;

use super::buffer_pool::BufferPool;
use crate::error::{Error, Result};
use crate::tables;

/// Checksum capability advertised by a source endpoint.
///
/// All sources participating in one repair must agree; a mismatch means the
/// block group was written inconsistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// No per-chunk checksums
    Null,
    /// CRC-32
    Crc32,
    /// CRC-32C (Castagnoli)
    Crc32c,
}

/// An open read session against one helper.
///
/// Each call fetches the repair trace computed over one block range; the
/// returned buffer is a self-contained trace unit in the wire layout
/// (`block_bytes * bw / 8` bytes, projection-major, MSB-first). The
/// coordinator requests ranges in ascending position order.
#[async_trait]
pub trait TraceStream: Send {
    /// Fetch the trace of `block_bytes` source bytes starting at
    /// `position`. Both are multiples of 8.
    async fn read_trace(&mut self, position: u64, block_bytes: usize) -> Result<Bytes>;
}

/// A remote helper endpoint able to serve repair trace bytes.
#[async_trait]
pub trait TraceSource: Send + Sync {
    /// Stable identifier for logging.
    fn id(&self) -> &str;

    /// Checksum capability of the underlying block.
    fn checksum_kind(&self) -> ChecksumKind;

    /// Open a read session.
    async fn open(&self) -> Result<Box<dyn TraceStream>>;
}

/// Per-repair state for one candidate source.
pub struct HelperReader {
    /// Stripe position of the shard this source holds
    pub(super) stripe_index: usize,

    /// Trace bandwidth in bits per block byte for this helper
    pub(super) bandwidth: usize,

    /// The transport endpoint
    source: Arc<dyn TraceSource>,

    /// Open stream, absent when the reader is closed
    stream: Option<Box<dyn TraceStream>>,

    /// Accumulated trace bytes for the current iteration
    pub(super) buffer: BytesMut,
}

impl HelperReader {
    /// Create a reader for `source` and open its read session.
    ///
    /// An open failure leaves the reader closed rather than failing the
    /// repair; the coordinator skips closed readers and may reopen them
    /// later.
    pub(super) async fn create(
        stripe_index: usize,
        erased_index: usize,
        source: Arc<dyn TraceSource>,
        pool: &BufferPool,
    ) -> Self {
        let bandwidth = tables::bandwidth(stripe_index, erased_index) as usize;
        let stream = match source.open().await {
            Ok(stream) => Some(stream),
            Err(error) => {
                debug!(source = source.id(), %error, "source open failed");
                None
            }
        };
        Self {
            stripe_index,
            bandwidth,
            source,
            stream,
            buffer: pool.get(),
        }
    }

    /// Whether the reader currently has an open stream.
    #[inline]
    pub(super) fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Identifier of the underlying source.
    pub(super) fn source_id(&self) -> &str {
        self.source.id()
    }

    /// Checksum capability of the underlying source.
    pub(super) fn checksum_kind(&self) -> ChecksumKind {
        self.source.checksum_kind()
    }

    /// Take the stream out for an in-flight read.
    pub(super) fn take_stream(&mut self) -> Option<Box<dyn TraceStream>> {
        self.stream.take()
    }

    /// Restore the stream after a completed read.
    pub(super) fn restore_stream(&mut self, stream: Box<dyn TraceStream>) {
        self.stream = Some(stream);
    }

    /// Close the reader. A subsequent [`reopen`](Self::reopen) starts a
    /// fresh session.
    pub(super) fn close(&mut self) {
        self.stream = None;
    }

    /// Close and reopen the read session; the next read resumes at the
    /// current block position.
    pub(super) async fn reopen(&mut self) {
        self.close();
        match self.source.open().await {
            Ok(stream) => self.stream = Some(stream),
            Err(error) => {
                debug!(source = self.source.id(), %error, "source reopen failed");
            }
        }
    }

    /// Trace bytes corresponding to `block_bytes` of this helper's shard.
    #[inline]
    pub(super) fn trace_len(&self, block_bytes: usize) -> usize {
        block_bytes * self.bandwidth / 8
    }

    /// Release the read buffer back to the pool.
    pub(super) fn free_buffer(&mut self, pool: &BufferPool) {
        let buffer = std::mem::take(&mut self.buffer);
        pool.put(buffer);
    }
}

/// Fetch one range trace and enforce its length contract.
///
/// Corruption reported by the source is surfaced as-is so the coordinator
/// can record the source; every other failure is a local read failure the
/// caller recovers from by rescheduling. A buffer whose length disagrees
/// with the declared bandwidth is itself corruption.
pub(super) async fn fetch_trace(
    stream: &mut dyn TraceStream,
    slot: usize,
    position: u64,
    block_bytes: usize,
    expected_len: usize,
) -> Result<Bytes> {
    let bytes = match stream.read_trace(position, block_bytes).await {
        Ok(bytes) => bytes,
        Err(error @ Error::CorruptInput(_)) => return Err(error),
        Err(error) => {
            return Err(Error::SourceRead {
                source_index: slot,
                reason: error.to_string(),
            })
        }
    };
    if bytes.len() != expected_len {
        return Err(Error::CorruptInput(format!(
            "slot {} returned {} trace bytes for {} block bytes, expected {}",
            slot,
            bytes.len(),
            block_bytes,
            expected_len
        )));
    }
    Ok(bytes)
}

// =============================================================================
// Tests
// =============================================================================
