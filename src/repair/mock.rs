//! In-Memory Trace Sources
//!
//! Mock [`TraceSource`] implementations that behave like a helper node: each
//! one holds a shard cell and serves per-range repair traces computed with
//! the helper projection table, with injectable open failures, read
//! failures, corruption and slowness. Used by the coordinator tests and
//! benchmark harnesses; no production path depends on this module.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::reader::{ChecksumKind, TraceSource, TraceStream};
use crate::codec::repair_trace;
use crate::error::{Error, Result};

struct MockState {
    shard: Vec<u8>,
    stripe_index: usize,
    erased_index: usize,
    fail_opens: AtomicUsize,
    fail_reads: AtomicUsize,
    corrupt_reads: AtomicUsize,
    slow_reads: AtomicUsize,
    read_delay_ms: AtomicU64,
    opens: AtomicUsize,
    reads: AtomicUsize,
}

/// Decrement `counter` if positive; true when a charge was consumed.
fn consume(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
        .is_ok()
}

/// A helper node in memory: serves traces of `shard` toward the repair of
/// `erased_index`, with configurable fault injection.
pub struct MockTraceSource {
    id: String,
    checksum: ChecksumKind,
    state: Arc<MockState>,
}

impl MockTraceSource {
    /// A healthy source holding `shard` at `stripe_index`, serving repairs
    /// of `erased_index`.
    pub fn new(
        id: impl Into<String>,
        shard: Vec<u8>,
        stripe_index: usize,
        erased_index: usize,
    ) -> Self {
        Self {
            id: id.into(),
            checksum: ChecksumKind::Crc32c,
            state: Arc::new(MockState {
                shard,
                stripe_index,
                erased_index,
                fail_opens: AtomicUsize::new(0),
                fail_reads: AtomicUsize::new(0),
                corrupt_reads: AtomicUsize::new(0),
                slow_reads: AtomicUsize::new(0),
                read_delay_ms: AtomicU64::new(0),
                opens: AtomicUsize::new(0),
                reads: AtomicUsize::new(0),
            }),
        }
    }

    /// Advertise a specific checksum capability.
    pub fn with_checksum(mut self, checksum: ChecksumKind) -> Self {
        self.checksum = checksum;
        self
    }

    /// Fail the next `n` `open` calls.
    pub fn fail_opens(self, n: usize) -> Self {
        self.state.fail_opens.store(n, Ordering::Release);
        self
    }

    /// Fail the next `n` trace reads.
    pub fn fail_reads(self, n: usize) -> Self {
        self.state.fail_reads.store(n, Ordering::Release);
        self
    }

    /// Report corruption on the next `n` trace reads.
    pub fn corrupt_reads(self, n: usize) -> Self {
        self.state.corrupt_reads.store(n, Ordering::Release);
        self
    }

    /// Delay the next `n` trace reads by `delay`.
    pub fn slow_reads(self, n: usize, delay: Duration) -> Self {
        self.state.slow_reads.store(n, Ordering::Release);
        self.state
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::Release);
        self
    }

    /// Number of `open` calls observed.
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::Acquire)
    }

    /// Number of trace reads observed.
    pub fn read_count(&self) -> usize {
        self.state.reads.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TraceSource for MockTraceSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn checksum_kind(&self) -> ChecksumKind {
        self.checksum
    }

    async fn open(&self) -> Result<Box<dyn TraceStream>> {
        self.state.opens.fetch_add(1, Ordering::AcqRel);
        if consume(&self.state.fail_opens) {
            return Err(Error::SourceRead {
                source_index: self.state.stripe_index,
                reason: format!("{}: injected open failure", self.id),
            });
        }
        Ok(Box::new(MockStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockStream {
    state: Arc<MockState>,
}

#[async_trait]
impl TraceStream for MockStream {
    async fn read_trace(&mut self, position: u64, block_bytes: usize) -> Result<Bytes> {
        self.state.reads.fetch_add(1, Ordering::AcqRel);
        if consume(&self.state.slow_reads) {
            let delay = self.state.read_delay_ms.load(Ordering::Acquire);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if consume(&self.state.fail_reads) {
            return Err(Error::SourceRead {
                source_index: self.state.stripe_index,
                reason: "injected read failure".into(),
            });
        }
        if consume(&self.state.corrupt_reads) {
            return Err(Error::CorruptInput("injected checksum mismatch".into()));
        }

        let start = position as usize;
        let end = start + block_bytes;
        if end > self.state.shard.len() {
            return Err(Error::InvalidArgument(format!(
                "trace range {}..{} beyond shard of {} bytes",
                start,
                end,
                self.state.shard.len()
            )));
        }
        let trace = repair_trace(
            self.state.stripe_index,
            self.state.erased_index,
            &self.state.shard[start..end],
        );
        Ok(Bytes::from(trace))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::bandwidth;

    fn shard(len: usize) -> Vec<u8> {
        (0..len).map(|p| (p as u8).wrapping_mul(29)).collect()
    }

    #[tokio::test]
    async fn test_mock_serves_range_traces() {
        let source = MockTraceSource::new("s1", shard(32), 1, 0);
        let mut stream = source.open().await.unwrap();

        let bw = bandwidth(1, 0) as usize;
        let trace = stream.read_trace(8, 16).await.unwrap();
        assert_eq!(trace.len(), 16 * bw / 8);

        // A range trace equals the projection of exactly that range.
        let expected = repair_trace(1, 0, &shard(32)[8..24]);
        assert_eq!(&trace[..], expected.as_slice());
    }

    #[tokio::test]
    async fn test_mock_rejects_out_of_range_reads() {
        let source = MockTraceSource::new("s2", shard(16), 2, 0);
        let mut stream = source.open().await.unwrap();
        assert!(stream.read_trace(8, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_fault_injection_counters() {
        let source = MockTraceSource::new("s3", shard(8), 3, 0)
            .fail_opens(1)
            .fail_reads(1)
            .corrupt_reads(1);

        assert!(source.open().await.is_err());
        let mut stream = source.open().await.unwrap();
        assert!(matches!(
            stream.read_trace(0, 8).await,
            Err(Error::SourceRead { .. })
        ));
        assert!(matches!(
            stream.read_trace(0, 8).await,
            Err(Error::CorruptInput(_))
        ));
        // Charges consumed; subsequent reads succeed.
        assert!(stream.read_trace(0, 8).await.is_ok());
        assert_eq!(source.open_count(), 2);
        assert_eq!(source.read_count(), 3);
    }
}
