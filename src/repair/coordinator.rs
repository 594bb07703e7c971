//! Repair Coordinator
//!
//! Drives a single repair of one erased shard: opens readers against the
//! surviving helpers, issues concurrent trace reads through a completion
//! channel, reschedules around slow or failed sources, and feeds the
//! assembled helper buffers to the trace-repair decoder.
//!
//! The driver task is the only place that blocks: on the completion channel
//! (bounded by the configured striped-read timeout) and on the drain after
//! cancellation. Read tasks run on the tokio pool and report through the
//! channel; a read that outlives its wait still counts when it eventually
//! lands, while results from a previous iteration are dropped by generation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::buffer_pool::BufferPool;
use super::reader::{fetch_trace, ChecksumKind, HelperReader, TraceSource, TraceStream};
use crate::codec::TrDecoder;
use crate::config::{CodecOptions, RepairConfig};
use crate::error::{Error, Result};
use crate::metrics;

// =============================================================================
// Task Description & Result
// =============================================================================

/// One repair assignment handed to the coordinator by the placement layer.
pub struct RepairTask {
    /// Block group identity, carried on errors and metrics
    pub block_group: u64,

    /// Stripe position to reconstruct
    pub erased_index: usize,

    /// Surviving positions in the erased-excluded compact numbering,
    /// parallel to `sources`
    pub live_indices: Vec<usize>,

    /// Transport endpoint per surviving position
    pub sources: Vec<Arc<dyn TraceSource>>,

    /// On-disk block length per stripe position (n entries)
    pub block_lens: Vec<u64>,

    /// Number of replacement targets this task writes to
    pub target_count: usize,
}

/// Outcome of a completed repair.
#[derive(Debug)]
pub struct RepairResult {
    /// Block group identity
    pub block_group: u64,

    /// The reconstructed shard
    pub data: Vec<u8>,

    /// Stripe positions whose sources returned corrupt data
    pub corrupted_sources: Vec<usize>,

    /// Read statistics for this repair
    pub stats: RepairStatsSnapshot,
}

/// Cancellation handle for an in-flight repair.
#[derive(Clone)]
pub struct RepairHandle {
    cancelled: Arc<AtomicBool>,
}

impl RepairHandle {
    /// Signal the coordinator to abort. Outstanding reads are cancelled,
    /// the completion queue drained, and pooled buffers released.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Read-path counters for one repair.
#[derive(Debug, Default)]
pub struct RepairStats {
    /// Reads submitted to the completion service
    pub reads_issued: AtomicU64,

    /// Reads that returned data
    pub reads_succeeded: AtomicU64,

    /// Reads that failed
    pub reads_failed: AtomicU64,

    /// Completion waits that timed out
    pub reads_timed_out: AtomicU64,

    /// Replacement reads scheduled after a failure or timeout
    pub reads_rescheduled: AtomicU64,

    /// Trace bytes fetched from helpers
    pub bytes_fetched: AtomicU64,
}

impl RepairStats {
    /// Get a snapshot of the current counters.
    pub fn snapshot(&self) -> RepairStatsSnapshot {
        RepairStatsSnapshot {
            reads_issued: self.reads_issued.load(Ordering::Relaxed),
            reads_succeeded: self.reads_succeeded.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            reads_timed_out: self.reads_timed_out.load(Ordering::Relaxed),
            reads_rescheduled: self.reads_rescheduled.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of repair statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairStatsSnapshot {
    pub reads_issued: u64,
    pub reads_succeeded: u64,
    pub reads_failed: u64,
    pub reads_timed_out: u64,
    pub reads_rescheduled: u64,
    pub bytes_fetched: u64,
}

// =============================================================================
// Completion Messages
// =============================================================================

struct ReadOutcome {
    generation: u64,
    slot: usize,
    result: Result<Bytes>,
    stream: Option<Box<dyn TraceStream>>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Coordinates a single repair of one erased shard.
pub struct RepairCoordinator {
    config: RepairConfig,
    task: RepairTask,
    decoder: TrDecoder,
    pool: Arc<BufferPool>,

    readers: Vec<HelperReader>,
    success_list: Vec<usize>,
    futures: HashMap<usize, JoinHandle<()>>,
    completion_tx: mpsc::UnboundedSender<ReadOutcome>,
    completion_rx: mpsc::UnboundedReceiver<ReadOutcome>,
    generation: u64,

    position_in_block: u64,
    checksum_kind: Option<ChecksumKind>,
    zero_buffers: HashMap<usize, BytesMut>,
    corrupted: Vec<usize>,

    min_required: usize,
    cancelled: Arc<AtomicBool>,
    stats: Arc<RepairStats>,
}

impl RepairCoordinator {
    /// Create a coordinator for `task`.
    ///
    /// Fails with `InvalidArgument` on malformed codec parameters, a
    /// mismatched source list, or block lengths that are not multiples of 8.
    pub fn new(options: CodecOptions, config: RepairConfig, task: RepairTask) -> Result<Self> {
        let decoder = TrDecoder::new(options.clone())?;
        let n = options.all_units();
        let min_required = n - 1;

        if task.erased_index >= n {
            return Err(Error::InvalidArgument(format!(
                "erased index {} out of range (n = {})",
                task.erased_index, n
            )));
        }
        if task.live_indices.len() != task.sources.len() {
            return Err(Error::InvalidArgument(format!(
                "live indices ({}) and sources ({}) should match",
                task.live_indices.len(),
                task.sources.len()
            )));
        }
        if task.live_indices.len() < min_required {
            return Err(Error::InvalidArgument(format!(
                "not enough live striped blocks: {} < {}",
                task.live_indices.len(),
                min_required
            )));
        }
        if task.block_lens.len() != n {
            return Err(Error::InvalidArgument(format!(
                "expected {} block lengths, got {}",
                n,
                task.block_lens.len()
            )));
        }
        for (i, &len) in task.block_lens.iter().enumerate() {
            if len % 8 != 0 {
                return Err(Error::InvalidArgument(format!(
                    "block length {} at position {} must be a multiple of 8",
                    len, i
                )));
            }
        }
        let mut seen = vec![false; n - 1];
        for &live in &task.live_indices {
            if live >= n - 1 || seen[live] {
                return Err(Error::InvalidArgument(format!(
                    "live index {} invalid or duplicated",
                    live
                )));
            }
            seen[live] = true;
        }

        let pool = Arc::new(BufferPool::new(
            config.effective_buffer_size(),
            task.sources.len() + 1,
            2 * (task.sources.len() + 1),
        ));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            task,
            decoder,
            pool,
            readers: Vec::new(),
            success_list: Vec::new(),
            futures: HashMap::new(),
            completion_tx,
            completion_rx,
            generation: 0,
            position_in_block: 0,
            checksum_kind: None,
            zero_buffers: HashMap::new(),
            corrupted: Vec::new(),
            min_required,
            cancelled: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RepairStats::default()),
        })
    }

    /// Cancellation handle for this repair.
    pub fn handle(&self) -> RepairHandle {
        RepairHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Shared read statistics.
    pub fn stats(&self) -> Arc<RepairStats> {
        Arc::clone(&self.stats)
    }

    /// Shared buffer pool (exposed so callers can verify release).
    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.pool)
    }

    /// Transfer count of this reconstruction task, used by the scheduler to
    /// pace task placement.
    pub fn xmits(&self) -> usize {
        self.min_required.max(self.task.target_count)
    }

    /// Run the repair to completion.
    #[instrument(skip(self), fields(block_group = self.task.block_group, erased = self.task.erased_index))]
    pub async fn run(mut self) -> Result<RepairResult> {
        let timer = metrics::timer("reconstruction");
        timer.start(&format!("block {}", self.task.block_group));

        let outcome = self.reconstruct().await;
        self.close();

        timer.end(&format!("block {}", self.task.block_group));
        let data = outcome?;
        info!(
            block_group = self.task.block_group,
            bytes = data.len(),
            "repair complete"
        );
        Ok(RepairResult {
            block_group: self.task.block_group,
            data,
            corrupted_sources: std::mem::take(&mut self.corrupted),
            stats: self.stats.snapshot(),
        })
    }

    async fn reconstruct(&mut self) -> Result<Vec<u8>> {
        self.init().await?;

        let target_len = self.task.block_lens[self.task.erased_index] as usize;
        let mut output = vec![0u8; target_len];
        let span = self.config.effective_buffer_size();

        while (self.position_in_block as usize) < target_len {
            self.check_cancelled()?;
            let reconstruct_len = span.min(target_len - self.position_in_block as usize);

            self.read_minimum_sources(reconstruct_len).await?;

            self.pad_buffers(reconstruct_len)?;
            {
                let inputs = self.assemble_inputs();
                self.decoder.decode(
                    &inputs,
                    self.task.erased_index,
                    &mut output,
                    self.position_in_block as usize,
                    reconstruct_len,
                )?;
            }

            self.clear_buffers();
            self.position_in_block += reconstruct_len as u64;
        }
        Ok(output)
    }

    /// Open readers until the minimum required count succeeds, verifying
    /// checksum capability consistency along the way.
    async fn init(&mut self) -> Result<()> {
        let mut n_success = 0;
        for slot in 0..self.task.sources.len() {
            if n_success >= self.min_required {
                break;
            }
            self.check_cancelled()?;
            let stripe_index = self.stripe_index_of(slot);
            let reader = HelperReader::create(
                stripe_index,
                self.task.erased_index,
                Arc::clone(&self.task.sources[slot]),
                &self.pool,
            )
            .await;
            self.readers.push(reader);
            if self.readers[slot].is_open() {
                self.verify_checksum(slot)?;
                self.success_list.push(slot);
                n_success += 1;
            }
        }
        if n_success < self.min_required {
            return Err(Error::InsufficientSources {
                available: n_success,
                required: self.min_required,
                block_group: self.task.block_group,
            });
        }
        debug!(
            block_group = self.task.block_group,
            readers = self.readers.len(),
            "readers initialised"
        );
        Ok(())
    }

    /// Read from the minimum number of sources required for this iteration.
    ///
    /// Starts from the previous success list; a source that fails or times
    /// out is replaced through `schedule_new_read`, and the updated success
    /// list is kept for the next iteration.
    async fn read_minimum_sources(&mut self, reconstruct_len: usize) -> Result<()> {
        self.generation += 1;
        let mut new_success = Vec::with_capacity(self.min_required);
        let mut used = vec![false; self.task.sources.len()];

        let traffic = metrics::timer("inbound_traffic");
        for idx in 0..self.min_required {
            let slot = self.success_list[idx];
            let to_read = self.read_length(slot, reconstruct_len);
            traffic.mark(&format!(
                "block {} source {} length {}",
                self.task.block_group,
                self.readers[slot].source_id(),
                self.readers[slot].trace_len(to_read)
            ));
            if to_read > 0 {
                self.submit_read(slot, to_read)?;
            } else {
                self.readers[slot].buffer.clear();
                new_success.push(slot);
            }
            used[slot] = true;
        }

        while !self.futures.is_empty() {
            if self.cancelled.load(Ordering::Acquire) {
                self.cancel_reads();
                self.drain_completions();
                return Err(Error::Cancelled);
            }

            let result_slot = match timeout(
                self.config.striped_read_timeout,
                self.completion_rx.recv(),
            )
            .await
            {
                Ok(Some(outcome)) if outcome.generation != self.generation => {
                    // Late result from a previous iteration: its stream was
                    // positioned for stale offsets, so it is dropped rather
                    // than restored.
                    debug!(slot = outcome.slot, "dropping stale read outcome");
                    None
                }
                Ok(Some(outcome)) => {
                    self.futures.remove(&outcome.slot);
                    match outcome.result {
                        Ok(bytes) => {
                            self.stats.reads_succeeded.fetch_add(1, Ordering::Relaxed);
                            self.stats
                                .bytes_fetched
                                .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                            let reader = &mut self.readers[outcome.slot];
                            if let Some(stream) = outcome.stream {
                                reader.restore_stream(stream);
                            }
                            reader.buffer.extend_from_slice(&bytes);
                            Some(outcome.slot)
                        }
                        Err(error) => {
                            self.stats.reads_failed.fetch_add(1, Ordering::Relaxed);
                            let stripe = self.readers[outcome.slot].stripe_index;
                            if matches!(error, Error::CorruptInput(_)) {
                                self.corrupted.push(stripe);
                            }
                            warn!(
                                slot = outcome.slot,
                                stripe,
                                %error,
                                "source read failed, rescheduling"
                            );
                            self.readers[outcome.slot].close();
                            self.schedule_new_read(&mut used, reconstruct_len).await?
                        }
                    }
                }
                Ok(None) => None,
                Err(_) => {
                    self.stats.reads_timed_out.fetch_add(1, Ordering::Relaxed);
                    debug!(block_group = self.task.block_group, "read wait timed out");
                    self.schedule_new_read(&mut used, reconstruct_len).await?
                }
            };

            if let Some(slot) = result_slot {
                new_success.push(slot);
                if new_success.len() >= self.min_required {
                    self.cancel_reads();
                    self.drain_completions();
                    break;
                }
            }
        }

        if new_success.len() < self.min_required {
            return Err(Error::InsufficientSources {
                available: new_success.len(),
                required: self.min_required,
                block_group: self.task.block_group,
            });
        }
        metrics::timer("completed_striped_read")
            .mark(&format!("block {} end read", self.task.block_group));
        self.success_list = new_success;
        Ok(())
    }

    /// Schedule a read from some replacement source after a failure or
    /// timeout.
    ///
    /// Step 1 tries a source never read from; step 2 revisits a known
    /// source unused in this round, reopening it at the current position;
    /// step 3 submits the read. Returns the slot when the replacement is
    /// trivially done (nothing left to read), `None` when a new read is in
    /// flight or no replacement exists.
    async fn schedule_new_read(
        &mut self,
        used: &mut [bool],
        reconstruct_len: usize,
    ) -> Result<Option<usize>> {
        let mut chosen: Option<(usize, usize)> = None;

        // Step 1: a source we never created a reader for.
        while self.readers.len() < self.task.sources.len() {
            let slot = self.readers.len();
            let stripe_index = self.stripe_index_of(slot);
            let reader = HelperReader::create(
                stripe_index,
                self.task.erased_index,
                Arc::clone(&self.task.sources[slot]),
                &self.pool,
            )
            .await;
            self.readers.push(reader);
            let to_read = self.read_length(slot, reconstruct_len);
            if to_read == 0 {
                used[slot] = true;
                self.readers[slot].buffer.clear();
                return Ok(Some(slot));
            }
            if self.readers[slot].is_open() {
                self.verify_checksum(slot)?;
                chosen = Some((slot, to_read));
                break;
            }
        }

        // Step 2: revisit a source seen before but unused in this round.
        if chosen.is_none() {
            for slot in 0..self.readers.len() {
                if used[slot] || self.futures.contains_key(&slot) {
                    continue;
                }
                let to_read = self.read_length(slot, reconstruct_len);
                if to_read == 0 {
                    used[slot] = true;
                    self.readers[slot].buffer.clear();
                    return Ok(Some(slot));
                }
                self.readers[slot].reopen().await;
                if self.readers[slot].is_open() {
                    self.readers[slot].buffer.clear();
                    chosen = Some((slot, to_read));
                    break;
                }
            }
        }

        // Step 3: submit if a replacement was found.
        if let Some((slot, to_read)) = chosen {
            self.stats.reads_rescheduled.fetch_add(1, Ordering::Relaxed);
            self.submit_read(slot, to_read)?;
            used[slot] = true;
        }
        Ok(None)
    }

    /// Submit an asynchronous trace read for `slot`.
    fn submit_read(&mut self, slot: usize, to_read_block: usize) -> Result<()> {
        let reader = &mut self.readers[slot];
        let trace_len = reader.trace_len(to_read_block);
        let Some(mut stream) = reader.take_stream() else {
            return Err(Error::SourceRead {
                source_index: slot,
                reason: "reader is closed".into(),
            });
        };
        self.stats.reads_issued.fetch_add(1, Ordering::Relaxed);
        let tx = self.completion_tx.clone();
        let generation = self.generation;
        let position = self.position_in_block;
        let handle = tokio::spawn(async move {
            let result =
                fetch_trace(stream.as_mut(), slot, position, to_read_block, trace_len).await;
            let _ = tx.send(ReadOutcome {
                generation,
                slot,
                result,
                stream: Some(stream),
            });
        });
        self.futures.insert(slot, handle);
        Ok(())
    }

    /// Pad every successful buffer with zeros up to the reconstruct length
    /// and materialise zero buffers for positions nothing was read for.
    fn pad_buffers(&mut self, reconstruct_len: usize) -> Result<()> {
        let mut filled = vec![false; self.decoder.all_units()];
        filled[self.task.erased_index] = true;
        for idx in 0..self.min_required {
            let slot = self.success_list[idx];
            let reader = &mut self.readers[slot];
            let want = reader.trace_len(reconstruct_len);
            if reader.buffer.len() > want {
                return Err(Error::CorruptInput(format!(
                    "source {} returned {} trace bytes, expected at most {}",
                    reader.source_id(),
                    reader.buffer.len(),
                    want
                )));
            }
            reader.buffer.resize(want, 0);
            filled[reader.stripe_index] = true;
        }
        // Stripe positions with no reader hold zero-length blocks; they
        // contribute pre-allocated zero buffers.
        for stripe in 0..self.decoder.all_units() {
            if filled[stripe] {
                continue;
            }
            let bw = crate::tables::bandwidth(stripe, self.task.erased_index) as usize;
            let want = reconstruct_len * bw / 8;
            let pool = &self.pool;
            let buf = self
                .zero_buffers
                .entry(stripe)
                .or_insert_with(|| pool.get());
            buf.resize(want, 0);
        }
        Ok(())
    }

    /// Place every buffer at its stripe position for the decoder.
    fn assemble_inputs(&self) -> Vec<Option<&[u8]>> {
        let n = self.decoder.all_units();
        let mut inputs: Vec<Option<&[u8]>> = vec![None; n];
        for idx in 0..self.min_required {
            let reader = &self.readers[self.success_list[idx]];
            inputs[reader.stripe_index] = Some(reader.buffer.as_ref());
        }
        for (&stripe, buf) in &self.zero_buffers {
            if inputs[stripe].is_none() {
                inputs[stripe] = Some(buf.as_ref());
            }
        }
        inputs
    }

    /// Remaining block bytes to read for `slot` this iteration.
    fn read_length(&self, slot: usize, reconstruct_len: usize) -> usize {
        let stripe = self.readers[slot].stripe_index;
        let block_len = self.task.block_lens[stripe];
        let remaining = block_len.saturating_sub(self.position_in_block);
        remaining.min(reconstruct_len as u64) as usize
    }

    /// Stripe position served by source `slot`.
    ///
    /// Live indices arrive in the erased-excluded compact numbering, so the
    /// erased position is re-inserted here.
    fn stripe_index_of(&self, slot: usize) -> usize {
        let live = self.task.live_indices[slot];
        if live < self.task.erased_index {
            live
        } else {
            live + 1
        }
    }

    /// All sources of one block group must advertise the same checksum
    /// capability.
    fn verify_checksum(&mut self, slot: usize) -> Result<()> {
        let kind = self.readers[slot].checksum_kind();
        match self.checksum_kind {
            None => {
                self.checksum_kind = Some(kind);
                Ok(())
            }
            Some(expected) if expected == kind => Ok(()),
            Some(expected) => Err(Error::CorruptInput(format!(
                "checksum capability mismatch in block group {}: {:?} vs {:?}",
                self.task.block_group, expected, kind
            ))),
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Acquire) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Abort all outstanding read futures.
    fn cancel_reads(&mut self) {
        for (_, handle) in self.futures.drain() {
            handle.abort();
        }
    }

    /// Discard already-delivered completion messages.
    fn drain_completions(&mut self) {
        while self.completion_rx.try_recv().is_ok() {}
    }

    /// Reset per-iteration buffer state.
    fn clear_buffers(&mut self) {
        for reader in &mut self.readers {
            reader.buffer.clear();
        }
        for buf in self.zero_buffers.values_mut() {
            buf.clear();
        }
    }

    /// Release every owned resource back to the pool.
    fn close(&mut self) {
        if !self.corrupted.is_empty() {
            warn!(
                block_group = self.task.block_group,
                sources = ?self.corrupted,
                "corrupt sources observed during repair"
            );
        }
        self.cancel_reads();
        self.drain_completions();
        for reader in &mut self.readers {
            reader.close();
            reader.free_buffer(&self.pool);
        }
        self.readers.clear();
        for (_, buf) in self.zero_buffers.drain() {
            self.pool.put(buf);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
