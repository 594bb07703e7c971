//! Repair Orchestration
//!
//! Everything that happens on the replacement node during a repair: reader
//! management over the surviving helpers, the concurrent read protocol with
//! timeout/failover, buffer pooling, and the hand-off into the decoder.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        RepairCoordinator                             │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  RepairTask ──► init readers ──► read minimum sources ──► decode     │
//! │                      │                  │        ▲           │       │
//! │                      ▼                  ▼        │           ▼       │
//! │               ┌─────────────┐    completion   schedule   recovered   │
//! │               │HelperReader │◄──  channel  ──►new read     shard     │
//! │               │ (n-1 of n)  │    (timeout)   (failover)              │
//! │               └──────┬──────┘                                        │
//! │                      │                                               │
//! │                      ▼                                               │
//! │               ┌─────────────┐                                        │
//! │               │ TraceSource │  (transport seam, async trait)         │
//! │               └─────────────┘                                        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The coordinator owns its readers and their pooled buffers; readers refer
//! back to shared pool state rather than to the coordinator itself. A
//! [`RepairHandle`] cancels from outside: outstanding reads are aborted, the
//! completion queue drained, and all pooled buffers returned.

pub mod buffer_pool;
pub mod coordinator;
pub mod mock;
pub mod reader;

pub use buffer_pool::BufferPool;
pub use coordinator::{
    RepairCoordinator, RepairHandle, RepairResult, RepairStats, RepairStatsSnapshot, RepairTask,
};
pub use reader::{ChecksumKind, TraceSource, TraceStream};
