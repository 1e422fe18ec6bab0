//! Buffer pool replacement strategy for Oxbow.
//!
//! This crate decides which frame of the shared buffer pool to evict when a
//! page fault needs a fresh frame:
//! - Free-list management for never-used and explicitly freed frames
//! - Four victim-selection policies: clock sweep, LRU, MRU, and 2Q
//! - Per-scan ring strategies that confine bulk scans to a few frames
//! - Background-writer wakeup signaling and sync-start bookkeeping

mod frame;
mod latch;
mod ring;
mod strategy;
mod table;

pub use frame::{FrameDesc, FrameGuard, FrameId, FrameMeta, MAX_USAGE_COUNT};
pub use latch::Latch;
pub use ring::{AccessKind, ScanRing};
pub use strategy::{BufferStrategy, StrategyStats, SyncPoint, Victim};
pub use table::{BufTable, BUFFER_PARTITIONS};
