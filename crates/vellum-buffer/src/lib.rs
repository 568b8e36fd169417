//! Buffer pool management for VellumDB.
//!
//! This crate provides page caching over page-granular file I/O:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock eviction policy with dirty write-back
//! - Pin counting enforced through RAII page guards
//! - Disk manager with page allocation and a free list

mod disk;
mod frame;
mod page_table;
mod pool;
mod replacer;

pub use disk::DiskManager;
pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PageGuard};
pub use replacer::{ClockReplacer, Replacer};
