//! Fixed-capacity memory pool
//!
//! One contiguous buffer, carved into header-prefixed blocks:
//! - [`MemoryPool`]: the thread-safe entry point
//! - [`ScopedAllocation`]: RAII guard over one allocation
//! - [`PoolConfig`]: fill patterns and integrity checking
//! - [`PoolStats`] and [`BlockInfo`]: introspection snapshots
//! - [`DiagnosticSink`]: receiver of out-of-memory and misuse records

mod allocator;
mod arena;
pub mod block;
mod config;
pub mod diagnostics;
mod free_list;
mod scoped;
mod stats;

pub use allocator::MemoryPool;
pub use block::{BlockInfo, HEADER_SIZE, MIN_CAPACITY};
pub use config::PoolConfig;
pub use diagnostics::{
    DiagnosticKind, DiagnosticRecord, DiagnosticSink, MemorySink, NoopSink, TracingSink,
};
pub use scoped::ScopedAllocation;
pub use stats::PoolStats;
