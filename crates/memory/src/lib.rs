//! # keel-memory
//!
//! Fixed-capacity, thread-safe memory pool.
//!
//! The pool reserves one contiguous buffer up front and carves allocations
//! out of it:
//! - First-fit placement over an address-ordered free list
//! - Block splitting when the leftover is worth a header
//! - Coalescing of physically adjacent free blocks on release
//! - Double-free and foreign-address detection with structured diagnostics
//!
//! ## Quick Start
//!
//! ```rust
//! use keel_memory::prelude::*;
//!
//! let pool = MemoryPool::new();
//! pool.initialize(64 * 1024)?;
//!
//! let handle = pool.allocate(128, "LegacyHandle")?;
//! assert!(handle.is_aligned_to(ALIGNMENT));
//!
//! pool.deallocate(handle, "LegacyHandle")?;
//! pool.shutdown();
//! # Ok::<(), PoolError>(())
//! ```
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` for [`pool::PoolStats`],
//!   [`pool::BlockInfo`] and diagnostic records
//!
//! ## Architecture
//!
//! - Errors via the [`error`] module
//! - Structured logging via `tracing` (debug per operation, info for
//!   lifecycle, warn for failures)
//! - Diagnostics via a pluggable [`pool::DiagnosticSink`]

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Precision loss in usize/u64 -> f64 casts is acceptable for stats/metrics
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
// inline(always) on small alignment helpers is intentional for hot paths
#![allow(clippy::inline_always)]
#![allow(clippy::double_must_use)]
#![allow(clippy::return_self_not_must_use)]

// Error types
pub mod error;

// Core modules
pub mod core;
pub mod pool;
pub mod utils;

pub use crate::core::Address;
pub use crate::error::{PoolError, PoolResult};

// Public API exports
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::core::Address;
    pub use crate::core::alignment::ALIGNMENT;
    pub use crate::error::{PoolError, PoolResult};
    pub use crate::pool::{
        BlockInfo, DiagnosticKind, DiagnosticRecord, DiagnosticSink, HEADER_SIZE, MemoryPool,
        PoolConfig, PoolStats, ScopedAllocation, TracingSink,
    };
}
