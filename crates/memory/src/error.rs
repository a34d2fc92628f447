//! Error types for keel-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.

use thiserror::Error;
use tracing::{error, warn};

use crate::core::Address;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory pool errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    // --- Lifecycle Errors ---
    #[error("Memory pool already initialized (capacity: {capacity} bytes)")]
    AlreadyInitialized { capacity: usize },

    #[error("Memory pool is not initialized")]
    NotInitialized,

    #[error("Invalid pool capacity: {capacity} bytes (minimum: {minimum})")]
    InvalidCapacity { capacity: usize, minimum: usize },

    #[error("Failed to reserve {capacity} bytes for the memory pool")]
    ReservationFailed { capacity: usize },

    #[error("Memory pool busy: {live} allocations outstanding")]
    BusyPool { live: usize },

    // --- Allocation Errors ---
    #[error("Invalid allocation size: {size}")]
    InvalidSize { size: usize },

    #[error(
        "Out of memory: requested {requested} bytes ({aligned} aligned), largest free block {largest_free}"
    )]
    OutOfMemory {
        requested: usize,
        aligned: usize,
        largest_free: usize,
    },

    // --- Reclamation Errors ---
    #[error("Double free of block at {address} ({size} bytes)")]
    DoubleFree { address: Address, size: usize },

    #[error("Address {address} does not belong to an allocated block of this pool")]
    InvalidPointer { address: Address },

    // --- System Errors ---
    #[error("Memory pool corruption detected: {details}")]
    Corruption { details: String },
}

impl PoolError {
    /// Check if error is retryable
    ///
    /// `OutOfMemory` and `BusyPool` qualify: either may succeed once other
    /// allocations are released.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::BusyPool { .. })
    }

    /// Check if error reports misuse of the pool API by the caller
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::InvalidSize { .. }
                | Self::DoubleFree { .. }
                | Self::InvalidPointer { .. }
        )
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized { .. } => "KEEL:POOL:ALREADY_INIT",
            Self::NotInitialized => "KEEL:POOL:NOT_INIT",
            Self::InvalidCapacity { .. } => "KEEL:POOL:CAPACITY",
            Self::ReservationFailed { .. } => "KEEL:POOL:RESERVE",
            Self::BusyPool { .. } => "KEEL:POOL:BUSY",
            Self::InvalidSize { .. } => "KEEL:ALLOC:SIZE",
            Self::OutOfMemory { .. } => "KEEL:ALLOC:OOM",
            Self::DoubleFree { .. } => "KEEL:FREE:DOUBLE",
            Self::InvalidPointer { .. } => "KEEL:FREE:POINTER",
            Self::Corruption { .. } => "KEEL:SYSTEM:CORRUPTION",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create invalid size error
    pub fn invalid_size(size: usize) -> Self {
        Self::InvalidSize { size }
    }

    /// Create invalid pointer error
    pub fn invalid_pointer(address: Address) -> Self {
        Self::InvalidPointer { address }
    }

    /// Create memory corruption error
    pub fn corruption(details: impl Into<String>) -> Self {
        let details = details.into();
        error!(%details, "memory pool corruption");

        Self::Corruption { details }
    }

    /// Create busy pool error
    pub fn busy(live: usize) -> Self {
        warn!(live, "memory pool busy");

        Self::BusyPool { live }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory pool operations
pub type PoolResult<T> = Result<T, PoolError>;

// ============================================================================
// Tests
// ============================================================================
