//! Thread-safe fixed-capacity memory pool
//!
//! [`MemoryPool`] serializes every operation through one
//! [`parking_lot::Mutex`] around the optional [`Arena`]. Allocation is
//! first-fit over the address-ordered free list with splitting; reclamation
//! marks the block free and coalesces it with free physical neighbours.
//!
//! # Examples
//!
//! ```
//! use keel_memory::pool::MemoryPool;
//!
//! let pool = MemoryPool::new();
//! pool.initialize(4096)?;
//!
//! let address = pool.allocate(100, "Event")?;
//! pool.with_payload_mut(address, |bytes| bytes.fill(0x2A))?;
//! assert_eq!(pool.with_payload(address, |bytes| bytes[99])?, 0x2A);
//!
//! pool.deallocate(address, "Event")?;
//! pool.try_shutdown()?;
//! # Ok::<(), keel_memory::PoolError>(())
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::Address;
use crate::error::{PoolError, PoolResult};

use super::arena::Arena;
use super::block::BlockInfo;
use super::config::PoolConfig;
use super::diagnostics::{DiagnosticKind, DiagnosticRecord, DiagnosticSink, TracingSink};
use super::scoped::ScopedAllocation;
use super::stats::PoolStats;

/// Fixed-capacity memory pool shared between threads
///
/// The pool starts uninitialized; [`initialize`](Self::initialize) reserves
/// the buffer. Share it by reference or through an [`Arc`].
pub struct MemoryPool {
    arena: Mutex<Option<Arena>>,
    config: PoolConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl MemoryPool {
    /// Creates an uninitialized pool with the default configuration and the
    /// [`TracingSink`].
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Creates an uninitialized pool reporting diagnostics to `sink`.
    pub fn with_sink(config: PoolConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            arena: Mutex::new(None),
            config,
            sink,
        }
    }

    /// Creates and initializes a pool in one step.
    pub fn with_capacity(capacity: usize) -> PoolResult<Self> {
        let pool = Self::new();
        pool.initialize(capacity)?;
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Reserves `capacity` bytes and lays them out as one free block.
    ///
    /// The capacity is rounded down to [`ALIGNMENT`]. Calling this on an
    /// initialized pool fails with [`PoolError::AlreadyInitialized`] and
    /// leaves the existing pool untouched.
    ///
    /// [`ALIGNMENT`]: crate::core::alignment::ALIGNMENT
    pub fn initialize(&self, capacity: usize) -> PoolResult<()> {
        let mut slot = self.arena.lock();
        if let Some(arena) = slot.as_ref() {
            warn!(
                capacity = arena.capacity(),
                requested = capacity,
                "memory pool already initialized"
            );
            return Err(PoolError::AlreadyInitialized {
                capacity: arena.capacity(),
            });
        }

        let arena = Arena::new(capacity, &self.config).inspect_err(|err| {
            warn!(capacity, error = %err, "memory pool initialization failed");
        })?;
        info!(
            capacity = arena.capacity(),
            base = %arena.base_address(),
            "memory pool initialized"
        );
        *slot = Some(arena);
        Ok(())
    }

    /// Releases the buffer. Idempotent; outstanding allocations are logged
    /// and dropped.
    pub fn shutdown(&self) {
        let Some(arena) = self.arena.lock().take() else {
            return;
        };
        if arena.live() > 0 {
            warn!(
                live = arena.live(),
                "shutting down memory pool with outstanding allocations"
            );
        }
        info!(capacity = arena.capacity(), "memory pool shut down");
    }

    /// Releases the buffer only if no allocation is outstanding.
    pub fn try_shutdown(&self) -> PoolResult<()> {
        let mut slot = self.arena.lock();
        match slot.as_ref().map(Arena::live) {
            Some(live) if live > 0 => Err(PoolError::busy(live)),
            Some(_) => {
                if let Some(arena) = slot.take() {
                    info!(capacity = arena.capacity(), "memory pool shut down");
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates `size` bytes and returns the payload address.
    ///
    /// The address is a multiple of [`ALIGNMENT`]. `tag` labels the block
    /// for diagnostics and never influences placement.
    ///
    /// [`ALIGNMENT`]: crate::core::alignment::ALIGNMENT
    pub fn allocate(&self, size: usize, tag: &str) -> PoolResult<Address> {
        let mut slot = self.arena.lock();
        let arena = slot.as_mut().ok_or(PoolError::NotInitialized)?;

        match arena.allocate(size, tag) {
            Ok(grant) => {
                debug!(
                    size,
                    block_size = grant.size,
                    offset = grant.offset,
                    address = %grant.address,
                    tag,
                    "allocate"
                );
                self.verify(arena, "allocate");
                Ok(grant.address)
            }
            Err(err) => {
                let record = matches!(err, PoolError::OutOfMemory { .. }).then(|| {
                    DiagnosticRecord::new(
                        DiagnosticKind::OutOfMemory,
                        size,
                        tag,
                        arena.utilization(),
                        None,
                    )
                });
                drop(slot);
                if let Some(record) = record {
                    self.sink.on_record(&record);
                }
                Err(err)
            }
        }
    }

    /// Allocates `size` bytes released automatically when the guard drops.
    pub fn allocate_scoped(&self, size: usize, tag: &str) -> PoolResult<ScopedAllocation<'_>> {
        let address = self.allocate(size, tag)?;
        Ok(ScopedAllocation::new(self, address, tag))
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    /// Returns the block behind `address` to the pool.
    ///
    /// Freeing a block twice yields [`PoolError::DoubleFree`] and changes
    /// nothing. Addresses that obviously did not come from this pool yield
    /// [`PoolError::InvalidPointer`]; this check is best-effort.
    pub fn deallocate(&self, address: Address, tag: &str) -> PoolResult<()> {
        let mut slot = self.arena.lock();
        let arena = slot.as_mut().ok_or(PoolError::NotInitialized)?;

        match arena.deallocate(address) {
            Ok(release) => {
                debug!(
                    address = %address,
                    size = release.released,
                    merged_prev = release.merged_prev,
                    merged_next = release.merged_next,
                    free_block = release.size,
                    tag,
                    "deallocate"
                );
                self.verify(arena, "deallocate");
                Ok(())
            }
            Err(err) => {
                let record = match &err {
                    PoolError::DoubleFree { size, .. } => Some((DiagnosticKind::DoubleFree, *size)),
                    PoolError::InvalidPointer { .. } => Some((DiagnosticKind::InvalidPointer, 0)),
                    _ => None,
                }
                .map(|(kind, size)| {
                    DiagnosticRecord::new(kind, size, tag, arena.utilization(), Some(address))
                });
                drop(slot);
                if let Some(record) = record {
                    self.sink.on_record(&record);
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Payload access
    // ------------------------------------------------------------------

    /// Runs `f` on the requested bytes of the allocation at `address`.
    ///
    /// The pool lock is held while `f` runs; `f` must not call back into
    /// this pool.
    pub fn with_payload<R>(&self, address: Address, f: impl FnOnce(&[u8]) -> R) -> PoolResult<R> {
        let slot = self.arena.lock();
        let arena = slot.as_ref().ok_or(PoolError::NotInitialized)?;
        Ok(f(arena.payload(address)?))
    }

    /// Mutable counterpart of [`with_payload`](Self::with_payload).
    pub fn with_payload_mut<R>(
        &self,
        address: Address,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> PoolResult<R> {
        let mut slot = self.arena.lock();
        let arena = slot.as_mut().ok_or(PoolError::NotInitialized)?;
        Ok(f(arena.payload_mut(address)?))
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.arena.lock().is_some()
    }

    /// Usable capacity in bytes, after rounding.
    pub fn capacity(&self) -> Option<usize> {
        self.arena.lock().as_ref().map(Arena::capacity)
    }

    pub fn base_address(&self) -> Option<Address> {
        self.arena.lock().as_ref().map(Arena::base_address)
    }

    /// Snapshot of the pool statistics, `None` when uninitialized.
    pub fn stats(&self) -> Option<PoolStats> {
        self.arena.lock().as_ref().map(Arena::stats)
    }

    /// All blocks in address order.
    pub fn blocks(&self) -> PoolResult<Vec<BlockInfo>> {
        self.arena
            .lock()
            .as_ref()
            .ok_or(PoolError::NotInitialized)?
            .blocks()
    }

    /// Walks the pool and checks its structural invariants.
    pub fn validate(&self) -> PoolResult<()> {
        self.arena
            .lock()
            .as_ref()
            .ok_or(PoolError::NotInitialized)?
            .validate()
    }

    fn verify(&self, arena: &Arena, operation: &'static str) {
        if !self.config.verify_integrity {
            return;
        }
        if let Err(err) = arena.validate() {
            error!(operation, error = %err, "memory pool integrity check failed");
        }
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryPool");
        match self.arena.try_lock() {
            Some(slot) => match slot.as_ref() {
                Some(arena) => debug
                    .field("capacity", &arena.capacity())
                    .field("live", &arena.live()),
                None => debug.field("initialized", &false),
            },
            None => debug.field("state", &"<locked>"),
        };
        debug.field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::pool::diagnostics::MemorySink;

    fn pool_with_sink(capacity: usize) -> (MemoryPool, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let pool = MemoryPool::with_sink(PoolConfig::debug(), sink.clone());
        pool.initialize(capacity).unwrap();
        (pool, sink)
    }

    #[test]
    fn operations_require_initialization() {
        let pool = MemoryPool::new();
        assert!(!pool.is_initialized());
        assert_eq!(pool.allocate(16, "x"), Err(PoolError::NotInitialized));
        assert_eq!(
            pool.deallocate(Address::new(64), "x"),
            Err(PoolError::NotInitialized)
        );
        assert_eq!(pool.stats(), None);
        assert_eq!(pool.capacity(), None);
    }

    #[test]
    fn second_initialize_keeps_existing_pool() {
        let pool = MemoryPool::with_capacity(1024).unwrap();
        let address = pool.allocate(64, "keep").unwrap();

        assert_eq!(
            pool.initialize(4096),
            Err(PoolError::AlreadyInitialized { capacity: 1024 })
        );
        assert_eq!(pool.capacity(), Some(1024));
        pool.deallocate(address, "keep").unwrap();
    }

    #[test]
    fn zero_size_is_rejected() {
        let pool = MemoryPool::with_capacity(1024).unwrap();
        assert_eq!(pool.allocate(0, "x"), Err(PoolError::InvalidSize { size: 0 }));
    }

    #[test]
    fn out_of_memory_emits_record() {
        let (pool, sink) = pool_with_sink(160);
        // 32-byte header + 64-byte payload out of 160
        let _held = pool.allocate(64, "Held").unwrap();
        let err = pool.allocate(1024, "Huge").unwrap_err();
        assert!(matches!(err, PoolError::OutOfMemory { .. }));

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, DiagnosticKind::OutOfMemory);
        assert_eq!(records[0].requested_size, 1024);
        assert_eq!(records[0].tag, "Huge");
        assert_eq!(records[0].address, None);
        assert!((records[0].pool_utilization - 0.6).abs() < 1e-9);
    }

    #[test]
    fn double_free_emits_record() {
        let (pool, sink) = pool_with_sink(1024);
        let address = pool.allocate(50, "Event").unwrap();
        pool.deallocate(address, "Event").unwrap();

        let err = pool.deallocate(address, "Event").unwrap_err();
        assert_eq!(err, PoolError::DoubleFree { address, size: 64 });

        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, DiagnosticKind::DoubleFree);
        assert_eq!(records[0].address, Some(address));
        pool.validate().unwrap();
    }

    #[test]
    fn invalid_pointer_emits_record() {
        let (pool, sink) = pool_with_sink(1024);
        let err = pool.deallocate(Address::new(8), "stray").unwrap_err();
        assert!(matches!(err, PoolError::InvalidPointer { .. }));
        assert_eq!(sink.take()[0].kind, DiagnosticKind::InvalidPointer);
    }

    #[test]
    fn sink_may_reenter_pool() {
        struct Reentrant(std::sync::OnceLock<Arc<MemoryPool>>, Mutex<Option<PoolStats>>);

        impl DiagnosticSink for Reentrant {
            fn on_record(&self, _record: &DiagnosticRecord) {
                if let Some(pool) = self.0.get() {
                    *self.1.lock() = pool.stats();
                }
            }
        }

        let sink = Arc::new(Reentrant(std::sync::OnceLock::new(), Mutex::new(None)));
        let pool = Arc::new(MemoryPool::with_sink(PoolConfig::production(), sink.clone()));
        let _ = sink.0.set(pool.clone());
        pool.initialize(160).unwrap();

        assert!(pool.allocate(4096, "big").is_err());
        let seen = *sink.1.lock();
        assert_eq!(seen.map(|s| s.failed_allocs), Some(1));
    }

    #[test]
    fn try_shutdown_rejects_busy_pool() {
        let pool = MemoryPool::with_capacity(1024).unwrap();
        let address = pool.allocate(32, "x").unwrap();

        assert_eq!(pool.try_shutdown(), Err(PoolError::BusyPool { live: 1 }));
        assert!(pool.is_initialized());

        pool.deallocate(address, "x").unwrap();
        pool.try_shutdown().unwrap();
        assert!(!pool.is_initialized());
        pool.try_shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent_and_allows_reinit() {
        let pool = MemoryPool::with_capacity(1024).unwrap();
        pool.allocate(32, "leak").unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(!pool.is_initialized());

        pool.initialize(2048).unwrap();
        assert_eq!(pool.capacity(), Some(2048));
        assert_eq!(pool.stats().map(|s| s.live_allocations), Some(0));
    }

    #[test]
    fn debug_output_does_not_block() {
        let pool = MemoryPool::with_capacity(1024).unwrap();
        assert!(format!("{pool:?}").contains("capacity"));

        let _guard = pool.arena.lock();
        assert!(format!("{pool:?}").contains("<locked>"));
    }
}
