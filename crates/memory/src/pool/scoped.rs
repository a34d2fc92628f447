//! RAII guard for pool allocations

use std::fmt;

use tracing::warn;

use crate::core::Address;
use crate::error::PoolResult;

use super::MemoryPool;

/// Allocation that returns itself to the pool when dropped
///
/// Created by [`MemoryPool::allocate_scoped`].
///
/// # Examples
///
/// ```
/// use keel_memory::pool::MemoryPool;
///
/// let pool = MemoryPool::with_capacity(1024)?;
/// {
///     let scratch = pool.allocate_scoped(64, "scratch")?;
///     scratch.with_bytes_mut(|bytes| bytes[0] = 1)?;
/// }
/// assert_eq!(pool.stats().map(|s| s.live_allocations), Some(0));
/// # Ok::<(), keel_memory::PoolError>(())
/// ```
#[must_use = "dropping the guard frees the allocation immediately"]
pub struct ScopedAllocation<'pool> {
    pool: &'pool MemoryPool,
    address: Address,
    tag: Box<str>,
    armed: bool,
}

impl<'pool> ScopedAllocation<'pool> {
    pub(crate) fn new(pool: &'pool MemoryPool, address: Address, tag: &str) -> Self {
        Self {
            pool,
            address,
            tag: tag.into(),
            armed: true,
        }
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> PoolResult<R> {
        self.pool.with_payload(self.address, f)
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> PoolResult<R> {
        self.pool.with_payload_mut(self.address, f)
    }

    /// Hands the allocation over to manual management; the caller must
    /// deallocate the returned address.
    pub fn into_address(mut self) -> Address {
        self.armed = false;
        self.address
    }
}

impl Drop for ScopedAllocation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.pool.deallocate(self.address, &self.tag) {
            warn!(address = %self.address, tag = %self.tag, error = %err, "scoped deallocation failed");
        }
    }
}

impl fmt::Debug for ScopedAllocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedAllocation")
            .field("address", &self.address)
            .field("tag", &self.tag)
            .field("armed", &self.armed)
            .finish()
    }
}
