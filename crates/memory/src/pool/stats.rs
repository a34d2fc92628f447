//! Memory pool statistics

/// Lifetime counters kept by the arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PoolCounters {
    pub total_allocs: u64,
    pub total_deallocs: u64,
    pub failed_allocs: u64,
    pub double_frees: u64,
    pub invalid_frees: u64,
    pub peak_allocated: usize,
}

/// Point-in-time statistics of a memory pool
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    /// Usable capacity in bytes
    pub capacity: usize,
    /// Bytes held by allocated blocks, headers included
    pub allocated_bytes: usize,
    /// Payload bytes of free blocks
    pub free_bytes: usize,
    /// Currently allocated blocks
    pub live_allocations: usize,
    /// Blocks in the free list
    pub free_blocks: usize,
    /// All blocks, free and allocated
    pub total_blocks: usize,
    /// Payload size of the largest free block
    pub largest_free_block: usize,
    /// Total allocations performed
    pub total_allocs: u64,
    /// Total deallocations performed
    pub total_deallocs: u64,
    /// Allocations rejected for lack of space
    pub failed_allocs: u64,
    /// Deallocations of blocks that were already free
    pub double_frees: u64,
    /// Deallocations of addresses outside any block
    pub invalid_frees: u64,
    /// Peak of `allocated_bytes`
    pub peak_allocated_bytes: usize,
}

impl PoolStats {
    /// Fraction of the capacity held by allocated blocks.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.allocated_bytes as f64 / self.capacity as f64
    }

    /// External fragmentation: `1 - largest_free / free_bytes`.
    ///
    /// Zero when all free space is one block (or there is none).
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_block as f64 / self.free_bytes as f64
    }
}
