//! The pool's backing buffer and the block algorithms that run over it
//!
//! An [`Arena`] is one contiguous, [`ALIGNMENT`]-aligned byte buffer
//! partitioned into blocks. Blocks are addressed by their offset from the
//! start of the buffer; headers are encoded bytes at that offset (see
//! [`block`](super::block)). The arena itself is not synchronized;
//! [`MemoryPool`](super::MemoryPool) owns it behind a mutex.

#![allow(unsafe_code)]

use std::collections::HashMap;

use crate::core::Address;
use crate::core::alignment::ALIGNMENT;
use crate::error::{PoolError, PoolResult};
use crate::utils::{align_down, checked_align_up, is_aligned};

use super::block::{BlockHeader, BlockInfo, HEADER_SIZE, MIN_CAPACITY, SPLIT_THRESHOLD};
use super::config::PoolConfig;
use super::free_list::FreeList;
use super::stats::{PoolCounters, PoolStats};

pub(crate) const TAG_INITIAL: &str = "initial";
pub(crate) const TAG_SPLIT: &str = "split";
pub(crate) const TAG_FREED: &str = "freed";

/// One alignment unit of the buffer
#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Slot([u8; ALIGNMENT]);

const _: () = assert!(size_of::<Slot>() == ALIGNMENT);
const _: () = assert!(align_of::<Slot>() == ALIGNMENT);

/// Result of a successful allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Grant {
    pub address: Address,
    pub offset: usize,
    /// Payload capacity actually reserved
    pub size: usize,
}

/// Result of a successful deallocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Release {
    /// Offset of the free block that now contains the released payload
    pub offset: usize,
    /// Payload size of that block after coalescing
    pub size: usize,
    /// Bytes the caller held
    pub released: usize,
    pub merged_prev: bool,
    pub merged_next: bool,
}

pub(crate) struct Arena {
    slots: Box<[Slot]>,
    capacity: usize,
    free: FreeList,
    tags: HashMap<usize, Box<str>>,
    live: usize,
    allocated_bytes: usize,
    counters: PoolCounters,
    alloc_pattern: Option<u8>,
    dealloc_pattern: Option<u8>,
}

impl Arena {
    /// Reserves `capacity` bytes (rounded down to [`ALIGNMENT`]) and lays out
    /// one free block spanning all of them.
    pub fn new(capacity: usize, config: &PoolConfig) -> PoolResult<Self> {
        let rounded = align_down(capacity, ALIGNMENT);
        if rounded < MIN_CAPACITY {
            return Err(PoolError::InvalidCapacity {
                capacity,
                minimum: MIN_CAPACITY,
            });
        }

        let slot_count = rounded / ALIGNMENT;
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(slot_count)
            .map_err(|_| PoolError::ReservationFailed { capacity: rounded })?;
        let fill = config.alloc_pattern.unwrap_or(0);
        slots.resize(slot_count, Slot([fill; ALIGNMENT]));

        let mut arena = Self {
            slots: slots.into_boxed_slice(),
            capacity: rounded,
            free: FreeList::new(),
            tags: HashMap::new(),
            live: 0,
            allocated_bytes: 0,
            counters: PoolCounters::default(),
            alloc_pattern: config.alloc_pattern,
            dealloc_pattern: config.dealloc_pattern,
        };
        arena.write_header(0, &BlockHeader::free(rounded - HEADER_SIZE));
        arena.free.insert(0);
        arena.tags.insert(0, TAG_INITIAL.into());
        Ok(arena)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn base_address(&self) -> Address {
        Address::new(self.slots.as_ptr().addr())
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    pub fn utilization(&self) -> f64 {
        self.allocated_bytes as f64 / self.capacity as f64
    }

    // ------------------------------------------------------------------
    // Raw buffer access
    // ------------------------------------------------------------------

    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY: `Slot` is `repr(C)` over `[u8; ALIGNMENT]` with no padding
        // (checked by the const asserts above), so the slot slice is exactly
        // `capacity` initialized bytes, borrowed for the lifetime of `&self`.
        unsafe { std::slice::from_raw_parts(self.slots.as_ptr().cast::<u8>(), self.capacity) }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: same layout argument as `bytes`; `&mut self` guarantees the
        // returned slice is the only live view of the buffer.
        unsafe {
            std::slice::from_raw_parts_mut(self.slots.as_mut_ptr().cast::<u8>(), self.capacity)
        }
    }

    fn read_header(&self, offset: usize) -> Option<BlockHeader> {
        let end = offset.checked_add(HEADER_SIZE)?;
        let raw: &[u8; HEADER_SIZE] = self.bytes().get(offset..end)?.try_into().ok()?;
        BlockHeader::decode(raw)
    }

    /// Header of a block the directory says must exist.
    fn header_at(&self, offset: usize) -> PoolResult<BlockHeader> {
        self.read_header(offset)
            .ok_or_else(|| PoolError::corruption(format!("no block header at offset {offset}")))
    }

    fn write_header(&mut self, offset: usize, header: &BlockHeader) {
        self.bytes_mut()[offset..offset + HEADER_SIZE].copy_from_slice(&header.encode());
    }

    fn fill_payload(&mut self, offset: usize, size: usize, byte: u8) {
        let start = offset + HEADER_SIZE;
        self.bytes_mut()[start..start + size].fill(byte);
    }

    #[inline]
    fn address_of(&self, offset: usize) -> Address {
        Address::new(self.base_address().get() + offset + HEADER_SIZE)
    }

    /// Maps a payload address back to its block offset and header.
    ///
    /// Rejects addresses outside the buffer, misaligned ones, and ones whose
    /// preceding bytes do not hold a block header. A stale header left inside
    /// a merged free block still decodes; it always reads as free.
    fn resolve(&self, address: Address) -> Option<(usize, BlockHeader)> {
        let offset = address
            .get()
            .checked_sub(self.base_address().get())?
            .checked_sub(HEADER_SIZE)?;
        if !is_aligned(offset, ALIGNMENT) || offset + MIN_CAPACITY > self.capacity {
            return None;
        }

        let header = self.read_header(offset)?;
        if !is_aligned(header.size, ALIGNMENT) || offset + header.span() > self.capacity {
            return None;
        }
        Some((offset, header))
    }

    fn allocated_block(&self, address: Address) -> PoolResult<(usize, BlockHeader)> {
        self.resolve(address)
            .filter(|(_, header)| !header.is_free())
            .ok_or_else(|| PoolError::invalid_pointer(address))
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    fn first_fit(&self, aligned: usize) -> PoolResult<Option<(usize, BlockHeader)>> {
        for offset in self.free.iter() {
            let header = self.header_at(offset)?;
            if header.size >= aligned {
                return Ok(Some((offset, header)));
            }
        }
        Ok(None)
    }

    /// Payload size of the largest free block.
    pub fn largest_free(&self) -> usize {
        self.free
            .iter()
            .filter_map(|offset| self.read_header(offset))
            .map(|header| header.size)
            .max()
            .unwrap_or(0)
    }

    pub fn allocate(&mut self, size: usize, tag: &str) -> PoolResult<Grant> {
        if size == 0 {
            return Err(PoolError::invalid_size(size));
        }
        let aligned = checked_align_up(size, ALIGNMENT).ok_or_else(|| PoolError::invalid_size(size))?;

        let Some((offset, header)) = self.first_fit(aligned)? else {
            self.counters.failed_allocs += 1;
            return Err(PoolError::OutOfMemory {
                requested: size,
                aligned,
                largest_free: self.largest_free(),
            });
        };

        let remaining = header.size - aligned;
        let block_size = if remaining > SPLIT_THRESHOLD {
            let split_offset = offset + HEADER_SIZE + aligned;
            self.write_header(split_offset, &BlockHeader::free(remaining - HEADER_SIZE));
            self.free.insert(split_offset);
            self.tags.insert(split_offset, TAG_SPLIT.into());
            aligned
        } else {
            header.size
        };

        self.write_header(offset, &BlockHeader::allocated(block_size, size));
        self.free.remove(offset);
        self.tags.insert(offset, tag.into());

        self.live += 1;
        self.allocated_bytes += HEADER_SIZE + block_size;
        self.counters.total_allocs += 1;
        self.counters.peak_allocated = self.counters.peak_allocated.max(self.allocated_bytes);

        if let Some(pattern) = self.alloc_pattern {
            self.fill_payload(offset, block_size, pattern);
        }

        Ok(Grant {
            address: self.address_of(offset),
            offset,
            size: block_size,
        })
    }

    // ------------------------------------------------------------------
    // Reclamation
    // ------------------------------------------------------------------

    pub fn deallocate(&mut self, address: Address) -> PoolResult<Release> {
        let Some((offset, header)) = self.resolve(address) else {
            self.counters.invalid_frees += 1;
            return Err(PoolError::invalid_pointer(address));
        };
        if header.is_free() {
            self.counters.double_frees += 1;
            return Err(PoolError::DoubleFree {
                address,
                size: header.size,
            });
        }

        // Look up both neighbours before touching anything.
        let next_offset = offset + header.span();
        let next = if next_offset < self.capacity {
            Some(self.header_at(next_offset)?).filter(BlockHeader::is_free)
        } else {
            None
        };
        let prev = match self.free.predecessor(offset) {
            Some(prev_offset) => {
                let prev_header = self.header_at(prev_offset)?;
                (prev_offset + prev_header.span() == offset).then_some((prev_offset, prev_header))
            }
            None => None,
        };

        self.live -= 1;
        self.allocated_bytes -= header.span();
        self.counters.total_deallocs += 1;
        if let Some(pattern) = self.dealloc_pattern {
            self.fill_payload(offset, header.size, pattern);
        }

        let mut size = header.size;
        if let Some(next_header) = next {
            self.free.remove(next_offset);
            self.tags.remove(&next_offset);
            size += next_header.span();
        }
        // The released header keeps reading as free even when it ends up
        // inside the predecessor, so a repeated free is still reported.
        self.write_header(offset, &BlockHeader::free(size));

        let release = if let Some((prev_offset, prev_header)) = prev {
            let merged = prev_header.size + HEADER_SIZE + size;
            self.write_header(prev_offset, &BlockHeader::free(merged));
            self.tags.remove(&offset);
            self.tags.insert(prev_offset, TAG_FREED.into());
            Release {
                offset: prev_offset,
                size: merged,
                released: header.size,
                merged_prev: true,
                merged_next: next.is_some(),
            }
        } else {
            self.free.insert(offset);
            self.tags.insert(offset, TAG_FREED.into());
            Release {
                offset,
                size,
                released: header.size,
                merged_prev: false,
                merged_next: next.is_some(),
            }
        };
        Ok(release)
    }

    // ------------------------------------------------------------------
    // Payload access
    // ------------------------------------------------------------------

    /// The requested bytes of an allocated block.
    pub fn payload(&self, address: Address) -> PoolResult<&[u8]> {
        let (offset, header) = self.allocated_block(address)?;
        let start = offset + HEADER_SIZE;
        Ok(&self.bytes()[start..start + header.requested])
    }

    pub fn payload_mut(&mut self, address: Address) -> PoolResult<&mut [u8]> {
        let (offset, header) = self.allocated_block(address)?;
        let start = offset + HEADER_SIZE;
        Ok(&mut self.bytes_mut()[start..start + header.requested])
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn stats(&self) -> PoolStats {
        let free_blocks = self.free.len();
        PoolStats {
            capacity: self.capacity,
            allocated_bytes: self.allocated_bytes,
            free_bytes: self.capacity - self.allocated_bytes - free_blocks * HEADER_SIZE,
            live_allocations: self.live,
            free_blocks,
            total_blocks: free_blocks + self.live,
            largest_free_block: self.largest_free(),
            total_allocs: self.counters.total_allocs,
            total_deallocs: self.counters.total_deallocs,
            failed_allocs: self.counters.failed_allocs,
            double_frees: self.counters.double_frees,
            invalid_frees: self.counters.invalid_frees,
            peak_allocated_bytes: self.counters.peak_allocated,
        }
    }

    /// Address-ordered walk of every block.
    pub fn blocks(&self) -> PoolResult<Vec<BlockInfo>> {
        let mut blocks = Vec::with_capacity(self.free.len() + self.live);
        let mut offset = 0;
        while offset < self.capacity {
            let header = self.header_at(offset)?;
            if header.size == 0 {
                return Err(PoolError::corruption(format!(
                    "zero-sized block at offset {offset}"
                )));
            }
            blocks.push(BlockInfo {
                offset,
                size: header.size,
                is_free: header.is_free(),
                requested: header.requested,
                tag: self.tags.get(&offset).map(ToString::to_string).unwrap_or_default(),
            });
            offset += header.span();
        }
        Ok(blocks)
    }

    /// Checks that the blocks tile the buffer, sizes are aligned, the free
    /// list matches the free blocks exactly, no two free blocks touch, and
    /// the accounting agrees with the walk.
    pub fn validate(&self) -> PoolResult<()> {
        let blocks = self.blocks()?;

        let end = blocks.last().map_or(0, |b| b.offset + HEADER_SIZE + b.size);
        if end != self.capacity {
            return Err(PoolError::corruption(format!(
                "blocks cover {end} bytes of a {} byte pool",
                self.capacity
            )));
        }

        if let Some(block) = blocks.iter().find(|b| !is_aligned(b.size, ALIGNMENT)) {
            return Err(PoolError::corruption(format!(
                "block at offset {} has unaligned size {}",
                block.offset, block.size
            )));
        }

        if let Some(pair) = blocks.windows(2).find(|pair| pair[0].is_free && pair[1].is_free) {
            return Err(PoolError::corruption(format!(
                "adjacent free blocks at offsets {} and {}",
                pair[0].offset, pair[1].offset
            )));
        }

        let walked_free: Vec<usize> = blocks.iter().filter(|b| b.is_free).map(|b| b.offset).collect();
        if walked_free != self.free.as_slice() {
            return Err(PoolError::corruption(format!(
                "free list {:?} does not match free blocks {walked_free:?}",
                self.free.as_slice()
            )));
        }

        let (live, allocated) = blocks
            .iter()
            .filter(|b| !b.is_free)
            .fold((0, 0), |(n, bytes), b| (n + 1, bytes + HEADER_SIZE + b.size));
        if live != self.live || allocated != self.allocated_bytes {
            return Err(PoolError::corruption(format!(
                "accounting says {} live / {} bytes, walk found {live} / {allocated}",
                self.live, self.allocated_bytes
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn arena(capacity: usize) -> Arena {
        Arena::new(capacity, &PoolConfig::production()).expect("arena")
    }

    fn layout(arena: &Arena) -> Vec<(usize, usize, bool)> {
        arena
            .blocks()
            .expect("walk")
            .into_iter()
            .map(|b| (b.offset, b.size, b.is_free))
            .collect()
    }

    #[test]
    fn new_arena_is_one_initial_block() {
        let arena = arena(1024);
        let blocks = arena.blocks().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 1024 - HEADER_SIZE);
        assert_eq!(blocks[0].tag, TAG_INITIAL);
        assert!(arena.base_address().is_aligned_to(ALIGNMENT));
        arena.validate().unwrap();
    }

    #[test]
    fn capacity_is_rounded_down() {
        let arena = arena(1000);
        assert_eq!(arena.capacity(), 992);
        arena.validate().unwrap();
    }

    #[test]
    fn too_small_capacity_is_rejected() {
        let err = Arena::new(MIN_CAPACITY - 1, &PoolConfig::production()).err();
        assert_eq!(
            err,
            Some(PoolError::InvalidCapacity {
                capacity: MIN_CAPACITY - 1,
                minimum: MIN_CAPACITY,
            })
        );
        assert!(Arena::new(MIN_CAPACITY, &PoolConfig::production()).is_ok());
    }

    #[test]
    fn allocation_splits_large_remainder() {
        let mut arena = arena(160);
        let grant = arena.allocate(64, "a").unwrap();
        assert_eq!(grant.size, 64);
        assert_eq!(layout(&arena), vec![(0, 64, false), (96, 32, true)]);
        assert_eq!(arena.blocks().unwrap()[1].tag, TAG_SPLIT);
        arena.validate().unwrap();
    }

    #[test]
    fn allocation_keeps_small_remainder_as_slack() {
        let mut arena = arena(160);
        let grant = arena.allocate(80, "a").unwrap();
        assert_eq!(grant.size, 128);
        assert_eq!(layout(&arena), vec![(0, 128, false)]);
        arena.validate().unwrap();
    }

    #[test]
    fn address_is_base_plus_offset_plus_header() {
        let mut arena = arena(1024);
        let first = arena.allocate(1, "a").unwrap();
        let second = arena.allocate(1, "b").unwrap();
        let base = arena.base_address().get();
        assert_eq!(first.address.get(), base + HEADER_SIZE);
        assert_eq!(second.address.get(), base + second.offset + HEADER_SIZE);
        assert_eq!(second.offset, HEADER_SIZE + ALIGNMENT);
    }

    #[test]
    fn free_merges_with_next_and_previous() {
        let mut arena = arena(288);
        let a = arena.allocate(64, "a").unwrap();
        let b = arena.allocate(64, "b").unwrap();
        let c = arena.allocate(64, "c").unwrap();
        assert_eq!(arena.free.len(), 0);

        arena.deallocate(a.address).unwrap();
        let release = arena.deallocate(c.address).unwrap();
        assert!(!release.merged_prev && !release.merged_next);

        let release = arena.deallocate(b.address).unwrap();
        assert!(release.merged_prev && release.merged_next);
        assert_eq!(release.offset, 0);
        assert_eq!(release.size, 256);
        assert_eq!(layout(&arena), vec![(0, 256, true)]);
        assert_eq!(arena.blocks().unwrap()[0].tag, TAG_FREED);
        arena.validate().unwrap();
    }

    #[test]
    fn double_free_is_reported_without_state_change() {
        let mut arena = arena(1024);
        let a = arena.allocate(32, "a").unwrap();
        arena.deallocate(a.address).unwrap();
        let before = layout(&arena);

        let err = arena.deallocate(a.address).unwrap_err();
        assert!(matches!(err, PoolError::DoubleFree { .. }));
        assert_eq!(layout(&arena), before);
        assert_eq!(arena.stats().double_frees, 1);
    }

    #[test]
    fn double_free_inside_merged_block_is_reported() {
        let mut arena = arena(288);
        let a = arena.allocate(64, "a").unwrap();
        let b = arena.allocate(64, "b").unwrap();
        arena.deallocate(a.address).unwrap();
        arena.deallocate(b.address).unwrap();

        let err = arena.deallocate(b.address).unwrap_err();
        assert!(matches!(err, PoolError::DoubleFree { .. }));
        arena.validate().unwrap();
    }

    #[test]
    fn foreign_addresses_are_rejected() {
        let mut arena = arena(1024);
        let a = arena.allocate(32, "a").unwrap();
        let base = arena.base_address().get();

        for raw in [0, base, a.address.get() + 8, base + 4096] {
            let err = arena.deallocate(Address::new(raw)).unwrap_err();
            assert!(matches!(err, PoolError::InvalidPointer { .. }), "{raw:#x}");
        }
        assert_eq!(arena.stats().invalid_frees, 4);
        arena.validate().unwrap();
    }

    #[test]
    fn payload_covers_requested_bytes() {
        let mut arena = arena(1024);
        let a = arena.allocate(20, "a").unwrap();
        arena.payload_mut(a.address).unwrap().copy_from_slice(&[7; 20]);
        assert_eq!(arena.payload(a.address).unwrap(), &[7; 20]);

        arena.deallocate(a.address).unwrap();
        assert!(arena.payload(a.address).is_err());
    }

    #[test]
    fn patterns_fill_payloads() {
        let mut arena = Arena::new(1024, &PoolConfig::debug()).unwrap();
        let a = arena.allocate(16, "a").unwrap();
        assert!(arena.payload(a.address).unwrap().iter().all(|&b| b == 0xBB));

        let offset = a.offset + HEADER_SIZE;
        arena.deallocate(a.address).unwrap();
        assert!(arena.bytes()[offset..offset + 16].iter().all(|&b| b == 0xDD));
    }

    #[test]
    fn out_of_memory_reports_largest_free() {
        let mut arena = arena(160);
        let err = arena.allocate(200, "big").unwrap_err();
        assert_eq!(
            err,
            PoolError::OutOfMemory {
                requested: 200,
                aligned: 208,
                largest_free: 128,
            }
        );
        assert_eq!(arena.stats().failed_allocs, 1);
    }

    #[test]
    fn stats_account_for_every_byte() {
        let mut arena = arena(1024);
        arena.allocate(100, "a").unwrap();
        let b = arena.allocate(40, "b").unwrap();
        arena.allocate(10, "c").unwrap();
        arena.deallocate(b.address).unwrap();

        let stats = arena.stats();
        assert_eq!(
            stats.capacity,
            stats.allocated_bytes + stats.free_bytes + stats.free_blocks * HEADER_SIZE
        );
        assert_eq!(stats.total_blocks, 4);
        assert_eq!(stats.live_allocations, 2);
    }

    #[test]
    fn validate_detects_broken_free_list() {
        let mut arena = arena(1024);
        arena.allocate(64, "a").unwrap();
        arena.free.insert(0);
        assert!(matches!(arena.validate(), Err(PoolError::Corruption { .. })));
    }
}
