//! Block headers encoded inside the pool buffer
//!
//! Every block starts with a fixed [`HEADER_SIZE`]-byte header followed by
//! its payload. Headers are stored little-endian:
//!
//! ```text
//! 0..8    payload size (u64)
//! 8..12   magic word (u32)
//! 12..16  state (u32)
//! 16..24  requested size (u64)
//! 24..32  reserved
//! ```
//!
//! Walking `offset += HEADER_SIZE + size` from offset zero visits every block
//! of the pool in address order.

use crate::core::alignment::ALIGNMENT;

/// Size of the per-block header in bytes. A multiple of [`ALIGNMENT`], so
/// payloads stay aligned whenever block offsets are.
pub const HEADER_SIZE: usize = 32;

/// Smallest capacity that can hold one header and one aligned payload unit.
pub const MIN_CAPACITY: usize = HEADER_SIZE + ALIGNMENT;

/// A free block is split only when its leftover exceeds this many bytes.
pub const SPLIT_THRESHOLD: usize = HEADER_SIZE + ALIGNMENT;

const MAGIC: u32 = 0x4B45_454C;

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);

/// Allocation state stored in a block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlockState {
    Free = 1,
    Allocated = 2,
}

impl BlockState {
    const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Free),
            2 => Some(Self::Allocated),
            _ => None,
        }
    }
}

/// Decoded block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Payload capacity, always a multiple of [`ALIGNMENT`]
    pub size: usize,
    pub state: BlockState,
    /// Size the caller asked for; zero for free blocks
    pub requested: usize,
}

impl BlockHeader {
    /// Header of a free block with `size` payload bytes.
    #[inline]
    pub const fn free(size: usize) -> Self {
        Self {
            size,
            state: BlockState::Free,
            requested: 0,
        }
    }

    /// Header of an allocated block.
    #[inline]
    pub const fn allocated(size: usize, requested: usize) -> Self {
        Self {
            size,
            state: BlockState::Allocated,
            requested,
        }
    }

    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self.state, BlockState::Free)
    }

    /// Bytes the block occupies in the buffer, header included.
    #[inline]
    pub const fn span(&self) -> usize {
        HEADER_SIZE + self.size
    }

    /// Encodes the header into its on-buffer representation.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0u8; HEADER_SIZE];
        raw[0..8].copy_from_slice(&(self.size as u64).to_le_bytes());
        raw[8..12].copy_from_slice(&MAGIC.to_le_bytes());
        raw[12..16].copy_from_slice(&(self.state as u32).to_le_bytes());
        raw[16..24].copy_from_slice(&(self.requested as u64).to_le_bytes());
        raw
    }

    /// Decodes a header, returning `None` when the bytes do not carry the
    /// magic word or a known state.
    pub fn decode(raw: &[u8; HEADER_SIZE]) -> Option<Self> {
        let magic = u32::from_le_bytes(raw[8..12].try_into().ok()?);
        if magic != MAGIC {
            return None;
        }

        let state = BlockState::from_raw(u32::from_le_bytes(raw[12..16].try_into().ok()?))?;
        let size = usize::try_from(u64::from_le_bytes(raw[0..8].try_into().ok()?)).ok()?;
        let requested = usize::try_from(u64::from_le_bytes(raw[16..24].try_into().ok()?)).ok()?;

        Some(Self {
            size,
            state,
            requested,
        })
    }
}

/// Snapshot of one block, as reported by [`MemoryPool::blocks`]
///
/// [`MemoryPool::blocks`]: crate::pool::MemoryPool::blocks
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockInfo {
    /// Offset of the header from the start of the buffer
    pub offset: usize,
    /// Payload capacity
    pub size: usize,
    pub is_free: bool,
    /// Size requested by the caller (zero when free)
    pub requested: usize,
    pub tag: String,
}
