//! Common types and constants for memory management

use std::fmt;

/// Memory alignment requirements
pub mod alignment {
    /// Alignment unit for every block size and payload address.
    ///
    /// This is the strictest fundamental alignment on the supported 64-bit
    /// targets (`max_align_t`), so any scalar type can live at the start of a
    /// payload.
    pub const ALIGNMENT: usize = 16;
}

/// Memory size constants
pub mod size {
    /// 1 Kilobyte
    pub const KB: usize = 1024;

    /// 1 Megabyte
    pub const MB: usize = 1024 * KB;
}

/// Absolute address of a payload handed out by a [`MemoryPool`].
///
/// The value is `base_address + block offset + HEADER_SIZE`. It is only a
/// number: the pool owns the bytes behind it and grants access through
/// [`MemoryPool::with_payload`] and [`MemoryPool::with_payload_mut`].
///
/// [`MemoryPool`]: crate::pool::MemoryPool
/// [`MemoryPool::with_payload`]: crate::pool::MemoryPool::with_payload
/// [`MemoryPool::with_payload_mut`]: crate::pool::MemoryPool::with_payload_mut
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// Wraps a raw address value.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Checks whether the address is a multiple of `alignment`.
    #[inline]
    pub const fn is_aligned_to(self, alignment: usize) -> bool {
        crate::utils::is_aligned(self.0, alignment)
    }
}

impl From<Address> for usize {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
