//! Utility functions and helpers for keel-memory
//!
//! - Memory alignment helpers
//! - Size formatting utilities

use crate::core::size::KB;

/// Aligns a value up, returning `None` when the result does not fit in `usize`
///
/// # Examples
/// ```
/// use keel_memory::utils::checked_align_up;
///
/// assert_eq!(checked_align_up(17, 16), Some(32));
/// assert_eq!(checked_align_up(usize::MAX, 16), None);
/// ```
#[inline]
pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(bumped) => Some(bumped & !(alignment - 1)),
        None => None,
    }
}

/// Aligns a value down to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use keel_memory::utils::align_down;
///
/// assert_eq!(align_down(7, 8), 0);
/// assert_eq!(align_down(8, 8), 8);
/// assert_eq!(align_down(9, 8), 8);
/// ```
#[inline(always)]
pub const fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

/// Checks if a value is aligned to the given alignment
///
/// # Examples
/// ```
/// use keel_memory::utils::is_aligned;
///
/// assert!(is_aligned(16, 8));
/// assert!(is_aligned(32, 16));
/// assert!(!is_aligned(17, 8));
/// ```
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Format bytes into human-readable string
///
/// # Examples
/// ```
/// use keel_memory::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KiB");
/// assert_eq!(format_bytes(256 * 1024 * 1024), "256.00 MiB");
/// ```
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < KB {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / KB as f64;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < KB as f64 {
            break;
        }
        value /= KB as f64;
        unit = next;
    }
    format!("{value:.2} {unit}")
}
