//! Memory pool configuration

/// Configuration for [`MemoryPool`](super::MemoryPool)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Fill pattern byte for the buffer at init and for handed-out payloads
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for released payloads
    pub dealloc_pattern: Option<u8>,
    /// Run a full consistency walk after every allocate and deallocate
    pub verify_integrity: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            alloc_pattern: if cfg!(debug_assertions) {
                Some(0xBB)
            } else {
                None
            },
            dealloc_pattern: if cfg!(debug_assertions) {
                Some(0xDD)
            } else {
                None
            },
            verify_integrity: false,
        }
    }
}

impl PoolConfig {
    /// Production configuration - no fills, no verification
    #[must_use]
    pub fn production() -> Self {
        Self {
            alloc_pattern: None,
            dealloc_pattern: None,
            verify_integrity: false,
        }
    }

    /// Debug configuration - fill patterns and integrity walks
    #[must_use]
    pub fn debug() -> Self {
        Self {
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
            verify_integrity: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let production = PoolConfig::production();
        assert_eq!(production.alloc_pattern, None);
        assert!(!production.verify_integrity);

        let debug = PoolConfig::debug();
        assert_eq!(debug.alloc_pattern, Some(0xBB));
        assert_eq!(debug.dealloc_pattern, Some(0xDD));
        assert!(debug.verify_integrity);
    }
}
