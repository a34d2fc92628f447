//! Address-ordered index of free blocks

/// Sorted set of free block offsets.
///
/// Order is load-bearing: first-fit scans it front to back, and
/// coalescing looks up the free block immediately below an offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeList {
    offsets: Vec<usize>,
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            offsets: Vec::new(),
        }
    }

    /// Inserts `offset` keeping ascending order. Returns `false` if it was
    /// already present.
    pub fn insert(&mut self, offset: usize) -> bool {
        match self.offsets.binary_search(&offset) {
            Ok(_) => false,
            Err(index) => {
                self.offsets.insert(index, offset);
                true
            }
        }
    }

    /// Removes `offset`, returning whether it was present.
    pub fn remove(&mut self, offset: usize) -> bool {
        match self.offsets.binary_search(&offset) {
            Ok(index) => {
                self.offsets.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Largest free offset strictly below `offset`.
    pub fn predecessor(&self, offset: usize) -> Option<usize> {
        let index = self.offsets.partition_point(|&o| o < offset);
        index.checked_sub(1).map(|i| self.offsets[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.offsets.iter().copied()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(offsets: &[usize]) -> FreeList {
        let mut list = FreeList::new();
        for &offset in offsets {
            list.insert(offset);
        }
        list
    }

    #[test]
    fn insert_keeps_address_order() {
        let list = list(&[480, 0, 192, 96]);
        assert_eq!(list.as_slice(), &[0, 96, 192, 480]);
    }

    #[test]
    fn insert_rejects_duplicates() {
        let mut list = list(&[96]);
        assert!(!list.insert(96));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_reports_presence() {
        let mut list = list(&[0, 96]);
        assert!(list.remove(0));
        assert!(!list.remove(0));
        assert_eq!(list.as_slice(), &[96]);
    }

    #[test]
    fn predecessor_is_strictly_below() {
        let list = list(&[0, 96, 288]);
        assert_eq!(list.predecessor(0), None);
        assert_eq!(list.predecessor(96), Some(0));
        assert_eq!(list.predecessor(192), Some(96));
        assert_eq!(list.predecessor(1024), Some(288));
        assert_eq!(FreeList::new().predecessor(64), None);
    }

    #[test]
    fn iter_follows_address_order() {
        let list = list(&[288, 0, 96]);
        assert_eq!(list.iter().collect::<Vec<_>>(), vec![0, 96, 288]);
        assert_eq!(FreeList::new().iter().count(), 0);
    }
}
