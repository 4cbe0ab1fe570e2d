use super::{BackingStore, IoVec, StoreError};
use crate::aspace::AddressSpace;
use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

/// Bookkeeping-only store.
///
/// Every page counts as present, so generic fault code never tries to fetch
/// anything. Reaching [`BackingStore::fault`] on it means a mapping went
/// stale somewhere, and the fault is reported as fatal.
#[derive(Debug, Default)]
pub struct NullStore {
    committed: AtomicU64,
}

impl NullStore {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            committed: AtomicU64::new(0),
        }
    }
}

impl BackingStore for NullStore {
    fn destroy(self: Box<Self>) {}

    fn commit(&self, size: u64) -> u64 {
        self.committed.store(size, Ordering::Release);
        size
    }

    fn committed_size(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    fn has_page(&self, _offset: u64) -> bool {
        true
    }

    fn read(&self, _offset: u64, _vecs: &mut [IoVec]) -> Result<usize, StoreError> {
        Err(StoreError::NotSupported)
    }

    fn write(&self, _offset: u64, _vecs: &[IoVec]) -> Result<usize, StoreError> {
        Err(StoreError::NotSupported)
    }

    fn fault(&self, _space: &AddressSpace, _offset: u64) -> Result<(), StoreError> {
        Err(StoreError::PageFaultFatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use alloc::sync::Arc;
    use kernel_memory_addresses::VirtualAddress;

    #[test]
    fn commit_is_recorded() {
        let store = Store::null();
        assert_eq!(store.committed_size(), 0);
        assert_eq!(store.commit(0x3000), 0x3000);
        assert_eq!(store.committed_size(), 0x3000);
        assert_eq!(store.commit(0x1000), 0x1000);
        assert_eq!(store.committed_size(), 0x1000);
    }

    #[test]
    fn every_page_is_present() {
        let store = Store::null();
        assert!(store.has_page(0));
        assert!(store.has_page(u64::MAX));
    }

    #[test]
    fn io_is_not_supported() {
        let store = Store::null();
        let mut vecs = [IoVec {
            base: VirtualAddress::new(0x1000),
            len: 16,
        }];
        assert_eq!(store.read(0, &mut vecs), Err(StoreError::NotSupported));
        assert_eq!(store.write(0, &vecs), Err(StoreError::NotSupported));
    }

    #[test]
    fn fault_is_fatal() {
        let store = Store::null();
        let space = AddressSpace::new(0.into(), "test", VirtualAddress::new(0x1000), 0x1000);
        assert_eq!(store.fault(&space, 0), Err(StoreError::PageFaultFatal));
    }

    #[test]
    fn destroyed_only_by_last_owner() {
        let store = Store::null();
        let other = Arc::clone(&store);
        assert!(!Store::destroy_if_unreferenced(store));
        assert!(Store::destroy_if_unreferenced(other));
    }
}
