#![allow(dead_code)]

use kernel_info::boot::KernelArgs;
use kernel_memory_addresses::{PageFrame, PhysicalAddress, VirtualAddress};
use kernel_sync::SpinLock;
use kernel_vm::{FrameAllocator, LockFlags, MapError, PageMapper, Platform, VirtualMemory};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

type MapHook = Box<dyn FnOnce() + Send>;

/// Page tables as a map from virtual to physical page.
#[derive(Default)]
pub struct MockPlatform {
    pub mappings: SpinLock<BTreeMap<u64, (u64, LockFlags)>>,
    pub heap: SpinLock<Option<(VirtualAddress, u64)>>,
    /// Virtual addresses whose mapping attempt fails.
    pub refuse: SpinLock<Vec<u64>>,
    /// Run once, right before the page at the given address is mapped.
    pub hooks: SpinLock<Vec<(u64, MapHook)>>,
    pub arch_init_calls: AtomicUsize,
    pub post_heap_calls: AtomicUsize,
    pub post_sem_calls: AtomicUsize,
}

impl MockPlatform {
    pub fn leaked() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn mapping(&self, va: u64) -> Option<(u64, LockFlags)> {
        self.mappings.lock().get(&va).copied()
    }

    pub fn mapped_pages(&self) -> usize {
        self.mappings.lock().len()
    }

    /// A mapping some earlier boot stage left behind.
    pub fn premap(&self, va: u64, pa: u64) {
        self.mappings
            .lock()
            .insert(va, (pa, LockFlags::KERNEL | LockFlags::RW));
    }

    pub fn refuse_at(&self, va: u64) {
        self.refuse.lock().push(va);
    }

    pub fn before_mapping(&self, va: u64, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push((va, Box::new(hook)));
    }

    fn run_hooks(&self, va: u64) {
        let due: Vec<MapHook> = {
            let mut hooks = self.hooks.lock();
            let (due, rest) = hooks.drain(..).partition(|(at, _)| *at == va);
            *hooks = rest;
            due.into_iter().map(|(_, hook)| hook).collect()
        };
        for hook in due {
            hook();
        }
    }
}

impl PageMapper for MockPlatform {
    fn map_page(
        &self,
        pa: PhysicalAddress,
        va: VirtualAddress,
        lock: LockFlags,
    ) -> Result<(), MapError> {
        self.run_hooks(va.as_u64());
        if self.refuse.lock().contains(&va.as_u64()) {
            return Err(MapError::NoTableMemory);
        }
        let mut map = self.mappings.lock();
        if map.contains_key(&va.as_u64()) {
            return Err(MapError::AlreadyMapped(va));
        }
        map.insert(va.as_u64(), (pa.as_u64(), lock));
        Ok(())
    }

    fn unmap_page(&self, va: VirtualAddress) -> Result<(), MapError> {
        self.mappings
            .lock()
            .remove(&va.as_u64())
            .map(|_| ())
            .ok_or(MapError::NotMapped(va))
    }

    fn query_mapping(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let page = va.align_down();
        self.mapping(page.as_u64())
            .map(|(pa, _)| PhysicalAddress::new(pa + va.page_offset()))
    }
}

impl Platform for MockPlatform {
    fn arch_init(&self, _ka: &mut KernelArgs) {
        self.arch_init_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn arch_init_post_heap(&self, _ka: &mut KernelArgs) {
        self.post_heap_calls.fetch_add(1, Ordering::SeqCst);
    }

    unsafe fn heap_init(&self, base: VirtualAddress, size: u64) {
        *self.heap.lock() = Some((base, size));
    }

    fn heap_init_post_sem(&self, _ka: &KernelArgs) {
        self.post_sem_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// The table the bootstrap mapped is not real memory here.
    unsafe fn frame_table(&self, _va: VirtualAddress, entries: usize) -> &'static mut [u32] {
        Box::leak(vec![0u32; entries].into_boxed_slice())
    }
}

/// A VM over `frames` frames starting at frame `base`, without bootstrap.
pub fn vm(frames: usize, base: u64) -> (VirtualMemory, &'static MockPlatform) {
    let platform = MockPlatform::leaked();
    let table = Box::leak(vec![0u32; frames].into_boxed_slice());
    let alloc = FrameAllocator::new(table, PageFrame::new(base));
    (VirtualMemory::new(platform, alloc), platform)
}
