//! # Early boot allocator
//!
//! Hands out kernel virtual space and physical pages by growing the ranges in
//! [`KernelArgs`] before the frame table and the heap exist. Only the
//! bootstrap processor runs at this point, so nothing here locks.

use crate::lock::LockFlags;
use crate::platform::PageMapper;
use kernel_info::boot::{AddrRange, KernelArgs};
use kernel_info::memory::{KERNEL_BASE, KERNEL_LAST, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress, page_round_up, pages_for};
use log::trace;

pub struct EarlyBootAllocator<'a> {
    ka: &'a mut KernelArgs,
}

impl<'a> EarlyBootAllocator<'a> {
    #[must_use]
    pub const fn new(ka: &'a mut KernelArgs) -> Self {
        Self { ka }
    }

    /// Reserve `size` bytes (rounded up to whole pages) of kernel virtual
    /// space by growing one of the virtual allocation ranges.
    ///
    /// Returns `None` when no range can grow far enough.
    pub fn alloc_vspace(&mut self, size: u64) -> Option<VirtualAddress> {
        let size = page_round_up(size);
        if size == 0 {
            return None;
        }

        if self.ka.virt_alloc_ranges().is_empty() {
            let fits = size - 1 <= KERNEL_LAST - KERNEL_BASE;
            return (fits
                && self
                    .ka
                    .push_virt_alloc_range(AddrRange::new(KERNEL_BASE, size))
                    .is_ok())
            .then_some(VirtualAddress::new(KERNEL_BASE));
        }

        let ranges = self.ka.virt_alloc_ranges_mut();

        // A hole between two ranges: grow the lower one into it.
        for i in 1..ranges.len() {
            let end = ranges[i - 1].start + ranges[i - 1].size;
            if ranges[i].start - end >= size {
                ranges[i - 1].size += size;
                return Some(VirtualAddress::new(end));
            }
        }

        // Past the last range, bounded by the end of kernel space.
        let last = ranges.len() - 1;
        if let Some(end) = ranges[last].start.checked_add(ranges[last].size)
            && KERNEL_LAST - end >= size - 1
        {
            ranges[last].size += size;
            return Some(VirtualAddress::new(end));
        }

        // Before the first range, bounded by the kernel base.
        if ranges[0].start >= KERNEL_BASE && ranges[0].start - KERNEL_BASE >= size {
            ranges[0].start -= size;
            ranges[0].size += size;
            return Some(VirtualAddress::new(ranges[0].start));
        }

        None
    }

    /// Whether `addr` lies inside one of the declared RAM ranges.
    #[must_use]
    pub fn is_page_in_phys_range(&self, addr: PhysicalAddress) -> bool {
        self.ka
            .phys_mem_ranges()
            .iter()
            .any(|r| r.contains(addr.as_u64()))
    }

    /// Reserve one physical page directly behind a physical allocation range.
    ///
    /// Returns `None` when no range can grow without running into its
    /// neighbour or leaving RAM.
    pub fn alloc_phys_page(&mut self) -> Option<PhysicalAddress> {
        let count = self.ka.phys_alloc_ranges().len();
        for i in 0..count {
            let ranges = self.ka.phys_alloc_ranges();
            let next_page = ranges[i].end();

            if let Some(next) = ranges.get(i + 1)
                && next.size != 0
                && next_page >= next.start
            {
                continue;
            }

            if self.is_page_in_phys_range(PhysicalAddress::new(next_page)) {
                self.ka.phys_alloc_ranges_mut()[i].size += PAGE_SIZE;
                return Some(PhysicalAddress::new(next_page));
            }
        }
        None
    }

    /// Reserve virtual space and back every page of it with a fresh physical
    /// page.
    ///
    /// # Panics
    /// Bootstrap cannot continue without these pages, so running out of
    /// virtual space or physical pages, or failing to map, halts.
    pub fn alloc_and_map(
        &mut self,
        size: u64,
        lock: LockFlags,
        mapper: &dyn PageMapper,
    ) -> VirtualAddress {
        let Some(base) = self.alloc_vspace(size) else {
            panic!("early boot: no kernel virtual space for {size:#x} bytes");
        };

        let mut va = base;
        for _ in 0..pages_for(size) {
            let Some(pa) = self.alloc_phys_page() else {
                panic!("early boot: out of physical pages while mapping {base}");
            };
            if let Err(e) = mapper.map_page(pa, va, lock) {
                panic!("early boot: cannot map {va} -> {pa}: {e}");
            }
            trace!("early boot: {va} -> {pa}");
            va += PAGE_SIZE;
        }
        base
    }
}
