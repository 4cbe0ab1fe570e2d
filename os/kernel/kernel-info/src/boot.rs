//! # Kernel Boot Arguments

use crate::memory::{
    MAX_BOOT_CPUS, MAX_PHYS_ALLOC_ADDR_RANGES, MAX_PHYS_MEM_ADDR_RANGES,
    MAX_VIRT_ALLOC_ADDR_RANGES,
};

/// A `[start, start + size)` byte range.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct AddrRange {
    pub start: u64,
    pub size: u64,
}

impl AddrRange {
    #[inline]
    #[must_use]
    pub const fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// One past the last byte of the range.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.size
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr - self.start < self.size
    }
}

/// Returned when a fixed-capacity range list is already full.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("boot range list is full")]
pub struct RangeListFull;

/// Memory description handed from the loader to the kernel.
///
/// Ranges in each list are sorted by start address. The early boot allocator
/// grows the physical and virtual allocation ranges in place while the kernel
/// heap does not exist yet.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct KernelArgs {
    pub num_phys_mem_ranges: u32,
    pub phys_mem_range: [AddrRange; MAX_PHYS_MEM_ADDR_RANGES],

    pub num_phys_alloc_ranges: u32,
    pub phys_alloc_range: [AddrRange; MAX_PHYS_ALLOC_ADDR_RANGES],

    pub num_virt_alloc_ranges: u32,
    pub virt_alloc_range: [AddrRange; MAX_VIRT_ALLOC_ADDR_RANGES],

    /// Kernel text segment (virtual).
    pub kernel_seg0_addr: AddrRange,

    /// Kernel data segment (virtual).
    pub kernel_seg1_addr: AddrRange,

    pub num_cpus: u32,

    /// Idle-thread kernel stack per CPU (virtual).
    pub cpu_kstack: [AddrRange; MAX_BOOT_CPUS],

    /// Boot directory image (physical).
    pub bootdir_addr: AddrRange,
}

macro_rules! range_list {
    ($slice:ident, $slice_mut:ident, $push:ident, $list:ident, $count:ident) => {
        #[must_use]
        pub fn $slice(&self) -> &[AddrRange] {
            &self.$list[..self.$count as usize]
        }

        pub fn $slice_mut(&mut self) -> &mut [AddrRange] {
            &mut self.$list[..self.$count as usize]
        }

        /// Append a range to the list.
        ///
        /// # Errors
        /// [`RangeListFull`] when the fixed capacity is exhausted.
        pub fn $push(&mut self, range: AddrRange) -> Result<(), RangeListFull> {
            let n = self.$count as usize;
            let slot = self.$list.get_mut(n).ok_or(RangeListFull)?;
            *slot = range;
            self.$count += 1;
            Ok(())
        }
    };
}

impl KernelArgs {
    range_list!(
        phys_mem_ranges,
        phys_mem_ranges_mut,
        push_phys_mem_range,
        phys_mem_range,
        num_phys_mem_ranges
    );
    range_list!(
        phys_alloc_ranges,
        phys_alloc_ranges_mut,
        push_phys_alloc_range,
        phys_alloc_range,
        num_phys_alloc_ranges
    );
    range_list!(
        virt_alloc_ranges,
        virt_alloc_ranges_mut,
        push_virt_alloc_range,
        virt_alloc_range,
        num_virt_alloc_ranges
    );

    /// Idle stacks of the CPUs the loader brought up.
    #[must_use]
    pub fn cpu_kstacks(&self) -> &[AddrRange] {
        &self.cpu_kstack[..self.num_cpus as usize]
    }

    /// Register the idle stack of the next CPU.
    ///
    /// # Errors
    /// [`RangeListFull`] when [`MAX_BOOT_CPUS`] stacks are already registered.
    pub fn push_cpu_kstack(&mut self, range: AddrRange) -> Result<(), RangeListFull> {
        let n = self.num_cpus as usize;
        let slot = self.cpu_kstack.get_mut(n).ok_or(RangeListFull)?;
        *slot = range;
        self.num_cpus += 1;
        Ok(())
    }
}
