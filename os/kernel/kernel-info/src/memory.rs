//! # Memory Layout

pub use kernel_memory_addresses::PAGE_SIZE;

/// First virtual address of the kernel address space.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Size of the kernel address space in bytes.
pub const KERNEL_SIZE: u64 = 0x8000_0000;

/// Last (inclusive) virtual address of the kernel address space.
pub const KERNEL_LAST: u64 = KERNEL_BASE + (KERNEL_SIZE - 1);

/// Size of the kernel heap carved out during VM bootstrap.
pub const KERNEL_HEAP_SIZE: u64 = 0x40_0000; // 4 MiB

/// Capacity of [`KernelArgs::phys_mem_range`](crate::boot::KernelArgs::phys_mem_range).
pub const MAX_PHYS_MEM_ADDR_RANGES: usize = 4;

/// Capacity of [`KernelArgs::phys_alloc_range`](crate::boot::KernelArgs::phys_alloc_range).
pub const MAX_PHYS_ALLOC_ADDR_RANGES: usize = 4;

/// Capacity of [`KernelArgs::virt_alloc_range`](crate::boot::KernelArgs::virt_alloc_range).
pub const MAX_VIRT_ALLOC_ADDR_RANGES: usize = 4;

/// Maximum number of CPUs the loader prepares idle stacks for.
pub const MAX_BOOT_CPUS: usize = 4;

const _: () = {
    assert!(KERNEL_BASE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_SIZE < KERNEL_SIZE);
    assert!(KERNEL_LAST == u64::MAX);
};
