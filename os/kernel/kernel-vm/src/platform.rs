//! Seams to the architecture layer and the kernel heap.

use crate::error::MapError;
use crate::lock::LockFlags;
use kernel_info::boot::KernelArgs;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Page-table manipulation for the active architecture.
///
/// The VM core never touches page tables itself; every mapping change goes
/// through this trait.
pub trait PageMapper: Send + Sync {
    /// Map one page at `va` onto the frame at `pa`.
    ///
    /// # Errors
    /// Whatever the page-table layer cannot satisfy.
    fn map_page(&self, pa: PhysicalAddress, va: VirtualAddress, lock: LockFlags)
    -> Result<(), MapError>;

    /// Remove the mapping of the page at `va`.
    ///
    /// # Errors
    /// [`MapError::NotMapped`] when no mapping exists.
    fn unmap_page(&self, va: VirtualAddress) -> Result<(), MapError>;

    /// Physical address `va` currently translates to.
    fn query_mapping(&self, va: VirtualAddress) -> Option<PhysicalAddress>;
}

/// Everything the VM bootstrap needs from the rest of the kernel.
pub trait Platform: PageMapper {
    /// Runs before anything else during bootstrap.
    fn arch_init(&self, _ka: &mut KernelArgs) {}

    /// Runs once the heap and the kernel address space exist.
    fn arch_init_post_heap(&self, _ka: &mut KernelArgs) {}

    /// Hand the freshly mapped heap region to the kernel allocator.
    ///
    /// # Safety
    /// `[base, base + size)` must be mapped read-write and unused.
    unsafe fn heap_init(&self, base: VirtualAddress, size: u64);

    /// Late heap setup once semaphores are available.
    fn heap_init_post_sem(&self, _ka: &KernelArgs) {}

    /// View the frame table the bootstrap placed at `va`.
    ///
    /// # Safety
    /// `va` must point to `entries` mapped, writable `u32` slots that stay
    /// mapped forever and are not aliased elsewhere.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn frame_table(&self, va: VirtualAddress, entries: usize) -> &'static mut [u32] {
        // SAFETY: the caller guarantees the slots are mapped and unaliased.
        unsafe { core::slice::from_raw_parts_mut(va.as_u64() as usize as *mut u32, entries) }
    }
}
