use crate::area::AreaId;
use crate::aspace::AspaceId;
use crate::frame_alloc::FrameError;
use kernel_memory_addresses::VirtualAddress;

/// Failures reported by the architecture mapping layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("out of memory for page tables")]
    NoTableMemory,
}

/// Failures of the address-space and area API.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("no hole of {size:#x} bytes in the address space")]
    NoVirtualSpace { size: u64 },
    #[error("range {base} (+{size:#x}) lies outside the address space")]
    OutOfBounds { base: VirtualAddress, size: u64 },
    #[error("range {base} (+{size:#x}) overlaps an existing area")]
    Overlap { base: VirtualAddress, size: u64 },
    #[error("area must have a non-zero size")]
    ZeroSize,
    #[error("already-mapped areas need an exact address")]
    InvalidPolicy,
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("no area with id {0}")]
    NoSuchArea(AreaId),
    #[error("area {0} is still being created")]
    AreaBusy(AreaId),
    #[error("no address space with id {0}")]
    NoSuchAddressSpace(AspaceId),
    #[error("the kernel address space cannot be destroyed")]
    KernelSpace,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Map(#[from] MapError),
}
