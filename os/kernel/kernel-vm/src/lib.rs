//! # Kernel Virtual Memory
//!
//! Physical frame accounting, address spaces and their areas, backing stores,
//! and the boot sequence that wires them together.
//!
//! ## Layers
//!
//! ```text
//!   vm_init ──► EarlyBootAllocator        (KernelArgs ranges, before the heap)
//!      │
//!      ▼
//!   VirtualMemory
//!      ├── SpinLock<FrameAllocator>        one u32 slot per frame, free chain
//!      ├── SpinLock<Vec<Arc<AddressSpace>>>
//!      │        └── SpinLock<BTreeMap<base, Area>>
//!      │                  └── Option<Arc<Store>>
//!      └── &dyn Platform                   page tables, heap, arch hooks
//! ```
//!
//! The crate never touches page tables directly. All mapping goes through
//! [`PageMapper`], which the architecture layer implements together with the
//! remaining [`Platform`] hooks.
//!
//! ## Example
//! ```
//! # use kernel_vm::{AddressPolicy, AreaRequest, LockFlags};
//! # use kernel_memory_addresses::VirtualAddress;
//! let stack = AreaRequest::new("user_stack", 0x8000)
//!     .address(AddressPolicy::Exact(VirtualAddress::new(0x7fff_0000)))
//!     .lock(LockFlags::RW);
//! assert_eq!(stack.size(), 0x8000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod area;
mod aspace;
mod bootmem;
pub mod debug;
mod error;
pub mod fault;
mod frame_alloc;
mod init;
mod lock;
mod platform;
pub mod store;
mod vm;

pub use area::{AddressPolicy, AreaId, AreaInfo, AreaRequest, AreaSource};
pub use aspace::{AddressSpace, AspaceId};
pub use bootmem::EarlyBootAllocator;
pub use error::{MapError, VmError};
pub use fault::{FaultReport, FaultState, PageFault, PageFaultError};
pub use frame_alloc::{END_OF_LIST, FrameAllocator, FrameError, FrameRun, IN_USE, Runs};
pub use init::{install, kernel_vm, vm_init};
pub use lock::LockFlags;
pub use platform::{PageMapper, Platform};
pub use store::{BackingStore, IoVec, NullStore, Store, StoreError};
pub use vm::{KERNEL_ASPACE_NAME, VirtualMemory};
