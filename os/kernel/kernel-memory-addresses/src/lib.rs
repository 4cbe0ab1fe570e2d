//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses and page-frame numbers the
//! virtual-memory subsystem passes around.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address in some address space (page-table translated). |
//! | [`PhysicalAddress`] | An address in physical RAM or an MMIO window. |
//! | [`PageFrame`] | The number of a physical frame, i.e. `PhysicalAddress / PAGE_SIZE`. |
//!
//! The frame size is fixed at [`PAGE_SIZE`] (4 KiB). All rounding helpers are
//! `const fn` so they can be used in layout constants.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! assert_eq!(va.align_down().as_u64(), 0xFFFF_FFFF_8000_1000);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! let frame = PageFrame::containing(PhysicalAddress::new(0x5042));
//! assert_eq!(frame.as_u64(), 5);
//! assert_eq!(frame.base(), PhysicalAddress::new(0x5000));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_frame;
mod physical_address;
mod virtual_address;

pub use page_frame::PageFrame;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of one page frame in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Round `value` up to the next multiple of [`PAGE_SIZE`].
///
/// Saturates at the last page boundary representable in a `u64`.
#[inline]
#[must_use]
pub const fn page_round_up(value: u64) -> u64 {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => v & !(PAGE_SIZE - 1),
        None => u64::MAX & !(PAGE_SIZE - 1),
    }
}

/// Round `value` down to a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn page_round_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Number of whole pages needed to cover `size` bytes.
#[inline]
#[must_use]
pub const fn pages_for(size: u64) -> u64 {
    page_round_up(size) >> PAGE_SHIFT
}
