//! # Kernel Boot Arguments and Memory Layout
//!
//! This crate defines the boot-time memory description the loader hands to
//! the kernel and the compile-time layout constants the virtual-memory
//! subsystem is built around.
//!
//! ## Architecture
//!
//! ### Boot Arguments ([`boot`])
//! The loader fills a [`KernelArgs`](boot::KernelArgs) before jumping into the
//! kernel:
//! * **Physical memory ranges**: where RAM lives
//! * **Physical allocation ranges**: what the loader already consumed
//! * **Virtual allocation ranges**: which kernel virtual addresses are in use
//! * **Kernel segments, idle stacks, boot directory**: regions that must be
//!   accounted for once the kernel address space exists
//!
//! The range lists are fixed-capacity arrays with explicit counts so the
//! structure stays `#[repr(C)]` and can be shared with the loader.
//!
//! ### Memory Layout ([`memory`])
//! ```text
//! KERNEL_BASE            ┌─────────────────────────────────┐ 0xffff_ffff_8000_0000
//!                        │  Kernel image, heap, frame      │
//!                        │  table, idle stacks, boot dir   │
//! KERNEL_LAST            └─────────────────────────────────┘ 0xffff_ffff_ffff_ffff
//! ```
//!
//! `KERNEL_BASE + KERNEL_SIZE` does not fit into a `u64`, so bounds are always
//! checked against the inclusive [`KERNEL_LAST`](memory::KERNEL_LAST).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
