//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: the busy-waiting lock guarding the frame allocator, each
//!   address space, and the address-space registry.
//! * [`SyncOnceCell`]: write-once storage for the process-wide VM instance.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
