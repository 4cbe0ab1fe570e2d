//! # Page-fault entry point
//!
//! The trap stub builds a [`PageFault`] from CR2, the saved instruction
//! pointer and the error code, and calls [`PageFault::handle`]. No fault is
//! resolved yet: every fault ends in [`FaultState::Fatal`] and the scheduler
//! is expected to stop the faulting context once it sees that state.
//!
//! Demand paging hooks in between the area lookup and the state transition:
//! look up the area's store, ask [`Store::has_page`](crate::store::Store::has_page),
//! dispatch to [`Store::fault`](crate::store::Store::fault), and only move to
//! `Fatal` when the store answers with
//! [`StoreError::PageFaultFatal`](crate::store::StoreError::PageFaultFatal).

use crate::area::AreaInfo;
use crate::aspace::AspaceId;
use crate::vm::VirtualMemory;
use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;
use log::error;

/// Page-fault error code layout (x86-64).
///
/// Reference: Intel SDM Vol. 3A, §6.15.1 "Page-Fault Exception (#PF)".
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,
    /// 0 = read, 1 = write.
    pub write: bool,
    /// 0 = supervisor, 1 = user mode.
    pub user: bool,
    /// Reserved bit set in a paging structure.
    pub reserved_bit: bool,
    pub instruction_fetch: bool,
    pub protection_key: bool,
    pub shadow_stack: bool,
    #[bits(57)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging structure"
        } else if !self.present() {
            "Non-present page"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultState {
    Resolving,
    /// Terminal. The faulting context makes no further progress.
    Fatal,
}

/// What the handler found out before giving up.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FaultReport {
    pub address: VirtualAddress,
    pub ip: VirtualAddress,
    pub error: PageFaultError,
    /// The area covering `address`, if any.
    pub area: Option<(AspaceId, AreaInfo)>,
}

#[derive(Debug)]
pub struct PageFault {
    address: VirtualAddress,
    ip: VirtualAddress,
    error: PageFaultError,
    state: FaultState,
}

impl PageFault {
    #[must_use]
    pub const fn new(address: VirtualAddress, ip: VirtualAddress, error: PageFaultError) -> Self {
        Self {
            address,
            ip,
            error,
            state: FaultState::Resolving,
        }
    }

    #[must_use]
    pub const fn state(&self) -> FaultState {
        self.state
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.state, FaultState::Fatal)
    }

    /// Log the fault, find the area it hit and move to [`FaultState::Fatal`].
    pub fn handle(&mut self, vm: &VirtualMemory) -> FaultReport {
        error!(
            "PAGE FAULT: faulted on address {}. ip = {}. Killing context.",
            self.address, self.ip
        );
        error!(
            "PAGE FAULT: err={:#x}: {}",
            self.error.into_bits(),
            self.error.explain()
        );

        let area = vm.find_area_by_address(self.address);
        match &area {
            Some((space, info)) => error!("PAGE FAULT: inside '{}' of space {space}", info.name),
            None => error!("PAGE FAULT: no area covers {}", self.address),
        }

        self.state = FaultState::Fatal;
        FaultReport {
            address: self.address,
            ip: self.ip,
            error: self.error,
            area,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_decoding() {
        let err = PageFaultError::from_bits(0b0000_0110);
        assert!(!err.present());
        assert!(err.write());
        assert!(err.user());
        assert_eq!(err.explain(), "Non-present page");

        let nx = PageFaultError::new()
            .with_present(true)
            .with_instruction_fetch(true);
        assert_eq!(nx.into_bits(), 0b1_0001);
        assert_eq!(nx.explain(), "Kernel instruction fetch on protected page");

        let rsvd = PageFaultError::new().with_present(true).with_reserved_bit(true);
        assert_eq!(rsvd.explain(), "Reserved bit set in a paging structure");
    }
}
