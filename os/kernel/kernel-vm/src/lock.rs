//! Area protection flags.

bitflags::bitflags! {
    /// Access permissions attached to an area and passed down to the mapping
    /// layer for every page of it.
    ///
    /// The empty set means user-accessible and read-only.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct LockFlags: u32 {
        /// Pages are writable.
        const RW     = 1 << 0;
        /// Pages are only accessible from supervisor mode.
        const KERNEL = 1 << 1;
    }
}

impl LockFlags {
    /// Read-only, user accessible.
    pub const RO: Self = Self::empty();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_bits_are_rejected() {
        assert_eq!(LockFlags::from_bits(0b11), Some(LockFlags::RW | LockFlags::KERNEL));
        assert_eq!(LockFlags::from_bits(0b100), None);
        assert!(LockFlags::from_bits_retain(0b101).contains(LockFlags::RW));
    }
}
