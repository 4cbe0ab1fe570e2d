//! Areas: named, permission-tagged ranges inside one address space.

use crate::lock::LockFlags;
use crate::store::Store;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct AreaId(u32);

impl From<u32> for AreaId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where the area goes in its address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressPolicy {
    /// First hole that fits.
    Any,
    /// Exactly at the given base.
    Exact(VirtualAddress),
}

/// Where the frames behind the area come from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AreaSource {
    /// Fresh frames, one at a time, not necessarily contiguous.
    Any,
    /// One physically contiguous run. Failing to find it halts.
    Contiguous,
    /// An existing physical range, e.g. device memory or boot images.
    Physical(PhysicalAddress),
    /// Mappings that already exist; the area is pure bookkeeping.
    AlreadyMapped,
}

impl AreaSource {
    /// Whether removing the area returns its frames to the allocator.
    #[must_use]
    pub const fn owns_frames(self) -> bool {
        matches!(self, Self::Any | Self::Contiguous)
    }

    /// Whether the area installed its own mappings.
    #[must_use]
    pub const fn owns_mappings(self) -> bool {
        !matches!(self, Self::AlreadyMapped)
    }
}

/// Parameters of an area-creation call.
///
/// ```
/// # use kernel_vm::{AreaRequest, AreaSource, LockFlags};
/// # use kernel_memory_addresses::VirtualAddress;
/// let req = AreaRequest::new("stack", 0x4000)
///     .exact(VirtualAddress::new(0x8000_0000))
///     .lock(LockFlags::RW)
///     .source(AreaSource::Contiguous);
/// assert_eq!(req.size(), 0x4000);
/// ```
#[derive(Debug, Clone)]
pub struct AreaRequest {
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) address: AddressPolicy,
    pub(crate) lock: LockFlags,
    pub(crate) source: AreaSource,
    pub(crate) store: Option<Arc<Store>>,
}

impl AreaRequest {
    /// Anywhere, fresh frames, kernel read-write, no store.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            address: AddressPolicy::Any,
            lock: LockFlags::RW | LockFlags::KERNEL,
            source: AreaSource::Any,
            store: None,
        }
    }

    #[must_use]
    pub const fn exact(mut self, base: VirtualAddress) -> Self {
        self.address = AddressPolicy::Exact(base);
        self
    }

    #[must_use]
    pub const fn address(mut self, policy: AddressPolicy) -> Self {
        self.address = policy;
        self
    }

    #[must_use]
    pub const fn lock(mut self, lock: LockFlags) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub const fn source(mut self, source: AreaSource) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

#[derive(Debug)]
pub struct Area {
    pub(crate) id: AreaId,
    pub(crate) name: String,
    pub(crate) base: VirtualAddress,
    pub(crate) size: u64,
    pub(crate) lock: LockFlags,
    pub(crate) source: AreaSource,
    pub(crate) store: Option<Arc<Store>>,
    /// Set while `create_area` is still backing the area. Such an area
    /// cannot be deleted.
    pub(crate) populating: bool,
}

impl Area {
    /// Last byte covered by the area. Areas are never empty.
    #[inline]
    pub(crate) const fn last(&self) -> u64 {
        self.base.as_u64() + (self.size - 1)
    }

    #[inline]
    pub(crate) const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.base.as_u64() && va.as_u64() <= self.last()
    }

    pub(crate) fn info(&self) -> AreaInfo {
        AreaInfo {
            id: self.id,
            name: self.name.clone(),
            base: self.base,
            size: self.size,
            lock: self.lock,
            source: self.source,
        }
    }
}

/// Snapshot of an area, detached from the address-space lock.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AreaInfo {
    pub id: AreaId,
    pub name: String,
    pub base: VirtualAddress,
    pub size: u64,
    pub lock: LockFlags,
    pub source: AreaSource,
}

impl fmt::Display for AreaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "area {}: base_addr = {:#x} size = {:#x} name = '{}' lock = {:#x}",
            self.id,
            self.base.as_u64(),
            self.size,
            self.name,
            self.lock.bits()
        )
    }
}
