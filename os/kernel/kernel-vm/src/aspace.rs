//! # Address spaces
//!
//! An address space owns its areas in a map keyed by base address, so every
//! hole or overlap search is one ascending walk. The map sits behind a
//! per-space [`SpinLock`]; placement and insertion happen under a single
//! acquisition so two creators cannot both claim the same hole.

use crate::area::{AddressPolicy, Area, AreaId, AreaInfo};
use crate::error::VmError;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct AspaceId(u32);

impl From<u32> for AspaceId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for AspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

type AreaMap = BTreeMap<u64, Area>;

pub struct AddressSpace {
    id: AspaceId,
    name: String,
    base: VirtualAddress,
    size: u64,
    areas: SpinLock<AreaMap>,
}

impl AddressSpace {
    /// # Panics
    /// If the space is empty or wraps past the end of the address range.
    pub(crate) fn new(id: AspaceId, name: &str, base: VirtualAddress, size: u64) -> Self {
        assert!(size > 0, "address space '{name}' is empty");
        assert!(
            base.checked_add(size - 1).is_some(),
            "address space '{name}' wraps around"
        );
        Self {
            id,
            name: String::from(name),
            base,
            size,
            areas: SpinLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub const fn id(&self) -> AspaceId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Last byte of the space.
    #[must_use]
    pub const fn last(&self) -> u64 {
        self.base.as_u64() + (self.size - 1)
    }

    #[must_use]
    pub fn area_count(&self) -> usize {
        self.areas.lock().len()
    }

    /// Snapshot of every area, ascending by base.
    #[must_use]
    pub fn areas(&self) -> Vec<AreaInfo> {
        self.areas.lock().values().map(Area::info).collect()
    }

    /// First area (by base) called `name`.
    #[must_use]
    pub fn find_area_by_name(&self, name: &str) -> Option<AreaInfo> {
        self.areas
            .lock()
            .values()
            .find(|a| a.name == name)
            .map(Area::info)
    }

    /// The area covering `va`, if any.
    #[must_use]
    pub fn find_area_by_address(&self, va: VirtualAddress) -> Option<AreaInfo> {
        let areas = self.areas.lock();
        areas
            .range(..=va.as_u64())
            .next_back()
            .map(|(_, a)| a)
            .filter(|a| a.contains(va))
            .map(Area::info)
    }

    /// Write the area listing of this space to `out`.
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn dump_areas(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "area dump of address space '{}', base {:#x}, size {:#x}:",
            self.name,
            self.base.as_u64(),
            self.size
        )?;
        for area in self.areas() {
            writeln!(out, "{area}")?;
        }
        Ok(())
    }

    /// Place a `size`-byte area according to `policy` and insert the area
    /// built by `make` for that base.
    pub(crate) fn reserve(
        &self,
        policy: AddressPolicy,
        size: u64,
        make: impl FnOnce(VirtualAddress) -> Area,
    ) -> Result<VirtualAddress, VmError> {
        let mut areas = self.areas.lock();
        let base = match policy {
            AddressPolicy::Any => self
                .find_hole(&areas, size)
                .ok_or(VmError::NoVirtualSpace { size })?,
            AddressPolicy::Exact(base) => {
                if !self.fits(base, size) {
                    return Err(VmError::OutOfBounds { base, size });
                }
                base
            }
        };
        let area = make(base);
        insert(&mut areas, area)?;
        Ok(base)
    }

    /// Whether `[base, base + size)` lies inside the space.
    fn fits(&self, base: VirtualAddress, size: u64) -> bool {
        let Some(offset) = base.as_u64().checked_sub(self.base.as_u64()) else {
            return false;
        };
        size <= self.size && offset <= self.size - size
    }

    /// Hole search for [`AddressPolicy::Any`].
    ///
    /// The start of the space is tried first, and only when the first area
    /// does not already sit there. After that the walk takes the first gap
    /// behind an area that fits, up to the end of the space.
    fn find_hole(&self, areas: &AreaMap, size: u64) -> Option<VirtualAddress> {
        if size > self.size {
            return None;
        }
        let Some(first) = areas.values().next() else {
            return Some(self.base);
        };
        if first.base > self.base && first.base.as_u64() - self.base.as_u64() >= size {
            return Some(self.base);
        }

        let mut iter = areas.values().peekable();
        while let Some(a) = iter.next() {
            let fits = match iter.peek() {
                Some(next) => next.base.as_u64() - a.last() - 1 >= size,
                None => a.last() < self.last() && self.last() - a.last() >= size,
            };
            if fits {
                return Some(VirtualAddress::new(a.last() + 1));
            }
        }
        None
    }

    /// Remove area `id`, whether or not it is still being populated.
    pub(crate) fn remove(&self, id: AreaId) -> Option<Area> {
        let mut areas = self.areas.lock();
        let key = areas.iter().find(|(_, a)| a.id == id).map(|(&k, _)| k)?;
        areas.remove(&key)
    }

    /// Remove a fully created area `id`.
    pub(crate) fn remove_populated(&self, id: AreaId) -> Result<Area, VmError> {
        let mut areas = self.areas.lock();
        let (&key, area) = areas
            .iter()
            .find(|(_, a)| a.id == id)
            .ok_or(VmError::NoSuchArea(id))?;
        if area.populating {
            return Err(VmError::AreaBusy(id));
        }
        areas.remove(&key).ok_or(VmError::NoSuchArea(id))
    }

    /// Mark area `id` as fully created.
    pub(crate) fn publish(&self, id: AreaId) -> Option<AreaInfo> {
        let mut areas = self.areas.lock();
        let area = areas.values_mut().find(|a| a.id == id)?;
        area.populating = false;
        Some(area.info())
    }

    /// Remove every fully created area. Areas still being populated stay
    /// behind for their creator to clean up.
    pub(crate) fn take_populated(&self) -> Vec<Area> {
        let mut areas = self.areas.lock();
        let keys: Vec<u64> = areas
            .iter()
            .filter(|(_, a)| !a.populating)
            .map(|(&k, _)| k)
            .collect();
        keys.iter().filter_map(|k| areas.remove(k)).collect()
    }
}

/// Insert `area`, refusing if it would touch its predecessor or successor.
fn insert(areas: &mut AreaMap, area: Area) -> Result<(), VmError> {
    let base = area.base.as_u64();
    let overlap = VmError::Overlap {
        base: area.base,
        size: area.size,
    };

    if let Some((_, prev)) = areas.range(..=base).next_back()
        && prev.last() >= base
    {
        return Err(overlap);
    }
    if let Some((_, next)) = areas.range(base + 1..).next()
        && area.last() >= next.base.as_u64()
    {
        return Err(overlap);
    }
    areas.insert(base, area);
    Ok(())
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base", &self.base)
            .field("size", &format_args!("{:#x}", self.size))
            .finish_non_exhaustive()
    }
}
