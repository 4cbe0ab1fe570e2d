//! # The VM instance
//!
//! [`VirtualMemory`] ties the frame allocator, the address-space registry and
//! the platform together. Lock order: the registry lock and a space lock may
//! nest in that order; the frame lock is never held together with either.
//! Store operations run with no lock held.

use crate::area::{AddressPolicy, Area, AreaId, AreaInfo, AreaRequest, AreaSource};
use crate::aspace::{AddressSpace, AspaceId};
use crate::error::VmError;
use crate::frame_alloc::{FrameAllocator, FrameError};
use crate::lock::LockFlags;
use crate::platform::Platform;
use crate::store::Store;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::memory::{KERNEL_BASE, KERNEL_SIZE, PAGE_SIZE};
use kernel_memory_addresses::{
    PageFrame, PhysicalAddress, VirtualAddress, page_round_up, pages_for,
};
use kernel_sync::{SpinLock, SyncOnceCell};
use log::{debug, warn};

/// Name of the kernel address space.
pub const KERNEL_ASPACE_NAME: &str = "kernel_land";

pub struct VirtualMemory {
    platform: &'static dyn Platform,
    frames: SpinLock<FrameAllocator>,
    /// Most recently created space first.
    spaces: SpinLock<Vec<Arc<AddressSpace>>>,
    kernel_space: SyncOnceCell<Arc<AddressSpace>>,
    next_aspace_id: AtomicU32,
    next_area_id: AtomicU32,
}

impl VirtualMemory {
    #[must_use]
    pub const fn new(platform: &'static dyn Platform, frames: FrameAllocator) -> Self {
        Self {
            platform,
            frames: SpinLock::new(frames),
            spaces: SpinLock::new(Vec::new()),
            kernel_space: SyncOnceCell::new(),
            next_aspace_id: AtomicU32::new(0),
            next_area_id: AtomicU32::new(0),
        }
    }

    #[must_use]
    pub fn platform(&self) -> &'static dyn Platform {
        self.platform
    }

    /// Run `f` with the frame allocator locked.
    pub fn with_frames<R>(&self, f: impl FnOnce(&mut FrameAllocator) -> R) -> R {
        self.frames.with_lock(f)
    }

    /// Create an empty address space and register it.
    pub fn create_address_space(
        &self,
        name: &str,
        base: VirtualAddress,
        size: u64,
    ) -> Arc<AddressSpace> {
        let id = AspaceId::from(self.next_aspace_id.fetch_add(1, Ordering::Relaxed));
        let space = Arc::new(AddressSpace::new(id, name, base, size));
        self.spaces.lock().insert(0, Arc::clone(&space));
        debug!("created address space {id} '{name}' at {base} (+{size:#x})");
        space
    }

    /// Create `kernel_land`, covering the whole kernel half.
    ///
    /// # Panics
    /// If the kernel space already exists.
    pub fn create_kernel_space(&self) -> Arc<AddressSpace> {
        let space = self.create_address_space(
            KERNEL_ASPACE_NAME,
            VirtualAddress::new(KERNEL_BASE),
            KERNEL_SIZE,
        );
        match self.kernel_space.set(Arc::clone(&space)) {
            Ok(_) => space,
            Err(_) => panic!("kernel address space created twice"),
        }
    }

    #[must_use]
    pub fn kernel_space(&self) -> Option<&Arc<AddressSpace>> {
        self.kernel_space.get()
    }

    /// Snapshot of the registry, most recent first.
    #[must_use]
    pub fn address_spaces(&self) -> Vec<Arc<AddressSpace>> {
        self.spaces.lock().clone()
    }

    #[must_use]
    pub fn find_address_space(&self, id: AspaceId) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().iter().find(|s| s.id() == id).cloned()
    }

    #[must_use]
    pub fn find_address_space_by_name(&self, name: &str) -> Option<Arc<AddressSpace>> {
        self.spaces.lock().iter().find(|s| s.name() == name).cloned()
    }

    /// Find the area covering `va` in any registered space.
    #[must_use]
    pub fn find_area_by_address(&self, va: VirtualAddress) -> Option<(AspaceId, AreaInfo)> {
        self.address_spaces()
            .iter()
            .find_map(|s| s.find_area_by_address(va).map(|a| (s.id(), a)))
    }

    /// Create an area in `space`, then back it according to its source.
    ///
    /// # Errors
    /// * [`VmError::ZeroSize`], [`VmError::InvalidPolicy`],
    ///   [`VmError::OutOfBounds`], [`VmError::Overlap`] and
    ///   [`VmError::NoVirtualSpace`] for placement problems.
    /// * [`VmError::OutOfMemory`] when fresh frames run out. The area is
    ///   removed again and its frames released.
    /// * [`VmError::Frame`] / [`VmError::Map`] when a physical import or a
    ///   mapping fails. The area is removed again.
    /// * [`VmError::NoSuchAddressSpace`] if `space` was deleted while the
    ///   area was being backed.
    ///
    /// # Panics
    /// On lock flags outside [`LockFlags::all`], on a failed contiguous
    /// allocation and on frame-allocator invariant violations.
    pub fn create_area(
        &self,
        space: &AddressSpace,
        request: AreaRequest,
    ) -> Result<AreaInfo, VmError> {
        let AreaRequest {
            name,
            size,
            address,
            lock,
            source,
            store,
        } = request;

        assert!(
            LockFlags::all().contains(lock),
            "create_area '{name}': invalid lock flags {:#x}",
            lock.bits()
        );
        let size = page_round_up(size);
        if size == 0 {
            discard(store);
            return Err(VmError::ZeroSize);
        }
        if source == AreaSource::AlreadyMapped && address == AddressPolicy::Any {
            discard(store);
            return Err(VmError::InvalidPolicy);
        }

        debug!(
            "create_area: '{name}' in '{}', {address:?}, size {size:#x}, {source:?}",
            space.name()
        );

        let id = AreaId::from(self.next_area_id.fetch_add(1, Ordering::Relaxed));
        let committer = store.clone();
        let reserved = space.reserve(address, size, |base| Area {
            id,
            name,
            base,
            size,
            lock,
            source,
            store,
            populating: true,
        });
        let base = match reserved {
            Ok(base) => base,
            Err(e) => {
                discard(committer);
                return Err(e);
            }
        };

        if let Err(e) = self.populate(base, size, lock, source) {
            drop(committer);
            if let Some(area) = space.remove(id) {
                self.dispose(area);
            }
            return Err(e);
        }

        // Still unpublished, so no one else can drop the area's reference.
        if let Some(store) = committer {
            store.commit(size);
        }

        let info = space.publish(id).ok_or(VmError::NoSuchArea(id))?;
        if self.find_address_space(space.id()).is_none() {
            // The space was deleted while the area was populated.
            if let Some(area) = space.remove(id) {
                self.dispose(area);
            }
            return Err(VmError::NoSuchAddressSpace(space.id()));
        }
        Ok(info)
    }

    /// Import the physical range at `pa` into `space`.
    ///
    /// # Errors
    /// See [`VirtualMemory::create_area`].
    pub fn map_physical_memory(
        &self,
        space: &AddressSpace,
        name: &str,
        address: AddressPolicy,
        size: u64,
        lock: LockFlags,
        pa: PhysicalAddress,
    ) -> Result<AreaInfo, VmError> {
        let request = AreaRequest::new(name, size)
            .address(address)
            .lock(lock)
            .source(AreaSource::Physical(pa));
        self.create_area(space, request)
    }

    /// Back a freshly reserved range with frames and map it.
    fn populate(
        &self,
        base: VirtualAddress,
        size: u64,
        lock: LockFlags,
        source: AreaSource,
    ) -> Result<(), VmError> {
        let pages = pages_for(size);
        match source {
            AreaSource::AlreadyMapped => Ok(()),
            AreaSource::Any => {
                let mut va = base;
                for _ in 0..pages {
                    let frame = match self.frames.with_lock(FrameAllocator::alloc_one) {
                        Ok(frame) => frame,
                        Err(FrameError::Exhausted) => return Err(VmError::OutOfMemory),
                        Err(e) => panic!("frame allocator: {e}"),
                    };
                    if let Err(e) = self.platform.map_page(frame.base(), va, lock) {
                        self.free_frames(frame, 1);
                        return Err(e.into());
                    }
                    va += PAGE_SIZE;
                }
                Ok(())
            }
            AreaSource::Contiguous => {
                let first = match self.frames.with_lock(|f| f.alloc_contiguous_run(pages)) {
                    Ok(first) => first,
                    Err(e) => panic!("create_area: no contiguous run of {pages} frames: {e}"),
                };
                self.map_run(base, first.base(), pages, lock)
                    .map_err(|(mapped, e)| {
                        self.free_frames(first + mapped, pages - mapped);
                        e
                    })
            }
            AreaSource::Physical(pa) => {
                let first = pa.frame();
                let tracked = match self.frames.with_lock(|f| f.mark_range_in_use(first, pages)) {
                    Ok(()) => true,
                    Err(e) if e.is_fatal() => panic!("create_area: importing {pa}: {e}"),
                    Err(FrameError::OutOfRange { .. }) if self.outside_frame_table(first, pages) => {
                        debug!("create_area: {pa} is not managed memory, mapping as is");
                        false
                    }
                    Err(e) => return Err(e.into()),
                };
                self.map_run(base, pa.align_down(), pages, lock)
                    .map_err(|(_, e)| {
                        if tracked {
                            self.free_frames(first, pages);
                        }
                        e
                    })
            }
        }
    }

    /// Map `pages` consecutive pages. On failure, reports how many pages were
    /// mapped before the error.
    fn map_run(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        pages: u64,
        lock: LockFlags,
    ) -> Result<(), (u64, VmError)> {
        for i in 0..pages {
            self.platform
                .map_page(pa + i * PAGE_SIZE, va + i * PAGE_SIZE, lock)
                .map_err(|e| (i, VmError::from(e)))?;
        }
        Ok(())
    }

    fn outside_frame_table(&self, first: PageFrame, pages: u64) -> bool {
        self.frames.with_lock(|f| {
            let base = f.base().as_u64();
            let end = base + u64::from(f.total_frames());
            first.as_u64() >= end || first.as_u64().saturating_add(pages) <= base
        })
    }

    fn free_frames(&self, first: PageFrame, count: u64) {
        if let Err(e) = self.frames.with_lock(|f| f.free_range(first, count)) {
            panic!("releasing frames at {first}: {e}");
        }
    }

    /// Undo the mappings (and, for owned memory, the frames) of `area`.
    fn release(&self, area: &Area) {
        if !area.source.owns_mappings() {
            return;
        }
        let mut va = area.base;
        for _ in 0..pages_for(area.size) {
            if let Some(pa) = self.platform.query_mapping(va) {
                if let Err(e) = self.platform.unmap_page(va) {
                    warn!("release '{}': {e}", area.name);
                }
                if area.source.owns_frames() {
                    self.free_frames(pa.frame(), 1);
                }
            }
            va += PAGE_SIZE;
        }
    }

    fn dispose(&self, area: Area) {
        self.release(&area);
        discard(area.store);
    }

    /// Remove an area and release what it owns.
    ///
    /// # Errors
    /// [`VmError::NoSuchArea`] if `space` holds no area `id`,
    /// [`VmError::AreaBusy`] if the area is still being created.
    pub fn delete_area(&self, space: &AddressSpace, id: AreaId) -> Result<(), VmError> {
        let area = space.remove_populated(id)?;
        debug!("delete_area: '{}' at {}", area.name, area.base);
        self.dispose(area);
        Ok(())
    }

    /// Unregister a space and delete all of its areas.
    ///
    /// # Errors
    /// [`VmError::KernelSpace`] for the kernel space,
    /// [`VmError::NoSuchAddressSpace`] if `id` is not registered.
    pub fn delete_address_space(&self, id: AspaceId) -> Result<(), VmError> {
        if self.kernel_space().is_some_and(|k| k.id() == id) {
            return Err(VmError::KernelSpace);
        }
        let space = {
            let mut spaces = self.spaces.lock();
            let index = spaces
                .iter()
                .position(|s| s.id() == id)
                .ok_or(VmError::NoSuchAddressSpace(id))?;
            spaces.remove(index)
        };
        for area in space.take_populated() {
            self.dispose(area);
        }
        debug!("deleted address space {id} '{}'", space.name());
        Ok(())
    }

    /// Physical address `va` translates to.
    #[must_use]
    pub fn get_page_mapping(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.platform.query_mapping(va)
    }

    /// Write one line per registered space to `out`.
    ///
    /// # Errors
    /// Whatever `out` reports.
    pub fn dump_address_spaces(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "id\t{:>32}\tbase\tsize\t\tarea_count", "name")?;
        for space in self.address_spaces() {
            writeln!(
                out,
                "{}\t{:>32}\t{:#x}\t{:#x}\t{:#x}",
                space.id(),
                space.name(),
                space.base().as_u64(),
                space.size(),
                space.area_count()
            )?;
        }
        Ok(())
    }
}

/// Drop a store reference that never made it into an area.
fn discard(store: Option<Arc<Store>>) {
    if let Some(store) = store {
        Store::destroy_if_unreferenced(store);
    }
}

impl fmt::Debug for VirtualMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualMemory")
            .field("frames", &self.frames)
            .field("spaces", &self.spaces.lock().len())
            .finish_non_exhaustive()
    }
}
