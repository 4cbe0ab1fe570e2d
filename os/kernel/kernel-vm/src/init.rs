//! # VM bootstrap
//!
//! [`vm_init`] turns the loader's [`KernelArgs`] into a running
//! [`VirtualMemory`]:
//!
//! 1. size and place the frame table using the early boot allocator,
//! 2. mark RAM holes and everything the loader already handed out as in use,
//! 3. back the kernel heap with fresh frames and hand it to the allocator,
//! 4. create `kernel_land` and record what the loader mapped as areas,
//! 5. import the boot directory, taking its frames over from the loader.
//!
//! Everything here runs on the bootstrap processor before other CPUs start.
//! Failures are not recoverable at this stage and halt.

use crate::area::{AddressPolicy, AreaRequest, AreaSource};
use crate::aspace::AddressSpace;
use crate::bootmem::EarlyBootAllocator;
use crate::frame_alloc::{FrameAllocator, FrameError};
use crate::lock::LockFlags;
use crate::platform::Platform;
use crate::vm::VirtualMemory;
use alloc::format;
use alloc::string::String;
use core::fmt;
use kernel_info::boot::{AddrRange, KernelArgs};
use kernel_info::memory::{KERNEL_HEAP_SIZE, PAGE_SIZE};
use kernel_memory_addresses::{
    PageFrame, PhysicalAddress, VirtualAddress, page_round_down, page_round_up, pages_for,
};
use kernel_sync::SyncOnceCell;
use log::{debug, info};

/// Bytes per frame-table slot.
const SLOT_SIZE: u64 = size_of::<u32>() as u64;

static KERNEL_VM: SyncOnceCell<VirtualMemory> = SyncOnceCell::new();

/// Bring up the VM subsystem.
///
/// # Panics
/// If `ka` describes no physical memory, if the early allocator runs dry,
/// or if any of the boot-time areas cannot be registered.
#[must_use]
pub fn vm_init(ka: &mut KernelArgs, platform: &'static dyn Platform) -> VirtualMemory {
    info!("vm_init: entry");
    platform.arch_init(ka);

    let (first_frame, entries) = frame_table_extent(ka);
    info!(
        "vm_init: frame table covers {entries:#x} frames starting at {}",
        first_frame.base()
    );

    let table_size = entries * SLOT_SIZE;
    let table_va = EarlyBootAllocator::new(ka).alloc_and_map(
        table_size,
        LockFlags::KERNEL | LockFlags::RW,
        platform,
    );
    #[allow(clippy::cast_possible_truncation)]
    // SAFETY: `alloc_and_map` just mapped `table_size` bytes of fresh frames
    // at `table_va`; nothing else refers to them.
    let table = unsafe { platform.frame_table(table_va, entries as usize) };
    let mut frames = FrameAllocator::new(table, first_frame);

    mark_ram_holes(&mut frames, ka);
    mark_loader_allocations(&mut frames, ka);
    info!(
        "vm_init: {:#x} of {:#x} frames free",
        frames.free_count(),
        frames.total_frames()
    );

    let heap_base = map_kernel_heap(&mut frames, ka, platform);
    // SAFETY: the range was reserved and mapped read-write just above.
    unsafe { platform.heap_init(heap_base, KERNEL_HEAP_SIZE) };

    let vm = VirtualMemory::new(platform, frames);
    let kspace = vm.create_kernel_space();
    platform.arch_init_post_heap(ka);

    register_mapped(&vm, &kspace, "kernel_heap", heap_base.as_u64(), KERNEL_HEAP_SIZE);
    register_mapped(&vm, &kspace, "free_page_table", table_va.as_u64(), table_size);
    register_mapped(
        &vm,
        &kspace,
        "kernel_seg0",
        ka.kernel_seg0_addr.start,
        ka.kernel_seg0_addr.size,
    );
    register_mapped(
        &vm,
        &kspace,
        "kernel_seg1",
        ka.kernel_seg1_addr.start,
        ka.kernel_seg1_addr.size,
    );
    for (i, stack) in ka.cpu_kstacks().iter().enumerate() {
        let name = format!("idle_thread{i}_kstack");
        register_mapped(&vm, &kspace, &name, stack.start, stack.size);
    }

    let bootdir = ka.bootdir_addr;
    if bootdir.size != 0 {
        release_loader_reservation(&vm, bootdir);
        if let Err(e) = vm.map_physical_memory(
            &kspace,
            "bootdir",
            AddressPolicy::Any,
            bootdir.size,
            LockFlags::KERNEL,
            PhysicalAddress::new(bootdir.start),
        ) {
            panic!("vm_init: cannot map the boot directory: {e}");
        }
    }

    let mut log = LogLines::default();
    let _ = kspace.dump_areas(&mut log);
    log.flush();

    info!("vm_init: exit");
    vm
}

impl VirtualMemory {
    /// Second init stage, once semaphores exist.
    pub fn init_post_sem(&self, ka: &KernelArgs) {
        self.platform().heap_init_post_sem(ka);
    }
}

/// Make `vm` the process-wide instance.
///
/// # Panics
/// If an instance is already installed.
pub fn install(vm: VirtualMemory) -> &'static VirtualMemory {
    match KERNEL_VM.set(vm) {
        Ok(vm) => vm,
        Err(_) => panic!("kernel VM installed twice"),
    }
}

/// The process-wide instance, once [`install`]ed.
#[must_use]
pub fn kernel_vm() -> Option<&'static VirtualMemory> {
    KERNEL_VM.get()
}

/// First frame and number of frames between the lowest and the highest
/// byte of RAM.
fn frame_table_extent(ka: &KernelArgs) -> (PageFrame, u64) {
    let ranges = ka.phys_mem_ranges();
    let (Some(first), Some(last)) = (ranges.first(), ranges.last()) else {
        panic!("vm_init: no physical memory ranges");
    };
    let base = first.start / PAGE_SIZE;
    let last_page = last.end() / PAGE_SIZE - 1;
    (PageFrame::new(base), last_page - base + 1)
}

/// Frames between two RAM ranges do not exist and must never be handed out.
fn mark_ram_holes(frames: &mut FrameAllocator, ka: &KernelArgs) {
    for pair in ka.phys_mem_ranges().windows(2) {
        let start = pages_for(pair[0].end());
        let end = pair[1].start / PAGE_SIZE;
        if end > start {
            mark(frames, start, end - start);
        }
    }
}

/// Everything the loader and the early allocator took.
fn mark_loader_allocations(frames: &mut FrameAllocator, ka: &KernelArgs) {
    for range in ka.phys_alloc_ranges() {
        let (start, end) = frame_span(*range);
        mark(frames, start, end - start);
    }
}

/// Hand the boot directory's frames from the loader's reservation over to
/// the area about to import them. Nothing allocates in between.
fn release_loader_reservation(vm: &VirtualMemory, range: AddrRange) {
    let (start, end) = frame_span(range);
    let first = PageFrame::new(start);
    let result = vm.with_frames(|f| {
        if (start..end).all(|n| f.is_in_use(PageFrame::new(n))) {
            f.free_range(first, end - start)
        } else {
            Ok(())
        }
    });
    match result {
        Ok(()) | Err(FrameError::OutOfRange { .. }) => {}
        Err(e) => panic!("vm_init: releasing the boot directory frames: {e}"),
    }
}

/// `[first, end)` frame numbers touched by `range`.
const fn frame_span(range: AddrRange) -> (u64, u64) {
    (
        range.start / PAGE_SIZE,
        pages_for(range.start + range.size),
    )
}

fn mark(frames: &mut FrameAllocator, first: u64, count: u64) {
    if count == 0 {
        return;
    }
    if let Err(e) = frames.mark_range_in_use(PageFrame::new(first), count) {
        panic!("vm_init: marking {count:#x} frames at {:#x}: {e}", first * PAGE_SIZE);
    }
}

fn map_kernel_heap(
    frames: &mut FrameAllocator,
    ka: &mut KernelArgs,
    platform: &dyn Platform,
) -> VirtualAddress {
    let Some(base) = EarlyBootAllocator::new(ka).alloc_vspace(KERNEL_HEAP_SIZE) else {
        panic!("vm_init: no virtual space for the kernel heap");
    };

    let mut va = base;
    for _ in 0..pages_for(KERNEL_HEAP_SIZE) {
        let frame = match frames.alloc_one() {
            Ok(frame) => frame,
            Err(e) => panic!("vm_init: backing the kernel heap: {e}"),
        };
        if let Err(e) = platform.map_page(frame.base(), va, LockFlags::KERNEL | LockFlags::RW) {
            panic!("vm_init: mapping the kernel heap: {e}");
        }
        va += PAGE_SIZE;
    }
    debug!("vm_init: kernel heap at {base} (+{KERNEL_HEAP_SIZE:#x})");
    base
}

/// Record a range the loader or the bootstrap already mapped.
fn register_mapped(vm: &VirtualMemory, kspace: &AddressSpace, name: &str, start: u64, size: u64) {
    if size == 0 {
        debug!("vm_init: skipping empty '{name}'");
        return;
    }
    let base = page_round_down(start);
    let size = page_round_up(start + size) - base;
    let request = AreaRequest::new(name, size)
        .exact(VirtualAddress::new(base))
        .lock(LockFlags::KERNEL | LockFlags::RW)
        .source(AreaSource::AlreadyMapped);
    if let Err(e) = vm.create_area(kspace, request) {
        panic!("vm_init: cannot register '{name}' at {base:#x}: {e}");
    }
}

/// Forwards formatted text to the log, one record per line.
#[derive(Default)]
struct LogLines {
    line: String,
}

impl LogLines {
    fn flush(&mut self) {
        if !self.line.is_empty() {
            info!("{}", self.line);
            self.line.clear();
        }
    }
}

impl fmt::Write for LogLines {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut rest = s;
        while let Some(nl) = rest.find('\n') {
            self.line.push_str(&rest[..nl]);
            info!("{}", self.line);
            self.line.clear();
            rest = &rest[nl + 1..];
        }
        self.line.push_str(rest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaked_frames(count: usize, base: u64) -> FrameAllocator {
        let table = Box::leak(vec![0u32; count].into_boxed_slice());
        FrameAllocator::new(table, PageFrame::new(base))
    }

    #[test]
    fn extent_spans_first_to_last_range() {
        let mut ka = KernelArgs::default();
        ka.push_phys_mem_range(AddrRange::new(0x1000, 0x9_f000)).unwrap();
        ka.push_phys_mem_range(AddrRange::new(0x10_0000, 0x70_0000)).unwrap();
        let (first, entries) = frame_table_extent(&ka);
        assert_eq!(first, PageFrame::new(1));
        assert_eq!(entries, 0x800 - 1);
    }

    #[test]
    fn holes_between_ram_ranges_are_in_use() {
        let mut ka = KernelArgs::default();
        ka.push_phys_mem_range(AddrRange::new(0, 0x4000)).unwrap();
        ka.push_phys_mem_range(AddrRange::new(0x6000, 0x2000)).unwrap();
        let mut frames = leaked_frames(8, 0);
        mark_ram_holes(&mut frames, &ka);
        assert!(frames.is_in_use(PageFrame::new(4)));
        assert!(frames.is_in_use(PageFrame::new(5)));
        assert!(!frames.is_in_use(PageFrame::new(3)));
        assert!(!frames.is_in_use(PageFrame::new(6)));
        assert_eq!(frames.free_count(), 6);
    }

    #[test]
    fn loader_allocations_are_in_use() {
        let mut ka = KernelArgs::default();
        ka.push_phys_alloc_range(AddrRange::new(0x1000, 0x2800)).unwrap();
        ka.push_phys_alloc_range(AddrRange::new(0x6000, 0x1000)).unwrap();
        let mut frames = leaked_frames(10, 0);
        mark_loader_allocations(&mut frames, &ka);

        let in_use: Vec<u64> = (0..10)
            .filter(|&f| frames.is_in_use(PageFrame::new(f)))
            .collect();
        assert_eq!(in_use, [1, 2, 3, 6]);
    }

    #[test]
    fn log_lines_split_on_newlines() {
        use core::fmt::Write;
        let mut log = LogLines::default();
        write!(log, "a\nb").unwrap();
        assert_eq!(log.line, "b");
        writeln!(log, "c").unwrap();
        assert!(log.line.is_empty());
    }
}
