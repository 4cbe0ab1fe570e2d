mod common;

use common::MockPlatform;
use kernel_info::boot::{AddrRange, KernelArgs};
use kernel_info::memory::{KERNEL_BASE, KERNEL_HEAP_SIZE};
use kernel_memory_addresses::{PageFrame, VirtualAddress};
use kernel_vm::{AreaSource, KERNEL_ASPACE_NAME, LockFlags, install, kernel_vm, vm_init};
use std::sync::atomic::Ordering;

/// 640 KiB of low memory, 15 MiB above 1 MiB, the kernel image and the boot
/// directory loaded at 1 MiB.
fn kernel_args() -> KernelArgs {
    let mut ka = KernelArgs::default();
    ka.push_phys_mem_range(AddrRange::new(0, 0xa_0000)).unwrap();
    ka.push_phys_mem_range(AddrRange::new(0x10_0000, 0xf0_0000))
        .unwrap();
    ka.push_phys_alloc_range(AddrRange::new(0x10_0000, 0x10_0000))
        .unwrap();
    ka.push_virt_alloc_range(AddrRange::new(KERNEL_BASE, 0x20_0000))
        .unwrap();
    ka.kernel_seg0_addr = AddrRange::new(KERNEL_BASE, 0x10_0000);
    ka.kernel_seg1_addr = AddrRange::new(KERNEL_BASE + 0x10_0000, 0x7_f800);
    ka.push_cpu_kstack(AddrRange::new(KERNEL_BASE + 0x18_0000, 0x4000))
        .unwrap();
    ka.bootdir_addr = AddrRange::new(0x18_0000, 0x1_0000);
    ka
}

#[test]
fn vm_init_builds_the_kernel_space() {
    let platform = MockPlatform::leaked();
    let mut ka = kernel_args();
    let vm = vm_init(&mut ka, platform);

    assert_eq!(platform.arch_init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(platform.post_heap_calls.load(Ordering::SeqCst), 1);

    let heap_base = VirtualAddress::new(KERNEL_BASE + 0x20_4000);
    assert_eq!(
        *platform.heap.lock(),
        Some((heap_base, KERNEL_HEAP_SIZE))
    );
    assert_eq!(
        ka.virt_alloc_ranges(),
        &[AddrRange::new(KERNEL_BASE, 0x20_4000 + KERNEL_HEAP_SIZE)]
    );
    assert_eq!(ka.phys_alloc_ranges()[0].size, 0x10_4000);

    let kspace = vm.kernel_space().unwrap();
    assert_eq!(kspace.name(), KERNEL_ASPACE_NAME);
    let names: Vec<_> = kspace.areas().into_iter().map(|a| a.name).collect();
    assert_eq!(
        names,
        [
            "kernel_seg0",
            "kernel_seg1",
            "idle_thread0_kstack",
            "bootdir",
            "free_page_table",
            "kernel_heap",
        ]
    );

    let seg1 = kspace.find_area_by_name("kernel_seg1").unwrap();
    assert_eq!(seg1.size, 0x8_0000);
    assert_eq!(seg1.source, AreaSource::AlreadyMapped);

    let bootdir = kspace.find_area_by_name("bootdir").unwrap();
    assert_eq!(bootdir.base, VirtualAddress::new(KERNEL_BASE + 0x18_4000));
    assert_eq!(bootdir.lock, LockFlags::KERNEL);
    assert_eq!(
        platform.mapping(KERNEL_BASE + 0x18_4000),
        Some((0x18_0000, LockFlags::KERNEL))
    );
    assert_eq!(platform.mapped_pages(), 4 + 0x400 + 0x10);
}

#[test]
fn vm_init_accounts_for_every_frame() {
    let platform = MockPlatform::leaked();
    let mut ka = kernel_args();
    let vm = vm_init(&mut ka, platform);

    vm.with_frames(|f| {
        assert_eq!(f.total_frames(), 0x1000);
        // Hole, loader ranges and frame table, kernel heap.
        assert_eq!(f.free_count(), 0x1000 - 0x60 - 0x104 - 0x400);
        assert!(f.is_in_use(PageFrame::new(0xa0)));
        assert!(f.is_in_use(PageFrame::new(0x180)));
        assert!(f.is_in_use(PageFrame::new(0x203)));
        assert!(f.is_in_use(PageFrame::new(0x563)));
        assert!(!f.is_in_use(PageFrame::new(0x564)));
        f.check_chain().unwrap();
    });
}

#[test]
fn vm_init_without_boot_directory() {
    let platform = MockPlatform::leaked();
    let mut ka = kernel_args();
    ka.bootdir_addr = AddrRange::default();
    ka.kernel_seg1_addr = AddrRange::default();
    let vm = vm_init(&mut ka, platform);

    let kspace = vm.kernel_space().unwrap();
    assert!(kspace.find_area_by_name("bootdir").is_none());
    assert!(kspace.find_area_by_name("kernel_seg1").is_none());
    assert_eq!(kspace.area_count(), 4);
}

#[test]
#[should_panic(expected = "no physical memory ranges")]
fn vm_init_needs_memory() {
    let mut ka = KernelArgs::default();
    let _ = vm_init(&mut ka, MockPlatform::leaked());
}

#[test]
fn installed_instance_is_reachable() {
    let platform = MockPlatform::leaked();
    let mut ka = kernel_args();
    let vm = install(vm_init(&mut ka, platform));
    vm.init_post_sem(&ka);

    assert_eq!(platform.post_sem_calls.load(Ordering::SeqCst), 1);
    assert!(std::ptr::eq(kernel_vm().unwrap(), vm));
}
