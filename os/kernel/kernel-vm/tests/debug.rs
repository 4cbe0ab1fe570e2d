mod common;

use common::vm;
use kernel_memory_addresses::VirtualAddress;
use kernel_vm::debug::{CommandRegistry, DebugCommand, register_debug_commands};
use kernel_vm::{AreaRequest, VirtualMemory};

#[derive(Default)]
struct Console {
    commands: Vec<DebugCommand>,
}

impl CommandRegistry for Console {
    fn add_command(&mut self, cmd: DebugCommand) {
        self.commands.push(cmd);
    }
}

impl Console {
    fn run(&self, vm: &VirtualMemory, line: &str) -> String {
        let args: Vec<&str> = line.split_whitespace().collect();
        let cmd = self
            .commands
            .iter()
            .find(|c| c.name == args[0])
            .expect("command registered");
        let mut out = String::new();
        (cmd.handler)(vm, &args, &mut out).unwrap();
        out
    }
}

fn console() -> Console {
    let mut console = Console::default();
    register_debug_commands(&mut console);
    console
}

#[test]
fn aspace_areas_by_name_and_id() {
    let (vm, _) = vm(8, 0x100);
    let space = vm.create_address_space("user", VirtualAddress::new(0x1000), 0x10_0000);
    vm.create_area(&space, AreaRequest::new("data", 0x2000)).unwrap();
    let console = console();

    let expected = "area dump of address space 'user', base 0x1000, size 0x100000:\n\
                    area 0x0: base_addr = 0x1000 size = 0x2000 name = 'data' lock = 0x3\n";
    assert_eq!(console.run(&vm, "aspace_areas user"), expected);
    assert_eq!(
        console.run(&vm, &format!("aspace_areas {}", space.id())),
        expected
    );
    assert_eq!(
        console.run(&vm, "aspace_areas nope"),
        "invalid aspace id or name 'nope'\n"
    );
    assert_eq!(
        console.run(&vm, "aspace_areas"),
        "aspace_areas: not enough arguments\n"
    );
}

#[test]
fn aspaces_lists_the_registry() {
    let (vm, _) = vm(8, 0x100);
    vm.create_kernel_space();
    vm.create_address_space("user", VirtualAddress::new(0x1000), 0x10_0000);

    let out = console().run(&vm, "aspaces");
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("id\t"));
    assert!(lines[1].contains("user"));
    assert!(lines[2].contains("kernel_land\t0xffffffff80000000"));
}

#[test]
fn kernel_space_dump() {
    let (vm, _) = vm(8, 0x100);
    let console = console();
    assert_eq!(
        console.run(&vm, "area_dump_kspace"),
        "no kernel address space\n"
    );

    vm.create_kernel_space();
    assert!(
        console
            .run(&vm, "area_dump_kspace")
            .starts_with("area dump of address space 'kernel_land'")
    );
}

#[test]
fn free_pages_shows_runs() {
    let (vm, _) = vm(8, 0x100);
    let space = vm.create_address_space("user", VirtualAddress::new(0x1000), 0x10_0000);
    vm.create_area(&space, AreaRequest::new("data", 0x2000)).unwrap();

    assert_eq!(
        console().run(&vm, "free_pages"),
        "0x6 of 0x8 frames free\n\
         inuse from 0x100 -> 0x101\n \
         free from 0x102 -> 0x107\n"
    );
}

#[test]
fn memory_dump_commands() {
    let (vm, _) = vm(8, 0x100);
    let data: [u16; 2] = [0x4241, 0x4443];
    let addr = data.as_ptr() as u64;
    let out = console().run(&vm, &format!("ds {addr:#x} 2"));
    assert!(out.contains(": 4241 4443"));
    assert!(out.trim_end().ends_with("ABCD"));
}
