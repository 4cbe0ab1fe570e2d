//! Kernel-debugger commands for inspecting the VM.
//!
//! Handlers receive the full argument vector, command name first, and write
//! their output to the debugger console. Bad arguments produce a usage line;
//! a handler only fails when the console itself does.

use crate::aspace::AspaceId;
use crate::frame_alloc::FrameAllocator;
use crate::vm::VirtualMemory;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

pub type CommandHandler = fn(&VirtualMemory, &[&str], &mut dyn fmt::Write) -> fmt::Result;

#[derive(Copy, Clone)]
pub struct DebugCommand {
    pub name: &'static str,
    pub help: &'static str,
    pub handler: CommandHandler,
}

impl fmt::Debug for DebugCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugCommand")
            .field("name", &self.name)
            .field("help", &self.help)
            .finish_non_exhaustive()
    }
}

/// Whatever hosts the debugger console.
pub trait CommandRegistry {
    fn add_command(&mut self, cmd: DebugCommand);
}

const COMMANDS: [DebugCommand; 7] = [
    DebugCommand {
        name: "aspace_areas",
        help: "Dump areas in an address space (by name or id)",
        handler: cmd_aspace_areas,
    },
    DebugCommand {
        name: "aspaces",
        help: "Dump all address spaces",
        handler: cmd_aspaces,
    },
    DebugCommand {
        name: "area_dump_kspace",
        help: "Dump areas in the kernel address space",
        handler: cmd_area_dump_kspace,
    },
    DebugCommand {
        name: "free_pages",
        help: "Dump free and in-use page runs",
        handler: cmd_free_pages,
    },
    DebugCommand {
        name: "dw",
        help: "dump memory words (32-bit)",
        handler: cmd_dw,
    },
    DebugCommand {
        name: "ds",
        help: "dump memory shorts (16-bit)",
        handler: cmd_ds,
    },
    DebugCommand {
        name: "db",
        help: "dump memory bytes (8-bit)",
        handler: cmd_db,
    },
];

pub fn register_debug_commands(registry: &mut dyn CommandRegistry) {
    for cmd in COMMANDS {
        registry.add_command(cmd);
    }
}

/// `0x`-prefixed hex, plain decimal otherwise.
#[must_use]
pub fn parse_number(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn cmd_aspace_areas(vm: &VirtualMemory, args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    let Some(&arg) = args.get(1) else {
        return writeln!(out, "aspace_areas: not enough arguments");
    };

    let space = vm.find_address_space_by_name(arg).or_else(|| {
        parse_number(arg)
            .and_then(|n| u32::try_from(n).ok())
            .and_then(|id| vm.find_address_space(AspaceId::from(id)))
    });
    match space {
        Some(space) => space.dump_areas(out),
        None => writeln!(out, "invalid aspace id or name '{arg}'"),
    }
}

fn cmd_aspaces(vm: &VirtualMemory, _args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    vm.dump_address_spaces(out)
}

fn cmd_area_dump_kspace(vm: &VirtualMemory, _args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    match vm.kernel_space() {
        Some(space) => space.dump_areas(out),
        None => writeln!(out, "no kernel address space"),
    }
}

fn cmd_free_pages(vm: &VirtualMemory, _args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    vm.with_frames(|frames| dump_frame_runs(frames, out))
}

fn dump_frame_runs(frames: &FrameAllocator, out: &mut dyn fmt::Write) -> fmt::Result {
    writeln!(
        out,
        "{:#x} of {:#x} frames free",
        frames.free_count(),
        frames.total_frames()
    )?;
    for run in frames.runs() {
        let state = if run.in_use { "inuse" } else { "free" };
        writeln!(out, "{state:>5} from {} -> {}", run.first, run.last)?;
    }
    Ok(())
}

fn cmd_dw(_vm: &VirtualMemory, args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    dump_memory(args, 4, out)
}

fn cmd_ds(_vm: &VirtualMemory, args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    dump_memory(args, 2, out)
}

fn cmd_db(_vm: &VirtualMemory, args: &[&str], out: &mut dyn fmt::Write) -> fmt::Result {
    dump_memory(args, 1, out)
}

/// `<cmd> <address> [count]`: `count` items of `width` bytes, 16 bytes per
/// line, followed by their printable characters.
#[allow(clippy::cast_possible_truncation)]
fn dump_memory(args: &[&str], width: u64, out: &mut dyn fmt::Write) -> fmt::Result {
    let cmd = args.first().copied().unwrap_or("dump");
    let Some(addr) = args.get(1).and_then(|a| parse_number(a)) else {
        return writeln!(out, "usage: {cmd} <address> [count]");
    };
    let count = match args.get(2) {
        Some(c) => match parse_number(c) {
            Some(n) => n,
            None => return writeln!(out, "{cmd}: invalid count '{c}'"),
        },
        None => 1,
    };

    let per_line = 16 / width;
    let mut va = VirtualAddress::new(addr & !(width - 1));
    let mut left = count;
    while left > 0 {
        let items = left.min(per_line);
        let mut bytes = [0u8; 16];
        write!(out, "{va}:")?;
        for i in 0..items {
            let item = va + i * width;
            let (value, le) = read(item, width);
            write!(out, " {value:0w$x}", w = 2 * width as usize)?;
            let at = (i * width) as usize;
            bytes[at..at + width as usize].copy_from_slice(&le[..width as usize]);
        }
        for _ in items..per_line {
            write!(out, " {:w$}", "", w = 2 * width as usize)?;
        }
        write!(out, "  ")?;
        for &b in &bytes[..(items * width) as usize] {
            let c = if b.is_ascii_graphic() || b == b' ' { char::from(b) } else { '.' };
            out.write_char(c)?;
        }
        writeln!(out)?;
        va += items * width;
        left -= items;
    }
    Ok(())
}

/// Read one item. The debugger trusts the operator with the address.
fn read(va: VirtualAddress, width: u64) -> (u32, [u8; 4]) {
    // SAFETY: none in general. Only the operator knows `va` is readable.
    let value = unsafe {
        match width {
            1 => u32::from(core::ptr::read_volatile(va.as_ptr::<u8>())),
            2 => u32::from(core::ptr::read_volatile(va.as_ptr::<u16>())),
            _ => core::ptr::read_volatile(va.as_ptr::<u32>()),
        }
    };
    (value, value.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Names(Vec<&'static str>);

    impl CommandRegistry for Names {
        fn add_command(&mut self, cmd: DebugCommand) {
            self.0.push(cmd.name);
        }
    }

    #[test]
    fn registers_every_command() {
        let mut names = Names::default();
        register_debug_commands(&mut names);
        assert_eq!(
            names.0,
            ["aspace_areas", "aspaces", "area_dump_kspace", "free_pages", "dw", "ds", "db"]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("0x1f"), Some(0x1f));
        assert_eq!(parse_number("0XFF"), Some(0xff));
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x"), None);
        assert_eq!(parse_number("kernel_land"), None);
    }

    #[test]
    fn byte_dump_has_ascii_column() {
        let data: [u8; 20] = *b"Hello, kernel!\0\x01abcd";
        let addr = format!("{:#x}", data.as_ptr() as u64);
        let mut out = String::new();
        dump_memory(&["db", &addr, "20"], 1, &mut out).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" 48 65 6c 6c 6f 2c"));
        assert!(lines[0].ends_with("  Hello, kernel!.."));
        assert!(lines[1].ends_with("  abcd"));
    }

    #[test]
    fn word_dump_reads_little_endian() {
        let data: [u32; 2] = [0x6463_6261, 0x0000_0041];
        let addr = format!("{:#x}", data.as_ptr() as u64);
        let mut out = String::new();
        dump_memory(&["dw", &addr, "2"], 4, &mut out).unwrap();
        assert!(out.contains(" 64636261 00000041"));
        assert!(out.trim_end().ends_with("abcdA..."));
    }

    #[test]
    fn bad_arguments_print_usage() {
        let mut out = String::new();
        dump_memory(&["ds"], 2, &mut out).unwrap();
        assert_eq!(out, "usage: ds <address> [count]\n");

        out.clear();
        dump_memory(&["ds", "0x1000", "lots"], 2, &mut out).unwrap();
        assert_eq!(out, "ds: invalid count 'lots'\n");
    }
}
