/*
 * Kernel Shell
 *
 * A small line-oriented shell on the UART, run as an ordinary task. Input
 * is polled; while the FIFO is empty the task yields, so the shell never
 * starves the rest of the system.
 *
 * Commands live in a static table and are found by linear scan. They run
 * on the shell task's stack and are free to sleep or take locks.
 */

use heapless::String;

use crate::drivers::{timer, uart};
use crate::{block, print, scheduler, selftest, serial_println};

const LINE_CAPACITY: usize = 64;

/// One shell command: the word that invokes it, a help line, and the
/// handler. `args` is the remainder of the line after the command word.
struct Command {
    name: &'static str,
    help: &'static str,
    run: fn(args: &str),
}

static COMMANDS: &[Command] = &[
    Command {
        name: "help",
        help: "list available commands",
        run: cmd_help,
    },
    Command {
        name: "tasks",
        help: "show the task table",
        run: cmd_tasks,
    },
    Command {
        name: "uptime",
        help: "ticks and seconds since boot",
        run: cmd_uptime,
    },
    Command {
        name: "sd",
        help: "SD card status and MBR check",
        run: cmd_sd,
    },
    Command {
        name: "selftest",
        help: "spawn the kernel scenario tests",
        run: cmd_selftest,
    },
];

/// Shell task entry point.
pub fn shell_task() {
    serial_println!();
    serial_println!("piko shell - 'help' lists commands");

    let mut line: String<LINE_CAPACITY> = String::new();
    loop {
        print!("> ");
        read_line(&mut line);
        dispatch(line.trim());
    }
}

/// Collect one line of input, echoing as we go. Yields while idle.
fn read_line(line: &mut String<LINE_CAPACITY>) {
    line.clear();
    loop {
        let Some(byte) = uart::read_byte() else {
            scheduler::yield_now();
            continue;
        };
        match byte {
            b'\r' | b'\n' => {
                serial_println!();
                return;
            }
            8 | 0x7F => {
                if line.pop().is_some() {
                    print!("\u{8}");
                }
            }
            0x20..=0x7E => {
                if line.push(byte as char).is_ok() {
                    print!("{}", byte as char);
                }
            }
            _ => {}
        }
    }
}

fn dispatch(line: &str) {
    if line.is_empty() {
        return;
    }
    let (word, args) = match line.split_once(' ') {
        Some((w, a)) => (w, a.trim()),
        None => (line, ""),
    };
    match COMMANDS.iter().find(|c| c.name == word) {
        Some(cmd) => (cmd.run)(args),
        None => serial_println!("unknown command '{}', try 'help'", word),
    }
}

fn cmd_help(_args: &str) {
    for cmd in COMMANDS {
        serial_println!("  {:<10} {}", cmd.name, cmd.help);
    }
}

fn cmd_tasks(_args: &str) {
    serial_println!("  id  name             state");
    serial_println!("  --  ----             -----");
    for task in scheduler::task_snapshot().iter() {
        serial_println!("  {:<3} {:<16} {}", task.id.0, task.name.as_str(), task.state.as_str());
    }
}

fn cmd_uptime(_args: &str) {
    serial_println!(
        "up {} s ({} ticks of {} ms)",
        timer::uptime_secs(),
        timer::ticks(),
        timer::TICK_PERIOD_MS
    );
}

/// Report the card size and verify the MBR signature in sector 0.
fn cmd_sd(_args: &str) {
    let Some(dev) = block::get("sd0") else {
        serial_println!("sd0 not registered");
        return;
    };
    serial_println!("sd0: {} sectors of {} bytes", dev.sector_count(), block::SECTOR_SIZE);

    let mut sector = [0u8; block::SECTOR_SIZE];
    match dev.read(0, 1, &mut sector) {
        Ok(()) => {
            print!("sector 0:");
            for byte in &sector[..16] {
                print!(" {:02X}", byte);
            }
            serial_println!();
            if sector[510] == 0x55 && sector[511] == 0xAA {
                serial_println!("MBR signature valid");
            } else {
                serial_println!(
                    "MBR signature invalid ({:02X} {:02X})",
                    sector[510],
                    sector[511]
                );
            }
        }
        Err(err) => serial_println!("read failed: {:?}", err),
    }
}

fn cmd_selftest(_args: &str) {
    selftest::spawn_all();
}
