use std::cell::RefCell;
use std::fmt::Write;
use std::ops::RangeInclusive;
use std::str::Chars;

use colored::Colorize;

use crate::air::Program;
use crate::memory::Memory;
use crate::runtime::Cpu;
use crate::symbol::{Flag, REGISTER_COUNT};
use crate::trace::Trace;

/// Where text goes: the machine state report on stdout, status on stderr.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output {
    Normal,
    Status,
}

impl Output {
    thread_local! {
        static IS_MINIMAL: RefCell<bool> = const { RefCell::new(false) };
    }

    pub fn set_minimal(new_value: bool) -> bool {
        Self::IS_MINIMAL.with(|value| value.replace(new_value))
    }

    pub fn is_minimal() -> bool {
        Self::IS_MINIMAL.with(|value| *value.borrow())
    }

    /// Print text, removing escape codes in minimal mode.
    pub fn print_str(&self, string: &str) {
        let text = if Self::is_minimal() {
            Decolored::new(string).collect::<String>()
        } else {
            string.to_string()
        };
        match self {
            Self::Normal => print!("{text}"),
            Self::Status => eprint!("{text}"),
        }
    }

    pub fn print_registers(&self, cpu: &Cpu) {
        self.print_str(&render_registers(cpu, Self::is_minimal()));
    }

    pub fn print_trace(&self, trace: &Trace, program: &Program) {
        self.print_str(&render_trace(trace, program, Self::is_minimal()));
    }

    pub fn print_memory(&self, mem: &Memory, range: RangeInclusive<u16>) {
        self.print_str(&render_memory(mem, range, Self::is_minimal()));
    }
}

/// SREG as `ITHSVNZC` with clear flags shown as `-`.
pub fn flag_string(sreg: u8) -> String {
    Flag::ALL
        .iter()
        .map(|&flag| {
            if sreg & (1 << flag.bit()) != 0 {
                flag.name()
            } else {
                '-'
            }
        })
        .collect()
}

pub fn render_registers(cpu: &Cpu, minimal: bool) -> String {
    let mut out = String::new();
    if minimal {
        for (i, val) in cpu.registers().iter().enumerate() {
            let _ = writeln!(out, "R{i} {val}");
        }
        let _ = writeln!(out, "PC {}", cpu.pc());
        let _ = writeln!(out, "SP {}", cpu.sp());
        let _ = writeln!(out, "SREG {}", flag_string(cpu.sreg()));
        let _ = writeln!(out, "STEPS {}", cpu.steps());
        return out;
    }

    const COLUMNS: usize = 4;
    let rule = "─".repeat(COLUMNS * 16 + 1);
    let _ = writeln!(out, "{}", format!("┌{rule}┐").dimmed());
    for row in 0..REGISTER_COUNT / COLUMNS {
        let _ = write!(out, "{}", "│".dimmed());
        for col in 0..COLUMNS {
            // Column-major so R0..R7 read downwards
            let idx = col * (REGISTER_COUNT / COLUMNS) + row;
            let val = cpu.registers()[idx];
            let name = format!("R{idx}");
            let _ = write!(out, " {:>3} 0x{val:02x} {val:>4}  ", name.bold());
        }
        let _ = writeln!(out, " {}", "│".dimmed());
    }
    let _ = writeln!(out, "{}", format!("├{rule}┤").dimmed());
    let status = format!(
        " {} {:<5} {} 0x{:04x}  {} {}  {} {}",
        "PC".bold(),
        cpu.pc(),
        "SP".bold(),
        cpu.sp(),
        "SREG".bold(),
        flag_string(cpu.sreg()),
        "STEPS".bold(),
        cpu.steps(),
    );
    let width = Decolored::new(&status).count();
    let pad = (COLUMNS * 16 + 1).saturating_sub(width);
    let _ = writeln!(out, "{}{status}{}{}", "│".dimmed(), " ".repeat(pad), "│".dimmed());
    let _ = writeln!(out, "{}", format!("└{rule}┘").dimmed());
    out
}

/// One line per executed step, with the register and memory writes it made.
pub fn render_trace(trace: &Trace, program: &Program, minimal: bool) -> String {
    let mut out = String::new();
    for snap in trace.steps() {
        let mut writes: Vec<String> = trace
            .registers_at(snap.step)
            .iter()
            .map(|change| format!("{}={}", change.register, change.value))
            .collect();
        writes.extend(
            trace
                .memory_at(snap.step)
                .iter()
                .map(|change| format!("[{:#06x}]={}", change.addr, change.value)),
        );
        if minimal {
            let _ = writeln!(
                out,
                "{} {} {} {}",
                snap.step,
                snap.pc,
                snap.instr,
                writes.join(" ")
            );
            continue;
        }
        let line = program
            .line_of(snap.pc)
            .map_or(String::new(), |line| format!("line {line}"));
        let _ = writeln!(
            out,
            "{:>6} {:>5}  {:<20} {:<9} {} {}",
            snap.step.to_string().dimmed(),
            snap.pc,
            snap.instr,
            line.dimmed(),
            flag_string(snap.sreg).dimmed(),
            writes.join(" ").green(),
        );
    }
    out
}

/// Hex dump of `range`, sixteen bytes per row. Addresses past the end of memory are skipped.
pub fn render_memory(mem: &Memory, range: RangeInclusive<u16>, minimal: bool) -> String {
    let mut out = String::new();
    let start = *range.start() as usize;
    let end = (*range.end() as usize).min(mem.size().saturating_sub(1));
    if start > end {
        return out;
    }
    let bytes = &mem.as_slice()[start..=end];
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let addr = start + row * 16;
        let hex: Vec<String> = chunk
            .iter()
            .map(|&byte| {
                let text = format!("{byte:02x}");
                if minimal || byte != 0 {
                    text
                } else {
                    text.dimmed().to_string()
                }
            })
            .collect();
        if minimal {
            let _ = writeln!(out, "{addr:04x} {}", hex.join(" "));
        } else {
            let _ = writeln!(out, "{}  {}", format!("{addr:04x}").bold(), hex.join(" "));
        }
    }
    out
}

/// Characters of a string with ANSI escape sequences removed.
struct Decolored<'a> {
    chars: Chars<'a>,
}

impl<'a> Decolored<'a> {
    pub fn new(string: &'a str) -> Self {
        Self {
            chars: string.chars(),
        }
    }
}

impl Iterator for Decolored<'_> {
    type Item = char;
    fn next(&mut self) -> Option<Self::Item> {
        while let Some(ch) = self.chars.next() {
            // Skip everything between '\x1b' and 'm' (inclusive)
            if ch == '\x1b' {
                while self.chars.next().is_some_and(|ch| ch != 'm') {}
                continue;
            }
            return Some(ch);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::assemble;

    fn cpu(src: &str) -> Cpu {
        let mut cpu = Cpu::load(assemble(src).unwrap());
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn decolored() {
        assert_eq!(Decolored::new("abcdef").collect::<String>(), "abcdef");
        assert_eq!(
            Decolored::new("abc\x1b[0;2mdef\x1b[0m").collect::<String>(),
            "abcdef"
        );
        assert_eq!(Decolored::new("abc\x1b[0xyz").collect::<String>(), "abc");
    }

    #[test]
    fn flags() {
        assert_eq!(flag_string(0), "--------");
        assert_eq!(flag_string(0b1000_0011), "I-----ZC");
    }

    #[test]
    fn minimal_registers() {
        let text = render_registers(&cpu("ldi r16, 255\ninc r16\nldi r31, 7"), true);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[16], "R16 0");
        assert_eq!(lines[31], "R31 7");
        assert_eq!(lines[32], "PC 3");
        assert_eq!(lines[33], "SP 2047");
        assert_eq!(lines[34], "SREG ------Z-");
        assert_eq!(lines[35], "STEPS 3");
    }

    #[test]
    fn decorated_registers_mention_every_register() {
        let text = render_registers(&cpu("nop"), false);
        let plain: String = Decolored::new(&text).collect();
        assert!(plain.contains("R0 "));
        assert!(plain.contains("R31"));
        assert!(plain.contains("SREG --------"));
    }

    #[test]
    fn minimal_trace() {
        let cpu = cpu("ldi r16, 3\nst r16, r16\nnop");
        let text = render_trace(cpu.trace(), cpu.program(), true);
        assert_eq!(
            text,
            "0 0 LDI R16, 3 R16=3\n1 1 ST R16, R16 [0x0003]=3\n2 2 NOP \n"
        );
    }

    #[test]
    fn memory_dump() {
        let cpu = cpu("ldi r16, 0xAB\nst 0x11, r16");
        let text = render_memory(cpu.memory(), 0x10..=0x1F, true);
        assert_eq!(
            text,
            "0010 00 ab 00 00 00 00 00 00 00 00 00 00 00 00 00 00\n"
        );
        assert_eq!(render_memory(cpu.memory(), 3000..=3010, true), "");
        assert_eq!(render_memory(cpu.memory(), 2046..=3000, true).lines().count(), 1);
    }
}
