use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use miette::{IntoDiagnostic, NamedSource, Report, Result};
use simple_logger::SimpleLogger;

use tiny8::output::Output;
use tiny8::{env, Config, Cpu, Halt, Program, Register};

/// tiny8 assembles and runs programs for a small 8-bit register machine.
#[derive(Parser)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Quickly provide a `.asm` file to run
    path: Option<PathBuf>,

    /// Increase log output (`-v` info, `-vv` debug, `-vvv` every instruction)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble and run a `.asm` file, then print the machine state
    Run {
        /// `.asm` file to run
        name: PathBuf,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Check a `.asm` file without running it
    Check {
        /// File to check
        name: PathBuf,
    },
}

#[derive(clap::Args, Default)]
struct RunOpts {
    /// Stop after this many instructions [default: 100000]
    #[arg(long)]
    max_steps: Option<u64>,
    /// Size of data memory in bytes [default: 2048]
    #[arg(long)]
    memory_size: Option<usize>,
    /// Set a register before the program starts, e.g. `--set r16=10`
    #[arg(short, long = "set", value_name = "rN=VALUE", value_parser = env::parse_register_assignment)]
    set: Vec<(Register, u8)>,
    /// Print every executed instruction with the writes it made
    #[arg(short, long)]
    trace: bool,
    /// Dump a memory range after the run, e.g. `--memory 0x100:0x11f`
    #[arg(long, value_name = "START:END", value_parser = parse_range)]
    memory: Option<RangeInclusive<u16>>,
    /// Produce minimal output, suited for blackbox tests
    #[arg(short, long)]
    minimal: bool,
}

fn main() -> miette::Result<()> {
    let args = Args::parse();

    SimpleLogger::new()
        .with_level(log_level(args.verbose))
        .without_timestamps()
        .init()
        .into_diagnostic()?;

    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new() //
                .context_lines(tiny8::DIAGNOSTIC_CONTEXT_LINES)
                .build(),
        )
    }))?;

    match (args.command, args.path) {
        (Some(Command::Run { name, opts }), _) => run(&name, opts),
        (Some(Command::Check { name }), _) => {
            file_message(MsgColor::Green, "Checking", &name);
            let program = assemble(&name)?;
            message(
                MsgColor::Green,
                "Success",
                &format!("{} instructions, no errors found!", program.len()),
            );
            Ok(())
        }
        (None, Some(path)) => run(&path, RunOpts::default()),
        (None, None) => {
            println!("\n~ tiny8 v{VERSION} ~");
            println!("{}", LOGO.truecolor(120, 200, 255).bold());
            println!("{SHORT_INFO}");
            Ok(())
        }
    }
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

enum MsgColor {
    Green,
    Cyan,
    Red,
}

fn file_message(color: MsgColor, left: &str, right: &Path) {
    let right = format!("target {}", right.display());
    message(color, left, &right);
}

fn message(color: MsgColor, left: &str, right: &str) {
    if Output::is_minimal() {
        return;
    }
    let left = match color {
        MsgColor::Green => left.green(),
        MsgColor::Cyan => left.cyan(),
        MsgColor::Red => left.red(),
    };
    Output::Status.print_str(&format!("{left:>12} {right}\n"));
}

fn run(name: &Path, opts: RunOpts) -> Result<()> {
    Output::set_minimal(opts.minimal || env::is_minimal());

    let mut config = Config::from_env().into_diagnostic()?;
    if let Some(steps) = opts.max_steps {
        config.max_steps = steps;
    }
    if let Some(size) = opts.memory_size {
        config.memory_size = size;
    }
    for (reg, val) in opts.set {
        config.set_register(reg, val);
    }

    file_message(MsgColor::Green, "Assembling", name);
    let program = assemble(name)?;
    let mut cpu = Cpu::new(program, &config).into_diagnostic()?;

    message(
        MsgColor::Green,
        "Running",
        &format!("{} instructions", cpu.program().len()),
    );
    let result = cpu.run();

    if opts.trace {
        Output::Normal.print_trace(cpu.trace(), cpu.program());
    }
    Output::Normal.print_registers(&cpu);
    if let Some(range) = opts.memory {
        Output::Normal.print_memory(cpu.memory(), range);
    }

    match result {
        Ok(summary) => {
            match summary.halt {
                Halt::EndOfProgram => file_message(MsgColor::Green, "Completed", name),
                Halt::StepLimit => message(
                    MsgColor::Cyan,
                    "Halted",
                    &format!("step limit of {} reached", cpu.max_steps()),
                ),
            }
            Ok(())
        }
        Err(err) => {
            message(MsgColor::Red, "Failed", &format!("at step {}", err.step()));
            let context = source_context(cpu.program(), err.pc());
            Err(Report::new(err).wrap_err(context))
        }
    }
}

/// Assemble a source file, attaching the source to any diagnostic
fn assemble(name: &Path) -> Result<Program> {
    let src = fs::read_to_string(name).into_diagnostic()?;
    tiny8::assemble(&src).map_err(|err| {
        Report::new(err).with_source_code(NamedSource::new(name.display().to_string(), src.clone()))
    })
}

fn source_context(program: &Program, pc: u16) -> String {
    match program.line_of(pc) {
        Some(line) => {
            let text = program.source_line(line).unwrap_or_default().trim();
            format!("Runtime error on line {line}: `{text}`")
        }
        None => format!("Runtime error at address {pc}"),
    }
}

/// Parse `START:END`, both inclusive.
fn parse_range(text: &str) -> std::result::Result<RangeInclusive<u16>, String> {
    let (start, end) = text
        .split_once(':')
        .ok_or_else(|| format!("expected `START:END`, found `{text}`"))?;
    let addr = |part: &str| {
        tiny8::parse_number(part.trim())
            .and_then(|val| u16::try_from(val).ok())
            .ok_or_else(|| format!("invalid address `{part}`"))
    };
    let (start, end) = (addr(start)?, addr(end)?);
    if start > end {
        return Err(format!("range start {start} is after end {end}"));
    }
    Ok(start..=end)
}

const LOGO: &str = r#"
  _   _             ___
 | |_(_)_ __  _   _( _ )
 | __| | '_ \| | | / _ \
 | |_| | | | | |_| | (_) |
  \__|_|_| |_|\__, |\___/
              |___/"#;

const SHORT_INFO: &str = r"
Welcome to tiny8, an assembler and step-traced emulator for a small
8-bit register machine with an AVR-flavoured instruction set.
Please use `-h` or `--help` to access the usage instructions and documentation.
";

const VERSION: &str = env!("CARGO_PKG_VERSION");
