//! LC-3 Emulator - CLI Entry Point
//!
//! `lc3-emu [OPTIONS] <IMAGE>...` loads each object image in order and
//! runs the machine from the start address until it halts.

use clap::Parser;
use lc3::{disassemble, load_images, Console, Cpu, CpuState, Image, InterruptFlag, PipedConsole};
use lc3::cpu::{CpuError, Snapshot};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Exit status when an image or the console cannot be set up.
const EXIT_FAILURE: i32 = 1;

/// Exit status after a keyboard interrupt (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

/// How the process ends once the machine has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Success,
    Code(i32),
    Abort,
}

#[derive(Parser, Debug)]
#[command(name = "lc3-emu")]
#[command(version)]
#[command(about = "An instruction-set simulator for the LC-3 educational computer")]
struct Cli {
    /// Object images to load, in order
    #[arg(required = true, value_name = "IMAGE")]
    images: Vec<PathBuf>,

    /// Initial program counter (0x3000, x3000 or decimal)
    #[arg(long, value_name = "ADDR", default_value = "0x3000", value_parser = parse_address)]
    pc: u16,

    /// Stop after this many instructions
    #[arg(short, long)]
    max_cycles: Option<u64>,

    /// Fault on unknown TRAP vectors instead of ignoring them
    #[arg(long)]
    strict_traps: bool,

    /// Log every executed instruction to stderr
    #[arg(short, long)]
    trace: bool,

    /// Print a listing of each image and exit
    #[arg(short, long)]
    disassemble: bool,

    /// Write registers and state as JSON when the run ends
    #[arg(long, value_name = "PATH")]
    dump_state: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.trace);

    let images = match load_all(&cli.images) {
        Ok(images) => images,
        Err(code) => process::exit(code),
    };

    if cli.disassemble {
        for image in &images {
            println!("{}", disassemble(image.origin, &image.words));
        }
        return;
    }

    // Raw mode swallows Ctrl-C as a key; this covers piped runs.
    let interrupt = InterruptFlag::new();
    let on_signal = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || on_signal.raise()) {
        tracing::warn!(error = %e, "could not install the Ctrl-C handler");
    }

    let (result, snapshot) = match run_machine(&cli, &images, interrupt) {
        Ok(finished) => finished,
        Err(e) => {
            eprintln!("❌ Console setup failed: {}", e);
            process::exit(EXIT_FAILURE);
        }
    };

    // The terminal is restored by now, on every path below.
    if let Err(e) = &result {
        tracing::error!("{}", e);
        eprintln!("❌ {}", e);
    } else if let Some(path) = &cli.dump_state {
        if let Err(e) = write_snapshot(path, &snapshot) {
            eprintln!("❌ Failed to write {}: {}", path.display(), e);
            process::exit(EXIT_FAILURE);
        }
    }

    match exit_for(&result, &snapshot) {
        Exit::Success => {}
        Exit::Code(code) => {
            if code == EXIT_INTERRUPTED {
                println!();
            }
            process::exit(code);
        }
        Exit::Abort => process::abort(),
    }
}

/// Read every image up front; nothing is loaded if any of them fails.
fn load_all(paths: &[PathBuf]) -> Result<Vec<Image>, i32> {
    load_images(paths).map_err(|e| {
        eprintln!("❌ {}", e);
        EXIT_FAILURE
    })
}

/// Map the end of a run to the process exit.
fn exit_for(result: &Result<u64, CpuError>, snapshot: &Snapshot) -> Exit {
    if result.is_err() {
        return Exit::Abort;
    }
    match snapshot.state {
        CpuState::Interrupted => Exit::Code(EXIT_INTERRUPTED),
        CpuState::Running => {
            tracing::warn!(cycles = snapshot.cycles, "cycle limit reached");
            Exit::Success
        }
        CpuState::Halted | CpuState::Faulted => Exit::Success,
    }
}

/// Pick a console, run the machine, and tear the console down.
fn run_machine(
    cli: &Cli,
    images: &[Image],
    interrupt: InterruptFlag,
) -> io::Result<(Result<u64, CpuError>, Snapshot)> {
    #[cfg(feature = "terminal")]
    {
        use std::io::IsTerminal;

        if io::stdin().is_terminal() {
            let _raw = lc3::RawModeGuard::enable()?;
            let console = lc3::TerminalConsole::new(interrupt.clone());
            return Ok(execute(cli, images, console, interrupt));
        }
    }

    let console = PipedConsole::stdio()?.with_interrupt(interrupt.clone());
    Ok(execute(cli, images, console, interrupt))
}

fn execute<C: Console>(
    cli: &Cli,
    images: &[Image],
    console: C,
    interrupt: InterruptFlag,
) -> (Result<u64, CpuError>, Snapshot) {
    let mut cpu = Cpu::with_interrupt(console, interrupt);
    cpu.set_strict_traps(cli.strict_traps);
    for image in images {
        cpu.load_image(image);
    }
    cpu.regs.pc = cli.pc;

    let result = match cli.max_cycles {
        Some(max) => cpu.run_limited(max),
        None => cpu.run(),
    };
    cpu.console.flush();

    tracing::info!(cycles = cpu.cycles, state = ?cpu.state, "run finished");
    (result, cpu.snapshot())
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> io::Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)
}

fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("lc3=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Parse an address written as `0x3000`, `x3000` or decimal.
fn parse_address(s: &str) -> Result<u16, String> {
    let trimmed = s.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .or_else(|| trimmed.strip_prefix('x'))
        .or_else(|| trimmed.strip_prefix('X'));

    match hex {
        Some(digits) => u16::from_str_radix(digits, 16),
        None => trimmed.parse::<u16>(),
    }
    .map_err(|e| format!("invalid address '{}': {}", s, e))
}
