//! Command-line runner for the teaching simulator.
//!
//! This binary is a thin collaborator of the simulation core. It performs:
//! 1. **Run:** Load an ELF executable (or assemble a listing), run until the
//!    machine stops, and print registers and cache/predictor statistics.
//! 2. **Disassemble:** Dump a program's instructions symbolically.
//!
//! Configuration comes from a JSON file, a named preset, or the defaults.

use std::fs;
use std::io::Write;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use machine::config::{ConfigPreset, MachineConfig};
use machine::isa::{abi, asm, disasm};
use machine::isa::instruction::Instruction;
use machine::loader::{self, ProgramImage, ProgramSegment, SymbolTable};
use machine::machine::{DEFAULT_ENTRY, Machine, MachineStatus};

/// Named configuration presets selectable from the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    /// Single-cycle core without caches.
    Single,
    /// Single-cycle core with caches.
    SingleCache,
    /// Pipelined core without hazard unit.
    PipeNoHazard,
    /// Fully pipelined core with hazard unit and caches.
    Pipe,
}

impl From<PresetArg> for ConfigPreset {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Single => Self::Single,
            PresetArg::SingleCache => Self::SingleCache,
            PresetArg::PipeNoHazard => Self::PipeNoHazard,
            PresetArg::Pipe => Self::Pipe,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "rvclass",
    author,
    version,
    about = "Cycle-accurate RISC-V RV32/64-IM simulator for teaching",
    long_about = "Run an ELF executable or an assembly listing on the simulated machine.\n\n\
        Examples:\n  rvclass run program.elf\n  rvclass run --asm program.s --preset pipe\n  \
        rvclass disasm program.elf"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a program until exit, trap, or the cycle limit.
    Run {
        /// ELF executable (or assembly listing with --asm).
        file: String,

        /// Treat the input as an assembly listing instead of an ELF.
        #[arg(long)]
        asm: bool,

        /// Configuration preset.
        #[arg(long, value_enum)]
        preset: Option<PresetArg>,

        /// JSON configuration file (overrides --preset).
        #[arg(long)]
        config: Option<String>,

        /// Maximum number of cycles to simulate.
        #[arg(long, default_value_t = 100_000_000)]
        max_cycles: u64,

        /// Print registers with ABI names.
        #[arg(long)]
        symbolic_registers: bool,
    },

    /// Disassemble the loadable segments of an ELF executable.
    Disasm {
        /// ELF executable.
        file: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            file,
            asm,
            preset,
            config,
            max_cycles,
            symbolic_registers,
        } => cmd_run(
            &file,
            asm,
            preset,
            config.as_deref(),
            max_cycles,
            symbolic_registers,
        ),
        Commands::Disasm { file } => cmd_disasm(&file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("rvclass: {message}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(preset: Option<PresetArg>, config_path: Option<&str>) -> Result<MachineConfig, String> {
    if let Some(path) = config_path {
        let text = fs::read_to_string(path).map_err(|error| format!("cannot read '{path}': {error}"))?;
        return serde_json::from_str(&text).map_err(|error| format!("config parse error: {error}"));
    }
    Ok(match preset {
        Some(preset) => MachineConfig::preset(preset.into()),
        None => MachineConfig::default(),
    })
}

/// Assembles a listing into a single-segment program image at the default
/// entry, resolving label relocations in a second pass.
fn assemble_listing(path: &str) -> Result<ProgramImage, String> {
    let text = fs::read_to_string(path).map_err(|error| format!("cannot read '{path}': {error}"))?;

    let mut words: Vec<u32> = Vec::new();
    let mut relocations = asm::RelocationList::new();
    let mut symbols = SymbolTable::new();

    for (line_index, raw_line) in text.lines().enumerate() {
        let line_no = (line_index + 1) as u32;
        let mut line = raw_line;
        if let Some(comment) = line.find(['#', ';']) {
            line = &line[..comment];
        }
        let mut line = line.trim();

        while let Some(colon) = line.find(':') {
            let label = line[..colon].trim();
            if label.is_empty() || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                break;
            }
            symbols.set_symbol(
                label,
                loader::SymbolInfo {
                    value: DEFAULT_ENTRY.raw() + (words.len() as u64) * 4,
                    size: 4,
                    info: 0,
                    other: 0,
                },
            );
            line = line[colon + 1..].trim();
        }
        if line.is_empty() {
            continue;
        }

        let inst_addr = DEFAULT_ENTRY + (words.len() as u64) * 4;
        let encoded = asm::code_from_string(line, inst_addr, Some(&mut relocations), path, line_no, true)
            .map_err(|error| error.to_string())?;
        words.extend(encoded);
    }

    for record in &relocations {
        let index = ((record.location - DEFAULT_ENTRY) / 4) as usize;
        words[index] = asm::resolve_relocation(words[index], record, &symbols)
            .map_err(|error| error.to_string())?;
    }

    let mut data = Vec::with_capacity(words.len() * 4);
    for word in &words {
        data.extend_from_slice(&word.to_le_bytes());
    }
    let end = DEFAULT_ENTRY + data.len() as u64;

    Ok(ProgramImage {
        endian: machine::config::Endian::Little,
        xlen: machine::config::Xlen::Rv32,
        entry: DEFAULT_ENTRY,
        end,
        segments: vec![ProgramSegment {
            address: DEFAULT_ENTRY,
            data,
        }],
        symbols,
    })
}

fn cmd_run(
    file: &str,
    is_asm: bool,
    preset: Option<PresetArg>,
    config_path: Option<&str>,
    max_cycles: u64,
    symbolic_registers: bool,
) -> Result<(), String> {
    let config = build_config(preset, config_path)?;
    let image = if is_asm {
        assemble_listing(file)?
    } else {
        loader::load_elf_file(file).map_err(|error| error.to_string())?
    };

    let mut sim = Machine::new(config).map_err(|error| error.to_string())?;
    sim.load_program(&image).map_err(|error| error.to_string())?;

    let run_result = sim.play(max_cycles);
    let cycles = sim.core().cycle_count();

    // Echo whatever the program sent to the serial port.
    let output = sim.serial_tx_take();
    if !output.is_empty() {
        let _ = std::io::stdout().write_all(&output);
    }

    match run_result {
        Ok(executed) if executed >= max_cycles => {
            println!("stopped after reaching the cycle limit ({max_cycles})");
        }
        Ok(_) => {}
        Err(ref error) => println!("trapped: {error}"),
    }

    println!("status: {:?}", sim.status());
    println!("cycles: {cycles}");
    print_registers(&sim, symbolic_registers);
    print_statistics(&sim);

    if sim.status() == MachineStatus::Trapped && run_result.is_err() {
        return Err("simulation trapped".to_string());
    }
    Ok(())
}

fn print_registers(sim: &Machine, symbolic: bool) {
    let regs = sim.core().registers();
    println!("pc = {:#018x}", regs.read_pc().raw());
    for row in 0..16 {
        let left = row as u8;
        let right = (row + 16) as u8;
        let name = |id: u8| {
            if symbolic {
                format!("{:>4}", abi::REGISTER_NAMES[id as usize])
            } else {
                format!("x{id:<3}")
            }
        };
        println!(
            "{} = {:#018x}   {} = {:#018x}",
            name(left),
            regs.read_gp(left).as_u64(),
            name(right),
            regs.read_gp(right).as_u64()
        );
    }
}

fn print_statistics(sim: &Machine) {
    let program = sim.cache_program_stats();
    let data = sim.cache_data_stats();
    let print_cache = |label: &str, stats: machine::memory::cache::CacheStats| {
        println!(
            "{label}: hits {} misses {} reads {} writes {} stalls {} hit-rate {:.2}% speed {:.0}%",
            stats.hits,
            stats.misses,
            stats.memory_reads,
            stats.memory_writes,
            stats.stall_cycles,
            stats.hit_rate(),
            stats.speed_improvement(),
        );
    };
    print_cache("i-cache", program);
    print_cache("d-cache", data);
    if let Some(level2) = sim.cache_level2_stats() {
        print_cache("l2-cache", level2);
    }

    let predictor = sim.core().predictor();
    if predictor.enabled() {
        let stats = predictor.stats();
        println!(
            "predictor: correct {} wrong {} accuracy {}%",
            stats.correct, stats.wrong, stats.accuracy
        );
    }
}

fn cmd_disasm(file: &str) -> Result<(), String> {
    let image = loader::load_elf_file(file).map_err(|error| error.to_string())?;
    for segment in &image.segments {
        for (offset, chunk) in segment.data.chunks_exact(4).enumerate() {
            let addr = segment.address + (offset as u64) * 4;
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let inst = Instruction::new(word);
            println!(
                "{:#010x}:  {:08x}  {}",
                addr.raw(),
                word,
                disasm::to_text(inst, addr)
            );
        }
    }
    Ok(())
}
