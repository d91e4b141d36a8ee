//! Shared test infrastructure.
//!
//! Builders that assemble a machine around a hand-written program image and
//! helpers that drive the step loop until a retire count is reached.

use machine::common::Address;
use machine::config::{Endian, MachineConfig, Xlen};
use machine::core::csr::id as csr_id;
use machine::isa::asm;
use machine::loader::{ProgramImage, ProgramSegment, SymbolTable};
use machine::machine::Machine;

/// Default program base used by the scenario tests.
pub const PROGRAM_BASE: Address = Address(0x200);

/// Builds a program image holding `words` at [`PROGRAM_BASE`] plus optional
/// extra data segments.
pub fn image_from_words(words: &[u32], extra: &[(Address, Vec<u8>)]) -> ProgramImage {
    let mut data = Vec::with_capacity(words.len() * 4);
    for word in words {
        data.extend_from_slice(&word.to_le_bytes());
    }
    let end = PROGRAM_BASE + data.len() as u64;
    let mut segments = vec![ProgramSegment {
        address: PROGRAM_BASE,
        data,
    }];
    for (address, bytes) in extra {
        segments.push(ProgramSegment {
            address: *address,
            data: bytes.clone(),
        });
    }
    ProgramImage {
        endian: Endian::Little,
        xlen: Xlen::Rv32,
        entry: PROGRAM_BASE,
        end,
        segments,
        symbols: SymbolTable::new(),
    }
}

/// Builds a ready machine executing `words` from [`PROGRAM_BASE`].
pub fn machine_with_program(config: MachineConfig, words: &[u32]) -> Machine {
    machine_with_program_and_data(config, words, &[])
}

/// Builds a ready machine with extra pre-populated data segments.
pub fn machine_with_program_and_data(
    config: MachineConfig,
    words: &[u32],
    extra: &[(Address, Vec<u8>)],
) -> Machine {
    let mut sim = Machine::new(config).expect("machine construction");
    sim.load_program(&image_from_words(words, extra))
        .expect("program load");
    sim
}

/// Assembles a straight-line listing (no labels) at [`PROGRAM_BASE`].
pub fn assemble(lines: &[&str]) -> Vec<u32> {
    let mut words = Vec::new();
    for line in lines {
        let addr = PROGRAM_BASE + (words.len() as u64) * 4;
        let encoded = asm::code_from_string(line, addr, None, "", 0, true)
            .unwrap_or_else(|error| panic!("assembling '{line}': {error}"));
        words.extend(encoded);
    }
    words
}

/// Number of committed instructions so far.
pub fn retired(sim: &Machine) -> u64 {
    sim.core()
        .control_state()
        .read_internal(csr_id::MINSTRET)
        .as_u64()
}

/// Steps the machine until `count` instructions retired (or panics after
/// `max_steps` cycles).
pub fn run_until_retired(sim: &mut Machine, count: u64, max_steps: u64) {
    for _ in 0..max_steps {
        if retired(sim) >= count {
            return;
        }
        sim.step().expect("step");
    }
    panic!(
        "program did not retire {count} instructions in {max_steps} cycles (retired {})",
        retired(sim)
    );
}

/// Reads one general-purpose register as u64.
pub fn gp(sim: &Machine, id: u8) -> u64 {
    sim.core().registers().read_gp(id).as_u64()
}
