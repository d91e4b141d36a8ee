//! Pipeline behavior tests: forwarding, stalls, mispredict flush, and
//! equivalence between the core variants.

use machine::config::{HazardUnit, MachineConfig};
use machine::machine::MachineStatus;
use pretty_assertions::assert_eq;

use crate::common::{assemble, gp, machine_with_program, retired, run_until_retired};

fn pipelined_config(hazard_unit: HazardUnit) -> MachineConfig {
    MachineConfig {
        pipelined: true,
        hazard_unit,
        ..MachineConfig::default()
    }
}

/// The S1 program: write-after-write into x1 plus immediate dependences that
/// need forwarding from both the memory and writeback stages.
fn forwarding_program() -> Vec<u32> {
    vec![
        0x0010_0113, // addi x2, x0, 1
        0x1110_0093, // addi x1, x0, 0x111
        0x2220_0093, // addi x1, x0, 0x222
        0x0020_81B3, // add x3, x1, x2
        0x0020_8233, // add x4, x1, x2
    ]
}

#[test]
fn single_cycle_executes_arithmetic_chain() {
    let mut sim = machine_with_program(MachineConfig::default(), &forwarding_program());
    run_until_retired(&mut sim, 5, 20);
    assert_eq!(gp(&sim, 1), 0x222);
    assert_eq!(gp(&sim, 2), 1);
    assert_eq!(gp(&sim, 3), 0x223);
    assert_eq!(gp(&sim, 4), 0x223);
}

#[test]
fn forwarding_resolves_raw_hazards() {
    let mut sim = machine_with_program(
        pipelined_config(HazardUnit::StallForward),
        &forwarding_program(),
    );
    run_until_retired(&mut sim, 5, 40);
    assert_eq!(gp(&sim, 1), 0x222);
    assert_eq!(gp(&sim, 2), 1);
    assert_eq!(gp(&sim, 3), 0x223, "x3 needs the freshest x1");
    assert_eq!(gp(&sim, 4), 0x223, "x4 needs the freshest x1");
}

#[test]
fn stalling_hazard_unit_also_resolves_raw_hazards() {
    let mut sim = machine_with_program(
        pipelined_config(HazardUnit::Stall),
        &forwarding_program(),
    );
    run_until_retired(&mut sim, 5, 60);
    assert_eq!(gp(&sim, 3), 0x223);
    assert_eq!(gp(&sim, 4), 0x223);
    assert!(sim.core().stall_count() > 0, "stall mode inserts bubbles");
}

#[test]
fn disabled_hazard_unit_reads_stale_values() {
    // Instructive misbehavior: without interlocks the adds read the old x1.
    let mut sim = machine_with_program(
        pipelined_config(HazardUnit::None),
        &forwarding_program(),
    );
    run_until_retired(&mut sim, 5, 40);
    assert_eq!(gp(&sim, 1), 0x222);
    assert_ne!(gp(&sim, 3), 0x223, "no forwarding: x3 sees a stale x1");
}

/// The S2 scenario: a taken forward branch must not commit skipped
/// instructions.
#[test]
fn taken_branch_flushes_wrong_path() {
    let program = assemble(&[
        "addi x1, x0, -1",   // 0x200
        "addi x2, x0, 1",    // 0x204
        "blt x1, x2, 0x214", // 0x208: taken (-1 < 1)
        "addi x3, x0, 0x99", // 0x20c: must not commit
        "addi x4, x0, 0x88", // 0x210: must not commit
        "addi x5, x0, 0x77", // 0x214: branch target
    ]);
    for config in [
        MachineConfig::default(),
        pipelined_config(HazardUnit::StallForward),
        pipelined_config(HazardUnit::None),
    ] {
        let mut sim = machine_with_program(config, &program);
        run_until_retired(&mut sim, 4, 40);
        assert_eq!(gp(&sim, 3), 0, "skipped instruction committed");
        assert_eq!(gp(&sim, 4), 0, "skipped instruction committed");
        assert_eq!(gp(&sim, 5), 0x77, "branch target missed");
    }
}

#[test]
fn backward_branch_loops() {
    let program = assemble(&[
        "addi x1, x0, 5",    // 0x200
        "addi x2, x2, 1",    // 0x204: loop body
        "addi x1, x1, -1",   // 0x208
        "bne x1, x0, 0x204", // 0x20c
        "addi x3, x0, 1",    // 0x210: after the loop
    ]);
    let mut sim = machine_with_program(pipelined_config(HazardUnit::StallForward), &program);
    run_until_retired(&mut sim, 17, 200);
    assert_eq!(gp(&sim, 2), 5, "loop body must run five times");
    assert_eq!(gp(&sim, 3), 1);
}

#[test]
fn jal_writes_return_address_and_jumps() {
    let program = assemble(&[
        "jal x1, 0x20c",     // 0x200 → target 0x20c, x1 = 0x204
        "addi x2, x0, 0x99", // 0x204: skipped
        "addi x3, x0, 0x88", // 0x208: skipped
        "addi x4, x0, 1",    // 0x20c
    ]);
    let mut sim = machine_with_program(pipelined_config(HazardUnit::StallForward), &program);
    run_until_retired(&mut sim, 2, 40);
    assert_eq!(gp(&sim, 1), 0x204);
    assert_eq!(gp(&sim, 2), 0);
    assert_eq!(gp(&sim, 4), 1);
}

#[test]
fn jalr_jumps_through_register() {
    let program = assemble(&[
        "addi x1, x0, 0x210", // 0x200
        "jalr x5, 0(x1)",     // 0x204 → 0x210, x5 = 0x208
        "addi x2, x0, 0x99",  // 0x208: skipped
        "addi x3, x0, 0x88",  // 0x20c: skipped
        "addi x4, x0, 1",     // 0x210
    ]);
    let mut sim = machine_with_program(pipelined_config(HazardUnit::StallForward), &program);
    run_until_retired(&mut sim, 3, 40);
    assert_eq!(gp(&sim, 5), 0x208);
    assert_eq!(gp(&sim, 2), 0);
    assert_eq!(gp(&sim, 3), 0);
    assert_eq!(gp(&sim, 4), 1);
}

#[test]
fn load_use_hazard_stalls_once() {
    let program = assemble(&[
        "addi x1, x0, 0x400", // base
        "addi x2, x0, 42",
        "sw x2, 0(x1)",
        "lw x3, 0(x1)",
        "add x4, x3, x3", // load-use dependence
    ]);
    let mut sim = machine_with_program(pipelined_config(HazardUnit::StallForward), &program);
    run_until_retired(&mut sim, 5, 60);
    assert_eq!(gp(&sim, 3), 42);
    assert_eq!(gp(&sim, 4), 84);
    assert!(sim.core().stall_count() >= 1, "load-use must stall");
}

#[test]
fn ebreak_stops_the_machine() {
    let program = assemble(&["addi x1, x0, 7", "ebreak", "addi x2, x0, 9"]);
    let mut sim = machine_with_program(pipelined_config(HazardUnit::StallForward), &program);
    let _ = sim.play(100);
    assert_eq!(sim.status(), MachineStatus::Trapped);
    assert_eq!(gp(&sim, 1), 7);
    assert_eq!(gp(&sim, 2), 0, "nothing after EBREAK commits");
}

/// For a straight-line program both core variants finish with the same
/// register file (P12).
#[test]
fn pipelined_matches_single_cycle() {
    let program = assemble(&[
        "addi x1, x0, 100",
        "addi x2, x0, 37",
        "add x3, x1, x2",
        "sub x4, x1, x2",
        "xor x5, x3, x4",
        "slli x6, x5, 3",
        "sltu x7, x2, x1",
        "andi x8, x6, 0xFF",
        "or x9, x8, x7",
    ]);
    let retire_count = 9;

    let mut single = machine_with_program(MachineConfig::default(), &program);
    run_until_retired(&mut single, retire_count, 100);

    let mut pipelined =
        machine_with_program(pipelined_config(HazardUnit::StallForward), &program);
    run_until_retired(&mut pipelined, retire_count, 100);

    for id in 0..32 {
        assert_eq!(
            gp(&single, id),
            gp(&pipelined, id),
            "register x{id} differs between core variants"
        );
    }
    assert_eq!(retired(&single), retired(&pipelined));
}
