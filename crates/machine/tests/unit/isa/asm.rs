//! Assembler tests: candidate matching, relocations, pseudoinstructions.

use machine::common::Address;
use machine::isa::asm::{
    self, PseudoModifier, RelocationList, SymbolSource, code_from_string, resolve_relocation,
};
use machine::isa::disasm::to_text;
use machine::isa::instruction::Instruction;
use proptest::prelude::*;

struct Symbols(Vec<(&'static str, i64)>);

impl SymbolSource for Symbols {
    fn symbol_value(&self, name: &str) -> Option<i64> {
        self.0
            .iter()
            .find(|(symbol, _)| *symbol == name)
            .map(|(_, value)| *value)
    }
}

fn assemble_one(line: &str, addr: u64) -> u32 {
    let words = code_from_string(line, Address::new(addr), None, "", 0, true)
        .unwrap_or_else(|error| panic!("assembling '{line}': {error}"));
    assert_eq!(words.len(), 1, "'{line}' should assemble to one word");
    words[0]
}

// ══════════════════════════════════════════════════════════
// 1. Base instructions
// ══════════════════════════════════════════════════════════

#[test]
fn assembles_register_arithmetic() {
    assert_eq!(assemble_one("add x3, x1, x2", 0x200), 0x0020_81B3);
    assert_eq!(assemble_one("sub x3, x1, x2", 0x200), 0x4020_81B3);
    assert_eq!(assemble_one("mul x3, x1, x2", 0x200), 0x0220_81B3);
}

#[test]
fn assembles_immediates_and_loads() {
    assert_eq!(assemble_one("addi x2, x0, 1", 0x200), 0x0010_0113);
    assert_eq!(assemble_one("addi x1, x0, -1", 0x200), 0xFFF0_0093);
    assert_eq!(assemble_one("lw x2, 0(x1)", 0x200), 0x0000_A103);
    assert_eq!(assemble_one("sw x2, 4(x1)", 0x200), 0x0020_A223);
}

#[test]
fn assembles_abi_register_names() {
    // a0 is x10, sp is x2.
    assert_eq!(
        assemble_one("addi a0, sp, 8", 0x200),
        assemble_one("addi x10, x2, 8", 0x200)
    );
}

#[test]
fn branch_targets_are_absolute_addresses() {
    // A branch at 0x200 targeting 0x208.
    let word = assemble_one("beq x0, x0, 0x208", 0x200);
    assert_eq!(Instruction::new(word).immediate(), 8);
}

#[test]
fn rejects_out_of_range_immediates() {
    assert!(code_from_string("addi x1, x0, 5000", Address::new(0x200), None, "", 0, true).is_err());
    assert!(code_from_string("addi x1, x0, -3000", Address::new(0x200), None, "", 0, true).is_err());
}

#[test]
fn rejects_unknown_mnemonics_and_bad_operands() {
    assert!(code_from_string("frobnicate x1", Address::new(0x200), None, "", 0, true).is_err());
    assert!(code_from_string("add x1, x2", Address::new(0x200), None, "", 0, true).is_err());
    assert!(code_from_string("add x1, x2, 7", Address::new(0x200), None, "", 0, true).is_err());
}

#[test]
fn assembles_csr_instructions() {
    // csrrw x1, 0x300, x2
    let word = assemble_one("csrrw x1, 0x300, x2", 0x200);
    assert_eq!(Instruction::new(word).csr_address(), 0x300);
    assert_eq!(word & 0x707F, 0x1073);
}

// ══════════════════════════════════════════════════════════
// 2. Disassembly round trip
// ══════════════════════════════════════════════════════════

/// Disassembling an encoding and re-assembling the text reproduces the word.
#[test]
fn disassembly_reassembles_to_same_word() {
    let samples: &[u32] = &[
        0x0010_0113, // addi
        0xFFF0_0093, // addi negative
        0x0020_81B3, // add
        0x4020_81B3, // sub
        0x0220_C1B3, // div
        0x0000_A103, // lw
        0x0020_A223, // sw
        0x0020_C463, // blt taken forward
        0x8002_00B7, // lui
        0x0000_0073, // ecall
    ];
    for &word in samples {
        let text = to_text(Instruction::new(word), Address::new(0x200));
        let back = assemble_one(&text, 0x200);
        assert_eq!(back, word, "round trip of '{text}'");
    }
}

proptest! {
    /// Small arithmetic immediates survive assemble → disassemble → assemble.
    #[test]
    fn addi_roundtrip(rd in 0u8..32, rs in 0u8..32, imm in -0x800i64..0x800) {
        let line = format!("addi x{rd}, x{rs}, {imm}");
        let word = assemble_one(&line, 0x200);
        let text = to_text(Instruction::new(word), Address::new(0x200));
        prop_assert_eq!(assemble_one(&text, 0x200), word);
    }
}

// ══════════════════════════════════════════════════════════
// 3. Pseudoinstructions
// ══════════════════════════════════════════════════════════

#[test]
fn expands_simple_pseudoinstructions() {
    assert_eq!(assemble_one("nop", 0x200), 0x0000_0013);
    assert_eq!(
        assemble_one("mv x5, x6", 0x200),
        assemble_one("addi x5, x6, 0", 0x200)
    );
    assert_eq!(
        assemble_one("not x5, x6", 0x200),
        assemble_one("xori x5, x6, -1", 0x200)
    );
    assert_eq!(
        assemble_one("neg x5, x6", 0x200),
        assemble_one("sub x5, x0, x6", 0x200)
    );
    assert_eq!(
        assemble_one("seqz x5, x6", 0x200),
        assemble_one("sltiu x5, x6, 1", 0x200)
    );
    assert_eq!(
        assemble_one("beqz x5, 0x208", 0x200),
        assemble_one("beq x5, x0, 0x208", 0x200)
    );
    assert_eq!(
        assemble_one("j 0x210", 0x200),
        assemble_one("jal x0, 0x210", 0x200)
    );
    assert_eq!(
        assemble_one("ret", 0x200),
        assemble_one("jalr x0, 0(x1)", 0x200)
    );
}

#[test]
fn small_li_uses_single_addi() {
    assert_eq!(
        assemble_one("li x5, 42", 0x200),
        assemble_one("addi x5, x0, 42", 0x200)
    );
    assert_eq!(
        assemble_one("li x5, -1", 0x200),
        assemble_one("addi x5, x0, -1", 0x200)
    );
}

#[test]
fn large_li_splits_into_lui_addi() {
    let words = code_from_string("li x5, 0x12345678", Address::new(0x200), None, "", 0, true)
        .expect("li expansion");
    assert_eq!(words.len(), 2);
    // The upper part compensates for the sign of the lower part.
    assert_eq!(words[0], assemble_one("lui x5, 0x12345000", 0x200));
    let lower = Instruction::new(words[1]);
    assert_eq!(lower.immediate(), 0x678);
    // Value with bit 11 set: the upper half rounds up.
    let words = code_from_string("li x5, 0x12345800", Address::new(0x200), None, "", 0, true)
        .expect("li expansion");
    assert_eq!(words[0], assemble_one("lui x5, 0x12346000", 0x200));
    assert_eq!(Instruction::new(words[1]).immediate(), -0x800);
}

// ══════════════════════════════════════════════════════════
// 4. Relocations
// ══════════════════════════════════════════════════════════

#[test]
fn symbolic_branch_defers_a_relocation() {
    let mut relocations = RelocationList::new();
    let words = code_from_string(
        "beq x1, x2, loop_head",
        Address::new(0x240),
        Some(&mut relocations),
        "test.S",
        7,
        true,
    )
    .expect("deferred encode");
    assert_eq!(words.len(), 1);
    assert_eq!(relocations.len(), 1);
    let record = &relocations[0];
    assert_eq!(record.expression, "loop_head");
    assert_eq!(record.offset, -0x240);
    assert_eq!(record.line, 7);
    assert_eq!(record.modifier, PseudoModifier::None);

    // Resolution patches the branch towards the symbol.
    let symbols = Symbols(vec![("loop_head", 0x200)]);
    let patched = resolve_relocation(words[0], record, &symbols).expect("resolve");
    assert_eq!(patched, assemble_one("beq x1, x2, 0x200", 0x240));
}

#[test]
fn relocation_range_and_alignment_are_checked() {
    let mut relocations = RelocationList::new();
    let words = code_from_string(
        "beq x0, x0, target",
        Address::new(0x200),
        Some(&mut relocations),
        "",
        0,
        true,
    )
    .expect("deferred encode");

    // Misaligned target: branch offsets are even.
    let odd = Symbols(vec![("target", 0x205)]);
    assert!(resolve_relocation(words[0], &relocations[0], &odd).is_err());

    // Out of range target.
    let far = Symbols(vec![("target", 0x4_0000)]);
    assert!(resolve_relocation(words[0], &relocations[0], &far).is_err());
}

#[test]
fn composed_immediate_relocations_split_symbol() {
    let mut relocations = RelocationList::new();
    let words = code_from_string(
        "la x5, data_block",
        Address::new(0x200),
        Some(&mut relocations),
        "",
        0,
        true,
    )
    .expect("la expansion");
    assert_eq!(words.len(), 2);
    assert_eq!(relocations.len(), 2);
    assert_eq!(relocations[0].modifier, PseudoModifier::ComposedImmUpper);
    assert_eq!(relocations[1].modifier, PseudoModifier::ComposedImmLower);

    let symbols = Symbols(vec![("data_block", 0x1_2801)]);
    let upper = resolve_relocation(words[0], &relocations[0], &symbols).expect("upper");
    let lower = resolve_relocation(words[1], &relocations[1], &symbols).expect("lower");
    // upper carries value[31:12] + value[11]; lower sign-extends value[11:0].
    assert_eq!(upper, assemble_one("lui x5, 0x13000", 0x200));
    assert_eq!(Instruction::new(lower).immediate(), -0x7FF);
}

#[test]
fn undefined_symbols_fail_resolution() {
    let mut relocations = RelocationList::new();
    let words = code_from_string(
        "beq x0, x0, missing",
        Address::new(0x200),
        Some(&mut relocations),
        "",
        0,
        true,
    )
    .expect("deferred encode");
    let symbols = Symbols(vec![]);
    assert!(resolve_relocation(words[0], &relocations[0], &symbols).is_err());
}

// ══════════════════════════════════════════════════════════
// 5. Expression evaluation
// ══════════════════════════════════════════════════════════

#[test]
fn expressions_follow_precedence() {
    let symbols = Symbols(vec![("base", 0x100), ("len", 8)]);
    assert_eq!(asm::eval_expression("base+len*4", &symbols).unwrap(), 0x120);
    assert_eq!(asm::eval_expression("base|3", &symbols).unwrap(), 0x103);
    assert_eq!(asm::eval_expression("~0", &symbols).unwrap(), -1);
    assert_eq!(asm::eval_expression("base-len/2", &symbols).unwrap(), 0xFC);
    assert_eq!(asm::eval_expression("0x10^0x3", &symbols).unwrap(), 0x13);
}

#[test]
fn expression_errors_are_reported() {
    let symbols = Symbols(vec![]);
    assert!(asm::eval_expression("1/0", &symbols).is_err());
    assert!(asm::eval_expression("nosuch", &symbols).is_err());
    assert!(asm::eval_expression("1+", &symbols).is_err());
}
