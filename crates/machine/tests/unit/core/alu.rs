//! ALU operation tests.
//!
//! Exercises the combined ALU/multiplier dispatch: integer operations, the
//! M-extension family with its division edge cases, 32-bit word variants,
//! and purity of the whole function.

use machine::common::RegisterValue;
use machine::core::alu::{AluCombinedOp, AluComponent, AluOp, MulOp, alu_combined_operate};
use proptest::prelude::*;

fn alu(op: AluOp, modified: bool, a: u64, b: u64) -> u64 {
    alu_combined_operate(
        AluCombinedOp::Alu(op),
        AluComponent::Alu,
        false,
        modified,
        RegisterValue::new(a),
        RegisterValue::new(b),
    )
    .expect("alu dispatch")
    .as_u64()
}

fn alu32(op: AluOp, modified: bool, a: u64, b: u64) -> u64 {
    alu_combined_operate(
        AluCombinedOp::Alu(op),
        AluComponent::Alu,
        true,
        modified,
        RegisterValue::new(a),
        RegisterValue::new(b),
    )
    .expect("alu dispatch")
    .as_u64()
}

fn mul(op: MulOp, a: u64, b: u64) -> u64 {
    alu_combined_operate(
        AluCombinedOp::Mul(op),
        AluComponent::Mul,
        false,
        false,
        RegisterValue::new(a),
        RegisterValue::new(b),
    )
    .expect("mul dispatch")
    .as_u64()
}

fn mul32(op: MulOp, a: u64, b: u64) -> u64 {
    alu_combined_operate(
        AluCombinedOp::Mul(op),
        AluComponent::Mul,
        true,
        false,
        RegisterValue::new(a),
        RegisterValue::new(b),
    )
    .expect("mul dispatch")
    .as_u64()
}

// ══════════════════════════════════════════════════════════
// 1. Integer operations
// ══════════════════════════════════════════════════════════

#[test]
fn add_and_sub_via_modifier() {
    assert_eq!(alu(AluOp::Add, false, 42, 8), 50);
    assert_eq!(alu(AluOp::Add, true, 42, 8), 34);
    assert_eq!(alu(AluOp::Add, true, 0, 1), u64::MAX);
}

#[test]
fn comparisons() {
    assert_eq!(alu(AluOp::Slt, false, (-5i64) as u64, 10), 1);
    assert_eq!(alu(AluOp::Slt, false, 10, (-5i64) as u64), 0);
    assert_eq!(alu(AluOp::Sltu, false, (-5i64) as u64, 10), 0);
    assert_eq!(alu(AluOp::Sltu, false, 3, 10), 1);
}

#[test]
fn shifts_mask_their_amount() {
    // 64-bit shifts use the low 6 bits of the amount.
    assert_eq!(alu(AluOp::Sll, false, 1, 64 + 4), 0x10);
    assert_eq!(alu(AluOp::Sr, false, 0x100, 4), 0x10);
    // Arithmetic right shift keeps the sign.
    assert_eq!(alu(AluOp::Sr, true, (-16i64) as u64, 2), (-4i64) as u64);
    // 32-bit shifts use the low 5 bits.
    assert_eq!(alu32(AluOp::Sll, false, 1, 32 + 4), 0x10);
}

#[test]
fn word_operations_sign_extend() {
    // 0x7FFFFFFF + 1 wraps to the negative 32-bit boundary.
    assert_eq!(
        alu32(AluOp::Add, false, 0x7FFF_FFFF, 1),
        0xFFFF_FFFF_8000_0000
    );
    assert_eq!(alu32(AluOp::Add, false, 0xFFFF_FFFF, 1), 0);
}

// ══════════════════════════════════════════════════════════
// 2. M extension
// ══════════════════════════════════════════════════════════

/// The S4 scenario values.
#[test]
fn multiply_divide_remainder_chain() {
    assert_eq!(mul(MulOp::Mul, 1_111_111, 7), 7_777_777);
    assert_eq!(mul(MulOp::Div, 7_777_777, 7), 1_111_111);
    assert_eq!(mul(MulOp::Rem, 7_777_777, 1000), 777);
}

#[test]
fn high_multiplies() {
    assert_eq!(mul(MulOp::Mulhu, u64::MAX, u64::MAX), 0xFFFF_FFFF_FFFF_FFFE);
    assert_eq!(mul(MulOp::Mulh, (-1i64) as u64, (-1i64) as u64), 0);
    assert_eq!(mul(MulOp::Mulh, (-1i64) as u64, 1), (-1i64) as u64);
    assert_eq!(mul(MulOp::Mulhsu, (-1i64) as u64, 2), (-1i64) as u64);
}

#[test]
fn division_by_zero_is_defined() {
    assert_eq!(mul(MulOp::Div, 77, 0), u64::MAX); // all ones
    assert_eq!(mul(MulOp::Divu, 77, 0), u64::MAX);
    assert_eq!(mul(MulOp::Rem, 77, 0), 77);
    assert_eq!(mul(MulOp::Remu, 77, 0), 77);
}

#[test]
fn signed_division_overflow_is_defined() {
    let int_min = i64::MIN as u64;
    assert_eq!(mul(MulOp::Div, int_min, (-1i64) as u64), int_min);
    assert_eq!(mul(MulOp::Rem, int_min, (-1i64) as u64), 0);

    let int32_min = i32::MIN as i64 as u64;
    assert_eq!(mul32(MulOp::Div, int32_min, (-1i64) as u64), int32_min);
    assert_eq!(mul32(MulOp::Rem, int32_min, (-1i64) as u64), 0);
}

#[test]
fn word_divides_sign_extend() {
    assert_eq!(mul32(MulOp::Divu, 0xFFFF_FFFF, 1), 0xFFFF_FFFF_FFFF_FFFF);
    assert_eq!(mul32(MulOp::Remu, 7, 0), 7);
}

// ══════════════════════════════════════════════════════════
// 3. Sanity and purity
// ══════════════════════════════════════════════════════════

#[test]
fn component_mismatch_is_rejected() {
    let result = alu_combined_operate(
        AluCombinedOp::Mul(MulOp::Mul),
        AluComponent::Alu,
        false,
        false,
        RegisterValue::new(1),
        RegisterValue::new(2),
    );
    assert!(result.is_err());
}

#[test]
fn pass_component_returns_first_operand() {
    let result = alu_combined_operate(
        AluCombinedOp::Alu(AluOp::Add),
        AluComponent::Pass,
        false,
        false,
        RegisterValue::new(0xABCD),
        RegisterValue::new(0x1234),
    )
    .expect("pass dispatch");
    assert_eq!(result.as_u64(), 0xABCD);
}

proptest! {
    /// The ALU is a pure function: identical inputs give identical results.
    #[test]
    fn alu_is_pure(a in any::<u64>(), b in any::<u64>(), modified in any::<bool>()) {
        for op in [AluOp::Add, AluOp::Sll, AluOp::Slt, AluOp::Sltu,
                   AluOp::Xor, AluOp::Sr, AluOp::Or, AluOp::And] {
            prop_assert_eq!(alu(op, modified, a, b), alu(op, modified, a, b));
        }
    }

    /// Unsigned divide/remainder reconstruct the dividend.
    #[test]
    fn divu_remu_reconstruct(a in any::<u64>(), b in 1u64..) {
        let quotient = mul(MulOp::Divu, a, b);
        let remainder = mul(MulOp::Remu, a, b);
        prop_assert_eq!(quotient.wrapping_mul(b).wrapping_add(remainder), a);
    }
}
