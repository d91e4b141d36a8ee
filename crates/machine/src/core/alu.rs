//! Arithmetic logic unit.
//!
//! This module implements the combinational function used by the execute
//! stage. It computes a single result from two operands with no side effects:
//! 1. **Integer ALU:** Add/sub, shifts, comparisons, and bitwise logic.
//! 2. **Multiplier:** The full M-extension multiply/divide family.
//! 3. **Word variants:** 32-bit operations whose result is sign-extended into
//!    the 64-bit register, per the RISC-V word-operation rules.

use crate::common::error::{SimResult, SimulatorError};
use crate::common::value::RegisterValue;

/// Operation selector of the basic integer ALU (matches `funct3`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum AluOp {
    /// Addition; subtraction when the modifier bit is set.
    #[default]
    Add = 0b000,
    /// Shift left logical.
    Sll = 0b001,
    /// Set less than, signed.
    Slt = 0b010,
    /// Set less than, unsigned.
    Sltu = 0b011,
    /// Bitwise exclusive or.
    Xor = 0b100,
    /// Shift right; arithmetic when the modifier bit is set.
    Sr = 0b101,
    /// Bitwise or.
    Or = 0b110,
    /// Bitwise and.
    And = 0b111,
}

/// Operation selector of the multiplier component (matches `funct3`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MulOp {
    /// Low XLEN bits of the product.
    #[default]
    Mul = 0b000,
    /// High bits of the signed × signed product.
    Mulh = 0b001,
    /// High bits of the signed × unsigned product.
    Mulhsu = 0b010,
    /// High bits of the unsigned × unsigned product.
    Mulhu = 0b011,
    /// Signed division.
    Div = 0b100,
    /// Unsigned division.
    Divu = 0b101,
    /// Signed remainder.
    Rem = 0b110,
    /// Unsigned remainder.
    Remu = 0b111,
}

/// Computational component selected for the execute stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AluComponent {
    /// Basic integer ALU.
    #[default]
    Alu,
    /// M-extension multiplier/divider.
    Mul,
    /// Pass operand A through unchanged (CSR data movement).
    Pass,
}

/// Operation selector covering both ALU components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluCombinedOp {
    /// Operation of the basic integer ALU.
    Alu(AluOp),
    /// Operation of the multiplier.
    Mul(MulOp),
}

impl Default for AluCombinedOp {
    fn default() -> Self {
        Self::Alu(AluOp::Add)
    }
}

/// Shift operand masks: 5 bits for 32-bit operation, 6 bits for 64-bit.
const SHIFT_MASK_32: u64 = 0b01_1111;
const SHIFT_MASK_64: u64 = 0b11_1111;

/// Computes the execute-stage result.
///
/// # Arguments
///
/// * `op` - Operation selector; must match `component`.
/// * `component` - Which computational component performs the operation.
/// * `w_operation` - Limit the operation to 32-bit word semantics.
/// * `modified` - Alternative encodings: SUB for ADD, arithmetic for SR.
/// * `a` - First operand.
/// * `b` - Second operand.
///
/// # Errors
///
/// Returns [`SimulatorError::UnsupportedAluOperation`] when `op` selects a
/// different component than `component` (a decode sanity violation).
pub fn alu_combined_operate(
    op: AluCombinedOp,
    component: AluComponent,
    w_operation: bool,
    modified: bool,
    a: RegisterValue,
    b: RegisterValue,
) -> SimResult<RegisterValue> {
    match (component, op) {
        (AluComponent::Alu, AluCombinedOp::Alu(alu_op)) => Ok(if w_operation {
            RegisterValue::from(alu32_operate(alu_op, modified, a, b))
        } else {
            RegisterValue::from(alu64_operate(alu_op, modified, a, b))
        }),
        (AluComponent::Mul, AluCombinedOp::Mul(mul_op)) => Ok(if w_operation {
            RegisterValue::from(mul32_operate(mul_op, a, b))
        } else {
            RegisterValue::from(mul64_operate(mul_op, a, b))
        }),
        (AluComponent::Pass, _) => Ok(a),
        (component, op) => Err(SimulatorError::UnsupportedAluOperation(format!(
            "component {component:?} cannot execute {op:?}"
        ))),
    }
}

fn alu64_operate(op: AluOp, modified: bool, a: RegisterValue, b: RegisterValue) -> i64 {
    let ua = a.as_u64();
    let ub = b.as_u64();

    match op {
        AluOp::Add => {
            if modified {
                ua.wrapping_sub(ub) as i64
            } else {
                ua.wrapping_add(ub) as i64
            }
        }
        AluOp::Sll => (ua << (ub & SHIFT_MASK_64)) as i64,
        AluOp::Slt => i64::from(a.as_i64() < b.as_i64()),
        AluOp::Sltu => i64::from(ua < ub),
        AluOp::Xor => (ua ^ ub) as i64,
        AluOp::Sr => {
            if modified {
                a.as_i64() >> (ub & SHIFT_MASK_64)
            } else {
                (ua >> (ub & SHIFT_MASK_64)) as i64
            }
        }
        AluOp::Or => (ua | ub) as i64,
        AluOp::And => (ua & ub) as i64,
    }
}

fn alu32_operate(op: AluOp, modified: bool, a: RegisterValue, b: RegisterValue) -> i32 {
    let ua = a.as_u32();
    let ub = b.as_u32();

    match op {
        AluOp::Add => {
            if modified {
                ua.wrapping_sub(ub) as i32
            } else {
                ua.wrapping_add(ub) as i32
            }
        }
        AluOp::Sll => (ua << (u64::from(ub) & SHIFT_MASK_32)) as i32,
        AluOp::Slt => i32::from(a.as_i32() < b.as_i32()),
        AluOp::Sltu => i32::from(ua < ub),
        AluOp::Xor => (ua ^ ub) as i32,
        AluOp::Sr => {
            if modified {
                a.as_i32() >> (u64::from(ub) & SHIFT_MASK_32)
            } else {
                (ua >> (u64::from(ub) & SHIFT_MASK_32)) as i32
            }
        }
        AluOp::Or => (ua | ub) as i32,
        AluOp::And => (ua & ub) as i32,
    }
}

fn mul64_operate(op: MulOp, a: RegisterValue, b: RegisterValue) -> i64 {
    match op {
        MulOp::Mul => a.as_u64().wrapping_mul(b.as_u64()) as i64,
        MulOp::Mulh => ((i128::from(a.as_i64()) * i128::from(b.as_i64())) >> 64) as i64,
        MulOp::Mulhsu => {
            ((i128::from(a.as_i64()) * (u128::from(b.as_u64()) as i128)) >> 64) as i64
        }
        MulOp::Mulhu => ((u128::from(a.as_u64()) * u128::from(b.as_u64())) >> 64) as i64,
        MulOp::Div => {
            if b.as_i64() == 0 {
                -1 // Division by zero is defined.
            } else if a.as_i64() == i64::MIN && b.as_i64() == -1 {
                i64::MIN // Overflow.
            } else {
                a.as_i64().wrapping_div(b.as_i64())
            }
        }
        MulOp::Divu => {
            if b.as_u64() == 0 {
                -1 // All ones.
            } else {
                (a.as_u64() / b.as_u64()) as i64
            }
        }
        MulOp::Rem => {
            if b.as_i64() == 0 {
                a.as_i64() // Remainder of division by zero is the dividend.
            } else if a.as_i64() == i64::MIN && b.as_i64() == -1 {
                0 // Overflow.
            } else {
                a.as_i64().wrapping_rem(b.as_i64())
            }
        }
        MulOp::Remu => {
            if b.as_u64() == 0 {
                a.as_u64() as i64
            } else {
                (a.as_u64() % b.as_u64()) as i64
            }
        }
    }
}

fn mul32_operate(op: MulOp, a: RegisterValue, b: RegisterValue) -> i32 {
    match op {
        MulOp::Mul => a.as_u32().wrapping_mul(b.as_u32()) as i32,
        MulOp::Mulh => ((i64::from(a.as_i32()) * i64::from(b.as_i32())) >> 32) as i32,
        MulOp::Mulhsu => ((i64::from(a.as_i32()) * i64::from(b.as_u32())) >> 32) as i32,
        MulOp::Mulhu => ((u64::from(a.as_u32()) * u64::from(b.as_u32())) >> 32) as i32,
        MulOp::Div => {
            if b.as_i32() == 0 {
                -1
            } else if a.as_i32() == i32::MIN && b.as_i32() == -1 {
                i32::MIN
            } else {
                a.as_i32().wrapping_div(b.as_i32())
            }
        }
        MulOp::Divu => {
            if b.as_u32() == 0 {
                -1
            } else {
                (a.as_u32() / b.as_u32()) as i32
            }
        }
        MulOp::Rem => {
            if b.as_i32() == 0 {
                a.as_i32()
            } else if a.as_i32() == i32::MIN && b.as_i32() == -1 {
                0
            } else {
                a.as_i32().wrapping_rem(b.as_i32())
            }
        }
        MulOp::Remu => {
            if b.as_u32() == 0 {
                a.as_u32() as i32
            } else {
                (a.as_u32() % b.as_u32()) as i32
            }
        }
    }
}
