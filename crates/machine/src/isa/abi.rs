//! Register ABI names.
//!
//! Maps between numeric register identifiers and the standard RISC-V ABI
//! names used by the disassembler and the assembler. A module-wide flag
//! selects whether disassembly renders `x<n>` or ABI names.

use std::sync::atomic::{AtomicBool, Ordering};

/// ABI names of the 32 general-purpose registers.
pub static REGISTER_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

static SYMBOLIC_REGISTERS: AtomicBool = AtomicBool::new(false);

/// Controls usage of ABI register names instead of `x<n>` in disassembly.
pub fn set_symbolic_registers(enable: bool) {
    SYMBOLIC_REGISTERS.store(enable, Ordering::Relaxed);
}

/// Whether disassembly currently renders ABI register names.
pub fn symbolic_registers_enabled() -> bool {
    SYMBOLIC_REGISTERS.load(Ordering::Relaxed)
}

/// Parses a register operand (`x<n>`, an ABI name, or `fp`).
///
/// Returns the register number and the count of characters consumed, or
/// `None` when the prefix is not a register.
pub fn parse_register(token: &str) -> Option<(u8, usize)> {
    let bytes = token.as_bytes();
    if bytes.first() == Some(&b'x') {
        let digits: String = token[1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            return None;
        }
        let number: u32 = digits.parse().ok()?;
        if number > 31 {
            return None;
        }
        return Some((number as u8, 1 + digits.len()));
    }
    if token.starts_with("fp") {
        return Some((8, 2));
    }
    // Longest-match over ABI names so "s10" is not taken as "s1".
    let mut best: Option<(u8, usize)> = None;
    for (number, name) in REGISTER_NAMES.iter().enumerate() {
        if token.starts_with(name) && best.is_none_or(|(_, len)| name.len() > len) {
            best = Some((number as u8, name.len()));
        }
    }
    best
}
