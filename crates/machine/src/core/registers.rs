//! General-purpose register file and program counter.
//!
//! This module implements the architectural register state:
//! 1. **Storage:** 32 general-purpose registers plus the program counter.
//! 2. **Invariant enforcement:** Register `x0` reads as zero and silently
//!    drops writes; the program counter only accepts 4-byte-aligned values.

use crate::common::address::Address;
use crate::common::error::{SimResult, SimulatorError};
use crate::common::value::{REGISTER_COUNT, RegisterId, RegisterValue};

/// Architectural register file.
#[derive(Clone, PartialEq, Eq)]
pub struct Registers {
    gp: [RegisterValue; REGISTER_COUNT],
    pc: Address,
}

impl Registers {
    /// Creates a register file with all registers zero and the PC at `pc`.
    pub fn new(pc: Address) -> Self {
        Self {
            gp: [RegisterValue::default(); REGISTER_COUNT],
            pc,
        }
    }

    /// Reads a general-purpose register. Register `x0` always yields zero.
    pub fn read_gp(&self, id: RegisterId) -> RegisterValue {
        if id == 0 {
            RegisterValue::default()
        } else {
            self.gp[id as usize]
        }
    }

    /// Writes a general-purpose register. Writes to `x0` are dropped.
    pub fn write_gp(&mut self, id: RegisterId, value: RegisterValue) {
        if id != 0 {
            self.gp[id as usize] = value;
        }
    }

    /// Current program counter.
    pub fn read_pc(&self) -> Address {
        self.pc
    }

    /// Redirects the program counter.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::UnalignedJump`] when the target is not
    /// 4-byte aligned.
    pub fn write_pc(&mut self, address: Address) -> SimResult<()> {
        if !address.is_aligned(4) {
            return Err(SimulatorError::UnalignedJump(address.raw()));
        }
        self.pc = address;
        Ok(())
    }

    /// Resets every general-purpose register to zero and the PC to `pc`.
    pub fn reset(&mut self, pc: Address) {
        self.gp = [RegisterValue::default(); REGISTER_COUNT];
        self.pc = pc;
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(Address::null())
    }
}
