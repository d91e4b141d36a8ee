//! Machine-wide definitions shared by the pipeline and the memory system.
//!
//! This module holds the enumerations that cross subsystem boundaries:
//! 1. **Access control:** The memory-stage operation selector carried through
//!    the pipeline and interpreted by the memory frontends.
//! 2. **Exception causes:** Architectural cause codes written to `mcause`.
//! 3. **Location status:** Flags describing a memory location for inspection
//!    interfaces (not on the simulation critical path).

use std::ops::BitOr;

/// Memory access operation decoded from the instruction.
///
/// Regular accesses carry their width and signedness; special accesses cover
/// the reservation and atomic families handled in the memory stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessControl {
    /// No memory operation.
    #[default]
    None,
    /// Signed 8-bit access.
    I8,
    /// Unsigned 8-bit access.
    U8,
    /// Signed 16-bit access.
    I16,
    /// Unsigned 16-bit access.
    U16,
    /// Signed 32-bit access.
    I32,
    /// Unsigned 32-bit access.
    U32,
    /// Signed 64-bit access.
    I64,
    /// Unsigned 64-bit access.
    U64,
    /// Load-reserved, 32-bit.
    Lr32,
    /// Store-conditional, 32-bit.
    Sc32,
    /// Atomic swap, 32-bit.
    AmoSwap32,
    /// Atomic add, 32-bit.
    AmoAdd32,
    /// Atomic XOR, 32-bit.
    AmoXor32,
    /// Atomic AND, 32-bit.
    AmoAnd32,
    /// Atomic OR, 32-bit.
    AmoOr32,
    /// Atomic minimum (signed), 32-bit.
    AmoMin32,
    /// Atomic maximum (signed), 32-bit.
    AmoMax32,
    /// Atomic minimum (unsigned), 32-bit.
    AmoMinu32,
    /// Atomic maximum (unsigned), 32-bit.
    AmoMaxu32,
    /// Cache maintenance operation (FENCE.I and friends).
    CacheOp,
}

impl AccessControl {
    /// Whether this is a plain load/store access.
    pub const fn is_regular(self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::U8
                | Self::I16
                | Self::U16
                | Self::I32
                | Self::U32
                | Self::I64
                | Self::U64
        )
    }

    /// Whether this access requires memory-stage special handling.
    pub const fn is_special(self) -> bool {
        !matches!(self, Self::None) && !self.is_regular()
    }

    /// Access width in bytes (0 for `None` and `CacheOp`).
    pub const fn width(self) -> u64 {
        match self {
            Self::None | Self::CacheOp => 0,
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I64 | Self::U64 => 8,
            _ => 4,
        }
    }
}

/// Architectural exception and interrupt cause codes.
///
/// Values 0–15 match the RISC-V privileged specification encoding for
/// `mcause`; the remaining entries are simulator-internal causes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ExceptionCause {
    /// No exception pending.
    #[default]
    None = 0,
    /// Instruction access fault.
    InstructionFault = 1,
    /// Illegal (unknown or unsupported) instruction.
    IllegalInstruction = 2,
    /// Breakpoint (`EBREAK`).
    Break = 3,
    /// Load address misaligned.
    LoadMisaligned = 4,
    /// Load access fault.
    LoadFault = 5,
    /// Store/AMO address misaligned.
    StoreMisaligned = 6,
    /// Store/AMO access fault.
    StoreFault = 7,
    /// Environment call from U-mode.
    EcallUser = 8,
    /// Environment call from S-mode.
    EcallSupervisor = 9,
    /// Environment call from M-mode.
    EcallMachine = 11,
    /// Instruction page fault.
    InstructionPageFault = 12,
    /// Load page fault.
    LoadPageFault = 13,
    /// Store/AMO page fault.
    StorePageFault = 15,
    /// Hardware breakpoint inserted by the debugger frontend.
    HwBreak = 16,
    /// Synthetic cause marking any `ECALL` before privilege resolution.
    EcallAny = 17,
    /// External/asynchronous interrupt; `mcause` gets the MSB set.
    Interrupt = 18,
}

/// Status flags for one memory location, reported by backends for inspection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocationStatus(u8);

impl LocationStatus {
    /// Plain memory, nothing special.
    pub const NONE: Self = Self(0);
    /// The location is currently resident in a cache.
    pub const CACHED: Self = Self(1 << 0);
    /// The cached copy is newer than the backing storage.
    pub const DIRTY: Self = Self(1 << 1);
    /// Writes to the location are ignored.
    pub const READ_ONLY: Self = Self(1 << 2);
    /// The location is not backed by any device.
    pub const ILLEGAL: Self = Self(1 << 3);

    /// Whether every flag in `other` is also set in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LocationStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
