//! Simulator error definitions.
//!
//! This module defines the error enum raised by the simulation core when an
//! operation cannot proceed. These are *simulator* errors — a failed decode, a
//! backend accessed out of range, a violated internal invariant. Architectural
//! exceptions (page faults seen by the program, breakpoints, `ECALL`) travel
//! through the pipeline as [`ExceptionCause`](super::ExceptionCause) values
//! instead and are handled at the memory stage.
//!
//! Errors bubble up to `Machine::step`, which converts them into the trapped
//! machine state and reports them to the frontend.

use thiserror::Error;

/// Errors surfaced by the simulation core.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Decode found no leaf map entry, or the entry is not marked supported.
    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(String),

    /// The ALU dispatch received an opcode outside its component's range.
    #[error("unsupported ALU operation: {0}")]
    UnsupportedAluOperation(String),

    /// Reserved; not raised by the RISC-V-conformant ALU.
    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// A write to the program counter with the low two bits set.
    #[error("unaligned jump target {0:#x}")]
    UnalignedJump(u64),

    /// The memory stage was handed an access control value it cannot serve.
    #[error("unknown memory control value: {0}")]
    UnknownMemoryControl(String),

    /// A backend memory device was accessed outside its declared extent.
    #[error("access outside memory section: {0}")]
    OutOfMemoryAccess(String),

    /// The page-table walker terminated without a valid leaf PTE.
    #[error("page fault: {0}")]
    PageFault(String),

    /// The syscall-emulator collaborator did not recognize a syscall number.
    #[error("unknown syscall: {0}")]
    SyscallUnknown(String),

    /// An internal invariant was violated; indicates a simulator bug.
    #[error("sanity check failed: {0}")]
    Sanity(String),
}

/// Shorthand result type used across the machine crate.
pub type SimResult<T> = Result<T, SimulatorError>;
