//! CPU core: register state, CSRs, ALU, predictor, and the pipeline.
//!
//! This module implements the execution side of the machine:
//! 1. **Architectural state:** General-purpose registers and the program
//!    counter ([`registers`]), and the CSR control state ([`csr`]).
//! 2. **Execution units:** The combinational ALU ([`alu`]) and the branch
//!    prediction subsystem ([`predictor`]).
//! 3. **Pipeline:** Interstage latches ([`pipeline`]) and the single-cycle
//!    and 5-stage pipelined cores ([`core_impl`]).

/// Combinational ALU and multiplier.
pub mod alu;
/// Single-cycle and pipelined core implementations.
pub mod core_impl;
/// CSR control state and trap transitions.
pub mod csr;
/// Branch prediction subsystem.
pub mod predictor;
/// Pipeline interstage latches.
pub mod pipeline;
/// General-purpose register file and program counter.
pub mod registers;

pub use core_impl::{Core, ExceptionHandler, StopExceptionHandler};
pub use registers::Registers;
