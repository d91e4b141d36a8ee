//! Common types shared by every subsystem.
//!
//! This module collects the leaf definitions the rest of the machine is built
//! from. It provides:
//! 1. **Addresses:** Physical and virtual address newtypes with arithmetic.
//! 2. **Register values:** Width-aware machine words and register identifiers.
//! 3. **Machine definitions:** Memory access control, exception causes, and
//!    location status flags.
//! 4. **Errors:** The simulator-level error enum raised by backends and decode.

/// Physical and virtual address types.
pub mod address;
/// Machine-wide definitions (access control, exception causes, status flags).
pub mod defs;
/// Simulator error enum.
pub mod error;
/// Register value and register identifier types.
pub mod value;

pub use address::{Address, VirtualAddress};
pub use defs::{AccessControl, ExceptionCause, LocationStatus};
pub use error::SimulatorError;
pub use value::{RegisterId, RegisterValue};
