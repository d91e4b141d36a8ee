//! Instruction set: encoding, decoding, disassembly, and assembly.
//!
//! This module implements the syntactic layer of the simulator. It provides:
//! 1. **Bit fields:** Split bit-field descriptors used for every encoded
//!    argument ([`field::InstructionField`]).
//! 2. **Instructions:** The raw 32-bit instruction word with typed accessors
//!    ([`instruction::Instruction`]).
//! 3. **Instruction map:** An immutable decode tree from instruction word to
//!    semantics ([`map`]).
//! 4. **Disassembly and assembly:** Text round-tripping with relocation
//!    records and pseudoinstruction expansion ([`disasm`], [`asm`]).

/// Register ABI names and numeric parsing.
pub mod abi;
/// Single-line assembler with relocations and pseudoinstructions.
pub mod asm;
/// Symbolic disassembler.
pub mod disasm;
/// Split bit-field encode/decode.
pub mod field;
/// Raw instruction word accessors.
pub mod instruction;
/// Immutable instruction decode tree.
pub mod map;

pub use asm::{PseudoModifier, RelocationList, RelocationRecord};
pub use field::{InstructionField, Subfield};
pub use instruction::{Instruction, Type};
