//! Program image loading and symbol tables.
//!
//! The ELF loader is a collaborator of the simulation core: it populates
//! physical memory, provides the entry point and end-of-program address, and
//! optionally a symbol table. The machine consumes the resulting
//! [`ProgramImage`] without knowing where it came from, so tests can also
//! build images by hand.

use std::collections::HashMap;
use std::fs;

use object::{Object, ObjectSegment, ObjectSymbol};

use crate::common::address::Address;
use crate::common::error::{SimResult, SimulatorError};
use crate::config::{Endian, Xlen};
use crate::isa::asm::SymbolSource;

/// One symbol table entry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymbolInfo {
    /// Symbol value (usually an address).
    pub value: u64,
    /// Symbol size in bytes.
    pub size: u64,
    /// ELF `st_info` byte (type and binding).
    pub info: u8,
    /// ELF `st_other` byte (visibility).
    pub other: u8,
}

/// Name → symbol mapping provided by the loader or the assembler.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, SymbolInfo>,
}

impl SymbolTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one symbol.
    pub fn set_symbol(&mut self, name: impl Into<String>, symbol: SymbolInfo) {
        let _ = self.symbols.insert(name.into(), symbol);
    }

    /// Looks up one symbol by name.
    pub fn symbol(&self, name: &str) -> Option<SymbolInfo> {
        self.symbols.get(name).copied()
    }

    /// Finds the name of the symbol whose extent covers `address`.
    pub fn name_for_address(&self, address: Address) -> Option<&str> {
        self.symbols
            .iter()
            .find(|(_, symbol)| {
                address.raw() >= symbol.value
                    && (symbol.size == 0 && address.raw() == symbol.value
                        || address.raw() < symbol.value + symbol.size)
            })
            .map(|(name, _)| name.as_str())
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolSource for SymbolTable {
    fn symbol_value(&self, name: &str) -> Option<i64> {
        self.symbols.get(name).map(|symbol| symbol.value as i64)
    }
}

/// One loadable span of program bytes.
#[derive(Clone, Debug)]
pub struct ProgramSegment {
    /// Physical load address.
    pub address: Address,
    /// Segment contents.
    pub data: Vec<u8>,
}

/// A program image ready to be placed into physical memory.
#[derive(Clone, Debug)]
pub struct ProgramImage {
    /// Byte order the binary was produced for.
    pub endian: Endian,
    /// Register width the binary was produced for.
    pub xlen: Xlen,
    /// Executable entry point.
    pub entry: Address,
    /// One past the highest loaded address.
    pub end: Address,
    /// Loadable segments.
    pub segments: Vec<ProgramSegment>,
    /// Symbol table, possibly empty.
    pub symbols: SymbolTable,
}

/// Parses an ELF executable into a [`ProgramImage`].
///
/// # Errors
///
/// Returns [`SimulatorError::Sanity`] when the file cannot be read or is not
/// a parseable ELF executable.
pub fn load_elf_file(path: &str) -> SimResult<ProgramImage> {
    let data = fs::read(path)
        .map_err(|error| SimulatorError::Sanity(format!("cannot read '{path}': {error}")))?;
    load_elf_bytes(&data)
}

/// Parses an in-memory ELF executable into a [`ProgramImage`].
///
/// # Errors
///
/// Returns [`SimulatorError::Sanity`] when the bytes are not a parseable ELF
/// executable.
pub fn load_elf_bytes(data: &[u8]) -> SimResult<ProgramImage> {
    let file = object::File::parse(data)
        .map_err(|error| SimulatorError::Sanity(format!("ELF parse error: {error}")))?;

    let endian = if file.is_little_endian() {
        Endian::Little
    } else {
        Endian::Big
    };
    let xlen = if file.is_64() { Xlen::Rv64 } else { Xlen::Rv32 };

    let mut segments = Vec::new();
    let mut end = Address::null();
    for segment in file.segments() {
        let bytes = segment
            .data()
            .map_err(|error| SimulatorError::Sanity(format!("ELF segment error: {error}")))?;
        if bytes.is_empty() {
            continue;
        }
        let address = Address::new(segment.address());
        let segment_end = address + bytes.len() as u64;
        if segment_end > end {
            end = segment_end;
        }
        segments.push(ProgramSegment {
            address,
            data: bytes.to_vec(),
        });
    }

    let mut symbols = SymbolTable::new();
    for symbol in file.symbols() {
        if let Ok(name) = symbol.name() {
            if name.is_empty() {
                continue;
            }
            symbols.set_symbol(
                name,
                SymbolInfo {
                    value: symbol.address(),
                    size: symbol.size(),
                    info: 0,
                    other: 0,
                },
            );
        }
    }

    Ok(ProgramImage {
        endian,
        xlen,
        entry: Address::new(file.entry()),
        end,
        segments,
        symbols,
    })
}
