//! Control and status register state.
//!
//! This module implements the machine-level CSR file driving traps and
//! counter updates:
//! 1. **Register table:** Each supported CSR is described by a descriptor
//!    (external address, initial value, write mask, write handler) and stored
//!    compactly at an internal index.
//! 2. **Address mapping:** External 12-bit CSR addresses are mapped to
//!    internal indices; the top two address bits encode writability.
//! 3. **Interrupt logic:** `mip`/`mie` masking and the core interrupt
//!    request line.
//! 4. **Trap transitions:** `mstatus` bookkeeping for exception entry and
//!    `MRET`.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::common::address::Address;
use crate::common::defs::ExceptionCause;
use crate::common::error::{SimResult, SimulatorError};
use crate::common::value::RegisterValue;
use crate::config::{IsaWord, Xlen};

/// Internal ids mapping supported CSRs to a compact storage array.
pub mod id {
    /// Shadow cycle counter for `RDCYCLE`.
    pub const CYCLE: usize = 0;
    /// Vendor ID.
    pub const MVENDORID: usize = 1;
    /// Architecture ID.
    pub const MARCHID: usize = 2;
    /// Implementation ID.
    pub const MIMPID: usize = 3;
    /// Hardware thread ID.
    pub const MHARTID: usize = 4;
    /// Machine status register.
    pub const MSTATUS: usize = 5;
    /// Machine ISA register.
    pub const MISA: usize = 6;
    /// Machine interrupt-enable register.
    pub const MIE: usize = 7;
    /// Machine trap-handler base address.
    pub const MTVEC: usize = 8;
    /// Scratch register for machine trap handlers.
    pub const MSCRATCH: usize = 9;
    /// Machine exception program counter.
    pub const MEPC: usize = 10;
    /// Machine trap cause.
    pub const MCAUSE: usize = 11;
    /// Machine bad address or instruction.
    pub const MTVAL: usize = 12;
    /// Machine interrupt pending.
    pub const MIP: usize = 13;
    /// Machine trap instruction (transformed).
    pub const MTINST: usize = 14;
    /// Machine bad guest physical address.
    pub const MTVAL2: usize = 15;
    /// Machine cycle counter.
    pub const MCYCLE: usize = 16;
    /// Machine instructions-retired counter.
    pub const MINSTRET: usize = 17;
    /// Address translation and protection register.
    pub const SATP: usize = 18;
    /// Number of supported CSRs.
    pub const COUNT: usize = 19;
}

/// External 12-bit CSR address.
///
/// By convention the upper address bits encode accessibility: the top two
/// bits indicate read/write (`00`, `01`, `10`) or read-only (`11`), and the
/// next two encode the lowest privilege level that may access the register.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CsrAddress(pub u16);

/// Privilege levels encoded in CSR address bits `[9:8]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PrivilegeLevel {
    /// Unprivileged and user-level CSRs.
    Unprivileged = 0b00,
    /// Supervisor-level CSRs.
    Supervisor = 0b01,
    /// Hypervisor and VS CSRs.
    Hypervisor = 0b10,
    /// Machine-level CSRs.
    Machine = 0b11,
}

impl CsrAddress {
    /// Whether the register is writable (top two address bits not `11`).
    pub const fn is_writable(self) -> bool {
        (self.0 >> 10) & 0b11 != 0b11
    }

    /// Lowest privilege level that may access the register.
    pub const fn privilege_level(self) -> PrivilegeLevel {
        match (self.0 >> 8) & 0b11 {
            0b00 => PrivilegeLevel::Unprivileged,
            0b01 => PrivilegeLevel::Supervisor,
            0b10 => PrivilegeLevel::Hypervisor,
            _ => PrivilegeLevel::Machine,
        }
    }
}

/// Contiguous bit field of one CSR.
#[derive(Clone, Copy, Debug)]
pub struct CsrField {
    /// Number of bits.
    pub count: u32,
    /// Bit offset within the register.
    pub offset: u32,
}

impl CsrField {
    /// Extracts the field value from a register value.
    pub const fn decode(self, value: u64) -> u64 {
        (value >> self.offset) & ((1 << self.count) - 1)
    }

    /// Encodes a field value into register position.
    pub const fn encode(self, value: u64) -> u64 {
        (value & ((1 << self.count) - 1)) << self.offset
    }

    /// Mask of the bits the field occupies.
    pub const fn mask(self) -> u64 {
        ((1 << self.count) - 1) << self.offset
    }

    /// Replaces the field within `original` with `value`.
    pub const fn update(self, original: u64, value: u64) -> u64 {
        self.encode(value) | (original & !self.mask())
    }
}

/// Descriptor of one named CSR field.
#[derive(Clone, Copy, Debug)]
pub struct RegisterFieldDesc {
    /// Field name.
    pub name: &'static str,
    /// Internal id of the owning register.
    pub reg_id: usize,
    /// Bit range of the field.
    pub field: CsrField,
}

/// Named fields of `mstatus`.
pub mod mstatus {
    use super::{RegisterFieldDesc, CsrField, id};

    /// Supervisor global interrupt-enable.
    pub const SIE: RegisterFieldDesc = RegisterFieldDesc {
        name: "SIE",
        reg_id: id::MSTATUS,
        field: CsrField { count: 1, offset: 1 },
    };
    /// Machine global interrupt-enable.
    pub const MIE: RegisterFieldDesc = RegisterFieldDesc {
        name: "MIE",
        reg_id: id::MSTATUS,
        field: CsrField { count: 1, offset: 3 },
    };
    /// Previous SIE before the trap.
    pub const SPIE: RegisterFieldDesc = RegisterFieldDesc {
        name: "SPIE",
        reg_id: id::MSTATUS,
        field: CsrField { count: 1, offset: 5 },
    };
    /// Previous MIE before the trap.
    pub const MPIE: RegisterFieldDesc = RegisterFieldDesc {
        name: "MPIE",
        reg_id: id::MSTATUS,
        field: CsrField { count: 1, offset: 7 },
    };
    /// Supervisor previous privilege mode.
    pub const SPP: RegisterFieldDesc = RegisterFieldDesc {
        name: "SPP",
        reg_id: id::MSTATUS,
        field: CsrField { count: 1, offset: 8 },
    };
    /// Machine previous privilege mode.
    pub const MPP: RegisterFieldDesc = RegisterFieldDesc {
        name: "MPP",
        reg_id: id::MSTATUS,
        field: CsrField { count: 2, offset: 11 },
    };
    /// User-mode XLEN (RV64 only).
    pub const UXL: RegisterFieldDesc = RegisterFieldDesc {
        name: "UXL",
        reg_id: id::MSTATUS,
        field: CsrField { count: 2, offset: 32 },
    };
    /// Supervisor-mode XLEN (RV64 only).
    pub const SXL: RegisterFieldDesc = RegisterFieldDesc {
        name: "SXL",
        reg_id: id::MSTATUS,
        field: CsrField { count: 2, offset: 34 },
    };
}

/// Write handler selecting the side effects of one CSR write.
#[derive(Clone, Copy, Debug)]
enum WriteHandler {
    /// Apply the write mask, merging with the old content.
    Default,
    /// `mcycle` forwards its new value to the shadow `cycle` counter.
    Mcycle,
}

/// Descriptor of one supported CSR.
struct RegisterDesc {
    name: &'static str,
    address: CsrAddress,
    initial_value: u64,
    write_mask: u64,
    handler: WriteHandler,
}

#[rustfmt::skip]
static REGISTERS: [RegisterDesc; id::COUNT] = [
    RegisterDesc { name: "cycle",     address: CsrAddress(0xC00), initial_value: 0, write_mask: 0, handler: WriteHandler::Default },
    RegisterDesc { name: "mvendorid", address: CsrAddress(0xF11), initial_value: 0, write_mask: 0, handler: WriteHandler::Default },
    RegisterDesc { name: "marchid",   address: CsrAddress(0xF12), initial_value: 0, write_mask: 0, handler: WriteHandler::Default },
    RegisterDesc { name: "mimpid",    address: CsrAddress(0xF13), initial_value: 0, write_mask: 0, handler: WriteHandler::Default },
    RegisterDesc { name: "mhartid",   address: CsrAddress(0xF14), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mstatus",   address: CsrAddress(0x300), initial_value: 0, write_mask: 0x007F_FFEA, handler: WriteHandler::Default },
    RegisterDesc { name: "misa",      address: CsrAddress(0x301), initial_value: 0, write_mask: 0, handler: WriteHandler::Default },
    RegisterDesc { name: "mie",       address: CsrAddress(0x304), initial_value: 0, write_mask: 0x00FF_0AAA, handler: WriteHandler::Default },
    RegisterDesc { name: "mtvec",     address: CsrAddress(0x305), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mscratch",  address: CsrAddress(0x340), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mepc",      address: CsrAddress(0x341), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mcause",    address: CsrAddress(0x342), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mtval",     address: CsrAddress(0x343), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mip",       address: CsrAddress(0x344), initial_value: 0, write_mask: 0x0000_0222, handler: WriteHandler::Default },
    RegisterDesc { name: "mtinst",    address: CsrAddress(0x34A), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mtval2",    address: CsrAddress(0x34B), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "mcycle",    address: CsrAddress(0xB00), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Mcycle },
    RegisterDesc { name: "minstret",  address: CsrAddress(0xB02), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
    RegisterDesc { name: "satp",      address: CsrAddress(0x180), initial_value: 0, write_mask: u64::MAX, handler: WriteHandler::Default },
];

fn register_map() -> &'static HashMap<u16, usize> {
    static MAP: OnceLock<HashMap<u16, usize>> = OnceLock::new();
    MAP.get_or_init(|| {
        REGISTERS
            .iter()
            .enumerate()
            .map(|(index, desc)| (desc.address.0, index))
            .collect()
    })
}

/// Machine-level CSR control state.
///
/// Registers are externally addressed by their 12-bit address; internally all
/// supported registers live in a compact array indexed by [`id`] constants.
#[derive(Clone)]
pub struct ControlState {
    xlen: Xlen,
    isa_word: IsaWord,
    data: [RegisterValue; id::COUNT],
}

impl ControlState {
    /// Creates the CSR file for the given register width and ISA word.
    pub fn new(xlen: Xlen, isa_word: IsaWord) -> Self {
        let mut state = Self {
            xlen,
            isa_word,
            data: [RegisterValue::default(); id::COUNT],
        };
        state.reset();
        state
    }

    /// Resets every register to its initial value and rebuilds `misa`.
    pub fn reset(&mut self) {
        for (index, desc) in REGISTERS.iter().enumerate() {
            self.data[index] = RegisterValue::new(desc.initial_value);
        }

        let mut misa = u64::from(self.isa_word.0) & 0x3FFF_FFFF;
        match self.xlen {
            Xlen::Rv32 => misa |= 1 << 30,
            Xlen::Rv64 => misa |= 2 << 62,
        }
        self.data[id::MISA] = RegisterValue::new(misa);

        if self.xlen == Xlen::Rv64 {
            // UXL/SXL are set raw; the mstatus write mask hides them.
            let mut status = self.data[id::MSTATUS].as_u64();
            status = mstatus::UXL.field.update(status, 2);
            status = mstatus::SXL.field.update(status, 2);
            self.data[id::MSTATUS] = RegisterValue::new(status);
        }
    }

    /// Translates an external CSR address to the internal register index.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::UnsupportedInstruction`] for addresses with
    /// no backing register.
    pub fn register_internal_id(address: CsrAddress) -> SimResult<usize> {
        register_map().get(&address.0).copied().ok_or_else(|| {
            SimulatorError::UnsupportedInstruction(format!(
                "accessed nonexistent CSR register {:#x}",
                address.0
            ))
        })
    }

    /// Reads a CSR by its external address.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::UnsupportedInstruction`] for unsupported
    /// addresses.
    pub fn read(&self, address: CsrAddress) -> SimResult<RegisterValue> {
        Ok(self.data[Self::register_internal_id(address)?])
    }

    /// Writes a CSR by its external address.
    ///
    /// # Errors
    ///
    /// Attempts to write a read-only register raise an illegal-instruction
    /// error, as do unsupported addresses.
    pub fn write(&mut self, address: CsrAddress, value: RegisterValue) -> SimResult<()> {
        if !address.is_writable() {
            return Err(SimulatorError::UnsupportedInstruction(format!(
                "CSR address {:#x} is not writable",
                address.0
            )));
        }
        self.write_internal(Self::register_internal_id(address)?, value);
        Ok(())
    }

    /// Reads a CSR by its internal id.
    pub fn read_internal(&self, internal_id: usize) -> RegisterValue {
        self.data[internal_id]
    }

    /// Writes a CSR by its internal id, applying the write handler.
    pub fn write_internal(&mut self, internal_id: usize, value: RegisterValue) {
        let desc = &REGISTERS[internal_id];
        match desc.handler {
            WriteHandler::Default => {
                let mut merged = (value.as_u64() & desc.write_mask)
                    | (self.data[internal_id].as_u64() & !desc.write_mask);
                if self.xlen == Xlen::Rv32 {
                    merged &= 0xFFFF_FFFF;
                }
                self.data[internal_id] = RegisterValue::new(merged);
            }
            WriteHandler::Mcycle => {
                self.data[internal_id] = value;
                self.data[id::CYCLE] = value;
            }
        }
    }

    /// Adds `amount` to a counter register through the write handler.
    pub fn increment_internal(&mut self, internal_id: usize, amount: u64) {
        let value = self.data[internal_id].as_u64().wrapping_add(amount);
        self.write_internal(internal_id, RegisterValue::new(value));
    }

    /// Reads a named CSR field.
    pub fn read_field(&self, desc: RegisterFieldDesc) -> u64 {
        desc.field.decode(self.data[desc.reg_id].as_u64())
    }

    /// Writes a named CSR field directly (no write-mask processing).
    pub fn write_field(&mut self, desc: RegisterFieldDesc, value: u64) {
        let updated = desc.field.update(self.data[desc.reg_id].as_u64(), value);
        self.data[desc.reg_id] = RegisterValue::new(updated);
    }

    /// Toggles bit `irq_num` of `mip`.
    pub fn set_interrupt_signal(&mut self, irq_num: u32, active: bool) {
        if irq_num >= 32 {
            return;
        }
        let mask = 1u64 << irq_num;
        let value = self.data[id::MIP].as_xlen(self.xlen);
        self.data[id::MIP] = RegisterValue::new(if active { value | mask } else { value & !mask });
    }

    /// Whether an enabled interrupt is pending and globally unmasked.
    pub fn core_interrupt_request(&self) -> bool {
        let irqs = self.data[id::MIE].as_u64() & self.data[id::MIP].as_u64() & 0xFFFF_FFFF;
        irqs != 0 && self.read_field(mstatus::MIE) != 0
    }

    /// Writes `mcause` for a trap.
    ///
    /// Synchronous exceptions store their cause code directly; external
    /// interrupts store the number of the least-significant pending enabled
    /// interrupt with the XLEN sign bit set.
    pub fn update_exception_cause(&mut self, cause: ExceptionCause) {
        let value = if cause == ExceptionCause::Interrupt {
            let irqs = self.data[id::MIE].as_u64() & self.data[id::MIP].as_u64() & 0xFFFF_FFFF;
            let irq_to_signal = if irqs == 0 {
                0
            } else {
                u64::from(irqs.trailing_zeros())
            };
            irq_to_signal | 1 << (self.xlen.bits() - 1)
        } else {
            u64::from(cause as u32)
        };
        self.data[id::MCAUSE] = RegisterValue::new(value);
    }

    /// Saves the interrupt-enable state on trap entry.
    ///
    /// `MIE` is copied to `MPIE` and cleared; `MPP` records the privilege the
    /// trap was taken from.
    pub fn exception_initiate(&mut self, act_privilege: PrivilegeLevel, _to: PrivilegeLevel) {
        let mie = self.read_field(mstatus::MIE);
        self.write_field(mstatus::MPIE, mie);
        self.write_field(mstatus::MIE, 0);
        self.write_field(mstatus::MPP, act_privilege as u64);
    }

    /// Restores the interrupt-enable state on `MRET`.
    ///
    /// Returns the privilege level recorded in `MPP`, which is then cleared.
    pub fn exception_return(&mut self, _act_privilege: PrivilegeLevel) -> PrivilegeLevel {
        let mpie = self.read_field(mstatus::MPIE);
        self.write_field(mstatus::MIE, mpie);
        self.write_field(mstatus::MPIE, 1);
        let restored = match self.read_field(mstatus::MPP) {
            0b00 => PrivilegeLevel::Unprivileged,
            0b01 => PrivilegeLevel::Supervisor,
            0b10 => PrivilegeLevel::Hypervisor,
            _ => PrivilegeLevel::Machine,
        };
        self.write_field(mstatus::MPP, 0);
        restored
    }

    /// Trap handler entry address (`mtvec`).
    pub fn exception_pc_address(&self) -> Address {
        Address::new(self.data[id::MTVEC].as_u64())
    }

    /// Name of the register at an internal id (for inspection frontends).
    pub fn register_name(internal_id: usize) -> &'static str {
        REGISTERS[internal_id].name
    }
}

impl PartialEq for ControlState {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}
