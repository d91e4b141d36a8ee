//! Pipeline interstage latches.
//!
//! Each latch is a plain record carrying one stage's output into the next
//! stage's input on the following cycle. `flush()` returns a latch to its
//! NOP defaults. Communication between stages happens strictly through these
//! records; the core passes previous-cycle outputs as next-cycle inputs.

use crate::common::address::Address;
use crate::common::defs::{AccessControl, ExceptionCause};
use crate::common::value::{RegisterId, RegisterValue};
use crate::core::alu::{AluCombinedOp, AluComponent};
use crate::isa::instruction::Instruction;

/// Stage address shown when a latch holds no real instruction.
pub const STAGEADDR_NONE: Address = Address(0xFFFF_FFFF);

/// Forwarding source selector for one operand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForwardFrom {
    /// Value comes from the register file.
    #[default]
    None,
    /// Value forwarded from the memory-stage output latch.
    FromWriteback,
    /// Value forwarded from the execute-stage output latch.
    FromMemory,
}

/// CSR operation selector decoded from `funct3`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CsrOp {
    /// Not a CSR instruction.
    #[default]
    None,
    /// `CSRRW`/`CSRRWI`: write the operand.
    ReadWrite,
    /// `CSRRS`/`CSRRSI`: set operand bits.
    ReadSet,
    /// `CSRRC`/`CSRRCI`: clear operand bits.
    ReadClear,
}

/// Fetch → decode latch.
#[derive(Clone, Debug)]
pub struct FetchInterstage {
    /// Loaded instruction.
    pub inst: Instruction,
    /// Address of the instruction.
    pub inst_addr: Address,
    /// `inst_addr + inst.size()`.
    pub next_inst_addr: Address,
    /// Predictor-proposed next PC, carried down the pipeline so the execute
    /// stage can detect mispredicts without inspecting other stages.
    pub predicted_next_inst_addr: Address,
    /// Exception raised during fetch, if any.
    pub excause: ExceptionCause,
    /// Whether the latch holds a real instruction.
    pub is_valid: bool,
}

impl Default for FetchInterstage {
    fn default() -> Self {
        Self {
            inst: Instruction::NOP,
            inst_addr: Address::null(),
            next_inst_addr: Address::null(),
            predicted_next_inst_addr: Address::null(),
            excause: ExceptionCause::None,
            is_valid: false,
        }
    }
}

impl FetchInterstage {
    /// Reset to the value corresponding to NOP.
    pub fn flush(&mut self) {
        *self = Self::default();
    }
}

/// Decode → execute latch.
#[derive(Clone, Debug)]
pub struct DecodeInterstage {
    /// Decoded instruction.
    pub inst: Instruction,
    /// Address of the instruction.
    pub inst_addr: Address,
    /// `inst_addr + inst.size()`.
    pub next_inst_addr: Address,
    /// Predictor-proposed next PC.
    pub predicted_next_inst_addr: Address,
    /// Value of register `rs1` (with forwarding applied).
    pub val_rs: RegisterValue,
    /// Value of register `rs1` without forwarding.
    pub val_rs_orig: RegisterValue,
    /// Value of register `rs2` (with forwarding applied).
    pub val_rt: RegisterValue,
    /// Value of register `rs2` without forwarding.
    pub val_rt_orig: RegisterValue,
    /// Sign-extended immediate value.
    pub immediate_val: RegisterValue,
    /// Value read from the addressed CSR.
    pub csr_read_val: RegisterValue,
    /// External CSR address of a Zicsr instruction.
    pub csr_address: u16,
    /// CSR operation selector.
    pub csr_op: CsrOp,
    /// Exception raised by fetch or decode, if any.
    pub excause: ExceptionCause,
    /// Forward source chosen for `rs1`.
    pub ff_rs: ForwardFrom,
    /// Forward source chosen for `rs2`.
    pub ff_rt: ForwardFrom,
    /// Computational component selected for execute.
    pub alu_component: AluComponent,
    /// Decoded ALU operation.
    pub aluop: AluCombinedOp,
    /// Decoded memory access type.
    pub memctl: AccessControl,
    /// Number of register `rs1`.
    pub num_rs: RegisterId,
    /// Number of register `rs2`.
    pub num_rt: RegisterId,
    /// Number of register `rd`.
    pub num_rd: RegisterId,
    /// Memory read requested.
    pub memread: bool,
    /// Memory write requested.
    pub memwrite: bool,
    /// Second ALU operand is the immediate.
    pub alusrc: bool,
    /// Result is written back to the register file.
    pub regwrite: bool,
    /// Execute requires the `rs1` value.
    pub alu_req_rs: bool,
    /// Execute requires the `rs2` value.
    pub alu_req_rt: bool,
    /// Conditional branch.
    pub branch_bxx: bool,
    /// Unconditional jump.
    pub branch_jal: bool,
    /// Negate the branch condition.
    pub branch_val: bool,
    /// Jump target comes from the ALU (`JALR`).
    pub branch_jalr: bool,
    /// Latch was stalled this cycle.
    pub stall: bool,
    /// Whether the latch holds a real instruction.
    pub is_valid: bool,
    /// Operation is limited to word (32-bit) width.
    pub w_operation: bool,
    /// Modified ALU variant (SUB / arithmetic shift).
    pub alu_mod: bool,
    /// PC is the first ALU operand.
    pub alu_pc: bool,
    /// Zicsr instruction (implies CSR read and possibly write).
    pub csr: bool,
    /// CSR write will be performed at the memory stage.
    pub csr_write: bool,
    /// Return from exception (`MRET`).
    pub xret: bool,
    /// TLB maintenance (`SFENCE.VMA`).
    pub sfence: bool,
}

impl Default for DecodeInterstage {
    fn default() -> Self {
        Self {
            inst: Instruction::NOP,
            inst_addr: Address::null(),
            next_inst_addr: Address::null(),
            predicted_next_inst_addr: Address::null(),
            val_rs: RegisterValue::default(),
            val_rs_orig: RegisterValue::default(),
            val_rt: RegisterValue::default(),
            val_rt_orig: RegisterValue::default(),
            immediate_val: RegisterValue::default(),
            csr_read_val: RegisterValue::default(),
            csr_address: 0,
            csr_op: CsrOp::None,
            excause: ExceptionCause::None,
            ff_rs: ForwardFrom::None,
            ff_rt: ForwardFrom::None,
            alu_component: AluComponent::Alu,
            aluop: AluCombinedOp::default(),
            memctl: AccessControl::None,
            num_rs: 0,
            num_rt: 0,
            num_rd: 0,
            memread: false,
            memwrite: false,
            alusrc: false,
            regwrite: false,
            alu_req_rs: false,
            alu_req_rt: false,
            branch_bxx: false,
            branch_jal: false,
            branch_val: false,
            branch_jalr: false,
            stall: false,
            is_valid: false,
            w_operation: false,
            alu_mod: false,
            alu_pc: false,
            csr: false,
            csr_write: false,
            xret: false,
            sfence: false,
        }
    }
}

impl DecodeInterstage {
    /// Reset to the value corresponding to NOP.
    pub fn flush(&mut self) {
        *self = Self::default();
    }
}

/// Execute → memory latch.
#[derive(Clone, Debug)]
pub struct ExecuteInterstage {
    /// Executed instruction.
    pub inst: Instruction,
    /// Address of the instruction.
    pub inst_addr: Address,
    /// `inst_addr + inst.size()`.
    pub next_inst_addr: Address,
    /// Predictor-proposed next PC.
    pub predicted_next_inst_addr: Address,
    /// Potential branch target (`inst_addr + imm`).
    pub branch_jal_target: Address,
    /// Value of register `rs2` (store data).
    pub val_rt: RegisterValue,
    /// Result of ALU execution.
    pub alu_val: RegisterValue,
    /// Value read from the addressed CSR.
    pub csr_read_val: RegisterValue,
    /// External CSR address of a Zicsr instruction.
    pub csr_address: u16,
    /// CSR operation selector.
    pub csr_op: CsrOp,
    /// Exception raised so far, if any.
    pub excause: ExceptionCause,
    /// Decoded memory access type.
    pub memctl: AccessControl,
    /// Number of register `rd`.
    pub num_rd: RegisterId,
    /// Memory read requested.
    pub memread: bool,
    /// Memory write requested.
    pub memwrite: bool,
    /// Result is written back to the register file.
    pub regwrite: bool,
    /// Whether the latch holds a real instruction.
    pub is_valid: bool,
    /// Conditional branch.
    pub branch_bxx: bool,
    /// Unconditional jump.
    pub branch_jal: bool,
    /// Negate the branch condition.
    pub branch_val: bool,
    /// Jump target comes from the ALU (`JALR`).
    pub branch_jalr: bool,
    /// Branch condition resolved taken.
    pub branch_taken: bool,
    /// ALU result was zero.
    pub alu_zero: bool,
    /// Zicsr instruction.
    pub csr: bool,
    /// CSR write will be performed at the memory stage.
    pub csr_write: bool,
    /// Return from exception (`MRET`).
    pub xret: bool,
    /// TLB maintenance (`SFENCE.VMA`).
    pub sfence: bool,
    /// Forward selector of `rs1` (exposed for visualization).
    pub ff_rs: ForwardFrom,
    /// Forward selector of `rs2` (exposed for visualization).
    pub ff_rt: ForwardFrom,
}

impl Default for ExecuteInterstage {
    fn default() -> Self {
        Self {
            inst: Instruction::NOP,
            inst_addr: Address::null(),
            next_inst_addr: Address::null(),
            predicted_next_inst_addr: Address::null(),
            branch_jal_target: Address::null(),
            val_rt: RegisterValue::default(),
            alu_val: RegisterValue::default(),
            csr_read_val: RegisterValue::default(),
            csr_address: 0,
            csr_op: CsrOp::None,
            excause: ExceptionCause::None,
            memctl: AccessControl::None,
            num_rd: 0,
            memread: false,
            memwrite: false,
            regwrite: false,
            is_valid: false,
            branch_bxx: false,
            branch_jal: false,
            branch_val: false,
            branch_jalr: false,
            branch_taken: false,
            alu_zero: false,
            csr: false,
            csr_write: false,
            xret: false,
            sfence: false,
            ff_rs: ForwardFrom::None,
            ff_rt: ForwardFrom::None,
        }
    }
}

impl ExecuteInterstage {
    /// Reset to the value corresponding to NOP.
    pub fn flush(&mut self) {
        *self = Self::default();
    }
}

/// Memory → writeback latch.
#[derive(Clone, Debug)]
pub struct MemoryInterstage {
    /// Instruction that accessed memory.
    pub inst: Instruction,
    /// Address of the instruction.
    pub inst_addr: Address,
    /// `inst_addr + inst.size()`.
    pub next_inst_addr: Address,
    /// Predictor-proposed next PC.
    pub predicted_next_inst_addr: Address,
    /// Next PC the execute stage proved correct.
    pub computed_next_inst_addr: Address,
    /// Address used to access memory.
    pub mem_addr: Address,
    /// Value to be written to the register file.
    pub towrite_val: RegisterValue,
    /// Exception raised so far, if any.
    pub excause: ExceptionCause,
    /// Number of register `rd`.
    pub num_rd: RegisterId,
    /// Writeback value came from memory.
    pub memtoreg: bool,
    /// Result is written back to the register file.
    pub regwrite: bool,
    /// A CSR was written at the memory stage.
    pub csr_written: bool,
    /// Return from exception; `computed_next_inst_addr` holds `mepc`.
    pub xret: bool,
    /// Whether the latch holds a real instruction.
    pub is_valid: bool,
}

impl Default for MemoryInterstage {
    fn default() -> Self {
        Self {
            inst: Instruction::NOP,
            inst_addr: Address::null(),
            next_inst_addr: Address::null(),
            predicted_next_inst_addr: Address::null(),
            computed_next_inst_addr: Address::null(),
            mem_addr: Address::null(),
            towrite_val: RegisterValue::default(),
            excause: ExceptionCause::None,
            num_rd: 0,
            memtoreg: false,
            regwrite: false,
            csr_written: false,
            xret: false,
            is_valid: false,
        }
    }
}

impl MemoryInterstage {
    /// Reset to the value corresponding to NOP.
    pub fn flush(&mut self) {
        *self = Self::default();
    }
}

/// Committed state of the writeback stage.
#[derive(Clone, Debug)]
pub struct WritebackState {
    /// Committed instruction.
    pub inst: Instruction,
    /// Address of the instruction.
    pub inst_addr: Address,
    /// Value written to the register file.
    pub value: RegisterValue,
    /// Number of register `rd`.
    pub num_rd: RegisterId,
    /// Whether a register write was performed.
    pub regwrite: bool,
    /// Whether the latch holds a real instruction.
    pub is_valid: bool,
}

impl Default for WritebackState {
    fn default() -> Self {
        Self {
            inst: Instruction::NOP,
            inst_addr: Address::null(),
            value: RegisterValue::default(),
            num_rd: 0,
            regwrite: false,
            is_valid: false,
        }
    }
}

/// The five interstage latches of the core.
#[derive(Clone, Debug, Default)]
pub struct Pipeline {
    /// Fetch → decode latch.
    pub fetch: FetchInterstage,
    /// Decode → execute latch.
    pub decode: DecodeInterstage,
    /// Execute → memory latch.
    pub execute: ExecuteInterstage,
    /// Memory → writeback latch.
    pub memory: MemoryInterstage,
    /// Committed writeback state.
    pub writeback: WritebackState,
}

impl Pipeline {
    /// Flushes every latch to NOP defaults.
    pub fn flush_all(&mut self) {
        self.fetch.flush();
        self.decode.flush();
        self.execute.flush();
        self.memory.flush();
        self.writeback = WritebackState::default();
    }
}
