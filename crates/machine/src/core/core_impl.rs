//! Single-cycle and 5-stage pipelined cores.
//!
//! Both cores share the five stage functions; they differ only in how one
//! `step()` sequences them:
//! 1. **Single-cycle:** fetch → decode → execute → memory → writeback run
//!    once per step and the PC is rewritten from the execute resolution.
//! 2. **Pipelined:** the stages advance all five latches in reverse order so
//!    each consumes the previous cycle's output, with a hazard unit
//!    (none / stall / stall-and-forward), mispredict flush at execute, and
//!    exception escalation at the memory stage.
//!
//! Exceptions travel through the latches as [`ExceptionCause`] values; the
//! memory stage performs recovery (pipeline flush, `mepc`, `mcause`,
//! optional redirect to `mtvec`) before the registered handler runs.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::common::address::{Address, VirtualAddress};
use crate::common::defs::{AccessControl, ExceptionCause};
use crate::common::error::{SimResult, SimulatorError};
use crate::common::value::RegisterValue;
use crate::config::{HazardUnit, MachineConfig, Xlen};
use crate::core::alu::{AluComponent, alu_combined_operate};
use crate::core::csr::{ControlState, CsrAddress, PrivilegeLevel, id as csr_id};
use crate::core::pipeline::{
    CsrOp, DecodeInterstage, ExecuteInterstage, FetchInterstage, ForwardFrom, MemoryInterstage,
    Pipeline, WritebackState,
};
use crate::core::predictor::{BranchPredictor, BranchResult};
use crate::core::registers::Registers;
use crate::events::EventSink;
use crate::isa::instruction::Instruction;
use crate::isa::map::flags;
use crate::memory::backend::AccessOptions;
use crate::memory::frontend::{FrontendMemory, FrontendMemoryExt};
use crate::memory::tlb::Tlb;

/// Everything a registered exception handler gets to see.
#[derive(Clone, Copy, Debug)]
pub struct ExceptionFrame {
    /// Cause escalated from the memory stage.
    pub cause: ExceptionCause,
    /// Address of the instruction that raised the exception.
    pub inst_addr: Address,
    /// PC after the recovery redirects were applied.
    pub next_addr: Address,
    /// Address of the most recently committed instruction.
    pub jump_branch_pc: Address,
    /// Data address of the faulting access, when there was one.
    pub mem_ref_addr: Address,
}

/// Handler registered against one exception cause.
pub trait ExceptionHandler {
    /// Reacts to an escalated exception.
    ///
    /// Returns `true` when simulation may continue, `false` to halt the
    /// machine.
    fn handle_exception(&mut self, regs: &mut Registers, frame: &ExceptionFrame) -> bool;
}

/// Default handler: lets the step-over/stop tables decide, nothing more.
pub struct StopExceptionHandler;

impl ExceptionHandler for StopExceptionHandler {
    fn handle_exception(&mut self, _regs: &mut Registers, _frame: &ExceptionFrame) -> bool {
        true
    }
}

/// Result of one core step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step completed; simulation continues.
    Normal,
    /// An exception asked the machine to stop (breakpoint, `ECALL`, ...).
    Stop(ExceptionCause),
}

enum CoreKind {
    Single { prev_inst_addr: Address },
    Pipelined { hazard_unit: HazardUnit },
}

/// The CPU core: architectural state plus the stage machinery.
pub struct Core {
    xlen: Xlen,
    regs: Registers,
    csr: ControlState,
    predictor: BranchPredictor,
    mem_program: Tlb,
    mem_data: Tlb,
    pipeline: Pipeline,
    kind: CoreKind,
    hw_breaks: HashSet<u64>,
    stop_on_exception: HashSet<ExceptionCause>,
    step_over_exception: HashSet<ExceptionCause>,
    handlers: HashMap<ExceptionCause, Box<dyn ExceptionHandler>>,
    events: Option<Rc<RefCell<dyn EventSink>>>,
    cycle_count: u64,
    stall_count: u64,
    /// Load-reserved reservation, cleared by any store-conditional.
    reservation: Option<Address>,
    memory_execute_protection: bool,
    memory_write_protection: bool,
    /// `[first, last]` extent of the loaded program sections.
    program_range: Option<(Address, Address)>,
}

impl Core {
    /// Builds a core of the configured kind over the two access paths.
    pub fn new(
        config: &MachineConfig,
        entry_pc: Address,
        predictor: BranchPredictor,
        mem_program: Tlb,
        mem_data: Tlb,
    ) -> Self {
        let kind = if config.pipelined {
            CoreKind::Pipelined {
                hazard_unit: config.hazard_unit,
            }
        } else {
            CoreKind::Single {
                prev_inst_addr: Address::null(),
            }
        };
        let mut stop_on_exception = HashSet::new();
        // The teaching default: breakpoints and environment calls stop the
        // machine; the OS-emulation collaborator may clear these.
        stop_on_exception.insert(ExceptionCause::Break);
        stop_on_exception.insert(ExceptionCause::HwBreak);
        stop_on_exception.insert(ExceptionCause::EcallAny);
        let mut step_over_exception = HashSet::new();
        step_over_exception.insert(ExceptionCause::Break);
        step_over_exception.insert(ExceptionCause::HwBreak);

        Self {
            xlen: config.simulated_xlen,
            regs: Registers::new(entry_pc),
            csr: ControlState::new(config.simulated_xlen, config.isa_word),
            predictor,
            mem_program,
            mem_data,
            pipeline: Pipeline::default(),
            kind,
            hw_breaks: HashSet::new(),
            stop_on_exception,
            step_over_exception,
            handlers: HashMap::new(),
            events: None,
            cycle_count: 0,
            stall_count: 0,
            reservation: None,
            memory_execute_protection: config.memory_execute_protection,
            memory_write_protection: config.memory_write_protection,
            program_range: None,
        }
    }

    /// Attaches an event sink for the graphical collaborator.
    pub fn set_event_sink(&mut self, sink: Rc<RefCell<dyn EventSink>>) {
        self.events = Some(sink);
    }

    /// Registers a handler for one exception cause.
    pub fn register_exception_handler(
        &mut self,
        excause: ExceptionCause,
        handler: Box<dyn ExceptionHandler>,
    ) {
        let _ = self.handlers.insert(excause, handler);
    }

    /// Inserts a hardware breakpoint at `address`.
    pub fn insert_hwbreak(&mut self, address: Address) {
        let _ = self.hw_breaks.insert(address.raw());
    }

    /// Removes a hardware breakpoint from `address`.
    pub fn remove_hwbreak(&mut self, address: Address) {
        let _ = self.hw_breaks.remove(&address.raw());
    }

    /// Whether a hardware breakpoint is set at `address`.
    pub fn is_hwbreak(&self, address: Address) -> bool {
        self.hw_breaks.contains(&address.raw())
    }

    /// Sets whether an exception cause stops the machine.
    pub fn set_stop_on_exception(&mut self, excause: ExceptionCause, value: bool) {
        if value {
            let _ = self.stop_on_exception.insert(excause);
        } else {
            let _ = self.stop_on_exception.remove(&excause);
        }
    }

    /// Whether an exception cause stops the machine.
    pub fn get_stop_on_exception(&self, excause: ExceptionCause) -> bool {
        self.stop_on_exception.contains(&excause)
    }

    /// Sets whether an exception cause skips the `mtvec` redirect.
    pub fn set_step_over_exception(&mut self, excause: ExceptionCause, value: bool) {
        if value {
            let _ = self.step_over_exception.insert(excause);
        } else {
            let _ = self.step_over_exception.remove(&excause);
        }
    }

    /// Whether an exception cause skips the `mtvec` redirect.
    pub fn get_step_over_exception(&self, excause: ExceptionCause) -> bool {
        self.step_over_exception.contains(&excause)
    }

    /// Records the program extent used by the memory protection options.
    pub fn set_program_range(&mut self, first: Address, last: Address) {
        self.program_range = Some((first, last));
    }

    /// Register file of the core.
    pub fn registers(&self) -> &Registers {
        &self.regs
    }

    /// Mutable register file of the core.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// CSR control state of the core.
    pub fn control_state(&self) -> &ControlState {
        &self.csr
    }

    /// Mutable CSR control state of the core.
    pub fn control_state_mut(&mut self) -> &mut ControlState {
        &mut self.csr
    }

    /// Branch prediction subsystem.
    pub fn predictor(&self) -> &BranchPredictor {
        &self.predictor
    }

    /// Program-side memory frontend (TLB).
    pub fn mem_program_mut(&mut self) -> &mut Tlb {
        &mut self.mem_program
    }

    /// Data-side memory frontend (TLB).
    pub fn mem_data_mut(&mut self) -> &mut Tlb {
        &mut self.mem_data
    }

    /// Current pipeline latches (for visualization).
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Number of executed cycles.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Number of stall cycles inserted by the hazard unit.
    pub fn stall_count(&self) -> u64 {
        self.stall_count
    }

    /// Resets the core state (registers and memory are reset separately).
    pub fn reset(&mut self, entry_pc: Address) {
        self.pipeline.flush_all();
        self.regs.reset(entry_pc);
        self.csr.reset();
        self.cycle_count = 0;
        self.stall_count = 0;
        self.reservation = None;
        if let CoreKind::Single { prev_inst_addr } = &mut self.kind {
            *prev_inst_addr = Address::null();
        }
    }

    fn emit(&self, action: impl FnOnce(&mut dyn EventSink)) {
        if let Some(sink) = &self.events {
            action(&mut *sink.borrow_mut());
        }
    }

    /// Performs one step.
    ///
    /// # Errors
    ///
    /// Returns simulator errors raised by the memory system or by violated
    /// internal invariants; the machine converts them to the trapped state.
    pub fn step(&mut self, skip_break: bool) -> SimResult<StepOutcome> {
        self.cycle_count += 1;
        self.csr
            .increment_internal(csr_id::MCYCLE, 1);
        let outcome = match self.kind {
            CoreKind::Single { .. } => self.do_step_single(skip_break),
            CoreKind::Pipelined { hazard_unit } => self.do_step_pipelined(skip_break, hazard_unit),
        }?;
        self.emit(|sink| sink.pc_updated(self.regs.read_pc()));
        Ok(outcome)
    }

    // ── Stages ───────────────────────────────────────────────────────

    fn fetch(&mut self, skip_break: bool) -> SimResult<FetchInterstage> {
        let inst_addr = self.regs.read_pc();
        let mut excause = ExceptionCause::None;

        let inst = match self.mem_program.read_u32(inst_addr, AccessOptions::REGULAR) {
            Ok(word) => Instruction::new(word),
            Err(SimulatorError::PageFault(_)) => {
                excause = ExceptionCause::InstructionPageFault;
                Instruction::NOP
            }
            Err(other) => return Err(other),
        };

        if self.memory_execute_protection && excause == ExceptionCause::None {
            if let Some((first, last)) = self.program_range {
                if inst_addr < first || inst_addr > last {
                    excause = ExceptionCause::InstructionFault;
                }
            }
        }
        if !skip_break && self.hw_breaks.contains(&inst_addr.raw()) {
            excause = ExceptionCause::HwBreak;
        }
        if excause == ExceptionCause::None && self.csr.core_interrupt_request() {
            excause = ExceptionCause::Interrupt;
        }

        let predicted = self.predictor.predict(inst, inst_addr);
        self.regs.write_pc(predicted)?;
        if self.predictor.enabled() {
            let result = if predicted == inst_addr + 4u64 {
                BranchResult::NotTaken
            } else {
                BranchResult::Taken
            };
            self.emit(|sink| sink.prediction_made(inst_addr, result));
        }

        self.emit(|sink| sink.instruction_fetched(inst, inst_addr, excause, true));
        Ok(FetchInterstage {
            inst,
            inst_addr,
            next_inst_addr: inst_addr + inst.size(),
            predicted_next_inst_addr: predicted,
            excause,
            is_valid: true,
        })
    }

    fn decode(&mut self, dt: &FetchInterstage) -> DecodeInterstage {
        let inst_flags = dt.inst.flags();
        let mut excause = dt.excause;

        let supported = inst_flags & flags::SUPPORTED != 0
            && !(inst_flags & flags::RV64_ONLY != 0 && self.xlen == Xlen::Rv32);
        if !supported && excause == ExceptionCause::None {
            excause = ExceptionCause::IllegalInstruction;
        }

        let num_rs = dt.inst.rs();
        let num_rt = dt.inst.rt();
        let num_rd = dt.inst.rd();
        let mut val_rs = self.regs.read_gp(num_rs);
        let val_rt = self.regs.read_gp(num_rt);
        let immediate_val = RegisterValue::from(i64::from(dt.inst.immediate()));

        let is_csr = inst_flags & flags::CSR != 0;
        let csr_imm = inst_flags & flags::CSR_IMM != 0;
        let mut csr_read_val = RegisterValue::default();
        let mut csr_write = false;
        let mut csr_op = CsrOp::None;
        let csr_address = dt.inst.csr_address();

        if is_csr && excause == ExceptionCause::None {
            csr_op = match dt.inst.funct3() & 0b11 {
                0b01 => CsrOp::ReadWrite,
                0b10 => CsrOp::ReadSet,
                _ => CsrOp::ReadClear,
            };
            csr_write = csr_op == CsrOp::ReadWrite || num_rs != 0;
            match self.csr.read(CsrAddress(csr_address)) {
                Ok(value) => csr_read_val = value,
                Err(_) => excause = ExceptionCause::IllegalInstruction,
            }
            if csr_write && !CsrAddress(csr_address).is_writable() {
                excause = ExceptionCause::IllegalInstruction;
            }
            if csr_imm {
                // The rs1 field carries a zero-extended 5-bit immediate.
                val_rs = RegisterValue::from(u64::from(num_rs));
            }
        }

        if inst_flags & flags::EXCEPTION != 0 && excause == ExceptionCause::None {
            if inst_flags & flags::EBREAK != 0 {
                excause = ExceptionCause::Break;
            } else if inst_flags & flags::ECALL != 0 {
                excause = ExceptionCause::EcallAny;
            }
        }

        let alu_component = if inst_flags & flags::MUL != 0 {
            AluComponent::Mul
        } else if is_csr {
            AluComponent::Pass
        } else {
            AluComponent::Alu
        };

        self.emit(|sink| sink.instruction_decoded(dt.inst, dt.inst_addr, excause, dt.is_valid));

        DecodeInterstage {
            inst: dt.inst,
            inst_addr: dt.inst_addr,
            next_inst_addr: dt.next_inst_addr,
            predicted_next_inst_addr: dt.predicted_next_inst_addr,
            val_rs,
            val_rs_orig: val_rs,
            val_rt,
            val_rt_orig: val_rt,
            immediate_val,
            csr_read_val,
            csr_address,
            csr_op,
            excause,
            ff_rs: ForwardFrom::None,
            ff_rt: ForwardFrom::None,
            alu_component,
            aluop: dt.inst.alu_op(),
            memctl: dt.inst.mem_ctl(),
            num_rs,
            num_rt,
            num_rd,
            memread: inst_flags & flags::MEMREAD != 0,
            memwrite: inst_flags & flags::MEMWRITE != 0,
            alusrc: inst_flags & flags::ALUSRC != 0,
            regwrite: inst_flags & flags::REGWRITE != 0,
            alu_req_rs: inst_flags & flags::ALU_REQ_RS != 0,
            alu_req_rt: inst_flags & flags::ALU_REQ_RT != 0,
            branch_bxx: inst_flags & flags::BRANCH != 0,
            branch_jal: inst_flags & flags::JUMP != 0,
            branch_val: inst_flags & flags::BJ_NOT != 0,
            branch_jalr: inst_flags & flags::BRANCH_JALR != 0,
            stall: false,
            is_valid: dt.is_valid,
            w_operation: self.xlen == Xlen::Rv32 || inst_flags & flags::W_OPERATION != 0,
            alu_mod: inst_flags & flags::ALU_MOD != 0,
            alu_pc: inst_flags & flags::PC_TO_ALU != 0,
            csr: is_csr,
            csr_write,
            xret: inst_flags & flags::XRET != 0,
            sfence: inst_flags & flags::SFENCE != 0,
        }
    }

    fn execute(&mut self, dt: &DecodeInterstage) -> SimResult<ExecuteInterstage> {
        let excause = dt.excause;

        let alu_fst = if dt.alu_component == AluComponent::Pass {
            dt.val_rs
        } else if dt.alu_pc {
            RegisterValue::from(dt.inst_addr.raw())
        } else if dt.alu_req_rs {
            dt.val_rs
        } else {
            RegisterValue::default()
        };
        let alu_sec = if dt.alusrc { dt.immediate_val } else { dt.val_rt };

        let alu_val = if excause == ExceptionCause::None {
            alu_combined_operate(
                dt.aluop,
                dt.alu_component,
                dt.w_operation,
                dt.alu_mod,
                alu_fst,
                alu_sec,
            )?
        } else {
            RegisterValue::default()
        };

        // Branch targets: PC-relative for conditional branches and JAL, the
        // (bit-0-cleared) ALU result for JALR.
        let branch_jal_target = if dt.branch_jalr {
            Address::new(alu_val.as_xlen(self.xlen) & !1)
        } else {
            dt.inst_addr + dt.immediate_val.as_i64()
        };

        let branch_taken =
            dt.branch_bxx && ((alu_val.as_u64() != 0) ^ dt.branch_val ^ dt.alu_mod);

        // Jump-and-link instructions write the return address.
        let result_val = if dt.branch_jal {
            RegisterValue::from(dt.next_inst_addr.raw())
        } else {
            alu_val
        };

        if excause == ExceptionCause::None && dt.is_valid {
            if dt.sfence {
                let va = (dt.num_rs != 0)
                    .then(|| VirtualAddress::new(dt.val_rs.as_xlen(self.xlen)));
                let asid = (dt.num_rt != 0).then(|| dt.val_rt.as_u16() & 0x1FF);
                self.mem_program.sfence_vma(va, asid);
                self.mem_data.sfence_vma(va, asid);
            }

            if dt.branch_bxx || dt.branch_jal {
                self.predictor.update_target(dt.inst_addr, branch_jal_target);
                let result = if !dt.branch_bxx || branch_taken {
                    BranchResult::Taken
                } else {
                    BranchResult::NotTaken
                };
                self.predictor.update_result(dt.inst, dt.inst_addr, result);
                let stats = self.predictor.stats();
                self.emit(|sink| {
                    sink.predictor_updated(dt.inst_addr, result);
                    sink.predictor_stats_updated(stats);
                });
            }
        }

        self.emit(|sink| sink.instruction_executed(dt.inst, dt.inst_addr, excause, dt.is_valid));

        Ok(ExecuteInterstage {
            inst: dt.inst,
            inst_addr: dt.inst_addr,
            next_inst_addr: dt.next_inst_addr,
            predicted_next_inst_addr: dt.predicted_next_inst_addr,
            branch_jal_target,
            val_rt: dt.val_rt,
            alu_val: result_val,
            csr_read_val: dt.csr_read_val,
            csr_address: dt.csr_address,
            csr_op: dt.csr_op,
            excause,
            memctl: dt.memctl,
            num_rd: dt.num_rd,
            memread: dt.memread,
            memwrite: dt.memwrite,
            regwrite: dt.regwrite,
            is_valid: dt.is_valid,
            branch_bxx: dt.branch_bxx,
            branch_jal: dt.branch_jal,
            branch_val: dt.branch_val,
            branch_jalr: dt.branch_jalr,
            branch_taken,
            alu_zero: alu_val.as_u64() == 0,
            csr: dt.csr,
            csr_write: dt.csr_write,
            xret: dt.xret,
            sfence: dt.sfence,
            ff_rs: dt.ff_rs,
            ff_rt: dt.ff_rt,
        })
    }

    /// Special memory-stage handling for reservation, atomic, and cache
    /// control values.
    fn memory_special(
        &mut self,
        memctl: AccessControl,
        mem_addr: Address,
        val_rt: RegisterValue,
        towrite_val: &mut RegisterValue,
    ) -> SimResult<Option<ExceptionCause>> {
        use AccessControl as AC;

        match memctl {
            AC::Lr32 => {
                match self
                    .mem_data
                    .read_ctl(AC::I32, mem_addr, AccessOptions::REGULAR)
                {
                    Ok(value) => {
                        *towrite_val = value;
                        self.reservation = Some(mem_addr);
                    }
                    Err(SimulatorError::PageFault(_)) => {
                        return Ok(Some(ExceptionCause::LoadPageFault));
                    }
                    Err(other) => return Err(other),
                }
            }
            AC::Sc32 => {
                if self.reservation == Some(mem_addr) {
                    match self
                        .mem_data
                        .write_ctl(AC::U32, mem_addr, val_rt, AccessOptions::REGULAR)
                    {
                        Ok(_) => *towrite_val = RegisterValue::from(0u64),
                        Err(SimulatorError::PageFault(_)) => {
                            return Ok(Some(ExceptionCause::StorePageFault));
                        }
                        Err(other) => return Err(other),
                    }
                } else {
                    *towrite_val = RegisterValue::from(1u64);
                }
                self.reservation = None;
            }
            AC::AmoSwap32
            | AC::AmoAdd32
            | AC::AmoXor32
            | AC::AmoAnd32
            | AC::AmoOr32
            | AC::AmoMin32
            | AC::AmoMax32
            | AC::AmoMinu32
            | AC::AmoMaxu32 => {
                let loaded = match self
                    .mem_data
                    .read_ctl(AC::I32, mem_addr, AccessOptions::REGULAR)
                {
                    Ok(value) => value,
                    Err(SimulatorError::PageFault(_)) => {
                        return Ok(Some(ExceptionCause::LoadPageFault));
                    }
                    Err(other) => return Err(other),
                };
                let a = loaded.as_i32();
                let b = val_rt.as_i32();
                let modified: i32 = match memctl {
                    AC::AmoSwap32 => b,
                    AC::AmoAdd32 => a.wrapping_add(b),
                    AC::AmoXor32 => a ^ b,
                    AC::AmoAnd32 => a & b,
                    AC::AmoOr32 => a | b,
                    AC::AmoMin32 => a.min(b),
                    AC::AmoMax32 => a.max(b),
                    AC::AmoMinu32 => ((a as u32).min(b as u32)) as i32,
                    _ => ((a as u32).max(b as u32)) as i32,
                };
                match self.mem_data.write_ctl(
                    AC::U32,
                    mem_addr,
                    RegisterValue::from(modified),
                    AccessOptions::REGULAR,
                ) {
                    Ok(_) => {}
                    Err(SimulatorError::PageFault(_)) => {
                        return Ok(Some(ExceptionCause::StorePageFault));
                    }
                    Err(other) => return Err(other),
                }
                *towrite_val = loaded;
            }
            AC::CacheOp => {
                self.mem_program.sync()?;
                self.mem_data.sync()?;
            }
            other => {
                return Err(SimulatorError::UnknownMemoryControl(format!("{other:?}")));
            }
        }
        Ok(None)
    }

    fn memory(&mut self, dt: &ExecuteInterstage) -> SimResult<MemoryInterstage> {
        let mut towrite_val = dt.alu_val;
        let mem_addr = Address::new(dt.alu_val.as_xlen(self.xlen));
        let mut memread = dt.memread;
        let mut memwrite = dt.memwrite;
        let mut regwrite = dt.regwrite;
        let mut excause = dt.excause;
        let mut csr_written = false;
        let mut computed_next_inst_addr = Address::null();

        if excause == ExceptionCause::None {
            if dt.memctl.is_special() {
                if let Some(cause) =
                    self.memory_special(dt.memctl, mem_addr, dt.val_rt, &mut towrite_val)?
                {
                    excause = cause;
                }
            } else if dt.memctl.is_regular() {
                if memwrite
                    && self.memory_write_protection
                    && self.program_range.is_some_and(|(first, last)| {
                        mem_addr >= first && mem_addr <= last
                    })
                {
                    excause = ExceptionCause::StoreFault;
                }

                if memwrite && excause == ExceptionCause::None {
                    match self.mem_data.write_ctl(
                        dt.memctl,
                        mem_addr,
                        dt.val_rt,
                        AccessOptions::REGULAR,
                    ) {
                        Ok(_) => self.emit(|sink| sink.memory_written(mem_addr)),
                        Err(SimulatorError::PageFault(_)) => {
                            excause = ExceptionCause::StorePageFault;
                        }
                        Err(other) => return Err(other),
                    }
                }
                if memread && excause == ExceptionCause::None {
                    match self
                        .mem_data
                        .read_ctl(dt.memctl, mem_addr, AccessOptions::REGULAR)
                    {
                        Ok(value) => {
                            towrite_val = value;
                            self.emit(|sink| sink.memory_read(mem_addr));
                        }
                        Err(SimulatorError::PageFault(_)) => {
                            excause = ExceptionCause::LoadPageFault;
                        }
                        Err(other) => return Err(other),
                    }
                }
            }

            if dt.csr && excause == ExceptionCause::None {
                let operand = dt.alu_val;
                let old = dt.csr_read_val;
                towrite_val = old;
                if dt.csr_write {
                    let new_value = match dt.csr_op {
                        CsrOp::ReadWrite => operand,
                        CsrOp::ReadSet => {
                            RegisterValue::new(old.as_u64() | operand.as_u64())
                        }
                        CsrOp::ReadClear => {
                            RegisterValue::new(old.as_u64() & !operand.as_u64())
                        }
                        CsrOp::None => old,
                    };
                    match self.csr.write(CsrAddress(dt.csr_address), new_value) {
                        Ok(()) => {
                            csr_written = true;
                            if let Ok(internal_id) =
                                ControlState::register_internal_id(CsrAddress(dt.csr_address))
                            {
                                let stored = self.csr.read_internal(internal_id);
                                if internal_id == csr_id::SATP {
                                    self.mem_program.on_satp_write(stored.as_u32());
                                    self.mem_data.on_satp_write(stored.as_u32());
                                }
                                self.emit(|sink| sink.csr_written(internal_id, stored));
                            }
                        }
                        Err(_) => excause = ExceptionCause::IllegalInstruction,
                    }
                }
            }

            if dt.xret && excause == ExceptionCause::None {
                let _restored = self.csr.exception_return(PrivilegeLevel::Machine);
                computed_next_inst_addr =
                    Address::new(self.csr.read_internal(csr_id::MEPC).as_xlen(self.xlen));
            }
        }

        if excause != ExceptionCause::None {
            memread = false;
            memwrite = false;
            regwrite = false;
        }
        let _ = memwrite;

        self.emit(|sink| sink.instruction_memory(dt.inst, dt.inst_addr, excause, dt.is_valid));

        Ok(MemoryInterstage {
            inst: dt.inst,
            inst_addr: dt.inst_addr,
            next_inst_addr: dt.next_inst_addr,
            predicted_next_inst_addr: dt.predicted_next_inst_addr,
            computed_next_inst_addr,
            mem_addr,
            towrite_val,
            excause,
            num_rd: dt.num_rd,
            memtoreg: memread,
            regwrite,
            csr_written,
            xret: dt.xret && excause == ExceptionCause::None,
            is_valid: dt.is_valid,
        })
    }

    fn writeback(&mut self, dt: &MemoryInterstage) -> WritebackState {
        self.emit(|sink| {
            sink.instruction_writeback(dt.inst, dt.inst_addr, dt.excause, dt.is_valid);
        });
        if dt.regwrite {
            self.regs.write_gp(dt.num_rd, dt.towrite_val);
            self.emit(|sink| sink.gp_updated(dt.num_rd, dt.towrite_val));
        }
        if dt.is_valid && dt.excause == ExceptionCause::None {
            // The instructions-retired counter counts commits.
            self.csr.increment_internal(csr_id::MINSTRET, 1);
        }

        WritebackState {
            inst: dt.inst,
            inst_addr: dt.inst_addr,
            value: dt.towrite_val,
            num_rd: dt.num_rd,
            regwrite: dt.regwrite,
            is_valid: dt.is_valid,
        }
    }

    /// The next PC the execute stage proved correct.
    fn handle_pc(&self, dt: &ExecuteInterstage) -> Address {
        if dt.branch_jal || dt.branch_jalr || dt.branch_taken {
            return dt.branch_jal_target;
        }
        dt.inst_addr + 4u64
    }

    // ── Step variants ────────────────────────────────────────────────

    fn do_step_single(&mut self, skip_break: bool) -> SimResult<StepOutcome> {
        let jump_branch_pc = match self.kind {
            CoreKind::Single { prev_inst_addr } => prev_inst_addr,
            CoreKind::Pipelined { .. } => Address::null(),
        };

        let fetch_out = self.fetch(skip_break)?;
        let decode_out = self.decode(&fetch_out);
        let execute_out = self.execute(&decode_out)?;
        let memory_out = self.memory(&execute_out)?;
        let writeback_out = self.writeback(&memory_out);

        self.regs.write_pc(self.handle_pc(&execute_out))?;
        if memory_out.xret {
            self.regs.write_pc(memory_out.computed_next_inst_addr)?;
        }

        self.pipeline = Pipeline {
            fetch: fetch_out,
            decode: decode_out,
            execute: execute_out,
            memory: memory_out.clone(),
            writeback: writeback_out,
        };

        if let CoreKind::Single { prev_inst_addr } = &mut self.kind {
            *prev_inst_addr = memory_out.inst_addr;
        }

        if memory_out.excause != ExceptionCause::None {
            return self.escalate_exception(&memory_out, jump_branch_pc);
        }
        Ok(StepOutcome::Normal)
    }

    fn do_step_pipelined(
        &mut self,
        skip_break: bool,
        hazard_unit: HazardUnit,
    ) -> SimResult<StepOutcome> {
        let jump_branch_pc = self.pipeline.memory.inst_addr;

        // Advance in reverse order so every stage consumes the previous
        // cycle's latch.
        let memory_in = self.pipeline.memory.clone();
        let execute_in = self.pipeline.execute.clone();
        let decode_in = self.pipeline.decode.clone();
        let fetch_in = self.pipeline.fetch.clone();

        self.pipeline.writeback = self.writeback(&memory_in);
        self.pipeline.memory = self.memory(&execute_in)?;
        self.pipeline.execute = self.execute(&decode_in)?;
        self.pipeline.decode = self.decode(&fetch_in);

        if self.pipeline.memory.xret {
            // MRET redirects to mepc and squashes the younger instructions.
            let target = self.pipeline.memory.computed_next_inst_addr;
            self.regs.write_pc(target)?;
            self.pipeline.fetch.flush();
            self.pipeline.decode.flush();
            self.pipeline.execute.flush();
            return Ok(StepOutcome::Normal);
        }

        if self.pipeline.memory.excause != ExceptionCause::None {
            let memory_out = self.pipeline.memory.clone();
            self.regs.write_pc(self.pipeline.execute.inst_addr)?;
            self.pipeline.fetch.flush();
            self.pipeline.decode.flush();
            self.pipeline.execute.flush();
            return self.escalate_exception(&memory_out, jump_branch_pc);
        }

        self.pipeline.decode.ff_rs = ForwardFrom::None;
        self.pipeline.decode.ff_rt = ForwardFrom::None;
        let mut stall = false;

        if hazard_unit != HazardUnit::None {
            // x0 is exempt: it has no effect when written and appears in NOP.
            let d_req_rs = self.pipeline.decode.alu_req_rs;
            let d_req_rt = self.pipeline.decode.alu_req_rt;
            let d_rs = self.pipeline.decode.num_rs;
            let d_rt = self.pipeline.decode.num_rt;

            // Hazard with the instruction in the memory-stage latch; the
            // writeback value propagates combinatorially this cycle.
            let m_rd = self.pipeline.memory.num_rd;
            let m_regwrite = self.pipeline.memory.regwrite;
            let m_val = self.pipeline.memory.towrite_val;
            if m_regwrite
                && m_rd != 0
                && ((d_req_rs && m_rd == d_rs) || (d_req_rt && m_rd == d_rt))
            {
                if hazard_unit == HazardUnit::StallForward {
                    if d_req_rs && m_rd == d_rs {
                        self.pipeline.decode.val_rs = m_val;
                        self.pipeline.decode.ff_rs = ForwardFrom::FromWriteback;
                    }
                    if d_req_rt && m_rd == d_rt {
                        self.pipeline.decode.val_rt = m_val;
                        self.pipeline.decode.ff_rt = ForwardFrom::FromWriteback;
                    }
                } else {
                    stall = true;
                }
            }

            // Hazard with the instruction in the execute-stage latch.
            let e_rd = self.pipeline.execute.num_rd;
            let e_regwrite = self.pipeline.execute.regwrite;
            let e_memread = self.pipeline.execute.memread;
            let e_val = self.pipeline.execute.alu_val;
            if e_regwrite
                && e_rd != 0
                && ((d_req_rs && e_rd == d_rs) || (d_req_rt && e_rd == d_rt))
            {
                if hazard_unit == HazardUnit::StallForward {
                    if e_memread {
                        // Load-use: the value is not available yet.
                        stall = true;
                    } else {
                        if d_req_rs && e_rd == d_rs {
                            self.pipeline.decode.val_rs = e_val;
                            self.pipeline.decode.ff_rs = ForwardFrom::FromMemory;
                        }
                        if d_req_rt && e_rd == d_rt {
                            self.pipeline.decode.val_rt = e_val;
                            self.pipeline.decode.ff_rt = ForwardFrom::FromMemory;
                        }
                    }
                } else {
                    stall = true;
                }
            }
        }

        if stall {
            // Keep the fetch latch and PC; send a bubble to execute.
            self.pipeline.decode.flush();
            self.pipeline.decode.stall = true;
            self.stall_count += 1;
        } else {
            self.pipeline.fetch = self.fetch(skip_break)?;
            let real_addr = self.handle_pc(&self.pipeline.execute);
            if self.pipeline.execute.is_valid && real_addr != self.pipeline.decode.inst_addr {
                // Mispredict: rewrite the PC and squash fetch and decode.
                self.regs.write_pc(real_addr)?;
                self.pipeline.decode.flush();
                self.pipeline.fetch.flush();
            }
        }

        Ok(StepOutcome::Normal)
    }

    /// Memory-stage exception escalation.
    ///
    /// Recovery (pipeline flush, PC rewrite) has been performed by the
    /// caller; here the CSR state is updated, the PC optionally redirected to
    /// the trap vector, and the registered handler invoked.
    fn escalate_exception(
        &mut self,
        memory_out: &MemoryInterstage,
        jump_branch_pc: Address,
    ) -> SimResult<StepOutcome> {
        let cause = memory_out.excause;

        // The synthetic any-privilege ECALL cause becomes the architectural
        // machine-mode code in mcause; only machine mode is simulated.
        let architectural_cause = if cause == ExceptionCause::EcallAny {
            ExceptionCause::EcallMachine
        } else {
            cause
        };
        self.csr.update_exception_cause(architectural_cause);
        self.csr.write_internal(
            csr_id::MEPC,
            RegisterValue::from(memory_out.inst_addr.raw()),
        );

        let mtvec = self.csr.read_internal(csr_id::MTVEC).as_xlen(self.xlen);
        if !self.step_over_exception.contains(&cause) && mtvec != 0 {
            self.csr
                .exception_initiate(PrivilegeLevel::Machine, PrivilegeLevel::Machine);
            self.regs.write_pc(Address::new(mtvec & !0x3))?;
        }

        let frame = ExceptionFrame {
            cause,
            inst_addr: memory_out.inst_addr,
            next_addr: self.regs.read_pc(),
            jump_branch_pc,
            mem_ref_addr: memory_out.mem_addr,
        };
        let continue_simulation = match self.handlers.remove(&cause) {
            Some(mut handler) => {
                let result = handler.handle_exception(&mut self.regs, &frame);
                let _ = self.handlers.insert(cause, handler);
                result
            }
            None => StopExceptionHandler.handle_exception(&mut self.regs, &frame),
        };

        if !continue_simulation || self.stop_on_exception.contains(&cause) {
            Ok(StepOutcome::Stop(cause))
        } else {
            Ok(StepOutcome::Normal)
        }
    }
}
