//! Observable simulation events.
//!
//! The graphical collaborator watches the machine through this interface.
//! The core defines the event types and calls the sink at well-defined
//! points; it does not depend on any specific dispatch mechanism. Every
//! method has an empty default so a sink only implements what it displays.

use crate::common::address::Address;
use crate::common::defs::ExceptionCause;
use crate::common::value::{RegisterId, RegisterValue};
use crate::core::predictor::{BranchResult, PredictionStatistics};
use crate::isa::instruction::Instruction;
use crate::machine::MachineStatus;

/// Observer of simulation events.
#[allow(unused_variables)]
pub trait EventSink {
    /// An instruction passed the fetch stage.
    fn instruction_fetched(
        &mut self,
        inst: Instruction,
        addr: Address,
        excause: ExceptionCause,
        valid: bool,
    ) {
    }

    /// An instruction passed the decode stage.
    fn instruction_decoded(
        &mut self,
        inst: Instruction,
        addr: Address,
        excause: ExceptionCause,
        valid: bool,
    ) {
    }

    /// An instruction passed the execute stage.
    fn instruction_executed(
        &mut self,
        inst: Instruction,
        addr: Address,
        excause: ExceptionCause,
        valid: bool,
    ) {
    }

    /// An instruction passed the memory stage.
    fn instruction_memory(
        &mut self,
        inst: Instruction,
        addr: Address,
        excause: ExceptionCause,
        valid: bool,
    ) {
    }

    /// An instruction committed at the writeback stage.
    fn instruction_writeback(
        &mut self,
        inst: Instruction,
        addr: Address,
        excause: ExceptionCause,
        valid: bool,
    ) {
    }

    /// The program counter changed.
    fn pc_updated(&mut self, addr: Address) {}

    /// A general-purpose register was written.
    fn gp_updated(&mut self, id: RegisterId, value: RegisterValue) {}

    /// A CSR was written (identified by its internal id).
    fn csr_written(&mut self, internal_id: usize, value: RegisterValue) {}

    /// The predictor proposed a next PC for a recognized branch.
    fn prediction_made(&mut self, addr: Address, result: BranchResult) {}

    /// The predictor was trained with a resolved outcome.
    fn predictor_updated(&mut self, addr: Address, result: BranchResult) {}

    /// The global predictor statistics changed.
    fn predictor_stats_updated(&mut self, stats: PredictionStatistics) {}

    /// A data-side memory write completed.
    fn memory_written(&mut self, addr: Address) {}

    /// A data-side memory read completed.
    fn memory_read(&mut self, addr: Address) {}

    /// The machine status changed.
    fn status_changed(&mut self, status: MachineStatus) {}

    /// The program reached an exit condition.
    fn program_exit(&mut self) {}

    /// The program trapped with a simulator error.
    fn program_trap(&mut self, message: &str) {}
}

/// A sink that ignores every event.
pub struct NullEventSink;

impl EventSink for NullEventSink {}
