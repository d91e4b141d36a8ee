//! Branch prediction subsystem.
//!
//! This module combines the three cooperating structures that feed the fetch
//! stage with a speculative next PC:
//! 1. **Branch history register (BHR):** The last N direction bits, shifted
//!    left with the newest outcome as LSB.
//! 2. **Branch target table (BTT):** The most recently observed target for
//!    each encountered branch instruction address.
//! 3. **Direction predictor:** One of always-not-taken, always-taken, BTFNT,
//!    Smith 1-bit, Smith 2-bit, or Smith 2-bit with hysteresis, backed by a
//!    branch history table (BHT) with per-row statistics.
//!
//! Prediction and update are driven by the core: `predict` at fetch,
//! `update_target`/`update_result` at branch resolution.

use tracing::warn;

use crate::common::address::Address;
use crate::common::error::{SimResult, SimulatorError};
use crate::config::{PREDICTOR_MAX_TABLE_BITS, PredictorConfig, PredictorKind, PredictorState};
use crate::isa::instruction::Instruction;

/// Resolved or predicted direction of one branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BranchResult {
    /// The branch falls through.
    #[default]
    NotTaken,
    /// The branch goes to its target.
    Taken,
    /// No prediction has been made yet.
    Undefined,
}

/// Input handed to the direction predictor for one prediction.
#[derive(Clone, Copy, Debug)]
pub struct PredictionInput {
    /// The branch instruction.
    pub instruction: Instruction,
    /// Address of the branch instruction.
    pub instruction_address: Address,
    /// Target recorded in the BTT.
    pub target_address: Address,
    /// Index of the BHT row used for this prediction.
    pub bht_index: u16,
}

/// Feedback handed to the direction predictor after resolution.
#[derive(Clone, Copy, Debug)]
pub struct PredictionFeedback {
    /// The branch instruction.
    pub instruction: Instruction,
    /// Address of the branch instruction.
    pub instruction_address: Address,
    /// Resolved target address.
    pub target_address: Address,
    /// Index of the BHT row to train.
    pub bht_index: u16,
    /// Resolved direction.
    pub result: BranchResult,
}

/// Correct/wrong bookkeeping with integer-percent accuracy.
#[derive(Clone, Copy, Debug)]
pub struct PredictionStatistics {
    /// Number of correct predictions.
    pub correct: u32,
    /// Number of wrong predictions.
    pub wrong: u32,
    /// `100 * correct / (correct + wrong)`, integer truncated.
    pub accuracy: u32,
    /// Most recent prediction.
    pub last_prediction: BranchResult,
    /// Most recent resolved result.
    pub last_result: BranchResult,
}

impl Default for PredictionStatistics {
    fn default() -> Self {
        Self {
            correct: 0,
            wrong: 0,
            accuracy: 0,
            last_prediction: BranchResult::Undefined,
            last_result: BranchResult::Undefined,
        }
    }
}

// ── Branch history register ──────────────────────────────────────────

/// Global shift register of recent branch outcomes, MSB oldest.
#[derive(Clone, Debug)]
pub struct BranchHistoryRegister {
    number_of_bits: u8,
    register_mask: u16,
    value: u16,
}

impl BranchHistoryRegister {
    /// Creates a history register of `number_of_bits` bits (clamped to the
    /// predictor table limit).
    pub fn new(number_of_bits: u8) -> Self {
        let checked_bits = if number_of_bits > PREDICTOR_MAX_TABLE_BITS {
            warn!(
                bits = number_of_bits,
                "BHR bit count exceeds limit, clamping"
            );
            PREDICTOR_MAX_TABLE_BITS
        } else {
            number_of_bits
        };
        let register_mask = if checked_bits >= PREDICTOR_MAX_TABLE_BITS {
            u16::MAX
        } else if checked_bits == 0 {
            0
        } else {
            (1 << checked_bits) - 1
        };
        Self {
            number_of_bits: checked_bits,
            register_mask,
            value: 0,
        }
    }

    /// Number of bits kept in the register.
    pub fn number_of_bits(&self) -> u8 {
        self.number_of_bits
    }

    /// Current history value.
    pub fn value(&self) -> u16 {
        self.value
    }

    /// Shifts the newest outcome into the register.
    pub fn update(&mut self, result: BranchResult) {
        self.value <<= 1;
        if result == BranchResult::Taken {
            self.value |= 0x1;
        }
        self.value &= self.register_mask;
    }
}

// ── Branch target table ──────────────────────────────────────────────

/// One branch target table row.
#[derive(Clone, Copy, Debug, Default)]
pub struct BranchTargetTableEntry {
    /// Address of the branch instruction.
    pub instruction_address: Address,
    /// Most recently observed target.
    pub target_address: Address,
}

/// Table of observed branch targets addressed by `[BHR | address bits]`.
#[derive(Clone, Debug)]
pub struct BranchTargetTable {
    rows: Vec<BranchTargetTableEntry>,
}

impl BranchTargetTable {
    /// Creates a table of `2^number_of_bits` rows.
    pub fn new(number_of_bits: u8) -> Self {
        Self {
            rows: vec![BranchTargetTableEntry::default(); 1 << number_of_bits],
        }
    }

    /// Finds the recorded target for an instruction address; null when the
    /// address has not been observed.
    pub fn target_address(&self, instruction_address: Address) -> Address {
        for entry in &self.rows {
            if entry.instruction_address == instruction_address {
                return entry.target_address;
            }
        }
        Address::null()
    }

    /// Whether the instruction address is present anywhere in the table.
    pub fn is_address_in_table(&self, instruction_address: Address) -> bool {
        !self.target_address(instruction_address).is_null()
    }

    /// Inserts `(instruction_address, target_address)` at `index` unless the
    /// address is already recorded. Entries are not moved on hit.
    pub fn update(&mut self, index: u16, instruction_address: Address, target_address: Address) {
        if index as usize >= self.rows.len() {
            warn!(index, "BTT update at invalid index");
            return;
        }
        if self.is_address_in_table(instruction_address) {
            return;
        }
        self.rows[index as usize] = BranchTargetTableEntry {
            instruction_address,
            target_address,
        };
    }

    /// Row contents for inspection frontends.
    pub fn row(&self, index: u16) -> Option<BranchTargetTableEntry> {
        self.rows.get(index as usize).copied()
    }
}

// ── Direction predictor ──────────────────────────────────────────────

/// One branch history table row.
#[derive(Clone, Copy, Debug)]
pub struct BhtRow {
    /// Saturating-counter state of the row.
    pub state: PredictorState,
    /// Per-row statistics.
    pub stats: PredictionStatistics,
}

/// Direction predictor with its branch history table.
///
/// The predictor variant is selected by `kind`; the non-table predictors
/// (always-taken, always-not-taken, BTFNT) keep an empty table.
#[derive(Clone, Debug)]
pub struct DirectionPredictor {
    kind: PredictorKind,
    bht: Vec<BhtRow>,
    stats: PredictionStatistics,
}

const fn state_to_prediction(state: PredictorState) -> BranchResult {
    match state {
        PredictorState::NotTaken
        | PredictorState::WeaklyNotTaken
        | PredictorState::StronglyNotTaken => BranchResult::NotTaken,
        PredictorState::Taken | PredictorState::WeaklyTaken | PredictorState::StronglyTaken => {
            BranchResult::Taken
        }
    }
}

impl DirectionPredictor {
    fn new(kind: PredictorKind, table_bits: u8, initial_state: PredictorState) -> Self {
        let uses_table = matches!(
            kind,
            PredictorKind::Smith1Bit | PredictorKind::Smith2Bit | PredictorKind::Smith2BitHysteresis
        );
        let mut stats = PredictionStatistics::default();
        stats.last_prediction = match kind {
            PredictorKind::AlwaysNotTaken => BranchResult::NotTaken,
            PredictorKind::AlwaysTaken => BranchResult::Taken,
            PredictorKind::Btfnt => BranchResult::Undefined,
            _ => state_to_prediction(initial_state),
        };
        let bht = if uses_table {
            vec![
                BhtRow {
                    state: initial_state,
                    stats: PredictionStatistics {
                        last_prediction: state_to_prediction(initial_state),
                        ..PredictionStatistics::default()
                    },
                };
                1 << table_bits
            ]
        } else {
            Vec::new()
        };
        Self { kind, bht, stats }
    }

    fn make_prediction(&self, input: PredictionInput) -> BranchResult {
        match self.kind {
            PredictorKind::AlwaysNotTaken => BranchResult::NotTaken,
            PredictorKind::AlwaysTaken => BranchResult::Taken,
            PredictorKind::Btfnt => {
                // Backward taken, forward not taken.
                if input.target_address > input.instruction_address {
                    BranchResult::NotTaken
                } else {
                    BranchResult::Taken
                }
            }
            _ => match self.bht.get(input.bht_index as usize) {
                Some(row) => state_to_prediction(row.state),
                None => {
                    warn!(index = input.bht_index, "BHT read at invalid index");
                    BranchResult::NotTaken
                }
            },
        }
    }

    /// Produces a prediction and records it in the statistics.
    fn predict(&mut self, input: PredictionInput) -> BranchResult {
        let result = self.make_prediction(input);
        self.stats.last_prediction = result;
        if let Some(row) = self.bht.get_mut(input.bht_index as usize) {
            row.stats.last_prediction = result;
        }
        result
    }

    /// Trains the predictor with a resolved outcome.
    fn update(&mut self, feedback: PredictionFeedback) {
        if self.kind == PredictorKind::Btfnt && self.stats.last_prediction == BranchResult::Undefined
        {
            self.stats.last_prediction = self.make_prediction(PredictionInput {
                instruction: feedback.instruction,
                instruction_address: feedback.instruction_address,
                target_address: feedback.target_address,
                bht_index: feedback.bht_index,
            });
        }
        self.update_bht(feedback);
        self.update_stats(feedback);
    }

    fn update_bht(&mut self, feedback: PredictionFeedback) {
        use PredictorState as S;

        let kind = self.kind;
        let Some(row) = self.bht.get_mut(feedback.bht_index as usize) else {
            return;
        };

        row.state = match kind {
            PredictorKind::Smith1Bit => match feedback.result {
                BranchResult::NotTaken => S::NotTaken,
                BranchResult::Taken => S::Taken,
                BranchResult::Undefined => row.state,
            },
            PredictorKind::Smith2Bit => match feedback.result {
                BranchResult::NotTaken => match row.state {
                    S::StronglyTaken => S::WeaklyTaken,
                    S::WeaklyTaken => S::WeaklyNotTaken,
                    _ => S::StronglyNotTaken,
                },
                BranchResult::Taken => match row.state {
                    S::StronglyNotTaken => S::WeaklyNotTaken,
                    S::WeaklyNotTaken => S::WeaklyTaken,
                    _ => S::StronglyTaken,
                },
                BranchResult::Undefined => row.state,
            },
            PredictorKind::Smith2BitHysteresis => match feedback.result {
                // The weak states skip the opposite weak state.
                BranchResult::NotTaken => match row.state {
                    S::StronglyTaken => S::WeaklyTaken,
                    _ => S::StronglyNotTaken,
                },
                BranchResult::Taken => match row.state {
                    S::StronglyNotTaken => S::WeaklyNotTaken,
                    _ => S::StronglyTaken,
                },
                BranchResult::Undefined => row.state,
            },
            _ => return,
        };
    }

    fn update_stats(&mut self, feedback: PredictionFeedback) {
        self.stats.last_result = feedback.result;
        if self.stats.last_prediction == feedback.result {
            self.stats.correct += 1;
        } else {
            self.stats.wrong += 1;
        }
        let total = self.stats.correct + self.stats.wrong;
        self.stats.accuracy = if total > 0 {
            100 * self.stats.correct / total
        } else {
            0
        };

        if let Some(row) = self.bht.get_mut(feedback.bht_index as usize) {
            row.stats.last_result = feedback.result;
            if row.stats.last_prediction == feedback.result {
                row.stats.correct += 1;
            } else {
                row.stats.wrong += 1;
            }
            let row_total = row.stats.correct + row.stats.wrong;
            row.stats.accuracy = if row_total > 0 {
                100 * row.stats.correct / row_total
            } else {
                100
            };
        }
    }
}

// ── Branch predictor top level ───────────────────────────────────────

/// Complete branch prediction subsystem.
///
/// The table index combines BHR bits with low instruction-address bits:
/// `index = (bhr << address_bits) | ((pc >> 2) & address_mask)`.
pub struct BranchPredictor {
    enabled: bool,
    number_of_bhr_bits: u8,
    number_of_address_bits: u8,
    number_of_table_bits: u8,
    predictor: DirectionPredictor,
    bhr: BranchHistoryRegister,
    btt: BranchTargetTable,
}

impl BranchPredictor {
    /// Builds the predictor from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Sanity`] when the BHR and address bit counts
    /// (or their sum) exceed the table limit.
    pub fn new(config: &PredictorConfig) -> SimResult<Self> {
        let bhr_bits = config.bhr_bits;
        let address_bits = config.bht_addr_bits;
        if bhr_bits > PREDICTOR_MAX_TABLE_BITS
            || address_bits > PREDICTOR_MAX_TABLE_BITS
            || bhr_bits + address_bits > PREDICTOR_MAX_TABLE_BITS
        {
            return Err(SimulatorError::Sanity(
                "branch predictor: invalid number of BHR and address index bits".to_string(),
            ));
        }
        let table_bits = bhr_bits + address_bits;

        Ok(Self {
            enabled: config.enabled,
            number_of_bhr_bits: bhr_bits,
            number_of_address_bits: address_bits,
            number_of_table_bits: table_bits,
            predictor: DirectionPredictor::new(config.kind, table_bits, config.initial_state),
            bhr: BranchHistoryRegister::new(bhr_bits),
            btt: BranchTargetTable::new(table_bits),
        })
    }

    /// Whether prediction is active.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of BHR bits in the table index.
    pub fn number_of_bhr_bits(&self) -> u8 {
        self.number_of_bhr_bits
    }

    /// Number of instruction-address bits in the table index.
    pub fn number_of_address_bits(&self) -> u8 {
        self.number_of_address_bits
    }

    /// Total table index width.
    pub fn number_of_table_bits(&self) -> u8 {
        self.number_of_table_bits
    }

    /// Global prediction statistics.
    pub fn stats(&self) -> PredictionStatistics {
        self.predictor.stats
    }

    /// BHT row contents for inspection frontends.
    pub fn bht_row(&self, index: u16) -> Option<BhtRow> {
        self.predictor.bht.get(index as usize).copied()
    }

    /// BTT row contents for inspection frontends.
    pub fn btt_row(&self, index: u16) -> Option<BranchTargetTableEntry> {
        self.btt.row(index)
    }

    /// Current BHR value.
    pub fn bhr_value(&self) -> u16 {
        self.bhr.value()
    }

    /// Computes the BTT/BHT index for an instruction address.
    pub fn calculate_index(&self, instruction_address: Address) -> u16 {
        let bhr_part = self.bhr.value() << self.number_of_address_bits;
        let address_mask = (1u32 << self.number_of_address_bits) - 1;
        let address_part = (instruction_address.raw() >> 2) as u32 & address_mask;
        bhr_part | address_part as u16
    }

    /// Supplies the speculative next PC for the fetch stage.
    ///
    /// Returns `pc + 4` when prediction is disabled, the instruction has no
    /// recorded target, or the direction predictor says not taken.
    pub fn predict(&mut self, instruction: Instruction, instruction_address: Address) -> Address {
        if !self.enabled {
            return instruction_address + 4u64;
        }

        let target_address = self.btt.target_address(instruction_address);
        if target_address.is_null() {
            return instruction_address + 4u64;
        }

        let input = PredictionInput {
            instruction,
            instruction_address,
            target_address,
            bht_index: self.calculate_index(instruction_address),
        };
        if self.predictor.predict(input) == BranchResult::Taken {
            target_address
        } else {
            instruction_address + 4u64
        }
    }

    /// Records a resolved branch target in the BTT.
    pub fn update_target(&mut self, instruction_address: Address, target_address: Address) {
        if !self.enabled {
            return;
        }
        let index = self.calculate_index(instruction_address);
        self.btt.update(index, instruction_address, target_address);
    }

    /// Trains the subsystem with a resolved branch outcome.
    ///
    /// The outcome is shifted into the BHR; the direction predictor is only
    /// updated when the branch has a BTT entry.
    pub fn update_result(
        &mut self,
        instruction: Instruction,
        instruction_address: Address,
        result: BranchResult,
    ) {
        if !self.enabled {
            return;
        }

        self.bhr.update(result);

        let target_address = self.btt.target_address(instruction_address);
        if target_address.is_null() {
            return;
        }

        self.predictor.update(PredictionFeedback {
            instruction,
            instruction_address,
            target_address,
            bht_index: self.calculate_index(instruction_address),
            result,
        });
    }
}
