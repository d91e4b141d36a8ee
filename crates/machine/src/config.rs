//! Machine configuration.
//!
//! This module defines all configuration structures and enums used to
//! parameterize the simulator. It provides:
//! 1. **Defaults:** Baseline constants for the memory hierarchy, predictor,
//!    and TLB shape.
//! 2. **Structures:** Hierarchical config for the core, caches, predictor,
//!    TLB, memory timing, and OS-emulation cooperation flags.
//! 3. **Presets:** The four teaching presets from the original simulator
//!    (single-cycle, single-cycle with cache, pipelined without hazard unit,
//!    fully pipelined).
//!
//! Configuration is deserialized from JSON by the CLI, or constructed with
//! `MachineConfig::default()` / `MachineConfig::preset(..)`.

use serde::Deserialize;

/// Default configuration constants.
mod defaults {
    /// Default number of cache sets.
    pub const CACHE_SETS: u32 = 1;
    /// Default cache block size in 32-bit words.
    pub const CACHE_BLOCK_WORDS: u32 = 1;
    /// Default cache associativity.
    pub const CACHE_WAYS: u32 = 1;

    /// Default read access time of the main memory in cycles.
    pub const ACCESS_TIME_READ: u32 = 10;
    /// Default write access time of the main memory in cycles.
    pub const ACCESS_TIME_WRITE: u32 = 10;
    /// Default per-word burst access time in cycles.
    pub const ACCESS_TIME_BURST: u32 = 0;
    /// Default level-2 cache access time in cycles.
    pub const ACCESS_TIME_LEVEL2: u32 = 2;

    /// Default number of TLB sets.
    pub const TLB_SETS: u32 = 16;
    /// Default TLB associativity.
    pub const TLB_WAYS: u32 = 4;

    /// Default number of branch-target-table address bits.
    pub const BP_BTB_BITS: u8 = 2;
    /// Default number of branch-history-register bits.
    pub const BP_BHR_BITS: u8 = 0;
    /// Default number of branch-history-table address bits.
    pub const BP_BHT_ADDR_BITS: u8 = 2;
}

/// Width of an integer register in bits (RV32 or RV64).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum Xlen {
    /// 32-bit registers and address space.
    #[default]
    #[serde(alias = "32", alias = "rv32")]
    Rv32,
    /// 64-bit registers; addresses still fit the Sv32 translation scheme.
    #[serde(alias = "64", alias = "rv64")]
    Rv64,
}

impl Xlen {
    /// The register width in bits.
    pub const fn bits(self) -> u32 {
        match self {
            Self::Rv32 => 32,
            Self::Rv64 => 64,
        }
    }
}

/// Byte order of the simulated machine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Little-endian byte order (the RISC-V default).
    #[default]
    Little,
    /// Big-endian byte order.
    Big,
}

/// Set of enabled ISA extension letters.
///
/// Bit `n` corresponds to extension letter `'A' + n`, mirroring the `misa`
/// extension field layout. `E`, `I`, and `M` are always present.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct IsaWord(pub u32);

impl IsaWord {
    /// An ISA word with a single extension letter set.
    pub const fn by_char(letter: char) -> Self {
        Self(1 << (letter as u32 - 'A' as u32))
    }

    /// Whether the given extension letter is enabled.
    pub const fn contains(self, letter: char) -> bool {
        self.0 & (1 << (letter as u32 - 'A' as u32)) != 0
    }

    /// Union of two ISA words.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl Default for IsaWord {
    /// `E`, `I` and `M` are the fixed baseline; `A` (word atomics) is
    /// enabled by default as well.
    fn default() -> Self {
        Self::by_char('E')
            .union(Self::by_char('I'))
            .union(Self::by_char('M'))
            .union(Self::by_char('A'))
    }
}

/// Cache replacement policy algorithms.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementPolicy {
    /// Random victim selection.
    Rand,
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used.
    Lfu,
    /// Pseudo-LRU (tree of direction bits).
    Plru,
}

/// Cache write policies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Write through, no allocation on write miss.
    ThroughNoalloc,
    /// Write through, allocate and fill on write miss.
    ThroughAlloc,
    /// Write back; dirty lines are written on eviction.
    #[default]
    Back,
}

/// Configuration of a single cache level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false the cache is transparent.
    pub enabled: bool,
    /// Number of sets; must be a power of two.
    pub set_count: u32,
    /// Block size in 32-bit words.
    pub block_size: u32,
    /// Number of ways per set.
    pub associativity: u32,
    /// Victim selection policy.
    pub replacement_policy: ReplacementPolicy,
    /// Write propagation policy.
    pub write_policy: WritePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            set_count: defaults::CACHE_SETS,
            block_size: defaults::CACHE_BLOCK_WORDS,
            associativity: defaults::CACHE_WAYS,
            replacement_policy: ReplacementPolicy::default(),
            write_policy: WritePolicy::default(),
        }
    }
}

/// Hazard resolution strategy of the pipelined core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HazardUnit {
    /// No interlocks; data hazards corrupt results (instructive).
    None,
    /// Stall on every read-after-write hazard.
    Stall,
    /// Forward from memory and writeback; stall only on load-use.
    #[default]
    StallForward,
}

/// Direction predictor algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    /// Every conditional branch predicted not taken.
    #[default]
    AlwaysNotTaken,
    /// Every conditional branch predicted taken.
    AlwaysTaken,
    /// Backward taken, forward not taken.
    Btfnt,
    /// One-bit last-outcome table.
    Smith1Bit,
    /// Two-bit saturating counter table.
    Smith2Bit,
    /// Two-bit counter whose weak states skip to the opposite strong state.
    Smith2BitHysteresis,
}

/// State of one branch-history-table row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorState {
    /// Smith 1-bit: last outcome was not taken.
    #[default]
    NotTaken,
    /// Smith 1-bit: last outcome was taken.
    Taken,
    /// Smith 2-bit: strongly not taken.
    StronglyNotTaken,
    /// Smith 2-bit: weakly not taken.
    WeaklyNotTaken,
    /// Smith 2-bit: weakly taken.
    WeaklyTaken,
    /// Smith 2-bit: strongly taken.
    StronglyTaken,
}

/// Maximum total number of predictor table index bits (BHR + address).
pub const PREDICTOR_MAX_TABLE_BITS: u8 = 16;

/// Branch predictor shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// When false the fetch stage always proposes `pc + 4`.
    pub enabled: bool,
    /// Direction predictor algorithm.
    pub kind: PredictorKind,
    /// Initial state of every branch-history-table row.
    pub initial_state: PredictorState,
    /// Number of branch-target-table address bits.
    pub btb_bits: u8,
    /// Number of branch-history-register bits.
    pub bhr_bits: u8,
    /// Number of instruction-address bits in the table index.
    pub bht_addr_bits: u8,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: PredictorKind::default(),
            initial_state: PredictorState::default(),
            btb_bits: defaults::BP_BTB_BITS,
            bhr_bits: defaults::BP_BHR_BITS,
            bht_addr_bits: defaults::BP_BHT_ADDR_BITS,
        }
    }
}

/// Shape of the software-managed TLBs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlbConfig {
    /// Number of sets; must be a power of two.
    pub set_count: u32,
    /// Number of ways per set.
    pub associativity: u32,
    /// Victim selection policy.
    pub replacement_policy: ReplacementPolicy,
}

impl Default for TlbConfig {
    fn default() -> Self {
        Self {
            set_count: defaults::TLB_SETS,
            associativity: defaults::TLB_WAYS,
            replacement_policy: ReplacementPolicy::Lru,
        }
    }
}

/// Cooperation flags for the OS syscall-emulator collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OsemuConfig {
    /// Whether the emulator is registered for `ECALL` at all.
    pub enable: bool,
    /// Stop the machine after a recognized syscall.
    pub known_syscall_stop: bool,
    /// Stop the machine after an unrecognized syscall.
    pub unknown_syscall_stop: bool,
    /// Stop the machine when an interrupt is delivered.
    pub interrupt_stop: bool,
    /// Stop the machine on any other exception.
    pub exception_stop: bool,
    /// Root directory presented to emulated filesystem syscalls.
    pub fs_root: String,
}

/// Teaching presets mirroring the original simulator's configuration dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigPreset {
    /// Single-cycle core without caches.
    Single,
    /// Single-cycle core with program and data caches.
    SingleCache,
    /// Pipelined core without hazard unit or caches.
    PipeNoHazard,
    /// Fully pipelined core with hazard unit and caches.
    Pipe,
}

/// Root configuration of one simulated machine.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Select the 5-stage pipelined core instead of the single-cycle one.
    pub pipelined: bool,
    /// Hazard policy (ignored when not pipelined).
    pub hazard_unit: HazardUnit,
    /// Trap on executing outside program sections.
    pub memory_execute_protection: bool,
    /// Trap on writing inside program sections.
    pub memory_write_protection: bool,
    /// Main memory read access time in cycles (statistics only).
    pub memory_access_time_read: u32,
    /// Main memory write access time in cycles (statistics only).
    pub memory_access_time_write: u32,
    /// Per-word burst access time in cycles (statistics only).
    pub memory_access_time_burst: u32,
    /// Level-2 cache access time in cycles (statistics only).
    pub memory_access_time_level2: u32,
    /// Enable burst timing in the statistics model.
    pub memory_access_enable_burst: bool,
    /// Program (instruction) cache configuration.
    pub cache_program: CacheConfig,
    /// Data cache configuration.
    pub cache_data: CacheConfig,
    /// Unified level-2 cache configuration.
    pub cache_level2: CacheConfig,
    /// Branch predictor shape.
    pub predictor: PredictorConfig,
    /// TLB shape (shared by the instruction and data TLBs).
    pub tlb: TlbConfig,
    /// OS-emulation cooperation flags.
    pub osemu: OsemuConfig,
    /// Simulated register width.
    pub simulated_xlen: Xlen,
    /// Simulated byte order.
    pub simulated_endian: Endian,
    /// Enabled ISA extensions.
    pub isa_word: IsaWord,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            pipelined: false,
            hazard_unit: HazardUnit::default(),
            memory_execute_protection: false,
            memory_write_protection: false,
            memory_access_time_read: defaults::ACCESS_TIME_READ,
            memory_access_time_write: defaults::ACCESS_TIME_WRITE,
            memory_access_time_burst: defaults::ACCESS_TIME_BURST,
            memory_access_time_level2: defaults::ACCESS_TIME_LEVEL2,
            memory_access_enable_burst: false,
            cache_program: CacheConfig::default(),
            cache_data: CacheConfig::default(),
            cache_level2: CacheConfig::default(),
            predictor: PredictorConfig::default(),
            tlb: TlbConfig::default(),
            osemu: OsemuConfig::default(),
            simulated_xlen: Xlen::default(),
            simulated_endian: Endian::default(),
            isa_word: IsaWord::default(),
        }
    }
}

impl MachineConfig {
    /// Builds a configuration from one of the teaching presets.
    pub fn preset(preset: ConfigPreset) -> Self {
        let mut config = Self::default();
        let teaching_cache = CacheConfig {
            enabled: true,
            set_count: 4,
            block_size: 2,
            associativity: 2,
            replacement_policy: ReplacementPolicy::Lru,
            write_policy: WritePolicy::Back,
        };
        match preset {
            ConfigPreset::Single => {}
            ConfigPreset::SingleCache => {
                config.cache_program = teaching_cache;
                config.cache_data = teaching_cache;
            }
            ConfigPreset::PipeNoHazard => {
                config.pipelined = true;
                config.hazard_unit = HazardUnit::None;
            }
            ConfigPreset::Pipe => {
                config.pipelined = true;
                config.hazard_unit = HazardUnit::StallForward;
                config.cache_program = teaching_cache;
                config.cache_data = teaching_cache;
            }
        }
        config
    }
}
