//! Set-associative cache frontend.
//!
//! A configurable N-way set-associative cache sitting between the core and
//! the next level of the hierarchy:
//! 1. **Geometry:** `set_count` sets of `associativity` lines, each holding
//!    `block_size` 32-bit words. Addresses decompose as
//!    `[tag | set index | block offset | byte offset(2)]`.
//! 2. **Replacement:** RAND, LRU, LFU, or tree-PLRU victim selection.
//! 3. **Write policies:** Write-through (with or without write allocation)
//!    or write-back with dirty-line eviction bursts.
//! 4. **Statistics:** Hit/miss counts, memory traffic, stall-cycle estimates
//!    derived from the configured access times, and the speed-improvement
//!    ratio against an uncached run.
//!
//! Accesses to the MMIO window bypass the cache entirely so device registers
//! never get stale copies.

use crate::common::address::Address;
use crate::common::defs::LocationStatus;
use crate::common::error::SimResult;
use crate::config::{CacheConfig, Endian, ReplacementPolicy, WritePolicy};
use crate::memory::backend::{AccessEffects, AccessOptions, WriteResult};
use crate::memory::frontend::{FrontendMemory, SharedFrontend};

/// Start of the uncached MMIO window; device registers must never be cached.
const UNCACHED_AREA_START: u64 = 0xF000_0000;

/// Cache access statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    /// Number of accesses served from the cache.
    pub hits: u64,
    /// Number of accesses that missed.
    pub misses: u64,
    /// Words read from the lower memory.
    pub memory_reads: u64,
    /// Words written to the lower memory.
    pub memory_writes: u64,
    /// Estimated cycles stalled waiting for the lower memory.
    pub stall_cycles: u64,
    /// Estimated cycles an uncached configuration would have spent.
    pub uncached_cycles: u64,
}

impl CacheStats {
    /// Hit rate in percent.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            100.0 * self.hits as f64 / total as f64
        }
    }

    /// Speed improvement against an uncached run, in percent (100 = equal).
    pub fn speed_improvement(&self) -> f64 {
        let accelerated = self.hits + self.misses + self.stall_cycles;
        if accelerated == 0 {
            100.0
        } else {
            100.0 * self.uncached_cycles as f64 / accelerated as f64
        }
    }
}

/// One cache line.
#[derive(Clone)]
struct CacheLine {
    valid: bool,
    dirty: bool,
    tag: u64,
    /// Raw bytes of `block_size` words.
    data: Vec<u8>,
}

/// Replacement policy bookkeeping, one variant per configurable policy.
///
/// Shared with the TLB, which uses the same policy set over its own sets.
pub(crate) enum PolicyState {
    /// Uniformly random way via a linear feedback shift register.
    Rand { state: u64, ways: usize },
    /// Per-set usage stacks; index 0 is most recently used.
    Lru { usage: Vec<Vec<usize>> },
    /// Per-line access counters; the victim is the minimum.
    Lfu { counts: Vec<Vec<u32>> },
    /// Per-set binary tree of direction bits pointing away from recent use.
    Plru { tree: Vec<u64>, ways: usize },
}

impl PolicyState {
    pub(crate) fn new(policy: ReplacementPolicy, sets: usize, ways: usize) -> Self {
        match policy {
            ReplacementPolicy::Rand => Self::Rand {
                state: 0x2545_F491_4F6C_DD1D,
                ways,
            },
            ReplacementPolicy::Lru => Self::Lru {
                usage: (0..sets).map(|_| (0..ways).collect()).collect(),
            },
            ReplacementPolicy::Lfu => Self::Lfu {
                counts: vec![vec![0; ways]; sets],
            },
            ReplacementPolicy::Plru => Self::Plru {
                tree: vec![0; sets],
                ways,
            },
        }
    }

    /// Records an access to `way` in `set`.
    pub(crate) fn update(&mut self, set: usize, way: usize) {
        match self {
            Self::Rand { .. } => {}
            Self::Lru { usage } => {
                let stack = &mut usage[set];
                if let Some(position) = stack.iter().position(|&entry| entry == way) {
                    stack.remove(position);
                }
                stack.insert(0, way);
            }
            Self::Lfu { counts } => {
                counts[set][way] = counts[set][way].saturating_add(1);
            }
            Self::Plru { tree, ways } => {
                // Walk the tree towards the accessed way, flipping each node
                // to point away from it.
                let mut node = 0usize;
                let mut low = 0usize;
                let mut high = *ways;
                while high - low > 1 {
                    let mid = (low + high) / 2;
                    if way < mid {
                        tree[set] |= 1 << node; // Point right, away from us.
                        node = 2 * node + 1;
                        high = mid;
                    } else {
                        tree[set] &= !(1 << node); // Point left.
                        node = 2 * node + 2;
                        low = mid;
                    }
                }
            }
        }
    }

    /// Chooses the victim way in `set`.
    pub(crate) fn select_way(&mut self, set: usize) -> usize {
        match self {
            Self::Rand { state, ways } => {
                let mut x = *state;
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                *state = x;
                (x as usize) % *ways
            }
            Self::Lru { usage } => *usage[set].last().unwrap_or(&0),
            Self::Lfu { counts } => {
                let set_counts = &counts[set];
                let mut victim = 0usize;
                for (way, count) in set_counts.iter().enumerate() {
                    if *count < set_counts[victim] {
                        victim = way;
                    }
                }
                victim
            }
            Self::Plru { tree, ways } => {
                // Follow the direction bits to the pseudo-LRU leaf.
                let mut node = 0usize;
                let mut low = 0usize;
                let mut high = *ways;
                while high - low > 1 {
                    let mid = (low + high) / 2;
                    if tree[set] & (1 << node) != 0 {
                        node = 2 * node + 1;
                        high = mid;
                    } else {
                        node = 2 * node + 2;
                        low = mid;
                    }
                }
                low
            }
        }
    }

    /// Forgets the bookkeeping of an evicted way.
    pub(crate) fn invalidate(&mut self, set: usize, way: usize) {
        if let Self::Lfu { counts } = self {
            counts[set][way] = 0;
        }
    }
}

/// Stall-time parameters from the machine configuration.
#[derive(Clone, Copy, Debug)]
pub struct CacheTiming {
    /// Lower-memory read access time in cycles.
    pub time_read: u32,
    /// Lower-memory write access time in cycles.
    pub time_write: u32,
    /// Per-word burst continuation time in cycles.
    pub time_burst: u32,
    /// Whether burst timing applies to block transfers.
    pub enable_burst: bool,
}

impl Default for CacheTiming {
    fn default() -> Self {
        Self {
            time_read: 10,
            time_write: 10,
            time_burst: 0,
            enable_burst: false,
        }
    }
}

/// Set-associative cache between two frontend levels.
pub struct Cache {
    config: CacheConfig,
    timing: CacheTiming,
    lower: SharedFrontend,
    sets: Vec<Vec<CacheLine>>,
    policy: PolicyState,
    stats: CacheStats,
    set_bits: u32,
    block_bits: u32,
    change_counter: u32,
}

impl Cache {
    /// Creates a cache of the configured shape above `lower`.
    pub fn new(config: CacheConfig, timing: CacheTiming, lower: SharedFrontend) -> Self {
        let set_count = config.set_count.max(1) as usize;
        let ways = config.associativity.max(1) as usize;
        let block_words = config.block_size.max(1) as usize;
        let line = CacheLine {
            valid: false,
            dirty: false,
            tag: 0,
            data: vec![0; block_words * 4],
        };
        Self {
            policy: PolicyState::new(config.replacement_policy, set_count, ways),
            sets: vec![vec![line; ways]; set_count],
            stats: CacheStats::default(),
            set_bits: set_count.trailing_zeros(),
            block_bits: block_words.trailing_zeros(),
            change_counter: 0,
            config,
            timing,
            lower,
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Resets statistics counters.
    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Invalidates every line without writing anything back.
    pub fn invalidate_all(&mut self) {
        for set in &mut self.sets {
            for line in set {
                line.valid = false;
                line.dirty = false;
            }
        }
    }

    fn block_bytes(&self) -> u64 {
        (self.config.block_size.max(1) as u64) * 4
    }

    fn set_index(&self, address: Address) -> usize {
        ((address.raw() >> (2 + self.block_bits)) & ((1 << self.set_bits) - 1)) as usize
    }

    fn tag(&self, address: Address) -> u64 {
        address.raw() >> (2 + self.block_bits + self.set_bits)
    }

    fn line_base(&self, set: usize, tag: u64) -> Address {
        Address::new((tag << (2 + self.block_bits + self.set_bits)) | ((set as u64) << (2 + self.block_bits)))
    }

    fn bypasses(&self, address: Address) -> bool {
        !self.config.enabled || address.raw() >= UNCACHED_AREA_START
    }

    /// Cycles of one block transfer with or without burst mode.
    fn block_transfer_cycles(&self, first_word_time: u32) -> u64 {
        let words = u64::from(self.config.block_size.max(1));
        if self.timing.enable_burst {
            u64::from(first_word_time) + (words - 1) * u64::from(self.timing.time_burst)
        } else {
            words * u64::from(first_word_time)
        }
    }

    /// Writes one dirty line back to the lower memory.
    fn flush_line(&mut self, set: usize, way: usize) -> SimResult<()> {
        let line = &self.sets[set][way];
        if !line.valid || !line.dirty {
            return Ok(());
        }
        let base = self.line_base(set, line.tag);
        let data = line.data.clone();
        let _ = self
            .lower
            .borrow_mut()
            .write(base, &data, AccessOptions::REGULAR)?;
        self.stats.memory_writes += u64::from(self.config.block_size.max(1));
        self.stats.stall_cycles += self.block_transfer_cycles(self.timing.time_write);
        self.sets[set][way].dirty = false;
        Ok(())
    }

    /// Locates the way holding `address` in its set, if cached.
    fn find_way(&self, set: usize, tag: u64) -> Option<usize> {
        self.sets[set]
            .iter()
            .position(|line| line.valid && line.tag == tag)
    }

    /// Makes the line containing `address` resident and returns its way.
    ///
    /// On a miss the victim is chosen by the replacement policy, flushed when
    /// dirty, and the new line is filled from the lower memory.
    fn ensure_line(&mut self, address: Address, for_write: bool) -> SimResult<usize> {
        let set = self.set_index(address);
        let tag = self.tag(address);

        if let Some(way) = self.find_way(set, tag) {
            self.stats.hits += 1;
            self.policy.update(set, way);
            return Ok(way);
        }

        self.stats.misses += 1;
        let victim = self.policy.select_way(set);
        self.flush_line(set, victim)?;
        self.policy.invalidate(set, victim);

        let base = self.line_base(set, tag);
        let block = self.block_bytes() as usize;
        let mut data = vec![0u8; block];
        let _ = self
            .lower
            .borrow_mut()
            .read(&mut data, base, AccessOptions::REGULAR)?;
        self.stats.memory_reads += u64::from(self.config.block_size.max(1));
        self.stats.stall_cycles += self.block_transfer_cycles(self.timing.time_read);

        let line = &mut self.sets[set][victim];
        line.valid = true;
        line.dirty = false;
        line.tag = tag;
        line.data = data;
        self.policy.update(set, victim);
        let _ = for_write;
        Ok(victim)
    }

    /// Splits `[address, address + len)` into per-line chunks.
    fn for_each_chunk(
        address: Address,
        len: usize,
        block: u64,
        mut action: impl FnMut(Address, usize, usize) -> SimResult<()>,
    ) -> SimResult<()> {
        let mut done = 0usize;
        while done < len {
            let chunk_addr = address + done as u64;
            let in_block = (chunk_addr.raw() % block) as usize;
            let take = ((block as usize) - in_block).min(len - done);
            action(chunk_addr, done, take)?;
            done += take;
        }
        Ok(())
    }
}

impl FrontendMemory for Cache {
    fn write(
        &mut self,
        destination: Address,
        source: &[u8],
        options: AccessOptions,
    ) -> SimResult<WriteResult> {
        if self.bypasses(destination) {
            if self.config.enabled && options.effects == AccessEffects::Regular {
                self.stats.uncached_cycles += u64::from(self.timing.time_write);
                self.stats.stall_cycles += u64::from(self.timing.time_write);
            }
            return self.lower.borrow_mut().write(destination, source, options);
        }

        if options.effects == AccessEffects::Internal {
            // Inspection writes go straight down; update any cached copy so
            // the views stay coherent, but touch no statistics.
            let result = self.lower.borrow_mut().write(destination, source, options)?;
            let block = self.block_bytes();
            Self::for_each_chunk(destination, source.len(), block, |chunk, done, take| {
                let set = self.set_index(chunk);
                let tag = self.tag(chunk);
                if let Some(way) = self.find_way(set, tag) {
                    let offset = (chunk.raw() % block) as usize;
                    self.sets[set][way].data[offset..offset + take]
                        .copy_from_slice(&source[done..done + take]);
                }
                Ok(())
            })?;
            return Ok(result);
        }

        self.stats.uncached_cycles += u64::from(self.timing.time_write);
        let block = self.block_bytes();
        let write_policy = self.config.write_policy;
        let mut changed = false;

        Self::for_each_chunk(destination, source.len(), block, |chunk, done, take| {
            let set = self.set_index(chunk);
            let tag = self.tag(chunk);
            let offset = (chunk.raw() % block) as usize;
            let piece = &source[done..done + take];

            match write_policy {
                WritePolicy::ThroughNoalloc | WritePolicy::ThroughAlloc => {
                    let result =
                        self.lower.borrow_mut().write(chunk, piece, options)?;
                    changed |= result.changed;
                    self.stats.memory_writes += 1;
                    self.stats.stall_cycles += u64::from(self.timing.time_write);

                    let resident = if write_policy == WritePolicy::ThroughAlloc {
                        Some(self.ensure_line(chunk, true)?)
                    } else {
                        let way = self.find_way(set, tag);
                        match way {
                            Some(found) => {
                                self.stats.hits += 1;
                                self.policy.update(set, found);
                            }
                            None => self.stats.misses += 1,
                        }
                        way
                    };
                    if let Some(way) = resident {
                        self.sets[set][way].data[offset..offset + take].copy_from_slice(piece);
                    }
                }
                WritePolicy::Back => {
                    let way = self.ensure_line(chunk, true)?;
                    let line = &mut self.sets[set][way];
                    let target = &mut line.data[offset..offset + take];
                    if target != piece {
                        target.copy_from_slice(piece);
                        changed = true;
                    }
                    line.dirty = true;
                }
            }
            Ok(())
        })?;

        if changed {
            self.change_counter += 1;
        }
        Ok(WriteResult {
            n_bytes: source.len(),
            changed,
        })
    }

    fn read(
        &mut self,
        destination: &mut [u8],
        source: Address,
        options: AccessOptions,
    ) -> SimResult<usize> {
        if self.bypasses(source) {
            if self.config.enabled && options.effects == AccessEffects::Regular {
                self.stats.uncached_cycles += u64::from(self.timing.time_read);
                self.stats.stall_cycles += u64::from(self.timing.time_read);
            }
            return self.lower.borrow_mut().read(destination, source, options);
        }

        if options.effects == AccessEffects::Internal {
            // Inspection reads prefer the cached copy but never disturb the
            // replacement state or statistics.
            let block = self.block_bytes();
            let len = destination.len();
            self.lower.borrow_mut().read(destination, source, options)?;
            Self::for_each_chunk(source, len, block, |chunk, done, take| {
                let set = self.set_index(chunk);
                let tag = self.tag(chunk);
                if let Some(way) = self.find_way(set, tag) {
                    let offset = (chunk.raw() % block) as usize;
                    destination[done..done + take]
                        .copy_from_slice(&self.sets[set][way].data[offset..offset + take]);
                }
                Ok(())
            })?;
            return Ok(len);
        }

        self.stats.uncached_cycles += u64::from(self.timing.time_read);
        let block = self.block_bytes();
        let len = destination.len();

        let mut done_total = 0usize;
        Self::for_each_chunk(source, len, block, |chunk, done, take| {
            let way = self.ensure_line(chunk, false)?;
            let set = self.set_index(chunk);
            let offset = (chunk.raw() % block) as usize;
            destination[done..done + take]
                .copy_from_slice(&self.sets[set][way].data[offset..offset + take]);
            done_total = done + take;
            Ok(())
        })?;
        Ok(done_total)
    }

    fn simulated_endian(&self) -> Endian {
        self.lower.borrow().simulated_endian()
    }

    fn change_counter(&self) -> u32 {
        self.change_counter + self.lower.borrow().change_counter()
    }

    /// Writes every dirty line back to the lower memory.
    fn sync(&mut self) -> SimResult<()> {
        if !self.config.enabled {
            return self.lower.borrow_mut().sync();
        }
        for set in 0..self.sets.len() {
            for way in 0..self.sets[set].len() {
                self.flush_line(set, way)?;
            }
        }
        self.lower.borrow_mut().sync()
    }

    fn location_status(&self, address: Address) -> LocationStatus {
        if self.bypasses(address) {
            return self.lower.borrow().location_status(address);
        }
        let set = self.set_index(address);
        let tag = self.tag(address);
        match self.find_way(set, tag) {
            Some(way) if self.sets[set][way].dirty => {
                LocationStatus::CACHED | LocationStatus::DIRTY
            }
            Some(_) => LocationStatus::CACHED,
            None => self.lower.borrow().location_status(address),
        }
    }
}
