//! Cache behavior tests: hits and misses, write policies, replacement, and
//! coherence with the lower memory.

use std::cell::RefCell;
use std::rc::Rc;

use machine::common::Address;
use machine::config::{CacheConfig, Endian, ReplacementPolicy, WritePolicy, Xlen};
use machine::memory::backend::ram::Memory;
use machine::memory::backend::{AccessOptions, BackendMemory};
use machine::memory::bus::MemoryDataBus;
use machine::memory::cache::{Cache, CacheTiming};
use machine::memory::frontend::{FrontendMemory, FrontendMemoryExt, SharedFrontend};

fn lower_bus() -> Rc<RefCell<MemoryDataBus>> {
    let mut bus = MemoryDataBus::new(Endian::Little);
    assert!(bus.insert_device_to_range(
        Box::new(Memory::new(Xlen::Rv32)),
        Address::new(0),
        Address::new(0xEFFF_FFFF),
    ));
    Rc::new(RefCell::new(bus))
}

fn cache_config(write_policy: WritePolicy) -> CacheConfig {
    CacheConfig {
        enabled: true,
        set_count: 4,
        block_size: 2,
        associativity: 2,
        replacement_policy: ReplacementPolicy::Lru,
        write_policy,
    }
}

fn cache_over(
    bus: &Rc<RefCell<MemoryDataBus>>,
    write_policy: WritePolicy,
) -> Cache {
    Cache::new(
        cache_config(write_policy),
        CacheTiming::default(),
        bus.clone() as SharedFrontend,
    )
}

fn bus_u32(bus: &Rc<RefCell<MemoryDataBus>>, addr: u64) -> u32 {
    bus.borrow_mut()
        .read_u32(Address::new(addr), AccessOptions::INTERNAL)
        .expect("bus read")
}

// ══════════════════════════════════════════════════════════
// 1. Hit/miss accounting
// ══════════════════════════════════════════════════════════

#[test]
fn first_access_misses_then_hits() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::Back);

    let _ = cache.read_u32(Address::new(0x400), AccessOptions::REGULAR).expect("read");
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 0);

    let _ = cache.read_u32(Address::new(0x400), AccessOptions::REGULAR).expect("read");
    let _ = cache.read_u32(Address::new(0x404), AccessOptions::REGULAR).expect("same line");
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().hits, 2);
    assert!((cache.stats().hit_rate() - 66.6).abs() < 1.0);
}

#[test]
fn disabled_cache_is_transparent() {
    let bus = lower_bus();
    let mut cache = Cache::new(
        CacheConfig::default(),
        CacheTiming::default(),
        bus.clone() as SharedFrontend,
    );
    let _ = cache
        .write_u32(Address::new(0x400), 77, AccessOptions::REGULAR)
        .expect("write");
    assert_eq!(bus_u32(&bus, 0x400), 77);
    assert_eq!(cache.stats().hits + cache.stats().misses, 0);
}

#[test]
fn mmio_window_bypasses_the_cache() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::Back);
    // Nothing above 0xF0000000 may be cached; the bus warns and drops since
    // no device is mapped there, and the cache records no hit or miss.
    let _ = cache
        .write_u32(Address::new(0xFFFF_C010), 1, AccessOptions::REGULAR)
        .expect("write");
    assert_eq!(cache.stats().hits + cache.stats().misses, 0);
}

// ══════════════════════════════════════════════════════════
// 2. Write policies
// ══════════════════════════════════════════════════════════

#[rstest::rstest]
#[case(WritePolicy::ThroughNoalloc)]
#[case(WritePolicy::ThroughAlloc)]
fn write_through_updates_lower_memory_immediately(#[case] policy: WritePolicy) {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, policy);
    let _ = cache
        .write_u32(Address::new(0x480), 0xAABB_CCDD, AccessOptions::REGULAR)
        .expect("write");
    assert_eq!(bus_u32(&bus, 0x480), 0xAABB_CCDD);
}

#[test]
fn write_through_alloc_installs_the_line() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::ThroughAlloc);
    let _ = cache
        .write_u32(Address::new(0x400), 5, AccessOptions::REGULAR)
        .expect("write");
    // The follow-up read hits the allocated line.
    let _ = cache.read_u32(Address::new(0x400), AccessOptions::REGULAR).expect("read");
    assert_eq!(cache.stats().hits, 1);
}

#[test]
fn write_through_noalloc_skips_the_line() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::ThroughNoalloc);
    let _ = cache
        .write_u32(Address::new(0x400), 5, AccessOptions::REGULAR)
        .expect("write");
    // The line was not allocated, so a read misses.
    let _ = cache.read_u32(Address::new(0x400), AccessOptions::REGULAR).expect("read");
    assert_eq!(cache.stats().hits, 0);
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn write_back_defers_until_sync() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::Back);
    let _ = cache
        .write_u32(Address::new(0x400), 0x1234_5678, AccessOptions::REGULAR)
        .expect("write");
    // The lower memory still holds the old value...
    assert_eq!(bus_u32(&bus, 0x400), 0);
    // ...until the dirty line is flushed.
    cache.sync().expect("sync");
    assert_eq!(bus_u32(&bus, 0x400), 0x1234_5678);
}

#[test]
fn write_back_flushes_dirty_victim_on_eviction() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::Back);
    // Set count 4, block 8 bytes: addresses 32 bytes apart share a set.
    // Set 0 holds lines 0x400 and 0x420 (two ways); 0x440 evicts the LRU.
    let _ = cache
        .write_u32(Address::new(0x400), 0xAAAA_0001, AccessOptions::REGULAR)
        .expect("write");
    let _ = cache
        .write_u32(Address::new(0x420), 0xAAAA_0002, AccessOptions::REGULAR)
        .expect("write");
    assert_eq!(bus_u32(&bus, 0x400), 0, "still dirty in the cache");

    let _ = cache
        .write_u32(Address::new(0x440), 0xAAAA_0003, AccessOptions::REGULAR)
        .expect("evicting write");
    // The least recently used line (0x400) was written back.
    assert_eq!(bus_u32(&bus, 0x400), 0xAAAA_0001);
    assert_eq!(bus_u32(&bus, 0x420), 0, "younger line stays dirty");
}

/// After any write through the cache, a bypass read from the lower memory
/// eventually observes the value (synchronously for write-through, after
/// eviction or sync for write-back).
#[test]
fn lower_memory_eventually_coherent() {
    let bus = lower_bus();
    for policy in [
        WritePolicy::ThroughNoalloc,
        WritePolicy::ThroughAlloc,
        WritePolicy::Back,
    ] {
        let mut cache = cache_over(&bus, policy);
        let address = Address::new(0x600);
        let _ = cache
            .write_u32(address, 0xFEED_F00D, AccessOptions::REGULAR)
            .expect("write");
        cache.sync().expect("sync");
        assert_eq!(bus_u32(&bus, 0x600), 0xFEED_F00D, "{policy:?}");
    }
}

#[test]
fn unaligned_reads_cross_lines() {
    let bus = lower_bus();
    {
        let mut bus_ref = bus.borrow_mut();
        let _ = bus_ref
            .write(
                Address::new(0x404),
                &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
                AccessOptions::INTERNAL,
            )
            .expect("seed");
    }
    let mut cache = cache_over(&bus, WritePolicy::Back);
    // 0x406 straddles the two words of one line; 0x40E straddles lines.
    let value = cache.read_u32(Address::new(0x406), AccessOptions::REGULAR).expect("read");
    assert_eq!(value, 0x0605_0403);
}

// ══════════════════════════════════════════════════════════
// 3. Statistics
// ══════════════════════════════════════════════════════════

#[test]
fn memory_traffic_is_counted_in_words() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::Back);
    let _ = cache.read_u32(Address::new(0x400), AccessOptions::REGULAR).expect("read");
    // One miss fills one block of two words.
    assert_eq!(cache.stats().memory_reads, 2);
    assert_eq!(cache.stats().memory_writes, 0);
}

#[test]
fn stall_cycles_follow_configured_times() {
    let bus = lower_bus();
    let timing = CacheTiming {
        time_read: 10,
        time_write: 10,
        time_burst: 2,
        enable_burst: true,
    };
    let mut cache = Cache::new(cache_config(WritePolicy::Back), timing, bus as SharedFrontend);
    let _ = cache.read_u32(Address::new(0x400), AccessOptions::REGULAR).expect("read");
    // Burst fill of a two-word block: 10 + 2 cycles.
    assert_eq!(cache.stats().stall_cycles, 12);
}

#[test]
fn internal_accesses_do_not_disturb_state() {
    let bus = lower_bus();
    let mut cache = cache_over(&bus, WritePolicy::Back);
    let _ = cache.read_u32(Address::new(0x400), AccessOptions::INTERNAL).expect("read");
    assert_eq!(cache.stats().hits + cache.stats().misses, 0);

    // Internal writes keep a cached copy coherent with the lower memory.
    let _ = cache.read_u32(Address::new(0x500), AccessOptions::REGULAR).expect("fill");
    let _ = cache
        .write_u32(Address::new(0x500), 0x5555_0001, AccessOptions::INTERNAL)
        .expect("internal write");
    let value = cache.read_u32(Address::new(0x500), AccessOptions::REGULAR).expect("read");
    assert_eq!(value, 0x5555_0001);
    assert_eq!(bus_u32(&bus, 0x500), 0x5555_0001);
}
