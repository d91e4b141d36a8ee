//! Sv32 TLB and page-table walker tests.

use std::cell::RefCell;
use std::rc::Rc;

use machine::common::{Address, VirtualAddress};
use machine::config::{Endian, TlbConfig, Xlen};
use machine::memory::backend::ram::Memory;
use machine::memory::backend::{AccessOptions, BackendMemory};
use machine::memory::bus::MemoryDataBus;
use machine::memory::frontend::{FrontendMemoryExt, SharedFrontend};
use machine::memory::tlb::{
    FrameAllocator, PHYS_PPN_START, Sv32Pte, Tlb, TlbType, make_phys,
};

/// Root page table PPN used by the tests.
const ROOT_PPN: u32 = 0x100;
/// SATP value: translation on, ASID 1, root at `ROOT_PPN`.
const SATP: u32 = (1 << 31) | (1 << 22) | ROOT_PPN;

fn phys_bus() -> Rc<RefCell<MemoryDataBus>> {
    let mut bus = MemoryDataBus::new(Endian::Little);
    assert!(bus.insert_device_to_range(
        Box::new(Memory::new(Xlen::Rv32)),
        Address::new(0),
        Address::new(0xEFFF_FFFF),
    ));
    Rc::new(RefCell::new(bus))
}

fn tlb_over(bus: &Rc<RefCell<MemoryDataBus>>) -> Tlb {
    Tlb::new(
        TlbType::Data,
        &TlbConfig::default(),
        bus.clone() as SharedFrontend,
        bus.clone() as SharedFrontend,
        Rc::new(RefCell::new(FrameAllocator::new())),
    )
}

fn write_pte(bus: &Rc<RefCell<MemoryDataBus>>, table_ppn: u32, index: u32, pte: Sv32Pte) {
    let address = Address::new((u64::from(table_ppn) << 12) + u64::from(index) * 4);
    let _ = bus
        .borrow_mut()
        .write_u32(address, pte.0, AccessOptions::INTERNAL)
        .expect("PTE write");
}

/// Installs a two-level mapping VA page `vpn` → PPN `ppn` with a level-0
/// table at `table_ppn`.
fn map_page(bus: &Rc<RefCell<MemoryDataBus>>, va: u64, table_ppn: u32, ppn: u32) {
    let vpn1 = ((va >> 22) & 0x3FF) as u32;
    let vpn0 = ((va >> 12) & 0x3FF) as u32;
    write_pte(bus, ROOT_PPN, vpn1, Sv32Pte::new_pointer(table_ppn));
    write_pte(bus, table_ppn, vpn0, Sv32Pte::new_leaf_rwxad(ppn));
}

// ══════════════════════════════════════════════════════════
// 1. PTE semantics
// ══════════════════════════════════════════════════════════

#[test]
fn pte_validity_and_leaf_rules() {
    assert!(!Sv32Pte(0).is_valid(), "V clear");
    assert!(Sv32Pte(0b0000_0001).is_valid(), "pointer entry");
    assert!(!Sv32Pte(0b0000_0101).is_valid(), "write-only is reserved");
    assert!(Sv32Pte(0b0000_0111).is_valid(), "read-write leaf");
    assert!(Sv32Pte(0b0000_0011).is_leaf(), "R set");
    assert!(Sv32Pte(0b0000_1001).is_leaf(), "X set");
    assert!(!Sv32Pte(0b0000_0001).is_leaf(), "pointer");
}

#[test]
fn leaf_builder_sets_full_permissions() {
    let pte = Sv32Pte::new_leaf_rwxad(0x345);
    assert!(pte.is_valid() && pte.is_leaf());
    assert!(pte.r() && pte.w() && pte.x() && pte.a() && pte.d());
    assert_eq!(pte.ppn(), 0x345);
}

#[test]
fn superpage_composition_keeps_vpn0() {
    // A level-1 leaf: VPN0 bits of the VA replace the low PPN bits.
    let pte = Sv32Pte::new_leaf_rwxad(0x400); // 4 MiB aligned PPN
    let va = (3u32 << 22) | (0x155 << 12) | 0x678;
    let pa = make_phys(va, pte, 1);
    assert_eq!(pa.raw(), ((0x400u64 | 0x155) << 12) | 0x678);
    // A level-0 leaf uses the PPN as is.
    let pa = make_phys(va, pte, 0);
    assert_eq!(pa.raw(), (0x400u64 << 12) | 0x678);
}

// ══════════════════════════════════════════════════════════
// 2. Translation
// ══════════════════════════════════════════════════════════

#[test]
fn bare_mode_is_identity() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    assert_eq!(
        tlb.translate_virtual_to_physical(Address::new(0x8000)).unwrap(),
        Address::new(0x8000)
    );
}

#[test]
fn walker_translates_two_levels() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.set_auto_allocate(false);
    map_page(&bus, 0x0040_0000, 0x101, 0x222);
    tlb.on_satp_write(SATP);

    let pa = tlb
        .translate_virtual_to_physical(Address::new(0x0040_0123))
        .expect("translation");
    assert_eq!(pa.raw(), (0x222u64 << 12) | 0x123);
}

#[test]
fn translations_are_cached_until_flush() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.set_auto_allocate(false);
    map_page(&bus, 0x0040_0000, 0x101, 0x222);
    tlb.on_satp_write(SATP);

    let _ = tlb
        .translate_virtual_to_physical(Address::new(0x0040_0000))
        .expect("fill");

    // Destroy the page tables; the cached translation still answers.
    write_pte(&bus, ROOT_PPN, 1, Sv32Pte(0));
    let pa = tlb
        .translate_virtual_to_physical(Address::new(0x0040_0444))
        .expect("cached");
    assert_eq!(pa.raw(), (0x222u64 << 12) | 0x444);

    // After a SATP rewrite every cached translation is gone.
    tlb.on_satp_write(SATP);
    assert!(
        tlb.translate_virtual_to_physical(Address::new(0x0040_0444))
            .is_err()
    );
}

#[test]
fn sfence_flushes_a_single_pair() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.set_auto_allocate(false);
    map_page(&bus, 0x0040_0000, 0x101, 0x222);
    map_page(&bus, 0x0080_0000, 0x102, 0x333);
    tlb.on_satp_write(SATP);

    let _ = tlb.translate_virtual_to_physical(Address::new(0x0040_0000)).expect("fill a");
    let _ = tlb.translate_virtual_to_physical(Address::new(0x0080_0000)).expect("fill b");

    // Invalidate only the first page's mapping (ASID 1).
    write_pte(&bus, ROOT_PPN, 1, Sv32Pte(0));
    tlb.sfence_vma(Some(VirtualAddress::new(0x0040_0000)), Some(1));

    assert!(
        tlb.translate_virtual_to_physical(Address::new(0x0040_0000)).is_err(),
        "flushed translation must re-walk"
    );
    assert_eq!(
        tlb.translate_virtual_to_physical(Address::new(0x0080_0100)).unwrap(),
        Address::new((0x333 << 12) | 0x100),
        "other pages keep their cached translation"
    );
}

#[test]
fn wrong_asid_is_not_flushed() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.set_auto_allocate(false);
    map_page(&bus, 0x0040_0000, 0x101, 0x222);
    tlb.on_satp_write(SATP);
    let _ = tlb.translate_virtual_to_physical(Address::new(0x0040_0000)).expect("fill");

    write_pte(&bus, ROOT_PPN, 1, Sv32Pte(0));
    tlb.sfence_vma(Some(VirtualAddress::new(0x0040_0000)), Some(7));
    assert!(
        tlb.translate_virtual_to_physical(Address::new(0x0040_0000)).is_ok(),
        "an SFENCE for another ASID leaves the entry"
    );
}

#[test]
fn mmio_regions_bypass_translation() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.on_satp_write(SATP); // translation on, nothing mapped
    for addr in [0xFFFF_C004u64, 0xFFE0_0010, 0xFFFD_4000, 0xFFFF_0000] {
        assert_eq!(
            tlb.translate_virtual_to_physical(Address::new(addr)).unwrap(),
            Address::new(addr),
            "MMIO window must be identity mapped"
        );
    }
}

#[test]
fn invalid_mapping_page_faults_without_handler() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.set_auto_allocate(false);
    tlb.on_satp_write(SATP);
    assert!(
        tlb.translate_virtual_to_physical(Address::new(0x0040_0000)).is_err()
    );
}

// ══════════════════════════════════════════════════════════
// 3. Lazy page-fault handling
// ══════════════════════════════════════════════════════════

#[test]
fn page_fault_handler_allocates_tables_and_frame() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.on_satp_write(SATP);

    let pa = tlb
        .translate_virtual_to_physical(Address::new(0x0040_0040))
        .expect("lazy allocation");
    // First allocation: level-0 table at PHYS_PPN_START, data frame next.
    let expected_frame = u64::from(PHYS_PPN_START + 1);
    assert_eq!(pa.raw(), (expected_frame << 12) | 0x40);

    // The installed PTEs are real memory contents: a fresh TLB resolves the
    // same mapping through the walker alone.
    let mut fresh = tlb_over(&bus);
    fresh.set_auto_allocate(false);
    fresh.on_satp_write(SATP);
    assert_eq!(
        fresh
            .translate_virtual_to_physical(Address::new(0x0040_0040))
            .expect("walk of installed mapping")
            .raw(),
        (expected_frame << 12) | 0x40
    );
}

#[test]
fn lazy_frames_are_distinct_per_page() {
    let bus = phys_bus();
    let mut tlb = tlb_over(&bus);
    tlb.on_satp_write(SATP);

    let first = tlb
        .translate_virtual_to_physical(Address::new(0x0040_0000))
        .expect("first page");
    let second = tlb
        .translate_virtual_to_physical(Address::new(0x0040_1000))
        .expect("second page");
    assert_ne!(first.raw() >> 12, second.raw() >> 12);
}
