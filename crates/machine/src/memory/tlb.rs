//! Sv32 address translation: TLB, page-table walker, and page-fault handler.
//!
//! A TLB instance sits between the core and the physical frontend of its
//! access path. Translation proceeds in three tiers:
//! 1. **TLB lookup:** The virtual page number indexes a set-associative table
//!    keyed by `(ASID, VPN)`; hits compose the physical address directly.
//! 2. **Page-table walk:** On a miss the two-level Sv32 walk reads PTEs from
//!    physical memory; leaves at level 1 form 4 MiB super-pages.
//! 3. **Page-fault handling:** When the walk finds no valid leaf and the
//!    lazily allocating handler is installed, missing page tables and data
//!    frames are created with full permissions and the translation is
//!    re-driven.
//!
//! A SATP write flushes the whole TLB; `SFENCE.VMA` flushes a single
//! `(VA, ASID)` pair with wildcard support. The MMIO windows of the serial
//! port, LCD, and ACLINT are identity-mapped unconditionally.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::common::address::{Address, VirtualAddress};
use crate::common::defs::LocationStatus;
use crate::common::error::{SimResult, SimulatorError};
use crate::config::{Endian, TlbConfig};
use crate::memory::backend::{AccessOptions, WriteResult};
use crate::memory::cache::PolicyState;
use crate::memory::frontend::{FrontendMemory, FrontendMemoryExt, SharedFrontend};

/// Bits of the page offset (4 KiB pages).
pub const PAGE_SHIFT: u32 = 12;
/// Bits of one virtual page number level.
pub const VPN_BITS: u32 = 10;
/// Mask of one VPN level.
pub const VPN_LEVEL_MASK: u32 = (1 << VPN_BITS) - 1;
/// Bits of the physical page number in a PTE.
pub const PPN_BITS: u32 = 22;
/// Mask of the PTE physical page number.
pub const PPN_MASK: u32 = (1 << PPN_BITS) - 1;
/// First physical frame handed out by the lazy page allocator.
pub const PHYS_PPN_START: u32 = 0x200;

/// Which access path a TLB serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlbType {
    /// Instruction fetch path.
    Program,
    /// Load/store path.
    Data,
}

/// One Sv32 page table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sv32Pte(pub u32);

impl Sv32Pte {
    /// Valid bit.
    pub const fn v(self) -> bool {
        self.0 & 1 != 0
    }
    /// Read permission.
    pub const fn r(self) -> bool {
        self.0 & (1 << 1) != 0
    }
    /// Write permission.
    pub const fn w(self) -> bool {
        self.0 & (1 << 2) != 0
    }
    /// Execute permission.
    pub const fn x(self) -> bool {
        self.0 & (1 << 3) != 0
    }
    /// User accessible.
    pub const fn u(self) -> bool {
        self.0 & (1 << 4) != 0
    }
    /// Global mapping.
    pub const fn g(self) -> bool {
        self.0 & (1 << 5) != 0
    }
    /// Accessed bit.
    pub const fn a(self) -> bool {
        self.0 & (1 << 6) != 0
    }
    /// Dirty bit.
    pub const fn d(self) -> bool {
        self.0 & (1 << 7) != 0
    }
    /// Reserved-for-software field.
    pub const fn rsw(self) -> u32 {
        (self.0 >> 8) & 0x3
    }
    /// Physical page number.
    pub const fn ppn(self) -> u32 {
        (self.0 >> 10) & PPN_MASK
    }

    /// A PTE is a leaf iff it grants read or execute permission.
    pub const fn is_leaf(self) -> bool {
        self.r() || self.x()
    }

    /// Validity requires V set and forbids write-only entries.
    pub const fn is_valid(self) -> bool {
        self.v() && !(self.w() && !self.r())
    }

    /// Builds a pointer PTE to the next-level table.
    pub const fn new_pointer(ppn: u32) -> Self {
        Self(((ppn & PPN_MASK) << 10) | 1)
    }

    /// Builds a leaf PTE with V, R, W, X, A, and D set.
    pub const fn new_leaf_rwxad(ppn: u32) -> Self {
        Self(((ppn & PPN_MASK) << 10) | 0b1100_1111)
    }
}

/// Composes the physical address for a leaf PTE found at `level`.
///
/// Level-1 leaves form 4 MiB super-pages: the VPN0 bits of the virtual
/// address replace the low PPN bits.
pub fn make_phys(va_raw: u32, pte: Sv32Pte, level: u32) -> Address {
    let offset = va_raw & ((1 << PAGE_SHIFT) - 1);
    let mut phys_ppn = pte.ppn();
    if level == 1 {
        let vpn0 = (va_raw >> PAGE_SHIFT) & VPN_LEVEL_MASK;
        phys_ppn = (phys_ppn & !VPN_LEVEL_MASK) | vpn0;
    }
    Address::new((u64::from(phys_ppn) << PAGE_SHIFT) | u64::from(offset))
}

fn is_mmio_region(virt: u64) -> bool {
    // Serial port + SPI LED window, serial alias, LCD, and the full ACLINT
    // window: all identity-mapped for devices.
    (0xFFFF_C000..=0xFFFF_C1FF).contains(&virt)
        || (0xFFFF_0000..=0xFFFF_003F).contains(&virt)
        || (0xFFE0_0000..=0xFFE4_AFFF).contains(&virt)
        || (0xFFFD_0000..=0xFFFD_FFFF).contains(&virt)
}

/// Allocator of fresh physical frames for the lazy page-fault handler.
pub struct FrameAllocator {
    next_ppn: u32,
}

impl FrameAllocator {
    /// Creates the allocator starting at [`PHYS_PPN_START`].
    pub fn new() -> Self {
        Self {
            next_ppn: PHYS_PPN_START,
        }
    }

    /// Hands out the next unused physical page number.
    pub fn allocate_page(&mut self) -> u32 {
        let ppn = self.next_ppn;
        self.next_ppn += 1;
        ppn
    }

    /// Returns the allocator to its initial state.
    pub fn reset(&mut self) {
        self.next_ppn = PHYS_PPN_START;
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// One TLB entry.
#[derive(Clone, Copy, Default)]
struct TlbEntry {
    valid: bool,
    asid: u16,
    vpn: u64,
    phys: Address,
}

/// Set-associative software-managed TLB.
pub struct Tlb {
    tlb_type: TlbType,
    /// Frontend serving translated accesses (the cache chain).
    lower: SharedFrontend,
    /// Physical path used by the walker and the page-fault handler.
    phys: SharedFrontend,
    allocator: Rc<RefCell<FrameAllocator>>,
    /// When set, walker page faults lazily allocate the missing mapping.
    auto_allocate: bool,
    current_satp: u32,
    num_sets: usize,
    associativity: usize,
    table: Vec<Vec<TlbEntry>>,
    policy: PolicyState,
}

impl Tlb {
    /// Creates a TLB over `lower`, walking page tables through `phys`.
    pub fn new(
        tlb_type: TlbType,
        config: &TlbConfig,
        lower: SharedFrontend,
        phys: SharedFrontend,
        allocator: Rc<RefCell<FrameAllocator>>,
    ) -> Self {
        let num_sets = (config.set_count.max(1) as usize).next_power_of_two();
        let associativity = config.associativity.max(1) as usize;
        debug!(
            ?tlb_type,
            sets = num_sets,
            ways = associativity,
            "TLB constructed"
        );
        Self {
            tlb_type,
            lower,
            phys,
            allocator,
            auto_allocate: true,
            current_satp: 0,
            num_sets,
            associativity,
            table: vec![vec![TlbEntry::default(); associativity]; num_sets],
            policy: PolicyState::new(config.replacement_policy, num_sets, associativity),
        }
    }

    /// Enables or disables the lazily allocating page-fault handler.
    pub fn set_auto_allocate(&mut self, enable: bool) {
        self.auto_allocate = enable;
    }

    /// Number of sets in the table.
    pub fn num_sets(&self) -> usize {
        self.num_sets
    }

    /// Number of ways per set.
    pub fn associativity(&self) -> usize {
        self.associativity
    }

    fn set_index(&self, vpn: u64) -> usize {
        (vpn as usize) & (self.num_sets - 1)
    }

    fn current_asid(&self) -> u16 {
        ((self.current_satp >> 22) & 0x1FF) as u16
    }

    fn translation_enabled(&self) -> bool {
        (self.current_satp >> 31) & 1 != 0
    }

    /// Reacts to a SATP write: records the new value and flushes everything.
    pub fn on_satp_write(&mut self, value: u32) {
        self.current_satp = value;
        self.flush_all();
        debug!(satp = format_args!("{value:#010x}"), "TLB flushed on SATP write");
    }

    /// Invalidates every entry.
    pub fn flush_all(&mut self) {
        for set in &mut self.table {
            for entry in set {
                entry.valid = false;
            }
        }
    }

    /// Invalidates the entry for `(va, asid)`.
    pub fn flush_single(&mut self, va: VirtualAddress, asid: u16) {
        let vpn = va.raw() >> PAGE_SHIFT;
        let set = self.set_index(vpn);
        for entry in &mut self.table[set] {
            if entry.valid && entry.vpn == vpn && entry.asid == asid {
                entry.valid = false;
                debug!(
                    va = format_args!("{:#x}", va.raw()),
                    asid, "TLB entry flushed"
                );
            }
        }
    }

    /// Implements `SFENCE.VMA va, asid`; a `None` operand is a wildcard.
    pub fn sfence_vma(&mut self, va: Option<VirtualAddress>, asid: Option<u16>) {
        match (va, asid) {
            (Some(va), Some(asid)) => self.flush_single(va, asid),
            (Some(va), None) => {
                let vpn = va.raw() >> PAGE_SHIFT;
                let set = self.set_index(vpn);
                for entry in &mut self.table[set] {
                    if entry.valid && entry.vpn == vpn {
                        entry.valid = false;
                    }
                }
            }
            (None, Some(asid)) => {
                for set in &mut self.table {
                    for entry in set {
                        if entry.valid && entry.asid == asid {
                            entry.valid = false;
                        }
                    }
                }
            }
            (None, None) => self.flush_all(),
        }
    }

    /// Two-level Sv32 page walk through physical memory.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::PageFault`] when no valid leaf is reached.
    fn walk(&self, va: VirtualAddress) -> SimResult<Address> {
        if !self.translation_enabled() {
            return Ok(va.to_physical());
        }

        let root_ppn = self.current_satp & PPN_MASK;
        let va_raw = va.raw() as u32;
        let vpn1 = (va_raw >> (PAGE_SHIFT + VPN_BITS)) & VPN_LEVEL_MASK;
        let vpn0 = (va_raw >> PAGE_SHIFT) & VPN_LEVEL_MASK;
        let mut ppn = root_ppn;

        for level in (0..=1u32).rev() {
            let index = if level == 1 { vpn1 } else { vpn0 };
            let pte_addr =
                Address::new((u64::from(ppn) << PAGE_SHIFT) + u64::from(index) * 4);
            let raw_pte = self
                .phys
                .borrow_mut()
                .read_u32(pte_addr, AccessOptions::INTERNAL)?;
            let pte = Sv32Pte(raw_pte);
            debug!(
                level,
                pte_addr = format_args!("{pte_addr:#x}"),
                pte = format_args!("{raw_pte:#010x}"),
                "PTW step"
            );

            if !pte.is_valid() {
                return Err(SimulatorError::PageFault(format!(
                    "invalid PTE at {pte_addr:#x} for VA {va_raw:#x}"
                )));
            }
            if pte.is_leaf() {
                return Ok(make_phys(va_raw, pte, level));
            }
            ppn = pte.ppn();
        }

        Err(SimulatorError::PageFault(format!(
            "no leaf PTE for VA {va_raw:#x}"
        )))
    }

    /// Lazily allocates the missing page-table level and data frame for `va`
    /// and installs PTEs with full permissions.
    fn perform_page_allocation(&mut self, va: VirtualAddress) -> SimResult<()> {
        let root_ppn = self.current_satp & PPN_MASK;
        let va_raw = va.raw() as u32;
        let vpn1 = (va_raw >> (PAGE_SHIFT + VPN_BITS)) & VPN_LEVEL_MASK;
        let vpn0 = (va_raw >> PAGE_SHIFT) & VPN_LEVEL_MASK;

        let mut current_ppn = root_ppn;
        let mut pte_addr = Address::null();

        for level in (0..=1u32).rev() {
            let index = if level == 1 { vpn1 } else { vpn0 };
            pte_addr =
                Address::new((u64::from(current_ppn) << PAGE_SHIFT) + u64::from(index) * 4);
            let raw = self
                .phys
                .borrow_mut()
                .read_u32(pte_addr, AccessOptions::INTERNAL)?;
            let pte = Sv32Pte(raw);

            if !pte.is_valid() {
                if level == 0 {
                    break;
                }
                let new_ppn = self.allocator.borrow_mut().allocate_page();
                let pointer = Sv32Pte::new_pointer(new_ppn);
                let _ = self.phys.borrow_mut().write_u32(
                    pte_addr,
                    pointer.0,
                    AccessOptions::INTERNAL,
                )?;
                debug!(
                    level = level - 1,
                    ppn = format_args!("{new_ppn:#x}"),
                    va = format_args!("{va_raw:#x}"),
                    "page table allocated"
                );
                current_ppn = new_ppn;
                continue;
            }

            if pte.is_leaf() {
                return Err(SimulatorError::Sanity(format!(
                    "unexpected leaf PTE at {pte_addr:#x} during page allocation"
                )));
            }
            current_ppn = pte.ppn();
        }

        let data_ppn = self.allocator.borrow_mut().allocate_page();
        let leaf = Sv32Pte::new_leaf_rwxad(data_ppn);
        let _ = self
            .phys
            .borrow_mut()
            .write_u32(pte_addr, leaf.0, AccessOptions::INTERNAL)?;
        debug!(
            va = format_args!("{va_raw:#x}"),
            ppn = format_args!("{data_ppn:#x}"),
            "page mapped"
        );
        Ok(())
    }

    /// Translates a virtual address to a physical one.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::PageFault`] when the walk fails and lazy
    /// allocation is disabled (or fails itself).
    pub fn translate_virtual_to_physical(&mut self, vaddr: Address) -> SimResult<Address> {
        let virt = vaddr.raw();
        if is_mmio_region(virt) {
            // VA == PA for devices.
            return Ok(vaddr);
        }
        if !self.translation_enabled() {
            return Ok(vaddr);
        }

        let va = VirtualAddress::new(virt);
        let asid = self.current_asid();
        let vpn = virt >> PAGE_SHIFT;
        let offset = virt & ((1 << PAGE_SHIFT) - 1);
        let set = self.set_index(vpn);

        for (way, entry) in self.table[set].iter().enumerate() {
            if entry.valid && entry.vpn == vpn && entry.asid == asid {
                let base = entry.phys.raw() & !((1 << PAGE_SHIFT) - 1);
                self.policy.update(set, way);
                return Ok(Address::new(base + offset));
            }
        }

        let leaf_pa = match self.walk(va) {
            Ok(address) => address,
            Err(SimulatorError::PageFault(reason)) => {
                if !self.auto_allocate {
                    return Err(SimulatorError::PageFault(reason));
                }
                debug!(
                    va = format_args!("{virt:#x}"),
                    "page fault, allocating lazily"
                );
                self.perform_page_allocation(va)?;
                self.flush_single(va, asid);
                // Re-drive the translation over the fresh mapping.
                self.walk(va)?
            }
            Err(other) => return Err(other),
        };

        let new_ppn = leaf_pa.raw() >> PAGE_SHIFT;
        let victim = self.policy.select_way(set);
        self.table[set][victim] = TlbEntry {
            valid: true,
            asid,
            vpn,
            phys: Address::new(new_ppn << PAGE_SHIFT),
        };
        self.policy.update(set, victim);
        debug!(
            tlb = ?self.tlb_type,
            va = format_args!("{virt:#x}"),
            pa = format_args!("{:#x}", new_ppn << PAGE_SHIFT),
            asid,
            "TLB mapped"
        );

        Ok(Address::new((new_ppn << PAGE_SHIFT) + offset))
    }
}

impl FrontendMemory for Tlb {
    fn write(
        &mut self,
        destination: Address,
        source: &[u8],
        options: AccessOptions,
    ) -> SimResult<WriteResult> {
        let physical = self.translate_virtual_to_physical(destination)?;
        self.lower.borrow_mut().write(physical, source, options)
    }

    fn read(
        &mut self,
        destination: &mut [u8],
        source: Address,
        options: AccessOptions,
    ) -> SimResult<usize> {
        let physical = self.translate_virtual_to_physical(source)?;
        self.lower.borrow_mut().read(destination, physical, options)
    }

    fn simulated_endian(&self) -> Endian {
        self.lower.borrow().simulated_endian()
    }

    fn change_counter(&self) -> u32 {
        self.lower.borrow().change_counter()
    }

    fn sync(&mut self) -> SimResult<()> {
        self.lower.borrow_mut().sync()
    }

    fn location_status(&self, address: Address) -> LocationStatus {
        self.lower.borrow().location_status(address)
    }
}
