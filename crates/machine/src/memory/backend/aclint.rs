//! ACLINT interrupt devices: MSWI, MTIMER, and SSWI.
//!
//! The Advanced Core Local Interruptor splits the classic CLINT into three
//! independently mapped blocks:
//!
//! | Block | Offset in the ACLINT window | Registers |
//! |---|---|---|
//! | MSWI | `0x0000..0x4000` | one 32-bit `msip` word per hart |
//! | MTIMER | `0x4000..0xC000` | `mtimecmp` array, `mtime` at `0x7FF8` |
//! | SSWI | `0xC000..0x10000` | one 32-bit `ssip` word per hart |
//!
//! Interrupt numbering follows the privileged specification: `mip.MTIP` is
//! bit 7, `mip.MSIP` bit 3, and `mip.SSIP` bit 1.
//!
//! `mtime` is derived from the machine cycle counter (advanced by the machine
//! each step) plus a user offset maintained across guest writes, keeping the
//! simulation deterministic.

use crate::common::defs::LocationStatus;
use crate::common::error::SimResult;
use crate::config::Endian;
use crate::memory::backend::{
    AccessOptions, BackendMemory, Offset, WriteResult, read_by_u32, read_by_u64, write_by_u32,
    write_by_u64,
};

/// MSWI block offset within the ACLINT window.
pub const CLINT_MSWI_OFFSET: Offset = 0x0000;
/// MSWI block size.
pub const CLINT_MSWI_SIZE: u64 = 0x4000;
/// MTIMER block offset within the ACLINT window.
pub const CLINT_MTIMER_OFFSET: Offset = 0x4000;
/// MTIMER block size.
pub const CLINT_MTIMER_SIZE: u64 = 0x8000;
/// SSWI block offset within the ACLINT window.
pub const CLINT_SSWI_OFFSET: Offset = 0xC000;
/// SSWI block size.
pub const CLINT_SSWI_SIZE: u64 = 0x4000;

/// `mtime` register offset within the MTIMER block.
pub const ACLINT_MTIME_OFFSET: Offset = 0x7FF8;
/// `mtimecmp` array offset within the MTIMER block.
pub const ACLINT_MTIMECMP_OFFSET: Offset = 0x0000;

/// Machine timer interrupt number (`mip.MTIP`).
pub const MTIMER_IRQ_LEVEL: u32 = 7;
/// Machine software interrupt number (`mip.MSIP`).
pub const MSWI_IRQ_LEVEL: u32 = 3;
/// Supervisor software interrupt number (`mip.SSIP`).
pub const SSWI_IRQ_LEVEL: u32 = 1;

// ── MTIMER ───────────────────────────────────────────────────────────

/// ACLINT machine timer block.
pub struct AclintMtimer {
    simulated_endian: Endian,
    mtimecmp_value: u64,
    /// Ticks accumulated from the machine cycle counter.
    mtime_count: u64,
    /// Guest-visible adjustment applied on writes to `mtime`.
    mtime_user_offset: u64,
    mtimer_irq_active: bool,
}

impl AclintMtimer {
    /// Creates the timer with `mtimecmp` parked at the maximum value.
    pub fn new(simulated_endian: Endian) -> Self {
        Self {
            simulated_endian,
            mtimecmp_value: u64::MAX,
            mtime_count: 0,
            mtime_user_offset: 0,
            mtimer_irq_active: false,
        }
    }

    /// Current `mtime` value.
    pub fn mtime(&self) -> u64 {
        self.mtime_count.wrapping_add(self.mtime_user_offset)
    }

    /// Advances the timer by elapsed machine cycles and recomputes the
    /// interrupt line. The pending timer event fires at the next compare
    /// crossing.
    pub fn tick(&mut self, cycles: u64) {
        self.mtime_count = self.mtime_count.wrapping_add(cycles);
        self.update_mtimer_irq();
    }

    /// Whether the timer interrupt line is asserted.
    pub fn mtimer_irq_active(&self) -> bool {
        self.mtimer_irq_active
    }

    fn update_mtimer_irq(&mut self) {
        self.mtimer_irq_active = self.mtime() >= self.mtimecmp_value;
    }

    fn read_reg64(&self, offset: Offset) -> u64 {
        match offset {
            ACLINT_MTIME_OFFSET => self.mtime(),
            ACLINT_MTIMECMP_OFFSET => self.mtimecmp_value,
            _ => 0,
        }
    }

    fn write_reg64(&mut self, offset: Offset, value: u64) -> bool {
        let changed = match offset {
            ACLINT_MTIME_OFFSET => {
                let old = self.mtime_user_offset;
                self.mtime_user_offset = value.wrapping_sub(self.mtime_count);
                old != self.mtime_user_offset
            }
            ACLINT_MTIMECMP_OFFSET => {
                let old = self.mtimecmp_value;
                self.mtimecmp_value = value;
                old != value
            }
            _ => return false,
        };
        self.update_mtimer_irq();
        changed
    }
}

impl BackendMemory for AclintMtimer {
    fn as_mtimer_mut(&mut self) -> Option<&mut AclintMtimer> {
        Some(self)
    }

    fn write(
        &mut self,
        offset: Offset,
        source: &[u8],
        _options: AccessOptions,
    ) -> SimResult<WriteResult> {
        let endian = self.simulated_endian;
        Ok(write_by_u64(
            source,
            offset,
            endian,
            self,
            |timer, reg| timer.read_reg64(reg),
            |timer, reg, value| timer.write_reg64(reg, value),
        ))
    }

    fn read(
        &mut self,
        destination: &mut [u8],
        offset: Offset,
        _options: AccessOptions,
    ) -> SimResult<usize> {
        let endian = self.simulated_endian;
        Ok(read_by_u64(destination, offset, endian, |reg| {
            self.read_reg64(reg)
        }))
    }

    fn location_status(&self, _offset: Offset) -> LocationStatus {
        LocationStatus::NONE
    }
}

// ── Software interrupt blocks ────────────────────────────────────────

/// One software-interrupt word block (shared shape of MSWI and SSWI).
struct SwiBlock {
    simulated_endian: Endian,
    sip_value: u32,
}

impl SwiBlock {
    fn read_reg(&self, offset: Offset) -> u32 {
        if offset == 0 { self.sip_value } else { 0 }
    }

    fn write_reg(&mut self, offset: Offset, value: u32) -> bool {
        if offset != 0 {
            return false;
        }
        let new_value = value & 1;
        let changed = self.sip_value != new_value;
        self.sip_value = new_value;
        changed
    }
}

macro_rules! swi_device {
    ($name:ident, $as_fn:ident, $doc:literal) => {
        #[doc = $doc]
        pub struct $name {
            block: SwiBlock,
        }

        impl $name {
            /// Creates the block with the interrupt deasserted.
            pub fn new(simulated_endian: Endian) -> Self {
                Self {
                    block: SwiBlock {
                        simulated_endian,
                        sip_value: 0,
                    },
                }
            }

            /// Whether the software interrupt line is asserted.
            pub fn irq_active(&self) -> bool {
                self.block.sip_value & 1 != 0
            }
        }

        impl BackendMemory for $name {
            fn $as_fn(&mut self) -> Option<&mut $name> {
                Some(self)
            }

            fn write(
                &mut self,
                offset: Offset,
                source: &[u8],
                _options: AccessOptions,
            ) -> SimResult<WriteResult> {
                let endian = self.block.simulated_endian;
                Ok(write_by_u32(
                    source,
                    offset,
                    endian,
                    &mut self.block,
                    |block, reg| u64::from(block.read_reg(reg)),
                    |block, reg, value| block.write_reg(reg, value as u32),
                ))
            }

            fn read(
                &mut self,
                destination: &mut [u8],
                offset: Offset,
                _options: AccessOptions,
            ) -> SimResult<usize> {
                let endian = self.block.simulated_endian;
                Ok(read_by_u32(destination, offset, endian, |reg| {
                    u64::from(self.block.read_reg(reg))
                }))
            }

            fn location_status(&self, _offset: Offset) -> LocationStatus {
                LocationStatus::NONE
            }
        }
    };
}

swi_device!(
    AclintMswi,
    as_mswi_mut,
    "ACLINT machine software interrupt block (`mip.MSIP`)."
);
swi_device!(
    AclintSswi,
    as_sswi_mut,
    "ACLINT supervisor software interrupt block (`mip.SSIP`)."
);
