//! Frontend memory interface.
//!
//! The core reaches memory through a chain of frontends: TLB → cache →
//! (level-2 cache) → bus. Every link implements the same contract:
//! 1. **Raw access:** Byte-slice read/write at an address, with an
//!    access-effect tag.
//! 2. **Typed access:** Width-, sign-, and endian-aware helpers plus the
//!    `read_ctl`/`write_ctl` pair driven by the decoded access control.
//! 3. **Maintenance:** `sync` flushes any buffered state (dirty cache lines)
//!    down to the backing storage.

use std::cell::RefCell;
use std::rc::Rc;

use crate::common::address::Address;
use crate::common::defs::{AccessControl, LocationStatus};
use crate::common::error::{SimResult, SimulatorError};
use crate::common::value::RegisterValue;
use crate::config::Endian;
use crate::memory::backend::{AccessOptions, WriteResult};

/// A frontend shared between both access paths (the L2 cache and the bus).
///
/// The simulator is single-threaded ([`crate::machine::Machine`] drives one
/// step at a time), so non-atomic shared ownership is sufficient.
pub type SharedFrontend = Rc<RefCell<dyn FrontendMemory>>;

/// Uniform interface of every level of the memory hierarchy.
pub trait FrontendMemory {
    /// Writes `source` at `destination`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors such as out-of-extent accesses.
    fn write(
        &mut self,
        destination: Address,
        source: &[u8],
        options: AccessOptions,
    ) -> SimResult<WriteResult>;

    /// Reads into `destination` from `source`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors such as out-of-extent accesses.
    fn read(
        &mut self,
        destination: &mut [u8],
        source: Address,
        options: AccessOptions,
    ) -> SimResult<usize>;

    /// Byte order of the simulated machine.
    fn simulated_endian(&self) -> Endian;

    /// Number of observable changes below this frontend.
    fn change_counter(&self) -> u32;

    /// Flushes buffered state (e.g. dirty cache lines) to the level below.
    ///
    /// # Errors
    ///
    /// Propagates backend errors raised while writing back.
    fn sync(&mut self) -> SimResult<()> {
        Ok(())
    }

    /// Status flags of one location, for inspection frontends.
    fn location_status(&self, _address: Address) -> LocationStatus {
        LocationStatus::NONE
    }
}

macro_rules! typed_access {
    ($read_name:ident, $write_name:ident, $t:ty, $n:literal) => {
        /// Reads one value in the simulated machine byte order.
        fn $read_name(&mut self, address: Address, options: AccessOptions) -> SimResult<$t> {
            let mut bytes = [0u8; $n];
            let _ = self.read(&mut bytes, address, options)?;
            Ok(match self.simulated_endian() {
                Endian::Little => <$t>::from_le_bytes(bytes),
                Endian::Big => <$t>::from_be_bytes(bytes),
            })
        }

        /// Writes one value in the simulated machine byte order.
        fn $write_name(
            &mut self,
            address: Address,
            value: $t,
            options: AccessOptions,
        ) -> SimResult<WriteResult> {
            let bytes = match self.simulated_endian() {
                Endian::Little => value.to_le_bytes(),
                Endian::Big => value.to_be_bytes(),
            };
            self.write(address, &bytes, options)
        }
    };
}

/// Typed access helpers layered over any [`FrontendMemory`].
pub trait FrontendMemoryExt: FrontendMemory {
    typed_access!(read_u8, write_u8, u8, 1);
    typed_access!(read_u16, write_u16, u16, 2);
    typed_access!(read_u32, write_u32, u32, 4);
    typed_access!(read_u64, write_u64, u64, 8);

    /// Reads one value according to the decoded access control, applying the
    /// required sign or zero extension.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::UnknownMemoryControl`] for non-regular
    /// access controls, and propagates backend errors.
    fn read_ctl(
        &mut self,
        ctl: AccessControl,
        address: Address,
        options: AccessOptions,
    ) -> SimResult<RegisterValue> {
        Ok(match ctl {
            AccessControl::I8 => RegisterValue::from(self.read_u8(address, options)? as i8),
            AccessControl::U8 => RegisterValue::from(self.read_u8(address, options)?),
            AccessControl::I16 => RegisterValue::from(self.read_u16(address, options)? as i16),
            AccessControl::U16 => RegisterValue::from(self.read_u16(address, options)?),
            AccessControl::I32 => RegisterValue::from(self.read_u32(address, options)? as i32),
            AccessControl::U32 => RegisterValue::from(self.read_u32(address, options)?),
            AccessControl::I64 | AccessControl::U64 => {
                RegisterValue::from(self.read_u64(address, options)?)
            }
            _ => {
                return Err(SimulatorError::UnknownMemoryControl(format!(
                    "read with access control {ctl:?}"
                )));
            }
        })
    }

    /// Writes one value according to the decoded access control.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::UnknownMemoryControl`] for non-regular
    /// access controls, and propagates backend errors.
    fn write_ctl(
        &mut self,
        ctl: AccessControl,
        address: Address,
        value: RegisterValue,
        options: AccessOptions,
    ) -> SimResult<WriteResult> {
        match ctl {
            AccessControl::I8 | AccessControl::U8 => {
                self.write_u8(address, value.as_u8(), options)
            }
            AccessControl::I16 | AccessControl::U16 => {
                self.write_u16(address, value.as_u16(), options)
            }
            AccessControl::I32 | AccessControl::U32 => {
                self.write_u32(address, value.as_u32(), options)
            }
            AccessControl::I64 | AccessControl::U64 => {
                self.write_u64(address, value.as_u64(), options)
            }
            _ => Err(SimulatorError::UnknownMemoryControl(format!(
                "write with access control {ctl:?}"
            ))),
        }
    }
}

impl<T: FrontendMemory + ?Sized> FrontendMemoryExt for T {}
