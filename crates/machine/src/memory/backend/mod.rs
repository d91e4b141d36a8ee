//! Backend memory devices.
//!
//! Every device behind the bus implements the same byte-addressed contract:
//! 1. **Access:** `write`/`read` with a device-relative offset and an
//!    access-effect tag (`Regular` accesses may mutate device state and raise
//!    interrupts; `Internal` accesses are pure inspection).
//! 2. **Status:** `location_status` for inspection frontends.
//! 3. **Endianness:** Devices carry the simulated machine endian and
//!    serialize their registers accordingly, so the core stays
//!    endian-agnostic.
//!
//! Word-register devices implement `read_reg`/`write_reg` over naturally
//! aligned registers and delegate byte assembly to the `read_by_*`/
//! `write_by_*` helpers.

/// ACLINT MSWI/MTIMER/SSWI interrupt devices.
pub mod aclint;
/// LCD framebuffer device.
pub mod lcd;
/// Sparse-tree main memory.
pub mod ram;
/// Serial port device.
pub mod serial;
/// SPI-connected LED panel peripheral.
pub mod spiled;

use crate::common::defs::LocationStatus;
use crate::common::error::SimResult;
use crate::config::Endian;

/// Byte offset relative to a device's base address.
pub type Offset = u64;

/// Effect class of one memory access.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccessEffects {
    /// Normal program access; may mutate counters and produce interrupts.
    #[default]
    Regular,
    /// Pure inspection (debugger, visualization); no side effects.
    Internal,
}

/// Options carried with every backend access.
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessOptions {
    /// Effect class of the access.
    pub effects: AccessEffects,
}

impl AccessOptions {
    /// Options for an effect-free inspection access.
    pub const INTERNAL: Self = Self {
        effects: AccessEffects::Internal,
    };
    /// Options for a normal program access.
    pub const REGULAR: Self = Self {
        effects: AccessEffects::Regular,
    };
}

/// Outcome of one backend write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteResult {
    /// Number of bytes accepted by the device.
    pub n_bytes: usize,
    /// Whether any stored value actually changed.
    pub changed: bool,
}

/// Uniform byte-addressed contract of all bus-attached devices.
pub trait BackendMemory {
    /// Writes `source` at the device-relative `offset`.
    ///
    /// A device may accept fewer bytes than offered (e.g. when the write
    /// runs past its extent); the bus repeats the operation on the next
    /// range.
    ///
    /// # Errors
    ///
    /// Returns [`crate::common::SimulatorError::OutOfMemoryAccess`] when the
    /// offset itself lies outside the device.
    fn write(
        &mut self,
        offset: Offset,
        source: &[u8],
        options: AccessOptions,
    ) -> SimResult<WriteResult>;

    /// Reads into `destination` from the device-relative `offset`.
    ///
    /// Returns the number of bytes produced.
    ///
    /// # Errors
    ///
    /// Returns [`crate::common::SimulatorError::OutOfMemoryAccess`] when the
    /// offset itself lies outside the device.
    fn read(
        &mut self,
        destination: &mut [u8],
        offset: Offset,
        options: AccessOptions,
    ) -> SimResult<usize>;

    /// Status flags of one location, for inspection frontends.
    fn location_status(&self, _offset: Offset) -> LocationStatus {
        LocationStatus::NONE
    }

    /// Returns the device as main memory if it is one; otherwise `None`.
    fn as_ram_mut(&mut self) -> Option<&mut ram::Memory> {
        None
    }
    /// Returns the device as the serial port if it is one; otherwise `None`.
    fn as_serial_mut(&mut self) -> Option<&mut serial::SerialPort> {
        None
    }
    /// Returns the device as the LCD display if it is one; otherwise `None`.
    fn as_lcd_mut(&mut self) -> Option<&mut lcd::LcdDisplay> {
        None
    }
    /// Returns the device as the SPI LED panel if it is one; otherwise `None`.
    fn as_spiled_mut(&mut self) -> Option<&mut spiled::PerifSpiLed> {
        None
    }
    /// Returns the device as the ACLINT machine timer; otherwise `None`.
    fn as_mtimer_mut(&mut self) -> Option<&mut aclint::AclintMtimer> {
        None
    }
    /// Returns the device as the ACLINT MSWI block; otherwise `None`.
    fn as_mswi_mut(&mut self) -> Option<&mut aclint::AclintMswi> {
        None
    }
    /// Returns the device as the ACLINT SSWI block; otherwise `None`.
    fn as_sswi_mut(&mut self) -> Option<&mut aclint::AclintSswi> {
        None
    }
}

/// Serializes a register word into memory-order bytes.
fn word_bytes<const N: usize>(value: u64, endian: Endian) -> [u8; N] {
    let mut bytes = [0u8; N];
    for (index, byte) in bytes.iter_mut().enumerate() {
        let shift = match endian {
            Endian::Little => 8 * index,
            Endian::Big => 8 * (N - 1 - index),
        };
        *byte = (value >> shift) as u8;
    }
    bytes
}

/// Deserializes memory-order bytes into a register word.
fn word_value<const N: usize>(bytes: &[u8; N], endian: Endian) -> u64 {
    let mut value = 0u64;
    for (index, byte) in bytes.iter().enumerate() {
        let shift = match endian {
            Endian::Little => 8 * index,
            Endian::Big => 8 * (N - 1 - index),
        };
        value |= u64::from(*byte) << shift;
    }
    value
}

macro_rules! impl_word_access {
    ($read_name:ident, $write_name:ident, $width:literal) => {
        /// Implements a byte-granular read over naturally aligned registers.
        ///
        /// The register reader is invoked once per touched register, so
        /// side-effecting registers observe a single access.
        pub fn $read_name(
            destination: &mut [u8],
            offset: Offset,
            endian: Endian,
            mut read_reg: impl FnMut(Offset) -> u64,
        ) -> usize {
            let mut done = 0usize;
            while done < destination.len() {
                let address = offset + done as u64;
                let base = address & !($width as u64 - 1);
                let in_word = (address - base) as usize;
                let take = ($width - in_word).min(destination.len() - done);
                let bytes: [u8; $width] = word_bytes(read_reg(base), endian);
                destination[done..done + take].copy_from_slice(&bytes[in_word..in_word + take]);
                done += take;
            }
            destination.len()
        }

        /// Implements a byte-granular write over naturally aligned registers.
        ///
        /// The device is threaded through explicitly so the register reader
        /// and writer can both borrow it. Partial register writes
        /// read-modify-write through `read_reg`.
        pub fn $write_name<T>(
            source: &[u8],
            offset: Offset,
            endian: Endian,
            device: &mut T,
            mut read_reg: impl FnMut(&mut T, Offset) -> u64,
            mut write_reg: impl FnMut(&mut T, Offset, u64) -> bool,
        ) -> WriteResult {
            let mut done = 0usize;
            let mut changed = false;
            while done < source.len() {
                let address = offset + done as u64;
                let base = address & !($width as u64 - 1);
                let in_word = (address - base) as usize;
                let take = ($width - in_word).min(source.len() - done);
                let mut bytes: [u8; $width] = if take == $width {
                    [0; $width]
                } else {
                    word_bytes(read_reg(device, base), endian)
                };
                bytes[in_word..in_word + take].copy_from_slice(&source[done..done + take]);
                changed |= write_reg(device, base, word_value(&bytes, endian));
                done += take;
            }
            WriteResult {
                n_bytes: source.len(),
                changed,
            }
        }
    };
}

impl_word_access!(read_by_u16, write_by_u16, 2);
impl_word_access!(read_by_u32, write_by_u32, 4);
impl_word_access!(read_by_u64, write_by_u64, 8);
