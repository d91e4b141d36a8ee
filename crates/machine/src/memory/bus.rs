//! Memory bus routing addresses to backend devices.
//!
//! The bus is the last level of frontend memory. It holds a sorted,
//! non-overlapping map of address ranges, each owned by a single backend
//! device. An access is routed to the range containing its address,
//! translated to a device-relative offset, and repeated over subsequent
//! ranges when it spans past the end of the first. Accesses outside every
//! range read zeros and drop writes with a warning.

use tracing::warn;

use crate::common::address::Address;
use crate::common::defs::LocationStatus;
use crate::common::error::SimResult;
use crate::config::Endian;
use crate::memory::backend::{
    AccessOptions, BackendMemory, WriteResult,
    aclint::{AclintMswi, AclintMtimer, AclintSswi},
    lcd::LcdDisplay,
    ram::Memory,
    serial::SerialPort,
    spiled::PerifSpiLed,
};
use crate::memory::frontend::FrontendMemory;

/// One address range owned by a backend device.
struct RangeDesc {
    start_addr: Address,
    last_addr: Address,
    device_index: usize,
}

impl RangeDesc {
    fn contains(&self, address: Address) -> bool {
        self.start_addr <= address && address <= self.last_addr
    }

    fn overlaps(&self, start: Address, last: Address) -> bool {
        start <= self.last_addr && self.start_addr <= last
    }
}

/// Memory bus interconnecting the frontend chain with backend devices.
pub struct MemoryDataBus {
    simulated_endian: Endian,
    devices: Vec<Box<dyn BackendMemory>>,
    ranges: Vec<RangeDesc>,
    change_counter: u32,
}

impl MemoryDataBus {
    /// Creates an empty bus for the given simulated endian.
    pub fn new(simulated_endian: Endian) -> Self {
        Self {
            simulated_endian,
            devices: Vec::new(),
            ranges: Vec::new(),
            change_counter: 0,
        }
    }

    /// Connects a device to the bus for `[start_addr, last_addr]`.
    ///
    /// The bus takes ownership of the device. Returns `false` (and drops the
    /// device) when the range overlaps an existing one.
    pub fn insert_device_to_range(
        &mut self,
        device: Box<dyn BackendMemory>,
        start_addr: Address,
        last_addr: Address,
    ) -> bool {
        if self
            .ranges
            .iter()
            .any(|range| range.overlaps(start_addr, last_addr))
        {
            warn!(
                start = format_args!("{start_addr:#x}"),
                last = format_args!("{last_addr:#x}"),
                "bus range already occupied"
            );
            return false;
        }
        self.devices.push(device);
        self.ranges.push(RangeDesc {
            start_addr,
            last_addr,
            device_index: self.devices.len() - 1,
        });
        self.ranges.sort_by_key(|range| range.start_addr);
        true
    }

    /// Maps a second address range onto the device already owning the range
    /// that contains `original`.
    ///
    /// Used for register aliases (the serial port is visible at two bases).
    /// Returns `false` when the alias overlaps an existing range or no range
    /// contains `original`.
    pub fn insert_alias_to_range(
        &mut self,
        alias_start: Address,
        alias_last: Address,
        original: Address,
    ) -> bool {
        if self
            .ranges
            .iter()
            .any(|range| range.overlaps(alias_start, alias_last))
        {
            return false;
        }
        let Some(range_index) = self.find_range(original) else {
            return false;
        };
        let device_index = self.ranges[range_index].device_index;
        self.ranges.push(RangeDesc {
            start_addr: alias_start,
            last_addr: alias_last,
            device_index,
        });
        self.ranges.sort_by_key(|range| range.start_addr);
        true
    }

    fn find_range(&self, address: Address) -> Option<usize> {
        self.ranges.iter().position(|range| range.contains(address))
    }

    /// Runs `action` on the main memory device, if one is connected.
    pub fn with_ram<R>(&mut self, action: impl FnOnce(&mut Memory) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_ram_mut())
            .map(action)
    }

    /// Runs `action` on the serial port device, if one is connected.
    pub fn with_serial<R>(&mut self, action: impl FnOnce(&mut SerialPort) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_serial_mut())
            .map(action)
    }

    /// Runs `action` on the LCD display device, if one is connected.
    pub fn with_lcd<R>(&mut self, action: impl FnOnce(&mut LcdDisplay) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_lcd_mut())
            .map(action)
    }

    /// Runs `action` on the SPI LED panel device, if one is connected.
    pub fn with_spiled<R>(&mut self, action: impl FnOnce(&mut PerifSpiLed) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_spiled_mut())
            .map(action)
    }

    /// Runs `action` on the ACLINT machine timer, if one is connected.
    pub fn with_mtimer<R>(&mut self, action: impl FnOnce(&mut AclintMtimer) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_mtimer_mut())
            .map(action)
    }

    /// Runs `action` on the ACLINT MSWI block, if one is connected.
    pub fn with_mswi<R>(&mut self, action: impl FnOnce(&mut AclintMswi) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_mswi_mut())
            .map(action)
    }

    /// Runs `action` on the ACLINT SSWI block, if one is connected.
    pub fn with_sswi<R>(&mut self, action: impl FnOnce(&mut AclintSswi) -> R) -> Option<R> {
        self.devices
            .iter_mut()
            .find_map(|device| device.as_sswi_mut())
            .map(action)
    }

    /// Writes into the single range containing `destination`.
    fn write_single(
        &mut self,
        destination: Address,
        source: &[u8],
        options: AccessOptions,
    ) -> SimResult<WriteResult> {
        let Some(range_index) = self.find_range(destination) else {
            warn!(
                address = format_args!("{destination:#x}"),
                "write to unmapped address dropped"
            );
            return Ok(WriteResult {
                n_bytes: source.len(),
                changed: false,
            });
        };
        let range = &self.ranges[range_index];
        let offset = destination - range.start_addr;
        let within_range = (range.last_addr - destination + 1).min(source.len() as u64) as usize;
        let device_index = range.device_index;
        let result =
            self.devices[device_index].write(offset, &source[..within_range], options)?;
        if result.changed {
            self.change_counter += 1;
        }
        Ok(result)
    }

    /// Reads from the single range containing `source`.
    fn read_single(
        &mut self,
        destination: &mut [u8],
        source: Address,
        options: AccessOptions,
    ) -> SimResult<usize> {
        let Some(range_index) = self.find_range(source) else {
            warn!(
                address = format_args!("{source:#x}"),
                "read from unmapped address returns zeros"
            );
            destination.fill(0);
            return Ok(destination.len());
        };
        let range = &self.ranges[range_index];
        let offset = source - range.start_addr;
        let within_range = (range.last_addr - source + 1).min(destination.len() as u64) as usize;
        let device_index = range.device_index;
        self.devices[device_index].read(&mut destination[..within_range], offset, options)
    }
}

impl FrontendMemory for MemoryDataBus {
    /// Repeats the single-range write until the whole size is consumed.
    fn write(
        &mut self,
        destination: Address,
        source: &[u8],
        options: AccessOptions,
    ) -> SimResult<WriteResult> {
        let mut done = 0usize;
        let mut changed = false;
        while done < source.len() {
            let result =
                self.write_single(destination + done as u64, &source[done..], options)?;
            changed |= result.changed;
            if result.n_bytes == 0 {
                break;
            }
            done += result.n_bytes;
        }
        Ok(WriteResult {
            n_bytes: done,
            changed,
        })
    }

    /// Repeats the single-range read until the whole size is consumed.
    fn read(
        &mut self,
        destination: &mut [u8],
        source: Address,
        options: AccessOptions,
    ) -> SimResult<usize> {
        let mut done = 0usize;
        while done < destination.len() {
            let taken = self.read_single(&mut destination[done..], source + done as u64, options)?;
            if taken == 0 {
                break;
            }
            done += taken;
        }
        Ok(done)
    }

    fn simulated_endian(&self) -> Endian {
        self.simulated_endian
    }

    fn change_counter(&self) -> u32 {
        self.change_counter
    }

    fn location_status(&self, address: Address) -> LocationStatus {
        match self.find_range(address) {
            Some(range_index) => {
                let range = &self.ranges[range_index];
                self.devices[range.device_index].location_status(address - range.start_addr)
            }
            None => LocationStatus::ILLEGAL,
        }
    }
}
