//! SPI-connected LED panel peripheral.
//!
//! A simple register file whose contents drive an external LED/knob board in
//! the graphical frontend. The simulation core only stores the registers and
//! counts changes; interpretation of the values is left to the frontend.

use crate::common::defs::LocationStatus;
use crate::common::error::SimResult;
use crate::config::Endian;
use crate::memory::backend::{
    AccessOptions, BackendMemory, Offset, WriteResult, read_by_u32, write_by_u32,
};

/// Size of the peripheral register file in bytes.
pub const SPILED_REG_SIZE: usize = 0x100;

/// LED line register offset (green LEDs).
pub const SPILED_REG_LED_LINE_OFFSET: Offset = 0x004;
/// RGB LED 1 register offset.
pub const SPILED_REG_LED_RGB1_OFFSET: Offset = 0x010;
/// RGB LED 2 register offset.
pub const SPILED_REG_LED_RGB2_OFFSET: Offset = 0x014;
/// Knob positions register offset (read-only from the program's view).
pub const SPILED_REG_KNOBS_8BIT_OFFSET: Offset = 0x024;

/// SPI LED panel register file.
pub struct PerifSpiLed {
    simulated_endian: Endian,
    registers: [u32; SPILED_REG_SIZE / 4],
    change_counter: u32,
}

impl PerifSpiLed {
    /// Creates the peripheral with all registers cleared.
    pub fn new(simulated_endian: Endian) -> Self {
        Self {
            simulated_endian,
            registers: [0; SPILED_REG_SIZE / 4],
            change_counter: 0,
        }
    }

    /// Sets the knob register from the environment (board input).
    pub fn set_knobs(&mut self, value: u32) {
        self.write_reg(SPILED_REG_KNOBS_8BIT_OFFSET, value);
    }

    /// Current value of one register (for the frontend).
    pub fn reg(&self, offset: Offset) -> u32 {
        self.read_reg(offset)
    }

    /// Number of observable register changes.
    pub fn change_counter(&self) -> u32 {
        self.change_counter
    }

    fn read_reg(&self, offset: Offset) -> u32 {
        let index = (offset as usize) / 4;
        if index < self.registers.len() {
            self.registers[index]
        } else {
            0
        }
    }

    fn write_reg(&mut self, offset: Offset, value: u32) -> bool {
        let index = (offset as usize) / 4;
        if index >= self.registers.len() {
            return false;
        }
        let changed = self.registers[index] != value;
        if changed {
            self.registers[index] = value;
            self.change_counter += 1;
        }
        changed
    }
}

impl BackendMemory for PerifSpiLed {
    fn as_spiled_mut(&mut self) -> Option<&mut PerifSpiLed> {
        Some(self)
    }

    fn write(
        &mut self,
        offset: Offset,
        source: &[u8],
        _options: AccessOptions,
    ) -> SimResult<WriteResult> {
        let endian = self.simulated_endian;
        Ok(write_by_u32(
            source,
            offset,
            endian,
            self,
            |device, reg| u64::from(device.read_reg(reg)),
            |device, reg, value| device.write_reg(reg, value as u32),
        ))
    }

    fn read(
        &mut self,
        destination: &mut [u8],
        offset: Offset,
        _options: AccessOptions,
    ) -> SimResult<usize> {
        let endian = self.simulated_endian;
        Ok(read_by_u32(destination, offset, endian, |reg| {
            u64::from(self.read_reg(reg))
        }))
    }

    fn location_status(&self, _offset: Offset) -> LocationStatus {
        LocationStatus::NONE
    }
}
