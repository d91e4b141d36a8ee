//! Serial port device.
//!
//! A minimal memory-mapped UART with four 32-bit registers:
//!
//! | Offset | Register | Bits |
//! |---|---|---|
//! | `0x00` | RX status  | 0: data ready, 1: interrupt enable |
//! | `0x04` | RX data    | received byte; reading pops the queue |
//! | `0x08` | TX status  | 0: ready (always set), 1: interrupt enable |
//! | `0x0C` | TX data    | writing transmits one byte |
//!
//! Received bytes are queued by the environment with
//! [`SerialPort::rx_queue_push`] between cycles; transmitted bytes accumulate
//! in an output buffer drained by the frontend. Interrupt request lines are
//! level signals recomputed after every register change.

use std::collections::VecDeque;

use crate::common::defs::LocationStatus;
use crate::common::error::SimResult;
use crate::config::Endian;
use crate::memory::backend::{
    AccessEffects, AccessOptions, BackendMemory, Offset, WriteResult, read_by_u32, write_by_u32,
};

/// RX status register offset.
pub const SERP_RX_ST_REG_OFFSET: Offset = 0x00;
/// RX data register offset.
pub const SERP_RX_DATA_REG_OFFSET: Offset = 0x04;
/// TX status register offset.
pub const SERP_TX_ST_REG_OFFSET: Offset = 0x08;
/// TX data register offset.
pub const SERP_TX_DATA_REG_OFFSET: Offset = 0x0C;

/// Status register bit 0: data ready / transmitter ready.
pub const SERP_ST_READY: u32 = 1 << 0;
/// Status register bit 1: interrupt enable.
pub const SERP_ST_IRQ_ENABLE: u32 = 1 << 1;

/// Interrupt line asserted when the receiver holds data.
pub const SERIAL_RX_IRQ_LEVEL: u32 = 16;
/// Interrupt line asserted when the transmitter is ready.
pub const SERIAL_TX_IRQ_LEVEL: u32 = 17;

/// Memory-mapped serial port.
pub struct SerialPort {
    simulated_endian: Endian,
    rx_st_reg: u32,
    tx_st_reg: u32,
    rx_data_reg: u32,
    rx_queue: VecDeque<u8>,
    tx_output: Vec<u8>,
    change_counter: u32,
    rx_irq_active: bool,
    tx_irq_active: bool,
}

impl SerialPort {
    /// Creates a serial port for the given simulated endian.
    pub fn new(simulated_endian: Endian) -> Self {
        Self {
            simulated_endian,
            rx_st_reg: 0,
            tx_st_reg: 0,
            rx_data_reg: 0,
            rx_queue: VecDeque::new(),
            tx_output: Vec::new(),
            change_counter: 0,
            rx_irq_active: false,
            tx_irq_active: false,
        }
    }

    /// Queues one received byte from the environment.
    pub fn rx_queue_push(&mut self, byte: u8) {
        self.rx_queue.push_back(byte);
        self.rx_queue_check();
    }

    /// Takes the transmitted bytes accumulated so far.
    pub fn take_tx_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx_output)
    }

    /// Whether the receiver interrupt line is asserted.
    pub fn rx_irq_active(&self) -> bool {
        self.rx_irq_active
    }

    /// Whether the transmitter interrupt line is asserted.
    pub fn tx_irq_active(&self) -> bool {
        self.tx_irq_active
    }

    /// Number of observable register changes (for change notifications).
    pub fn change_counter(&self) -> u32 {
        self.change_counter
    }

    /// Moves a queued byte into the data register when it is free.
    fn rx_queue_check(&mut self) {
        if self.rx_st_reg & SERP_ST_READY == 0 {
            if let Some(byte) = self.rx_queue.pop_front() {
                self.rx_data_reg = u32::from(byte);
                self.rx_st_reg |= SERP_ST_READY;
                self.change_counter += 1;
            }
        }
        self.update_irq();
    }

    fn update_irq(&mut self) {
        self.rx_irq_active = self.rx_st_reg & SERP_ST_READY != 0
            && self.rx_st_reg & SERP_ST_IRQ_ENABLE != 0;
        // The transmitter accepts a byte every cycle, so its interrupt
        // follows the enable bit directly.
        self.tx_irq_active = self.tx_st_reg & SERP_ST_IRQ_ENABLE != 0;
    }

    fn read_reg(&mut self, offset: Offset, effects: AccessEffects) -> u32 {
        match offset {
            SERP_RX_ST_REG_OFFSET => self.rx_st_reg,
            SERP_RX_DATA_REG_OFFSET => {
                let value = self.rx_data_reg;
                if effects == AccessEffects::Regular {
                    self.rx_st_reg &= !SERP_ST_READY;
                    self.change_counter += 1;
                    self.rx_queue_check();
                }
                value
            }
            SERP_TX_ST_REG_OFFSET => self.tx_st_reg | SERP_ST_READY,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: Offset, value: u32) -> bool {
        let changed = match offset {
            SERP_RX_ST_REG_OFFSET => {
                let old = self.rx_st_reg;
                self.rx_st_reg =
                    (self.rx_st_reg & !SERP_ST_IRQ_ENABLE) | (value & SERP_ST_IRQ_ENABLE);
                old != self.rx_st_reg
            }
            SERP_TX_ST_REG_OFFSET => {
                let old = self.tx_st_reg;
                self.tx_st_reg = value & SERP_ST_IRQ_ENABLE;
                old != self.tx_st_reg
            }
            SERP_TX_DATA_REG_OFFSET => {
                self.tx_output.push(value as u8);
                self.change_counter += 1;
                true
            }
            _ => false,
        };
        self.update_irq();
        changed
    }
}

impl BackendMemory for SerialPort {
    fn as_serial_mut(&mut self) -> Option<&mut SerialPort> {
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
            |port, reg| u64::from(port.read_reg(reg, AccessEffects::Internal)),
            |port, reg, value| port.write_reg(reg, value as u32),
        ))
    }

    fn read(
        &mut self,
        destination: &mut [u8],
        offset: Offset,
        options: AccessOptions,
    ) -> SimResult<usize> {
        let endian = self.simulated_endian;
        Ok(read_by_u32(destination, offset, endian, |reg| {
            u64::from(self.read_reg(reg, options.effects))
        }))
    }

    fn location_status(&self, _offset: Offset) -> LocationStatus {
        LocationStatus::NONE
    }
}
