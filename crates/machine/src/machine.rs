//! Top-level machine: components, step loop, and lifecycle.
//!
//! The machine owns the whole simulated system: the memory bus with its
//! devices, the two frontend chains (TLB → L1 cache → optional L2 → bus),
//! the branch predictor, and the chosen core variant. It drives the step
//! loop, forwards external interrupt lines into `mip` between cycles,
//! and supports pause/play/restart with a program-only memory snapshot.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::info;

use crate::common::address::Address;
use crate::common::defs::ExceptionCause;
use crate::common::error::{SimResult, SimulatorError};
use crate::config::MachineConfig;
use crate::core::core_impl::{Core, ExceptionHandler, StepOutcome};
use crate::core::csr::id as csr_id;
use crate::core::predictor::BranchPredictor;
use crate::events::EventSink;
use crate::loader::{ProgramImage, SymbolTable};
use crate::memory::backend::aclint::{
    CLINT_MSWI_SIZE, CLINT_MTIMER_OFFSET, CLINT_MTIMER_SIZE, CLINT_SSWI_OFFSET, CLINT_SSWI_SIZE,
    MSWI_IRQ_LEVEL, MTIMER_IRQ_LEVEL, SSWI_IRQ_LEVEL, AclintMswi, AclintMtimer, AclintSswi,
};
use crate::memory::backend::lcd::LcdDisplay;
use crate::memory::backend::ram::Memory;
use crate::memory::backend::serial::{SERIAL_RX_IRQ_LEVEL, SERIAL_TX_IRQ_LEVEL, SerialPort};
use crate::memory::backend::spiled::PerifSpiLed;
use crate::memory::backend::{AccessOptions, BackendMemory};
use crate::memory::bus::MemoryDataBus;
use crate::memory::cache::{Cache, CacheStats, CacheTiming};
use crate::memory::frontend::{FrontendMemory, SharedFrontend};
use crate::memory::tlb::{FrameAllocator, Tlb, TlbType};

/// Base of main RAM.
pub const RAM_FIRST: Address = Address(0x0000_0000);
/// Last byte of main RAM.
pub const RAM_LAST: Address = Address(0xEFFF_FFFF);
/// Serial port base.
pub const SERIAL_FIRST: Address = Address(0xFFFF_C000);
/// Serial port last byte.
pub const SERIAL_LAST: Address = Address(0xFFFF_C03F);
/// Serial port alias base.
pub const SERIAL_ALIAS_FIRST: Address = Address(0xFFFF_0000);
/// Serial port alias last byte.
pub const SERIAL_ALIAS_LAST: Address = Address(0xFFFF_003F);
/// SPI LED panel base.
pub const SPILED_FIRST: Address = Address(0xFFFF_C100);
/// SPI LED panel last byte.
pub const SPILED_LAST: Address = Address(0xFFFF_C1FF);
/// LCD framebuffer base.
pub const LCD_FIRST: Address = Address(0xFFE0_0000);
/// LCD framebuffer last byte.
pub const LCD_LAST: Address = Address(0xFFE4_AFFF);
/// ACLINT window base.
pub const ACLINT_BASE: Address = Address(0xFFFD_0000);

/// Default program entry used before an image is loaded.
pub const DEFAULT_ENTRY: Address = Address(0x200);

/// Lifecycle state of the machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineStatus {
    /// Memory and core are initialized; nothing has run yet.
    Ready,
    /// The play loop is advancing steps.
    Running,
    /// A step is currently in flight.
    Busy,
    /// The program exited.
    Exited,
    /// The program or the simulator trapped; the machine is halted.
    Trapped,
}

/// The complete simulated machine.
pub struct Machine {
    config: MachineConfig,
    core: Core,
    bus: Rc<RefCell<MemoryDataBus>>,
    program_cache: Rc<RefCell<Cache>>,
    data_cache: Rc<RefCell<Cache>>,
    level2_cache: Option<Rc<RefCell<Cache>>>,
    allocator: Rc<RefCell<FrameAllocator>>,
    status: MachineStatus,
    events: Option<Rc<RefCell<dyn EventSink>>>,
    entry_pc: Address,
    program_end: Address,
    program_snapshot: Option<Memory>,
    symbol_table: SymbolTable,
    paused: bool,
}

impl Machine {
    /// Builds a machine from configuration with the default memory map.
    ///
    /// # Errors
    ///
    /// Returns configuration sanity errors (e.g. an oversized predictor).
    pub fn new(config: MachineConfig) -> SimResult<Self> {
        let endian = config.simulated_endian;
        let xlen = config.simulated_xlen;

        let bus = Rc::new(RefCell::new(MemoryDataBus::new(endian)));
        {
            let mut bus_ref = bus.borrow_mut();
            let _ = bus_ref.insert_device_to_range(
                Box::new(Memory::new(xlen)) as Box<dyn BackendMemory>,
                RAM_FIRST,
                RAM_LAST,
            );
            let _ = bus_ref.insert_device_to_range(
                Box::new(SerialPort::new(endian)),
                SERIAL_FIRST,
                SERIAL_LAST,
            );
            let _ =
                bus_ref.insert_alias_to_range(SERIAL_ALIAS_FIRST, SERIAL_ALIAS_LAST, SERIAL_FIRST);
            let _ = bus_ref.insert_device_to_range(
                Box::new(PerifSpiLed::new(endian)),
                SPILED_FIRST,
                SPILED_LAST,
            );
            let _ = bus_ref.insert_device_to_range(
                Box::new(LcdDisplay::new(endian)),
                LCD_FIRST,
                LCD_LAST,
            );
            let _ = bus_ref.insert_device_to_range(
                Box::new(AclintMswi::new(endian)),
                ACLINT_BASE,
                ACLINT_BASE + (CLINT_MSWI_SIZE - 1),
            );
            let _ = bus_ref.insert_device_to_range(
                Box::new(AclintMtimer::new(endian)),
                ACLINT_BASE + CLINT_MTIMER_OFFSET,
                ACLINT_BASE + (CLINT_MTIMER_OFFSET + CLINT_MTIMER_SIZE - 1),
            );
            let _ = bus_ref.insert_device_to_range(
                Box::new(AclintSswi::new(endian)),
                ACLINT_BASE + CLINT_SSWI_OFFSET,
                ACLINT_BASE + (CLINT_SSWI_OFFSET + CLINT_SSWI_SIZE - 1),
            );
        }

        // Frontend chains: TLB → L1 → (L2) → bus, with the L2 and the bus
        // shared between the program and data paths.
        let level2_timing = CacheTiming {
            time_read: config.memory_access_time_read,
            time_write: config.memory_access_time_write,
            time_burst: config.memory_access_time_burst,
            enable_burst: config.memory_access_enable_burst,
        };
        let level2_cache = if config.cache_level2.enabled {
            Some(Rc::new(RefCell::new(Cache::new(
                config.cache_level2,
                level2_timing,
                bus.clone() as SharedFrontend,
            ))))
        } else {
            None
        };
        let level1_lower: SharedFrontend = match &level2_cache {
            Some(cache) => cache.clone(),
            None => bus.clone(),
        };
        let level1_timing = if config.cache_level2.enabled {
            CacheTiming {
                time_read: config.memory_access_time_level2,
                time_write: config.memory_access_time_level2,
                time_burst: config.memory_access_time_burst,
                enable_burst: config.memory_access_enable_burst,
            }
        } else {
            level2_timing
        };

        let program_cache = Rc::new(RefCell::new(Cache::new(
            config.cache_program,
            level1_timing,
            level1_lower.clone(),
        )));
        let data_cache = Rc::new(RefCell::new(Cache::new(
            config.cache_data,
            level1_timing,
            level1_lower,
        )));

        let allocator = Rc::new(RefCell::new(FrameAllocator::new()));
        let mem_program = Tlb::new(
            TlbType::Program,
            &config.tlb,
            program_cache.clone(),
            bus.clone(),
            allocator.clone(),
        );
        let mem_data = Tlb::new(
            TlbType::Data,
            &config.tlb,
            data_cache.clone(),
            bus.clone(),
            allocator.clone(),
        );

        let predictor = BranchPredictor::new(&config.predictor)?;
        let mut core = Core::new(&config, DEFAULT_ENTRY, predictor, mem_program, mem_data);
        if config.osemu.enable {
            // The syscall-emulator collaborator handles ECALL; do not stop.
            core.set_stop_on_exception(ExceptionCause::EcallAny, false);
        }

        Ok(Self {
            config,
            core,
            bus,
            program_cache,
            data_cache,
            level2_cache,
            allocator,
            status: MachineStatus::Ready,
            events: None,
            entry_pc: DEFAULT_ENTRY,
            program_end: DEFAULT_ENTRY,
            program_snapshot: None,
            symbol_table: SymbolTable::new(),
            paused: false,
        })
    }

    /// Attaches an event sink for the graphical collaborator.
    pub fn set_event_sink(&mut self, sink: Rc<RefCell<dyn EventSink>>) {
        self.core.set_event_sink(sink.clone());
        self.events = Some(sink);
    }

    fn emit(&self, action: impl FnOnce(&mut dyn EventSink)) {
        if let Some(sink) = &self.events {
            action(&mut *sink.borrow_mut());
        }
    }

    fn set_status(&mut self, status: MachineStatus) {
        if self.status != status {
            self.status = status;
            self.emit(|sink| sink.status_changed(status));
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// Machine configuration.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// The core (registers, CSRs, predictor, pipeline).
    pub fn core(&self) -> &Core {
        &self.core
    }

    /// Mutable access to the core.
    pub fn core_mut(&mut self) -> &mut Core {
        &mut self.core
    }

    /// Symbol table of the loaded program.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbol_table
    }

    /// One past the highest loaded program address.
    pub fn program_end(&self) -> Address {
        self.program_end
    }

    /// Program-side cache statistics.
    pub fn cache_program_stats(&self) -> CacheStats {
        self.program_cache.borrow().stats()
    }

    /// Data-side cache statistics.
    pub fn cache_data_stats(&self) -> CacheStats {
        self.data_cache.borrow().stats()
    }

    /// Level-2 cache statistics, when the L2 is configured.
    pub fn cache_level2_stats(&self) -> Option<CacheStats> {
        self.level2_cache.as_ref().map(|cache| cache.borrow().stats())
    }

    /// Runs an action against the memory bus (device access, inspection).
    pub fn with_bus<R>(&mut self, action: impl FnOnce(&mut MemoryDataBus) -> R) -> R {
        action(&mut self.bus.borrow_mut())
    }

    /// Queues a byte for the serial port receiver.
    pub fn serial_rx_push(&mut self, byte: u8) {
        let _ = self.bus.borrow_mut().with_serial(|serial| {
            serial.rx_queue_push(byte);
        });
    }

    /// Drains the serial port transmitter output.
    pub fn serial_tx_take(&mut self) -> Vec<u8> {
        self.bus
            .borrow_mut()
            .with_serial(SerialPort::take_tx_output)
            .unwrap_or_default()
    }

    /// Forwards one external interrupt line into `mip`.
    pub fn set_interrupt_signal(&mut self, irq_num: u32, active: bool) {
        self.core
            .control_state_mut()
            .set_interrupt_signal(irq_num, active);
    }

    /// Places a program image into physical memory and prepares the core.
    ///
    /// A snapshot of the program-only memory is kept for [`Machine::restart`].
    ///
    /// # Errors
    ///
    /// Propagates memory errors raised while writing the image.
    pub fn load_program(&mut self, image: &ProgramImage) -> SimResult<()> {
        {
            let mut bus = self.bus.borrow_mut();
            for segment in &image.segments {
                let _ = bus.write(segment.address, &segment.data, AccessOptions::INTERNAL)?;
            }
        }
        self.entry_pc = image.entry;
        self.program_end = image.end;
        self.symbol_table = image.symbols.clone();

        let first = image
            .segments
            .iter()
            .map(|segment| segment.address)
            .min()
            .unwrap_or(image.entry);
        self.core.set_program_range(first, image.end);

        self.program_snapshot = self
            .bus
            .borrow_mut()
            .with_ram(|ram| ram.clone());

        self.core.reset(self.entry_pc);
        info!(
            entry = format_args!("{:#x}", image.entry.raw()),
            end = format_args!("{:#x}", image.end.raw()),
            "program loaded"
        );
        self.set_status(MachineStatus::Ready);
        Ok(())
    }

    /// Performs one simulation step.
    ///
    /// Device interrupt lines are sampled after the step so they become
    /// visible to the core at the next fetch.
    ///
    /// # Errors
    ///
    /// Simulator errors transition the machine to the trapped state and are
    /// returned for reporting.
    pub fn step(&mut self) -> SimResult<()> {
        self.step_internal(false)
    }

    fn step_internal(&mut self, skip_break: bool) -> SimResult<()> {
        if matches!(self.status, MachineStatus::Exited | MachineStatus::Trapped) {
            return Ok(());
        }
        self.set_status(MachineStatus::Busy);

        let outcome = self.core.step(skip_break);
        self.tick_devices();

        match outcome {
            Ok(StepOutcome::Normal) => {
                self.set_status(MachineStatus::Ready);
                Ok(())
            }
            Ok(StepOutcome::Stop(cause)) => {
                self.set_status(MachineStatus::Trapped);
                self.emit(|sink| sink.program_trap(&format!("stopped on {cause:?}")));
                Ok(())
            }
            Err(error) => {
                self.set_status(MachineStatus::Trapped);
                self.emit(|sink| sink.program_trap(&error.to_string()));
                Err(error)
            }
        }
    }

    /// Advances device state by one cycle and refreshes interrupt lines.
    fn tick_devices(&mut self) {
        let mut bus = self.bus.borrow_mut();
        let mtimer_irq = bus
            .with_mtimer(|timer| {
                timer.tick(1);
                timer.mtimer_irq_active()
            })
            .unwrap_or(false);
        let mswi_irq = bus.with_mswi(|mswi| mswi.irq_active()).unwrap_or(false);
        let sswi_irq = bus.with_sswi(|sswi| sswi.irq_active()).unwrap_or(false);
        let (serial_rx_irq, serial_tx_irq) = bus
            .with_serial(|serial| (serial.rx_irq_active(), serial.tx_irq_active()))
            .unwrap_or((false, false));
        drop(bus);

        let csr = self.core.control_state_mut();
        csr.set_interrupt_signal(MTIMER_IRQ_LEVEL, mtimer_irq);
        csr.set_interrupt_signal(MSWI_IRQ_LEVEL, mswi_irq);
        csr.set_interrupt_signal(SSWI_IRQ_LEVEL, sswi_irq);
        csr.set_interrupt_signal(SERIAL_RX_IRQ_LEVEL, serial_rx_irq);
        csr.set_interrupt_signal(SERIAL_TX_IRQ_LEVEL, serial_tx_irq);
    }

    /// Runs until exit, trap, pause, or `max_steps` cycles.
    ///
    /// The first step skips a hardware breakpoint at the current PC so play
    /// can resume from one.
    ///
    /// # Errors
    ///
    /// Propagates the first simulator error; the machine is trapped then.
    pub fn play(&mut self, max_steps: u64) -> SimResult<u64> {
        self.paused = false;
        self.set_status(MachineStatus::Running);
        let mut executed = 0u64;
        let mut skip_break = true;
        while executed < max_steps
            && !self.paused
            && !matches!(self.status, MachineStatus::Exited | MachineStatus::Trapped)
        {
            self.step_internal(skip_break)?;
            skip_break = false;
            executed += 1;
            if self.status == MachineStatus::Ready && executed < max_steps {
                self.set_status(MachineStatus::Running);
            }
        }
        if self.status == MachineStatus::Running {
            self.set_status(MachineStatus::Ready);
        }
        Ok(executed)
    }

    /// Requests the play loop to stop after the current step.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Marks the program as exited (used by the syscall collaborator).
    pub fn set_exited(&mut self) {
        self.set_status(MachineStatus::Exited);
        self.emit(|sink| sink.program_exit());
    }

    /// Resets the CPU and reloads memory from the load-time snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Sanity`] when no program was ever loaded.
    pub fn restart(&mut self) -> SimResult<()> {
        let snapshot = self
            .program_snapshot
            .as_ref()
            .ok_or_else(|| SimulatorError::Sanity("restart without a loaded program".to_string()))?
            .clone();
        let _ = self
            .bus
            .borrow_mut()
            .with_ram(|ram| *ram = snapshot);

        self.program_cache.borrow_mut().invalidate_all();
        self.program_cache.borrow_mut().reset_stats();
        self.data_cache.borrow_mut().invalidate_all();
        self.data_cache.borrow_mut().reset_stats();
        if let Some(cache) = &self.level2_cache {
            cache.borrow_mut().invalidate_all();
            cache.borrow_mut().reset_stats();
        }
        self.core.mem_program_mut().flush_all();
        self.core.mem_data_mut().flush_all();
        self.allocator.borrow_mut().reset();

        self.core.reset(self.entry_pc);
        self.paused = false;
        self.set_status(MachineStatus::Ready);
        Ok(())
    }

    /// Registers an exception handler with the core.
    pub fn register_exception_handler(
        &mut self,
        excause: ExceptionCause,
        handler: Box<dyn ExceptionHandler>,
    ) {
        self.core.register_exception_handler(excause, handler);
    }

    /// Reads memory for inspection without simulation side effects.
    ///
    /// # Errors
    ///
    /// Propagates backend extent errors.
    pub fn inspect_memory(&mut self, address: Address, destination: &mut [u8]) -> SimResult<usize> {
        self.bus
            .borrow_mut()
            .read(destination, address, AccessOptions::INTERNAL)
    }

    /// Value of the `mcycle` counter.
    pub fn cycle_counter(&self) -> u64 {
        self.core.control_state().read_internal(csr_id::MCYCLE).as_u64()
    }
}
