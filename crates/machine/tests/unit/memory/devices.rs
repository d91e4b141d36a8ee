//! Backend device tests: serial port, ACLINT, LCD, and the LED panel.

use machine::config::Endian;
use machine::memory::backend::aclint::{
    ACLINT_MTIME_OFFSET, AclintMswi, AclintMtimer,
};
use machine::memory::backend::lcd::{FB_WIDTH, LcdDisplay};
use machine::memory::backend::serial::{
    SERP_RX_DATA_REG_OFFSET, SERP_RX_ST_REG_OFFSET, SERP_ST_IRQ_ENABLE, SERP_ST_READY,
    SERP_TX_DATA_REG_OFFSET, SERP_TX_ST_REG_OFFSET, SerialPort,
};
use machine::memory::backend::spiled::{PerifSpiLed, SPILED_REG_LED_LINE_OFFSET};
use machine::memory::backend::{AccessOptions, BackendMemory};

fn read_u32(device: &mut dyn BackendMemory, offset: u64, options: AccessOptions) -> u32 {
    let mut bytes = [0u8; 4];
    let _ = device.read(&mut bytes, offset, options).expect("read");
    u32::from_le_bytes(bytes)
}

fn write_u32(device: &mut dyn BackendMemory, offset: u64, value: u32) {
    let _ = device
        .write(offset, &value.to_le_bytes(), AccessOptions::REGULAR)
        .expect("write");
}

// ══════════════════════════════════════════════════════════
// 1. Serial port
// ══════════════════════════════════════════════════════════

#[test]
fn transmit_collects_bytes() {
    let mut serial = SerialPort::new(Endian::Little);
    // The transmitter is always ready.
    assert!(read_u32(&mut serial, SERP_TX_ST_REG_OFFSET, AccessOptions::REGULAR) & SERP_ST_READY != 0);
    write_u32(&mut serial, SERP_TX_DATA_REG_OFFSET, u32::from(b'H'));
    write_u32(&mut serial, SERP_TX_DATA_REG_OFFSET, u32::from(b'i'));
    assert_eq!(serial.take_tx_output(), b"Hi");
    assert!(serial.take_tx_output().is_empty());
}

#[test]
fn receive_pops_queue_and_tracks_ready() {
    let mut serial = SerialPort::new(Endian::Little);
    assert_eq!(
        read_u32(&mut serial, SERP_RX_ST_REG_OFFSET, AccessOptions::REGULAR) & SERP_ST_READY,
        0
    );

    serial.rx_queue_push(b'A');
    serial.rx_queue_push(b'B');
    assert!(read_u32(&mut serial, SERP_RX_ST_REG_OFFSET, AccessOptions::REGULAR) & SERP_ST_READY != 0);

    // A regular read pops; the next queued byte becomes ready.
    assert_eq!(
        read_u32(&mut serial, SERP_RX_DATA_REG_OFFSET, AccessOptions::REGULAR),
        u32::from(b'A')
    );
    assert_eq!(
        read_u32(&mut serial, SERP_RX_DATA_REG_OFFSET, AccessOptions::REGULAR),
        u32::from(b'B')
    );
    assert_eq!(
        read_u32(&mut serial, SERP_RX_ST_REG_OFFSET, AccessOptions::REGULAR) & SERP_ST_READY,
        0
    );
}

#[test]
fn internal_reads_do_not_consume_data() {
    let mut serial = SerialPort::new(Endian::Little);
    serial.rx_queue_push(b'X');
    assert_eq!(
        read_u32(&mut serial, SERP_RX_DATA_REG_OFFSET, AccessOptions::INTERNAL),
        u32::from(b'X')
    );
    // Still ready: the inspection read had no side effects.
    assert!(read_u32(&mut serial, SERP_RX_ST_REG_OFFSET, AccessOptions::REGULAR) & SERP_ST_READY != 0);
}

#[test]
fn receive_interrupt_follows_enable_and_ready() {
    let mut serial = SerialPort::new(Endian::Little);
    assert!(!serial.rx_irq_active());

    write_u32(&mut serial, SERP_RX_ST_REG_OFFSET, SERP_ST_IRQ_ENABLE);
    assert!(!serial.rx_irq_active(), "enabled but no data");

    serial.rx_queue_push(b'!');
    assert!(serial.rx_irq_active(), "enabled and ready");

    let _ = read_u32(&mut serial, SERP_RX_DATA_REG_OFFSET, AccessOptions::REGULAR);
    assert!(!serial.rx_irq_active(), "queue drained");
}

// ══════════════════════════════════════════════════════════
// 2. ACLINT
// ══════════════════════════════════════════════════════════

#[test]
fn mtimer_asserts_at_compare_crossing() {
    let mut timer = AclintMtimer::new(Endian::Little);
    // Park the comparator near, then cross it by ticking.
    let _ = timer
        .write(0, &100u64.to_le_bytes(), AccessOptions::REGULAR)
        .expect("mtimecmp write");
    timer.tick(99);
    assert!(!timer.mtimer_irq_active());
    timer.tick(1);
    assert!(timer.mtimer_irq_active());
}

#[test]
fn mtime_writes_adjust_the_user_offset() {
    let mut timer = AclintMtimer::new(Endian::Little);
    timer.tick(50);
    let _ = timer
        .write(ACLINT_MTIME_OFFSET, &1000u64.to_le_bytes(), AccessOptions::REGULAR)
        .expect("mtime write");
    assert_eq!(timer.mtime(), 1000);
    timer.tick(5);
    assert_eq!(timer.mtime(), 1005);

    let mut bytes = [0u8; 8];
    let _ = timer
        .read(&mut bytes, ACLINT_MTIME_OFFSET, AccessOptions::REGULAR)
        .expect("mtime read");
    assert_eq!(u64::from_le_bytes(bytes), 1005);
}

#[test]
fn software_interrupt_follows_low_bit() {
    let mut mswi = AclintMswi::new(Endian::Little);
    assert!(!mswi.irq_active());
    write_u32(&mut mswi, 0, 1);
    assert!(mswi.irq_active());
    // Only bit 0 participates.
    write_u32(&mut mswi, 0, 0xFFFF_FFFE);
    assert!(!mswi.irq_active());
}

// ══════════════════════════════════════════════════════════
// 3. LCD framebuffer and LED panel
// ══════════════════════════════════════════════════════════

#[test]
fn pixel_writes_decode_rgb565() {
    let mut lcd = LcdDisplay::new(Endian::Little);
    // Red 0x1F, green 0x00, blue 0x00 → 0xF800.
    let _ = lcd
        .write(0, &0xF800u16.to_le_bytes(), AccessOptions::REGULAR)
        .expect("pixel write");
    let updates = lcd.take_pixel_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!((updates[0].x, updates[0].y), (0, 0));
    assert_eq!((updates[0].r, updates[0].g, updates[0].b), (0xF8, 0, 0));
}

#[test]
fn pixel_addressing_follows_line_geometry() {
    let mut lcd = LcdDisplay::new(Endian::Little);
    // Second row, third pixel.
    let offset = (FB_WIDTH * 2 + 2 * 2) as u64;
    let _ = lcd
        .write(offset, &0x07E0u16.to_le_bytes(), AccessOptions::REGULAR)
        .expect("pixel write");
    let updates = lcd.take_pixel_updates();
    assert_eq!((updates[0].x, updates[0].y), (2, 1));
    assert_eq!((updates[0].r, updates[0].g, updates[0].b), (0, 0xFC, 0));
}

#[test]
fn rewriting_identical_pixel_is_not_a_change() {
    let mut lcd = LcdDisplay::new(Endian::Little);
    let _ = lcd
        .write(0, &0x1234u16.to_le_bytes(), AccessOptions::REGULAR)
        .expect("write");
    let _ = lcd.take_pixel_updates();
    let result = lcd
        .write(0, &0x1234u16.to_le_bytes(), AccessOptions::REGULAR)
        .expect("rewrite");
    assert!(!result.changed);
    assert!(lcd.take_pixel_updates().is_empty());
}

#[test]
fn led_panel_stores_registers() {
    let mut panel = PerifSpiLed::new(Endian::Little);
    write_u32(&mut panel, SPILED_REG_LED_LINE_OFFSET, 0x00FF_00FF);
    assert_eq!(panel.reg(SPILED_REG_LED_LINE_OFFSET), 0x00FF_00FF);
    assert_eq!(
        read_u32(&mut panel, SPILED_REG_LED_LINE_OFFSET, AccessOptions::REGULAR),
        0x00FF_00FF
    );
}
