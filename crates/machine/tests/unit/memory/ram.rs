//! Sparse main memory tests.

use machine::config::Xlen;
use machine::memory::backend::ram::Memory;
use machine::memory::backend::{AccessOptions, BackendMemory};

#[test]
fn unallocated_reads_return_zero() {
    let mut ram = Memory::new(Xlen::Rv32);
    let mut buffer = [0xAAu8; 16];
    let taken = ram
        .read(&mut buffer, 0x1234_5678, AccessOptions::INTERNAL)
        .expect("read");
    assert_eq!(taken, 16);
    assert_eq!(buffer, [0u8; 16]);
    assert!(!ram.is_allocated(0x1234_5678));
}

#[test]
fn first_write_allocates_a_section() {
    let mut ram = Memory::new(Xlen::Rv32);
    let result = ram
        .write(0x8002_0100, &[1, 2, 3, 4], AccessOptions::REGULAR)
        .expect("write");
    assert_eq!(result.n_bytes, 4);
    assert!(result.changed);
    assert!(ram.is_allocated(0x8002_0100));

    let mut buffer = [0u8; 4];
    let _ = ram
        .read(&mut buffer, 0x8002_0100, AccessOptions::REGULAR)
        .expect("read");
    assert_eq!(buffer, [1, 2, 3, 4]);
}

#[test]
fn rewriting_same_bytes_reports_unchanged() {
    let mut ram = Memory::new(Xlen::Rv32);
    let _ = ram.write(0x400, &[7, 7], AccessOptions::REGULAR).expect("write");
    let result = ram.write(0x400, &[7, 7], AccessOptions::REGULAR).expect("rewrite");
    assert!(!result.changed);
}

#[test]
fn writes_span_section_boundaries() {
    let mut ram = Memory::new(Xlen::Rv32);
    // Sections are 64 KiB; write across the 0x1_0000 boundary.
    let data: Vec<u8> = (0..32).collect();
    let base = 0x1_0000 - 16;
    let result = ram.write(base, &data, AccessOptions::REGULAR).expect("write");
    assert_eq!(result.n_bytes, 32);

    let mut buffer = [0u8; 32];
    let _ = ram.read(&mut buffer, base, AccessOptions::REGULAR).expect("read");
    assert_eq!(&buffer[..], &data[..]);
    assert!(ram.is_allocated(0xFFFF));
    assert!(ram.is_allocated(0x1_0000));
}

#[test]
fn distant_sections_are_independent() {
    let mut ram = Memory::new(Xlen::Rv32);
    let _ = ram.write(0x0000_0200, &[0x11], AccessOptions::REGULAR).expect("low");
    let _ = ram.write(0xE000_0000, &[0x22], AccessOptions::REGULAR).expect("high");

    let mut low = [0u8; 1];
    let mut high = [0u8; 1];
    let _ = ram.read(&mut low, 0x200, AccessOptions::REGULAR).expect("read low");
    let _ = ram.read(&mut high, 0xE000_0000, AccessOptions::REGULAR).expect("read high");
    assert_eq!(low[0], 0x11);
    assert_eq!(high[0], 0x22);
}

#[test]
fn out_of_space_access_is_rejected() {
    let mut ram = Memory::new(Xlen::Rv32);
    let mut buffer = [0u8; 4];
    assert!(ram.read(&mut buffer, 0x1_0000_0000, AccessOptions::REGULAR).is_err());
    assert!(ram.write(0x1_0000_0000, &[1], AccessOptions::REGULAR).is_err());
}

#[test]
fn reset_drops_all_sections() {
    let mut ram = Memory::new(Xlen::Rv32);
    let _ = ram.write(0x400, &[9], AccessOptions::REGULAR).expect("write");
    ram.reset();
    assert!(!ram.is_allocated(0x400));
}

#[test]
fn rv64_space_accepts_high_addresses() {
    let mut ram = Memory::new(Xlen::Rv64);
    let address = 0x12_3456_7800u64;
    let _ = ram.write(address, &[5], AccessOptions::REGULAR).expect("write");
    let mut buffer = [0u8; 1];
    let _ = ram.read(&mut buffer, address, AccessOptions::REGULAR).expect("read");
    assert_eq!(buffer[0], 5);
}
