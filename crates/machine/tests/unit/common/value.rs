//! Register value view tests.

use machine::common::RegisterValue;
use machine::config::Xlen;

#[test]
fn typed_views_truncate() {
    let value = RegisterValue::new(0x1122_3344_5566_7788);
    assert_eq!(value.as_u8(), 0x88);
    assert_eq!(value.as_u16(), 0x7788);
    assert_eq!(value.as_u32(), 0x5566_7788);
    assert_eq!(value.as_u64(), 0x1122_3344_5566_7788);
}

#[test]
fn signed_views_reinterpret() {
    let value = RegisterValue::new(0xFFFF_FFFF_FFFF_FFFF);
    assert_eq!(value.as_i8(), -1);
    assert_eq!(value.as_i16(), -1);
    assert_eq!(value.as_i32(), -1);
    assert_eq!(value.as_i64(), -1);
}

#[test]
fn xlen_view_reads_low_bits_only() {
    let value = RegisterValue::new(0xAAAA_BBBB_CCCC_DDDD);
    assert_eq!(value.as_xlen(Xlen::Rv32), 0xCCCC_DDDD);
    assert_eq!(value.as_xlen(Xlen::Rv64), 0xAAAA_BBBB_CCCC_DDDD);
}

#[test]
fn signed_sources_sign_extend_into_storage() {
    assert_eq!(RegisterValue::from(-1i32).as_u64(), u64::MAX);
    assert_eq!(RegisterValue::from(-2i8).as_u64(), 0xFFFF_FFFF_FFFF_FFFE);
    // Unsigned sources zero-extend.
    assert_eq!(RegisterValue::from(0xFFFF_FFFFu32).as_u64(), 0xFFFF_FFFF);
}

#[test]
fn default_is_zero_and_equality_is_bitwise() {
    assert_eq!(RegisterValue::default(), RegisterValue::new(0));
    assert_ne!(RegisterValue::new(1), RegisterValue::new(2));
}
