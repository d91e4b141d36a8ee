//! Bit-field encoder/decoder inverse property.
//!
//! For every argument descriptor `F` and every value `v` within the bits the
//! field carries, `F.decode(F.encode(v << F.shift)) == v << F.shift`.

use machine::isa::asm::ARGUMENT_DESCS;
use proptest::prelude::*;

proptest! {
    #[test]
    fn encode_decode_roundtrip(index in 0usize..ARGUMENT_DESCS.len(), raw in any::<u32>()) {
        let field = &ARGUMENT_DESCS[index].field;
        let payload_bits = field.total_bits() - field.shift;
        let value = (raw & ((1u32 << payload_bits) - 1)) << field.shift;
        prop_assert_eq!(field.decode(field.encode(value)), value);
    }

    #[test]
    fn encode_stays_within_mask(index in 0usize..ARGUMENT_DESCS.len(), raw in any::<u32>()) {
        let field = &ARGUMENT_DESCS[index].field;
        prop_assert_eq!(field.encode(raw) & !field.mask(), 0);
    }
}

#[test]
fn branch_offset_field_scatters_bits() {
    // The B-type offset field: imm[12|10:5] in bits 31|30:25, imm[4:1|11]
    // in bits 11:8|7.
    let field = &ARGUMENT_DESCS
        .iter()
        .find(|desc| desc.name == 'p')
        .expect("descriptor for 'p'")
        .field;
    // Offset 8 encodes as a single bit in the imm[4:1] group.
    assert_eq!(field.encode(8), 0b0100 << 8);
    assert_eq!(field.decode(0b0100 << 8), 8);
}

#[test]
fn upper_immediate_field_is_shifted() {
    let field = &ARGUMENT_DESCS
        .iter()
        .find(|desc| desc.name == 'u')
        .expect("descriptor for 'u'")
        .field;
    assert_eq!(field.shift, 12);
    assert_eq!(field.encode(0x12345 << 12), 0x12345 << 12);
    assert_eq!(field.decode(0xFFFF_F000), 0xFFFF_F000);
}
