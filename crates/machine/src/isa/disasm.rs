//! Symbolic disassembler.
//!
//! Renders one instruction word into assembly text. The instruction's map
//! entry supplies the mnemonic and argument syntax tokens; each argument is
//! extracted through its bit-field descriptor, sign-extended when its range
//! is signed, and rendered per kind. PC-relative arguments are shown as the
//! absolute target address, and the canonical NOP renders as `nop`.

use crate::common::address::Address;
use crate::isa::abi;
use crate::isa::asm::argument_desc;
use crate::isa::instruction::{Instruction, Type, sign_extend};
use crate::isa::map;

/// Disassembles an instruction fetched from `inst_addr`.
pub fn to_text(inst: Instruction, inst_addr: Address) -> String {
    let entry = map::find(inst.data());
    if matches!(entry.inst_type, Type::Unknown) {
        return "unknown".to_string();
    }
    if inst == Instruction::NOP {
        return "nop".to_string();
    }

    let mut text = entry.name.to_string();
    let mut delimiter = " ";

    for syntax in entry.args {
        text.push_str(delimiter);
        delimiter = ", ";
        for letter in syntax.chars() {
            let Some(desc) = argument_desc(letter) else {
                text.push(letter);
                continue;
            };
            let raw = desc.field.decode(inst.data());
            let value = if desc.min < 0 {
                i64::from(sign_extend(raw, desc.field.total_bits()))
            } else {
                i64::from(raw)
            };
            match desc.kind {
                'g' => {
                    if abi::symbolic_registers_enabled() {
                        text.push_str(abi::REGISTER_NAMES[value as usize]);
                    } else {
                        text.push_str(&format!("x{value}"));
                    }
                }
                'p' | 'a' => {
                    let target = inst_addr.raw().wrapping_add(value as u64);
                    text.push_str(&format!("0x{target:x}"));
                }
                'E' => {
                    text.push_str(&format!("0x{:x}", value as u64));
                }
                _ => {
                    if desc.min < 0 {
                        text.push_str(&format!("{value}"));
                    } else {
                        text.push_str(&format!("0x{:x}", value as u64));
                    }
                }
            }
        }
    }
    text
}
