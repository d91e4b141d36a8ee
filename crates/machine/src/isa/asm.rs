//! Single-line assembler with relocations and pseudoinstruction expansion.
//!
//! This module implements the text → encoding direction of the instruction
//! layer:
//! 1. **Argument descriptors:** The table binding each argument syntax letter
//!    to its kind, value range, and encoded bit field.
//! 2. **Parsing:** One assembly line is tokenized into `(mnemonic, fields)`
//!    and matched against every map candidate for the mnemonic.
//! 3. **Relocations:** Operands containing symbolic expressions are deferred
//!    as [`RelocationRecord`]s and resolved by a second pass once symbol
//!    values are known.
//! 4. **Pseudoinstructions:** Recognized pseudo mnemonics are rewritten into
//!    one or two base instructions; immediates split across two words carry
//!    the composed-upper/lower modifiers.
//! 5. **Expressions:** Integer expressions over `+ - * / | & ^ ~` evaluated
//!    against a symbol source at resolution time.

use thiserror::Error;

use crate::common::address::Address;
use crate::isa::abi;
use crate::isa::field::InstructionField;
use crate::isa::map::{self, EntryKind, MapEntry};
use crate::instruction_field;

/// Description of one argument syntax letter.
pub struct ArgumentDesc {
    /// Syntax letter used in the instruction map argument strings.
    pub name: char,
    /// Argument kind: `g` register, `n` numeric, `a`/`p` PC-relative,
    /// `o` offset, `E` CSR address.
    pub kind: char,
    /// Minimum accepted value (signed when negative).
    pub min: i64,
    /// Maximum accepted value.
    pub max: i64,
    /// Bit field the value is encoded into.
    pub field: InstructionField,
}

/// Argument descriptors for every syntax letter used by the instruction map.
#[rustfmt::skip]
pub static ARGUMENT_DESCS: [ArgumentDesc; 12] = [
    ArgumentDesc { name: 'd', kind: 'g', min: 0, max: 0x1F, field: instruction_field!([(5, 7)], 0) },
    ArgumentDesc { name: 's', kind: 'g', min: 0, max: 0x1F, field: instruction_field!([(5, 15)], 0) },
    ArgumentDesc { name: 't', kind: 'g', min: 0, max: 0x1F, field: instruction_field!([(5, 20)], 0) },
    ArgumentDesc { name: 'j', kind: 'n', min: -0x800, max: 0x7FF, field: instruction_field!([(12, 20)], 0) },
    ArgumentDesc { name: '>', kind: 'n', min: 0, max: 0x3F, field: instruction_field!([(6, 20)], 0) },
    ArgumentDesc { name: 'a', kind: 'a', min: -0x80000, max: 0x7FFFF, field: instruction_field!([(10, 21), (1, 20), (8, 12), (1, 31)], 1) },
    ArgumentDesc { name: 'u', kind: 'n', min: 0, max: 0xFFFF_F000, field: instruction_field!([(20, 12)], 12) },
    ArgumentDesc { name: 'p', kind: 'p', min: -0x800, max: 0x7FF, field: instruction_field!([(4, 8), (6, 25), (1, 7), (1, 31)], 1) },
    ArgumentDesc { name: 'o', kind: 'o', min: -0x800, max: 0x7FF, field: instruction_field!([(12, 20)], 0) },
    ArgumentDesc { name: 'q', kind: 'o', min: -0x800, max: 0x7FF, field: instruction_field!([(5, 7), (7, 25)], 0) },
    ArgumentDesc { name: 'E', kind: 'E', min: 0, max: 0xFFF, field: instruction_field!([(12, 20)], 0) },
    ArgumentDesc { name: 'Z', kind: 'n', min: 0, max: 0x1F, field: instruction_field!([(5, 15)], 0) },
];

/// Looks up the argument descriptor for a syntax letter.
pub fn argument_desc(letter: char) -> Option<&'static ArgumentDesc> {
    ARGUMENT_DESCS.iter().find(|desc| desc.name == letter)
}

/// Error raised when a line cannot be assembled or a relocation resolved.
#[derive(Debug, Error)]
#[error("{message} ({filename}:{line})")]
pub struct ParseError {
    /// Human-readable description of what failed.
    pub message: String,
    /// Source file the line came from, empty when assembled from memory.
    pub filename: String,
    /// Line number within the source, 0 when assembled from memory.
    pub line: u32,
}

impl ParseError {
    fn new(message: impl Into<String>, filename: &str, line: u32) -> Self {
        Self {
            message: message.into(),
            filename: filename.to_string(),
            line,
        }
    }
}

/// Modified encoding used when a pseudoinstruction splits one immediate
/// across two instruction words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PseudoModifier {
    /// Normal processing; all fields are range-checked.
    #[default]
    None,
    /// Encodes `value[31:12] + value[11]`; the added bit compensates for the
    /// sign extension of the lower half.
    ComposedImmUpper,
    /// Encodes `value[11:0]`; upper bits are discarded.
    ComposedImmLower,
}

/// A deferred operand awaiting symbol values.
#[derive(Debug)]
pub struct RelocationRecord {
    /// Address of the instruction word to patch.
    pub location: Address,
    /// Symbolic expression text.
    pub expression: String,
    /// Constant added to the evaluated expression (e.g. `-pc` for
    /// PC-relative arguments).
    pub offset: i64,
    /// Minimum accepted patched value.
    pub min: i64,
    /// Maximum accepted patched value.
    pub max: i64,
    /// Bit field the patched value is encoded into.
    pub field: &'static InstructionField,
    /// Source file for diagnostics.
    pub filename: String,
    /// Source line for diagnostics.
    pub line: u32,
    /// Composed-immediate modifier applied before encoding.
    pub modifier: PseudoModifier,
}

/// List of pending relocation records collected during assembly.
pub type RelocationList = Vec<RelocationRecord>;

/// Source of symbol values for expression evaluation.
pub trait SymbolSource {
    /// Value of the named symbol, or `None` when undefined.
    fn symbol_value(&self, name: &str) -> Option<i64>;
}

/// Applies a composed-immediate modifier to a resolved value.
const fn modify_pseudoinst_imm(modifier: PseudoModifier, value: i64) -> i64 {
    match modifier {
        PseudoModifier::None => value,
        // The upper half keeps a 32-bit pattern so negative PC-relative
        // distances still land inside the unsigned field range.
        PseudoModifier::ComposedImmUpper => (value.wrapping_add(0x800)) & 0xFFFF_F000,
        PseudoModifier::ComposedImmLower => ((value & 0xFFF) ^ 0x800) - 0x800,
    }
}

/// Assembles one line into instruction words.
///
/// Returns the encoded words (more than one for expanded pseudoinstructions).
/// Operands containing symbolic expressions are appended to `reloc` and the
/// corresponding field bits are left zero until resolution.
///
/// # Errors
///
/// Returns [`ParseError`] when no instruction-map candidate matches the
/// mnemonic and operand shapes, or an operand is out of range.
pub fn code_from_string(
    line_text: &str,
    inst_addr: Address,
    reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
    pseudo_enabled: bool,
) -> Result<Vec<u32>, ParseError> {
    let text = line_text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.'))
        .unwrap_or(text.len());
    let base = text[..split].to_ascii_lowercase();
    let rest = text[split..].trim();
    let fields: Vec<String> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(',').map(|f| f.trim().to_string()).collect()
    };

    if base.is_empty() {
        return Err(ParseError::new("empty instruction field", filename, line));
    }

    code_from_tokens(&base, &fields, inst_addr, reloc, filename, line, pseudo_enabled)
}

fn code_from_tokens(
    base: &str,
    fields: &[String],
    inst_addr: Address,
    mut reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
    pseudo_enabled: bool,
) -> Result<Vec<u32>, ParseError> {
    let mut last_error = format!("unknown instruction '{base}'");

    if let Some(candidates) = map::entries_by_mnemonic().get(base) {
        for candidate in candidates {
            let mut staged = RelocationList::new();
            let staging = if reloc.is_some() {
                Some(&mut staged)
            } else {
                None
            };
            match base_from_tokens(
                candidate,
                fields,
                inst_addr,
                staging,
                filename,
                line,
                PseudoModifier::None,
                0,
            ) {
                Ok(code) => {
                    if let Some(out) = reloc.as_mut() {
                        out.append(&mut staged);
                    }
                    return Ok(vec![code]);
                }
                Err(message) => last_error = message,
            }
        }
    }

    if pseudo_enabled {
        if let Some(result) = pseudo_from_tokens(base, fields, inst_addr, reloc, filename, line) {
            return result;
        }
    }

    Err(ParseError::new(last_error, filename, line))
}

/// Encodes one base instruction from operand tokens.
///
/// On success returns the instruction word; on failure a description of the
/// first mismatch, so the caller can try the next candidate.
#[allow(clippy::too_many_arguments)]
fn base_from_tokens(
    entry: &'static MapEntry,
    fields: &[String],
    inst_addr: Address,
    mut reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
    modifier: PseudoModifier,
    extra_offset: i64,
) -> Result<u32, String> {
    let EntryKind::Leaf(_) = entry.kind else {
        return Err("dispatch entry cannot be assembled".to_string());
    };
    if entry.args.len() != fields.len() {
        return Err("number of arguments does not match".to_string());
    }

    let mut code = entry.code;

    for (syntax, field_token) in entry.args.iter().zip(fields.iter()) {
        let mut remaining = field_token.trim();

        for letter in syntax.chars() {
            let Some(desc) = argument_desc(letter) else {
                // Literal character in the syntax, e.g. the parentheses of
                // the load/store address form.
                remaining = remaining.trim_start();
                if !remaining.starts_with(letter) {
                    return Err("argument does not match instruction template".to_string());
                }
                remaining = &remaining[letter.len_utf8()..];
                continue;
            };

            remaining = remaining.trim_start();
            if remaining.is_empty() {
                return Err("empty argument encountered".to_string());
            }

            let mut value: i64;
            let chars_taken: usize;
            let mut deferred = false;

            match desc.kind {
                'g' => {
                    let Some((number, taken)) = abi::parse_register(remaining) else {
                        return Err(format!("invalid register '{remaining}'"));
                    };
                    value = i64::from(number);
                    chars_taken = taken;
                }
                _ => {
                    let pc_relative = matches!(desc.kind, 'a' | 'p');
                    let base_offset = if pc_relative {
                        extra_offset.wrapping_sub(inst_addr.raw() as i64)
                    } else {
                        extra_offset
                    };

                    match parse_integer_prefix(remaining) {
                        Some((number, taken)) if !continues_as_expression(remaining, taken) => {
                            value = number.wrapping_add(base_offset);
                            chars_taken = taken;
                        }
                        _ => {
                            let Some(out) = reloc.as_mut() else {
                                return Err(format!(
                                    "numeric argument expected, got '{remaining}'"
                                ));
                            };
                            let (expression, taken) = take_expression(remaining);
                            if expression.is_empty() {
                                return Err("argument parse error".to_string());
                            }
                            out.push(RelocationRecord {
                                location: inst_addr,
                                expression,
                                offset: base_offset,
                                min: desc.min,
                                max: desc.max,
                                field: &desc.field,
                                filename: filename.to_string(),
                                line,
                                modifier,
                            });
                            value = 0;
                            chars_taken = taken;
                            deferred = true;
                        }
                    }
                }
            }

            if !deferred {
                if desc.kind != 'g' {
                    value = modify_pseudoinst_imm(modifier, value);
                }
                if desc.min < 0 {
                    if value < desc.min || value > desc.max {
                        return Err("argument range exceeded".to_string());
                    }
                } else if (value as u64) < desc.min as u64 || (value as u64) > desc.max as u64 {
                    return Err("argument range exceeded".to_string());
                }
                code |= desc.field.encode(value as u32);
            }
            remaining = &remaining[chars_taken..];
        }

        if !remaining.trim().is_empty() {
            return Err("excessive characters in argument".to_string());
        }
    }

    Ok(code)
}

/// Parses an integer literal prefix; returns the value and characters taken.
fn parse_integer_prefix(text: &str) -> Option<(i64, usize)> {
    let bytes = text.as_bytes();
    let mut index = 0;
    let negative = bytes.first() == Some(&b'-');
    if negative {
        index += 1;
    }
    if index >= bytes.len() || !bytes[index].is_ascii_digit() {
        return None;
    }

    let (radix, digits_start) = if text[index..].starts_with("0x") || text[index..].starts_with("0X")
    {
        (16, index + 2)
    } else if text[index..].starts_with("0b") || text[index..].starts_with("0B") {
        (2, index + 2)
    } else if text[index..].starts_with('0') && text[index..].len() > 1 {
        (8, index + 1)
    } else {
        (10, index)
    };

    let mut end = digits_start;
    while end < bytes.len() && (bytes[end] as char).is_digit(radix) {
        end += 1;
    }
    if end == digits_start {
        // A lone "0" falls into the octal arm with no digits after it.
        if radix == 8 {
            return Some((0, digits_start));
        }
        return None;
    }

    let magnitude = i64::from_str_radix(&text[digits_start..end], radix).ok()?;
    Some((if negative { -magnitude } else { magnitude }, end))
}

/// Whether a numeric prefix is followed by an expression operator.
fn continues_as_expression(text: &str, taken: usize) -> bool {
    text[taken..]
        .trim_start()
        .starts_with(['+', '-', '*', '/', '|', '&', '^', '~'])
}

/// Extracts the symbolic expression prefix of an operand token.
///
/// Accepts identifier characters, digits, and the operator set; stops at the
/// first other character (e.g. the opening parenthesis of an address form).
fn take_expression(text: &str) -> (String, usize) {
    let mut expression = String::new();
    let mut taken = 0;
    for ch in text.chars() {
        if ch.is_whitespace() {
            taken += ch.len_utf8();
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' || "+-*/|&^~".contains(ch) {
            expression.push(ch);
            taken += ch.len_utf8();
        } else {
            break;
        }
    }
    (expression, taken)
}

type PseudoResult = Option<Result<Vec<u32>, ParseError>>;

/// Expands recognized pseudoinstructions into base instructions.
fn pseudo_from_tokens(
    base: &str,
    fields: &[String],
    addr: Address,
    mut reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
) -> PseudoResult {
    let f = |index: usize| fields.get(index).cloned().unwrap_or_default();

    let rewritten: (&str, Vec<String>) = match (base, fields.len()) {
        ("nop", 0) => ("addi", vec!["x0".into(), "x0".into(), "0".into()]),
        ("mv", 2) => ("addi", vec![f(0), f(1), "0".into()]),
        ("not", 2) => ("xori", vec![f(0), f(1), "-1".into()]),
        ("neg", 2) => ("sub", vec![f(0), "x0".into(), f(1)]),
        ("negw", 2) => ("subw", vec![f(0), "x0".into(), f(1)]),
        ("seqz", 2) => ("sltiu", vec![f(0), f(1), "1".into()]),
        ("snez", 2) => ("sltu", vec![f(0), "x0".into(), f(1)]),
        ("sltz", 2) => ("slt", vec![f(0), f(1), "x0".into()]),
        ("sgtz", 2) => ("slt", vec![f(0), "x0".into(), f(1)]),
        ("beqz", 2) => ("beq", vec![f(0), "x0".into(), f(1)]),
        ("bnez", 2) => ("bne", vec![f(0), "x0".into(), f(1)]),
        ("blez", 2) => ("bge", vec!["x0".into(), f(0), f(1)]),
        ("bgez", 2) => ("bge", vec![f(0), "x0".into(), f(1)]),
        ("bltz", 2) => ("blt", vec![f(0), "x0".into(), f(1)]),
        ("bgtz", 2) => ("blt", vec!["x0".into(), f(0), f(1)]),
        ("bgt", 3) => ("blt", vec![f(1), f(0), f(2)]),
        ("ble", 3) => ("bge", vec![f(1), f(0), f(2)]),
        ("bgtu", 3) => ("bltu", vec![f(1), f(0), f(2)]),
        ("bleu", 3) => ("bgeu", vec![f(1), f(0), f(2)]),
        ("j", 1) => ("jal", vec!["x0".into(), f(0)]),
        ("jal", 1) => ("jal", vec!["x1".into(), f(0)]),
        ("jr", 1) => ("jalr", vec!["x0".into(), format!("0({})", f(0))]),
        ("jalr", 1) => ("jalr", vec!["x1".into(), format!("0({})", f(0))]),
        ("ret", 0) => ("jalr", vec!["x0".into(), "0(x1)".into()]),
        ("csrr", 2) => ("csrrs", vec![f(0), f(1), "x0".into()]),
        ("csrw", 2) => ("csrrw", vec!["x0".into(), f(0), f(1)]),
        ("csrs", 2) => ("csrrs", vec!["x0".into(), f(0), f(1)]),
        ("csrc", 2) => ("csrrc", vec!["x0".into(), f(0), f(1)]),
        ("li", 2) | ("la", 2) => {
            return Some(expand_load_immediate(
                &f(0),
                &f(1),
                addr,
                reloc.take(),
                filename,
                line,
            ));
        }
        ("call", 1) => {
            return Some(expand_call(&f(0), addr, reloc.take(), filename, line));
        }
        _ => return None,
    };

    Some(code_from_tokens(
        rewritten.0,
        &rewritten.1,
        addr,
        reloc,
        filename,
        line,
        false,
    ))
}

/// Expands `li`/`la` into `lui` + `addi` (or a single `addi` when the value
/// fits a 12-bit signed immediate).
fn expand_load_immediate(
    rd: &str,
    operand: &str,
    addr: Address,
    mut reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
) -> Result<Vec<u32>, ParseError> {
    if let Some((value, taken)) = parse_integer_prefix(operand.trim()) {
        if operand.trim()[taken..].trim().is_empty() && (-0x800..0x800).contains(&value) {
            return code_from_tokens(
                "addi",
                &[rd.to_string(), "x0".to_string(), value.to_string()],
                addr,
                reloc,
                filename,
                line,
                false,
            );
        }
    }

    let upper = encode_with_modifier(
        "lui",
        &[rd.to_string(), operand.to_string()],
        addr,
        reloc.as_mut().map(|r| &mut **r),
        filename,
        line,
        PseudoModifier::ComposedImmUpper,
        0,
    )?;
    let lower = encode_with_modifier(
        "addi",
        &[rd.to_string(), rd.to_string(), operand.to_string()],
        addr + 4u64,
        reloc,
        filename,
        line,
        PseudoModifier::ComposedImmLower,
        0,
    )?;
    Ok(vec![upper, lower])
}

/// Expands `call` into `auipc x1` + `jalr x1`; the split immediate is the
/// PC-relative distance from the `auipc` word.
fn expand_call(
    target: &str,
    addr: Address,
    mut reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
) -> Result<Vec<u32>, ParseError> {
    let pc_offset = -(addr.raw() as i64);
    let upper = encode_with_modifier(
        "auipc",
        &["x1".to_string(), target.to_string()],
        addr,
        reloc.as_mut().map(|r| &mut **r),
        filename,
        line,
        PseudoModifier::ComposedImmUpper,
        pc_offset,
    )?;
    let lower = encode_with_modifier(
        "jalr",
        &["x1".to_string(), format!("{target}(x1)")],
        addr + 4u64,
        reloc,
        filename,
        line,
        PseudoModifier::ComposedImmLower,
        pc_offset,
    )?;
    Ok(vec![upper, lower])
}

/// Encodes one base instruction with a composed-immediate modifier.
#[allow(clippy::too_many_arguments)]
fn encode_with_modifier(
    mnemonic: &str,
    args: &[String],
    addr: Address,
    mut reloc: Option<&mut RelocationList>,
    filename: &str,
    line: u32,
    modifier: PseudoModifier,
    extra_offset: i64,
) -> Result<u32, ParseError> {
    let candidates = map::entries_by_mnemonic()
        .get(mnemonic)
        .ok_or_else(|| ParseError::new(format!("unknown instruction '{mnemonic}'"), filename, line))?;
    let mut last_error = String::new();
    for candidate in candidates {
        let mut staged = RelocationList::new();
        let staging = if reloc.is_some() {
            Some(&mut staged)
        } else {
            None
        };
        match base_from_tokens(
            candidate, args, addr, staging, filename, line, modifier, extra_offset,
        ) {
            Ok(code) => {
                if let Some(out) = reloc.as_mut() {
                    out.append(&mut staged);
                }
                return Ok(code);
            }
            Err(message) => last_error = message,
        }
    }
    Err(ParseError::new(last_error, filename, line))
}

/// Patches one relocated instruction word with the resolved symbol value.
///
/// The argument's encoded bits are cleared, the value (plus record offset) is
/// modifier-adjusted, alignment- and range-checked, re-encoded, and OR-ed in.
///
/// # Errors
///
/// Returns [`ParseError`] when the resolved value does not satisfy the
/// field's alignment or range constraints.
pub fn update_with_relocation(
    word: u32,
    symbol_value: i64,
    record: &RelocationRecord,
) -> Result<u32, ParseError> {
    let mut value = symbol_value.wrapping_add(record.offset);
    value = modify_pseudoinst_imm(record.modifier, value);

    if record.modifier == PseudoModifier::None
        && record.field.shift > 0
        && value & ((1 << record.field.shift) - 1) != 0
    {
        return Err(ParseError::new(
            format!("relocation value {value:#x} is misaligned"),
            &record.filename,
            record.line,
        ));
    }

    let in_range = if record.min < 0 {
        (record.min..=record.max).contains(&value)
            || (record.min..=record.max).contains(&(value - 0x1_0000_0000))
    } else {
        (value as u64) >= record.min as u64 && (value as u64) <= record.max as u64
    };
    if !in_range {
        return Err(ParseError::new(
            format!("relocation value {value:#x} out of range"),
            &record.filename,
            record.line,
        ));
    }

    let cleared = word & !record.field.mask();
    Ok(cleared | record.field.encode(value as u32))
}

/// Resolves one relocation record against a symbol source and patches `word`.
///
/// # Errors
///
/// Returns [`ParseError`] when the expression references undefined symbols,
/// is malformed, or the resolved value fails the field constraints.
pub fn resolve_relocation(
    word: u32,
    record: &RelocationRecord,
    symbols: &dyn SymbolSource,
) -> Result<u32, ParseError> {
    let value = eval_expression(&record.expression, symbols)
        .map_err(|message| ParseError::new(message, &record.filename, record.line))?;
    update_with_relocation(word, value, record)
}

// ── Expression evaluation ────────────────────────────────────────────

/// Evaluates an integer expression over `+ - * / | & ^ ~` and symbols.
///
/// # Errors
///
/// Returns a description of the first syntax error or undefined symbol.
pub fn eval_expression(expression: &str, symbols: &dyn SymbolSource) -> Result<i64, String> {
    let tokens: Vec<char> = expression.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = ExprParser {
        tokens: &tokens,
        position: 0,
        symbols,
    };
    let value = parser.parse_or()?;
    if parser.position != parser.tokens.len() {
        return Err(format!(
            "unexpected character '{}' in expression",
            parser.tokens[parser.position]
        ));
    }
    Ok(value)
}

struct ExprParser<'a> {
    tokens: &'a [char],
    position: usize,
    symbols: &'a dyn SymbolSource,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.position).copied()
    }

    fn parse_or(&mut self) -> Result<i64, String> {
        let mut value = self.parse_xor()?;
        while self.peek() == Some('|') {
            self.position += 1;
            value |= self.parse_xor()?;
        }
        Ok(value)
    }

    fn parse_xor(&mut self) -> Result<i64, String> {
        let mut value = self.parse_and()?;
        while self.peek() == Some('^') {
            self.position += 1;
            value ^= self.parse_and()?;
        }
        Ok(value)
    }

    fn parse_and(&mut self) -> Result<i64, String> {
        let mut value = self.parse_additive()?;
        while self.peek() == Some('&') {
            self.position += 1;
            value &= self.parse_additive()?;
        }
        Ok(value)
    }

    fn parse_additive(&mut self) -> Result<i64, String> {
        let mut value = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.position += 1;
                    value = value.wrapping_add(self.parse_multiplicative()?);
                }
                Some('-') => {
                    self.position += 1;
                    value = value.wrapping_sub(self.parse_multiplicative()?);
                }
                _ => return Ok(value),
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Result<i64, String> {
        let mut value = self.parse_unary()?;
        loop {
            match self.peek() {
                Some('*') => {
                    self.position += 1;
                    value = value.wrapping_mul(self.parse_unary()?);
                }
                Some('/') => {
                    self.position += 1;
                    let divisor = self.parse_unary()?;
                    if divisor == 0 {
                        return Err("division by zero in expression".to_string());
                    }
                    value = value.wrapping_div(divisor);
                }
                _ => return Ok(value),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<i64, String> {
        match self.peek() {
            Some('-') => {
                self.position += 1;
                Ok(self.parse_unary()?.wrapping_neg())
            }
            Some('~') => {
                self.position += 1;
                Ok(!self.parse_unary()?)
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<i64, String> {
        let start = self.position;
        let Some(first) = self.peek() else {
            return Err("unexpected end of expression".to_string());
        };

        if first.is_ascii_digit() {
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric())
            {
                self.position += 1;
            }
            let literal: String = self.tokens[start..self.position].iter().collect();
            return parse_integer_prefix(&literal)
                .filter(|(_, taken)| *taken == literal.len())
                .map(|(value, _)| value)
                .ok_or_else(|| format!("invalid numeric literal '{literal}'"));
        }

        if first.is_ascii_alphabetic() || first == '_' {
            while self
                .peek()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                self.position += 1;
            }
            let name: String = self.tokens[start..self.position].iter().collect();
            return self
                .symbols
                .symbol_value(&name)
                .ok_or_else(|| format!("undefined symbol '{name}'"));
        }

        Err(format!("unexpected character '{first}' in expression"))
    }
}
