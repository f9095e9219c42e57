//! The instruction encoder: the canonical (mnemonic, operand-shape) table.
//!
//! Every G10 instruction is a 16-bit opcode written little-endian, followed
//! by zero to four immediate/address bytes. Register indices, condition
//! codes, widths, bit numbers and interrupt vectors live in the opcode
//! nibbles; immediates and addresses follow it. The same table drives the
//! layout pass (sizes only), the emission pass (bytes and relocations), and
//! the decoding stub the test suite round-trips through.

use std::fmt;

use g10_object::g10::{Address, RelocationType};

use crate::{Condition, Error, Expression, Operand, Register, RegisterKind, Value};

/// A G10 mnemonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Mnemonic {
    Nop,
    Halt,
    Di,
    Ei,
    Ld,
    Ldq,
    Ldp,
    St,
    Stq,
    Stp,
    Mv,
    Jmp,
    Jpb,
    Call,
    Int,
    Ret,
    Reti,
    Add,
    Adc,
    Sub,
    Sbc,
    Cmp,
    Cpc,
    And,
    Or,
    Xor,
    Inc,
    Dec,
    Swap,
    Not,
    Neg,
    Push,
    Pop,
    Bit,
    Set,
    Res,
    Sla,
    Sra,
    Srl,
    Rl,
    Rr,
}

impl Mnemonic {
    /// Look a mnemonic up by its source spelling, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, Error> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "nop" => Self::Nop,
            "halt" => Self::Halt,
            "di" => Self::Di,
            "ei" => Self::Ei,
            "ld" => Self::Ld,
            "ldq" => Self::Ldq,
            "ldp" => Self::Ldp,
            "st" => Self::St,
            "stq" => Self::Stq,
            "stp" => Self::Stp,
            "mv" => Self::Mv,
            "jmp" => Self::Jmp,
            "jpb" => Self::Jpb,
            "call" => Self::Call,
            "int" => Self::Int,
            "ret" => Self::Ret,
            "reti" => Self::Reti,
            "add" => Self::Add,
            "adc" => Self::Adc,
            "sub" => Self::Sub,
            "sbc" => Self::Sbc,
            "cmp" => Self::Cmp,
            "cpc" => Self::Cpc,
            "and" => Self::And,
            "or" => Self::Or,
            "xor" => Self::Xor,
            "inc" => Self::Inc,
            "dec" => Self::Dec,
            "swap" => Self::Swap,
            "not" => Self::Not,
            "neg" => Self::Neg,
            "push" => Self::Push,
            "pop" => Self::Pop,
            "bit" => Self::Bit,
            "set" => Self::Set,
            "res" => Self::Res,
            "sla" => Self::Sla,
            "sra" => Self::Sra,
            "srl" => Self::Srl,
            "rl" => Self::Rl,
            "rr" => Self::Rr,
            _ => return Err(Error::UnknownMnemonic(name.to_owned())),
        })
    }

    /// The canonical source spelling.
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Halt => "halt",
            Self::Di => "di",
            Self::Ei => "ei",
            Self::Ld => "ld",
            Self::Ldq => "ldq",
            Self::Ldp => "ldp",
            Self::St => "st",
            Self::Stq => "stq",
            Self::Stp => "stp",
            Self::Mv => "mv",
            Self::Jmp => "jmp",
            Self::Jpb => "jpb",
            Self::Call => "call",
            Self::Int => "int",
            Self::Ret => "ret",
            Self::Reti => "reti",
            Self::Add => "add",
            Self::Adc => "adc",
            Self::Sub => "sub",
            Self::Sbc => "sbc",
            Self::Cmp => "cmp",
            Self::Cpc => "cpc",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Inc => "inc",
            Self::Dec => "dec",
            Self::Swap => "swap",
            Self::Not => "not",
            Self::Neg => "neg",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Bit => "bit",
            Self::Set => "set",
            Self::Res => "res",
            Self::Sla => "sla",
            Self::Sra => "sra",
            Self::Srl => "srl",
            Self::Rl => "rl",
            Self::Rr => "rr",
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(self.name())
    }
}

/// An encoded instruction: its bytes, plus the relocation its field needs
/// when the operand couldn't be resolved locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// The instruction bytes, 2 to 6 of them.
    pub bytes: Vec<u8>,
    /// The relocation covering the zero-filled field, if any.
    pub relocation: Option<FieldRelocation>,
}

/// A relocation requested by the encoder, relative to the instruction start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRelocation {
    /// The relocation kind matching the field width and addressing mode.
    pub r#type: RelocationType,
    /// Byte offset of the field within the instruction. Always 2: every
    /// field follows the 16-bit opcode.
    pub offset: u32,
    /// The unresolved symbol.
    pub symbol: String,
    /// The constant addend.
    pub addend: i32,
}

/// The field following an opcode, before its value is known.
enum Field<'a> {
    /// No field; the instruction is the bare opcode.
    None,
    /// An 8-bit immediate, relocatable as `abs8`.
    Imm8(&'a Expression),
    /// A 16-bit immediate, relocatable as `abs16`.
    Imm16(&'a Expression),
    /// A 32-bit immediate, relocatable as `abs32`.
    Imm32(&'a Expression),
    /// A 32-bit absolute address, relocatable as `abs32`.
    Addr32(&'a Expression),
    /// A 16-bit offset into the quick RAM window, relocatable as `quick16`.
    Quick16(&'a Expression),
    /// An 8-bit offset into the I/O port window, relocatable as `port8`.
    Port8(&'a Expression),
    /// A signed 16-bit branch displacement, relocatable as `rel16`.
    Branch(&'a Expression),
    /// An interrupt vector, encoded in the opcode's low byte.
    Vector(&'a Expression),
    /// A bit number, encoded in the opcode's low nibble.
    BitNumber(&'a Expression),
}

impl Field<'_> {
    fn extra_bytes(&self) -> u32 {
        match self {
            Self::None | Self::Vector(_) | Self::BitNumber(_) => 0,
            Self::Imm8(_) | Self::Port8(_) => 1,
            Self::Imm16(_) | Self::Quick16(_) | Self::Branch(_) => 2,
            Self::Imm32(_) | Self::Addr32(_) => 4,
        }
    }
}

/// A selected table row: the opcode with all shape-derived nibbles filled
/// in, and the pending field.
struct Form<'a> {
    opcode: u16,
    field: Field<'a>,
}

impl Form<'_> {
    fn fixed(opcode: u16) -> Self {
        Self { opcode, field: Field::None }
    }

    fn length(&self) -> u32 {
        2 + self.field.extra_bytes()
    }
}

fn x(register: Register) -> u16 {
    u16::from(register.index) << 4
}

fn y(register: Register) -> u16 {
    u16::from(register.index)
}

fn c(condition: Condition) -> u16 {
    condition.code() << 4
}

fn per_kind(kind: RegisterKind, low: u16, word: u16, double: u16) -> u16 {
    match kind {
        RegisterKind::Low => low,
        RegisterKind::Word => word,
        RegisterKind::Double => double,
    }
}

/// Pick the table row for a (mnemonic, operand-shape) combination.
fn select_form<'a>(mnemonic: Mnemonic, operands: &'a [Operand]) -> Result<Form<'a>, Error> {
    use Mnemonic as M;
    use Operand as O;

    let shape_error = || Error::OperandShape(mnemonic.to_string());

    Ok(match (mnemonic, operands) {
        (M::Nop, []) => Form::fixed(0x0000),
        (M::Halt, []) => Form::fixed(0x0100),
        (M::Di, []) => Form::fixed(0x0200),
        (M::Ei, []) => Form::fixed(0x0300),

        // Loads.
        (M::Ld, [O::Register(register), O::Immediate(value)]) => Form {
            opcode: per_kind(register.kind, 0x1000, 0x2000, 0x3000) | x(*register),
            field: match register.kind {
                RegisterKind::Low => Field::Imm8(value),
                RegisterKind::Word => Field::Imm16(value),
                RegisterKind::Double => Field::Imm32(value),
            },
        },
        (M::Ld, [O::Register(register), O::Direct(address)]) => Form {
            opcode: per_kind(register.kind, 0x1100, 0x2100, 0x3100) | x(*register),
            field: Field::Addr32(address),
        },
        (M::Ld, [O::Register(register), O::Indirect(pointer)]) => {
            if pointer.kind != RegisterKind::Double {
                return Err(shape_error());
            }

            Form {
                opcode: per_kind(register.kind, 0x1200, 0x2200, 0x3200)
                    | x(*register)
                    | y(*pointer),
                field: Field::None,
            }
        }
        (M::Ldq, [O::Register(register), O::Direct(address)]) => Form {
            opcode: per_kind(register.kind, 0x1300, 0x2300, 0x3300) | x(*register),
            field: Field::Quick16(address),
        },
        (M::Ldp, [O::Register(register), O::Direct(address)]) => {
            if register.kind != RegisterKind::Low {
                return Err(shape_error());
            }

            Form { opcode: 0x1500 | x(*register), field: Field::Port8(address) }
        }

        // Stores.
        (M::St, [O::Direct(address), O::Register(register)]) => Form {
            opcode: per_kind(register.kind, 0x1600, 0x2600, 0x3600) | x(*register),
            field: Field::Addr32(address),
        },
        (M::St, [O::Indirect(pointer), O::Register(register)]) => {
            if pointer.kind != RegisterKind::Double {
                return Err(shape_error());
            }

            Form {
                opcode: per_kind(register.kind, 0x1700, 0x2700, 0x3700)
                    | x(*register)
                    | y(*pointer),
                field: Field::None,
            }
        }
        (M::Stq, [O::Direct(address), O::Register(register)]) => Form {
            opcode: per_kind(register.kind, 0x1800, 0x2800, 0x3800) | x(*register),
            field: Field::Quick16(address),
        },
        (M::Stp, [O::Direct(address), O::Register(register)]) => {
            if register.kind != RegisterKind::Low {
                return Err(shape_error());
            }

            Form { opcode: 0x1900 | x(*register), field: Field::Port8(address) }
        }

        (M::Mv, [O::Register(destination), O::Register(source)]) => {
            if destination.kind != source.kind {
                return Err(shape_error());
            }

            Form {
                opcode: per_kind(destination.kind, 0x1a00, 0x2a00, 0x3a00)
                    | x(*destination)
                    | y(*source),
                field: Field::None,
            }
        }

        // Control flow.
        (M::Jmp, [O::Condition(condition), O::Immediate(target)]) => {
            Form { opcode: 0x4000 | c(*condition), field: Field::Addr32(target) }
        }
        (M::Jmp, [O::Condition(condition), O::Indirect(pointer)]) => {
            if pointer.kind != RegisterKind::Double {
                return Err(shape_error());
            }

            Form { opcode: 0x4100 | c(*condition) | y(*pointer), field: Field::None }
        }
        (M::Jpb, [O::Condition(condition), O::Immediate(target)]) => {
            Form { opcode: 0x4200 | c(*condition), field: Field::Branch(target) }
        }
        (M::Call, [O::Condition(condition), O::Immediate(target)]) => {
            Form { opcode: 0x4300 | c(*condition), field: Field::Addr32(target) }
        }
        (M::Int, [O::Immediate(vector)]) => Form { opcode: 0x4400, field: Field::Vector(vector) },
        (M::Ret, [O::Condition(condition)]) => Form::fixed(0x4500 | c(*condition)),
        (M::Reti, [O::Condition(condition)]) => Form::fixed(0x4600 | c(*condition)),

        // ALU, register and immediate forms. The first operand must be the
        // accumulator of the matching width.
        (
            M::Add | M::Adc | M::Sub | M::Sbc | M::Cmp | M::Cpc | M::And | M::Or | M::Xor,
            [O::Register(accumulator), source],
        ) => {
            if accumulator.index != 0 {
                return Err(Error::AccumulatorViolation(
                    mnemonic.to_string(),
                    accumulator.kind.accumulator_name().to_owned(),
                ));
            }

            let width = accumulator.kind.width_nibble() << 4;

            match source {
                O::Register(source) => {
                    if source.kind != accumulator.kind {
                        return Err(shape_error());
                    }

                    let base = match mnemonic {
                        M::Add => 0x5100,
                        M::Adc => 0x5200,
                        M::Sub => 0x5300,
                        M::Sbc => 0x5400,
                        M::Cmp => 0x5500,
                        M::Cpc => 0x5600,
                        M::And => 0x7100,
                        M::Or => 0x7200,
                        M::Xor => 0x7300,
                        _ => unreachable!(),
                    };

                    Form { opcode: base | width | y(*source), field: Field::None }
                }

                O::Immediate(value) => {
                    let base = match mnemonic {
                        M::Add => 0x6100,
                        M::Adc => 0x6200,
                        M::Sub => 0x6300,
                        M::Sbc => 0x6400,
                        M::Cmp => 0x6500,
                        M::Cpc => 0x6600,
                        M::And => 0x7500,
                        M::Or => 0x7600,
                        M::Xor => 0x7700,
                        _ => unreachable!(),
                    };

                    Form {
                        opcode: base | width,
                        field: match accumulator.kind {
                            RegisterKind::Low => Field::Imm8(value),
                            RegisterKind::Word => Field::Imm16(value),
                            RegisterKind::Double => Field::Imm32(value),
                        },
                    }
                }

                _ => return Err(shape_error()),
            }
        }

        // Single-register forms. `swap` skips `0x87`, a hole in the CPU's
        // opcode map.
        (
            M::Inc | M::Dec | M::Swap | M::Not | M::Neg | M::Push | M::Pop,
            [O::Register(register)],
        ) => {
            let base = match mnemonic {
                M::Inc => per_kind(register.kind, 0x8000, 0x8100, 0x8200),
                M::Dec => per_kind(register.kind, 0x8300, 0x8400, 0x8500),
                M::Swap => per_kind(register.kind, 0x8600, 0x8800, 0x8900),
                M::Not => per_kind(register.kind, 0x8a00, 0x8b00, 0x8c00),
                M::Neg => per_kind(register.kind, 0x8d00, 0x8e00, 0x8f00),
                M::Push => per_kind(register.kind, 0x9000, 0x9100, 0x9200),
                M::Pop => per_kind(register.kind, 0x9400, 0x9500, 0x9600),
                _ => unreachable!(),
            };

            Form::fixed(base | x(*register))
        }

        // Bit operations, on 8-bit registers only.
        (M::Bit | M::Set | M::Res, [O::Immediate(bit), O::Register(register)]) => {
            if register.kind != RegisterKind::Low {
                return Err(shape_error());
            }

            let base = match mnemonic {
                M::Bit => 0xa000,
                M::Set => 0xa100,
                M::Res => 0xa200,
                _ => unreachable!(),
            };

            Form { opcode: base | x(*register), field: Field::BitNumber(bit) }
        }

        // Shifts and rotates, by one.
        (M::Sla | M::Sra | M::Srl | M::Rl | M::Rr, [O::Register(register)]) => {
            let base = match mnemonic {
                M::Sla => 0xb000,
                M::Sra => 0xb100,
                M::Srl => 0xb200,
                M::Rl => 0xb300,
                M::Rr => 0xb400,
                _ => unreachable!(),
            };

            Form {
                opcode: base | (register.kind.width_nibble() << 4) | y(*register),
                field: Field::None,
            }
        }

        _ => return Err(shape_error()),
    })
}

/// Size, in bytes, of the instruction a statement will encode to. The size
/// depends on the mnemonic and the operand shapes only, which is what makes
/// the layout pass possible before expressions resolve.
pub(crate) fn instruction_size(mnemonic: &str, operands: &[Operand]) -> Result<u32, Error> {
    let mnemonic = Mnemonic::from_name(mnemonic)?;

    Ok(select_form(mnemonic, operands)?.length())
}

/// Encode one instruction placed at `address`.
///
/// `evaluate` reduces operand expressions; a [`Value::Symbolic`] outcome
/// turns the field into a zero placeholder plus a [`FieldRelocation`] of the
/// matching kind. Fields that live inside the opcode (interrupt vectors, bit
/// numbers) cannot be relocated and require a known value.
pub(crate) fn encode(
    mnemonic: &str,
    operands: &[Operand],
    address: Address,
    evaluate: &dyn Fn(&Expression) -> Result<Value, Error>,
) -> Result<Encoded, Error> {
    let mnemonic = Mnemonic::from_name(mnemonic)?;
    let form = select_form(mnemonic, operands)?;

    let mut opcode = form.opcode;
    let mut extra = Vec::with_capacity(form.field.extra_bytes() as usize);
    let mut relocation = None;

    let known = |expression: &Expression| match evaluate(expression)? {
        Value::Known(value) => Ok(value),
        // There is no relocation kind for a field inside the opcode.
        Value::Symbolic { symbol, .. } => Err(Error::UndefinedSymbol(symbol)),
    };

    let narrow_addend = |addend: i32| {
        i16::try_from(addend)
            .map(|_| addend)
            .map_err(|_| Error::ValueOutOfRange("a relocation addend".to_owned(), addend.into()))
    };

    match form.field {
        Field::None => {}

        Field::Vector(expression) => {
            let vector = known(expression)?;

            if !(0..=31).contains(&vector) {
                return Err(Error::ValueOutOfRange("an interrupt vector".to_owned(), vector));
            }

            opcode |= vector as u16;
        }

        Field::BitNumber(expression) => {
            let bit = known(expression)?;

            if !(0..=7).contains(&bit) {
                return Err(Error::ValueOutOfRange("a bit number".to_owned(), bit));
            }

            opcode |= bit as u16;
        }

        Field::Imm8(expression) => match evaluate(expression)? {
            Value::Known(value) => {
                if !(-0x80..=0xff).contains(&value) {
                    return Err(Error::ValueOutOfRange("an 8-bit immediate".to_owned(), value));
                }

                extra.push(value as u8);
            }
            Value::Symbolic { symbol, addend } => {
                extra.push(0);
                relocation = Some(FieldRelocation {
                    r#type: RelocationType::Abs8,
                    offset: 2,
                    symbol,
                    addend: narrow_addend(addend)?,
                });
            }
        },

        Field::Imm16(expression) => match evaluate(expression)? {
            Value::Known(value) => {
                if !(-0x8000..=0xffff).contains(&value) {
                    return Err(Error::ValueOutOfRange("a 16-bit immediate".to_owned(), value));
                }

                extra.extend_from_slice(&(value as u16).to_le_bytes());
            }
            Value::Symbolic { symbol, addend } => {
                extra.extend_from_slice(&[0, 0]);
                relocation = Some(FieldRelocation {
                    r#type: RelocationType::Abs16,
                    offset: 2,
                    symbol,
                    addend: narrow_addend(addend)?,
                });
            }
        },

        Field::Imm32(expression) | Field::Addr32(expression) => match evaluate(expression)? {
            Value::Known(value) => {
                if !(-0x8000_0000..=0xffff_ffff).contains(&value) {
                    return Err(Error::ValueOutOfRange("a 32-bit value".to_owned(), value));
                }

                extra.extend_from_slice(&(value as u32).to_le_bytes());
            }
            Value::Symbolic { symbol, addend } => {
                // The 4-byte placeholder doubles as the wide addend carrier.
                extra.extend_from_slice(&addend.to_le_bytes());
                relocation = Some(FieldRelocation {
                    r#type: RelocationType::Abs32,
                    offset: 2,
                    symbol,
                    addend,
                });
            }
        },

        Field::Quick16(expression) => match evaluate(expression)? {
            Value::Known(value) => {
                let quick = value as u32;

                if !(0..=0xffff_ffff).contains(&value) || quick >> 16 != 0xffff {
                    return Err(Error::ValueOutOfRange("a quick RAM address".to_owned(), value));
                }

                extra.extend_from_slice(&((quick & 0xffff) as u16).to_le_bytes());
            }
            Value::Symbolic { symbol, addend } => {
                extra.extend_from_slice(&[0, 0]);
                relocation = Some(FieldRelocation {
                    r#type: RelocationType::Quick16,
                    offset: 2,
                    symbol,
                    addend: narrow_addend(addend)?,
                });
            }
        },

        Field::Port8(expression) => match evaluate(expression)? {
            Value::Known(value) => {
                let port = value as u32;

                if !(0..=0xffff_ffff).contains(&value) || port >> 8 != 0xff_ffff {
                    return Err(Error::ValueOutOfRange("an I/O port address".to_owned(), value));
                }

                extra.push((port & 0xff) as u8);
            }
            Value::Symbolic { symbol, addend } => {
                extra.push(0);
                relocation = Some(FieldRelocation {
                    r#type: RelocationType::Port8,
                    offset: 2,
                    symbol,
                    addend: narrow_addend(addend)?,
                });
            }
        },

        Field::Branch(expression) => match evaluate(expression)? {
            Value::Known(target) => {
                if !(0..=0xffff_ffff).contains(&target) {
                    return Err(Error::ValueOutOfRange("a branch target".to_owned(), target));
                }

                // The displacement is measured from the byte after the
                // instruction.
                let origin = i64::from(address.0) + 4;
                let displacement = target - origin;

                if !(-0x8000..=0x7fff).contains(&displacement) {
                    return Err(Error::BranchOutOfRange(displacement));
                }

                extra.extend_from_slice(&(displacement as i16).to_le_bytes());
            }
            Value::Symbolic { symbol, addend } => {
                extra.extend_from_slice(&[0, 0]);
                relocation = Some(FieldRelocation {
                    r#type: RelocationType::Rel16,
                    offset: 2,
                    symbol,
                    addend: narrow_addend(addend)?,
                });
            }
        },
    }

    let mut bytes = opcode.to_le_bytes().to_vec();
    bytes.append(&mut extra);

    Ok(Encoded { bytes, relocation })
}

/// The shape of one decoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// A register of the given kind.
    Register(RegisterKind),
    /// An immediate expression.
    Immediate,
    /// A direct address.
    Direct,
    /// An indirect register.
    Indirect,
    /// A condition code.
    Condition,
}

impl Shape {
    /// The shape of an operand, as the encoder dispatches on it.
    pub fn of(operand: &Operand) -> Self {
        match operand {
            Operand::Register(register) => Self::Register(register.kind),
            Operand::Immediate(_) => Self::Immediate,
            Operand::Direct(_) => Self::Direct,
            Operand::Indirect(_) => Self::Indirect,
            Operand::Condition(_) => Self::Condition,
        }
    }
}

/// A decoded instruction: the mnemonic, the operand shapes, and the total
/// length in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// The mnemonic.
    pub mnemonic: Mnemonic,
    /// The operand shapes, in source order.
    pub shapes: Vec<Shape>,
    /// Total instruction length, including the opcode.
    pub length: usize,
}

fn width_kind(nibble: u16) -> Option<RegisterKind> {
    match nibble {
        0 => Some(RegisterKind::Low),
        1 => Some(RegisterKind::Word),
        2 => Some(RegisterKind::Double),
        _ => None,
    }
}

/// Decode the instruction starting at `bytes[0]`, returning its mnemonic,
/// operand shapes and length. This is the stub the round-trip tests drive;
/// it recognises exactly the forms the encoder produces.
pub fn decode(bytes: &[u8]) -> Option<DecodedInstruction> {
    use Mnemonic as M;
    use RegisterKind as K;
    use Shape as S;

    let opcode = u16::from_le_bytes([*bytes.first()?, *bytes.get(1)?]);
    let group = opcode >> 8;
    let x = (opcode >> 4) & 0xf;
    let y = opcode & 0xf;

    let load_kind = |base: u16| match base {
        0x10..=0x1f => Some(K::Low),
        0x20..=0x2f => Some(K::Word),
        0x30..=0x3f => Some(K::Double),
        _ => None,
    };

    let (mnemonic, shapes, length) = match group {
        0x00 if opcode == 0x0000 => (M::Nop, vec![], 2),
        0x01 if opcode == 0x0100 => (M::Halt, vec![], 2),
        0x02 if opcode == 0x0200 => (M::Di, vec![], 2),
        0x03 if opcode == 0x0300 => (M::Ei, vec![], 2),

        0x10 | 0x20 | 0x30 if y == 0 => {
            let kind = load_kind(group)?;
            let length = match kind {
                K::Low => 3,
                K::Word => 4,
                K::Double => 6,
            };

            (M::Ld, vec![S::Register(kind), S::Immediate], length)
        }
        0x11 | 0x21 | 0x31 if y == 0 => {
            (M::Ld, vec![S::Register(load_kind(group)?), S::Direct], 6)
        }
        0x12 | 0x22 | 0x32 => (M::Ld, vec![S::Register(load_kind(group)?), S::Indirect], 2),
        0x13 | 0x23 | 0x33 if y == 0 => {
            (M::Ldq, vec![S::Register(load_kind(group)?), S::Direct], 4)
        }
        0x15 if y == 0 => (M::Ldp, vec![S::Register(K::Low), S::Direct], 3),

        0x16 | 0x26 | 0x36 if y == 0 => {
            (M::St, vec![S::Direct, S::Register(load_kind(group)?)], 6)
        }
        0x17 | 0x27 | 0x37 => (M::St, vec![S::Indirect, S::Register(load_kind(group)?)], 2),
        0x18 | 0x28 | 0x38 if y == 0 => {
            (M::Stq, vec![S::Direct, S::Register(load_kind(group)?)], 4)
        }
        0x19 if y == 0 => (M::Stp, vec![S::Direct, S::Register(K::Low)], 3),

        0x1a | 0x2a | 0x3a => {
            let kind = load_kind(group)?;

            (M::Mv, vec![S::Register(kind), S::Register(kind)], 2)
        }

        0x40 if y == 0 && x <= 6 => (M::Jmp, vec![S::Condition, S::Immediate], 6),
        0x41 if x <= 6 => (M::Jmp, vec![S::Condition, S::Indirect], 2),
        0x42 if y == 0 && x <= 6 => (M::Jpb, vec![S::Condition, S::Immediate], 4),
        0x43 if y == 0 && x <= 6 => (M::Call, vec![S::Condition, S::Immediate], 6),
        0x44 if opcode & 0xff <= 31 => (M::Int, vec![S::Immediate], 2),
        0x45 if y == 0 && x <= 6 => (M::Ret, vec![S::Condition], 2),
        0x46 if y == 0 && x <= 6 => (M::Reti, vec![S::Condition], 2),

        0x51..=0x56 | 0x71..=0x73 => {
            let kind = width_kind(x)?;
            let mnemonic = match group {
                0x51 => M::Add,
                0x52 => M::Adc,
                0x53 => M::Sub,
                0x54 => M::Sbc,
                0x55 => M::Cmp,
                0x56 => M::Cpc,
                0x71 => M::And,
                0x72 => M::Or,
                _ => M::Xor,
            };

            (mnemonic, vec![S::Register(kind), S::Register(kind)], 2)
        }
        0x61..=0x66 | 0x75..=0x77 if y == 0 => {
            let kind = width_kind(x)?;
            let mnemonic = match group {
                0x61 => M::Add,
                0x62 => M::Adc,
                0x63 => M::Sub,
                0x64 => M::Sbc,
                0x65 => M::Cmp,
                0x66 => M::Cpc,
                0x75 => M::And,
                0x76 => M::Or,
                _ => M::Xor,
            };
            let length = match kind {
                K::Low => 3,
                K::Word => 4,
                K::Double => 6,
            };

            (mnemonic, vec![S::Register(kind), S::Immediate], length)
        }

        0x80..=0x96 if y == 0 && group != 0x87 && group != 0x93 => {
            let (mnemonic, kind) = match group {
                0x80 => (M::Inc, K::Low),
                0x81 => (M::Inc, K::Word),
                0x82 => (M::Inc, K::Double),
                0x83 => (M::Dec, K::Low),
                0x84 => (M::Dec, K::Word),
                0x85 => (M::Dec, K::Double),
                0x86 => (M::Swap, K::Low),
                0x88 => (M::Swap, K::Word),
                0x89 => (M::Swap, K::Double),
                0x8a => (M::Not, K::Low),
                0x8b => (M::Not, K::Word),
                0x8c => (M::Not, K::Double),
                0x8d => (M::Neg, K::Low),
                0x8e => (M::Neg, K::Word),
                0x8f => (M::Neg, K::Double),
                0x90 => (M::Push, K::Low),
                0x91 => (M::Push, K::Word),
                0x92 => (M::Push, K::Double),
                0x94 => (M::Pop, K::Low),
                0x95 => (M::Pop, K::Word),
                _ => (M::Pop, K::Double),
            };

            (mnemonic, vec![S::Register(kind)], 2)
        }

        0xa0..=0xa2 if y <= 7 => {
            let mnemonic = match group {
                0xa0 => M::Bit,
                0xa1 => M::Set,
                _ => M::Res,
            };

            (mnemonic, vec![S::Immediate, S::Register(K::Low)], 2)
        }

        0xb0..=0xb4 => {
            let kind = width_kind(x)?;
            let mnemonic = match group {
                0xb0 => M::Sla,
                0xb1 => M::Sra,
                0xb2 => M::Srl,
                0xb3 => M::Rl,
                _ => M::Rr,
            };

            (mnemonic, vec![S::Register(kind)], 2)
        }

        _ => return None,
    };

    if bytes.len() < length {
        return None;
    }

    Some(DecodedInstruction { mnemonic, shapes, length })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Statement;

    fn fold(expression: &Expression) -> Result<Value, Error> {
        expression.reduce(&())
    }

    fn encode_at(statement: &Statement, address: u32) -> Result<Encoded, Error> {
        let Statement::Instruction { mnemonic, operands } = statement else {
            panic!("not an instruction");
        };

        encode(mnemonic, operands, Address(address), &fold)
    }

    fn instruction(mnemonic: &str, operands: Vec<Operand>) -> Statement {
        Statement::instruction(mnemonic, operands)
    }

    #[test]
    fn test_immediate_load_is_little_endian() {
        let encoded = encode_at(
            &instruction(
                "ld",
                vec![
                    Operand::Register(Register::double(0)),
                    Operand::Immediate(Expression::number(0xdead_beef)),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x00, 0x30, 0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(encoded.relocation, None);
    }

    #[test]
    fn test_top_bit_immediate_load() {
        let encoded = encode_at(
            &instruction(
                "ld",
                vec![
                    Operand::Register(Register::double(3)),
                    Operand::Immediate(Expression::number(0x8000_0000)),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x30, 0x30, 0x00, 0x00, 0x00, 0x80]);
    }

    #[test]
    fn test_register_nibbles() {
        let encode_simple = |mnemonic: &str, operands: Vec<Operand>| {
            encode_at(&instruction(mnemonic, operands), 0x2000).unwrap().bytes
        };

        // `ld d3, [d5]` — destination in the high nibble, pointer in the low.
        assert_eq!(
            encode_simple(
                "ld",
                vec![
                    Operand::Register(Register::double(3)),
                    Operand::Indirect(Register::double(5)),
                ],
            ),
            [0x35, 0x32],
        );

        // `add l0, l3`.
        assert_eq!(
            encode_simple(
                "add",
                vec![
                    Operand::Register(Register::low(0)),
                    Operand::Register(Register::low(3)),
                ],
            ),
            [0x03, 0x51],
        );

        // `and l0, l3`.
        assert_eq!(
            encode_simple(
                "and",
                vec![
                    Operand::Register(Register::low(0)),
                    Operand::Register(Register::low(3)),
                ],
            ),
            [0x03, 0x71],
        );

        // `bit 3, l2`.
        assert_eq!(
            encode_simple(
                "bit",
                vec![
                    Operand::Immediate(Expression::number(3)),
                    Operand::Register(Register::low(2)),
                ],
            ),
            [0x23, 0xa0],
        );

        // `swap d4` — the double form uses `0x89`, leaving `0x87` unused.
        assert_eq!(
            encode_simple("swap", vec![Operand::Register(Register::double(4))]),
            [0x40, 0x89],
        );

        // `int 31`.
        assert_eq!(
            encode_simple("int", vec![Operand::Immediate(Expression::number(31))]),
            [0x1f, 0x44],
        );

        // `ret zc`.
        assert_eq!(
            encode_simple("ret", vec![Operand::Condition(Condition::ZeroClear)]),
            [0x20, 0x45],
        );
    }

    #[test]
    fn test_quick_and_port_windows() {
        // `ldq d1, [0xffff0010]` encodes the window offset.
        let encoded = encode_at(
            &instruction(
                "ldq",
                vec![
                    Operand::Register(Register::double(1)),
                    Operand::Direct(Expression::number(0xffff_0010)),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x10, 0x33, 0x10, 0x00]);

        // `ldp l2, [0xffffff05]`.
        let encoded = encode_at(
            &instruction(
                "ldp",
                vec![
                    Operand::Register(Register::low(2)),
                    Operand::Direct(Expression::number(0xffff_ff05)),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x20, 0x15, 0x05]);

        // An address outside the window is rejected.
        assert!(matches!(
            encode_at(
                &instruction(
                    "ldq",
                    vec![
                        Operand::Register(Register::double(1)),
                        Operand::Direct(Expression::number(0x2000)),
                    ],
                ),
                0x2000,
            ),
            Err(Error::ValueOutOfRange(..)),
        ));
    }

    #[test]
    fn test_branch_displacement() {
        let jpb = |target: i64, address: u32| {
            encode_at(
                &instruction(
                    "jpb",
                    vec![
                        Operand::Condition(Condition::None),
                        Operand::Immediate(Expression::number(target)),
                    ],
                ),
                address,
            )
        };

        // Forward by 2, from the byte after the instruction.
        assert_eq!(jpb(0x2006, 0x2000).unwrap().bytes, [0x00, 0x42, 0x02, 0x00]);

        // The extremes of the signed 16-bit range encode.
        assert_eq!(jpb(0x2004 + 0x7fff, 0x2000).unwrap().bytes, [0x00, 0x42, 0xff, 0x7f]);
        assert_eq!(jpb(0x2004 - 0x8000, 0x2000).unwrap().bytes, [0x00, 0x42, 0x00, 0x80]);

        // One byte further is a hard error.
        assert!(matches!(jpb(0x2004 + 0x8000, 0x2000), Err(Error::BranchOutOfRange(0x8000))));
        assert!(matches!(jpb(0x2004 - 0x8001, 0x2000), Err(Error::BranchOutOfRange(-0x8001))));
    }

    #[test]
    fn test_unresolved_operands_become_relocations() {
        // `call nc, helper` leaves a zero-filled address field.
        let encoded = encode_at(
            &instruction(
                "call",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("helper")),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x00, 0x43, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(
            encoded.relocation,
            Some(FieldRelocation {
                r#type: RelocationType::Abs32,
                offset: 2,
                symbol: "helper".to_owned(),
                addend: 0,
            }),
        );

        // A wide addend is carried by the placeholder bytes.
        let encoded = encode_at(
            &instruction(
                "call",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::binary(
                        crate::BinaryOperator::Add,
                        Expression::symbol("helper"),
                        Expression::number(0x12345),
                    )),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x00, 0x43, 0x45, 0x23, 0x01, 0x00]);
        assert_eq!(encoded.relocation.unwrap().addend, 0x12345);

        // `jpb nc, helper` requests a PC-relative patch.
        let encoded = encode_at(
            &instruction(
                "jpb",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("helper")),
                ],
            ),
            0x2000,
        )
        .unwrap();

        assert_eq!(encoded.bytes, [0x00, 0x42, 0x00, 0x00]);
        assert_eq!(encoded.relocation.unwrap().r#type, RelocationType::Rel16);

        // An interrupt vector cannot be deferred to link time.
        assert!(matches!(
            encode_at(
                &instruction("int", vec![Operand::Immediate(Expression::symbol("vector"))]),
                0x2000,
            ),
            Err(Error::UndefinedSymbol(_)),
        ));
    }

    #[test]
    fn test_accumulator_constraint() {
        assert!(matches!(
            encode_at(
                &instruction(
                    "add",
                    vec![
                        Operand::Register(Register::low(1)),
                        Operand::Register(Register::low(2)),
                    ],
                ),
                0x2000,
            ),
            Err(Error::AccumulatorViolation(..)),
        ));

        // The 32-bit form requires `d0`, not `w0`.
        assert!(matches!(
            encode_at(
                &instruction(
                    "xor",
                    vec![
                        Operand::Register(Register::word(0)),
                        Operand::Register(Register::double(1)),
                    ],
                ),
                0x2000,
            ),
            Err(Error::OperandShape(_)),
        ));
    }

    #[test]
    fn test_failure_modes() {
        // Unknown mnemonic.
        assert!(matches!(
            encode_at(&instruction("jbp", vec![]), 0x2000),
            Err(Error::UnknownMnemonic(name)) if name == "jbp",
        ));

        // Operand shape mismatch.
        assert!(matches!(
            encode_at(
                &instruction("nop", vec![Operand::Register(Register::low(0))]),
                0x2000,
            ),
            Err(Error::OperandShape(_)),
        ));

        // Immediate out of range.
        assert!(matches!(
            encode_at(
                &instruction(
                    "ld",
                    vec![
                        Operand::Register(Register::low(0)),
                        Operand::Immediate(Expression::number(0x1ff)),
                    ],
                ),
                0x2000,
            ),
            Err(Error::ValueOutOfRange(..)),
        ));

        // Interrupt vector out of range.
        assert!(matches!(
            encode_at(
                &instruction("int", vec![Operand::Immediate(Expression::number(32))]),
                0x2000,
            ),
            Err(Error::ValueOutOfRange(..)),
        ));

        // Bit number out of range.
        assert!(matches!(
            encode_at(
                &instruction(
                    "set",
                    vec![
                        Operand::Immediate(Expression::number(8)),
                        Operand::Register(Register::low(0)),
                    ],
                ),
                0x2000,
            ),
            Err(Error::ValueOutOfRange(..)),
        ));
    }

    /// Every (mnemonic, operand-shape) pair of the table: encoding then
    /// decoding the produced bytes yields the same mnemonic and shapes.
    #[test]
    fn test_encoder_table_round_trips_through_decode() {
        use Operand as O;

        let immediate = |value: i64| O::Immediate(Expression::number(value));
        let direct = |value: i64| O::Direct(Expression::number(value));

        let registers =
            [Register::low(5), Register::word(5), Register::double(5)];
        let accumulators =
            [Register::low(0), Register::word(0), Register::double(0)];

        let mut table: Vec<(&str, Vec<Operand>)> = vec![
            ("nop", vec![]),
            ("halt", vec![]),
            ("di", vec![]),
            ("ei", vec![]),
            ("ldp", vec![O::Register(Register::low(1)), direct(0xffff_ff20)]),
            ("stp", vec![direct(0xffff_ff20), O::Register(Register::low(1))]),
            ("jmp", vec![O::Condition(Condition::CarrySet), immediate(0x2400)]),
            ("jmp", vec![O::Condition(Condition::CarrySet), O::Indirect(Register::double(2))]),
            ("jpb", vec![O::Condition(Condition::ZeroSet), immediate(0x2040)]),
            ("call", vec![O::Condition(Condition::None), immediate(0x2400)]),
            ("int", vec![immediate(7)]),
            ("ret", vec![O::Condition(Condition::None)]),
            ("reti", vec![O::Condition(Condition::OverflowClear)]),
            ("bit", vec![immediate(3), O::Register(Register::low(2))]),
            ("set", vec![immediate(0), O::Register(Register::low(15))]),
            ("res", vec![immediate(7), O::Register(Register::low(9))]),
        ];

        for register in registers {
            table.push(("ld", vec![O::Register(register), immediate(0x12)]));
            table.push(("ld", vec![O::Register(register), direct(0x2400)]));
            table.push(("ld", vec![O::Register(register), O::Indirect(Register::double(7))]));
            table.push(("ldq", vec![O::Register(register), direct(0xffff_0040)]));
            table.push(("st", vec![direct(0x2400), O::Register(register)]));
            table.push(("st", vec![O::Indirect(Register::double(7)), O::Register(register)]));
            table.push(("stq", vec![direct(0xffff_0040), O::Register(register)]));
            table.push(("mv", vec![O::Register(register), O::Register(register)]));

            for unary in ["inc", "dec", "swap", "not", "neg", "push", "pop", "sla", "sra", "srl", "rl", "rr"] {
                table.push((unary, vec![O::Register(register)]));
            }
        }

        for accumulator in accumulators {
            let source = Register { kind: accumulator.kind, index: 4 };

            for alu in ["add", "adc", "sub", "sbc", "cmp", "cpc", "and", "or", "xor"] {
                table.push((alu, vec![O::Register(accumulator), O::Register(source)]));
                table.push((alu, vec![O::Register(accumulator), immediate(0x11)]));
            }
        }

        for (mnemonic, operands) in table {
            let encoded = encode(mnemonic, &operands, Address(0x2000), &fold)
                .unwrap_or_else(|error| panic!("`{mnemonic}` failed to encode: {error}"));

            let decoded = decode(&encoded.bytes)
                .unwrap_or_else(|| panic!("`{mnemonic}` failed to decode: {:02x?}", encoded.bytes));

            assert_eq!(decoded.mnemonic, Mnemonic::from_name(mnemonic).unwrap(), "mnemonic of `{mnemonic}`");
            assert_eq!(
                decoded.shapes,
                operands.iter().map(Shape::of).collect::<Vec<_>>(),
                "shapes of `{mnemonic}`",
            );
            assert_eq!(decoded.length, encoded.bytes.len(), "length of `{mnemonic}`");

            // The layout pass arrives at the same size without values.
            assert_eq!(
                instruction_size(mnemonic, &operands).unwrap() as usize,
                encoded.bytes.len(),
                "size of `{mnemonic}`",
            );
        }
    }
}
