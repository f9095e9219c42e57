//! The assembler driver: two passes over a statement stream, one object out.
//!
//! Pass 1 (layout) sizes every statement and binds labels to absolute
//! addresses; pass 2 (emission) encodes bytes with the completed symbol
//! table and records a relocation wherever a reference stays unresolved.
//! The pass structure exists because a forward reference to a label in a
//! section that hasn't been opened yet cannot be sized in one pass.

use bstr::BString;
use g10_object::g10::{
    Address, Object, ObjectFlags, Relocation, RelocationType, SectionRef, Symbol, SymbolBinding,
    SymbolFlags, SymbolType, Version,
};

use crate::{
    encoder, section::SectionBuilder, DataWidth, Error, Expression, Statement, SymbolTable, Value,
};

/// Assembles one translation unit.
#[derive(Debug, Default)]
pub struct Assembler {
    source_name: Option<String>,
}

/// A relocation gathered during emission, still keyed by symbol name.
struct PendingRelocation {
    section_index: usize,
    offset: u32,
    r#type: RelocationType,
    symbol: String,
    addend: i32,
}

impl Assembler {
    /// An assembler with no source name.
    pub fn new() -> Self {
        Self::default()
    }

    /// An assembler that records the translation unit's source name as a
    /// `file` symbol in the object.
    pub fn with_source_name(name: impl Into<String>) -> Self {
        Self { source_name: Some(name.into()) }
    }

    /// Assemble a pre-validated statement stream into an object file.
    ///
    /// Errors are fatal for the unit: no partial object is produced.
    pub fn assemble(&self, statements: &[Statement]) -> Result<Object<'static>, Error> {
        let mut symbols = SymbolTable::new();

        // Pass 1 — layout.
        let mut layout = SectionBuilder::new();

        for statement in statements {
            match statement {
                Statement::Origin(expression) => {
                    layout.switch_origin(expression.evaluate_address(&symbols)?)?;
                }

                Statement::Label(name) => {
                    let address = layout.location()?;
                    let section_index = layout.current_index()?;
                    symbols.define(name, address, section_index)?;
                }

                Statement::Global(name) => symbols.mark(name, SymbolBinding::Global)?,
                Statement::Extern(name) => symbols.mark(name, SymbolBinding::Extern)?,
                Statement::Weak(name) => symbols.mark(name, SymbolBinding::Weak)?,
                Statement::Entry(name) => symbols.mark_entry(name)?,

                Statement::Data { width, values } => {
                    if layout.is_reservation()? {
                        // A reservation participates in the layout, so its
                        // count cannot wait for pass 2.
                        layout.advance(reservation_size(*width, values, &symbols)?)?;
                    } else {
                        layout.advance(width.size() * values.len() as u32)?;
                    }
                }

                Statement::Instruction { mnemonic, operands } => {
                    layout.mark_code()?;
                    layout.advance(encoder::instruction_size(mnemonic, operands)?)?;
                }
            }
        }

        // Pass 2 — emission, with the symbol table complete.
        let mut builder = SectionBuilder::new();
        let mut pending = Vec::new();

        for statement in statements {
            match statement {
                Statement::Origin(expression) => {
                    builder.switch_origin(expression.evaluate_address(&symbols)?)?;
                }

                Statement::Label(_)
                | Statement::Global(_)
                | Statement::Extern(_)
                | Statement::Weak(_)
                | Statement::Entry(_) => {}

                Statement::Data { width, values } => {
                    if builder.is_reservation()? {
                        builder.reserve(reservation_size(*width, values, &symbols)?)?;
                    } else {
                        for value in values {
                            emit_datum(&mut builder, &mut pending, *width, value, &symbols)?;
                        }
                    }
                }

                Statement::Instruction { mnemonic, operands } => {
                    builder.mark_code()?;

                    let address = builder.location()?;
                    let encoded = encoder::encode(mnemonic, operands, address, &|expression| {
                        expression.reduce(&symbols)
                    })?;

                    if let Some(field) = &encoded.relocation {
                        pending.push(PendingRelocation {
                            section_index: builder.current_index()?,
                            offset: builder.offset()? + field.offset,
                            r#type: field.r#type,
                            symbol: field.symbol.clone(),
                            addend: field.addend,
                        });
                    }

                    builder.emit(&encoded.bytes)?;
                }
            }
        }

        let sections = builder.finish()?;
        let (mut object_symbols, mut index_of) = symbols.finalize(&sections)?;

        if let Some(source_name) = &self.source_name {
            object_symbols.insert(
                0,
                Symbol {
                    name: BString::from(source_name.as_str()),
                    value: Address(0),
                    section: SectionRef::Absolute,
                    r#type: SymbolType::File,
                    binding: SymbolBinding::Local,
                    flags: SymbolFlags::EMPTY,
                },
            );

            for index in index_of.values_mut() {
                *index += 1;
            }
        }

        let relocations = pending
            .into_iter()
            .map(|pending| {
                // A name that is neither defined here nor declared `extern`
                // has nothing to relocate against.
                let symbol_index = *index_of
                    .get(&pending.symbol)
                    .ok_or_else(|| Error::UndefinedSymbol(pending.symbol.clone()))?;

                Ok(Relocation {
                    offset: Address(pending.offset),
                    symbol_index,
                    section_index: pending.section_index as u32,
                    r#type: pending.r#type,
                    addend: pending.addend,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let object = Object {
            version: Version::CURRENT,
            flags: ObjectFlags::EMPTY,
            sections,
            symbols: object_symbols,
            relocations,
        };

        object.validate().map_err(Error::Validation)?;

        Ok(object)
    }
}

/// The size of a `byte N`/`word N`/`dword N` reservation, in bytes.
fn reservation_size(
    width: DataWidth,
    values: &[Expression],
    symbols: &SymbolTable,
) -> Result<u32, Error> {
    let [count] = values else {
        return Err(Error::OperandShape(directive_name(width).to_owned()));
    };

    let count = count.evaluate(symbols)?;

    u32::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(width.size()))
        .ok_or_else(|| Error::ValueOutOfRange("a reservation count".to_owned(), count))
}

fn directive_name(width: DataWidth) -> &'static str {
    match width {
        DataWidth::Byte => "byte",
        DataWidth::Word => "word",
        DataWidth::Dword => "dword",
    }
}

/// Emit one data directive operand, little-endian, recording a relocation
/// when it doesn't fold to a constant.
fn emit_datum(
    builder: &mut SectionBuilder,
    pending: &mut Vec<PendingRelocation>,
    width: DataWidth,
    value: &Expression,
    symbols: &SymbolTable,
) -> Result<(), Error> {
    match value.reduce(symbols)? {
        Value::Known(value) => match width {
            DataWidth::Byte => {
                if !(-0x80..=0xff).contains(&value) {
                    return Err(Error::ValueOutOfRange("an 8-bit datum".to_owned(), value));
                }

                builder.emit(&[value as u8])
            }
            DataWidth::Word => {
                if !(-0x8000..=0xffff).contains(&value) {
                    return Err(Error::ValueOutOfRange("a 16-bit datum".to_owned(), value));
                }

                builder.emit(&(value as u16).to_le_bytes())
            }
            DataWidth::Dword => {
                if !(-0x8000_0000..=0xffff_ffff).contains(&value) {
                    return Err(Error::ValueOutOfRange("a 32-bit datum".to_owned(), value));
                }

                builder.emit(&(value as u32).to_le_bytes())
            }
        },

        Value::Symbolic { symbol, addend } => {
            let (r#type, placeholder) = match width {
                DataWidth::Byte => (RelocationType::Abs8, vec![0]),
                DataWidth::Word => (RelocationType::Abs16, vec![0, 0]),
                // The 4-byte placeholder doubles as the wide addend carrier.
                DataWidth::Dword => (RelocationType::Abs32, addend.to_le_bytes().to_vec()),
            };

            if r#type != RelocationType::Abs32 && i16::try_from(addend).is_err() {
                return Err(Error::ValueOutOfRange(
                    "a relocation addend".to_owned(),
                    addend.into(),
                ));
            }

            pending.push(PendingRelocation {
                section_index: builder.current_index()?,
                offset: builder.offset()?,
                r#type,
                symbol,
                addend,
            });

            builder.emit(&placeholder)
        }
    }
}

#[cfg(test)]
mod tests {
    use g10_object::g10::SectionType;

    use super::*;
    use crate::{Condition, Operand, Register};

    fn origin(base: i64) -> Statement {
        Statement::Origin(Expression::number(base))
    }

    fn label(name: &str) -> Statement {
        Statement::Label(name.to_owned())
    }

    fn nop() -> Statement {
        Statement::instruction("nop", vec![])
    }

    fn data(width: DataWidth, values: Vec<i64>) -> Statement {
        Statement::Data { width, values: values.into_iter().map(Expression::number).collect() }
    }

    #[test]
    fn test_nop_run() {
        let mut statements = vec![origin(0x2000)];
        statements.extend((0..8).map(|_| nop()));

        let object = Assembler::new().assemble(&statements).unwrap();

        assert_eq!(object.sections.len(), 1);
        assert_eq!(object.sections[0].r#type, SectionType::Code);
        assert_eq!(object.sections[0].virtual_address, Address(0x2000));
        assert_eq!(object.sections[0].size(), 16);
        assert!(object.sections[0].data.iter().all(|byte| *byte == 0));
        assert!(object.relocations.is_empty());
    }

    #[test]
    fn test_immediate_load() {
        let statements = vec![
            origin(0x2000),
            Statement::instruction(
                "ld",
                vec![
                    Operand::Register(Register::double(0)),
                    Operand::Immediate(Expression::number(0xdead_beef)),
                ],
            ),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();

        assert_eq!(&object.sections[0].data[..], [0x00, 0x30, 0xef, 0xbe, 0xad, 0xde]);
    }

    #[test]
    fn test_forward_branch() {
        let statements = vec![
            origin(0x2000),
            label("start"),
            Statement::instruction(
                "jpb",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("target")),
                ],
            ),
            nop(),
            label("target"),
            nop(),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();

        // Opcode `0x4200`, displacement +2, and no relocation: the target
        // resolved within the unit.
        assert_eq!(&object.sections[0].data[..4], [0x00, 0x42, 0x02, 0x00]);
        assert!(object.relocations.is_empty());

        // `target` sits after the 4-byte branch and the 2-byte nop.
        let target = object.symbols.iter().find(|symbol| symbol.name == "target").unwrap();
        assert_eq!(target.value, Address(0x2006));
    }

    #[test]
    fn test_data_directives_are_little_endian() {
        let statements = vec![
            origin(0x3000),
            data(DataWidth::Dword, vec![0x1234_5678]),
            data(DataWidth::Word, vec![0xaabb]),
            data(DataWidth::Byte, vec![0x10, 0x20]),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();

        assert_eq!(object.sections[0].r#type, SectionType::Data);
        assert_eq!(
            &object.sections[0].data[..],
            [0x78, 0x56, 0x34, 0x12, 0xbb, 0xaa, 0x10, 0x20],
        );
    }

    #[test]
    fn test_forward_reference_in_data() {
        let statements = vec![
            origin(0x2000),
            Statement::Data {
                width: DataWidth::Dword,
                values: vec![Expression::symbol("target")],
            },
            label("target"),
            nop(),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();

        // `target` lands at 0x2004, after the dword.
        assert_eq!(&object.sections[0].data[..4], [0x04, 0x20, 0x00, 0x00]);
        assert!(object.relocations.is_empty());
    }

    #[test]
    fn test_reservations_emit_no_data() {
        let statements = vec![
            origin(0x8000_0000),
            label("buffer"),
            data(DataWidth::Byte, vec![64]),
            data(DataWidth::Word, vec![8]),
            data(DataWidth::Dword, vec![2]),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();

        let section = &object.sections[0];
        assert_eq!(section.r#type, SectionType::Bss);
        assert_eq!(section.size(), 64 + 16 + 8);

        // The reservation reaches the file as a size only.
        let mut bytes = Vec::new();
        object.write(&mut bytes).unwrap();
        let (_, reread) = Object::read::<()>(&bytes).unwrap();
        assert_eq!(reread.sections[0].size(), 88);
        assert_eq!(reread, object);
    }

    #[test]
    fn test_extern_reference_becomes_a_relocation() {
        let statements = vec![
            Statement::Extern("function_b".to_owned()),
            origin(0x2000),
            Statement::Global("function_a".to_owned()),
            label("function_a"),
            Statement::instruction(
                "call",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("function_b")),
                ],
            ),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();

        // Zero-filled address field.
        assert_eq!(&object.sections[0].data[..], [0x00, 0x43, 0x00, 0x00, 0x00, 0x00]);

        let relocation = &object.relocations[0];
        assert_eq!(relocation.r#type, RelocationType::Abs32);
        assert_eq!(relocation.offset, Address(2));
        assert_eq!(relocation.addend, 0);
        assert_eq!(object.symbols[relocation.symbol_index as usize].name, "function_b");
        assert_eq!(
            object.symbols[relocation.symbol_index as usize].binding,
            SymbolBinding::Extern,
        );
    }

    #[test]
    fn test_undeclared_reference_is_rejected() {
        let statements = vec![
            origin(0x2000),
            Statement::instruction(
                "call",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("nowhere")),
                ],
            ),
        ];

        assert!(matches!(
            Assembler::new().assemble(&statements),
            Err(Error::UndefinedSymbol(name)) if name == "nowhere",
        ));
    }

    #[test]
    fn test_statement_before_origin_is_rejected() {
        assert!(matches!(
            Assembler::new().assemble(&[nop()]),
            Err(Error::StatementOutsideSection),
        ));
    }

    #[test]
    fn test_entry_directive_sets_the_flag() {
        let statements = vec![
            Statement::Entry("start".to_owned()),
            origin(0x2000),
            Statement::Global("start".to_owned()),
            label("start"),
            nop(),
        ];

        let object = Assembler::new().assemble(&statements).unwrap();
        let start = object.symbols.iter().find(|symbol| symbol.name == "start").unwrap();

        assert!(start.flags.contains(g10_object::g10::SymbolFlag::Entry));
    }

    #[test]
    fn test_source_name_becomes_a_file_symbol() {
        let statements = vec![
            Statement::Extern("helper".to_owned()),
            origin(0x2000),
            Statement::instruction(
                "jmp",
                vec![
                    Operand::Condition(Condition::None),
                    Operand::Immediate(Expression::symbol("helper")),
                ],
            ),
        ];

        let object = Assembler::with_source_name("main.g10s").assemble(&statements).unwrap();

        assert_eq!(object.symbols[0].r#type, SymbolType::File);
        assert_eq!(object.symbols[0].name, "main.g10s");

        // Relocation indices account for the inserted file symbol.
        let relocation = &object.relocations[0];
        assert_eq!(object.symbols[relocation.symbol_index as usize].name, "helper");
    }

    #[test]
    fn test_overlapping_origins_are_rejected() {
        let statements = vec![
            origin(0x2000),
            data(DataWidth::Dword, vec![0, 0]),
            origin(0x2004),
            data(DataWidth::Dword, vec![0]),
        ];

        assert!(matches!(
            Assembler::new().assemble(&statements),
            Err(Error::SectionOverlap(..)),
        ));
    }
}
