use std::io;

use bstr::BString;
use enumflags2::{bitflags, BitFlags};
use g10_object_macros::ReadWrite;

use super::Address;
use crate::{combinators::*, Input, Number, Read, Result, Write};

/// A symbol: a named address (or special undefined/absolute/common token)
/// defined or referenced within an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Name of the symbol.
    pub name: BString,
    /// The absolute address of the symbol, final at the end of the
    /// assembler's layout pass. Meaningless for extern symbols.
    pub value: Address,
    /// The section in which the symbol is defined, if any.
    pub section: SectionRef,
    /// The symbol type.
    pub r#type: SymbolType,
    /// The symbol binding attribute, i.e. its scope.
    pub binding: SymbolBinding,
    /// Flags.
    pub flags: SymbolFlags,
}

impl Symbol {
    /// Size of a symbol entry in the G10 object format.
    pub(super) const SIZE: u32 = 16;

    /// Read one symbol entry; the name is resolved by the caller from the
    /// returned string table offset.
    pub(super) fn read<'a, N, E>(input: Input<'a>) -> Result<'a, (u32, Self), E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (name_offset, value, section, r#type, binding, flags)) = tuple((
            N::read_u32,
            <Address as Read<u32>>::read::<N, _>,
            <SectionRef as Read<u32>>::read::<N, _>,
            SymbolType::read::<N, _>,
            SymbolBinding::read::<N, _>,
            SymbolFlags::read::<N, _>,
        ))(input)?;

        Ok((input, (name_offset, Self { name: BString::from(""), value, section, r#type, binding, flags })))
    }

    /// Write the 16-byte symbol entry.
    pub(super) fn write<N, B>(&self, name_offset: u32, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(name_offset))?;
        <Address as Write<u32>>::write::<N, _>(&self.value, buffer)?;
        <SectionRef as Write<u32>>::write::<N, _>(&self.section, buffer)?;
        self.r#type.write::<N, _>(buffer)?;
        self.binding.write::<N, _>(buffer)?;
        self.flags.write::<N, _>(buffer)
    }
}

/// A symbol type.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolType {
    /// No type specified.
    NoType = 0x00,
    /// A code label.
    Label = 0x01,
    /// A data object.
    Data = 0x02,
    /// The symbol is associated with a section.
    Section = 0x03,
    /// Source file associated with the object file.
    File = 0x04,
}

/// A symbol binding, i.e. its scope.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolBinding {
    /// The symbol is not visible outside the object file.
    Local = 0x00,
    /// Global symbol, visible to all object files.
    Global = 0x01,
    /// The symbol is defined in another object file.
    Extern = 0x02,
    /// Global scope, but with lower precedence than global symbols.
    Weak = 0x03,
}

/// Symbol flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SymbolFlag {
    /// The symbol is the program entry point.
    Entry = 0x01,
    /// The symbol value is an absolute constant, not an address.
    Absolute = 0x02,
    /// The symbol is a common block.
    Common = 0x04,
}

/// Symbol flags.
pub type SymbolFlags = BitFlags<SymbolFlag>;

impl Read for SymbolFlags {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, flags) = N::read_u16(input)?;
        let flags = Self::from_bits(flags)
            .map_err(|_| Err::Error(E::from_error_kind(input, ErrorKind::Alt)))?;

        Ok((input, flags))
    }
}

impl Write for SymbolFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u16(self.bits()))
    }
}

/// The section a symbol is defined in: either a real section index, or one
/// of the reserved tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionRef {
    /// A valid section index.
    Index(usize),
    /// The symbol is undefined here (extern symbols).
    Undefined,
    /// The symbol value is an absolute constant.
    Absolute,
    /// The symbol is a common block.
    Common,
}

impl SectionRef {
    const UNDEFINED: u32 = 0xffff_ffff;
    const ABSOLUTE: u32 = 0xffff_fffe;
    const COMMON: u32 = 0xffff_fffd;
}

impl Read<u32> for SectionRef {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, index) = N::read_u32(input)?;

        Ok((
            input,
            match index {
                Self::UNDEFINED => Self::Undefined,
                Self::ABSOLUTE => Self::Absolute,
                Self::COMMON => Self::Common,
                index => Self::Index(
                    index
                        .try_into()
                        .expect("Failed to cast the section index from `u32` to `usize`"),
                ),
            },
        ))
    }
}

impl Write<u32> for SectionRef {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(match self {
            Self::Undefined => Self::UNDEFINED,
            Self::Absolute => Self::ABSOLUTE,
            Self::Common => Self::COMMON,
            Self::Index(index) => (*index)
                .try_into()
                .expect("Failed to cast the section index from `usize` to `u32`"),
        }))
    }
}
