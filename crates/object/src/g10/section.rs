use std::{borrow::Cow, io};

use bstr::BString;
use enumflags2::{bitflags, BitFlags};
use g10_object_macros::ReadWrite;

use super::{Address, Region};
use crate::{combinators::*, Input, Number, Read, Result, Write};

/// A section: a contiguous run of bytes with a common base address and type
/// within an object file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section<'a> {
    /// Name of the section.
    pub name: BString,
    /// Base address of the section, from the origin directive that opened it.
    pub virtual_address: Address,
    /// Type of the section.
    pub r#type: SectionType,
    /// Flags.
    pub flags: SectionFlags,
    /// Section bytes.
    ///
    /// For a `bss` section this holds the zero-filled reservation: it has the
    /// reserved length in memory, but it is never written to the object file.
    pub data: Cow<'a, [u8]>,
}

impl<'a> Section<'a> {
    /// Size of the section, in bytes. For `bss`, this is the reservation.
    pub fn size(&self) -> u32 {
        self.data.len().try_into().expect("Section has grown past `u32::MAX` bytes")
    }

    /// One-past-the-end address of the section, computed in `u64` so that a
    /// section reaching the top of the address space doesn't overflow.
    pub fn end(&self) -> u64 {
        u64::from(self.virtual_address.0) + self.data.len() as u64
    }

    /// The region the section is based in.
    pub fn region(&self) -> Region {
        self.virtual_address.region()
    }

    /// Whether the section occupies bytes in the file image.
    pub fn is_load(&self) -> bool {
        matches!(self.r#type, SectionType::Code | SectionType::Data)
    }

    /// Whether two sections' address ranges intersect.
    pub fn overlaps(&self, other: &Self) -> bool {
        u64::from(self.virtual_address.0) < other.end()
            && u64::from(other.virtual_address.0) < self.end()
    }

    /// Detach the section data from the buffer it was parsed from.
    pub fn into_owned(self) -> Section<'static> {
        Section {
            name: self.name,
            virtual_address: self.virtual_address,
            r#type: self.r#type,
            flags: self.flags,
            data: Cow::Owned(self.data.into_owned()),
        }
    }
}

/// Section type.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SectionType {
    /// Mark an unused section header.
    Null = 0x00,
    /// The section contains executable instructions.
    Code = 0x01,
    /// The section contains initialised data.
    Data = 0x02,
    /// The section reserves uninitialised space; it does not occupy any space
    /// in the file and is zero-filled at load (Block Started by Symbol).
    Bss = 0x03,
}

/// Section flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SectionFlag {
    /// The section is allocated in the memory image of the program.
    Allocable = 0x01,
    /// The section is loaded from the file image.
    Loadable = 0x02,
    /// The section contains executable instructions.
    Executable = 0x04,
    /// The section contains writable data.
    Writable = 0x08,
    /// The section might be merged.
    Merge = 0x10,
    /// The section contains null-terminated strings.
    Strings = 0x20,
}

/// Section flags.
pub type SectionFlags = BitFlags<SectionFlag>;

impl Read for SectionFlags {
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

impl Write for SectionFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u16(self.bits()))
    }
}

/// The on-disk section header, 16 bytes.
///
/// The header carries a name offset instead of the name, and a size instead
/// of data; [`Object::read`][super::Object::read] turns headers into
/// [`Section`]s by resolving both against the string table and the section
/// data area.
#[derive(Debug, PartialEq, Eq)]
pub(super) struct SectionHeader {
    pub(super) name_offset: u32,
    pub(super) virtual_address: Address,
    pub(super) size: u32,
    pub(super) r#type: SectionType,
    pub(super) flags: SectionFlags,
}

impl SectionHeader {
    /// Size of `Self` in the G10 object format.
    pub(super) const SIZE: u32 = 16;

    pub(super) fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (name_offset, virtual_address, size, r#type, flags)) = tuple((
            N::read_u32,
            <Address as Read<u32>>::read::<N, _>,
            N::read_u32,
            SectionType::read::<N, _>,
            SectionFlags::read::<N, _>,
        ))(input)?;

        Ok((input, Self { name_offset, virtual_address, size, r#type, flags }))
    }
}

impl<'a> Section<'a> {
    /// Write the 16-byte section header. The data is written separately, by
    /// the object codec.
    pub(super) fn write_header<N, B>(&self, name_offset: u32, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(name_offset))?;
        <Address as Write<u32>>::write::<N, _>(&self.virtual_address, buffer)?;
        buffer.write_all(&N::write_u32(self.size()))?;
        self.r#type.write::<N, _>(buffer)?;
        self.flags.write::<N, _>(buffer)
    }
}
