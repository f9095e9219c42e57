use std::io;

use g10_object_macros::ReadWrite;

use super::Address;
use crate::{combinators::*, Input, Number, Read, Result, Write};

/// A relocation: a deferred patch instruction. When the target's final
/// address becomes known at link time, the bytes at the patch site are
/// overwritten according to the relocation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Byte offset into the patched section's data where the patch is
    /// applied.
    pub offset: Address,
    /// Index of the target symbol, in the object's symbol table.
    pub symbol_index: u32,
    /// Index of the section being patched, in the object's section table.
    pub section_index: u32,
    /// The relocation kind.
    pub r#type: RelocationType,
    /// Added to the resolved symbol address before encoding.
    ///
    /// The on-disk field is 16 bits. For the 4-byte kinds
    /// ([`RelocationType::Abs32`], [`RelocationType::Rel32`]) the full
    /// addend lives in the patch-site placeholder bytes and this value is
    /// reconstructed from them on read; for the narrower kinds the field is
    /// the addend, sign-extended.
    pub addend: i32,
}

impl Relocation {
    /// Size of a relocation entry in the G10 object format.
    pub(super) const SIZE: u32 = 16;

    pub(super) fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (offset, symbol_index, section_index, r#type, addend)) = tuple((
            <Address as Read<u32>>::read::<N, _>,
            N::read_u32,
            N::read_u32,
            RelocationType::read::<N, _>,
            N::read_u16,
        ))(input)?;

        Ok((
            input,
            Self {
                offset,
                symbol_index,
                section_index,
                r#type,
                addend: (addend as i16).into(),
            },
        ))
    }

    pub(super) fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        <Address as Write<u32>>::write::<N, _>(&self.offset, buffer)?;
        buffer.write_all(&N::write_u32(self.symbol_index))?;
        buffer.write_all(&N::write_u32(self.section_index))?;
        self.r#type.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u16(self.addend as u16))
    }
}

/// The relocation kind: which byte pattern is written at the patch site.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RelocationType {
    /// No relocation; the entry is ignored.
    None = 0x00,
    /// The 4 bytes at the site receive the resolved address.
    Abs32 = 0x01,
    /// The 2 bytes at the site receive the resolved address, which must fit.
    Abs16 = 0x02,
    /// The byte at the site receives the resolved address, which must fit.
    Abs8 = 0x03,
    /// The 4 bytes receive `target − (site + 4)`.
    Rel32 = 0x04,
    /// The 2 bytes receive `target − (site + 2)`, a signed 16-bit offset.
    Rel16 = 0x05,
    /// The byte receives `target − (site + 1)`, a signed 8-bit offset.
    Rel8 = 0x06,
    /// The 2 bytes receive the offset of the target inside the quick RAM
    /// window.
    Quick16 = 0x07,
    /// The byte receives the offset of the target inside the I/O port
    /// window.
    Port8 = 0x08,
}

impl RelocationType {
    /// Width, in bytes, of the field patched by this relocation kind.
    pub fn field_width(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Abs8 | Self::Rel8 | Self::Port8 => 1,
            Self::Abs16 | Self::Rel16 | Self::Quick16 => 2,
            Self::Abs32 | Self::Rel32 => 4,
        }
    }

    /// Whether the addend is carried by the patch-site placeholder bytes
    /// rather than by the 16-bit addend field.
    pub fn addend_in_patch_site(self) -> bool {
        matches!(self, Self::Abs32 | Self::Rel32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocation() {
        #[rustfmt::skip]
        let input: &[u8] = &[
            // Offset.
            0x02, 0x00, 0x00, 0x00,
            // Symbol index.
            0x03, 0x00, 0x00, 0x00,
            // Section index.
            0x00, 0x00, 0x00, 0x00,
            // Type.
            0x01, 0x00,
            // Addend (low 16 bits).
            0xfc, 0xff,
        ];

        let relocation = Relocation {
            offset: Address(2),
            symbol_index: 3,
            section_index: 0,
            r#type: RelocationType::Abs32,
            addend: -4,
        };

        assert_eq!(
            Relocation::read::<crate::LittleEndian, ()>(input),
            Ok((&[] as &[u8], relocation.clone())),
        );

        let mut buffer = Vec::new();
        relocation.write::<crate::LittleEndian, _>(&mut buffer).unwrap();

        assert_eq!(buffer, input);
    }

    #[test]
    fn test_field_width() {
        assert_eq!(RelocationType::None.field_width(), 0);
        assert_eq!(RelocationType::Abs8.field_width(), 1);
        assert_eq!(RelocationType::Rel8.field_width(), 1);
        assert_eq!(RelocationType::Port8.field_width(), 1);
        assert_eq!(RelocationType::Abs16.field_width(), 2);
        assert_eq!(RelocationType::Rel16.field_width(), 2);
        assert_eq!(RelocationType::Quick16.field_width(), 2);
        assert_eq!(RelocationType::Abs32.field_width(), 4);
        assert_eq!(RelocationType::Rel32.field_width(), 4);
    }
}
