use nom::number::complete::{be_u16, be_u32, be_u8, le_u16, le_u32, le_u8};

use crate::{combinators::*, Input, Result};

/// Byte order of a file.
///
/// The G10 containers are little-endian. The abstraction stays generic so
/// that every parser and writer states its byte order explicitly, and so
/// that tests can exercise both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    // Little endian byte order.
    Little,
    // Big endian byte order.
    Big,
}

/// Trait to parse and emit various numbers in one byte order.
pub trait Number {
    /// Get endianness used by the number parser.
    fn endianness() -> Endianness;

    /// Parse a `u8`.
    fn read_u8<'a, E>(input: Input<'a>) -> Result<'a, u8, E>
    where
        E: ParseError<Input<'a>>;

    /// Parse a `u16`.
    fn read_u16<'a, E>(input: Input<'a>) -> Result<'a, u16, E>
    where
        E: ParseError<Input<'a>>;

    /// Parse a `u32`.
    fn read_u32<'a, E>(input: Input<'a>) -> Result<'a, u32, E>
    where
        E: ParseError<Input<'a>>;

    /// Compile a `u8` down to bytes.
    fn write_u8(value: u8) -> [u8; 1];

    /// Compile a `u16` down to bytes.
    fn write_u16(value: u16) -> [u8; 2];

    /// Compile a `u32` down to bytes.
    fn write_u32(value: u32) -> [u8; 4];
}

/// Type that implements [`Number`] for little-endian numbers.
pub struct LittleEndian;

impl Number for LittleEndian {
    fn endianness() -> Endianness {
        Endianness::Little
    }

    fn read_u8<'a, E>(input: Input<'a>) -> Result<'a, u8, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u8(input)
    }

    fn read_u16<'a, E>(input: Input<'a>) -> Result<'a, u16, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u16(input)
    }

    fn read_u32<'a, E>(input: Input<'a>) -> Result<'a, u32, E>
    where
        E: ParseError<Input<'a>>,
    {
        le_u32(input)
    }

    fn write_u8(value: u8) -> [u8; 1] {
        value.to_le_bytes()
    }

    fn write_u16(value: u16) -> [u8; 2] {
        value.to_le_bytes()
    }

    fn write_u32(value: u32) -> [u8; 4] {
        value.to_le_bytes()
    }
}

/// Type that implements [`Number`] for big-endian numbers.
pub struct BigEndian;

impl Number for BigEndian {
    fn endianness() -> Endianness {
        Endianness::Big
    }

    fn read_u8<'a, E>(input: Input<'a>) -> Result<'a, u8, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u8(input)
    }

    fn read_u16<'a, E>(input: Input<'a>) -> Result<'a, u16, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u16(input)
    }

    fn read_u32<'a, E>(input: Input<'a>) -> Result<'a, u32, E>
    where
        E: ParseError<Input<'a>>,
    {
        be_u32(input)
    }

    fn write_u8(value: u8) -> [u8; 1] {
        value.to_be_bytes()
    }

    fn write_u16(value: u16) -> [u8; 2] {
        value.to_be_bytes()
    }

    fn write_u32(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian() {
        assert_eq!(LittleEndian::endianness(), Endianness::Little);
        assert_eq!(LittleEndian::read_u8::<()>(&42u8.to_le_bytes()), Ok((&[] as &[u8], 42)));
        assert_eq!(LittleEndian::read_u16::<()>(&42u16.to_le_bytes()), Ok((&[] as &[u8], 42)));
        assert_eq!(LittleEndian::read_u32::<()>(&42u32.to_le_bytes()), Ok((&[] as &[u8], 42)));
        assert_eq!(LittleEndian::write_u16(0x1234), [0x34, 0x12]);
        assert_eq!(LittleEndian::write_u32(0x12345678), [0x78, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_big_endian() {
        assert_eq!(BigEndian::endianness(), Endianness::Big);
        assert_eq!(BigEndian::read_u8::<()>(&42u8.to_be_bytes()), Ok((&[] as &[u8], 42)));
        assert_eq!(BigEndian::read_u16::<()>(&42u16.to_be_bytes()), Ok((&[] as &[u8], 42)));
        assert_eq!(BigEndian::read_u32::<()>(&42u32.to_be_bytes()), Ok((&[] as &[u8], 42)));
        assert_eq!(BigEndian::write_u16(0x1234), [0x12, 0x34]);
        assert_eq!(BigEndian::write_u32(0x12345678), [0x12, 0x34, 0x56, 0x78]);
    }
}
