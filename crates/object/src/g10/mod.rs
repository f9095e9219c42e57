//! The G10 container formats.
//!
//! This module holds the data model shared by the assembler and the linker
//! (sections, symbols, relocations, segments) and the two binary codecs
//! built on top of it: relocatable objects ([`Object`], magic `G10O`) and
//! executable program images ([`Program`], magic `G10P`). All multi-byte
//! fields are little-endian.

use std::{fmt, io, ops::Add};

use crate::{combinators::*, Input, Number, Read, Result, Write};

mod object;
mod program;
mod relocation;
mod section;
mod symbol;

pub use object::*;
pub use program::*;
pub use relocation::*;
pub use section::*;
pub use symbol::*;

/// An address within the G10 address space.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u32);

impl Address {
    /// Base of the quick RAM window, addressed by 16-bit offsets in
    /// `ldq`/`stq`.
    pub const QUICK_WINDOW_BASE: Self = Self(0xffff_0000);

    /// Base of the I/O port window, addressed by 8-bit offsets in
    /// `ldp`/`stp`.
    pub const PORT_WINDOW_BASE: Self = Self(0xffff_ff00);

    /// Initial stack pointer used when a program does not override it.
    pub const DEFAULT_STACK_POINTER: Self = Self(0xffff_fffc);

    /// `self + offset`, or `None` when the sum leaves the address space.
    pub fn checked_add(self, offset: u32) -> Option<Self> {
        self.0.checked_add(offset).map(Self)
    }

    /// The region this address falls into.
    pub fn region(self) -> Region {
        Region::of(self)
    }
}

impl Read<u32> for Address {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, address) = N::read_u32(input)?;

        Ok((input, Address(address)))
    }
}

impl Write<u32> for Address {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "0x{:08x}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, formatter)
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Address> for u32 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl From<Address> for u64 {
    fn from(value: Address) -> Self {
        value.0.into()
    }
}

impl From<Address> for usize {
    fn from(value: Address) -> Self {
        value.0.try_into().expect("Failed to cast the address from `u32` to `usize`")
    }
}

impl Add<u32> for Address {
    type Output = Self;

    fn add(self, offset: u32) -> Self {
        Self(
            self.0
                .checked_add(offset)
                .ok_or_else(|| format!("`{self} + 0x{offset:x}` has overflowed"))
                .unwrap(),
        )
    }
}

/// A semantic region of the flat 32-bit address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// Program header and tables, `0x0000_0000..=0x0000_0fff`.
    Metadata,
    /// 32 interrupt vectors of 128 bytes each, `0x0000_1000..=0x0000_1fff`.
    Interrupt,
    /// Emitted code and read-only data, `0x0000_2000..=0x7fff_ffff`.
    Rom,
    /// Reserved memory, zero-filled at load, `0x8000_0000..=0xfffe_ffff`.
    Ram,
    /// The 64 KiB quick RAM window below the I/O ports.
    QuickRam,
    /// The 256-byte I/O port window at the top of the address space.
    IoPorts,
}

impl Region {
    /// Classify an address.
    pub fn of(address: Address) -> Self {
        match address.0 {
            0x0000_0000..=0x0000_0fff => Self::Metadata,
            0x0000_1000..=0x0000_1fff => Self::Interrupt,
            0x0000_2000..=0x7fff_ffff => Self::Rom,
            0x8000_0000..=0xfffe_ffff => Self::Ram,
            0xffff_0000..=0xffff_feff => Self::QuickRam,
            0xffff_ff00..=0xffff_ffff => Self::IoPorts,
        }
    }
}

/// A toolchain format version, packed as `0xMMmmPPPP` on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Major version. Readers reject files whose major version differs.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u16,
}

impl Version {
    /// The version written by this toolchain.
    pub const CURRENT: Self = Self { major: 1, minor: 0, patch: 0 };
}

impl Default for Version {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Read for Version {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, version) = N::read_u32(input)?;

        Ok((
            input,
            Self { major: (version >> 24) as u8, minor: (version >> 16) as u8, patch: version as u16 },
        ))
    }
}

impl Write for Version {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(
            (u32::from(self.major) << 24) | (u32::from(self.minor) << 16) | u32::from(self.patch),
        ))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
