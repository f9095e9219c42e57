use std::{borrow::Cow, io, result::Result as StdResult};

use bstr::BString;
use enumflags2::{bitflags, BitFlags};
use g10_object_macros::ReadWrite;

use super::{Address, Region, ValidationError, Version};
use crate::{combinators::*, strings, Input, LittleEndian, Number, Read, Result, Write};

/// An executable program image, the sole ABI between the linker and the
/// simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program<'a> {
    /// Format version.
    pub version: Version,
    /// Auxiliary flags (debug, double-speed). The structural flags
    /// (has-entry, has-stack-init, has-info) are derived from the optional
    /// fields below when writing, and folded back into them when reading.
    pub flags: ProgramFlags,
    /// The address execution starts from.
    pub entry_point: Option<Address>,
    /// The initial stack pointer, when the program overrides the default.
    pub initial_stack_pointer: Option<Address>,
    /// The segments, in ascending load-address order.
    pub segments: Vec<Segment<'a>>,
    /// The optional program information record.
    pub info: Option<ProgramInfo>,
}

impl<'a> Program<'a> {
    /// Magic number for a G10 program image.
    pub const MAGIC: &'static [u8; 4] = b"G10P";

    /// Size of the file header in the G10 program format.
    pub const HEADER_SIZE: u32 = 64;

    /// Parse a program image. Structural problems surface here; the semantic
    /// checks live in [`Self::validate`].
    pub fn read<E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        E: ParseError<Input<'a>>,
    {
        let file = input;
        let (input, _magic) = tag(Self::MAGIC)(input)?;

        Self::read_segments::<LittleEndian, E>(file, input)
    }

    fn read_segments<N, E>(file: Input<'a>, input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (
            _input,
            (version, flags, entry, stack_pointer, segment_count, info_offset, info_size, _reserved),
        ) = tuple((
            Version::read::<N, _>,
            ProgramFlags::read::<N, _>,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            skip(32usize),
        ))(input)?;

        let (_, header_bytes) = slice_at(
            file,
            Self::HEADER_SIZE as usize,
            SegmentHeader::SIZE as usize * segment_count as usize,
        )?;

        let mut headers = Vec::with_capacity(segment_count as usize);

        for header_slice in header_bytes.chunks_exact(SegmentHeader::SIZE as usize) {
            let (_, header) = SegmentHeader::read::<N, _>(header_slice)?;
            headers.push(header);
        }

        let mut data_cursor =
            Self::HEADER_SIZE as usize + SegmentHeader::SIZE as usize * segment_count as usize;
        let mut segments = Vec::with_capacity(segment_count as usize);

        for header in headers {
            let (_, data) = slice_at(file, data_cursor, header.file_size as usize)?;
            data_cursor += header.file_size as usize;

            segments.push(Segment {
                load_address: header.load_address,
                memory_size: header.memory_size,
                r#type: header.r#type,
                flags: header.flags,
                data: Cow::Borrowed(data),
            });
        }

        let info = if flags.contains(ProgramFlag::HasInfo) && info_size > 0 {
            let (_, info_bytes) = slice_at(file, info_offset as usize, info_size as usize)?;
            let (_, info) = ProgramInfo::read::<N, E>(info_bytes)?;

            Some(info)
        } else {
            None
        };

        let program = Self {
            version,
            flags: flags
                & !(ProgramFlag::HasEntryPoint | ProgramFlag::HasStackInit | ProgramFlag::HasInfo),
            entry_point: flags.contains(ProgramFlag::HasEntryPoint).then_some(Address(entry)),
            initial_stack_pointer: flags
                .contains(ProgramFlag::HasStackInit)
                .then_some(Address(stack_pointer)),
            segments,
            info,
        };

        Ok((&[], program))
    }

    /// Run the semantic checks the format requires on load: version, file
    /// sizes against memory sizes, segment overlap, and region fit.
    pub fn validate(&self) -> StdResult<(), ValidationError> {
        if self.version.major != Version::CURRENT.major {
            return Err(ValidationError::Version { found: self.version });
        }

        for segment in &self.segments {
            if segment.file_size() > segment.memory_size {
                return Err(ValidationError::SegmentFileSize {
                    address: segment.load_address,
                    file_size: segment.file_size(),
                    memory_size: segment.memory_size,
                });
            }

            if !segment.fits_its_region() {
                return Err(ValidationError::SegmentRegion {
                    address: segment.load_address,
                    segment_type: segment.r#type,
                    region: segment.r#type.region(),
                });
            }
        }

        let mut by_address: Vec<&Segment<'_>> = self.segments.iter().collect();
        by_address.sort_by_key(|segment| segment.load_address);

        for pair in by_address.windows(2) {
            if u64::from(pair[1].load_address.0) < pair[0].end() {
                return Err(ValidationError::SegmentOverlap {
                    first: pair[0].load_address,
                    second: pair[1].load_address,
                });
            }
        }

        Ok(())
    }

    /// Serialise the program image. All multi-byte fields are little-endian.
    pub fn write<B>(&self, buffer: &mut B) -> io::Result<()>
    where
        B: io::Write,
    {
        self.write_with_number::<LittleEndian, B>(buffer)
    }

    fn write_with_number<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let mut flags = self.flags;

        if self.entry_point.is_some() {
            flags |= ProgramFlag::HasEntryPoint;
        }

        if self.initial_stack_pointer.is_some() {
            flags |= ProgramFlag::HasStackInit;
        }

        if self.info.is_some() {
            flags |= ProgramFlag::HasInfo;
        }

        let data_size: u32 = self.segments.iter().map(Segment::file_size).sum();
        let data_end =
            Self::HEADER_SIZE + SegmentHeader::SIZE * self.segments.len() as u32 + data_size;
        let (info_offset, info_size) = match &self.info {
            Some(info) => (data_end, info.encoded_size()),
            None => (0, 0),
        };

        // Header.
        buffer.write_all(Self::MAGIC)?;
        self.version.write::<N, _>(buffer)?;
        flags.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u32(self.entry_point.map_or(0, |address| address.0)))?;
        buffer
            .write_all(&N::write_u32(self.initial_stack_pointer.map_or(0, |address| address.0)))?;
        buffer.write_all(&N::write_u32(self.segments.len() as u32))?;
        buffer.write_all(&N::write_u32(info_offset))?;
        buffer.write_all(&N::write_u32(info_size))?;
        buffer.write_all(&[0; 32])?;

        // Segment headers, then segment data in header order.
        for segment in &self.segments {
            segment.write_header::<N, _>(buffer)?;
        }

        for segment in &self.segments {
            buffer.write_all(&segment.data)?;
        }

        if let Some(info) = &self.info {
            info.write::<N, _>(buffer)?;
        }

        Ok(())
    }

    /// Detach all segment data from the buffer the program was parsed from.
    pub fn into_owned(self) -> Program<'static> {
        Program {
            version: self.version,
            flags: self.flags,
            entry_point: self.entry_point,
            initial_stack_pointer: self.initial_stack_pointer,
            segments: self.segments.into_iter().map(Segment::into_owned).collect(),
            info: self.info,
        }
    }
}

/// A segment: a contiguous region of the program image described by a load
/// address, a memory size, and attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    /// The address the segment is loaded at.
    pub load_address: Address,
    /// Size of the segment in memory. For zero-fill segments this exceeds
    /// the stored data (which is empty).
    pub memory_size: u32,
    /// Type of the segment.
    pub r#type: SegmentType,
    /// Flags.
    pub flags: SegmentFlags,
    /// The bytes stored in the file. Empty for zero-fill segments.
    pub data: Cow<'a, [u8]>,
}

impl<'a> Segment<'a> {
    /// Size of the segment in the file image.
    pub fn file_size(&self) -> u32 {
        self.data.len().try_into().expect("Segment has grown past `u32::MAX` bytes")
    }

    /// One-past-the-end address of the segment in memory.
    pub fn end(&self) -> u64 {
        u64::from(self.load_address.0) + u64::from(self.memory_size)
    }

    /// Whether an address falls inside the segment's memory range.
    pub fn contains(&self, address: Address) -> bool {
        self.load_address <= address && u64::from(address.0) < self.end()
    }

    fn fits_its_region(&self) -> bool {
        let (start, end) = match self.r#type {
            SegmentType::Metadata => (0x0000_0000, 0x0000_1000),
            SegmentType::Interrupt => (0x0000_1000, 0x0000_2000),
            SegmentType::Code | SegmentType::Data => (0x0000_2000, 0x8000_0000),
            // The reservation may extend through the quick RAM window, but
            // not into the I/O ports.
            SegmentType::Bss => (0x8000_0000, u64::from(Address::PORT_WINDOW_BASE.0)),
        };

        u64::from(self.load_address.0) >= start && self.end() <= end
    }

    /// Detach the segment data from the buffer it was parsed from.
    pub fn into_owned(self) -> Segment<'static> {
        Segment {
            load_address: self.load_address,
            memory_size: self.memory_size,
            r#type: self.r#type,
            flags: self.flags,
            data: Cow::Owned(self.data.into_owned()),
        }
    }

    fn write_header<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        <Address as Write<u32>>::write::<N, _>(&self.load_address, buffer)?;
        buffer.write_all(&N::write_u32(self.memory_size))?;
        buffer.write_all(&N::write_u32(self.file_size()))?;
        self.r#type.write::<N, _>(buffer)?;
        self.flags.write::<N, _>(buffer)
    }
}

/// The on-disk segment header, 16 bytes.
#[derive(Debug, PartialEq, Eq)]
struct SegmentHeader {
    load_address: Address,
    memory_size: u32,
    file_size: u32,
    r#type: SegmentType,
    flags: SegmentFlags,
}

impl SegmentHeader {
    /// Size of `Self` in the G10 program format.
    const SIZE: u32 = 16;

    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (load_address, memory_size, file_size, r#type, flags)) = tuple((
            <Address as Read<u32>>::read::<N, _>,
            N::read_u32,
            N::read_u32,
            SegmentType::read::<N, _>,
            SegmentFlags::read::<N, _>,
        ))(input)?;

        Ok((input, Self { load_address, memory_size, file_size, r#type, flags }))
    }
}

/// Segment type.
#[derive(ReadWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SegmentType {
    /// Executable code, loaded from the file.
    Code = 0x01,
    /// Initialised data, loaded from the file.
    Data = 0x02,
    /// Zero-filled memory; occupies no space in the file.
    Bss = 0x03,
    /// Program header and tables, in the metadata window.
    Metadata = 0x04,
    /// Interrupt vectors, in the interrupt window.
    Interrupt = 0x05,
}

impl SegmentType {
    /// The region this segment type loads into.
    pub fn region(self) -> Region {
        match self {
            Self::Code | Self::Data => Region::Rom,
            Self::Bss => Region::Ram,
            Self::Metadata => Region::Metadata,
            Self::Interrupt => Region::Interrupt,
        }
    }
}

/// Segment flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SegmentFlag {
    /// The segment is loaded from the file image.
    Loadable = 0x01,
    /// The segment contains executable instructions.
    Executable = 0x02,
    /// The segment contains writable data.
    Writable = 0x04,
    /// The segment is zero-filled at load.
    ZeroFill = 0x08,
}

/// Segment flags.
pub type SegmentFlags = BitFlags<SegmentFlag>;

impl Read for SegmentFlags {
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

impl Write for SegmentFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u16(self.bits()))
    }
}

/// Program flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProgramFlag {
    /// The header's entry point field is meaningful.
    HasEntryPoint = 0x01,
    /// The header's initial stack pointer field is meaningful.
    HasStackInit = 0x02,
    /// The image carries a program information record.
    HasInfo = 0x04,
    /// The image carries debug-friendly symbol values.
    Debug = 0x08,
    /// The simulator should start in double-speed mode.
    DoubleSpeed = 0x10,
}

/// Program flags.
pub type ProgramFlags = BitFlags<ProgramFlag>;

impl Read for ProgramFlags {
    fn read<'a, N, E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, flags) = N::read_u32(input)?;
        let flags = Self::from_bits(flags)
            .map_err(|_| Err::Error(E::from_error_kind(input, ErrorKind::Alt)))?;

        Ok((input, flags))
    }
}

impl Write for ProgramFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.bits()))
    }
}

/// The optional program information record: who built the image, when, and
/// a checksum of the segment data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramInfo {
    /// Program name.
    pub name: BString,
    /// Program version.
    pub version: BString,
    /// Program author.
    pub author: BString,
    /// One-line description.
    pub description: BString,
    /// Build date, seconds since the Unix epoch.
    pub build_date: u32,
    /// CRC-32 of the concatenated segment data.
    pub checksum: u32,
}

impl ProgramInfo {
    /// Size of the sub-header: four string offsets, build date, checksum.
    const HEADER_SIZE: u32 = 24;

    /// Size of the whole record once encoded: the sub-header plus every
    /// non-empty string with its terminator.
    pub fn encoded_size(&self) -> u32 {
        Self::HEADER_SIZE
            + self
                .strings()
                .iter()
                .filter(|string| !string.is_empty())
                .map(|string| string.len() as u32 + 1)
                .sum::<u32>()
    }

    fn strings(&self) -> [&BString; 4] {
        [&self.name, &self.version, &self.author, &self.description]
    }

    fn read<'a, N, E>(region: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (input, (name, version, author, description, build_date, checksum)) = tuple((
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
        ))(region)?;

        // String offsets are relative to the info region; offset 0 means
        // “no string”.
        let string_at = |offset: u32| {
            if offset == 0 {
                Ok(BString::default())
            } else {
                strings::string_at_offset(region, offset as usize)
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| Err::Error(E::from_error_kind(region, ErrorKind::Alt)))
            }
        };

        Ok((
            input,
            Self {
                name: string_at(name)?,
                version: string_at(version)?,
                author: string_at(author)?,
                description: string_at(description)?,
                build_date,
                checksum,
            },
        ))
    }

    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        let mut next_offset = Self::HEADER_SIZE;

        for string in self.strings() {
            let offset = if string.is_empty() {
                0
            } else {
                let offset = next_offset;
                next_offset += string.len() as u32 + 1;

                offset
            };

            buffer.write_all(&N::write_u32(offset))?;
        }

        buffer.write_all(&N::write_u32(self.build_date))?;
        buffer.write_all(&N::write_u32(self.checksum))?;

        for string in self.strings() {
            if !string.is_empty() {
                buffer.write_all(string)?;
                buffer.write_all(&[0x00])?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> Program<'static> {
        Program {
            version: Version::CURRENT,
            flags: ProgramFlags::EMPTY,
            entry_point: Some(Address(0x2000)),
            initial_stack_pointer: Some(Address::DEFAULT_STACK_POINTER),
            segments: vec![
                Segment {
                    load_address: Address(0x2000),
                    memory_size: 16,
                    r#type: SegmentType::Code,
                    flags: SegmentFlag::Loadable | SegmentFlag::Executable,
                    data: Cow::Owned(vec![0; 16]),
                },
                Segment {
                    load_address: Address(0x8000_0000),
                    memory_size: 256,
                    r#type: SegmentType::Bss,
                    flags: SegmentFlag::ZeroFill | SegmentFlag::Writable,
                    data: Cow::Owned(Vec::new()),
                },
            ],
            info: Some(ProgramInfo {
                name: BString::from("demo"),
                version: BString::from("0.1.0"),
                author: BString::from(""),
                description: BString::from("a linked G10 image"),
                build_date: 1_700_000_000,
                checksum: 0xdead_beef,
            }),
        }
    }

    #[test]
    fn test_round_trip() {
        let program = sample_program();

        let mut bytes = Vec::new();
        program.write(&mut bytes).unwrap();

        let (rest, reread) = Program::read::<()>(&bytes).unwrap();

        assert!(rest.is_empty());
        assert_eq!(reread, program);
        assert_eq!(reread.validate(), Ok(()));
    }

    #[test]
    fn test_structural_flags_follow_the_optional_fields() {
        let mut program = sample_program();
        program.entry_point = None;
        program.initial_stack_pointer = None;
        program.info = None;

        let mut bytes = Vec::new();
        program.write(&mut bytes).unwrap();

        let (_, reread) = Program::read::<()>(&bytes).unwrap();

        assert_eq!(reread.entry_point, None);
        assert_eq!(reread.initial_stack_pointer, None);
        assert_eq!(reread.info, None);
        assert_eq!(reread.flags, ProgramFlags::EMPTY);
    }

    #[test]
    fn test_zero_fill_segment_stores_no_data() {
        let program = sample_program();

        let mut bytes = Vec::new();
        program.write(&mut bytes).unwrap();

        let info_size = program.info.as_ref().unwrap().encoded_size();

        assert_eq!(
            bytes.len() as u32,
            Program::HEADER_SIZE + 2 * 16 + 16 /* code bytes only */ + info_size,
        );
    }

    #[test]
    fn test_program_info_encoded_size() {
        let info = sample_program().info.unwrap();

        // 24-byte sub-header + "demo\0" + "0.1.0\0" + "a linked G10 image\0".
        assert_eq!(info.encoded_size(), 24 + 5 + 6 + 19);
    }

    #[test]
    fn test_file_size_beyond_memory_size_is_rejected() {
        let mut program = sample_program();
        program.segments[0].memory_size = 8;

        assert!(matches!(program.validate(), Err(ValidationError::SegmentFileSize { .. })));
    }

    #[test]
    fn test_segment_overlap_is_rejected() {
        let mut program = sample_program();
        program.segments.push(Segment {
            load_address: Address(0x2008),
            memory_size: 16,
            r#type: SegmentType::Code,
            flags: SegmentFlag::Loadable | SegmentFlag::Executable,
            data: Cow::Owned(vec![0; 16]),
        });

        assert!(matches!(program.validate(), Err(ValidationError::SegmentOverlap { .. })));
    }

    #[test]
    fn test_segment_region_is_enforced() {
        let mut program = sample_program();
        program.segments[0].load_address = Address(0x1000);

        assert!(matches!(program.validate(), Err(ValidationError::SegmentRegion { .. })));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        assert!(Program::read::<()>(b"G10O").is_err());
    }
}
