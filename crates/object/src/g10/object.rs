use std::{borrow::Cow, io, result::Result as StdResult};

use bstr::BString;
use enumflags2::{bitflags, BitFlags};

use super::{
    Address, Region, Relocation, Section, SectionHeader, SectionRef, SectionType, Symbol,
    SymbolBinding, Version,
};
use crate::{
    combinators::*,
    strings::{self, StringTable},
    Input, LittleEndian, Number, Read, Result, Write,
};

/// A relocatable object file, the sole ABI between the assembler and the
/// linker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Object<'a> {
    /// Format version.
    pub version: Version,
    /// File flags.
    pub flags: ObjectFlags,
    /// The sections, in the order the assembler created them.
    pub sections: Vec<Section<'a>>,
    /// The symbol table.
    pub symbols: Vec<Symbol>,
    /// The relocation table.
    pub relocations: Vec<Relocation>,
}

impl<'a> Object<'a> {
    /// Magic number for a G10 object file.
    pub const MAGIC: &'static [u8; 4] = b"G10O";

    /// Size of the file header in the G10 object format.
    pub const HEADER_SIZE: u32 = 64;

    /// Parse an object file.
    ///
    /// Parsing stops at structural problems (bad magic, tables running past
    /// the end of the file); the semantic checks live in [`Self::validate`],
    /// which callers are expected to run right after.
    pub fn read<E>(input: Input<'a>) -> Result<'a, Self, E>
    where
        E: ParseError<Input<'a>>,
    {
        let file = input;
        let (input, _magic) = tag(Self::MAGIC)(input)?;

        Self::read_tables::<LittleEndian, E>(file, input)
    }

    fn read_tables<N, E>(file: Input<'a>, input: Input<'a>) -> Result<'a, Self, E>
    where
        N: Number,
        E: ParseError<Input<'a>>,
    {
        let (
            _input,
            (
                version,
                flags,
                section_count,
                symbol_offset,
                symbol_count,
                string_offset,
                string_size,
                relocation_offset,
                relocation_count,
                _reserved,
            ),
        ) = tuple((
            Version::read::<N, _>,
            ObjectFlags::read::<N, _>,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            N::read_u32,
            skip(24usize),
        ))(input)?;

        let (_, string_table) = slice_at(file, string_offset as usize, string_size as usize)?;

        let name_at = |offset: u32| {
            strings::string_at_offset(string_table, offset as usize)
                .map(ToOwned::to_owned)
                .ok_or_else(|| Err::Error(E::from_error_kind(file, ErrorKind::Alt)))
        };

        // Section headers sit right after the file header; section data is
        // concatenated after them, in header order, for load sections only.
        let (_, header_bytes) = slice_at(
            file,
            Self::HEADER_SIZE as usize,
            SectionHeader::SIZE as usize * section_count as usize,
        )?;

        let mut headers = Vec::with_capacity(section_count as usize);

        for header_slice in header_bytes.chunks_exact(SectionHeader::SIZE as usize) {
            let (_, header) = SectionHeader::read::<N, _>(header_slice)?;
            headers.push(header);
        }

        let mut data_cursor =
            Self::HEADER_SIZE as usize + SectionHeader::SIZE as usize * section_count as usize;
        let mut sections = Vec::with_capacity(section_count as usize);

        for header in headers {
            let data: Cow<'a, [u8]> = match header.r#type {
                SectionType::Code | SectionType::Data => {
                    let (_, data) = slice_at(file, data_cursor, header.size as usize)?;
                    data_cursor += header.size as usize;

                    Cow::Borrowed(data)
                }

                // The reservation is materialised in memory, exactly as it
                // will exist once the loader zero-fills it.
                SectionType::Null | SectionType::Bss => Cow::Owned(vec![0; header.size as usize]),
            };

            sections.push(Section {
                name: name_at(header.name_offset)?,
                virtual_address: header.virtual_address,
                r#type: header.r#type,
                flags: header.flags,
                data,
            });
        }

        let (_, symbol_bytes) = slice_at(
            file,
            symbol_offset as usize,
            Symbol::SIZE as usize * symbol_count as usize,
        )?;

        let mut symbols = Vec::with_capacity(symbol_count as usize);

        for symbol_slice in symbol_bytes.chunks_exact(Symbol::SIZE as usize) {
            let (_, (name_offset, mut symbol)) = Symbol::read::<N, _>(symbol_slice)?;
            symbol.name = name_at(name_offset)?;
            symbols.push(symbol);
        }

        let (_, relocation_bytes) = slice_at(
            file,
            relocation_offset as usize,
            Relocation::SIZE as usize * relocation_count as usize,
        )?;

        let mut relocations = Vec::with_capacity(relocation_count as usize);

        for relocation_slice in relocation_bytes.chunks_exact(Relocation::SIZE as usize) {
            let (_, relocation) = Relocation::read::<N, _>(relocation_slice)?;
            relocations.push(relocation);
        }

        // Wide addends are carried by the patch-site placeholder bytes; the
        // 16-bit field only holds their low half. Re-read them now that the
        // section data is available.
        for relocation in &mut relocations {
            if relocation.r#type.addend_in_patch_site() {
                if let Some(bytes) = sections
                    .get(relocation.section_index as usize)
                    .and_then(|section| {
                        section.data.get(usize::from(relocation.offset)..)?.get(..4)
                    })
                {
                    relocation.addend = i32::from_le_bytes(
                        bytes.try_into().expect("A 4-byte slice converts into `[u8; 4]`"),
                    );
                }
            }
        }

        Ok((&[], Self { version, flags, sections, symbols, relocations }))
    }

    /// Run the semantic checks the format requires on load: version, section
    /// region consistency, section overlap, symbol section indices, extern
    /// discipline, and relocation bounds.
    pub fn validate(&self) -> StdResult<(), ValidationError> {
        if self.version.major != Version::CURRENT.major {
            return Err(ValidationError::Version { found: self.version });
        }

        for section in &self.sections {
            let region_is_consistent = match section.r#type {
                SectionType::Null => true,
                SectionType::Code | SectionType::Data => {
                    section.virtual_address.0 < 0x8000_0000 && section.end() <= 0x8000_0000
                }
                SectionType::Bss => {
                    section.virtual_address.0 >= 0x8000_0000
                        && section.end() <= u64::from(Address::PORT_WINDOW_BASE.0)
                }
            };

            if !region_is_consistent {
                return Err(ValidationError::SectionRegion {
                    name: section.name.clone(),
                    section_type: section.r#type,
                    address: section.virtual_address,
                });
            }
        }

        let mut by_address: Vec<&Section<'_>> =
            self.sections.iter().filter(|section| section.r#type != SectionType::Null).collect();
        by_address.sort_by_key(|section| section.virtual_address);

        for pair in by_address.windows(2) {
            if pair[0].overlaps(pair[1]) {
                return Err(ValidationError::SectionOverlap {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        for symbol in &self.symbols {
            match (symbol.binding, symbol.section) {
                (SymbolBinding::Extern, SectionRef::Undefined) => {}
                (SymbolBinding::Extern, _) => {
                    return Err(ValidationError::ExternWithSection { name: symbol.name.clone() })
                }
                (SymbolBinding::Global | SymbolBinding::Weak, SectionRef::Index(_)) => {}
                (SymbolBinding::Global | SymbolBinding::Weak, _) => {
                    return Err(ValidationError::GlobalWithoutSection { name: symbol.name.clone() })
                }
                (SymbolBinding::Local, _) => {}
            }

            if let SectionRef::Index(index) = symbol.section {
                if index >= self.sections.len() {
                    return Err(ValidationError::SymbolSection {
                        name: symbol.name.clone(),
                        index,
                        count: self.sections.len(),
                    });
                }
            }
        }

        for (index, relocation) in self.relocations.iter().enumerate() {
            let Some(section) = self.sections.get(relocation.section_index as usize) else {
                return Err(ValidationError::RelocationSection {
                    index,
                    section_index: relocation.section_index,
                });
            };

            if section.r#type == SectionType::Null {
                return Err(ValidationError::RelocationSection {
                    index,
                    section_index: relocation.section_index,
                });
            }

            if relocation.symbol_index as usize >= self.symbols.len() {
                return Err(ValidationError::RelocationSymbol {
                    index,
                    symbol_index: relocation.symbol_index,
                });
            }

            let field_end =
                u64::from(relocation.offset.0) + u64::from(relocation.r#type.field_width());

            if field_end > u64::from(section.size()) {
                return Err(ValidationError::RelocationOffset {
                    index,
                    offset: relocation.offset,
                    section: section.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Serialise the object. All multi-byte fields are little-endian.
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
        let mut string_table = StringTable::new();

        let section_name_offsets = self
            .sections
            .iter()
            .map(|section| string_table.insert(section.name.as_ref()))
            .collect::<Vec<_>>();
        let symbol_name_offsets = self
            .symbols
            .iter()
            .map(|symbol| string_table.insert(symbol.name.as_ref()))
            .collect::<Vec<_>>();

        let section_headers_size = SectionHeader::SIZE * self.sections.len() as u32;
        let data_size: u32 =
            self.sections.iter().filter(|section| section.is_load()).map(Section::size).sum();

        let symbol_offset = Self::HEADER_SIZE + section_headers_size + data_size;
        let string_offset = symbol_offset + Symbol::SIZE * self.symbols.len() as u32;
        let relocation_offset = string_offset + string_table.len();

        // Header.
        buffer.write_all(Self::MAGIC)?;
        self.version.write::<N, _>(buffer)?;
        self.flags.write::<N, _>(buffer)?;
        buffer.write_all(&N::write_u32(self.sections.len() as u32))?;
        buffer.write_all(&N::write_u32(symbol_offset))?;
        buffer.write_all(&N::write_u32(self.symbols.len() as u32))?;
        buffer.write_all(&N::write_u32(string_offset))?;
        buffer.write_all(&N::write_u32(string_table.len()))?;
        buffer.write_all(&N::write_u32(relocation_offset))?;
        buffer.write_all(&N::write_u32(self.relocations.len() as u32))?;
        buffer.write_all(&[0; 24])?;

        // Section headers, then section data in header order.
        for (section, name_offset) in self.sections.iter().zip(section_name_offsets) {
            section.write_header::<N, _>(name_offset, buffer)?;
        }

        for section in self.sections.iter().filter(|section| section.is_load()) {
            buffer.write_all(&section.data)?;
        }

        // Symbol table.
        for (symbol, name_offset) in self.symbols.iter().zip(symbol_name_offsets) {
            symbol.write::<N, _>(name_offset, buffer)?;
        }

        // String table.
        buffer.write_all(string_table.as_bytes())?;

        // Relocation table.
        for relocation in &self.relocations {
            relocation.write::<N, _>(buffer)?;
        }

        Ok(())
    }

    /// Detach all section data from the buffer the object was parsed from.
    pub fn into_owned(self) -> Object<'static> {
        Object {
            version: self.version,
            flags: self.flags,
            sections: self.sections.into_iter().map(Section::into_owned).collect(),
            symbols: self.symbols,
            relocations: self.relocations,
        }
    }
}

/// Object file flag.
#[bitflags]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectFlag {
    /// The object carries debug-friendly symbol values.
    Debug = 0x01,
}

/// Object file flags.
pub type ObjectFlags = BitFlags<ObjectFlag>;

impl Read for ObjectFlags {
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

impl Write for ObjectFlags {
    fn write<N, B>(&self, buffer: &mut B) -> io::Result<()>
    where
        N: Number,
        B: io::Write,
    {
        buffer.write_all(&N::write_u32(self.bits()))
    }
}

/// A semantic defect found in an otherwise well-formed container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The major version doesn't match this toolchain.
    #[error("the file version {found} is not supported, this toolchain handles major version {}", Version::CURRENT.major)]
    Version {
        /// The version found in the file.
        found: Version,
    },

    /// A section is placed outside the region its type permits.
    #[error("section `{name}` of type {section_type:?}, based at {address}, lies outside the region its type permits")]
    SectionRegion {
        /// Name of the offending section.
        name: BString,
        /// Its type.
        section_type: SectionType,
        /// Its base address.
        address: Address,
    },

    /// Two sections of the same object overlap.
    #[error("sections `{first}` and `{second}` overlap")]
    SectionOverlap {
        /// Name of the lower section.
        first: BString,
        /// Name of the upper section.
        second: BString,
    },

    /// A symbol's section index runs past the section table.
    #[error("symbol `{name}` refers to section {index}, but the object has {count} section(s)")]
    SymbolSection {
        /// Name of the offending symbol.
        name: BString,
        /// The out-of-range index.
        index: usize,
        /// Number of sections in the object.
        count: usize,
    },

    /// An extern symbol claims to be defined in a section.
    #[error("extern symbol `{name}` must have an undefined section reference")]
    ExternWithSection {
        /// Name of the offending symbol.
        name: BString,
    },

    /// A global or weak symbol is not defined in any section.
    #[error("symbol `{name}` is global but is not defined in any section")]
    GlobalWithoutSection {
        /// Name of the offending symbol.
        name: BString,
    },

    /// A relocation's section index runs past the section table, or lands
    /// on an unused section.
    #[error("relocation {index} patches section {section_index}, which does not exist or is unused")]
    RelocationSection {
        /// Index of the relocation in the relocation table.
        index: usize,
        /// The out-of-range section index.
        section_index: u32,
    },

    /// A relocation's symbol index runs past the symbol table.
    #[error("relocation {index} targets symbol {symbol_index}, which does not exist")]
    RelocationSymbol {
        /// Index of the relocation in the relocation table.
        index: usize,
        /// The out-of-range symbol index.
        symbol_index: u32,
    },

    /// A relocation's patch field runs past its section's data.
    #[error("relocation {index} patches offset {offset} of section `{section}`, beyond its data")]
    RelocationOffset {
        /// Index of the relocation in the relocation table.
        index: usize,
        /// The out-of-range offset.
        offset: Address,
        /// Name of the patched section.
        section: BString,
    },

    /// A segment's file size exceeds its memory size.
    #[error("segment at {address} stores {file_size} bytes in the file but spans {memory_size} bytes in memory")]
    SegmentFileSize {
        /// Load address of the offending segment.
        address: Address,
        /// Bytes stored in the file.
        file_size: u32,
        /// Bytes spanned in memory.
        memory_size: u32,
    },

    /// Two segments of the program overlap.
    #[error("segments at {first} and {second} overlap")]
    SegmentOverlap {
        /// Load address of the lower segment.
        first: Address,
        /// Load address of the upper segment.
        second: Address,
    },

    /// A segment extends outside the region its type permits.
    #[error("segment at {address} of type {segment_type:?} extends outside the {region:?} region")]
    SegmentRegion {
        /// Load address of the offending segment.
        address: Address,
        /// Its type.
        segment_type: super::SegmentType,
        /// The region its type maps to.
        region: Region,
    },
}
