//! The link pipeline, from validated objects to a program image.
//!
//! The pipeline is pure: it consumes in-memory objects (deep-copying every
//! section it patches, so inputs stay read-only) and produces an owned
//! [`Program`]. File loading and writing live in the driver.

use std::collections::HashMap;

use bstr::BString;
use g10_errors::error;
use g10_object::g10::{
    Address, Object, Program, ProgramFlag, ProgramFlags, ProgramInfo, Region, RelocationType,
    SectionType, Segment, SegmentFlag, SegmentFlags, SegmentType, Symbol, SymbolBinding,
    SymbolFlag, Version,
};

error! {
    #[doc = "Errors raised while linking a set of objects."]
    pub enum Error {
        #[code = E015]
        #[message = "Two objects define the same strong global symbol."]
        #[formatted_message("The global symbol `{0}` is defined by both `{1}` and `{2}`.")]
        #[help = "A strong definition is unique across a program; mark one of them `weak` if it is an overridable default."]
        DuplicateGlobal(String, String, String),

        #[code = E016]
        #[message = "An extern symbol is not defined by any input object."]
        #[formatted_message("The extern symbol `{0}`, referenced by `{1}`, is not defined by any input object.")]
        #[help = "Check for a missing input file, or a spelling mismatch between the `extern` declaration and the definition."]
        UnresolvedExtern(String, String),

        #[code = E017]
        #[message = "A relocation's resolved value does not fit the field being patched."]
        #[formatted_message("The {0} relocation at {1} resolved to `{2}`, which does not fit its field.")]
        #[help = "Use a wider addressing form at the reference site: `jmp` instead of `jpb`, `[addr32]` instead of a window-relative access."]
        RelocationRange(String, Address, i64),

        #[code = E018]
        #[message = "The program has no entry point."]
        #[help = "Mark the startup routine with the `entry` directive, or define a global `main` or `_start`."]
        MissingEntry,

        #[code = E018]
        #[message = "The requested entry symbol is not defined by any input object."]
        #[formatted_message("The requested entry symbol `{0}` is not defined by any input object.")]
        #[help = "The entry override must name a global or weak symbol of one of the inputs."]
        EntryUndefined(String),

        #[code = E018]
        #[message = "More than one symbol carries the entry flag."]
        #[formatted_message("Both `{0}` and `{1}` carry the entry flag.")]
        #[help = "Keep a single `entry` directive across the program."]
        AmbiguousEntry(String, String),

        #[code = E018]
        #[message = "The entry point does not lie within a code or interrupt segment."]
        #[formatted_message("The entry point {0} does not lie within a code or interrupt segment.")]
        #[help = "Execution must start from loaded, executable memory."]
        EntryOutsideCode(Address),

        #[code = E019]
        #[message = "Two segments of the linked program overlap."]
        #[formatted_message("The segments at {0} and {1} overlap.")]
        #[help = "Sections keep the `.org` bases the assembler gave them; rearrange the inputs so that each owns a disjoint range."]
        SegmentOverlap(Address, Address),

        #[code = E020]
        #[message = "A segment extends outside the region its type permits."]
        #[formatted_message("The segment at {0} extends outside the {1} region.")]
        #[help = "Check the memory map: metadata, interrupt vectors, ROM and RAM all have fixed bounds."]
        SegmentRegion(Address, String),
    }
}

/// One object handed to the linker, with the name used in diagnostics.
#[derive(Debug)]
pub struct LinkInput {
    /// Display name of the object, usually its path.
    pub name: String,
    /// The validated object.
    pub object: Object<'static>,
}

/// Knobs of one link, beyond the input list.
#[derive(Debug, Default)]
pub struct LinkOptions {
    /// Entry symbol override. When set, it replaces the entry-flag/`main`/
    /// `_start` selection.
    pub entry: Option<String>,
    /// Initial stack pointer override; defaults to
    /// [`Address::DEFAULT_STACK_POINTER`].
    pub initial_stack_pointer: Option<Address>,
    /// Program information to embed; its checksum is recomputed over the
    /// linked segment data.
    pub info: Option<ProgramInfo>,
    /// Ask the simulator to start in double-speed mode.
    pub double_speed: bool,
}

/// A global or weak definition, keyed by name in the global table.
#[derive(Debug, Clone, Copy)]
struct Definition<'a> {
    object_index: usize,
    symbol: &'a Symbol,
}

/// A section copied out of its object, tagged with its provenance.
#[derive(Debug)]
struct LinkedSection {
    object_index: usize,
    section_index: usize,
    base: Address,
    r#type: SectionType,
    data: Vec<u8>,
}

impl LinkedSection {
    fn end(&self) -> u64 {
        u64::from(self.base.0) + self.data.len() as u64
    }
}

/// Link validated objects into a program image.
///
/// Every input must have passed [`Object::validate`]; the pipeline relies
/// on the indices and bounds that pass establishes.
pub fn link_objects(inputs: &[LinkInput], options: &LinkOptions) -> Result<Program<'static>, Error> {
    let globals = resolve_symbols(inputs)?;
    let mut sections = collect_sections(inputs);

    apply_relocations(inputs, &globals, &mut sections)?;

    let entry_point = select_entry_point(inputs, &globals, options)?;
    let segments = form_segments(sections);

    validate_segments(&segments)?;

    if !segments
        .iter()
        .any(|segment| segment.flags.contains(SegmentFlag::Executable) && segment.contains(entry_point))
    {
        return Err(Error::EntryOutsideCode(entry_point));
    }

    let info = options.info.clone().map(|mut info| {
        info.checksum = {
            let mut hasher = crc32fast::Hasher::new();

            for segment in &segments {
                hasher.update(&segment.data);
            }

            hasher.finalize()
        };

        info
    });

    let program = Program {
        version: Version::CURRENT,
        flags: if options.double_speed {
            ProgramFlags::from(ProgramFlag::DoubleSpeed)
        } else {
            ProgramFlags::EMPTY
        },
        entry_point: Some(entry_point),
        initial_stack_pointer: Some(
            options.initial_stack_pointer.unwrap_or(Address::DEFAULT_STACK_POINTER),
        ),
        segments,
        info,
    };

    debug_assert_eq!(program.validate(), Ok(()));

    Ok(program)
}

/// Walk every object's symbols and build the global table, applying the
/// weak override rule: a weak definition is superseded by any strong global
/// of the same name; two strong definitions are a hard error.
fn resolve_symbols(inputs: &[LinkInput]) -> Result<HashMap<BString, Definition<'_>>, Error> {
    let mut globals: HashMap<BString, Definition<'_>> = HashMap::new();

    for (object_index, input) in inputs.iter().enumerate() {
        for symbol in &input.object.symbols {
            if !matches!(symbol.binding, SymbolBinding::Global | SymbolBinding::Weak) {
                continue;
            }

            match globals.get(&symbol.name) {
                None => {
                    globals
                        .insert(symbol.name.clone(), Definition { object_index, symbol });
                }

                Some(existing) => match (existing.symbol.binding, symbol.binding) {
                    (SymbolBinding::Global, SymbolBinding::Global) => {
                        return Err(Error::DuplicateGlobal(
                            symbol.name.to_string(),
                            inputs[existing.object_index].name.clone(),
                            input.name.clone(),
                        ));
                    }

                    // The strong definition supersedes the weak one.
                    (SymbolBinding::Weak, SymbolBinding::Global) => {
                        globals
                            .insert(symbol.name.clone(), Definition { object_index, symbol });
                    }

                    // The first weak definition wins over later weak ones.
                    _ => {}
                },
            }
        }
    }

    Ok(globals)
}

/// Deep-copy every non-null section, tagged with its provenance, sorted by
/// base address. Patching mutates these copies; the input objects stay
/// untouched.
fn collect_sections(inputs: &[LinkInput]) -> Vec<LinkedSection> {
    let mut sections = inputs
        .iter()
        .enumerate()
        .flat_map(|(object_index, input)| {
            input.object.sections.iter().enumerate().filter_map(move |(section_index, section)| {
                (section.r#type != SectionType::Null).then(|| LinkedSection {
                    object_index,
                    section_index,
                    base: section.virtual_address,
                    r#type: section.r#type,
                    data: section.data.to_vec(),
                })
            })
        })
        .collect::<Vec<_>>();

    sections.sort_by_key(|section| section.base);

    sections
}

/// Patch every relocation site with the byte pattern its kind requires.
fn apply_relocations(
    inputs: &[LinkInput],
    globals: &HashMap<BString, Definition<'_>>,
    sections: &mut [LinkedSection],
) -> Result<(), Error> {
    let mut by_provenance = HashMap::new();

    for (index, section) in sections.iter().enumerate() {
        by_provenance.insert((section.object_index, section.section_index), index);
    }

    for (object_index, input) in inputs.iter().enumerate() {
        for relocation in &input.object.relocations {
            let symbol = &input.object.symbols[relocation.symbol_index as usize];

            // The resolved target address.
            let target = match symbol.binding {
                SymbolBinding::Extern => {
                    globals
                        .get(&symbol.name)
                        .ok_or_else(|| {
                            Error::UnresolvedExtern(symbol.name.to_string(), input.name.clone())
                        })?
                        .symbol
                        .value
                }

                // A weak definition may have been superseded by a strong one
                // in another object.
                SymbolBinding::Global | SymbolBinding::Weak => globals[&symbol.name].symbol.value,

                SymbolBinding::Local => symbol.value,
            };

            let value = i64::from(target.0) + i64::from(relocation.addend);

            let section = &mut sections
                [by_provenance[&(object_index, relocation.section_index as usize)]];
            let site = section.base + relocation.offset.0;
            let field = &mut section.data[usize::from(relocation.offset)..];

            patch(relocation.r#type, value, site, field)?;
        }
    }

    Ok(())
}

/// Write the resolved `value` at the patch site, little-endian, checking
/// that it fits the field. `site` is the absolute address of the field.
fn patch(kind: RelocationType, value: i64, site: Address, field: &mut [u8]) -> Result<(), Error> {
    let range_error = |name: &str| Error::RelocationRange(name.to_owned(), site, value);

    match kind {
        RelocationType::None => {}

        RelocationType::Abs32 => {
            if !(0..=0xffff_ffff).contains(&value) {
                return Err(range_error("abs32"));
            }

            field[..4].copy_from_slice(&(value as u32).to_le_bytes());
        }

        RelocationType::Abs16 => {
            if !(0..=0xffff).contains(&value) {
                return Err(range_error("abs16"));
            }

            field[..2].copy_from_slice(&(value as u16).to_le_bytes());
        }

        RelocationType::Abs8 => {
            if !(0..=0xff).contains(&value) {
                return Err(range_error("abs8"));
            }

            field[0] = value as u8;
        }

        RelocationType::Rel32 => {
            let displacement = value - (i64::from(site.0) + 4);

            if i32::try_from(displacement).is_err() {
                return Err(range_error("rel32"));
            }

            field[..4].copy_from_slice(&(displacement as i32).to_le_bytes());
        }

        RelocationType::Rel16 => {
            let displacement = value - (i64::from(site.0) + 2);

            if i16::try_from(displacement).is_err() {
                return Err(range_error("rel16"));
            }

            field[..2].copy_from_slice(&(displacement as i16).to_le_bytes());
        }

        RelocationType::Rel8 => {
            let displacement = value - (i64::from(site.0) + 1);

            if i8::try_from(displacement).is_err() {
                return Err(range_error("rel8"));
            }

            field[0] = displacement as u8;
        }

        RelocationType::Quick16 => {
            if value as u64 >> 16 != 0xffff {
                return Err(range_error("quick16"));
            }

            field[..2].copy_from_slice(&((value as u32 & 0xffff) as u16).to_le_bytes());
        }

        RelocationType::Port8 => {
            if value as u64 >> 8 != 0xff_ffff {
                return Err(range_error("port8"));
            }

            field[0] = (value as u32 & 0xff) as u8;
        }
    }

    Ok(())
}

/// Choose the entry point: the override when given; otherwise the symbol
/// carrying the entry flag, then the global/weak `main`, then `_start`.
fn select_entry_point(
    inputs: &[LinkInput],
    globals: &HashMap<BString, Definition<'_>>,
    options: &LinkOptions,
) -> Result<Address, Error> {
    if let Some(name) = &options.entry {
        return globals
            .get(&BString::from(name.as_str()))
            .map(|definition| definition.symbol.value)
            .ok_or_else(|| Error::EntryUndefined(name.clone()));
    }

    let mut flagged: Option<&Symbol> = None;

    for input in inputs {
        for symbol in &input.object.symbols {
            if symbol.binding != SymbolBinding::Extern && symbol.flags.contains(SymbolFlag::Entry) {
                if let Some(previous) = flagged {
                    return Err(Error::AmbiguousEntry(
                        previous.name.to_string(),
                        symbol.name.to_string(),
                    ));
                }

                flagged = Some(symbol);
            }
        }
    }

    if let Some(symbol) = flagged {
        return Ok(symbol.value);
    }

    ["main", "_start"]
        .iter()
        .find_map(|name| globals.get(&BString::from(*name)))
        .map(|definition| definition.symbol.value)
        .ok_or(Error::MissingEntry)
}

fn segment_type(section: &LinkedSection) -> SegmentType {
    match section.r#type {
        SectionType::Bss => SegmentType::Bss,
        _ => match section.base.region() {
            Region::Metadata => SegmentType::Metadata,
            Region::Interrupt => SegmentType::Interrupt,
            _ if section.r#type == SectionType::Code => SegmentType::Code,
            _ => SegmentType::Data,
        },
    }
}

fn segment_flags(r#type: SegmentType) -> SegmentFlags {
    match r#type {
        SegmentType::Code | SegmentType::Interrupt => {
            SegmentFlag::Loadable | SegmentFlag::Executable
        }
        SegmentType::Data | SegmentType::Metadata => SegmentFlags::from(SegmentFlag::Loadable),
        SegmentType::Bss => SegmentFlag::ZeroFill | SegmentFlag::Writable,
    }
}

/// Group patched sections into segments: consecutive sections merge when
/// their addresses are contiguous and they map to the same segment type;
/// bss sections always stand alone, carrying size but no data.
fn form_segments(sections: Vec<LinkedSection>) -> Vec<Segment<'static>> {
    let mut segments: Vec<Segment<'static>> = Vec::with_capacity(sections.len());

    for section in sections {
        let r#type = segment_type(&section);
        let memory_size = section.data.len() as u32;

        if r#type != SegmentType::Bss {
            if let Some(previous) = segments.last_mut() {
                if previous.r#type == r#type && previous.end() == u64::from(section.base.0) {
                    previous.memory_size += memory_size;
                    previous.data.to_mut().extend_from_slice(&section.data);

                    continue;
                }
            }
        }

        segments.push(Segment {
            load_address: section.base,
            memory_size,
            r#type,
            flags: segment_flags(r#type),
            data: if r#type == SegmentType::Bss {
                std::borrow::Cow::Owned(Vec::new())
            } else {
                std::borrow::Cow::Owned(section.data)
            },
        });
    }

    segments
}

fn validate_segments(segments: &[Segment<'_>]) -> Result<(), Error> {
    for pair in segments.windows(2) {
        if u64::from(pair[1].load_address.0) < pair[0].end() {
            return Err(Error::SegmentOverlap(pair[0].load_address, pair[1].load_address));
        }
    }

    for segment in segments {
        let (start, end) = match segment.r#type {
            SegmentType::Metadata => (0x0000_0000, 0x0000_1000),
            SegmentType::Interrupt => (0x0000_1000, 0x0000_2000),
            SegmentType::Code | SegmentType::Data => (0x0000_2000, 0x8000_0000),
            SegmentType::Bss => (0x8000_0000, u64::from(Address::PORT_WINDOW_BASE.0)),
        };

        if u64::from(segment.load_address.0) < start || segment.end() > end {
            return Err(Error::SegmentRegion(
                segment.load_address,
                format!("{:?}", segment.r#type.region()),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_writes_little_endian() {
        let mut field = [0u8; 4];

        patch(RelocationType::Abs32, 0x0001_5345, Address(0x2002), &mut field).unwrap();
        assert_eq!(field, [0x45, 0x53, 0x01, 0x00]);

        patch(RelocationType::Abs16, 0xbeef, Address(0x2002), &mut field[..2]).unwrap();
        assert_eq!(field[..2], [0xef, 0xbe]);

        patch(RelocationType::Abs8, 0x7f, Address(0x2002), &mut field[..1]).unwrap();
        assert_eq!(field[0], 0x7f);
    }

    #[test]
    fn test_patch_relative_kinds_measure_from_past_the_field() {
        let mut field = [0u8; 4];

        // rel32: `target - (site + 4)`.
        patch(RelocationType::Rel32, 0x2100, Address(0x2002), &mut field).unwrap();
        assert_eq!(i32::from_le_bytes(field), 0x2100 - (0x2002 + 4));

        // rel16: `target - (site + 2)`.
        patch(RelocationType::Rel16, 0x1f00, Address(0x2002), &mut field[..2]).unwrap();
        assert_eq!(
            i16::from_le_bytes(field[..2].try_into().unwrap()),
            (0x1f00 - (0x2002 + 2)) as i16,
        );

        // rel8: `target - (site + 1)`.
        patch(RelocationType::Rel8, 0x2010, Address(0x2002), &mut field[..1]).unwrap();
        assert_eq!(field[0] as i8, (0x2010 - (0x2002 + 1)) as i8);
    }

    #[test]
    fn test_patch_window_kinds_are_window_relative() {
        let mut field = [0u8; 2];

        patch(RelocationType::Quick16, 0xffff_0042, Address(0x2002), &mut field).unwrap();
        assert_eq!(field, [0x42, 0x00]);

        patch(RelocationType::Port8, 0xffff_ff05, Address(0x2002), &mut field[..1]).unwrap();
        assert_eq!(field[0], 0x05);
    }

    #[test]
    fn test_patch_rejects_values_outside_the_field() {
        let mut field = [0u8; 4];

        assert!(matches!(
            patch(RelocationType::Abs16, 0x1_0000, Address(0x2002), &mut field[..2]),
            Err(Error::RelocationRange(..)),
        ));
        assert!(matches!(
            patch(RelocationType::Abs8, 0x100, Address(0x2002), &mut field[..1]),
            Err(Error::RelocationRange(..)),
        ));
        assert!(matches!(
            patch(RelocationType::Rel16, 0x2004 + 0x8000, Address(0x2002), &mut field[..2]),
            Err(Error::RelocationRange(..)),
        ));
        assert!(matches!(
            patch(RelocationType::Quick16, 0x2000, Address(0x2002), &mut field[..2]),
            Err(Error::RelocationRange(..)),
        ));
        assert!(matches!(
            patch(RelocationType::Port8, 0xffff_0000, Address(0x2002), &mut field[..1]),
            Err(Error::RelocationRange(..)),
        ));
    }
}
