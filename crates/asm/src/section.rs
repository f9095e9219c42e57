//! The section builder: an ordered set of sections keyed by origin address,
//! a current section, and its location counter.
//!
//! The same builder serves both passes: the layout pass advances counters
//! without bytes, the emission pass emits bytes or reservations. The
//! section type is inferred from the address space and the content: a base
//! at or above `0x8000_0000` opens a reservation (bss) section; anything
//! below starts as data and becomes code when the first instruction lands
//! in it.

use std::borrow::Cow;

use bstr::BString;
use g10_object::g10::{Address, Region, Section, SectionFlag, SectionType};

use crate::Error;

#[derive(Debug)]
struct PendingSection {
    base: Address,
    reservation: bool,
    has_code: bool,
    size: u32,
    data: Vec<u8>,
}

impl PendingSection {
    fn location(&self) -> Result<Address, Error> {
        self.base.checked_add(self.size).ok_or_else(|| {
            Error::ValueOutOfRange(
                "the location counter".to_owned(),
                i64::from(self.base.0) + i64::from(self.size),
            )
        })
    }
}

/// Builds up the sections of one translation unit.
#[derive(Debug, Default)]
pub(crate) struct SectionBuilder {
    sections: Vec<PendingSection>,
    current: Option<usize>,
}

impl SectionBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Open or switch to the section based at `base`. Consecutive origin
    /// directives with distinct bases produce distinct sections; re-using a
    /// base resumes the existing section.
    pub(crate) fn switch_origin(&mut self, base: Address) -> Result<(), Error> {
        if base.region() == Region::IoPorts {
            return Err(Error::RegionViolation(
                "A section".to_owned(),
                base,
                "the I/O port window cannot hold sections".to_owned(),
            ));
        }

        self.current = Some(match self.sections.iter().position(|section| section.base == base) {
            Some(index) => index,
            None => {
                self.sections.push(PendingSection {
                    base,
                    reservation: base.0 >= 0x8000_0000,
                    has_code: false,
                    size: 0,
                    data: Vec::new(),
                });

                self.sections.len() - 1
            }
        });

        Ok(())
    }

    fn current(&self) -> Result<&PendingSection, Error> {
        self.current
            .map(|index| &self.sections[index])
            .ok_or(Error::StatementOutsideSection)
    }

    fn current_mut(&mut self) -> Result<&mut PendingSection, Error> {
        self.current
            .map(|index| &mut self.sections[index])
            .ok_or(Error::StatementOutsideSection)
    }

    /// Index of the current section, in creation order. This is the index
    /// the section keeps in the emitted object.
    pub(crate) fn current_index(&self) -> Result<usize, Error> {
        self.current.ok_or(Error::StatementOutsideSection)
    }

    /// The absolute address of the next byte.
    pub(crate) fn location(&self) -> Result<Address, Error> {
        self.current()?.location()
    }

    /// The offset of the next byte within the current section.
    pub(crate) fn offset(&self) -> Result<u32, Error> {
        Ok(self.current()?.size)
    }

    /// Whether the current section is a reservation (bss) section.
    pub(crate) fn is_reservation(&self) -> Result<bool, Error> {
        Ok(self.current()?.reservation)
    }

    /// Record that the current section holds code. Reservation sections
    /// cannot.
    pub(crate) fn mark_code(&mut self) -> Result<(), Error> {
        let location = self.location()?;
        let section = self.current_mut()?;

        if section.reservation {
            return Err(Error::RegionViolation(
                "An instruction".to_owned(),
                location,
                "instructions cannot live in the reservation region".to_owned(),
            ));
        }

        section.has_code = true;

        Ok(())
    }

    /// Advance the location counter without emitting bytes (layout pass).
    pub(crate) fn advance(&mut self, bytes: u32) -> Result<(), Error> {
        let section = self.current_mut()?;
        section.size = section.size.saturating_add(bytes);

        // Surfaces an address-space overflow as an error.
        section.location()?;

        Ok(())
    }

    /// Emit bytes into the current section (emission pass).
    pub(crate) fn emit(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let location = self.location()?;
        let section = self.current_mut()?;

        if section.reservation {
            return Err(Error::RegionViolation(
                "Initialised bytes".to_owned(),
                location,
                "the reservation region is zero-filled at load".to_owned(),
            ));
        }

        section.data.extend_from_slice(bytes);
        self.advance(bytes.len() as u32)
    }

    /// Reserve zero-filled bytes in the current section (emission pass).
    /// The reservation exists in memory but is never written to the file.
    pub(crate) fn reserve(&mut self, count: u32) -> Result<(), Error> {
        let location = self.location()?;
        let section = self.current_mut()?;

        if !section.reservation {
            return Err(Error::RegionViolation(
                "A reservation".to_owned(),
                location,
                "reservations live at or above 0x80000000".to_owned(),
            ));
        }

        section.data.resize(section.data.len() + count as usize, 0);
        self.advance(count)
    }

    /// Turn the builder into the object's section list, assigning names,
    /// types and flags.
    pub(crate) fn finish(self) -> Result<Vec<Section<'static>>, Error> {
        let mut text = 0;
        let mut data = 0;
        let mut bss = 0;

        let sections = self
            .sections
            .into_iter()
            .map(|section| {
                debug_assert_eq!(
                    section.data.len() as u32,
                    section.size,
                    "the two passes disagreed on a section size",
                );

                let (name, r#type, flags) = if section.reservation {
                    bss += 1;

                    (
                        format!(".bss{}", bss - 1),
                        SectionType::Bss,
                        SectionFlag::Allocable | SectionFlag::Writable,
                    )
                } else if section.has_code {
                    text += 1;

                    (
                        format!(".text{}", text - 1),
                        SectionType::Code,
                        SectionFlag::Allocable | SectionFlag::Loadable | SectionFlag::Executable,
                    )
                } else {
                    data += 1;

                    (
                        format!(".data{}", data - 1),
                        SectionType::Data,
                        SectionFlag::Allocable | SectionFlag::Loadable,
                    )
                };

                Section {
                    name: BString::from(name),
                    virtual_address: section.base,
                    r#type,
                    flags,
                    data: Cow::Owned(section.data),
                }
            })
            .collect::<Vec<_>>();

        for (index, section) in sections.iter().enumerate() {
            for other in &sections[index + 1..] {
                if section.overlaps(other) {
                    return Err(Error::SectionOverlap(
                        section.virtual_address,
                        other.virtual_address,
                    ));
                }
            }
        }

        Ok(sections)
    }
}
