//! The per-object symbol table.
//!
//! Labels default to local binding; `global`, `extern`, `weak` and `entry`
//! directives adjust bindings and flags, in any order relative to the
//! definition. The rules are enforced partly at insertion (contradictory
//! directives, redefinitions) and partly when the table is finalised
//! (bindings that promise a definition which never came).

use std::collections::HashMap;

use bstr::BString;
use g10_object::g10::{
    Address, Section, SectionRef, SectionType, Symbol, SymbolBinding, SymbolFlag, SymbolFlags,
    SymbolType,
};

use crate::{Error, SymbolResolver};

#[derive(Debug)]
struct PendingSymbol {
    name: String,
    /// The explicit binding directive, if any; `None` means local.
    binding: Option<SymbolBinding>,
    /// The definition, once the label has been seen.
    definition: Option<Definition>,
    entry: bool,
}

#[derive(Debug)]
struct Definition {
    value: Address,
    section_index: usize,
}

/// The symbol table of one translation unit.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<PendingSymbol>,
    by_name: HashMap<String, usize>,
    entry: Option<usize>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, name: &str) -> usize {
        match self.by_name.get(name) {
            Some(index) => *index,
            None => {
                let index = self.symbols.len();

                self.symbols.push(PendingSymbol {
                    name: name.to_owned(),
                    binding: None,
                    definition: None,
                    entry: false,
                });
                self.by_name.insert(name.to_owned(), index);

                index
            }
        }
    }

    /// Bind a label to an address within a section.
    pub(crate) fn define(
        &mut self,
        name: &str,
        value: Address,
        section_index: usize,
    ) -> Result<(), Error> {
        let index = self.slot(name);
        let symbol = &mut self.symbols[index];

        if symbol.definition.is_some() {
            match symbol.binding {
                // A local symbol may be redefined; the later definition wins.
                None => {}
                Some(_) => return Err(Error::Redefinition(name.to_owned())),
            }
        }

        if symbol.binding == Some(SymbolBinding::Extern) {
            return Err(Error::BindingConflict(
                name.to_owned(),
                "extern".to_owned(),
                "defined in this unit".to_owned(),
            ));
        }

        symbol.definition = Some(Definition { value, section_index });

        Ok(())
    }

    /// Apply a `global`, `weak` or `extern` directive.
    pub(crate) fn mark(&mut self, name: &str, binding: SymbolBinding) -> Result<(), Error> {
        debug_assert_ne!(binding, SymbolBinding::Local, "`local` is the default, never marked");

        let index = self.slot(name);
        let symbol = &mut self.symbols[index];

        if binding == SymbolBinding::Extern && symbol.definition.is_some() {
            return Err(Error::BindingConflict(
                name.to_owned(),
                "extern".to_owned(),
                "defined in this unit".to_owned(),
            ));
        }

        match symbol.binding {
            None => {
                symbol.binding = Some(binding);

                Ok(())
            }

            // Repeating the same directive is harmless.
            Some(existing) if existing == binding => Ok(()),

            Some(existing) => Err(Error::BindingConflict(
                name.to_owned(),
                binding_name(existing).to_owned(),
                binding_name(binding).to_owned(),
            )),
        }
    }

    /// Apply an `entry` directive: at most one per unit.
    pub(crate) fn mark_entry(&mut self, name: &str) -> Result<(), Error> {
        if let Some(previous) = self.entry {
            if self.symbols[previous].name != name {
                return Err(Error::DuplicateEntry(
                    name.to_owned(),
                    self.symbols[previous].name.clone(),
                ));
            }

            return Ok(());
        }

        let index = self.slot(name);
        self.symbols[index].entry = true;
        self.entry = Some(index);

        Ok(())
    }

    /// Turn the table into the object's symbol list, plus a name → index
    /// map for relocation records.
    ///
    /// `sections` is the final section list; a defined symbol takes its
    /// type from the section it lives in.
    pub(crate) fn finalize(
        &self,
        sections: &[Section<'_>],
    ) -> Result<(Vec<Symbol>, HashMap<String, u32>), Error> {
        let mut symbols = Vec::with_capacity(self.symbols.len());
        let mut index_of = HashMap::with_capacity(self.symbols.len());

        for pending in &self.symbols {
            let binding = pending.binding.unwrap_or(SymbolBinding::Local);

            let symbol = match (&pending.definition, binding) {
                (None, SymbolBinding::Extern) => Symbol {
                    name: BString::from(pending.name.as_str()),
                    value: Address(0),
                    section: SectionRef::Undefined,
                    r#type: SymbolType::NoType,
                    binding,
                    flags: SymbolFlags::EMPTY,
                },

                // `global`/`weak` promise a definition in this unit; a bare
                // reference that never got one is also an error.
                (None, _) => return Err(Error::UndefinedSymbol(pending.name.clone())),

                (Some(definition), _) => {
                    let r#type = match sections[definition.section_index].r#type {
                        SectionType::Code => SymbolType::Label,
                        _ => SymbolType::Data,
                    };

                    Symbol {
                        name: BString::from(pending.name.as_str()),
                        value: definition.value,
                        section: SectionRef::Index(definition.section_index),
                        r#type,
                        binding,
                        flags: if pending.entry {
                            SymbolFlag::Entry.into()
                        } else {
                            SymbolFlags::EMPTY
                        },
                    }
                }
            };

            if pending.entry && pending.definition.is_none() {
                return Err(Error::UndefinedSymbol(pending.name.clone()));
            }

            index_of.insert(pending.name.clone(), symbols.len() as u32);
            symbols.push(symbol);
        }

        Ok((symbols, index_of))
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, name: &str) -> Option<Address> {
        self.by_name
            .get(name)
            .and_then(|index| self.symbols[*index].definition.as_ref())
            .map(|definition| definition.value)
    }
}

fn binding_name(binding: SymbolBinding) -> &'static str {
    match binding {
        SymbolBinding::Local => "local",
        SymbolBinding::Global => "global",
        SymbolBinding::Extern => "extern",
        SymbolBinding::Weak => "weak",
    }
}
