use std::path::PathBuf;

use g10_object::g10::{Address, ProgramInfo};

use crate::{LinkOptions, Linker};

/// Everything one link needs: the input object paths, the output path, and
/// the pipeline options.
#[derive(Debug)]
pub struct Configuration {
    pub(crate) input_files: Vec<PathBuf>,
    pub(crate) output_file: PathBuf,
    pub(crate) options: LinkOptions,
}

impl Configuration {
    /// A configuration with default options.
    pub fn new(input_files: Vec<PathBuf>, output_file: PathBuf) -> Self {
        Self { input_files, output_file, options: LinkOptions::default() }
    }

    /// Override the entry symbol.
    pub fn with_entry(mut self, entry: Option<String>) -> Self {
        self.options.entry = entry;

        self
    }

    /// Override the initial stack pointer.
    pub fn with_initial_stack_pointer(mut self, address: Option<u32>) -> Self {
        self.options.initial_stack_pointer = address.map(Address);

        self
    }

    /// Embed a program information record.
    pub fn with_info(mut self, info: Option<ProgramInfo>) -> Self {
        self.options.info = info;

        self
    }

    /// Configure and create the linker.
    pub fn linker(self) -> Linker {
        Linker::with_configuration(self)
    }
}
