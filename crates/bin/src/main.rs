//! `g10-bin` is the executable of the G10 linker.
//!
//! `g10ld` combines relocatable G10 object files, resolves symbols, patches
//! relocations, and produces an executable program image for the simulator.

mod error;

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
    process,
    time::{SystemTime, UNIX_EPOCH},
};

use argh::FromArgs;
use error::Error;
use g10_errors::Result;
use g10_linker::Configuration;
use g10_object::g10::ProgramInfo;

fn default_output_file() -> PathBuf {
    PathBuf::from("a.g10p")
}

fn parse_address(value: &str) -> Result<u32, String> {
    let (digits, radix) = match value.strip_prefix("0x") {
        Some(digits) => (digits, 16),
        None => (value, 10),
    };

    u32::from_str_radix(digits, radix)
        .map_err(|_| format!("`{value}` is not a 32-bit address (try `0xfffffffc`)"))
}

/// The `g10ld` command links G10 object files: it combines them, resolves
/// symbols across them, and produces an executable program image.
#[derive(Debug, FromArgs)]
struct G10Ld {
    /// explain a particular error based on its code (of kind `E...`).
    #[argh(option)]
    explain: Option<String>,

    /// input object files.
    #[argh(positional)]
    input_files: Vec<PathBuf>,

    /// specify the name and location of the output file. If not specified,
    /// `a.g10p` is used.
    #[argh(option, short = 'o', default = "default_output_file()")]
    output_file: PathBuf,

    /// entry symbol, overriding the entry-flag/`main`/`_start` selection.
    #[argh(option, short = 'e')]
    entry: Option<String>,

    /// initial stack pointer, overriding the default `0xfffffffc`.
    #[argh(option, from_str_fn(parse_address))]
    stack_pointer: Option<u32>,

    /// program name to embed in the image's information record.
    #[argh(option)]
    program_name: Option<String>,

    /// program author to embed in the image's information record.
    #[argh(option)]
    program_author: Option<String>,
}

impl G10Ld {
    /// Creates a new `Self` type based on [`std::env::args_os`].
    fn new() -> Result<Self, Error> {
        // Collect all arguments.
        let arguments =
            env::args_os().map(OsString::into_string).collect::<Result<Vec<_>, _>>().map_err(
                |argument| Error::InvalidArgumentEncoding(argument.to_string_lossy().to_string()),
            )?;

        // Check whether `argv` is present.
        if arguments.is_empty() {
            return Err(Error::ProgramNameIsMissing);
        }

        // Extract the base command from a path.
        let command = Path::new(&arguments[0])
            .file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(&arguments[0]);

        // Extract all arguments.
        let arguments =
            arguments.iter().skip(1).map(|argument| argument.as_str()).collect::<Vec<_>>();

        // Parse and build `Self`.
        match G10Ld::from_args(&[command], &arguments) {
            Ok(g10ld) => Ok(g10ld),
            Err(early_exit) => match early_exit.status {
                // The command was parsed successfully and the early exit is due to a flag like
                // `--help` causing early exit with output.
                Ok(()) => {
                    println!("{}", early_exit.output);

                    process::exit(0);
                }

                // The arguments were not successfully parsed.
                Err(()) => Err(Error::CommandLine(early_exit.output.trim().to_string())),
            },
        }
    }

    fn program_info(&self) -> Option<ProgramInfo> {
        if self.program_name.is_none() && self.program_author.is_none() {
            return None;
        }

        let build_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |duration| duration.as_secs() as u32);

        Some(ProgramInfo {
            name: self.program_name.clone().unwrap_or_default().into(),
            version: String::new().into(),
            author: self.program_author.clone().unwrap_or_default().into(),
            description: String::new().into(),
            build_date,
            checksum: 0,
        })
    }
}

fn main() -> Result<()> {
    // Install the error report.
    Error::install_and_configure()?;

    // Build the command-line arguments.
    let g10ld = G10Ld::new()?;

    // Handle the `--explain` option.
    if let Some(error_code) = &g10ld.explain {
        println!("{}", Error::explain(error_code)?);

        return Ok(());
    }

    let info = g10ld.program_info();

    // Configure and create the linker.
    let linker = Configuration::new(g10ld.input_files, g10ld.output_file)
        .with_entry(g10ld.entry)
        .with_initial_stack_pointer(g10ld.stack_pointer)
        .with_info(info)
        .linker();

    // Take a deep breath, and here we are!
    linker.link()?;

    Ok(())
}
