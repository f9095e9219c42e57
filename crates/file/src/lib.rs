//! `g10_file` is the file-system boundary of the toolchain: it reads the
//! files the drivers consume and writes the files they produce.
//!
//! Both codecs parse in one pass over one byte slice, so inputs are
//! whole-file reads: [`InputFile`] memory-maps the file where it can (unix)
//! and falls back to a buffered read elsewhere, and for empty files, which
//! `mmap(2)` rejects. Failures carry the offending path and the same `E…`
//! diagnostic codes as the rest of the toolchain, so a driver can forward
//! them unchanged.

#![deny(unused)]
#![deny(warnings)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::missing_crate_level_docs)]
#![deny(rustdoc::invalid_codeblock_attributes)]
#![deny(rustdoc::invalid_rust_codeblocks)]

#[cfg(unix)]
mod mapping;

use std::{
    fs,
    io::{self, Read as _},
    path::{Path, PathBuf},
};

use g10_errors::error;

error! {
    #[doc = "Errors raised at the file-system boundary."]
    pub enum Error {
        #[code = E021]
        #[message = "An input file could not be opened."]
        #[formatted_message("I was not able to open `{0}`: {1}.")]
        #[help = "Check that the path exists and is readable."]
        Open(String, io::Error),

        #[code = E021]
        #[message = "An input file could not be read."]
        #[formatted_message("I was not able to read `{0}`: {1}.")]
        #[help = "The file was opened but reading it back failed; check the device it lives on."]
        Read(String, io::Error),

        #[code = E021]
        #[message = "An input file could not be memory-mapped."]
        #[formatted_message("I was not able to map `{0}`: {1}.")]
        #[help = "The operating system refused the mapping; a buffered read may still work on a copy of the file."]
        Map(String, io::Error),

        #[code = E021]
        #[message = "An output file could not be written."]
        #[formatted_message("I was not able to write `{0}`: {1}.")]
        #[help = "Check that the destination directory exists and is writable."]
        Write(String, io::Error),
    }
}

/// An input file, held in memory in whole.
#[derive(Debug)]
pub struct InputFile {
    path: PathBuf,
    contents: Contents,
}

#[derive(Debug)]
enum Contents {
    /// Read into an owned buffer.
    Buffered(Vec<u8>),
    /// Memory-mapped.
    #[cfg(unix)]
    Mapped(mapping::Mapping),
}

impl InputFile {
    /// Open `path` and make its whole content addressable.
    pub fn open<P>(path: P) -> Result<Self, Error>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref().to_path_buf();
        let display = || path.display().to_string();

        let mut file = fs::File::open(&path).map_err(|error| Error::Open(display(), error))?;

        #[cfg(unix)]
        {
            let length = file
                .metadata()
                .map_err(|error| Error::Open(display(), error))?
                .len();

            // `mmap(2)` rejects empty mappings; an empty file takes the
            // buffered path below, which reads nothing.
            if let Ok(length @ 1..) = usize::try_from(length) {
                let mapping = mapping::Mapping::new(&file, length)
                    .map_err(|error| Error::Map(display(), error))?;

                return Ok(Self { path, contents: Contents::Mapped(mapping) });
            }
        }

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer).map_err(|error| Error::Read(display(), error))?;

        Ok(Self { path, contents: Contents::Buffered(buffer) })
    }

    /// The path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The display name used in diagnostics.
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }

    /// The whole file content.
    pub fn bytes(&self) -> &[u8] {
        match &self.contents {
            Contents::Buffered(buffer) => buffer,
            #[cfg(unix)]
            Contents::Mapped(mapping) => mapping.bytes(),
        }
    }
}

/// Write a produced artefact in one shot.
pub fn write_output<P>(path: P, bytes: &[u8]) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();

    fs::write(path, bytes).map_err(|error| Error::Write(path.display().to_string(), error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_reads_the_whole_file() {
        let file = InputFile::open("tests/hello.txt").unwrap();

        assert_eq!(file.bytes(), b"abcdef");
        assert_eq!(file.name(), "tests/hello.txt");
        assert_eq!(file.path(), Path::new("tests/hello.txt"));
    }

    #[test]
    fn test_missing_file_is_reported_with_its_path() {
        let error = InputFile::open("tests/missing.txt").unwrap_err();

        assert!(matches!(error, Error::Open(path, _) if path == "tests/missing.txt"));
    }

    #[test]
    fn test_empty_file_is_buffered() {
        let path = std::env::temp_dir().join("g10-file-empty.bin");
        fs::write(&path, b"").unwrap();

        let file = InputFile::open(&path).unwrap();
        assert!(file.bytes().is_empty());

        drop(file);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_output_round_trips() {
        let path = std::env::temp_dir().join("g10-file-output.bin");

        write_output(&path, b"G10P\x00\x01").unwrap();

        let reread = InputFile::open(&path).unwrap();
        assert_eq!(reread.bytes(), b"G10P\x00\x01");

        drop(reread);
        fs::remove_file(&path).unwrap();
    }
}
