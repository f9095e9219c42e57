//! `mmap(2)`-backed file contents.

use std::{ffi::c_void, fs, io, ptr, slice};

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

/// A read-only private mapping of a whole file.
///
/// The mapping stays valid after the file descriptor it was created from is
/// closed, so it owns nothing but the pages.
#[derive(Debug)]
pub(crate) struct Mapping {
    pointer: *const c_void,
    length: usize,
}

impl Mapping {
    /// Map `length` bytes of `file`. `length` must not be zero.
    pub(crate) fn new(file: &fs::File, length: usize) -> io::Result<Self> {
        debug_assert!(length > 0, "`mmap(2)` rejects empty mappings");

        // SAFETY: the length is non-zero and the descriptor is valid for
        // the duration of the call.
        let pointer = unsafe {
            mmap(ptr::null_mut(), length, ProtFlags::READ, MapFlags::PRIVATE, file, 0)
                .map_err(|errno| io::Error::from_raw_os_error(errno.raw_os_error()))?
        };

        Ok(Self { pointer, length })
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        // SAFETY: `pointer` maps exactly `length` readable bytes for as
        // long as `self` lives.
        unsafe { slice::from_raw_parts(self.pointer.cast(), self.length) }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: `pointer` and `length` come from a successful `mmap`.
        unsafe { munmap(self.pointer as *mut _, self.length) }
            .expect("`munmap(2)` does not fail on a live mapping");
    }
}

// SAFETY: the mapping is read-only and tied to no thread-local state.
unsafe impl Send for Mapping {}

// SAFETY: no interior mutability; shared reads are plain memory reads.
unsafe impl Sync for Mapping {}
