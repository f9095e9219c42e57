//! String table building and lookup.
//!
//! Both containers store names in one raw blob of null-terminated strings.
//! Offset 0 always holds the empty string, so “no name” and “offset 0”
//! coincide.

use std::collections::HashMap;

use bstr::{BStr, BString};

/// An append-only string table, deduplicating identical names.
#[derive(Debug)]
pub struct StringTable {
    data: Vec<u8>,
    offsets: HashMap<BString, u32>,
}

impl StringTable {
    /// Create a string table holding only the empty string, at offset 0.
    pub fn new() -> Self {
        Self { data: vec![0x00], offsets: HashMap::new() }
    }

    /// Intern `name` and return its offset.
    ///
    /// The same name is stored once; the empty name is always offset 0.
    pub fn insert(&mut self, name: &BStr) -> u32 {
        if name.is_empty() {
            return 0;
        }

        if let Some(offset) = self.offsets.get(name) {
            return *offset;
        }

        let offset =
            self.data.len().try_into().expect("String table has grown past `u32::MAX` bytes");

        self.data.extend_from_slice(name);
        self.data.push(0x00);
        self.offsets.insert(name.to_owned(), offset);

        offset
    }

    /// The raw table bytes, as serialised into a file.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Size of the raw table, in bytes.
    pub fn len(&self) -> u32 {
        self.data.len().try_into().expect("String table has grown past `u32::MAX` bytes")
    }

    /// A freshly created table is never empty: it holds the empty string.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the string at a specific offset of a raw table, if and only if the
/// offset exists and the string is null-terminated.
///
/// The string is not guaranteed to be valid UTF-8. It is a bytes slice,
/// `&[u8]`.
pub fn string_at_offset(table: &[u8], offset: usize) -> Option<&BStr> {
    if offset >= table.len() {
        return None;
    }

    let name = &table[offset..];

    name.iter().position(|c| *c == 0x00).map(|name_end| BStr::new(&name[..name_end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_deduplicates() {
        let mut table = StringTable::new();

        assert_eq!(table.insert(BStr::new("")), 0);
        assert_eq!(table.insert(BStr::new("start")), 1);
        assert_eq!(table.insert(BStr::new("loop")), 7);
        assert_eq!(table.insert(BStr::new("start")), 1);
        assert_eq!(table.as_bytes(), b"\x00start\x00loop\x00");
        assert_eq!(table.len(), 12);
    }

    #[test]
    fn test_string_at_offset() {
        let table: &[u8] = &[0x00, 0x61, 0x62, 0x63, 0x00, 0x64, 0x65, 0x00, 0x66];

        assert_eq!(string_at_offset(table, 0), Some(BStr::new("")));
        assert_eq!(string_at_offset(table, 1), Some(BStr::new("abc")));
        assert_eq!(string_at_offset(table, 2), Some(BStr::new("bc")));
        assert_eq!(string_at_offset(table, 4), Some(BStr::new("")));
        assert_eq!(string_at_offset(table, 5), Some(BStr::new("de")));
        assert_eq!(string_at_offset(table, 8), None);
        assert_eq!(string_at_offset(table, 9), None);
        assert_eq!(string_at_offset(table, 10), None);
    }
}
