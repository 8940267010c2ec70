use std::fmt::{self, Debug};
use std::mem::size_of;

use serde::{Deserialize, Serialize};

use crate::fs::InodeNumber;

use super::sector::SECTOR_SIZE;

/// The number of bytes occupied by a directory entry.
pub const DIR_ENTRY_SIZE: usize = 16;
const_assert!(size_of::<DirEntry>() == DIR_ENTRY_SIZE);

const_assert!(SECTOR_SIZE % DIR_ENTRY_SIZE == 0);
/// The number of directory entries that fit in a sector.
pub const DIR_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

/// The maximum supported length of a file name. Longer names are truncated.
pub const MAX_NAME_LEN: usize = 12;
const_assert!(size_of::<FileName>() == MAX_NAME_LEN);

/// A free directory entry (a tombstone, once a file occupied the slot).
pub const FREE_DIR_ENTRY: DirEntry = DirEntry {
    ino: 0,
    name: FileName([0; MAX_NAME_LEN]),
};

/// An element of the root directory's byte content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct DirEntry {
    /// The inode number. Zero marks the slot free.
    pub ino: InodeNumber,
    /// The name of the entry.
    pub name: FileName,
}

impl DirEntry {
    pub fn new(ino: InodeNumber, name: FileName) -> DirEntry {
        DirEntry { ino, name }
    }
}

/// A name, as used in [`DirEntry`]: NUL-padded bytes with no separator
/// characters.
///
/// Names are compared over the full padded width, so a name is equal to
/// another only if both the bytes and the padding agree.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(C)]
pub struct FileName([u8; MAX_NAME_LEN]);

impl FileName {
    /// Builds a name from caller-supplied bytes, truncating anything past
    /// [`MAX_NAME_LEN`]. Callers pass length-delimited buffers, not
    /// NUL-terminated strings.
    pub fn from_bytes(bytes: &[u8]) -> FileName {
        let len = bytes.len().min(MAX_NAME_LEN);
        let mut converted = [0; MAX_NAME_LEN];
        converted[..len].copy_from_slice(&bytes[..len]);

        FileName(converted)
    }

    /// The name bytes up to the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
        &self.0[..end]
    }

    /// An empty name refers to the root directory itself.
    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileName")
            .field(&String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_size() {
        let entry = DirEntry::new(7, FileName::from_bytes(b"hello"));
        let serialized = bincode::serialize(&entry).unwrap();
        assert_eq!(serialized.len(), DIR_ENTRY_SIZE);
    }

    #[test]
    fn test_truncates_long_names() {
        let name = FileName::from_bytes(b"a-rather-long-name");
        assert_eq!(name.as_bytes(), b"a-rather-lon");
    }

    #[test]
    fn test_padding_is_significant() {
        assert_eq!(FileName::from_bytes(b"abc"), FileName::from_bytes(b"abc"));
        assert_ne!(FileName::from_bytes(b"abc"), FileName::from_bytes(b"abcd"));
    }

    #[test]
    fn test_empty() {
        assert!(FileName::from_bytes(b"").is_empty());
        assert!(!FileName::from_bytes(b"a").is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(FileName::from_bytes(b"cmd.tar").to_string(), "cmd.tar");
    }
}
