use std::mem::size_of;

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::fs::InodeNumber;

use super::sector::SECTOR_SIZE;

/// The number of bytes occupied by one inode record.
pub const INODE_SIZE: usize = 64;
const_assert!(size_of::<DiskInode>() == INODE_SIZE);

const_assert!(SECTOR_SIZE % INODE_SIZE == 0);
/// The number of inode records that fit in a sector.
pub const INODES_PER_SECTOR: usize = SECTOR_SIZE / INODE_SIZE;

/// Length of the binary content digest stored in each inode.
pub const DIGEST_LEN: usize = 16;

/// The root directory occupies the first allocated inode.
pub const ROOT_INODE: InodeNumber = 1;

/// `rdev` value reported by stat for anything that is not a device node.
pub const NO_DEV: u32 = u32::MAX;

/// A free inode record. Inode records are zeroed on release.
pub const FREE_INODE: DiskInode = DiskInode {
    mode: InodeMode::Free,
    dev: 0,
    ino: 0,
    size: 0,
    start_sect: 0,
    nr_sects: 0,
    digest: [0; DIGEST_LEN],
    reserved: [0; 28],
};

/// An on-disk inode record, packed at a fixed stride in the inode table and
/// addressed by inode number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct DiskInode {
    /// file type tag
    pub mode: InodeMode,
    /// owning device id
    pub dev: u16,
    /// inode number
    pub ino: u32,
    /// file size in bytes
    pub size: u32,
    /// first sector of the file's contiguous run; device minor for
    /// char-special nodes
    pub start_sect: u32,
    /// length of the run in sectors
    pub nr_sects: u32,
    /// keyed content digest; meaningful only when `mode` is `Regular`
    pub digest: [u8; DIGEST_LEN],
    pub reserved: [u8; 28],
}

impl DiskInode {
    /// Byte capacity of the file's sector run. Writes never extend a file
    /// past this.
    pub fn capacity(&self) -> usize {
        self.nr_sects as usize * SECTOR_SIZE
    }

    /// Whether the inode describes a device node or a pipe.
    pub fn is_special(&self) -> bool {
        matches!(
            self.mode,
            InodeMode::CharSpecial | InodeMode::BlockSpecial | InodeMode::NamedPipe
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u16)]
pub enum InodeMode {
    /// This inode is not in use for any file.
    Free = 0,
    /// This inode describes a directory.
    Directory = 1,
    /// This inode describes a regular data file.
    Regular = 2,
    /// This inode describes a character-special device node.
    CharSpecial = 3,
    /// This inode describes a block-special device node.
    BlockSpecial = 4,
    /// This inode describes a named pipe.
    NamedPipe = 5,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_size() {
        let serialized = bincode::serialize(&FREE_INODE).unwrap();
        assert_eq!(serialized.len(), INODE_SIZE);
    }

    #[test]
    fn test_zeroed_record_is_free() {
        let inode: DiskInode = bincode::deserialize(&[0u8; INODE_SIZE]).unwrap();
        assert_eq!(inode, FREE_INODE);
    }

    #[test]
    fn test_capacity() {
        let mut inode = FREE_INODE;
        inode.nr_sects = 3;
        assert_eq!(inode.capacity(), 3 * SECTOR_SIZE);
    }
}
