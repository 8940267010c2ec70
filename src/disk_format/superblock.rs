use std::mem::size_of;

use serde::{Deserialize, Serialize};

use super::sector::SECTOR_SIZE;

/// Identifies a formatted device.
pub const SUPERBLOCK_MAGIC: u32 = 0x464c_4653; // "FLFS"

/// On-disk format version.
pub const SUPERBLOCK_VERSION: u32 = 1;

/// The sector that holds the superblock. It occupies the first
/// [`SUPERBLOCK_SIZE`] bytes of that sector.
pub const SUPERBLOCK_SECTOR: usize = 1;

/// The number of bytes occupied by the superblock.
pub const SUPERBLOCK_SIZE: usize = 64;
const_assert!(size_of::<SuperBlock>() == SUPERBLOCK_SIZE);
const_assert!(SUPERBLOCK_SIZE <= SECTOR_SIZE);

/// Per-device constants. Written once at format time, loaded once at mount,
/// immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct SuperBlock {
    pub magic: u32,
    pub version: u32,
    /// Total sectors on the device.
    pub nr_sects: u32,
    /// Highest valid inode number. Inode numbers start at one.
    pub nr_inodes: u32,
    /// Sectors occupied by the inode-number bitmap.
    pub nr_imap_sects: u32,
    /// Sectors occupied by the data-sector bitmap.
    pub nr_smap_sects: u32,
    /// Sectors occupied by the inode table.
    pub nr_inode_sects: u32,
    /// First data sector. Sector-map bit zero refers to it.
    pub first_data_sect: u32,
    /// Inode number of the root directory.
    pub root_inode: u32,
    pub reserved: [u8; 28],
}

impl SuperBlock {
    /// First sector of the inode-number bitmap: right after the boot sector
    /// and the superblock.
    pub fn imap_first_sect(&self) -> usize {
        1 + 1
    }

    /// First sector of the data-sector bitmap.
    pub fn smap_first_sect(&self) -> usize {
        self.imap_first_sect() + self.nr_imap_sects as usize
    }

    /// First sector of the inode table.
    pub fn inode_table_first_sect(&self) -> usize {
        self.smap_first_sect() + self.nr_smap_sects as usize
    }

    /// Number of data sectors tracked by the sector map.
    pub fn nr_data_sects(&self) -> usize {
        self.nr_sects as usize - self.first_data_sect as usize
    }
}
