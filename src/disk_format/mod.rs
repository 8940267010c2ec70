//! Constants and structures that define the on-disk format.
//!
//! The layout, in sector order: one boot sector, one superblock sector, the
//! inode-map sectors, the sector-map sectors, the inode table, then data
//! sectors. Every record is a fixed-width little-endian structure whose size
//! is pinned by a const assertion.

/// Perform a const assertion.
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    }
}

/// Directory entries and entry names.
pub mod directory_entry;
/// Inode records.
pub mod inode;
/// Sectors and the boot sector.
pub mod sector;
/// The superblock.
pub mod superblock;
