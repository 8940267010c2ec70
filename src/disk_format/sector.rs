use std::mem::size_of;

/// size of a disk sector in bytes
pub const SECTOR_SIZE: usize = 512;

/// number of map bits held by one bitmap sector
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

pub type Sector = [u8; SECTOR_SIZE];
const_assert!(size_of::<Sector>() == SECTOR_SIZE);

/// The boot sector occupies sector zero. Its contents are opaque to the
/// engine.
pub const BOOT_SECTOR: usize = 0;
