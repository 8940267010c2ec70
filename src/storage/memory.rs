use std::cell::RefCell;

use crate::disk_format::sector::{Sector, SECTOR_SIZE};
use crate::error::{FsError, Result};
use crate::fs::SectorNumber;

use super::sector_device::SectorDevice;

/// An in-memory disk. Used by tests and as scratch storage.
pub struct MemDisk {
    sectors: RefCell<Vec<Sector>>,
}

impl MemDisk {
    /// Creates a zero-filled disk of `nr_sects` sectors.
    pub fn new(nr_sects: usize) -> Self {
        MemDisk {
            sectors: RefCell::new(vec![[0; SECTOR_SIZE]; nr_sects]),
        }
    }
}

impl SectorDevice for MemDisk {
    fn read_sector(&self, sector: SectorNumber) -> Result<Sector> {
        self.sectors
            .borrow()
            .get(sector)
            .copied()
            .ok_or(FsError::SectorOutOfRange(sector))
    }

    fn write_sector(&self, sector: SectorNumber, data: Sector) -> Result<()> {
        let mut sectors = self.sectors.borrow_mut();
        let slot = sectors
            .get_mut(sector)
            .ok_or(FsError::SectorOutOfRange(sector))?;
        *slot = data;

        Ok(())
    }
}
