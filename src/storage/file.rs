use std::fs::File;
use std::os::unix::prelude::FileExt;

use crate::disk_format::sector::{Sector, SECTOR_SIZE};
use crate::error::Result;
use crate::fs::SectorNumber;

use super::sector_device::SectorDevice;

/// A disk backed by an image file.
pub struct FileBackedDisk(File);

impl FileBackedDisk {
    pub fn new(file: File) -> Self {
        FileBackedDisk(file)
    }
}

impl SectorDevice for FileBackedDisk {
    fn read_sector(&self, sector: SectorNumber) -> Result<Sector> {
        let mut buf = [0; SECTOR_SIZE];
        let position = sector * SECTOR_SIZE;

        self.0.read_exact_at(&mut buf, position as u64)?;

        Ok(buf)
    }

    fn write_sector(&self, sector: SectorNumber, data: Sector) -> Result<()> {
        let position = sector * SECTOR_SIZE;

        self.0.write_all_at(&data, position as u64)?;

        Ok(())
    }
}
