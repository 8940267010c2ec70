use crate::disk_format::sector::Sector;
use crate::error::Result;
use crate::fs::SectorNumber;

/// Synchronous sector-granular access to a device.
///
/// The engine treats sector I/O as blocking; a failure mid-operation is
/// fatal to the request in progress and is never retried.
pub trait SectorDevice {
    fn read_sector(&self, sector: SectorNumber) -> Result<Sector>;

    fn write_sector(&self, sector: SectorNumber, data: Sector) -> Result<()>;
}
