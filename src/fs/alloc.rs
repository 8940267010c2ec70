//! The bitmap allocator: single-bit allocation in the inode map, contiguous
//! run allocation in the sector map, and assert-checked release for both.

use bitvec::prelude::*;
use log::warn;

use crate::disk_format::sector::SECTOR_BITS;
use crate::error::{FsError, Result};
use crate::storage::SectorDevice;

use super::{FlatFs, InodeNumber, SectorNumber};

impl<S: SectorDevice> FlatFs<S> {
    /// Allocates the first clear bit of the inode map, scanning sector by
    /// sector. There is no fallback: an exhausted map fails the request.
    pub(crate) fn alloc_imap_bit(&mut self) -> Result<InodeNumber> {
        let imap_first = self.superblock.imap_first_sect();

        for i in 0..self.superblock.nr_imap_sects as usize {
            let mut sector = self.device.read_sector(imap_first + i)?;
            let bits = sector.view_bits_mut::<Lsb0>();

            if let Some(bit) = bits.first_zero() {
                bits.set(bit, true);
                self.device.write_sector(imap_first + i, sector)?;

                return Ok((i * SECTOR_BITS + bit) as InodeNumber);
            }
        }

        warn!("inode map is full");
        Err(FsError::SpaceExhausted)
    }

    /// Releases one inode-map bit. The bit must currently be set; a clear
    /// bit means the maps no longer agree with the inode table.
    pub(crate) fn free_imap_bit(&mut self, ino: InodeNumber) -> Result<()> {
        let bit = ino as usize;
        if bit >= self.superblock.nr_imap_sects as usize * SECTOR_BITS {
            return Err(FsError::Corruption(format!(
                "inode {ino} beyond the inode map"
            )));
        }

        clear_map_bits(
            &self.device,
            self.superblock.imap_first_sect(),
            bit,
            1,
            &format!("inode map bit {bit}"),
        )
    }

    /// Allocates a contiguous run of up to `requested` clear sector-map
    /// bits. When no run of the requested length exists, the request is
    /// halved and retried until a single sector either succeeds or the map
    /// is exhausted. The actual count never exceeds the requested count.
    pub(crate) fn alloc_sector_run(&mut self, requested: usize) -> Result<(SectorNumber, usize)> {
        let desired = requested.max(1);

        let mut attempt = desired;
        while attempt >= 1 {
            if let Some(start_bit) = self.find_free_run(attempt)? {
                mark_map_bits(
                    &self.device,
                    self.superblock.smap_first_sect(),
                    start_bit,
                    attempt,
                    "sector map",
                )?;

                if attempt != desired {
                    warn!("sector run degraded from {desired} to {attempt} sectors");
                }

                let start_sect = self.superblock.first_data_sect as usize + start_bit;
                return Ok((start_sect, attempt));
            }

            attempt >>= 1;
        }

        warn!("no free sector run of any length");
        Err(FsError::SpaceExhausted)
    }

    /// Releases the sector-map bits of a file's run. Every bit must
    /// currently be set.
    pub(crate) fn free_sector_run(&mut self, start_sect: SectorNumber, count: usize) -> Result<()> {
        let first_data = self.superblock.first_data_sect as usize;
        let map_bits = self.superblock.nr_smap_sects as usize * SECTOR_BITS;

        if start_sect < first_data || count == 0 || start_sect - first_data + count > map_bits {
            return Err(FsError::Corruption(format!(
                "invalid sector run release: start {start_sect}, count {count}"
            )));
        }

        clear_map_bits(
            &self.device,
            self.superblock.smap_first_sect(),
            start_sect - first_data,
            count,
            "sector map",
        )
    }

    /// First-fit search for `wanted` contiguous clear bits. Runs may span
    /// bitmap sector boundaries.
    fn find_free_run(&mut self, wanted: usize) -> Result<Option<usize>> {
        let smap_first = self.superblock.smap_first_sect();

        let mut run_start = 0;
        let mut run_len = 0;

        for i in 0..self.superblock.nr_smap_sects as usize {
            let sector = self.device.read_sector(smap_first + i)?;
            let bits = sector.view_bits::<Lsb0>();

            for (j, bit) in bits.iter().by_vals().enumerate() {
                if bit {
                    run_len = 0;
                    continue;
                }

                if run_len == 0 {
                    run_start = i * SECTOR_BITS + j;
                }

                run_len += 1;
                if run_len == wanted {
                    return Ok(Some(run_start));
                }
            }
        }

        Ok(None)
    }

    /// Whether an inode-map bit is set. Used by the consistency check.
    pub(crate) fn imap_bit(&self, ino: InodeNumber) -> Result<bool> {
        let bit = ino as usize;
        let sector = self
            .device
            .read_sector(self.superblock.imap_first_sect() + bit / SECTOR_BITS)?;

        Ok(sector.view_bits::<Lsb0>()[bit % SECTOR_BITS])
    }
}

/// Sets `count` map bits starting at `start_bit`, spanning bitmap sectors
/// as needed. Setting an already-set bit is an invariant violation.
pub(crate) fn mark_map_bits<S: SectorDevice>(
    device: &S,
    map_first_sect: SectorNumber,
    start_bit: usize,
    count: usize,
    what: &str,
) -> Result<()> {
    flip_map_bits(device, map_first_sect, start_bit, count, true, what)
}

/// Clears `count` map bits starting at `start_bit`. Clearing an
/// already-clear bit is an invariant violation.
pub(crate) fn clear_map_bits<S: SectorDevice>(
    device: &S,
    map_first_sect: SectorNumber,
    start_bit: usize,
    count: usize,
    what: &str,
) -> Result<()> {
    flip_map_bits(device, map_first_sect, start_bit, count, false, what)
}

fn flip_map_bits<S: SectorDevice>(
    device: &S,
    map_first_sect: SectorNumber,
    start_bit: usize,
    count: usize,
    value: bool,
    what: &str,
) -> Result<()> {
    let mut bit = start_bit;
    let end = start_bit + count;

    while bit < end {
        let sect_offset = bit / SECTOR_BITS;
        let mut sector = device.read_sector(map_first_sect + sect_offset)?;
        let bits = sector.view_bits_mut::<Lsb0>();

        while bit < end && bit / SECTOR_BITS == sect_offset {
            let index = bit % SECTOR_BITS;
            if bits[index] == value {
                return Err(FsError::Corruption(format!(
                    "{what}: bit {bit} already {}",
                    if value { "set" } else { "clear" }
                )));
            }

            bits.set(index, value);
            bit += 1;
        }

        device.write_sector(map_first_sect + sect_offset, sector)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::fs::test_support::{test_fs, test_fs_with};
    use crate::fs::{FormatOptions, DEFAULT_FILE_SECTS};

    use super::*;

    #[test]
    fn test_first_free_inode_follows_tty_nodes() {
        // bit zero is reserved, the root is inode one, tty nodes take two
        // through four
        let mut fs = test_fs();
        assert_eq!(fs.alloc_imap_bit().unwrap(), 5);
        assert_eq!(fs.alloc_imap_bit().unwrap(), 6);
    }

    #[test]
    fn test_imap_bit_roundtrip() {
        let mut fs = test_fs();

        let ino = fs.alloc_imap_bit().unwrap();
        assert!(fs.imap_bit(ino).unwrap());

        fs.free_imap_bit(ino).unwrap();
        assert!(!fs.imap_bit(ino).unwrap());

        // freed bits are handed out again
        assert_eq!(fs.alloc_imap_bit().unwrap(), ino);
    }

    #[test]
    fn test_imap_exhaustion() {
        let mut fs = test_fs();

        for _ in 0..fs.superblock.nr_inodes - 4 {
            fs.alloc_imap_bit().unwrap();
        }

        assert!(matches!(
            fs.alloc_imap_bit(),
            Err(FsError::SpaceExhausted)
        ));
    }

    #[test]
    fn test_double_free_is_corruption() {
        let mut fs = test_fs();

        let ino = fs.alloc_imap_bit().unwrap();
        fs.free_imap_bit(ino).unwrap();
        assert!(matches!(
            fs.free_imap_bit(ino),
            Err(FsError::Corruption(_))
        ));
    }

    #[test]
    fn test_run_allocation_is_contiguous() {
        let mut fs = test_fs();
        let first_data = fs.superblock.first_data_sect as usize;

        // the root directory holds the first run
        let (start, count) = fs.alloc_sector_run(8).unwrap();
        assert_eq!(start, first_data + DEFAULT_FILE_SECTS);
        assert_eq!(count, 8);

        let (next, _) = fs.alloc_sector_run(4).unwrap();
        assert_eq!(next, start + 8);
    }

    #[test]
    fn test_run_release_and_reuse() {
        let mut fs = test_fs();

        let (start, count) = fs.alloc_sector_run(16).unwrap();
        fs.free_sector_run(start, count).unwrap();

        let (again, _) = fs.alloc_sector_run(16).unwrap();
        assert_eq!(again, start);
    }

    #[test]
    fn test_run_double_free_is_corruption() {
        let mut fs = test_fs();

        let (start, count) = fs.alloc_sector_run(4).unwrap();
        fs.free_sector_run(start, count).unwrap();
        assert!(matches!(
            fs.free_sector_run(start, count),
            Err(FsError::Corruption(_))
        ));
    }

    #[test]
    fn test_degradation_halves_until_it_fits() {
        // geometry leaving exactly ten data sectors free after the root
        // directory's sixty-four
        let mut fs = test_fs_with(&FormatOptions {
            nr_sects: 80,
            nr_inodes: 16,
            tty_nodes: 0,
        });
        assert_eq!(fs.superblock.nr_data_sects(), DEFAULT_FILE_SECTS + 10);

        let (_, count) = fs.alloc_sector_run(DEFAULT_FILE_SECTS).unwrap();
        assert_eq!(count, 8);

        let (_, count) = fs.alloc_sector_run(DEFAULT_FILE_SECTS).unwrap();
        assert_eq!(count, 2);

        assert!(matches!(
            fs.alloc_sector_run(DEFAULT_FILE_SECTS),
            Err(FsError::SpaceExhausted)
        ));
    }

    #[test]
    fn test_actual_count_never_exceeds_requested() {
        let mut fs = test_fs();

        let (_, count) = fs.alloc_sector_run(3).unwrap();
        assert!(count <= 3);
    }

    #[test]
    fn test_runs_span_bitmap_sectors() {
        // a map hole that straddles the first smap sector boundary
        let mut fs = test_fs_with(&FormatOptions {
            nr_sects: 8192,
            nr_inodes: 16,
            tty_nodes: 0,
        });
        assert!(fs.superblock.nr_smap_sects >= 2);

        // fill up to eight bits before the boundary, then allocate across it
        let holes = SECTOR_BITS - DEFAULT_FILE_SECTS - 8;
        let (filler, count) = fs.alloc_sector_run(holes).unwrap();
        assert_eq!(count, holes);

        let (start, count) = fs.alloc_sector_run(16).unwrap();
        assert_eq!(count, 16);
        assert_eq!(start, filler + holes);

        fs.free_sector_run(start, count).unwrap();
        let (again, _) = fs.alloc_sector_run(16).unwrap();
        assert_eq!(again, start);
    }
}
