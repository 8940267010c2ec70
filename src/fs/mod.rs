//! The storage engine: sector allocation, inode lifecycle, the flat root
//! directory, and the content-integrity layer.
//!
//! The engine processes one request to completion before accepting the next;
//! mutual exclusion comes from serialization (every operation takes
//! `&mut self`), not from locks.

use std::collections::HashMap;
use std::time::Instant;

use log::info;

use crate::disk_format::inode::{DiskInode, InodeMode, INODES_PER_SECTOR, INODE_SIZE, ROOT_INODE};
use crate::disk_format::sector::{Sector, BOOT_SECTOR, SECTOR_SIZE};
use crate::disk_format::superblock::{
    SuperBlock, SUPERBLOCK_MAGIC, SUPERBLOCK_SECTOR, SUPERBLOCK_SIZE, SUPERBLOCK_VERSION,
};
use crate::error::{FsError, Result};
use crate::storage::SectorDevice;

mod alloc;
mod check;
mod dir;
mod file;
mod format;
mod integrity;

pub use dir::strip_path;
pub use file::{FileStat, Whence, O_CREAT, O_RDWR, O_TRUNC};
pub use format::{format, FormatOptions};
pub use integrity::DIGEST_SKIP_LIST;

// inode numbers are u32 on disk; number zero is invalid
pub type InodeNumber = u32;

// sector numbers are u32 on disk, but we use `usize`s to avoid littering
// the code with casts
pub type SectorNumber = usize;

/// Identity of the process a request originated from.
pub type ProcId = u32;

/// The only caller allowed to bulk-refresh digests.
pub const INIT_PROC: ProcId = 1;

/// Device id of the device the engine is mounted on.
pub const ROOT_DEV: u16 = 0;

/// Per-process descriptor table size.
pub const NR_PROC_FILES: usize = 64;

/// Global open-file table size.
pub const NR_OPEN_FILES: usize = 256;

/// Sectors pre-allocated to a new file, degraded by halving under
/// fragmentation.
pub const DEFAULT_FILE_SECTS: usize = 64;

/// One in-core inode plus its reference count. The cache slot is released
/// when the count reaches zero.
struct CachedInode {
    disk: DiskInode,
    count: u32,
}

/// An entry of the global open-file table, shared by every descriptor that
/// refers to the same open.
struct OpenFile {
    ino: InodeNumber,
    flags: u32,
    pos: usize,
    count: u32,
}

pub struct FlatFs<S: SectorDevice> {
    device: S,
    superblock: SuperBlock,
    /// In-core inodes, indexed directly by inode number. No eviction;
    /// entries persist until their reference count drops to zero.
    inode_cache: HashMap<InodeNumber, CachedInode>,
    open_files: Vec<Option<OpenFile>>,
    proc_files: HashMap<ProcId, [Option<usize>; NR_PROC_FILES]>,
    /// Boot checksum key, derived lazily on first use and never exposed.
    checksum_key: Option<u32>,
    booted: Instant,
}

impl<S: SectorDevice> FlatFs<S> {
    /// Loads and validates the superblock, probes the device, and pins the
    /// root directory inode for the life of the engine.
    pub fn mount(device: S) -> Result<Self> {
        let sector = device.read_sector(SUPERBLOCK_SECTOR)?;
        let superblock: SuperBlock = bincode::deserialize(&sector[..SUPERBLOCK_SIZE])
            .map_err(|err| FsError::Format(format!("unable to parse superblock: {err}")))?;

        if superblock.magic != SUPERBLOCK_MAGIC {
            return Err(FsError::Format(format!(
                "bad magic: {:#010x}",
                superblock.magic
            )));
        }

        if superblock.version != SUPERBLOCK_VERSION {
            return Err(FsError::Format(format!(
                "unsupported format version: {}",
                superblock.version
            )));
        }

        if superblock.root_inode != ROOT_INODE {
            return Err(FsError::Format(format!(
                "unexpected root inode number: {}",
                superblock.root_inode
            )));
        }

        if superblock.nr_inodes == 0 {
            return Err(FsError::Format("no inodes".to_string()));
        }

        let inode_table_end = superblock.inode_table_first_sect() + superblock.nr_inode_sects as usize;
        if superblock.first_data_sect as usize != inode_table_end {
            return Err(FsError::Format(format!(
                "first data sector {} does not follow the inode table (ends at {})",
                superblock.first_data_sect, inode_table_end
            )));
        }

        if superblock.nr_sects as usize <= superblock.first_data_sect as usize {
            return Err(FsError::Format("no data sectors".to_string()));
        }

        if superblock.nr_inodes as usize >= superblock.nr_inode_sects as usize * INODES_PER_SECTOR + 1
        {
            return Err(FsError::Format(
                "inode table too small for inode count".to_string(),
            ));
        }

        // check that the first and last sectors are accessible
        let _ = device.read_sector(BOOT_SECTOR)?;
        let _ = device.read_sector(superblock.nr_sects as usize - 1)?;

        info!("{} total sectors", superblock.nr_sects);
        info!("{} total inodes", superblock.nr_inodes);
        info!("first data sector: {}", superblock.first_data_sect);

        let mut fs = Self {
            device,
            superblock,
            inode_cache: HashMap::new(),
            open_files: Vec::new(),
            proc_files: HashMap::new(),
            checksum_key: None,
            booted: Instant::now(),
        };

        // the root directory stays resident until the engine is dropped
        let root = fs.get_inode(ROOT_INODE)?;
        if root.mode != InodeMode::Directory {
            return Err(FsError::Format(
                "root inode is not a directory".to_string(),
            ));
        }

        Ok(fs)
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    /// Reads an inode record from the inode table.
    fn read_inode_record(&self, ino: InodeNumber) -> Result<DiskInode> {
        let position = self.inode_record_position(ino)?;
        let sector = self.device.read_sector(position / SECTOR_SIZE)?;
        let offset = position % SECTOR_SIZE;

        bincode::deserialize(&sector[offset..offset + INODE_SIZE])
            .map_err(|err| FsError::Corruption(format!("undecodable inode {ino}: {err}")))
    }

    /// Writes an inode record to the inode table.
    fn write_inode_record(&self, inode: &DiskInode) -> Result<()> {
        let serialized = bincode::serialize(inode)
            .map_err(|err| FsError::Corruption(format!("unencodable inode: {err}")))?;

        let position = self.inode_record_position(inode.ino)?;
        let offset = position % SECTOR_SIZE;

        let mut sector = self.device.read_sector(position / SECTOR_SIZE)?;
        sector[offset..offset + INODE_SIZE].copy_from_slice(&serialized);

        self.device.write_sector(position / SECTOR_SIZE, sector)
    }

    /// Byte position of an inode record on the device.
    fn inode_record_position(&self, ino: InodeNumber) -> Result<usize> {
        if ino == 0 || ino > self.superblock.nr_inodes {
            return Err(FsError::Corruption(format!("invalid inode number: {ino}")));
        }

        let table_start = self.superblock.inode_table_first_sect() * SECTOR_SIZE;
        Ok(table_start + (ino as usize - 1) * INODE_SIZE)
    }

    /// Takes a counted reference to an in-core inode, loading it from disk
    /// on first use. Every `get_inode` is balanced by a `put_inode`.
    fn get_inode(&mut self, ino: InodeNumber) -> Result<DiskInode> {
        if let Some(entry) = self.inode_cache.get_mut(&ino) {
            entry.count += 1;
            return Ok(entry.disk);
        }

        let disk = self.read_inode_record(ino)?;
        self.inode_cache.insert(ino, CachedInode { disk, count: 1 });

        Ok(disk)
    }

    /// Drops one reference; the cache slot is freed when none remain.
    fn put_inode(&mut self, ino: InodeNumber) {
        if let Some(entry) = self.inode_cache.get_mut(&ino) {
            entry.count -= 1;
            if entry.count == 0 {
                self.inode_cache.remove(&ino);
            }
        }
    }

    /// Writes an inode through to both the cache and the inode table.
    fn sync_inode(&mut self, inode: DiskInode) -> Result<()> {
        if let Some(entry) = self.inode_cache.get_mut(&inode.ino) {
            entry.disk = inode;
        }

        self.write_inode_record(&inode)
    }

    /// The current in-core copy, without taking a reference.
    fn cached_inode(&self, ino: InodeNumber) -> Option<DiskInode> {
        self.inode_cache.get(&ino).map(|entry| entry.disk)
    }

    fn cached_root(&self) -> Result<DiskInode> {
        self.cached_inode(ROOT_INODE)
            .ok_or_else(|| FsError::Corruption("root inode not resident".to_string()))
    }

    fn inode_ref_count(&self, ino: InodeNumber) -> u32 {
        self.inode_cache.get(&ino).map_or(0, |entry| entry.count)
    }

    /// Sector holding the `index`th sector of a file's run.
    fn file_sector(&self, inode: &DiskInode, index: usize) -> Result<SectorNumber> {
        if index >= inode.nr_sects as usize {
            return Err(FsError::Corruption(format!(
                "sector index {index} beyond the run of inode {}",
                inode.ino
            )));
        }

        Ok(inode.start_sect as usize + index)
    }

    fn read_file_sector(&self, inode: &DiskInode, index: usize) -> Result<Sector> {
        let sector = self.file_sector(inode, index)?;
        self.device.read_sector(sector)
    }

    fn write_file_sector(&self, inode: &DiskInode, index: usize, data: Sector) -> Result<()> {
        let sector = self.file_sector(inode, index)?;
        self.device.write_sector(sector, data)
    }
}
