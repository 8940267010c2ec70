//! Device formatting: lays down the superblock, both bitmaps, the inode
//! table, the root directory, and (optionally) the terminal device nodes.

use log::info;

use crate::disk_format::directory_entry::{DirEntry, FileName, DIR_ENTRY_SIZE};
use crate::disk_format::inode::{
    DiskInode, InodeMode, FREE_INODE, INODES_PER_SECTOR, INODE_SIZE, ROOT_INODE,
};
use crate::disk_format::sector::{SECTOR_BITS, SECTOR_SIZE};
use crate::disk_format::superblock::{
    SuperBlock, SUPERBLOCK_MAGIC, SUPERBLOCK_SECTOR, SUPERBLOCK_VERSION,
};
use crate::error::{FsError, Result};
use crate::storage::SectorDevice;

use super::alloc::mark_map_bits;
use super::{InodeNumber, DEFAULT_FILE_SECTS, ROOT_DEV};

#[derive(Clone, Debug)]
pub struct FormatOptions {
    /// Total sectors on the device.
    pub nr_sects: usize,
    /// Highest inode number the device will hold.
    pub nr_inodes: u32,
    /// Number of `dev_tty` character-device nodes to seed the root
    /// directory with.
    pub tty_nodes: usize,
}

/// Writes a fresh, empty filesystem onto `device`.
///
/// Inode number zero is never valid, so its bitmap bit is pre-set, as are
/// the bits past the end of each map. The root directory receives the first
/// data run; tty nodes consume inode numbers right after the root but no
/// data sectors (their `start_sect` holds the device minor).
pub fn format<S: SectorDevice>(device: &S, options: &FormatOptions) -> Result<SuperBlock> {
    let superblock = layout(options)?;

    // zero everything up to the first data sector, plus the sector that
    // will hold the root directory's entries
    for sector in 0..superblock.first_data_sect as usize {
        device.write_sector(sector, [0; SECTOR_SIZE])?;
    }
    device.write_sector(superblock.first_data_sect as usize, [0; SECTOR_SIZE])?;

    let mut sector = [0; SECTOR_SIZE];
    let serialized = bincode::serialize(&superblock)
        .map_err(|err| FsError::Format(format!("unencodable superblock: {err}")))?;
    sector[..serialized.len()].copy_from_slice(&serialized);
    device.write_sector(SUPERBLOCK_SECTOR, sector)?;

    // inode map: bit zero is reserved, then the root and the tty nodes;
    // bits past the highest inode number can never be allocated
    let imap_bits = superblock.nr_imap_sects as usize * SECTOR_BITS;
    mark_map_bits(
        device,
        superblock.imap_first_sect(),
        0,
        2 + options.tty_nodes,
        "inode map",
    )?;
    mark_map_bits(
        device,
        superblock.imap_first_sect(),
        options.nr_inodes as usize + 1,
        imap_bits - options.nr_inodes as usize - 1,
        "inode map",
    )?;

    // sector map: the root directory's run, and the tail past the device
    let smap_bits = superblock.nr_smap_sects as usize * SECTOR_BITS;
    mark_map_bits(
        device,
        superblock.smap_first_sect(),
        0,
        DEFAULT_FILE_SECTS,
        "sector map",
    )?;
    if smap_bits > superblock.nr_data_sects() {
        mark_map_bits(
            device,
            superblock.smap_first_sect(),
            superblock.nr_data_sects(),
            smap_bits - superblock.nr_data_sects(),
            "sector map",
        )?;
    }

    let root = DiskInode {
        mode: InodeMode::Directory,
        dev: ROOT_DEV,
        ino: ROOT_INODE,
        size: (options.tty_nodes * DIR_ENTRY_SIZE) as u32,
        start_sect: superblock.first_data_sect,
        nr_sects: DEFAULT_FILE_SECTS as u32,
        ..FREE_INODE
    };
    write_inode_record(device, &superblock, &root)?;

    let mut root_sector = [0; SECTOR_SIZE];
    for minor in 0..options.tty_nodes {
        let ino = ROOT_INODE + 1 + minor as InodeNumber;

        let node = DiskInode {
            mode: InodeMode::CharSpecial,
            dev: ROOT_DEV,
            ino,
            size: 0,
            start_sect: minor as u32,
            nr_sects: 0,
            ..FREE_INODE
        };
        write_inode_record(device, &superblock, &node)?;

        let name = FileName::from_bytes(format!("dev_tty{minor}").as_bytes());
        let entry = bincode::serialize(&DirEntry::new(ino, name))
            .map_err(|err| FsError::Format(format!("unencodable directory entry: {err}")))?;
        root_sector[minor * DIR_ENTRY_SIZE..(minor + 1) * DIR_ENTRY_SIZE]
            .copy_from_slice(&entry);
    }
    device.write_sector(superblock.first_data_sect as usize, root_sector)?;

    info!(
        "formatted {} sectors, {} inodes, {} data sectors",
        options.nr_sects,
        options.nr_inodes,
        superblock.nr_data_sects()
    );

    Ok(superblock)
}

/// Computes the on-disk region layout for the requested geometry.
fn layout(options: &FormatOptions) -> Result<SuperBlock> {
    if (options.nr_inodes as usize) < 1 + options.tty_nodes {
        return Err(FsError::Format(format!(
            "{} inodes cannot hold the root and {} tty nodes",
            options.nr_inodes, options.tty_nodes
        )));
    }

    let nr_imap_sects = (options.nr_inodes as usize + 1).div_ceil(SECTOR_BITS);
    let nr_smap_sects = options.nr_sects.div_ceil(SECTOR_BITS);
    let nr_inode_sects = (options.nr_inodes as usize).div_ceil(INODES_PER_SECTOR);

    let first_data_sect = 2 + nr_imap_sects + nr_smap_sects + nr_inode_sects;

    if options.nr_sects < first_data_sect + DEFAULT_FILE_SECTS {
        return Err(FsError::Format(format!(
            "{} sectors leave no room for the root directory",
            options.nr_sects
        )));
    }

    Ok(SuperBlock {
        magic: SUPERBLOCK_MAGIC,
        version: SUPERBLOCK_VERSION,
        nr_sects: options.nr_sects as u32,
        nr_inodes: options.nr_inodes,
        nr_imap_sects: nr_imap_sects as u32,
        nr_smap_sects: nr_smap_sects as u32,
        nr_inode_sects: nr_inode_sects as u32,
        first_data_sect: first_data_sect as u32,
        root_inode: ROOT_INODE,
        reserved: [0; 28],
    })
}

fn write_inode_record<S: SectorDevice>(
    device: &S,
    superblock: &SuperBlock,
    inode: &DiskInode,
) -> Result<()> {
    let serialized = bincode::serialize(inode)
        .map_err(|err| FsError::Format(format!("unencodable inode: {err}")))?;

    let position =
        superblock.inode_table_first_sect() * SECTOR_SIZE + (inode.ino as usize - 1) * INODE_SIZE;
    let offset = position % SECTOR_SIZE;

    let mut sector = device.read_sector(position / SECTOR_SIZE)?;
    sector[offset..offset + INODE_SIZE].copy_from_slice(&serialized);

    device.write_sector(position / SECTOR_SIZE, sector)
}
