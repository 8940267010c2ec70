//! A read-only consistency check over the directory, the inode table, and
//! the bitmaps.

use std::collections::HashSet;

use log::info;

use crate::disk_format::directory_entry::DIR_ENTRY_SIZE;
use crate::disk_format::inode::InodeMode;
use crate::error::{FsError, Result};
use crate::storage::SectorDevice;

use super::FlatFs;

impl<S: SectorDevice> FlatFs<S> {
    /// Walks every live directory entry and checks that it points at a
    /// plausible inode: a valid number, a non-free record of the right
    /// number, a run inside the data region, and a set inode-map bit.
    /// Duplicate names are corruption too.
    pub fn check(&mut self) -> Result<()> {
        let root = self.cached_root()?;
        if root.mode != InodeMode::Directory {
            return Err(FsError::Corruption("root inode is not a directory".into()));
        }

        if root.size as usize % DIR_ENTRY_SIZE != 0 {
            return Err(FsError::Corruption(format!(
                "directory size {} is not a multiple of the entry size",
                root.size
            )));
        }

        if root.size as usize > root.capacity() {
            return Err(FsError::Corruption(format!(
                "directory size {} exceeds its run capacity {}",
                root.size,
                root.capacity()
            )));
        }

        let mut names = HashSet::new();
        let mut live = 0;

        for entry in self.read_dir_slots()? {
            if entry.ino == 0 {
                continue;
            }
            live += 1;

            if entry.ino > self.superblock.nr_inodes {
                return Err(FsError::Corruption(format!(
                    "entry {} points at invalid inode {}",
                    entry.name, entry.ino
                )));
            }

            if !names.insert(entry.name) {
                return Err(FsError::Corruption(format!(
                    "duplicate directory entry: {}",
                    entry.name
                )));
            }

            let inode = self.read_inode_record(entry.ino)?;

            if inode.mode == InodeMode::Free {
                return Err(FsError::Corruption(format!(
                    "entry {} points at free inode {}",
                    entry.name, entry.ino
                )));
            }

            if inode.ino != entry.ino {
                return Err(FsError::Corruption(format!(
                    "inode {} records number {}",
                    entry.ino, inode.ino
                )));
            }

            if inode.mode == InodeMode::Regular {
                let start = inode.start_sect as usize;
                let end = start + inode.nr_sects as usize;

                if start < self.superblock.first_data_sect as usize
                    || end > self.superblock.nr_sects as usize
                {
                    return Err(FsError::Corruption(format!(
                        "inode {} run [{start}, {end}) leaves the data region",
                        entry.ino
                    )));
                }

                if inode.size as usize > inode.capacity() {
                    return Err(FsError::Corruption(format!(
                        "inode {} size {} exceeds its run capacity",
                        entry.ino, inode.size
                    )));
                }
            }

            if !self.imap_bit(entry.ino)? {
                return Err(FsError::Corruption(format!(
                    "inode {} is linked but its map bit is clear",
                    entry.ino
                )));
            }
        }

        info!("checked {live} directory entries");

        Ok(())
    }
}
