//! The flat root directory: path stripping, linear name resolution, and
//! slot management (tombstone reuse, insert, shrink).

use crate::disk_format::directory_entry::{
    DirEntry, FileName, DIR_ENTRIES_PER_SECTOR, DIR_ENTRY_SIZE, FREE_DIR_ENTRY,
};
use crate::disk_format::inode::ROOT_INODE;
use crate::error::{lossy_path, FsError, Result};
use crate::storage::SectorDevice;

use super::{FlatFs, InodeNumber};

pub(crate) const PATH_SEPARATOR: u8 = b'/';

/// Reduces a pathname to a bare directory-entry name.
///
/// At most one leading separator is accepted; any embedded separator is an
/// invalid path, since the namespace is single-level. Names longer than the
/// maximum are truncated rather than rejected. An empty result names the
/// root directory itself.
pub fn strip_path(path: &[u8]) -> Result<FileName> {
    if path.is_empty() {
        return Err(FsError::InvalidPath(String::new()));
    }

    let bare = match path[0] {
        PATH_SEPARATOR => &path[1..],
        _ => path,
    };

    if bare.contains(&PATH_SEPARATOR) {
        return Err(FsError::InvalidPath(lossy_path(path)));
    }

    Ok(FileName::from_bytes(bare))
}

impl<S: SectorDevice> FlatFs<S> {
    /// Resolves a pathname to an inode number, scanning entry by entry up
    /// to the directory's logical entry count (tombstones still occupy
    /// slots). The root path resolves to the root inode.
    pub fn search_file(&mut self, path: &[u8]) -> Result<Option<InodeNumber>> {
        let name = strip_path(path)?;
        if name.is_empty() {
            return Ok(Some(ROOT_INODE));
        }

        for entry in self.read_dir_slots()? {
            if entry.ino != 0 && entry.name == name {
                return Ok(Some(entry.ino));
            }
        }

        Ok(None)
    }

    /// The live entries of the root directory.
    pub fn read_directory(&mut self) -> Result<Vec<DirEntry>> {
        Ok(self
            .read_dir_slots()?
            .into_iter()
            .filter(|entry| entry.ino != 0)
            .collect())
    }

    /// Adds an entry for a new file, reusing the first tombstoned slot if
    /// one exists and appending otherwise.
    pub(crate) fn insert_entry(&mut self, ino: InodeNumber, name: FileName) -> Result<()> {
        let mut root = self.cached_root()?;
        let nr_entries = root.size as usize / DIR_ENTRY_SIZE;

        let slots = self.read_dir_slots()?;
        let free_slot = slots.iter().position(|entry| entry.ino == 0);

        let slot = match free_slot {
            Some(slot) => slot,
            None => {
                // no tombstone to reuse; the directory grows by one entry
                if nr_entries >= root.nr_sects as usize * DIR_ENTRIES_PER_SECTOR {
                    return Err(FsError::SpaceExhausted);
                }

                root.size += DIR_ENTRY_SIZE as u32;
                self.sync_inode(root)?;
                nr_entries
            }
        };

        self.write_dir_slot(slot, DirEntry::new(ino, name))
    }

    /// Tombstones the entry for `ino` in place. When the removed entry was
    /// the logically last one, the directory's recorded size shrinks to the
    /// end of the new last live entry.
    pub(crate) fn remove_entry(&mut self, ino: InodeNumber) -> Result<()> {
        let mut root = self.cached_root()?;
        let slots = self.read_dir_slots()?;

        let slot = slots
            .iter()
            .position(|entry| entry.ino == ino)
            .ok_or_else(|| {
                FsError::Corruption(format!("no directory entry for inode {ino}"))
            })?;

        self.write_dir_slot(slot, FREE_DIR_ENTRY)?;

        if slot == slots.len() - 1 {
            let last_live = slots[..slot]
                .iter()
                .rposition(|entry| entry.ino != 0)
                .map_or(0, |index| index + 1);

            root.size = (last_live * DIR_ENTRY_SIZE) as u32;
            self.sync_inode(root)?;
        }

        Ok(())
    }

    /// Every slot up to the directory's logical entry count, tombstones
    /// included.
    pub(crate) fn read_dir_slots(&mut self) -> Result<Vec<DirEntry>> {
        let root = self.cached_root()?;

        if root.size as usize % DIR_ENTRY_SIZE != 0 {
            return Err(FsError::Corruption(format!(
                "directory size {} is not a multiple of the entry size",
                root.size
            )));
        }

        let nr_entries = root.size as usize / DIR_ENTRY_SIZE;
        let mut slots = Vec::with_capacity(nr_entries);

        let mut sector_index = 0;
        while slots.len() < nr_entries {
            let sector = self.read_file_sector(&root, sector_index)?;

            for chunk in sector.chunks_exact(DIR_ENTRY_SIZE) {
                if slots.len() == nr_entries {
                    break;
                }

                let entry: DirEntry = bincode::deserialize(chunk).map_err(|err| {
                    FsError::Corruption(format!("undecodable directory entry: {err}"))
                })?;
                slots.push(entry);
            }

            sector_index += 1;
        }

        Ok(slots)
    }

    fn write_dir_slot(&mut self, slot: usize, entry: DirEntry) -> Result<()> {
        let root = self.cached_root()?;

        let serialized = bincode::serialize(&entry)
            .map_err(|err| FsError::Corruption(format!("unencodable directory entry: {err}")))?;

        let sector_index = slot / DIR_ENTRIES_PER_SECTOR;
        let offset = (slot % DIR_ENTRIES_PER_SECTOR) * DIR_ENTRY_SIZE;

        let mut sector = self.read_file_sector(&root, sector_index)?;
        sector[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&serialized);

        self.write_file_sector(&root, sector_index, sector)
    }
}
