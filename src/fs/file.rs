//! File lifecycle: open (with creation and truncation), descriptor-based
//! read/write/seek, close, unlink, and stat.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::disk_format::inode::{DiskInode, InodeMode, FREE_INODE, NO_DEV};
use crate::disk_format::sector::SECTOR_SIZE;
use crate::error::{lossy_path, FsError, Result};
use crate::storage::SectorDevice;

use super::dir::strip_path;
use super::{
    FlatFs, InodeNumber, OpenFile, ProcId, DEFAULT_FILE_SECTS, NR_OPEN_FILES, NR_PROC_FILES,
    ROOT_DEV,
};

/// Create the file if it does not exist.
pub const O_CREAT: u32 = 1;
/// Open for reading and writing.
pub const O_RDWR: u32 = 2;
/// Discard existing content on open.
pub const O_TRUNC: u32 = 4;

/// Origin of a seek offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

impl TryFrom<i32> for Whence {
    type Error = FsError;

    fn try_from(value: i32) -> Result<Whence> {
        match value {
            0 => Ok(Whence::Set),
            1 => Ok(Whence::Cur),
            2 => Ok(Whence::End),
            _ => Err(FsError::InvalidArgument(format!("whence: {value}"))),
        }
    }
}

/// The reply payload of a stat request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub dev: u16,
    pub ino: InodeNumber,
    pub mode: InodeMode,
    /// Device minor for device nodes, [`NO_DEV`] otherwise.
    pub rdev: u32,
    pub size: u32,
}

impl<S: SectorDevice> FlatFs<S> {
    /// Opens (and possibly creates) a file for the calling process,
    /// returning its descriptor.
    ///
    /// For an existing file, `O_RDWR` is required, and `O_CREAT` is only
    /// accepted together with `O_TRUNC`. A missing file is created only
    /// under `O_CREAT`.
    pub fn open(&mut self, src: ProcId, path: &[u8], flags: u32) -> Result<usize> {
        let fd = self.free_proc_slot(src)?;
        let slot = self.free_global_slot()?;

        let inode = match self.search_file(path)? {
            None => {
                if flags & O_CREAT == 0 {
                    return Err(FsError::NotFound(lossy_path(path)));
                }

                self.create_file(path)?
            }
            Some(ino) => {
                if flags & O_RDWR == 0 {
                    return Err(FsError::AlreadyExists(lossy_path(path)));
                }

                let mut inode = self.get_inode(ino)?;

                if flags & O_CREAT != 0 && flags & O_TRUNC == 0 {
                    self.put_inode(ino);
                    return Err(FsError::AlreadyExists(lossy_path(path)));
                }

                match inode.mode {
                    InodeMode::Regular => {
                        if flags & O_TRUNC != 0 {
                            inode.size = 0;
                            self.sync_inode(inode)?;
                        }
                    }
                    // the root directory may be opened for reading its
                    // entries; device nodes bind without truncation
                    InodeMode::Directory | InodeMode::CharSpecial => {}
                    _ => {
                        self.put_inode(ino);
                        return Err(FsError::NotRegularFile(lossy_path(path)));
                    }
                }

                inode
            }
        };

        debug!("proc {src} opened inode {} as fd {fd}", inode.ino);

        self.open_files[slot] = Some(OpenFile {
            ino: inode.ino,
            flags,
            pos: 0,
            count: 1,
        });
        self.proc_table(src)[fd] = Some(slot);

        Ok(fd)
    }

    /// Allocates an inode, a sector run, and a directory entry for a new
    /// empty file. The inode enters the cache holding the caller's
    /// reference.
    fn create_file(&mut self, path: &[u8]) -> Result<DiskInode> {
        let name = strip_path(path)?;
        if name.is_empty() {
            return Err(FsError::InvalidPath(lossy_path(path)));
        }

        let ino = self.alloc_imap_bit()?;

        let (start_sect, nr_sects) = match self.alloc_sector_run(DEFAULT_FILE_SECTS) {
            Ok(run) => run,
            Err(err) => {
                self.free_imap_bit(ino)?;
                return Err(err);
            }
        };

        let inode = DiskInode {
            mode: InodeMode::Regular,
            dev: ROOT_DEV,
            ino,
            size: 0,
            start_sect: start_sect as u32,
            nr_sects: nr_sects as u32,
            ..FREE_INODE
        };

        self.inode_cache.insert(
            ino,
            super::CachedInode {
                disk: inode,
                count: 1,
            },
        );
        self.write_inode_record(&inode)?;
        self.insert_entry(ino, name)?;

        debug!("created inode {ino} with a {nr_sects}-sector run at {start_sect}");

        Ok(inode)
    }

    /// Releases a descriptor and the caller's inode reference.
    pub fn close(&mut self, src: ProcId, fd: usize) -> Result<()> {
        let slot = self.descriptor(src, fd)?;
        self.proc_table(src)[fd] = None;

        let entry = self.open_files[slot]
            .as_mut()
            .ok_or_else(|| FsError::BadDescriptor(format!("fd {fd}")))?;

        let ino = entry.ino;
        entry.count -= 1;
        if entry.count == 0 {
            self.open_files[slot] = None;
        }

        self.put_inode(ino);

        Ok(())
    }

    /// Reads up to `len` bytes at the descriptor's position. Reads past the
    /// end of the file are clamped; a position at the end yields nothing.
    pub fn read(&mut self, src: ProcId, fd: usize, len: usize) -> Result<Vec<u8>> {
        let slot = self.descriptor(src, fd)?;
        let (ino, mut pos) = {
            let entry = self.open_file(slot, fd)?;
            (entry.ino, entry.pos)
        };

        let inode = self.resident_inode(ino)?;
        if inode.is_special() {
            return Err(FsError::NotRegularFile(format!("inode {ino}")));
        }

        let mut remaining = len.min((inode.size as usize).saturating_sub(pos));
        let mut data = Vec::with_capacity(remaining);

        while remaining > 0 {
            let offset = pos % SECTOR_SIZE;
            let chunk = remaining.min(SECTOR_SIZE - offset);

            let sector = self.read_file_sector(&inode, pos / SECTOR_SIZE)?;
            data.extend_from_slice(&sector[offset..offset + chunk]);

            pos += chunk;
            remaining -= chunk;
        }

        self.open_file(slot, fd)?.pos = pos;

        Ok(data)
    }

    /// Writes at the descriptor's position, growing the file's size as
    /// needed. Files never outgrow their sector run: writes past its
    /// capacity are clamped, and the short count tells the caller.
    pub fn write(&mut self, src: ProcId, fd: usize, data: &[u8]) -> Result<usize> {
        let slot = self.descriptor(src, fd)?;
        let (ino, mut pos, flags) = {
            let entry = self.open_file(slot, fd)?;
            (entry.ino, entry.pos, entry.flags)
        };

        if flags & O_RDWR == 0 {
            return Err(FsError::BadDescriptor(format!("fd {fd} is read-only")));
        }

        let mut inode = self.resident_inode(ino)?;
        if inode.mode != InodeMode::Regular {
            return Err(FsError::NotRegularFile(format!("inode {ino}")));
        }

        let writable = data.len().min(inode.capacity().saturating_sub(pos));
        let mut written = 0;

        while written < writable {
            let offset = pos % SECTOR_SIZE;
            let chunk = (writable - written).min(SECTOR_SIZE - offset);

            let mut sector = self.read_file_sector(&inode, pos / SECTOR_SIZE)?;
            sector[offset..offset + chunk].copy_from_slice(&data[written..written + chunk]);
            self.write_file_sector(&inode, pos / SECTOR_SIZE, sector)?;

            pos += chunk;
            written += chunk;
        }

        if pos as u32 > inode.size {
            inode.size = pos as u32;
            self.sync_inode(inode)?;
        }

        self.open_file(slot, fd)?.pos = pos;

        Ok(written)
    }

    /// Repositions a descriptor. The resulting position must stay within
    /// the file, end inclusive.
    pub fn seek(&mut self, src: ProcId, fd: usize, offset: i64, whence: Whence) -> Result<usize> {
        let slot = self.descriptor(src, fd)?;
        let (ino, pos) = {
            let entry = self.open_file(slot, fd)?;
            (entry.ino, entry.pos)
        };

        let size = self.resident_inode(ino)?.size as i64;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => pos as i64,
            Whence::End => size,
        };

        let target = base + offset;
        if target < 0 || target > size {
            return Err(FsError::InvalidArgument(format!(
                "seek to {target} in a file of {size} bytes"
            )));
        }

        self.open_file(slot, fd)?.pos = target as usize;

        Ok(target as usize)
    }

    /// Removes a regular file: its directory entry, its inode, and its
    /// sector run. Open files and non-regular files are refused.
    pub fn unlink(&mut self, path: &[u8]) -> Result<()> {
        let name = strip_path(path)?;
        if name.is_empty() {
            return Err(FsError::InvalidPath(lossy_path(path)));
        }

        let ino = self
            .search_file(path)?
            .ok_or_else(|| FsError::NotFound(lossy_path(path)))?;

        let inode = self.get_inode(ino)?;

        if inode.mode != InodeMode::Regular {
            self.put_inode(ino);
            return Err(FsError::NotRegularFile(lossy_path(path)));
        }

        // ours is the only reference if the count is exactly one
        if self.inode_ref_count(ino) > 1 {
            self.put_inode(ino);
            return Err(FsError::InUse(lossy_path(path)));
        }

        self.free_imap_bit(ino)?;
        self.free_sector_run(inode.start_sect as usize, inode.nr_sects as usize)?;

        self.sync_inode(DiskInode { ino, ..FREE_INODE })?;
        self.put_inode(ino);

        self.remove_entry(ino)
    }

    /// Describes a file by path.
    pub fn stat(&mut self, path: &[u8]) -> Result<FileStat> {
        let ino = self
            .search_file(path)?
            .ok_or_else(|| FsError::NotFound(lossy_path(path)))?;

        let inode = self.get_inode(ino)?;
        let stat = FileStat {
            dev: inode.dev,
            ino: inode.ino,
            mode: inode.mode,
            rdev: if inode.is_special() {
                inode.start_sect
            } else {
                NO_DEV
            },
            size: inode.size,
        };
        self.put_inode(ino);

        Ok(stat)
    }

    fn proc_table(&mut self, src: ProcId) -> &mut [Option<usize>; NR_PROC_FILES] {
        self.proc_files.entry(src).or_insert([None; NR_PROC_FILES])
    }

    /// The first free descriptor of a process's table.
    fn free_proc_slot(&mut self, src: ProcId) -> Result<usize> {
        self.proc_table(src)
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(FsError::TableFull)
    }

    /// The first free entry of the global open-file table, growing it up to
    /// its fixed capacity.
    fn free_global_slot(&mut self) -> Result<usize> {
        if let Some(slot) = self.open_files.iter().position(|entry| entry.is_none()) {
            return Ok(slot);
        }

        if self.open_files.len() < NR_OPEN_FILES {
            self.open_files.push(None);
            return Ok(self.open_files.len() - 1);
        }

        Err(FsError::TableFull)
    }

    /// Maps a process-local descriptor to its global table slot.
    fn descriptor(&mut self, src: ProcId, fd: usize) -> Result<usize> {
        if fd >= NR_PROC_FILES {
            return Err(FsError::BadDescriptor(format!("fd {fd}")));
        }

        self.proc_table(src)[fd].ok_or_else(|| FsError::BadDescriptor(format!("fd {fd}")))
    }

    fn open_file(&mut self, slot: usize, fd: usize) -> Result<&mut OpenFile> {
        self.open_files[slot]
            .as_mut()
            .ok_or_else(|| FsError::BadDescriptor(format!("fd {fd}")))
    }

    /// The in-core inode behind an open descriptor. Open files always hold
    /// a cache reference.
    fn resident_inode(&self, ino: InodeNumber) -> Result<DiskInode> {
        self.cached_inode(ino)
            .ok_or_else(|| FsError::Corruption(format!("open inode {ino} not resident")))
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::test_support::{test_fs, test_fs_with};
    use crate::fs::FormatOptions;

    use super::*;

    const PROC: ProcId = 40;

    #[test]
    fn test_create_and_stat() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.close(PROC, fd).unwrap();

        let stat = fs.stat(b"/notes").unwrap();
        assert_eq!(stat.mode, InodeMode::Regular);
        assert_eq!(stat.size, 0);
        assert_eq!(stat.rdev, NO_DEV);
        assert_eq!(stat.dev, ROOT_DEV);

        assert!(fs.search_file(b"/notes").unwrap().is_some());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        assert_eq!(fs.write(PROC, fd, b"hello, disk").unwrap(), 11);

        fs.seek(PROC, fd, 0, Whence::Set).unwrap();
        assert_eq!(fs.read(PROC, fd, 64).unwrap(), b"hello, disk");

        // reads at the end yield nothing
        assert!(fs.read(PROC, fd, 64).unwrap().is_empty());

        fs.seek(PROC, fd, 7, Whence::Set).unwrap();
        assert_eq!(fs.read(PROC, fd, 4).unwrap(), b"disk");

        fs.close(PROC, fd).unwrap();
        assert_eq!(fs.stat(b"/notes").unwrap().size, 11);
    }

    #[test]
    fn test_write_spans_sectors() {
        let mut fs = test_fs();
        let data = vec![0x5a; SECTOR_SIZE + 100];

        let fd = fs.open(PROC, b"/big", O_CREAT | O_RDWR).unwrap();
        assert_eq!(fs.write(PROC, fd, &data).unwrap(), data.len());

        fs.seek(PROC, fd, 0, Whence::Set).unwrap();
        assert_eq!(fs.read(PROC, fd, data.len()).unwrap(), data);
    }

    #[test]
    fn test_overwrite_keeps_size() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"0123456789").unwrap();

        fs.seek(PROC, fd, 2, Whence::Set).unwrap();
        fs.write(PROC, fd, b"xy").unwrap();

        fs.seek(PROC, fd, 0, Whence::Set).unwrap();
        assert_eq!(fs.read(PROC, fd, 64).unwrap(), b"01xy456789");
    }

    #[test]
    fn test_seek_bounds() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"0123456789").unwrap();

        assert_eq!(fs.seek(PROC, fd, -4, Whence::End).unwrap(), 6);
        assert_eq!(fs.seek(PROC, fd, 2, Whence::Cur).unwrap(), 8);
        assert_eq!(fs.seek(PROC, fd, 0, Whence::End).unwrap(), 10);

        assert!(matches!(
            fs.seek(PROC, fd, 11, Whence::Set),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.seek(PROC, fd, -1, Whence::Set),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_open_missing_without_create() {
        let mut fs = test_fs();
        assert!(matches!(
            fs.open(PROC, b"/ghost", O_RDWR),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_reopen_matrix() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"content").unwrap();
        fs.close(PROC, fd).unwrap();

        // creating over an existing file needs truncation
        assert!(matches!(
            fs.open(PROC, b"/notes", O_CREAT | O_RDWR),
            Err(FsError::AlreadyExists(_))
        ));

        // opening an existing file needs read-write access
        assert!(matches!(
            fs.open(PROC, b"/notes", 0),
            Err(FsError::AlreadyExists(_))
        ));

        let fd = fs.open(PROC, b"/notes", O_RDWR).unwrap();
        assert_eq!(fs.read(PROC, fd, 64).unwrap(), b"content");
        fs.close(PROC, fd).unwrap();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR | O_TRUNC).unwrap();
        fs.close(PROC, fd).unwrap();
        assert_eq!(fs.stat(b"/notes").unwrap().size, 0);
    }

    #[test]
    fn test_failed_opens_leak_no_descriptors() {
        let mut fs = test_fs();

        for _ in 0..NR_PROC_FILES + 4 {
            assert!(fs.open(PROC, b"/ghost", O_RDWR).is_err());
        }

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        assert_eq!(fd, 0);
    }

    #[test]
    fn test_unlink() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.close(PROC, fd).unwrap();

        fs.unlink(b"/notes").unwrap();
        assert_eq!(fs.search_file(b"/notes").unwrap(), None);
        assert!(matches!(
            fs.unlink(b"/notes"),
            Err(FsError::NotFound(_))
        ));
    }

    #[test]
    fn test_unlink_reclaims_space() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/first", O_CREAT | O_RDWR).unwrap();
        fs.close(PROC, fd).unwrap();
        let first = fs.stat(b"/first").unwrap().ino;

        fs.unlink(b"/first").unwrap();

        // both the inode and the run are handed out again
        let fd = fs.open(PROC, b"/second", O_CREAT | O_RDWR).unwrap();
        fs.close(PROC, fd).unwrap();
        assert_eq!(fs.stat(b"/second").unwrap().ino, first);
    }

    #[test]
    fn test_unlink_open_file() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        assert!(matches!(fs.unlink(b"/notes"), Err(FsError::InUse(_))));

        fs.close(PROC, fd).unwrap();
        fs.unlink(b"/notes").unwrap();
    }

    #[test]
    fn test_unlink_root() {
        let mut fs = test_fs();
        assert!(matches!(fs.unlink(b"/"), Err(FsError::InvalidPath(_))));
    }

    #[test]
    fn test_unlink_device_node() {
        let mut fs = test_fs();
        assert!(matches!(
            fs.unlink(b"/dev_tty0"),
            Err(FsError::NotRegularFile(_))
        ));
    }

    #[test]
    fn test_device_node_open_and_stat() {
        let mut fs = test_fs();

        let stat = fs.stat(b"/dev_tty1").unwrap();
        assert_eq!(stat.mode, InodeMode::CharSpecial);
        assert_eq!(stat.rdev, 1);

        let fd = fs.open(PROC, b"/dev_tty1", O_RDWR).unwrap();
        assert!(matches!(
            fs.read(PROC, fd, 16),
            Err(FsError::NotRegularFile(_))
        ));
        assert!(matches!(
            fs.write(PROC, fd, b"x"),
            Err(FsError::NotRegularFile(_))
        ));
        fs.close(PROC, fd).unwrap();
    }

    #[test]
    fn test_write_clamped_to_run_capacity() {
        // a cramped disk where a new file's run degrades below the default
        let mut fs = test_fs_with(&FormatOptions {
            nr_sects: 80,
            nr_inodes: 16,
            tty_nodes: 0,
        });

        let fd = fs.open(PROC, b"/squeezed", O_CREAT | O_RDWR).unwrap();

        let data = vec![0x11; 9 * SECTOR_SIZE];
        let written = fs.write(PROC, fd, &data).unwrap();
        assert_eq!(written, 8 * SECTOR_SIZE);

        // the position sits at capacity; further writes make no progress
        assert_eq!(fs.write(PROC, fd, b"more").unwrap(), 0);
        assert_eq!(fs.stat(b"/squeezed").unwrap().size as usize, 8 * SECTOR_SIZE);

        fs.close(PROC, fd).unwrap();
    }

    #[test]
    fn test_descriptors_are_per_process() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        assert!(matches!(
            fs.read(PROC + 1, fd, 4),
            Err(FsError::BadDescriptor(_))
        ));

        fs.close(PROC, fd).unwrap();
    }

    #[test]
    fn test_two_opens_hold_two_references() {
        let mut fs = test_fs();

        let first = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        let second = fs.open(PROC, b"/notes", O_RDWR).unwrap();
        assert_ne!(first, second);

        fs.close(PROC, first).unwrap();
        assert!(matches!(fs.unlink(b"/notes"), Err(FsError::InUse(_))));

        fs.close(PROC, second).unwrap();
        fs.unlink(b"/notes").unwrap();
    }

    #[test]
    fn test_creation_exhausts_inodes_cleanly() {
        let mut fs = test_fs_with(&FormatOptions {
            nr_sects: 4096,
            nr_inodes: 3,
            tty_nodes: 0,
        });

        let fd_a = fs.open(PROC, b"/a", O_CREAT | O_RDWR).unwrap();
        let fd_b = fs.open(PROC, b"/b", O_CREAT | O_RDWR).unwrap();
        assert!(matches!(
            fs.open(PROC, b"/c", O_CREAT | O_RDWR),
            Err(FsError::SpaceExhausted)
        ));

        fs.close(PROC, fd_a).unwrap();
        fs.close(PROC, fd_b).unwrap();
    }
}
