//! Keyed content digests: MD5 over the boot key, the file content, and the
//! key again. The key is derived once per boot and never leaves the engine.

use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use md5::{Digest, Md5};

use crate::disk_format::directory_entry::FileName;
use crate::disk_format::inode::{DiskInode, InodeMode, DIGEST_LEN};
use crate::disk_format::sector::SECTOR_SIZE;
use crate::error::{lossy_path, FsError, Result};
use crate::storage::SectorDevice;

use super::{FlatFs, ProcId, INIT_PROC};

/// Scheduler ticks per second; the tick count folds into the boot key.
const HZ: u32 = 100;

/// Files whose digests are never refreshed: system images that outlive any
/// single boot and would always mismatch a fresh key.
pub const DIGEST_SKIP_LIST: &[&str] = &["cmd.tar", "kernel.bin", "hdboot.bin", "hdloader.bin"];

/// Whether a name is excluded from bulk digest refresh: hidden files,
/// terminal device nodes, and the fixed skip list.
fn is_digest_exempt(name: &FileName) -> bool {
    let bytes = name.as_bytes();

    bytes.starts_with(b".")
        || bytes.starts_with(b"dev_tty")
        || DIGEST_SKIP_LIST.iter().any(|skip| skip.as_bytes() == bytes)
}

impl<S: SectorDevice> FlatFs<S> {
    /// The boot digest key: wall-clock seconds folded with the tick count,
    /// derived on first use and fixed for the life of the engine.
    fn digest_key(&mut self) -> u32 {
        *self.checksum_key.get_or_insert_with(|| {
            let seconds = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs() as u32);
            let ticks = self.booted.elapsed().as_millis() as u32 / (1000 / HZ);

            let key = seconds ^ ticks;
            debug!("derived boot digest key");

            key
        })
    }

    /// Computes the keyed digest of a file's current content.
    pub fn compute_digest(&mut self, path: &[u8]) -> Result<[u8; DIGEST_LEN]> {
        let ino = self
            .search_file(path)?
            .ok_or_else(|| FsError::NotFound(lossy_path(path)))?;

        let inode = self.get_inode(ino)?;
        let digest = self.compute_digest_inode(&inode);
        self.put_inode(ino);

        digest
    }

    /// The digest stored in a file's inode, as of the last refresh.
    pub fn stored_digest(&mut self, path: &[u8]) -> Result<[u8; DIGEST_LEN]> {
        let ino = self
            .search_file(path)?
            .ok_or_else(|| FsError::NotFound(lossy_path(path)))?;

        let inode = self.get_inode(ino)?;
        let digest = inode.digest;
        self.put_inode(ino);

        Ok(digest)
    }

    /// Whether a file's content still matches its stored digest. A
    /// mismatch is a result, not an error.
    pub fn verify_digest(&mut self, path: &[u8]) -> Result<bool> {
        Ok(self.compute_digest(path)? == self.stored_digest(path)?)
    }

    /// Recomputes and stores the digest of every non-exempt regular file.
    /// Only the init process may ask. Returns the number of files
    /// refreshed.
    pub fn refresh_digests(&mut self, src: ProcId) -> Result<usize> {
        if src != INIT_PROC {
            return Err(FsError::NotAuthorized);
        }

        // snapshot the directory first; refreshing rewrites inode sectors
        let entries = self.read_dir_slots()?;

        let mut refreshed = 0;
        for entry in entries {
            if entry.ino == 0 || is_digest_exempt(&entry.name) {
                continue;
            }

            let mut inode = self.get_inode(entry.ino)?;
            if inode.mode == InodeMode::Regular {
                let digest = self.compute_digest_inode(&inode);
                match digest {
                    Ok(digest) => {
                        inode.digest = digest;
                        self.sync_inode(inode)?;
                        refreshed += 1;
                    }
                    Err(err) => {
                        self.put_inode(entry.ino);
                        return Err(err);
                    }
                }
            }
            self.put_inode(entry.ino);
        }

        info!("refreshed {refreshed} file digests");

        Ok(refreshed)
    }

    /// Streams MD5 over key, content, key. Only regular files have digests.
    fn compute_digest_inode(&mut self, inode: &DiskInode) -> Result<[u8; DIGEST_LEN]> {
        if inode.mode != InodeMode::Regular {
            return Err(FsError::NotRegularFile(format!("inode {}", inode.ino)));
        }

        let key = self.digest_key();

        let mut hasher = Md5::new();
        hasher.update(key.to_le_bytes());

        let mut remaining = inode.size as usize;
        let mut index = 0;
        while remaining > 0 {
            let sector = self.read_file_sector(inode, index)?;
            let chunk = remaining.min(SECTOR_SIZE);
            hasher.update(&sector[..chunk]);

            remaining -= chunk;
            index += 1;
        }

        hasher.update(key.to_le_bytes());

        Ok(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::test_support::test_fs;
    use crate::fs::{O_CREAT, O_RDWR, O_TRUNC};

    use super::*;

    const PROC: ProcId = 40;

    #[test]
    fn test_digest_is_deterministic() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"stable content").unwrap();
        fs.close(PROC, fd).unwrap();

        assert_eq!(
            fs.compute_digest(b"/notes").unwrap(),
            fs.compute_digest(b"/notes").unwrap()
        );
    }

    #[test]
    fn test_digest_tracks_content() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"original").unwrap();
        let before = fs.compute_digest(b"/notes").unwrap();

        fs.seek(PROC, fd, 0, crate::fs::Whence::Set).unwrap();
        fs.write(PROC, fd, b"Original").unwrap();
        let after = fs.compute_digest(b"/notes").unwrap();
        fs.close(PROC, fd).unwrap();

        assert_ne!(before, after);
    }

    #[test]
    fn test_verify_after_refresh() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"checked content").unwrap();
        fs.close(PROC, fd).unwrap();

        // nothing stored yet
        assert!(!fs.verify_digest(b"/notes").unwrap());

        assert_eq!(fs.refresh_digests(INIT_PROC).unwrap(), 1);
        assert!(fs.verify_digest(b"/notes").unwrap());
        assert_eq!(
            fs.stored_digest(b"/notes").unwrap(),
            fs.compute_digest(b"/notes").unwrap()
        );

        // mutate the file; the stored digest goes stale
        let fd = fs.open(PROC, b"/notes", O_RDWR).unwrap();
        fs.write(PROC, fd, b"tampered").unwrap();
        fs.close(PROC, fd).unwrap();
        assert!(!fs.verify_digest(b"/notes").unwrap());
    }

    #[test]
    fn test_refresh_requires_init() {
        let mut fs = test_fs();
        assert!(matches!(
            fs.refresh_digests(PROC),
            Err(FsError::NotAuthorized)
        ));
    }

    #[test]
    fn test_refresh_skips_exempt_files() {
        let mut fs = test_fs();

        for name in [&b"/kernel.bin"[..], b"/.hidden", b"/journal"] {
            let fd = fs.open(PROC, name, O_CREAT | O_RDWR).unwrap();
            fs.write(PROC, fd, b"payload").unwrap();
            fs.close(PROC, fd).unwrap();
        }

        // device nodes and two of the three files are exempt
        assert_eq!(fs.refresh_digests(INIT_PROC).unwrap(), 1);
        assert!(fs.verify_digest(b"/journal").unwrap());
    }

    #[test]
    fn test_digest_of_truncated_file_changes() {
        let mut fs = test_fs();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR).unwrap();
        fs.write(PROC, fd, b"content").unwrap();
        fs.close(PROC, fd).unwrap();
        let full = fs.compute_digest(b"/notes").unwrap();

        let fd = fs.open(PROC, b"/notes", O_CREAT | O_RDWR | O_TRUNC).unwrap();
        fs.close(PROC, fd).unwrap();

        assert_ne!(fs.compute_digest(b"/notes").unwrap(), full);
    }

    #[test]
    fn test_digest_of_directory_is_refused() {
        let mut fs = test_fs();
        assert!(matches!(
            fs.compute_digest(b"/"),
            Err(FsError::NotRegularFile(_))
        ));
    }

    #[test]
    fn test_exemptions() {
        assert!(is_digest_exempt(&FileName::from_bytes(b".profile")));
        assert!(is_digest_exempt(&FileName::from_bytes(b"dev_tty2")));
        assert!(is_digest_exempt(&FileName::from_bytes(b"cmd.tar")));
        assert!(!is_digest_exempt(&FileName::from_bytes(b"cmd.tar2")));
        assert!(!is_digest_exempt(&FileName::from_bytes(b"notes")));
    }
}
