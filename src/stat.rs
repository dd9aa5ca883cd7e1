//! POSIX-style stat block shared by filename cache entries and directory
//! cache entries: a directory cache entry shares the stat block of its
//! filename cache record.

use std::time::SystemTime;

/// Mirrors the subset of `struct stat` the mount actually reports.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub mode: u32,
    pub size: u64,
    pub mtime: SystemTime,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub blksize: u32,
}

const DEFAULT_FILE_MODE: u32 = 0o444;
const DEFAULT_DIR_MODE: u32 = libc::S_IFDIR as u32 | 0o555;
const DEFAULT_LINK_MODE: u32 = libc::S_IFLNK as u32 | 0o444;

impl Stat {
    /// A stat block for a regular, read-only archive member.
    pub fn regular_file(size: u64, mtime: SystemTime, uid: u32, gid: u32) -> Self {
        Stat {
            mode: libc::S_IFREG as u32 | DEFAULT_FILE_MODE,
            size,
            mtime,
            uid,
            gid,
            nlink: 1,
            blksize: default_blksize(),
        }
    }

    /// A stat block for a synthetic or archive-contributed directory.
    pub fn directory(mtime: SystemTime, uid: u32, gid: u32, nlink: u32) -> Self {
        Stat {
            mode: DEFAULT_DIR_MODE,
            size: 0,
            mtime,
            uid,
            gid,
            nlink,
            blksize: default_blksize(),
        }
    }

    /// A stat block for a symbolic-link member; `target_len` is the byte
    /// length of the link target, which POSIX reports as the link's size.
    pub fn symlink(target_len: u64, mtime: SystemTime, uid: u32, gid: u32) -> Self {
        Stat {
            mode: DEFAULT_LINK_MODE,
            size: target_len,
            mtime,
            uid,
            gid,
            nlink: 1,
            blksize: default_blksize(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }
}

fn default_blksize() -> u32 {
    page_size::get() as u32
}

/// Current process uid/gid, used as the owner reported for every entry
/// (the archive contents have no meaningful owner of their own).
pub fn process_owner() -> (u32, u32) {
    let uid = nix::unistd::getuid();
    let gid = nix::unistd::getgid();
    (uid.as_raw(), gid.as_raw())
}
