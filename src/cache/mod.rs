//! The filename cache and directory cache, and the single reader/writer lock
//! that guards both plus the per-archive config table.

pub mod dirlist;
pub mod hash_table;

use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::RwLock;

use crate::archive::VolumeNamingScheme;
use crate::config::ArchiveConfigTable;
use crate::stat::Stat;

bitflags! {
    /// Packed flag group. A layout optimization only — every bit is an
    /// independent boolean and `bitflags!` gives us atomic-free but
    /// race-free read-modify-write through `&mut` access under the writer
    /// lock; mutators always hold it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        /// Member is stored (uncompressed, unencrypted): readable without the decoder.
        const RAW        = 1 << 0;
        /// Member's data spans more than one volume.
        const MULTIPART   = 1 << 1;
        /// Member is encrypted.
        const ENCRYPTED   = 1 << 2;
    }
}

/// Canonical metadata record for one virtual path.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub archive_path: PathBuf,
    pub member_name: String,
    pub link_target: Option<String>,
    pub stat: Stat,
    pub method: u16,
    pub flags: FileFlags,

    // Raw-read geometry.
    pub offset: u64,
    pub vsize_first: u64,
    pub vsize_next: u64,
    pub vsize_real_first: u64,
    pub vsize_real_next: u64,
    pub vno_base: u32,
    pub vno_first: u32,
    pub vlen: u8,
    pub vpos: u16,
    pub vtype: VolumeNamingScheme,

    // Nested-unpacking metadata.
    pub nested_depth: u8,
    pub parent_archive_path: Option<PathBuf>,
}


/// Result of looking up a virtual path in the filename cache.
pub enum Lookup {
    /// A real, owned record.
    Entry(Arc<FileEntry>),
    /// Sentinel: path is a passthrough to the source root.
    LocalFs,
    /// Sentinel: path is a known dead loop / invalid path.
    LoopFs,
    /// No cached knowledge of this path yet.
    Miss,
}

/// Owns the filename cache, directory cache, and per-archive config table
/// behind a single reader/writer lock. One instance is created at mount and
/// destroyed at unmount; every component holds a shared `Arc<Caches>`.
// Every method below takes the guard as a local binding and lets it drop at
// the end of the function, including on an early `?` return; nothing stores
// a guard past its call, so a locked section can never outlive the method
// that opened it.
pub struct Caches {
    inner: RwLock<CacheInner>,
    pub config: ArchiveConfigTable,
}

struct CacheInner {
    files: hash_table::HashTable,
    dirs: dirlist::DirCache,
}

impl Caches {
    pub fn new(config: ArchiveConfigTable) -> Arc<Self> {
        Arc::new(Caches {
            inner: RwLock::new(CacheInner {
                files: hash_table::HashTable::new(),
                dirs: dirlist::DirCache::new(),
            }),
            config,
        })
    }

    /// Reader-locked lookup; see [`Lookup`].
    pub fn get(&self, path: &str) -> Lookup {
        let guard = self.inner.read();
        guard.files.get(path)
    }

    /// Writer-locked insertion of a fresh placeholder record for `path`.
    pub fn alloc(&self, path: &str, entry: FileEntry) -> Arc<FileEntry> {
        let mut guard = self.inner.write();
        guard.files.alloc(path, entry)
    }

    /// Writer-locked marking of `path` as a passthrough.
    pub fn mark_local_fs(&self, path: &str) {
        let mut guard = self.inner.write();
        guard.files.mark_local_fs(path);
    }

    /// Writer-locked marking of `path` as a detected cycle / dead path.
    pub fn mark_loop_fs(&self, path: &str) {
        let mut guard = self.inner.write();
        guard.files.mark_loop_fs(path);
    }

    pub fn invalidate(&self, path: &str) {
        let mut guard = self.inner.write();
        guard.files.invalidate(path);
        guard.dirs.invalidate(path);
    }

    /// Runs `f` with write access to both the filename and directory caches
    /// in one critical section, used by the prober when materializing a
    /// directory's worth of entries atomically: it writes every entry under
    /// the writer lock, then drops it.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut hash_table::HashTable, &mut dirlist::DirCache) -> R) -> R {
        let mut guard = self.inner.write();
        let CacheInner { files, dirs } = &mut *guard;
        f(files, dirs)
    }

    pub fn directory(&self, path: &str) -> Option<dirlist::DirList> {
        let guard = self.inner.read();
        guard.dirs.get(path).cloned()
    }
}
