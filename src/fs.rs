//! Filesystem callback layer: translates `fuser` callbacks into filename
//! cache and directory cache lookups, dispatching to the read engine for
//! archive-backed files and straight through to the source root for
//! passthrough paths.
//!
//! Inode numbers are allocated on first reference and held for the mount's
//! lifetime; rarfs never unlinks anything, so there is no reclamation to do.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    Errno, FileAttr, FileHandle, FileType as FuseFileType, Filesystem, FopenFlags, Generation,
    INodeNo, LockOwner, OpenFlags, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyLseek, ReplyOpen, ReplyStatfs, ReplyXattr, Request,
};
use parking_lot::{Mutex, RwLock};

use crate::archive::decoder::Decoder;
use crate::archive::CompressionMethod;
use crate::cache::dirlist::{DirList, EntryType};
use crate::cache::{Caches, Lookup};
use crate::error::RarfsError;
use crate::io::IoHandle;
use crate::options::Options;
use crate::stat::Stat;

const TTL: Duration = Duration::new(1, 0);
const METHOD_XATTR: &str = "user.method";

/// One open file descriptor's state; directories just remember which path
/// they were opened for so `readdir` does not have to re-resolve the inode.
enum Handle {
    File { io: IoHandle, size: u64 },
    Local { path: PathBuf },
    Directory { path: String },
}

/// Bidirectional virtual-path <-> inode mapping. The root is always
/// `INodeNo::ROOT`.
struct InodeTable {
    by_ino: RwLock<HashMap<u64, String>>,
    by_path: RwLock<HashMap<String, u64>>,
    next: AtomicU64,
}

impl InodeTable {
    fn new() -> Self {
        let mut by_ino = HashMap::new();
        by_ino.insert(INodeNo::ROOT.0, String::new());
        let mut by_path = HashMap::new();
        by_path.insert(String::new(), INodeNo::ROOT.0);
        InodeTable {
            by_ino: RwLock::new(by_ino),
            by_path: RwLock::new(by_path),
            next: AtomicU64::new(INodeNo::ROOT.0 + 1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<String> {
        self.by_ino.read().get(&ino).cloned()
    }

    /// Returns the inode for `path`, allocating a fresh one on first sight.
    fn ino_of(&self, path: &str) -> u64 {
        if let Some(ino) = self.by_path.read().get(path) {
            return *ino;
        }
        let mut by_path = self.by_path.write();
        if let Some(ino) = by_path.get(path) {
            return *ino;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        by_path.insert(path.to_string(), ino);
        self.by_ino.write().insert(ino, path.to_string());
        ino
    }
}

/// Read-only FUSE filesystem projecting RAR archive contents, and any
/// uncovered files under the source root, into a mounted tree.
pub struct RarFs<D: Decoder + 'static> {
    caches: Arc<Caches>,
    options: Arc<Options>,
    decoder: Arc<D>,
    runtime: tokio::runtime::Handle,
    inodes: InodeTable,
    handles: Mutex<HashMap<u64, Handle>>,
    next_fh: AtomicU64,
}

impl<D: Decoder + 'static> RarFs<D> {
    pub fn new(caches: Arc<Caches>, options: Arc<Options>, decoder: Arc<D>, runtime: tokio::runtime::Handle) -> Self {
        RarFs {
            caches,
            options,
            decoder,
            runtime,
            inodes: InodeTable::new(),
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn local_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.options.source_root.clone()
        } else {
            self.options.source_root.join(path)
        }
    }

    /// Looks up `path` as a child of its parent's materialized directory
    /// listing, which is how both archive-contributed files and
    /// archive-contributed directories carry their stat block.
    fn dirlist_entry(&self, path: &str) -> Option<(Stat, EntryType)> {
        let mut list = self.caches.directory(&parent_of(path))?;
        if !list.is_closed() {
            list.close();
        }
        list.visible()
            .find(|e| e.name == basename(path))
            .map(|e| (*e.stat, e.kind))
    }

    fn root_stat(&self) -> Stat {
        match std::fs::symlink_metadata(&self.options.source_root) {
            Ok(meta) => stat_from_local(&meta),
            Err(_) => {
                let (uid, gid) = crate::stat::process_owner();
                Stat::directory(SystemTime::now(), uid, gid, 2)
            }
        }
    }

    fn attr_for_path(&self, path: &str) -> Result<Stat, Errno> {
        if path.is_empty() {
            return Ok(self.root_stat());
        }
        if let Some((stat, _)) = self.dirlist_entry(path) {
            return Ok(stat);
        }
        match std::fs::symlink_metadata(self.local_path(path)) {
            Ok(meta) => Ok(stat_from_local(&meta)),
            Err(_) => Err(Errno::ENOENT),
        }
    }

    /// Merges a live listing of `path` on the source filesystem into `list`
    /// as passthrough entries, so siblings not covered by any archive still
    /// show up in `readdir`. Passthrough entries take priority over
    /// archive-backed ones on a name collision, applied by `DirList::close`.
    fn merge_local_entries(&self, path: &str, list: &mut DirList) {
        let Ok(read_dir) = std::fs::read_dir(self.local_path(path)) else {
            return;
        };
        for entry in read_dir.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name == ".rarconfig" {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let kind = if meta.is_dir() {
                EntryType::Directory
            } else if meta.file_type().is_symlink() {
                EntryType::Link
            } else {
                EntryType::Regular
            };
            list.add(&name, Arc::new(stat_from_local(&meta)), kind, true);
        }
    }
}

impl<D: Decoder + 'static> Filesystem for RarFs<D> {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.path_of(parent.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(Errno::ENOENT);
            return;
        };
        let child_path = join_path(&parent_path, name);
        match self.attr_for_path(&child_path) {
            Ok(stat) => {
                let ino = self.inodes.ino_of(&child_path);
                reply.entry(&TTL, &build_attr(ino, &stat), Generation(0));
            }
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        let Some(path) = self.inodes.path_of(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match self.attr_for_path(&path) {
            Ok(stat) => reply.attr(&TTL, &build_attr(ino.0, &stat)),
            Err(e) => reply.error(e),
        }
    }

    fn readlink(&self, _req: &Request, ino: INodeNo, reply: ReplyData) {
        let Some(path) = self.inodes.path_of(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        match self.caches.get(&path) {
            Lookup::Entry(entry) => match &entry.link_target {
                Some(target) => reply.data(target.as_bytes()),
                None => reply.error(Errno::EINVAL),
            },
            _ => match std::fs::read_link(self.local_path(&path)) {
                Ok(target) => reply.data(target.as_os_str().as_bytes()),
                Err(_) => reply.error(Errno::ENOENT),
            },
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let open_flags = if self.options.direct_io {
            FopenFlags::FOPEN_DIRECT_IO
        } else {
            FopenFlags::empty()
        };
        match self.caches.get(&path) {
            Lookup::Entry(entry) => {
                let config = self.caches.config.for_archive(&entry.archive_path).unwrap_or_default();
                let size = entry.stat.size;
                let seek_length = config.seek_length.unwrap_or(self.options.seek_length);
                let save_eof = config.save_eof.unwrap_or(self.options.save_eof);
                match IoHandle::open(
                    &self.runtime,
                    Arc::clone(&self.decoder),
                    entry,
                    config.password,
                    self.options.decoder_open_timeout,
                    seek_length,
                    save_eof,
                ) {
                    Ok(io) => {
                        let fh = self.alloc_fh();
                        self.handles.lock().insert(fh, Handle::File { io, size });
                        reply.opened(FileHandle(fh), open_flags);
                    }
                    Err(e) => reply.error(errno_for(&e)),
                }
            }
            Lookup::LoopFs => reply.error(Errno::ELOOP),
            Lookup::LocalFs | Lookup::Miss => {
                let local = self.local_path(&path);
                if local.is_file() {
                    self.caches.mark_local_fs(&path);
                    let fh = self.alloc_fh();
                    self.handles.lock().insert(fh, Handle::Local { path: local });
                    reply.opened(FileHandle(fh), open_flags);
                } else {
                    reply.error(Errno::ENOENT);
                }
            }
        }
    }

    fn read(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        let handle = self.handles.lock();
        match handle.get(&fh.0) {
            Some(Handle::File { io, .. }) => match io.read(offset, size) {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(errno_for(&e)),
            },
            Some(Handle::Local { path }) => match std::fs::File::open(path) {
                Ok(file) => {
                    let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                    let read_size = (size as u64).min(len.saturating_sub(offset)) as usize;
                    let mut buf = vec![0u8; read_size];
                    match file.read_exact_at(&mut buf, offset) {
                        Ok(()) => reply.data(&buf),
                        Err(_) => reply.error(Errno::EIO),
                    }
                }
                Err(_) => reply.error(Errno::ENOENT),
            },
            Some(Handle::Directory { .. }) | None => reply.error(Errno::EBADF),
        }
    }

    fn release(
        &self,
        _req: &Request,
        _ino: INodeNo,
        fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.handles.lock().remove(&fh.0);
        reply.ok();
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let fh = self.alloc_fh();
        self.handles.lock().insert(fh, Handle::Directory { path });
        reply.opened(FileHandle(fh), FopenFlags::empty());
    }

    fn readdir(&self, _req: &Request, ino: INodeNo, fh: FileHandle, offset: u64, mut reply: ReplyDirectory) {
        let path = match self.handles.lock().get(&fh.0) {
            Some(Handle::Directory { path }) => path.clone(),
            _ => match self.inodes.path_of(ino.0) {
                Some(p) => p,
                None => {
                    reply.error(Errno::ENOENT);
                    return;
                }
            },
        };

        let mut list = self.caches.directory(&path).unwrap_or_default();
        self.merge_local_entries(&path, &mut list);
        list.close();

        let mut names: Vec<(String, FuseFileType)> = vec![
            (".".to_string(), FuseFileType::Directory),
            ("..".to_string(), FuseFileType::Directory),
        ];
        names.extend(list.visible().map(|e| (e.name.clone(), fuse_type_of(e.kind))));

        for (index, (name, kind)) in names.iter().enumerate().skip(offset as usize) {
            let child_path = match name.as_str() {
                "." => path.clone(),
                ".." => parent_of(&path),
                _ => join_path(&path, name),
            };
            let child_ino = self.inodes.ino_of(&child_path);
            let full = reply.add(INodeNo(child_ino), (index + 1) as u64, *kind, OsStr::new(name));
            if full {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        self.handles.lock().remove(&fh.0);
        reply.ok();
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        let bsize = page_size::get() as u32;
        reply.statfs(0, 0, 0, 0, 0, bsize, 255, bsize);
    }

    fn getxattr(&self, _req: &Request, ino: INodeNo, name: &OsStr, size: u32, reply: ReplyXattr) {
        let Some(path) = self.inodes.path_of(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        if name != OsStr::new(METHOD_XATTR) {
            reply.error(no_attr_errno());
            return;
        }
        match self.caches.get(&path) {
            Lookup::Entry(entry) => {
                let value = CompressionMethod::from(entry.method).xattr_value();
                reply_sized_data(size, value.as_bytes(), reply);
            }
            _ => reply.error(no_attr_errno()),
        }
    }

    fn listxattr(&self, _req: &Request, ino: INodeNo, size: u32, reply: ReplyXattr) {
        let Some(path) = self.inodes.path_of(ino.0) else {
            reply.error(Errno::ENOENT);
            return;
        };
        let mut bytes = Vec::new();
        if matches!(self.caches.get(&path), Lookup::Entry(_)) {
            bytes.extend_from_slice(METHOD_XATTR.as_bytes());
            bytes.push(0);
        }
        reply_sized_data(size, &bytes, reply);
    }

    fn lseek(&self, _req: &Request, _ino: INodeNo, fh: FileHandle, offset: i64, whence: i32, reply: ReplyLseek) {
        let size = match self.handles.lock().get(&fh.0) {
            Some(Handle::File { size, .. }) => *size as i64,
            Some(Handle::Local { path }) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0) as i64,
            _ => {
                reply.error(Errno::EBADF);
                return;
            }
        };

        let result = match whence {
            libc::SEEK_DATA => offset.min(size),
            libc::SEEK_HOLE => size,
            libc::SEEK_END => size + offset,
            _ => offset,
        };
        if result > size || result < 0 {
            reply.error(Errno::ENXIO);
        } else {
            reply.offset(result);
        }
    }
}

fn reply_sized_data(size: u32, data: &[u8], reply: ReplyXattr) {
    if size == 0 {
        reply.size(data.len() as u32);
    } else if data.len() <= size as usize {
        reply.data(data);
    } else {
        reply.error(Errno::ERANGE);
    }
}

#[cfg(target_os = "linux")]
fn no_attr_errno() -> Errno {
    Errno::ENODATA
}

#[cfg(not(target_os = "linux"))]
fn no_attr_errno() -> Errno {
    Errno::ENOATTR
}

fn errno_for(err: &RarfsError) -> Errno {
    Errno::from_i32(i32::from(err))
}

fn fuse_type_of(kind: EntryType) -> FuseFileType {
    match kind {
        EntryType::Directory => FuseFileType::Directory,
        EntryType::Regular => FuseFileType::RegularFile,
        EntryType::Link => FuseFileType::Symlink,
        EntryType::Other => FuseFileType::RegularFile,
    }
}

fn build_attr(ino: u64, stat: &Stat) -> FileAttr {
    FileAttr {
        ino: INodeNo(ino),
        size: stat.size,
        blocks: stat.size.div_ceil(512),
        atime: stat.mtime,
        mtime: stat.mtime,
        ctime: stat.mtime,
        crtime: stat.mtime,
        kind: file_type_of(stat.mode),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        blksize: stat.blksize,
        flags: 0,
    }
}

fn file_type_of(mode: u32) -> FuseFileType {
    match mode & libc::S_IFMT as u32 {
        m if m == libc::S_IFDIR as u32 => FuseFileType::Directory,
        m if m == libc::S_IFLNK as u32 => FuseFileType::Symlink,
        _ => FuseFileType::RegularFile,
    }
}

fn stat_from_local(meta: &std::fs::Metadata) -> Stat {
    Stat {
        mode: meta.mode(),
        size: meta.len(),
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        uid: meta.uid(),
        gid: meta.gid(),
        nlink: meta.nlink() as u32,
        blksize: meta.blksize() as u32,
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn basename(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path.to_string(),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}
