//! Archive prober: walks one archive's member list, resolves raw-read
//! geometry for stored members, and materializes filename-cache and
//! directory-cache entries under the writer lock.
//!
//! Two sources feed a probe: the external decoder enumerates every member
//! (name, size, method, directory/encrypted flags) regardless of how it is
//! stored, while a direct scan of the first volume's block headers
//! ([`crate::archive::headers`]) recovers the exact byte offset of any
//! `Store`-method member's payload, which is what lets the read engine avoid
//! the decoder entirely on the common path.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::archive::decoder::Decoder;
use crate::archive::headers::{self, BlockType};
use crate::archive::sidecar;
use crate::archive::volume::VolumeResolver;
use crate::archive::{CompressionMethod, MAX_HEADER_ENTRIES};
use crate::cache::dirlist::{DirEntry, EntryType};
use crate::cache::{Caches, FileEntry, FileFlags};
use crate::config::ArchiveConfig;
use crate::error::RarfsError;
use crate::options::Options;
use crate::sanitize::sanitize_member_path;
use crate::stat::{self, Stat};

/// Derives the virtual directory an archive's contents are exposed under:
/// the archive's path relative to the source root, with its extension
/// stripped. `movies/Show.rar` under a source root of `/src` becomes the
/// virtual directory `movies/Show`.
pub fn archive_virtual_root(archive_path: &Path, source_root: &Path) -> String {
    let rel = archive_path.strip_prefix(source_root).unwrap_or(archive_path);
    let rel = rel.with_extension("");
    rel.to_string_lossy().replace('\\', "/")
}

/// One raw-readable member's geometry, recovered from a volume's block
/// headers rather than from the decoder. `chunk_size` is the member bytes
/// carried by the volume this geometry was scanned from, which for a member
/// that doesn't cross a volume boundary is its whole payload.
struct RawGeometry {
    payload_offset: u64,
    chunk_size: u64,
    split_after: bool,
}

/// A member the decoder reported as itself being a RAR archive, deferred so
/// the caller can decide (budget, depth, cycles) whether to expand it into a
/// directory or fall back to exposing it as a plain file.
pub struct NestedCandidate {
    pub raw_name: String,
    pub virtual_path: String,
    pub mtime: std::time::SystemTime,
    pub unpack_size: u64,
}

/// Result of probing one archive: the entries written so far, plus any
/// nested-archive members deferred to the recursion core.
pub struct ProbeOutcome {
    pub nested: Vec<NestedCandidate>,
}

/// Scans `buf` (the first volume's bytes) for `FileHead` blocks in order,
/// returning the raw geometry of each — indexed the same way the decoder
/// enumerates members, since both walk the archive in header order.
fn scan_raw_geometry(buf: &[u8]) -> Vec<RawGeometry> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut seen = 0usize;

    if buf.len() < headers::SIGNATURE.len() || &buf[..headers::SIGNATURE.len()] != headers::SIGNATURE {
        return out;
    }
    pos += headers::SIGNATURE.len();

    while pos < buf.len() && seen < MAX_HEADER_ENTRIES {
        let Some((header, prefix_len)) = headers::parse_block_header(&buf[pos..]) else {
            break;
        };
        match BlockType::from(header.block_type) {
            BlockType::EndArc => break,
            BlockType::FileHead => {
                let Some(parsed) = headers::parse_file_header(&buf[pos..], &header) else {
                    break;
                };
                out.push(RawGeometry {
                    payload_offset: (pos + parsed.payload_offset) as u64,
                    chunk_size: parsed.pack_size,
                    split_after: parsed.split_after,
                });
                pos += parsed.block_size.max(prefix_len);
            }
            _ => {
                let size = header.size as usize;
                if size == 0 {
                    break;
                }
                pos += size;
            }
        }
        seen += 1;
    }
    out
}

/// Probes one archive, populating `caches` with its contents under
/// `virtual_root` (the archive's own position in the mounted tree: derived
/// from its path for a top-level archive, or supplied by the recursion core
/// when this archive was itself extracted from a parent). `depth` and
/// `parent_archive` identify this archive's position in a nested-unpacking
/// chain; top-level archives pass `depth == 0` and `parent_archive == None`.
///
/// Nested-archive members are not expanded here: they are reported back in
/// [`ProbeOutcome::nested`] so the recursion core can apply depth and budget
/// admission before deciding whether to recurse, without this function
/// needing to know those policies.
pub fn probe_archive<D: Decoder>(
    caches: &Caches,
    options: &Options,
    decoder: &D,
    archive_path: &Path,
    virtual_root: &str,
    depth: u8,
    parent_archive: Option<PathBuf>,
) -> Result<ProbeOutcome, RarfsError> {
    let config = caches.config.for_archive(archive_path).unwrap_or_default();
    let password = config.password.as_deref();

    let raw_geometry = read_raw_geometry(archive_path);
    let vtype = VolumeResolver::detect(archive_path)
        .map(|r| r.scheme())
        .unwrap_or(crate::archive::VolumeNamingScheme::SingleVolume);

    let mut session = decoder.open(archive_path, password)?;
    let mut index = 0usize;
    let mut dir_entries: Vec<(String, DirEntry)> = Vec::new();
    let mut file_entries: Vec<(String, FileEntry)> = Vec::new();
    let mut nested = Vec::new();

    let (root_uid, root_gid) = stat::process_owner();
    dir_entries.push((
        parent_of(virtual_root),
        DirEntry {
            name: basename(virtual_root),
            kind: EntryType::Directory,
            hash: crate::fingerprint::path_hash(virtual_root),
            valid: true,
            is_passthrough: false,
            stat: std::sync::Arc::new(Stat::directory(std::time::SystemTime::now(), root_uid, root_gid, 2)),
        },
    ));

    loop {
        let Some((info, next)) = decoder.next_member(session)? else {
            break;
        };
        if index >= MAX_HEADER_ENTRIES {
            warn!(
                "archive {} exceeds {} header entries, truncating",
                archive_path.display(),
                MAX_HEADER_ENTRIES
            );
            break;
        }

        let sanitized = match sanitize_member_path(info.name.as_bytes()) {
            Ok(path) => path,
            Err(reason) => {
                debug!("skipping member {:?} in {}: {reason}", info.name, archive_path.display());
                session = decoder.skip_member(next)?;
                index += 1;
                continue;
            }
        };

        let virtual_path = format!("{virtual_root}/{sanitized}");
        let geometry = raw_geometry.as_ref().and_then(|g| g.get(index));
        let (uid, gid) = stat::process_owner();

        // Some archives encode an empty directory as a zero-size member whose
        // raw name still carries its trailing separator rather than setting
        // the decoder's own directory bit.
        let forced_dir = info.unpack_size == 0 && (info.name.ends_with('/') || info.name.ends_with('\\'));

        if info.is_directory || forced_dir {
            dir_entries.push((
                parent_of(&virtual_path),
                DirEntry {
                    name: basename(&sanitized),
                    kind: EntryType::Directory,
                    hash: crate::fingerprint::path_hash(&virtual_path),
                    valid: true,
                    is_passthrough: false,
                    stat: std::sync::Arc::new(Stat::directory(info.mtime, uid, gid, 2)),
                },
            ));
            session = decoder.skip_member(next)?;
            index += 1;
            continue;
        }

        let is_nested = options.recursive
            && sanitized.to_ascii_lowercase().ends_with(".rar")
            && depth + 1 <= options.recursion_depth as u8;

        if is_nested {
            nested.push(NestedCandidate {
                raw_name: info.name.clone(),
                virtual_path,
                mtime: info.mtime,
                unpack_size: info.unpack_size,
            });
            session = decoder.skip_member(next)?;
            index += 1;
            continue;
        }

        let method = CompressionMethod::from(info.method);
        let mut flags = FileFlags::empty();
        if info.is_encrypted {
            flags |= FileFlags::ENCRYPTED;
        }
        let crosses_volumes = geometry.as_ref().is_some_and(|g| g.split_after);

        // For a member confined to the first volume, its whole payload is
        // the "first" chunk. For one that crosses a boundary, the chunk
        // carried by every volume after the first is recovered by scanning
        // that volume's own header (assumed constant size across middle
        // volumes, the way a fixed-size volume split produces them; the
        // true length of the final volume's chunk is whatever the read path
        // finds there at read time).
        let next_chunk_size = if crosses_volumes { resolve_next_volume_chunk(archive_path) } else { None };

        if crosses_volumes {
            flags |= FileFlags::MULTIPART;
            if let Some(resolver) = VolumeResolver::detect(archive_path) {
                debug!(
                    "{} spans a volume boundary; {} volume(s) present on disk",
                    sanitized,
                    resolver.existing_volumes().len()
                );
            }
        }
        let geometry_fully_known = !crosses_volumes || next_chunk_size.is_some();
        if method.is_raw_readable() && geometry.is_some() && !info.is_encrypted && geometry_fully_known {
            flags |= FileFlags::RAW;
        }

        let vsize_first = geometry.map(|g| g.chunk_size).unwrap_or(info.unpack_size);
        let vsize_next = next_chunk_size.unwrap_or(0);

        let entry = FileEntry {
            archive_path: archive_path.to_path_buf(),
            member_name: sanitized.clone(),
            link_target: None,
            stat: Stat::regular_file(info.unpack_size, info.mtime, uid, gid),
            method: info.method,
            flags,
            offset: geometry.map(|g| g.payload_offset).unwrap_or(0),
            vsize_first,
            vsize_next,
            vsize_real_first: vsize_first,
            vsize_real_next: vsize_next,
            // Every archive this crate mounts is discovered and opened from
            // its own first volume (`main.rs::discover_first_volumes`), so
            // volume numbering always starts at 0; a member's data is never
            // probed starting mid-sequence.
            vno_base: 0,
            vno_first: 0,
            vlen: 1,
            vpos: 0,
            vtype,
            nested_depth: depth,
            parent_archive_path: parent_archive.clone(),
        };

        file_entries.push((virtual_path.clone(), entry));
        dir_entries.push((
            parent_of(&virtual_path),
            DirEntry {
                name: basename(&sanitized),
                kind: EntryType::Regular,
                hash: crate::fingerprint::path_hash(&virtual_path),
                valid: true,
                is_passthrough: false,
                stat: std::sync::Arc::new(Stat::regular_file(info.unpack_size, info.mtime, uid, gid)),
            },
        ));

        session = decoder.skip_member(next)?;
        index += 1;
    }

    apply_aliases(&config, &mut file_entries, &mut dir_entries, virtual_root);

    caches.with_write(|files, dirs| {
        for (path, entry) in file_entries {
            files.alloc(&path, entry);
        }
        for (parent, dir_entry) in dir_entries {
            dirs.get_or_create(&parent).add(
                &dir_entry.name,
                dir_entry.stat,
                dir_entry.kind,
                dir_entry.is_passthrough,
            );
        }
    });

    Ok(ProbeOutcome { nested })
}

/// Falls back a deferred nested-archive candidate to a plain visible file
/// when the recursion core declines to expand it (depth exhausted, budget
/// exceeded, cycle detected).
pub fn materialize_as_plain_file(
    caches: &Caches,
    archive_path: &Path,
    virtual_root: &str,
    candidate: &NestedCandidate,
    depth: u8,
    parent_archive: Option<PathBuf>,
    vtype: crate::archive::VolumeNamingScheme,
) {
    let (uid, gid) = stat::process_owner();
    let sanitized = candidate.virtual_path[virtual_root.len() + 1..].to_string();
    let entry = FileEntry {
        archive_path: archive_path.to_path_buf(),
        member_name: sanitized.clone(),
        link_target: None,
        stat: Stat::regular_file(candidate.unpack_size, candidate.mtime, uid, gid),
        method: CompressionMethod::Unknown.into(),
        flags: FileFlags::empty(),
        offset: 0,
        vsize_first: candidate.unpack_size,
        vsize_next: 0,
        vsize_real_first: candidate.unpack_size,
        vsize_real_next: 0,
        vno_base: 0,
        vno_first: 0,
        vlen: 1,
        vpos: 0,
        vtype,
        nested_depth: depth,
        parent_archive_path: parent_archive,
    };
    let stat_arc = std::sync::Arc::new(entry.stat);
    caches.with_write(|files, dirs| {
        files.alloc(&candidate.virtual_path, entry);
        dirs.get_or_create(&parent_of(&candidate.virtual_path)).add(
            &basename(&sanitized),
            stat_arc,
            EntryType::Regular,
            false,
        );
    });
}

/// Reads the first volume's bytes and recovers raw-read geometry, preferring
/// a `.r2i` sidecar over a full header scan when one is present and its
/// checksum still matches the archive. Absent or unreadable volumes fall
/// back to decoder-only enumeration (no raw fast path, every read goes
/// through the decoder).
fn read_raw_geometry(archive_path: &Path) -> Option<Vec<RawGeometry>> {
    let bytes = std::fs::read(archive_path).ok()?;

    let mtime = std::fs::metadata(archive_path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let fingerprint = crate::fingerprint::Fingerprint::compute(&bytes, mtime);

    if let Ok(sidecar_bytes) = std::fs::read(sidecar::sidecar_path(archive_path)) {
        if let Some(entries) = sidecar::parse(&sidecar_bytes, &fingerprint) {
            debug!("using .r2i sidecar for {}", archive_path.display());
            return Some(
                entries
                    .into_iter()
                    .map(|e| RawGeometry {
                        payload_offset: e.payload_offset,
                        chunk_size: e.chunk_size,
                        split_after: e.split_after,
                    })
                    .collect(),
            );
        }
    }

    Some(scan_raw_geometry(&bytes))
}

/// Scans the second volume (index 1 in [`VolumeResolver`] numbering) for the
/// chunk size of the member that continues into it. Classic volume splitting
/// gives every volume but the last the same chunk size, so this one scan is
/// reused as `vsize_next` for every continuation volume; the read path
/// discovers the true, possibly shorter, length of the final volume's chunk
/// on its own when it actually reads that volume.
fn resolve_next_volume_chunk(archive_path: &Path) -> Option<u64> {
    let resolver = VolumeResolver::detect(archive_path)?;
    let next_volume = resolver.volume_path(1)?;
    let bytes = std::fs::read(&next_volume).ok()?;
    scan_raw_geometry(&bytes).into_iter().next().map(|g| g.chunk_size)
}

fn parent_of(virtual_path: &str) -> String {
    match virtual_path.rfind('/') {
        Some(idx) => virtual_path[..idx].to_string(),
        None => String::new(),
    }
}

fn basename(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[idx + 1..].to_string(),
        None => path.to_string(),
    }
}

/// Applies `.rarconfig` aliases by duplicating the aliased file and
/// directory entries under their target name within the same directory.
fn apply_aliases(
    config: &ArchiveConfig,
    file_entries: &mut Vec<(String, FileEntry)>,
    dir_entries: &mut Vec<(String, DirEntry)>,
    virtual_root: &str,
) {
    for (from, to) in &config.aliases {
        let from_path = format!("{virtual_root}/{from}");
        let to_path = format!("{virtual_root}/{to}");
        if let Some((_, entry)) = file_entries.iter().find(|(p, _)| p == &from_path).cloned() {
            file_entries.push((to_path.clone(), entry));
            if let Some((_, dir_entry)) = dir_entries
                .iter()
                .find(|(_, d)| format!("{virtual_root}/{}", d.name) == from_path)
                .cloned()
            {
                let mut renamed = dir_entry;
                renamed.name = basename(to);
                dir_entries.push((parent_of(&to_path), renamed));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_virtual_root_strips_extension_and_prefix() {
        let root = archive_virtual_root(Path::new("/src/movies/Show.rar"), Path::new("/src"));
        assert_eq!(root, "movies/Show");
    }

    #[test]
    fn scan_raw_geometry_rejects_bad_signature() {
        assert!(scan_raw_geometry(b"not a rar file").is_empty());
    }

    #[test]
    fn scan_raw_geometry_finds_one_stored_member() {
        let mut buf = Vec::new();
        buf.extend_from_slice(headers::SIGNATURE);
        buf.extend_from_slice(&0u16.to_le_bytes()); // crc
        buf.push(0x74); // FileHead
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&0u16.to_le_bytes()); // size placeholder
        buf.extend_from_slice(&3u32.to_le_bytes()); // pack_size
        buf.extend_from_slice(&3u32.to_le_bytes()); // unpack_size
        buf.push(0); // host_os
        buf.extend_from_slice(&0u32.to_le_bytes()); // file_crc
        buf.extend_from_slice(&0u32.to_le_bytes()); // file_time
        buf.push(0); // unpack_version
        buf.push(0x30); // method: store
        buf.extend_from_slice(&3u16.to_le_bytes()); // name_size
        buf.extend_from_slice(&0u32.to_le_bytes()); // attr
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(b"xyz"); // payload
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.push(0x7b);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&7u16.to_le_bytes());

        let found = scan_raw_geometry(&buf);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].chunk_size, 3);
        assert!(!found[0].split_after);
    }

    #[test]
    fn basename_and_parent_split_correctly() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(parent_of("a/b/c.txt"), "a/b");
        assert_eq!(parent_of("c.txt"), "");
    }

    fn encode_stored_member(name: &[u8], pack_size: u32, split_after: bool, payload: &[u8]) -> Vec<u8> {
        let flags: u16 = if split_after { headers::FILE_HEAD_FLAG_SPLIT_AFTER } else { 0 };
        let mut buf = Vec::new();
        buf.extend_from_slice(headers::SIGNATURE);
        buf.extend_from_slice(&0u16.to_le_bytes()); // crc
        buf.push(0x74); // FileHead
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // size placeholder
        buf.extend_from_slice(&pack_size.to_le_bytes());
        buf.extend_from_slice(&pack_size.to_le_bytes()); // unpack_size
        buf.push(0); // host_os
        buf.extend_from_slice(&0u32.to_le_bytes()); // file_crc
        buf.extend_from_slice(&0u32.to_le_bytes()); // file_time
        buf.push(0); // unpack_version
        buf.push(0x30); // method: store
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // attr
        buf.extend_from_slice(name);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn resolve_next_volume_chunk_scans_second_volume() {
        let dir = tempfile::tempdir().unwrap();
        let vol0 = dir.path().join("show.rar");
        std::fs::write(&vol0, encode_stored_member(b"show.mkv", 4, true, b"ABCD")).unwrap();
        let vol1 = dir.path().join("show.r00");
        std::fs::write(&vol1, encode_stored_member(b"show.mkv", 6, false, b"EFGHIJ")).unwrap();

        let chunk = resolve_next_volume_chunk(&vol0);
        assert_eq!(chunk, Some(6));
    }

    #[test]
    fn resolve_next_volume_chunk_absent_when_second_volume_missing() {
        let dir = tempfile::tempdir().unwrap();
        let vol0 = dir.path().join("show.rar");
        std::fs::write(&vol0, encode_stored_member(b"show.mkv", 4, true, b"ABCD")).unwrap();

        assert_eq!(resolve_next_volume_chunk(&vol0), None);
    }
}
