//! Reader for the optional `<archive>.r2i` sidecar index: a small binary
//! format that caches raw-read geometry so the prober can skip the full
//! header walk on repeat mounts. This module only consumes the format; it
//! never writes one.

use std::path::{Path, PathBuf};

use crate::fingerprint::Fingerprint;

const MAGIC: &[u8; 4] = b"R2I1";
const VERSION: u8 = 1;

/// Raw-read geometry for one member, recovered from a sidecar entry instead
/// of a header scan.
pub struct SidecarEntry {
    pub payload_offset: u64,
    /// Bytes of this member's data carried in the volume the entry was
    /// recorded against.
    pub chunk_size: u64,
    pub split_after: bool,
}

/// `<archive>.r2i`, sitting next to the archive file itself.
pub fn sidecar_path(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_owned();
    name.push(".r2i");
    PathBuf::from(name)
}

/// Parses a sidecar buffer, returning its per-member geometry in header
/// order if the magic, version and fingerprint checksum all match.
///
/// Layout: 4-byte magic, 1-byte version, 8-byte fingerprint checksum
/// (little-endian), 4-byte entry count, then that many entries of
/// `(offset: u64 LE, chunk_size: u64 LE, split_after: u8)`.
pub fn parse(buf: &[u8], expected: &Fingerprint) -> Option<Vec<SidecarEntry>> {
    if buf.len() < 4 + 1 + 8 + 4 || &buf[0..4] != MAGIC {
        return None;
    }
    if buf[4] != VERSION {
        return None;
    }
    let checksum = u64::from_le_bytes(buf[5..13].try_into().ok()?);
    if checksum != expected.checksum() {
        return None;
    }
    let count = u32::from_le_bytes(buf[13..17].try_into().ok()?) as usize;

    let mut entries = Vec::with_capacity(count);
    let mut pos = 17usize;
    for _ in 0..count {
        if pos + 17 > buf.len() {
            return None;
        }
        let offset = u64::from_le_bytes(buf[pos..pos + 8].try_into().ok()?);
        let chunk_size = u64::from_le_bytes(buf[pos + 8..pos + 16].try_into().ok()?);
        let split_after = buf[pos + 16] != 0;
        entries.push(SidecarEntry { payload_offset: offset, chunk_size, split_after });
        pos += 17;
    }
    Some(entries)
}
