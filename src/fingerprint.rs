//! FNV-1a hashing shared by the filename cache's hash table and the recursion
//! core's archive fingerprints.

use std::time::SystemTime;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a over an arbitrary byte slice.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Rolling hash used to key the virtual-path hash table (`cache::hash_table`).
///
/// Distinct from [`fnv1a`] in name only; both are FNV-1a, but keeping a
/// dedicated entry point lets the hash table swap algorithms later without
/// touching the fingerprinting code that has an on-disk-adjacent contract
/// (sidecar `.r2i` checksums embed archive fingerprints).
pub fn path_hash(path: &str) -> u64 {
    fnv1a(path.as_bytes())
}

/// Identifies an archive's byte content well enough to catch unpack cycles,
/// without hashing the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    hash: u64,
    len: u64,
    mtime_secs: i64,
}

const SAMPLE_WINDOW: usize = 4096;

impl Fingerprint {
    /// Computes a fingerprint from the full byte content of an archive plus
    /// its length and modification time.
    ///
    /// `bytes` is expected to be the whole archive; only the first and last
    /// 4 KiB are actually hashed, so callers holding a large in-memory
    /// nested-archive buffer do not need to special-case this call.
    pub fn compute(bytes: &[u8], mtime: SystemTime) -> Self {
        let head_len = bytes.len().min(SAMPLE_WINDOW);
        let head = &bytes[..head_len];
        let tail_start = bytes.len().saturating_sub(SAMPLE_WINDOW);
        let tail = &bytes[tail_start..];

        let head_hash = fnv1a(head);
        let tail_hash = fnv1a(tail);
        let combined = fnv1a(&(head_hash ^ tail_hash).to_le_bytes());

        let mtime_secs = mtime
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Fingerprint {
            hash: combined,
            len: bytes.len() as u64,
            mtime_secs,
        }
    }

    /// Single 64-bit value a sidecar index can store to confirm it still
    /// corresponds to the archive it was built from. Folds all three fields
    /// so a stale sidecar (same length, different content or mtime) is still
    /// caught.
    pub fn checksum(&self) -> u64 {
        let mut buf = [0u8; 24];
        buf[0..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..16].copy_from_slice(&self.len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.mtime_secs.to_le_bytes());
        fnv1a(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_known_vector() {
        // FNV-1a of the empty string is the offset basis.
        assert_eq!(fnv1a(b""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn fingerprint_is_stable_for_identical_input() {
        let data = vec![7u8; 10_000];
        let t = SystemTime::UNIX_EPOCH;
        assert_eq!(Fingerprint::compute(&data, t), Fingerprint::compute(&data, t));
    }

    #[test]
    fn fingerprint_differs_on_tail_change() {
        let mut a = vec![1u8; 10_000];
        let mut b = a.clone();
        *b.last_mut().unwrap() = 2;
        let t = SystemTime::UNIX_EPOCH;
        assert_ne!(Fingerprint::compute(&a, t), Fingerprint::compute(&b, t));
        a.truncate(100);
        b.truncate(100);
    }

    #[test]
    fn checksum_changes_with_mtime_even_if_bytes_match() {
        let data = vec![5u8; 1000];
        let a = Fingerprint::compute(&data, SystemTime::UNIX_EPOCH);
        let b = Fingerprint::compute(&data, SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1));
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn fingerprint_handles_tiny_archives() {
        let data = vec![9u8; 3];
        let t = SystemTime::UNIX_EPOCH;
        let fp = Fingerprint::compute(&data, t);
        assert_eq!(fp.len, 3);
    }
}
