//! Recursion core: decides whether a nested-archive member found by the
//! prober gets expanded into its own directory of contents or left as a
//! plain file, and owns the state that makes that decision — the cumulative
//! unpack budget shared across the whole mount, plus the per-descent
//! [`Chain`] of archive fingerprints used to catch a genuine cycle (an
//! archive that contains, directly or transitively, itself) without
//! rejecting a diamond (the same nested archive reachable from two sibling
//! branches).

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use parking_lot::Mutex;
use tempfile::NamedTempFile;

use crate::archive::decoder::{Decoder, MemberInfo};
use crate::archive::prober::{self, NestedCandidate, ProbeOutcome};
use crate::archive::volume::VolumeResolver;
use crate::cache::Caches;
use crate::error::RarfsError;
use crate::fingerprint::Fingerprint;
use crate::options::Options;

/// Hard ceiling on any single nested-archive extraction, independent of the
/// cumulative `max_unpack_size` budget.
const MAX_NESTED_EXTRACTION_SIZE: u64 = 1024 * 1024 * 1024;

struct Inner {
    unpacked_so_far: u64,
    /// Extracted nested archives live here for the mount's lifetime so the
    /// decoder can keep reopening their backing file: the decoder cannot
    /// stream from an in-memory buffer, so this gives it a real path.
    temp_files: Vec<NamedTempFile>,
}

/// The current descent: fingerprints of every nested archive presently being
/// expanded, paired with their virtual paths for diagnostics, from the
/// mounted top-level archive down to whichever candidate is being resolved
/// right now. Pushed on descent, popped on return, so a fingerprint is only
/// ever live on the stack for as long as its archive is actually an ancestor
/// of the current one — a diamond (the same nested archive reached again via
/// a sibling branch, after its first expansion already returned) is never on
/// the stack at the point it is re-encountered, so it is not a cycle.
struct Chain {
    fingerprints: Vec<Fingerprint>,
    virtual_paths: Vec<String>,
}

impl Chain {
    fn root(virtual_root: &str) -> Self {
        Chain { fingerprints: Vec::new(), virtual_paths: vec![virtual_root.to_string()] }
    }

    fn contains(&self, fp: &Fingerprint) -> bool {
        self.fingerprints.contains(fp)
    }

    fn push(&mut self, fp: Fingerprint, virtual_path: String) {
        self.fingerprints.push(fp);
        self.virtual_paths.push(virtual_path);
    }

    fn pop(&mut self) {
        self.fingerprints.pop();
        self.virtual_paths.pop();
    }

    fn display(&self) -> String {
        self.virtual_paths.join(" -> ")
    }
}

/// Shared across every probe of a mount, tracking how much nested-archive
/// content has been admitted in total and holding the temp files backing
/// every extracted nested archive.
pub struct RecursionState {
    inner: Mutex<Inner>,
    max_unpack_size: u64,
}

impl RecursionState {
    pub fn new(max_unpack_size: u64) -> Self {
        RecursionState {
            inner: Mutex::new(Inner { unpacked_so_far: 0, temp_files: Vec::new() }),
            max_unpack_size,
        }
    }

    /// Probes `archive_path` as a top-level archive, expanding any
    /// nested-archive members it contains (subject to `options.recursive`,
    /// `options.recursion_depth`, and this state's unpack budget).
    pub fn mount_archive<D: Decoder>(
        &self,
        caches: &Caches,
        options: &Options,
        decoder: &D,
        archive_path: &Path,
        virtual_root: &str,
    ) -> Result<(), RarfsError> {
        let outcome = prober::probe_archive(caches, options, decoder, archive_path, virtual_root, 0, None)?;
        let mut chain = Chain::root(virtual_root);
        self.expand(caches, options, decoder, archive_path, virtual_root, 0, outcome, &mut chain)
    }

    /// Reserves `size` additional bytes against the cumulative unpack
    /// budget, without mutating state if it would be exceeded.
    fn reserve_budget(&self, size: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.unpacked_so_far.saturating_add(size) > self.max_unpack_size {
            return false;
        }
        inner.unpacked_so_far += size;
        true
    }

    fn keep_temp_file(&self, temp: NamedTempFile) {
        self.inner.lock().temp_files.push(temp);
    }

    fn expand<D: Decoder>(
        &self,
        caches: &Caches,
        options: &Options,
        decoder: &D,
        archive_path: &Path,
        virtual_root: &str,
        depth: u8,
        outcome: ProbeOutcome,
        chain: &mut Chain,
    ) -> Result<(), RarfsError> {
        if outcome.nested.is_empty() {
            return Ok(());
        }

        let config = caches.config.for_archive(archive_path).unwrap_or_default();
        let password = config.password.clone();
        let vtype = VolumeResolver::detect(archive_path)
            .map(|r| r.scheme())
            .unwrap_or(crate::archive::VolumeNamingScheme::SingleVolume);

        for candidate in outcome.nested {
            let result =
                self.try_expand_one(caches, options, decoder, archive_path, password.as_deref(), depth, &candidate, chain);
            let expanded = match result {
                Ok(expanded) => expanded,
                Err(e) => {
                    warn!(
                        "failed to expand nested archive {} (chain: {} -> {}): {e}",
                        candidate.virtual_path,
                        chain.display(),
                        candidate.virtual_path
                    );
                    false
                }
            };
            if !expanded {
                debug!("leaving {} as a plain file", candidate.virtual_path);
                prober::materialize_as_plain_file(
                    caches,
                    archive_path,
                    virtual_root,
                    &candidate,
                    depth,
                    Some(archive_path.to_path_buf()),
                    vtype,
                );
            }
        }
        Ok(())
    }

    fn try_expand_one<D: Decoder>(
        &self,
        caches: &Caches,
        options: &Options,
        decoder: &D,
        archive_path: &Path,
        password: Option<&str>,
        depth: u8,
        candidate: &NestedCandidate,
        chain: &mut Chain,
    ) -> Result<bool, RarfsError> {
        if candidate.unpack_size > MAX_NESTED_EXTRACTION_SIZE {
            debug!(
                "nested archive {} declares {} bytes, over the {}-byte per-extraction cap",
                candidate.virtual_path, candidate.unpack_size, MAX_NESTED_EXTRACTION_SIZE
            );
            return Ok(false);
        }

        let bytes = extract_member_bytes(decoder, archive_path, password, &candidate.raw_name)?;
        if bytes.len() as u64 > MAX_NESTED_EXTRACTION_SIZE {
            return Err(RarfsError::ResourceLimit(format!(
                "nested archive {} extracted to {} bytes, over the {}-byte per-extraction cap",
                candidate.virtual_path,
                bytes.len(),
                MAX_NESTED_EXTRACTION_SIZE
            )));
        }
        let fp = Fingerprint::compute(&bytes, candidate.mtime);
        if chain.contains(&fp) {
            warn!(
                "cycle detected expanding {}: already on the recursion chain {} -> {}",
                candidate.virtual_path,
                chain.display(),
                candidate.virtual_path
            );
            return Ok(false);
        }
        if !self.reserve_budget(bytes.len() as u64) {
            return Ok(false);
        }

        let mut temp = NamedTempFile::new().map_err(|e| RarfsError::Alloc(e.to_string()))?;
        temp.write_all(&bytes).map_err(|e| RarfsError::Alloc(e.to_string()))?;
        let temp_path = temp.path().to_path_buf();
        self.keep_temp_file(temp);

        let nested_outcome = prober::probe_archive(
            caches,
            options,
            decoder,
            &temp_path,
            &candidate.virtual_path,
            depth + 1,
            Some(archive_path.to_path_buf()),
        )?;

        chain.push(fp, candidate.virtual_path.clone());
        let result =
            self.expand(caches, options, decoder, &temp_path, &candidate.virtual_path, depth + 1, nested_outcome, chain);
        chain.pop();
        result.map(|()| true)
    }
}

/// Re-walks `archive_path` looking for the member named `raw_name` and
/// extracts it into memory. The prober already located this member once;
/// this second walk trades a bit of redundant header parsing for not having
/// to keep every archive's decoder session alive between probing and
/// expansion.
fn extract_member_bytes<D: Decoder>(
    decoder: &D,
    archive_path: &Path,
    password: Option<&str>,
    raw_name: &str,
) -> Result<Vec<u8>, RarfsError> {
    let mut session = decoder.open(archive_path, password)?;
    loop {
        match decoder.next_member(session)? {
            None => {
                return Err(RarfsError::ArchiveMalformed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("member {raw_name:?} disappeared between probe and extraction"),
                });
            }
            Some((info, next)) => {
                if info.name == raw_name {
                    let (bytes, _) = decoder.read_member(next)?;
                    return Ok(bytes);
                }
                session = decoder.skip_member(next)?;
            }
        }
    }
}
