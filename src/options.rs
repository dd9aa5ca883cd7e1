//! Typed options registry. Populated once at startup from the CLI and
//! frozen before any callback is registered; every other component holds a
//! shared reference to it.
//!
//! Unlike a generic string-keyed map, each option has a single concrete
//! field, the same way [`MountOption`](fuser::MountOption) closes over a
//! fixed set of variants instead of stringly-typed configuration.

use std::path::PathBuf;
use std::time::Duration;

/// I/O tuning, threading, feature toggles and presentation options.
#[derive(Debug, Clone)]
pub struct Options {
    // I/O tuning
    pub seek_length: u64,
    pub save_eof: bool,
    pub direct_io: bool,
    pub flat_only: bool,
    /// Recognized for CLI/config compatibility; this crate never
    /// memory-maps an index file (sidecars and archives are read with
    /// `std::fs::read`), so the flag has no effect.
    pub no_idx_mmap: bool,

    // Threading
    pub worker_threads: usize,

    // Feature toggles
    pub recursive: bool,
    pub recursion_depth: u32,
    pub max_unpack_size: u64,

    // Presentation
    pub source_root: PathBuf,
    pub mount_point: PathBuf,
    /// Recognized for CLI/config compatibility. `fs::InodeTable` always
    /// allocates inode numbers itself rather than reusing a host
    /// filesystem's real ones (archive members have none, and reusing
    /// the host's for passthrough paths only would make two presentation
    /// policies for one mount), so this flag has no effect either way.
    pub fake_inode_generation: bool,
    pub extra_mount_options: Vec<String>,

    // Ambient: needed by any decoder-open path regardless of how it's invoked.
    pub decoder_open_timeout: Duration,
}

/// Hard ceiling on `recursion_depth`; see `recursion::MAX_RECURSION_DEPTH`.
pub const MAX_RECURSION_DEPTH: u32 = 10;

/// Default cumulative unpacked-size budget across one recursive chain (10 GiB).
pub const DEFAULT_MAX_UNPACK_SIZE: u64 = 10 * 1024 * 1024 * 1024;

impl Options {
    /// Builds the frozen options set from already-validated CLI inputs.
    ///
    /// `main.rs` is the only caller; it is responsible for turning
    /// `clap`-level parse errors into `RarfsError::ConfigError` before this
    /// constructor ever runs, so this function only enforces invariants that
    /// depend on more than one field (recursion depth's relationship to the
    /// hard cap).
    pub fn new(
        source_root: PathBuf,
        mount_point: PathBuf,
        seek_length: u64,
        save_eof: bool,
        direct_io: bool,
        flat_only: bool,
        no_idx_mmap: bool,
        worker_threads: usize,
        recursive: bool,
        recursion_depth: u32,
        max_unpack_size: u64,
        fake_inode_generation: bool,
        extra_mount_options: Vec<String>,
        decoder_open_timeout: Duration,
    ) -> Result<Self, crate::error::RarfsError> {
        if recursion_depth == 0 || recursion_depth > MAX_RECURSION_DEPTH {
            return Err(crate::error::RarfsError::ConfigError(format!(
                "recursion-depth must be in 1..={MAX_RECURSION_DEPTH}, got {recursion_depth}"
            )));
        }
        Ok(Options {
            seek_length,
            save_eof,
            direct_io,
            flat_only,
            no_idx_mmap,
            worker_threads,
            recursive,
            recursion_depth,
            max_unpack_size,
            source_root,
            mount_point,
            fake_inode_generation,
            extra_mount_options,
            decoder_open_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(recursion_depth: u32) -> Result<Options, crate::error::RarfsError> {
        Options::new(
            PathBuf::from("/src"),
            PathBuf::from("/mnt"),
            16 * 1024,
            false,
            false,
            false,
            false,
            4,
            true,
            recursion_depth,
            DEFAULT_MAX_UNPACK_SIZE,
            false,
            vec![],
            Duration::from_secs(30),
        )
    }

    #[test]
    fn rejects_zero_recursion_depth() {
        assert!(base(0).is_err());
    }

    #[test]
    fn rejects_depth_above_hard_cap() {
        assert!(base(MAX_RECURSION_DEPTH + 1).is_err());
    }

    #[test]
    fn accepts_depth_at_hard_cap() {
        assert!(base(MAX_RECURSION_DEPTH).is_ok());
    }
}
