//! Error taxonomy for the crate, and its conversion to POSIX errno at the
//! `fuser::Filesystem` callback boundary.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// The seven error categories named by the design's error handling section.
#[derive(Debug)]
pub enum RarfsError {
    /// Unknown option, out-of-range value, or malformed `.rarconfig`. Fatal at startup.
    ConfigError(String),
    /// Bad signature, truncated header, or otherwise unreadable archive.
    ArchiveMalformed { archive: PathBuf, reason: String },
    /// Opening the decoder exceeded the configured wall-clock timeout.
    DecoderTimeout { archive: PathBuf },
    /// A positional read against a volume file failed.
    VolumeIo { volume: PathBuf, source: io::Error },
    /// A depth, size, or iteration cap was hit while walking an archive.
    ResourceLimit(String),
    /// Allocation failure while building a cache entry.
    Alloc(String),
    /// A nested-archive member failed path sanitization and was skipped.
    PathRejected { member: String, reason: String },
}

impl fmt::Display for RarfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "configuration error: {msg}"),
            Self::ArchiveMalformed { archive, reason } => {
                write!(f, "malformed archive {}: {reason}", archive.display())
            }
            Self::DecoderTimeout { archive } => {
                write!(f, "timed out opening archive {}", archive.display())
            }
            Self::VolumeIo { volume, source } => {
                write!(f, "i/o error on volume {}: {source}", volume.display())
            }
            Self::ResourceLimit(msg) => write!(f, "resource limit exceeded: {msg}"),
            Self::Alloc(msg) => write!(f, "allocation failure: {msg}"),
            Self::PathRejected { member, reason } => {
                write!(f, "rejected member {member:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for RarfsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::VolumeIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<&RarfsError> for i32 {
    /// Maps an internal error to the errno returned from a `fuser` reply.
    fn from(err: &RarfsError) -> i32 {
        match err {
            RarfsError::ConfigError(_) => libc::EINVAL,
            RarfsError::ArchiveMalformed { .. } => libc::ENOENT,
            RarfsError::DecoderTimeout { .. } => libc::ETIMEDOUT,
            RarfsError::VolumeIo { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            RarfsError::ResourceLimit(_) => libc::EFBIG,
            RarfsError::Alloc(_) => libc::ENOMEM,
            RarfsError::PathRejected { .. } => libc::EINVAL,
        }
    }
}

impl From<RarfsError> for io::Error {
    fn from(err: RarfsError) -> io::Error {
        let errno = i32::from(&err);
        io::Error::from_raw_os_error(errno)
    }
}

/// Convenience alias used throughout the crate's non-callback code paths.
pub type Result<T> = std::result::Result<T, RarfsError>;
