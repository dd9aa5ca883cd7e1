//! Read-only FUSE filesystem that projects the contents of RAR archives
//! found under a source directory tree into a mounted directory tree,
//! transparently and without ever fully unpacking an archive to disk.

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod fs;
pub mod io;
pub mod options;
pub mod recursion;
pub mod sanitize;
pub mod stat;

pub use cache::Caches;
pub use error::{RarfsError, Result};
pub use options::Options;
