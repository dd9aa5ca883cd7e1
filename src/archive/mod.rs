//! Archive probing, volume resolution, block-header parsing, and the
//! decoder adapter.

pub mod decoder;
pub mod headers;
pub mod prober;
pub mod sidecar;
pub mod volume;

use num_enum::{FromPrimitive, IntoPrimitive};

/// Which multi-volume naming convention an archive set follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeNamingScheme {
    /// Not part of a multi-volume set.
    SingleVolume,
    /// Old-style `name.rNN` (first volume is bare `name.rar`).
    OldStyle,
    /// New-style `name.partNN.rar`, fixed digit width.
    NewStyle { digit_width: u8 },
}

/// Archive compression method identifier, exposed to clients via the
/// `user.method` extended attribute. Values follow the RAR method byte
/// convention: 0x30 is "store".
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum CompressionMethod {
    Store = 0x30,
    Fastest = 0x31,
    Fast = 0x32,
    Normal = 0x33,
    Good = 0x34,
    Best = 0x35,
    #[num_enum(default)]
    Unknown = 0xffff,
}

impl CompressionMethod {
    pub fn is_raw_readable(self) -> bool {
        matches!(self, CompressionMethod::Store)
    }

    pub fn xattr_value(self) -> &'static str {
        match self {
            CompressionMethod::Store => "store",
            CompressionMethod::Fastest => "fastest",
            CompressionMethod::Fast => "fast",
            CompressionMethod::Normal => "normal",
            CompressionMethod::Good => "good",
            CompressionMethod::Best => "best",
            CompressionMethod::Unknown => "unknown",
        }
    }
}

/// Hard iteration cap on header walking.
pub const MAX_HEADER_ENTRIES: usize = 10_000;
