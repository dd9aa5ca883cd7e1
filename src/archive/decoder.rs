//! Adapter over the external archive-decoding library: a narrow trait
//! capturing exactly the four operations the prober and read engine need
//! (open, walk headers, extract a member's bytes, close), backed by the
//! `unrar` crate.
//!
//! Everything upstream of this module works in terms of [`Decoder`] and
//! [`MemberInfo`], never `unrar` types directly, so a future backend swap
//! touches only this file.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use unrar::Archive;

use crate::error::RarfsError;

/// One header the decoder walked past, with just enough detail for the
/// prober to populate a [`crate::cache::FileEntry`].
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub unpack_size: u64,
    pub is_directory: bool,
    pub is_encrypted: bool,
    pub mtime: SystemTime,
    pub method: u16,
}

/// The archive-decoding operations the rest of the crate depends on,
/// independent of which library provides them.
pub trait Decoder: Send + Sync {
    /// A live walk over one archive's members. Dropping it releases whatever
    /// the backend holds open.
    type Session;

    /// Opens `archive_path` (optionally with a password), positioned before
    /// the first member.
    fn open(&self, archive_path: &Path, password: Option<&str>) -> Result<Self::Session, RarfsError>;

    /// Advances to the next member, returning its header without extracting
    /// its data. `None` at end of archive.
    fn next_member(&self, session: Self::Session) -> Result<Option<(MemberInfo, Self::Session)>, RarfsError>;

    /// Extracts the member most recently returned by `next_member` into
    /// memory, returning its bytes and a session positioned at the next
    /// header.
    fn read_member(&self, session: Self::Session) -> Result<(Vec<u8>, Self::Session), RarfsError>;

    /// Skips the member most recently returned by `next_member` without
    /// extracting it.
    fn skip_member(&self, session: Self::Session) -> Result<Self::Session, RarfsError>;
}

/// Upper bound on how long opening an archive (password probing, header
/// validation) may take before the caller gives up.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// `unrar`-backed [`Decoder`]. Holds no state of its own; every call is
/// self-contained around the `unrar::Archive` handle threaded through
/// `Session`.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnrarDecoder;

/// One of the two cursor positions `unrar`'s type-state API can be in: about
/// to read a header, or positioned just after one with a pending member.
pub enum Session {
    BeforeHeader(unrar::OpenArchive<unrar::Process, unrar::CursorBeforeHeader>),
    BeforeFile {
        cursor: unrar::OpenArchive<unrar::Process, unrar::CursorBeforeFile>,
        info: MemberInfo,
    },
}

impl Decoder for UnrarDecoder {
    type Session = Session;

    fn open(&self, archive_path: &Path, password: Option<&str>) -> Result<Session, RarfsError> {
        let archive = match password {
            Some(pw) => Archive::with_password(archive_path, pw),
            None => Archive::new(archive_path),
        };
        let opened = archive.open_for_processing().map_err(|e| RarfsError::ArchiveMalformed {
            archive: archive_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Session::BeforeHeader(opened))
    }

    fn next_member(&self, session: Session) -> Result<Option<(MemberInfo, Session)>, RarfsError> {
        let cursor = match session {
            Session::BeforeHeader(cursor) => cursor,
            Session::BeforeFile { cursor, .. } => cursor.skip().map_err(map_unrar_err)?,
        };
        match cursor.read_header().map_err(map_unrar_err)? {
            None => Ok(None),
            Some(next) => {
                let info = member_info(next.entry());
                Ok(Some((info.clone(), Session::BeforeFile { cursor: next, info })))
            }
        }
    }

    fn read_member(&self, session: Session) -> Result<(Vec<u8>, Session), RarfsError> {
        let Session::BeforeFile { cursor, .. } = session else {
            return Err(RarfsError::ResourceLimit(
                "read_member called without a pending header".into(),
            ));
        };
        let (data, next) = cursor.read().map_err(map_unrar_err)?;
        Ok((data, Session::BeforeHeader(next)))
    }

    fn skip_member(&self, session: Session) -> Result<Session, RarfsError> {
        let Session::BeforeFile { cursor, .. } = session else {
            return Ok(session);
        };
        let next = cursor.skip().map_err(map_unrar_err)?;
        Ok(Session::BeforeHeader(next))
    }
}

fn member_info(entry: &unrar::FileHeader) -> MemberInfo {
    MemberInfo {
        name: entry.filename.to_string_lossy().into_owned(),
        unpack_size: entry.unpacked_size as u64,
        is_directory: entry.is_directory(),
        is_encrypted: entry.is_encrypted(),
        mtime: SystemTime::UNIX_EPOCH + Duration::from_secs(entry.file_time as u64),
        method: entry.method as u16,
    }
}

fn map_unrar_err(err: unrar::error::UnrarError) -> RarfsError {
    RarfsError::ArchiveMalformed {
        archive: PathBuf::new(),
        reason: err.to_string(),
    }
}
