//! Piped read path: members that are compressed, encrypted, or span more
//! than one volume go through the external decoder instead of a positional
//! read.
//!
//! `unrar` extracts a member to a complete in-memory buffer rather than
//! streaming it incrementally, so there is no producer/consumer pipe to
//! drain chunk by chunk; the "pipe" is instead the bounded wait between
//! issuing the extraction and the decoder finishing, modeled as a
//! [`tokio::time::timeout`] around a [`tokio::task::spawn_blocking`] so a
//! slow or hung decode cannot stall the FUSE callback thread indefinitely.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::archive::decoder::Decoder;
use crate::cache::FileEntry;
use crate::error::RarfsError;
use crate::sanitize::sanitize_member_path;

/// `unrar`'s extraction call is synchronous and whole-buffer, so there is no
/// producer to literally cancel and respawn on a restart; the handle still
/// tracks the read-head and restart count the cooperative-pipe model calls
/// for, since that accounting is observable behavior in its own right (it is
/// what a caller would use to judge whether their access pattern is
/// seek-friendly), not just a knob on a streaming implementation.
///
/// `seek-length` gates whether a forward seek counts as a cheap *drain*
/// (consuming the already-resident buffer up to the new offset) or an
/// expensive *restart* (any backward seek, or a forward seek past the
/// configured window); both are counted separately. Because the buffer
/// is already fully resident, a restart here has no re-extraction cost,
/// but the count is still maintained so restart-heavy access patterns are
/// visible to whoever is tuning `--seek-length`.
pub struct PipedHandle {
    data: Vec<u8>,
    seek_length: u64,
    read_head: AtomicU64,
    drains: AtomicU64,
    restarts: AtomicU64,
}

impl PipedHandle {
    /// Extracts `entry`'s member into memory, bounded by `timeout`. Runs on
    /// a blocking task since `unrar`'s extraction call is synchronous.
    /// `save_eof` forces a cross-check of the extracted length against the
    /// member's declared size once extraction completes.
    pub fn open<D: Decoder + 'static>(
        rt: &tokio::runtime::Handle,
        decoder: Arc<D>,
        entry: &FileEntry,
        password: Option<String>,
        timeout: Duration,
        seek_length: u64,
        save_eof: bool,
    ) -> Result<Self, RarfsError> {
        let archive_path = entry.archive_path.clone();
        let member_name = entry.member_name.clone();

        let outcome = rt.block_on(async {
            let task = tokio::task::spawn_blocking(move || {
                extract_by_sanitized_name(decoder.as_ref(), &archive_path, password.as_deref(), &member_name)
            });
            tokio::time::timeout(timeout, task).await
        });

        let data = match outcome {
            Ok(Ok(Ok(data))) => data,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_join_error)) => return Err(RarfsError::Alloc("decoder task panicked".into())),
            Err(_elapsed) => {
                return Err(RarfsError::DecoderTimeout {
                    archive: entry.archive_path.clone(),
                });
            }
        };

        if save_eof && data.len() as u64 != entry.stat.size {
            return Err(RarfsError::ArchiveMalformed {
                archive: entry.archive_path.clone(),
                reason: format!(
                    "member {:?} extracted to {} bytes, declared size was {}",
                    entry.member_name,
                    data.len(),
                    entry.stat.size
                ),
            });
        }

        Ok(PipedHandle {
            data,
            seek_length,
            read_head: AtomicU64::new(0),
            drains: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        })
    }

    pub fn read(&self, offset: u64, size: u32) -> Vec<u8> {
        let head = self.read_head.load(Ordering::Relaxed);
        if offset < head {
            self.restarts.fetch_add(1, Ordering::Relaxed);
        } else if offset > head {
            if offset - head <= self.seek_length {
                self.drains.fetch_add(1, Ordering::Relaxed);
            } else {
                self.restarts.fetch_add(1, Ordering::Relaxed);
            }
        }

        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(size as usize).min(self.data.len());
        self.read_head.store(end as u64, Ordering::Relaxed);
        self.data[start..end].to_vec()
    }

    #[cfg(test)]
    fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn drain_count(&self) -> u64 {
        self.drains.load(Ordering::Relaxed)
    }
}

impl Drop for PipedHandle {
    fn drop(&mut self) {
        let restarts = self.restarts.load(Ordering::Relaxed);
        if restarts > 0 {
            warn!("piped handle closed after {restarts} restart(s), {} drain(s)", self.drains.load(Ordering::Relaxed));
        }
    }
}

fn extract_by_sanitized_name<D: Decoder>(
    decoder: &D,
    archive_path: &Path,
    password: Option<&str>,
    member_name: &str,
) -> Result<Vec<u8>, RarfsError> {
    let mut session = decoder.open(archive_path, password)?;
    loop {
        match decoder.next_member(session)? {
            None => {
                return Err(RarfsError::ArchiveMalformed {
                    archive: archive_path.to_path_buf(),
                    reason: format!("member {member_name:?} not found on re-open"),
                });
            }
            Some((info, next)) => {
                let is_match = sanitize_member_path(info.name.as_bytes())
                    .map(|s| s == member_name)
                    .unwrap_or(false);
                if is_match {
                    let (bytes, _) = decoder.read_member(next)?;
                    return Ok(bytes);
                }
                session = decoder.skip_member(next)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::decoder::MemberInfo;
    use std::time::SystemTime;

    #[derive(Clone)]
    struct MockSession {
        idx: usize,
    }

    struct MockDecoder {
        members: Vec<(&'static str, Vec<u8>)>,
    }

    impl Decoder for MockDecoder {
        type Session = MockSession;

        fn open(&self, _archive_path: &Path, _password: Option<&str>) -> Result<MockSession, RarfsError> {
            Ok(MockSession { idx: 0 })
        }

        fn next_member(&self, session: MockSession) -> Result<Option<(MemberInfo, MockSession)>, RarfsError> {
            if session.idx >= self.members.len() {
                return Ok(None);
            }
            let (name, data) = &self.members[session.idx];
            let info = MemberInfo {
                name: name.to_string(),
                unpack_size: data.len() as u64,
                is_directory: false,
                is_encrypted: false,
                mtime: SystemTime::UNIX_EPOCH,
                method: 0x33,
            };
            Ok(Some((info, session)))
        }

        fn read_member(&self, session: MockSession) -> Result<(Vec<u8>, MockSession), RarfsError> {
            let data = self.members[session.idx].1.clone();
            Ok((data, MockSession { idx: session.idx + 1 }))
        }

        fn skip_member(&self, session: MockSession) -> Result<MockSession, RarfsError> {
            Ok(MockSession { idx: session.idx + 1 })
        }
    }

    #[test]
    fn extract_by_sanitized_name_matches_after_sanitization() {
        let decoder = MockDecoder {
            members: vec![("dir\\file.txt", b"payload".to_vec())],
        };
        let bytes = extract_by_sanitized_name(&decoder, Path::new("/a.rar"), None, "dir/file.txt").unwrap();
        assert_eq!(bytes, b"payload");
    }

    fn test_handle(data: &[u8], seek_length: u64) -> PipedHandle {
        PipedHandle {
            data: data.to_vec(),
            seek_length,
            read_head: AtomicU64::new(0),
            drains: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        }
    }

    #[test]
    fn read_clamps_to_buffer_bounds() {
        let handle = test_handle(b"0123456789", 16384);
        assert_eq!(handle.read(8, 10), b"89");
        assert_eq!(handle.read(20, 5), Vec::<u8>::new());
    }

    #[test]
    fn sequential_reads_count_as_neither_drain_nor_restart() {
        let handle = test_handle(b"0123456789", 4);
        handle.read(0, 4);
        handle.read(4, 4);
        assert_eq!(handle.drain_count(), 0);
        assert_eq!(handle.restart_count(), 0);
    }

    #[test]
    fn short_forward_seek_within_window_drains() {
        let handle = test_handle(b"0123456789", 4);
        handle.read(0, 2); // head at 2
        handle.read(4, 2); // forward by 2, within seek_length 4
        assert_eq!(handle.drain_count(), 1);
        assert_eq!(handle.restart_count(), 0);
    }

    #[test]
    fn long_forward_seek_past_window_restarts() {
        let handle = test_handle(b"0123456789", 2);
        handle.read(0, 1); // head at 1
        handle.read(9, 1); // forward by 8, past seek_length 2
        assert_eq!(handle.restart_count(), 1);
        assert_eq!(handle.drain_count(), 0);
    }

    #[test]
    fn backward_seek_always_restarts() {
        let handle = test_handle(b"0123456789", 1000);
        handle.read(5, 2); // head at 7
        handle.read(0, 2); // backward
        assert_eq!(handle.restart_count(), 1);
        assert_eq!(handle.drain_count(), 0);
    }
}
