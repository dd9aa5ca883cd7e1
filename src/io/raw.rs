//! Raw read path: a stored, unencrypted member's data sits at a known byte
//! offset in its archive's volume files, so reads are plain positional
//! `pread`s with no decoder involvement — whether the member is confined to
//! one volume or spans several.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::archive::volume::VolumeResolver;
use crate::cache::FileEntry;
use crate::error::RarfsError;

pub struct RawHandle {
    entry: Arc<FileEntry>,
}

/// One `(volume_index, file_offset, length)` tuple describing a positional
/// read on a single volume file. `volume_index` is in [`VolumeResolver`]
/// numbering (0 is the first volume).
struct ReadStep {
    volume_index: u32,
    file_offset: u64,
    length: u64,
}

/// Translates a logical `[offset, offset+len)` range on `entry`'s member
/// data into the ordered sequence of positional reads that satisfy it,
/// using `offset`/`vsize_real_first` for the first volume and
/// `vsize_real_next` for every volume after it. Pure and decoder-free so it
/// can be tested without touching a filesystem.
fn plan_reads(entry: &FileEntry, offset: u64, len: u64) -> Vec<ReadStep> {
    let mut steps = Vec::new();
    let mut pos = offset;
    let mut remaining = len;

    while remaining > 0 {
        if pos < entry.vsize_real_first {
            let take = remaining.min(entry.vsize_real_first - pos);
            steps.push(ReadStep {
                volume_index: entry.vno_first,
                file_offset: entry.offset + pos,
                length: take,
            });
            pos += take;
            remaining -= take;
            continue;
        }

        if entry.vsize_real_next == 0 {
            // No continuation geometry known; nothing more can be served.
            break;
        }

        let past_first = pos - entry.vsize_real_first;
        let segment_index = past_first / entry.vsize_real_next;
        let segment_offset = past_first % entry.vsize_real_next;
        let take = remaining.min(entry.vsize_real_next - segment_offset);
        steps.push(ReadStep {
            volume_index: entry.vno_base + 1 + segment_index as u32,
            // Continuation volumes repeat the same header layout as the
            // first, so the payload starts at the same offset within them.
            file_offset: entry.offset + segment_offset,
            length: take,
        });
        pos += take;
        remaining -= take;
    }

    steps
}

impl RawHandle {
    pub fn new(entry: Arc<FileEntry>) -> Self {
        RawHandle { entry }
    }

    pub fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>, RarfsError> {
        let total = self.entry.stat.size;
        if offset >= total {
            return Ok(Vec::new());
        }
        let to_read = (size as u64).min(total - offset);
        let plan = plan_reads(&self.entry, offset, to_read);

        let mut resolver: Option<VolumeResolver> = None;
        let mut out = Vec::with_capacity(to_read as usize);

        for step in plan {
            let path = if step.volume_index == self.entry.vno_first {
                self.entry.archive_path.clone()
            } else {
                if resolver.is_none() {
                    resolver = VolumeResolver::detect(&self.entry.archive_path);
                }
                match resolver.as_ref().and_then(|r| r.volume_path(step.volume_index)) {
                    Some(p) => p,
                    None => break,
                }
            };

            let mut file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    // A volume missing past the last one actually present on
                    // disk is a legitimate end-of-file, not an error: the
                    // member's declared size outran what this mount can see.
                    let past_last_known = resolver
                        .as_ref()
                        .map(|r| step.volume_index as usize >= r.existing_volumes().len())
                        .unwrap_or(false);
                    if past_last_known {
                        break;
                    }
                    return Err(RarfsError::VolumeIo { volume: path, source: e });
                }
            };
            if let Err(e) = file.seek(SeekFrom::Start(step.file_offset)) {
                return Err(RarfsError::VolumeIo { volume: path, source: e });
            }

            let mut chunk = vec![0u8; step.length as usize];
            match file.read_exact(&mut chunk) {
                Ok(()) => out.extend_from_slice(&chunk),
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // This volume is shorter than its declared chunk length;
                    // take whatever is actually there and stop, rather than
                    // treating a truncated trailing volume as an I/O error.
                    file.seek(SeekFrom::Start(step.file_offset))
                        .map_err(|e| RarfsError::VolumeIo { volume: path.clone(), source: e })?;
                    let mut partial = Vec::new();
                    file.read_to_end(&mut partial)
                        .map_err(|e| RarfsError::VolumeIo { volume: path, source: e })?;
                    out.extend_from_slice(&partial);
                    break;
                }
                Err(e) => return Err(RarfsError::VolumeIo { volume: path, source: e }),
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::VolumeNamingScheme;
    use crate::cache::FileFlags;
    use crate::stat::Stat;
    use std::time::SystemTime;

    fn entry_at(archive_path: std::path::PathBuf, offset: u64, size: u64) -> Arc<FileEntry> {
        Arc::new(FileEntry {
            archive_path,
            member_name: "member.bin".into(),
            link_target: None,
            stat: Stat::regular_file(size, SystemTime::UNIX_EPOCH, 0, 0),
            method: 0x30,
            flags: FileFlags::RAW,
            offset,
            vsize_first: size,
            vsize_next: 0,
            vsize_real_first: size,
            vsize_real_next: 0,
            vno_base: 0,
            vno_first: 0,
            vlen: 1,
            vpos: 0,
            vtype: VolumeNamingScheme::SingleVolume,
            nested_depth: 0,
            parent_archive_path: None,
        })
    }

    fn multivolume_entry(
        archive_path: std::path::PathBuf,
        offset: u64,
        vsize_real_first: u64,
        vsize_real_next: u64,
        total_size: u64,
    ) -> Arc<FileEntry> {
        Arc::new(FileEntry {
            archive_path,
            member_name: "member.bin".into(),
            link_target: None,
            stat: Stat::regular_file(total_size, SystemTime::UNIX_EPOCH, 0, 0),
            method: 0x30,
            flags: FileFlags::RAW | FileFlags::MULTIPART,
            offset,
            vsize_first: vsize_real_first,
            vsize_next: vsize_real_next,
            vsize_real_first,
            vsize_real_next,
            vno_base: 0,
            vno_first: 0,
            vlen: 1,
            vpos: 0,
            vtype: VolumeNamingScheme::OldStyle,
            nested_depth: 0,
            parent_archive_path: None,
        })
    }

    #[test]
    fn reads_exact_window_at_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rar");
        std::fs::write(&path, b"HEADER_JUNKhello world").unwrap();

        let handle = RawHandle::new(entry_at(path, 11, 11));
        let data = handle.read(0, 11).unwrap();
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn clamps_reads_past_member_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rar");
        std::fs::write(&path, b"XXXhello").unwrap();

        let handle = RawHandle::new(entry_at(path, 3, 5));
        let data = handle.read(2, 100).unwrap();
        assert_eq!(data, b"llo");
    }

    #[test]
    fn read_past_end_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rar");
        std::fs::write(&path, b"XXXhello").unwrap();

        let handle = RawHandle::new(entry_at(path, 3, 5));
        assert!(handle.read(5, 10).unwrap().is_empty());
    }

    #[test]
    fn plan_reads_splits_across_volume_boundary() {
        let entry = multivolume_entry(std::path::PathBuf::from("/a/show.rar"), 3, 4, 6, 10);
        let steps = plan_reads(&entry, 0, 10);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].volume_index, 0);
        assert_eq!(steps[0].file_offset, 3);
        assert_eq!(steps[0].length, 4);
        assert_eq!(steps[1].volume_index, 1);
        assert_eq!(steps[1].file_offset, 3);
        assert_eq!(steps[1].length, 6);
    }

    #[test]
    fn plan_reads_serves_a_window_entirely_past_the_first_volume() {
        let entry = multivolume_entry(std::path::PathBuf::from("/a/show.rar"), 3, 4, 6, 14);
        let steps = plan_reads(&entry, 5, 3);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].volume_index, 1);
        assert_eq!(steps[0].file_offset, 3 + 1);
        assert_eq!(steps[0].length, 3);
    }

    #[test]
    fn reads_across_two_real_volume_files() {
        let dir = tempfile::tempdir().unwrap();
        let vol0 = dir.path().join("show.rar");
        let vol1 = dir.path().join("show.r00");
        std::fs::write(&vol0, b"HDRabcd").unwrap();
        std::fs::write(&vol1, b"HDRefghij").unwrap();

        let entry = multivolume_entry(vol0, 3, 4, 6, 10);
        let handle = RawHandle::new(entry);
        let data = handle.read(0, 10).unwrap();
        assert_eq!(data, b"abcdefghij");
    }

    #[test]
    fn stops_at_true_eof_when_trailing_volume_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let vol0 = dir.path().join("show.rar");
        std::fs::write(&vol0, b"HDRabcd").unwrap();
        // show.r00 intentionally absent.

        let entry = multivolume_entry(vol0, 3, 4, 6, 10);
        let handle = RawHandle::new(entry);
        let data = handle.read(0, 10).unwrap();
        assert_eq!(data, b"abcd");
    }

    #[test]
    fn stops_at_true_eof_when_trailing_volume_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let vol0 = dir.path().join("show.rar");
        let vol1 = dir.path().join("show.r00");
        std::fs::write(&vol0, b"HDRabcd").unwrap();
        std::fs::write(&vol1, b"HDRef").unwrap(); // only 2 payload bytes, 6 declared

        let entry = multivolume_entry(vol0, 3, 4, 6, 10);
        let handle = RawHandle::new(entry);
        let data = handle.read(0, 10).unwrap();
        assert_eq!(data, b"abcdef");
    }
}
