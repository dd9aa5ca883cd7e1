//! Integration coverage for the prober writing into a real `Caches`
//! instance: directory listings, sanitization of hostile member names, and
//! `.rarconfig` aliasing, all driven through a mock `Decoder` so no actual
//! RAR bytes are needed.

use std::path::Path;
use std::time::{Duration, SystemTime};

use rarfs::archive::decoder::{Decoder, MemberInfo};
use rarfs::archive::prober::probe_archive;
use rarfs::cache::{Caches, Lookup};
use rarfs::config::ArchiveConfigTable;
use rarfs::error::RarfsError;
use rarfs::options::{Options, DEFAULT_MAX_UNPACK_SIZE};

#[derive(Clone)]
struct MockSession {
    idx: usize,
}

struct MockDecoder {
    members: Vec<MemberInfo>,
}

impl MockDecoder {
    fn store(names: &[&str]) -> Self {
        MockDecoder {
            members: names
                .iter()
                .map(|name| MemberInfo {
                    name: name.to_string(),
                    unpack_size: 10,
                    is_directory: false,
                    is_encrypted: false,
                    mtime: SystemTime::UNIX_EPOCH,
                    method: 0x30,
                })
                .collect(),
        }
    }
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
        Ok(Some((self.members[session.idx].clone(), session)))
    }

    fn read_member(&self, session: MockSession) -> Result<(Vec<u8>, MockSession), RarfsError> {
        Ok((vec![0u8; 10], MockSession { idx: session.idx + 1 }))
    }

    fn skip_member(&self, session: MockSession) -> Result<MockSession, RarfsError> {
        Ok(MockSession { idx: session.idx + 1 })
    }
}

fn default_options() -> Options {
    Options::new(
        Path::new("/src").to_path_buf(),
        Path::new("/mnt").to_path_buf(),
        16 * 1024,
        false,
        false,
        false,
        false,
        4,
        true,
        10,
        DEFAULT_MAX_UNPACK_SIZE,
        false,
        vec![],
        Duration::from_secs(10),
    )
    .unwrap()
}

#[test]
fn probe_populates_filename_and_directory_caches() {
    let caches = Caches::new(ArchiveConfigTable::empty());
    let options = default_options();
    let decoder = MockDecoder::store(&["a.txt", "sub/b.txt"]);

    probe_archive(&caches, &options, &decoder, Path::new("/src/show.rar"), "show", 0, None).unwrap();

    assert!(matches!(caches.get("show/a.txt"), Lookup::Entry(_)));
    assert!(matches!(caches.get("show/sub/b.txt"), Lookup::Entry(_)));

    let root_listing = caches.directory("show").unwrap();
    let names: Vec<_> = root_listing.visible().map(|e| e.name.clone()).collect();
    assert!(names.contains(&"a.txt".to_string()));

    let sub_listing = caches.directory("show/sub").unwrap();
    let sub_names: Vec<_> = sub_listing.visible().map(|e| e.name.clone()).collect();
    assert!(sub_names.contains(&"b.txt".to_string()));
}

#[test]
fn probe_rejects_member_names_that_escape_the_virtual_root() {
    let caches = Caches::new(ArchiveConfigTable::empty());
    let options = default_options();
    let decoder = MockDecoder::store(&["../../etc/passwd", "ok.txt"]);

    probe_archive(&caches, &options, &decoder, Path::new("/src/show.rar"), "show", 0, None).unwrap();

    assert!(matches!(caches.get("show/ok.txt"), Lookup::Entry(_)));
    // The traversal attempt never gets a virtual path at all, so nothing
    // under the virtual root should reference it.
    let listing = caches.directory("show").unwrap();
    assert_eq!(listing.visible().count(), 1);
}

#[test]
fn alias_duplicates_an_entry_under_a_second_name_in_the_same_directory() {
    let dir = tempfile::tempdir().unwrap();
    // The config table keys aliases by the archive's path exactly as the
    // prober will pass it, so `.rarconfig`'s section header must match.
    let archive_path = dir.path().join("show.rar");
    std::fs::write(
        dir.path().join(".rarconfig"),
        format!(
            "[{}]\nalias = \"a.txt\", \"a_alias.txt\"\n",
            archive_path.display()
        ),
    )
    .unwrap();

    let config = ArchiveConfigTable::load(dir.path()).unwrap();
    let caches = Caches::new(config);
    let options = default_options();
    let decoder = MockDecoder::store(&["a.txt"]);
    probe_archive(&caches, &options, &decoder, &archive_path, "show", 0, None).unwrap();

    assert!(matches!(caches.get("show/a.txt"), Lookup::Entry(_)));
    assert!(matches!(caches.get("show/a_alias.txt"), Lookup::Entry(_)));
    let listing = caches.directory("show").unwrap();
    let names: Vec<_> = listing.visible().map(|e| e.name.clone()).collect();
    assert!(names.contains(&"a_alias.txt".to_string()));
}
