//! Directory cache and dirlist: per-directory listings materialized lazily
//! as the prober visits archives, finalized with duplicate resolution that
//! favors passthrough entries over archive-backed ones.

use std::collections::HashMap;
use std::sync::Arc;

use crate::fingerprint::path_hash;
use crate::stat::Stat;

/// Entry kind, mirroring `fuser::FileType`'s subset relevant to read-only
/// archive contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryType {
    Directory,
    Regular,
    Link,
    Other,
}

/// One child of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryType,
    pub hash: u64,
    pub valid: bool,
    /// `true` if this entry was contributed by the source filesystem
    /// directly rather than by an archive. Passthrough siblings take
    /// priority over archive-backed ones on a name collision.
    pub is_passthrough: bool,
    pub stat: Arc<Stat>,
}

/// A directory's materialized listing, built by repeated `add` calls and
/// finalized by `close`.
#[derive(Debug, Clone, Default)]
pub struct DirList {
    entries: Vec<DirEntry>,
    closed: bool,
}

impl DirList {
    pub fn new() -> Self {
        DirList::default()
    }

    /// Appends a child; duplicates are allowed until `close` is called.
    pub fn add(&mut self, name: &str, stat: Arc<Stat>, kind: EntryType, is_passthrough: bool) {
        self.entries.push(DirEntry {
            name: name.to_string(),
            kind,
            hash: path_hash(name),
            valid: true,
            is_passthrough,
            stat,
        });
        self.closed = false;
    }

    /// Finalizes the list: stable-sorts by (name, type), then marks
    /// duplicates invalid. Among entries sharing (name, type), a passthrough
    /// entry is kept and any archive-backed duplicates are invalidated; if
    /// none is a passthrough, the first-enumerated one wins.
    ///
    /// The conceptual design calls for a bubble sort; a stable sort produces
    /// the identical observable ordering in `O(n log n)` instead of
    /// `O(n^2)`, which matters once a directory aggregates entries from many
    /// archives.
    pub fn close(&mut self) {
        self.entries
            .sort_by(|a, b| (&a.name, a.kind).cmp(&(&b.name, b.kind)));

        let mut i = 0;
        while i < self.entries.len() {
            let mut j = i + 1;
            let mut keep = i;
            while j < self.entries.len()
                && self.entries[j].name == self.entries[i].name
                && self.entries[j].kind == self.entries[i].kind
            {
                if self.entries[j].is_passthrough && !self.entries[keep].is_passthrough {
                    keep = j;
                }
                j += 1;
            }
            for k in i..j {
                if k != keep {
                    self.entries[k].valid = false;
                }
            }
            i = j;
        }

        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Iterates only the entries that survive duplicate resolution; an entry
    /// marked invalid is never returned to the client.
    pub fn visible(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| e.valid)
    }

    pub fn len_visible(&self) -> usize {
        self.visible().count()
    }

    /// Deep-copies this list, used when a directory's contents are
    /// duplicated into another listing.
    pub fn duplicate(&self) -> DirList {
        self.clone()
    }

    /// Appends another list's entries to this one, leaving `self` unclosed.
    /// Used when a directory contains contributions from several archives.
    pub fn concat(&mut self, other: &DirList) {
        self.entries.extend(other.entries.iter().cloned());
        self.closed = false;
    }
}

/// Maps a directory virtual path to its materialized listing.
pub struct DirCache {
    by_path: HashMap<String, DirList>,
}

impl DirCache {
    pub fn new() -> Self {
        DirCache {
            by_path: HashMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&DirList> {
        self.by_path.get(path)
    }

    pub fn get_or_create(&mut self, path: &str) -> &mut DirList {
        self.by_path.entry(path.to_string()).or_default()
    }

    pub fn invalidate(&mut self, path: &str) {
        self.by_path.remove(path);
    }
}

impl Default for DirCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn stat() -> Arc<Stat> {
        Arc::new(Stat::regular_file(0, SystemTime::UNIX_EPOCH, 0, 0))
    }

    #[test]
    fn close_marks_duplicates_invalid_preferring_passthrough() {
        let mut list = DirList::new();
        list.add("a.txt", stat(), EntryType::Regular, false);
        list.add("a.txt", stat(), EntryType::Regular, true);
        list.close();

        let visible: Vec<_> = list.visible().collect();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_passthrough);
    }

    #[test]
    fn close_keeps_distinct_names() {
        let mut list = DirList::new();
        list.add("a.txt", stat(), EntryType::Regular, false);
        list.add("b.txt", stat(), EntryType::Regular, false);
        list.close();
        assert_eq!(list.len_visible(), 2);
    }

    #[test]
    fn concat_merges_two_archives_worth_of_entries() {
        let mut a = DirList::new();
        a.add("x.txt", stat(), EntryType::Regular, false);
        let mut b = DirList::new();
        b.add("y.txt", stat(), EntryType::Regular, false);
        a.concat(&b);
        a.close();
        assert_eq!(a.len_visible(), 2);
    }

    #[test]
    fn duplicate_produces_independent_copy() {
        let mut a = DirList::new();
        a.add("x.txt", stat(), EntryType::Regular, false);
        a.close();
        let mut copy = a.duplicate();
        copy.add("z.txt", stat(), EntryType::Regular, false);
        assert_eq!(a.len_visible(), 1);
        assert!(!copy.is_closed());
    }

    #[test]
    fn name_and_type_both_distinguish_entries() {
        let mut list = DirList::new();
        list.add("same", stat(), EntryType::Regular, false);
        list.add("same", stat(), EntryType::Directory, false);
        list.close();
        assert_eq!(list.len_visible(), 2);
    }
}
