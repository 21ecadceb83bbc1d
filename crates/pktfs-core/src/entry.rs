// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-volume entry table.
//!
//! Entries live in an arena indexed by [`EntryId`] and are chained into
//! hash buckets by path. An entry exists only while a lock or a notify
//! request references it: callers detach references first and then call
//! [`EntryTable::release`], which frees the entry once both lists are empty.

use pktfs_proto::ErrorCode;

use crate::path;
use crate::types::EntryKind;

pub const BUCKET_COUNT: usize = 128;
const HASH_MASK: u32 = 0x7ff;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

/// Identity record for one object path
#[derive(Clone, Debug)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
    pub disk_key: u64,
    pub locks: Vec<u64>,
    pub notifies: Vec<u64>,
    pub exclusive: bool,
    bucket: usize,
}

impl Entry {
    pub fn is_referenced(&self) -> bool {
        !self.locks.is_empty() || !self.notifies.is_empty()
    }
}


/// Incremental path hash over the folded code points, seeded by their count
pub fn hash_path(path: &str, case_sensitive: bool) -> u32 {
    let seed = path::folded(path, case_sensitive).count() as u32;
    path::folded(path, case_sensitive).fold(seed & HASH_MASK, |h, c| {
        (h.wrapping_mul(13).wrapping_add(c as u32)) & HASH_MASK
    })
}

pub struct EntryTable {
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    buckets: Vec<Vec<EntryId>>,
    case_sensitive: bool,
    max_path_len: usize,
    len: usize,
}

impl EntryTable {
    pub fn new(case_sensitive: bool, max_path_len: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            buckets: vec![Vec::new(); BUCKET_COUNT],
            case_sensitive,
            max_path_len,
            len: 0,
        }
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, path: &str) -> usize {
        hash_path(path, self.case_sensitive) as usize % BUCKET_COUNT
    }

    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn find(&self, path: &str) -> Option<EntryId> {
        self.buckets[self.bucket_of(path)]
            .iter()
            .copied()
            .find(|id| {
                self.get(*id)
                    .map(|e| path::paths_equal(&e.path, path, self.case_sensitive))
                    .unwrap_or(false)
            })
    }

    /// Find or create the entry for `path`. Returns the id and whether it was
    /// created. A zero `disk_key` is replaced by the path hash.
    pub fn ensure(
        &mut self,
        path: &str,
        kind: EntryKind,
        disk_key: u64,
    ) -> Result<(EntryId, bool), ErrorCode> {
        if let Some(id) = self.find(path) {
            if let Some(entry) = self.get_mut(id) {
                if kind != EntryKind::None {
                    entry.kind = kind;
                }
                if disk_key != 0 {
                    entry.disk_key = disk_key;
                }
            }
            return Ok((id, false));
        }
        if path.len() > self.max_path_len {
            return Err(ErrorCode::LineTooLong);
        }

        let bucket = self.bucket_of(path);
        let entry = Entry {
            path: path.to_string(),
            kind,
            disk_key: if disk_key != 0 {
                disk_key
            } else {
                hash_path(path, self.case_sensitive) as u64
            },
            locks: Vec::new(),
            notifies: Vec::new(),
            exclusive: false,
            bucket,
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                EntryId(slot)
            }
            None => {
                self.slots.push(Some(entry));
                EntryId(self.slots.len() - 1)
            }
        };
        self.buckets[bucket].push(id);
        self.len += 1;
        Ok((id, true))
    }

    /// Free the entry if nothing references it. Returns true when freed.
    pub fn release(&mut self, id: EntryId) -> bool {
        let bucket = match self.get(id) {
            Some(entry) if !entry.is_referenced() => entry.bucket,
            _ => return false,
        };
        self.buckets[bucket].retain(|other| *other != id);
        self.slots[id.0] = None;
        self.free.push(id.0);
        self.len -= 1;
        true
    }

    /// Move an entry to a new path, keeping its identity
    pub fn rehash(&mut self, id: EntryId, new_path: &str) {
        let new_bucket = self.bucket_of(new_path);
        let old_bucket = match self.get_mut(id) {
            Some(entry) => {
                let old = entry.bucket;
                entry.path = new_path.to_string();
                entry.bucket = new_bucket;
                old
            }
            None => return,
        };
        if old_bucket != new_bucket {
            self.buckets[old_bucket].retain(|other| *other != id);
            self.buckets[new_bucket].push(id);
        }
    }

    /// Entries strictly below `path`
    pub fn descendants(&self, path: &str) -> Vec<EntryId> {
        self.iter()
            .filter(|(_, e)| path::is_descendant(&e.path, path, self.case_sensitive))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (EntryId(i), e)))
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.iter().map(|(id, _)| id).collect()
    }
}
