// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Mounted volume state.
//!
//! A [`Volume`] owns the entry table, the locks and the notify requests of
//! one mount. Handlers reach the rest of the filesystem handle through an
//! [`Env`], which borrows the callback adapter, charset and transport while
//! the volume itself is borrowed mutably.

use std::collections::HashMap;

use pktfs_proto::{DateStamp, ErrorCode};

use crate::charset::Charset;
use crate::context::{Context, FsId};
use crate::debug::DebugMask;
use crate::entry::{EntryId, EntryTable};
use crate::fs_debug;
use crate::lock::Lock;
use crate::notify::{NotifyRegistry, NotifyTransport};
use crate::ops::CallbackAdapter;
use crate::path;
use crate::types::{EntryKind, StatVfs};

/// Disk slot state of a filesystem handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskState {
    Absent,
    /// The backing layer answered but does not look like a usable volume
    Bad,
    Inhibited,
    Ready,
}

/// Shared collaborators borrowed by handlers alongside a mutable volume
pub(crate) struct Env<'a> {
    pub fs: FsId,
    pub ctx: &'a Context,
    pub ops: &'a CallbackAdapter,
    pub charset: &'a dyn Charset,
    pub transport: &'a dyn NotifyTransport,
    pub max_path_len: usize,
}

impl Env<'_> {
    pub fn mask(&self) -> &DebugMask {
        self.ctx.debug()
    }
}

pub struct Volume {
    pub name: String,
    /// Creation date of the root directory
    pub date: DateStamp,
    pub case_sensitive: bool,
    /// Reported by `statfs`
    pub read_only: bool,
    pub write_protected: bool,
    pub passkey: u32,
    pub geometry: StatVfs,
    pub entries: EntryTable,
    pub locks: HashMap<u64, Lock>,
    pub notifies: NotifyRegistry,
    /// Mount list record of this volume
    pub record: Option<u64>,
    /// Set by writes, cleared by a flush
    pub dirty: bool,
}

impl Volume {
    pub fn new(
        name: &str,
        date: DateStamp,
        case_sensitive: bool,
        geometry: StatVfs,
        max_path_len: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            date,
            case_sensitive,
            read_only: geometry.read_only,
            write_protected: false,
            passkey: 0,
            geometry,
            entries: EntryTable::new(case_sensitive, max_path_len),
            locks: HashMap::new(),
            notifies: NotifyRegistry::new(),
            record: None,
            dirty: false,
        }
    }

    pub fn is_writable(&self) -> bool {
        !self.write_protected && !self.read_only
    }

    pub fn check_writable(&self) -> Result<(), ErrorCode> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(ErrorCode::DiskWriteProtected)
        }
    }

    /// True while any lock or notify request is outstanding
    pub fn in_use(&self) -> bool {
        !self.locks.is_empty() || !self.notifies.is_empty()
    }

    /// Keys of every outstanding lock and notify request
    pub fn handle_keys(&self) -> (Vec<u64>, Vec<u64>) {
        let mut locks: Vec<u64> = self.locks.keys().copied().collect();
        locks.sort_unstable();
        (locks, self.notifies.keys())
    }

    /// Canonical path a lock refers to. Key 0 is the root.
    pub fn lock_path(&self, key: u64) -> Result<String, ErrorCode> {
        if key == 0 {
            return Ok("/".to_string());
        }
        let lock = self.locks.get(&key).ok_or(ErrorCode::InvalidLock)?;
        self.entries
            .get(lock.entry)
            .map(|e| e.path.clone())
            .ok_or(ErrorCode::InvalidLock)
    }

    /// Find or create the entry for `path`. A new entry immediately picks up
    /// pooled notify requests watching its path.
    pub(crate) fn ensure_entry(
        &mut self,
        env: &Env<'_>,
        path: &str,
        kind: EntryKind,
        disk_key: u64,
    ) -> Result<EntryId, ErrorCode> {
        let (id, created) = self.entries.ensure(path, kind, disk_key)?;
        if created {
            let moved = self.notifies.resolve(&mut self.entries, id);
            fs_debug!(env.mask(), resolve, path, resolved = moved, "entry created");
        }
        Ok(id)
    }

    /// Free the entry when nothing references it any more
    pub(crate) fn release_entry(&mut self, env: &Env<'_>, id: EntryId) {
        if let Some(path) = self.entries.get(id).map(|e| e.path.clone()) {
            if self.entries.release(id) {
                fs_debug!(env.mask(), resolve, path = %path, "entry released");
            }
        }
    }

    /// Fire notify requests for a change at `changed`, walking from the path
    /// up to the root. A pooled request whose level now exists in the backing
    /// layer is resolved onto a fresh entry first. Pooled requests watching
    /// exactly `changed` fire even when the object is gone.
    pub(crate) fn notify_path(&mut self, env: &Env<'_>, changed: &str) {
        let case_sensitive = self.case_sensitive;
        for level in path::self_and_ancestors(changed) {
            if !self.notifies.unresolved_at(level, case_sensitive).is_empty() {
                if let Ok(stat) = env.ops.getattr(level) {
                    if let Ok(id) = self.ensure_entry(env, level, stat.kind(), stat.ino) {
                        self.notifies.resolve(&mut self.entries, id);
                        self.release_entry(env, id);
                    }
                }
            }

            let mut keys = self
                .entries
                .find(level)
                .and_then(|id| self.entries.get(id))
                .map(|e| e.notifies.clone())
                .unwrap_or_default();
            if level == changed {
                keys.extend(self.notifies.unresolved_at(level, case_sensitive));
            }
            for key in keys {
                let delivery = self.notifies.fire(key, env.transport, env.charset, &self.name);
                fs_debug!(env.mask(), notify, key, path = level, ?delivery, "notify fired");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_flags() {
        let mut volume = Volume::new("Work", DateStamp::default(), false, StatVfs::default(), 1024);
        assert!(volume.check_writable().is_ok());
        volume.write_protected = true;
        assert_eq!(volume.check_writable(), Err(ErrorCode::DiskWriteProtected));
        volume.write_protected = false;
        volume.read_only = true;
        assert!(!volume.is_writable());
    }

    #[test]
    fn test_root_lock_path() {
        let volume = Volume::new("Work", DateStamp::default(), false, StatVfs::default(), 1024);
        assert_eq!(volume.lock_path(0), Ok("/".to_string()));
        assert_eq!(volume.lock_path(3), Err(ErrorCode::InvalidLock));
        assert!(!volume.in_use());
    }
}
