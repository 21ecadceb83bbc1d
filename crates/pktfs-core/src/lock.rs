// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client locks and the rules for handing them out.
//!
//! A lock binds a process-wide key to an entry. Open files are locks that
//! also carry a backing [`FileInfo`] and a position. Directories are only
//! ever locked shared; an exclusive lock excludes every other lock on its
//! entry.

use std::collections::VecDeque;

use pktfs_proto::codes::{EXCLUSIVE_LOCK, SHARED_LOCK};
use pktfs_proto::ErrorCode;
use tracing::warn;

use crate::context::{HandleKind, Owner};
use crate::entry::EntryId;
use crate::fs_debug;
use crate::types::{EntryKind, FileInfo, Stat};
use crate::volume::{Env, Volume};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn from_code(code: u8) -> Result<Self, ErrorCode> {
        match code {
            SHARED_LOCK => Ok(LockMode::Shared),
            EXCLUSIVE_LOCK => Ok(LockMode::Exclusive),
            _ => Err(ErrorCode::BadNumber),
        }
    }
}

/// One directory entry buffered by a scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanItem {
    pub name: String,
    pub stat: Option<Stat>,
}

/// Directory enumeration state attached to a lock
#[derive(Debug, Default)]
pub struct DirScan {
    pub fi: FileInfo,
    /// Offset to pass to the next `readdir`
    pub offset: u64,
    pub pending: VecDeque<ScanItem>,
    pub exhausted: bool,
}

#[derive(Debug)]
pub struct Lock {
    pub key: u64,
    pub entry: EntryId,
    pub mode: LockMode,
    pub file: Option<FileInfo>,
    pub position: u64,
    pub modified: bool,
    pub scan: Option<DirScan>,
}

/// What remains of a lock after [`Volume::release_lock`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Released {
    pub path: String,
    pub modified: bool,
}

impl Volume {
    pub fn lock(&self, key: u64) -> Result<&Lock, ErrorCode> {
        self.locks.get(&key).ok_or(ErrorCode::InvalidLock)
    }

    pub fn lock_mut(&mut self, key: u64) -> Result<&mut Lock, ErrorCode> {
        self.locks.get_mut(&key).ok_or(ErrorCode::InvalidLock)
    }

    /// Check whether a lock of `mode` could be taken on `id` right now
    pub fn can_acquire(&self, id: EntryId, mode: LockMode) -> Result<LockMode, ErrorCode> {
        let entry = self.entries.get(id).ok_or(ErrorCode::ObjectNotFound)?;
        let mode = if entry.kind == EntryKind::Dir {
            LockMode::Shared
        } else {
            mode
        };
        if entry.exclusive || (mode == LockMode::Exclusive && !entry.locks.is_empty()) {
            return Err(ErrorCode::ObjectInUse);
        }
        Ok(mode)
    }

    /// Take a lock on an entry and register its key. Exclusive requests on
    /// directories are downgraded to shared.
    pub(crate) fn acquire(
        &mut self,
        env: &Env<'_>,
        id: EntryId,
        mode: LockMode,
    ) -> Result<u64, ErrorCode> {
        let mode = self.can_acquire(id, mode)?;
        let key = env.ctx.next_key();
        let entry = self.entries.get_mut(id).ok_or(ErrorCode::ObjectNotFound)?;
        entry.locks.push(key);
        if mode == LockMode::Exclusive {
            entry.exclusive = true;
        }
        fs_debug!(env.mask(), general, key, path = %entry.path, ?mode, "lock acquired");
        self.locks.insert(
            key,
            Lock {
                key,
                entry: id,
                mode,
                file: None,
                position: 0,
                modified: false,
                scan: None,
            },
        );
        env.ctx
            .registry()
            .register(key, HandleKind::Lock, Owner::Filesystem(env.fs));
        Ok(key)
    }

    /// Close whatever backing handles the lock holds
    pub(crate) fn close_backing(env: &Env<'_>, path: &str, lock: &mut Lock) {
        if let Some(scan) = lock.scan.take() {
            if let Err(err) = env.ops.releasedir(path, &scan.fi) {
                warn!(target: "pktfs::lock", path, error = %err, "releasedir failed");
            }
        }
        if let Some(fi) = lock.file.take() {
            if let Err(err) = env.ops.flush(path, &fi) {
                warn!(target: "pktfs::lock", path, error = %err, "flush on close failed");
            }
            if let Err(err) = env.ops.release(path, &fi) {
                warn!(target: "pktfs::lock", path, error = %err, "release failed");
            }
        }
    }

    /// Detach the lock, close its backing handles and release its entry
    pub(crate) fn release_lock(&mut self, env: &Env<'_>, key: u64) -> Result<Released, ErrorCode> {
        let mut lock = self.locks.remove(&key).ok_or(ErrorCode::InvalidLock)?;
        env.ctx.registry().unregister(key);
        let path = match self.entries.get_mut(lock.entry) {
            Some(entry) => {
                entry.locks.retain(|k| *k != key);
                if lock.mode == LockMode::Exclusive {
                    entry.exclusive = false;
                }
                entry.path.clone()
            }
            None => String::new(),
        };
        Self::close_backing(env, &path, &mut lock);
        self.release_entry(env, lock.entry);
        fs_debug!(env.mask(), general, key, path = %path, "lock released");
        Ok(Released {
            path,
            modified: lock.modified,
        })
    }

    /// Switch a lock between shared and exclusive. Only the sole lock on an
    /// entry may change mode; directories stay shared.
    pub fn change_mode(&mut self, key: u64, mode: LockMode) -> Result<(), ErrorCode> {
        let lock = self.locks.get(&key).ok_or(ErrorCode::InvalidLock)?;
        let entry = self.entries.get(lock.entry).ok_or(ErrorCode::InvalidLock)?;
        if entry.locks.len() != 1 {
            return Err(ErrorCode::ObjectInUse);
        }
        let mode = if entry.kind == EntryKind::Dir {
            LockMode::Shared
        } else {
            mode
        };
        let id = lock.entry;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.exclusive = mode == LockMode::Exclusive;
        }
        if let Some(lock) = self.locks.get_mut(&key) {
            lock.mode = mode;
        }
        Ok(())
    }

    /// Flush and close every backing handle while keeping the locks
    pub(crate) fn close_all(&mut self, env: &Env<'_>) {
        let Volume { locks, entries, .. } = self;
        for lock in locks.values_mut() {
            let path = entries
                .get(lock.entry)
                .map(|e| e.path.clone())
                .unwrap_or_default();
            Self::close_backing(env, &path, lock);
        }
    }

    /// Forget a lock on a volume that is no longer mounted. No backing
    /// calls are made.
    pub(crate) fn forget_lock(&mut self, env: &Env<'_>, key: u64) -> bool {
        let Some(lock) = self.locks.remove(&key) else {
            return false;
        };
        env.ctx.registry().unregister(key);
        if let Some(entry) = self.entries.get_mut(lock.entry) {
            entry.locks.retain(|k| *k != key);
            if lock.mode == LockMode::Exclusive {
                entry.exclusive = false;
            }
        }
        self.entries.release(lock.entry);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pktfs_proto::DateStamp;

    use crate::charset::Latin1;
    use crate::context::Context;
    use crate::notify::NullTransport;
    use crate::ops::{CallbackAdapter, Operations};
    use crate::types::StatVfs;

    struct NoOps;
    impl Operations for NoOps {}

    struct Fixture {
        ctx: Arc<Context>,
        ops: CallbackAdapter,
    }

    impl Fixture {
        fn new() -> Self {
            let ctx = Context::init();
            let ops = CallbackAdapter::new(Arc::new(NoOps), ctx.debug().clone());
            Self { ctx, ops }
        }

        fn env(&self) -> Env<'_> {
            Env {
                fs: crate::context::FsId(1),
                ctx: &self.ctx,
                ops: &self.ops,
                charset: &Latin1,
                transport: &NullTransport,
                max_path_len: 1024,
            }
        }
    }

    fn volume() -> Volume {
        Volume::new("Work", DateStamp::default(), false, StatVfs::default(), 1024)
    }

    #[test]
    fn test_exclusive_conflicts_with_shared() {
        let fixture = Fixture::new();
        let env = fixture.env();
        let mut vol = volume();
        let id = vol.ensure_entry(&env, "/f", EntryKind::File, 0).expect("entry");
        let shared = vol.acquire(&env, id, LockMode::Shared).expect("shared");
        assert_eq!(vol.acquire(&env, id, LockMode::Exclusive), Err(ErrorCode::ObjectInUse));
        vol.release_lock(&env, shared).expect("release");
        let id = vol.ensure_entry(&env, "/f", EntryKind::File, 0).expect("entry");
        let exclusive = vol.acquire(&env, id, LockMode::Exclusive).expect("exclusive");
        assert_eq!(vol.acquire(&env, id, LockMode::Shared), Err(ErrorCode::ObjectInUse));
        assert_eq!(
            fixture.ctx.registry().owner(exclusive),
            Some(Owner::Filesystem(crate::context::FsId(1)))
        );
    }

    #[test]
    fn test_directory_exclusive_is_downgraded() {
        let fixture = Fixture::new();
        let env = fixture.env();
        let mut vol = volume();
        let id = vol.ensure_entry(&env, "/d", EntryKind::Dir, 0).expect("entry");
        let a = vol.acquire(&env, id, LockMode::Exclusive).expect("first");
        let b = vol.acquire(&env, id, LockMode::Exclusive).expect("second");
        assert_eq!(vol.lock(a).expect("lock").mode, LockMode::Shared);
        assert_eq!(vol.lock(b).expect("lock").mode, LockMode::Shared);
        assert!(!vol.entries.get(id).expect("entry").exclusive);
    }

    #[test]
    fn test_release_frees_unreferenced_entry() {
        let fixture = Fixture::new();
        let env = fixture.env();
        let mut vol = volume();
        let id = vol.ensure_entry(&env, "/f", EntryKind::File, 0).expect("entry");
        let key = vol.acquire(&env, id, LockMode::Shared).expect("lock");
        let released = vol.release_lock(&env, key).expect("release");
        assert_eq!(released.path, "/f");
        assert!(vol.entries.is_empty());
        assert!(fixture.ctx.registry().owner(key).is_none());
        assert_eq!(vol.release_lock(&env, key), Err(ErrorCode::InvalidLock));
    }

    #[test]
    fn test_change_mode_requires_sole_lock() {
        let fixture = Fixture::new();
        let env = fixture.env();
        let mut vol = volume();
        let id = vol.ensure_entry(&env, "/f", EntryKind::File, 0).expect("entry");
        let a = vol.acquire(&env, id, LockMode::Shared).expect("a");
        let b = vol.acquire(&env, id, LockMode::Shared).expect("b");
        assert_eq!(vol.change_mode(a, LockMode::Exclusive), Err(ErrorCode::ObjectInUse));
        vol.release_lock(&env, b).expect("release");
        vol.change_mode(a, LockMode::Exclusive).expect("change");
        assert!(vol.entries.get(id).expect("entry").exclusive);
        vol.change_mode(a, LockMode::Shared).expect("change back");
        assert!(!vol.entries.get(id).expect("entry").exclusive);
    }

    #[test]
    fn test_lock_mode_codes() {
        assert_eq!(LockMode::from_code(0), Ok(LockMode::Shared));
        assert_eq!(LockMode::from_code(1), Ok(LockMode::Exclusive));
        assert_eq!(LockMode::from_code(5), Err(ErrorCode::BadNumber));
    }
}
