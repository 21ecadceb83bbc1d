// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Lock actions: Locate, FreeLock, DupLock, Parent, SameLock, ChangeMode

use pktfs_proto::{ErrorCode, Reply, DOSTRUE};

use super::{lookup, resolve_name, HandlerResult};
use crate::entry::EntryId;
use crate::lock::LockMode;
use crate::path;
use crate::volume::{Env, Volume};

/// Entry for `path`, creating it from fresh attributes if needed, and a
/// lock of `mode` on it. The entry is released again when the lock cannot
/// be taken.
pub(super) fn lock_path(
    vol: &mut Volume,
    env: &Env<'_>,
    path: &str,
    mode: LockMode,
) -> Result<(EntryId, u64), ErrorCode> {
    let stat = lookup(env, path)?;
    let id = vol.ensure_entry(env, path, stat.kind(), stat.ino)?;
    match vol.acquire(env, id, mode) {
        Ok(key) => Ok((id, key)),
        Err(code) => {
            vol.release_entry(env, id);
            Err(code)
        }
    }
}

pub(super) fn locate(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    mode: u8,
) -> HandlerResult {
    let mode = LockMode::from_code(mode)?;
    let path = resolve_name(vol, env, parent, name)?;
    let stat = lookup(env, &path)?;
    if stat.is_symlink() {
        return Err(ErrorCode::IsSoftLink);
    }
    let (_, key) = lock_path(vol, env, &path, mode)?;
    Ok(Reply::value(key as i64))
}

pub(super) fn free_lock(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    if key == 0 {
        return Ok(Reply::success());
    }
    vol.release_lock(env, key)?;
    Ok(Reply::success())
}

/// Shared lock on the object `key` refers to. The null lock stands for the
/// root.
pub(super) fn dup_lock(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    if key == 0 {
        let (_, new_key) = lock_path(vol, env, "/", LockMode::Shared)?;
        return Ok(Reply::value(new_key as i64));
    }
    let id = vol.lock(key)?.entry;
    let new_key = vol.acquire(env, id, LockMode::Shared)?;
    Ok(Reply::value(new_key as i64))
}

pub(super) fn parent(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    let path = vol.lock_path(key)?;
    let Some(parent) = path::parent(&path) else {
        return Ok(Reply::new(0, 0));
    };
    let (_, key) = lock_path(vol, env, parent, LockMode::Shared)?;
    Ok(Reply::value(key as i64))
}

pub(super) fn same_lock(vol: &Volume, first: u64, second: u64) -> HandlerResult {
    let a = vol.lock_path(first)?;
    let b = vol.lock_path(second)?;
    if path::paths_equal(&a, &b, vol.case_sensitive) {
        Ok(Reply::value(DOSTRUE))
    } else {
        Ok(Reply::new(0, 0))
    }
}

pub(super) fn change_mode(vol: &mut Volume, key: u64, mode: u8) -> HandlerResult {
    let mode = LockMode::from_code(mode)?;
    vol.change_mode(key, mode)?;
    Ok(Reply::success())
}
