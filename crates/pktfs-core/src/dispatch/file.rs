// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! File actions: the three opens, End, Read, Write, Seek, SetFileSize and
//! FhFromLock.
//!
//! Read, Write, Seek and SetFileSize report failure with a primary result of
//! -1 rather than `DOSFALSE`, since 0 is a valid count.

use pktfs_proto::codes::{OFFSET_BEGINNING, OFFSET_CURRENT, OFFSET_END};
use pktfs_proto::{ErrorCode, Reply, ReplyPayload};
use tracing::warn;

use super::{resolve_name, try_lookup, HandlerResult};
use crate::lock::{Lock, LockMode};
use crate::path;
use crate::types::{EntryKind, FileInfo, OpenFlags};
use crate::volume::{Env, Volume};

/// Largest single transfer handed to `read`/`write`
pub const MAX_TRANSFER: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OpenMode {
    /// Existing file, shared
    Input,
    /// New or truncated file, exclusive
    Output,
    /// Existing or new file, shared
    Update,
}

impl OpenMode {
    fn flags(self, writable: bool) -> OpenFlags {
        match self {
            OpenMode::Input => OpenFlags {
                read: true,
                write: writable,
                ..Default::default()
            },
            OpenMode::Output => OpenFlags {
                read: true,
                write: true,
                create: true,
                truncate: true,
                exclusive: false,
            },
            OpenMode::Update => OpenFlags {
                read: true,
                write: true,
                create: true,
                ..Default::default()
            },
        }
    }

    fn lock_mode(self) -> LockMode {
        match self {
            OpenMode::Output => LockMode::Exclusive,
            OpenMode::Input | OpenMode::Update => LockMode::Shared,
        }
    }
}

fn failed(code: ErrorCode) -> Reply {
    Reply::new(-1, code.code())
}

pub(crate) fn open(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    mode: OpenMode,
) -> HandlerResult {
    let path = resolve_name(vol, env, parent, name)?;
    if path::is_root(&path) {
        return Err(ErrorCode::ObjectWrongType);
    }
    if mode != OpenMode::Input {
        vol.check_writable()?;
    }
    let existing = try_lookup(env, &path)?;
    match &existing {
        Some(stat) if stat.is_symlink() => return Err(ErrorCode::IsSoftLink),
        Some(stat) if stat.is_dir() => return Err(ErrorCode::ObjectWrongType),
        Some(_) => {}
        None if mode == OpenMode::Input => return Err(ErrorCode::ObjectNotFound),
        None => {}
    }

    let (kind, ino) = existing
        .as_ref()
        .map(|s| (s.kind(), s.ino))
        .unwrap_or((EntryKind::File, 0));
    let id = vol.ensure_entry(env, &path, kind, ino)?;
    let key = match vol.acquire(env, id, mode.lock_mode()) {
        Ok(key) => key,
        Err(code) => {
            vol.release_entry(env, id);
            return Err(code);
        }
    };

    let created = existing.is_none();
    let truncate = !created && mode == OpenMode::Output;
    let mut fi = FileInfo::new(mode.flags(vol.is_writable()));
    let opened = if created {
        env.ops.create(&path, 0o644, &mut fi)
    } else {
        env.ops.open(&path, &mut fi)
    };
    let opened_ok = opened.is_ok();
    let result = opened.and_then(|()| {
        let stat = if truncate {
            env.ops.ftruncate(&path, 0, &fi).and_then(|()| env.ops.fgetattr(&path, &fi))
        } else {
            env.ops.fgetattr(&path, &fi)
        };
        if stat.is_err() {
            if let Err(err) = env.ops.release(&path, &fi) {
                warn!(target: "pktfs::dispatch", path = %path, error = %err, "release rollback failed");
            }
        }
        stat
    });

    let stat = match result {
        Ok(stat) => stat,
        Err(err) => {
            if let Err(code) = vol.release_lock(env, key) {
                warn!(target: "pktfs::dispatch", key, code = ?code, "rollback of open lock failed");
            }
            if created && opened_ok {
                if let Err(err) = env.ops.unlink(&path) {
                    warn!(target: "pktfs::dispatch", path = %path, error = %err, "unlink rollback failed");
                }
            }
            return Err(err.into());
        }
    };

    if let Some(entry) = vol.entries.get_mut(id) {
        entry.kind = EntryKind::File;
        if stat.ino != 0 {
            entry.disk_key = stat.ino;
        }
    }
    let lock = vol.lock_mut(key)?;
    lock.file = Some(fi);
    lock.modified = created || truncate;
    Ok(Reply::value(key as i64))
}

pub(crate) fn end(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    if vol.lock(key)?.file.is_none() {
        return Err(ErrorCode::ObjectWrongType);
    }
    let released = vol.release_lock(env, key)?;
    if released.modified {
        vol.notify_path(env, &released.path);
    }
    Ok(Reply::success())
}

/// Path and open handle of a file lock
fn file_lock<'v>(vol: &'v mut Volume, key: u64) -> Result<(String, &'v mut Lock), ErrorCode> {
    let path = vol.lock_path(key)?;
    let lock = vol.lock_mut(key)?;
    if lock.file.is_none() {
        return Err(ErrorCode::ObjectWrongType);
    }
    Ok((path, lock))
}

pub(crate) fn read(vol: &mut Volume, env: &Env<'_>, key: u64, length: u32) -> Reply {
    read_inner(vol, env, key, length).unwrap_or_else(failed)
}

fn read_inner(vol: &mut Volume, env: &Env<'_>, key: u64, length: u32) -> HandlerResult {
    let (path, lock) = file_lock(vol, key)?;
    if length == 0 {
        return Ok(Reply::value(0));
    }
    let Some(fi) = &lock.file else {
        return Err(ErrorCode::ObjectWrongType);
    };
    let mut buf = vec![0u8; (length as usize).min(MAX_TRANSFER)];
    let count = env.ops.read(&path, &mut buf, lock.position, fi)?;
    buf.truncate(count);
    lock.position += count as u64;
    Ok(Reply::value(count as i64).with_payload(ReplyPayload::Data(buf)))
}

pub(crate) fn write(vol: &mut Volume, env: &Env<'_>, key: u64, data: &[u8]) -> Reply {
    write_inner(vol, env, key, data).unwrap_or_else(failed)
}

fn write_inner(vol: &mut Volume, env: &Env<'_>, key: u64, data: &[u8]) -> HandlerResult {
    vol.check_writable()?;
    let (path, lock) = file_lock(vol, key)?;
    let Some(fi) = &lock.file else {
        return Err(ErrorCode::ObjectWrongType);
    };
    if !fi.flags.write {
        return Err(ErrorCode::WriteProtected);
    }
    if data.is_empty() {
        return Ok(Reply::value(0));
    }
    let chunk = &data[..data.len().min(MAX_TRANSFER)];
    let count = env.ops.write(&path, chunk, lock.position, fi)?;
    lock.position += count as u64;
    lock.modified = true;
    vol.dirty = true;
    Ok(Reply::value(count as i64))
}

fn seek_base(lock: &Lock, size: u64, origin: u8) -> Result<i64, ErrorCode> {
    match origin {
        OFFSET_BEGINNING => Ok(0),
        OFFSET_CURRENT => Ok(lock.position as i64),
        OFFSET_END => Ok(size as i64),
        _ => Err(ErrorCode::BadNumber),
    }
}

/// Move the position. Replies with the previous position.
pub(crate) fn seek(vol: &mut Volume, env: &Env<'_>, key: u64, offset: i64, origin: u8) -> Reply {
    seek_inner(vol, env, key, offset, origin).unwrap_or_else(failed)
}

fn seek_inner(vol: &mut Volume, env: &Env<'_>, key: u64, offset: i64, origin: u8) -> HandlerResult {
    let (path, lock) = file_lock(vol, key)?;
    let Some(fi) = &lock.file else {
        return Err(ErrorCode::ObjectWrongType);
    };
    let size = env.ops.fgetattr(&path, fi)?.size;
    let target = seek_base(lock, size, origin)?
        .checked_add(offset)
        .ok_or(ErrorCode::SeekError)?;
    if target < 0 || target as u64 > size {
        return Err(ErrorCode::SeekError);
    }
    let old = lock.position;
    lock.position = target as u64;
    Ok(Reply::value(old as i64))
}

/// Truncate or extend the file. Replies with the new size.
pub(crate) fn set_file_size(
    vol: &mut Volume,
    env: &Env<'_>,
    key: u64,
    offset: i64,
    origin: u8,
) -> Reply {
    set_file_size_inner(vol, env, key, offset, origin).unwrap_or_else(failed)
}

fn set_file_size_inner(vol: &mut Volume, env: &Env<'_>, key: u64, offset: i64, origin: u8) -> HandlerResult {
    vol.check_writable()?;
    let (path, lock) = file_lock(vol, key)?;
    let Some(fi) = &lock.file else {
        return Err(ErrorCode::ObjectWrongType);
    };
    if !fi.flags.write {
        return Err(ErrorCode::WriteProtected);
    }
    let size = match origin {
        OFFSET_END => env.ops.fgetattr(&path, fi)?.size,
        _ => 0,
    };
    let target = seek_base(lock, size, origin)?
        .checked_add(offset)
        .ok_or(ErrorCode::SeekError)?;
    if target < 0 {
        return Err(ErrorCode::SeekError);
    }
    let target = target as u64;
    env.ops.ftruncate(&path, target, fi)?;
    lock.position = lock.position.min(target);
    lock.modified = true;
    vol.dirty = true;
    Ok(Reply::value(target as i64))
}

/// Open the backing file for a plain lock
pub(crate) fn fh_from_lock(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    let path = vol.lock_path(key)?;
    let writable = vol.is_writable();
    let lock = vol.lock(key)?;
    if lock.file.is_some() {
        return Err(ErrorCode::ObjectInUse);
    }
    let kind = vol
        .entries
        .get(lock.entry)
        .map(|e| e.kind)
        .unwrap_or(EntryKind::None);
    if path::is_root(&path) || kind == EntryKind::Dir {
        return Err(ErrorCode::ObjectWrongType);
    }
    let flags = OpenFlags {
        read: true,
        write: lock.mode == LockMode::Exclusive || writable,
        ..Default::default()
    };
    let mut fi = FileInfo::new(flags);
    env.ops.open(&path, &mut fi)?;
    let lock = vol.lock_mut(key)?;
    lock.file = Some(fi);
    lock.position = 0;
    Ok(Reply::success())
}
