// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Examine actions.
//!
//! Directory enumeration keeps a [`DirScan`] on the lock: the backing
//! `readdir` is called with the offset of the last accepted entry and fills
//! a pending queue until the filler reports it full. ExamineNext pops one
//! record at a time, ExamineAll as many as fit the caller's buffer.

use pktfs_proto::codes::{
    ED_COMMENT, ED_DATE, ED_NAME, ED_OWNER, ED_PROTECTION, ED_SIZE, ED_TYPE, ST_FILE, ST_ROOT,
    ST_SOFTLINK, ST_USERDIR,
};
use pktfs_proto::{ErrorCode, ExAllEntry, FileInfoBlock, Reply, ReplyPayload, DOSFALSE};

use super::{HandlerResult, COMMENT_XATTR};
use crate::entry::hash_path;
use crate::fs_debug;
use crate::lock::{DirScan, Lock, ScanItem};
use crate::path;
use crate::types::{mode_to_protection, EntryKind, FileInfo, Stat};
use crate::volume::{Env, Volume};

/// Entries requested from `readdir` per refill
const SCAN_BATCH: usize = 32;

fn object_type(path: &str, stat: &Stat) -> u8 {
    if path::is_root(path) {
        return ST_ROOT;
    }
    match stat.kind() {
        EntryKind::Dir => ST_USERDIR,
        EntryKind::SoftLink => ST_SOFTLINK,
        EntryKind::File | EntryKind::None => ST_FILE,
    }
}

/// Comment in the client codepage, empty when none is stored
fn read_comment(env: &Env<'_>, path: &str) -> Vec<u8> {
    match env.ops.getxattr(path, COMMENT_XATTR) {
        Ok(bytes) => env.charset.encode(&String::from_utf8_lossy(&bytes)),
        Err(_) => Vec::new(),
    }
}

fn disk_key_of(vol: &Volume, path: &str, stat: &Stat) -> u64 {
    if let Some(entry) = vol.entries.find(path).and_then(|id| vol.entries.get(id)) {
        return entry.disk_key;
    }
    if stat.ino != 0 {
        stat.ino
    } else {
        hash_path(path, vol.case_sensitive) as u64
    }
}

fn info_block(vol: &Volume, env: &Env<'_>, path: &str, stat: &Stat) -> FileInfoBlock {
    let name = if path::is_root(path) {
        vol.name.as_str()
    } else {
        path::file_name(path)
    };
    FileInfoBlock {
        disk_key: disk_key_of(vol, path, stat),
        object_type: object_type(path, stat),
        name: env.charset.encode(name),
        protection: mode_to_protection(stat.mode),
        size: stat.size,
        blocks: stat.blocks,
        date: stat.mtime.to_datestamp(),
        comment: read_comment(env, path),
        uid: stat.uid,
        gid: stat.gid,
    }
}

fn close_scan(env: &Env<'_>, path: &str, lock: &mut Lock) {
    if let Some(scan) = lock.scan.take() {
        if let Err(err) = env.ops.releasedir(path, &scan.fi) {
            tracing::warn!(target: "pktfs::dispatch", path, error = %err, "releasedir failed");
        }
        fs_debug!(env.mask(), directory, path, "scan closed");
    }
}

/// Make sure the lock has an open directory scan
fn open_scan<'l>(env: &Env<'_>, path: &str, lock: &'l mut Lock) -> Result<&'l mut DirScan, ErrorCode> {
    if lock.scan.is_none() {
        let mut fi = FileInfo::default();
        env.ops.opendir(path, &mut fi)?;
        fs_debug!(env.mask(), directory, path, key = lock.key, "scan opened");
        lock.scan = Some(DirScan {
            fi,
            ..Default::default()
        });
    }
    lock.scan.as_mut().ok_or(ErrorCode::ObjectWrongType)
}

/// Top the pending queue up to `limit` items. A backend that reports offset
/// 0 cannot resume a listing, so its whole directory is buffered in one pass.
fn refill(env: &Env<'_>, path: &str, scan: &mut DirScan, limit: usize) -> Result<(), ErrorCode> {
    if scan.exhausted || scan.pending.len() >= limit {
        return Ok(());
    }
    let want = limit - scan.pending.len();
    let mut added = 0;
    let mut full = false;
    let mut offsetless = false;
    let mut next_offset = scan.offset;
    let pending = &mut scan.pending;
    env.ops.readdir(
        path,
        &scan.fi,
        scan.offset,
        &mut |name: &str, stat: Option<&Stat>, offset: u64| {
            if offset == 0 {
                offsetless = true;
            }
            if added >= want && !offsetless {
                full = true;
                return true;
            }
            next_offset = offset;
            if name != "." && name != ".." {
                pending.push_back(ScanItem {
                    name: name.to_string(),
                    stat: stat.cloned(),
                });
                added += 1;
            }
            false
        },
    )?;
    scan.offset = next_offset;
    if !full || offsetless {
        scan.exhausted = true;
    }
    fs_debug!(env.mask(), directory, path, added, offset = scan.offset, exhausted = scan.exhausted, "readdir");
    Ok(())
}

/// Directory path of a lock, rejecting files
fn dir_lock_path(vol: &Volume, key: u64) -> Result<String, ErrorCode> {
    let lock = vol.lock(key)?;
    let kind = vol
        .entries
        .get(lock.entry)
        .map(|e| e.kind)
        .ok_or(ErrorCode::InvalidLock)?;
    if kind != EntryKind::Dir {
        return Err(ErrorCode::ObjectWrongType);
    }
    vol.lock_path(key)
}

pub(super) fn examine(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    let path = vol.lock_path(key)?;
    let stat = match key {
        0 => env.ops.getattr(&path)?,
        _ => match &vol.lock(key)?.file {
            Some(fi) => env.ops.fgetattr(&path, fi)?,
            None => env.ops.getattr(&path)?,
        },
    };
    let block = info_block(vol, env, &path, &stat);
    if key != 0 {
        close_scan(env, &path, vol.lock_mut(key)?);
    }
    Ok(Reply::success().with_payload(ReplyPayload::FileInfo(block)))
}

pub(super) fn examine_next(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    let path = dir_lock_path(vol, key)?;
    let lock = vol.lock_mut(key)?;
    let scan = open_scan(env, &path, lock)?;
    let (name, child, stat) = loop {
        refill(env, &path, scan, SCAN_BATCH)?;
        let Some(item) = scan.pending.pop_front() else {
            close_scan(env, &path, lock);
            return Err(ErrorCode::NoMoreEntries);
        };
        let child = path::join(&path, &item.name);
        let stat = match item.stat {
            Some(stat) => stat,
            // Vanished since readdir
            None => match env.ops.getattr(&child) {
                Ok(stat) => stat,
                Err(_) => continue,
            },
        };
        break (item.name, child, stat);
    };
    let mut block = info_block(vol, env, &child, &stat);
    block.name = env.charset.encode(&name);
    Ok(Reply::success().with_payload(ReplyPayload::FileInfo(block)))
}

/// Bytes one ExamineAll record occupies in the caller's buffer
pub fn record_size(name_len: usize, comment_len: usize, data_type: u8) -> usize {
    let header = match data_type {
        ED_NAME => 8,
        ED_TYPE => 12,
        ED_SIZE => 16,
        ED_PROTECTION => 20,
        ED_DATE => 32,
        ED_COMMENT => 36,
        _ => 40,
    };
    let mut size = header + name_len + 1;
    if data_type >= ED_COMMENT {
        size += comment_len + 1;
    }
    (size + 1) & !1
}

fn exall_entry(env: &Env<'_>, name: &str, child: &str, stat: &Stat, data_type: u8) -> ExAllEntry {
    let mut entry = ExAllEntry {
        name: env.charset.encode(name),
        ..Default::default()
    };
    if data_type >= ED_TYPE {
        entry.object_type = object_type(child, stat);
    }
    if data_type >= ED_SIZE {
        entry.size = stat.size;
    }
    if data_type >= ED_PROTECTION {
        entry.protection = mode_to_protection(stat.mode);
    }
    if data_type >= ED_DATE {
        entry.date = stat.mtime.to_datestamp();
    }
    if data_type >= ED_COMMENT {
        entry.comment = read_comment(env, child);
    }
    if data_type >= ED_OWNER {
        entry.uid = stat.uid;
        entry.gid = stat.gid;
    }
    entry
}

/// Fill one buffer with records. `DOSTRUE` while more remain; at the end
/// `DOSFALSE` with `NoMoreEntries` and the final batch.
pub(super) fn examine_all(
    vol: &mut Volume,
    env: &Env<'_>,
    key: u64,
    buffer_size: u32,
    data_type: u8,
) -> HandlerResult {
    if !(ED_NAME..=ED_OWNER).contains(&data_type) {
        return Err(ErrorCode::BadNumber);
    }
    let path = dir_lock_path(vol, key)?;
    let lock = vol.lock_mut(key)?;
    let scan = open_scan(env, &path, lock)?;
    let budget = buffer_size as usize;
    let mut used = 0;
    let mut records = Vec::new();
    loop {
        refill(env, &path, scan, SCAN_BATCH)?;
        let Some(item) = scan.pending.front() else {
            break;
        };
        let (name, cached) = (item.name.clone(), item.stat.clone());
        let child = path::join(&path, &name);
        let stat = match cached {
            Some(stat) => stat,
            None => match env.ops.getattr(&child) {
                Ok(stat) => stat,
                Err(_) => {
                    scan.pending.pop_front();
                    continue;
                }
            },
        };
        let record = exall_entry(env, &name, &child, &stat, data_type);
        let size = record_size(record.name.len(), record.comment.len(), data_type);
        if used + size > budget {
            if records.is_empty() {
                return Err(ErrorCode::NoFreeStore);
            }
            break;
        }
        used += size;
        records.push(record);
        scan.pending.pop_front();
    }
    let done = scan.pending.is_empty() && scan.exhausted;
    fs_debug!(env.mask(), directory, path = %path, records = records.len(), used, done, "examine all");
    let payload = ReplyPayload::Entries(records);
    if done {
        close_scan(env, &path, lock);
        Ok(Reply::new(DOSFALSE, ErrorCode::NoMoreEntries.code()).with_payload(payload))
    } else {
        Ok(Reply::success().with_payload(payload))
    }
}

pub(super) fn examine_all_end(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    let path = vol.lock_path(key)?;
    close_scan(env, &path, vol.lock_mut(key)?);
    Ok(Reply::success())
}
