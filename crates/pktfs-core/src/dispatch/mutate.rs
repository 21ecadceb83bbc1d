// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Actions that change the namespace or object metadata

use pktfs_proto::{DateStamp, ErrorCode, MakeLinkArgs, Reply, ReplyPayload};
use tracing::warn;

use super::lock::lock_path;
use super::{
    check_ancestors, decode, lookup, non_root, resolve_name, try_lookup, HandlerResult,
    COMMENT_XATTR, MAX_COMMENT_LEN,
};
use crate::entry::EntryId;
use crate::error::FsError;
use crate::fs_debug;
use crate::lock::LockMode;
use crate::path;
use crate::types::{protection_to_mode, TimeSpec};
use crate::volume::{Env, Volume};

pub(super) fn create_dir(vol: &mut Volume, env: &Env<'_>, parent: u64, name: &[u8]) -> HandlerResult {
    vol.check_writable()?;
    let path = resolve_name(vol, env, parent, name)?;
    if path::is_root(&path) || try_lookup(env, &path)?.is_some() {
        return Err(ErrorCode::ObjectExists);
    }
    env.ops.mkdir(&path, 0o755)?;
    match lock_path(vol, env, &path, LockMode::Shared) {
        Ok((_, key)) => {
            vol.notify_path(env, &path);
            Ok(Reply::value(key as i64))
        }
        Err(code) => {
            if let Err(err) = env.ops.rmdir(&path) {
                warn!(target: "pktfs::dispatch", path = %path, error = %err, "rmdir rollback failed");
            }
            Err(code)
        }
    }
}

pub(super) fn delete(vol: &mut Volume, env: &Env<'_>, parent: u64, name: &[u8]) -> HandlerResult {
    vol.check_writable()?;
    let path = non_root(resolve_name(vol, env, parent, name)?)?;
    let stat = lookup(env, &path)?;
    let id = vol.entries.find(&path);
    if let Some(entry) = id.and_then(|id| vol.entries.get(id)) {
        if !entry.locks.is_empty() {
            return Err(ErrorCode::ObjectInUse);
        }
    }
    if stat.is_dir() {
        env.ops.rmdir(&path)?;
    } else {
        env.ops.unlink(&path)?;
    }
    if let Some(id) = id {
        let pooled = vol.notifies.unresolve(&mut vol.entries, id);
        vol.release_entry(env, id);
        fs_debug!(env.mask(), resolve, path = %path, pooled, "entry removed");
    }
    vol.notify_path(env, &path);
    Ok(Reply::success())
}

pub(super) fn rename(
    vol: &mut Volume,
    env: &Env<'_>,
    src_parent: u64,
    src_name: &[u8],
    dst_parent: u64,
    dst_name: &[u8],
) -> HandlerResult {
    vol.check_writable()?;
    let src = non_root(resolve_name(vol, env, src_parent, src_name)?)?;
    let dst = non_root(resolve_name(vol, env, dst_parent, dst_name)?)?;
    let case_sensitive = vol.case_sensitive;
    if path::is_descendant(&dst, &src, case_sensitive) {
        return Err(ErrorCode::ObjectInUse);
    }
    lookup(env, &src)?;
    if src == dst {
        return Ok(Reply::success());
    }
    check_ancestors(env, &dst)?;
    let case_change = !case_sensitive && path::paths_equal(&src, &dst, false);
    if !case_change && try_lookup(env, &dst)?.is_some() {
        return Err(ErrorCode::ObjectExists);
    }

    env.ops.rename(&src, &dst)?;

    let mut moved: Vec<EntryId> = vol.entries.find(&src).into_iter().collect();
    moved.extend(vol.entries.descendants(&src));
    for id in moved {
        let Some(old) = vol.entries.get(id).map(|e| e.path.clone()) else {
            continue;
        };
        let new = path::rebase(&old, &src, &dst, case_sensitive);
        vol.notifies.unresolve(&mut vol.entries, id);
        vol.entries.rehash(id, &new);
        vol.notifies.resolve(&mut vol.entries, id);
        fs_debug!(env.mask(), resolve, from = %old, to = %new, "entry moved");
        vol.release_entry(env, id);
    }

    vol.notify_path(env, &src);
    vol.notify_path(env, &dst);
    Ok(Reply::success())
}

/// Soft link targets naming a volume are stored root-relative
fn soft_link_target(target: &str) -> String {
    match target.split_once(':') {
        Some((_, rest)) => format!("/{}", rest.trim_start_matches('/')),
        None => target.to_string(),
    }
}

pub(super) fn make_link(vol: &mut Volume, env: &Env<'_>, args: &MakeLinkArgs) -> HandlerResult {
    vol.check_writable()?;
    let path = non_root(resolve_name(vol, env, args.parent, &args.name)?)?;
    if try_lookup(env, &path)?.is_some() {
        return Err(ErrorCode::ObjectExists);
    }
    if args.soft {
        let target = soft_link_target(&decode(env, &args.target_path)?);
        env.ops.symlink(&target, &path)?;
    } else {
        let target = non_root(vol.lock_path(args.target_lock)?)?;
        env.ops.link(&target, &path)?;
    }
    vol.notify_path(env, &path);
    Ok(Reply::success())
}

/// Soft link target as the client sees it: absolute targets are shown
/// relative to the volume
pub(super) fn read_link(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    buffer_size: u32,
) -> HandlerResult {
    let path = resolve_name(vol, env, parent, name)?;
    if !lookup(env, &path)?.is_symlink() {
        return Err(ErrorCode::ObjectWrongType);
    }
    let target = env.ops.readlink(&path)?;
    let shown = match target.strip_prefix('/') {
        Some(rest) => format!("{}:{}", vol.name, rest),
        None => target,
    };
    let bytes = env.charset.encode(&shown);
    if bytes.len() >= buffer_size as usize {
        return Ok(Reply::new(-2, ErrorCode::LineTooLong.code()));
    }
    Ok(Reply::value(bytes.len() as i64).with_payload(ReplyPayload::Data(bytes)))
}

pub(super) fn set_protect(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    protection: u32,
) -> HandlerResult {
    vol.check_writable()?;
    let path = resolve_name(vol, env, parent, name)?;
    let stat = lookup(env, &path)?;
    env.ops.chmod(&path, protection_to_mode(protection, stat.mode) & 0o7777)?;
    vol.notify_path(env, &path);
    Ok(Reply::success())
}

pub(super) fn set_comment(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    comment: &[u8],
) -> HandlerResult {
    vol.check_writable()?;
    if comment.len() > MAX_COMMENT_LEN {
        return Err(ErrorCode::CommentTooBig);
    }
    let path = resolve_name(vol, env, parent, name)?;
    lookup(env, &path)?;
    let text = decode(env, comment)?;
    if text.is_empty() {
        match env.ops.removexattr(&path, COMMENT_XATTR) {
            Ok(()) | Err(FsError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
    } else {
        env.ops.setxattr(&path, COMMENT_XATTR, text.as_bytes())?;
    }
    vol.notify_path(env, &path);
    Ok(Reply::success())
}

pub(super) fn set_date(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    date: DateStamp,
) -> HandlerResult {
    vol.check_writable()?;
    let path = resolve_name(vol, env, parent, name)?;
    lookup(env, &path)?;
    env.ops.utimens(&path, None, Some(TimeSpec::from_datestamp(date)))?;
    vol.notify_path(env, &path);
    Ok(Reply::success())
}

pub(super) fn set_owner(
    vol: &mut Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
    uid: u32,
    gid: u32,
) -> HandlerResult {
    vol.check_writable()?;
    let path = resolve_name(vol, env, parent, name)?;
    lookup(env, &path)?;
    env.ops.chown(&path, uid, gid)?;
    vol.notify_path(env, &path);
    Ok(Reply::success())
}
