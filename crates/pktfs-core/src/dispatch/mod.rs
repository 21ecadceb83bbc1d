// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Packet dispatcher.
//!
//! [`FileSystem::dispatch`] validates the keys a packet carries, checks that a
//! volume is mounted and hands the packet to its handler. Handlers return
//! `Result<Reply, ErrorCode>`; every precondition is checked before the first
//! side effect, and multi-step handlers undo the first step when a later one
//! fails.

mod examine;
mod file;
mod lock;
mod mutate;
mod notify;
mod volume;

pub use examine::record_size;
pub use file::MAX_TRANSFER;

use std::time::Instant;

use pktfs_proto::{Action, ErrorCode, Packet, Reply};

use crate::context::Owner;
use crate::filesystem::FileSystem;
use crate::fs_debug;
use crate::path;
use crate::types::Stat;
use crate::volume::{Env, Volume};

/// Extended attribute holding the object comment
pub const COMMENT_XATTR: &str = "user.comment";
pub const MAX_COMMENT_LEN: usize = 79;

type HandlerResult = Result<Reply, ErrorCode>;

/// Actions whose success counts as a modification for auto-flush
fn is_mutating(action: Action) -> bool {
    matches!(
        action,
        Action::Write
            | Action::SetFileSize
            | Action::CreateDir
            | Action::DeleteObject
            | Action::RenameObject
            | Action::MakeLink
            | Action::SetProtect
            | Action::SetComment
            | Action::SetDate
            | Action::SetOwner
            | Action::FindOutput
            | Action::FindUpdate
            | Action::RenameDisk
    )
}

/// Every lock, file or notify key a packet refers to
fn packet_keys(packet: &Packet) -> Vec<u64> {
    let keys = match packet {
        Packet::LocateObject(a) => vec![a.parent],
        Packet::DeleteObject(a)
        | Packet::CreateDir(a)
        | Packet::FindUpdate(a)
        | Packet::FindInput(a)
        | Packet::FindOutput(a) => vec![a.parent],
        Packet::RenameObject(a) => vec![a.src_parent, a.dst_parent],
        Packet::SetProtect(a) => vec![a.parent],
        Packet::SetComment(a) => vec![a.parent],
        Packet::SetDate(a) => vec![a.parent],
        Packet::SetOwner(a) => vec![a.parent],
        Packet::SameLock(a) => vec![a.first, a.second],
        Packet::MakeLink(a) => vec![a.parent, a.target_lock],
        Packet::ReadLink(a) => vec![a.parent],
        _ => packet.target_key().into_iter().collect(),
    };
    keys.into_iter().filter(|key| *key != 0).collect()
}

impl FileSystem {
    /// Process one packet and produce its reply
    pub fn dispatch(&mut self, packet: Packet) -> Reply {
        let action = packet.action();
        fs_debug!(self.ctx.debug(), protocol, action = action.name(), code = action.code(), "packet");
        let reply = match self.handle_packet(packet) {
            Ok(reply) => reply,
            Err(code) => Reply::failure(code),
        };
        if reply.res2 == 0 && is_mutating(action) {
            self.modify.touch(Instant::now());
        }
        fs_debug!(
            self.ctx.debug(),
            protocol,
            action = action.name(),
            res1 = reply.res1(),
            res2 = reply.res2,
            "reply"
        );
        reply
    }

    fn handle_packet(&mut self, packet: Packet) -> HandlerResult {
        // Actions that work without a mounted volume
        match &packet {
            Packet::Die(_) => {
                self.running = false;
                return Ok(Reply::success());
            }
            Packet::IsFilesystem(_) => return Ok(Reply::success()),
            Packet::Inhibit(args) => return self.inhibit(args.inhibit),
            Packet::DiskChange(_) => {
                self.disk_change();
                return Ok(Reply::success());
            }
            Packet::Flush(_) => {
                self.flush_all();
                return Ok(Reply::success());
            }
            Packet::Format(args) => return self.format(&args.name, args.dos_type),
            Packet::DiskInfo(_) => return Ok(self.disk_info()),
            Packet::CurrentVolume(_) => return self.current_volume(),
            _ => {}
        }

        if let Some(reply) = self.release_stale(&packet) {
            return Ok(reply);
        }
        self.check_keys(&packet)?;

        let unit = self.config.startup.unit;
        let list = self.list.clone();
        let (vol, env) = self.ready()?;
        match packet {
            Packet::LocateObject(a) => lock::locate(vol, &env, a.parent, &a.name, a.mode),
            Packet::FreeLock(a) => lock::free_lock(vol, &env, a.lock),
            Packet::CopyDir(a) => lock::dup_lock(vol, &env, a.lock),
            Packet::CopyDirFh(a) => lock::dup_lock(vol, &env, a.file),
            Packet::Parent(a) => lock::parent(vol, &env, a.lock),
            Packet::ParentFh(a) => lock::parent(vol, &env, a.file),
            Packet::SameLock(a) => lock::same_lock(vol, a.first, a.second),
            Packet::ChangeMode(a) => lock::change_mode(vol, a.handle, a.mode),

            Packet::FindInput(a) => file::open(vol, &env, a.parent, &a.name, file::OpenMode::Input),
            Packet::FindOutput(a) => file::open(vol, &env, a.parent, &a.name, file::OpenMode::Output),
            Packet::FindUpdate(a) => file::open(vol, &env, a.parent, &a.name, file::OpenMode::Update),
            Packet::End(a) => file::end(vol, &env, a.file),
            Packet::Read(a) => Ok(file::read(vol, &env, a.file, a.length)),
            Packet::Write(a) => Ok(file::write(vol, &env, a.file, &a.data)),
            Packet::Seek(a) => Ok(file::seek(vol, &env, a.file, a.offset(), a.origin)),
            Packet::SetFileSize(a) => {
                Ok(file::set_file_size(vol, &env, a.file, a.offset(), a.origin))
            }
            Packet::FhFromLock(a) => file::fh_from_lock(vol, &env, a.lock),

            Packet::ExamineObject(a) => examine::examine(vol, &env, a.lock),
            Packet::ExamineFh(a) => examine::examine(vol, &env, a.file),
            Packet::ExamineNext(a) => examine::examine_next(vol, &env, a.lock),
            Packet::ExamineAll(a) => {
                examine::examine_all(vol, &env, a.lock, a.buffer_size, a.data_type)
            }
            Packet::ExamineAllEnd(a) => examine::examine_all_end(vol, &env, a.lock),

            Packet::CreateDir(a) => mutate::create_dir(vol, &env, a.parent, &a.name),
            Packet::DeleteObject(a) => mutate::delete(vol, &env, a.parent, &a.name),
            Packet::RenameObject(a) => {
                mutate::rename(vol, &env, a.src_parent, &a.src_name, a.dst_parent, &a.dst_name)
            }
            Packet::MakeLink(a) => mutate::make_link(vol, &env, &a),
            Packet::ReadLink(a) => mutate::read_link(vol, &env, a.parent, &a.name, a.buffer_size),
            Packet::SetProtect(a) => mutate::set_protect(vol, &env, a.parent, &a.name, a.protection),
            Packet::SetComment(a) => mutate::set_comment(vol, &env, a.parent, &a.name, &a.comment),
            Packet::SetDate(a) => mutate::set_date(vol, &env, a.parent, &a.name, a.date),
            Packet::SetOwner(a) => mutate::set_owner(vol, &env, a.parent, &a.name, a.uid, a.gid),

            Packet::AddNotify(a) => notify::add_notify(vol, &env, &a),
            Packet::RemoveNotify(a) => notify::remove_notify(vol, &env, a.notify),

            Packet::Info(_) => Ok(volume::info(vol, &env, unit)),
            Packet::WriteProtect(a) => volume::write_protect(vol, a.protect, a.passkey),
            Packet::RenameDisk(a) => volume::relabel(vol, &env, &list, &a.name),

            // Answered before the volume check
            Packet::Die(_)
            | Packet::IsFilesystem(_)
            | Packet::Inhibit(_)
            | Packet::DiskChange(_)
            | Packet::Flush(_)
            | Packet::Format(_)
            | Packet::DiskInfo(_)
            | Packet::CurrentVolume(_) => Err(ErrorCode::ActionNotKnown),
        }
    }

    /// Release packets for handles on an unmounted volume drain it without
    /// touching the backing layer
    fn release_stale(&mut self, packet: &Packet) -> Option<Reply> {
        let (key, is_notify) = match packet {
            Packet::FreeLock(a) if a.lock == 0 => return Some(Reply::success()),
            Packet::FreeLock(a) => (a.lock, false),
            Packet::End(a) => (a.file, false),
            Packet::RemoveNotify(a) => (a.notify, true),
            _ => return None,
        };
        let (stale, env) = self.stale_parts();
        let vol = stale.iter_mut().find(|v| {
            if is_notify {
                v.notifies.contains(key)
            } else {
                v.locks.contains_key(&key)
            }
        })?;
        if is_notify {
            vol.notifies.remove(key, &mut vol.entries);
            env.ctx.registry().unregister(key);
        } else {
            vol.forget_lock(&env, key);
        }
        fs_debug!(env.mask(), general, key, volume = %vol.name, "stale handle released");
        self.prune_stale();
        Some(Reply::success())
    }

    /// Every key must belong to this handle's mounted volume
    fn check_keys(&self, packet: &Packet) -> Result<(), ErrorCode> {
        for key in packet_keys(packet) {
            if let Some(owner) = self.ctx.registry().owner(key) {
                if owner != Owner::Filesystem(self.id) {
                    return Err(ErrorCode::InvalidLock);
                }
            }
            let active = self
                .volume
                .as_ref()
                .map(|v| v.locks.contains_key(&key) || v.notifies.contains(key))
                .unwrap_or(false);
            if active {
                continue;
            }
            let stale = self
                .stale
                .iter()
                .any(|v| v.locks.contains_key(&key) || v.notifies.contains(key));
            return Err(if stale {
                ErrorCode::NoDisk
            } else {
                ErrorCode::InvalidLock
            });
        }
        Ok(())
    }
}

/// Client bytes to a UTF-8 name
pub(crate) fn decode(env: &Env<'_>, bytes: &[u8]) -> Result<String, ErrorCode> {
    let name = env.charset.decode(bytes)?;
    fs_debug!(env.mask(), charset, charset = env.charset.name(), name = %name, "decoded");
    Ok(name)
}

/// Canonical path of `name` relative to the lock `parent`
pub(crate) fn resolve_name(
    vol: &Volume,
    env: &Env<'_>,
    parent: u64,
    name: &[u8],
) -> Result<String, ErrorCode> {
    let base = vol.lock_path(parent)?;
    let name = decode(env, name)?;
    let resolved = path::resolve(&base, &name, env.max_path_len)?;
    fs_debug!(env.mask(), resolve, base = %base, name = %name, path = %resolved, "resolved");
    Ok(resolved)
}

/// Every directory above `path` must exist and must not be a soft link
pub(crate) fn check_ancestors(env: &Env<'_>, path: &str) -> Result<(), ErrorCode> {
    let mut dirs: Vec<&str> = path::self_and_ancestors(path)
        .skip(1)
        .filter(|p| !path::is_root(p))
        .collect();
    dirs.reverse();
    for dir in dirs {
        let stat = env.ops.getattr(dir)?;
        if stat.is_symlink() {
            return Err(ErrorCode::IsSoftLink);
        }
        if !stat.is_dir() {
            return Err(ErrorCode::DirNotFound);
        }
    }
    Ok(())
}

/// Attributes of `path` after checking its ancestors
pub(crate) fn lookup(env: &Env<'_>, path: &str) -> Result<Stat, ErrorCode> {
    check_ancestors(env, path)?;
    Ok(env.ops.getattr(path)?)
}

/// Attributes of `path` if it exists. Other failures propagate.
pub(crate) fn try_lookup(env: &Env<'_>, path: &str) -> Result<Option<Stat>, ErrorCode> {
    match lookup(env, path) {
        Ok(stat) => Ok(Some(stat)),
        Err(ErrorCode::ObjectNotFound) => Ok(None),
        Err(code) => Err(code),
    }
}

/// Path of a lock, failing `ObjectWrongType` on the root
pub(crate) fn non_root(path: String) -> Result<String, ErrorCode> {
    if path::is_root(&path) {
        Err(ErrorCode::ObjectWrongType)
    } else {
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktfs_proto::{LockArgs, RenameArgs, SameLockArgs};

    #[test]
    fn test_packet_keys_skip_null_locks() {
        let rename = Packet::RenameObject(RenameArgs {
            src_parent: 4,
            src_name: b"a".to_vec(),
            dst_parent: 0,
            dst_name: b"b".to_vec(),
        });
        assert_eq!(packet_keys(&rename), vec![4]);
        let same = Packet::SameLock(SameLockArgs { first: 2, second: 3 });
        assert_eq!(packet_keys(&same), vec![2, 3]);
        assert!(packet_keys(&Packet::Parent(LockArgs { lock: 0 })).is_empty());
    }

    #[test]
    fn test_mutating_actions() {
        assert!(is_mutating(Action::Write));
        assert!(is_mutating(Action::FindOutput));
        assert!(!is_mutating(Action::FindInput));
        assert!(!is_mutating(Action::ExamineNext));
    }
}
