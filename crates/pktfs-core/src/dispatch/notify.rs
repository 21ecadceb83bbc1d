// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! AddNotify and RemoveNotify

use pktfs_proto::codes::{NRF_NOTIFY_INITIAL, NRF_SEND_MESSAGE, NRF_SEND_SIGNAL};
use pktfs_proto::{AddNotifyArgs, ErrorCode, Reply};

use super::{decode, try_lookup, HandlerResult};
use crate::context::{HandleKind, Owner};
use crate::fs_debug;
use crate::notify::NotifyNode;
use crate::path;
use crate::volume::{Env, Volume};

/// Register a notify request. The name is resolved from the root; an object
/// that does not exist yet leaves the request in the unresolved pool.
pub(super) fn add_notify(vol: &mut Volume, env: &Env<'_>, args: &AddNotifyArgs) -> HandlerResult {
    let signal = args.flags & NRF_SEND_SIGNAL != 0;
    let message = args.flags & NRF_SEND_MESSAGE != 0;
    if signal == message {
        return Err(ErrorCode::BadNumber);
    }
    let name = decode(env, &args.name)?;
    let path = path::resolve("/", &name, env.max_path_len)?;

    let key = env.ctx.next_key();
    let mut node = NotifyNode::new(
        key,
        &path,
        args.flags,
        args.user_data,
        args.client,
        args.signal_bit,
    );
    if let Ok(Some(stat)) = try_lookup(env, &path) {
        node.entry = Some(vol.ensure_entry(env, &path, stat.kind(), stat.ino)?);
    }
    let resolved = node.entry.is_some();
    vol.notifies.insert(node, &mut vol.entries);
    env.ctx
        .registry()
        .register(key, HandleKind::Notify, Owner::Filesystem(env.fs));
    fs_debug!(env.mask(), notify, key, path = %path, resolved, "notify added");

    if args.flags & NRF_NOTIFY_INITIAL != 0 {
        let delivery = vol.notifies.fire(key, env.transport, env.charset, &vol.name);
        fs_debug!(env.mask(), notify, key, ?delivery, "initial notification");
    }
    Ok(Reply::value(key as i64))
}

pub(super) fn remove_notify(vol: &mut Volume, env: &Env<'_>, key: u64) -> HandlerResult {
    let node = vol
        .notifies
        .remove(key, &mut vol.entries)
        .ok_or(ErrorCode::InvalidLock)?;
    env.ctx.registry().unregister(key);
    fs_debug!(env.mask(), notify, key, path = %node.path, "notify removed");
    Ok(Reply::success())
}
