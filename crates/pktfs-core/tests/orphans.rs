// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use std::sync::Arc;

use common::Harness;
use pktfs_core::context::Owner;
use pktfs_core::types::S_IFREG;
use pktfs_core::{FileSystem, FsConfig, MemoryFs, NullTransport, Operations, Route};
use pktfs_proto::codes::SHARED_LOCK;
use pktfs_proto::{ErrorCode, LockArgs, Packet, RemoveNotifyArgs};

#[test]
fn test_dropped_handle_hands_locks_to_collector() {
    let mut h = Harness::new();
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let lock = h.lock("f");
    let notify = h.add_notify("f", 3).res1() as u64;
    assert_eq!(h.ctx.route(&Packet::free_lock(lock)), Route::Filesystem(h.fs.id()));

    let Harness { ctx, fs, .. } = h;
    drop(fs);

    assert_eq!(ctx.registry().owner(lock), Some(Owner::OrphanCollector));
    assert_eq!(ctx.registry().owner(notify), Some(Owner::OrphanCollector));
    assert_eq!(ctx.route(&Packet::free_lock(lock)), Route::Orphans);

    // Only releasing packets are honoured
    let examine = ctx.submit_to_orphans(Packet::ExamineObject(LockArgs { lock }));
    assert_eq!(examine.error(), Some(ErrorCode::DeviceNotMounted));

    assert!(ctx.submit_to_orphans(Packet::free_lock(lock)).is_success());
    assert_eq!(ctx.registry().owner(lock), None);
    assert_eq!(
        ctx.submit_to_orphans(Packet::free_lock(lock)).error(),
        Some(ErrorCode::InvalidLock)
    );
    assert!(ctx
        .submit_to_orphans(Packet::RemoveNotify(RemoveNotifyArgs { notify }))
        .is_success());
    assert!(ctx.registry().is_empty());
    ctx.shutdown();
}

#[test]
fn test_idle_handle_leaves_nothing_behind() {
    let mut h = Harness::new();
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let lock = h.lock("f");
    assert!(h.free(lock).is_success());

    let Harness { ctx, fs, .. } = h;
    drop(fs);
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.filesystems(), 0);
}

#[test]
fn test_keys_of_other_handles_are_rejected() {
    let mut first = Harness::new();
    first.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let lock = first.lock("f");

    let config = FsConfig {
        device_name: "PKT1".to_string(),
        ..Default::default()
    };
    let mut second = FileSystem::new(
        &first.ctx,
        Arc::new(MemoryFs::new("Other")),
        config,
        Arc::new(NullTransport),
    )
    .expect("second handle");
    assert_eq!(first.ctx.route(&Packet::free_lock(lock)), Route::Filesystem(first.fs.id()));
    assert_eq!(
        second.dispatch(Packet::free_lock(lock)).error(),
        Some(ErrorCode::InvalidLock)
    );
    assert_eq!(
        second.dispatch(Packet::locate(lock, "f", SHARED_LOCK)).error(),
        Some(ErrorCode::InvalidLock)
    );
    assert!(first.free(lock).is_success());
}
