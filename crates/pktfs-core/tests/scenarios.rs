// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use std::sync::Arc;

use common::{object, Harness};
use pktfs_core::testing::{FaultOp, FaultRule, FaultyOps};
use pktfs_core::types::S_IFREG;
use pktfs_core::{DiskState, FsError, MemoryFs, Operations};
use pktfs_proto::codes::{ED_NAME, EXCLUSIVE_LOCK, ID_BUSY, OFFSET_BEGINNING, SHARED_LOCK};
use pktfs_proto::{
    ErrorCode, ExamineAllArgs, FormatArgs, InhibitArgs, LockArgs, Packet, ReadLinkArgs,
    RenameArgs, ReplyPayload, SeekArgs, SetCommentArgs, WriteProtectArgs, DOSFALSE, DOSTRUE,
};

fn rename(h: &mut Harness, from: &str, to: &str) -> pktfs_proto::Reply {
    h.send(Packet::RenameObject(RenameArgs {
        src_parent: 0,
        src_name: from.as_bytes().to_vec(),
        dst_parent: 0,
        dst_name: to.as_bytes().to_vec(),
    }))
}

#[test]
fn test_write_close_reopen_read() {
    let mut h = Harness::new();
    let dir = h.create_dir("a").res1() as u64;
    assert!(h.free(dir).is_success());

    let file = h.open_new("a/b.txt");
    assert!(file.is_success());
    let file = file.res1() as u64;
    let data = b"0123456789";
    assert_eq!(h.write(file, data).res1(), 10);
    assert!(h.end(file).is_success());

    let file = h.open_read("a/b.txt").res1() as u64;
    let reply = h.read(file, 100);
    assert_eq!(reply.res1(), 10);
    assert_eq!(reply.payload, ReplyPayload::Data(data.to_vec()));
    assert_eq!(h.read(file, 100).res1(), 0);
    assert!(h.end(file).is_success());
    assert!(h.fs.volume().expect("volume").entries.is_empty());
}

#[test]
fn test_notify_before_create_fires_once() {
    let mut h = Harness::new();
    let notify = h.add_notify("a/new.txt", 7);
    assert!(notify.is_success());
    let notify = notify.res1() as u64;
    {
        let vol = h.fs.volume().expect("volume");
        assert_eq!(vol.notifies.unresolved(), &[notify]);
    }

    let dir = h.create_dir("a").res1() as u64;
    h.free(dir);
    let file = h.open_new("a/new.txt").res1() as u64;
    assert!(h.end(file).is_success());

    let messages = h.transport.messages();
    assert_eq!(messages.len(), 1);
    let (client, message) = &messages[0];
    assert_eq!(*client, 7);
    assert_eq!(message.notify, notify);
    assert_eq!(message.user_data, 0xfeed);
    assert_eq!(message.name, b"Ram:a/new.txt".to_vec());
    assert!(h.fs.volume().expect("volume").notifies.unresolved().is_empty());
}

#[test]
fn test_notify_reverts_to_pool_on_delete() {
    let mut h = Harness::new();
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let notify = h.add_notify("f", 1).res1() as u64;
    assert!(h.fs.volume().expect("volume").notifies.unresolved().is_empty());

    assert!(h.delete("f").is_success());
    let vol = h.fs.volume().expect("volume");
    assert_eq!(vol.notifies.unresolved(), &[notify]);
    assert!(vol.entries.is_empty());
    assert_eq!(h.transport.messages().len(), 1);
}

#[test]
fn test_examine_all_pages_through_directory() {
    let mut h = Harness::new();
    h.mem.mkdir("/d", 0o755).expect("mkdir");
    let mut expected = Vec::new();
    for i in 0..10 {
        let name = format!("f{:02}", i);
        h.mem.mknod(&format!("/d/{}", name), S_IFREG | 0o644).expect("mknod");
        expected.push(name.into_bytes());
    }
    let dir = h.lock("d");
    // Room for three name-only records of three characters
    let buffer_size = 3 * pktfs_core::dispatch::record_size(3, 0, ED_NAME) as u32;

    let mut batches = Vec::new();
    let mut names = Vec::new();
    loop {
        let reply = h.send(Packet::ExamineAll(ExamineAllArgs {
            lock: dir,
            buffer_size,
            data_type: ED_NAME,
        }));
        let ReplyPayload::Entries(entries) = &reply.payload else {
            panic!("no entries in {:?}", reply);
        };
        batches.push(entries.len());
        names.extend(entries.iter().map(|e| e.name.clone()));
        if reply.res1() == DOSFALSE {
            assert_eq!(reply.error(), Some(ErrorCode::NoMoreEntries));
            break;
        }
        assert_eq!(reply.res1(), DOSTRUE);
    }
    assert_eq!(batches, vec![3, 3, 3, 1]);
    assert_eq!(names, expected);
    assert!(h.free(dir).is_success());
}

#[test]
fn test_examine_next_lists_each_entry_once() {
    let mut h = Harness::new();
    for name in ["b", "a", "c"] {
        h.mem.mknod(&format!("/{}", name), S_IFREG | 0o644).expect("mknod");
    }
    let root = h.lock("");
    let mut names = Vec::new();
    loop {
        let reply = h.send(Packet::ExamineNext(LockArgs { lock: root }));
        match reply.payload {
            ReplyPayload::FileInfo(block) => names.push(String::from_utf8_lossy(&block.name).into_owned()),
            _ => {
                assert_eq!(reply.error(), Some(ErrorCode::NoMoreEntries));
                break;
            }
        }
    }
    assert_eq!(names, vec!["a", "b", "c"]);
}

/// `count` files in the root, in listing order
fn populate(h: &Harness, count: usize) -> Vec<String> {
    let names: Vec<String> = (0..count).map(|i| format!("f{:02}", i)).collect();
    for name in &names {
        h.mem.mknod(&format!("/{}", name), S_IFREG | 0o644).expect("mknod");
    }
    names
}

fn examine_next_names(h: &mut Harness, lock: u64) -> Vec<String> {
    let mut names = Vec::new();
    for _ in 0..200 {
        let reply = h.send(Packet::ExamineNext(LockArgs { lock }));
        match reply.payload {
            ReplyPayload::FileInfo(block) => {
                names.push(String::from_utf8_lossy(&block.name).into_owned())
            }
            _ => {
                assert_eq!(reply.error(), Some(ErrorCode::NoMoreEntries));
                return names;
            }
        }
    }
    panic!("enumeration did not end: {} names", names.len());
}

fn examine_all_names(h: &mut Harness, lock: u64, buffer_size: u32) -> Vec<String> {
    let mut names = Vec::new();
    for _ in 0..200 {
        let reply = h.send(Packet::ExamineAll(ExamineAllArgs {
            lock,
            buffer_size,
            data_type: ED_NAME,
        }));
        let ReplyPayload::Entries(entries) = &reply.payload else {
            panic!("no entries in {:?}", reply);
        };
        names.extend(entries.iter().map(|e| String::from_utf8_lossy(&e.name).into_owned()));
        if reply.res1() == DOSFALSE {
            assert_eq!(reply.error(), Some(ErrorCode::NoMoreEntries));
            return names;
        }
    }
    panic!("enumeration did not end: {} names", names.len());
}

#[test]
fn test_large_directory_spans_refills() {
    let mut h = Harness::new();
    let expected = populate(&h, 45);
    let root = h.lock("");
    assert_eq!(examine_next_names(&mut h, root), expected);
    let buffer_size = 7 * pktfs_core::dispatch::record_size(3, 0, ED_NAME) as u32;
    assert_eq!(examine_all_names(&mut h, root, buffer_size), expected);
    assert!(h.free(root).is_success());
}

#[test]
fn test_large_directory_without_readdir_offsets() {
    let mem = Arc::new(MemoryFs::new("Ram").report_offsets(false));
    let mut h = Harness::with_ops(mem.clone(), mem);
    let expected = populate(&h, 45);
    let root = h.lock("");
    assert_eq!(examine_next_names(&mut h, root), expected);
    let buffer_size = 7 * pktfs_core::dispatch::record_size(3, 0, ED_NAME) as u32;
    assert_eq!(examine_all_names(&mut h, root, buffer_size), expected);
    // A finished scan starts over on the next call
    assert_eq!(examine_next_names(&mut h, root), expected);
    assert!(h.free(root).is_success());
}

#[test]
fn test_exclusive_waits_for_shared_release() {
    let mut h = Harness::new();
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let shared = h.lock("f");
    let denied = h.locate("f", EXCLUSIVE_LOCK);
    assert_eq!(denied.error(), Some(ErrorCode::ObjectInUse));
    assert!(h.free(shared).is_success());
    let exclusive = h.locate("f", EXCLUSIVE_LOCK);
    assert!(exclusive.is_success());
    assert_eq!(h.locate("f", SHARED_LOCK).error(), Some(ErrorCode::ObjectInUse));
}

#[test]
fn test_delete_respects_locks() {
    let mut h = Harness::new();
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let key = h.lock("f");
    assert_eq!(h.delete("f").error(), Some(ErrorCode::ObjectInUse));
    h.free(key);
    assert!(h.delete("f").is_success());
    assert!(matches!(h.mem.getattr("/f"), Err(FsError::NotFound)));
    assert_eq!(h.delete("").error(), Some(ErrorCode::ObjectWrongType));
}

#[test]
fn test_rename_rules() {
    let mut h = Harness::new();
    h.mem.mkdir("/a", 0o755).expect("mkdir");
    h.mem.mkdir("/a/b", 0o755).expect("mkdir");
    h.mem.mknod("/x", S_IFREG | 0o644).expect("mknod");

    assert_eq!(rename(&mut h, "a", "a/b/c").error(), Some(ErrorCode::ObjectInUse));
    assert!(rename(&mut h, "a", "a").is_success());
    assert_eq!(rename(&mut h, "a", "x").error(), Some(ErrorCode::ObjectExists));
    assert_eq!(rename(&mut h, "missing", "y").error(), Some(ErrorCode::ObjectNotFound));

    // Case-only rename on a case-insensitive volume
    assert!(rename(&mut h, "x", "X").is_success());
    assert!(h.mem.getattr("/X").is_ok());
}

#[test]
fn test_rename_moves_locked_descendants() {
    let mut h = Harness::new();
    h.mem.mkdir("/a", 0o755).expect("mkdir");
    h.mem.mkdir("/a/b", 0o755).expect("mkdir");
    let key = h.lock("a/b");
    assert!(rename(&mut h, "a", "z").is_success());
    assert_eq!(h.fs.volume().expect("volume").lock_path(key).expect("path"), "/z/b");
    let reply = h.send(Packet::ExamineObject(LockArgs { lock: key }));
    let ReplyPayload::FileInfo(block) = reply.payload else {
        panic!("examine failed");
    };
    assert_eq!(block.name, b"b".to_vec());
}

#[test]
fn test_seek_and_bounds() {
    let mut h = Harness::new();
    let file = h.open_new("s").res1() as u64;
    h.write(file, b"0123456789");
    let reply = h.send(Packet::Seek(SeekArgs::new(file, 2, OFFSET_BEGINNING)));
    assert_eq!(reply.res1(), 10);
    assert_eq!(h.read(file, 3).payload, ReplyPayload::Data(b"234".to_vec()));
    let reply = h.send(Packet::Seek(SeekArgs::new(file, 11, OFFSET_BEGINNING)));
    assert_eq!(reply.res1(), -1);
    assert_eq!(reply.error(), Some(ErrorCode::SeekError));
}

#[test]
fn test_read_link_rewrites_absolute_target() {
    let mut h = Harness::new();
    h.mem.symlink("/docs/readme", "/l").expect("symlink");
    let reply = h.send(Packet::ReadLink(ReadLinkArgs {
        parent: 0,
        name: b"l".to_vec(),
        buffer_size: 64,
    }));
    assert_eq!(reply.payload, ReplyPayload::Data(b"Ram:docs/readme".to_vec()));
    let short = h.send(Packet::ReadLink(ReadLinkArgs {
        parent: 0,
        name: b"l".to_vec(),
        buffer_size: 4,
    }));
    assert_eq!(short.res1(), -2);
    assert_eq!(short.error(), Some(ErrorCode::LineTooLong));
    assert_eq!(h.locate("l", SHARED_LOCK).error(), Some(ErrorCode::IsSoftLink));
}

#[test]
fn test_comment_round_trips_through_examine() {
    let mut h = Harness::new();
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let set = |comment: &[u8]| {
        Packet::SetComment(SetCommentArgs {
            parent: 0,
            name: b"f".to_vec(),
            comment: comment.to_vec(),
        })
    };
    assert!(h.send(set(b"hello")).is_success());
    assert_eq!(h.send(set(&[b'x'; 80])).error(), Some(ErrorCode::CommentTooBig));
    let key = h.lock("f");
    let ReplyPayload::FileInfo(block) = h.send(Packet::ExamineObject(LockArgs { lock: key })).payload
    else {
        panic!("examine failed");
    };
    assert_eq!(block.comment, b"hello".to_vec());
}

#[test]
fn test_write_protect_passkey() {
    let mut h = Harness::new();
    let protect = |protect, passkey| Packet::WriteProtect(WriteProtectArgs { protect, passkey });
    assert!(h.send(protect(true, 42)).is_success());
    assert_eq!(h.create_dir("d").error(), Some(ErrorCode::DiskWriteProtected));
    assert_eq!(h.send(protect(true, 42)).error(), Some(ErrorCode::ObjectInUse));
    assert_eq!(h.send(protect(false, 7)).error(), Some(ErrorCode::WriteProtected));
    assert!(h.send(protect(false, 42)).is_success());
    assert!(h.create_dir("d").is_success());
}

#[test]
fn test_format_requires_inhibit() {
    let mut h = Harness::new();
    let format = || {
        Packet::Format(FormatArgs {
            name: b"Fresh".to_vec(),
            dos_type: 0,
        })
    };
    assert_eq!(h.send(format()).error(), Some(ErrorCode::ObjectInUse));

    assert!(h.send(Packet::Inhibit(InhibitArgs { inhibit: true })).is_success());
    assert_eq!(h.fs.state(), DiskState::Inhibited);
    let ReplyPayload::Info(info) = h.send(Packet::DiskInfo(Default::default())).payload else {
        panic!("no info");
    };
    assert_eq!(info.disk_type, ID_BUSY);
    assert!(h.send(format()).is_success());

    assert!(h.send(Packet::Inhibit(InhibitArgs { inhibit: false })).is_success());
    assert_eq!(h.fs.state(), DiskState::Ready);
    assert_eq!(h.fs.volume().expect("volume").name, "Fresh");
}

#[test]
fn test_failed_open_rolls_back() {
    let mem = Arc::new(MemoryFs::new("Ram"));
    let faulty = Arc::new(FaultyOps::new(mem.clone()));
    let mut h = Harness::with_ops(mem, faulty.clone());
    faulty.add_rule(FaultRule::new(FaultOp::Open, libc::EACCES));

    let reply = h.send(Packet::FindOutput(object("new.txt")));
    assert_eq!(reply.error(), Some(ErrorCode::ReadProtected));
    assert!(matches!(h.mem.getattr("/new.txt"), Err(FsError::NotFound)));
    let vol = h.fs.volume().expect("volume");
    assert!(vol.locks.is_empty());
    assert!(vol.entries.is_empty());
}

#[test]
fn test_failed_cleanup_still_releases_lock() {
    let mem = Arc::new(MemoryFs::new("Ram"));
    let faulty = Arc::new(FaultyOps::new(mem.clone()));
    let mut h = Harness::with_ops(mem, faulty.clone());
    faulty.add_rule(FaultRule::new(FaultOp::Open, libc::EACCES));
    faulty.add_rule(FaultRule::new(FaultOp::Unlink, libc::EBUSY));

    let reply = h.send(Packet::FindOutput(object("stuck.txt")));
    assert_eq!(reply.error(), Some(ErrorCode::ReadProtected));
    // The node stays behind but the handle forgets it
    assert!(h.mem.getattr("/stuck.txt").is_ok());
    let vol = h.fs.volume().expect("volume");
    assert!(vol.locks.is_empty());
}

#[test]
fn test_failed_write_reports_minus_one() {
    let mem = Arc::new(MemoryFs::new("Ram"));
    let faulty = Arc::new(FaultyOps::new(mem.clone()));
    let mut h = Harness::with_ops(mem, faulty.clone());
    let file = h.open_new("w").res1() as u64;
    faulty.add_rule(FaultRule::new(FaultOp::Write, libc::ENOSPC).times(1));

    let reply = h.write(file, b"data");
    assert_eq!(reply.res1(), -1);
    assert_eq!(reply.error(), Some(ErrorCode::DiskFull));
    assert_eq!(h.write(file, b"data").res1(), 4);
}

#[test]
fn test_stale_and_unknown_keys() {
    let mut h = Harness::new();
    assert_eq!(h.free(9999).error(), Some(ErrorCode::InvalidLock));
    h.mem.mknod("/f", S_IFREG | 0o644).expect("mknod");
    let key = h.lock("f");

    h.send(Packet::DiskChange(Default::default()));
    assert_eq!(h.fs.stale_volumes().len(), 1);
    let examine = h.send(Packet::ExamineObject(LockArgs { lock: key }));
    assert_eq!(examine.error(), Some(ErrorCode::NoDisk));
    assert!(h.free(key).is_success());
    assert!(h.fs.stale_volumes().is_empty());
}
