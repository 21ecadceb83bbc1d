// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

mod common;

use common::Harness;
use pktfs_core::lock::LockMode;
use pktfs_core::types::S_IFREG;
use pktfs_core::volume::Volume;
use pktfs_core::Operations;
use pktfs_proto::codes::{EXCLUSIVE_LOCK, SHARED_LOCK};
use pktfs_proto::{Packet, RemoveNotifyArgs};
use proptest::prelude::*;

const NAMES: [&str; 5] = ["a", "b", "d", "d/e", "D/E"];

#[derive(Clone, Debug)]
enum Step {
    Lock { name: usize, exclusive: bool },
    Free { idx: usize },
    Notify { name: usize },
    Unnotify { idx: usize },
    Create { name: usize },
    Delete { name: usize },
}

fn step() -> impl Strategy<Value = Step> {
    let name = 0..NAMES.len();
    prop_oneof![
        (name.clone(), any::<bool>()).prop_map(|(name, exclusive)| Step::Lock { name, exclusive }),
        any::<usize>().prop_map(|idx| Step::Free { idx }),
        name.clone().prop_map(|name| Step::Notify { name }),
        any::<usize>().prop_map(|idx| Step::Unnotify { idx }),
        name.clone().prop_map(|name| Step::Create { name }),
        name.prop_map(|name| Step::Delete { name }),
    ]
}

/// Entries exist exactly while referenced, and the back references agree
fn check(vol: &Volume) {
    for (id, entry) in vol.entries.iter() {
        assert!(entry.is_referenced(), "unreferenced entry {}", entry.path);
        for key in &entry.locks {
            assert_eq!(vol.locks.get(key).map(|l| l.entry), Some(id));
        }
        for key in &entry.notifies {
            assert_eq!(vol.notifies.get(*key).and_then(|n| n.entry), Some(id));
        }
        let exclusive = entry
            .locks
            .iter()
            .filter(|key| vol.locks.get(*key).map(|l| l.mode) == Some(LockMode::Exclusive))
            .count();
        assert!(exclusive == 0 || entry.locks.len() == 1, "mixed locks on {}", entry.path);
    }
    for (key, lock) in &vol.locks {
        let entry = vol.entries.get(lock.entry).expect("lock entry");
        assert!(entry.locks.contains(key));
    }
    for key in vol.notifies.keys() {
        let node = vol.notifies.get(key).expect("notify");
        match node.entry {
            Some(id) => assert!(vol.entries.get(id).expect("notify entry").notifies.contains(&key)),
            None => assert!(vol.notifies.unresolved().contains(&key)),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn entries_track_references(steps in prop::collection::vec(step(), 1..40)) {
        let mut h = Harness::new();
        h.mem.mkdir("/d", 0o755).expect("mkdir");
        h.mem.mknod("/a", S_IFREG | 0o644).expect("mknod");
        let mut locks: Vec<u64> = Vec::new();
        let mut notifies: Vec<u64> = Vec::new();

        for step in steps {
            match step {
                Step::Lock { name, exclusive } => {
                    let mode = if exclusive { EXCLUSIVE_LOCK } else { SHARED_LOCK };
                    let reply = h.locate(NAMES[name], mode);
                    if reply.is_success() {
                        locks.push(reply.res1() as u64);
                    }
                }
                Step::Free { idx } if !locks.is_empty() => {
                    let key = locks.remove(idx % locks.len());
                    prop_assert!(h.free(key).is_success());
                }
                Step::Notify { name } => {
                    let reply = h.add_notify(NAMES[name], 1);
                    prop_assert!(reply.is_success());
                    notifies.push(reply.res1() as u64);
                }
                Step::Unnotify { idx } if !notifies.is_empty() => {
                    let notify = notifies.remove(idx % notifies.len());
                    let reply = h.send(Packet::RemoveNotify(RemoveNotifyArgs { notify }));
                    prop_assert!(reply.is_success());
                }
                Step::Create { name } => {
                    let reply = h.open_new(NAMES[name]);
                    if reply.is_success() {
                        prop_assert!(h.end(reply.res1() as u64).is_success());
                    }
                }
                Step::Delete { name } => {
                    h.delete(NAMES[name]);
                }
                Step::Free { .. } | Step::Unnotify { .. } => {}
            }
            check(h.fs.volume().expect("volume"));
        }

        for key in locks {
            prop_assert!(h.free(key).is_success());
        }
        for notify in notifies {
            h.send(Packet::RemoveNotify(RemoveNotifyArgs { notify }));
        }
        let vol = h.fs.volume().expect("volume");
        prop_assert!(vol.entries.is_empty());
        prop_assert!(vol.notifies.is_empty());
    }
}
