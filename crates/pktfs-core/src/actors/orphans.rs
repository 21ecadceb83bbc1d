// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Orphan-collector actor.
//!
//! When a filesystem handle is destroyed while clients still hold locks or
//! notify requests on one of its volumes, those resources are handed over
//! here. The collector answers the packets still addressed to them without
//! touching any filesystem state: releasing packets succeed and free the
//! resource, everything else fails with `DeviceNotMounted`. A volume's mount
//! list record goes away with its last resource.
//!
//! The thread stays up while any filesystem is attached or any orphan is
//! outstanding.

use std::collections::HashSet;
use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;
use pktfs_proto::{ErrorCode, Packet, Reply};
use tracing::{debug, info};

use super::mount_list::MountListHandle;
use crate::context::{Context, FsId};

/// Resources of one volume that outlived their filesystem handle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrphanVolume {
    pub fs: FsId,
    pub name: String,
    pub record: Option<u64>,
    pub locks: HashSet<u64>,
    pub notifies: HashSet<u64>,
}

impl OrphanVolume {
    pub fn is_drained(&self) -> bool {
        self.locks.is_empty() && self.notifies.is_empty()
    }
}

enum OrphanMsg {
    Adopt(Vec<OrphanVolume>),
    Packet(Packet, chan::Sender<Reply>),
    Wake,
    Shutdown,
}

/// Mailbox of the orphan collector
#[derive(Clone)]
pub struct OrphanHandle {
    tx: chan::Sender<OrphanMsg>,
}

impl OrphanHandle {
    /// Answer a packet addressed to an orphaned resource
    pub fn submit(&self, packet: Packet) -> Reply {
        let (tx, rx) = chan::bounded(1);
        if self.tx.send(OrphanMsg::Packet(packet, tx)).is_err() {
            return Reply::failure(ErrorCode::DeviceNotMounted);
        }
        rx.recv()
            .unwrap_or_else(|_| Reply::failure(ErrorCode::DeviceNotMounted))
    }

    pub(crate) fn adopt(&self, volumes: Vec<OrphanVolume>) -> bool {
        self.tx.send(OrphanMsg::Adopt(volumes)).is_ok()
    }

    pub(crate) fn wake(&self) {
        let _ = self.tx.send(OrphanMsg::Wake);
    }
}

pub struct OrphanCollector {
    handle: OrphanHandle,
    thread: Option<JoinHandle<()>>,
}

impl OrphanCollector {
    pub(crate) fn spawn(ctx: Weak<Context>, list: MountListHandle) -> io::Result<Self> {
        let (tx, rx) = chan::unbounded();
        let collector = Collector {
            ctx,
            list,
            volumes: Vec::new(),
        };
        let thread = thread::Builder::new()
            .name("pktfs-orphans".to_string())
            .spawn(move || collector.run(rx))?;
        Ok(Self {
            handle: OrphanHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> OrphanHandle {
        self.handle.clone()
    }

    pub(crate) fn stop(mut self) {
        let _ = self.handle.tx.send(OrphanMsg::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Collector {
    ctx: Weak<Context>,
    list: MountListHandle,
    volumes: Vec<OrphanVolume>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Resource {
    Lock,
    Notify,
}

impl Collector {
    fn run(mut self, rx: chan::Receiver<OrphanMsg>) {
        debug!(target: "pktfs::orphans", "orphan collector started");
        while let Ok(msg) = rx.recv() {
            match msg {
                OrphanMsg::Adopt(volumes) => self.adopt(volumes),
                OrphanMsg::Packet(packet, reply) => {
                    let _ = reply.send(self.answer(&packet));
                }
                OrphanMsg::Wake => {}
                OrphanMsg::Shutdown => break,
            }
            if self.try_retire() {
                break;
            }
        }
        self.release_all();
        debug!(target: "pktfs::orphans", "orphan collector stopped");
    }

    fn adopt(&mut self, volumes: Vec<OrphanVolume>) {
        for volume in volumes {
            info!(
                target: "pktfs::orphans",
                fs = volume.fs.0,
                volume = %volume.name,
                locks = volume.locks.len(),
                notifies = volume.notifies.len(),
                "adopted orphaned volume"
            );
            if volume.is_drained() {
                self.drop_volume(volume);
            } else {
                self.volumes.push(volume);
            }
        }
    }

    fn answer(&mut self, packet: &Packet) -> Reply {
        let key = packet.target_key().unwrap_or(0);
        let resource = match packet {
            Packet::FreeLock(_) | Packet::End(_) => Resource::Lock,
            Packet::RemoveNotify(_) => Resource::Notify,
            other => {
                debug!(
                    target: "pktfs::orphans",
                    action = other.action().name(),
                    key,
                    "rejecting packet for orphaned resource"
                );
                return Reply::failure(ErrorCode::DeviceNotMounted);
            }
        };
        if self.forget(key, resource) {
            Reply::success()
        } else {
            Reply::failure(ErrorCode::InvalidLock)
        }
    }

    fn forget(&mut self, key: u64, resource: Resource) -> bool {
        let Some(idx) = self.volumes.iter().position(|v| match resource {
            Resource::Lock => v.locks.contains(&key),
            Resource::Notify => v.notifies.contains(&key),
        }) else {
            return false;
        };
        let volume = &mut self.volumes[idx];
        match resource {
            Resource::Lock => volume.locks.remove(&key),
            Resource::Notify => volume.notifies.remove(&key),
        };
        if let Some(ctx) = self.ctx.upgrade() {
            ctx.registry().unregister(key);
        }
        if volume.is_drained() {
            let volume = self.volumes.swap_remove(idx);
            self.drop_volume(volume);
        }
        true
    }

    fn drop_volume(&mut self, volume: OrphanVolume) {
        debug!(target: "pktfs::orphans", volume = %volume.name, "orphaned volume drained");
        if let Some(record) = volume.record {
            self.list.remove(record);
        }
    }

    fn try_retire(&self) -> bool {
        if !self.volumes.is_empty() {
            return false;
        }
        match self.ctx.upgrade() {
            Some(ctx) => ctx.retire_actors_if_idle(),
            None => true,
        }
    }

    fn release_all(&mut self) {
        let ctx = self.ctx.upgrade();
        for volume in std::mem::take(&mut self.volumes) {
            if let Some(ctx) = &ctx {
                for key in volume.locks.iter().chain(volume.notifies.iter()) {
                    ctx.registry().unregister(*key);
                }
            }
            self.drop_volume(volume);
        }
    }
}
