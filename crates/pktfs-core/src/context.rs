// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide state shared by all filesystem handles.
//!
//! A [`Context`] owns the key counter, the debug mask, the handle registry,
//! the mount list and the two helper actors. Actors start with the first
//! attached filesystem. The orphan collector stops itself once no filesystem
//! is attached and it holds no orphans, and takes the list actor down with
//! it.
//!
//! Lock ordering: `actors` before `registry`. The registry mutex is never
//! held across a call into another component.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use pktfs_proto::{ErrorCode, Packet, Reply};
use tracing::{debug, info};

use crate::actors::{MountList, MountListActor, MountListHandle, OrphanCollector, OrphanHandle};
use crate::debug::DebugMask;
use crate::error::SetupError;

/// Identity of one filesystem handle within a context
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FsId(pub u64);

impl fmt::Display for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fs{}", self.0)
    }
}

/// Who answers packets for a lock or notify key
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Filesystem(FsId),
    OrphanCollector,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Lock,
    Notify,
}

/// Where a packet should be delivered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Filesystem(FsId),
    Orphans,
    /// No key, or a key nobody owns
    Unowned,
}

/// Owner tags of every live lock and notify key
#[derive(Debug, Default)]
pub struct HandleRegistry {
    handles: Mutex<HashMap<u64, (HandleKind, Owner)>>,
}

impl HandleRegistry {
    pub fn register(&self, key: u64, kind: HandleKind, owner: Owner) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (kind, owner));
    }

    pub fn unregister(&self, key: u64) -> Option<(HandleKind, Owner)> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
    }

    pub fn owner(&self, key: u64) -> Option<Owner> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|(_, owner)| *owner)
    }

    pub fn kind(&self, key: u64) -> Option<HandleKind> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .map(|(kind, _)| *kind)
    }

    /// Hand `keys` owned by `from` over to the orphan collector. Keys owned
    /// by anyone else are left alone. Returns the number moved.
    pub fn transfer(&self, keys: &[u64], from: FsId) -> usize {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let mut moved = 0;
        for key in keys {
            if let Some((_, owner)) = handles.get_mut(key) {
                if *owner == Owner::Filesystem(from) {
                    *owner = Owner::OrphanCollector;
                    moved += 1;
                }
            }
        }
        moved
    }

    pub fn owned_by(&self, owner: Owner) -> Vec<u64> {
        let handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<u64> = handles
            .iter()
            .filter(|(_, (_, o))| *o == owner)
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct ActorSlots {
    filesystems: usize,
    list: Option<MountListActor>,
    orphans: Option<OrphanCollector>,
}

/// What a filesystem handle receives when it attaches to a context
pub(crate) struct Attachment {
    pub id: FsId,
    pub list: MountListHandle,
    pub orphans: OrphanHandle,
}

pub struct Context {
    next_key: AtomicU64,
    next_fs: AtomicU64,
    debug: Arc<DebugMask>,
    registry: HandleRegistry,
    mount_list: Arc<MountList>,
    actors: Mutex<ActorSlots>,
    shut_down: AtomicBool,
}

impl Context {
    pub fn init() -> Arc<Self> {
        Arc::new(Self {
            next_key: AtomicU64::new(1),
            next_fs: AtomicU64::new(1),
            debug: Arc::new(DebugMask::default()),
            registry: HandleRegistry::default(),
            mount_list: Arc::new(MountList::new()),
            actors: Mutex::new(ActorSlots::default()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Allocate a process-wide unique lock or notify key
    pub fn next_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    pub fn debug(&self) -> &Arc<DebugMask> {
        &self.debug
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    pub fn mount_list(&self) -> &Arc<MountList> {
        &self.mount_list
    }

    /// Number of filesystem handles currently attached
    pub fn filesystems(&self) -> usize {
        self.slots().filesystems
    }

    /// True while either helper actor is running
    pub fn actors_running(&self) -> bool {
        let slots = self.slots();
        slots.list.is_some() || slots.orphans.is_some()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, ActorSlots> {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach_filesystem(self: &Arc<Self>) -> Result<Attachment, SetupError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(SetupError::ShutDown);
        }
        let mut slots = self.slots();
        if slots.list.is_none() {
            let actor = MountListActor::spawn(self.mount_list.clone()).map_err(|source| {
                SetupError::Actor {
                    actor: "mount-list",
                    source,
                }
            })?;
            slots.list = Some(actor);
        }
        let list = match &slots.list {
            Some(actor) => actor.handle(),
            None => unreachable!("list actor slot filled above"),
        };
        if slots.orphans.is_none() {
            match OrphanCollector::spawn(Arc::downgrade(self), list.clone()) {
                Ok(collector) => slots.orphans = Some(collector),
                Err(source) => {
                    if slots.filesystems == 0 {
                        slots.list = None;
                    }
                    return Err(SetupError::Actor {
                        actor: "orphan-collector",
                        source,
                    });
                }
            }
        }
        let orphans = match &slots.orphans {
            Some(collector) => collector.handle(),
            None => unreachable!("orphan slot filled above"),
        };
        slots.filesystems += 1;
        let id = FsId(self.next_fs.fetch_add(1, Ordering::Relaxed));
        debug!(target: "pktfs::context", fs = %id, attached = slots.filesystems, "filesystem attached");
        Ok(Attachment { id, list, orphans })
    }

    pub(crate) fn detach_filesystem(&self, id: FsId, orphans: &OrphanHandle) {
        let mut slots = self.slots();
        slots.filesystems = slots.filesystems.saturating_sub(1);
        debug!(target: "pktfs::context", fs = %id, attached = slots.filesystems, "filesystem detached");
        if slots.filesystems == 0 {
            orphans.wake();
        }
    }

    /// Called by the orphan collector when it holds nothing. Returns true
    /// when no filesystem is attached and both actors were released.
    pub(crate) fn retire_actors_if_idle(&self) -> bool {
        let mut slots = self.slots();
        if slots.filesystems > 0 {
            return false;
        }
        slots.orphans = None;
        slots.list = None;
        true
    }

    /// Routing decision for `packet` based on the owner of its target key
    pub fn route(&self, packet: &Packet) -> Route {
        match packet.target_key().and_then(|key| self.registry.owner(key)) {
            Some(Owner::Filesystem(id)) => Route::Filesystem(id),
            Some(Owner::OrphanCollector) => Route::Orphans,
            None => Route::Unowned,
        }
    }

    /// Deliver a packet to the orphan collector
    pub fn submit_to_orphans(&self, packet: Packet) -> Reply {
        let handle = self.slots().orphans.as_ref().map(OrphanCollector::handle);
        match handle {
            Some(handle) => handle.submit(packet),
            None => Reply::failure(ErrorCode::DeviceNotMounted),
        }
    }

    /// Stop both actors. Orphans still outstanding are released and their
    /// mount list records removed. Attaching afterwards fails.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let (list, orphans) = {
            let mut slots = self.slots();
            (slots.list.take(), slots.orphans.take())
        };
        if let Some(orphans) = orphans {
            orphans.stop();
        }
        if let Some(list) = list {
            list.stop();
        }
        info!(target: "pktfs::context", "context shut down");
    }
}
