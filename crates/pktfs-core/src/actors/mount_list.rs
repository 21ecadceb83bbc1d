// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! List-maintenance actor.
//!
//! The mount list holds one device record per filesystem handle and one
//! volume record per mounted volume. All structural edits go through
//! [`MountListHandle::submit`]: an edit is applied in place when the list is
//! uncontended and nothing is queued, otherwise it is queued to the actor
//! thread. Either way edits are applied in submission order.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel as chan;
use pktfs_proto::DateStamp;
use tracing::{debug, warn};

use crate::context::FsId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Device,
    Volume,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountRecord {
    pub id: u64,
    pub kind: RecordKind,
    pub name: String,
    pub owner: Option<FsId>,
    pub date: DateStamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListEdit {
    Add(MountRecord),
    Remove(u64),
    Rename { id: u64, name: String },
}

/// Process-wide list of device and volume records
#[derive(Debug)]
pub struct MountList {
    records: Mutex<Vec<MountRecord>>,
    pending: AtomicUsize,
    next_id: AtomicU64,
}

impl MountList {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            pending: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Vec<MountRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn find(&self, kind: RecordKind, name: &str) -> Option<MountRecord> {
        self.snapshot()
            .into_iter()
            .find(|r| r.kind == kind && r.name.eq_ignore_ascii_case(name))
    }

    /// Number of edits queued to the actor but not yet applied
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn apply(records: &mut Vec<MountRecord>, edit: ListEdit) {
        match edit {
            ListEdit::Add(record) => records.push(record),
            ListEdit::Remove(id) => records.retain(|r| r.id != id),
            ListEdit::Rename { id, name } => match records.iter_mut().find(|r| r.id == id) {
                Some(record) => record.name = name,
                None => warn!(target: "pktfs::mount_list", id, "rename of unknown record"),
            },
        }
    }
}

impl Default for MountList {
    fn default() -> Self {
        Self::new()
    }
}

enum ListMsg {
    Edit(ListEdit),
    Barrier(chan::Sender<()>),
    Shutdown,
}

/// Submission side of the list-maintenance actor
#[derive(Clone)]
pub struct MountListHandle {
    tx: chan::Sender<ListMsg>,
    list: Arc<MountList>,
}

impl MountListHandle {
    pub fn list(&self) -> &Arc<MountList> {
        &self.list
    }

    pub fn submit(&self, edit: ListEdit) {
        if self.list.pending.load(Ordering::SeqCst) == 0 {
            if let Ok(mut records) = self.list.records.try_lock() {
                // Re-check under the lock so a queued edit is never overtaken.
                if self.list.pending.load(Ordering::SeqCst) == 0 {
                    MountList::apply(&mut records, edit);
                    return;
                }
            }
        }

        self.list.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(chan::SendError(msg)) = self.tx.send(ListMsg::Edit(edit)) {
            self.list.pending.fetch_sub(1, Ordering::SeqCst);
            if let ListMsg::Edit(edit) = msg {
                let mut records = self
                    .list
                    .records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                MountList::apply(&mut records, edit);
            }
        }
    }

    pub fn add(&self, kind: RecordKind, name: &str, owner: Option<FsId>, date: DateStamp) -> u64 {
        let id = self.list.allocate_id();
        self.submit(ListEdit::Add(MountRecord {
            id,
            kind,
            name: name.to_string(),
            owner,
            date,
        }));
        id
    }

    pub fn remove(&self, id: u64) {
        self.submit(ListEdit::Remove(id));
    }

    pub fn rename(&self, id: u64, name: &str) {
        self.submit(ListEdit::Rename {
            id,
            name: name.to_string(),
        });
    }

    /// Wait until every edit queued before this call has been applied
    pub fn sync(&self) {
        let (tx, rx) = chan::bounded(1);
        if self.tx.send(ListMsg::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }
}

pub struct MountListActor {
    handle: MountListHandle,
    thread: Option<JoinHandle<()>>,
}

impl MountListActor {
    pub fn spawn(list: Arc<MountList>) -> io::Result<Self> {
        let (tx, rx) = chan::unbounded::<ListMsg>();
        let worker_list = list.clone();
        let thread = thread::Builder::new()
            .name("pktfs-mount-list".to_string())
            .spawn(move || {
                debug!(target: "pktfs::mount_list", "list actor started");
                while let Ok(msg) = rx.recv() {
                    match msg {
                        ListMsg::Edit(edit) => {
                            let mut records = worker_list
                                .records
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner);
                            MountList::apply(&mut records, edit);
                            worker_list.pending.fetch_sub(1, Ordering::SeqCst);
                        }
                        ListMsg::Barrier(done) => {
                            let _ = done.send(());
                        }
                        ListMsg::Shutdown => break,
                    }
                }
                debug!(target: "pktfs::mount_list", "list actor stopped");
            })?;
        Ok(Self {
            handle: MountListHandle { tx, list },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> MountListHandle {
        self.handle.clone()
    }

    /// Ask the thread to stop after the queued edits and wait for it
    pub fn stop(mut self) {
        let _ = self.handle.tx.send(ListMsg::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
