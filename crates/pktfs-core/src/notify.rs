// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Change-notification registry.
//!
//! Every request is a [`NotifyNode`] that lives either on the notify list of
//! the entry for its path or in the volume's unresolved pool. The pool is
//! kept in registration order so resolution is deterministic: when several
//! nodes match a newly created entry they move over in the order they were
//! registered.

use std::collections::HashMap;

use pktfs_proto::codes::{NRF_SEND_MESSAGE, NRF_SEND_SIGNAL};
use pktfs_proto::NotifyMessage;

use crate::charset::Charset;
use crate::entry::{EntryId, EntryTable};
use crate::path;

/// Delivery channel to notify clients
#[cfg_attr(test, mockall::automock)]
pub trait NotifyTransport: Send + Sync {
    /// Queue a message for `client`. Returns false when it could not be
    /// delivered.
    fn send_message(&self, client: u64, message: NotifyMessage) -> bool;

    fn signal(&self, client: u64, signal_bit: u8);
}

/// Transport that discards every notification
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransport;

impl NotifyTransport for NullTransport {
    fn send_message(&self, _client: u64, _message: NotifyMessage) -> bool {
        false
    }

    fn signal(&self, _client: u64, _signal_bit: u8) {}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifyNode {
    pub key: u64,
    /// Canonical path being watched
    pub path: String,
    pub flags: u32,
    pub user_data: u64,
    pub client: u64,
    pub signal_bit: u8,
    pub entry: Option<EntryId>,
    pub in_flight: bool,
    pub resend: bool,
}

impl NotifyNode {
    pub fn new(key: u64, path: &str, flags: u32, user_data: u64, client: u64, signal_bit: u8) -> Self {
        Self {
            key,
            path: path.to_string(),
            flags,
            user_data,
            client,
            signal_bit,
            entry: None,
            in_flight: false,
            resend: false,
        }
    }

    pub fn wants_signal(&self) -> bool {
        self.flags & NRF_SEND_SIGNAL != 0
    }

    pub fn wants_message(&self) -> bool {
        self.flags & NRF_SEND_MESSAGE != 0
    }
}

/// Outcome of [`NotifyRegistry::fire`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Signalled,
    Sent,
    /// A message is still in flight, one more goes out on reply
    Deferred,
    Failed,
}

#[derive(Debug, Default)]
pub struct NotifyRegistry {
    nodes: HashMap<u64, NotifyNode>,
    unresolved: Vec<u64>,
}

fn message_name(volume: &str, node_path: &str) -> String {
    format!("{}:{}", volume, node_path.trim_start_matches('/'))
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, key: u64) -> Option<&NotifyNode> {
        self.nodes.get(&key)
    }

    pub fn contains(&self, key: u64) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn keys(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.nodes.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Keys in the unresolved pool, oldest first
    pub fn unresolved(&self) -> &[u64] {
        &self.unresolved
    }

    fn park(&mut self, key: u64) {
        // Keys grow monotonically, so key order is registration order.
        if let Err(pos) = self.unresolved.binary_search(&key) {
            self.unresolved.insert(pos, key);
        }
    }

    /// Add a node. It joins the entry named in `node.entry`, or the
    /// unresolved pool when that is `None`.
    pub fn insert(&mut self, mut node: NotifyNode, entries: &mut EntryTable) {
        let key = node.key;
        match node.entry.and_then(|id| entries.get_mut(id)) {
            Some(entry) => entry.notifies.push(key),
            None => {
                node.entry = None;
                self.park(key);
            }
        }
        self.nodes.insert(key, node);
    }

    /// Remove a node, releasing its entry when nothing else references it
    pub fn remove(&mut self, key: u64, entries: &mut EntryTable) -> Option<NotifyNode> {
        let node = self.nodes.remove(&key)?;
        match node.entry {
            Some(id) => {
                if let Some(entry) = entries.get_mut(id) {
                    entry.notifies.retain(|k| *k != key);
                }
                entries.release(id);
            }
            None => self.unresolved.retain(|k| *k != key),
        }
        Some(node)
    }

    /// Move every pooled node watching the entry's path onto the entry.
    /// Returns the number moved.
    pub fn resolve(&mut self, entries: &mut EntryTable, id: EntryId) -> usize {
        let case_sensitive = entries.case_sensitive();
        let Some(entry) = entries.get_mut(id) else {
            return 0;
        };
        let mut moved = 0;
        let nodes = &mut self.nodes;
        self.unresolved.retain(|key| {
            let Some(node) = nodes.get_mut(key) else {
                return false;
            };
            if path::paths_equal(&node.path, &entry.path, case_sensitive) {
                node.entry = Some(id);
                entry.notifies.push(*key);
                moved += 1;
                false
            } else {
                true
            }
        });
        moved
    }

    /// Move the entry's nodes back to the unresolved pool. The entry itself
    /// is left for the caller to release or repath.
    pub fn unresolve(&mut self, entries: &mut EntryTable, id: EntryId) -> usize {
        let keys = match entries.get_mut(id) {
            Some(entry) => std::mem::take(&mut entry.notifies),
            None => return 0,
        };
        for key in &keys {
            if let Some(node) = self.nodes.get_mut(key) {
                node.entry = None;
            }
            self.park(*key);
        }
        keys.len()
    }

    /// Pooled nodes watching exactly `path`
    pub fn unresolved_at(&self, path: &str, case_sensitive: bool) -> Vec<u64> {
        self.unresolved
            .iter()
            .copied()
            .filter(|key| {
                self.nodes
                    .get(key)
                    .map(|n| path::paths_equal(&n.path, path, case_sensitive))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Deliver one notification for `key`
    pub fn fire(
        &mut self,
        key: u64,
        transport: &dyn NotifyTransport,
        charset: &dyn Charset,
        volume: &str,
    ) -> Delivery {
        let Some(node) = self.nodes.get_mut(&key) else {
            return Delivery::Failed;
        };
        if node.wants_signal() {
            transport.signal(node.client, node.signal_bit);
            return Delivery::Signalled;
        }
        if node.in_flight {
            node.resend = true;
            return Delivery::Deferred;
        }
        let message = NotifyMessage {
            notify: node.key,
            user_data: node.user_data,
            name: charset.encode(&message_name(volume, &node.path)),
        };
        if transport.send_message(node.client, message) {
            node.in_flight = true;
            Delivery::Sent
        } else {
            Delivery::Failed
        }
    }

    /// The client replied to the message in flight for `key`
    pub fn on_reply(
        &mut self,
        key: u64,
        transport: &dyn NotifyTransport,
        charset: &dyn Charset,
        volume: &str,
    ) -> Option<Delivery> {
        let node = self.nodes.get_mut(&key)?;
        node.in_flight = false;
        if !node.resend {
            return None;
        }
        node.resend = false;
        Some(self.fire(key, transport, charset, volume))
    }

    /// Drop every node, returning their keys
    pub fn drain(&mut self) -> Vec<u64> {
        let keys = self.keys();
        self.nodes.clear();
        self.unresolved.clear();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::Latin1;
    use crate::types::EntryKind;

    fn node(key: u64, path: &str, flags: u32) -> NotifyNode {
        NotifyNode::new(key, path, flags, 7, 100, 12)
    }

    #[test]
    fn test_unresolved_node_resolves_on_entry_creation() {
        let mut entries = EntryTable::new(false, 1024);
        let mut registry = NotifyRegistry::new();
        registry.insert(node(2, "/a/new.txt", NRF_SEND_MESSAGE), &mut entries);
        registry.insert(node(1, "/A/NEW.TXT", NRF_SEND_MESSAGE), &mut entries);
        registry.insert(node(3, "/other", NRF_SEND_MESSAGE), &mut entries);
        assert_eq!(registry.unresolved(), &[1, 2, 3]);

        let (id, _) = entries.ensure("/a/new.txt", EntryKind::File, 0).expect("ensure");
        assert_eq!(registry.resolve(&mut entries, id), 2);
        assert_eq!(entries.get(id).expect("entry").notifies, vec![1, 2]);
        assert_eq!(registry.unresolved(), &[3]);
        assert_eq!(registry.get(1).and_then(|n| n.entry), Some(id));
    }

    #[test]
    fn test_unresolve_returns_nodes_in_order() {
        let mut entries = EntryTable::new(true, 1024);
        let mut registry = NotifyRegistry::new();
        let (id, _) = entries.ensure("/d", EntryKind::Dir, 0).expect("ensure");
        let mut first = node(5, "/d", NRF_SEND_SIGNAL);
        first.entry = Some(id);
        registry.insert(first, &mut entries);
        registry.insert(node(4, "/x", NRF_SEND_SIGNAL), &mut entries);

        assert_eq!(registry.unresolve(&mut entries, id), 1);
        assert_eq!(registry.unresolved(), &[4, 5]);
        assert!(entries.release(id));
    }

    #[test]
    fn test_remove_releases_entry() {
        let mut entries = EntryTable::new(true, 1024);
        let mut registry = NotifyRegistry::new();
        let (id, _) = entries.ensure("/f", EntryKind::File, 0).expect("ensure");
        let mut watched = node(9, "/f", NRF_SEND_SIGNAL);
        watched.entry = Some(id);
        registry.insert(watched, &mut entries);
        assert!(registry.remove(9, &mut entries).is_some());
        assert!(entries.find("/f").is_none());
        assert!(registry.remove(9, &mut entries).is_none());
    }

    #[test]
    fn test_signal_delivery() {
        let mut entries = EntryTable::new(true, 1024);
        let mut registry = NotifyRegistry::new();
        registry.insert(node(1, "/f", NRF_SEND_SIGNAL), &mut entries);
        let mut transport = MockNotifyTransport::new();
        transport
            .expect_signal()
            .withf(|client, bit| *client == 100 && *bit == 12)
            .times(2)
            .return_const(());
        transport.expect_send_message().never();
        assert_eq!(registry.fire(1, &transport, &Latin1, "Work"), Delivery::Signalled);
        assert_eq!(registry.fire(1, &transport, &Latin1, "Work"), Delivery::Signalled);
    }

    #[test]
    fn test_message_in_flight_coalesces_to_one_resend() {
        let mut entries = EntryTable::new(true, 1024);
        let mut registry = NotifyRegistry::new();
        registry.insert(node(1, "/dir/f", NRF_SEND_MESSAGE), &mut entries);
        let mut transport = MockNotifyTransport::new();
        transport
            .expect_send_message()
            .withf(|client, msg| *client == 100 && msg.name == b"Work:dir/f".to_vec() && msg.user_data == 7)
            .times(2)
            .return_const(true);

        assert_eq!(registry.fire(1, &transport, &Latin1, "Work"), Delivery::Sent);
        assert_eq!(registry.fire(1, &transport, &Latin1, "Work"), Delivery::Deferred);
        assert_eq!(registry.fire(1, &transport, &Latin1, "Work"), Delivery::Deferred);
        assert_eq!(
            registry.on_reply(1, &transport, &Latin1, "Work"),
            Some(Delivery::Sent)
        );
        assert_eq!(registry.on_reply(1, &transport, &Latin1, "Work"), None);
        assert!(!registry.get(1).expect("node").in_flight);
    }
}
