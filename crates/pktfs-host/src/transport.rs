// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Notify transport for the standalone host. There are no client processes
//! behind the socket, so notifications become log events and messages are
//! acknowledged as soon as they are logged.

use std::sync::OnceLock;

use pktfs_core::{FsHandle, NotifyTransport};
use pktfs_proto::NotifyMessage;
use tracing::info;

#[derive(Default)]
pub struct LoggingTransport {
    handle: OnceLock<FsHandle>,
}

impl LoggingTransport {
    /// Route acknowledgements to the running handle. Only the first call
    /// has an effect.
    pub fn attach(&self, handle: FsHandle) {
        let _ = self.handle.set(handle);
    }
}

impl NotifyTransport for LoggingTransport {
    fn send_message(&self, client: u64, message: NotifyMessage) -> bool {
        info!(
            target: "pktfs::host",
            client,
            notify = message.notify,
            user_data = message.user_data,
            name = %String::from_utf8_lossy(&message.name),
            "notify message"
        );
        if let Some(handle) = self.handle.get() {
            handle.notify_reply(message.notify);
        }
        true
    }

    fn signal(&self, client: u64, signal_bit: u8) {
        info!(target: "pktfs::host", client, signal_bit, "notify signal");
    }
}
