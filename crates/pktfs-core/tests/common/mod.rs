// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use pktfs_core::{Context, FileSystem, FsConfig, MemoryFs, NotifyTransport, Operations};
use pktfs_proto::codes::{NRF_SEND_MESSAGE, SHARED_LOCK};
use pktfs_proto::{
    AddNotifyArgs, FileArgs, LockArgs, NotifyMessage, ObjectArgs, Packet, ReadArgs, Reply,
    WriteArgs,
};

/// Transport that keeps every delivery for inspection
#[derive(Default)]
pub struct RecordingTransport {
    pub messages: Mutex<Vec<(u64, NotifyMessage)>>,
    pub signals: Mutex<Vec<(u64, u8)>>,
}

impl RecordingTransport {
    pub fn messages(&self) -> Vec<(u64, NotifyMessage)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<(u64, u8)> {
        self.signals.lock().unwrap().clone()
    }
}

impl NotifyTransport for RecordingTransport {
    fn send_message(&self, client: u64, message: NotifyMessage) -> bool {
        self.messages.lock().unwrap().push((client, message));
        true
    }

    fn signal(&self, client: u64, signal_bit: u8) {
        self.signals.lock().unwrap().push((client, signal_bit));
    }
}

pub struct Harness {
    pub ctx: Arc<Context>,
    pub mem: Arc<MemoryFs>,
    pub transport: Arc<RecordingTransport>,
    pub fs: FileSystem,
}

impl Harness {
    pub fn new() -> Self {
        let mem = Arc::new(MemoryFs::new("Ram"));
        Self::with_ops(mem.clone(), mem)
    }

    /// Serve `ops`, which is expected to sit on top of `mem`
    pub fn with_ops(mem: Arc<MemoryFs>, ops: Arc<dyn Operations>) -> Self {
        let ctx = Context::init();
        let transport = Arc::new(RecordingTransport::default());
        let fs = FileSystem::new(&ctx, ops, FsConfig::default(), transport.clone())
            .expect("filesystem handle");
        Self {
            ctx,
            mem,
            transport,
            fs,
        }
    }

    pub fn send(&mut self, packet: Packet) -> Reply {
        self.fs.dispatch(packet)
    }

    pub fn locate(&mut self, path: &str, mode: u8) -> Reply {
        self.send(Packet::locate(0, path, mode))
    }

    /// Shared lock key on `path`, panicking on failure
    pub fn lock(&mut self, path: &str) -> u64 {
        let reply = self.locate(path, SHARED_LOCK);
        assert!(reply.is_success(), "locate {} failed: {:?}", path, reply.error());
        reply.res1() as u64
    }

    pub fn free(&mut self, key: u64) -> Reply {
        self.send(Packet::FreeLock(LockArgs { lock: key }))
    }

    pub fn create_dir(&mut self, path: &str) -> Reply {
        self.send(Packet::CreateDir(object(path)))
    }

    pub fn open_new(&mut self, path: &str) -> Reply {
        self.send(Packet::FindOutput(object(path)))
    }

    pub fn open_read(&mut self, path: &str) -> Reply {
        self.send(Packet::FindInput(object(path)))
    }

    pub fn write(&mut self, file: u64, data: &[u8]) -> Reply {
        self.send(Packet::Write(WriteArgs {
            file,
            data: data.to_vec(),
        }))
    }

    pub fn read(&mut self, file: u64, length: u32) -> Reply {
        self.send(Packet::Read(ReadArgs { file, length }))
    }

    pub fn end(&mut self, file: u64) -> Reply {
        self.send(Packet::End(FileArgs { file }))
    }

    pub fn delete(&mut self, path: &str) -> Reply {
        self.send(Packet::DeleteObject(object(path)))
    }

    pub fn add_notify(&mut self, path: &str, client: u64) -> Reply {
        self.send(Packet::AddNotify(AddNotifyArgs {
            name: path.as_bytes().to_vec(),
            flags: NRF_SEND_MESSAGE,
            user_data: 0xfeed,
            client,
            signal_bit: 0,
        }))
    }
}

pub fn object(path: &str) -> ObjectArgs {
    ObjectArgs {
        parent: 0,
        name: path.as_bytes().to_vec(),
    }
}
