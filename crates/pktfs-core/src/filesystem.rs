// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem handle: volume lifecycle and the packet loop.
//!
//! A [`FileSystem`] serves one device. It owns the active volume, the stale
//! volumes whose locks are still draining, the auto-flush tracker and the
//! user timer hooks. [`FileSystem::run`] processes packets one at a time and
//! interleaves notify replies, timer ticks and signals. Other threads talk to
//! a running handle through a cloneable [`FsHandle`].
//!
//! Dropping the handle tears the volume down and hands every lock or notify
//! request still outstanding to the orphan collector.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel as chan;
use pktfs_proto::{ErrorCode, Packet, Reply};
use tracing::{debug, info, warn};

use crate::actors::{MountListHandle, OrphanHandle, OrphanVolume, RecordKind};
use crate::autoflush::ModifyTracker;
use crate::charset::Charset;
use crate::config::FsConfig;
use crate::context::{Context, FsId};
use crate::error::SetupError;
use crate::fs_debug;
use crate::notify::NotifyTransport;
use crate::ops::{CallbackAdapter, Operations};
use crate::types::{ConnInfo, TimeSpec};
use crate::volume::{DiskState, Env, Volume};

pub type TimerCallback = Box<dyn FnMut() + Send>;
pub type SignalCallback = Box<dyn FnMut(u32) + Send>;

/// Asynchronous events delivered to a running handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsSignal {
    /// Leave the packet loop
    Break,
    /// The medium may have changed; reprobe it
    DiskChange,
    /// Passed to the user signal callback
    User(u32),
}

struct Timer {
    id: u64,
    period: Duration,
    next: Instant,
    callback: TimerCallback,
}

/// Periodic user callbacks run from the timer tick
#[derive(Default)]
pub struct TimerList {
    timers: Vec<Timer>,
    next_id: u64,
    /// Ids detached by `take_due` and not yet restored
    running: Vec<u64>,
    cancelled: Vec<u64>,
}

impl TimerList {
    pub fn add(&mut self, period: Duration, callback: TimerCallback) -> u64 {
        self.next_id += 1;
        self.timers.push(Timer {
            id: self.next_id,
            period,
            next: Instant::now() + period,
            callback,
        });
        self.next_id
    }

    /// Remove a timer. A timer whose callback is running is dropped once
    /// the callback returns.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        if self.timers.len() != before {
            return true;
        }
        if self.running.contains(&id) && !self.cancelled.contains(&id) {
            self.cancelled.push(id);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.timers.len() + self.running.len() - self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every callback whose deadline has passed. Returns the number run.
    pub fn fire_due(&mut self, now: Instant) -> usize {
        let mut due = self.take_due(now);
        for timer in &mut due {
            (timer.callback)();
        }
        let fired = due.len();
        self.restore(due, now);
        fired
    }

    /// Detach the timers due at `now` so their callbacks can run without
    /// the list borrowed
    fn take_due(&mut self, now: Instant) -> Vec<Timer> {
        let (due, rest): (Vec<Timer>, Vec<Timer>) =
            std::mem::take(&mut self.timers).into_iter().partition(|t| now >= t.next);
        self.timers = rest;
        self.running = due.iter().map(|t| t.id).collect();
        due
    }

    /// Reschedule timers detached by `take_due`, minus those removed meanwhile
    fn restore(&mut self, due: Vec<Timer>, now: Instant) {
        for mut timer in due {
            if self.cancelled.contains(&timer.id) {
                continue;
            }
            timer.next = now + timer.period;
            self.timers.push(timer);
        }
        self.running.clear();
        self.cancelled.clear();
    }
}

/// User hooks shared between the handle and its [`FsHandle`]s
#[derive(Default)]
pub struct Hooks {
    pub timers: TimerList,
    pub signal: Option<SignalCallback>,
    /// Bumped whenever the signal callback is replaced
    signal_epoch: u64,
}

impl Hooks {
    pub fn set_signal(&mut self, callback: Option<SignalCallback>) {
        self.signal = callback;
        self.signal_epoch += 1;
    }
}

struct Envelope {
    packet: Packet,
    reply: chan::Sender<Reply>,
}

struct Channels {
    packets_tx: chan::Sender<Envelope>,
    packets_rx: chan::Receiver<Envelope>,
    replies_tx: chan::Sender<u64>,
    replies_rx: chan::Receiver<u64>,
    signals_tx: chan::Sender<FsSignal>,
    signals_rx: chan::Receiver<FsSignal>,
}

impl Channels {
    fn new() -> Self {
        let (packets_tx, packets_rx) = chan::unbounded();
        let (replies_tx, replies_rx) = chan::unbounded();
        let (signals_tx, signals_rx) = chan::unbounded();
        Self {
            packets_tx,
            packets_rx,
            replies_tx,
            replies_rx,
            signals_tx,
            signals_rx,
        }
    }
}

/// Cloneable client side of a running [`FileSystem`]
#[derive(Clone)]
pub struct FsHandle {
    packets: chan::Sender<Envelope>,
    replies: chan::Sender<u64>,
    signals: chan::Sender<FsSignal>,
    hooks: Arc<Mutex<Hooks>>,
}

impl FsHandle {
    /// Submit a packet and wait for its reply
    pub fn call(&self, packet: Packet) -> Reply {
        let (tx, rx) = chan::bounded(1);
        if self.packets.send(Envelope { packet, reply: tx }).is_err() {
            return Reply::failure(ErrorCode::DeviceNotMounted);
        }
        rx.recv()
            .unwrap_or_else(|_| Reply::failure(ErrorCode::DeviceNotMounted))
    }

    pub fn signal(&self, signal: FsSignal) -> bool {
        self.signals.send(signal).is_ok()
    }

    /// A notify client replied to the message sent for `key`
    pub fn notify_reply(&self, key: u64) -> bool {
        self.replies.send(key).is_ok()
    }

    pub fn add_timer(&self, period: Duration, callback: TimerCallback) -> u64 {
        lock_hooks(&self.hooks).timers.add(period, callback)
    }

    pub fn remove_timer(&self, id: u64) -> bool {
        lock_hooks(&self.hooks).timers.remove(id)
    }

    pub fn set_signal_callback(&self, callback: Option<SignalCallback>) {
        lock_hooks(&self.hooks).set_signal(callback);
    }
}

fn lock_hooks(hooks: &Mutex<Hooks>) -> MutexGuard<'_, Hooks> {
    hooks.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FileSystem {
    pub(crate) id: FsId,
    pub(crate) ctx: Arc<Context>,
    pub(crate) ops: CallbackAdapter,
    pub(crate) config: FsConfig,
    pub(crate) charset: Box<dyn Charset>,
    pub(crate) transport: Arc<dyn NotifyTransport>,
    pub(crate) state: DiskState,
    pub(crate) volume: Option<Volume>,
    pub(crate) stale: Vec<Volume>,
    pub(crate) inhibit_count: u32,
    pub(crate) modify: ModifyTracker,
    pub(crate) running: bool,
    hooks: Arc<Mutex<Hooks>>,
    pub(crate) list: MountListHandle,
    orphans: OrphanHandle,
    device_record: u64,
    channels: Channels,
}

impl FileSystem {
    /// Attach to `ctx`, register the device and mount the volume. A volume
    /// that fails to mount leaves the handle usable with no disk present.
    pub fn new(
        ctx: &Arc<Context>,
        ops: Arc<dyn Operations>,
        config: FsConfig,
        transport: Arc<dyn NotifyTransport>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let attachment = ctx.attach_filesystem()?;
        ctx.debug().reload(&config.debug_env);

        let device_record = attachment.list.add(
            RecordKind::Device,
            &config.device_name,
            Some(attachment.id),
            TimeSpec::now().to_datestamp(),
        );
        let mut fs = Self {
            id: attachment.id,
            ctx: ctx.clone(),
            ops: CallbackAdapter::new(ops, ctx.debug().clone()),
            charset: config.charset.build(),
            modify: ModifyTracker::new(config.flush.policy()),
            config,
            transport,
            state: DiskState::Absent,
            volume: None,
            stale: Vec::new(),
            inhibit_count: 0,
            running: false,
            hooks: Arc::new(Mutex::new(Hooks::default())),
            list: attachment.list,
            orphans: attachment.orphans,
            device_record,
            channels: Channels::new(),
        };
        fs.setup();
        info!(
            target: "pktfs::filesystem",
            fs = %fs.id,
            device = %fs.config.device_name,
            state = ?fs.state,
            "filesystem handle created"
        );
        Ok(fs)
    }

    pub fn id(&self) -> FsId {
        self.id
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn state(&self) -> DiskState {
        self.state
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn stale_volumes(&self) -> &[Volume] {
        &self.stale
    }

    pub fn inhibit_count(&self) -> u32 {
        self.inhibit_count
    }

    pub fn handle(&self) -> FsHandle {
        FsHandle {
            packets: self.channels.packets_tx.clone(),
            replies: self.channels.replies_tx.clone(),
            signals: self.channels.signals_tx.clone(),
            hooks: self.hooks.clone(),
        }
    }

    /// Timer callbacks, under the per-handle mutex
    pub fn timers(&self) -> MutexGuard<'_, Hooks> {
        lock_hooks(&self.hooks)
    }

    pub(crate) fn env(&self) -> Env<'_> {
        Env {
            fs: self.id,
            ctx: &self.ctx,
            ops: &self.ops,
            charset: self.charset.as_ref(),
            transport: self.transport.as_ref(),
            max_path_len: self.config.max_path_len,
        }
    }

    /// The active volume together with the collaborators handlers need
    pub(crate) fn parts(&mut self) -> (Option<&mut Volume>, Env<'_>) {
        let env = Env {
            fs: self.id,
            ctx: &self.ctx,
            ops: &self.ops,
            charset: self.charset.as_ref(),
            transport: self.transport.as_ref(),
            max_path_len: self.config.max_path_len,
        };
        (self.volume.as_mut(), env)
    }

    pub(crate) fn stale_parts(&mut self) -> (&mut Vec<Volume>, Env<'_>) {
        let env = Env {
            fs: self.id,
            ctx: &self.ctx,
            ops: &self.ops,
            charset: self.charset.as_ref(),
            transport: self.transport.as_ref(),
            max_path_len: self.config.max_path_len,
        };
        (&mut self.stale, env)
    }

    /// The mounted volume, or the error describing why there is none
    pub(crate) fn ready(&mut self) -> Result<(&mut Volume, Env<'_>), ErrorCode> {
        match self.state {
            DiskState::Ready => {}
            DiskState::Bad => return Err(ErrorCode::NotADosDisk),
            DiskState::Absent | DiskState::Inhibited => return Err(ErrorCode::NoDisk),
        }
        match self.parts() {
            (Some(volume), env) => Ok((volume, env)),
            (None, _) => Err(ErrorCode::NoDisk),
        }
    }

    /// Mount the volume: `init`, name selection, `statfs` and a root probe
    pub(crate) fn setup(&mut self) {
        let mut conn = ConnInfo::default();
        if let Err(err) = self.ops.init(&mut conn) {
            warn!(target: "pktfs::filesystem", fs = %self.id, error = %err, "init failed");
            self.state = DiskState::Absent;
            return;
        }
        let case_sensitive = self.config.case_sensitive.unwrap_or(conn.case_sensitive);
        let name = conn
            .volume_name
            .filter(|n| !n.is_empty())
            .or_else(|| self.config.volume_name.clone())
            .unwrap_or_else(|| self.config.device_name.clone());

        let probe = self.ops.statfs("/").and_then(|geometry| {
            let root = self.ops.getattr("/")?;
            Ok((geometry, root))
        });
        let (geometry, root) = match probe {
            Ok((geometry, root)) if root.is_dir() => (geometry, root),
            Ok(_) => {
                warn!(target: "pktfs::filesystem", fs = %self.id, "root is not a directory");
                self.ops.destroy();
                self.state = DiskState::Bad;
                return;
            }
            Err(err) => {
                warn!(target: "pktfs::filesystem", fs = %self.id, error = %err, "volume probe failed");
                self.ops.destroy();
                self.state = DiskState::Bad;
                return;
            }
        };

        let date = root.mtime.to_datestamp();
        let mut volume = Volume::new(&name, date, case_sensitive, geometry, self.config.max_path_len);
        if self.config.read_only {
            volume.read_only = true;
        }
        volume.record = Some(self.list.add(RecordKind::Volume, &name, Some(self.id), date));
        info!(
            target: "pktfs::filesystem",
            fs = %self.id,
            volume = %name,
            case_sensitive,
            read_only = volume.read_only,
            "volume mounted"
        );
        self.volume = Some(volume);
        self.state = DiskState::Ready;
    }

    /// Unmount the active volume. Outstanding locks keep it alive on the
    /// stale list until they are freed.
    pub(crate) fn teardown(&mut self) {
        let Some(mut volume) = self.volume.take() else {
            return;
        };
        {
            let env = self.env();
            volume.close_all(&env);
        }
        self.ops.destroy();
        self.modify.reset();
        self.state = DiskState::Absent;

        if volume.in_use() {
            info!(
                target: "pktfs::filesystem",
                fs = %self.id,
                volume = %volume.name,
                locks = volume.locks.len(),
                notifies = volume.notifies.len(),
                "volume unmounted with outstanding handles"
            );
            self.stale.push(volume);
        } else {
            if let Some(record) = volume.record {
                self.list.remove(record);
            }
            info!(target: "pktfs::filesystem", fs = %self.id, volume = %volume.name, "volume unmounted");
        }
    }

    /// Drop a stale volume once its last handle is gone
    pub(crate) fn prune_stale(&mut self) {
        let list = &self.list;
        self.stale.retain(|volume| {
            if volume.in_use() {
                return true;
            }
            if let Some(record) = volume.record {
                list.remove(record);
            }
            debug!(target: "pktfs::filesystem", volume = %volume.name, "stale volume drained");
            false
        });
    }

    /// `fsync` every open file and reset the modify tracker
    pub(crate) fn flush_all(&mut self) -> usize {
        let mut flushed = 0;
        let (volume, env) = self.parts();
        if let Some(volume) = volume {
            for lock in volume.locks.values() {
                let Some(fi) = &lock.file else {
                    continue;
                };
                let path = volume
                    .entries
                    .get(lock.entry)
                    .map(|e| e.path.as_str())
                    .unwrap_or_default();
                match env.ops.fsync(path, fi) {
                    Ok(()) => flushed += 1,
                    Err(err) => {
                        warn!(target: "pktfs::filesystem", path, error = %err, "fsync failed")
                    }
                }
            }
            volume.dirty = false;
        }
        self.modify.reset();
        flushed
    }

    /// Process packets until `Die` or a break signal
    pub fn run(&mut self) {
        let packets = self.channels.packets_rx.clone();
        let replies = self.channels.replies_rx.clone();
        let signals = self.channels.signals_rx.clone();
        let ticker = chan::tick(self.config.flush.tick_interval());

        self.running = true;
        info!(target: "pktfs::filesystem", fs = %self.id, "packet loop started");
        while self.running {
            chan::select! {
                recv(packets) -> msg => match msg {
                    Ok(Envelope { packet, reply }) => {
                        let result = self.dispatch(packet);
                        let _ = reply.send(result);
                    }
                    Err(_) => break,
                },
                recv(replies) -> key => {
                    if let Ok(key) = key {
                        self.on_notify_reply(key);
                    }
                }
                recv(signals) -> signal => {
                    if let Ok(signal) = signal {
                        self.on_signal(signal);
                    }
                }
                recv(ticker) -> tick => {
                    if let Ok(now) = tick {
                        self.on_tick(now);
                    }
                }
            }
        }
        self.running = false;
        info!(target: "pktfs::filesystem", fs = %self.id, "packet loop stopped");
    }

    pub(crate) fn on_notify_reply(&mut self, key: u64) {
        let (volume, env) = self.parts();
        if let Some(volume) = volume {
            let delivery = volume
                .notifies
                .on_reply(key, env.transport, env.charset, &volume.name);
            fs_debug!(env.mask(), notify, key, ?delivery, "notify reply");
        }
    }

    pub(crate) fn on_signal(&mut self, signal: FsSignal) {
        fs_debug!(self.ctx.debug(), general, ?signal, "signal received");
        match signal {
            FsSignal::Break => self.running = false,
            FsSignal::DiskChange => self.disk_change(),
            FsSignal::User(bits) => {
                // Run unlocked so the callback may use the handle's hooks
                let (callback, epoch) = {
                    let mut hooks = lock_hooks(&self.hooks);
                    (hooks.signal.take(), hooks.signal_epoch)
                };
                if let Some(mut callback) = callback {
                    callback(bits);
                    let mut hooks = lock_hooks(&self.hooks);
                    if hooks.signal_epoch == epoch {
                        hooks.signal = Some(callback);
                    }
                }
            }
        }
    }

    /// Periodic work: debug mask reload, auto-flush and user timers
    pub fn on_tick(&mut self, now: Instant) {
        if self.ctx.debug().reload(&self.config.debug_env) {
            info!(target: "pktfs::filesystem", mask = self.ctx.debug().bits(), "debug mask changed");
        }
        if self.modify.due(now) {
            let flushed = self.flush_all();
            fs_debug!(self.ctx.debug(), general, flushed, "auto-flush");
        }
        let mut due = lock_hooks(&self.hooks).timers.take_due(now);
        for timer in &mut due {
            (timer.callback)();
        }
        lock_hooks(&self.hooks).timers.restore(due, now);
    }

    /// Reprobe the medium unless the device is inhibited
    pub(crate) fn disk_change(&mut self) {
        if self.inhibit_count > 0 {
            return;
        }
        self.teardown();
        self.setup();
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        if self.state == DiskState::Ready {
            self.teardown();
        }

        let mut orphaned = Vec::new();
        for volume in std::mem::take(&mut self.stale) {
            let (locks, notifies) = volume.handle_keys();
            let keys: Vec<u64> = locks.iter().chain(notifies.iter()).copied().collect();
            self.ctx.registry().transfer(&keys, self.id);
            orphaned.push(OrphanVolume {
                fs: self.id,
                name: volume.name.clone(),
                record: volume.record,
                locks: locks.into_iter().collect(),
                notifies: notifies.into_iter().collect(),
            });
        }
        if !orphaned.is_empty() && !self.orphans.adopt(orphaned.clone()) {
            warn!(target: "pktfs::filesystem", fs = %self.id, "orphan collector gone, releasing handles");
            for volume in orphaned {
                for key in volume.locks.iter().chain(volume.notifies.iter()) {
                    self.ctx.registry().unregister(*key);
                }
                if let Some(record) = volume.record {
                    self.list.remove(record);
                }
            }
        }

        self.list.remove(self.device_record);
        self.ctx.detach_filesystem(self.id, &self.orphans);
        info!(target: "pktfs::filesystem", fs = %self.id, "filesystem handle destroyed");
    }
}
