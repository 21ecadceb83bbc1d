// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Control socket server. Each connection carries a sequence of framed
//! `ControlRequest`s; connections are served one at a time and the server
//! stops after answering `Die`.

use std::fs;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context as _, Result};
use crossbeam_channel as chan;
use pktfs_core::{Context, FileSystem, FsConfig, FsHandle, NotifyTransport, Operations, Route};
use pktfs_proto::{
    read_frame, validate_request, write_frame, ControlRequest, ControlResponse, FrameError,
    Packet, StartupDescriptor,
};
use tracing::{debug, error, info, warn};

/// Startup descriptor reported for `config`
pub fn startup_descriptor(config: &FsConfig) -> StartupDescriptor {
    StartupDescriptor {
        device: config.device_name.clone().into_bytes(),
        unit: config.startup.unit,
        flags: config.startup.flags,
        environment: config.startup.environment.clone(),
    }
}

/// Create the filesystem handle on its own thread and run its packet loop
/// there. Returns once the handle is mounted (or failed to set up).
pub fn start_filesystem(
    ctx: &Arc<Context>,
    ops: Arc<dyn Operations>,
    config: FsConfig,
    transport: Arc<dyn NotifyTransport>,
) -> Result<(FsHandle, JoinHandle<()>)> {
    let (ready_tx, ready_rx) = chan::bounded(1);
    let ctx = ctx.clone();
    let name = format!("pktfs-{}", config.device_name);
    let worker = thread::Builder::new().name(name).spawn(move || {
        match FileSystem::new(&ctx, ops, config, transport) {
            Ok(mut fs) => {
                let _ = ready_tx.send(Ok(fs.handle()));
                fs.run();
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    })?;
    let handle = ready_rx
        .recv()
        .map_err(|_| anyhow!("filesystem thread exited during setup"))?
        .context("failed to create filesystem handle")?;
    Ok((handle, worker))
}

pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    ctx: Arc<Context>,
    handle: FsHandle,
    startup: StartupDescriptor,
}

impl ControlServer {
    /// Listen on `path`, replacing a stale socket left by an earlier host
    pub fn bind(
        path: &Path,
        ctx: Arc<Context>,
        handle: FsHandle,
        startup: StartupDescriptor,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating socket directory {}", parent.display()))?;
        }
        match fs::remove_file(path) {
            Ok(()) => warn!(target: "pktfs::host", path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("removing stale socket"),
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("binding control socket {}", path.display()))?;
        info!(target: "pktfs::host", path = %path.display(), "control socket listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            ctx,
            handle,
            startup,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until a client sends `Die`
    pub fn serve(&self) -> Result<()> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(target: "pktfs::host", error = %e, "accept failed");
                    continue;
                }
            };
            match self.serve_connection(stream) {
                Ok(true) => {
                    info!(target: "pktfs::host", "die requested, stopping");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => error!(target: "pktfs::host", error = %e, "connection failed"),
            }
        }
        Ok(())
    }

    /// Returns true once `Die` has been answered
    fn serve_connection(&self, mut stream: UnixStream) -> Result<bool> {
        loop {
            let (response, stop) = match read_frame::<_, ControlRequest>(&mut stream) {
                Ok(request) => self.handle_request(request),
                Err(FrameError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(false)
                }
                // The frame was consumed whole, so the stream is still in step
                Err(FrameError::Invalid(e)) => (
                    ControlResponse::error(e.to_string(), Some(libc::EINVAL as u32)),
                    false,
                ),
                Err(e) => return Err(e.into()),
            };
            write_frame(&mut stream, &response)?;
            if stop {
                return Ok(true);
            }
        }
    }

    /// Answer one request. The flag is set when the request was `Die`.
    pub fn handle_request(&self, request: ControlRequest) -> (ControlResponse, bool) {
        if let Err(e) = validate_request(&request) {
            warn!(target: "pktfs::host", error = %e, "rejected control request");
            return (
                ControlResponse::error(e.to_string(), Some(libc::EINVAL as u32)),
                false,
            );
        }
        match request {
            ControlRequest::StartupInfo(_) => {
                (ControlResponse::startup(self.startup.clone()), false)
            }
            ControlRequest::Packet((_, packet)) => {
                let die = matches!(packet, Packet::Die(_));
                let action = packet.action();
                let reply = match self.ctx.route(&packet) {
                    Route::Orphans => self.ctx.submit_to_orphans(packet),
                    Route::Filesystem(_) | Route::Unowned => self.handle.call(packet),
                };
                debug!(
                    target: "pktfs::host",
                    action = action.name(),
                    res1 = reply.res1(),
                    "control packet"
                );
                let stop = die && reply.is_success();
                (ControlResponse::reply(reply), stop)
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktfs_core::{FsSignal, MemoryFs, NullTransport};
    use pktfs_proto::codes::SHARED_LOCK;
    use pktfs_proto::{ErrorCode, LockArgs};

    struct Fixture {
        ctx: Arc<Context>,
        handle: FsHandle,
        worker: JoinHandle<()>,
        _dir: tempfile::TempDir,
        server: ControlServer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = Context::init();
        let config = FsConfig {
            device_name: "TST".to_string(),
            ..Default::default()
        };
        let startup = startup_descriptor(&config);
        let (handle, worker) = start_filesystem(
            &ctx,
            Arc::new(MemoryFs::new("Test")),
            config,
            Arc::new(NullTransport),
        )
        .expect("start");
        let path = pktfs_core::config::socket_path(Some(dir.path()), "TST:");
        let server =
            ControlServer::bind(&path, ctx.clone(), handle.clone(), startup).expect("bind");
        Fixture {
            ctx,
            handle,
            worker,
            _dir: dir,
            server,
        }
    }

    fn roundtrip(path: &Path, requests: &[ControlRequest]) -> Vec<ControlResponse> {
        let mut stream = UnixStream::connect(path).expect("connect");
        requests
            .iter()
            .map(|request| {
                write_frame(&mut stream, request).expect("write");
                read_frame(&mut stream).expect("read")
            })
            .collect()
    }

    #[test]
    fn test_startup_info_reports_configured_device() {
        let f = fixture();
        let (response, stop) = f.server.handle_request(ControlRequest::startup_info());
        assert!(!stop);
        match response {
            ControlResponse::Startup(descriptor) => {
                assert_eq!(descriptor.device, b"TST".to_vec());
                assert_eq!(descriptor.environment.table_size, 16);
            }
            other => panic!("unexpected response: {:?}", other),
        }
        f.handle.signal(FsSignal::Break);
        f.worker.join().expect("join");
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let f = fixture();
        let (response, _) = f
            .server
            .handle_request(ControlRequest::StartupInfo(b"7".to_vec()));
        match response {
            ControlResponse::Error(err) => assert_eq!(err.code, Some(libc::EINVAL as u32)),
            other => panic!("unexpected response: {:?}", other),
        }
        f.handle.signal(FsSignal::Break);
        f.worker.join().expect("join");
    }

    #[test]
    fn test_packets_over_socket_until_die() {
        let f = fixture();
        let path = f.server.path().to_path_buf();
        let client = thread::spawn(move || {
            let responses = roundtrip(
                &path,
                &[ControlRequest::packet(Packet::locate(0, "", SHARED_LOCK))],
            );
            let lock = match &responses[0] {
                ControlResponse::Reply(reply) if reply.is_success() => reply.res1() as u64,
                other => panic!("unexpected response: {:?}", other),
            };
            roundtrip(
                &path,
                &[
                    ControlRequest::packet(Packet::FreeLock(LockArgs { lock })),
                    ControlRequest::packet(Packet::FreeLock(LockArgs { lock })),
                    ControlRequest::packet(Packet::die()),
                ],
            )
        });

        f.server.serve().expect("serve");
        let responses = client.join().expect("client");
        let replies: Vec<_> = responses
            .into_iter()
            .map(|r| match r {
                ControlResponse::Reply(reply) => reply,
                other => panic!("unexpected response: {:?}", other),
            })
            .collect();
        assert!(replies[0].is_success());
        assert_eq!(replies[1].error(), Some(ErrorCode::InvalidLock));
        assert!(replies[2].is_success());

        f.worker.join().expect("join");
        assert_eq!(
            f.handle.call(Packet::die()).error(),
            Some(ErrorCode::DeviceNotMounted)
        );
        drop(f.server);
        f.ctx.shutdown();
    }
}
