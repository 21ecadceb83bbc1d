// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client side of the pktfs host control socket, shared by `pktfs-die` and
//! `pktfs-startup`.

use std::fmt::Write as _;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Args;
use pktfs_logging::{CliLogLevel, CliLoggingArgs};
use pktfs_proto::{
    read_frame, write_frame, ControlRequest, ControlResponse, Packet, Reply, StartupDescriptor,
};
use tracing::debug;

/// Arguments common to every utility
#[derive(Args, Debug)]
pub struct MountArgs {
    /// Device name of the mount (e.g. PKT0 or PKT0:)
    pub mount: String,

    /// Directory holding the host control sockets (default: <runtime dir>/pktfs)
    #[arg(long)]
    pub socket_dir: Option<PathBuf>,

    #[command(flatten)]
    pub logging: CliLoggingArgs,
}

impl MountArgs {
    pub fn socket(&self) -> PathBuf {
        pktfs_core::config::socket_path(self.socket_dir.as_deref(), &self.mount)
    }

    /// Install logging for `component`; quiet unless asked otherwise
    pub fn init_logging(&self, component: &str) -> Result<()> {
        self.logging
            .clone()
            .init_with_default_level(component, CliLogLevel::Warn)
    }
}

pub fn send_request(socket: &Path, request: &ControlRequest) -> Result<ControlResponse> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("no pktfs host listening on {}", socket.display()))?;
    debug!(target: "pktfs::control", socket = %socket.display(), ?request, "sending request");
    write_frame(&mut stream, request).context("sending control request")?;
    let response = read_frame(&mut stream).context("reading control response")?;
    Ok(response)
}

/// Send one packet; a failed reply is returned as an error
pub fn send_packet(socket: &Path, packet: Packet) -> Result<Reply> {
    let action = packet.action().name();
    match send_request(socket, &ControlRequest::packet(packet))? {
        ControlResponse::Reply(reply) if reply.is_success() => Ok(reply),
        ControlResponse::Reply(reply) => match reply.error() {
            Some(code) => Err(anyhow!("{} failed: {} (code={})", action, code, code.code())),
            None => Err(anyhow!("{} failed (code={})", action, reply.res2)),
        },
        ControlResponse::Error(err) => Err(anyhow!(
            "{} rejected: {} (errno={})",
            action,
            String::from_utf8_lossy(&err.error),
            err.code.unwrap_or_default()
        )),
        other => Err(anyhow!("unexpected response: {:?}", other)),
    }
}

pub fn fetch_startup(socket: &Path) -> Result<StartupDescriptor> {
    match send_request(socket, &ControlRequest::startup_info())? {
        ControlResponse::Startup(descriptor) => Ok(descriptor),
        ControlResponse::Error(err) => Err(anyhow!(
            "startup_info failed: {} (errno={})",
            String::from_utf8_lossy(&err.error),
            err.code.unwrap_or_default()
        )),
        other => Err(anyhow!("unexpected response: {:?}", other)),
    }
}

/// One `KEY=value` line per field of the descriptor
pub fn format_startup(descriptor: &StartupDescriptor) -> String {
    let env = &descriptor.environment;
    let fields: [(&str, u32); 17] = [
        ("DE_TABLESIZE", env.table_size),
        ("DE_SIZEBLOCK", env.size_block),
        ("DE_SECORG", env.sec_org),
        ("DE_NUMHEADS", env.surfaces),
        ("DE_SECSPERBLK", env.sectors_per_block),
        ("DE_BLKSPERTRACK", env.blocks_per_track),
        ("DE_RESERVEDBLKS", env.reserved),
        ("DE_PREFAC", env.pre_alloc),
        ("DE_INTERLEAVE", env.interleave),
        ("DE_LOWCYL", env.low_cyl),
        ("DE_UPPERCYL", env.high_cyl),
        ("DE_NUMBUFFERS", env.num_buffers),
        ("DE_BUFMEMTYPE", env.buf_mem_type),
        ("DE_MAXTRANSFER", env.max_transfer),
        ("DE_MASK", env.mask),
        ("DE_BOOTPRI", env.boot_pri),
        ("DE_DOSTYPE", env.dos_type),
    ];

    let mut out = String::new();
    let _ = writeln!(out, "DEVICE={}:", String::from_utf8_lossy(&descriptor.device));
    let _ = writeln!(out, "UNIT={}", descriptor.unit);
    let _ = writeln!(out, "FLAGS=0x{:08x}", descriptor.flags);
    for (name, value) in fields {
        let _ = writeln!(out, "{}=0x{:08x}", name, value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktfs_proto::{DosEnvironment, ErrorCode};
    use std::os::unix::net::UnixListener;
    use std::thread;

    /// Answer a single request on `path` with `response`
    fn serve_once(path: &Path, response: ControlResponse) -> thread::JoinHandle<ControlRequest> {
        let listener = UnixListener::bind(path).expect("bind");
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request: ControlRequest = read_frame(&mut stream).expect("read");
            write_frame(&mut stream, &response).expect("write");
            request
        })
    }

    #[test]
    fn test_send_packet_maps_failure_reply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("PKT0.sock");
        let server = serve_once(
            &path,
            ControlResponse::reply(Reply::failure(ErrorCode::ObjectInUse)),
        );
        let err = send_packet(&path, Packet::die()).expect_err("failure reply");
        assert!(err.to_string().contains("object in use"), "{}", err);
        assert_eq!(server.join().expect("server"), ControlRequest::packet(Packet::die()));
    }

    #[test]
    fn test_fetch_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("PKT0.sock");
        let descriptor = StartupDescriptor {
            device: b"PKT0".to_vec(),
            unit: 2,
            flags: 0,
            environment: DosEnvironment::default(),
        };
        let server = serve_once(&path, ControlResponse::startup(descriptor.clone()));
        assert_eq!(fetch_startup(&path).expect("startup"), descriptor);
        assert_eq!(server.join().expect("server"), ControlRequest::startup_info());

        let text = format_startup(&descriptor);
        assert!(text.starts_with("DEVICE=PKT0:\nUNIT=2\n"));
        assert!(text.contains("DE_TABLESIZE=0x00000010\n"));
        assert_eq!(text.lines().count(), 20);
    }

    #[test]
    fn test_missing_host_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("NONE.sock");
        let err = fetch_startup(&path).expect_err("no host");
        assert!(err.to_string().contains("no pktfs host listening"));
    }

    #[test]
    fn test_socket_path_from_mount_args() {
        let args = MountArgs {
            mount: "Work:".to_string(),
            socket_dir: Some(PathBuf::from("/run/pktfs")),
            logging: CliLoggingArgs::default(),
        };
        assert_eq!(args.socket(), PathBuf::from("/run/pktfs/Work.sock"));
    }
}
