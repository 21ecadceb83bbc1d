// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! pktfs Host: serves one in-memory volume through the disk-packet protocol
//!
//! Packets arrive over a Unix control socket at
//! `<runtime_dir>/pktfs/<mount>.sock` and are answered by a filesystem
//! handle running on its own thread.

mod server;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use pktfs_core::{config, Context, FsConfig, FsSignal, MemoryFs};
use pktfs_logging::CliLoggingArgs;
use server::ControlServer;
use tracing::info;
use transport::LoggingTransport;

#[derive(Parser)]
#[command(author, version, about = "Serve an in-memory pktfs volume on a control socket")]
struct Args {
    /// Device name to serve (trailing colon optional)
    mount: String,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the control socket (default: <runtime dir>/pktfs)
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.clone().init("pktfs-host")?;

    let mut config = FsConfig::load(args.config.as_deref()).context("loading configuration")?;
    config.device_name = args.mount.trim_end_matches(':').to_string();
    config.validate()?;
    info!(target: "pktfs::host", ?config, "configuration loaded");

    let label = config.volume_name.clone().unwrap_or_else(|| config.device_name.clone());
    let mut ops = MemoryFs::new(&label).read_only(config.read_only);
    if let Some(case_sensitive) = config.case_sensitive {
        ops = ops.case_sensitive(case_sensitive);
    }

    let ctx = Context::init();
    let transport = Arc::new(LoggingTransport::default());
    let startup = server::startup_descriptor(&config);
    let socket = config::socket_path(args.socket_dir.as_deref(), &config.device_name);
    let (handle, worker) =
        server::start_filesystem(&ctx, Arc::new(ops), config, transport.clone())?;
    transport.attach(handle.clone());

    let result = ControlServer::bind(&socket, ctx.clone(), handle.clone(), startup)
        .and_then(|server| server.serve());

    // The loop has already stopped if Die was served
    handle.signal(FsSignal::Break);
    worker
        .join()
        .map_err(|_| anyhow!("filesystem thread panicked"))?;
    ctx.shutdown();
    info!(target: "pktfs::host", "host stopped");
    result
}
