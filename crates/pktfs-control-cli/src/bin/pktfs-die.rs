// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Ask a running pktfs host to shut its filesystem down

use anyhow::Result;
use clap::Parser;
use pktfs_control::{send_packet, MountArgs};
use pktfs_proto::Packet;

#[derive(Parser, Debug)]
#[command(author, version, about = "Send Die to a pktfs mount")]
struct Cli {
    #[command(flatten)]
    mount: MountArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.mount.init_logging("pktfs-die")?;
    send_packet(&cli.mount.socket(), Packet::die())?;
    println!("DIE_OK");
    Ok(())
}
