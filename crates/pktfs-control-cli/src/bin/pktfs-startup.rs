// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Print the startup and geometry table of a pktfs mount

use anyhow::Result;
use clap::Parser;
use pktfs_control::{fetch_startup, format_startup, MountArgs};

#[derive(Parser, Debug)]
#[command(author, version, about = "Show the startup descriptor of a pktfs mount")]
struct Cli {
    #[command(flatten)]
    mount: MountArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.mount.init_logging("pktfs-startup")?;
    let descriptor = fetch_startup(&cli.mount.socket())?;
    print!("{}", format_startup(&descriptor));
    Ok(())
}
