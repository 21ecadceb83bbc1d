// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Volume-level actions: Info, DiskInfo, CurrentVolume, Inhibit,
//! WriteProtect, Format and RenameDisk

use pktfs_proto::codes::{
    ID_BUSY, ID_DOS_DISK, ID_NOT_REALLY_DOS, ID_NO_DISK_PRESENT, ID_VALIDATED, ID_WRITE_PROTECTED,
};
use pktfs_proto::{ErrorCode, InfoData, Reply, ReplyPayload, VolumeInfo};
use tracing::{info, warn};

use super::{decode, HandlerResult};
use crate::actors::MountListHandle;
use crate::filesystem::FileSystem;
use crate::volume::{DiskState, Env, Volume};

/// Disk statistics of a mounted volume, from a fresh `statfs` when the
/// backing layer answers
pub(super) fn info(vol: &Volume, env: &Env<'_>, unit: u32) -> Reply {
    let geometry = match env.ops.statfs("/") {
        Ok(geometry) => geometry,
        Err(err) => {
            warn!(target: "pktfs::dispatch", error = %err, "statfs failed, using mount geometry");
            vol.geometry.clone()
        }
    };
    let data = InfoData {
        num_soft_errors: 0,
        unit_number: unit,
        disk_state: if vol.is_writable() {
            ID_VALIDATED
        } else {
            ID_WRITE_PROTECTED
        },
        num_blocks: geometry.blocks,
        num_blocks_used: geometry.blocks.saturating_sub(geometry.bfree),
        bytes_per_block: geometry.bsize,
        disk_type: ID_DOS_DISK,
        in_use: vol.in_use(),
    };
    Reply::success().with_payload(ReplyPayload::Info(data))
}

pub(super) fn write_protect(vol: &mut Volume, protect: bool, passkey: u32) -> HandlerResult {
    if protect {
        if vol.write_protected {
            return Err(ErrorCode::ObjectInUse);
        }
        vol.write_protected = true;
        vol.passkey = passkey;
    } else if vol.write_protected {
        if vol.passkey != 0 && vol.passkey != passkey {
            return Err(ErrorCode::WriteProtected);
        }
        vol.write_protected = false;
        vol.passkey = 0;
    }
    Ok(Reply::success())
}

pub(super) fn relabel(
    vol: &mut Volume,
    env: &Env<'_>,
    list: &MountListHandle,
    name: &[u8],
) -> HandlerResult {
    vol.check_writable()?;
    let name = decode(env, name)?;
    if name.is_empty() || name.contains(&[':', '/'][..]) {
        return Err(ErrorCode::InvalidComponentName);
    }
    env.ops.relabel(&name)?;
    if let Some(record) = vol.record {
        list.rename(record, &name);
    }
    info!(target: "pktfs::dispatch", from = %vol.name, to = %name, "volume relabelled");
    vol.name = name;
    Ok(Reply::success())
}

impl FileSystem {
    pub(super) fn disk_info(&mut self) -> Reply {
        let unit = self.config.startup.unit;
        let state = self.state;
        if let Ok((vol, env)) = self.ready() {
            return info(vol, &env, unit);
        }
        let disk_type = match state {
            DiskState::Inhibited => ID_BUSY,
            DiskState::Bad => ID_NOT_REALLY_DOS,
            DiskState::Absent | DiskState::Ready => ID_NO_DISK_PRESENT,
        };
        let data = InfoData {
            unit_number: unit,
            disk_state: ID_VALIDATED,
            disk_type,
            ..Default::default()
        };
        Reply::success().with_payload(ReplyPayload::Info(data))
    }

    pub(super) fn current_volume(&mut self) -> HandlerResult {
        let unit = self.config.startup.unit;
        let name = match (&self.volume, self.state) {
            (Some(vol), DiskState::Ready) => (vol.name.clone(), vol.date),
            _ => return Err(ErrorCode::NoDisk),
        };
        let info = VolumeInfo {
            name: self.charset.encode(&name.0),
            date: name.1,
            unit,
        };
        Ok(Reply::success().with_payload(ReplyPayload::Volume(info)))
    }

    /// Refcounted: the first inhibit unmounts, the last uninhibit remounts
    pub(super) fn inhibit(&mut self, on: bool) -> HandlerResult {
        if on {
            self.inhibit_count += 1;
            if self.inhibit_count == 1 {
                self.teardown();
                self.state = DiskState::Inhibited;
                info!(target: "pktfs::filesystem", fs = %self.id, "device inhibited");
            }
        } else if self.inhibit_count > 0 {
            self.inhibit_count -= 1;
            if self.inhibit_count == 0 {
                self.state = DiskState::Absent;
                self.setup();
                info!(target: "pktfs::filesystem", fs = %self.id, state = ?self.state, "device uninhibited");
            }
        }
        Ok(Reply::success())
    }

    pub(super) fn format(&mut self, name: &[u8], dos_type: u32) -> HandlerResult {
        if self.inhibit_count == 0 {
            return Err(ErrorCode::ObjectInUse);
        }
        let name = self.charset.decode(name)?;
        self.ops.format(&name, dos_type)?;
        info!(target: "pktfs::filesystem", fs = %self.id, volume = %name, dos_type, "volume formatted");
        Ok(Reply::success())
    }
}
