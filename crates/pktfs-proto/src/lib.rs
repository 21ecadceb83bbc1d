// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! pktfs Protocol: disk-packet wire types and control framing
//!
//! This crate defines the action codes, packet argument layouts, replies and
//! native result codes of the disk-packet protocol, plus the SSZ control
//! messages exchanged with a running host over its control socket.

pub mod codes;
pub mod messages;
pub mod validation;

// Re-export key types
pub use codes::{Action, ErrorCode, DOSFALSE, DOSTRUE};
pub use messages::{
    AddNotifyArgs, ChangeModeArgs, ControlRequest, ControlResponse, DateStamp, DosEnvironment,
    Empty, ErrorResponse, ExAllEntry, ExamineAllArgs, FileArgs, FileInfoBlock, FormatArgs,
    InfoData, InhibitArgs, LocateArgs, LockArgs, MakeLinkArgs, NotifyMessage, ObjectArgs, Packet,
    ReadArgs, ReadLinkArgs, RemoveNotifyArgs, RenameArgs, RenameDiskArgs, Reply, ReplyPayload,
    SameLockArgs, SeekArgs, SetCommentArgs, SetDateArgs, SetOwnerArgs, SetProtectArgs,
    StartupDescriptor, VolumeInfo, WriteArgs, WriteProtectArgs,
};
pub use validation::*;
