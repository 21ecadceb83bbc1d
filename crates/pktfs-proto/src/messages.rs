// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Packet, reply and control-socket message types for pktfs

use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};

use crate::codes::{Action, ErrorCode, DOSFALSE, DOSTRUE};

// Lock and file keys are u64 with 0 standing for "no lock" (the volume root).
// Names are raw bytes in the client's codepage.

/// One protocol request, one variant per action code
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[ssz(enum_behaviour = "union")]
pub enum Packet {
    Die(Empty),
    CurrentVolume(Empty),
    LocateObject(LocateArgs),
    RenameDisk(RenameDiskArgs),
    FreeLock(LockArgs),
    DeleteObject(ObjectArgs),
    RenameObject(RenameArgs),
    CopyDir(LockArgs),
    SetProtect(SetProtectArgs),
    CreateDir(ObjectArgs),
    ExamineObject(LockArgs),
    ExamineNext(LockArgs),
    DiskInfo(Empty),
    Info(LockArgs),
    Flush(Empty),
    SetComment(SetCommentArgs),
    Parent(LockArgs),
    Inhibit(InhibitArgs),
    DiskChange(Empty),
    SetDate(SetDateArgs),
    SameLock(SameLockArgs),
    Read(ReadArgs),
    Write(WriteArgs),
    FindUpdate(ObjectArgs),
    FindInput(ObjectArgs),
    FindOutput(ObjectArgs),
    End(FileArgs),
    Seek(SeekArgs),
    Format(FormatArgs),
    MakeLink(MakeLinkArgs),
    SetFileSize(SeekArgs),
    WriteProtect(WriteProtectArgs),
    ReadLink(ReadLinkArgs),
    FhFromLock(LockArgs),
    IsFilesystem(Empty),
    ChangeMode(ChangeModeArgs),
    CopyDirFh(FileArgs),
    ParentFh(FileArgs),
    ExamineAll(ExamineAllArgs),
    ExamineFh(FileArgs),
    ExamineAllEnd(LockArgs),
    SetOwner(SetOwnerArgs),
    AddNotify(AddNotifyArgs),
    RemoveNotify(RemoveNotifyArgs),
}

/// Argument block for actions without arguments
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct Empty {}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LockArgs {
    pub lock: u64,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FileArgs {
    pub file: u64,
}

/// A name relative to a parent lock
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ObjectArgs {
    pub parent: u64,
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct LocateArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub mode: u8,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct RenameArgs {
    pub src_parent: u64,
    pub src_name: Vec<u8>,
    pub dst_parent: u64,
    pub dst_name: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct RenameDiskArgs {
    pub name: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SetProtectArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub protection: u32,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SetCommentArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub comment: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SetDateArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub date: DateStamp,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SetOwnerArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct InhibitArgs {
    pub inhibit: bool,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SameLockArgs {
    pub first: u64,
    pub second: u64,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ReadArgs {
    pub file: u64,
    pub length: u32,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct WriteArgs {
    pub file: u64,
    pub data: Vec<u8>,
}

/// Seek and SetFileSize arguments. `offset` is a two's-complement i64.
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct SeekArgs {
    pub file: u64,
    pub offset: u64,
    pub origin: u8,
}

impl SeekArgs {
    pub fn new(file: u64, offset: i64, origin: u8) -> Self {
        Self {
            file,
            offset: offset as u64,
            origin,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset as i64
    }
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct FormatArgs {
    pub name: Vec<u8>,
    pub dos_type: u32,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct MakeLinkArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub soft: bool,
    /// Lock on the hard link target
    pub target_lock: u64,
    /// Path of the soft link target
    pub target_path: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct WriteProtectArgs {
    pub protect: bool,
    pub passkey: u32,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ReadLinkArgs {
    pub parent: u64,
    pub name: Vec<u8>,
    pub buffer_size: u32,
}

/// ChangeMode works on lock and file keys alike
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ChangeModeArgs {
    pub handle: u64,
    pub mode: u8,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ExamineAllArgs {
    pub lock: u64,
    pub buffer_size: u32,
    pub data_type: u8,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct AddNotifyArgs {
    /// Full path, optionally prefixed with the volume name
    pub name: Vec<u8>,
    pub flags: u32,
    pub user_data: u64,
    /// Client port the message or signal goes to
    pub client: u64,
    pub signal_bit: u8,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct RemoveNotifyArgs {
    pub notify: u64,
}

/// Days since 1978-01-01, minutes past midnight, 1/50 s ticks past the minute
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Encode, Decode, Serialize, Deserialize,
)]
pub struct DateStamp {
    pub days: u32,
    pub minute: u32,
    pub tick: u32,
}

impl Packet {
    pub fn action(&self) -> Action {
        match self {
            Packet::Die(_) => Action::Die,
            Packet::CurrentVolume(_) => Action::CurrentVolume,
            Packet::LocateObject(_) => Action::LocateObject,
            Packet::RenameDisk(_) => Action::RenameDisk,
            Packet::FreeLock(_) => Action::FreeLock,
            Packet::DeleteObject(_) => Action::DeleteObject,
            Packet::RenameObject(_) => Action::RenameObject,
            Packet::CopyDir(_) => Action::CopyDir,
            Packet::SetProtect(_) => Action::SetProtect,
            Packet::CreateDir(_) => Action::CreateDir,
            Packet::ExamineObject(_) => Action::ExamineObject,
            Packet::ExamineNext(_) => Action::ExamineNext,
            Packet::DiskInfo(_) => Action::DiskInfo,
            Packet::Info(_) => Action::Info,
            Packet::Flush(_) => Action::Flush,
            Packet::SetComment(_) => Action::SetComment,
            Packet::Parent(_) => Action::Parent,
            Packet::Inhibit(_) => Action::Inhibit,
            Packet::DiskChange(_) => Action::DiskChange,
            Packet::SetDate(_) => Action::SetDate,
            Packet::SameLock(_) => Action::SameLock,
            Packet::Read(_) => Action::Read,
            Packet::Write(_) => Action::Write,
            Packet::FindUpdate(_) => Action::FindUpdate,
            Packet::FindInput(_) => Action::FindInput,
            Packet::FindOutput(_) => Action::FindOutput,
            Packet::End(_) => Action::End,
            Packet::Seek(_) => Action::Seek,
            Packet::Format(_) => Action::Format,
            Packet::MakeLink(_) => Action::MakeLink,
            Packet::SetFileSize(_) => Action::SetFileSize,
            Packet::WriteProtect(_) => Action::WriteProtect,
            Packet::ReadLink(_) => Action::ReadLink,
            Packet::FhFromLock(_) => Action::FhFromLock,
            Packet::IsFilesystem(_) => Action::IsFilesystem,
            Packet::ChangeMode(_) => Action::ChangeMode,
            Packet::CopyDirFh(_) => Action::CopyDirFh,
            Packet::ParentFh(_) => Action::ParentFh,
            Packet::ExamineAll(_) => Action::ExamineAll,
            Packet::ExamineFh(_) => Action::ExamineFh,
            Packet::ExamineAllEnd(_) => Action::ExamineAllEnd,
            Packet::SetOwner(_) => Action::SetOwner,
            Packet::AddNotify(_) => Action::AddNotify,
            Packet::RemoveNotify(_) => Action::RemoveNotify,
        }
    }

    /// Key of the lock, file or notify request this packet addresses, if any.
    /// Used to route packets for orphaned resources.
    pub fn target_key(&self) -> Option<u64> {
        match self {
            Packet::FreeLock(a)
            | Packet::CopyDir(a)
            | Packet::ExamineObject(a)
            | Packet::ExamineNext(a)
            | Packet::Info(a)
            | Packet::Parent(a)
            | Packet::FhFromLock(a)
            | Packet::ExamineAllEnd(a) => Some(a.lock),
            Packet::End(a) | Packet::CopyDirFh(a) | Packet::ParentFh(a) | Packet::ExamineFh(a) => {
                Some(a.file)
            }
            Packet::Read(a) => Some(a.file),
            Packet::Write(a) => Some(a.file),
            Packet::Seek(a) | Packet::SetFileSize(a) => Some(a.file),
            Packet::ChangeMode(a) => Some(a.handle),
            Packet::ExamineAll(a) => Some(a.lock),
            Packet::RemoveNotify(a) => Some(a.notify),
            _ => None,
        }
        .filter(|key| *key != 0)
    }

    pub fn die() -> Self {
        Packet::Die(Empty {})
    }

    pub fn locate(parent: u64, name: &str, mode: u8) -> Self {
        Packet::LocateObject(LocateArgs {
            parent,
            name: name.as_bytes().to_vec(),
            mode,
        })
    }

    pub fn free_lock(lock: u64) -> Self {
        Packet::FreeLock(LockArgs { lock })
    }
}

/// Answer to one packet
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct Reply {
    /// Primary result, a two's-complement i64
    pub res1: u64,
    /// Secondary result, a native error code or 0
    pub res2: u32,
    pub payload: ReplyPayload,
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[ssz(enum_behaviour = "union")]
pub enum ReplyPayload {
    None(Empty),
    Data(Vec<u8>),
    FileInfo(FileInfoBlock),
    Entries(Vec<ExAllEntry>),
    Info(InfoData),
    Volume(VolumeInfo),
}

impl Reply {
    pub fn new(res1: i64, res2: u32) -> Self {
        Self {
            res1: res1 as u64,
            res2,
            payload: ReplyPayload::None(Empty {}),
        }
    }

    pub fn success() -> Self {
        Self::new(DOSTRUE, 0)
    }

    pub fn failure(code: ErrorCode) -> Self {
        Self::new(DOSFALSE, code.code())
    }

    /// Primary result carrying a count or a key
    pub fn value(value: i64) -> Self {
        Self::new(value, 0)
    }

    pub fn with_payload(mut self, payload: ReplyPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn res1(&self) -> i64 {
        self.res1 as i64
    }

    pub fn error(&self) -> Option<ErrorCode> {
        if self.res2 == 0 {
            None
        } else {
            ErrorCode::from_code(self.res2)
        }
    }

    pub fn is_success(&self) -> bool {
        self.res1() != DOSFALSE
    }
}

#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct FileInfoBlock {
    pub disk_key: u64,
    pub object_type: u8,
    pub name: Vec<u8>,
    pub protection: u32,
    pub size: u64,
    pub blocks: u64,
    pub date: DateStamp,
    pub comment: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
}

/// One ExamineAll record. Fields beyond the requested data type stay zeroed.
#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct ExAllEntry {
    pub name: Vec<u8>,
    pub object_type: u8,
    pub size: u64,
    pub protection: u32,
    pub date: DateStamp,
    pub comment: Vec<u8>,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct InfoData {
    pub num_soft_errors: u32,
    pub unit_number: u32,
    pub disk_state: u32,
    pub num_blocks: u64,
    pub num_blocks_used: u64,
    pub bytes_per_block: u32,
    pub disk_type: u32,
    pub in_use: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Encode, Decode)]
pub struct VolumeInfo {
    pub name: Vec<u8>,
    pub date: DateStamp,
    pub unit: u32,
}

/// Message delivered to a notify client
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct NotifyMessage {
    pub notify: u64,
    pub user_data: u64,
    pub name: Vec<u8>,
}

/// Request sent over the host's control socket
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[ssz(enum_behaviour = "union")]
pub enum ControlRequest {
    Packet((Vec<u8>, Packet)), // (version, packet)
    StartupInfo(Vec<u8>),      // version
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
#[ssz(enum_behaviour = "union")]
pub enum ControlResponse {
    Reply(Reply),
    Startup(StartupDescriptor),
    Error(ErrorResponse),
}

#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct ErrorResponse {
    pub error: Vec<u8>,
    pub code: Option<u32>,
}

/// Startup and geometry table describing the mounted device
#[derive(Clone, Debug, PartialEq, Encode, Decode)]
pub struct StartupDescriptor {
    pub device: Vec<u8>,
    pub unit: u32,
    pub flags: u32,
    pub environment: DosEnvironment,
}

/// Disk geometry vector
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
#[serde(default)]
pub struct DosEnvironment {
    pub table_size: u32,
    pub size_block: u32,
    pub sec_org: u32,
    pub surfaces: u32,
    pub sectors_per_block: u32,
    pub blocks_per_track: u32,
    pub reserved: u32,
    pub pre_alloc: u32,
    pub interleave: u32,
    pub low_cyl: u32,
    pub high_cyl: u32,
    pub num_buffers: u32,
    pub buf_mem_type: u32,
    pub max_transfer: u32,
    pub mask: u32,
    pub boot_pri: u32,
    pub dos_type: u32,
}

impl Default for DosEnvironment {
    fn default() -> Self {
        Self {
            table_size: 16,
            size_block: 128,
            sec_org: 0,
            surfaces: 1,
            sectors_per_block: 1,
            blocks_per_track: 1,
            reserved: 2,
            pre_alloc: 0,
            interleave: 0,
            low_cyl: 0,
            high_cyl: 0,
            num_buffers: 5,
            buf_mem_type: 0,
            max_transfer: 0x7fff_ffff,
            mask: 0xffff_fffe,
            boot_pri: 0,
            dos_type: crate::codes::ID_DOS_DISK,
        }
    }
}

impl ControlRequest {
    pub fn packet(packet: Packet) -> Self {
        ControlRequest::Packet((b"1".to_vec(), packet))
    }

    pub fn startup_info() -> Self {
        ControlRequest::StartupInfo(b"1".to_vec())
    }
}

impl ControlResponse {
    pub fn reply(reply: Reply) -> Self {
        ControlResponse::Reply(reply)
    }

    pub fn startup(descriptor: StartupDescriptor) -> Self {
        ControlResponse::Startup(descriptor)
    }

    pub fn error(message: String, code: Option<u32>) -> Self {
        ControlResponse::Error(ErrorResponse {
            error: message.into_bytes(),
            code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz::{Decode, Encode};

    #[test]
    fn test_control_request_ssz_roundtrip() {
        let request = ControlRequest::packet(Packet::locate(0, "Work:a/b", 0));
        let bytes = request.as_ssz_bytes();
        let decoded = ControlRequest::from_ssz_bytes(&bytes).expect("decode");
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_reply_negative_res1() {
        let reply = Reply::new(-2, ErrorCode::LineTooLong.code());
        let decoded = Reply::from_ssz_bytes(&reply.as_ssz_bytes()).expect("decode");
        assert_eq!(decoded.res1(), -2);
        assert_eq!(decoded.error(), Some(ErrorCode::LineTooLong));
        assert!(decoded.is_success());
    }

    #[test]
    fn test_target_key_routing() {
        assert_eq!(Packet::free_lock(7).target_key(), Some(7));
        assert_eq!(Packet::free_lock(0).target_key(), None);
        assert_eq!(Packet::die().target_key(), None);
        let seek = Packet::Seek(SeekArgs::new(9, -4, crate::codes::OFFSET_END));
        assert_eq!(seek.target_key(), Some(9));
        if let Packet::Seek(args) = seek {
            assert_eq!(args.offset(), -4);
        }
    }
}
