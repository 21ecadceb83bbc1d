// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Numeric action codes and native result codes of the disk-packet protocol

use thiserror::Error;

/// Primary result value meaning success for boolean actions
pub const DOSTRUE: i64 = -1;
/// Primary result value meaning failure for boolean actions
pub const DOSFALSE: i64 = 0;

/// Action codes carried by every packet
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Die = 5,
    CurrentVolume = 7,
    LocateObject = 8,
    RenameDisk = 9,
    FreeLock = 15,
    DeleteObject = 16,
    RenameObject = 17,
    CopyDir = 19,
    SetProtect = 21,
    CreateDir = 22,
    ExamineObject = 23,
    ExamineNext = 24,
    DiskInfo = 25,
    Info = 26,
    Flush = 27,
    SetComment = 28,
    Parent = 29,
    Inhibit = 31,
    DiskChange = 33,
    SetDate = 34,
    SameLock = 40,
    Read = 82,
    Write = 87,
    FindUpdate = 1004,
    FindInput = 1005,
    FindOutput = 1006,
    End = 1007,
    Seek = 1008,
    Format = 1020,
    MakeLink = 1021,
    SetFileSize = 1022,
    WriteProtect = 1023,
    ReadLink = 1024,
    FhFromLock = 1026,
    IsFilesystem = 1027,
    ChangeMode = 1028,
    CopyDirFh = 1030,
    ParentFh = 1031,
    ExamineAll = 1033,
    ExamineFh = 1034,
    ExamineAllEnd = 1035,
    SetOwner = 1036,
    AddNotify = 4097,
    RemoveNotify = 4098,
}

impl Action {
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Protocol name, used in debug traces
    pub fn name(self) -> &'static str {
        match self {
            Action::Die => "DIE",
            Action::CurrentVolume => "CURRENT_VOLUME",
            Action::LocateObject => "LOCATE_OBJECT",
            Action::RenameDisk => "RENAME_DISK",
            Action::FreeLock => "FREE_LOCK",
            Action::DeleteObject => "DELETE_OBJECT",
            Action::RenameObject => "RENAME_OBJECT",
            Action::CopyDir => "COPY_DIR",
            Action::SetProtect => "SET_PROTECT",
            Action::CreateDir => "CREATE_DIR",
            Action::ExamineObject => "EXAMINE_OBJECT",
            Action::ExamineNext => "EXAMINE_NEXT",
            Action::DiskInfo => "DISK_INFO",
            Action::Info => "INFO",
            Action::Flush => "FLUSH",
            Action::SetComment => "SET_COMMENT",
            Action::Parent => "PARENT",
            Action::Inhibit => "INHIBIT",
            Action::DiskChange => "DISK_CHANGE",
            Action::SetDate => "SET_DATE",
            Action::SameLock => "SAME_LOCK",
            Action::Read => "READ",
            Action::Write => "WRITE",
            Action::FindUpdate => "FINDUPDATE",
            Action::FindInput => "FINDINPUT",
            Action::FindOutput => "FINDOUTPUT",
            Action::End => "END",
            Action::Seek => "SEEK",
            Action::Format => "FORMAT",
            Action::MakeLink => "MAKE_LINK",
            Action::SetFileSize => "SET_FILE_SIZE",
            Action::WriteProtect => "WRITE_PROTECT",
            Action::ReadLink => "READ_LINK",
            Action::FhFromLock => "FH_FROM_LOCK",
            Action::IsFilesystem => "IS_FILESYSTEM",
            Action::ChangeMode => "CHANGE_MODE",
            Action::CopyDirFh => "COPY_DIR_FH",
            Action::ParentFh => "PARENT_FH",
            Action::ExamineAll => "EXAMINE_ALL",
            Action::ExamineFh => "EXAMINE_FH",
            Action::ExamineAllEnd => "EXAMINE_ALL_END",
            Action::SetOwner => "SET_OWNER",
            Action::AddNotify => "ADD_NOTIFY",
            Action::RemoveNotify => "REMOVE_NOTIFY",
        }
    }
}

/// Native secondary result codes.
///
/// `GenericFailure` has no native counterpart; it is what unmapped backing
/// errors collapse to.
#[repr(u32)]
#[derive(Error, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[error("not enough memory")]
    NoFreeStore = 103,
    #[error("bad number")]
    BadNumber = 115,
    #[error("required argument missing")]
    RequiredArgMissing = 116,
    #[error("line too long")]
    LineTooLong = 120,
    #[error("object in use")]
    ObjectInUse = 202,
    #[error("object already exists")]
    ObjectExists = 203,
    #[error("directory not found")]
    DirNotFound = 204,
    #[error("object not found")]
    ObjectNotFound = 205,
    #[error("invalid window description")]
    BadStreamName = 206,
    #[error("object too large")]
    ObjectTooLarge = 207,
    #[error("packet request type unknown")]
    ActionNotKnown = 209,
    #[error("invalid component name")]
    InvalidComponentName = 210,
    #[error("invalid object lock")]
    InvalidLock = 211,
    #[error("object is not of required type")]
    ObjectWrongType = 212,
    #[error("disk not validated")]
    DiskNotValidated = 213,
    #[error("disk is write-protected")]
    DiskWriteProtected = 214,
    #[error("rename across devices attempted")]
    RenameAcrossDevices = 215,
    #[error("directory not empty")]
    DirectoryNotEmpty = 216,
    #[error("too many levels")]
    TooManyLevels = 217,
    #[error("device (or volume) is not mounted")]
    DeviceNotMounted = 218,
    #[error("seek failure")]
    SeekError = 219,
    #[error("comment is too long")]
    CommentTooBig = 220,
    #[error("disk is full")]
    DiskFull = 221,
    #[error("file is protected from deletion")]
    DeleteProtected = 222,
    #[error("file is write protected")]
    WriteProtected = 223,
    #[error("file is read protected")]
    ReadProtected = 224,
    #[error("not a valid DOS disk")]
    NotADosDisk = 225,
    #[error("no disk in drive")]
    NoDisk = 226,
    #[error("no more entries in directory")]
    NoMoreEntries = 232,
    #[error("object is soft link")]
    IsSoftLink = 233,
    #[error("object not of required type")]
    BadHunk = 235,
    #[error("function not implemented")]
    NotImplemented = 236,
    #[error("generic failure")]
    GenericFailure = 1000,
}

impl ErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        const ALL: &[ErrorCode] = &[
            ErrorCode::NoFreeStore,
            ErrorCode::BadNumber,
            ErrorCode::RequiredArgMissing,
            ErrorCode::LineTooLong,
            ErrorCode::ObjectInUse,
            ErrorCode::ObjectExists,
            ErrorCode::DirNotFound,
            ErrorCode::ObjectNotFound,
            ErrorCode::BadStreamName,
            ErrorCode::ObjectTooLarge,
            ErrorCode::ActionNotKnown,
            ErrorCode::InvalidComponentName,
            ErrorCode::InvalidLock,
            ErrorCode::ObjectWrongType,
            ErrorCode::DiskNotValidated,
            ErrorCode::DiskWriteProtected,
            ErrorCode::RenameAcrossDevices,
            ErrorCode::DirectoryNotEmpty,
            ErrorCode::TooManyLevels,
            ErrorCode::DeviceNotMounted,
            ErrorCode::SeekError,
            ErrorCode::CommentTooBig,
            ErrorCode::DiskFull,
            ErrorCode::DeleteProtected,
            ErrorCode::WriteProtected,
            ErrorCode::ReadProtected,
            ErrorCode::NotADosDisk,
            ErrorCode::NoDisk,
            ErrorCode::NoMoreEntries,
            ErrorCode::IsSoftLink,
            ErrorCode::BadHunk,
            ErrorCode::NotImplemented,
            ErrorCode::GenericFailure,
        ];
        ALL.iter().copied().find(|c| c.code() == code)
    }
}

// Lock access modes
pub const SHARED_LOCK: u8 = 0;
pub const EXCLUSIVE_LOCK: u8 = 1;

// Seek origins
pub const OFFSET_BEGINNING: u8 = 0;
pub const OFFSET_CURRENT: u8 = 1;
pub const OFFSET_END: u8 = 2;

// Object types reported by examine
pub const ST_ROOT: u8 = 1;
pub const ST_USERDIR: u8 = 2;
pub const ST_SOFTLINK: u8 = 3;
pub const ST_FILE: u8 = 4;

// ExamineAll data types; each one adds fields to the record
pub const ED_NAME: u8 = 1;
pub const ED_TYPE: u8 = 2;
pub const ED_SIZE: u8 = 3;
pub const ED_PROTECTION: u8 = 4;
pub const ED_DATE: u8 = 5;
pub const ED_COMMENT: u8 = 6;
pub const ED_OWNER: u8 = 7;

// Notify request flags
pub const NRF_SEND_MESSAGE: u32 = 1 << 0;
pub const NRF_SEND_SIGNAL: u32 = 1 << 1;
pub const NRF_WAIT_REPLY: u32 = 1 << 3;
pub const NRF_NOTIFY_INITIAL: u32 = 1 << 4;

// Disk states reported by Info
pub const ID_WRITE_PROTECTED: u32 = 80;
pub const ID_VALIDATING: u32 = 81;
pub const ID_VALIDATED: u32 = 82;

// Disk types reported by Info
pub const ID_NO_DISK_PRESENT: u32 = 0xFFFF_FFFF;
pub const ID_UNREADABLE_DISK: u32 = 0x4241_4400; // 'BAD\0'
pub const ID_NOT_REALLY_DOS: u32 = 0x4E44_4F53; // 'NDOS'
pub const ID_DOS_DISK: u32 = 0x444F_5300; // 'DOS\0'
pub const ID_BUSY: u32 = 0x4255_5359; // 'BUSY'

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        for code in [202u32, 205, 232, 1000] {
            let parsed = ErrorCode::from_code(code).expect("known code");
            assert_eq!(parsed.code(), code);
        }
        assert_eq!(ErrorCode::from_code(1), None);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::LocateObject.code(), 8);
        assert_eq!(Action::ExamineAll.name(), "EXAMINE_ALL");
        assert_eq!(ErrorCode::ObjectInUse.to_string(), "object in use");
    }
}
