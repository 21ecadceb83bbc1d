// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for pktfs core

use std::io;

use pktfs_proto::ErrorCode;
use tracing::warn;

/// Error reported by a backing operations table
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("access denied")]
    AccessDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name not allowed")]
    InvalidName,
    #[error("name too long")]
    NameTooLong,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("busy")]
    Busy,
    #[error("too many open files")]
    TooManyOpenFiles,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("no space left")]
    NoSpace,
    #[error("file too large")]
    FileTooLarge,
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("cross-device link")]
    CrossDevice,
    #[error("too many levels of symbolic links")]
    Loop,
    #[error("out of memory")]
    OutOfMemory,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unsupported")]
    Unsupported,
    #[error("not implemented")]
    NotImplemented,
    #[error("errno {0}")]
    Errno(i32),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Build from a raw errno value
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => FsError::NotFound,
            libc::EEXIST => FsError::AlreadyExists,
            libc::EACCES => FsError::AccessDenied,
            libc::EPERM => FsError::NotPermitted,
            libc::EINVAL => FsError::InvalidArgument,
            libc::ENAMETOOLONG => FsError::NameTooLong,
            libc::ENOTDIR => FsError::NotADirectory,
            libc::EISDIR => FsError::IsADirectory,
            libc::ENOTEMPTY => FsError::NotEmpty,
            libc::EBUSY => FsError::Busy,
            libc::EMFILE => FsError::TooManyOpenFiles,
            libc::EBADF => FsError::BadFileDescriptor,
            libc::ENOSPC => FsError::NoSpace,
            libc::EFBIG => FsError::FileTooLarge,
            libc::EROFS => FsError::ReadOnly,
            libc::EXDEV => FsError::CrossDevice,
            libc::ELOOP => FsError::Loop,
            libc::ENOMEM => FsError::OutOfMemory,
            libc::ENOTSUP => FsError::Unsupported,
            libc::ENOSYS => FsError::NotImplemented,
            other => FsError::Errno(other),
        }
    }

    /// Errno equivalent of this error
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::AccessDenied => libc::EACCES,
            FsError::NotPermitted => libc::EPERM,
            FsError::InvalidArgument | FsError::InvalidName => libc::EINVAL,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::Busy => libc::EBUSY,
            FsError::TooManyOpenFiles => libc::EMFILE,
            FsError::BadFileDescriptor => libc::EBADF,
            FsError::NoSpace => libc::ENOSPC,
            FsError::FileTooLarge => libc::EFBIG,
            FsError::ReadOnly => libc::EROFS,
            FsError::CrossDevice => libc::EXDEV,
            FsError::Loop => libc::ELOOP,
            FsError::OutOfMemory => libc::ENOMEM,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            FsError::Unsupported => libc::ENOTSUP,
            FsError::NotImplemented => libc::ENOSYS,
            FsError::Errno(errno) => *errno,
        }
    }
}

/// Fixed errno-equivalent to native result code table
pub fn errno_to_code(errno: i32) -> ErrorCode {
    match errno {
        libc::ENOENT => ErrorCode::ObjectNotFound,
        libc::ENOMEM => ErrorCode::NoFreeStore,
        libc::EACCES => ErrorCode::ReadProtected,
        libc::EPERM => ErrorCode::WriteProtected,
        libc::EROFS => ErrorCode::DiskWriteProtected,
        libc::EBUSY => ErrorCode::ObjectInUse,
        libc::EEXIST => ErrorCode::ObjectExists,
        libc::ENOTDIR => ErrorCode::DirNotFound,
        libc::EISDIR => ErrorCode::ObjectWrongType,
        libc::EXDEV => ErrorCode::RenameAcrossDevices,
        libc::ENOTEMPTY => ErrorCode::DirectoryNotEmpty,
        libc::ENOSPC => ErrorCode::DiskFull,
        libc::EFBIG => ErrorCode::ObjectTooLarge,
        libc::ESPIPE => ErrorCode::SeekError,
        libc::ENAMETOOLONG => ErrorCode::LineTooLong,
        libc::ELOOP | libc::EMLINK => ErrorCode::TooManyLevels,
        libc::ENOSYS | libc::ENOTSUP => ErrorCode::ActionNotKnown,
        libc::EINVAL => ErrorCode::BadNumber,
        libc::EBADF => ErrorCode::InvalidLock,
        other => {
            warn!(target: "pktfs::error", errno = other, "unmapped backing error");
            ErrorCode::GenericFailure
        }
    }
}

impl From<FsError> for ErrorCode {
    fn from(err: FsError) -> Self {
        errno_to_code(err.errno())
    }
}

/// Failure to build a filesystem handle or its helpers
#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("failed to start {actor} actor: {source}")]
    Actor {
        actor: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("context is shut down")]
    ShutDown,
}
