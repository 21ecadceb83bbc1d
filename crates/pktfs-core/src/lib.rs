// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! pktfs core: serves a POSIX-style [`Operations`] table to clients that
//! speak the disk-packet protocol.
//!
//! A [`Context`] is shared by every mounted [`FileSystem`] in a process and
//! owns the lock/notify key space, the mount list and the orphan collector.
//! Each [`FileSystem`] runs its own event loop; other threads talk to it
//! through an [`FsHandle`].

pub mod actors;
pub mod autoflush;
pub mod charset;
pub mod config;
pub mod context;
pub mod debug;
pub mod dispatch;
pub mod entry;
pub mod error;
pub mod filesystem;
pub mod lock;
pub mod memfs;
pub mod notify;
pub mod ops;
pub mod path;
pub mod testing;
pub mod types;
pub mod volume;

pub use charset::{Charset, CharsetKind};
pub use config::{FlushConfig, FsConfig, StartupConfig};
pub use context::{Context, FsId, Route};
pub use debug::{Category, DebugMask};
pub use error::{FsError, FsResult, SetupError};
pub use filesystem::{FileSystem, FsHandle, FsSignal};
pub use memfs::MemoryFs;
pub use notify::{NotifyTransport, NullTransport};
pub use ops::{Capabilities, DirFiller, Operations};
pub use types::{ConnInfo, FileInfo, OpenFlags, Stat, StatVfs, TimeSpec};
pub use volume::DiskState;
