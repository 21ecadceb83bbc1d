// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Core type definitions shared by the adapter and the dispatcher

use std::time::{SystemTime, UNIX_EPOCH};

use pktfs_proto::DateStamp;

// File type bits of `Stat::mode`
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;

/// Seconds between 1970-01-01 and 1978-01-01
pub const DATESTAMP_EPOCH_OFFSET: i64 = 252_460_800;
pub const TICKS_PER_SECOND: u32 = 50;

// Protection bits. Owner RWED bits are set when the access is denied,
// group and other bits are set when it is allowed.
pub const FIBF_DELETE: u32 = 1 << 0;
pub const FIBF_EXECUTE: u32 = 1 << 1;
pub const FIBF_WRITE: u32 = 1 << 2;
pub const FIBF_READ: u32 = 1 << 3;
pub const FIBF_ARCHIVE: u32 = 1 << 4;
pub const FIBF_GRP_DELETE: u32 = 1 << 8;
pub const FIBF_GRP_EXECUTE: u32 = 1 << 9;
pub const FIBF_GRP_WRITE: u32 = 1 << 10;
pub const FIBF_GRP_READ: u32 = 1 << 11;
pub const FIBF_OTR_DELETE: u32 = 1 << 12;
pub const FIBF_OTR_EXECUTE: u32 = 1 << 13;
pub const FIBF_OTR_WRITE: u32 = 1 << 14;
pub const FIBF_OTR_READ: u32 = 1 << 15;

/// Seconds and nanoseconds since the UNIX epoch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

impl TimeSpec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: now.as_secs() as i64,
            nsec: now.subsec_nanos(),
        }
    }

    pub fn to_datestamp(self) -> DateStamp {
        let secs = (self.sec - DATESTAMP_EPOCH_OFFSET).max(0);
        let days = secs / 86_400;
        let rem = secs % 86_400;
        DateStamp {
            days: days.min(u32::MAX as i64) as u32,
            minute: (rem / 60) as u32,
            tick: (rem % 60) as u32 * TICKS_PER_SECOND + self.nsec / (1_000_000_000 / TICKS_PER_SECOND),
        }
    }

    pub fn from_datestamp(date: DateStamp) -> Self {
        let sec = DATESTAMP_EPOCH_OFFSET
            + date.days as i64 * 86_400
            + date.minute as i64 * 60
            + (date.tick / TICKS_PER_SECOND) as i64;
        let nsec = (date.tick % TICKS_PER_SECOND) * (1_000_000_000 / TICKS_PER_SECOND);
        Self { sec, nsec }
    }
}

/// Object kind as seen by the dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    None,
    File,
    Dir,
    SoftLink,
}

/// Attributes returned by `getattr`/`fgetattr`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    pub fn kind(&self) -> EntryKind {
        match self.mode & S_IFMT {
            S_IFDIR => EntryKind::Dir,
            S_IFLNK => EntryKind::SoftLink,
            S_IFREG => EntryKind::File,
            _ => EntryKind::None,
        }
    }
}

/// Filesystem statistics returned by `statfs`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatVfs {
    pub bsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namemax: u32,
    pub read_only: bool,
}

/// Open flags handed to `open`/`create`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub exclusive: bool,
}

/// Per-open state shared with the operations table
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub flags: OpenFlags,
    /// Handle value chosen by the operations table
    pub fh: u64,
}

impl FileInfo {
    pub fn new(flags: OpenFlags) -> Self {
        Self { flags, fh: 0 }
    }
}

/// Mount-time negotiation filled in by `init`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnInfo {
    pub case_sensitive: bool,
    pub volume_name: Option<String>,
}

/// Translate POSIX permission bits into protection bits
pub fn mode_to_protection(mode: u32) -> u32 {
    let mut prot = 0;
    if mode & 0o400 == 0 {
        prot |= FIBF_READ;
    }
    if mode & 0o200 == 0 {
        prot |= FIBF_WRITE | FIBF_DELETE;
    }
    if mode & 0o100 == 0 {
        prot |= FIBF_EXECUTE;
    }
    if mode & 0o040 != 0 {
        prot |= FIBF_GRP_READ;
    }
    if mode & 0o020 != 0 {
        prot |= FIBF_GRP_WRITE | FIBF_GRP_DELETE;
    }
    if mode & 0o010 != 0 {
        prot |= FIBF_GRP_EXECUTE;
    }
    if mode & 0o004 != 0 {
        prot |= FIBF_OTR_READ;
    }
    if mode & 0o002 != 0 {
        prot |= FIBF_OTR_WRITE | FIBF_OTR_DELETE;
    }
    if mode & 0o001 != 0 {
        prot |= FIBF_OTR_EXECUTE;
    }
    prot
}

/// Translate protection bits into POSIX permission bits, keeping the file
/// type and special bits of `old_mode`
pub fn protection_to_mode(prot: u32, old_mode: u32) -> u32 {
    let mut mode = old_mode & !0o777;
    if prot & FIBF_READ == 0 {
        mode |= 0o400;
    }
    if prot & FIBF_WRITE == 0 {
        mode |= 0o200;
    }
    if prot & FIBF_EXECUTE == 0 {
        mode |= 0o100;
    }
    if prot & FIBF_GRP_READ != 0 {
        mode |= 0o040;
    }
    if prot & FIBF_GRP_WRITE != 0 {
        mode |= 0o020;
    }
    if prot & FIBF_GRP_EXECUTE != 0 {
        mode |= 0o010;
    }
    if prot & FIBF_OTR_READ != 0 {
        mode |= 0o004;
    }
    if prot & FIBF_OTR_WRITE != 0 {
        mode |= 0o002;
    }
    if prot & FIBF_OTR_EXECUTE != 0 {
        mode |= 0o001;
    }
    mode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datestamp_epoch() {
        let ts = TimeSpec::new(DATESTAMP_EPOCH_OFFSET, 0);
        assert_eq!(ts.to_datestamp(), DateStamp::default());
    }

    #[test]
    fn test_datestamp_conversion() {
        // 1978-01-02 01:01:01.5
        let ts = TimeSpec::new(DATESTAMP_EPOCH_OFFSET + 86_400 + 3_661, 500_000_000);
        let ds = ts.to_datestamp();
        assert_eq!(ds.days, 1);
        assert_eq!(ds.minute, 61);
        assert_eq!(ds.tick, 75);
        assert_eq!(TimeSpec::from_datestamp(ds), ts);
    }

    #[test]
    fn test_pre_epoch_clamps_to_zero() {
        assert_eq!(TimeSpec::new(0, 0).to_datestamp(), DateStamp::default());
    }

    #[test]
    fn test_protection_mode_conversion() {
        let prot = mode_to_protection(0o644);
        assert_eq!(prot & (FIBF_READ | FIBF_WRITE), 0);
        assert_ne!(prot & FIBF_EXECUTE, 0);
        assert_ne!(prot & FIBF_GRP_READ, 0);
        assert_eq!(prot & FIBF_GRP_WRITE, 0);
        assert_eq!(protection_to_mode(prot, S_IFREG | 0o777), S_IFREG | 0o644);
    }

    #[test]
    fn test_stat_kind() {
        let mut stat = Stat {
            mode: S_IFDIR | 0o755,
            ..Default::default()
        };
        assert_eq!(stat.kind(), EntryKind::Dir);
        stat.mode = S_IFLNK | 0o777;
        assert!(stat.is_symlink());
        assert_eq!(stat.kind(), EntryKind::SoftLink);
    }
}
