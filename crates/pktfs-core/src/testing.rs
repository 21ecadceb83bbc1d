// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Fault injection wrapper for exercising rollback paths

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{FsError, FsResult};
use crate::ops::{Capabilities, DirFiller, Operations};
use crate::types::{ConnInfo, FileInfo, Stat, StatVfs, TimeSpec};

/// Operations slots that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultOp {
    Getattr,
    Mknod,
    Mkdir,
    Unlink,
    Rmdir,
    Rename,
    Open,
    Read,
    Write,
    Truncate,
    Release,
    Readdir,
    Statfs,
}

/// Fail `op` with `errno`, after skipping `start_after` calls, at most
/// `max_faults` times
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FaultRule {
    pub op: FaultOp,
    pub errno: i32,
    #[serde(default)]
    pub start_after: u64,
    #[serde(default)]
    pub max_faults: Option<u64>,
}

impl FaultRule {
    pub fn new(op: FaultOp, errno: i32) -> Self {
        Self {
            op,
            errno,
            start_after: 0,
            max_faults: None,
        }
    }

    pub fn after(mut self, calls: u64) -> Self {
        self.start_after = calls;
        self
    }

    pub fn times(mut self, faults: u64) -> Self {
        self.max_faults = Some(faults);
        self
    }
}

#[derive(Default)]
struct RuleState {
    rule: Option<FaultRule>,
    invocations: u64,
    hits: u64,
}

/// Wraps another operations table and fails selected slots
pub struct FaultyOps {
    inner: Arc<dyn Operations>,
    rules: Mutex<Vec<RuleState>>,
}

impl FaultyOps {
    pub fn new(inner: Arc<dyn Operations>) -> Self {
        Self {
            inner,
            rules: Mutex::new(Vec::new()),
        }
    }

    pub fn add_rule(&self, rule: FaultRule) {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RuleState {
                rule: Some(rule),
                ..Default::default()
            });
    }

    pub fn clear(&self) {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Number of faults injected so far
    pub fn hits(&self) -> u64 {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|state| state.hits)
            .sum()
    }

    fn check(&self, op: FaultOp) -> FsResult<()> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        for state in rules.iter_mut() {
            let Some(rule) = &state.rule else { continue };
            if rule.op != op {
                continue;
            }
            state.invocations += 1;
            if state.invocations <= rule.start_after {
                continue;
            }
            if rule.max_faults.is_some_and(|max| state.hits >= max) {
                continue;
            }
            state.hits += 1;
            tracing::debug!(target: "pktfs::testing", ?op, errno = rule.errno, "injecting fault");
            return Err(FsError::from_errno(rule.errno));
        }
        Ok(())
    }
}

impl Operations for FaultyOps {
    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn init(&self, conn: &mut ConnInfo) -> FsResult<()> {
        self.inner.init(conn)
    }

    fn destroy(&self) {
        self.inner.destroy()
    }

    fn getattr(&self, path: &str) -> FsResult<Stat> {
        self.check(FaultOp::Getattr)?;
        self.inner.getattr(path)
    }

    fn fgetattr(&self, path: &str, fi: &FileInfo) -> FsResult<Stat> {
        self.check(FaultOp::Getattr)?;
        self.inner.fgetattr(path, fi)
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        self.inner.readlink(path)
    }

    fn mknod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.check(FaultOp::Mknod)?;
        self.inner.mknod(path, mode)
    }

    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.check(FaultOp::Mkdir)?;
        self.inner.mkdir(path, mode)
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        self.check(FaultOp::Unlink)?;
        self.inner.unlink(path)
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        self.check(FaultOp::Rmdir)?;
        self.inner.rmdir(path)
    }

    fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        self.inner.symlink(target, path)
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.check(FaultOp::Rename)?;
        self.inner.rename(from, to)
    }

    fn link(&self, target: &str, path: &str) -> FsResult<()> {
        self.inner.link(target, path)
    }

    fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.inner.chmod(path, mode)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.inner.chown(path, uid, gid)
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.check(FaultOp::Truncate)?;
        self.inner.truncate(path, size)
    }

    fn ftruncate(&self, path: &str, size: u64, fi: &FileInfo) -> FsResult<()> {
        self.check(FaultOp::Truncate)?;
        self.inner.ftruncate(path, size, fi)
    }

    fn utimens(&self, path: &str, atime: Option<TimeSpec>, mtime: Option<TimeSpec>) -> FsResult<()> {
        self.inner.utimens(path, atime, mtime)
    }

    fn open(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        self.check(FaultOp::Open)?;
        self.inner.open(path, fi)
    }

    fn create(&self, path: &str, mode: u32, fi: &mut FileInfo) -> FsResult<()> {
        self.check(FaultOp::Mknod)?;
        self.inner.create(path, mode, fi)
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64, fi: &FileInfo) -> FsResult<usize> {
        self.check(FaultOp::Read)?;
        self.inner.read(path, buf, offset, fi)
    }

    fn write(&self, path: &str, data: &[u8], offset: u64, fi: &FileInfo) -> FsResult<usize> {
        self.check(FaultOp::Write)?;
        self.inner.write(path, data, offset, fi)
    }

    fn statfs(&self, path: &str) -> FsResult<StatVfs> {
        self.check(FaultOp::Statfs)?;
        self.inner.statfs(path)
    }

    fn flush(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.inner.flush(path, fi)
    }

    fn release(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.check(FaultOp::Release)?;
        self.inner.release(path, fi)
    }

    fn fsync(&self, path: &str, datasync: bool, fi: &FileInfo) -> FsResult<()> {
        self.inner.fsync(path, datasync, fi)
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.inner.setxattr(path, name, value)
    }

    fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.inner.getxattr(path, name)
    }

    fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.inner.listxattr(path)
    }

    fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.inner.removexattr(path, name)
    }

    fn opendir(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        self.inner.opendir(path, fi)
    }

    fn readdir(
        &self,
        path: &str,
        fi: &FileInfo,
        offset: u64,
        filler: &mut DirFiller<'_>,
    ) -> FsResult<()> {
        self.check(FaultOp::Readdir)?;
        self.inner.readdir(path, fi, offset, filler)
    }

    fn releasedir(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.inner.releasedir(path, fi)
    }

    fn access(&self, path: &str, mask: u32) -> FsResult<()> {
        self.inner.access(path, mask)
    }

    fn format(&self, name: &str, dos_type: u32) -> FsResult<()> {
        self.inner.format(name, dos_type)
    }

    fn relabel(&self, name: &str) -> FsResult<()> {
        self.inner.relabel(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memfs::MemoryFs;

    #[test]
    fn test_rule_window() {
        let ops = FaultyOps::new(Arc::new(MemoryFs::new("Ram")));
        ops.add_rule(FaultRule::new(FaultOp::Getattr, libc::EIO).after(1).times(2));
        assert!(ops.getattr("/").is_ok());
        assert!(ops.getattr("/").is_err());
        assert!(ops.getattr("/").is_err());
        assert!(ops.getattr("/").is_ok());
        assert_eq!(ops.hits(), 2);
    }

    #[test]
    fn test_other_ops_pass_through() {
        let ops = FaultyOps::new(Arc::new(MemoryFs::new("Ram")));
        ops.add_rule(FaultRule::new(FaultOp::Open, libc::EACCES));
        assert!(ops.mkdir("/d", 0o755).is_ok());
        let mut fi = FileInfo::default();
        assert!(matches!(ops.open("/d", &mut fi), Err(FsError::AccessDenied)));
        ops.clear();
        assert!(ops.open("/d", &mut fi).is_ok());
    }
}
