// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Callback adapter over the user-supplied operations table.
//!
//! Every slot of [`Operations`] is optional: unset slots either report
//! "not implemented" or succeed as a no-op. A handful of slots fall back to a
//! sibling when the implementation does not declare them in its
//! [`Capabilities`]; [`CallbackAdapter`] resolves those choices once at setup
//! so the dispatcher never checks for them again.

use std::sync::Arc;

use crate::debug::DebugMask;
use crate::error::{FsError, FsResult};
use crate::fs_debug;
use crate::types::{ConnInfo, FileInfo, Stat, StatVfs, TimeSpec, S_IFREG};

/// Directory filler: `(name, attributes, next offset)`. Returns `true` when
/// the caller's buffer is full and `readdir` should stop.
pub type DirFiller<'a> = dyn FnMut(&str, Option<&Stat>, u64) -> bool + 'a;

/// Optional slots the implementation provides natively
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub opendir: bool,
    pub releasedir: bool,
    pub fgetattr: bool,
    pub ftruncate: bool,
    pub create: bool,
}

/// POSIX-like callback table implemented by a filesystem
#[allow(unused_variables)]
pub trait Operations: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    fn init(&self, conn: &mut ConnInfo) -> FsResult<()> {
        Ok(())
    }

    fn destroy(&self) {}

    fn getattr(&self, path: &str) -> FsResult<Stat> {
        Err(FsError::NotImplemented)
    }

    fn fgetattr(&self, path: &str, fi: &FileInfo) -> FsResult<Stat> {
        Err(FsError::NotImplemented)
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        Err(FsError::NotImplemented)
    }

    fn mknod(&self, path: &str, mode: u32) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn link(&self, target: &str, path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn ftruncate(&self, path: &str, size: u64, fi: &FileInfo) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn utimens(&self, path: &str, atime: Option<TimeSpec>, mtime: Option<TimeSpec>) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn open(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        Ok(())
    }

    fn create(&self, path: &str, mode: u32, fi: &mut FileInfo) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64, fi: &FileInfo) -> FsResult<usize> {
        Err(FsError::NotImplemented)
    }

    fn write(&self, path: &str, data: &[u8], offset: u64, fi: &FileInfo) -> FsResult<usize> {
        Err(FsError::NotImplemented)
    }

    fn statfs(&self, path: &str) -> FsResult<StatVfs> {
        Ok(StatVfs::default())
    }

    fn flush(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        Ok(())
    }

    fn release(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        Ok(())
    }

    fn fsync(&self, path: &str, datasync: bool, fi: &FileInfo) -> FsResult<()> {
        Ok(())
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        Err(FsError::NotImplemented)
    }

    fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        Err(FsError::NotImplemented)
    }

    fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn opendir(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn readdir(
        &self,
        path: &str,
        fi: &FileInfo,
        offset: u64,
        filler: &mut DirFiller<'_>,
    ) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn releasedir(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn access(&self, path: &str, mask: u32) -> FsResult<()> {
        Ok(())
    }

    fn format(&self, name: &str, dos_type: u32) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }

    fn relabel(&self, name: &str) -> FsResult<()> {
        Err(FsError::NotImplemented)
    }
}

type OpenDirFn = fn(&dyn Operations, &str, &mut FileInfo) -> FsResult<()>;
type ReleaseDirFn = fn(&dyn Operations, &str, &FileInfo) -> FsResult<()>;
type FgetattrFn = fn(&dyn Operations, &str, &FileInfo) -> FsResult<Stat>;
type FtruncateFn = fn(&dyn Operations, &str, u64, &FileInfo) -> FsResult<()>;
type CreateFn = fn(&dyn Operations, &str, u32, &mut FileInfo) -> FsResult<()>;

fn opendir_native(ops: &dyn Operations, path: &str, fi: &mut FileInfo) -> FsResult<()> {
    ops.opendir(path, fi)
}

fn opendir_via_open(ops: &dyn Operations, path: &str, fi: &mut FileInfo) -> FsResult<()> {
    ops.open(path, fi)
}

fn releasedir_native(ops: &dyn Operations, path: &str, fi: &FileInfo) -> FsResult<()> {
    ops.releasedir(path, fi)
}

fn releasedir_via_release(ops: &dyn Operations, path: &str, fi: &FileInfo) -> FsResult<()> {
    ops.release(path, fi)
}

fn fgetattr_native(ops: &dyn Operations, path: &str, fi: &FileInfo) -> FsResult<Stat> {
    ops.fgetattr(path, fi)
}

fn fgetattr_via_getattr(ops: &dyn Operations, path: &str, _fi: &FileInfo) -> FsResult<Stat> {
    ops.getattr(path)
}

fn ftruncate_native(ops: &dyn Operations, path: &str, size: u64, fi: &FileInfo) -> FsResult<()> {
    ops.ftruncate(path, size, fi)
}

fn ftruncate_via_truncate(
    ops: &dyn Operations,
    path: &str,
    size: u64,
    _fi: &FileInfo,
) -> FsResult<()> {
    ops.truncate(path, size)
}

fn create_native(ops: &dyn Operations, path: &str, mode: u32, fi: &mut FileInfo) -> FsResult<()> {
    ops.create(path, mode, fi)
}

fn create_via_mknod(
    ops: &dyn Operations,
    path: &str,
    mode: u32,
    fi: &mut FileInfo,
) -> FsResult<()> {
    ops.mknod(path, S_IFREG | (mode & 0o7777))?;
    if let Err(err) = ops.open(path, fi) {
        if let Err(err) = ops.unlink(path) {
            tracing::warn!(target: "pktfs::ops", path, error = %err, "unlink after failed open failed");
        }
        return Err(err);
    }
    Ok(())
}

/// Flat dispatch table resolved once from an [`Operations`] implementation
pub struct CallbackAdapter {
    ops: Arc<dyn Operations>,
    caps: Capabilities,
    mask: Arc<DebugMask>,
    opendir_fn: OpenDirFn,
    releasedir_fn: ReleaseDirFn,
    fgetattr_fn: FgetattrFn,
    ftruncate_fn: FtruncateFn,
    create_fn: CreateFn,
}

impl CallbackAdapter {
    pub fn new(ops: Arc<dyn Operations>, mask: Arc<DebugMask>) -> Self {
        let caps = ops.capabilities();
        Self {
            opendir_fn: if caps.opendir { opendir_native } else { opendir_via_open },
            releasedir_fn: if caps.releasedir {
                releasedir_native
            } else {
                releasedir_via_release
            },
            fgetattr_fn: if caps.fgetattr {
                fgetattr_native
            } else {
                fgetattr_via_getattr
            },
            ftruncate_fn: if caps.ftruncate {
                ftruncate_native
            } else {
                ftruncate_via_truncate
            },
            create_fn: if caps.create { create_native } else { create_via_mknod },
            ops,
            caps,
            mask,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn trace(&self, op: &'static str, path: &str) {
        fs_debug!(self.mask, operations, op, path, "callback");
    }

    pub fn init(&self, conn: &mut ConnInfo) -> FsResult<()> {
        self.trace("init", "/");
        self.ops.init(conn)
    }

    pub fn destroy(&self) {
        self.trace("destroy", "/");
        self.ops.destroy()
    }

    pub fn getattr(&self, path: &str) -> FsResult<Stat> {
        self.trace("getattr", path);
        self.ops.getattr(path)
    }

    pub fn fgetattr(&self, path: &str, fi: &FileInfo) -> FsResult<Stat> {
        self.trace("fgetattr", path);
        (self.fgetattr_fn)(self.ops.as_ref(), path, fi)
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        self.trace("readlink", path);
        self.ops.readlink(path)
    }

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        self.trace("mkdir", path);
        self.ops.mkdir(path, mode)
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        self.trace("unlink", path);
        self.ops.unlink(path)
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        self.trace("rmdir", path);
        self.ops.rmdir(path)
    }

    pub fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        self.trace("symlink", path);
        self.ops.symlink(target, path)
    }

    pub fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.trace("rename", from);
        self.ops.rename(from, to)
    }

    pub fn link(&self, target: &str, path: &str) -> FsResult<()> {
        self.trace("link", path);
        self.ops.link(target, path)
    }

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.trace("chmod", path);
        self.ops.chmod(path, mode)
    }

    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.trace("chown", path);
        self.ops.chown(path, uid, gid)
    }

    pub fn ftruncate(&self, path: &str, size: u64, fi: &FileInfo) -> FsResult<()> {
        self.trace("ftruncate", path);
        (self.ftruncate_fn)(self.ops.as_ref(), path, size, fi)
    }

    pub fn utimens(
        &self,
        path: &str,
        atime: Option<TimeSpec>,
        mtime: Option<TimeSpec>,
    ) -> FsResult<()> {
        self.trace("utimens", path);
        self.ops.utimens(path, atime, mtime)
    }

    pub fn open(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        self.trace("open", path);
        self.ops.open(path, fi)
    }

    pub fn create(&self, path: &str, mode: u32, fi: &mut FileInfo) -> FsResult<()> {
        self.trace("create", path);
        (self.create_fn)(self.ops.as_ref(), path, mode, fi)
    }

    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64, fi: &FileInfo) -> FsResult<usize> {
        self.trace("read", path);
        self.ops.read(path, buf, offset, fi)
    }

    pub fn write(&self, path: &str, data: &[u8], offset: u64, fi: &FileInfo) -> FsResult<usize> {
        self.trace("write", path);
        self.ops.write(path, data, offset, fi)
    }

    pub fn statfs(&self, path: &str) -> FsResult<StatVfs> {
        self.trace("statfs", path);
        self.ops.statfs(path)
    }

    pub fn flush(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.trace("flush", path);
        self.ops.flush(path, fi)
    }

    pub fn release(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.trace("release", path);
        self.ops.release(path, fi)
    }

    pub fn fsync(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.trace("fsync", path);
        self.ops.fsync(path, false, fi)
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.trace("setxattr", path);
        self.ops.setxattr(path, name, value)
    }

    pub fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.trace("getxattr", path);
        self.ops.getxattr(path, name)
    }

    pub fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.trace("listxattr", path);
        self.ops.listxattr(path)
    }

    pub fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.trace("removexattr", path);
        self.ops.removexattr(path, name)
    }

    pub fn opendir(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        self.trace("opendir", path);
        (self.opendir_fn)(self.ops.as_ref(), path, fi)
    }

    pub fn readdir(
        &self,
        path: &str,
        fi: &FileInfo,
        offset: u64,
        filler: &mut DirFiller<'_>,
    ) -> FsResult<()> {
        self.trace("readdir", path);
        self.ops.readdir(path, fi, offset, filler)
    }

    pub fn releasedir(&self, path: &str, fi: &FileInfo) -> FsResult<()> {
        self.trace("releasedir", path);
        (self.releasedir_fn)(self.ops.as_ref(), path, fi)
    }

    pub fn access(&self, path: &str, mask: u32) -> FsResult<()> {
        self.trace("access", path);
        self.ops.access(path, mask)
    }

    pub fn format(&self, name: &str, dos_type: u32) -> FsResult<()> {
        self.trace("format", name);
        self.ops.format(name, dos_type)
    }

    pub fn relabel(&self, name: &str) -> FsResult<()> {
        self.trace("relabel", name);
        self.ops.relabel(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_open: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Operations for Recorder {
        fn getattr(&self, path: &str) -> FsResult<Stat> {
            self.calls.lock().unwrap().push(format!("getattr {}", path));
            Ok(Stat::default())
        }

        fn mknod(&self, path: &str, mode: u32) -> FsResult<()> {
            self.calls.lock().unwrap().push(format!("mknod {} {:o}", path, mode));
            Ok(())
        }

        fn unlink(&self, path: &str) -> FsResult<()> {
            self.calls.lock().unwrap().push(format!("unlink {}", path));
            Ok(())
        }

        fn open(&self, path: &str, _fi: &mut FileInfo) -> FsResult<()> {
            self.calls.lock().unwrap().push(format!("open {}", path));
            if self.fail_open {
                Err(FsError::AccessDenied)
            } else {
                Ok(())
            }
        }

        fn release(&self, path: &str, _fi: &FileInfo) -> FsResult<()> {
            self.calls.lock().unwrap().push(format!("release {}", path));
            Ok(())
        }
    }

    fn adapter(ops: Arc<Recorder>) -> CallbackAdapter {
        CallbackAdapter::new(ops, Arc::new(DebugMask::default()))
    }

    #[test]
    fn test_unset_slots_default() {
        struct Empty;
        impl Operations for Empty {}
        let adapter = CallbackAdapter::new(Arc::new(Empty), Arc::new(DebugMask::default()));
        let fi = FileInfo::default();
        assert!(matches!(adapter.getattr("/"), Err(FsError::NotImplemented)));
        assert!(matches!(adapter.rename("/a", "/b"), Err(FsError::NotImplemented)));
        assert!(adapter.flush("/a", &fi).is_ok());
        assert!(adapter.release("/a", &fi).is_ok());
        assert!(adapter.fsync("/a", &fi).is_ok());
        assert_eq!(adapter.statfs("/").expect("statfs"), StatVfs::default());
    }

    #[test]
    fn test_sibling_fallbacks() {
        let ops = Arc::new(Recorder::default());
        let adapter = adapter(ops.clone());
        let mut fi = FileInfo::default();
        adapter.opendir("/d", &mut fi).expect("opendir");
        adapter.releasedir("/d", &fi).expect("releasedir");
        adapter.fgetattr("/f", &fi).expect("fgetattr");
        assert_eq!(ops.calls(), vec!["open /d", "release /d", "getattr /f"]);
    }

    #[test]
    fn test_create_falls_back_to_mknod_and_open() {
        let ops = Arc::new(Recorder::default());
        let adapter = adapter(ops.clone());
        let mut fi = FileInfo::default();
        adapter.create("/f", 0o644, &mut fi).expect("create");
        assert_eq!(ops.calls(), vec!["mknod /f 100644", "open /f"]);
    }

    #[test]
    fn test_create_fallback_unlinks_on_open_failure() {
        let ops = Arc::new(Recorder {
            fail_open: true,
            ..Default::default()
        });
        let adapter = adapter(ops.clone());
        let mut fi = FileInfo::default();
        assert!(matches!(
            adapter.create("/f", 0o644, &mut fi),
            Err(FsError::AccessDenied)
        ));
        assert_eq!(ops.calls(), vec!["mknod /f 100644", "open /f", "unlink /f"]);
    }
}
