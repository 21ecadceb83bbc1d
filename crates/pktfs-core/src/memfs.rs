// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory reference implementation of [`Operations`].
//!
//! Files, directories, soft links, hard links and extended attributes live in
//! an inode map behind one mutex. Directory listings are ordered by name so
//! offset-based `readdir` is stable. `create`, `opendir`, `releasedir`,
//! `fgetattr` and `ftruncate` are left to the adapter's fallbacks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{FsError, FsResult};
use crate::ops::{DirFiller, Operations};
use crate::path;
use crate::types::{ConnInfo, FileInfo, Stat, StatVfs, TimeSpec, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u32 = 512;
const TOTAL_BLOCKS: u64 = 1 << 20;

#[derive(Debug)]
enum Content {
    File(Vec<u8>),
    /// Children keyed by the lookup form of their name
    Dir(BTreeMap<String, (String, u64)>),
    Symlink(String),
}

#[derive(Debug)]
struct Inode {
    content: Content,
    mode: u32,
    nlink: u32,
    uid: u32,
    gid: u32,
    atime: TimeSpec,
    mtime: TimeSpec,
    ctime: TimeSpec,
    xattrs: BTreeMap<String, Vec<u8>>,
}

impl Inode {
    fn new(content: Content, mode: u32) -> Self {
        let now = TimeSpec::now();
        Self {
            content,
            mode,
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: now,
            mtime: now,
            ctime: now,
            xattrs: BTreeMap::new(),
        }
    }

    fn size(&self) -> u64 {
        match &self.content {
            Content::File(data) => data.len() as u64,
            Content::Dir(children) => children.len() as u64,
            Content::Symlink(target) => target.len() as u64,
        }
    }

    fn stat(&self, ino: u64) -> Stat {
        let size = self.size();
        Stat {
            ino,
            mode: self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            size,
            blocks: size.div_ceil(BLOCK_SIZE as u64),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }

    fn touch(&mut self) {
        let now = TimeSpec::now();
        self.mtime = now;
        self.ctime = now;
    }
}

#[derive(Debug)]
struct Tree {
    inodes: HashMap<u64, Inode>,
    next_ino: u64,
    label: String,
}

impl Tree {
    fn new(label: &str) -> Self {
        let mut inodes = HashMap::new();
        inodes.insert(ROOT_INO, Inode::new(Content::Dir(BTreeMap::new()), S_IFDIR | 0o755));
        Self {
            inodes,
            next_ino: ROOT_INO + 1,
            label: label.to_string(),
        }
    }

    fn inode(&self, ino: u64) -> FsResult<&Inode> {
        self.inodes.get(&ino).ok_or(FsError::NotFound)
    }

    fn inode_mut(&mut self, ino: u64) -> FsResult<&mut Inode> {
        self.inodes.get_mut(&ino).ok_or(FsError::NotFound)
    }

    fn children(&self, ino: u64) -> FsResult<&BTreeMap<String, (String, u64)>> {
        match &self.inode(ino)?.content {
            Content::Dir(children) => Ok(children),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn children_mut(&mut self, ino: u64) -> FsResult<&mut BTreeMap<String, (String, u64)>> {
        match &mut self.inode_mut(ino)?.content {
            Content::Dir(children) => Ok(children),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn alloc(&mut self, inode: Inode) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        self.inodes.insert(ino, inode);
        ino
    }
}

pub struct MemoryFs {
    tree: Mutex<Tree>,
    case_sensitive: bool,
    read_only: bool,
    offsets: bool,
}

impl MemoryFs {
    /// Case-insensitive volume named `label`
    pub fn new(label: &str) -> Self {
        Self {
            tree: Mutex::new(Tree::new(label)),
            case_sensitive: false,
            read_only: false,
            offsets: true,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// With `false`, `readdir` ignores the requested offset and reports 0
    /// for every entry, listing the whole directory in one pass
    pub fn report_offsets(mut self, offsets: bool) -> Self {
        self.offsets = offsets;
        self
    }

    pub fn label(&self) -> String {
        self.tree().label.clone()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fold(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            path::folded(name, false).collect()
        }
    }

    fn lookup(&self, tree: &Tree, path: &str) -> FsResult<u64> {
        let mut ino = ROOT_INO;
        for component in path::components(path) {
            ino = tree
                .children(ino)?
                .get(&self.fold(component))
                .map(|(_, child)| *child)
                .ok_or(FsError::NotFound)?;
        }
        Ok(ino)
    }

    /// Parent directory inode and final name of a non-root path
    fn split<'p>(&self, tree: &Tree, path: &'p str) -> FsResult<(u64, &'p str)> {
        let parent = path::parent(path).ok_or(FsError::InvalidArgument)?;
        let dir = self.lookup(tree, parent)?;
        tree.children(dir)?;
        Ok((dir, path::file_name(path)))
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.read_only {
            Err(FsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    /// Link a new inode under `path`, failing if the name is taken
    fn insert(&self, tree: &mut Tree, path: &str, inode: Inode) -> FsResult<u64> {
        self.check_writable()?;
        let (dir, name) = self.split(tree, path)?;
        let key = self.fold(name);
        if tree.children(dir)?.contains_key(&key) {
            return Err(FsError::AlreadyExists);
        }
        let ino = tree.alloc(inode);
        tree.children_mut(dir)?.insert(key, (name.to_string(), ino));
        tree.inode_mut(dir)?.touch();
        Ok(ino)
    }

    /// Drop one link to `ino`, freeing it with its last link
    fn unlink_ino(tree: &mut Tree, ino: u64) {
        let free = match tree.inodes.get_mut(&ino) {
            Some(inode) => {
                inode.nlink = inode.nlink.saturating_sub(1);
                inode.ctime = TimeSpec::now();
                inode.nlink == 0
            }
            None => false,
        };
        if free {
            tree.inodes.remove(&ino);
        }
    }

    fn with_inode<T>(&self, path: &str, f: impl FnOnce(&mut Inode) -> FsResult<T>) -> FsResult<T> {
        let mut tree = self.tree();
        let ino = self.lookup(&tree, path)?;
        f(tree.inode_mut(ino)?)
    }
}

impl Operations for MemoryFs {
    fn init(&self, conn: &mut ConnInfo) -> FsResult<()> {
        conn.case_sensitive = self.case_sensitive;
        conn.volume_name = Some(self.label());
        Ok(())
    }

    fn getattr(&self, path: &str) -> FsResult<Stat> {
        let tree = self.tree();
        let ino = self.lookup(&tree, path)?;
        Ok(tree.inode(ino)?.stat(ino))
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        let tree = self.tree();
        let ino = self.lookup(&tree, path)?;
        match &tree.inode(ino)?.content {
            Content::Symlink(target) => Ok(target.clone()),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn mknod(&self, path: &str, mode: u32) -> FsResult<()> {
        if mode & S_IFMT != S_IFREG {
            return Err(FsError::Unsupported);
        }
        let mut tree = self.tree();
        self.insert(&mut tree, path, Inode::new(Content::File(Vec::new()), mode))?;
        Ok(())
    }

    fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let mut tree = self.tree();
        let inode = Inode::new(Content::Dir(BTreeMap::new()), S_IFDIR | (mode & 0o7777));
        self.insert(&mut tree, path, inode)?;
        Ok(())
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        self.check_writable()?;
        let mut tree = self.tree();
        let (dir, name) = self.split(&tree, path)?;
        let key = self.fold(name);
        let ino = tree
            .children(dir)?
            .get(&key)
            .map(|(_, ino)| *ino)
            .ok_or(FsError::NotFound)?;
        if matches!(tree.inode(ino)?.content, Content::Dir(_)) {
            return Err(FsError::IsADirectory);
        }
        tree.children_mut(dir)?.remove(&key);
        tree.inode_mut(dir)?.touch();
        Self::unlink_ino(&mut tree, ino);
        Ok(())
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        self.check_writable()?;
        let mut tree = self.tree();
        let (dir, name) = self.split(&tree, path)?;
        let key = self.fold(name);
        let ino = tree
            .children(dir)?
            .get(&key)
            .map(|(_, ino)| *ino)
            .ok_or(FsError::NotFound)?;
        if !tree.children(ino)?.is_empty() {
            return Err(FsError::NotEmpty);
        }
        tree.children_mut(dir)?.remove(&key);
        tree.inode_mut(dir)?.touch();
        tree.inodes.remove(&ino);
        Ok(())
    }

    fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        let mut tree = self.tree();
        let inode = Inode::new(Content::Symlink(target.to_string()), S_IFLNK | 0o777);
        self.insert(&mut tree, path, inode)?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.check_writable()?;
        let mut tree = self.tree();
        let (src_dir, src_name) = self.split(&tree, from)?;
        let (dst_dir, dst_name) = self.split(&tree, to)?;
        let src_key = self.fold(src_name);
        let dst_key = self.fold(dst_name);
        let ino = tree
            .children(src_dir)?
            .get(&src_key)
            .map(|(_, ino)| *ino)
            .ok_or(FsError::NotFound)?;

        let same_slot = src_dir == dst_dir && src_key == dst_key;
        if !same_slot {
            if let Some((_, existing)) = tree.children(dst_dir)?.get(&dst_key).cloned() {
                let empty_dir = match &tree.inode(existing)?.content {
                    Content::Dir(children) => Some(children.is_empty()),
                    _ => None,
                };
                match empty_dir {
                    Some(false) => return Err(FsError::NotEmpty),
                    Some(true) => {
                        tree.inodes.remove(&existing);
                    }
                    None => Self::unlink_ino(&mut tree, existing),
                }
            }
        }
        tree.children_mut(src_dir)?.remove(&src_key);
        tree.children_mut(dst_dir)?.insert(dst_key, (dst_name.to_string(), ino));
        tree.inode_mut(src_dir)?.touch();
        tree.inode_mut(dst_dir)?.touch();
        tree.inode_mut(ino)?.ctime = TimeSpec::now();
        Ok(())
    }

    fn link(&self, target: &str, path: &str) -> FsResult<()> {
        self.check_writable()?;
        let mut tree = self.tree();
        let ino = self.lookup(&tree, target)?;
        if matches!(tree.inode(ino)?.content, Content::Dir(_)) {
            return Err(FsError::NotPermitted);
        }
        let (dir, name) = self.split(&tree, path)?;
        let key = self.fold(name);
        if tree.children(dir)?.contains_key(&key) {
            return Err(FsError::AlreadyExists);
        }
        tree.children_mut(dir)?.insert(key, (name.to_string(), ino));
        tree.inode_mut(dir)?.touch();
        let inode = tree.inode_mut(ino)?;
        inode.nlink += 1;
        inode.ctime = TimeSpec::now();
        Ok(())
    }

    fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.check_writable()?;
        self.with_inode(path, |inode| {
            inode.mode = (inode.mode & S_IFMT) | (mode & 0o7777);
            inode.ctime = TimeSpec::now();
            Ok(())
        })
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.check_writable()?;
        self.with_inode(path, |inode| {
            inode.uid = uid;
            inode.gid = gid;
            inode.ctime = TimeSpec::now();
            Ok(())
        })
    }

    fn truncate(&self, path: &str, size: u64) -> FsResult<()> {
        self.check_writable()?;
        let size = usize::try_from(size).map_err(|_| FsError::FileTooLarge)?;
        self.with_inode(path, |inode| {
            match &mut inode.content {
                Content::File(data) => data.resize(size, 0),
                Content::Dir(_) => return Err(FsError::IsADirectory),
                Content::Symlink(_) => return Err(FsError::InvalidArgument),
            }
            inode.touch();
            Ok(())
        })
    }

    fn utimens(&self, path: &str, atime: Option<TimeSpec>, mtime: Option<TimeSpec>) -> FsResult<()> {
        self.check_writable()?;
        self.with_inode(path, |inode| {
            if let Some(atime) = atime {
                inode.atime = atime;
            }
            if let Some(mtime) = mtime {
                inode.mtime = mtime;
            }
            inode.ctime = TimeSpec::now();
            Ok(())
        })
    }

    fn open(&self, path: &str, fi: &mut FileInfo) -> FsResult<()> {
        if fi.flags.write && self.read_only {
            return Err(FsError::ReadOnly);
        }
        let tree = self.tree();
        fi.fh = self.lookup(&tree, path)?;
        Ok(())
    }

    fn read(&self, path: &str, buf: &mut [u8], offset: u64, _fi: &FileInfo) -> FsResult<usize> {
        self.with_inode(path, |inode| {
            let Content::File(data) = &inode.content else {
                return Err(FsError::IsADirectory);
            };
            let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
            let count = buf.len().min(data.len() - start);
            buf[..count].copy_from_slice(&data[start..start + count]);
            inode.atime = TimeSpec::now();
            Ok(count)
        })
    }

    fn write(&self, path: &str, bytes: &[u8], offset: u64, _fi: &FileInfo) -> FsResult<usize> {
        self.check_writable()?;
        let start = usize::try_from(offset).map_err(|_| FsError::FileTooLarge)?;
        self.with_inode(path, |inode| {
            let Content::File(data) = &mut inode.content else {
                return Err(FsError::IsADirectory);
            };
            let end = start + bytes.len();
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(bytes);
            inode.touch();
            Ok(bytes.len())
        })
    }

    fn statfs(&self, _path: &str) -> FsResult<StatVfs> {
        let tree = self.tree();
        let used: u64 = tree
            .inodes
            .values()
            .map(|inode| inode.size().div_ceil(BLOCK_SIZE as u64).max(1))
            .sum();
        Ok(StatVfs {
            bsize: BLOCK_SIZE,
            blocks: TOTAL_BLOCKS,
            bfree: TOTAL_BLOCKS.saturating_sub(used),
            bavail: TOTAL_BLOCKS.saturating_sub(used),
            files: tree.inodes.len() as u64,
            ffree: TOTAL_BLOCKS.saturating_sub(tree.inodes.len() as u64),
            namemax: 255,
            read_only: self.read_only,
        })
    }

    fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.check_writable()?;
        self.with_inode(path, |inode| {
            inode.xattrs.insert(name.to_string(), value.to_vec());
            inode.ctime = TimeSpec::now();
            Ok(())
        })
    }

    fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.with_inode(path, |inode| inode.xattrs.get(name).cloned().ok_or(FsError::NotFound))
    }

    fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.with_inode(path, |inode| Ok(inode.xattrs.keys().cloned().collect()))
    }

    fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.check_writable()?;
        self.with_inode(path, |inode| {
            inode.xattrs.remove(name).map(|_| ()).ok_or(FsError::NotFound)
        })
    }

    /// Offsets are 1-based positions in `.`, `..` and the sorted children
    fn readdir(
        &self,
        path: &str,
        _fi: &FileInfo,
        offset: u64,
        filler: &mut DirFiller<'_>,
    ) -> FsResult<()> {
        let tree = self.tree();
        let ino = self.lookup(&tree, path)?;
        let mut listing: Vec<(String, Option<Stat>)> = vec![
            (".".to_string(), Some(tree.inode(ino)?.stat(ino))),
            ("..".to_string(), None),
        ];
        for (name, child) in tree.children(ino)?.values() {
            listing.push((name.clone(), tree.inodes.get(child).map(|i| i.stat(*child))));
        }
        if !self.offsets {
            for (name, stat) in &listing {
                if filler(name, stat.as_ref(), 0) {
                    break;
                }
            }
            return Ok(());
        }
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        for (idx, (name, stat)) in listing.iter().enumerate().skip(skip) {
            if filler(name, stat.as_ref(), idx as u64 + 1) {
                break;
            }
        }
        Ok(())
    }

    fn format(&self, name: &str, _dos_type: u32) -> FsResult<()> {
        self.check_writable()?;
        *self.tree() = Tree::new(name);
        Ok(())
    }

    fn relabel(&self, name: &str) -> FsResult<()> {
        self.check_writable()?;
        self.tree().label = name.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> MemoryFs {
        let fs = MemoryFs::new("Ram");
        fs.mkdir("/a", 0o755).expect("mkdir");
        fs.mknod("/a/File.txt", S_IFREG | 0o644).expect("mknod");
        fs
    }

    #[test]
    fn test_case_insensitive_lookup_keeps_display_name() {
        let fs = fs();
        let stat = fs.getattr("/A/FILE.TXT").expect("getattr");
        assert_eq!(stat.mode & S_IFMT, S_IFREG);
        let mut names = Vec::new();
        fs.readdir("/a", &FileInfo::default(), 2, &mut |name: &str, _: Option<&Stat>, _| {
            names.push(name.to_string());
            false
        })
        .expect("readdir");
        assert_eq!(names, vec!["File.txt".to_string()]);
    }

    #[test]
    fn test_write_then_read() {
        let fs = fs();
        let fi = FileInfo::default();
        assert_eq!(fs.write("/a/File.txt", b"hello", 2, &fi).expect("write"), 5);
        let mut buf = [0u8; 16];
        let n = fs.read("/a/File.txt", &mut buf, 0, &fi).expect("read");
        assert_eq!(&buf[..n], b"\0\0hello");
    }

    #[test]
    fn test_hard_link_survives_unlink() {
        let fs = fs();
        fs.link("/a/File.txt", "/b").expect("link");
        assert_eq!(fs.getattr("/b").expect("stat").nlink, 2);
        fs.unlink("/a/File.txt").expect("unlink");
        assert_eq!(fs.getattr("/b").expect("stat").nlink, 1);
    }

    #[test]
    fn test_rmdir_requires_empty() {
        let fs = fs();
        assert!(matches!(fs.rmdir("/a"), Err(FsError::NotEmpty)));
        assert!(matches!(fs.unlink("/a"), Err(FsError::IsADirectory)));
    }

    #[test]
    fn test_readdir_resumes_from_offset() {
        let fs = MemoryFs::new("Ram");
        for name in ["c", "a", "b"] {
            fs.mknod(&format!("/{}", name), S_IFREG | 0o644).expect("mknod");
        }
        let mut seen = Vec::new();
        let mut last = 0;
        fs.readdir("/", &FileInfo::default(), 0, &mut |name: &str, _: Option<&Stat>, off| {
            if seen.len() == 3 {
                return true;
            }
            seen.push(name.to_string());
            last = off;
            false
        })
        .expect("readdir");
        assert_eq!(seen, vec![".", "..", "a"]);
        let mut rest = Vec::new();
        fs.readdir("/", &FileInfo::default(), last, &mut |name: &str, _: Option<&Stat>, _| {
            rest.push(name.to_string());
            false
        })
        .expect("readdir");
        assert_eq!(rest, vec!["b", "c"]);
    }
}
