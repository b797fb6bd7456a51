// Copyright 2021 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Adapter surface — translates a FUSE-shaped call surface onto the
//! FS metadata layer (spec §4.4 "external frontend", §5).
//!
//! Grounded in `ping_fuse.py`'s `PingFuse`: one method per filesystem
//! operation, mapping to the same `ENOSYS`-worthy set of unsupported
//! operations (hard links, symlinks, xattrs, utimes, fsync), expressed
//! here as `Error::NotImplemented` instead of an errno constant since
//! there's no real kernel FUSE binding on the other end (spec
//! Non-goals).

use crate::error::{Error, Result};
use crate::fs::{Fs, NodeKind};

/// What `getattr` reports; deliberately narrower than `libc::stat` —
/// only the fields `ping_fuse.py`'s `getattr` actually filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub kind: NodeKind,
    pub mode: u16,
    pub nlink: u32,
    pub uid: u16,
    pub gid: u16,
    pub size: u64,
    pub inode: u32,
}

/// Adapts [`Fs`] to the operation surface a userspace filesystem
/// binding would call into.
pub struct Adapter {
    fs: Fs,
}

impl Adapter {
    pub fn new(fs: Fs) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &Fs {
        &self.fs
    }

    pub fn getattr(&self, path: &str) -> Result<Attr> {
        let node = self.fs.get(path)?;
        Ok(Attr {
            kind: node.kind(),
            mode: node.mode,
            nlink: node.nlink(),
            uid: node.uid,
            gid: node.gid,
            size: node.payload_len() as u64,
            inode: node.inode,
        })
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.fs.readdir(path)
    }

    pub fn mkdir(&self, path: &str, mode: u16) -> Result<()> {
        self.fs.mkdir(path, mode).map(|_| ())
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        self.fs.rmdir(path)
    }

    /// `open` just validates the path exists; there's no file handle
    /// table to populate (spec Non-goals: no POSIX file-descriptor
    /// semantics).
    pub fn open(&self, path: &str) -> Result<()> {
        self.fs.get(path).map(|_| ())
    }

    pub fn read(&self, path: &str, len: u64, offset: u64) -> Result<Vec<u8>> {
        self.fs.read_file(path, len, offset)
    }

    pub fn write(&self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        self.fs.write_file(path, data, offset)
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        self.fs.truncate(path, size)
    }

    pub fn chmod(&self, path: &str, mode: u16) -> Result<()> {
        self.fs.chmod(path, mode)
    }

    pub fn chown(&self, path: &str, uid: u16, gid: u16) -> Result<()> {
        self.fs.chown(path, uid, gid)
    }

    pub fn create(&self, path: &str, mode: u16) -> Result<()> {
        self.fs.create(path, &[], 0, mode).map(|_| ())
    }

    pub fn unlink(&self, path: &str) -> Result<()> {
        self.fs.unlink(path)
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.fs.rename(old, new)
    }

    pub fn link(&self, _target: &str, _link: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    pub fn symlink(&self, _target: &str, _link: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    pub fn readlink(&self, _path: &str) -> Result<String> {
        Err(Error::NotImplemented)
    }

    pub fn setxattr(&self, _path: &str, _name: &str, _value: &[u8]) -> Result<()> {
        Err(Error::NotImplemented)
    }

    pub fn getxattr(&self, _path: &str, _name: &str) -> Result<Vec<u8>> {
        Err(Error::NotImplemented)
    }

    pub fn utimes(&self, _path: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }

    pub fn fsync(&self, _path: &str) -> Result<()> {
        Err(Error::NotImplemented)
    }
}
