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

//! FS metadata layer — L3 (spec §4.4).
//!
//! Grounded in `ping_filesystem.py`'s `PingFS`: path resolution via
//! recursive parent lookup, a single-entry directory cache, and
//! allocate/relocate-on-growth semantics over the disk layer. The
//! `update`/`unlink`/`rename` operations and the path cache are not in
//! that revision of the original; they're built from its `get`/`add`
//! pattern plus the allocator already implemented in [`crate::disk`].

mod node;

pub use node::{DirEntry, Node, NodeBody, NodeKind};

use crate::disk::{ceil_div, ByteDisk};
use crate::error::{Error, Result};
use node::HEADER_LEN;
use std::sync::{Arc, Mutex};

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn split_last(path: &str) -> (String, String) {
    match path.rfind('/') {
        Some(i) => (path[..i].to_string(), path[i + 1..].to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Owns the byte disk and the single-entry "last resolved directory"
/// cache (spec §4.4 `get(path)`: "Caches the last-resolved directory
/// by path string; cache hit returns without I/O").
pub struct Fs {
    disk: Arc<ByteDisk>,
    cache: Mutex<Option<(String, Node)>>,
}

impl Fs {
    /// Formats a fresh root directory at inode 0 (spec §4.4 "Root
    /// directory ... inode = 0 ... always present at offset 0").
    pub fn format(disk: Arc<ByteDisk>) -> Result<Self> {
        let fs = Self {
            disk,
            cache: Mutex::new(None),
        };
        let root = Node::new_dir(0o755, Vec::new());
        fs.disk.write(0, &root.encode())?;
        Ok(fs)
    }

    fn cache_lookup(&self, path: &str) -> Option<Node> {
        let cache = self.cache.lock().unwrap();
        match &*cache {
            Some((p, n)) if p == path => Some(n.clone()),
            _ => None,
        }
    }

    fn cache_store(&self, path: String, node: Node) {
        *self.cache.lock().unwrap() = Some((path, node));
    }

    fn cache_invalidate(&self, path: &str) {
        let mut cache = self.cache.lock().unwrap();
        if matches!(&*cache, Some((p, _)) if p == path) {
            *cache = None;
        }
    }

    fn read_node(&self, inode: u32) -> Result<Node> {
        let probe_len = self.disk.block_size().max(HEADER_LEN) as u64;
        let head = self.disk.read(inode as u64, probe_len)?;
        let payload_len = Node::peek_payload_len(&head)?;
        let needed = HEADER_LEN as u64 + payload_len as u64;
        let full = if needed > head.len() as u64 {
            self.disk.read(inode as u64, needed)?
        } else {
            head
        };
        Node::decode(&full)
    }

    /// Resolves `path` as a directory, consulting (and populating) the
    /// single-entry cache. The empty path always means root.
    fn resolve_dir(&self, path: &str) -> Result<Node> {
        if path.is_empty() {
            return self.read_node(0);
        }
        if let Some(node) = self.cache_lookup(path) {
            return Ok(node);
        }
        let node = self.get(path)?;
        if !node.is_dir() {
            return Err(Error::NotDir);
        }
        self.cache_store(path.to_string(), node.clone());
        Ok(node)
    }

    fn lookup_entry(dir: &Node, name: &str) -> Result<u32> {
        match &dir.body {
            NodeBody::Directory { entries } => entries
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.inode)
                .ok_or(Error::NotFound),
            NodeBody::Regular { .. } => Err(Error::NotDir),
        }
    }

    pub fn get(&self, path: &str) -> Result<Node> {
        let norm = normalize(path);
        if norm.is_empty() {
            return self.read_node(0);
        }
        let (parent_path, name) = split_last(&norm);
        let parent = self.resolve_dir(&parent_path)?;
        let inode = Self::lookup_entry(&parent, &name)?;
        self.read_node(inode)
    }

    /// Returns `(parent, child)`; at the root, `parent` is the root
    /// node itself (there is no real parent to report).
    pub fn get_both(&self, path: &str) -> Result<(Node, Node)> {
        let norm = normalize(path);
        if norm.is_empty() {
            let root = self.read_node(0)?;
            return Ok((root.clone(), root));
        }
        let (parent_path, name) = split_last(&norm);
        let parent = self.resolve_dir(&parent_path)?;
        let inode = Self::lookup_entry(&parent, &name)?;
        let child = self.read_node(inode)?;
        Ok((parent, child))
    }

    /// Allocates a region (unless `force_inode` is given), serializes
    /// `node` and writes it, and stamps its new inode back into `node`.
    pub fn add(&self, node: &mut Node, force_inode: Option<u32>) -> Result<u32> {
        let size = node.disk_size() as u64;
        let inode = match force_inode {
            Some(i) => i,
            None => {
                let block_size = self.disk.block_size() as u64;
                let needed_blocks = ceil_div(size, block_size).max(1) as u32;
                let start_block = self.disk.get_region(needed_blocks)?;
                (start_block - 1) * block_size as u32
            }
        };
        node.inode = inode;
        self.disk.write(inode as u64, &node.encode())?;
        Ok(inode)
    }

    /// Writes `node` back at its existing inode if it still fits,
    /// relocating it (and fixing up the owning directory's `DirEntry`)
    /// otherwise (spec §4.4 `update(node)`).
    ///
    /// `path` is required to find that owning directory: composition
    /// replaced the original's parent back-pointer (spec Design Notes
    /// §9), so nothing on `Node` itself can locate it.
    pub fn update(&self, path: &str, node: &mut Node) -> Result<()> {
        let norm = normalize(path);
        let old = self.read_node(node.inode)?;
        let old_size = old.disk_size() as u64;
        let new_size = node.disk_size() as u64;
        let block_size = self.disk.block_size() as u64;
        let start_block = (node.inode as u64 / block_size + 1) as u32;

        if self
            .disk
            .test_region(start_block, old_size, new_size)
            .is_some()
        {
            self.disk.write(node.inode as u64, &node.encode())?;
            self.cache_invalidate(&norm);
            return Ok(());
        }

        if norm.is_empty() {
            return Err(Error::Busy);
        }

        let old_inode = node.inode;
        let (parent_path, name) = split_last(&norm);
        let mut parent = self.resolve_dir(&parent_path)?;
        let new_inode = self.add(node, None)?;
        match &mut parent.body {
            NodeBody::Directory { entries } => {
                let entry = entries
                    .iter_mut()
                    .find(|e| e.name == name && e.inode == old_inode)
                    .ok_or(Error::NotFound)?;
                entry.inode = new_inode;
            }
            NodeBody::Regular { .. } => return Err(Error::NotDir),
        }
        self.update(&parent_path, &mut parent)?;
        self.cache_invalidate(&norm);
        Ok(())
    }

    /// Removes the path from its parent and frees its blocks. The root
    /// may never be unlinked (spec §4.4 `unlink(path)`).
    pub fn unlink(&self, path: &str) -> Result<()> {
        let norm = normalize(path);
        if norm.is_empty() {
            return Err(Error::Busy);
        }
        let (parent_path, name) = split_last(&norm);
        let mut parent = self.resolve_dir(&parent_path)?;
        let victim_inode = Self::lookup_entry(&parent, &name)?;
        let victim = self.read_node(victim_inode)?;

        match &mut parent.body {
            NodeBody::Directory { entries } => entries.retain(|e| e.name != name),
            NodeBody::Regular { .. } => return Err(Error::NotDir),
        }
        self.update(&parent_path, &mut parent)?;
        self.disk
            .delete(victim_inode as u64, victim.disk_size() as u64)?;
        self.cache_invalidate(&norm);
        Ok(())
    }

    /// Moves a `DirEntry` from `old`'s parent to `new`'s parent,
    /// renaming it along the way (spec §4.4 `rename(old, new)`).
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old_norm = normalize(old);
        let new_norm = normalize(new);
        if self.get(&new_norm).is_ok() {
            return Err(Error::Exists);
        }

        let (old_parent_path, old_name) = split_last(&old_norm);
        let (new_parent_path, new_name) = split_last(&new_norm);
        let mut old_parent = self.resolve_dir(&old_parent_path)?;
        let entry_inode = Self::lookup_entry(&old_parent, &old_name)?;

        if old_parent_path == new_parent_path {
            match &mut old_parent.body {
                NodeBody::Directory { entries } => {
                    let e = entries
                        .iter_mut()
                        .find(|e| e.name == old_name)
                        .ok_or(Error::NotFound)?;
                    e.name = new_name;
                }
                NodeBody::Regular { .. } => return Err(Error::NotDir),
            }
            self.update(&old_parent_path, &mut old_parent)?;
        } else {
            let mut new_parent = self.resolve_dir(&new_parent_path)?;
            match &mut old_parent.body {
                NodeBody::Directory { entries } => entries.retain(|e| e.name != old_name),
                NodeBody::Regular { .. } => return Err(Error::NotDir),
            }
            match &mut new_parent.body {
                NodeBody::Directory { entries } => entries.push(DirEntry {
                    inode: entry_inode,
                    name: new_name,
                }),
                NodeBody::Regular { .. } => return Err(Error::NotDir),
            }
            self.update(&old_parent_path, &mut old_parent)?;
            self.update(&new_parent_path, &mut new_parent)?;
        }
        self.cache_invalidate(&old_norm);
        self.cache_invalidate(&new_norm);
        Ok(())
    }

    /// Creates a regular file with `bytes` placed at `offset` (the
    /// bytes before it zero-filled), and links it into its parent
    /// (spec §4.4 `create(path, bytes, offset)`).
    pub fn create(&self, path: &str, bytes: &[u8], offset: u64, mode: u16) -> Result<Node> {
        let norm = normalize(path);
        let (parent_path, name) = split_last(&norm);
        let mut parent = self.resolve_dir(&parent_path)?;
        if Self::lookup_entry(&parent, &name).is_ok() {
            return Err(Error::Exists);
        }
        let mut payload = vec![0u8; offset as usize];
        payload.extend_from_slice(bytes);
        let mut node = Node::new_file(mode, payload);
        let inode = self.add(&mut node, None)?;
        match &mut parent.body {
            NodeBody::Directory { entries } => entries.push(DirEntry { inode, name }),
            NodeBody::Regular { .. } => return Err(Error::NotDir),
        }
        self.update(&parent_path, &mut parent)?;
        Ok(node)
    }

    pub fn mkdir(&self, path: &str, mode: u16) -> Result<Node> {
        let norm = normalize(path);
        let (parent_path, name) = split_last(&norm);
        let mut parent = self.resolve_dir(&parent_path)?;
        if Self::lookup_entry(&parent, &name).is_ok() {
            return Err(Error::Exists);
        }
        let mut node = Node::new_dir(mode, Vec::new());
        let inode = self.add(&mut node, None)?;
        match &mut parent.body {
            NodeBody::Directory { entries } => entries.push(DirEntry { inode, name }),
            NodeBody::Regular { .. } => return Err(Error::NotDir),
        }
        self.update(&parent_path, &mut parent)?;
        Ok(node)
    }

    pub fn rmdir(&self, path: &str) -> Result<()> {
        let node = self.get(path)?;
        match node.body {
            NodeBody::Directory { entries } if entries.is_empty() => self.unlink(path),
            NodeBody::Directory { .. } => Err(Error::Exists),
            NodeBody::Regular { .. } => Err(Error::NotDir),
        }
    }

    pub fn readdir(&self, path: &str) -> Result<Vec<String>> {
        let node = self.get(path)?;
        match node.body {
            NodeBody::Directory { entries } => {
                let mut names = vec![".".to_string(), "..".to_string()];
                names.extend(entries.into_iter().map(|e| e.name));
                Ok(names)
            }
            NodeBody::Regular { .. } => Err(Error::NotDir),
        }
    }

    pub fn read_file(&self, path: &str, len: u64, offset: u64) -> Result<Vec<u8>> {
        let node = self.get(path)?;
        match node.body {
            NodeBody::Regular { data } => {
                let start = (offset as usize).min(data.len());
                let end = (start + len as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            NodeBody::Directory { .. } => Err(Error::IsDir),
        }
    }

    pub fn write_file(&self, path: &str, bytes: &[u8], offset: u64) -> Result<usize> {
        let mut node = self.get(path)?;
        match &mut node.body {
            NodeBody::Regular { data } => {
                let end = offset as usize + bytes.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[offset as usize..end].copy_from_slice(bytes);
            }
            NodeBody::Directory { .. } => return Err(Error::IsDir),
        }
        self.update(path, &mut node)?;
        Ok(bytes.len())
    }

    pub fn truncate(&self, path: &str, size: u64) -> Result<()> {
        let mut node = self.get(path)?;
        match &mut node.body {
            NodeBody::Regular { data } => data.resize(size as usize, 0),
            NodeBody::Directory { .. } => return Err(Error::IsDir),
        }
        self.update(path, &mut node)
    }

    pub fn chmod(&self, path: &str, mode: u16) -> Result<()> {
        let mut node = self.get(path)?;
        node.mode = mode;
        self.update(path, &mut node)
    }

    pub fn chown(&self, path: &str, uid: u16, gid: u16) -> Result<()> {
        let mut node = self.get(path)?;
        node.uid = uid;
        node.gid = gid;
        self.update(path, &mut node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tree operations (get/add/update/unlink/rename) need a live
    // BlockStore behind the disk; see `tests/fs_integration.rs` for
    // the in-process fake-transport suite that exercises those.

    #[test]
    fn normalize_strips_slashes() {
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("/apples"), "apples");
        assert_eq!(normalize("/l1/banana/"), "l1/banana");
    }

    #[test]
    fn split_last_finds_parent_and_name() {
        assert_eq!(split_last("apples"), (String::new(), "apples".to_string()));
        assert_eq!(
            split_last("l1/banana"),
            ("l1".to_string(), "banana".to_string())
        );
    }
}
