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

//! On-"disk" node format (spec §4.4).
//!
//! Grounded in `ping_filesystem.py`'s `PingNode`/`PingFile`/`PingDirectory`,
//! reshaped from an inheritance chain into one tagged struct (spec's
//! Design Notes on inheritance-to-composition): a node is either a
//! regular file's bytes or a directory's entry list, never both, so
//! the payload is an enum rather than two always-present fields.

use crate::error::{Error, Result};

/// inode (4) + reserved (4).
pub const NODE_HEADER_LEN: usize = 8;
/// payload_len (4) + type (4) + uid (2) + gid (2) + mode (2) + reserved (2).
pub const FILE_HEADER_LEN: usize = 16;
/// Every persisted node leads with this many bytes before its payload.
pub const HEADER_LEN: usize = NODE_HEADER_LEN + FILE_HEADER_LEN;
/// entry_count (4), directories only.
pub const DIR_HEADER_LEN: usize = 4;
/// inode (4) + name_len (2), per `DirEntry`.
pub const DIRENT_HEADER_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Regular,
    Directory,
}

impl NodeKind {
    fn to_u32(self) -> u32 {
        match self {
            NodeKind::Regular => 0,
            NodeKind::Directory => 1,
        }
    }

    fn from_u32(v: u32) -> Result<Self> {
        match v {
            0 => Ok(NodeKind::Regular),
            1 => Ok(NodeKind::Directory),
            _ => Err(Error::NotFound),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u32,
    pub name: String,
}

impl DirEntry {
    fn encoded_len(&self) -> usize {
        DIRENT_HEADER_LEN + self.name.len()
    }
}

#[derive(Debug, Clone)]
pub enum NodeBody {
    Regular { data: Vec<u8> },
    Directory { entries: Vec<DirEntry> },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub inode: u32,
    pub uid: u16,
    pub gid: u16,
    pub mode: u16,
    pub body: NodeBody,
}

impl Node {
    pub fn new_file(mode: u16, data: Vec<u8>) -> Self {
        Self {
            inode: 0,
            uid: 0,
            gid: 0,
            mode,
            body: NodeBody::Regular { data },
        }
    }

    pub fn new_dir(mode: u16, entries: Vec<DirEntry>) -> Self {
        Self {
            inode: 0,
            uid: 0,
            gid: 0,
            mode,
            body: NodeBody::Directory { entries },
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self.body {
            NodeBody::Regular { .. } => NodeKind::Regular,
            NodeBody::Directory { .. } => NodeKind::Directory,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.body, NodeBody::Directory { .. })
    }

    /// `nlink`, matching `ping_filesystem.py`'s `links()`: a file always
    /// has one link; a directory has one per child plus one for itself.
    pub fn nlink(&self) -> u32 {
        match &self.body {
            NodeBody::Regular { .. } => 1,
            NodeBody::Directory { entries } => entries.len() as u32 + 1,
        }
    }

    pub fn payload_len(&self) -> u32 {
        match &self.body {
            NodeBody::Regular { data } => data.len() as u32,
            NodeBody::Directory { entries } => {
                DIR_HEADER_LEN as u32
                    + entries.iter().map(|e| e.encoded_len() as u32).sum::<u32>()
            }
        }
    }

    pub fn disk_size(&self) -> u32 {
        HEADER_LEN as u32 + self.payload_len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.disk_size() as usize);
        buf.extend_from_slice(&self.inode.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.payload_len().to_ne_bytes());
        buf.extend_from_slice(&self.kind().to_u32().to_ne_bytes());
        buf.extend_from_slice(&self.uid.to_ne_bytes());
        buf.extend_from_slice(&self.gid.to_ne_bytes());
        buf.extend_from_slice(&self.mode.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 2]);
        match &self.body {
            NodeBody::Regular { data } => buf.extend_from_slice(data),
            NodeBody::Directory { entries } => {
                buf.extend_from_slice(&(entries.len() as u32).to_ne_bytes());
                for e in entries {
                    buf.extend_from_slice(&e.inode.to_ne_bytes());
                    buf.extend_from_slice(&(e.name.len() as u16).to_ne_bytes());
                    buf.extend_from_slice(e.name.as_bytes());
                }
            }
        }
        buf
    }

    /// Reads just the payload length out of a header-sized slice,
    /// without fully decoding it — used to decide whether a second,
    /// larger disk read is needed (spec §4.4 `get(path)`).
    pub fn peek_payload_len(header: &[u8]) -> Result<u32> {
        if header.len() < HEADER_LEN {
            return Err(Error::NotFound);
        }
        Ok(u32::from_ne_bytes(header[8..12].try_into().unwrap()))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::NotFound);
        }
        let inode = u32::from_ne_bytes(data[0..4].try_into().unwrap());
        let payload_len = u32::from_ne_bytes(data[8..12].try_into().unwrap());
        let kind = NodeKind::from_u32(u32::from_ne_bytes(data[12..16].try_into().unwrap()))?;
        let uid = u16::from_ne_bytes(data[16..18].try_into().unwrap());
        let gid = u16::from_ne_bytes(data[18..20].try_into().unwrap());
        let mode = u16::from_ne_bytes(data[20..22].try_into().unwrap());

        let payload = &data[HEADER_LEN..];
        if payload.len() < payload_len as usize {
            return Err(Error::NotFound);
        }
        let payload = &payload[..payload_len as usize];

        let body = match kind {
            NodeKind::Regular => NodeBody::Regular {
                data: payload.to_vec(),
            },
            NodeKind::Directory => {
                if payload.len() < DIR_HEADER_LEN {
                    return Err(Error::NotDir);
                }
                let count = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
                let mut cursor = DIR_HEADER_LEN;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    if cursor + DIRENT_HEADER_LEN > payload.len() {
                        return Err(Error::NotDir);
                    }
                    let e_inode =
                        u32::from_ne_bytes(payload[cursor..cursor + 4].try_into().unwrap());
                    let name_len = u16::from_ne_bytes(
                        payload[cursor + 4..cursor + 6].try_into().unwrap(),
                    ) as usize;
                    cursor += DIRENT_HEADER_LEN;
                    if cursor + name_len > payload.len() {
                        return Err(Error::NotDir);
                    }
                    let name = String::from_utf8_lossy(&payload[cursor..cursor + name_len])
                        .into_owned();
                    cursor += name_len;
                    entries.push(DirEntry { inode: e_inode, name });
                }
                NodeBody::Directory { entries }
            }
        };

        Ok(Node {
            inode,
            uid,
            gid,
            mode,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_round_trips() {
        let mut node = Node::new_file(0o644, b"delicious apples".to_vec());
        node.inode = 1024;
        let bytes = node.encode();
        let back = Node::decode(&bytes).unwrap();
        assert_eq!(back.inode, 1024);
        assert_eq!(back.mode, 0o644);
        assert!(matches!(back.body, NodeBody::Regular { data } if data == b"delicious apples"));
    }

    #[test]
    fn directory_round_trips_entries() {
        let entries = vec![
            DirEntry { inode: 1024, name: "apples".into() },
            DirEntry { inode: 2048, name: "l1".into() },
        ];
        let mut node = Node::new_dir(0o755, entries.clone());
        node.inode = 0;
        let bytes = node.encode();
        let back = Node::decode(&bytes).unwrap();
        assert_eq!(back.nlink(), 3);
        match back.body {
            NodeBody::Directory { entries: got } => assert_eq!(got, entries),
            _ => panic!("expected a directory"),
        }
    }

    #[test]
    fn decode_rejects_truncated_header() {
        assert!(Node::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn peek_payload_len_matches_encoded_value() {
        let node = Node::new_file(0o644, vec![1, 2, 3, 4, 5]);
        let bytes = node.encode();
        assert_eq!(Node::peek_payload_len(&bytes[..HEADER_LEN]).unwrap(), 5);
    }
}
