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

//! FS metadata layer behavior (spec §8, scenarios S4/S5/S6).

mod common;

use common::fake_fs;
use pingfs_lib::error::Error;
use pingfs_lib::fs::NodeBody;

#[test]
fn s4_directory_composition() {
    let fs = fake_fs(64);

    fs.mkdir("/l1", 0o755).unwrap();
    fs.create("/apples", b"delicious apples", 0, 0o644).unwrap();
    fs.create("/l1/banana", b"ripe yellow bananas", 0, 0o644)
        .unwrap();

    let apples = fs.get("/apples").unwrap();
    assert!(matches!(apples.body, NodeBody::Regular{data} if data == b"delicious apples"));

    let banana = fs.get("/l1/banana").unwrap();
    assert!(matches!(banana.body, NodeBody::Regular{data} if data == b"ripe yellow bananas"));

    let mut names = fs.readdir("/").unwrap();
    names.sort();
    let mut expected = vec![".", "..", "apples", "l1"];
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn s5_growth_triggers_relocation_when_neighbor_is_occupied() {
    let fs = fake_fs(64);
    let block_size = 64usize;

    fs.create("/f", &vec![1u8; block_size], 0, 0o644).unwrap();
    let before = fs.get("/f").unwrap();

    // Occupy the block immediately after "f"'s region so growth has to
    // relocate rather than extend in place.
    let disk_size = before.disk_size() as u64;
    let bs = block_size as u64;
    let blocks_used = ((disk_size + bs - 1) / bs) as u32;
    let neighbor_inode = before.inode + blocks_used * block_size as u32;
    let mut blocker = pingfs_lib::fs::Node::new_file(0o644, vec![9u8; 1]);
    fs.add(&mut blocker, Some(neighbor_inode)).unwrap();

    fs.write_file("/f", &vec![2u8; block_size * 4], 0).unwrap();

    let after = fs.get("/f").unwrap();
    assert_ne!(before.inode, after.inode);
    assert!(matches!(after.body, NodeBody::Regular{data} if data == vec![2u8; block_size*4]));

    let (parent, _) = fs.get_both("/f").unwrap();
    match parent.body {
        NodeBody::Directory { entries } => {
            let entry = entries.iter().find(|e| e.name == "f").unwrap();
            assert_eq!(entry.inode, after.inode);
        }
        _ => panic!("root should be a directory"),
    }
}

#[test]
fn s6_rename_across_directories() {
    let fs = fake_fs(64);
    fs.mkdir("/a", 0o755).unwrap();
    fs.mkdir("/b", 0o755).unwrap();
    fs.create("/a/x", b"payload", 0, 0o644).unwrap();

    fs.rename("/a/x", "/b/x").unwrap();

    assert!(matches!(fs.get("/a/x"), Err(Error::NotFound)));
    let moved = fs.get("/b/x").unwrap();
    assert!(matches!(moved.body, NodeBody::Regular{data} if data == b"payload"));
}

#[test]
fn unlink_refuses_root() {
    let fs = fake_fs(64);
    assert!(matches!(fs.unlink("/"), Err(Error::Busy)));
}

#[test]
fn unlink_then_get_returns_not_found() {
    let fs = fake_fs(64);
    fs.create("/gone", b"x", 0, 0o644).unwrap();
    fs.unlink("/gone").unwrap();
    assert!(matches!(fs.get("/gone"), Err(Error::NotFound)));
}
