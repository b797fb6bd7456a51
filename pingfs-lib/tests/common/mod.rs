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

//! An in-process fake echo host so the L1-and-up test suites don't
//! need root or a real network (spec §6 "test tooling").
//!
//! Every "packet" sent to it is handed straight back unmodified over a
//! second channel, exactly like a real host replying to an ICMP Echo
//! Request — which is all `BlockStore` needs from its transport.

use pingfs_lib::blockstore::{BlockStore, BlockStoreConfig};
use pingfs_lib::disk::ByteDisk;
use pingfs_lib::error::Result;
use pingfs_lib::fs::Fs;
use pingfs_lib::icmp::{IcmpReceiver, IcmpSender};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const FAKE_REMOTE: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

struct FakeSender {
    to_remote: mpsc::Sender<(u32, Vec<u8>)>,
}

impl IcmpSender for FakeSender {
    fn send(&mut self, _dst: IpAddr, block_id: u32, data: &[u8]) -> Result<()> {
        let _ = self.to_remote.send((block_id, data.to_vec()));
        Ok(())
    }
}

struct FakeReceiver {
    from_remote: mpsc::Receiver<(u32, Vec<u8>)>,
}

impl IcmpReceiver for FakeReceiver {
    fn recv(&mut self, timeout: Duration) -> Result<Option<(IpAddr, u32, Vec<u8>)>> {
        match self.from_remote.recv_timeout(timeout) {
            Ok((id, data)) => Ok(Some((FAKE_REMOTE, id, data))),
            Err(_) => Ok(None),
        }
    }
}

/// Spawns a fake remote and a [`BlockStore`] talking to it, along with
/// a sender that feeds straight into the store's receiver as if it
/// were a reply from the remote — used to inject a corrupt (id 0)
/// reply without having to trick the relay into producing one.
pub fn fake_block_store_with_injector(
    block_size_hint: usize,
) -> (Arc<BlockStore>, mpsc::Sender<(u32, Vec<u8>)>) {
    let (to_remote_tx, to_remote_rx) = mpsc::channel::<(u32, Vec<u8>)>();
    let (from_remote_tx, from_remote_rx) = mpsc::channel::<(u32, Vec<u8>)>();

    let injector = from_remote_tx.clone();

    std::thread::spawn(move || {
        while let Ok((id, data)) = to_remote_rx.recv() {
            // A real round trip has non-zero latency; without this a live
            // block's echo loop would spin as fast as the CPU allows.
            std::thread::sleep(Duration::from_millis(2));
            let _ = from_remote_tx.send((id, data));
        }
    });
    let tx = Box::new(FakeSender { to_remote: to_remote_tx });
    let rx = Box::new(FakeReceiver { from_remote: from_remote_rx });
    let cfg = BlockStoreConfig {
        op_timeout: Duration::from_millis(50),
        block_size_hint,
        recv_buffer: 0,
    };
    let store = BlockStore::connect_with_transport(FAKE_REMOTE, tx, rx, cfg)
        .expect("fake transport calibration should always succeed");
    (Arc::new(store), injector)
}

/// Spawns a fake remote and a [`BlockStore`] talking to it, with a
/// short block size so multi-block tests stay cheap.
pub fn fake_block_store(block_size_hint: usize) -> Arc<BlockStore> {
    fake_block_store_with_injector(block_size_hint).0
}

pub fn fake_fs(block_size_hint: usize) -> Fs {
    let store = fake_block_store(block_size_hint);
    let disk = Arc::new(ByteDisk::new(store));
    Fs::format(disk).expect("fake transport should never raise CorruptIdZero during format")
}
