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

//! End-to-end block store behavior against the in-process fake remote
//! (spec §8, scenario S1).

mod common;

use common::{fake_block_store, fake_block_store_with_injector};
use pingfs_lib::error::Error;

#[test]
fn s1_single_block_round_trip_then_delete() {
    let store = fake_block_store(16);
    let block_size = store.block_size();

    store.write_blocking(7, b"coconut").unwrap();
    std::thread::sleep(store.safe_timeout());

    let mut expected = b"coconut".to_vec();
    expected.resize(block_size, 0);
    assert_eq!(store.read_blocking(7).unwrap(), expected);

    store.delete_blocking(7).unwrap();
    std::thread::sleep(store.safe_timeout());

    assert_eq!(store.read_blocking(7).unwrap(), vec![0u8; block_size]);
}

#[test]
fn write_of_all_zeros_is_equivalent_to_delete() {
    let store = fake_block_store(8);
    let block_size = store.block_size();

    store.write_blocking(3, b"hello").unwrap();
    std::thread::sleep(store.safe_timeout());
    assert_ne!(store.read_blocking(3).unwrap(), vec![0u8; block_size]);

    store.write_blocking(3, &vec![0u8; block_size]).unwrap();
    std::thread::sleep(store.safe_timeout());
    assert_eq!(store.read_blocking(3).unwrap(), vec![0u8; block_size]);
}

#[test]
fn observe_live_reports_blocks_cycling_during_the_window() {
    let store = fake_block_store(8);
    store.write_blocking(11, b"x").unwrap();
    store.write_blocking(22, b"y").unwrap();
    std::thread::sleep(store.safe_timeout());

    let live = store.observe_live(store.safe_timeout());
    assert!(live.contains(&11));
    assert!(live.contains(&22));
}

#[test]
fn corrupt_id_zero_reply_poisons_the_store() {
    let (store, injector) = fake_block_store_with_injector(8);

    // Simulate the remote echoing back a reply tagged with block id 0
    // (spec §7 CORRUPT_ID_ZERO) without waiting for a real one to occur
    // naturally.
    injector.send((0, vec![1, 2, 3])).unwrap();
    std::thread::sleep(store.safe_timeout());

    assert!(matches!(
        store.write_blocking(1, b"x"),
        Err(Error::CorruptIdZero)
    ));
    assert!(matches!(store.read_blocking(1), Err(Error::CorruptIdZero)));
    assert!(matches!(
        store.delete_blocking(1),
        Err(Error::CorruptIdZero)
    ));
}
