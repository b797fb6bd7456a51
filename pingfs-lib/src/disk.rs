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

//! Byte-addressable disk — L2 (spec §3, §4.3).
//!
//! Grounded in `ping_disk.py`'s `PingDisk`: block/byte arithmetic,
//! read-modify-write splicing at the edges of a byte range, and the
//! append-at-top / best-fit region allocator. The append-at-top
//! arithmetic uses explicit ceiling division rather than the
//! original's float-based `math.ceil`, which can misround near
//! multiples of the region size.

use crate::blockstore::{self, BlockStore};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn ceil_div(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Byte-addressable view over a [`BlockStore`]'s fixed-size blocks.
pub struct ByteDisk {
    store: Arc<BlockStore>,
}

impl ByteDisk {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self { store }
    }

    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    /// Region granularity used by the allocator: at least 2 blocks, or
    /// enough blocks to cover 4 KiB, whichever is larger (spec §4.3).
    pub fn region_size(&self) -> u64 {
        let b = self.block_size() as u64;
        (4096 / b).max(2)
    }

    fn block_of(&self, byte_offset: u64) -> u32 {
        (byte_offset / self.block_size() as u64 + 1) as u32
    }

    /// Reads `len` bytes starting at `offset`, spanning as many blocks
    /// as needed. Every block's Read is issued to L1 up front and only
    /// then awaited, so a multi-block read costs one round trip rather
    /// than one per block (spec §4.3 "issue a Read per block in
    /// parallel via L1, wait all, then slice").
    pub fn read(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let block_size = self.block_size() as u64;
        let first_block = self.block_of(offset);
        let last_block = self.block_of(offset + len - 1);
        let signals = (first_block..=last_block)
            .map(|block_id| self.store.read(block_id))
            .collect::<Result<Vec<_>>>()?;
        let mut buf = Vec::with_capacity(len as usize);
        for signal in signals {
            buf.extend(signal.wait());
        }
        let start_in_first = offset % block_size;
        let end = (start_in_first + len) as usize;
        Ok(buf[start_in_first as usize..end.min(buf.len())].to_vec())
    }

    /// Writes `data` at `offset`, read-modify-writing the first and
    /// last touched blocks so partial-block writes don't clobber their
    /// neighbors.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let block_size = self.block_size() as u64;
        let first_block = self.block_of(offset);
        let last_block = self.block_of(offset + data.len() as u64 - 1);
        let start_in_first = (offset % block_size) as usize;

        if first_block == last_block {
            let mut merged = self.store.read_blocking(first_block)?;
            merged.resize(block_size as usize, 0);
            merged[start_in_first..start_in_first + data.len()].copy_from_slice(data);
            self.store.write_blocking(first_block, &merged)?;
            return Ok(());
        }

        let mut cursor = 0usize;
        let first_chunk_len = block_size as usize - start_in_first;
        let mut first = self.store.read_blocking(first_block)?;
        first.resize(block_size as usize, 0);
        first[start_in_first..].copy_from_slice(&data[..first_chunk_len]);
        self.store.write_blocking(first_block, &first)?;
        cursor += first_chunk_len;

        for block_id in (first_block + 1)..last_block {
            let chunk = &data[cursor..cursor + block_size as usize];
            self.store.write_blocking(block_id, chunk)?;
            cursor += block_size as usize;
        }

        let remaining = data.len() - cursor;
        let mut last = self.store.read_blocking(last_block)?;
        last.resize(block_size as usize, 0);
        last[..remaining].copy_from_slice(&data[cursor..]);
        self.store.write_blocking(last_block, &last)?;
        Ok(())
    }

    /// Deletes every block fully or partially covered by `[offset, offset+len)`.
    pub fn delete(&self, offset: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let first_block = self.block_of(offset);
        let last_block = self.block_of(offset + len - 1);
        for block_id in first_block..=last_block {
            self.store.delete_blocking(block_id)?;
        }
        Ok(())
    }

    fn observed(&self) -> std::collections::HashSet<u32> {
        self.store.observe_live(self.store.safe_timeout())
    }

    pub fn used_blocks(&self) -> std::collections::BTreeMap<u32, u32> {
        blockstore::used(&self.observed())
    }

    pub fn free_blocks(&self) -> std::collections::BTreeMap<u32, u32> {
        blockstore::free(&self.observed())
    }

    /// Checks whether growing an in-place region from `current_length`
    /// to `new_length` bytes (both starting at block `start`) stays
    /// collision-free. If the new size still fits within the blocks
    /// already occupied, trivially `Some(start)`; otherwise only the
    /// newly-required blocks are checked against the observed live set
    /// (spec §4.3 `test_region`).
    pub fn test_region(&self, start: u32, current_length: u64, new_length: u64) -> Option<u32> {
        let b = self.block_size() as u64;
        let old_blocks = ceil_div(current_length, b).max(1) as u32;
        let new_blocks = ceil_div(new_length, b).max(1) as u32;
        if new_blocks <= old_blocks {
            return Some(start);
        }
        let live = self.observed();
        let extra = (start + old_blocks)..(start + new_blocks);
        if extra.clone().any(|id| live.contains(&id)) {
            None
        } else {
            Some(start)
        }
    }

    /// Finds `needed` contiguous free blocks: append at the top of the
    /// known address space first, falling back to the smallest gap wide
    /// enough to hold the request (spec §4.3 "Allocation policy").
    pub fn get_region(&self, needed: u32) -> Result<u32> {
        const ID_CAP: u64 = 1 << 28;
        let r = self.region_size();
        let free = self.free_blocks();

        if let Some((&top, _)) = free.iter().max_by_key(|(start, _)| **start) {
            let rounded = ceil_div(top as u64, r) * r;
            let rounded = rounded.max(1);
            if rounded + needed as u64 <= ID_CAP {
                return Ok(rounded as u32);
            }
        }

        let mut best: Option<(u32, u32)> = None; // (width, start)
        for (&start, &width) in free.iter() {
            if width >= needed && (best.is_none() || width < best.unwrap().0) {
                best = Some((width, start));
            }
        }
        best.map(|(_, start)| start).ok_or(Error::NoSpace)
    }
}

#[cfg(test)]
mod tests {
    use super::ceil_div;

    #[test]
    fn ceil_div_rounds_up() {
        assert_eq!(ceil_div(9, 4), 3);
        assert_eq!(ceil_div(8, 4), 2);
        assert_eq!(ceil_div(1, 4), 1);
        assert_eq!(ceil_div(0, 4), 0);
    }
}
