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

//! PingFS — a filesystem whose only storage medium is the echo of an
//! ICMP Echo Request held open on a remote host's kernel.
//!
//! Layered bottom to top: [`icmp`] speaks the wire protocol, [`blockstore`]
//! turns a round trip into an addressable, crash-tolerant-within-the-
//! process block store (L1), [`disk`] makes those fixed-size blocks
//! byte-addressable with a region allocator (L2), [`fs`] layers inode-
//! style files and directories on top (L3), and [`adapter`] exposes all
//! of that as the operation surface a userspace filesystem binding
//! would call into.

pub mod adapter;
pub mod blockstore;
pub mod disk;
pub mod error;
pub mod fs;
pub mod icmp;
pub mod signal;

pub use error::{Error, Result};
