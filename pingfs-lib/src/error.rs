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

//! Error taxonomy for the PingFS storage engine (spec §7).
//!
//! `Error` covers the transport and block-store layers (L1); the FS
//! metadata layer (L3) and the adapter reuse the same enum rather than
//! inventing a parallel one, since the POSIX-flavoured variants
//! (`NotFound`, `Exists`, `NotDir`, `IsDir`, `NotImplemented`) sit
//! naturally alongside the network ones and the adapter is the only
//! consumer that needs to translate them outward.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Raw socket creation was denied by the OS. Fatal at startup.
    #[error("permission denied opening raw ICMP socket (are we root?)")]
    Permission,

    /// The probed remote corrupted, dropped, or misrouted a calibration echo.
    #[error("setup failed against {host}: {reason}")]
    Setup { host: String, reason: String },

    /// Transient send failure or malformed reply. Never fatal.
    #[error("network error: {0}")]
    Network(String),

    /// The remote echoed back an Echo Reply carrying block id 0.
    #[error("remote host corrupted our identifier: received id 0")]
    CorruptIdZero,

    /// The region allocator found no fit.
    #[error("no space left on pingfs")]
    NoSpace,

    /// Path does not resolve to any node.
    #[error("not found")]
    NotFound,

    /// Path already resolves to a node where none was expected.
    #[error("already exists")]
    Exists,

    /// Expected a directory, found a regular file.
    #[error("not a directory")]
    NotDir,

    /// Expected a regular file, found a directory.
    #[error("is a directory")]
    IsDir,

    /// Operation intentionally unsupported by this adapter.
    #[error("not implemented")]
    NotImplemented,

    /// Refused: the root directory may never be unlinked, renamed, or relocated.
    #[error("operation not permitted on the root directory")]
    Busy,
}

pub type Result<T> = std::result::Result<T, Error>;
