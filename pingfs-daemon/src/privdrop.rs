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

//! Drops root privileges once the raw ICMP socket is open (spec §6).
//!
//! Grounded in `ping.py::drop_privileges`: a raw socket needs root (or
//! `CAP_NET_RAW`) to open, but nothing past that point does, so the
//! daemon gives up root as soon as the socket exists.

use nix::unistd::{self, Gid, Uid};

/// Drops to the given uid/gid, clearing supplementary groups first and
/// setting a conservative umask, matching the order `ping.py` uses.
///
/// A no-op if the process isn't running as root, since there would be
/// nothing to drop.
pub fn drop_privileges(uid: u32, gid: u32) -> anyhow::Result<()> {
    if !unistd::geteuid().is_root() {
        return Ok(());
    }
    unistd::setgroups(&[])?;
    unistd::setgid(Gid::from_raw(gid))?;
    unistd::setuid(Uid::from_raw(uid))?;
    nix::sys::stat::umask(nix::sys::stat::Mode::from_bits_truncate(0o077));
    log::info!("dropped root privileges to uid={} gid={}", uid, gid);
    Ok(())
}
