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

mod config;
mod privdrop;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pingfs_lib::adapter::Adapter;
use pingfs_lib::blockstore::{BlockStore, BlockStoreConfig};
use pingfs_lib::disk::ByteDisk;
use pingfs_lib::fs::Fs;

#[macro_use]
extern crate log;
extern crate env_logger;

#[derive(Parser)]
#[clap(
    version = "0.1.0",
    author = "David Martinez Marti <deavidsedice@gmail.com>"
)]
struct Opts {
    #[clap(short, long, default_value = "pingfs_config.ron")]
    config: String,
    #[clap(long, default_value = "65534")]
    drop_uid: u32,
    #[clap(long, default_value = "65534")]
    drop_gid: u32,
}

fn read_config(filepath: &str) -> config::DaemonConfig {
    match config::DaemonConfig::from_filepath(filepath) {
        Ok(cfg) => cfg,
        Err(e) => {
            panic!("error parsing config file '{}': {:?}", filepath, e);
        }
    }
}

/// Tries each candidate host in order and returns the first one that
/// calibrates successfully, grounded in `ping.py::select_server`'s
/// "probe every candidate, keep the best" loop — simplified to
/// first-success since block-size calibration already measures RTT.
fn select_server(hosts: &[String], cfg: &config::DaemonConfig) -> anyhow::Result<Arc<BlockStore>> {
    for host in hosts {
        info!("probing candidate host {}", host);
        let store_cfg = BlockStoreConfig {
            op_timeout: cfg.op_timeout(),
            block_size_hint: cfg.block_size_hint,
            ..Default::default()
        };
        match BlockStore::connect(host, store_cfg) {
            Ok(store) => {
                info!(
                    "selected {} (block_size={})",
                    host,
                    store.block_size()
                );
                return Ok(Arc::new(store));
            }
            Err(e) => warn!("{} did not respond to calibration: {}", host, e),
        }
    }
    anyhow::bail!("no candidate host answered calibration")
}

/// Exercises the full adapter surface against a freshly formatted
/// filesystem, since no FUSE binding is wired up (out of scope).
fn run_diagnostics(adapter: &Adapter) -> anyhow::Result<()> {
    adapter.mkdir("/tmp", 0o755)?;
    adapter.create("/tmp/hello", 0o644)?;
    adapter.write("/tmp/hello", b"pingfs is alive", 0)?;
    let data = adapter.read("/tmp/hello", 64, 0)?;
    info!("round trip read back: {:?}", String::from_utf8_lossy(&data));

    let attr = adapter.getattr("/tmp/hello")?;
    info!(
        "attr: inode={} size={} mode={:o}",
        attr.inode, attr.size, attr.mode
    );

    let entries = adapter.readdir("/tmp")?;
    info!("/tmp entries: {:?}", entries);

    adapter.unlink("/tmp/hello")?;
    adapter.rmdir("/tmp")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg = read_config(&opts.config);

    let store = select_server(&cfg.candidate_hosts, &cfg)?;
    privdrop::drop_privileges(opts.drop_uid, opts.drop_gid)?;

    let disk = Arc::new(ByteDisk::new(Arc::clone(&store)));
    let fs = Fs::format(disk)?;
    let adapter = Adapter::new(fs);

    info!("pingfs ready, mountpoint (unused, no FUSE binding): {}", cfg.mountpoint);
    run_diagnostics(&adapter)?;

    info!(
        "live block count at exit: {}",
        store.live_block_count()
    );
    std::thread::sleep(Duration::from_millis(10));
    Ok(())
}
