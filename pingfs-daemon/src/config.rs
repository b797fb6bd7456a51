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

//! Daemon configuration (spec §6 "ambient stack").
//!
//! Follows `zzping-daemon/src/config.rs`'s `ServerConfig` pattern: a
//! plain serde struct loaded from a RON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration parameters for the PingFS daemon.
#[derive(Serialize, Deserialize, Debug)]
pub struct DaemonConfig {
    /// Candidate hosts to probe; the first one that answers a calibration
    /// echo is used as the block store's remote (`ping.py::select_server`).
    pub candidate_hosts: Vec<String>,
    /// Hint passed to block-size calibration, in bytes.
    pub block_size_hint: usize,
    /// Per-operation timeout, in milliseconds.
    pub op_timeout_ms: u64,
    /// Where the filesystem would be mounted. Recorded but unused: no
    /// FUSE binding is included.
    pub mountpoint: String,
}

impl DaemonConfig {
    /// Reads a file located at `filepath` and constructs a `DaemonConfig` from it.
    pub fn from_filepath(filepath: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(filepath)?;
        Self::from_str(&contents)
    }
    /// Constructs a `DaemonConfig` from the string passed.
    pub fn from_str(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(ron::de::from_str(contents)?)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use core::panic;
    use std::io::Write;

    use super::*;
    const SAMPLE_CFG: &str = r#"
        DaemonConfig(
            candidate_hosts: [
                "192.168.0.1",
                "8.8.8.8",
            ],
            block_size_hint: 1024,
            op_timeout_ms: 400,
            mountpoint: "/mnt/pingfs",
        )
    "#;

    #[test]
    fn test_from_str_empty() {
        let config = "";
        if let Ok(_cfg) = DaemonConfig::from_str(config) {
            panic!("This should have returned an error");
        }
    }
    #[test]
    fn test_from_str_valid() {
        match DaemonConfig::from_str(SAMPLE_CFG) {
            Err(e) => {
                dbg!(e);
                panic!("Error constructing the config");
            }
            Ok(cfg) => {
                assert_eq!(cfg.candidate_hosts, vec!["192.168.0.1", "8.8.8.8"]);
                assert_eq!(cfg.block_size_hint, 1024);
                assert_eq!(cfg.op_timeout(), Duration::from_millis(400));
                assert_eq!(cfg.mountpoint, "/mnt/pingfs");
            }
        }
    }
    #[test]
    fn test_from_file_valid() {
        let mut tmpfile = tempfile::NamedTempFile::new().unwrap();

        write!(tmpfile.as_file_mut(), "{}", &SAMPLE_CFG).unwrap();
        // Close the file, but keep the path to it around.
        let path = tmpfile.into_temp_path();
        dbg!(&path);
        match DaemonConfig::from_filepath(path.to_str().unwrap()) {
            Err(e) => {
                dbg!(e);
                panic!("Error constructing the config");
            }
            Ok(cfg) => {
                assert_eq!(cfg.candidate_hosts, vec!["192.168.0.1", "8.8.8.8"]);
                assert_eq!(cfg.block_size_hint, 1024);
            }
        }
        path.close().unwrap();
    }
    #[test]
    fn test_from_file_nofile() {
        match DaemonConfig::from_filepath("") {
            Err(e) => {
                dbg!(e);
            }
            Ok(_cfg) => {
                panic!("This should have failed, filepath is empty");
            }
        }
    }
}
