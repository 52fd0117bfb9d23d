// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::error::Result;

use serde::Deserialize;
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

fn default_heartbeat_secs() -> u64 {
    5
}

fn default_capacity_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

/// One file server daemon's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FsConfig {
    /// Where clients and peers send chunk transfers.
    pub public_addr: SocketAddr,
    /// Where the name server sends control requests. Also this file
    /// server's identity in the pool.
    pub private_addr: SocketAddr,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_capacity_bytes")]
    pub capacity_bytes: u64,
    /// Chunk directory; stored in memory only when absent.
    pub storage_dir: Option<PathBuf>,
    /// Where the name server's address is remembered across restarts.
    pub marker_path: Option<PathBuf>,
}

impl FsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}
