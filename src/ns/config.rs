// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{error::Result, pool::PoolConfig};

use serde::Deserialize;
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};

fn default_chunk_size() -> u64 {
    1024 * 1024
}

fn default_replicas() -> usize {
    2
}

fn default_soft_death_secs() -> u64 {
    12
}

fn default_hard_death_secs() -> u64 {
    180
}

fn default_snapshot_every() -> usize {
    64
}

/// The name server daemon's configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NsConfig {
    pub namenode: NamenodeConfig,
    pub storage: Vec<StorageNodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NamenodeConfig {
    /// Where clients send app requests.
    pub public_addr: SocketAddr,
    /// Where file servers send pulses and confirmations.
    pub private_addr: SocketAddr,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default = "default_soft_death_secs")]
    pub soft_death_secs: u64,
    #[serde(default = "default_hard_death_secs")]
    pub hard_death_secs: u64,
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,
    /// Namespace journal and snapshot live here; in-memory when
    /// absent.
    pub data_dir: Option<PathBuf>,
}

/// One registered file server.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageNodeConfig {
    pub private_addr: SocketAddr,
    pub public_addr: SocketAddr,
}

impl NsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            replicas: self.namenode.replicas,
            soft_death: Duration::from_secs(self.namenode.soft_death_secs),
            hard_death: Duration::from_secs(self.namenode.hard_death_secs),
        }
    }

    pub fn members(&self) -> Vec<(SocketAddr, SocketAddr)> {
        self.storage
            .iter()
            .map(|node| (node.private_addr, node.public_addr))
            .collect()
    }
}
