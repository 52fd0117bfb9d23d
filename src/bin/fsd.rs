// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The file server daemon.

use kumofs::{
    comms,
    fs_node::{FsConfig, FsNode, Heart, WireNsConnector, WirePeerLink},
    log::init_node_logging,
    protocol::messages::{ControlRequest, DataRequest},
    storage::{ChunkStore, DiskChunkStore, MemoryChunkStore},
};

use clap::Parser;
use eyre::Result;
use std::{path::PathBuf, sync::Arc};
use tokio::task::spawn;

#[macro_use]
extern crate tracing;

#[derive(Parser, Debug)]
#[command(name = "kumofs-fsd", about = "kumofs file server")]
struct Args {
    /// Path to the TOML configuration.
    #[arg(long, default_value = "fsd.toml")]
    config: PathBuf,
    /// Log to rotating files under this directory instead of stdout.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_appender_guard = init_node_logging(&args.log_dir)?;

    let config = FsConfig::load(&args.config)?;

    let store: Arc<dyn ChunkStore> = match &config.storage_dir {
        Some(dir) => {
            info!("Storing chunks under {dir:?}");
            Arc::new(DiskChunkStore::open(dir, config.capacity_bytes)?)
        }
        None => {
            warn!("No storage_dir configured; chunks are held in memory only");
            Arc::new(MemoryChunkStore::new(config.capacity_bytes))
        }
    };

    let ns = Arc::new(WireNsConnector::new(
        config.private_addr,
        config.marker_path.clone(),
    ));
    let node = Arc::new(FsNode::new(store, ns.clone(), Arc::new(WirePeerLink)));

    let (public_listener, public_addr) = comms::bind(config.public_addr).await?;
    let (private_listener, private_addr) = comms::bind(config.private_addr).await?;
    info!("Serving chunks on {public_addr}, control on {private_addr}");

    let data_node = node.clone();
    let _data = comms::serve(public_listener, move |peer, request: DataRequest| {
        let node = data_node.clone();
        async move { node.handle_data(peer, request).await }
    });
    let control_node = node.clone();
    let _control = comms::serve(private_listener, move |peer, request: ControlRequest| {
        let node = control_node.clone();
        async move { node.handle_control(peer, request).await }
    });

    let _heart = spawn(Heart::new(ns, config.heartbeat()).run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
