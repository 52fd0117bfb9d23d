// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The name server daemon.

use kumofs::{
    comms,
    log::init_node_logging,
    ns::{pool::Pool, pool::Tier, Namespace, NsConfig, NsContext, WireFsControl},
    protocol::messages::{AppRequest, NsRequest},
};

use clap::Parser;
use eyre::Result;
use std::{path::PathBuf, sync::Arc};
use tokio::task::spawn;

#[macro_use]
extern crate tracing;

#[derive(Parser, Debug)]
#[command(name = "kumofs-nsd", about = "kumofs name server")]
struct Args {
    /// Path to the TOML configuration.
    #[arg(long, default_value = "nsd.toml")]
    config: PathBuf,
    /// Log to rotating files under this directory instead of stdout.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_appender_guard = init_node_logging(&args.log_dir)?;

    let config = NsConfig::load(&args.config)?;
    info!("Loaded config with {} file servers", config.storage.len());

    let tree = match &config.namenode.data_dir {
        Some(dir) => Namespace::open(dir, config.namenode.snapshot_every)?,
        None => {
            warn!("No data_dir configured; the namespace will not survive a restart");
            Namespace::in_memory()
        }
    };

    let (pool, channels) = Pool::new(config.members(), config.pool_config());
    let ctx = NsContext::new(
        tree,
        pool.clone(),
        Arc::new(WireFsControl),
        config.namenode.chunk_size,
        config.namenode.private_addr,
    );

    let (public_listener, public_addr) = comms::bind(config.namenode.public_addr).await?;
    let (private_listener, private_addr) = comms::bind(config.namenode.private_addr).await?;
    info!("Serving clients on {public_addr}, file servers on {private_addr}");

    let app_ctx = ctx.clone();
    let _app = comms::serve(public_listener, move |_peer, request: AppRequest| {
        let ctx = app_ctx.clone();
        async move { ctx.handle_app(request).await }
    });
    let fs_ctx = ctx.clone();
    let _fs = comms::serve(private_listener, move |peer, request: NsRequest| {
        let ctx = fs_ctx.clone();
        async move { ctx.handle_fs(peer, request).await }
    });

    let _soft = spawn(
        pool.clone()
            .run_heartbeat_manager(Tier::Soft, channels.soft_rx),
    );
    let _hard = spawn(
        pool.clone()
            .run_heartbeat_manager(Tier::Hard, channels.hard_rx),
    );
    let _events = spawn(ctx.clone().run_pool_events(channels.events_rx));

    ctx.probe_file_servers().await;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
