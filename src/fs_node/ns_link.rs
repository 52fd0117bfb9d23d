// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The file server's links to the rest of the cluster: the callback
//! channel to the name server and the push channel to peer file
//! servers. Both are seams with wire and in-process test variants.

use super::error::{Error, Result};
use crate::{
    comms,
    protocol::{
        messages::{DataRequest, DataResponse, NsRequest, NsResponse},
        ChunkId, Token,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Mutex,
};
use tokio::task;
use tracing::{info, warn};

/// The file server's view of the name server.
///
/// The address is learned from the first probe and kept until restart;
/// a marker file remembers it across restarts.
pub trait NsConnector: Send + Sync {
    /// Reports a committed chunk write. Fire-and-forget.
    fn received_chunk(&self, id: ChunkId);

    /// Sends one heartbeat. Does nothing while the name server is
    /// unknown.
    fn pulse(&self);

    /// Records the name server's address. First caller wins.
    fn set_ns_addr(&self, addr: SocketAddr);

    fn ns_addr(&self) -> Option<SocketAddr>;

    /// Whether a caller at `ip` is the recorded name server. Every
    /// caller qualifies while no name server is recorded yet.
    fn is_ns(&self, ip: IpAddr) -> bool;
}

/// Production connector: talks to the name server's private port and
/// persists its address in a marker file.
pub struct WireNsConnector {
    /// Our own private address; our identity in the pool.
    my_addr: SocketAddr,
    ns_addr: Mutex<Option<SocketAddr>>,
    marker_path: Option<PathBuf>,
}

impl WireNsConnector {
    pub fn new(my_addr: SocketAddr, marker_path: Option<PathBuf>) -> Self {
        let remembered = marker_path.as_ref().and_then(|path| {
            let text = std::fs::read_to_string(path).ok()?;
            match text.trim().parse() {
                Ok(addr) => {
                    info!("Remembered name server at {addr} from {path:?}");
                    Some(addr)
                }
                Err(error) => {
                    warn!("Ignoring unparsable marker file {path:?}: {error}");
                    None
                }
            }
        });
        Self {
            my_addr,
            ns_addr: Mutex::new(remembered),
            marker_path,
        }
    }
}

impl NsConnector for WireNsConnector {
    fn received_chunk(&self, id: ChunkId) {
        let Some(ns) = self.ns_addr() else {
            warn!("Dropping chunk confirmation for {id}: no name server recorded");
            return;
        };
        let from = self.my_addr;
        let _handle = task::spawn(async move {
            let request = NsRequest::ConfirmChunk { id, from };
            if let Err(error) = comms::send_request::<_, NsResponse>(ns, request).await {
                warn!("Could not confirm chunk {id} to the name server: {error}");
            }
        });
    }

    fn pulse(&self) {
        let Some(ns) = self.ns_addr() else {
            return;
        };
        let from = self.my_addr;
        let _handle = task::spawn(async move {
            let request = NsRequest::Pulse { from };
            if let Err(error) = comms::send_request::<_, NsResponse>(ns, request).await {
                warn!("Could not send heartbeat to the name server: {error}");
            }
        });
    }

    fn set_ns_addr(&self, addr: SocketAddr) {
        {
            let mut ns = self.ns_addr.lock().expect("poisoned ns addr");
            if ns.is_some() {
                return;
            }
            *ns = Some(addr);
        }
        info!("Recorded name server at {addr}");
        if let Some(path) = &self.marker_path {
            if let Err(error) = std::fs::write(path, addr.to_string()) {
                warn!("Could not persist name server address to {path:?}: {error}");
            }
        }
    }

    fn ns_addr(&self) -> Option<SocketAddr> {
        *self.ns_addr.lock().expect("poisoned ns addr")
    }

    fn is_ns(&self, ip: IpAddr) -> bool {
        match self.ns_addr() {
            Some(addr) => addr.ip() == ip,
            None => true,
        }
    }
}

/// Outbound pushes of chunk bytes to a peer file server, used when
/// replicating.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn push_chunk(
        &self,
        dest: SocketAddr,
        id: ChunkId,
        token: Token,
        body: Bytes,
    ) -> Result<()>;
}

/// Production link: posts the chunk on the destination's public port.
pub struct WirePeerLink;

#[async_trait]
impl PeerLink for WirePeerLink {
    async fn push_chunk(
        &self,
        dest: SocketAddr,
        id: ChunkId,
        token: Token,
        body: Bytes,
    ) -> Result<()> {
        let request = DataRequest::PostChunk { id, token, body };
        match comms::send_request::<_, DataResponse>(dest, request).await? {
            DataResponse::Stored => Ok(()),
            DataResponse::Refused { status } => Err(Error::PushRefused { chunk: id, status }),
            DataResponse::Chunk { .. } => Err(Error::PushRefused {
                chunk: id,
                status: crate::protocol::Status::Internal,
            }),
        }
    }
}
