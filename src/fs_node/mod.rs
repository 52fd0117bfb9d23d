// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The file server: chunk transfers for clients and peers, gated by
//! one-shot expectations, plus the control surface the name server
//! drives.

mod config;
mod error;
pub mod expectation;
mod heart;
mod ns_link;

pub use self::{
    config::FsConfig,
    error::{Error, Result},
    heart::Heart,
    ns_link::{NsConnector, PeerLink, WireNsConnector, WirePeerLink},
};

use self::expectation::ExpectationDb;
use crate::{
    protocol::{
        messages::{ControlRequest, ControlResponse, DataRequest, DataResponse},
        ChunkId, ExpectAction, Status, Token,
    },
    storage::{self, ChunkStore},
};

use bytes::Bytes;
use std::{net::SocketAddr, sync::Arc};
use tokio::task;
use tracing::{debug, info, warn};

/// One file server. Clones of the inner stores are shared with the
/// background tasks it spawns.
pub struct FsNode {
    store: Arc<dyn ChunkStore>,
    expectations: ExpectationDb,
    ns: Arc<dyn NsConnector>,
    peers: Arc<dyn PeerLink>,
}

impl FsNode {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        ns: Arc<dyn NsConnector>,
        peers: Arc<dyn PeerLink>,
    ) -> Self {
        Self {
            store,
            expectations: ExpectationDb::new(),
            ns,
            peers,
        }
    }

    /// Serves one data-plane request from a client or a peer.
    pub async fn handle_data(&self, peer: SocketAddr, request: DataRequest) -> DataResponse {
        match request {
            DataRequest::GetChunk { id, token } => {
                debug!("Chunk READ request from {peer}: id={id} token={token}");
                self.send_chunk(id, token).await
            }
            DataRequest::PostChunk { id, token, body } => {
                debug!("Chunk WRITE request from {peer}: id={id} token={token}");
                self.receive_chunk(id, token, body).await
            }
        }
    }

    /// Serves one control-plane request. Only the recorded name server
    /// may issue these; the first probe is what records it.
    pub async fn handle_control(
        &self,
        peer: SocketAddr,
        request: ControlRequest,
    ) -> ControlResponse {
        if let ControlRequest::Probe { reply_to } = request {
            return self.probe(peer, reply_to).await;
        }
        if !self.ns.is_ns(peer.ip()) {
            warn!("Refusing control request from non-name-server {peer}");
            return ControlResponse::Refused {
                status: Status::Unauthorized,
            };
        }
        match request {
            ControlRequest::Expect {
                token,
                action,
                chunks,
            } => self.expect(token, action, chunks).await,
            ControlRequest::CancelToken { token } => self.cancel_token(token),
            ControlRequest::Purge { chunks } => self.purge(chunks),
            ControlRequest::Replicate {
                token,
                dest,
                chunks,
            } => self.replicate(token, dest, chunks).await,
            ControlRequest::Probe { .. } => unreachable!("handled above"),
        }
    }

    async fn send_chunk(&self, id: ChunkId, token: Token) -> DataResponse {
        if self.expectations.action_for(&token, &id) != ExpectAction::Read {
            return DataResponse::Refused {
                status: Status::Unauthorized,
            };
        }
        // From here on the pair is consumed no matter how we exit.
        let _fulfilment = Fulfilment::new(self, token, id);

        match self.store.get(&id).await {
            Ok(content) => DataResponse::Chunk {
                body: content.into_bytes(),
            },
            Err(storage::Error::ChunkNotFound(_)) => DataResponse::Refused {
                status: Status::NotFound,
            },
            Err(error) => {
                warn!("Reading chunk {id} failed: {error}");
                DataResponse::Refused {
                    status: Status::Internal,
                }
            }
        }
    }

    async fn receive_chunk(&self, id: ChunkId, token: Token, body: Bytes) -> DataResponse {
        if self.expectations.action_for(&token, &id) != ExpectAction::Write {
            return DataResponse::Refused {
                status: Status::Unauthorized,
            };
        }
        let _fulfilment = Fulfilment::new(self, token, id);

        let mut writer = match self.store.create(&id).await {
            Ok(writer) => writer,
            Err(storage::Error::ChunkExists(_)) => {
                return DataResponse::Refused {
                    status: Status::Forbidden,
                }
            }
            Err(error) => {
                warn!("Opening chunk {id} for write failed: {error}");
                return DataResponse::Refused {
                    status: Status::Internal,
                };
            }
        };

        let committed = async {
            writer.write_all(&body).await?;
            writer.commit().await
        }
        .await;

        match committed {
            Ok(()) => {
                self.ns.received_chunk(id);
                DataResponse::Stored
            }
            Err(error) => {
                warn!("Writing chunk {id} failed: {error}");
                DataResponse::Refused {
                    status: Status::Internal,
                }
            }
        }
    }

    async fn expect(
        &self,
        token: Token,
        action: ExpectAction,
        chunks: Vec<ChunkId>,
    ) -> ControlResponse {
        if action == ExpectAction::Nothing {
            return ControlResponse::Refused {
                status: Status::BadRequest,
            };
        }
        // Reads are all-or-nothing: no partial expectation may remain
        // when any chunk is absent.
        if action == ExpectAction::Read {
            for id in &chunks {
                if !self.store.exists(id).await {
                    return ControlResponse::Refused {
                        status: Status::NotFound,
                    };
                }
            }
        }
        match self.expectations.set(token, action, chunks) {
            Ok(()) => ControlResponse::Accepted,
            Err(Error::TokenConflict(token)) => {
                warn!("Refusing duplicate expectation under token {token}");
                ControlResponse::Refused {
                    status: Status::Forbidden,
                }
            }
            Err(error) => {
                warn!("Registering expectation failed: {error}");
                ControlResponse::Refused {
                    status: Status::Internal,
                }
            }
        }
    }

    fn cancel_token(&self, token: Token) -> ControlResponse {
        let outcome = self.expectations.cancel(&token);
        self.schedule_removals(outcome.purge);
        ControlResponse::Accepted
    }

    fn purge(&self, chunks: Vec<ChunkId>) -> ControlResponse {
        let now = self.expectations.make_obsolete(chunks);
        self.schedule_removals(now);
        ControlResponse::Accepted
    }

    async fn probe(&self, peer: SocketAddr, reply_to: SocketAddr) -> ControlResponse {
        if !self.ns.is_ns(peer.ip()) {
            warn!("Refusing probe from {peer}: another name server is recorded");
            return ControlResponse::Refused {
                status: Status::Unauthorized,
            };
        }
        self.ns.set_ns_addr(reply_to);
        ControlResponse::Available {
            bytes: self.store.bytes_available(),
        }
    }

    /// Pushes chunks to a peer under a self-issued read expectation, so
    /// the bytes cannot be purged mid-push. Per-chunk failures are
    /// logged and skipped; the caller always gets an accept.
    async fn replicate(
        &self,
        token: Token,
        dest: SocketAddr,
        chunks: Vec<ChunkId>,
    ) -> ControlResponse {
        let mut present = Vec::new();
        for id in chunks {
            if self.store.exists(&id).await {
                present.push(id);
            } else {
                warn!("Cannot replicate {id}: not stored here");
            }
        }
        if present.is_empty() {
            return ControlResponse::Accepted;
        }
        if let Err(error) = self
            .expectations
            .set(token, ExpectAction::Read, present.clone())
        {
            warn!("Cannot self-authorize replication under {token}: {error}");
            return ControlResponse::Accepted;
        }
        for id in present {
            if let Err(error) = self.push_one(token, dest, id).await {
                warn!("Replicating {id} to {dest} failed: {error}");
            }
        }
        ControlResponse::Accepted
    }

    async fn push_one(&self, token: Token, dest: SocketAddr, id: ChunkId) -> Result<()> {
        let _fulfilment = Fulfilment::new(self, token, id);
        let body = {
            let content = self.store.get(&id).await?;
            // Release the read lock before going on the wire.
            content.into_bytes()
        };
        self.peers.push_chunk(dest, id, token, body).await?;
        info!("Replicated {id} to {dest}");
        Ok(())
    }

    /// Destroys chunks in the background; failures are logged, never
    /// propagated into the request that triggered them.
    fn schedule_removals(&self, ids: Vec<ChunkId>) {
        if ids.is_empty() {
            return;
        }
        let store = self.store.clone();
        let _handle = task::spawn(async move {
            for id in ids {
                match store.remove(&id).await {
                    Ok(()) => info!("Purged chunk {id}"),
                    Err(error) => warn!("Purging chunk {id} failed: {error}"),
                }
            }
        });
    }
}

/// Consumes a (token, chunk) pair on every exit path, including
/// cancellation mid-stream, and schedules any destruction the consume
/// unlocked.
struct Fulfilment<'a> {
    node: &'a FsNode,
    token: Token,
    id: ChunkId,
}

impl<'a> Fulfilment<'a> {
    fn new(node: &'a FsNode, token: Token, id: ChunkId) -> Self {
        Self { node, token, id }
    }
}

impl Drop for Fulfilment<'_> {
    fn drop(&mut self) {
        let purge = self.node.expectations.fulfill(&self.token, &self.id);
        self.node.schedule_removals(purge);
    }
}
