// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Messages of the four logical planes and their possible responses.
//!
//! Each plane is a request/response pair served on its own socket:
//! clients and peer file servers talk to a file server's public port
//! (data plane), the name server talks to a file server's private port
//! (control plane), file servers call back to the name server's private
//! port, and clients drive the name server's public port (app plane).

use super::{ChunkId, ExpectAction, Status, Token};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A request on a file server's public port. Writes carry the chunk
/// bytes; both carry the one-shot token that authorizes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataRequest {
    /// Read a chunk.
    GetChunk { id: ChunkId, token: Token },
    /// Store a chunk.
    PostChunk {
        id: ChunkId,
        token: Token,
        body: Bytes,
    },
}

/// The response to a [`DataRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataResponse {
    /// The requested chunk bytes.
    Chunk { body: Bytes },
    /// The posted chunk was stored and committed.
    Stored,
    /// The request was refused.
    Refused { status: Status },
}

/// A request on a file server's private port. Only the recorded name
/// server may issue these, with the exception of the first `Probe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Authorize `action` on each of `chunks` under `token`, atomically.
    Expect {
        token: Token,
        action: ExpectAction,
        chunks: Vec<ChunkId>,
    },
    /// Withdraw a token and roll back unacknowledged writes.
    CancelToken { token: Token },
    /// Destroy chunks, deferred while still expected by some holder.
    Purge { chunks: Vec<ChunkId> },
    /// Record the caller as the name server (first caller wins) and
    /// report available space. `reply_to` is the name server's private
    /// address, used for heartbeats and confirmations from now on.
    Probe { reply_to: SocketAddr },
    /// Push chunks to the file server at `dest` under `token`. The
    /// destination must hold a matching write expectation.
    Replicate {
        token: Token,
        dest: SocketAddr,
        chunks: Vec<ChunkId>,
    },
}

/// The response to a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// The request was accepted.
    Accepted,
    /// Answer to a `Probe`.
    Available { bytes: u64 },
    /// The request was refused.
    Refused { status: Status },
}

/// A request on the name server's private port, sent by file servers.
/// `from` is the sender's configured private address, which is its
/// identity in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NsRequest {
    /// Periodic liveness signal.
    Pulse { from: SocketAddr },
    /// A chunk write completed and committed on the sender.
    ConfirmChunk { id: ChunkId, from: SocketAddr },
}

/// The response to an [`NsRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NsResponse {
    Accepted,
}

/// A client request on the name server's public port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppRequest {
    /// Reset the namespace to an empty tree.
    Init,
    Ls { path: String },
    Cd { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    Touch { path: String },
    RmFile { path: String },
    Mv { from: String, to: String },
    Cp { from: String, to: String },
    Info { path: String },
    /// Plan an upload of `size` bytes to `path`.
    Upload { path: String, size: u64 },
    /// Plan a download of `path`.
    Download { path: String },
    ChunkSize,
}

/// Placement of one chunk: where the client should send or fetch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub id: ChunkId,
    pub storage_addr: SocketAddr,
}

/// Outcome marker of a [`ClientMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERR")]
    Err,
}

/// The envelope every app-plane response is wrapped in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub status: AppStatus,
    pub message: String,
    pub objects: Vec<String>,
    pub token: Option<Token>,
    pub chunks: Vec<ChunkLocation>,
}

impl ClientMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: AppStatus::Ok,
            message: message.into(),
            objects: Vec::new(),
            token: None,
            chunks: Vec::new(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            status: AppStatus::Err,
            message: message.into(),
            objects: Vec::new(),
            token: None,
            chunks: Vec::new(),
        }
    }

    pub fn with_objects(mut self, objects: Vec<String>) -> Self {
        self.objects = objects;
        self
    }

    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<ChunkLocation>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == AppStatus::Ok
    }
}
