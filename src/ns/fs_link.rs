// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The name server's client for the file servers' control plane, as a
//! seam with a wire implementation and an in-process test double.

use super::error::{Error, Result};
use crate::{
    comms,
    protocol::{
        messages::{ControlRequest, ControlResponse},
        ChunkId, ExpectAction, Status, Token,
    },
};

use async_trait::async_trait;
use std::net::SocketAddr;

/// Control requests the name server issues to one file server.
#[async_trait]
pub trait FsControl: Send + Sync {
    async fn expect(
        &self,
        fs: SocketAddr,
        token: Token,
        action: ExpectAction,
        chunks: Vec<ChunkId>,
    ) -> Result<()>;

    async fn cancel_token(&self, fs: SocketAddr, token: Token) -> Result<()>;

    async fn purge(&self, fs: SocketAddr, chunks: Vec<ChunkId>) -> Result<()>;

    /// Probes `fs`, recording `reply_to` (our private address) as the
    /// name server there. Returns the bytes the server has available.
    async fn probe(&self, fs: SocketAddr, reply_to: SocketAddr) -> Result<u64>;

    /// Tells `fs` to push `chunks` to the file server at `dest` under
    /// `token`.
    async fn replicate(
        &self,
        fs: SocketAddr,
        token: Token,
        dest: SocketAddr,
        chunks: Vec<ChunkId>,
    ) -> Result<()>;
}

fn accepted(response: ControlResponse) -> Result<()> {
    match response {
        ControlResponse::Accepted => Ok(()),
        ControlResponse::Available { .. } => Ok(()),
        ControlResponse::Refused { status } => Err(Error::Refused(status)),
    }
}

/// Production implementation over the wire.
pub struct WireFsControl;

#[async_trait]
impl FsControl for WireFsControl {
    async fn expect(
        &self,
        fs: SocketAddr,
        token: Token,
        action: ExpectAction,
        chunks: Vec<ChunkId>,
    ) -> Result<()> {
        let request = ControlRequest::Expect {
            token,
            action,
            chunks,
        };
        accepted(comms::send_request(fs, request).await?)
    }

    async fn cancel_token(&self, fs: SocketAddr, token: Token) -> Result<()> {
        accepted(comms::send_request(fs, ControlRequest::CancelToken { token }).await?)
    }

    async fn purge(&self, fs: SocketAddr, chunks: Vec<ChunkId>) -> Result<()> {
        accepted(comms::send_request(fs, ControlRequest::Purge { chunks }).await?)
    }

    async fn probe(&self, fs: SocketAddr, reply_to: SocketAddr) -> Result<u64> {
        let response: ControlResponse =
            comms::send_request(fs, ControlRequest::Probe { reply_to }).await?;
        match response {
            ControlResponse::Available { bytes } => Ok(bytes),
            ControlResponse::Refused { status } => Err(Error::Refused(status)),
            ControlResponse::Accepted => Err(Error::Refused(Status::Internal)),
        }
    }

    async fn replicate(
        &self,
        fs: SocketAddr,
        token: Token,
        dest: SocketAddr,
        chunks: Vec<ChunkId>,
    ) -> Result<()> {
        let request = ControlRequest::Replicate {
            token,
            dest,
            chunks,
        };
        accepted(comms::send_request(fs, request).await?)
    }
}
