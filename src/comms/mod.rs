// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Request/response plumbing between cluster participants.
//!
//! Every logical plane runs the same wire shape: a [`NetworkMsg`]
//! envelope, bincode-encoded, length-prefix framed over a TCP stream,
//! one request/response round-trip per connection. Servers run one task
//! per connection and hand the decoded payload to an async handler
//! together with the caller's address.

mod error;

pub use self::error::{Error, Result};

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt::Debug, future::Future, net::SocketAddr};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::{self, JoinHandle},
};
use tracing::{debug, trace, warn};

/// Frames larger than this are refused outright; chunk bodies are
/// bounded by the configured chunk size, which sits far below it.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Bound on every payload that crosses the wire.
pub trait WireMsg: Serialize + DeserializeOwned + Debug + Send + 'static {}

impl<T> WireMsg for T where T: Serialize + DeserializeOwned + Debug + Send + 'static {}

/// Correlates a response frame with its request in the logs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MsgId(u64);

impl MsgId {
    /// Generates a new `MsgId` with random content.
    pub fn new() -> Self {
        Self(rand::random())
    }
}

impl Default for MsgId {
    fn default() -> Self {
        Self::new()
    }
}

/// The envelope around every payload on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkMsg<T> {
    pub id: MsgId,
    pub payload: T,
}

impl<T: WireMsg> NetworkMsg<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: MsgId::new(),
            payload,
        }
    }

    pub fn from_bytes(value: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(value)?)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(bincode::serialize(self)?.into())
    }
}

async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| Error::FrameTooLarge(u32::MAX))?;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(len));
    }
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream, peer: SocketAddr) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    if let Err(error) = stream.read_exact(&mut len_bytes).await {
        return match error.kind() {
            std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed(peer)),
            _ => Err(error.into()),
        };
    }
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Sends one request to `addr` and awaits the response.
pub async fn send_request<Req, Resp>(addr: SocketAddr, payload: Req) -> Result<Resp>
where
    Req: WireMsg,
    Resp: WireMsg,
{
    let mut stream = TcpStream::connect(addr).await?;
    let msg = NetworkMsg::new(payload);
    trace!("Sending {:?} to {addr}", msg.id);
    write_frame(&mut stream, &msg.to_bytes()?).await?;
    let frame = read_frame(&mut stream, addr).await?;
    let response = NetworkMsg::<Resp>::from_bytes(&frame)?;
    trace!("Response to {:?} arrived from {addr}", msg.id);
    Ok(response.payload)
}

/// Binds a listener for one plane.
pub async fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Runs the accept loop of one plane, dispatching every decoded request
/// to `handler` on its own task. Malformed frames are logged and the
/// connection dropped; the loop itself never exits on a per-connection
/// failure.
pub fn serve<Req, Resp, H, Fut>(listener: TcpListener, handler: H) -> JoinHandle<()>
where
    Req: WireMsg,
    Resp: WireMsg,
    H: Fn(SocketAddr, Req) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Resp> + Send + 'static,
{
    task::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(error) => {
                    warn!("Accept failed: {error}");
                    continue;
                }
            };
            let handler = handler.clone();
            let _handle = task::spawn(async move {
                if let Err(error) = handle_connection(stream, peer, handler).await {
                    debug!("Connection from {peer} ended: {error}");
                }
            });
        }
    })
}

async fn handle_connection<Req, Resp, H, Fut>(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: H,
) -> Result<()>
where
    Req: WireMsg,
    Resp: WireMsg,
    H: Fn(SocketAddr, Req) -> Fut,
    Fut: Future<Output = Resp>,
{
    let frame = read_frame(&mut stream, peer).await?;
    let msg = NetworkMsg::<Req>::from_bytes(&frame)?;
    trace!("Handling {:?} from {peer}", msg.id);
    let response = handler(peer, msg.payload).await;
    let reply = NetworkMsg {
        id: msg.id,
        payload: response,
    };
    write_frame(&mut stream, &reply.to_bytes()?).await
}
