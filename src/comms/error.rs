// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Specialisation of `std::Result` for the comms module.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on a connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Bincode error while encoding or decoding a frame.
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] bincode::Error),
    /// A frame advertised a length beyond what we accept.
    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(u32),
    /// The peer closed the stream before a full frame arrived.
    #[error("Connection to {0} closed mid-frame")]
    ConnectionClosed(SocketAddr),
}
