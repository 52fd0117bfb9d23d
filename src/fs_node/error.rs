// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::protocol::{ChunkId, Token};

use std::io;
use thiserror::Error;

/// Specialisation of `std::Result` for the file server mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A capability is already registered under this token.
    #[error("Token already registered: {0}")]
    TokenConflict(Token),
    /// A control call arrived from an address that is not the recorded
    /// name server.
    #[error("Caller is not the recorded name server")]
    NotAuthoritative,
    /// A chunk a read expectation names is not stored here.
    #[error("Chunk not stored here: {0}")]
    MissingChunk(ChunkId),
    /// The destination refused a replica push.
    #[error("Replica push of {chunk} refused: {status}")]
    PushRefused {
        chunk: ChunkId,
        status: crate::protocol::Status,
    },
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::Error),
    /// Comms error.
    #[error("Comms error: {0}")]
    Comms(#[from] crate::comms::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Config file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
