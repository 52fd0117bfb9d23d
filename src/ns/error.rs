// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::protocol::{ChunkId, Status};

use std::io;
use thiserror::Error;

/// Specialisation of `std::Result` for the name server mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No alive file server fits the selection.
    #[error("No candidate file server available")]
    NoCandidate,
    /// A file path that should exist does not, or vice versa.
    #[error("{0}")]
    Namespace(String),
    /// A chunk the namespace references is missing from the table.
    #[error("The file is broken; no chunk: {0}")]
    UnknownChunk(ChunkId),
    /// A chunk has no replica that could serve a download.
    #[error("Chunk {0} is unrecoverable: no ready replica")]
    Unrecoverable(ChunkId),
    /// A file server refused a control request.
    #[error("File server refused: {0}")]
    Refused(Status),
    /// Comms error.
    #[error("Comms error: {0}")]
    Comms(#[from] crate::comms::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Journal or snapshot could not be decoded.
    #[error("Corrupt namespace persistence: {0}")]
    CorruptPersistence(String),
    /// Config file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
