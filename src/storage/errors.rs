// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::protocol::ChunkId;

use std::io;
use thiserror::Error;

/// Specialisation of `std::Result` for the storage mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Chunk not found.
    #[error("Chunk not found: {0}")]
    ChunkNotFound(ChunkId),
    /// A chunk with this id is already stored, or being stored.
    #[error("Chunk already exists: {0}")]
    ChunkExists(ChunkId),
    /// Not enough space to commit the value.
    #[error("Not enough space")]
    NotEnoughSpace,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
