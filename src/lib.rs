// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! kumofs: a small distributed chunk file store.
//!
//! One name server owns the namespace and decides where each chunk of
//! a file lives; many file servers store the chunk bytes and serve
//! them under one-shot capability tokens. Chunks are replicated and
//! re-replicated as file servers die and return.

pub mod comms;
pub mod error;
pub mod fs_node;
pub mod log;
pub mod ns;
pub mod protocol;
pub mod storage;

pub use error::{Error, Result};
