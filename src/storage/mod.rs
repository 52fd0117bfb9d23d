// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Chunk blob stores: durable byte storage for one file server.

mod disk;
mod errors;
mod memory;
mod used_space;

pub use self::{
    disk::DiskChunkStore,
    errors::{Error, Result},
    memory::MemoryChunkStore,
};

use self::used_space::UsedSpace;
use crate::protocol::ChunkId;

use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc, sync::Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Operations on the chunk bytes one file server persists.
///
/// Readers and writers synchronise per chunk: any number of concurrent
/// readers, one writer, and `remove` waits for both. A write becomes
/// visible to `get`/`exists` only once its handle commits.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Reads a chunk. The returned content holds the chunk's shared
    /// read lock until dropped.
    async fn get(&self, id: &ChunkId) -> Result<ChunkContent>;

    /// Opens a chunk for writing. Fails with [`Error::ChunkExists`] if
    /// the chunk is stored or being stored. The handle owns the chunk's
    /// exclusive lock; dropping it without committing leaves no trace.
    async fn create(&self, id: &ChunkId) -> Result<Box<dyn ChunkWrite>>;

    /// Whether a committed chunk with this id is present.
    async fn exists(&self, id: &ChunkId) -> bool;

    /// Destroys a chunk. Waits until outstanding readers and writers
    /// have released it; safe to call concurrently with any other op.
    async fn remove(&self, id: &ChunkId) -> Result<()>;

    /// Capacity not yet taken by committed chunks.
    fn bytes_available(&self) -> u64;
}

/// An open write of one chunk.
#[async_trait]
pub trait ChunkWrite: Send + std::fmt::Debug {
    /// Appends bytes to the chunk being written.
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flushes and publishes the chunk, releasing the exclusive lock.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Bytes of one chunk, coupled to its shared read lock.
#[derive(Debug)]
pub struct ChunkContent {
    data: Bytes,
    _guard: OwnedRwLockReadGuard<()>,
}

impl ChunkContent {
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Releases the read lock and hands the bytes out.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Registry of the per-chunk locks a store synchronises on.
#[derive(Default, Debug)]
struct LockRegistry {
    locks: Mutex<HashMap<ChunkId, Arc<RwLock<()>>>>,
}

impl LockRegistry {
    fn entry(&self, id: &ChunkId) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().expect("poisoned chunk lock registry");
        locks.entry(*id).or_default().clone()
    }

    async fn read(&self, id: &ChunkId) -> OwnedRwLockReadGuard<()> {
        self.entry(id).read_owned().await
    }

    async fn write(&self, id: &ChunkId) -> OwnedRwLockWriteGuard<()> {
        self.entry(id).write_owned().await
    }

    /// Drops the lock entry of a chunk that no longer exists. Callers
    /// must hold no guard on it.
    fn forget(&self, id: &ChunkId) {
        let mut locks = self.locks.lock().expect("poisoned chunk lock registry");
        let _ = locks.remove(id);
    }
}
