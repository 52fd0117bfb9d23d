// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{
    errors::{Error, Result},
    ChunkContent, ChunkStore, ChunkWrite, LockRegistry, UsedSpace,
};
use crate::protocol::ChunkId;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::OwnedRwLockWriteGuard;
use tracing::trace;

const DEFAULT_CAPACITY: u64 = 1024 * 1024 * 1024;

/// In-memory chunk store, used by tests and in-memory deployments.
#[derive(Clone)]
pub struct MemoryChunkStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    chunks: Mutex<HashMap<ChunkId, Bytes>>,
    locks: LockRegistry,
    used_space: UsedSpace,
}

impl MemoryChunkStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                chunks: Mutex::new(HashMap::new()),
                locks: LockRegistry::default(),
                used_space: UsedSpace::new(capacity),
            }),
        }
    }

    /// A store preloaded with chunks, for tests.
    pub fn with_chunks(chunks: impl IntoIterator<Item = (ChunkId, Bytes)>) -> Self {
        let store = Self::default();
        {
            let mut index = store.inner.chunks.lock().expect("poisoned chunk index");
            for (id, body) in chunks {
                store.inner.used_space.increase(body.len() as u64);
                let _ = index.insert(id, body);
            }
        }
        store
    }

    fn committed(&self, id: &ChunkId) -> Option<Bytes> {
        let index = self.inner.chunks.lock().expect("poisoned chunk index");
        index.get(id).cloned()
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn get(&self, id: &ChunkId) -> Result<ChunkContent> {
        trace!("Getting chunk: {id}");
        let guard = self.inner.locks.read(id).await;
        match self.committed(id) {
            Some(data) => Ok(ChunkContent {
                data,
                _guard: guard,
            }),
            None => Err(Error::ChunkNotFound(*id)),
        }
    }

    async fn create(&self, id: &ChunkId) -> Result<Box<dyn ChunkWrite>> {
        trace!("About to store chunk: {id}");
        if self.exists(id).await {
            return Err(Error::ChunkExists(*id));
        }
        let guard = self.inner.locks.write(id).await;
        // A racing create may have committed while we waited.
        if self.committed(id).is_some() {
            return Err(Error::ChunkExists(*id));
        }
        Ok(Box::new(MemoryChunkWrite {
            id: *id,
            buf: BytesMut::new(),
            inner: self.inner.clone(),
            _guard: guard,
        }))
    }

    async fn exists(&self, id: &ChunkId) -> bool {
        self.committed(id).is_some()
    }

    async fn remove(&self, id: &ChunkId) -> Result<()> {
        trace!("Removing chunk: {id}");
        let guard = self.inner.locks.write(id).await;
        let removed = {
            let mut index = self.inner.chunks.lock().expect("poisoned chunk index");
            index.remove(id)
        };
        drop(guard);
        match removed {
            Some(data) => {
                self.inner.used_space.decrease(data.len() as u64);
                self.inner.locks.forget(id);
                Ok(())
            }
            None => Err(Error::ChunkNotFound(*id)),
        }
    }

    fn bytes_available(&self) -> u64 {
        self.inner.used_space.available()
    }
}

#[derive(Debug)]
struct MemoryChunkWrite {
    id: ChunkId,
    buf: BytesMut,
    inner: Arc<Inner>,
    _guard: OwnedRwLockWriteGuard<()>,
}

#[async_trait]
impl ChunkWrite for MemoryChunkWrite {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(buf);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let len = self.buf.len() as u64;
        if !self.inner.used_space.can_add(len) {
            return Err(Error::NotEnoughSpace);
        }
        {
            let mut index = self.inner.chunks.lock().expect("poisoned chunk index");
            let _ = index.insert(self.id, self.buf.freeze());
        }
        self.inner.used_space.increase(len);
        trace!("Chunk committed: {}", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use eyre::Result;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn stored_chunk_round_trips() -> Result<()> {
        let store = MemoryChunkStore::default();
        let id = ChunkId::new();

        let mut writer = store.create(&id).await?;
        writer.write_all(b"hello").await?;
        writer.commit().await?;

        let content = store.get(&id).await?;
        assert_eq!(content.bytes().as_ref(), b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn uncommitted_write_is_invisible() -> Result<()> {
        let store = MemoryChunkStore::default();
        let id = ChunkId::new();

        let mut writer = store.create(&id).await?;
        writer.write_all(b"partial").await?;
        drop(writer);

        assert!(!store.exists(&id).await);
        assert_matches!(store.get(&id).await, Err(Error::ChunkNotFound(_)));
        // The id is free again after the abort.
        let mut writer = store.create(&id).await?;
        writer.write_all(b"second try").await?;
        writer.commit().await?;
        assert!(store.exists(&id).await);
        Ok(())
    }

    #[tokio::test]
    async fn create_refuses_existing_chunk() -> Result<()> {
        let id = ChunkId::new();
        let store = MemoryChunkStore::with_chunks([(id, Bytes::from_static(b"taken"))]);

        assert_matches!(store.create(&id).await, Err(Error::ChunkExists(got)) => {
            assert_eq!(got, id);
        });
        Ok(())
    }

    #[tokio::test]
    async fn remove_waits_for_readers() -> Result<()> {
        let id = ChunkId::new();
        let store = MemoryChunkStore::with_chunks([(id, Bytes::from_static(b"X"))]);

        let content = store.get(&id).await?;

        let store2 = store.clone();
        let remover = tokio::spawn(async move { store2.remove(&id).await });

        // The reader still holds the chunk, so removal cannot finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!remover.is_finished());
        assert_eq!(content.bytes().as_ref(), b"X");

        drop(content);
        timeout(Duration::from_secs(1), remover).await???;
        assert!(!store.exists(&id).await);
        Ok(())
    }

    #[tokio::test]
    async fn remove_of_missing_chunk_errors() {
        let store = MemoryChunkStore::default();
        assert_matches!(
            store.remove(&ChunkId::new()).await,
            Err(Error::ChunkNotFound(_))
        );
    }

    #[tokio::test]
    async fn capacity_is_enforced_at_commit() -> Result<()> {
        let store = MemoryChunkStore::new(4);
        let id = ChunkId::new();

        let mut writer = store.create(&id).await?;
        writer.write_all(b"too big to fit").await?;
        assert_matches!(writer.commit().await, Err(Error::NotEnoughSpace));
        assert!(!store.exists(&id).await);

        assert_eq!(store.bytes_available(), 4);
        Ok(())
    }
}
