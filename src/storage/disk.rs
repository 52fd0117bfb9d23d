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
use bytes::Bytes;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::{fs::File, io::AsyncWriteExt, sync::OwnedRwLockWriteGuard};
use tracing::{trace, warn};
use walkdir::WalkDir;

const PART_SUFFIX: &str = "part";

/// Chunk store persisting one file per chunk under a directory.
///
/// Writes land in a `.part` staging file and are published with an
/// atomic rename on commit, so a crash mid-write leaves no visible
/// chunk.
#[derive(Clone)]
pub struct DiskChunkStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    index: Mutex<HashSet<ChunkId>>,
    locks: LockRegistry,
    used_space: UsedSpace,
}

impl DiskChunkStore {
    /// Opens (or creates) a store at `dir` with the given capacity.
    /// Chunks already on disk are indexed; stale staging files are
    /// swept.
    pub fn open(dir: impl AsRef<Path>, capacity: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let used_space = UsedSpace::new(capacity);
        let mut index = HashSet::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!("Skipping unreadable storage entry: {error}");
                    continue;
                }
            };
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == PART_SUFFIX) {
                warn!("Sweeping stale staging file {path:?}");
                let _ = std::fs::remove_file(path);
                continue;
            }
            let Some(id) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse().ok())
                .map(ChunkId::from_uuid)
            else {
                warn!("Ignoring foreign file in chunk dir: {path:?}");
                continue;
            };
            used_space.increase(entry.metadata().map(|m| m.len()).unwrap_or(0));
            let _ = index.insert(id);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                index: Mutex::new(index),
                locks: LockRegistry::default(),
                used_space,
            }),
        })
    }

    fn indexed(&self, id: &ChunkId) -> bool {
        let index = self.inner.index.lock().expect("poisoned chunk index");
        index.contains(id)
    }
}

impl Inner {
    fn chunk_path(&self, id: &ChunkId) -> PathBuf {
        self.dir.join(id.to_string())
    }

    fn staging_path(&self, id: &ChunkId) -> PathBuf {
        self.dir.join(format!("{id}.{PART_SUFFIX}"))
    }
}

#[async_trait]
impl ChunkStore for DiskChunkStore {
    async fn get(&self, id: &ChunkId) -> Result<ChunkContent> {
        trace!("Getting chunk: {id}");
        let guard = self.inner.locks.read(id).await;
        if !self.indexed(id) {
            return Err(Error::ChunkNotFound(*id));
        }
        let data = tokio::fs::read(self.inner.chunk_path(id)).await?;
        Ok(ChunkContent {
            data: Bytes::from(data),
            _guard: guard,
        })
    }

    async fn create(&self, id: &ChunkId) -> Result<Box<dyn ChunkWrite>> {
        trace!("About to store chunk: {id}");
        if self.indexed(id) {
            return Err(Error::ChunkExists(*id));
        }
        let guard = self.inner.locks.write(id).await;
        if self.indexed(id) {
            return Err(Error::ChunkExists(*id));
        }
        let staging = self.inner.staging_path(id);
        let file = File::create(&staging).await?;
        Ok(Box::new(DiskChunkWrite {
            id: *id,
            file: Some(file),
            staging,
            written: 0,
            inner: self.inner.clone(),
            _guard: guard,
        }))
    }

    async fn exists(&self, id: &ChunkId) -> bool {
        self.indexed(id)
    }

    async fn remove(&self, id: &ChunkId) -> Result<()> {
        trace!("Removing chunk: {id}");
        if !self.indexed(id) {
            return Err(Error::ChunkNotFound(*id));
        }
        let guard = self.inner.locks.write(id).await;
        {
            let mut index = self.inner.index.lock().expect("poisoned chunk index");
            if !index.remove(id) {
                return Err(Error::ChunkNotFound(*id));
            }
        }
        let path = self.inner.chunk_path(id);
        let len = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        tokio::fs::remove_file(&path).await?;
        self.inner.used_space.decrease(len);
        drop(guard);
        self.inner.locks.forget(id);
        Ok(())
    }

    fn bytes_available(&self) -> u64 {
        self.inner.used_space.available()
    }
}

#[derive(Debug)]
struct DiskChunkWrite {
    id: ChunkId,
    file: Option<File>,
    staging: PathBuf,
    written: u64,
    inner: Arc<Inner>,
    _guard: OwnedRwLockWriteGuard<()>,
}

#[async_trait]
impl ChunkWrite for DiskChunkWrite {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "write after commit",
            ))
        })?;
        file.write_all(buf).await?;
        self.written += buf.len() as u64;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let mut file = self.file.take().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "commit after commit",
            ))
        })?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if !self.inner.used_space.can_add(self.written) {
            let _ = std::fs::remove_file(&self.staging);
            return Err(Error::NotEnoughSpace);
        }

        tokio::fs::rename(&self.staging, self.inner.chunk_path(&self.id)).await?;
        {
            let mut index = self.inner.index.lock().expect("poisoned chunk index");
            let _ = index.insert(self.id);
        }
        self.inner.used_space.increase(self.written);
        trace!("Chunk committed: {}", self.id);
        Ok(())
    }
}

impl Drop for DiskChunkWrite {
    fn drop(&mut self) {
        // An uncommitted write leaves no trace.
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}
