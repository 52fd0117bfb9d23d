// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Placement records: which file servers hold which chunk, in which
//! state, plus the inverted host-to-chunks index failure recovery
//! walks.

use super::pool::FsHandle;
use crate::protocol::ChunkId;

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
};
use tracing::debug;

/// State of one replica on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaStatus {
    /// Planned; the write has not been confirmed yet.
    Pending,
    /// Confirmed and servable.
    Ok,
    /// Scheduled for destruction.
    Obsolete,
    /// Lost with its host.
    Down,
}

/// Aggregate state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// No replica confirmed yet.
    Pending,
    /// At least one replica is servable.
    Ok,
    /// The owning file was removed; replicas are being destroyed.
    Obsolete,
    /// Unrecoverable: every replica was lost before confirmation.
    Down,
}

/// Mutable placement state of one chunk, guarded by the record's lock.
#[derive(Debug)]
pub struct ChunkState {
    pub servers: HashMap<SocketAddr, FsHandle>,
    pub replicas: HashMap<SocketAddr, ReplicaStatus>,
    pub ready_replicas: usize,
    pub all_replicas: usize,
    pub status: ChunkStatus,
}

impl ChunkState {
    /// Hosts currently planned or holding this chunk.
    pub fn holder_addrs(&self) -> HashSet<SocketAddr> {
        self.servers.keys().copied().collect()
    }

    /// Holders whose replica is confirmed.
    pub fn ok_holders(&self) -> Vec<FsHandle> {
        self.servers
            .iter()
            .filter(|(addr, _)| self.replicas.get(*addr) == Some(&ReplicaStatus::Ok))
            .map(|(_, handle)| *handle)
            .collect()
    }

    fn add_server(&mut self, fs: FsHandle) {
        let addr = fs.private_addr;
        if self.servers.insert(addr, fs).is_none() {
            self.all_replicas += 1;
        }
        let _ = self.replicas.insert(addr, ReplicaStatus::Pending);
    }

    /// Forgets a holder, e.g. one that died. Counts follow.
    pub fn remove_server(&mut self, addr: &SocketAddr) {
        if self.servers.remove(addr).is_some() {
            self.all_replicas -= 1;
        }
        if self.replicas.remove(addr) == Some(ReplicaStatus::Ok) {
            self.ready_replicas -= 1;
        }
    }

    /// Books a confirmed write from `addr`. False when the host was
    /// never planned to hold this chunk.
    pub fn confirm_from(&mut self, addr: &SocketAddr) -> bool {
        match self.replicas.get_mut(addr) {
            Some(status @ ReplicaStatus::Pending) => {
                *status = ReplicaStatus::Ok;
                self.ready_replicas += 1;
                if self.status == ChunkStatus::Pending {
                    self.status = ChunkStatus::Ok;
                }
                true
            }
            Some(_) => true,
            None => false,
        }
    }
}

/// One chunk's record. The table and the inverted index share these
/// via `Arc`, so the index can never outlive the entries it points at.
#[derive(Debug)]
pub struct ChunkRecord {
    pub id: ChunkId,
    /// Path of the owning file.
    pub file: String,
    state: Mutex<ChunkState>,
}

impl ChunkRecord {
    pub fn lock(&self) -> MutexGuard<'_, ChunkState> {
        self.state.lock().expect("poisoned chunk record")
    }
}

/// The table of all chunk records plus the host-to-chunks inverted
/// index. The two maps lock independently; per-chunk fields lock on
/// their record.
#[derive(Debug, Default)]
pub struct ChunkTable {
    table: Mutex<HashMap<ChunkId, Arc<ChunkRecord>>>,
    inverted: Mutex<HashMap<SocketAddr, Vec<Arc<ChunkRecord>>>>,
    /// Purges addressed at holders that were not alive to take them.
    deferred_purges: Mutex<HashMap<SocketAddr, Vec<ChunkId>>>,
    /// Chunks that lost a replica with no receiver available.
    parked_replications: Mutex<Vec<ChunkId>>,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh chunk with its initial planned placement.
    pub fn add_chunk(&self, id: ChunkId, file: &str, initial: FsHandle) -> Arc<ChunkRecord> {
        let record = Arc::new(ChunkRecord {
            id,
            file: file.to_owned(),
            state: Mutex::new(ChunkState {
                servers: HashMap::from([(initial.private_addr, initial)]),
                replicas: HashMap::from([(initial.private_addr, ReplicaStatus::Pending)]),
                ready_replicas: 0,
                all_replicas: 1,
                status: ChunkStatus::Pending,
            }),
        });
        {
            let mut table = self.table.lock().expect("poisoned chunk table");
            let _ = table.insert(id, record.clone());
        }
        self.index_on(initial.private_addr, record.clone());
        record
    }

    /// Plans one more replica of `record` on `fs`.
    pub fn add_fs_to_chunk(&self, record: &Arc<ChunkRecord>, fs: FsHandle) {
        record.lock().add_server(fs);
        self.index_on(fs.private_addr, record.clone());
    }

    pub fn get(&self, id: &ChunkId) -> Option<Arc<ChunkRecord>> {
        let table = self.table.lock().expect("poisoned chunk table");
        table.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<ChunkRecord>> {
        let table = self.table.lock().expect("poisoned chunk table");
        table.values().cloned().collect()
    }

    /// Chunks indexed on `host`.
    pub fn chunks_on(&self, host: &SocketAddr) -> Vec<Arc<ChunkRecord>> {
        let inverted = self.inverted.lock().expect("poisoned inverted index");
        inverted.get(host).cloned().unwrap_or_default()
    }

    /// Drops a host's inverted entry, once its chunks were rehomed.
    pub fn clear_host(&self, host: &SocketAddr) {
        let mut inverted = self.inverted.lock().expect("poisoned inverted index");
        let _ = inverted.remove(host);
    }

    /// Marks chunks obsolete and groups them by the holders that must
    /// destroy them. Unknown ids are skipped.
    pub fn mark_obsolete(&self, ids: &[ChunkId]) -> HashMap<FsHandle, Vec<ChunkId>> {
        let mut by_holder: HashMap<FsHandle, Vec<ChunkId>> = HashMap::new();
        for id in ids {
            let Some(record) = self.get(id) else {
                debug!("Skipping purge of unknown chunk {id}");
                continue;
            };
            let mut guard = record.lock();
            let state = &mut *guard;
            state.status = ChunkStatus::Obsolete;
            for (addr, handle) in &state.servers {
                let _ = state.replicas.insert(*addr, ReplicaStatus::Obsolete);
                by_holder.entry(*handle).or_default().push(*id);
            }
        }
        by_holder
    }

    /// Parks a purge for a holder that is not alive right now.
    pub fn defer_purge(&self, host: SocketAddr, ids: Vec<ChunkId>) {
        let mut deferred = self.deferred_purges.lock().expect("poisoned purge queue");
        deferred.entry(host).or_default().extend(ids);
    }

    pub fn deferred_purges_for(&self, host: &SocketAddr) -> Vec<ChunkId> {
        let deferred = self.deferred_purges.lock().expect("poisoned purge queue");
        deferred.get(host).cloned().unwrap_or_default()
    }

    /// Parks a chunk that lost a replica with nowhere to rehome it.
    pub fn park_replication(&self, id: ChunkId) {
        let mut parked = self
            .parked_replications
            .lock()
            .expect("poisoned replication queue");
        parked.push(id);
    }

    pub fn parked_replications(&self) -> Vec<ChunkId> {
        self.parked_replications
            .lock()
            .expect("poisoned replication queue")
            .clone()
    }

    fn index_on(&self, host: SocketAddr, record: Arc<ChunkRecord>) {
        let mut inverted = self.inverted.lock().expect("poisoned inverted index");
        inverted.entry(host).or_default().push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    fn handle(id: usize) -> FsHandle {
        FsHandle {
            id,
            private_addr: (Ipv4Addr::new(10, 0, 0, id as u8 + 1), 7071).into(),
            public_addr: (Ipv4Addr::new(10, 0, 0, id as u8 + 1), 7070).into(),
        }
    }

    #[test]
    fn fresh_chunk_has_one_pending_replica() {
        let table = ChunkTable::new();
        let id = ChunkId::new();
        let fs = handle(0);

        let record = table.add_chunk(id, "/a/file", fs);
        let state = record.lock();
        assert_eq!(state.all_replicas, 1);
        assert_eq!(state.ready_replicas, 0);
        assert_eq!(state.status, ChunkStatus::Pending);
        assert_eq!(
            state.replicas.get(&fs.private_addr),
            Some(&ReplicaStatus::Pending)
        );
        drop(state);

        assert_eq!(table.chunks_on(&fs.private_addr).len(), 1);
    }

    #[test]
    fn confirm_and_grow_replicas() {
        let table = ChunkTable::new();
        let id = ChunkId::new();
        let (a, b) = (handle(0), handle(1));

        let record = table.add_chunk(id, "/f", a);
        assert!(record.lock().confirm_from(&a.private_addr));
        {
            let state = record.lock();
            assert_eq!(state.status, ChunkStatus::Ok);
            assert_eq!(state.ready_replicas, 1);
        }

        table.add_fs_to_chunk(&record, b);
        {
            let state = record.lock();
            assert_eq!(state.all_replicas, 2);
            assert_eq!(state.ready_replicas, 1);
            assert_eq!(state.ok_holders().len(), 1);
        }
        assert_eq!(table.chunks_on(&b.private_addr).len(), 1);

        // A host that was never planned cannot confirm.
        assert!(!record.lock().confirm_from(&handle(7).private_addr));
    }

    #[test]
    fn removing_a_server_adjusts_counts() {
        let table = ChunkTable::new();
        let (a, b) = (handle(0), handle(1));
        let record = table.add_chunk(ChunkId::new(), "/f", a);
        table.add_fs_to_chunk(&record, b);
        assert!(record.lock().confirm_from(&a.private_addr));

        let mut state = record.lock();
        state.remove_server(&a.private_addr);
        assert_eq!(state.all_replicas, 1);
        assert_eq!(state.ready_replicas, 0);
        assert_eq!(state.holder_addrs(), HashSet::from([b.private_addr]));
    }

    #[test]
    fn obsolete_chunks_group_by_holder() {
        let table = ChunkTable::new();
        let (a, b) = (handle(0), handle(1));
        let one = ChunkId::new();
        let two = ChunkId::new();

        let first = table.add_chunk(one, "/f", a);
        table.add_fs_to_chunk(&first, b);
        let _second = table.add_chunk(two, "/f", b);

        let by_holder = table.mark_obsolete(&[one, two, ChunkId::new()]);
        assert_eq!(by_holder.get(&a), Some(&vec![one]));
        let mut on_b = by_holder.get(&b).cloned().unwrap();
        on_b.sort();
        let mut expected = vec![one, two];
        expected.sort();
        assert_eq!(on_b, expected);

        assert_eq!(first.lock().status, ChunkStatus::Obsolete);
    }
}
