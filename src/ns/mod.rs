// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The name server: namespace, chunk placement, replication control
//! and the liveness event loop, all hanging off one context built at
//! startup.

pub mod chunk_table;
mod config;
mod error;
mod fs_link;
pub mod namespace;
pub mod pool;

pub use self::{
    config::{NamenodeConfig, NsConfig, StorageNodeConfig},
    error::{Error, Result},
    fs_link::{FsControl, WireFsControl},
    namespace::Namespace,
};

use self::{
    chunk_table::{ChunkStatus, ChunkTable},
    pool::{FsHandle, Pool, PoolEvent},
};
use crate::protocol::{
    messages::{AppRequest, ChunkLocation, ClientMessage, NsRequest, NsResponse},
    ChunkId, ExpectAction, Token,
};

use futures::future::join_all;
use rand::Rng;
use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
};
use tokio::{sync::mpsc, task};
use tracing::{debug, info, warn};

/// Everything a name server request handler needs. Built once at boot
/// and shared; there is no global state.
pub struct NsContext {
    tree: Namespace,
    table: Arc<ChunkTable>,
    pool: Arc<Pool>,
    fs: Arc<dyn FsControl>,
    chunk_size: u64,
    /// Our private address, handed to file servers as the probe
    /// reply-to.
    my_private_addr: SocketAddr,
}

impl NsContext {
    pub fn new(
        tree: Namespace,
        pool: Arc<Pool>,
        fs: Arc<dyn FsControl>,
        chunk_size: u64,
        my_private_addr: SocketAddr,
    ) -> Arc<Self> {
        Arc::new(Self {
            tree,
            table: Arc::new(ChunkTable::new()),
            pool,
            fs,
            chunk_size,
            my_private_addr,
        })
    }

    /// Probes every configured file server once: records us as their
    /// name server and books their free space.
    pub async fn probe_file_servers(&self) {
        let probes = self.pool.handles().into_iter().map(|handle| async move {
            let outcome = self
                .fs
                .probe(handle.private_addr, self.my_private_addr)
                .await;
            (handle, outcome)
        });
        for (handle, outcome) in join_all(probes).await {
            match outcome {
                Ok(bytes) => {
                    info!("File server {} has {bytes} bytes free", handle.private_addr);
                    self.pool.record_available(handle.id, bytes);
                }
                Err(error) => {
                    warn!("Probing file server {} failed: {error}", handle.private_addr);
                }
            }
        }
    }

    /// Dispatches pool liveness events for as long as the pool lives.
    pub async fn run_pool_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PoolEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                PoolEvent::WentDown(fs) => {
                    let ctx = self.clone();
                    let _handle = task::spawn(async move { ctx.fs_is_down(fs).await });
                }
                PoolEvent::CameUp(fs) => {
                    let ctx = self.clone();
                    let _handle = task::spawn(async move { ctx.fs_is_up(fs).await });
                }
            }
        }
    }

    /// Serves one request from a file server.
    pub async fn handle_fs(&self, peer: SocketAddr, request: NsRequest) -> NsResponse {
        match request {
            NsRequest::Pulse { from } => {
                debug!("Pulse from {from} (conn {peer})");
                let _ = self.pool.register_pulse(from);
            }
            NsRequest::ConfirmChunk { id, from } => {
                self.confirm_chunk(id, from).await;
            }
        }
        NsResponse::Accepted
    }

    /// Serves one client request.
    pub async fn handle_app(&self, request: AppRequest) -> ClientMessage {
        match request {
            AppRequest::Init => match self.tree.init() {
                Ok(()) => ClientMessage::ok("The tree is initialized"),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Ls { path } => match self.tree.ls(&path) {
                Ok(list) => {
                    ClientMessage::ok(format!("the content of {path}")).with_objects(list)
                }
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Cd { path } => match self.tree.cd(&path) {
                Ok(path) => ClientMessage::ok(format!("You can change directory to {path}"))
                    .with_objects(vec![path]),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Mkdir { path } => match self.tree.create_directory(&path) {
                Ok(path) => {
                    ClientMessage::ok(format!("{path} directory successfully created"))
                }
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Rmdir { path } => match self.tree.remove_directory(&path) {
                Ok(()) => ClientMessage::ok("directory successfully removed"),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Touch { path } => match self.tree.create_file(&path) {
                Ok(path) => ClientMessage::ok(format!("{path} file successfully created")),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::RmFile { path } => self.remove_file(&path),
            AppRequest::Mv { from, to } => match self.tree.move_file(&from, &to) {
                Ok(()) => ClientMessage::ok("file successfully moved"),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Cp { from, to } => match self.tree.copy_file(&from, &to) {
                Ok(()) => ClientMessage::ok("file successfully copied"),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Info { path } => match self.tree.info(&path) {
                Ok(info) => ClientMessage::ok(format!("info on {path}")).with_objects(info),
                Err(error) => ClientMessage::err(error.to_string()),
            },
            AppRequest::Upload { path, size } => self.plan_upload(&path, size),
            AppRequest::Download { path } => self.plan_download(&path),
            AppRequest::ChunkSize => ClientMessage::ok("chunk size in bytes")
                .with_objects(vec![self.chunk_size.to_string()]),
        }
    }

    /// The upload planner: creates the file, mints a token, picks a
    /// first placement per chunk and fans the write expectations out.
    fn plan_upload(&self, path: &str, size: u64) -> ClientMessage {
        let path = match self.tree.create_file(path) {
            Ok(path) => path,
            Err(error) => return ClientMessage::err(error.to_string()),
        };
        let chunk_count = (size + self.chunk_size - 1) / self.chunk_size;

        let token = Token::new();
        let mut locations = Vec::new();
        let mut chunk_ids = Vec::new();
        let mut per_fs: HashMap<FsHandle, Vec<ChunkId>> = HashMap::new();
        for _ in 0..chunk_count {
            let id = ChunkId::new();
            let fs = match self.pool.select() {
                Ok(fs) => fs,
                Err(error) => return ClientMessage::err(error.to_string()),
            };
            let _record = self.table.add_chunk(id, &path, fs);
            chunk_ids.push(id);
            per_fs.entry(fs).or_default().push(id);
            locations.push(ChunkLocation {
                id,
                storage_addr: fs.public_addr,
            });
        }
        if let Err(error) = self.tree.attach_chunks(&path, &chunk_ids) {
            warn!("Booking chunks of {path} failed: {error}");
        }

        // The expectations travel independently of the client response.
        let fs_control = self.fs.clone();
        let _handle = task::spawn(async move {
            let targets: Vec<SocketAddr> =
                per_fs.keys().map(|fs| fs.private_addr).collect();
            let mut failed = false;
            for (fs, chunks) in per_fs {
                if let Err(error) = fs_control
                    .expect(fs.private_addr, token, ExpectAction::Write, chunks)
                    .await
                {
                    warn!(
                        "Write expectation fan-out to {} failed: {error}",
                        fs.private_addr
                    );
                    failed = true;
                }
            }
            if failed {
                // The token is useless with holes in it; withdraw it
                // everywhere.
                for addr in targets {
                    let _ = fs_control.cancel_token(addr, token).await;
                }
            }
        });

        ClientMessage::ok("go upload there")
            .with_token(token)
            .with_chunks(locations)
    }

    /// The download planner: one confirmed holder per chunk, or a
    /// message naming the chunk that cannot be served.
    fn plan_download(&self, path: &str) -> ClientMessage {
        let file = match self.tree.get_file(path) {
            Ok(file) => file,
            Err(error) => return ClientMessage::err(error.to_string()),
        };
        let mut locations = Vec::new();
        for id in file.chunks {
            let Some(record) = self.table.get(&id) else {
                return ClientMessage::err(Error::UnknownChunk(id).to_string());
            };
            let ready: HashSet<SocketAddr> = record
                .lock()
                .ok_holders()
                .into_iter()
                .map(|fs| fs.private_addr)
                .collect();
            let fs = match self.pool.select_among(&ready) {
                Ok(fs) => fs,
                Err(_) => return ClientMessage::err(Error::Unrecoverable(id).to_string()),
            };
            locations.push(ChunkLocation {
                id,
                storage_addr: fs.public_addr,
            });
        }
        ClientMessage::ok("go download there").with_chunks(locations)
    }

    fn remove_file(&self, path: &str) -> ClientMessage {
        let chunks = match self.tree.remove_file(path) {
            Ok(chunks) => chunks,
            Err(error) => return ClientMessage::err(error.to_string()),
        };
        self.spawn_purge(chunks);
        ClientMessage::ok("file successfully removed")
    }

    /// A write landed on `from`. Books it and, while the chunk is
    /// short of the replica target, launches one replication per
    /// missing copy.
    pub(crate) async fn confirm_chunk(&self, id: ChunkId, from: SocketAddr) {
        let Some(record) = self.table.get(&id) else {
            warn!("Chunk {id} not found; skipping confirmation from {from}");
            return;
        };
        let plan = {
            let mut state = record.lock();
            if !state.confirm_from(&from) {
                warn!("Got chunk {id} from {from} but it should not be there");
                return;
            }
            info!(
                "Chunk {id} confirmed on {from} ({}/{} ready)",
                state.ready_replicas, state.all_replicas
            );
            let missing = self.pool.replicas().saturating_sub(state.all_replicas);
            if missing == 0 {
                None
            } else {
                let mut senders = state.ok_holders();
                senders.truncate(missing);
                Some((senders, state.holder_addrs()))
            }
        };
        if let Err(error) = self.tree.confirm_chunk(&record.file, &id) {
            warn!("Clearing pending mark of {id} failed: {error}");
        }

        let Some((senders, holders)) = plan else {
            return;
        };
        let wanted = senders.len();
        let receivers = self.pool.select_several_except(&holders, wanted);
        if receivers.is_empty() && wanted > 0 {
            // TODO: queue the chunk for replication once a file server
            // joins or returns, instead of relying on rebalance passes.
            warn!("Chunk {id} cannot be replicated more, there is no free file server left");
            return;
        }
        for (sender, receiver) in senders.into_iter().zip(receivers) {
            info!(
                "Replicating chunk {id} from {} to {}",
                sender.private_addr, receiver.private_addr
            );
            self.table.add_fs_to_chunk(&record, receiver);
            self.spawn_replication(id, sender, receiver);
        }
    }

    /// A file server fully died: every chunk it held gets one
    /// replacement replica pushed from a surviving holder.
    pub(crate) async fn fs_is_down(&self, fs: FsHandle) {
        info!("Recovering chunks of dead file server {}", fs.private_addr);
        for record in self.table.chunks_on(&fs.private_addr) {
            let holders = {
                let mut state = record.lock();
                match state.status {
                    ChunkStatus::Pending => {
                        // The only copy was never confirmed; the write
                        // is unrecoverable.
                        state.status = ChunkStatus::Down;
                        warn!("Chunk {} lost before confirmation", record.id);
                        continue;
                    }
                    ChunkStatus::Obsolete | ChunkStatus::Down => continue,
                    ChunkStatus::Ok => state.holder_addrs(),
                }
            };
            let sender = match self.pool.select_among(&holders) {
                Ok(sender) => sender,
                Err(_) => {
                    warn!("Chunk {} has no live holder left", record.id);
                    record.lock().status = ChunkStatus::Down;
                    continue;
                }
            };
            let receivers = self.pool.select_several_except(&holders, 1);
            let Some(receiver) = receivers.first().copied() else {
                self.table.park_replication(record.id);
                continue;
            };
            record.lock().remove_server(&fs.private_addr);
            self.table.add_fs_to_chunk(&record, receiver);
            self.spawn_replication(record.id, sender, receiver);
        }
        self.table.clear_host(&fs.private_addr);
    }

    /// A file server returned from the dead: spread some load back
    /// onto it, each chunk with probability 1/alive.
    pub(crate) async fn fs_is_up(&self, fs: FsHandle) {
        info!(
            "Rebalancing towards returned file server {}",
            fs.private_addr
        );
        let alive = self.pool.alive_count().max(1);
        for record in self.table.all() {
            if rand::thread_rng().gen_range(0..alive) != 0 {
                continue;
            }
            let holders = {
                let state = record.lock();
                if state.status != ChunkStatus::Ok {
                    continue;
                }
                state.holder_addrs()
            };
            let Ok(sender) = self.pool.select_among(&holders) else {
                continue;
            };
            let receivers = self.pool.select_several_except(&holders, 1);
            let Some(receiver) = receivers.first().copied() else {
                continue;
            };
            self.table.add_fs_to_chunk(&record, receiver);
            self.spawn_replication(record.id, sender, receiver);
        }
    }

    /// Runs the two-sided replication protocol for one chunk: a write
    /// expectation on the receiver first, then the push order to the
    /// sender. A failed push order withdraws the receiver's
    /// expectation.
    fn spawn_replication(&self, id: ChunkId, sender: FsHandle, receiver: FsHandle) {
        let fs_control = self.fs.clone();
        let _handle = task::spawn(async move {
            let token = Token::new();
            if let Err(error) = fs_control
                .expect(
                    receiver.private_addr,
                    token,
                    ExpectAction::Write,
                    vec![id],
                )
                .await
            {
                warn!(
                    "Write expectation for replica of {id} on {} failed: {error}",
                    receiver.private_addr
                );
                return;
            }
            if let Err(error) = fs_control
                .replicate(sender.private_addr, token, receiver.public_addr, vec![id])
                .await
            {
                warn!(
                    "Replicate order for {id} to {} failed: {error}",
                    sender.private_addr
                );
                let _ = fs_control.cancel_token(receiver.private_addr, token).await;
            }
        });
    }

    /// Marks chunks obsolete and fans purge orders out to their live
    /// holders; holders that are down get theirs when they return.
    fn spawn_purge(&self, ids: Vec<ChunkId>) {
        if ids.is_empty() {
            return;
        }
        let table = self.table.clone();
        let pool = self.pool.clone();
        let fs_control = self.fs.clone();
        let _handle = task::spawn(async move {
            let by_holder = table.mark_obsolete(&ids);
            for (holder, chunks) in by_holder {
                if !pool.is_alive_addr(&holder.private_addr) {
                    table.defer_purge(holder.private_addr, chunks);
                    continue;
                }
                if let Err(error) = fs_control.purge(holder.private_addr, chunks.clone()).await {
                    warn!("Purge order to {} failed: {error}", holder.private_addr);
                    table.defer_purge(holder.private_addr, chunks);
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn table(&self) -> &ChunkTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::fs_link::testing::{FsCall, SpyFsControl};
    use super::pool::PoolConfig;
    use super::*;
    use crate::protocol::messages::AppStatus;

    use std::net::Ipv4Addr;
    use std::time::Duration;

    const NS_PRIVATE: SocketAddr =
        SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(10, 0, 0, 100)), 8001);

    fn members(n: usize) -> Vec<(SocketAddr, SocketAddr)> {
        (0..n)
            .map(|i| {
                let private = (Ipv4Addr::new(10, 0, 0, i as u8 + 1), 7071).into();
                let public = (Ipv4Addr::new(10, 0, 0, i as u8 + 1), 7070).into();
                (private, public)
            })
            .collect()
    }

    struct Fixture {
        ctx: Arc<NsContext>,
        pool: Arc<Pool>,
        spy: Arc<SpyFsControl>,
    }

    fn fixture(member_count: usize, replicas: usize) -> Fixture {
        let cfg = PoolConfig {
            replicas,
            soft_death: Duration::from_secs(12),
            hard_death: Duration::from_secs(180),
        };
        let (pool, _channels) = Pool::new(members(member_count), cfg);
        let spy = Arc::new(SpyFsControl::new());
        let ctx = NsContext::new(
            Namespace::in_memory(),
            pool.clone(),
            spy.clone(),
            1024,
            NS_PRIVATE,
        );
        Fixture { ctx, pool, spy }
    }

    /// Fan-outs run on spawned tasks; poll until the spy saw enough.
    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn upload_plans_chunks_and_fans_out_expectations() {
        let fx = fixture(3, 2);

        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/foo".into(),
                size: 3 * 1024,
            })
            .await;

        assert_eq!(response.status, AppStatus::Ok);
        let token = response.token.expect("upload must mint a token");
        assert_eq!(response.chunks.len(), 3);

        // Round-robin placement: three distinct servers.
        let targets: HashSet<SocketAddr> =
            response.chunks.iter().map(|c| c.storage_addr).collect();
        assert_eq!(targets.len(), 3);

        // Each target got its write expectation under the one token.
        eventually(|| fx.spy.expects().len() == 3).await;
        for call in fx.spy.expects() {
            let FsCall::Expect {
                token: sent,
                action,
                chunks,
                ..
            } = call
            else {
                unreachable!()
            };
            assert_eq!(sent, token);
            assert_eq!(action, ExpectAction::Write);
            assert_eq!(chunks.len(), 1);
        }

        // The file exists but is hidden while everything is pending.
        let listing = fx.ctx.handle_app(AppRequest::Ls { path: "/".into() }).await;
        assert!(listing.objects.is_empty());
    }

    #[tokio::test]
    async fn upload_of_existing_path_fails() {
        let fx = fixture(2, 2);
        let _ = fx
            .ctx
            .handle_app(AppRequest::Touch {
                path: "/taken".into(),
            })
            .await;

        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/taken".into(),
                size: 1024,
            })
            .await;
        assert_eq!(response.status, AppStatus::Err);
    }

    #[tokio::test]
    async fn confirm_launches_replication_towards_the_target_count() {
        let fx = fixture(3, 2);

        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/foo".into(),
                size: 512,
            })
            .await;
        let id = response.chunks[0].id;
        let record = fx.ctx.table().get(&id).expect("chunk must be recorded");
        let initial = record.lock().holder_addrs().into_iter().next().unwrap();

        // Let the upload fan-out land before counting control calls.
        eventually(|| fx.spy.expects().len() == 1).await;

        fx.ctx.confirm_chunk(id, initial).await;

        {
            let state = record.lock();
            assert_eq!(state.ready_replicas, 1);
            // The second replica is planned immediately.
            assert_eq!(state.all_replicas, 2);
        }

        // One write expectation for the receiver and one replicate
        // order for the confirmed holder.
        eventually(|| !fx.spy.replications().is_empty()).await;
        let replication = fx.spy.replications()[0].clone();
        let FsCall::Replicate {
            fs, dest, chunks, ..
        } = replication
        else {
            unreachable!()
        };
        assert_eq!(fs, initial);
        assert_eq!(chunks, vec![id]);
        // The push goes to the receiver's public plane.
        assert_eq!(dest.port(), 7070);

        // Once the receiver confirms, the chunk is fully replicated
        // and no further replication is launched.
        let receiver_private: SocketAddr = (dest.ip(), 7071).into();
        let calls_before = fx.spy.calls().len();
        fx.ctx.confirm_chunk(id, receiver_private).await;
        let state = record.lock();
        assert_eq!(state.ready_replicas, 2);
        assert_eq!(state.all_replicas, 2);
        drop(state);
        // Give any stray task a beat, then check nothing new went out.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fx.spy.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn confirm_of_unknown_chunk_or_foreign_holder_is_dropped() {
        let fx = fixture(2, 2);

        // Unknown chunk: nothing happens.
        fx.ctx
            .confirm_chunk(ChunkId::new(), members(2)[0].0)
            .await;
        assert!(fx.spy.calls().is_empty());

        // Known chunk, but confirmed from a host not planned to hold
        // it: dropped too.
        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/f".into(),
                size: 10,
            })
            .await;
        let id = response.chunks[0].id;
        let stranger: SocketAddr = (Ipv4Addr::new(10, 9, 9, 9), 7071).into();
        fx.ctx.confirm_chunk(id, stranger).await;
        let record = fx.ctx.table().get(&id).unwrap();
        assert_eq!(record.lock().ready_replicas, 0);
    }

    #[tokio::test]
    async fn download_names_the_unrecoverable_chunk() {
        let fx = fixture(3, 2);

        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/f".into(),
                size: 2 * 1024,
            })
            .await;
        let (c1, c2) = (response.chunks[0].id, response.chunks[1].id);

        // Only the first chunk gets confirmed.
        let holder1 = {
            let record = fx.ctx.table().get(&c1).unwrap();
            let addr = record.lock().holder_addrs().into_iter().next().unwrap();
            addr
        };
        fx.ctx.confirm_chunk(c1, holder1).await;

        let response = fx
            .ctx
            .handle_app(AppRequest::Download { path: "/f".into() })
            .await;
        assert_eq!(response.status, AppStatus::Err);
        assert!(
            response.message.contains(&c2.to_string()),
            "the failing chunk must be named: {}",
            response.message
        );

        // With every chunk confirmed somewhere, the plan comes back.
        let holder2 = {
            let record = fx.ctx.table().get(&c2).unwrap();
            let addr = record.lock().holder_addrs().into_iter().next().unwrap();
            addr
        };
        fx.ctx.confirm_chunk(c2, holder2).await;

        let response = fx
            .ctx
            .handle_app(AppRequest::Download { path: "/f".into() })
            .await;
        assert_eq!(response.status, AppStatus::Ok);
        assert_eq!(response.chunks.len(), 2);
    }

    #[tokio::test]
    async fn rmfile_fans_out_purges_to_live_holders() {
        let fx = fixture(2, 1);

        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/doomed".into(),
                size: 100,
            })
            .await;
        let id = response.chunks[0].id;
        let record = fx.ctx.table().get(&id).unwrap();
        let holder = record.lock().holder_addrs().into_iter().next().unwrap();
        fx.ctx.confirm_chunk(id, holder).await;

        let response = fx
            .ctx
            .handle_app(AppRequest::RmFile {
                path: "/doomed".into(),
            })
            .await;
        assert_eq!(response.status, AppStatus::Ok);

        eventually(|| !fx.spy.purges().is_empty()).await;
        let purge = fx.spy.purges()[0].clone();
        let FsCall::Purge { fs, chunks } = purge else {
            unreachable!()
        };
        assert_eq!(fs, holder);
        assert_eq!(chunks, vec![id]);
        assert_eq!(record.lock().status, ChunkStatus::Obsolete);
    }

    #[tokio::test]
    async fn purges_for_dead_holders_are_deferred() {
        let fx = fixture(2, 1);

        let response = fx
            .ctx
            .handle_app(AppRequest::Upload {
                path: "/f".into(),
                size: 100,
            })
            .await;
        let id = response.chunks[0].id;
        let record = fx.ctx.table().get(&id).unwrap();
        let holder = record.lock().holder_addrs().into_iter().next().unwrap();
        fx.ctx.confirm_chunk(id, holder).await;

        // The holder dies before the purge goes out.
        let holder_id = fx
            .pool
            .handles()
            .into_iter()
            .find(|h| h.private_addr == holder)
            .unwrap()
            .id;
        fx.pool.change_status(holder_id, pool::FsStatus::Dead);

        let _ = fx
            .ctx
            .handle_app(AppRequest::RmFile { path: "/f".into() })
            .await;

        eventually(|| !fx.ctx.table().deferred_purges_for(&holder).is_empty()).await;
        assert!(fx.spy.purges().is_empty());
        assert_eq!(fx.ctx.table().deferred_purges_for(&holder), vec![id]);
    }

    /// A dead file server's confirmed chunks get pushed to a new
    /// holder and become ready again once that holder confirms.
    #[tokio::test]
    async fn dead_file_server_triggers_recovery() {
        let fx = fixture(4, 2);
        let handles = fx.pool.handles();
        let (a, b) = (handles[0], handles[1]);

        // One chunk confirmed on A and B.
        let id = ChunkId::new();
        let record = fx.ctx.table().add_chunk(id, "/f", a);
        assert!(record.lock().confirm_from(&a.private_addr));
        fx.ctx.table().add_fs_to_chunk(&record, b);
        assert!(record.lock().confirm_from(&b.private_addr));

        // A dies: the pool marks it first, then recovery runs.
        fx.pool.change_status(a.id, pool::FsStatus::Dead);
        fx.ctx.fs_is_down(a).await;

        let (holders, ready, all) = {
            let state = record.lock();
            (
                state.holder_addrs(),
                state.ready_replicas,
                state.all_replicas,
            )
        };
        assert!(!holders.contains(&a.private_addr));
        assert!(holders.contains(&b.private_addr));
        assert_eq!(all, 2);
        assert_eq!(ready, 1);
        let new_holder = holders
            .into_iter()
            .find(|addr| *addr != b.private_addr)
            .expect("a replacement holder must be planned");
        assert!([handles[2].private_addr, handles[3].private_addr].contains(&new_holder));

        // The survivor is ordered to push to the newcomer.
        eventually(|| !fx.spy.replications().is_empty()).await;
        let replication = fx.spy.replications()[0].clone();
        let FsCall::Replicate { fs, chunks, .. } = replication else {
            unreachable!()
        };
        assert_eq!(fs, b.private_addr);
        assert_eq!(chunks, vec![id]);

        // The newcomer confirms; the chunk is fully replicated again.
        fx.ctx.confirm_chunk(id, new_holder).await;
        assert_eq!(record.lock().ready_replicas, 2);

        // The dead server's inverted entry is gone.
        assert!(fx.ctx.table().chunks_on(&a.private_addr).is_empty());
    }

    #[tokio::test]
    async fn unconfirmed_chunk_dies_with_its_only_holder() {
        let fx = fixture(3, 2);
        let a = fx.pool.handles()[0];

        let id = ChunkId::new();
        let record = fx.ctx.table().add_chunk(id, "/f", a);

        fx.ctx.fs_is_down(a).await;

        assert_eq!(record.lock().status, ChunkStatus::Down);
        // Nothing to replicate from: no control traffic.
        assert!(fx.spy.replications().is_empty());
    }

    #[tokio::test]
    async fn lost_replica_with_no_free_server_is_parked() {
        // Two members, replicas on both: nowhere to rehome.
        let fx = fixture(2, 2);
        let handles = fx.pool.handles();
        let (a, b) = (handles[0], handles[1]);

        let id = ChunkId::new();
        let record = fx.ctx.table().add_chunk(id, "/f", a);
        assert!(record.lock().confirm_from(&a.private_addr));
        fx.ctx.table().add_fs_to_chunk(&record, b);
        assert!(record.lock().confirm_from(&b.private_addr));

        fx.pool.change_status(a.id, pool::FsStatus::Dead);
        fx.ctx.fs_is_down(a).await;

        assert_eq!(fx.ctx.table().parked_replications(), vec![id]);
        assert!(fx.spy.replications().is_empty());
    }

    #[tokio::test]
    async fn returned_file_server_receives_rebalanced_chunks() {
        let fx = fixture(2, 1);
        let handles = fx.pool.handles();
        let (a, b) = (handles[0], handles[1]);

        let id = ChunkId::new();
        let record = fx.ctx.table().add_chunk(id, "/f", a);
        assert!(record.lock().confirm_from(&a.private_addr));

        // The rebalance coin is 1/alive per chunk; retry until it
        // lands.
        let mut landed = false;
        for _ in 0..64 {
            fx.ctx.fs_is_up(b).await;
            // Yield so the spawned replication task can run.
            tokio::time::sleep(Duration::from_millis(2)).await;
            if !fx.spy.replications().is_empty() {
                landed = true;
                break;
            }
        }
        assert!(landed, "rebalance never picked the chunk up");

        let replication = fx.spy.replications()[0].clone();
        let FsCall::Replicate { fs, dest, .. } = replication else {
            unreachable!()
        };
        assert_eq!(fs, a.private_addr);
        assert_eq!(dest, b.public_addr);
    }
}
