// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The pool of registered file servers: liveness, the two-tier
//! heartbeat timeouts, and the selection policies placement runs on.
//!
//! The ring is a vector of slots whose `next_alive` indices shortcut
//! past dead members. A file server misses heartbeats long enough and
//! it degrades Live → PartiallyDead → Dead; a pulse walks it back up.
//! Full deaths and full recoveries surface as [`PoolEvent`]s for the
//! control plane to act on.

use super::error::{Error, Result};

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, Instant},
};
use tokio::{
    sync::mpsc,
    time::sleep,
};
use tracing::{debug, info, warn};

/// Identity of one pool member, handed out by the selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsHandle {
    /// Slot index in the ring.
    pub id: usize,
    /// Control-plane address; the member's identity.
    pub private_addr: SocketAddr,
    /// Data-plane address clients are pointed at.
    pub public_addr: SocketAddr,
}

/// Liveness of one member. Ordered: `Dead < PartiallyDead < Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FsStatus {
    Dead,
    PartiallyDead,
    Live,
}

/// The two heartbeat tiers. The soft tier demotes Live members to
/// PartiallyDead and promotes them back; the hard tier demotes to Dead
/// and hands a returning member to the soft tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Soft,
    Hard,
}

impl Tier {
    fn period(self, cfg: &PoolConfig) -> Duration {
        match self {
            Tier::Soft => cfg.soft_death,
            Tier::Hard => cfg.hard_death,
        }
    }

    fn dead_status(self) -> FsStatus {
        match self {
            Tier::Soft => FsStatus::PartiallyDead,
            Tier::Hard => FsStatus::Dead,
        }
    }

    fn live_status(self) -> FsStatus {
        match self {
            Tier::Soft => FsStatus::Live,
            Tier::Hard => FsStatus::PartiallyDead,
        }
    }

    /// Whether this tier's timeout clock applies to a member in
    /// `status`.
    fn eligible(self, status: FsStatus) -> bool {
        match self {
            Tier::Soft => status == FsStatus::Live,
            Tier::Hard => status != FsStatus::Dead,
        }
    }

    /// Whether a pulse from a member in `status` means it returned
    /// from this tier's death.
    fn dead_in(self, status: FsStatus) -> bool {
        match self {
            Tier::Soft => status == FsStatus::PartiallyDead,
            Tier::Hard => status == FsStatus::Dead,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Target replica count per chunk.
    pub replicas: usize,
    pub soft_death: Duration,
    pub hard_death: Duration,
}

/// A member fully died or fully returned.
#[derive(Debug, Clone, Copy)]
pub enum PoolEvent {
    WentDown(FsHandle),
    CameUp(FsHandle),
}

struct FsSlot {
    handle: FsHandle,
    alive: bool,
    status: FsStatus,
    next_alive: usize,
    last_pulse: Instant,
    available_bytes: u64,
    /// Set while the member is (or was last) hard-dead, so the climb
    /// back to Live can be recognised as a full recovery.
    was_hard_dead: bool,
}

struct PoolState {
    slots: Vec<FsSlot>,
    next: usize,
    alive: usize,
}

/// Channel ends the daemon wires to the heartbeat manager tasks and
/// the control plane's event loop.
pub struct PoolChannels {
    pub soft_rx: mpsc::Receiver<usize>,
    pub hard_rx: mpsc::Receiver<usize>,
    pub events_rx: mpsc::UnboundedReceiver<PoolEvent>,
}

pub struct Pool {
    state: Mutex<PoolState>,
    cfg: PoolConfig,
    soft_tx: mpsc::Sender<usize>,
    hard_tx: mpsc::Sender<usize>,
    events_tx: mpsc::UnboundedSender<PoolEvent>,
}

impl Pool {
    /// Builds the ring from the configured `(private, public)` address
    /// pairs. Every member starts Live with a fresh pulse.
    pub fn new(
        members: Vec<(SocketAddr, SocketAddr)>,
        cfg: PoolConfig,
    ) -> (std::sync::Arc<Self>, PoolChannels) {
        // Coalescing queues: a missed enqueue never matters because
        // last_pulse is updated before the send.
        let (soft_tx, soft_rx) = mpsc::channel(1);
        let (hard_tx, hard_rx) = mpsc::channel(1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let len = members.len();
        let now = Instant::now();
        let slots = members
            .into_iter()
            .enumerate()
            .map(|(i, (private_addr, public_addr))| FsSlot {
                handle: FsHandle {
                    id: i,
                    private_addr,
                    public_addr,
                },
                alive: true,
                status: FsStatus::Live,
                next_alive: (i + 1) % len,
                last_pulse: now,
                available_bytes: 0,
                was_hard_dead: false,
            })
            .collect();

        let pool = std::sync::Arc::new(Self {
            state: Mutex::new(PoolState {
                slots,
                next: 0,
                alive: len,
            }),
            cfg,
            soft_tx,
            hard_tx,
            events_tx,
        });
        (
            pool,
            PoolChannels {
                soft_rx,
                hard_rx,
                events_rx,
            },
        )
    }

    pub fn replicas(&self) -> usize {
        self.cfg.replicas
    }

    pub fn alive_count(&self) -> usize {
        self.lock().alive
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    pub fn handle(&self, id: usize) -> Option<FsHandle> {
        self.lock().slots.get(id).map(|slot| slot.handle)
    }

    pub fn handles(&self) -> Vec<FsHandle> {
        self.lock().slots.iter().map(|slot| slot.handle).collect()
    }

    pub fn status(&self, id: usize) -> Option<FsStatus> {
        self.lock().slots.get(id).map(|slot| slot.status)
    }

    /// Whether the member with this private address is currently
    /// selectable.
    pub fn is_alive_addr(&self, private_addr: &SocketAddr) -> bool {
        self.lock()
            .slots
            .iter()
            .any(|slot| slot.handle.private_addr == *private_addr && slot.alive)
    }

    pub fn record_available(&self, id: usize, bytes: u64) {
        if let Some(slot) = self.lock().slots.get_mut(id) {
            slot.available_bytes = bytes;
        }
    }

    /// Books a heartbeat from `from` and nudges both tier loops. An
    /// unknown sender is logged and ignored.
    pub fn register_pulse(&self, from: SocketAddr) -> bool {
        let id = {
            let mut state = self.lock();
            let Some(slot) = state
                .slots
                .iter_mut()
                .find(|slot| slot.handle.private_addr == from)
            else {
                warn!("Received heartbeat from unknown host: {from}");
                return false;
            };
            debug!("Received heartbeat from {from}");
            slot.last_pulse = Instant::now();
            slot.handle.id
        };
        let _ = self.soft_tx.try_send(id);
        let _ = self.hard_tx.try_send(id);
        true
    }

    /// Round-robin over alive members, advancing the cursor along the
    /// ring shortcut.
    pub fn select(&self) -> Result<FsHandle> {
        let mut state = self.lock();
        if state.alive == 0 {
            return Err(Error::NoCandidate);
        }
        let len = state.slots.len();
        let mut idx = state.next;
        for _ in 0..len {
            if state.slots[idx].alive {
                state.next = state.slots[idx].next_alive;
                return Ok(state.slots[idx].handle);
            }
            idx = state.slots[idx].next_alive;
        }
        Err(Error::NoCandidate)
    }

    /// Walks the ring once from the cursor, picking up to `n` alive
    /// members outside `except`. May return fewer. The cursor stays.
    pub fn select_several_except(
        &self,
        except: &HashSet<SocketAddr>,
        n: usize,
    ) -> Vec<FsHandle> {
        let state = self.lock();
        let len = state.slots.len();
        let mut selected = Vec::new();
        for i in 0..len {
            if selected.len() == n {
                break;
            }
            let slot = &state.slots[(state.next + i) % len];
            if slot.alive && !except.contains(&slot.handle.private_addr) {
                selected.push(slot.handle);
            }
        }
        selected
    }

    /// Among the alive members of `candidates`, picks the one closest
    /// ring-forward from the cursor and advances the cursor past it.
    pub fn select_among(&self, candidates: &HashSet<SocketAddr>) -> Result<FsHandle> {
        let mut state = self.lock();
        let len = state.slots.len();
        let cursor = state.next;
        let best = state
            .slots
            .iter()
            .filter(|slot| slot.alive && candidates.contains(&slot.handle.private_addr))
            .min_by_key(|slot| (slot.handle.id + len - cursor) % len)
            .map(|slot| (slot.handle, slot.next_alive));
        let Some((handle, next_alive)) = best else {
            return Err(Error::NoCandidate);
        };
        state.next = next_alive;
        Ok(handle)
    }

    /// Moves a member to `status`, maintains the alive count, repairs
    /// the ring, and surfaces full deaths and recoveries.
    pub fn change_status(&self, id: usize, status: FsStatus) {
        let event = {
            let mut state = self.lock();
            let len = state.slots.len();
            let Some(slot) = state.slots.get_mut(id) else {
                return;
            };
            let prev = slot.status;
            if prev == status {
                return;
            }
            slot.status = status;
            let was_alive = slot.alive;
            let now_alive = status == FsStatus::Live;
            slot.alive = now_alive;
            let handle = slot.handle;
            let skip_to = slot.next_alive;

            let mut event = None;
            if status == FsStatus::Dead {
                slot.was_hard_dead = true;
                event = Some(PoolEvent::WentDown(handle));
            } else if now_alive && slot.was_hard_dead {
                slot.was_hard_dead = false;
                event = Some(PoolEvent::CameUp(handle));
            }

            if now_alive {
                if !was_alive {
                    state.alive += 1;
                }
                set_new_alive(&mut state.slots, id, (id + len - 1) % len);
            } else {
                if was_alive {
                    state.alive -= 1;
                }
                set_new_alive(&mut state.slots, skip_to, id);
            }
            info!(
                "File server {id} is now {status:?} ({} alive)",
                state.alive
            );
            event
        };
        if let Some(event) = event {
            let _ = self.events_tx.send(event);
        }
    }

    /// One tier's timeout loop: waits for pulses or for the oldest
    /// eligible member to run out, and flips statuses accordingly.
    pub async fn run_heartbeat_manager(
        self: std::sync::Arc<Self>,
        tier: Tier,
        mut rx: mpsc::Receiver<usize>,
    ) {
        loop {
            let (next_dead, remaining) = self.oldest_pulse(tier);
            tokio::select! {
                maybe_id = rx.recv() => {
                    let Some(id) = maybe_id else { break };
                    let returned = self
                        .status(id)
                        .map_or(false, |status| tier.dead_in(status));
                    if returned {
                        info!("File server {id} became live again ({tier:?} tier)");
                        self.change_status(id, tier.live_status());
                    }
                }
                _ = sleep(remaining) => {
                    let Some(id) = next_dead else { continue };
                    if self.pulse_elapsed(id, tier) {
                        info!("File server {id} missed its {tier:?} deadline");
                        self.change_status(id, tier.dead_status());
                    }
                }
            }
        }
    }

    /// The eligible member with the oldest pulse and how long this tier
    /// still grants it.
    fn oldest_pulse(&self, tier: Tier) -> (Option<usize>, Duration) {
        let state = self.lock();
        let period = tier.period(&self.cfg);
        let now = Instant::now();
        let mut oldest: Option<(usize, Duration)> = None;
        for (i, slot) in state.slots.iter().enumerate() {
            if !tier.eligible(slot.status) {
                continue;
            }
            let since = now.duration_since(slot.last_pulse);
            if oldest.map_or(true, |(_, best)| since > best) {
                oldest = Some((i, since));
            }
        }
        match oldest {
            Some((id, since)) => (Some(id), period.saturating_sub(since)),
            None => (None, period),
        }
    }

    /// Re-checks a deadline at the moment it fires; a pulse may have
    /// slipped in while the timer slept.
    fn pulse_elapsed(&self, id: usize, tier: Tier) -> bool {
        let state = self.lock();
        let Some(slot) = state.slots.get(id) else {
            return false;
        };
        tier.eligible(slot.status)
            && Instant::now().duration_since(slot.last_pulse) >= tier.period(&self.cfg)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().expect("poisoned pool lock")
    }
}

/// Points the predecessors of `from` (walking backwards, through dead
/// members, wrapping) at `new_next`, stopping after the first alive
/// one.
fn set_new_alive(slots: &mut [FsSlot], new_next: usize, from: usize) {
    let len = slots.len();
    let mut i = from;
    for _ in 0..len {
        slots[i].next_alive = new_next;
        if slots[i].alive {
            return;
        }
        i = (i + len - 1) % len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use tokio::time::timeout;

    fn members(n: usize) -> Vec<(SocketAddr, SocketAddr)> {
        (0..n)
            .map(|i| {
                let private = (Ipv4Addr::new(10, 0, 0, i as u8 + 1), 7071).into();
                let public = (Ipv4Addr::new(10, 0, 0, i as u8 + 1), 7070).into();
                (private, public)
            })
            .collect()
    }

    fn quick_cfg() -> PoolConfig {
        PoolConfig {
            replicas: 2,
            soft_death: Duration::from_millis(80),
            hard_death: Duration::from_millis(240),
        }
    }

    #[tokio::test]
    async fn select_round_robins_over_alive_members() {
        let (pool, _channels) = Pool::new(members(3), quick_cfg());

        let picks: Vec<usize> = (0..6).map(|_| pool.select().unwrap().id).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn select_skips_dead_members_and_recovers_them() {
        let (pool, _channels) = Pool::new(members(3), quick_cfg());

        pool.change_status(1, FsStatus::Dead);
        let picks: Vec<usize> = (0..4).map(|_| pool.select().unwrap().id).collect();
        assert!(!picks.contains(&1));

        pool.change_status(1, FsStatus::Live);
        let picks: Vec<usize> = (0..6).map(|_| pool.select().unwrap().id).collect();
        assert!(picks.contains(&1));
    }

    #[tokio::test]
    async fn select_with_everyone_dead_has_no_candidate() {
        let (pool, _channels) = Pool::new(members(2), quick_cfg());
        pool.change_status(0, FsStatus::Dead);
        pool.change_status(1, FsStatus::PartiallyDead);

        assert!(matches!(pool.select(), Err(Error::NoCandidate)));
    }

    #[tokio::test]
    async fn select_several_except_honours_exclusions_and_bounds() {
        let (pool, _channels) = Pool::new(members(4), quick_cfg());
        let except: HashSet<SocketAddr> = [pool.handle(0).unwrap().private_addr]
            .into_iter()
            .collect();

        let picked = pool.select_several_except(&except, 10);
        let ids: HashSet<usize> = picked.iter().map(|h| h.id).collect();
        assert_eq!(ids, HashSet::from([1, 2, 3]));

        let picked = pool.select_several_except(&except, 2);
        assert_eq!(picked.len(), 2);
    }

    #[tokio::test]
    async fn select_among_prefers_the_nearest_forward_candidate() {
        let (pool, _channels) = Pool::new(members(4), quick_cfg());
        // Advance the cursor to slot 2.
        let _ = pool.select().unwrap();
        let _ = pool.select().unwrap();

        let candidates: HashSet<SocketAddr> = [
            pool.handle(0).unwrap().private_addr,
            pool.handle(3).unwrap().private_addr,
        ]
        .into_iter()
        .collect();

        // From cursor 2, slot 3 is closer than slot 0.
        assert_eq!(pool.select_among(&candidates).unwrap().id, 3);

        pool.change_status(3, FsStatus::Dead);
        assert_eq!(pool.select_among(&candidates).unwrap().id, 0);

        pool.change_status(0, FsStatus::Dead);
        assert!(matches!(
            pool.select_among(&candidates),
            Err(Error::NoCandidate)
        ));
    }

    #[tokio::test]
    async fn silent_member_degrades_then_fully_dies() {
        let (pool, mut channels) = Pool::new(members(3), quick_cfg());
        let soft = tokio::spawn(pool.clone().run_heartbeat_manager(Tier::Soft, channels.soft_rx));
        let hard = tokio::spawn(pool.clone().run_heartbeat_manager(Tier::Hard, channels.hard_rx));

        // Members 0 and 1 keep beating; member 2 stays silent.
        let beater = {
            let pool = pool.clone();
            tokio::spawn(async move {
                loop {
                    for id in 0..2usize {
                        let addr = pool.handle(id).unwrap().private_addr;
                        let _ = pool.register_pulse(addr);
                    }
                    sleep(Duration::from_millis(30)).await;
                }
            })
        };

        let event = timeout(Duration::from_secs(2), channels.events_rx.recv())
            .await
            .expect("no death within the deadline")
            .expect("event channel closed");
        assert!(matches!(event, PoolEvent::WentDown(handle) if handle.id == 2));
        assert_eq!(pool.status(2), Some(FsStatus::Dead));
        assert_eq!(pool.alive_count(), 2);

        // The dead member starts beating again: hard tier lifts it to
        // PartiallyDead, soft tier the rest of the way.
        let addr = pool.handle(2).unwrap().private_addr;
        let returner = {
            let pool = pool.clone();
            tokio::spawn(async move {
                loop {
                    let _ = pool.register_pulse(addr);
                    sleep(Duration::from_millis(20)).await;
                }
            })
        };

        let event = timeout(Duration::from_secs(2), channels.events_rx.recv())
            .await
            .expect("no recovery within the deadline")
            .expect("event channel closed");
        assert!(matches!(event, PoolEvent::CameUp(handle) if handle.id == 2));
        assert_eq!(pool.status(2), Some(FsStatus::Live));
        assert_eq!(pool.alive_count(), 3);

        beater.abort();
        returner.abort();
        soft.abort();
        hard.abort();
    }

    #[tokio::test]
    async fn pulses_keep_everyone_live() {
        let (pool, channels) = Pool::new(members(2), quick_cfg());
        let soft = tokio::spawn(pool.clone().run_heartbeat_manager(Tier::Soft, channels.soft_rx));
        let hard = tokio::spawn(pool.clone().run_heartbeat_manager(Tier::Hard, channels.hard_rx));

        for _ in 0..10 {
            for id in 0..2usize {
                let addr = pool.handle(id).unwrap().private_addr;
                let _ = pool.register_pulse(addr);
            }
            sleep(Duration::from_millis(30)).await;
        }

        assert_eq!(pool.status(0), Some(FsStatus::Live));
        assert_eq!(pool.status(1), Some(FsStatus::Live));
        soft.abort();
        hard.abort();
    }
}
