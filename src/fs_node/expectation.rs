// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Capability gating and deferred-purge accounting.
//!
//! The name server authorizes chunk transfers by registering a token
//! with the set of chunks it covers. Each (token, chunk) pair is
//! consumed exactly once. A chunk the name server wants destroyed while
//! some live token still covers it is parked and destroyed only once
//! the last such token consumes or cancels.

use super::error::{Error, Result};
use crate::protocol::{ChunkId, ExpectAction, Token};

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};
use tracing::trace;

/// One token's capability record.
#[derive(Debug)]
struct TokenExpectation {
    action: ExpectAction,
    /// Chunk id to processed flag. A flag flips false to true exactly
    /// once, when the transfer it authorizes completes.
    chunks: HashMap<ChunkId, bool>,
    pending: usize,
}

/// What a cancelled token leaves behind.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CancelOutcome {
    /// Chunks that are now safe to destroy.
    pub purge: Vec<ChunkId>,
}

/// Token-keyed capability store with per-chunk reference counts.
///
/// All three maps move together under one lock, which is never held
/// across an await point.
#[derive(Debug, Default)]
pub struct ExpectationDb {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    index: HashMap<Token, TokenExpectation>,
    /// Per chunk: how many live (token, chunk) pairs are unprocessed.
    expects_per_chunk: HashMap<ChunkId, usize>,
    /// Chunks the name server asked to destroy while still referenced.
    purge_set: HashSet<ChunkId>,
}

impl ExpectationDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` for every chunk in `ids` under `token`,
    /// atomically. Duplicate ids collapse. Fails with
    /// [`Error::TokenConflict`] if the token is already registered, in
    /// which case nothing changes.
    pub fn set(
        &self,
        token: Token,
        action: ExpectAction,
        ids: impl IntoIterator<Item = ChunkId>,
    ) -> Result<()> {
        let mut inner = self.write();
        if inner.index.contains_key(&token) {
            return Err(Error::TokenConflict(token));
        }

        let chunks: HashMap<ChunkId, bool> = ids.into_iter().map(|id| (id, false)).collect();
        let pending = chunks.len();
        for id in chunks.keys() {
            *inner.expects_per_chunk.entry(*id).or_insert(0) += 1;
        }
        let _ = inner.index.insert(
            token,
            TokenExpectation {
                action,
                chunks,
                pending,
            },
        );
        trace!("Expectation registered: token={token} action={action} pending={pending}");
        Ok(())
    }

    /// The action `token` currently authorizes for `id`; `Nothing`
    /// unless the pair is live and unconsumed.
    pub fn action_for(&self, token: &Token, id: &ChunkId) -> ExpectAction {
        let inner = self.read();
        let Some(exp) = inner.index.get(token) else {
            return ExpectAction::Nothing;
        };
        match exp.chunks.get(id) {
            Some(false) => exp.action,
            _ => ExpectAction::Nothing,
        }
    }

    /// Marks the (token, id) pair consumed. Returns chunks that are now
    /// safe to destroy (the pair was the last reference to a parked
    /// chunk). Unknown pairs and repeats are no-ops.
    pub fn fulfill(&self, token: &Token, id: &ChunkId) -> Vec<ChunkId> {
        let mut inner = self.write();
        let Some(exp) = inner.index.get_mut(token) else {
            return Vec::new();
        };
        match exp.chunks.get_mut(id) {
            Some(processed) if !*processed => *processed = true,
            _ => return Vec::new(),
        }
        exp.pending -= 1;
        let done = exp.pending == 0;

        let mut purge = Vec::new();
        inner.release_reference(*id, &mut purge);
        if done {
            inner.drop_token(token, &mut purge);
        }
        trace!("Expectation fulfilled: token={token} chunk={id}");
        purge
    }

    /// Withdraws `token`. Chunks it wrote that were never acknowledged
    /// are rolled back: they become obsolete and are destroyed once
    /// unreferenced. Idempotent: an unknown token is a successful
    /// no-op.
    pub fn cancel(&self, token: &Token) -> CancelOutcome {
        let mut inner = self.write();
        let Some(exp) = inner.index.get_mut(token) else {
            return CancelOutcome::default();
        };
        let action = exp.action;
        // Close the consume race: a request that has not passed its
        // authorization check yet must observe Nothing from now on.
        exp.action = ExpectAction::Nothing;
        let written: Vec<ChunkId> = exp
            .chunks
            .iter()
            .filter(|(_, processed)| **processed)
            .map(|(id, _)| *id)
            .collect();

        let mut purge = Vec::new();
        if action == ExpectAction::Write {
            // Write chunks completed under a cancelled token were never
            // acknowledged to the name server; destroy them.
            for id in written {
                inner.park_or_emit(id, &mut purge);
            }
        }
        inner.drop_token(token, &mut purge);
        trace!("Token cancelled: {token}");
        CancelOutcome { purge }
    }

    /// Marks chunks for destruction. Unreferenced ones are returned for
    /// immediate destruction; the rest are parked until their last
    /// reference goes.
    pub fn make_obsolete(&self, ids: impl IntoIterator<Item = ChunkId>) -> Vec<ChunkId> {
        let mut inner = self.write();
        let mut purge = Vec::new();
        for id in ids {
            inner.park_or_emit(id, &mut purge);
        }
        purge
    }

    /// Number of live unconsumed references to `id`. Test seam.
    #[cfg(test)]
    pub fn reference_count(&self, id: &ChunkId) -> usize {
        self.read().expects_per_chunk.get(id).copied().unwrap_or(0)
    }

    /// Whether `id` awaits destruction. Test seam.
    #[cfg(test)]
    pub fn is_parked(&self, id: &ChunkId) -> bool {
        self.read().purge_set.contains(id)
    }

    #[cfg(test)]
    pub fn knows_token(&self, token: &Token) -> bool {
        self.read().index.contains_key(token)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("poisoned expectation lock")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().expect("poisoned expectation lock")
    }
}

impl Inner {
    /// Drops one unconsumed reference to `id`; a parked chunk whose
    /// last reference goes is emitted into `purge`.
    fn release_reference(&mut self, id: ChunkId, purge: &mut Vec<ChunkId>) {
        let Some(count) = self.expects_per_chunk.get_mut(&id) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            let _ = self.expects_per_chunk.remove(&id);
            if self.purge_set.remove(&id) {
                purge.push(id);
            }
        }
    }

    /// Obsoletes `id` now or parks it while references remain.
    fn park_or_emit(&mut self, id: ChunkId, purge: &mut Vec<ChunkId>) {
        match self.expects_per_chunk.get(&id) {
            None | Some(0) => purge.push(id),
            Some(_) => {
                let _ = self.purge_set.insert(id);
            }
        }
    }

    /// Removes a token, releasing the references its unconsumed chunks
    /// still hold.
    fn drop_token(&mut self, token: &Token, purge: &mut Vec<ChunkId>) {
        let Some(exp) = self.index.remove(token) else {
            return;
        };
        for (id, processed) in exp.chunks {
            if !processed {
                self.release_reference(id, purge);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    fn ids(n: usize) -> Vec<ChunkId> {
        (0..n).map(|_| ChunkId::new()).collect()
    }

    #[test]
    fn pair_is_consumed_exactly_once() {
        let db = ExpectationDb::new();
        let token = Token::new();
        let chunk = ChunkId::new();

        db.set(token, ExpectAction::Read, [chunk]).unwrap();
        assert_eq!(db.action_for(&token, &chunk), ExpectAction::Read);

        let purge = db.fulfill(&token, &chunk);
        assert!(purge.is_empty());
        assert_eq!(db.action_for(&token, &chunk), ExpectAction::Nothing);
        assert!(!db.knows_token(&token));

        // A second fulfill is a no-op.
        assert!(db.fulfill(&token, &chunk).is_empty());
    }

    #[test]
    fn token_conflict_leaves_no_partial_state() {
        let db = ExpectationDb::new();
        let token = Token::new();
        let first = ids(2);
        let second = ids(3);

        db.set(token, ExpectAction::Read, first.clone()).unwrap();
        assert_matches!(
            db.set(token, ExpectAction::Write, second.clone()),
            Err(Error::TokenConflict(_))
        );

        for id in &second {
            assert_eq!(db.reference_count(id), 0);
        }
        for id in &first {
            assert_eq!(db.reference_count(id), 1);
        }
    }

    #[test]
    fn obsolete_unreferenced_chunk_purges_immediately() {
        let db = ExpectationDb::new();
        let chunk = ChunkId::new();

        let purge = db.make_obsolete([chunk]);
        assert_eq!(purge, vec![chunk]);
        assert!(!db.is_parked(&chunk));
    }

    #[test]
    fn purge_defers_until_both_holders_consume() {
        let db = ExpectationDb::new();
        let chunk = ChunkId::new();
        let (a, b) = (Token::new(), Token::new());

        db.set(a, ExpectAction::Read, [chunk]).unwrap();
        db.set(b, ExpectAction::Read, [chunk]).unwrap();

        assert!(db.make_obsolete([chunk]).is_empty());
        assert!(db.is_parked(&chunk));

        assert!(db.fulfill(&a, &chunk).is_empty());
        assert!(db.is_parked(&chunk));

        let purge = db.fulfill(&b, &chunk);
        assert_eq!(purge, vec![chunk]);
        assert!(!db.is_parked(&chunk));
        assert_eq!(db.reference_count(&chunk), 0);
    }

    #[test]
    fn cancel_rolls_back_written_chunks() {
        let db = ExpectationDb::new();
        let token = Token::new();
        let all = ids(4);

        db.set(token, ExpectAction::Write, all.clone()).unwrap();
        // Two writes complete before the cancel.
        assert!(db.fulfill(&token, &all[0]).is_empty());
        assert!(db.fulfill(&token, &all[2]).is_empty());

        let outcome = db.cancel(&token);
        let mut purged = outcome.purge;
        purged.sort();
        let mut expected = vec![all[0], all[2]];
        expected.sort();
        assert_eq!(purged, expected);

        assert!(!db.knows_token(&token));
        for id in &all {
            assert_eq!(db.reference_count(id), 0);
        }
    }

    #[test]
    fn cancel_is_idempotent() {
        let db = ExpectationDb::new();
        let token = Token::new();

        assert_eq!(db.cancel(&token), CancelOutcome::default());

        db.set(token, ExpectAction::Write, ids(2)).unwrap();
        let _ = db.cancel(&token);
        assert_eq!(db.cancel(&token), CancelOutcome::default());
    }

    #[test]
    fn cancelled_write_still_referenced_elsewhere_is_parked() {
        let db = ExpectationDb::new();
        let chunk = ChunkId::new();
        let writer = Token::new();
        let reader = Token::new();

        db.set(writer, ExpectAction::Write, [chunk]).unwrap();
        assert!(db.fulfill(&writer, &chunk).is_empty());
        // A reader was authorized before the cancel.
        db.set(reader, ExpectAction::Read, [chunk]).unwrap();

        let outcome = db.cancel(&writer);
        assert!(outcome.purge.is_empty());
        assert!(db.is_parked(&chunk));

        // The reader's consume is the last reference.
        let purge = db.fulfill(&reader, &chunk);
        assert_eq!(purge, vec![chunk]);
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;
        use std::collections::HashSet;

        #[derive(Debug, Clone)]
        enum Op {
            Set { token: u8, write: bool, chunks: Vec<u8> },
            Fulfill { token: u8, chunk: u8 },
            Cancel { token: u8 },
            MakeObsolete { chunks: Vec<u8> },
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                (0u8..8, any::<bool>(), prop::collection::vec(0u8..16, 1..4))
                    .prop_map(|(token, write, chunks)| Op::Set { token, write, chunks }),
                (0u8..8, 0u8..16).prop_map(|(token, chunk)| Op::Fulfill { token, chunk }),
                (0u8..8).prop_map(|token| Op::Cancel { token }),
                prop::collection::vec(0u8..16, 1..4)
                    .prop_map(|chunks| Op::MakeObsolete { chunks }),
            ]
        }

        proptest! {
            /// Refcount consistency and purge safety under arbitrary
            /// schedules: every chunk handed out for destruction is
            /// unreferenced and obsolete at that instant, at most once,
            /// and at rest each refcount equals the number of live
            /// unconsumed pairs.
            #[test]
            fn refcounts_and_purges_stay_consistent(
                ops in prop::collection::vec(op_strategy(), 1..64)
            ) {
                let db = ExpectationDb::new();
                let tokens: Vec<Token> = (0..8).map(|_| Token::new()).collect();
                let chunks: Vec<ChunkId> = (0..16).map(|_| ChunkId::new()).collect();
                let mut destroyed: HashSet<ChunkId> = HashSet::new();

                let mut note_purged = |purged: Vec<ChunkId>,
                                       destroyed: &mut HashSet<ChunkId>| {
                    for id in purged {
                        // At most once, and only while unreferenced.
                        prop_assert!(destroyed.insert(id));
                        prop_assert_eq!(db.reference_count(&id), 0);
                        prop_assert!(!db.is_parked(&id));
                    }
                    Ok(())
                };

                for op in ops {
                    match op {
                        Op::Set { token, write, chunks: chosen } => {
                            let action = if write {
                                ExpectAction::Write
                            } else {
                                ExpectAction::Read
                            };
                            let chosen: Vec<ChunkId> =
                                chosen.iter().map(|i| chunks[*i as usize]).collect();
                            if db.set(tokens[token as usize], action, chosen.clone()).is_ok() {
                                // A re-expected chunk counts as written
                                // anew; it may be destroyed once more.
                                for id in &chosen {
                                    let _ = destroyed.remove(id);
                                }
                            }
                        }
                        Op::Fulfill { token, chunk } => {
                            let purged = db.fulfill(
                                &tokens[token as usize],
                                &chunks[chunk as usize],
                            );
                            note_purged(purged, &mut destroyed)?;
                        }
                        Op::Cancel { token } => {
                            let outcome = db.cancel(&tokens[token as usize]);
                            note_purged(outcome.purge, &mut destroyed)?;
                        }
                        Op::MakeObsolete { chunks: chosen } => {
                            let chosen: Vec<ChunkId> =
                                chosen.iter().map(|i| chunks[*i as usize]).collect();
                            let purged = db.make_obsolete(chosen);
                            let mut seen = HashSet::new();
                            let deduped: Vec<ChunkId> = purged
                                .into_iter()
                                .filter(|id| seen.insert(*id))
                                .filter(|id| !destroyed.contains(id))
                                .collect();
                            note_purged(deduped, &mut destroyed)?;
                        }
                    }
                }

                // At rest: recounting from the live index must match.
                for (i, chunk) in chunks.iter().enumerate() {
                    let live_pairs = (0..8)
                        .filter(|t| {
                            db.action_for(&tokens[*t], chunk) != ExpectAction::Nothing
                        })
                        .count();
                    prop_assert_eq!(
                        db.reference_count(chunk),
                        live_pairs,
                        "chunk {} refcount drifted",
                        i
                    );
                }
            }
        }
    }
}
