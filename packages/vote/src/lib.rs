#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Optimistic vote engine.
//!
//! [`VoteEngine::cast_vote`] applies the counter change to the shared
//! [`ReportStore`] immediately, persists the vote through
//! [`VotePersistence`], and either commits the new state or rolls the
//! counters back. At most one vote per report is in flight at a time;
//! attempts on a busy report are dropped, not queued. Votes on different
//! reports are independent.
//!
//! The engine keeps, per report id:
//!
//! - the *committed* vote last confirmed by the backend (hydrated lazily
//!   with [`VoteEngine::hydrate`]),
//! - the *pending* vote shown while a mutation is in flight,
//! - a *busy* flag guarding against concurrent mutations.

pub mod identity;
pub mod transition;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use safewalk_backend::{BackendError, VotePersistence};
use safewalk_report_models::{CounterDelta, ReportId, VoteDirection, VoteState};
use safewalk_store::ReportStore;

pub use identity::{IdentityProvider, SessionIdentity};
pub use transition::{next_state, transition_delta};

/// Why a vote attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another vote on the same report is still in flight.
    Busy,
    /// No voting identity is available.
    Unauthenticated,
}

/// Result of [`VoteEngine::cast_vote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// The attempt was dropped without touching any state.
    Skipped(SkipReason),
    /// The backend accepted the change; this is the new committed state.
    Committed(VoteState),
    /// Persisting failed and the optimistic change was undone.
    RolledBack {
        /// State that was attempted.
        attempted: VoteState,
        /// Transport error, for display.
        error: String,
    },
}

/// The most recent failed vote, kept for a non-blocking UI indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteFailure {
    /// Report the vote was for.
    pub report_id: ReportId,
    /// Transport error, for display.
    pub message: String,
}

#[derive(Debug, Default)]
struct VoteBook {
    committed: BTreeMap<ReportId, VoteState>,
    pending: BTreeMap<ReportId, VoteState>,
    busy: BTreeSet<ReportId>,
    last_failure: Option<VoteFailure>,
}

impl VoteBook {
    fn effective(&self, report_id: ReportId) -> VoteState {
        self.pending
            .get(&report_id)
            .or_else(|| self.committed.get(&report_id))
            .copied()
            .unwrap_or_default()
    }
}

/// Per-report vote state machine over a shared [`ReportStore`].
pub struct VoteEngine {
    store: Arc<ReportStore>,
    persistence: Arc<dyn VotePersistence>,
    identity: Arc<dyn IdentityProvider>,
    book: Mutex<VoteBook>,
}

impl std::fmt::Debug for VoteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoteEngine")
            .field("book", &self.book)
            .finish_non_exhaustive()
    }
}

impl VoteEngine {
    /// Creates an engine writing counters into `store`.
    #[must_use]
    pub fn new(
        store: Arc<ReportStore>,
        persistence: Arc<dyn VotePersistence>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            store,
            persistence,
            identity,
            book: Mutex::new(VoteBook::default()),
        }
    }

    fn book(&self) -> MutexGuard<'_, VoteBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The vote currently shown for a report: pending if in flight, else
    /// committed, else none.
    #[must_use]
    pub fn vote_state(&self, report_id: ReportId) -> VoteState {
        self.book().effective(report_id)
    }

    /// The last vote the backend confirmed for a report.
    #[must_use]
    pub fn committed_vote(&self, report_id: ReportId) -> VoteState {
        self.book()
            .committed
            .get(&report_id)
            .copied()
            .unwrap_or_default()
    }

    /// Whether a vote on this report is in flight. Vote controls should be
    /// disabled while this is `true`.
    #[must_use]
    pub fn is_busy(&self, report_id: ReportId) -> bool {
        self.book().busy.contains(&report_id)
    }

    /// The most recent vote failure, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<VoteFailure> {
        self.book().last_failure.clone()
    }

    /// Takes and clears the most recent vote failure.
    pub fn take_last_failure(&self) -> Option<VoteFailure> {
        self.book().last_failure.take()
    }

    /// Loads the current voter's committed votes for `report_ids`.
    ///
    /// Reports with no vote on the backend become [`VoteState::None`].
    /// Reports with a vote in flight are left alone. Does nothing without a
    /// voting identity.
    ///
    /// Committed votes for reports the store no longer holds are dropped
    /// first, so the book stays bounded by the store's window.
    ///
    /// Returns the number of active votes found.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails; no state changes then.
    pub async fn hydrate(&self, report_ids: &[ReportId]) -> Result<usize, BackendError> {
        let Some(voter) = self.identity.current_identity() else {
            return Ok(0);
        };
        if report_ids.is_empty() {
            return Ok(0);
        }

        let records = self.persistence.list_my_votes(&voter, report_ids).await?;
        let found: BTreeMap<ReportId, VoteState> = records
            .iter()
            .map(|record| (record.report_id, VoteState::from(record.value)))
            .collect();

        let mut book = self.book();
        let VoteBook { committed, busy, .. } = &mut *book;
        committed.retain(|id, _| busy.contains(id) || self.store.contains(*id));
        for &id in report_ids {
            if book.busy.contains(&id) {
                continue;
            }
            let state = found.get(&id).copied().unwrap_or_default();
            book.committed.insert(id, state);
        }
        drop(book);

        log::debug!(
            "Hydrated votes for {} reports ({} active)",
            report_ids.len(),
            found.len()
        );
        Ok(found.len())
    }

    /// Presses the `direction` vote control on a report.
    ///
    /// Pressing the active direction again retracts the vote. The counter
    /// change is visible in the store before this future resolves; on
    /// failure it is undone. If this future is dropped before the backend
    /// answers, the optimistic change is undone as well.
    pub async fn cast_vote(&self, report_id: ReportId, direction: VoteDirection) -> VoteOutcome {
        let Some(voter) = self.identity.current_identity() else {
            log::debug!("Ignoring vote on report {report_id}: not signed in");
            return VoteOutcome::Skipped(SkipReason::Unauthenticated);
        };

        let (next, delta) = {
            let mut book = self.book();
            if book.busy.contains(&report_id) {
                log::debug!("Ignoring vote on report {report_id}: already in flight");
                return VoteOutcome::Skipped(SkipReason::Busy);
            }
            let current = book.effective(report_id);
            let next = next_state(current, direction);
            book.busy.insert(report_id);
            book.pending.insert(report_id, next);
            (next, transition_delta(current, next))
        };

        self.store.update_counters(report_id, delta.up, delta.down);
        let mut in_flight = InFlight {
            engine: self,
            report_id,
            undo: delta.negate(),
            settled: false,
        };

        let result = match next.direction() {
            Some(value) => {
                self.persistence
                    .upsert_vote(report_id, &voter, value)
                    .await
            }
            None => self.persistence.delete_vote(report_id, &voter).await,
        };

        match result {
            Ok(()) => {
                in_flight.settle(Some(next));
                log::debug!("Vote on report {report_id} committed as {next}");
                VoteOutcome::Committed(next)
            }
            Err(e) => {
                in_flight.settle(None);
                let message = e.to_string();
                log::warn!("Vote on report {report_id} failed, rolled back: {message}");
                self.book().last_failure = Some(VoteFailure {
                    report_id,
                    message: message.clone(),
                });
                VoteOutcome::RolledBack {
                    attempted: next,
                    error: message,
                }
            }
        }
    }
}

/// Clears the pending/busy entries of an in-flight vote exactly once,
/// rolling the counters back unless the vote was committed.
struct InFlight<'a> {
    engine: &'a VoteEngine,
    report_id: ReportId,
    undo: CounterDelta,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(&mut self, committed: Option<VoteState>) {
        if self.settled {
            return;
        }
        self.settled = true;

        if committed.is_none() && !self.undo.is_zero() {
            self.engine
                .store
                .update_counters(self.report_id, self.undo.up, self.undo.down);
        }

        let mut book = self.engine.book();
        if let Some(state) = committed {
            book.committed.insert(self.report_id, state);
        }
        book.pending.remove(&self.report_id);
        book.busy.remove(&self.report_id);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            log::debug!(
                "Vote on report {} abandoned before completion, rolling back",
                self.report_id
            );
            self.settle(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use safewalk_backend::BackendError;
    use safewalk_report_models::{RawReportRow, VoteRecord, VoterId};
    use tokio::sync::Semaphore;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Upsert(ReportId, VoteDirection),
        Delete(ReportId),
        List(Vec<ReportId>),
    }

    #[derive(Default)]
    struct MockVotes {
        fail: AtomicBool,
        gate: Option<Semaphore>,
        calls: Mutex<Vec<Call>>,
        existing: Mutex<Vec<VoteRecord>>,
    }

    impl MockVotes {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn release(&self, n: usize) {
            if let Some(gate) = &self.gate {
                gate.add_permits(n);
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        async fn respond(&self, call: Call) -> Result<(), BackendError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                Err(BackendError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl VotePersistence for MockVotes {
        async fn upsert_vote(
            &self,
            report_id: ReportId,
            _voter: &VoterId,
            value: VoteDirection,
        ) -> Result<(), BackendError> {
            self.respond(Call::Upsert(report_id, value)).await
        }

        async fn delete_vote(
            &self,
            report_id: ReportId,
            _voter: &VoterId,
        ) -> Result<(), BackendError> {
            self.respond(Call::Delete(report_id)).await
        }

        async fn list_my_votes(
            &self,
            _voter: &VoterId,
            report_ids: &[ReportId],
        ) -> Result<Vec<VoteRecord>, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::List(report_ids.to_vec()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(BackendError::Closed);
            }
            Ok(self
                .existing
                .lock()
                .unwrap()
                .iter()
                .filter(|r| report_ids.contains(&r.report_id))
                .copied()
                .collect())
        }
    }

    fn store_with(reports: &[(i64, i64, i64)]) -> Arc<ReportStore> {
        let store = Arc::new(ReportStore::new());
        store.load_snapshot(reports.iter().map(|&(id, up, down)| RawReportRow {
            id: Some(id),
            crime_type: Some("theft".to_string()),
            lat: Some(38.9),
            lon: Some(-77.0),
            created_at: Some(format!("2025-06-01T00:00:{:02}Z", id % 60)),
            upvote_no: Some(up),
            downvote_no: Some(down),
            ..RawReportRow::default()
        }));
        store
    }

    fn counters(store: &ReportStore, id: i64) -> (u32, u32) {
        let report = store.get(ReportId(id)).unwrap();
        (report.upvotes, report.downvotes)
    }

    fn engine(store: &Arc<ReportStore>, votes: &Arc<MockVotes>) -> VoteEngine {
        VoteEngine::new(
            store.clone(),
            votes.clone(),
            Arc::new(SessionIdentity::signed_in("user-1")),
        )
    }

    #[tokio::test]
    async fn first_upvote_commits() {
        let store = store_with(&[(1, 2, 1)]);
        let votes = Arc::new(MockVotes::default());
        let engine = engine(&store, &votes);

        let outcome = engine.cast_vote(ReportId(1), VoteDirection::Up).await;

        assert_eq!(outcome, VoteOutcome::Committed(VoteState::Up));
        assert_eq!(counters(&store, 1), (3, 1));
        assert_eq!(engine.committed_vote(ReportId(1)), VoteState::Up);
        assert!(!engine.is_busy(ReportId(1)));
        assert_eq!(votes.calls(), vec![Call::Upsert(ReportId(1), VoteDirection::Up)]);
    }

    #[tokio::test]
    async fn second_press_while_busy_is_dropped() {
        let store = store_with(&[(1, 0, 0)]);
        let votes = Arc::new(MockVotes::gated());
        let engine = engine(&store, &votes);

        let first = engine.cast_vote(ReportId(1), VoteDirection::Up);
        let second = async {
            let outcome = engine.cast_vote(ReportId(1), VoteDirection::Up).await;
            // The first vote is optimistic and still in flight.
            assert!(engine.is_busy(ReportId(1)));
            assert_eq!(engine.vote_state(ReportId(1)), VoteState::Up);
            assert_eq!(counters(&store, 1), (1, 0));
            votes.release(1);
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, VoteOutcome::Committed(VoteState::Up));
        assert_eq!(second, VoteOutcome::Skipped(SkipReason::Busy));
        assert_eq!(counters(&store, 1), (1, 0));
        assert_eq!(votes.calls().len(), 1);
    }

    #[tokio::test]
    async fn pressing_same_direction_again_retracts() {
        let store = store_with(&[(1, 4, 2)]);
        let votes = Arc::new(MockVotes::default());
        let engine = engine(&store, &votes);

        engine.cast_vote(ReportId(1), VoteDirection::Up).await;
        assert_eq!(counters(&store, 1), (5, 2));
        let outcome = engine.cast_vote(ReportId(1), VoteDirection::Up).await;

        assert_eq!(outcome, VoteOutcome::Committed(VoteState::None));
        assert_eq!(counters(&store, 1), (4, 2));
        assert_eq!(engine.committed_vote(ReportId(1)), VoteState::None);
        assert_eq!(
            votes.calls(),
            vec![
                Call::Upsert(ReportId(1), VoteDirection::Up),
                Call::Delete(ReportId(1)),
            ]
        );
    }

    #[tokio::test]
    async fn switching_direction_moves_one_tally() {
        let store = store_with(&[(1, 1, 1)]);
        let votes = Arc::new(MockVotes::default());
        let engine = engine(&store, &votes);

        engine.cast_vote(ReportId(1), VoteDirection::Up).await;
        let outcome = engine.cast_vote(ReportId(1), VoteDirection::Down).await;

        assert_eq!(outcome, VoteOutcome::Committed(VoteState::Down));
        assert_eq!(counters(&store, 1), (1, 2));
    }

    #[tokio::test]
    async fn failure_rolls_back_counters() {
        let store = store_with(&[(1, 3, 0)]);
        let votes = Arc::new(MockVotes::default());
        votes.fail.store(true, Ordering::SeqCst);
        let engine = engine(&store, &votes);

        let outcome = engine.cast_vote(ReportId(1), VoteDirection::Down).await;

        assert!(matches!(
            outcome,
            VoteOutcome::RolledBack {
                attempted: VoteState::Down,
                ..
            }
        ));
        assert_eq!(counters(&store, 1), (3, 0));
        assert_eq!(engine.committed_vote(ReportId(1)), VoteState::None);
        assert_eq!(engine.vote_state(ReportId(1)), VoteState::None);
        assert!(!engine.is_busy(ReportId(1)));

        let failure = engine.take_last_failure().unwrap();
        assert_eq!(failure.report_id, ReportId(1));
        assert!(failure.message.contains("503"));
        assert!(engine.last_failure().is_none());
    }

    #[tokio::test]
    async fn failed_switch_keeps_committed_vote() {
        let store = store_with(&[(1, 5, 0)]);
        let votes = Arc::new(MockVotes::default());
        votes.existing.lock().unwrap().push(VoteRecord {
            report_id: ReportId(1),
            value: VoteDirection::Up,
        });
        let engine = engine(&store, &votes);
        assert_eq!(engine.hydrate(&[ReportId(1)]).await.unwrap(), 1);

        votes.fail.store(true, Ordering::SeqCst);
        engine.cast_vote(ReportId(1), VoteDirection::Down).await;

        assert_eq!(counters(&store, 1), (5, 0));
        assert_eq!(engine.committed_vote(ReportId(1)), VoteState::Up);
    }

    #[tokio::test]
    async fn unauthenticated_vote_is_noop() {
        let store = store_with(&[(1, 0, 0)]);
        let votes = Arc::new(MockVotes::default());
        let engine = VoteEngine::new(
            store.clone(),
            votes.clone(),
            Arc::new(SessionIdentity::anonymous()),
        );

        let outcome = engine.cast_vote(ReportId(1), VoteDirection::Up).await;

        assert_eq!(outcome, VoteOutcome::Skipped(SkipReason::Unauthenticated));
        assert_eq!(counters(&store, 1), (0, 0));
        assert!(votes.calls().is_empty());
        assert_eq!(engine.hydrate(&[ReportId(1)]).await.unwrap(), 0);
        assert!(votes.calls().is_empty());
    }

    #[tokio::test]
    async fn hydrated_vote_drives_retraction() {
        let store = store_with(&[(1, 2, 0), (2, 0, 1)]);
        let votes = Arc::new(MockVotes::default());
        votes.existing.lock().unwrap().extend([
            VoteRecord {
                report_id: ReportId(1),
                value: VoteDirection::Up,
            },
            VoteRecord {
                report_id: ReportId(9),
                value: VoteDirection::Down,
            },
        ]);
        let engine = engine(&store, &votes);

        let active = engine.hydrate(&[ReportId(1), ReportId(2)]).await.unwrap();
        assert_eq!(active, 1);
        assert_eq!(engine.vote_state(ReportId(1)), VoteState::Up);
        assert_eq!(engine.vote_state(ReportId(2)), VoteState::None);

        let outcome = engine.cast_vote(ReportId(1), VoteDirection::Up).await;
        assert_eq!(outcome, VoteOutcome::Committed(VoteState::None));
        assert_eq!(counters(&store, 1), (1, 0));
    }

    #[tokio::test]
    async fn hydrate_forgets_votes_for_reports_no_longer_held() {
        let store = store_with(&[(1, 1, 0), (2, 0, 0)]);
        let votes = Arc::new(MockVotes::default());
        votes.existing.lock().unwrap().push(VoteRecord {
            report_id: ReportId(1),
            value: VoteDirection::Up,
        });
        let engine = engine(&store, &votes);
        engine.hydrate(&[ReportId(1), ReportId(2)]).await.unwrap();
        assert_eq!(engine.committed_vote(ReportId(1)), VoteState::Up);

        store.load_snapshot(vec![RawReportRow {
            id: Some(2),
            crime_type: Some("theft".to_string()),
            lat: Some(38.9),
            lon: Some(-77.0),
            created_at: Some("2025-06-01T00:00:02Z".to_string()),
            ..RawReportRow::default()
        }]);
        engine.hydrate(&[ReportId(2)]).await.unwrap();

        let book = engine.book();
        assert!(!book.committed.contains_key(&ReportId(1)));
        assert!(book.committed.contains_key(&ReportId(2)));
    }

    #[tokio::test]
    async fn hydrate_failure_leaves_state_untouched() {
        let store = store_with(&[(1, 0, 0)]);
        let votes = Arc::new(MockVotes::default());
        let engine = engine(&store, &votes);
        engine.cast_vote(ReportId(1), VoteDirection::Down).await;

        votes.fail.store(true, Ordering::SeqCst);
        assert!(engine.hydrate(&[ReportId(1)]).await.is_err());
        assert_eq!(engine.committed_vote(ReportId(1)), VoteState::Down);
    }

    #[tokio::test]
    async fn different_reports_vote_concurrently() {
        let store = store_with(&[(1, 0, 0), (2, 0, 0)]);
        let votes = Arc::new(MockVotes::gated());
        let engine = engine(&store, &votes);

        let one = engine.cast_vote(ReportId(1), VoteDirection::Up);
        let two = engine.cast_vote(ReportId(2), VoteDirection::Down);
        let release = async {
            tokio::task::yield_now().await;
            assert!(engine.is_busy(ReportId(1)));
            assert!(engine.is_busy(ReportId(2)));
            votes.release(2);
        };
        let (one, two, ()) = tokio::join!(one, two, release);

        assert_eq!(one, VoteOutcome::Committed(VoteState::Up));
        assert_eq!(two, VoteOutcome::Committed(VoteState::Down));
        assert_eq!(counters(&store, 1), (1, 0));
        assert_eq!(counters(&store, 2), (0, 1));
    }

    #[tokio::test]
    async fn abandoned_vote_rolls_back() {
        let store = store_with(&[(1, 0, 0)]);
        let votes = Arc::new(MockVotes::gated());
        let engine = engine(&store, &votes);

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            engine.cast_vote(ReportId(1), VoteDirection::Up),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counters(&store, 1), (0, 0));
        assert!(!engine.is_busy(ReportId(1)));
        assert_eq!(engine.vote_state(ReportId(1)), VoteState::None);
    }

    #[tokio::test]
    async fn vote_on_unloaded_report_still_persists() {
        let store = store_with(&[]);
        let votes = Arc::new(MockVotes::default());
        let engine = engine(&store, &votes);

        let outcome = engine.cast_vote(ReportId(42), VoteDirection::Up).await;

        assert_eq!(outcome, VoteOutcome::Committed(VoteState::Up));
        assert!(store.is_empty());
    }
}
