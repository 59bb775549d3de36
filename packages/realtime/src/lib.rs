#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Pushes newly created reports from the backend change feed into a
//! [`ReportStore`].
//!
//! The bridge subscribes to insert notifications on the report table while
//! it is active. Each inserted row is decoded leniently and handed to
//! [`ReportStore::ingest_insert`], which drops invalid rows and ids it
//! already holds. Updates, deletes and events for other tables are ignored.
//!
//! The subscription is scoped to the bridge: [`RealtimeBridge::deactivate`]
//! or dropping the bridge ends it. Once `deactivate` returns, no further
//! report reaches the store, even if the pump task is still winding down on
//! another worker thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use safewalk_backend::{
    BackendError, ChangeEvent, ChangeFeed, ChangeKind, FeedSubscription, REPORTS_TABLE,
};
use safewalk_report_models::RawReportRow;
use safewalk_store::{IngestOutcome, ReportStore};
use tokio::task::JoinHandle;

/// Errors raised by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The change-feed subscription could not be opened.
    #[error("Failed to subscribe to {table}: {source}")]
    Subscribe {
        /// Table the subscription was for.
        table: String,
        /// Underlying backend error.
        source: BackendError,
    },
}

/// Counters describing what the bridge did with delivered events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Rows added to the store.
    pub inserted: usize,
    /// Rows whose id the store already held.
    pub duplicates: usize,
    /// Rows that could not be decoded or lacked required fields.
    pub dropped: usize,
    /// Events that were not report inserts.
    pub ignored: usize,
}

#[derive(Debug, Default)]
struct Counters {
    inserted: AtomicUsize,
    duplicates: AtomicUsize,
    dropped: AtomicUsize,
    ignored: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            inserted: self.inserted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Open/closed flag shared by the bridge and its pump. The pump holds the
/// read side while ingesting one event; closing takes the write side, so it
/// waits out an ingest in progress and no ingest starts afterwards.
#[derive(Debug)]
struct Gate(RwLock<bool>);

impl Gate {
    fn open() -> Arc<Self> {
        Arc::new(Self(RwLock::new(true)))
    }

    fn close(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

struct Running {
    pump: JoinHandle<()>,
    gate: Arc<Gate>,
}

/// Keeps a [`ReportStore`] in sync with report inserts on the backend.
pub struct RealtimeBridge {
    feed: Arc<dyn ChangeFeed>,
    store: Arc<ReportStore>,
    counters: Arc<Counters>,
    running: Option<Running>,
}

impl std::fmt::Debug for RealtimeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeBridge")
            .field("active", &self.is_active())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl RealtimeBridge {
    /// Creates an inactive bridge from `feed` into `store`.
    #[must_use]
    pub fn new(feed: Arc<dyn ChangeFeed>, store: Arc<ReportStore>) -> Self {
        Self {
            feed,
            store,
            counters: Arc::new(Counters::default()),
            running: None,
        }
    }

    /// Starts listening for report inserts. Does nothing if already active.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Subscribe`] if the change feed refuses the
    /// subscription. The bridge stays inactive then.
    pub async fn activate(&mut self) -> Result<(), BridgeError> {
        if self.is_active() {
            return Ok(());
        }

        let subscription = self
            .feed
            .subscribe(REPORTS_TABLE)
            .await
            .map_err(|source| BridgeError::Subscribe {
                table: REPORTS_TABLE.to_string(),
                source,
            })?;

        log::info!("Realtime bridge subscribed to {REPORTS_TABLE}");
        let gate = Gate::open();
        let handle = tokio::spawn(pump(
            subscription,
            self.store.clone(),
            self.counters.clone(),
            gate.clone(),
        ));
        self.running = Some(Running { pump: handle, gate });
        Ok(())
    }

    /// Ends the subscription. Does nothing if inactive.
    ///
    /// Returns after any event being ingested at the time of the call has
    /// been applied; later events are discarded.
    pub fn deactivate(&mut self) {
        if let Some(running) = self.running.take() {
            running.gate.close();
            running.pump.abort();
            log::info!("Realtime bridge unsubscribed from {REPORTS_TABLE}");
        }
    }

    /// Whether a subscription is open and still delivering.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.pump.is_finished())
    }

    /// What the bridge has done with the events it received so far.
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }
}

impl Drop for RealtimeBridge {
    fn drop(&mut self) {
        self.deactivate();
    }
}

async fn pump(
    mut subscription: FeedSubscription,
    store: Arc<ReportStore>,
    counters: Arc<Counters>,
    gate: Arc<Gate>,
) {
    while let Some(event) = subscription.next().await {
        let open = gate.0.read().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return;
        }
        handle_event(&store, &counters, event);
    }
    log::warn!("Change feed for {REPORTS_TABLE} ended");
}

fn handle_event(store: &ReportStore, counters: &Counters, event: ChangeEvent) {
    if event.table != REPORTS_TABLE || event.kind != ChangeKind::Insert {
        log::trace!("Ignoring {} event on {}", event.kind, event.table);
        Counters::bump(&counters.ignored);
        return;
    }

    let row: RawReportRow = match serde_json::from_value(event.record) {
        Ok(row) => row,
        Err(e) => {
            log::warn!("Dropping undecodable report insert: {e}");
            Counters::bump(&counters.dropped);
            return;
        }
    };

    match store.ingest_insert(row) {
        IngestOutcome::Inserted(_) => Counters::bump(&counters.inserted),
        IngestOutcome::Duplicate(_) => Counters::bump(&counters.duplicates),
        IngestOutcome::Invalid(_) => Counters::bump(&counters.dropped),
    }
}
