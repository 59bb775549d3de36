//! Insert notifications emulated by polling the REST interface.
//!
//! On subscription the feed starts from a resume point (usually the largest
//! id of a snapshot the caller already loaded) or, without one, from the
//! newest row id in the table. It then asks for rows with a larger id on
//! every tick and emits one
//! [`ChangeKind::Insert`] event per row, in id order. Failed polls are
//! logged and retried on the next tick; the feed never gives up on its
//! own. The transport task lives inside the returned
//! [`FeedSubscription`] and stops when that subscription is closed or
//! dropped.

use std::time::Duration;

use async_trait::async_trait;
use safewalk_report_models::RawReportRow;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::rest::RestBackend;
use crate::{BackendError, ChangeEvent, ChangeFeed, ChangeKind, FeedSubscription};

/// Capacity of the event channel between the poller and the subscriber.
const EVENT_BUFFER: usize = 256;

/// A [`ChangeFeed`] backed by periodic REST polling.
#[derive(Debug, Clone)]
pub struct PollingChangeFeed {
    backend: RestBackend,
    interval: Duration,
    resume_after: Option<i64>,
}

impl PollingChangeFeed {
    /// Creates a feed polling through `backend` every `interval`.
    #[must_use]
    pub const fn new(backend: RestBackend, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            resume_after: None,
        }
    }

    /// Starts subscriptions after row `id` instead of after the newest row
    /// at subscription time, so rows inserted in between are delivered.
    #[must_use]
    pub const fn resume_after(mut self, id: i64) -> Self {
        self.resume_after = Some(id);
        self
    }
}

/// Resume point for a feed following a snapshot of `rows`: the largest id
/// in the batch, or `0` for an empty batch.
///
/// Returns `None` when rows exist but none carries an id; the caller should
/// then fall back to the newest id at subscription time.
#[must_use]
pub fn snapshot_resume_point(rows: &[RawReportRow]) -> Option<i64> {
    if rows.is_empty() {
        return Some(0);
    }
    rows.iter().filter_map(|row| row.id).max()
}

#[async_trait]
impl ChangeFeed for PollingChangeFeed {
    async fn subscribe(&self, table: &str) -> Result<FeedSubscription, BackendError> {
        let start_after = match self.resume_after {
            Some(id) => id,
            None => self.backend.latest_id(table).await?,
        };
        log::info!(
            "Polling {table} for inserts after id {start_after} every {:?}",
            self.interval
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let worker = tokio::spawn(poll_loop(
            self.backend.clone(),
            table.to_string(),
            start_after,
            self.interval,
            tx,
        ));

        Ok(FeedSubscription::new(rx, Some(worker)))
    }
}

async fn poll_loop(
    backend: RestBackend,
    table: String,
    mut last_id: i64,
    interval: Duration,
    tx: mpsc::Sender<ChangeEvent>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing past the starting
    // cursor can be expected that soon.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let rows = match backend.rows_after(&table, last_id).await {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("Polling {table} failed, will retry next tick: {e}");
                continue;
            }
        };

        for record in rows {
            last_id = advance_cursor(last_id, &record);
            let event = ChangeEvent {
                table: table.clone(),
                kind: ChangeKind::Insert,
                record,
            };
            if tx.send(event).await.is_err() {
                log::debug!("Subscriber for {table} went away, stopping poller");
                return;
            }
        }
    }
}

/// Moves the cursor past `record`'s id. Rows without an integer id leave
/// the cursor where it was.
fn advance_cursor(last_id: i64, record: &serde_json::Value) -> i64 {
    record
        .get("id")
        .and_then(serde_json::Value::as_i64)
        .map_or(last_id, |id| id.max(last_id))
}
