#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Live in-memory report store.
//!
//! [`ReportStore`] is the single mutable collection of reports shared by
//! the snapshot loader, the realtime bridge, and the vote engine. It keeps
//! reports ordered most-recent-first and never holds two reports with the
//! same id. Every writer goes through the narrow operation set on the
//! store; each operation takes the internal lock once and releases it
//! before returning, so mutations never interleave and no lock is ever held
//! across an `.await`.
//!
//! Derived views (type filter, nearby-recent, aggregate stats) are computed
//! on every read and never cached.

pub mod sanitize;

use std::collections::{BTreeSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeDelta, Utc};
use safewalk_geography::distance_km;
use safewalk_report_models::{
    Coordinate, LAST_WEEK, NEARBY_MAX_AGE, NEARBY_RADIUS_KM, RawReportRow, Report, ReportId,
    ReportStats, TypeFilter,
};

pub use sanitize::{RowRejection, sanitize};

/// Result of offering a single live row to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The row was valid and new; it is now the first report.
    Inserted(ReportId),
    /// A report with this id is already held.
    Duplicate(ReportId),
    /// The row failed validation and was dropped.
    Invalid(RowRejection),
}

#[derive(Debug, Default)]
struct Inner {
    /// Most recent first.
    reports: VecDeque<Report>,
    ids: BTreeSet<ReportId>,
}

/// Ordered, deduplicated collection of reports.
#[derive(Debug, Default)]
pub struct ReportStore {
    inner: RwLock<Inner>,
}

impl ReportStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the whole collection with a freshly fetched batch.
    ///
    /// Rows that fail [`sanitize`] are dropped. When the batch contains the
    /// same id more than once, the first occurrence wins. The result is
    /// ordered by creation time, most recent first.
    ///
    /// Returns the number of reports now held.
    pub fn load_snapshot<I>(&self, rows: I) -> usize
    where
        I: IntoIterator<Item = RawReportRow>,
    {
        let mut ids = BTreeSet::new();
        let mut reports = Vec::new();
        let mut dropped = 0usize;

        for row in rows {
            match sanitize(row) {
                Ok(report) => {
                    if ids.insert(report.id) {
                        reports.push(report);
                    } else {
                        log::debug!("Snapshot repeats report {}, keeping first", report.id);
                        dropped += 1;
                    }
                }
                Err(reason) => {
                    log::debug!("Dropping snapshot row: {reason}");
                    dropped += 1;
                }
            }
        }

        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let count = reports.len();

        {
            let mut inner = self.write();
            inner.reports = reports.into();
            inner.ids = ids;
        }

        log::info!("Loaded snapshot of {count} reports ({dropped} dropped)");
        count
    }

    /// Offers one live row to the store.
    ///
    /// A valid row whose id is not yet held is prepended without re-sorting,
    /// trusting the feed to deliver inserts in creation order. Invalid and
    /// duplicate rows leave the collection untouched.
    pub fn ingest_insert(&self, row: RawReportRow) -> IngestOutcome {
        let report = match sanitize(row) {
            Ok(report) => report,
            Err(reason) => {
                log::debug!("Dropping live row: {reason}");
                return IngestOutcome::Invalid(reason);
            }
        };

        let id = report.id;
        let mut inner = self.write();
        if !inner.ids.insert(id) {
            log::debug!("Ignoring live insert for already-held report {id}");
            return IngestOutcome::Duplicate(id);
        }
        inner.reports.push_front(report);
        drop(inner);

        log::debug!("Ingested live report {id}");
        IngestOutcome::Inserted(id)
    }

    /// Applies a signed change to a report's vote counters.
    ///
    /// Each counter is clamped at zero. Returns `false` (and changes
    /// nothing) if the report is not held.
    pub fn update_counters(&self, id: ReportId, delta_up: i64, delta_down: i64) -> bool {
        let mut inner = self.write();
        let Some(report) = inner.reports.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        report.upvotes = apply_delta(report.upvotes, delta_up);
        report.downvotes = apply_delta(report.downvotes, delta_down);
        true
    }

    /// Returns a copy of every report, most recent first.
    #[must_use]
    pub fn all(&self) -> Vec<Report> {
        self.read().reports.iter().cloned().collect()
    }

    /// Returns a copy of the report with the given id, if held.
    #[must_use]
    pub fn get(&self, id: ReportId) -> Option<Report> {
        self.read().reports.iter().find(|r| r.id == id).cloned()
    }

    /// Returns `true` if a report with this id is held.
    #[must_use]
    pub fn contains(&self, id: ReportId) -> bool {
        self.read().ids.contains(&id)
    }

    /// Number of reports held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().reports.len()
    }

    /// Returns `true` if no reports are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().reports.is_empty()
    }

    /// Distinct categories currently present, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        self.read()
            .reports
            .iter()
            .map(|r| r.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Reports passing `filter`, most recent first.
    #[must_use]
    pub fn filter_by_type(&self, filter: &TypeFilter) -> Vec<Report> {
        self.read()
            .reports
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Reports within `radius_km` of `reference` and created no more than
    /// `max_age` before `now`. Both bounds are inclusive.
    ///
    /// Returns an empty list when no reference point is known.
    #[must_use]
    pub fn nearby_recent(
        &self,
        reference: Option<Coordinate>,
        radius_km: f64,
        max_age: TimeDelta,
        now: DateTime<Utc>,
    ) -> Vec<Report> {
        let Some(reference) = reference else {
            return Vec::new();
        };

        self.read()
            .reports
            .iter()
            .filter(|r| r.is_within(max_age, now))
            .filter(|r| distance_km(reference, r.coordinate) <= radius_km)
            .cloned()
            .collect()
    }

    /// [`Self::nearby_recent`] with the standard 5 km / 5 day window.
    #[must_use]
    pub fn nearby_recent_default(
        &self,
        reference: Option<Coordinate>,
        now: DateTime<Utc>,
    ) -> Vec<Report> {
        self.nearby_recent(reference, NEARBY_RADIUS_KM, NEARBY_MAX_AGE, now)
    }

    /// Aggregate counters over the whole collection.
    #[must_use]
    pub fn aggregate_stats(&self, now: DateTime<Utc>) -> ReportStats {
        let inner = self.read();
        ReportStats {
            total: inner.reports.len(),
            last_week: inner
                .reports
                .iter()
                .filter(|r| r.is_within(LAST_WEEK, now))
                .count(),
            high_severity: inner
                .reports
                .iter()
                .filter(|r| r.is_high_severity())
                .count(),
        }
    }
}

fn apply_delta(count: u32, delta: i64) -> u32 {
    let next = i64::from(count).saturating_add(delta).max(0);
    u32::try_from(next).unwrap_or(u32::MAX)
}
