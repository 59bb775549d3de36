#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crime report, vote, and view types shared across the `SafeWalk` core.
//!
//! [`RawReportRow`] is the loosely-typed shape rows arrive in from the
//! hosted backend (bulk query and change feed alike). [`Report`] is the
//! validated form held by the report store. Vote types model one voter's
//! relationship to one report.

pub mod raw;

use std::convert::Infallible;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use raw::RawReportRow;
pub use safewalk_geography::Coordinate;

/// Radius of the nearby-recent view, in kilometers.
pub const NEARBY_RADIUS_KM: f64 = 5.0;

/// Maximum report age included in the nearby-recent view.
pub const NEARBY_MAX_AGE: TimeDelta = TimeDelta::days(5);

/// Window for the "last week" aggregate counter.
pub const LAST_WEEK: TimeDelta = TimeDelta::days(7);

/// Severity at or above which a report counts as high severity.
pub const HIGH_SEVERITY_THRESHOLD: f64 = 3.5;

/// Default number of rows requested by a snapshot fetch.
pub const DEFAULT_SNAPSHOT_LIMIT: u32 = 100;

/// Category assigned to rows that arrive without one.
pub const OTHER_CATEGORY: &str = "other";

/// Backend-assigned report identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ReportId(pub i64);

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for ReportId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Opaque identifier of the voting user.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(pub String);

impl VoterId {
    /// Creates a voter identity from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One reported incident, validated and ready for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    /// Backend-assigned identifier.
    pub id: ReportId,
    /// Lower-cased crime category (e.g. `"theft"`, `"assault"`, `"other"`).
    pub category: String,
    /// Where the incident happened.
    pub coordinate: Coordinate,
    /// Human-readable area label, if the submitter's address resolved.
    pub area_name: Option<String>,
    /// Severity score in `0.0..=5.0`; `None` until the backend scores it.
    pub severity: Option<f64>,
    /// When the report was created.
    pub created_at: DateTime<Utc>,
    /// Upvote counter.
    pub upvotes: u32,
    /// Downvote counter.
    pub downvotes: u32,
}

impl Report {
    /// Whether this report was created within `window` of `now`, inclusive.
    #[must_use]
    pub fn is_within(&self, window: TimeDelta, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) <= window
    }

    /// Whether this report has a severity at or above
    /// [`HIGH_SEVERITY_THRESHOLD`].
    #[must_use]
    pub fn is_high_severity(&self) -> bool {
        self.severity
            .is_some_and(|severity| severity >= HIGH_SEVERITY_THRESHOLD)
    }
}

/// Direction of a vote a user can cast.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum VoteDirection {
    /// The report looks credible.
    Up,
    /// The report looks wrong or fake.
    Down,
}

/// A voter's current relationship to a report.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VoteState {
    /// Upvoted.
    Up,
    /// Downvoted.
    Down,
    /// No vote cast.
    #[default]
    None,
}

impl From<VoteDirection> for VoteState {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => Self::Up,
            VoteDirection::Down => Self::Down,
        }
    }
}

impl VoteState {
    /// Returns the direction of an active vote, or `None` when no vote is
    /// cast.
    #[must_use]
    pub const fn direction(self) -> Option<VoteDirection> {
        match self {
            Self::Up => Some(VoteDirection::Up),
            Self::Down => Some(VoteDirection::Down),
            Self::None => None,
        }
    }
}

/// A signed change to a report's vote counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    /// Change applied to the upvote counter.
    pub up: i64,
    /// Change applied to the downvote counter.
    pub down: i64,
}

impl CounterDelta {
    /// Creates a delta from its two components.
    #[must_use]
    pub const fn new(up: i64, down: i64) -> Self {
        Self { up, down }
    }

    /// Returns the delta that undoes this one.
    #[must_use]
    pub const fn negate(self) -> Self {
        Self {
            up: -self.up,
            down: -self.down,
        }
    }

    /// Returns `true` if applying this delta changes nothing.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.up == 0 && self.down == 0
    }
}

/// A vote as persisted by the backend for the current voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    /// The voted report.
    pub report_id: ReportId,
    /// The stored direction.
    #[serde(rename = "vote")]
    pub value: VoteDirection,
}

/// Category filter applied to the report feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TypeFilter {
    /// No filtering.
    #[default]
    All,
    /// Only reports whose category matches (case-insensitive).
    Category(String),
}

impl TypeFilter {
    /// Returns `true` if `report` passes this filter.
    #[must_use]
    pub fn matches(&self, report: &Report) -> bool {
        match self {
            Self::All => true,
            Self::Category(category) => report.category.eq_ignore_ascii_case(category),
        }
    }
}

impl FromStr for TypeFilter {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            Ok(Self::Category(trimmed.to_lowercase()))
        }
    }
}

/// Aggregate counters over the full (unfiltered) report collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    /// Number of reports held.
    pub total: usize,
    /// Reports created within the last seven days.
    pub last_week: usize,
    /// Reports with severity at or above the high-severity threshold.
    pub high_severity: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(severity: Option<f64>) -> Report {
        Report {
            id: ReportId(1),
            category: "theft".to_string(),
            coordinate: Coordinate::new(38.9, -77.0),
            area_name: None,
            severity,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            upvotes: 0,
            downvotes: 0,
        }
    }

    #[test]
    fn vote_direction_parses_case_insensitively() {
        assert_eq!("UP".parse::<VoteDirection>().unwrap(), VoteDirection::Up);
        assert_eq!("down".parse::<VoteDirection>().unwrap(), VoteDirection::Down);
        assert!("sideways".parse::<VoteDirection>().is_err());
        assert_eq!(VoteDirection::Down.as_ref(), "down");
    }

    #[test]
    fn vote_state_round_trips_direction() {
        for direction in [VoteDirection::Up, VoteDirection::Down] {
            assert_eq!(VoteState::from(direction).direction(), Some(direction));
        }
        assert_eq!(VoteState::None.direction(), None);
        assert_eq!(VoteState::default(), VoteState::None);
    }

    #[test]
    fn high_severity_threshold_is_inclusive() {
        assert!(report(Some(3.5)).is_high_severity());
        assert!(report(Some(5.0)).is_high_severity());
        assert!(!report(Some(3.49)).is_high_severity());
        assert!(!report(None).is_high_severity());
    }

    #[test]
    fn type_filter_parsing() {
        assert_eq!("all".parse::<TypeFilter>().unwrap(), TypeFilter::All);
        assert_eq!("ALL".parse::<TypeFilter>().unwrap(), TypeFilter::All);
        assert_eq!("".parse::<TypeFilter>().unwrap(), TypeFilter::All);
        assert_eq!(
            " Theft ".parse::<TypeFilter>().unwrap(),
            TypeFilter::Category("theft".to_string())
        );
    }

    #[test]
    fn type_filter_matching() {
        let r = report(None);
        assert!(TypeFilter::All.matches(&r));
        assert!(TypeFilter::Category("THEFT".to_string()).matches(&r));
        assert!(!TypeFilter::Category("assault".to_string()).matches(&r));
    }

    #[test]
    fn counter_delta_negation() {
        let delta = CounterDelta::new(-1, 1);
        assert_eq!(delta.negate(), CounterDelta::new(1, -1));
        assert!(!delta.is_zero());
        assert!(CounterDelta::default().is_zero());
    }

    #[test]
    fn vote_record_uses_backend_field_names() {
        let record: VoteRecord =
            serde_json::from_value(serde_json::json!({"report_id": 42, "vote": "down"})).unwrap();
        assert_eq!(record.report_id, ReportId(42));
        assert_eq!(record.value, VoteDirection::Down);
    }
}
