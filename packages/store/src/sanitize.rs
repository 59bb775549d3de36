//! Validation and coercion of raw backend rows into [`Report`]s.
//!
//! Snapshot loading and live inserts share these rules so a row is either
//! accepted identically on both paths or dropped on both.

use chrono::{DateTime, NaiveDateTime, Utc};
use safewalk_report_models::{Coordinate, OTHER_CATEGORY, RawReportRow, Report, ReportId};

/// Why a raw row was not admitted into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    /// The row has no usable identifier.
    #[error("row has no id")]
    MissingId,
    /// Latitude or longitude is absent or not a finite number.
    #[error("row has no numeric coordinates")]
    MissingCoordinates,
    /// The creation timestamp is absent or unparseable.
    #[error("row has no parseable created_at")]
    MissingTimestamp,
}

/// Converts a raw row into a [`Report`].
///
/// Coordinates must both be present and finite. The category is trimmed
/// and lower-cased, defaulting to `"other"`. Severity is kept only when it
/// is a finite number. Vote counters default to zero and negative values
/// are clamped to zero.
///
/// # Errors
///
/// Returns a [`RowRejection`] describing the first missing required field.
pub fn sanitize(row: RawReportRow) -> Result<Report, RowRejection> {
    let id = row.id.map(ReportId).ok_or(RowRejection::MissingId)?;

    let coordinate = match (row.lat, row.lon) {
        (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Coordinate::new(lat, lon),
        _ => return Err(RowRejection::MissingCoordinates),
    };

    let created_at = row
        .created_at
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(RowRejection::MissingTimestamp)?;

    let category = row
        .crime_type
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| OTHER_CATEGORY.to_string());

    let area_name = row
        .area_name
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());

    Ok(Report {
        id,
        category,
        coordinate,
        area_name,
        severity: row.severity.filter(|s| s.is_finite()),
        created_at,
        upvotes: clamp_counter(row.upvote_no),
        downvotes: clamp_counter(row.downvote_no),
    })
}

/// Parses a backend timestamp.
///
/// Accepts RFC 3339 (`timestamptz` columns) and naive ISO 8601 with or
/// without fractional seconds, which is taken to be UTC.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn clamp_counter(value: Option<i64>) -> u32 {
    value.map_or(0, |v| u32::try_from(v.max(0)).unwrap_or(u32::MAX))
}
