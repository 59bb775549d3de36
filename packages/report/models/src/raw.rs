//! Wire shape of a report row as delivered by the hosted backend.
//!
//! The backend is not strict about types: `numeric` columns come back as
//! JSON strings, optional columns may be absent or `null`, and live change
//! events occasionally carry garbage. Every field therefore decodes
//! leniently into an `Option`, and anything that is not usable becomes
//! `None` instead of failing the whole row. Validation happens later, at
//! ingestion into the store.

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

/// A report row as returned by the bulk query or carried by an insert event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawReportRow {
    /// Backend-assigned identifier.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    /// Free-form crime category.
    #[serde(default, deserialize_with = "lenient_string")]
    pub crime_type: Option<String>,
    /// Latitude in degrees.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    /// Longitude in degrees.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lon: Option<f64>,
    /// Severity score, `None` when not yet scored.
    #[serde(default, deserialize_with = "lenient_f64")]
    pub severity: Option<f64>,
    /// Creation timestamp as sent by the backend (RFC 3339, or a naive
    /// ISO 8601 timestamp interpreted as UTC).
    #[serde(default, deserialize_with = "lenient_string")]
    pub created_at: Option<String>,
    /// Human-readable area label.
    #[serde(default, deserialize_with = "lenient_string")]
    pub area_name: Option<String>,
    /// Upvote counter.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub upvote_no: Option<i64>,
    /// Downvote counter.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub downvote_no: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientFloat {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientInt {
    Int(i64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LenientText {
    Text(String),
    Int(i64),
    Float(f64),
    Other(IgnoredAny),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<LenientFloat>::deserialize(deserializer)? {
            Some(LenientFloat::Number(n)) => Some(n),
            Some(LenientFloat::Text(s)) => s.trim().parse::<f64>().ok(),
            Some(LenientFloat::Other(_)) | None => None,
        }
        .filter(|n| n.is_finite()),
    )
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LenientInt>::deserialize(deserializer)? {
        Some(LenientInt::Int(n)) => Some(n),
        Some(LenientInt::Float(n)) if n.is_finite() && n.fract() == 0.0 => Some(n as i64),
        Some(LenientInt::Text(s)) => s.trim().parse::<i64>().ok(),
        Some(LenientInt::Float(_) | LenientInt::Other(_)) | None => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<LenientText>::deserialize(deserializer)? {
        Some(LenientText::Text(s)) => Some(s),
        Some(LenientText::Int(n)) => Some(n.to_string()),
        Some(LenientText::Float(n)) => Some(n.to_string()),
        Some(LenientText::Other(_)) | None => None,
    })
}
