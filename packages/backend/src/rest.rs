//! PostgREST-style client for the hosted backend.
//!
//! Reports live in the [`REPORTS_TABLE`] table and votes in
//! [`VOTES_TABLE`], which carries a unique constraint on
//! `(report_id, user_id)`. Row-level security on the backend scopes vote
//! rows to the bearer token's user; the explicit `user_id` filters below
//! are still sent so an anonymous key with a configured identity behaves
//! the same way.

use async_trait::async_trait;
use safewalk_report_models::{RawReportRow, ReportId, VoteDirection, VoteRecord, VoterId};
use serde::Serialize;

use crate::config::BackendConfig;
use crate::retry::{self, status_error};
use crate::{BackendError, REPORTS_TABLE, ReportSource, VOTES_TABLE, VotePersistence};

/// HTTP client for the hosted backend's REST interface.
///
/// Cheap to clone: the underlying [`reqwest::Client`] is reference-counted.
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    rest_url: String,
    api_key: String,
    bearer: String,
}

#[derive(Serialize)]
struct VoteRow<'a> {
    report_id: ReportId,
    user_id: &'a str,
    vote: VoteDirection,
}

impl RestBackend {
    /// Builds a client from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            rest_url: config.rest_url(),
            api_key: config.api_key.clone(),
            bearer: config.bearer_token().to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
    }

    /// Returns the largest `id` currently in `table`, or `0` when empty.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails.
    pub async fn latest_id(&self, table: &str) -> Result<i64, BackendError> {
        let body = retry::send_json(|| {
            self.request(reqwest::Method::GET, table).query(&[
                ("select", "id"),
                ("order", "id.desc"),
                ("limit", "1"),
            ])
        })
        .await?;

        Ok(json_rows(body)?
            .first()
            .and_then(|row| row.get("id"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0))
    }

    /// Returns rows of `table` with `id` greater than `after_id`, in id
    /// order, as raw JSON objects.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails.
    pub async fn rows_after(
        &self,
        table: &str,
        after_id: i64,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        let filter = format!("gt.{after_id}");
        let body = retry::send_json(|| {
            self.request(reqwest::Method::GET, table).query(&[
                ("select", "*"),
                ("id", filter.as_str()),
                ("order", "id.asc"),
            ])
        })
        .await?;

        json_rows(body)
    }

    async fn execute_write(&self, builder: reqwest::RequestBuilder) -> Result<(), BackendError> {
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }
}

#[async_trait]
impl ReportSource for RestBackend {
    async fn fetch_reports(&self, limit: u32) -> Result<Vec<RawReportRow>, BackendError> {
        let limit = limit.to_string();
        let body = retry::send_json(|| {
            self.request(reqwest::Method::GET, REPORTS_TABLE).query(&[
                ("select", "*"),
                ("order", "created_at.desc"),
                ("limit", limit.as_str()),
            ])
        })
        .await?;

        let rows = decode_report_rows(body)?;
        log::debug!("Fetched {} report rows", rows.len());
        Ok(rows)
    }
}

#[async_trait]
impl VotePersistence for RestBackend {
    async fn upsert_vote(
        &self,
        report_id: ReportId,
        voter: &VoterId,
        value: VoteDirection,
    ) -> Result<(), BackendError> {
        let row = VoteRow {
            report_id,
            user_id: voter.as_str(),
            vote: value,
        };
        let builder = self
            .request(reqwest::Method::POST, VOTES_TABLE)
            .query(&[("on_conflict", "report_id,user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row);

        self.execute_write(builder).await?;
        log::debug!("Upserted {value} vote on report {report_id}");
        Ok(())
    }

    async fn delete_vote(&self, report_id: ReportId, voter: &VoterId) -> Result<(), BackendError> {
        let builder = self.request(reqwest::Method::DELETE, VOTES_TABLE).query(&[
            ("report_id", format!("eq.{report_id}")),
            ("user_id", format!("eq.{voter}")),
        ]);

        self.execute_write(builder).await?;
        log::debug!("Deleted vote on report {report_id}");
        Ok(())
    }

    async fn list_my_votes(
        &self,
        voter: &VoterId,
        report_ids: &[ReportId],
    ) -> Result<Vec<VoteRecord>, BackendError> {
        if report_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = report_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let id_filter = format!("in.({ids})");
        let user_filter = format!("eq.{voter}");

        let body = retry::send_json(|| {
            self.request(reqwest::Method::GET, VOTES_TABLE).query(&[
                ("select", "report_id,vote"),
                ("user_id", user_filter.as_str()),
                ("report_id", id_filter.as_str()),
            ])
        })
        .await?;

        decode_vote_records(body)
    }
}

/// Unwraps a JSON array response.
fn json_rows(body: serde_json::Value) -> Result<Vec<serde_json::Value>, BackendError> {
    match body {
        serde_json::Value::Array(rows) => Ok(rows),
        other => Err(BackendError::Decode {
            message: format!("expected a JSON array, got {}", json_kind(&other)),
        }),
    }
}

/// Decodes a report query response. Elements that are not objects are
/// skipped; field-level problems are left for store validation.
fn decode_report_rows(body: serde_json::Value) -> Result<Vec<RawReportRow>, BackendError> {
    Ok(json_rows(body)?
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<RawReportRow>(value) {
            Ok(row) => Some(row),
            Err(e) => {
                log::warn!("Skipping undecodable report row: {e}");
                None
            }
        })
        .collect())
}

/// Decodes a vote query response, skipping rows with unknown vote values.
fn decode_vote_records(body: serde_json::Value) -> Result<Vec<VoteRecord>, BackendError> {
    Ok(json_rows(body)?
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<VoteRecord>(value) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping undecodable vote row: {e}");
                None
            }
        })
        .collect())
}

const fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
