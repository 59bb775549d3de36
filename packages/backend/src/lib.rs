#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Hosted backend interfaces and HTTP clients for the `SafeWalk` core.
//!
//! The core never talks to the network directly. It depends on the traits
//! defined here:
//!
//! - [`ReportSource`] for the bulk report query,
//! - [`ChangeFeed`] for insert notifications on the report table,
//! - [`VotePersistence`] for per-voter vote records,
//! - [`RouteClient`] for the external safer-route service.
//!
//! [`rest::RestBackend`], [`polling::PollingChangeFeed`] and
//! [`route::HttpRouteClient`] implement them against a PostgREST-style
//! hosted backend. Tests substitute in-memory implementations.

pub mod config;
pub mod polling;
pub mod rest;
pub mod retry;
pub mod route;

use async_trait::async_trait;
use safewalk_report_models::{RawReportRow, ReportId, VoteDirection, VoteRecord, VoterId};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use config::{BackendConfig, ConfigError};
pub use route::{RouteClient, SafeRoute};

/// Table holding submitted reports.
pub const REPORTS_TABLE: &str = "reports";

/// Table holding one vote per (report, voter).
pub const VOTES_TABLE: &str = "report_votes";

/// Errors that can occur while talking to the hosted backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// HTTP request failed (connection, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },

    /// The response had an unexpected shape.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what went wrong.
        message: String,
    },

    /// The change-feed subscription is no longer delivering events.
    #[error("Subscription closed")]
    Closed,
}

/// Kind of row change carried by a [`ChangeEvent`].
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
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new row was inserted.
    Insert,
    /// An existing row was modified.
    Update,
    /// A row was removed.
    Delete,
}

/// One change notification from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the change happened on.
    pub table: String,
    /// What happened to the row.
    pub kind: ChangeKind,
    /// The new row (for inserts and updates), as delivered.
    pub record: serde_json::Value,
}

/// A live change-feed subscription.
///
/// Owns the receiving end of the event channel and, optionally, the
/// transport task producing the events. Closing or dropping the
/// subscription stops that task, so a subscription can never outlive its
/// owner.
#[derive(Debug)]
pub struct FeedSubscription {
    events: mpsc::Receiver<ChangeEvent>,
    worker: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    /// Wraps an event receiver and the task feeding it.
    #[must_use]
    pub const fn new(events: mpsc::Receiver<ChangeEvent>, worker: Option<JoinHandle<()>>) -> Self {
        Self { events, worker }
    }

    /// Waits for the next event. Returns `None` once the transport has
    /// stopped and all buffered events were consumed.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Stops the transport task and refuses further events.
    pub fn close(&mut self) {
        self.events.close();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Bulk read access to the report table.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Fetches up to `limit` reports, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the transport fails or the response is
    /// not a list of rows.
    async fn fetch_reports(&self, limit: u32) -> Result<Vec<RawReportRow>, BackendError>;
}

/// Change-notification channel for a table.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription delivering change events for `table`.
    ///
    /// Reconnection and backoff, if any, are the transport's concern.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the subscription cannot be established.
    async fn subscribe(&self, table: &str) -> Result<FeedSubscription, BackendError>;
}

/// Persistence of per-voter vote records, unique on (report, voter).
#[async_trait]
pub trait VotePersistence: Send + Sync {
    /// Creates or overwrites the voter's vote on a report.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the write is not acknowledged.
    async fn upsert_vote(
        &self,
        report_id: ReportId,
        voter: &VoterId,
        value: VoteDirection,
    ) -> Result<(), BackendError>;

    /// Removes the voter's vote on a report, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the delete is not acknowledged.
    async fn delete_vote(&self, report_id: ReportId, voter: &VoterId) -> Result<(), BackendError>;

    /// Lists the voter's existing votes among `report_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the query fails.
    async fn list_my_votes(
        &self,
        voter: &VoterId,
        report_ids: &[ReportId],
    ) -> Result<Vec<VoteRecord>, BackendError>;
}
