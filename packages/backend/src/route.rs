//! Client for the external safer-route service.
//!
//! The service is a black box: it takes an origin and a destination and
//! answers with an encoded polyline, distance, duration, and an advisory
//! text describing what the route avoids.

use async_trait::async_trait;
use safewalk_report_models::Coordinate;
use serde::{Deserialize, Serialize};

use crate::{BackendError, retry};

/// A route suggested by the routing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeRoute {
    /// Encoded polyline of the route geometry.
    pub polyline: String,
    /// Route length in meters.
    #[serde(alias = "distance")]
    pub distance_m: f64,
    /// Expected travel time in seconds.
    #[serde(alias = "duration")]
    pub duration_s: f64,
    /// Safety advisory for the route, if the service produced one.
    #[serde(default)]
    pub advisory: Option<String>,
}

#[derive(Debug, Serialize)]
struct RouteRequest {
    origin: Coordinate,
    destination: Coordinate,
}

/// Request/response access to a routing service.
#[async_trait]
pub trait RouteClient: Send + Sync {
    /// Asks for a safer route from `origin` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the service is unreachable or answers
    /// with something that is not a route.
    async fn safer_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<SafeRoute, BackendError>;
}

/// [`RouteClient`] that POSTs JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpRouteClient {
    client: reqwest::Client,
    url: String,
}

impl HttpRouteClient {
    /// Creates a client for the endpoint at `url`.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RouteClient for HttpRouteClient {
    async fn safer_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
    ) -> Result<SafeRoute, BackendError> {
        let request = RouteRequest {
            origin,
            destination,
        };
        let body = retry::send_json(|| self.client.post(&self.url).json(&request)).await?;
        parse_route(body)
    }
}

/// Parses a routing response. Accepts the route either at the top level or
/// wrapped in a `route` field.
fn parse_route(body: serde_json::Value) -> Result<SafeRoute, BackendError> {
    let value = match body {
        serde_json::Value::Object(mut map) if map.contains_key("route") => {
            map.remove("route").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(value).map_err(|e| BackendError::Decode {
        message: format!("invalid route response: {e}"),
    })
}
