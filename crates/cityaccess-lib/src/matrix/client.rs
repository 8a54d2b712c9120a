//! HTTP client for OSRM-compatible duration services.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use crate::config::{PipelineConfig, RequestStyle};
use crate::error::{Error, Result};
use crate::geo::Coordinate;

const USER_AGENT: &str = concat!("cityaccess/", env!("CARGO_PKG_VERSION"));

/// One origin and the destinations submitted for it in a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestUnit {
    pub origin_id: String,
    pub origin: Coordinate,
    pub destinations: Vec<(String, Coordinate)>,
}

impl RequestUnit {
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

/// Anything that can turn a [`RequestUnit`] into travel durations.
pub trait DurationSource: Send + Sync {
    /// Return one entry per destination, in order. `None` means the service
    /// answered but has no route for that pair; it is not an error.
    fn durations(&self, unit: &RequestUnit) -> Result<Vec<Option<f64>>>;
}

/// Blocking client for the OSRM `table` and `route` services.
#[derive(Debug, Clone)]
pub struct OsrmClient {
    client: Client,
    base_url: String,
    mode: String,
    style: RequestStyle,
}

impl OsrmClient {
    pub fn new(
        host_port: &str,
        mode: &str,
        style: RequestStyle,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;
        let base_url = if host_port.starts_with("http://") || host_port.starts_with("https://") {
            host_port.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host_port.trim_end_matches('/'))
        };
        Ok(Self {
            client,
            base_url,
            mode: mode.to_string(),
            style,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            &config.service_host_port,
            &config.routing_mode,
            config.request_style,
            config.timeout(),
        )
    }

    /// URL of a one-to-many `table` request for `unit`.
    pub fn table_url(&self, unit: &RequestUnit) -> String {
        let mut coordinates = Vec::with_capacity(unit.len() + 1);
        coordinates.push(unit.origin.to_path_segment());
        coordinates.extend(unit.destinations.iter().map(|(_, c)| c.to_path_segment()));
        let destinations: Vec<String> = (1..=unit.len()).map(|i| i.to_string()).collect();
        format!(
            "{}/table/v1/{}/{}?sources=0&destinations={}&annotations=duration",
            self.base_url,
            self.mode,
            coordinates.join(";"),
            destinations.join(";")
        )
    }

    /// URL of a one-to-one `route` request.
    pub fn route_url(&self, origin: &Coordinate, destination: &Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{};{}?overview=false",
            self.base_url,
            self.mode,
            origin.to_path_segment(),
            destination.to_path_segment()
        )
    }

    fn get(&self, url: &str) -> Result<String> {
        debug!(url, "querying routing service");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::RoutingStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text()?)
    }
}

impl DurationSource for OsrmClient {
    fn durations(&self, unit: &RequestUnit) -> Result<Vec<Option<f64>>> {
        if unit.is_empty() {
            return Ok(Vec::new());
        }
        match self.style {
            RequestStyle::Table => {
                let body = self.get(&self.table_url(unit))?;
                parse_table_response(&body, unit.len())
            }
            RequestStyle::Route => unit
                .destinations
                .iter()
                .map(|(_, destination)| {
                    let body = self.get(&self.route_url(&unit.origin, destination))?;
                    parse_route_response(&body)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableResponse {
    code: Option<String>,
    message: Option<String>,
    durations: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: Option<String>,
    routes: Option<Vec<RouteEntry>>,
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    duration: Option<f64>,
}

/// Decode a `table` response for a single source and `expected` destinations.
pub fn parse_table_response(body: &str, expected: usize) -> Result<Vec<Option<f64>>> {
    let response: TableResponse =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
    let rows = response.durations.ok_or_else(|| {
        malformed(format!(
            "table response has no durations (code {:?}, message {:?})",
            response.code.as_deref().unwrap_or("none"),
            response.message.as_deref().unwrap_or("none")
        ))
    })?;
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| malformed("table response has an empty durations matrix".to_string()))?;
    if row.len() != expected {
        return Err(malformed(format!(
            "expected {expected} durations, got {}",
            row.len()
        )));
    }
    Ok(row.into_iter().map(|d| d.map(round_seconds)).collect())
}

/// Decode a `route` response. An empty route list means "no route".
pub fn parse_route_response(body: &str) -> Result<Option<f64>> {
    let response: RouteResponse =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
    let routes = response.routes.ok_or_else(|| {
        malformed(format!(
            "route response has no routes (code {:?})",
            response.code.as_deref().unwrap_or("none")
        ))
    })?;
    match routes.into_iter().next() {
        None => Ok(None),
        Some(route) => route
            .duration
            .map(|d| Some(round_seconds(d)))
            .ok_or_else(|| malformed("route has no duration".to_string())),
    }
}

fn round_seconds(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}

fn malformed(message: String) -> Error {
    Error::MalformedResponse { message }
}
