//! Pipeline configuration.
//!
//! Values are layered: built-in defaults, then an optional JSON file
//! ([`PipelineConfig::from_path`]), then `CITYACCESS_*` environment variables
//! ([`PipelineConfig::apply_env`]). Callers such as the CLI apply their own
//! flag overrides last and finish with [`PipelineConfig::validate`].

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::Identifier;
use crate::error::{Error, Result};

const ENV_PREFIX: &str = "CITYACCESS_";

/// How destinations are submitted to the routing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStyle {
    /// One origin against up to `batch_size_per_request` destinations per call.
    #[default]
    Table,
    /// One call per origin-destination pair.
    Route,
}

impl fmt::Display for RequestStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            RequestStyle::Table => "table",
            RequestStyle::Route => "route",
        };
        f.write_str(value)
    }
}

impl FromStr for RequestStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(RequestStyle::Table),
            "route" => Ok(RequestStyle::Route),
            other => Err(Error::InvalidConfig {
                message: format!("request_style must be 'table' or 'route', got {other:?}"),
            }),
        }
    }
}

/// Every option recognised by the prefilter, fetcher and scoring stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidate pairs at or beyond this straight-line distance are not routed.
    pub euclidean_limit_meters: f64,
    /// Routing profile, also the name of the duration table (e.g. `walking`).
    pub routing_mode: String,
    /// `host:port` of the routing service.
    pub service_host_port: String,
    /// Maximum travel time for a service to count as reachable.
    pub max_walk_duration_seconds: f64,
    pub worker_pool_size: usize,
    pub batch_size_per_request: usize,
    /// Additional attempts after a failed routing request.
    pub retry_count: u32,
    pub retry_base_delay_ms: u64,
    /// Per-request timeout in seconds.
    pub request_timeout: u64,
    pub request_style: RequestStyle,
    /// Demographic column on `orig` used for funding allocation.
    pub population_column: String,
    /// Directory for per-worker staging files. Enables resuming an
    /// interrupted fetch; a temporary directory is used when unset.
    pub staging_dir: Option<PathBuf>,
    pub prefilter_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            euclidean_limit_meters: 2000.0,
            routing_mode: "walking".to_string(),
            service_host_port: "localhost:5000".to_string(),
            max_walk_duration_seconds: 1800.0,
            worker_pool_size: default_pool_size(),
            batch_size_per_request: 100,
            retry_count: 0,
            retry_base_delay_ms: 500,
            request_timeout: 30,
            request_style: RequestStyle::Table,
            population_column: "pop_over_65".to_string(),
            staging_dir: None,
            prefilter_batch_size: 1000,
        }
    }
}

/// Worker count leaving headroom for the producer, the database and the OS.
pub fn default_pool_size() -> usize {
    pool_size_for(num_cpus::get())
}

fn pool_size_for(cpus: usize) -> usize {
    let reserved = if cpus <= 10 { 2 } else { 6 };
    cpus.saturating_sub(reserved).max(1)
}

impl PipelineConfig {
    /// Load a JSON configuration file; absent keys keep their defaults.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `CITYACCESS_<FIELD>` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("EUCLIDEAN_LIMIT_METERS") {
            self.euclidean_limit_meters = parse_var("EUCLIDEAN_LIMIT_METERS", &value)?;
        }
        if let Some(value) = lookup("ROUTING_MODE") {
            self.routing_mode = value;
        }
        if let Some(value) = lookup("SERVICE_HOST_PORT") {
            self.service_host_port = value;
        }
        if let Some(value) = lookup("MAX_WALK_DURATION_SECONDS") {
            self.max_walk_duration_seconds = parse_var("MAX_WALK_DURATION_SECONDS", &value)?;
        }
        if let Some(value) = lookup("WORKER_POOL_SIZE") {
            self.worker_pool_size = parse_var("WORKER_POOL_SIZE", &value)?;
        }
        if let Some(value) = lookup("BATCH_SIZE_PER_REQUEST") {
            self.batch_size_per_request = parse_var("BATCH_SIZE_PER_REQUEST", &value)?;
        }
        if let Some(value) = lookup("RETRY_COUNT") {
            self.retry_count = parse_var("RETRY_COUNT", &value)?;
        }
        if let Some(value) = lookup("RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = parse_var("RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout = parse_var("REQUEST_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("REQUEST_STYLE") {
            self.request_style = value.parse()?;
        }
        if let Some(value) = lookup("POPULATION_COLUMN") {
            self.population_column = value;
        }
        if let Some(value) = lookup("STAGING_DIR") {
            self.staging_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("PREFILTER_BATCH_SIZE") {
            self.prefilter_batch_size = parse_var("PREFILTER_BATCH_SIZE", &value)?;
        }
        Ok(())
    }

    /// Validate ranges and identifiers.
    pub fn validate(&self) -> Result<()> {
        if !self.euclidean_limit_meters.is_finite() || self.euclidean_limit_meters <= 0.0 {
            return invalid(format!(
                "euclidean_limit_meters must be a positive number, got {}",
                self.euclidean_limit_meters
            ));
        }
        if !self.max_walk_duration_seconds.is_finite() || self.max_walk_duration_seconds <= 0.0 {
            return invalid(format!(
                "max_walk_duration_seconds must be a positive number, got {}",
                self.max_walk_duration_seconds
            ));
        }
        if self.worker_pool_size == 0 {
            return invalid("worker_pool_size must be at least 1".to_string());
        }
        if self.batch_size_per_request == 0 {
            return invalid("batch_size_per_request must be at least 1".to_string());
        }
        if self.prefilter_batch_size == 0 {
            return invalid("prefilter_batch_size must be at least 1".to_string());
        }
        if self.request_timeout == 0 {
            return invalid("request_timeout must be at least 1 second".to_string());
        }
        if self.service_host_port.trim().is_empty() {
            return invalid("service_host_port must not be empty".to_string());
        }
        Identifier::new(&self.routing_mode)?;
        Identifier::new(&self.population_column)?;
        Ok(())
    }

    /// Name of the duration table for the configured routing mode.
    pub fn duration_table(&self) -> Result<Identifier> {
        Identifier::new(&self.routing_mode)
    }

    /// Origin column holding the unnormalised population used for funding.
    pub fn population_column(&self) -> Result<Identifier> {
        Identifier::new(&self.population_column)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Destinations per routing request, honouring the request style.
    pub fn effective_batch_size(&self) -> usize {
        match self.request_style {
            RequestStyle::Table => self.batch_size_per_request,
            RequestStyle::Route => 1,
        }
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{ENV_PREFIX}{key} has invalid value {value:?}"),
    })
}

fn invalid(message: String) -> Result<()> {
    Err(Error::InvalidConfig { message })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn pool_size_reserves_headroom() {
        assert_eq!(pool_size_for(1), 1);
        assert_eq!(pool_size_for(4), 2);
        assert_eq!(pool_size_for(10), 8);
        assert_eq!(pool_size_for(16), 10);
    }

    #[test]
    fn defaults_validate() {
        PipelineConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"routing_mode": "driving", "retry_count": 3}"#)
                .expect("parse");
        assert_eq!(config.routing_mode, "driving");
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.batch_size_per_request, 100);
        assert_eq!(config.request_style, RequestStyle::Table);
    }

    #[test]
    fn env_values_override_fields() {
        let vars: HashMap<&str, &str> = [
            ("SERVICE_HOST_PORT", "osrm:5001"),
            ("WORKER_POOL_SIZE", "3"),
            ("REQUEST_STYLE", "route"),
            ("RETRY_BASE_DELAY_MS", "250"),
            ("PREFILTER_BATCH_SIZE", "64"),
        ]
        .into_iter()
        .collect();
        let mut config = PipelineConfig::default();
        config
            .apply_vars(|key| vars.get(key).map(|v| v.to_string()))
            .expect("apply");
        assert_eq!(config.service_host_port, "osrm:5001");
        assert_eq!(config.worker_pool_size, 3);
        assert_eq!(config.request_style, RequestStyle::Route);
        assert_eq!(config.retry_base_delay_ms, 250);
        assert_eq!(config.prefilter_batch_size, 64);
        assert_eq!(config.effective_batch_size(), 1);
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut config = PipelineConfig::default();
        let error = config
            .apply_vars(|key| (key == "RETRY_COUNT").then(|| "many".to_string()))
            .expect_err("not a number");
        assert!(error.to_string().contains("CITYACCESS_RETRY_COUNT"));
    }

    #[test]
    fn injection_in_routing_mode_is_rejected() {
        let config = PipelineConfig {
            routing_mode: "walking; DROP TABLE orig".to_string(),
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = PipelineConfig {
            worker_pool_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }
}
