//! City walking-accessibility library.
//!
//! This crate holds the whole pipeline behind the Health and Social Service
//! Accessibility (HSSA) score: straight-line prefiltering of origin ×
//! destination pairs, concurrent travel-duration acquisition from an
//! OSRM-compatible routing service, reachability resolution against service
//! contracts, scoring, and per-capita funding allocation. Higher-level
//! consumers (the CLI) should only depend on the functions exported here
//! instead of reimplementing behavior.
//!

#![deny(warnings)]

pub mod config;
pub mod db;
pub mod error;
pub mod funding;
pub mod geo;
pub mod import;
pub mod matrix;
pub mod pipeline;
pub mod prefilter;
pub mod reach;
pub mod score;

pub use config::{default_pool_size, PipelineConfig, RequestStyle};
pub use db::{
    CandidatePair, Contract, Destination, Identifier, Origin, OriginScore, Store, TravelDuration,
};
pub use error::{Error, Result};
pub use geo::{haversine, Coordinate, EARTH_RADIUS_METERS};
pub use import::{import_contracts, import_destinations, import_origins, ImportSummary};
pub use matrix::{
    run_fetch, DurationSource, FetchOptions, FetchSummary, OsrmClient, RequestUnit, RetryPolicy,
};
pub use pipeline::{run_scoring, ScoringSummary};
pub use prefilter::{run_prefilter, PrefilterSummary};
pub use reach::{resolve_reachable, ContractCatalog, ReachableService, ReachableSet};
pub use score::{distance_weight, normalize_budgets, normalize_scores, score_origin};
