//! Privacy-first web analytics engine: capture page hits into sessions and
//! events, roll them up into hourly and daily aggregations, and serve
//! dashboard statistics either from those rollups or straight from the raw
//! records.
//!
//! The crate is storage-agnostic. Everything persists through the
//! [`store::DocumentStore`] trait; [`store::memory::MemoryStore`] backs the
//! tests and small deployments, while embedders plug in their own database.

pub mod agent;
pub mod buckets;
pub mod capture;
pub mod config;
pub mod counting;
pub mod dashboard;
pub mod dev_tools;
pub mod error;
pub mod jobs;
pub mod model;
pub mod schedule;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod utm;
pub mod widgets;

pub use capture::{CaptureEngine, CaptureOutcome, CaptureRequest, CaptureSignal, GeoResolver};
pub use config::PluginOptions;
pub use dashboard::{DashboardData, DashboardEngine, DashboardResponse};
pub use error::Error;
pub use jobs::{Clock, JobEngine};
pub use model::{DateRange, TableParams};
pub use schedule::{analytics_jobs, JobRegistry};
pub use store::DocumentStore;
pub use tracker::{Tracker, TrackerAction};
