use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Options handed to the engines by the embedding plugin. Schedule strings
/// are opaque cron expressions passed through to whatever scheduler the
/// deployment uses; the core never parses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginOptions {
    /// Base name for the plugin's collections, e.g. `analytics-sessions`.
    pub collection_slug: String,
    /// Maximum age of raw events/sessions in days before cleanup.
    pub max_age_in_days: i64,
    /// When false, the dashboard computes directly over raw records.
    pub enable_aggregations: bool,
    /// Serverless deployments trigger jobs through one-shot cron endpoints
    /// instead of in-process intervals.
    pub is_serverless: bool,
    /// Optional salt mixed into the IP hash. Must stay stable across
    /// invocations or sessions lose continuity.
    pub ip_hash_salt: Option<String>,
    pub aggregation_schedule: AggregationSchedule,
    pub aggregation_retention: AggregationRetention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationSchedule {
    pub hourly: String,
    pub daily: String,
    pub cleanup: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationRetention {
    /// Days to keep hourly rollups.
    pub hourly_days: i64,
    /// Days to keep daily rollups.
    pub daily_days: i64,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            collection_slug: "analytics".to_string(),
            max_age_in_days: 60,
            enable_aggregations: true,
            is_serverless: true,
            ip_hash_salt: None,
            aggregation_schedule: AggregationSchedule::default(),
            aggregation_retention: AggregationRetention::default(),
        }
    }
}

impl Default for AggregationSchedule {
    fn default() -> Self {
        Self {
            hourly: "0 * * * *".to_string(),
            daily: "0 2 * * *".to_string(),
            cleanup: "0 3 * * 0".to_string(),
        }
    }
}

impl Default for AggregationRetention {
    fn default() -> Self {
        Self {
            hourly_days: 7,
            daily_days: 90,
        }
    }
}

impl PluginOptions {
    /// There is no sensible degraded behavior without a collection prefix,
    /// so engines refuse to construct.
    pub fn validate(&self) -> Result<(), Error> {
        if self.collection_slug.trim().is_empty() {
            return Err(Error::Config("collection_slug must not be empty".into()));
        }
        Ok(())
    }

    pub fn sessions_collection(&self) -> String {
        format!("{}-sessions", self.collection_slug)
    }

    pub fn events_collection(&self) -> String {
        format!("{}-events", self.collection_slug)
    }

    pub fn hourly_aggregations_collection(&self) -> String {
        format!("{}-hourly-aggregations", self.collection_slug)
    }

    pub fn daily_aggregations_collection(&self) -> String {
        format!("{}-daily-aggregations", self.collection_slug)
    }
}
