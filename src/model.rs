//! Persistent document shapes and the dashboard query contract.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::buckets::days_ago;
use crate::counting::CountMap;
use crate::utm::Utm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

/// One browsing session from one visitor on one domain. At most one active
/// (unterminated) session exists per `(ip_hash, domain)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ip_hash: String,
    pub domain: String,
    pub session_start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_end: Option<DateTime<Utc>>,
    /// Seconds, set when the session ends.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utm: Option<Utm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    Click,
    FormSubmit,
    Custom,
}

/// One tracked interaction. Immutable once created; removed only by
/// retention cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub event_type: EventType,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_params: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_url: Option<String>,
    /// Free-form payload for custom events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<Value>,
    /// Store-assigned creation instant.
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Ranked page row inside a daily rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageViews {
    pub path: String,
    pub views: u64,
}

/// Source-level UTM row inside a daily rollup. Campaign/medium/term/content
/// granularity is intentionally discarded at this level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmSourceCount {
    pub source: String,
    pub count: u64,
}

/// One rollup per `(date, hour)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyAggregation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `YYYY-MM-DD` local calendar day.
    pub date: String,
    /// 0-23 local hour of day.
    pub hour: u32,
    pub total_sessions: u64,
    pub total_events: u64,
    pub unique_visitors: u64,
    #[serde(default)]
    pub browsers: CountMap,
    #[serde(default)]
    pub devices: CountMap,
    #[serde(default)]
    pub operating_systems: CountMap,
    #[serde(default)]
    pub countries: CountMap,
}

/// One rollup per calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub date: String,
    pub total_sessions: u64,
    pub total_events: u64,
    pub unique_visitors: u64,
    #[serde(default)]
    pub browsers: CountMap,
    #[serde(default)]
    pub devices: CountMap,
    #[serde(default)]
    pub operating_systems: CountMap,
    #[serde(default)]
    pub countries: CountMap,
    #[serde(default)]
    pub top_pages: Vec<PageViews>,
    #[serde(default)]
    pub utm_sources: Vec<UtmSourceCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateRange {
    AllTime,
    #[serde(rename = "last_1_day")]
    Last1Day,
    #[serde(rename = "last_3_days")]
    Last3Days,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_60_days")]
    Last60Days,
}

/// Query contract for the dashboard and the widget tables. `date_change`
/// marks the start of the comparison window used for percentage change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_change: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl TableParams {
    /// Resolves the symbolic range into concrete `(date_from, date_change)`
    /// bounds. The comparison window starts twice the range back, so e.g.
    /// `last_7_days` compares against 7-14 days ago. `all_time` has no
    /// bounds; anything unspecified defaults to the 7/14-day pair.
    pub fn resolve<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> (Option<DateTime<Tz>>, Option<DateTime<Tz>>) {
        if let (Some(from), Some(change)) = (&self.date_from, &self.date_change) {
            return (
                Some(now.timezone().from_utc_datetime(&from.naive_utc())),
                Some(now.timezone().from_utc_datetime(&change.naive_utc())),
            );
        }
        let days_back = |days: i64| Some(days_ago(now, days));
        match self.date_range {
            Some(DateRange::AllTime) => (None, None),
            Some(DateRange::Last1Day) => (days_back(1), days_back(2)),
            Some(DateRange::Last3Days) => (days_back(3), days_back(6)),
            Some(DateRange::Last7Days) => (days_back(7), days_back(14)),
            Some(DateRange::Last30Days) => (days_back(30), days_back(60)),
            Some(DateRange::Last60Days) => (days_back(60), days_back(120)),
            None => (days_back(7), days_back(14)),
        }
    }
}
