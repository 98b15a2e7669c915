//! Dashboard computation: either merged from precomputed rollups or
//! computed directly over raw records. Both paths produce the same shape.

pub mod stats;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::buckets::{day_key, day_sequence};
use crate::config::PluginOptions;
use crate::counting::{sum_into, top_n, CountMap};
use crate::error::Error;
use crate::jobs::{instant_value, Clock};
use crate::model::{DailyAggregation, HourlyAggregation, TableParams};
use crate::store::{doc_id, find_docs, DocumentStore, Filter, FindOptions};

pub use stats::{DashboardStats, StatRecord};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChangeValue {
    pub change: f64,
    pub value: u64,
}

/// Live visitors have no trailing comparison window, so the row carries the
/// count alone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveCount {
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserShare {
    pub browser: String,
    pub fill: String,
    pub visitors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsShare {
    pub fill: String,
    pub os: String,
    pub visitors: u64,
}

/// Serialized as a single-key object, `{"<device>": n, "fill": "..."}`; the
/// stacked-bar layer reads the key as the series name.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceShare {
    pub device: String,
    pub visitors: u64,
    pub fill: String,
}

impl Serialize for DeviceShare {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.device, &self.visitors)?;
        map.serialize_entry("fill", &self.fill)?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPage {
    pub change: f64,
    pub path: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Referrer {
    pub count: u64,
    pub domain: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtmRow {
    pub campaign: String,
    pub medium: String,
    pub source: String,
    pub visitors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficPoint {
    pub day: String,
    pub views: u64,
    pub visitors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryViews {
    #[serde(rename = "countryCode")]
    pub country_code: String,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    pub bounce_rate: ChangeValue,
    pub browsers: Vec<BrowserShare>,
    pub devices: Vec<DeviceShare>,
    pub live_visitors: LiveCount,
    pub operating_systems: Vec<OsShare>,
    pub top_pages: Vec<TopPage>,
    pub top_referrers: Vec<Referrer>,
    pub unique_visitors: ChangeValue,
    pub utm_tracking: Vec<UtmRow>,
    pub views_and_visitors: Vec<TrafficPoint>,
    pub visitor_geography: Vec<CountryViews>,
    pub webpage_views: ChangeValue,
}

/// Tagged result: the UI renders a "no data" state on `error` instead of
/// crashing, so store failures never propagate past this boundary.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardResponse {
    pub data: Option<DashboardData>,
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub(crate) fn fill_token(position: usize) -> String {
    format!("hsl(var(--chart-{}))", position + 1)
}

pub struct DashboardEngine<S, Tz: TimeZone> {
    store: Arc<S>,
    options: PluginOptions,
    tz: Tz,
}

impl<S, Tz> DashboardEngine<S, Tz>
where
    S: DocumentStore,
    Tz: Clock + Send + Sync,
    Tz::Offset: Display + Send,
{
    pub fn new(store: Arc<S>, options: PluginOptions, tz: Tz) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self { store, options, tz })
    }

    /// The single dashboard entry point. Uses rollups when aggregations are
    /// enabled, raw records otherwise.
    pub async fn compute_dashboard_data(&self, params: &TableParams) -> DashboardResponse {
        let now = self.tz.current();
        let result = if self.options.enable_aggregations {
            self.merged(params, &now).await
        } else {
            self.raw(params, &now).await
        };
        match result {
            Ok(data) => DashboardResponse {
                data: Some(data),
                error: false,
                message: None,
            },
            Err(err) => {
                error!(error = %err, "dashboard computation failed");
                DashboardResponse {
                    data: None,
                    error: true,
                    message: Some(err.to_string()),
                }
            }
        }
    }

    /// Rollup path: daily documents for completed days, hourly documents for
    /// today (whose daily rollup cannot exist yet), hourly documents again
    /// as a degraded per-day fallback where a daily rollup is missing.
    async fn merged(
        &self,
        params: &TableParams,
        now: &DateTime<Tz>,
    ) -> Result<DashboardData, Error> {
        let (from, _) = params.resolve(now);
        let start = from.unwrap_or_else(|| now.clone() - Duration::days(7));
        let start_key = day_key(&start);
        let today_key = day_key(now);

        let range_filter = Filter::new()
            .greater_than_equal("date", start_key.as_str())
            .less_than_equal("date", today_key.as_str());
        let dailies: Vec<DailyAggregation> = find_docs(
            self.store.as_ref(),
            &self.options.daily_aggregations_collection(),
            &range_filter,
            &FindOptions::all(),
        )
        .await?;
        let hourlies: Vec<HourlyAggregation> = find_docs(
            self.store.as_ref(),
            &self.options.hourly_aggregations_collection(),
            &range_filter,
            &FindOptions::all(),
        )
        .await?;
        debug!(
            dailies = dailies.len(),
            hourlies = hourlies.len(),
            %start_key,
            %today_key,
            "rollups fetched"
        );

        let daily_by_date: HashMap<&str, &DailyAggregation> =
            dailies.iter().map(|d| (d.date.as_str(), d)).collect();
        let mut hourly_by_date: HashMap<&str, Vec<&HourlyAggregation>> = HashMap::new();
        for hourly in &hourlies {
            hourly_by_date.entry(hourly.date.as_str()).or_default().push(hourly);
        }

        let mut totals = MergedTotals::default();
        for day in day_sequence(start.date_naive(), now.date_naive()) {
            let key = day.format("%Y-%m-%d").to_string();
            if key == today_key {
                continue;
            }
            match daily_by_date.get(key.as_str()) {
                Some(daily) => totals.fold_daily(key, daily),
                None => {
                    let hours = hourly_by_date.get(key.as_str()).map_or(&[][..], Vec::as_slice);
                    totals.fold_hourly_day(key, hours);
                }
            }
        }
        let today_hours = hourly_by_date.get(today_key.as_str()).map_or(&[][..], Vec::as_slice);
        totals.fold_hourly_day(today_key, today_hours);

        Ok(totals.into_dashboard_data())
    }

    /// Raw path: join events to their sessions and hand the enriched records
    /// to [`DashboardStats`].
    async fn raw(&self, params: &TableParams, now: &DateTime<Tz>) -> Result<DashboardData, Error> {
        let (from, change) = params.resolve(now);

        let mut filter = Filter::new();
        if let Some(from) = &from {
            filter = filter.greater_than_equal("createdAt", instant_value(from));
        }
        let events = self
            .store
            .find(&self.options.events_collection(), &filter, &FindOptions::all())
            .await?
            .docs;

        let range_events = match (&from, &change) {
            (Some(from), Some(change)) => {
                let filter = Filter::new()
                    .greater_than_equal("createdAt", instant_value(change))
                    .less_than("createdAt", instant_value(from));
                self.store
                    .find(&self.options.events_collection(), &filter, &FindOptions::all())
                    .await?
                    .docs
            }
            _ => Vec::new(),
        };

        let sessions = self
            .store
            .find(&self.options.sessions_collection(), &Filter::new(), &FindOptions::all())
            .await?
            .docs;
        let sessions_by_id: HashMap<&str, &Value> =
            sessions.iter().filter_map(|s| doc_id(s).map(|id| (id, s))).collect();

        let data: Vec<StatRecord> = events
            .iter()
            .map(|e| stat_record(e, &sessions_by_id))
            .collect();
        let range_data: Vec<StatRecord> = range_events
            .iter()
            .map(|e| stat_record(e, &sessions_by_id))
            .collect();
        debug!(records = data.len(), comparison = range_data.len(), "raw records joined");

        Ok(DashboardStats::new(&data, &range_data, params.date_range, now.clone()).parse())
    }
}

#[derive(Default)]
struct MergedTotals {
    traffic: Vec<TrafficPoint>,
    top_pages: CountMap,
    browsers: CountMap,
    devices: CountMap,
    operating_systems: CountMap,
    countries: CountMap,
    utm_sources: CountMap,
    total_views: u64,
    total_visitors: u64,
}

impl MergedTotals {
    fn fold_daily(&mut self, day: String, daily: &DailyAggregation) {
        self.traffic.push(TrafficPoint {
            day,
            views: daily.total_events,
            visitors: daily.unique_visitors,
        });
        sum_into(&mut self.browsers, &daily.browsers);
        sum_into(&mut self.devices, &daily.devices);
        sum_into(&mut self.operating_systems, &daily.operating_systems);
        sum_into(&mut self.countries, &daily.countries);
        for page in &daily.top_pages {
            self.top_pages.add(&page.path, page.views);
        }
        for utm in &daily.utm_sources {
            self.utm_sources.add(&utm.source, utm.count);
        }
        self.total_views += daily.total_events;
        self.total_visitors += daily.unique_visitors;
    }

    /// Sums a day's hourly rollups. Visitors distinct within each hour may
    /// repeat across hours; the summed figure is the accepted upper bound
    /// in this degraded path.
    fn fold_hourly_day(&mut self, day: String, hours: &[&HourlyAggregation]) {
        let mut views = 0;
        let mut visitors = 0;
        for hourly in hours {
            views += hourly.total_events;
            visitors += hourly.unique_visitors;
            sum_into(&mut self.browsers, &hourly.browsers);
            sum_into(&mut self.devices, &hourly.devices);
            sum_into(&mut self.operating_systems, &hourly.operating_systems);
            sum_into(&mut self.countries, &hourly.countries);
        }
        self.traffic.push(TrafficPoint { day, views, visitors });
        self.total_views += views;
        self.total_visitors += visitors;
    }

    fn into_dashboard_data(self) -> DashboardData {
        let top_pages = top_n(&self.top_pages, 10)
            .into_iter()
            .map(|(path, value)| TopPage {
                change: 0.0,
                path,
                value,
            })
            .collect();
        // Daily rollups only keep source granularity; campaign and medium
        // are unknowable here.
        let utm_tracking = top_n(&self.utm_sources, 10)
            .into_iter()
            .map(|(source, visitors)| UtmRow {
                campaign: String::new(),
                medium: String::new(),
                source,
                visitors,
            })
            .collect();

        DashboardData {
            bounce_rate: ChangeValue { change: 0.0, value: 0 },
            browsers: self
                .browsers
                .iter()
                .enumerate()
                .map(|(i, (browser, visitors))| BrowserShare {
                    browser: browser.to_lowercase(),
                    fill: fill_token(i),
                    visitors,
                })
                .collect(),
            devices: self
                .devices
                .iter()
                .enumerate()
                .map(|(i, (device, visitors))| DeviceShare {
                    device: device.to_lowercase(),
                    visitors,
                    fill: fill_token(i),
                })
                .collect(),
            live_visitors: LiveCount { value: 0 },
            operating_systems: self
                .operating_systems
                .iter()
                .enumerate()
                .map(|(i, (os, visitors))| OsShare {
                    fill: fill_token(i),
                    os: os.to_lowercase(),
                    visitors,
                })
                .collect(),
            top_pages,
            // Not preserved by any rollup.
            top_referrers: Vec::new(),
            unique_visitors: ChangeValue {
                change: 0.0,
                value: self.total_visitors,
            },
            utm_tracking,
            views_and_visitors: self.traffic,
            visitor_geography: self
                .countries
                .iter()
                .map(|(country_code, views)| CountryViews {
                    country_code: country_code.to_string(),
                    views,
                })
                .collect(),
            webpage_views: ChangeValue {
                change: 0.0,
                value: self.total_views,
            },
        }
    }
}

fn stat_record(event: &Value, sessions_by_id: &HashMap<&str, &Value>) -> StatRecord {
    let session = event
        .get("session_id")
        .and_then(Value::as_str)
        .and_then(|id| sessions_by_id.get(id).copied());
    let session_str = |field: &str| {
        session
            .and_then(|s| s.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let event_str = |field: &str| event.get(field).and_then(Value::as_str).map(str::to_string);
    StatRecord {
        created_at: event
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc)),
        ip_hash: session_str("ip_hash"),
        path: event_str("path"),
        referrer_url: event_str("referrer_url"),
        browser: session_str("browser"),
        device_type: session_str("device_type"),
        os: session_str("os"),
        country: session_str("country"),
        utm: session
            .and_then(|s| s.get("utm"))
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
    }
}
