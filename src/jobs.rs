//! Scheduled aggregation and retention jobs.
//!
//! Each job recomputes its whole bucket from the raw records and upserts by
//! natural key (`date` or `date`+`hour`), so reruns and overlapping triggers
//! converge on the same document instead of double counting.

use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::buckets::{day_key, day_window, hour_window};
use crate::config::PluginOptions;
use crate::counting::{top_n, CountMap};
use crate::error::Error;
use crate::model::{DailyAggregation, HourlyAggregation, PageViews, UtmSourceCount};
use crate::store::{doc_id, DocumentStore, Filter, FindOptions, StoreError};

/// Zones the engines can read the current wall clock in.
pub trait Clock: TimeZone {
    fn current(&self) -> DateTime<Self>;
}

impl Clock for Utc {
    fn current(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Clock for Local {
    fn current(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// One local calendar hour, the hourly job's natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourPeriod {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourPeriod {
    pub fn of<Tz: TimeZone>(t: &DateTime<Tz>) -> Self {
        Self {
            date: t.date_naive(),
            hour: t.hour(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CleanupOutcome {
    pub hourly_deleted: u64,
    pub daily_deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionOutcome {
    pub events_deleted: u64,
    pub sessions_deleted: u64,
}

pub struct JobEngine<S, Tz: TimeZone> {
    store: Arc<S>,
    options: PluginOptions,
    tz: Tz,
}

impl<S, Tz> JobEngine<S, Tz>
where
    S: DocumentStore,
    Tz: Clock + Send + Sync,
    Tz::Offset: Display + Send,
{
    pub fn new(store: Arc<S>, options: PluginOptions, tz: Tz) -> Result<Self, Error> {
        options.validate()?;
        Ok(Self { store, options, tz })
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }

    /// Rolls one hour of raw records into its `(date, hour)` document.
    /// Defaults to the hour now in progress.
    pub async fn run_hourly_aggregation(
        &self,
        period: Option<HourPeriod>,
    ) -> Result<HourlyAggregation, Error> {
        let period = period.unwrap_or_else(|| HourPeriod::of(&self.tz.current()));
        let (start, end) = hour_window(&self.tz, period.date, period.hour).ok_or_else(|| {
            Error::Config(format!(
                "no such local hour: {} {:02}:00",
                period.date, period.hour
            ))
        })?;

        let sessions = self
            .fetch_window(&self.options.sessions_collection(), "session_start", &start, &end)
            .await?;
        let events = self
            .fetch_window(&self.options.events_collection(), "timestamp", &start, &end)
            .await?;

        let aggregation = HourlyAggregation {
            id: None,
            date: period.date.format("%Y-%m-%d").to_string(),
            hour: period.hour,
            total_sessions: sessions.len() as u64,
            total_events: events.len() as u64,
            unique_visitors: unique_visitors(&sessions),
            browsers: count_field(&sessions, "browser"),
            devices: count_field(&sessions, "device_type"),
            operating_systems: count_field(&sessions, "os"),
            countries: count_field(&sessions, "country"),
        };

        let key = Filter::new()
            .equals("date", aggregation.date.as_str())
            .equals("hour", aggregation.hour);
        self.upsert(
            &self.options.hourly_aggregations_collection(),
            &key,
            serde_json::to_value(&aggregation).map_err(StoreError::from)?,
        )
        .await?;
        info!(
            date = %aggregation.date,
            hour = aggregation.hour,
            sessions = aggregation.total_sessions,
            events = aggregation.total_events,
            "hourly aggregation complete"
        );
        Ok(aggregation)
    }

    /// Rolls one calendar day into its `date` document, including the ranked
    /// top pages and UTM source counts the hourly rollup skips. Defaults to
    /// the current local day.
    pub async fn run_daily_aggregation(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<DailyAggregation, Error> {
        let date = date.unwrap_or_else(|| self.tz.current().date_naive());
        let (start, end) = day_window(&self.tz, date)
            .ok_or_else(|| Error::Config(format!("no local midnight on {date}")))?;

        let sessions = self
            .fetch_window(&self.options.sessions_collection(), "session_start", &start, &end)
            .await?;
        let events = self
            .fetch_window(&self.options.events_collection(), "timestamp", &start, &end)
            .await?;

        let mut pages = CountMap::new();
        for event in &events {
            if let Some(path) = field_str(event, "path").filter(|p| !p.is_empty()) {
                pages.increment(&path);
            }
        }
        let top_pages = top_n(&pages, 10)
            .into_iter()
            .map(|(path, views)| PageViews { path, views })
            .collect();

        let mut sources = CountMap::new();
        for session in &sessions {
            if let Some(source) = field_str(session, "utm.source").filter(|s| !s.is_empty()) {
                sources.increment(&source);
            }
        }
        let utm_sources = sources
            .iter()
            .map(|(source, count)| UtmSourceCount {
                source: source.to_string(),
                count,
            })
            .collect();

        let aggregation = DailyAggregation {
            id: None,
            date: date.format("%Y-%m-%d").to_string(),
            total_sessions: sessions.len() as u64,
            total_events: events.len() as u64,
            unique_visitors: unique_visitors(&sessions),
            browsers: count_field(&sessions, "browser"),
            devices: count_field(&sessions, "device_type"),
            operating_systems: count_field(&sessions, "os"),
            countries: count_field(&sessions, "country"),
            top_pages,
            utm_sources,
        };

        let key = Filter::new().equals("date", aggregation.date.as_str());
        self.upsert(
            &self.options.daily_aggregations_collection(),
            &key,
            serde_json::to_value(&aggregation).map_err(StoreError::from)?,
        )
        .await?;
        info!(
            date = %aggregation.date,
            sessions = aggregation.total_sessions,
            events = aggregation.total_events,
            "daily aggregation complete"
        );
        Ok(aggregation)
    }

    /// Drops rollup documents older than their configured retention,
    /// comparing on the `date` key string.
    pub async fn cleanup_old_aggregations(&self) -> Result<CleanupOutcome, Error> {
        let now = self.tz.current();
        let retention = &self.options.aggregation_retention;
        let hourly_cutoff = day_key(&(now.clone() - chrono::Duration::days(retention.hourly_days)));
        let daily_cutoff = day_key(&(now - chrono::Duration::days(retention.daily_days)));

        let hourly_deleted = self
            .store
            .delete(
                &self.options.hourly_aggregations_collection(),
                &Filter::new().less_than("date", hourly_cutoff.as_str()),
            )
            .await?;
        let daily_deleted = self
            .store
            .delete(
                &self.options.daily_aggregations_collection(),
                &Filter::new().less_than("date", daily_cutoff.as_str()),
            )
            .await?;
        info!(hourly_deleted, daily_deleted, "aggregation cleanup complete");
        Ok(CleanupOutcome {
            hourly_deleted,
            daily_deleted,
        })
    }

    /// Drops raw events and sessions past `max_age_in_days`. The cutoff is
    /// floored to local midnight so the boundary day is kept whole.
    pub async fn cleanup_old_records(&self) -> Result<RetentionOutcome, Error> {
        let now = self.tz.current();
        let cutoff_day = (now - chrono::Duration::days(self.options.max_age_in_days)).date_naive();
        let (cutoff, _) = day_window(&self.tz, cutoff_day)
            .ok_or_else(|| Error::Config(format!("no local midnight on {cutoff_day}")))?;
        let cutoff = instant_value(&cutoff);

        let events_deleted = self
            .store
            .delete(
                &self.options.events_collection(),
                &Filter::new().less_than("timestamp", cutoff.clone()),
            )
            .await?;
        let sessions_deleted = self
            .store
            .delete(
                &self.options.sessions_collection(),
                &Filter::new().less_than("session_start", cutoff),
            )
            .await?;
        info!(events_deleted, sessions_deleted, "history cleanup complete");
        Ok(RetentionOutcome {
            events_deleted,
            sessions_deleted,
        })
    }

    async fn fetch_window(
        &self,
        collection: &str,
        field: &str,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> Result<Vec<Value>, Error> {
        let filter = Filter::new()
            .greater_than_equal(field, instant_value(start))
            .less_than(field, instant_value(end));
        let result = self.store.find(collection, &filter, &FindOptions::all()).await?;
        debug!(collection, field, total = result.total_docs, "window fetched");
        Ok(result.docs)
    }

    async fn upsert(&self, collection: &str, key: &Filter, data: Value) -> Result<(), Error> {
        let existing = self
            .store
            .find(collection, key, &FindOptions::limit(1))
            .await?;
        match existing.docs.first().and_then(doc_id) {
            Some(id) => {
                self.store.update(collection, id, data).await?;
            }
            None => {
                self.store.create(collection, data).await?;
            }
        }
        Ok(())
    }
}

/// Instants cross the store boundary as UTC RFC 3339 strings.
pub(crate) fn instant_value<Tz: TimeZone>(t: &DateTime<Tz>) -> String {
    t.with_timezone(&Utc).to_rfc3339()
}

fn field_str(doc: &Value, path: &str) -> Option<String> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    current.as_str().map(str::to_string)
}

/// Distribution of a session field, raw documents tolerated; a missing or
/// non-string value counts under `"unknown"`.
fn count_field(docs: &[Value], field: &str) -> CountMap {
    let mut map = CountMap::new();
    for doc in docs {
        let key = field_str(doc, field).unwrap_or_else(|| "unknown".to_string());
        map.increment(&key);
    }
    map
}

fn unique_visitors(sessions: &[Value]) -> u64 {
    sessions
        .iter()
        .filter_map(|s| field_str(s, "ip_hash"))
        .collect::<HashSet<_>>()
        .len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::find_docs;
    use serde_json::json;

    // Logs from the job runs show up under RUST_LOG; repeated init calls
    // are no-ops.
    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(false)
            .try_init();
    }

    fn engine(store: Arc<MemoryStore>) -> JobEngine<MemoryStore, Utc> {
        init_logging();
        JobEngine::new(store, PluginOptions::default(), Utc).unwrap()
    }

    async fn seed_session(store: &MemoryStore, ip: &str, start: &str, browser: &str) {
        store
            .create(
                "analytics-sessions",
                json!({
                    "ip_hash": ip,
                    "domain": "example.com",
                    "session_start": start,
                    "browser": browser,
                    "device_type": "desktop",
                    "os": "macOS",
                    "country": "PL",
                }),
            )
            .await
            .unwrap();
    }

    async fn seed_event(store: &MemoryStore, path: &str, ts: &str) {
        store
            .create(
                "analytics-events",
                json!({
                    "session_id": "s",
                    "event_type": "page_view",
                    "path": path,
                    "timestamp": ts,
                }),
            )
            .await
            .unwrap();
    }

    fn period() -> HourPeriod {
        HourPeriod {
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            hour: 14,
        }
    }

    #[tokio::test]
    async fn hourly_rollup_counts_only_its_window() {
        let store = Arc::new(MemoryStore::new());
        seed_session(&store, "v1", "2024-01-15T14:05:00Z", "Chrome").await;
        seed_session(&store, "v1", "2024-01-15T14:40:00Z", "Chrome").await;
        seed_session(&store, "v2", "2024-01-15T14:59:59Z", "Firefox").await;
        seed_session(&store, "v3", "2024-01-15T15:00:00Z", "Safari").await;
        seed_event(&store, "/home", "2024-01-15T14:10:00Z").await;
        seed_event(&store, "/about", "2024-01-15T13:59:59Z").await;

        let agg = engine(store).run_hourly_aggregation(Some(period())).await.unwrap();
        assert_eq!(agg.date, "2024-01-15");
        assert_eq!(agg.hour, 14);
        assert_eq!(agg.total_sessions, 3);
        assert_eq!(agg.total_events, 1);
        assert_eq!(agg.unique_visitors, 2);
        assert_eq!(agg.browsers.get("Chrome"), 2);
        assert_eq!(agg.browsers.get("Firefox"), 1);
        assert_eq!(agg.browsers.get("Safari"), 0);
    }

    #[tokio::test]
    async fn hourly_rollup_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        seed_session(&store, "v1", "2024-01-15T14:05:00Z", "Chrome").await;
        let engine = engine(store.clone());

        let first = engine.run_hourly_aggregation(Some(period())).await.unwrap();
        let second = engine.run_hourly_aggregation(Some(period())).await.unwrap();

        let docs: Vec<HourlyAggregation> = find_docs(
            store.as_ref(),
            "analytics-hourly-aggregations",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(first.total_sessions, second.total_sessions);
        assert_eq!(first.browsers, second.browsers);
    }

    #[tokio::test]
    async fn missing_fields_count_as_unknown() {
        let store = Arc::new(MemoryStore::new());
        store
            .create(
                "analytics-sessions",
                json!({"ip_hash": "v1", "session_start": "2024-01-15T14:05:00Z"}),
            )
            .await
            .unwrap();
        let agg = engine(store).run_hourly_aggregation(Some(period())).await.unwrap();
        assert_eq!(agg.browsers.get("unknown"), 1);
        assert_eq!(agg.countries.get("unknown"), 1);
    }

    #[tokio::test]
    async fn daily_rollup_ranks_pages_and_utm_sources() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..12 {
            seed_event(&store, &format!("/p{i}"), "2024-01-15T10:00:00Z").await;
        }
        seed_event(&store, "/p0", "2024-01-15T11:00:00Z").await;
        store
            .create(
                "analytics-sessions",
                json!({
                    "ip_hash": "v1",
                    "session_start": "2024-01-15T10:00:00Z",
                    "utm": {"source": "twitter"},
                }),
            )
            .await
            .unwrap();
        store
            .create(
                "analytics-sessions",
                json!({
                    "ip_hash": "v2",
                    "session_start": "2024-01-15T11:00:00Z",
                    "utm": {"source": "twitter"},
                }),
            )
            .await
            .unwrap();

        let agg = engine(store)
            .run_daily_aggregation(Some(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
            .await
            .unwrap();
        assert_eq!(agg.top_pages.len(), 10);
        assert_eq!(agg.top_pages[0].path, "/p0");
        assert_eq!(agg.top_pages[0].views, 2);
        assert_eq!(
            agg.utm_sources,
            vec![UtmSourceCount {
                source: "twitter".to_string(),
                count: 2
            }]
        );
        assert_eq!(agg.total_events, 13);
    }

    #[tokio::test]
    async fn daily_rollup_upserts_by_date() {
        let store = Arc::new(MemoryStore::new());
        seed_event(&store, "/a", "2024-01-15T10:00:00Z").await;
        let engine = engine(store.clone());
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        engine.run_daily_aggregation(Some(date)).await.unwrap();
        seed_event(&store, "/b", "2024-01-15T12:00:00Z").await;
        let agg = engine.run_daily_aggregation(Some(date)).await.unwrap();

        let docs: Vec<DailyAggregation> = find_docs(
            store.as_ref(),
            "analytics-daily-aggregations",
            &Filter::new(),
            &FindOptions::all(),
        )
        .await
        .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].total_events, 2);
        assert_eq!(agg.total_events, 2);
    }

    #[tokio::test]
    async fn aggregation_cleanup_respects_retention_windows() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let recent = day_key(&(now - chrono::Duration::days(1)));
        let stale_hourly = day_key(&(now - chrono::Duration::days(10)));
        let stale_daily = day_key(&(now - chrono::Duration::days(120)));

        for date in [&recent, &stale_hourly] {
            store
                .create("analytics-hourly-aggregations", json!({"date": date, "hour": 1}))
                .await
                .unwrap();
        }
        for date in [&recent, &stale_hourly, &stale_daily] {
            store
                .create("analytics-daily-aggregations", json!({"date": date}))
                .await
                .unwrap();
        }

        let outcome = engine(store.clone()).cleanup_old_aggregations().await.unwrap();
        assert_eq!(outcome.hourly_deleted, 1);
        assert_eq!(outcome.daily_deleted, 1);
    }

    #[tokio::test]
    async fn history_cleanup_floors_the_cutoff_to_midnight() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let cutoff_day = (now - chrono::Duration::days(60)).date_naive();
        let on_cutoff_day = format!("{cutoff_day}T00:00:01+00:00");
        let before_cutoff = format!(
            "{}T23:59:59+00:00",
            cutoff_day.pred_opt().unwrap()
        );

        seed_event(&store, "/keep", &on_cutoff_day).await;
        seed_event(&store, "/drop", &before_cutoff).await;
        seed_session(&store, "v1", &on_cutoff_day, "Chrome").await;
        seed_session(&store, "v2", &before_cutoff, "Chrome").await;

        let outcome = engine(store.clone()).cleanup_old_records().await.unwrap();
        assert_eq!(outcome.events_deleted, 1);
        assert_eq!(outcome.sessions_deleted, 1);

        let events = store
            .find("analytics-events", &Filter::new(), &FindOptions::all())
            .await
            .unwrap();
        assert_eq!(events.total_docs, 1);
    }
}
