//! Raw-record statistics: the dashboard computed without rollups.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use url::Url;

use super::{
    fill_token, BrowserShare, ChangeValue, CountryViews, DashboardData, DeviceShare, LiveCount,
    OsShare, Referrer, TopPage, TrafficPoint, UtmRow,
};
use crate::buckets::{day_key, hour_key};
use crate::counting::{top_n, CountMap};
use crate::model::DateRange;
use crate::stats::percentage_change;
use crate::utm::Utm;

/// One event enriched with its owning session's dimensions. Every field is
/// optional: raw documents from loosely-typed deployments may miss any of
/// them, and a missing field drops the record from that one metric only.
#[derive(Debug, Clone, Default)]
pub struct StatRecord {
    pub created_at: Option<DateTime<Utc>>,
    pub ip_hash: Option<String>,
    pub path: Option<String>,
    pub referrer_url: Option<String>,
    pub browser: Option<String>,
    pub device_type: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    /// Present only when the owning session carried UTM parameters.
    pub utm: Option<Utm>,
}

/// Computes all twelve dashboard metrics over a current dataset and a
/// trailing comparison dataset.
pub struct DashboardStats<'a, Tz: TimeZone> {
    data: &'a [StatRecord],
    range_data: &'a [StatRecord],
    date_range: Option<DateRange>,
    now: DateTime<Tz>,
}

impl<'a, Tz> DashboardStats<'a, Tz>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    pub fn new(
        data: &'a [StatRecord],
        range_data: &'a [StatRecord],
        date_range: Option<DateRange>,
        now: DateTime<Tz>,
    ) -> Self {
        Self {
            data,
            range_data,
            date_range,
            now,
        }
    }

    pub fn parse(&self) -> DashboardData {
        DashboardData {
            bounce_rate: self.bounce_rate(),
            browsers: self.browsers(),
            devices: self.devices(),
            live_visitors: self.live_visitors(),
            operating_systems: self.operating_systems(),
            top_pages: self.top_pages(),
            top_referrers: self.top_referrers(),
            unique_visitors: self.unique_visitors(),
            utm_tracking: self.utm_tracking(),
            views_and_visitors: self.views_and_visitors(),
            visitor_geography: self.visitor_geography(),
            webpage_views: self.webpage_views(),
        }
    }

    /// Contractually zero. The capture path records no exit signal precise
    /// enough to compute it, so the slot stays a stub rather than a guess.
    pub fn bounce_rate(&self) -> ChangeValue {
        ChangeValue {
            change: 0.0,
            value: 0,
        }
    }

    /// Ascending by count: the radial chart renders smallest-first.
    pub fn browsers(&self) -> Vec<BrowserShare> {
        let mut entries = count_present(self.data, |r| r.browser.as_deref()).entries();
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (browser, visitors))| BrowserShare {
                browser,
                fill: fill_token(i),
                visitors,
            })
            .collect()
    }

    /// One single-key object per device type; the stacked-bar layer reads
    /// the key as the series name.
    pub fn devices(&self) -> Vec<DeviceShare> {
        count_present(self.data, |r| r.device_type.as_deref())
            .iter()
            .enumerate()
            .map(|(i, (device, visitors))| DeviceShare {
                device: device.to_string(),
                visitors,
                fill: fill_token(i),
            })
            .collect()
    }

    /// Distinct visitors seen in the last 30 minutes.
    pub fn live_visitors(&self) -> LiveCount {
        let limit = (self.now.clone() - Duration::minutes(30)).with_timezone(&Utc);
        let mut visitors = HashSet::new();
        for record in self.data {
            if let (Some(created_at), Some(ip_hash)) = (&record.created_at, &record.ip_hash) {
                if *created_at > limit {
                    visitors.insert(ip_hash.as_str());
                }
            }
        }
        LiveCount {
            value: visitors.len() as u64,
        }
    }

    pub fn operating_systems(&self) -> Vec<OsShare> {
        let mut entries = count_present(self.data, |r| r.os.as_deref()).entries();
        entries.sort_by(|a, b| a.1.cmp(&b.1));
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (os, visitors))| OsShare {
                fill: fill_token(i),
                os,
                visitors,
            })
            .collect()
    }

    /// Descending, top 10, first-seen order on ties. `change` is always 0
    /// here: per-page comparison data is not collected.
    pub fn top_pages(&self) -> Vec<TopPage> {
        let mut map = CountMap::new();
        for record in self.data {
            if let Some(path) = &record.path {
                map.increment(path);
            }
        }
        top_n(&map, 10)
            .into_iter()
            .map(|(path, value)| TopPage {
                change: 0.0,
                path,
                value,
            })
            .collect()
    }

    /// Grouped by the raw referrer string; the parsed `scheme://host` domain
    /// rides along, empty when the referrer does not parse as a URL.
    pub fn top_referrers(&self) -> Vec<Referrer> {
        let mut map = CountMap::new();
        for record in self.data {
            if let Some(referrer) = &record.referrer_url {
                map.increment(referrer);
            }
        }
        let mut entries = map.entries();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
            .into_iter()
            .take(5)
            .map(|(label, count)| Referrer {
                count,
                domain: referrer_domain(&label),
                label,
            })
            .collect()
    }

    pub fn unique_visitors(&self) -> ChangeValue {
        let current: HashSet<&str> = self
            .data
            .iter()
            .filter_map(|r| r.ip_hash.as_deref())
            .collect();
        let baseline: HashSet<&str> = self
            .range_data
            .iter()
            .filter_map(|r| r.ip_hash.as_deref())
            .collect();
        ChangeValue {
            change: percentage_change(baseline.len() as f64, current.len() as f64),
            value: current.len() as u64,
        }
    }

    /// One row per distinct UTM combination, counted only for records whose
    /// session carried a non-empty campaign.
    pub fn utm_tracking(&self) -> Vec<UtmRow> {
        type Key = (Option<String>, Option<String>, Option<String>, Option<String>, Option<String>);
        let mut order: Vec<Key> = Vec::new();
        let mut counts: HashMap<Key, u64> = HashMap::new();
        for record in self.data {
            let Some(utm) = &record.utm else { continue };
            if utm.campaign.as_deref().unwrap_or("").is_empty() {
                continue;
            }
            let key: Key = (
                utm.campaign.clone(),
                utm.medium.clone(),
                utm.source.clone(),
                utm.term.clone(),
                utm.content.clone(),
            );
            match counts.get_mut(&key) {
                Some(count) => *count += 1,
                None => {
                    counts.insert(key.clone(), 1);
                    order.push(key);
                }
            }
        }
        order
            .into_iter()
            .map(|key| {
                let visitors = counts[&key];
                let (campaign, medium, source, _, _) = key;
                UtmRow {
                    campaign: campaign.unwrap_or_default(),
                    medium: medium.unwrap_or_default(),
                    source: source.unwrap_or_default(),
                    visitors,
                }
            })
            .collect()
    }

    /// Time-bucketed views and distinct visitors. The bucket grid depends on
    /// the requested range; see [`DateRange`]. Always emitted in ascending
    /// chronological order.
    pub fn views_and_visitors(&self) -> Vec<TrafficPoint> {
        let mut buckets: Vec<Bucket> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let hourly_span = match self.date_range {
            Some(DateRange::Last1Day) => Some(24),
            Some(DateRange::Last3Days) => Some(72),
            _ => None,
        };

        if let Some(hours) = hourly_span {
            for i in (1..=hours).rev() {
                let t = self.now.clone() - Duration::hours(i);
                seed_bucket(&mut buckets, &mut index, hour_key(&t), t.timestamp());
            }
            self.fill_buckets(&mut buckets, &index, |local| hour_key(local));
        } else if self.date_range == Some(DateRange::Last7Days) {
            // 7 trailing days plus today, present even when empty.
            for i in (0..=7).rev() {
                let t = self.now.clone() - Duration::days(i);
                seed_bucket(&mut buckets, &mut index, day_key(&t), t.timestamp());
            }
            self.fill_buckets(&mut buckets, &index, |local| day_key(local));
        } else {
            // Dynamic grid: a bucket per day actually present in the data.
            for record in self.data {
                let Some(created_at) = &record.created_at else { continue };
                let local = created_at.with_timezone(&self.now.timezone());
                let key = day_key(&local);
                let slot = match index.get(&key) {
                    Some(&slot) => slot,
                    None => {
                        let order = i64::from(local.date_naive().num_days_from_ce());
                        seed_bucket(&mut buckets, &mut index, key, order)
                    }
                };
                buckets[slot].count(record);
            }
        }

        buckets.sort_by_key(|b| b.order);
        buckets
            .into_iter()
            .map(|b| TrafficPoint {
                day: b.key,
                views: b.views,
                visitors: b.visitors.len() as u64,
            })
            .collect()
    }

    fn fill_buckets<F>(&self, buckets: &mut [Bucket], index: &HashMap<String, usize>, key_of: F)
    where
        F: Fn(&DateTime<Tz>) -> String,
    {
        for record in self.data {
            let Some(created_at) = &record.created_at else { continue };
            let local = created_at.with_timezone(&self.now.timezone());
            if let Some(&slot) = index.get(&key_of(&local)) {
                buckets[slot].count(record);
            }
        }
    }

    /// Unsorted; ordering is the presentation layer's call.
    pub fn visitor_geography(&self) -> Vec<CountryViews> {
        let mut map = CountMap::new();
        for record in self.data {
            if let Some(country) = &record.country {
                map.increment(country);
            }
        }
        map.iter()
            .map(|(country_code, views)| CountryViews {
                country_code: country_code.to_string(),
                views,
            })
            .collect()
    }

    pub fn webpage_views(&self) -> ChangeValue {
        let change = if self.range_data.is_empty() {
            0.0
        } else {
            percentage_change(self.range_data.len() as f64, self.data.len() as f64)
        };
        ChangeValue {
            change,
            value: self.data.len() as u64,
        }
    }
}

struct Bucket {
    key: String,
    order: i64,
    views: u64,
    visitors: HashSet<String>,
}

impl Bucket {
    fn count(&mut self, record: &StatRecord) {
        self.views += 1;
        if let Some(ip_hash) = &record.ip_hash {
            self.visitors.insert(ip_hash.clone());
        }
    }
}

fn seed_bucket(
    buckets: &mut Vec<Bucket>,
    index: &mut HashMap<String, usize>,
    key: String,
    order: i64,
) -> usize {
    if let Some(&slot) = index.get(&key) {
        return slot;
    }
    buckets.push(Bucket {
        key: key.clone(),
        order,
        views: 0,
        visitors: HashSet::new(),
    });
    let slot = buckets.len() - 1;
    index.insert(key, slot);
    slot
}

/// Dimension count skipping records without the field, keys lower-cased.
fn count_present<F>(records: &[StatRecord], accessor: F) -> CountMap
where
    F: Fn(&StatRecord) -> Option<&str>,
{
    let mut map = CountMap::new();
    for record in records {
        if let Some(value) = accessor(record) {
            map.increment(&value.to_lowercase());
        }
    }
    map
}

fn referrer_domain(label: &str) -> String {
    if !label.contains("http") {
        return String::new();
    }
    match Url::parse(label) {
        Ok(url) => match url.host_str() {
            Some(host) => match url.port() {
                Some(port) => format!("{}://{host}:{port}", url.scheme()),
                None => format!("{}://{host}", url.scheme()),
            },
            None => String::new(),
        },
        Err(_) => String::new(),
    }
}
