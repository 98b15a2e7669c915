//! "See all" table queries behind the dashboard cards.
//!
//! Each fetches a single projected field over the whole collection, groups
//! in memory and paginates. The unbounded fetch is a known scalability
//! ceiling, acceptable while collections stay small.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::PluginOptions;
use crate::counting::CountMap;
use crate::error::Error;
use crate::model::TableParams;
use crate::stats::{paginate, Paginated};
use crate::store::{DocumentStore, Filter, FindOptions};
use crate::utm::{falsy_string, parse_utm_key, utm_key, Utm};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathRow {
    pub path: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerRow {
    pub referrer_url: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserRow {
    pub browser: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRow {
    pub device_type: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsRow {
    pub os: String,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtmTrackingRow {
    pub campaign: Option<String>,
    pub content: Option<String>,
    pub medium: Option<String>,
    pub source: Option<String>,
    pub term: Option<String>,
    pub visitors: u64,
}

pub async fn top_pages<S: DocumentStore>(
    store: &S,
    options: &PluginOptions,
    params: &TableParams,
) -> Result<Paginated<PathRow>, Error> {
    let (counts, total) =
        count_field(store, &options.events_collection(), "path", None).await?;
    let rows = counts
        .iter()
        .map(|(path, value)| PathRow {
            path: path.to_string(),
            value,
        })
        .collect();
    Ok(paginate(rows, params.page, params.limit, total))
}

/// Referrerless traffic is real traffic; it lands under `"Unknown"` instead
/// of being dropped.
pub async fn top_referrers<S: DocumentStore>(
    store: &S,
    options: &PluginOptions,
    params: &TableParams,
) -> Result<Paginated<ReferrerRow>, Error> {
    let (counts, total) = count_field(
        store,
        &options.events_collection(),
        "referrer_url",
        Some("Unknown"),
    )
    .await?;
    let rows = counts
        .iter()
        .map(|(referrer_url, value)| ReferrerRow {
            referrer_url: referrer_url.to_string(),
            value,
        })
        .collect();
    Ok(paginate(rows, params.page, params.limit, total))
}

pub async fn browsers<S: DocumentStore>(
    store: &S,
    options: &PluginOptions,
    params: &TableParams,
) -> Result<Paginated<BrowserRow>, Error> {
    let (counts, total) =
        count_field(store, &options.sessions_collection(), "browser", None).await?;
    let rows = counts
        .iter()
        .map(|(browser, value)| BrowserRow {
            browser: browser.to_string(),
            value,
        })
        .collect();
    Ok(paginate(rows, params.page, params.limit, total))
}

pub async fn devices<S: DocumentStore>(
    store: &S,
    options: &PluginOptions,
    params: &TableParams,
) -> Result<Paginated<DeviceRow>, Error> {
    let (counts, total) =
        count_field(store, &options.sessions_collection(), "device_type", None).await?;
    let rows = counts
        .iter()
        .map(|(device_type, value)| DeviceRow {
            device_type: device_type.to_string(),
            value,
        })
        .collect();
    Ok(paginate(rows, params.page, params.limit, total))
}

pub async fn operating_systems<S: DocumentStore>(
    store: &S,
    options: &PluginOptions,
    params: &TableParams,
) -> Result<Paginated<OsRow>, Error> {
    let (counts, total) =
        count_field(store, &options.sessions_collection(), "os", None).await?;
    let rows = counts
        .iter()
        .map(|(os, value)| OsRow {
            os: os.to_string(),
            value,
        })
        .collect();
    Ok(paginate(rows, params.page, params.limit, total))
}

/// Groups sessions by the composite UTM key and decodes each key back into
/// its fields for display, nulling legacy falsy strings.
pub async fn utm_tracking<S: DocumentStore>(
    store: &S,
    options: &PluginOptions,
    params: &TableParams,
) -> Result<Paginated<UtmTrackingRow>, Error> {
    let result = store
        .find(
            &options.sessions_collection(),
            &Filter::new(),
            &FindOptions::select(&["utm"]),
        )
        .await?;
    let mut counts = CountMap::new();
    for doc in &result.docs {
        let utm: Option<Utm> = doc
            .get("utm")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        if let Some(key) = utm.as_ref().and_then(utm_key) {
            counts.increment(&key);
        }
    }
    let rows = counts
        .iter()
        .map(|(key, visitors)| {
            let utm = parse_utm_key(key);
            UtmTrackingRow {
                campaign: falsy_string(utm.campaign),
                content: falsy_string(utm.content),
                medium: falsy_string(utm.medium),
                source: falsy_string(utm.source),
                term: falsy_string(utm.term),
                visitors,
            }
        })
        .collect();
    Ok(paginate(rows, params.page, params.limit, result.total_docs))
}

/// Unbounded projected fetch plus group-and-count on one field. `total` is
/// the record count, not the group count, matching the card headline.
async fn count_field<S: DocumentStore>(
    store: &S,
    collection: &str,
    field: &str,
    missing_as: Option<&str>,
) -> Result<(CountMap, u64), Error> {
    let result = store
        .find(collection, &Filter::new(), &FindOptions::select(&[field]))
        .await?;
    debug!(collection, field, total = result.total_docs, "widget fetch");
    let mut counts = CountMap::new();
    for doc in &result.docs {
        match doc.get(field).and_then(Value::as_str) {
            Some(value) => counts.increment(value),
            None => {
                if let Some(fallback) = missing_as {
                    counts.increment(fallback);
                }
            }
        }
    }
    Ok((counts, result.total_docs))
}
