//! In-process document store. Not a persistence engine, just a reference
//! implementation of the [`DocumentStore`] contract for tests, demos and
//! single-node development setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{Comparison, Condition, DocumentStore, Filter, FindOptions, FindResult, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(doc: &Value, filter: &Filter) -> bool {
        filter.conditions().iter().all(|c| Self::matches_one(doc, c))
    }

    fn matches_one(doc: &Value, condition: &Condition) -> bool {
        let field = match lookup(doc, &condition.field) {
            Some(v) => v,
            None => return false,
        };
        match condition.comparison {
            Comparison::Equals => field == &condition.value,
            Comparison::GreaterThanEqual => {
                compare(field, &condition.value).is_some_and(|o| o.is_ge())
            }
            Comparison::LessThanEqual => compare(field, &condition.value).is_some_and(|o| o.is_le()),
            Comparison::LessThan => compare(field, &condition.value).is_some_and(|o| o.is_lt()),
        }
    }

    fn project(doc: &Value, select: &[String]) -> Value {
        let mut out = Map::new();
        if let Some(obj) = doc.as_object() {
            if let Some(id) = obj.get("id") {
                out.insert("id".to_string(), id.clone());
            }
            for field in select {
                if let Some(value) = obj.get(field) {
                    out.insert(field.clone(), value.clone());
                }
            }
        }
        Value::Object(out)
    }
}

/// Dot-path field lookup, e.g. `utm.source`.
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Orders two JSON scalars. Date strings compare as instants, numbers
/// numerically, everything else lexically on its string form.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (as_datetime(a), as_datetime(b)) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<FindResult, StoreError> {
        let collections = self.collections.read();
        let docs = collections.get(collection);
        let mut matching: Vec<Value> = docs
            .map(|docs| {
                docs.iter()
                    .filter(|doc| Self::matches(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let total_docs = matching.len() as u64;
        if let Some(limit) = options.limit {
            matching.truncate(limit);
        }
        if let Some(select) = &options.select {
            matching = matching.iter().map(|d| Self::project(d, select)).collect();
        }
        Ok(FindResult {
            docs: matching,
            total_docs,
        })
    }

    async fn create(&self, collection: &str, mut data: Value) -> Result<Value, StoreError> {
        let object = data
            .as_object_mut()
            .ok_or_else(|| StoreError::Query("document must be a JSON object".to_string()))?;
        if !object.contains_key("id") {
            let n = self.next_id.fetch_add(1, Ordering::Relaxed);
            object.insert("id".to_string(), Value::String(format!("{collection}-{n}")));
        }
        if !object.contains_key("createdAt") {
            object.insert(
                "createdAt".to_string(),
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        let mut collections = self.collections.write();
        collections
            .entry(collection.to_string())
            .or_default()
            .push(data.clone());
        Ok(data)
    }

    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Value, StoreError> {
        let patch = data
            .as_object()
            .ok_or_else(|| StoreError::Query("update data must be a JSON object".to_string()))?;
        let mut collections = self.collections.write();
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let doc = docs
            .iter_mut()
            .find(|doc| doc.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        if let Some(object) = doc.as_object_mut() {
            for (key, value) in patch {
                object.insert(key.clone(), value.clone());
            }
        }
        Ok(doc.clone())
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut collections = self.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !Self::matches(doc, filter));
        Ok((before - docs.len()) as u64)
    }
}
