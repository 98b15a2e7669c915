//! Group-and-count primitives shared by every rollup dimension.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A string-keyed counter that remembers insertion order of first occurrence.
/// Ranked extractions rely on that order for deterministic tie-breaking, so
/// it is preserved through (de)serialization as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountMap {
    keys: Vec<String>,
    counts: HashMap<String, u64>,
}

impl CountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    pub fn add(&mut self, key: &str, n: u64) {
        match self.counts.get_mut(key) {
            Some(count) => *count += n,
            None => {
                self.keys.push(key.to_string());
                self.counts.insert(key.to_string(), n);
            }
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Entries in insertion order of first occurrence.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.keys.iter().map(move |k| (k.as_str(), self.counts[k]))
    }

    pub fn entries(&self) -> Vec<(String, u64)> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl Serialize for CountMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, count) in self.iter() {
            map.serialize_entry(key, &count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CountMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CountMapVisitor;

        impl<'de> Visitor<'de> for CountMapVisitor {
            type Value = CountMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string keys to counts")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<CountMap, A::Error> {
                let mut map = CountMap::new();
                while let Some((key, count)) = access.next_entry::<String, u64>()? {
                    map.add(&key, count);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(CountMapVisitor)
    }
}

/// Counts records by the accessor's value; records with no value land under
/// the literal `"unknown"` bucket.
pub fn count_by<T, F>(records: &[T], accessor: F) -> CountMap
where
    F: Fn(&T) -> Option<String>,
{
    let mut map = CountMap::new();
    for record in records {
        let key = accessor(record).unwrap_or_else(|| "unknown".to_string());
        map.increment(&key);
    }
    map
}

/// Key-wise addition of `source` into `target`; absent keys count as zero.
pub fn sum_into(target: &mut CountMap, source: &CountMap) {
    for (key, count) in source.iter() {
        target.add(key, count);
    }
}

/// Entries ranked by the comparator and truncated to `n`. The underlying
/// sort is stable, so ties keep the map's insertion order.
pub fn top_n_by<F>(map: &CountMap, n: usize, mut compare: F) -> Vec<(String, u64)>
where
    F: FnMut(&(String, u64), &(String, u64)) -> Ordering,
{
    let mut entries = map.entries();
    entries.sort_by(|a, b| compare(a, b));
    entries.truncate(n);
    entries
}

/// Entries ranked descending by count, truncated to `n`.
pub fn top_n(map: &CountMap, n: usize) -> Vec<(String, u64)> {
    top_n_by(map, n, |a, b| b.1.cmp(&a.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Record {
        browser: Option<String>,
    }

    fn record(browser: Option<&str>) -> Record {
        Record {
            browser: browser.map(|b| b.to_string()),
        }
    }

    #[test]
    fn count_by_buckets_missing_values_as_unknown() {
        let records = vec![
            record(Some("Chrome")),
            record(Some("Firefox")),
            record(Some("Chrome")),
            record(None),
        ];
        let map = count_by(&records, |r| r.browser.clone());
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("Chrome"), 2);
        assert_eq!(map.get("Firefox"), 1);
        assert_eq!(map.get("unknown"), 1);
        assert_eq!(map.total(), records.len() as u64);
    }

    #[test]
    fn iteration_follows_first_occurrence() {
        let records = vec![
            record(Some("Safari")),
            record(Some("Chrome")),
            record(Some("Safari")),
        ];
        let map = count_by(&records, |r| r.browser.clone());
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Safari", "Chrome"]);
    }

    #[test]
    fn sum_into_treats_absent_keys_as_zero() {
        let mut target = CountMap::new();
        target.add("a", 2);
        let mut source = CountMap::new();
        source.add("a", 3);
        source.add("b", 1);
        sum_into(&mut target, &source);
        assert_eq!(target.get("a"), 5);
        assert_eq!(target.get("b"), 1);

        sum_into(&mut target, &CountMap::new());
        assert_eq!(target.get("a"), 5);
    }

    #[test]
    fn top_n_truncates_and_sorts_descending() {
        let mut map = CountMap::new();
        for i in 0..15 {
            map.add(&format!("/page-{i}"), 1);
        }
        assert_eq!(top_n(&map, 10).len(), 10);

        let mut map = CountMap::new();
        map.add("/home", 2);
        map.add("/about", 5);
        map.add("/contact", 3);
        let ranked = top_n(&map, 2);
        assert_eq!(ranked[0].0, "/about");
        assert_eq!(ranked[1].0, "/contact");
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut map = CountMap::new();
        map.add("/a", 1);
        map.add("/b", 1);
        map.add("/c", 2);
        map.add("/d", 1);
        let ranked = top_n(&map, 4);
        assert_eq!(ranked[0].0, "/c");
        assert_eq!(ranked[1].0, "/a");
        assert_eq!(ranked[2].0, "/b");
        assert_eq!(ranked[3].0, "/d");
    }

    #[test]
    fn serde_preserves_counts_and_order() {
        let mut map = CountMap::new();
        map.add("Chrome", 2);
        map.add("Firefox", 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"Chrome":2,"Firefox":1}"#);
        let back: CountMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
