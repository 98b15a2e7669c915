//! The persistence seam. The engine only ever talks to an external document
//! store through [`DocumentStore`]: find/create/update/delete over named
//! collections with a small filter language. A reference in-memory
//! implementation lives in [`memory`] for tests and demos.

pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store query failed: {0}")]
    Query(String),
    #[error("document not found in {collection}: {id}")]
    NotFound { collection: String, id: String },
    #[error("document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Comparison operators the engine needs: equality plus ordered comparisons
/// on date/numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    GreaterThanEqual,
    LessThanEqual,
    LessThan,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub comparison: Comparison,
    pub value: Value,
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, comparison: Comparison, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition {
            field: field.to_string(),
            comparison,
            value: value.into(),
        });
        self
    }

    pub fn equals(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::Equals, value)
    }

    pub fn greater_than_equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::GreaterThanEqual, value)
    }

    pub fn less_than_equal(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::LessThanEqual, value)
    }

    pub fn less_than(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Comparison::LessThan, value)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// `None` fetches the whole matching set; aggregation jobs must not
    /// silently truncate a bucket.
    pub limit: Option<usize>,
    /// Optional field projection; `id` is always retained.
    pub select: Option<Vec<String>>,
}

impl FindOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn limit(n: usize) -> Self {
        Self {
            limit: Some(n),
            ..Self::default()
        }
    }

    pub fn select(fields: &[&str]) -> Self {
        Self {
            limit: None,
            select: Some(fields.iter().map(|f| f.to_string()).collect()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub docs: Vec<Value>,
    pub total_docs: u64,
}

/// External persistence collaborator. Documents are JSON values; typed
/// access goes through [`find_docs`] / [`find_first`].
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<FindResult, StoreError>;

    async fn create(&self, collection: &str, data: Value) -> Result<Value, StoreError>;

    /// Merges `data` into the identified document field-by-field.
    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Value, StoreError>;

    /// Deletes every matching document, returning how many went away.
    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;
}

/// Fetches and deserializes every matching document.
pub async fn find_docs<T, S>(
    store: &S,
    collection: &str,
    filter: &Filter,
    options: &FindOptions,
) -> Result<Vec<T>, StoreError>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
{
    let result = store.find(collection, filter, options).await?;
    result
        .docs
        .into_iter()
        .map(|doc| serde_json::from_value(doc).map_err(StoreError::from))
        .collect()
}

/// First matching document, if any.
pub async fn find_first<T, S>(
    store: &S,
    collection: &str,
    filter: &Filter,
) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: DocumentStore + ?Sized,
{
    let mut docs: Vec<T> = find_docs(store, collection, filter, &FindOptions::limit(1)).await?;
    Ok(if docs.is_empty() {
        None
    } else {
        Some(docs.remove(0))
    })
}

/// The store-assigned id of a raw document.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("id").and_then(Value::as_str)
}
