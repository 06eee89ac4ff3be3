//! The narrow interface the core needs from an index store.
//!
//! [`crate::http::ApiClient`] implements it over the Elasticsearch REST API.
//! Every call is one round trip; implementations never retry.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[cfg(test)]
pub(crate) mod memory;

/// Refresh behaviour requested for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Refresh {
    /// Refresh the affected shards immediately (`refresh=true`).
    #[serde(rename = "true")]
    Immediate,
    /// Block until the next scheduled refresh makes the change visible.
    WaitFor,
}

impl Refresh {
    pub fn as_param(self) -> &'static str {
        match self {
            Refresh::Immediate => "true",
            Refresh::WaitFor => "wait_for",
        }
    }
}

impl fmt::Display for Refresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

/// `(if_seq_no, if_primary_term)` compared by the store at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqPrimary {
    pub seq_no: u64,
    pub primary_term: u64,
}

impl SeqPrimary {
    pub fn new(seq_no: u64, primary_term: u64) -> Self {
        SeqPrimary {
            seq_no,
            primary_term,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    #[default]
    Index,
    Create,
    Update,
    Delete,
}

impl WriteAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteAction::Index => "index",
            WriteAction::Create => "create",
            WriteAction::Update => "update",
            WriteAction::Delete => "delete",
        }
    }
}

/// One pending write in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOp {
    pub action: WriteAction,
    pub index: String,
    pub id: Option<String>,
    pub document: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    pub index: String,
    pub id: Option<String>,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub items: usize,
    pub failures: Vec<BulkItemFailure>,
}

impl BulkOutcome {
    pub fn any_item_errored(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A search hit as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(rename = "_score", default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(rename = "_seq_no", default, skip_serializing_if = "Option::is_none")]
    pub seq_no: Option<u64>,
    #[serde(rename = "_primary_term", default, skip_serializing_if = "Option::is_none")]
    pub primary_term: Option<u64>,
}

impl Hit {
    pub fn seq_primary(&self) -> Option<SeqPrimary> {
        Some(SeqPrimary::new(self.seq_no?, self.primary_term?))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub hits: Vec<Hit>,
    pub total: u64,
    pub aggregations: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub cursor_id: Option<String>,
    pub hits: Vec<Hit>,
    pub total: u64,
}

/// A stored document with its concurrency metadata (`GET _doc`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
    #[serde(rename = "_seq_no", default)]
    pub seq_no: Option<u64>,
    #[serde(rename = "_primary_term", default)]
    pub primary_term: Option<u64>,
    #[serde(rename = "_version", default)]
    pub version: Option<u64>,
}

impl Document {
    pub fn seq_primary(&self) -> Option<SeqPrimary> {
        Some(SeqPrimary::new(self.seq_no?, self.primary_term?))
    }
}

impl From<Hit> for Document {
    fn from(hit: Hit) -> Self {
        Document {
            index: hit.index,
            id: hit.id,
            source: hit.source.unwrap_or(Value::Null),
            seq_no: hit.seq_no,
            primary_term: hit.primary_term,
            version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest<'a> {
    pub index: &'a str,
    pub action: WriteAction,
    pub id: Option<&'a str>,
    pub document: &'a Value,
    pub seq_primary: Option<SeqPrimary>,
    pub refresh: Option<Refresh>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub id: String,
    pub result: String,
    pub seq_primary: Option<SeqPrimary>,
}

/// Summary of an `_update_by_query` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateByQueryOutcome {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub updated: u64,
    #[serde(default)]
    pub timed_out: bool,
}

/// Operations the core issues against the index store.
///
/// Errors follow [`crate::error::StoreError`]: a missing index or document is
/// `NotFound`, a seq/term mismatch is `VersionConflict` and anything else that
/// failed on the wire is `Transport`.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn execute_write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome>;

    async fn execute_bulk(&self, ops: &[BulkOp], refresh: Option<Refresh>) -> Result<BulkOutcome>;

    async fn execute_search(&self, index: &str, body: &Value) -> Result<SearchPage>;

    async fn execute_count(&self, index: &str, body: &Value) -> Result<u64>;

    async fn execute_scroll_open(&self, index: &str, body: &Value, keep_alive: &str)
        -> Result<ScrollPage>;

    /// Fetches the next page; `body` is `{"scroll": <keep-alive>, "scroll_id": <cursor>}`.
    async fn execute_scroll_next(&self, body: &Value) -> Result<ScrollPage>;

    async fn execute_scroll_release(&self, cursor_id: &str) -> Result<()>;

    async fn get_document(&self, index: &str, id: &str) -> Result<Document>;

    /// Raw `_termvectors` response for one document.
    async fn term_vectors(&self, index: &str, id: &str, body: &Value) -> Result<Value>;

    async fn delete_document(&self, index: &str, id: &str, refresh: Option<Refresh>) -> Result<()>;

    async fn execute_update(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        seq_primary: Option<SeqPrimary>,
        refresh: Option<Refresh>,
    ) -> Result<Value>;

    async fn execute_update_by_query(
        &self,
        index: &str,
        body: &Value,
        refresh: Option<Refresh>,
    ) -> Result<UpdateByQueryOutcome>;

    async fn list_indexes(&self, pattern: &str) -> Result<Vec<String>>;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    /// Returns whether the store acknowledged the deletion.
    async fn delete_index(&self, index: &str) -> Result<bool>;

    async fn set_index_setting(&self, index: &str, refresh_interval: &str) -> Result<()>;
}

/// Renders a duration as an Elasticsearch time value (`10s`, `500ms`).
pub fn time_value(duration: std::time::Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}
