use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::Session;
use crate::error::{Result, StoreError};
use crate::transport::{Document, Hit, Transport};

/// Read-only queries over every span of the session's identity.
///
/// A missing index is an empty result (zero hits, zero count), never an error.
pub struct Reader<'a, T> {
    session: &'a Session<T>,
}

/// Terms aggregation result: doc count per key plus the documents that did
/// not fit into the requested number of buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Buckets {
    pub counts: BTreeMap<String, u64>,
    pub other: u64,
}

/// Tuning for a more-like-this clause; unset fields use the store defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoreLikeThis {
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_term_freq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_query_terms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_doc_freq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_doc_freq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_word_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_word_length: Option<u64>,
}

/// Builds a `more_like_this` query clause for the documents `ids`.
pub fn more_like_this(ids: &[&str], conf: &MoreLikeThis) -> Value {
    let mut params = match serde_json::to_value(conf) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    params.insert(
        "like".to_string(),
        Value::Array(ids.iter().map(|id| json!({ "_id": id })).collect()),
    );
    json!({ "more_like_this": params })
}

impl<'a, T: Transport> Reader<'a, T> {
    pub(super) fn new(session: &'a Session<T>) -> Self {
        Reader { session }
    }

    pub async fn count(&self, body: Option<&Value>) -> Result<u64> {
        let index = self.session.identity().pattern();
        let filtered = self.session.filtered(body)?;
        // _count accepts nothing but the query.
        let count_body = match filtered.get("query") {
            Some(query) => json!({ "query": query }),
            None => json!({}),
        };
        match self.session.transport().execute_count(&index, &count_body).await {
            Ok(count) => Ok(count),
            Err(err) if err.is_not_found() => {
                tracing::debug!(parent: self.session.span(), %index, "count on missing index");
                Ok(0)
            }
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, body = %count_body, "count failed: {err}");
                Err(err)
            }
        }
    }

    /// Matching hits (one page, as sized by the body) and the total match count.
    pub async fn query(&self, body: Option<&Value>) -> Result<(Vec<Hit>, u64)> {
        let index = self.session.identity().pattern();
        let filtered = self.session.filtered(body)?;
        match self.session.transport().execute_search(&index, &filtered).await {
            Ok(page) => Ok((page.hits, page.total)),
            Err(err) if err.is_not_found() => Ok((Vec::new(), 0)),
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, body = %filtered, "search failed: {err}");
                Err(err)
            }
        }
    }

    /// The `aggregations` section of a search, or an empty object when there
    /// is nothing to aggregate.
    pub async fn aggregate(&self, body: &Value) -> Result<Value> {
        let index = self.session.identity().pattern();
        let filtered = self.session.filtered(Some(body))?;
        match self.session.transport().execute_search(&index, &filtered).await {
            Ok(page) => Ok(page.aggregations.unwrap_or_else(|| json!({}))),
            Err(err) if err.is_not_found() => Ok(json!({})),
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, body = %filtered, "aggregation failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn buckets(
        &self,
        field: &str,
        query: Option<&Value>,
        max_buckets: Option<usize>,
    ) -> Result<Buckets> {
        let size = max_buckets.unwrap_or(self.session.settings().max_buckets);
        let mut body = json!({
            "size": 0,
            "aggs": { "agg": { "terms": { "field": field, "size": size } } }
        });
        if let Some(query) = query {
            body["query"] = query.clone();
        }

        let aggregations = self.aggregate(&body).await?;
        let Some(agg) = aggregations.get("agg") else {
            return Ok(Buckets::default());
        };
        let counts = agg
            .get("buckets")
            .and_then(Value::as_array)
            .map(|buckets| {
                buckets
                    .iter()
                    .filter_map(|bucket| {
                        let key = match bucket.get("key")? {
                            Value::String(key) => key.clone(),
                            other => other.to_string(),
                        };
                        Some((key, bucket.get("doc_count")?.as_u64()?))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let other = agg
            .get("sum_other_doc_count")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if other > 0 {
            tracing::info!(
                parent: self.session.span(),
                field,
                max_buckets = size,
                "{other} documents not aggregated"
            );
        }
        Ok(Buckets { counts, other })
    }

    /// Approximate number of distinct values of `field`.
    pub async fn cardinality(&self, field: &str) -> Result<u64> {
        let body = json!({
            "size": 0,
            "aggs": { "agg": { "cardinality": { "field": field } } }
        });
        let aggregations = self.aggregate(&body).await?;
        Ok(aggregations
            .pointer("/agg/value")
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Fetches a document with its concurrency metadata.
    ///
    /// With an epoch (or an untimed identity) the document is read directly
    /// from its span index; otherwise every span is searched by id. Documents
    /// that do not match the session terms are not returned.
    pub async fn get(&self, id: &str, epoch: Option<i64>) -> Result<Option<Document>> {
        let identity = self.session.identity();
        if identity.span_type().is_timed() && epoch.is_none() {
            let body = json!({
                "query": { "ids": { "values": [id] } },
                "seq_no_primary_term": true,
                "size": 1,
            });
            let (hits, _) = self.query(Some(&body)).await?;
            return Ok(hits.into_iter().next().map(Document::from));
        }

        let index = identity.index_name(epoch)?;
        match self.session.transport().get_document(&index, id).await {
            Ok(document) if self.session.terms().matches(&document.source) => Ok(Some(document)),
            Ok(_) => {
                tracing::debug!(parent: self.session.span(), %index, id, "document outside the session terms");
                Ok(None)
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, id, "get failed: {err}");
                Err(err)
            }
        }
    }

    pub async fn get_source(&self, id: &str, epoch: Option<i64>) -> Result<Option<Value>> {
        Ok(self.get(id, epoch).await?.map(|document| document.source))
    }

    /// Term statistics of `field` in one document: the `terms` map of a
    /// `_termvectors` response, limited to the ten most relevant terms.
    pub async fn term_vectors(&self, id: &str, field: &str, epoch: Option<i64>) -> Result<Option<Value>> {
        let identity = self.session.identity();
        // The document lookup finds its span and enforces the session terms.
        let locate = !self.session.terms().is_empty() || (identity.span_type().is_timed() && epoch.is_none());
        let index = if locate {
            match self.get(id, epoch).await? {
                Some(document) => document.index,
                None => return Ok(None),
            }
        } else {
            identity.index_name(epoch)?
        };

        let body = json!({
            "fields": [field],
            "offsets": false,
            "payloads": false,
            "positions": false,
            "term_statistics": true,
            "field_statistics": false,
            "filter": {
                "max_num_terms": 10,
                "min_term_freq": 1,
                "min_doc_freq": 2
            }
        });
        match self.session.transport().term_vectors(&index, id, &body).await {
            Ok(response) => Ok(Some(
                response
                    .get("term_vectors")
                    .and_then(|vectors| vectors.get(field))
                    .and_then(|vector| vector.get("terms"))
                    .cloned()
                    .unwrap_or_else(|| json!({})),
            )),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, id, field, "term vectors failed: {err}");
                Err(err)
            }
        }
    }

    /// Ids of every document matching `body`, read through a scroll.
    pub async fn ids(&self, body: Option<&Value>) -> Result<Vec<String>> {
        let mut body = match body {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                return Err(StoreError::format(
                    "query body",
                    other.to_string(),
                    "expected a JSON object",
                ))
            }
            None => Map::new(),
        };
        body.insert("_source".to_string(), Value::Bool(false));

        let mut cursor = self.session.scroll(Some(&Value::Object(body)))?;
        let mut ids = Vec::new();
        let drained = async {
            while let Some(hit) = cursor.next().await? {
                ids.push(hit.id);
            }
            Ok::<_, StoreError>(())
        }
        .await;
        cursor.close().await;
        drained?;
        Ok(ids)
    }
}
