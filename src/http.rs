//! [`Transport`] over the Elasticsearch 7+ REST API.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Certificate, Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use urlencoding::encode;

use crate::error::{Result, StoreError};
use crate::transport::{
    BulkItemFailure, BulkOp, BulkOutcome, Document, Hit, Refresh, ScrollPage, SearchPage,
    SeqPrimary, Transport, UpdateByQueryOutcome, WriteAction, WriteOutcome, WriteRequest,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub base_url: String,
    /// Basic auth `(user, password)`.
    pub credentials: Option<(String, String)>,
    /// PEM file with an extra root certificate.
    pub ca_cert: Option<PathBuf>,
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        ClientOptions {
            base_url: base_url.into(),
            credentials: None,
            ca_cert: None,
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

enum Payload<'a> {
    Empty,
    Json(&'a Value),
    Ndjson(String),
}

/// What a request is about, for error reporting.
#[derive(Clone, Copy)]
struct Call<'a> {
    operation: &'static str,
    index: &'a str,
    id: Option<&'a str>,
}

impl<'a> Call<'a> {
    fn on(operation: &'static str, index: &'a str) -> Self {
        Call {
            operation,
            index,
            id: None,
        }
    }

    fn doc(operation: &'static str, index: &'a str, id: &'a str) -> Self {
        Call {
            operation,
            index,
            id: Some(id),
        }
    }
}

impl ApiClient {
    pub fn new(options: &ClientOptions) -> Result<Self> {
        let base_url = options.base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(StoreError::Configuration(format!(
                "store url must start with http:// or https://, got '{base_url}'"
            )));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| StoreError::Configuration(format!("invalid header name '{name}': {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| StoreError::Configuration(format!("invalid value for header '{name}': {err}")))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .timeout(options.timeout)
            .default_headers(headers);
        if let Some(path) = &options.ca_cert {
            let pem = std::fs::read(path).map_err(|err| {
                StoreError::Configuration(format!("failed to read certificate {}: {err}", path.display()))
            })?;
            let cert = Certificate::from_pem(&pem).map_err(|err| {
                StoreError::Configuration(format!("invalid certificate {}: {err}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|err| StoreError::Configuration(format!("failed to build http client: {err}")))?;

        Ok(ApiClient {
            http,
            base_url,
            credentials: options.credentials.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        payload: Payload<'_>,
        call: Call<'_>,
    ) -> Result<(StatusCode, String)> {
        let url = self.url(path);
        let mut request = self.http.request(method.clone(), &url);
        if !params.is_empty() {
            request = request.query(params);
        }
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }
        request = match payload {
            Payload::Empty => request,
            Payload::Json(body) => request.json(body),
            Payload::Ndjson(body) => request
                .header(CONTENT_TYPE, "application/x-ndjson")
                .body(body),
        };

        tracing::debug!(%method, %url, "store request");
        let response = request.send().await.map_err(|err| StoreError::Transport {
            operation: call.operation,
            index: call.index.to_string(),
            status: None,
            message: err.to_string(),
        })?;
        let status = response.status();
        let text = response.text().await.map_err(|err| StoreError::Transport {
            operation: call.operation,
            index: call.index.to_string(),
            status: Some(status.as_u16()),
            message: format!("failed to read response: {err}"),
        })?;
        Ok((status, text))
    }

    /// Sends a request and decodes a successful JSON response.
    async fn call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        payload: Payload<'_>,
        call: Call<'_>,
    ) -> Result<Value> {
        let (status, text) = self.send(method, path, params, payload, call).await?;
        if !status.is_success() {
            return Err(classify(call, status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Maps a failed response to the error taxonomy.
fn classify(call: Call<'_>, status: u16, body: &str) -> StoreError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error_type = parsed
        .as_ref()
        .and_then(|value| value.pointer("/error/type"))
        .and_then(Value::as_str);

    if status == 409 && error_type.is_none_or(|kind| kind == "version_conflict_engine_exception") {
        return StoreError::VersionConflict {
            index: call.index.to_string(),
            id: call.id.unwrap_or_default().to_string(),
        };
    }
    if status == 404 {
        let what = match call.id {
            Some(id) => format!("document {id} in {}", call.index),
            None => format!("index {}", call.index),
        };
        return StoreError::not_found(what);
    }

    let message = parsed
        .as_ref()
        .and_then(|value| {
            let error = value.get("error")?;
            match error {
                Value::String(text) => Some(text.clone()),
                _ => {
                    let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
                    let reason = error.get("reason").and_then(Value::as_str).unwrap_or_default();
                    Some(format!("{kind}: {reason}"))
                }
            }
        })
        .unwrap_or_else(|| body.chars().take(500).collect());
    StoreError::Transport {
        operation: call.operation,
        index: call.index.to_string(),
        status: Some(status),
        message,
    }
}

fn write_params(seq_primary: Option<SeqPrimary>, refresh: Option<Refresh>) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(seq_primary) = seq_primary {
        params.push(("if_seq_no", seq_primary.seq_no.to_string()));
        params.push(("if_primary_term", seq_primary.primary_term.to_string()));
    }
    if let Some(refresh) = refresh {
        params.push(("refresh", refresh.as_param().to_string()));
    }
    params
}

/// `_bulk` body: one action line per op, followed by the document line except
/// for deletes. Always ends with a newline.
pub fn encode_bulk(ops: &[BulkOp]) -> Result<String> {
    let mut out = String::new();
    for op in ops {
        let mut meta = json!({ "_index": op.index });
        if let Some(id) = &op.id {
            meta["_id"] = json!(id);
        }
        out.push_str(&serde_json::to_string(&json!({ op.action.as_str(): meta }))?);
        out.push('\n');
        if op.action != WriteAction::Delete {
            out.push_str(&serde_json::to_string(&op.document)?);
            out.push('\n');
        }
    }
    Ok(out)
}

pub fn parse_bulk_response(response: &Value) -> BulkOutcome {
    let items = response
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let failures = items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .filter_map(|result| {
            let status = result.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
            let error = result.get("error");
            if error.is_none() && status < 300 {
                return None;
            }
            let reason = error
                .map(|error| {
                    let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
                    let reason = error.get("reason").and_then(Value::as_str).unwrap_or_default();
                    format!("{kind}: {reason}")
                })
                .unwrap_or_else(|| format!("status {status}"));
            Some(BulkItemFailure {
                index: result
                    .get("_index")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                id: result.get("_id").and_then(Value::as_str).map(str::to_string),
                status,
                reason,
            })
        })
        .collect();
    BulkOutcome {
        items: items.len(),
        failures,
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    #[serde(default)]
    hits: Option<HitsSection>,
    #[serde(default)]
    aggregations: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct HitsSection {
    #[serde(default)]
    total: Option<Value>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// `hits.total` is `{"value": n}` since 7.0 and a bare number before.
fn total_of(total: Option<&Value>) -> u64 {
    match total {
        Some(Value::Number(number)) => number.as_u64().unwrap_or(0),
        Some(value) => value.get("value").and_then(Value::as_u64).unwrap_or(0),
        None => 0,
    }
}

fn parse_search(response: Value) -> Result<(SearchPage, Option<String>)> {
    let parsed: SearchResponse = serde_json::from_value(response)?;
    let (hits, total) = match parsed.hits {
        Some(section) => {
            let total = total_of(section.total.as_ref());
            (section.hits, total)
        }
        None => (Vec::new(), 0),
    };
    Ok((
        SearchPage {
            hits,
            total,
            aggregations: parsed.aggregations,
        },
        parsed.scroll_id,
    ))
}

fn scroll_page(response: Value) -> Result<ScrollPage> {
    let (page, cursor_id) = parse_search(response)?;
    Ok(ScrollPage {
        cursor_id,
        hits: page.hits,
        total: page.total,
    })
}

impl Transport for ApiClient {
    async fn execute_write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome> {
        let index = request.index;
        let (method, path) = match (request.action, request.id) {
            (WriteAction::Create, Some(id)) => (Method::PUT, format!("{index}/_create/{}", encode(id))),
            (_, Some(id)) => (Method::PUT, format!("{index}/_doc/{}", encode(id))),
            (_, None) => (Method::POST, format!("{index}/_doc")),
        };
        let params = write_params(request.seq_primary, request.refresh);
        let call = Call {
            operation: "index",
            index,
            id: request.id,
        };
        let response = self
            .call(method, &path, &params, Payload::Json(request.document), call)
            .await?;

        let seq_primary = match (
            response.get("_seq_no").and_then(Value::as_u64),
            response.get("_primary_term").and_then(Value::as_u64),
        ) {
            (Some(seq_no), Some(term)) => Some(SeqPrimary::new(seq_no, term)),
            _ => None,
        };
        Ok(WriteOutcome {
            id: response
                .get("_id")
                .and_then(Value::as_str)
                .or(request.id)
                .unwrap_or_default()
                .to_string(),
            result: response
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            seq_primary,
        })
    }

    async fn execute_bulk(&self, ops: &[BulkOp], refresh: Option<Refresh>) -> Result<BulkOutcome> {
        let body = encode_bulk(ops)?;
        let params = write_params(None, refresh);
        let response = self
            .call(Method::POST, "_bulk", &params, Payload::Ndjson(body), Call::on("bulk", "_bulk"))
            .await?;
        Ok(parse_bulk_response(&response))
    }

    async fn execute_search(&self, index: &str, body: &Value) -> Result<SearchPage> {
        let response = self
            .call(
                Method::POST,
                &format!("{index}/_search"),
                &[],
                Payload::Json(body),
                Call::on("search", index),
            )
            .await?;
        Ok(parse_search(response)?.0)
    }

    async fn execute_count(&self, index: &str, body: &Value) -> Result<u64> {
        let response = self
            .call(
                Method::POST,
                &format!("{index}/_count"),
                &[],
                Payload::Json(body),
                Call::on("count", index),
            )
            .await?;
        Ok(response.get("count").and_then(Value::as_u64).unwrap_or(0))
    }

    async fn execute_scroll_open(&self, index: &str, body: &Value, keep_alive: &str) -> Result<ScrollPage> {
        let response = self
            .call(
                Method::POST,
                &format!("{index}/_search"),
                &[("scroll", keep_alive.to_string())],
                Payload::Json(body),
                Call::on("scroll", index),
            )
            .await?;
        scroll_page(response)
    }

    async fn execute_scroll_next(&self, body: &Value) -> Result<ScrollPage> {
        let response = self
            .call(
                Method::POST,
                "_search/scroll",
                &[],
                Payload::Json(body),
                Call::on("scroll", "_search/scroll"),
            )
            .await?;
        scroll_page(response)
    }

    async fn execute_scroll_release(&self, cursor_id: &str) -> Result<()> {
        let body = json!({ "scroll_id": cursor_id });
        self.call(
            Method::DELETE,
            "_search/scroll",
            &[],
            Payload::Json(&body),
            Call::on("clear scroll", "_search/scroll"),
        )
        .await?;
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Document> {
        let response = self
            .call(
                Method::GET,
                &format!("{index}/_doc/{}", encode(id)),
                &[],
                Payload::Empty,
                Call::doc("get", index, id),
            )
            .await?;
        if response.get("found").and_then(Value::as_bool) == Some(false) {
            return Err(StoreError::not_found(format!("document {id} in {index}")));
        }
        Ok(serde_json::from_value(response)?)
    }

    async fn term_vectors(&self, index: &str, id: &str, body: &Value) -> Result<Value> {
        let response = self
            .call(
                Method::POST,
                &format!("{index}/_termvectors/{}", encode(id)),
                &[],
                Payload::Json(body),
                Call::doc("term vectors", index, id),
            )
            .await?;
        if response.get("found").and_then(Value::as_bool) == Some(false) {
            return Err(StoreError::not_found(format!("document {id} in {index}")));
        }
        Ok(response)
    }

    async fn delete_document(&self, index: &str, id: &str, refresh: Option<Refresh>) -> Result<()> {
        self.call(
            Method::DELETE,
            &format!("{index}/_doc/{}", encode(id)),
            &write_params(None, refresh),
            Payload::Empty,
            Call::doc("delete", index, id),
        )
        .await?;
        Ok(())
    }

    async fn execute_update(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        seq_primary: Option<SeqPrimary>,
        refresh: Option<Refresh>,
    ) -> Result<Value> {
        self.call(
            Method::POST,
            &format!("{index}/_update/{}", encode(id)),
            &write_params(seq_primary, refresh),
            Payload::Json(body),
            Call::doc("update", index, id),
        )
        .await
    }

    async fn execute_update_by_query(
        &self,
        index: &str,
        body: &Value,
        refresh: Option<Refresh>,
    ) -> Result<UpdateByQueryOutcome> {
        // _update_by_query only understands refresh=true.
        let params: Vec<(&str, String)> = refresh
            .map(|_| ("refresh", "true".to_string()))
            .into_iter()
            .collect();
        let response = self
            .call(
                Method::POST,
                &format!("{index}/_update_by_query"),
                &params,
                Payload::Json(body),
                Call::on("update by query", index),
            )
            .await?;
        Ok(serde_json::from_value(response)?)
    }

    async fn list_indexes(&self, pattern: &str) -> Result<Vec<String>> {
        let response = self
            .call(
                Method::GET,
                &format!("_cat/indices/{pattern}"),
                &[("format", "json".to_string()), ("h", "index".to_string())],
                Payload::Empty,
                Call::on("list indexes", pattern),
            )
            .await?;
        Ok(response
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| row.get("index")?.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let call = Call::on("index exists", index);
        let (status, text) = self.send(Method::HEAD, index, &[], Payload::Empty, call).await?;
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(classify(call, other.as_u16(), &text)),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        let response = self
            .call(Method::DELETE, index, &[], Payload::Empty, Call::on("delete index", index))
            .await?;
        Ok(response.get("acknowledged").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn set_index_setting(&self, index: &str, refresh_interval: &str) -> Result<()> {
        let body = json!({ "index": { "refresh_interval": refresh_interval } });
        self.call(
            Method::PUT,
            &format!("{index}/_settings"),
            &[],
            Payload::Json(&body),
            Call::on("settings", index),
        )
        .await?;
        Ok(())
    }
}
