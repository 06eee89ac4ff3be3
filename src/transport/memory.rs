//! In-memory transport used by the unit tests: records every request and
//! serves scripted responses.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};

use super::*;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RecordedBulk {
    pub ops: Vec<BulkOp>,
    pub refresh: Option<Refresh>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScrollCall {
    Open {
        index: String,
        body: Value,
        keep_alive: String,
    },
    Next {
        cursor_id: String,
        keep_alive: String,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct StoredDoc {
    pub source: Value,
    pub seq_no: u64,
    pub primary_term: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    pub bulk_batches: Vec<RecordedBulk>,
    pub bulk_results: VecDeque<Result<BulkOutcome>>,
    pub scroll_pages: VecDeque<Result<ScrollPage>>,
    pub scroll_calls: Vec<ScrollCall>,
    pub released: Vec<String>,
    pub settings: Vec<(String, String)>,
    pub fail_settings: bool,
    pub searches: Vec<(String, Value)>,
    pub search_result: SearchPage,
    pub counts: Vec<(String, Value)>,
    pub count_result: u64,
    pub documents: BTreeMap<(String, String), StoredDoc>,
    pub term_vectors: BTreeMap<(String, String), Value>,
    pub term_vector_calls: Vec<(String, String, Value)>,
    pub writes: Vec<(String, Option<String>, Value)>,
    pub updates: Vec<(String, String, Value)>,
    pub update_by_query: Vec<(String, Value, Option<Refresh>)>,
    pub update_by_query_result: UpdateByQueryOutcome,
    pub indexes: Vec<String>,
    pub deleted_indexes: Vec<String>,
    pub unacknowledged: Vec<String>,
    pub missing: bool,
    next_id: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub fn with_pages(pages: impl IntoIterator<Item = ScrollPage>) -> Self {
        let transport = Self::new();
        transport.state().scroll_pages = pages.into_iter().map(Ok).collect();
        transport
    }

    pub fn insert_document(&self, index: &str, id: &str, source: Value, seq_no: u64, primary_term: u64) {
        self.state().documents.insert(
            (index.to_string(), id.to_string()),
            StoredDoc {
                source,
                seq_no,
                primary_term,
            },
        );
    }
}

pub(crate) fn hit(index: &str, id: &str, source: Value) -> Hit {
    Hit {
        index: index.to_string(),
        id: id.to_string(),
        source: Some(source),
        score: None,
        seq_no: None,
        primary_term: None,
    }
}

pub(crate) fn page(cursor_id: &str, total: u64, ids: &[&str]) -> ScrollPage {
    ScrollPage {
        cursor_id: Some(cursor_id.to_string()),
        hits: ids
            .iter()
            .map(|id| hit("ta-cst-src-2023-03", id, json!({ "n": id })))
            .collect(),
        total,
    }
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => pattern == name,
    }
}

fn check_version(
    state: &MemoryState,
    index: &str,
    id: &str,
    seq_primary: Option<SeqPrimary>,
) -> Result<()> {
    let Some(expected) = seq_primary else {
        return Ok(());
    };
    let current = state.documents.get(&(index.to_string(), id.to_string()));
    match current {
        Some(doc) if doc.seq_no == expected.seq_no && doc.primary_term == expected.primary_term => Ok(()),
        _ => Err(StoreError::VersionConflict {
            index: index.to_string(),
            id: id.to_string(),
        }),
    }
}

impl Transport for MemoryTransport {
    async fn execute_write(&self, request: WriteRequest<'_>) -> Result<WriteOutcome> {
        let mut state = self.state();
        let id = match request.id {
            Some(id) => id.to_string(),
            None => {
                state.next_id += 1;
                format!("auto-{}", state.next_id)
            }
        };
        check_version(&state, request.index, &id, request.seq_primary)?;
        let key = (request.index.to_string(), id.clone());
        if request.action == WriteAction::Create && state.documents.contains_key(&key) {
            return Err(StoreError::VersionConflict {
                index: request.index.to_string(),
                id,
            });
        }

        let (seq_no, primary_term, result) = match state.documents.get(&key) {
            Some(doc) => (doc.seq_no + 1, doc.primary_term, "updated"),
            None => (0, 1, "created"),
        };
        state.documents.insert(
            key,
            StoredDoc {
                source: request.document.clone(),
                seq_no,
                primary_term,
            },
        );
        state.writes.push((
            request.index.to_string(),
            request.id.map(str::to_string),
            request.document.clone(),
        ));
        Ok(WriteOutcome {
            id,
            result: result.to_string(),
            seq_primary: Some(SeqPrimary::new(seq_no, primary_term)),
        })
    }

    async fn execute_bulk(&self, ops: &[BulkOp], refresh: Option<Refresh>) -> Result<BulkOutcome> {
        let mut state = self.state();
        state.bulk_batches.push(RecordedBulk {
            ops: ops.to_vec(),
            refresh,
        });
        state.bulk_results.pop_front().unwrap_or_else(|| {
            Ok(BulkOutcome {
                items: ops.len(),
                failures: Vec::new(),
            })
        })
    }

    async fn execute_search(&self, index: &str, body: &Value) -> Result<SearchPage> {
        let mut state = self.state();
        state.searches.push((index.to_string(), body.clone()));
        if state.missing {
            return Err(StoreError::not_found(format!("index {index}")));
        }
        Ok(state.search_result.clone())
    }

    async fn execute_count(&self, index: &str, body: &Value) -> Result<u64> {
        let mut state = self.state();
        state.counts.push((index.to_string(), body.clone()));
        if state.missing {
            return Err(StoreError::not_found(format!("index {index}")));
        }
        Ok(state.count_result)
    }

    async fn execute_scroll_open(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> Result<ScrollPage> {
        let mut state = self.state();
        state.scroll_calls.push(ScrollCall::Open {
            index: index.to_string(),
            body: body.clone(),
            keep_alive: keep_alive.to_string(),
        });
        state.scroll_pages.pop_front().unwrap_or_else(|| Ok(ScrollPage::default()))
    }

    async fn execute_scroll_next(&self, body: &Value) -> Result<ScrollPage> {
        let field = |name: &str| body.get(name).and_then(Value::as_str).unwrap_or_default().to_string();
        let mut state = self.state();
        state.scroll_calls.push(ScrollCall::Next {
            cursor_id: field("scroll_id"),
            keep_alive: field("scroll"),
        });
        state.scroll_pages.pop_front().unwrap_or_else(|| Ok(ScrollPage::default()))
    }

    async fn execute_scroll_release(&self, cursor_id: &str) -> Result<()> {
        self.state().released.push(cursor_id.to_string());
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Document> {
        let state = self.state();
        let doc = state
            .documents
            .get(&(index.to_string(), id.to_string()))
            .ok_or_else(|| StoreError::not_found(format!("document {id} in {index}")))?;
        Ok(Document {
            index: index.to_string(),
            id: id.to_string(),
            source: doc.source.clone(),
            seq_no: Some(doc.seq_no),
            primary_term: Some(doc.primary_term),
            version: Some(doc.seq_no + 1),
        })
    }

    async fn term_vectors(&self, index: &str, id: &str, body: &Value) -> Result<Value> {
        let mut state = self.state();
        state
            .term_vector_calls
            .push((index.to_string(), id.to_string(), body.clone()));
        state
            .term_vectors
            .get(&(index.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("document {id} in {index}")))
    }

    async fn delete_document(&self, index: &str, id: &str, _refresh: Option<Refresh>) -> Result<()> {
        self.state()
            .documents
            .remove(&(index.to_string(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("document {id} in {index}")))
    }

    async fn execute_update(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        seq_primary: Option<SeqPrimary>,
        _refresh: Option<Refresh>,
    ) -> Result<Value> {
        let mut state = self.state();
        check_version(&state, index, id, seq_primary)?;
        let key = (index.to_string(), id.to_string());
        let Some(doc) = state.documents.get_mut(&key) else {
            return Err(StoreError::not_found(format!("document {id} in {index}")));
        };
        doc.seq_no += 1;
        let response = json!({
            "_index": index,
            "_id": id,
            "result": "updated",
            "_seq_no": doc.seq_no,
            "_primary_term": doc.primary_term,
        });
        state
            .updates
            .push((index.to_string(), id.to_string(), body.clone()));
        Ok(response)
    }

    async fn execute_update_by_query(
        &self,
        index: &str,
        body: &Value,
        refresh: Option<Refresh>,
    ) -> Result<UpdateByQueryOutcome> {
        let mut state = self.state();
        state
            .update_by_query
            .push((index.to_string(), body.clone(), refresh));
        Ok(state.update_by_query_result.clone())
    }

    async fn list_indexes(&self, pattern: &str) -> Result<Vec<String>> {
        let state = self.state();
        let found: Vec<String> = state
            .indexes
            .iter()
            .filter(|name| matches_pattern(pattern, name))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(StoreError::not_found(format!("index {pattern}")));
        }
        Ok(found)
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        Ok(self
            .state()
            .indexes
            .iter()
            .any(|name| matches_pattern(index, name)))
    }

    async fn delete_index(&self, index: &str) -> Result<bool> {
        let mut state = self.state();
        let Some(position) = state.indexes.iter().position(|name| name == index) else {
            return Err(StoreError::not_found(format!("index {index}")));
        };
        if state.unacknowledged.iter().any(|name| name == index) {
            return Ok(false);
        }
        state.indexes.remove(position);
        state.deleted_indexes.push(index.to_string());
        Ok(true)
    }

    async fn set_index_setting(&self, index: &str, refresh_interval: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_settings {
            return Err(StoreError::Transport {
                operation: "settings",
                index: index.to_string(),
                status: Some(400),
                message: "illegal_argument_exception".to_string(),
            });
        }
        state
            .settings
            .push((index.to_string(), refresh_interval.to_string()));
        Ok(())
    }
}
