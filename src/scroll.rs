//! Cursor-based pagination over every span of an identity.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{Result, StoreError};
use crate::session::{Session, DEFAULT_KEEP_ALIVE, DEFAULT_SCROLL_SIZE};
use crate::transport::{time_value, Hit, ScrollPage, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollOptions {
    pub page_size: usize,
    /// How long the store keeps the cursor alive between pages.
    pub keep_alive: Duration,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        ScrollOptions {
            page_size: DEFAULT_SCROLL_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollPhase {
    #[default]
    Unstarted,
    Paging,
    Exhausted,
    Released,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollState {
    cursor_id: Option<String>,
    buffer: VecDeque<Hit>,
    total_hits: Option<u64>,
    /// Next request to send: the full search body until a cursor exists, then
    /// the continuation.
    body: Value,
    /// `{"query": ...}` for counting the same documents.
    count_body: Value,
    keep_alive: Duration,
    phase: ScrollPhase,
}

impl ScrollState {
    fn new(body: Value, keep_alive: Duration) -> Self {
        let count_body = match body.get("query") {
            Some(query) => json!({ "query": query }),
            None => json!({}),
        };
        ScrollState {
            body,
            count_body,
            keep_alive,
            ..ScrollState::default()
        }
    }

    /// Takes in one page; returns whether it carried any hits.
    fn ingest(&mut self, page: ScrollPage) -> bool {
        if page.cursor_id.is_some() {
            self.cursor_id = page.cursor_id;
        }
        if let Some(continuation) = self.continuation() {
            self.body = continuation;
        }
        if page.hits.is_empty() {
            self.phase = ScrollPhase::Exhausted;
            return false;
        }
        if page.total > 0 && self.total_hits.is_none() {
            self.total_hits = Some(page.total);
        }
        self.buffer = page.hits.into();
        self.phase = ScrollPhase::Paging;
        true
    }

    fn continuation(&self) -> Option<Value> {
        let cursor_id = self.cursor_id.as_ref()?;
        Some(json!({ "scroll": time_value(self.keep_alive), "scroll_id": cursor_id }))
    }
}

/// Yields the hits of a query one at a time, fetching pages on demand.
///
/// Nothing is sent until the first [`next`](Self::next). Call
/// [`close`](Self::close) when done so the store can free the cursor early.
pub struct ScrollCursor<'a, T: Transport> {
    session: &'a Session<T>,
    index: String,
    state: ScrollState,
}

impl<'a, T: Transport> ScrollCursor<'a, T> {
    pub(crate) fn open(session: &'a Session<T>, body: Option<&Value>, options: ScrollOptions) -> Result<Self> {
        if options.page_size == 0 {
            return Err(StoreError::Configuration(
                "scroll page size must be at least 1".to_string(),
            ));
        }
        let mut body = session.filtered(body)?;
        if let Value::Object(map) = &mut body {
            map.entry("size").or_insert_with(|| json!(options.page_size));
        }
        Ok(ScrollCursor {
            session,
            index: session.identity().pattern(),
            state: ScrollState::new(body, options.keep_alive),
        })
    }

    pub fn phase(&self) -> ScrollPhase {
        self.state.phase
    }

    /// Total hits as reported by the first non-empty page.
    pub fn total_hits(&self) -> Option<u64> {
        self.state.total_hits
    }

    /// Counts the documents matching the cursor's query.
    pub async fn total(&self) -> Result<u64> {
        self.ensure_live()?;
        match self
            .session
            .transport()
            .execute_count(&self.index, &self.state.count_body)
            .await
        {
            Ok(count) => Ok(count),
            Err(err) if err.is_not_found() => Ok(0),
            Err(err) => Err(err),
        }
    }

    pub async fn next(&mut self) -> Result<Option<Hit>> {
        self.ensure_live()?;
        if let Some(hit) = self.state.buffer.pop_front() {
            return Ok(Some(hit));
        }

        let page = match self.state.phase {
            ScrollPhase::Unstarted => {
                let keep_alive = time_value(self.state.keep_alive);
                let opened = self
                    .session
                    .transport()
                    .execute_scroll_open(&self.index, &self.state.body, &keep_alive)
                    .await;
                match opened {
                    Err(err) if err.is_not_found() => {
                        tracing::debug!(parent: self.session.span(), index = %self.index, "scroll over missing index");
                        ScrollPage::default()
                    }
                    other => other.inspect_err(|err| {
                        tracing::error!(parent: self.session.span(), index = %self.index, body = %self.state.body, "scroll failed: {err}");
                    })?,
                }
            }
            ScrollPhase::Paging if self.state.cursor_id.is_some() => self
                .session
                .transport()
                .execute_scroll_next(&self.state.body)
                .await
                .inspect_err(|err| {
                    tracing::error!(parent: self.session.span(), index = %self.index, "scroll continuation failed: {err}");
                })?,
            _ => {
                self.state.phase = ScrollPhase::Exhausted;
                return Ok(None);
            }
        };

        if !self.state.ingest(page) {
            return Ok(None);
        }
        Ok(self.state.buffer.pop_front())
    }

    /// Drains the remaining hits.
    pub async fn collect(&mut self) -> Result<Vec<Hit>> {
        let mut hits = Vec::new();
        while let Some(hit) = self.next().await? {
            hits.push(hit);
        }
        Ok(hits)
    }

    /// Releases the store-side cursor and clears all state. Idempotent.
    pub async fn close(&mut self) {
        if self.state.phase == ScrollPhase::Released {
            return;
        }
        if let Some(cursor_id) = self.state.cursor_id.take() {
            match self.session.transport().execute_scroll_release(&cursor_id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    tracing::warn!(parent: self.session.span(), index = %self.index, "scroll cursor already expired");
                }
                Err(err) => {
                    tracing::warn!(parent: self.session.span(), index = %self.index, "scroll cursor not released: {err}");
                }
            }
        }
        self.state = ScrollState {
            phase: ScrollPhase::Released,
            ..ScrollState::default()
        };
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state.phase == ScrollPhase::Released {
            return Err(StoreError::NotInitialized("scroll cursor is closed"));
        }
        Ok(())
    }
}

impl<T: Transport> Drop for ScrollCursor<'_, T> {
    fn drop(&mut self) {
        if self.state.phase != ScrollPhase::Released && self.state.cursor_id.is_some() {
            tracing::warn!(
                parent: self.session.span(),
                index = %self.index,
                "scroll cursor dropped without close; it expires after the keep-alive"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::TermFilter;
    use crate::session::testing::session;
    use crate::transport::memory::{page, MemoryTransport, ScrollCall};

    fn ids(hits: &[Hit]) -> Vec<&str> {
        hits.iter().map(|hit| hit.id.as_str()).collect()
    }

    #[tokio::test]
    async fn pages_are_drained_in_order_then_exhausted() {
        let session = session(MemoryTransport::with_pages([
            page("c1", 3, &["a", "b"]),
            page("c2", 3, &["c"]),
            page("c2", 3, &[]),
        ]));
        let mut cursor = session.scroll(None).unwrap();

        let hits = cursor.collect().await.unwrap();
        assert_eq!(ids(&hits), vec!["a", "b", "c"]);
        assert_eq!(cursor.phase(), ScrollPhase::Exhausted);
        assert_eq!(cursor.total_hits(), Some(3));

        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(session.transport().state().scroll_calls.len(), 3);

        cursor.close().await;
        assert_eq!(session.transport().state().released, vec!["c2".to_string()]);
    }

    #[tokio::test]
    async fn first_request_is_filtered_and_continuations_use_cursor() {
        let session = session(MemoryTransport::with_pages([
            page("c1", 2, &["a"]),
            page("c1", 2, &["b"]),
        ]))
        .with_terms(TermFilter::new().with("tenant", "acme"));
        let mut cursor = session
            .scroll_with(
                Some(&json!({"query": {"term": {"name": "John"}}})),
                ScrollOptions {
                    page_size: 50,
                    keep_alive: Duration::from_secs(30),
                },
            )
            .unwrap();
        cursor.collect().await.unwrap();

        let state = session.transport().state();
        match &state.scroll_calls[0] {
            ScrollCall::Open {
                index,
                body,
                keep_alive,
            } => {
                assert_eq!(index, "ta-cst-src-*");
                assert_eq!(keep_alive, "30s");
                assert_eq!(body["size"], 50);
                assert_eq!(body["query"]["bool"]["must"][0], json!({"term": {"name": "John"}}));
            }
            other => panic!("unexpected first call {other:?}"),
        }
        assert_eq!(
            state.scroll_calls[1],
            ScrollCall::Next {
                cursor_id: "c1".to_string(),
                keep_alive: "30s".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn total_is_cached_from_the_first_page() {
        let session = session(MemoryTransport::with_pages([
            page("c1", 5, &["a"]),
            page("c1", 9, &["b"]),
        ]));
        let mut cursor = session.scroll(None).unwrap();
        cursor.next().await.unwrap();
        cursor.next().await.unwrap();
        assert_eq!(cursor.total_hits(), Some(5));
        cursor.close().await;
    }

    #[tokio::test]
    async fn empty_first_page_still_releases_cursor() {
        let session = session(MemoryTransport::with_pages([page("c0", 0, &[])]));
        let mut cursor = session.scroll(None).unwrap();
        assert!(cursor.next().await.unwrap().is_none());
        assert_eq!(cursor.total_hits(), None);
        cursor.close().await;
        assert_eq!(session.transport().state().released, vec!["c0".to_string()]);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_use() {
        let session = session(MemoryTransport::with_pages([page("c1", 1, &["a"])]));
        let mut cursor = session.scroll(None).unwrap();
        cursor.next().await.unwrap();
        cursor.close().await;
        cursor.close().await;
        assert_eq!(session.transport().state().released.len(), 1);

        assert!(matches!(cursor.next().await, Err(StoreError::NotInitialized(_))));
        assert!(matches!(cursor.total().await, Err(StoreError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn unstarted_close_sends_nothing() {
        let session = session(MemoryTransport::new());
        let mut cursor = session.scroll(None).unwrap();
        cursor.close().await;
        let state = session.transport().state();
        assert!(state.released.is_empty());
        assert!(state.scroll_calls.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_reach_the_caller() {
        let transport = MemoryTransport::new();
        transport.state().scroll_pages.push_back(Err(StoreError::Transport {
            operation: "scroll",
            index: "ta-cst-src-*".to_string(),
            status: Some(500),
            message: "boom".to_string(),
        }));
        let session = session(transport);
        let mut cursor = session.scroll(None).unwrap();
        assert!(matches!(cursor.next().await, Err(StoreError::Transport { .. })));
        assert_eq!(cursor.phase(), ScrollPhase::Unstarted);
    }

    #[tokio::test]
    async fn total_counts_the_filtered_query() {
        let transport = MemoryTransport::new();
        transport.state().count_result = 12;
        let session = session(transport).with_terms(TermFilter::new().with("tenant", "acme"));
        let cursor = session.scroll(Some(&json!({"sort": ["_doc"]}))).unwrap();
        assert_eq!(cursor.total().await.unwrap(), 12);

        let state = session.transport().state();
        assert_eq!(
            state.counts[0].1,
            json!({"query": {"bool": {"filter": [{"term": {"tenant": "acme"}}]}}})
        );
    }

    #[test]
    fn ingest_replaces_request_with_continuation() {
        let query = json!({"query": {"term": {"name": "John"}}, "size": 10});
        let mut state = ScrollState::new(query.clone(), Duration::from_secs(10));
        assert_eq!(state.body, query);

        state.ingest(page("c9", 1, &["a"]));
        assert_eq!(state.body, json!({"scroll": "10s", "scroll_id": "c9"}));
        assert_eq!(state.count_body, json!({"query": {"term": {"name": "John"}}}));
    }

    #[tokio::test]
    async fn cursor_sends_stored_continuation_after_first_page() {
        let session = session(MemoryTransport::with_pages([
            page("c1", 2, &["a"]),
            page("c2", 2, &["b"]),
            page("c2", 2, &[]),
        ]));
        let mut cursor = session.scroll(None).unwrap();

        cursor.next().await.unwrap();
        assert_eq!(cursor.state.body, json!({"scroll": "10s", "scroll_id": "c1"}));
        cursor.next().await.unwrap();
        assert_eq!(cursor.state.body["scroll_id"], "c2");
        assert!(cursor.next().await.unwrap().is_none());

        let state = session.transport().state();
        assert_eq!(
            state.scroll_calls[2],
            ScrollCall::Next {
                cursor_id: "c2".to_string(),
                keep_alive: "10s".to_string(),
            }
        );
        drop(state);
        cursor.close().await;
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let session = session(MemoryTransport::new());
        let err = session
            .scroll_with(
                None,
                ScrollOptions {
                    page_size: 0,
                    ..ScrollOptions::default()
                },
            )
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
