//! Buffered bulk ingestion.
//!
//! A [`BulkWriter`] collects index/create/update/delete operations routed to
//! their span index and ships them in `_bulk` requests of at most `capacity`
//! operations. Failed flushes are recorded, never raised: the caller learns
//! the outcome from [`BulkWriter::close`].

use std::mem;

use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::session::{Session, DEFAULT_BULK_SIZE, DEFAULT_REFRESH_INTERVAL};
use crate::transport::{BulkItemFailure, BulkOp, Refresh, Transport, WriteAction};

#[derive(Debug, Clone, PartialEq)]
pub struct BulkOptions {
    /// Operations per `_bulk` request.
    pub capacity: usize,
    /// Refresh policy of the final flush.
    pub refresh: Option<Refresh>,
    /// Refresh interval applied to the index pattern while loading
    /// (typically `-1`).
    pub refresh_interval: Option<String>,
    /// Refresh interval restored on close.
    pub restore_interval: String,
}

impl Default for BulkOptions {
    fn default() -> Self {
        BulkOptions {
            capacity: DEFAULT_BULK_SIZE,
            refresh: None,
            refresh_interval: None,
            restore_interval: DEFAULT_REFRESH_INTERVAL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulkState {
    #[default]
    Uninitialized,
    Open,
    Closed,
}

/// Pending operations of one bulk load.
#[derive(Debug, Clone, Default)]
pub struct BulkBatch {
    ops: Vec<BulkOp>,
    capacity: usize,
    state: BulkState,
    error: bool,
}

impl BulkBatch {
    pub fn state(&self) -> BulkState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ops.len() >= self.capacity
    }

    fn reset(&mut self, capacity: usize) {
        self.ops.clear();
        self.capacity = capacity;
        self.error = false;
    }
}

pub struct BulkWriter<'a, T: Transport> {
    session: &'a Session<T>,
    batch: BulkBatch,
    options: BulkOptions,
    failures: Vec<BulkItemFailure>,
    sent: usize,
}

impl<'a, T: Transport> BulkWriter<'a, T> {
    pub(crate) fn new(session: &'a Session<T>) -> Self {
        BulkWriter {
            session,
            batch: BulkBatch::default(),
            options: BulkOptions::default(),
            failures: Vec::new(),
            sent: 0,
        }
    }

    /// Starts a bulk load, clearing anything left from a previous one.
    pub async fn open(&mut self, options: BulkOptions) -> Result<()> {
        if options.capacity == 0 {
            return Err(StoreError::Configuration(
                "bulk capacity must be at least 1".to_string(),
            ));
        }
        if let Some(interval) = options.refresh_interval.as_deref() {
            // Failure leaves the current interval in place; loading proceeds.
            self.session.admin().set_refresh(interval).await;
        }
        if !self.batch.is_empty() {
            tracing::warn!(
                parent: self.session.span(),
                pending = self.batch.len(),
                "discarding unsent bulk operations"
            );
        }
        self.batch.reset(options.capacity);
        self.batch.state = BulkState::Open;
        self.options = options;
        self.failures.clear();
        self.sent = 0;
        Ok(())
    }

    /// Queues one operation, flushing first when the batch is full.
    ///
    /// The destination index comes from the document's date field. `Delete`
    /// needs an `id` and sends no document line.
    pub async fn append(&mut self, document: Value, action: WriteAction, id: Option<String>) -> Result<()> {
        if self.batch.state != BulkState::Open {
            return Err(StoreError::NotInitialized("bulk writer is not open"));
        }
        if action == WriteAction::Delete && id.is_none() {
            return Err(StoreError::InvalidOperation(
                "a bulk delete needs a document id".to_string(),
            ));
        }
        let index = self.session.identity().index_for(&document)?;

        if self.batch.is_full() {
            self.flush(None).await;
        }
        self.batch.ops.push(BulkOp {
            action,
            index,
            id,
            document,
        });
        Ok(())
    }

    /// Sends the pending operations, if any.
    pub async fn flush(&mut self, refresh: Option<Refresh>) {
        if self.batch.is_empty() {
            return;
        }
        let ops = mem::take(&mut self.batch.ops);
        match self.session.transport().execute_bulk(&ops, refresh).await {
            Ok(outcome) => {
                self.sent += ops.len();
                if outcome.any_item_errored() {
                    self.batch.error = true;
                    tracing::error!(
                        parent: self.session.span(),
                        items = outcome.items,
                        failed = outcome.failures.len(),
                        first = ?outcome.failures.first(),
                        "bulk request had item errors"
                    );
                    self.failures.extend(outcome.failures);
                } else {
                    tracing::debug!(parent: self.session.span(), items = outcome.items, "bulk flushed");
                }
            }
            Err(err) => {
                self.batch.error = true;
                tracing::error!(
                    parent: self.session.span(),
                    ops = ops.len(),
                    bytes = ops.iter().map(|op| op.document.to_string().len()).sum::<usize>(),
                    "bulk request failed: {err}"
                );
            }
        }
    }

    /// Flushes the remainder with the configured refresh policy and restores
    /// the refresh interval. Returns `true` when every flush and the restore
    /// succeeded.
    pub async fn close(&mut self) -> Result<bool> {
        if self.batch.state != BulkState::Open {
            return Err(StoreError::NotInitialized("bulk writer is not open"));
        }
        self.flush(self.options.refresh).await;
        self.batch.state = BulkState::Closed;
        let restored = self
            .session
            .admin()
            .set_refresh(&self.options.restore_interval)
            .await;
        Ok(!self.batch.error && restored)
    }

    pub fn state(&self) -> BulkState {
        self.batch.state
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Operations handed to the store so far, failed items included.
    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn has_error(&self) -> bool {
        self.batch.error
    }

    pub fn failures(&self) -> &[BulkItemFailure] {
        &self.failures
    }
}

impl<T: Transport> Drop for BulkWriter<'_, T> {
    fn drop(&mut self) {
        if self.batch.state == BulkState::Open && !self.batch.is_empty() {
            tracing::warn!(
                parent: self.session.span(),
                pending = self.batch.len(),
                "bulk writer dropped without close; pending operations were not sent"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::session::testing::session;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::BulkOutcome;

    const MARCH_2023: i64 = 1_678_792_737;

    fn doc(n: u64) -> Value {
        json!({"n": n, "created": MARCH_2023})
    }

    fn options(capacity: usize) -> BulkOptions {
        BulkOptions {
            capacity,
            ..BulkOptions::default()
        }
    }

    #[tokio::test]
    async fn documents_within_capacity_go_in_one_request_in_order() {
        let session = session(MemoryTransport::new());
        let mut writer = session.open_bulk(options(5)).await.unwrap();
        for n in 0..5 {
            writer.append(doc(n), WriteAction::Index, None).await.unwrap();
        }
        assert!(session.transport().state().bulk_batches.is_empty());
        assert!(writer.close().await.unwrap());

        let state = session.transport().state();
        assert_eq!(state.bulk_batches.len(), 1);
        let ns: Vec<u64> = state.bulk_batches[0]
            .ops
            .iter()
            .map(|op| op.document["n"].as_u64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
        assert!(state.bulk_batches[0]
            .ops
            .iter()
            .all(|op| op.index == "ta-cst-src-2023-03"));
    }

    #[tokio::test]
    async fn overflow_flushes_full_batch_without_refresh() {
        let session = session(MemoryTransport::new());
        let mut writer = session
            .open_bulk(BulkOptions {
                capacity: 3,
                refresh: Some(Refresh::WaitFor),
                ..BulkOptions::default()
            })
            .await
            .unwrap();
        for n in 0..4 {
            writer.append(doc(n), WriteAction::Index, None).await.unwrap();
        }
        {
            let state = session.transport().state();
            assert_eq!(state.bulk_batches.len(), 1);
            assert_eq!(state.bulk_batches[0].ops.len(), 3);
            assert_eq!(state.bulk_batches[0].refresh, None);
        }
        assert_eq!(writer.pending(), 1);

        assert!(writer.close().await.unwrap());
        let state = session.transport().state();
        assert_eq!(state.bulk_batches.len(), 2);
        assert_eq!(state.bulk_batches[1].ops.len(), 1);
        assert_eq!(state.bulk_batches[1].refresh, Some(Refresh::WaitFor));
        assert_eq!(writer.sent(), 4);
    }

    #[tokio::test]
    async fn close_sends_ids_and_restores_refresh_interval() {
        let session = session(MemoryTransport::new());
        let mut writer = session
            .open_bulk(BulkOptions {
                refresh_interval: Some("-1".to_string()),
                ..BulkOptions::default()
            })
            .await
            .unwrap();
        for id in ["1", "2", "3"] {
            writer
                .append(doc(1), WriteAction::Index, Some(id.to_string()))
                .await
                .unwrap();
        }
        assert!(writer.close().await.unwrap());
        assert_eq!(writer.state(), BulkState::Closed);

        let state = session.transport().state();
        let ids: Vec<&str> = state.bulk_batches[0]
            .ops
            .iter()
            .filter_map(|op| op.id.as_deref())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(
            state.settings,
            vec![
                ("ta-cst-src-*".to_string(), "-1".to_string()),
                ("ta-cst-src-*".to_string(), "1s".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn append_requires_an_open_writer() {
        let session = session(MemoryTransport::new());
        let mut writer = session.bulk();
        assert!(matches!(
            writer.append(doc(0), WriteAction::Index, None).await,
            Err(StoreError::NotInitialized(_))
        ));

        writer.open(options(2)).await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.append(doc(0), WriteAction::Index, None).await,
            Err(StoreError::NotInitialized(_))
        ));
        assert!(matches!(writer.close().await, Err(StoreError::NotInitialized(_))));
    }

    #[tokio::test]
    async fn zero_capacity_is_rejected() {
        let session = session(MemoryTransport::new());
        let err = session.open_bulk(options(0)).await.err().unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn item_errors_fail_close_and_are_kept() {
        let transport = MemoryTransport::new();
        transport.state().bulk_results.push_back(Ok(BulkOutcome {
            items: 2,
            failures: vec![BulkItemFailure {
                index: "ta-cst-src-2023-03".to_string(),
                id: Some("2".to_string()),
                status: 400,
                reason: "mapper_parsing_exception".to_string(),
            }],
        }));
        let session = session(transport);
        let mut writer = session.open_bulk(options(10)).await.unwrap();
        writer.append(doc(1), WriteAction::Index, Some("1".to_string())).await.unwrap();
        writer.append(doc(2), WriteAction::Index, Some("2".to_string())).await.unwrap();

        assert!(!writer.close().await.unwrap());
        assert!(writer.has_error());
        assert_eq!(writer.failures().len(), 1);
        assert_eq!(writer.failures()[0].id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_not_raised() {
        let transport = MemoryTransport::new();
        transport.state().bulk_results.push_back(Err(StoreError::Transport {
            operation: "bulk",
            index: "_bulk".to_string(),
            status: Some(503),
            message: "unavailable".to_string(),
        }));
        let session = session(transport);
        let mut writer = session.open_bulk(options(1)).await.unwrap();
        writer.append(doc(1), WriteAction::Index, None).await.unwrap();
        writer.append(doc(2), WriteAction::Index, None).await.unwrap();
        assert_eq!(writer.pending(), 1);
        assert!(!writer.close().await.unwrap());
        assert_eq!(session.transport().state().bulk_batches.len(), 2);
    }

    #[tokio::test]
    async fn failed_restore_fails_close() {
        let session = session(MemoryTransport::new());
        let mut writer = session.open_bulk(options(10)).await.unwrap();
        writer.append(doc(1), WriteAction::Index, None).await.unwrap();
        session.transport().state().fail_settings = true;
        assert!(!writer.close().await.unwrap());
        assert!(!writer.has_error());
    }

    #[tokio::test]
    async fn close_without_pending_sends_nothing() {
        let session = session(MemoryTransport::new());
        let mut writer = session.open_bulk(options(10)).await.unwrap();
        assert!(writer.close().await.unwrap());
        assert!(session.transport().state().bulk_batches.is_empty());
    }

    #[tokio::test]
    async fn routing_needs_the_date_field() {
        let session = session(MemoryTransport::new());
        let mut writer = session.open_bulk(options(10)).await.unwrap();
        let err = writer
            .append(json!({"n": 1}), WriteAction::Index, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
        assert!(matches!(
            writer.append(doc(1), WriteAction::Delete, None).await,
            Err(StoreError::InvalidOperation(_))
        ));
        assert_eq!(writer.pending(), 0);
    }
}
