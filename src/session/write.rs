use serde_json::Value;

use super::Session;
use crate::error::{Result, StoreError};
use crate::transport::{Refresh, SeqPrimary, Transport, WriteAction, WriteRequest};

pub struct Writer<'a, T> {
    session: &'a Session<T>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Store-assigned when absent.
    pub id: Option<String>,
    /// Reject the write unless the stored copy still carries this seq/term.
    pub seq_primary: Option<SeqPrimary>,
    /// Span to write into; read from the document's date field when absent.
    pub epoch: Option<i64>,
    pub refresh: Option<Refresh>,
    pub action: WriteAction,
}

impl SaveOptions {
    pub fn with_id(id: impl Into<String>) -> Self {
        SaveOptions {
            id: Some(id.into()),
            ..SaveOptions::default()
        }
    }
}

impl<'a, T: Transport> Writer<'a, T> {
    pub(super) fn new(session: &'a Session<T>) -> Self {
        Writer { session }
    }

    /// Stores `document` with the session's ambient terms stamped into it and
    /// returns its id.
    pub async fn save(&self, document: &Value, options: SaveOptions) -> Result<String> {
        if !document.is_object() {
            return Err(StoreError::format(
                "document",
                document.to_string(),
                "expected a JSON object",
            ));
        }
        if matches!(options.action, WriteAction::Update | WriteAction::Delete) {
            return Err(StoreError::InvalidOperation(format!(
                "save cannot perform a '{}' action",
                options.action.as_str()
            )));
        }

        let identity = self.session.identity();
        let mut document = document.clone();
        self.session.terms().stamp(&mut document);
        let index = match options.epoch {
            Some(epoch) => identity.index_name(Some(epoch))?,
            None => identity.index_for(&document)?,
        };

        let request = WriteRequest {
            index: &index,
            action: options.action,
            id: options.id.as_deref(),
            document: &document,
            seq_primary: options.seq_primary,
            refresh: options.refresh,
        };
        match self.session.transport().execute_write(request).await {
            Ok(outcome) => {
                tracing::debug!(parent: self.session.span(), %index, id = %outcome.id, result = %outcome.result, "saved document");
                Ok(outcome.id)
            }
            Err(err) if err.is_version_conflict() => {
                tracing::warn!(parent: self.session.span(), %index, id = ?options.id, "version conflict on save");
                Err(err)
            }
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, bytes = document.to_string().len(), "save failed: {err}");
                Err(err)
            }
        }
    }

    /// Deletes the document `id` from the span selected by `epoch`.
    /// Returns `false` when there was nothing to delete.
    pub async fn delete(&self, id: &str, epoch: Option<i64>, refresh: Option<Refresh>) -> Result<bool> {
        let identity = self.session.identity();
        if identity.span_type().is_timed() && epoch.is_none() {
            return Err(StoreError::InvalidOperation(format!(
                "deleting {id} from a {} span requires an epoch",
                identity.span_type()
            )));
        }
        let index = identity.index_name(epoch)?;
        match self.session.transport().delete_document(&index, id, refresh).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => {
                tracing::warn!(parent: self.session.span(), %index, id, "nothing to delete");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::filter::TermFilter;
    use crate::session::testing::session;
    use crate::transport::memory::MemoryTransport;

    const MARCH_2023: i64 = 1_678_792_737;

    #[tokio::test]
    async fn save_routes_by_date_field_and_stamps_terms() {
        let session = session(MemoryTransport::new()).with_terms(TermFilter::new().with("tenant", "acme"));
        let doc = json!({"name": "John", "created": MARCH_2023});

        let id = session
            .writer()
            .save(&doc, SaveOptions::with_id("1"))
            .await
            .unwrap();
        assert_eq!(id, "1");

        let state = session.transport().state();
        let (index, written_id, written) = &state.writes[0];
        assert_eq!(index, "ta-cst-src-2023-03");
        assert_eq!(written_id.as_deref(), Some("1"));
        assert_eq!(written["tenant"], "acme");
        assert_eq!(doc.get("tenant"), None);
    }

    #[tokio::test]
    async fn save_without_date_needs_an_epoch() {
        let session = session(MemoryTransport::new());
        let writer = session.writer();
        let doc = json!({"name": "John"});

        let err = writer.save(&doc, SaveOptions::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));

        let id = writer
            .save(
                &doc,
                SaveOptions {
                    epoch: Some(MARCH_2023),
                    ..SaveOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(id, "auto-1");
    }

    #[tokio::test]
    async fn stale_seq_primary_is_a_version_conflict() {
        let transport = MemoryTransport::new();
        transport.insert_document("ta-cst-src-2023-03", "1", json!({"name": "John"}), 5, 3);
        let session = session(transport);
        let doc = json!({"name": "Jane", "created": MARCH_2023});

        let err = session
            .writer()
            .save(
                &doc,
                SaveOptions {
                    id: Some("1".to_string()),
                    seq_primary: Some(SeqPrimary::new(4, 3)),
                    ..SaveOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());

        session
            .writer()
            .save(
                &doc,
                SaveOptions {
                    id: Some("1".to_string()),
                    seq_primary: Some(SeqPrimary::new(5, 3)),
                    ..SaveOptions::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_reports_missing_documents() {
        let transport = MemoryTransport::new();
        transport.insert_document("ta-cst-src-2023-03", "1", json!({}), 0, 1);
        let session = session(transport);
        let writer = session.writer();

        assert!(writer.delete("1", Some(MARCH_2023), None).await.unwrap());
        assert!(!writer.delete("1", Some(MARCH_2023), None).await.unwrap());
        assert!(matches!(
            writer.delete("1", None, None).await,
            Err(StoreError::InvalidOperation(_))
        ));
    }
}
