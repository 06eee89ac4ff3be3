//! A session binds one index identity, its ambient term filter and a
//! transport. Capabilities are handed out as short-lived handles that borrow
//! the session: [`Reader`], [`Writer`], [`Updater`], [`IndexAdmin`],
//! [`ScrollCursor`] and [`BulkWriter`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Span;

use crate::bulk::{BulkOptions, BulkWriter};
use crate::error::Result;
use crate::filter::TermFilter;
use crate::router::IndexIdentity;
use crate::scroll::{ScrollCursor, ScrollOptions};
use crate::transport::Transport;

mod admin;
mod read;
mod update;
mod write;

pub use admin::IndexAdmin;
pub use read::{more_like_this, Buckets, MoreLikeThis, Reader};
pub use update::{UpdateScript, Updater};
pub use write::{SaveOptions, Writer};

pub const DEFAULT_SCROLL_SIZE: usize = 100;
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(10);
pub const DEFAULT_BULK_SIZE: usize = 1000;
pub const DEFAULT_MAX_BUCKETS: usize = 99;
pub const DEFAULT_REFRESH_INTERVAL: &str = "1s";

/// Tunables shared by the handles of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub scroll_size: usize,
    pub keep_alive: Duration,
    pub bulk_size: usize,
    pub max_buckets: usize,
    /// Refresh interval restored when a bulk load closes.
    pub refresh_interval: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            scroll_size: DEFAULT_SCROLL_SIZE,
            keep_alive: DEFAULT_KEEP_ALIVE,
            bulk_size: DEFAULT_BULK_SIZE,
            max_buckets: DEFAULT_MAX_BUCKETS,
            refresh_interval: DEFAULT_REFRESH_INTERVAL.to_string(),
        }
    }
}

pub struct Session<T> {
    identity: Arc<IndexIdentity>,
    transport: T,
    terms: TermFilter,
    settings: SessionSettings,
    span: Span,
}

impl<T: Transport> Session<T> {
    pub fn new(identity: impl Into<Arc<IndexIdentity>>, transport: T) -> Self {
        let identity = identity.into();
        let span = tracing::info_span!("session", index = %identity.pattern());
        Session {
            identity,
            transport,
            terms: TermFilter::new(),
            settings: SessionSettings::default(),
            span,
        }
    }

    /// Restricts every query of this session to documents matching `terms`.
    pub fn with_terms(mut self, terms: TermFilter) -> Self {
        self.terms = terms;
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Parent span for every event this session and its handles emit.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn identity(&self) -> &IndexIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn terms(&self) -> &TermFilter {
        &self.terms
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn reader(&self) -> Reader<'_, T> {
        Reader::new(self)
    }

    pub fn writer(&self) -> Writer<'_, T> {
        Writer::new(self)
    }

    pub fn updater(&self) -> Updater<'_, T> {
        Updater::new(self)
    }

    pub fn admin(&self) -> IndexAdmin<'_, T> {
        IndexAdmin::new(self)
    }

    /// Scroll over the documents matching `body` using the session's page
    /// size and keep-alive.
    pub fn scroll(&self, body: Option<&Value>) -> Result<ScrollCursor<'_, T>> {
        self.scroll_with(
            body,
            ScrollOptions {
                page_size: self.settings.scroll_size,
                keep_alive: self.settings.keep_alive,
            },
        )
    }

    pub fn scroll_with(&self, body: Option<&Value>, options: ScrollOptions) -> Result<ScrollCursor<'_, T>> {
        ScrollCursor::open(self, body, options)
    }

    /// An unopened bulk writer; see [`BulkWriter::open`].
    pub fn bulk(&self) -> BulkWriter<'_, T> {
        BulkWriter::new(self)
    }

    pub async fn open_bulk(&self, options: BulkOptions) -> Result<BulkWriter<'_, T>> {
        let mut writer = BulkWriter::new(self);
        writer.open(options).await?;
        Ok(writer)
    }

    /// Default bulk options derived from the session settings.
    pub fn bulk_options(&self) -> BulkOptions {
        BulkOptions {
            capacity: self.settings.bulk_size,
            restore_interval: self.settings.refresh_interval.clone(),
            ..BulkOptions::default()
        }
    }

    pub(crate) fn filtered(&self, body: Option<&Value>) -> Result<Value> {
        let merged = self.terms.apply(body)?;
        if !self.terms.is_empty() {
            tracing::debug!(parent: &self.span, body = %merged, "applied ambient filter");
        }
        Ok(merged)
    }
}
