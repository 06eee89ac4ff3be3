//! Time-sharded index routing, buffered bulk ingestion and scroll pagination
//! over an Elasticsearch-compatible REST store.
//!
//! Documents of one logical type live in a family of indexes named
//! `prefix-stub-source-span`, where `span` is a calendar bucket derived from a
//! date field ([`span`], [`router`]). A [`session::Session`] binds one such
//! family to a [`transport::Transport`] and an optional ambient
//! [`filter::TermFilter`], and hands out the handles that do the work.

pub mod bulk;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod router;
pub mod scroll;
pub mod session;
pub mod span;
pub mod transport;

pub use bulk::{BulkOptions, BulkWriter};
pub use error::{Result, StoreError};
pub use filter::TermFilter;
pub use http::{ApiClient, ClientOptions};
pub use router::IndexIdentity;
pub use scroll::{ScrollCursor, ScrollOptions};
pub use session::{Session, SessionSettings};
pub use span::{SpanLabel, SpanType};
pub use transport::{Hit, Refresh, SeqPrimary, Transport, WriteAction};
