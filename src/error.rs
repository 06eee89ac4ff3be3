//! Error taxonomy shared by the router, the session handles and the transport.

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Invalid configuration or identity; raised at construction time.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed {kind} '{value}': {reason}")]
    Format {
        kind: &'static str,
        value: String,
        reason: String,
    },

    /// A bulk writer or scroll cursor used outside its open lifetime.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Optimistic-concurrency mismatch on a single document write.
    #[error("version conflict writing document '{id}' in {index}")]
    VersionConflict { index: String, id: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{operation} on {index} failed{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        operation: &'static str,
        index: String,
        status: Option<u16>,
        message: String,
    },

    #[error("update incomplete: {updated} of {total} documents updated")]
    PartialUpdate { updated: u64, total: u64 },

    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    pub fn format(kind: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Format {
            kind,
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        StoreError::NotFound { what: what.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}
