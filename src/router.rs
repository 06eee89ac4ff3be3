//! Index naming: `prefix-stub-source-span`.
//!
//! `prefix-stub` is shared by every index of one logical type (and is what an
//! index template would match), `source` separates data sets and `span` is the
//! time bucket from [`crate::span`].

use chrono::TimeZone;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::span::{self, SpanType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexIdentity {
    prefix: String,
    stub: String,
    source: String,
    span_type: SpanType,
    date_field: Option<String>,
}

impl IndexIdentity {
    pub fn new(
        prefix: impl Into<String>,
        stub: impl Into<String>,
        source: impl Into<String>,
        span_type: SpanType,
        date_field: Option<String>,
    ) -> Result<Self> {
        let identity = IndexIdentity {
            prefix: prefix.into(),
            stub: stub.into(),
            source: source.into(),
            span_type,
            date_field: date_field.filter(|field| !field.trim().is_empty()),
        };

        for (name, value) in [
            ("prefix", &identity.prefix),
            ("stub", &identity.stub),
            ("source", &identity.source),
        ] {
            validate_component(name, value)?;
        }
        if span_type.is_timed() && identity.date_field.is_none() {
            return Err(StoreError::Configuration(format!(
                "date field must be set for index {}-{} of span type {span_type}",
                identity.prefix, identity.stub
            )));
        }
        Ok(identity)
    }

    /// Same index family, different data set.
    pub fn with_source(&self, source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        validate_component("source", &source)?;
        Ok(IndexIdentity {
            source,
            ..self.clone()
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn stub(&self) -> &str {
        &self.stub
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn span_type(&self) -> SpanType {
        self.span_type
    }

    pub fn date_field(&self) -> Option<&str> {
        self.date_field.as_deref()
    }

    pub fn index_name(&self, epoch: Option<i64>) -> Result<String> {
        Ok(self.compose(span::label(self.span_type, epoch)?.as_str()))
    }

    pub fn index_name_in<Tz: TimeZone>(&self, tz: &Tz, epoch: Option<i64>) -> Result<String> {
        Ok(self.compose(span::label_in(tz, self.span_type, epoch)?.as_str()))
    }

    /// Name addressing every span of this identity (`...-*`, or `...-all`).
    pub fn pattern(&self) -> String {
        let span = if self.span_type.is_timed() {
            span::SPAN_WILDCARD
        } else {
            span::SPAN_ALL
        };
        self.compose(span)
    }

    /// Index a document belongs to, derived from its date field.
    pub fn index_for(&self, document: &Value) -> Result<String> {
        self.index_name(self.epoch_of(document)?)
    }

    /// Reads the epoch used for routing from `document`.
    ///
    /// Returns `Ok(None)` for untimed identities. A timed identity requires the
    /// date field to hold epoch seconds, as a number or a numeric string.
    pub fn epoch_of(&self, document: &Value) -> Result<Option<i64>> {
        let Some(field) = self.date_field.as_deref() else {
            return Ok(None);
        };
        if !self.span_type.is_timed() {
            return Ok(None);
        }

        let value = document.get(field).ok_or_else(|| {
            StoreError::InvalidOperation(format!(
                "document has no '{field}' field required to route it to a {} span",
                self.span_type
            ))
        })?;
        let epoch = match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_f64().map(|f| f.trunc() as i64)),
            Value::String(text) => text.trim().parse::<i64>().ok(),
            _ => None,
        };
        epoch.map(Some).ok_or_else(|| {
            StoreError::InvalidOperation(format!(
                "field '{field}' must hold epoch seconds, found {value}"
            ))
        })
    }

    fn compose(&self, span: &str) -> String {
        format!("{}-{}-{}-{span}", self.prefix, self.stub, self.source)
    }
}

fn validate_component(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::Configuration(format!("index {name} must not be empty")));
    }
    if value.contains('*') || value.contains(',') || value.contains('/') {
        return Err(StoreError::Configuration(format!(
            "index {name} '{value}' must not contain '*', ',' or '/'"
        )));
    }
    Ok(())
}
