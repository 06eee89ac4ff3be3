//! Ambient term filters: an always-on equality restriction (tenant,
//! partition) merged into every query a session issues.

use serde_json::{json, Map, Value};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermFilter {
    terms: Vec<(String, Value)>,
}

impl TermFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the term for `field`, keeping first-insertion order.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.terms.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.terms.push((field, value)),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.terms.iter().map(|(field, value)| (field.as_str(), value))
    }

    /// `[{"term": {field: value}}, ...]`, one clause per entry.
    pub fn clauses(&self) -> Vec<Value> {
        self.terms
            .iter()
            .map(|(field, value)| json!({ "term": { field.as_str(): value } }))
            .collect()
    }

    /// The ambient restriction as a single filter object holding every clause.
    pub fn filter_object(&self) -> Value {
        json!({ "bool": { "filter": self.clauses() } })
    }

    /// Merges the ambient terms into `body`'s top-level `query`.
    ///
    /// The caller's body is never modified; everything besides `query` is
    /// copied through untouched.
    pub fn apply(&self, body: Option<&Value>) -> Result<Value> {
        let mut merged = match body {
            None => Value::Object(Map::new()),
            Some(value @ Value::Object(_)) => value.clone(),
            Some(other) => {
                return Err(StoreError::format(
                    "query body",
                    other.to_string(),
                    "expected a JSON object",
                ))
            }
        };
        if self.is_empty() {
            return Ok(merged);
        }

        let ambient = self.filter_object();
        let Value::Object(object) = &mut merged else {
            unreachable!("body is an object");
        };
        let query = object.remove("query").filter(|query| !is_blank(query));
        let new_query = match query {
            None => ambient,
            Some(Value::Object(mut query)) if query.contains_key("bool") => {
                append_filter(&mut query, ambient)?;
                Value::Object(query)
            }
            Some(query) => json!({
                "bool": {
                    "filter": [ambient],
                    "must": [query],
                }
            }),
        };
        object.insert("query".to_string(), new_query);
        Ok(merged)
    }

    /// Whether a stored `_source` satisfies every term, as a term query would:
    /// dotted fields address nested objects and an array matches when any
    /// element equals the value.
    pub fn matches(&self, source: &Value) -> bool {
        self.terms.iter().all(|(field, expected)| {
            let path = format!("/{}", field.replace('.', "/"));
            match source.pointer(&path) {
                Some(Value::Array(values)) => values.contains(expected),
                Some(value) => value == expected,
                None => false,
            }
        })
    }

    /// Writes the ambient terms into a document about to be saved.
    pub fn stamp(&self, document: &mut Value) {
        if let Value::Object(object) = document {
            for (field, value) in &self.terms {
                object.insert(field.clone(), value.clone());
            }
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for TermFilter {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut filter = TermFilter::new();
        for (field, value) in iter {
            filter.insert(field, value);
        }
        filter
    }
}

fn is_blank(query: &Value) -> bool {
    match query {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn append_filter(query: &mut Map<String, Value>, ambient: Value) -> Result<()> {
    if !query.get("bool").is_some_and(Value::is_object) {
        return Err(StoreError::format(
            "query body",
            Value::Object(query.clone()).to_string(),
            "'bool' must be an object",
        ));
    }
    let Some(Value::Object(boolean)) = query.get_mut("bool") else {
        unreachable!("checked above");
    };
    let filter = boolean
        .entry("filter")
        .or_insert_with(|| Value::Array(Vec::new()));
    match filter {
        Value::Array(clauses) => clauses.push(ambient),
        single => {
            let existing = single.take();
            *single = Value::Array(vec![existing, ambient]);
        }
    }
    Ok(())
}
