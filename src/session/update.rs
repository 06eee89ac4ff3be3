use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::Session;
use crate::error::{Result, StoreError};
use crate::transport::{Refresh, SeqPrimary, Transport};

/// A painless script setting some fields from `params` and removing others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateScript {
    update_fields: Vec<String>,
    delete_fields: Vec<String>,
}

impl UpdateScript {
    pub fn new<U, D>(update_fields: U, delete_fields: D) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        UpdateScript {
            update_fields: update_fields.into_iter().map(Into::into).collect(),
            delete_fields: delete_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn source(&self) -> String {
        self.update_fields
            .iter()
            .map(|field| format!("ctx._source.{field}=params['{field}']"))
            .chain(
                self.delete_fields
                    .iter()
                    .map(|field| format!("ctx._source.remove('{field}')")),
            )
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Every field set by the script must have a value.
    fn check_values(&self, name: &str, values: &Map<String, Value>) -> Result<()> {
        let missing: Vec<&str> = self
            .update_fields
            .iter()
            .filter(|field| !values.contains_key(field.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(StoreError::InvalidOperation(format!(
            "update '{name}' has no value for {}",
            missing.join(", ")
        )))
    }

    fn body(&self, values: &Map<String, Value>) -> Value {
        let mut script = json!({ "source": self.source(), "lang": "painless" });
        if !values.is_empty() {
            script["params"] = Value::Object(values.clone());
        }
        json!({ "script": script })
    }
}

/// Scripted partial updates through named [`UpdateScript`]s.
pub struct Updater<'a, T> {
    session: &'a Session<T>,
    scripts: BTreeMap<String, UpdateScript>,
}

impl<'a, T: Transport> Updater<'a, T> {
    pub(super) fn new(session: &'a Session<T>) -> Self {
        Updater {
            session,
            scripts: BTreeMap::new(),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, script: UpdateScript) -> &mut Self {
        self.scripts.insert(name.into(), script);
        self
    }

    pub fn script(&self, name: &str) -> Option<&UpdateScript> {
        self.scripts.get(name)
    }

    fn lookup(&self, name: &str, values: &Map<String, Value>) -> Result<&UpdateScript> {
        let script = self
            .scripts
            .get(name)
            .ok_or_else(|| StoreError::InvalidOperation(format!("no update script named '{name}'")))?;
        script.check_values(name, values)?;
        Ok(script)
    }

    /// Runs script `name` over every document matching `query` within the span
    /// of `epoch` (every span when absent) and returns the number updated.
    ///
    /// Fails with `PartialUpdate` when the store updated fewer documents than
    /// matched or timed out.
    pub async fn update_by_query(
        &self,
        name: &str,
        query: Option<&Value>,
        values: &Map<String, Value>,
        epoch: Option<i64>,
        refresh: Option<Refresh>,
    ) -> Result<u64> {
        let script = self.lookup(name, values)?;
        let index = self.session.identity().index_name(epoch)?;

        let mut body = script.body(values);
        if let Some(query) = query {
            body["query"] = query.clone();
        }
        let body = self.session.filtered(Some(&body))?;

        let outcome = self
            .session
            .transport()
            .execute_update_by_query(&index, &body, refresh)
            .await
            .inspect_err(|err| {
                tracing::error!(parent: self.session.span(), %index, name, body = %body, "update by query failed: {err}");
            })?;
        if outcome.updated < outcome.total || outcome.timed_out {
            tracing::error!(
                parent: self.session.span(),
                %index,
                name,
                updated = outcome.updated,
                total = outcome.total,
                timed_out = outcome.timed_out,
                "update by query incomplete"
            );
            return Err(StoreError::PartialUpdate {
                updated: outcome.updated,
                total: outcome.total,
            });
        }
        Ok(outcome.updated)
    }

    /// Runs script `name` on one document and returns the store's response.
    pub async fn update_by_id(
        &self,
        name: &str,
        id: &str,
        values: &Map<String, Value>,
        epoch: Option<i64>,
        seq_primary: Option<SeqPrimary>,
        refresh: Option<Refresh>,
    ) -> Result<Value> {
        let identity = self.session.identity();
        if identity.span_type().is_timed() && epoch.is_none() {
            return Err(StoreError::InvalidOperation(format!(
                "updating {id} in a {} span requires an epoch",
                identity.span_type()
            )));
        }
        let script = self.lookup(name, values)?;
        let index = identity.index_name(epoch)?;
        let body = script.body(values);

        match self
            .session
            .transport()
            .execute_update(&index, id, &body, seq_primary, refresh)
            .await
        {
            Ok(response) => Ok(response),
            Err(err) if err.is_version_conflict() => {
                tracing::warn!(parent: self.session.span(), %index, id, ?seq_primary, "version conflict on update");
                Err(err)
            }
            Err(err) => {
                tracing::error!(parent: self.session.span(), %index, id, name, "update failed: {err}");
                Err(err)
            }
        }
    }
}
