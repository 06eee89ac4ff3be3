use anyhow::{bail, Context, Result};

use shardex::config::{self, StoreConfig};
use shardex::{ApiClient, ClientOptions, IndexIdentity, Session, SessionSettings, TermFilter};

use crate::args::{parse_term, BaseArgs};

/// Configuration resolved from files, env and flags; no network involved.
pub struct StoreContext {
    pub config: StoreConfig,
    pub index_key: String,
    pub identity: IndexIdentity,
    pub settings: SessionSettings,
}

pub fn resolve_context(base: &BaseArgs) -> Result<StoreContext> {
    let config = config::load(base.config.as_deref())?;
    let index_key = match &base.index {
        Some(key) => key.clone(),
        None => match config.indexes.keys().collect::<Vec<_>>().as_slice() {
            [only] => (*only).clone(),
            [] => bail!("no indexes configured; add an \"indexes\" section to the config"),
            keys => bail!(
                "--index required (or set SHARDEX_INDEX); configured: {}",
                keys.iter().map(|key| key.as_str()).collect::<Vec<_>>().join(", ")
            ),
        },
    };
    let identity = config
        .identity(&index_key, base.source.as_deref())
        .with_context(|| format!("invalid configuration for index '{index_key}'"))?;
    let settings = config.session_settings(Some(&index_key))?;
    Ok(StoreContext {
        config,
        index_key,
        identity,
        settings,
    })
}

pub fn client_options(base: &BaseArgs, config: &StoreConfig) -> Result<ClientOptions> {
    match &base.url {
        Some(url) => {
            let mut options = ClientOptions::new(url.clone());
            if let Ok(configured) = config.client_options(base.connection.as_deref()) {
                options.timeout = configured.timeout;
                options.headers = configured.headers;
            }
            Ok(options)
        }
        None => Ok(config
            .client_options(base.connection.as_deref())
            .context("no store connection configured (use --url or set SHARDEX_URL)")?),
    }
}

pub fn terms(base: &BaseArgs) -> Result<TermFilter> {
    base.terms
        .iter()
        .map(|term| parse_term(term))
        .collect::<Result<Vec<_>>>()
        .map(|pairs| pairs.into_iter().collect())
}

pub fn connect(base: &BaseArgs) -> Result<Session<ApiClient>> {
    let context = resolve_context(base)?;
    let client = ApiClient::new(&client_options(base, &context.config)?)?;
    tracing::debug!(url = client.base_url(), index = %context.identity.pattern(), "connecting");
    let span = tracing::info_span!(
        "session",
        index = %context.identity.pattern(),
        key = %context.index_key
    );
    Ok(Session::new(context.identity, client)
        .with_terms(terms(base)?)
        .with_settings(context.settings)
        .with_span(span))
}
