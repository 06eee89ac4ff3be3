use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of the global and local ones (or via SHARDEX_CONFIG)
    #[arg(long, env = "SHARDEX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Named connection from the config (or via SHARDEX_CONNECTION)
    #[arg(long, env = "SHARDEX_CONNECTION", global = true)]
    pub connection: Option<String>,

    /// Store url, overriding the configured connection (or via SHARDEX_URL)
    #[arg(long, env = "SHARDEX_URL", hide_env_values = true, global = true)]
    pub url: Option<String>,

    /// Index key from the config (or via SHARDEX_INDEX)
    #[arg(short = 'i', long, env = "SHARDEX_INDEX", global = true)]
    pub index: Option<String>,

    /// Override the configured source (or via SHARDEX_SOURCE)
    #[arg(short = 's', long, env = "SHARDEX_SOURCE", global = true)]
    pub source: Option<String>,

    /// Restrict every query to documents where FIELD equals VALUE (repeatable)
    #[arg(long = "term", value_name = "FIELD=VALUE", global = true)]
    pub terms: Vec<String>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "SHARDEX_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}

/// Splits `field=value`; the value is read as JSON when it parses (numbers,
/// booleans) and as a plain string otherwise.
pub fn parse_term(term: &str) -> Result<(String, Value)> {
    let Some((field, value)) = term.split_once('=') else {
        bail!("invalid --term '{term}': expected FIELD=VALUE");
    };
    let field = field.trim();
    if field.is_empty() {
        bail!("invalid --term '{term}': field name is empty");
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed @ (Value::Number(_) | Value::Bool(_) | Value::String(_))) => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok((field.to_string(), value))
}

/// Parses a `--query` clause and wraps it into a search body.
pub fn query_body(query: Option<&str>) -> Result<Option<Value>> {
    let Some(query) = query else {
        return Ok(None);
    };
    let clause: Value = serde_json::from_str(query).context("--query must be valid JSON")?;
    if !clause.is_object() {
        bail!("--query must be a JSON object");
    }
    Ok(Some(serde_json::json!({ "query": clause })))
}
