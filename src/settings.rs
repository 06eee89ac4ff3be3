use anyhow::Result;
use clap::{Args, Subcommand};
use dialoguer::console;
use serde_json::{json, Value};

use shardex::config::{self, StoreConfig};

use crate::args::BaseArgs;

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommands>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration and the files it came from
    Show,
}

pub fn run(base: BaseArgs, args: ConfigArgs) -> Result<()> {
    match args.command {
        None | Some(ConfigCommands::Show) => show(&base),
    }
}

/// Serialized config with connection passwords replaced.
fn redacted(config: &StoreConfig) -> Result<Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(Value::Object(connections)) = value.get_mut("connection") {
        for connection in connections.values_mut() {
            if let Some(usr) = connection.get_mut("usr").and_then(Value::as_array_mut) {
                if let Some(password) = usr.get_mut(1) {
                    *password = json!("********");
                }
            }
        }
    }
    Ok(value)
}

fn show(base: &BaseArgs) -> Result<()> {
    let config = config::load(base.config.as_deref())?;
    let sources = config::sources(base.config.as_deref());
    let value = redacted(&config)?;

    if base.json {
        println!(
            "{}",
            json!({
                "sources": sources.iter().map(|path| path.display().to_string()).collect::<Vec<_>>(),
                "config": value,
            })
        );
        return Ok(());
    }

    if sources.is_empty() {
        eprintln!("{}", console::style("No config files found").dim());
    }
    for path in &sources {
        eprintln!("{} {}", console::style("from").dim(), path.display());
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passwords_are_redacted() {
        let config: StoreConfig = serde_json::from_value(json!({
            "connection": {
                "current": "cloud",
                "cloud": {"client": "https://es.example.com", "usr": ["elastic", "secret"]}
            }
        }))
        .unwrap();
        let value = redacted(&config).unwrap();
        assert_eq!(value["connection"]["cloud"]["usr"], json!(["elastic", "********"]));
        assert_eq!(value["connection"]["current"], "cloud");
    }
}
