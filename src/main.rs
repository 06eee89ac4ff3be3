use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use tracing_subscriber::EnvFilter;

mod args;
mod connect;
mod env;
mod indexes;
mod search;
mod settings;
mod sync;
mod ui;

use crate::args::{BaseArgs, CLIArgs};

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("SHARDEX_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "shardex",
    about = "Time-sharded indexes on Elasticsearch",
    version = CLI_VERSION
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve, list and manage span indexes
    Index(CLIArgs<indexes::IndexArgs>),
    /// Count matching documents
    Count(CLIArgs<search::CountArgs>),
    /// Search across every span
    Query(CLIArgs<search::QueryArgs>),
    /// Document counts per distinct value of a field
    Buckets(CLIArgs<search::BucketsArgs>),
    /// Fetch one document by id
    Get(CLIArgs<search::GetArgs>),
    /// Bulk-load NDJSON documents into their span indexes
    Push(CLIArgs<sync::PushArgs>),
    /// Export matching documents as NDJSON
    Pull(CLIArgs<sync::PullArgs>),
    /// Inspect configuration
    Config(CLIArgs<settings::ConfigArgs>),
}

impl Commands {
    fn base(&self) -> &BaseArgs {
        match self {
            Commands::Index(cmd) => &cmd.base,
            Commands::Count(cmd) => &cmd.base,
            Commands::Query(cmd) => &cmd.base,
            Commands::Buckets(cmd) => &cmd.base,
            Commands::Get(cmd) => &cmd.base,
            Commands::Push(cmd) => &cmd.base,
            Commands::Pull(cmd) => &cmd.base,
            Commands::Config(cmd) => &cmd.base,
        }
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `-v`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let env_files = env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);
    init_logging(cli.command.base().verbose);
    for path in &env_files {
        tracing::debug!(path = %path.display(), "loaded env file");
    }

    match cli.command {
        Commands::Index(cmd) => indexes::run(cmd.base, cmd.args).await?,
        Commands::Count(cmd) => search::count(cmd.base, cmd.args).await?,
        Commands::Query(cmd) => search::query(cmd.base, cmd.args).await?,
        Commands::Buckets(cmd) => search::buckets(cmd.base, cmd.args).await?,
        Commands::Get(cmd) => search::get(cmd.base, cmd.args).await?,
        Commands::Push(cmd) => sync::push(cmd.base, cmd.args).await?,
        Commands::Pull(cmd) => sync::pull(cmd.base, cmd.args).await?,
        Commands::Config(cmd) => settings::run(cmd.base, cmd.args)?,
    }

    Ok(())
}
