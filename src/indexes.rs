use std::fmt::Write as _;

use anyhow::{bail, Result};
use chrono::{Local, TimeZone};
use clap::{Args, Subcommand};
use dialoguer::{console, Confirm};
use serde_json::json;

use shardex::span::{span_end, span_start};

use crate::args::BaseArgs;
use crate::connect::{connect, resolve_context};
use crate::ui::{
    apply_column_padding, header, is_interactive, print_command_status, styled_table, with_spinner,
    CommandStatus,
};

#[derive(Debug, Clone, Args)]
pub struct IndexArgs {
    #[command(subcommand)]
    command: IndexCommands,
}

#[derive(Debug, Clone, Subcommand)]
enum IndexCommands {
    /// Print the index a document dated EPOCH belongs to (the pattern without one)
    Name {
        /// Epoch seconds
        #[arg(long, allow_hyphen_values = true)]
        epoch: Option<i64>,
    },
    /// Print the time range covered by a span label such as 2023-03 or 2023-2
    Bounds {
        label: String,
    },
    /// List existing span indexes
    List,
    /// Delete span indexes (all of them when no names are given)
    Delete {
        names: Vec<String>,
        /// Skip confirmation
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Set the refresh interval on every span (e.g. 1s, or -1 to disable)
    Refresh {
        #[arg(allow_hyphen_values = true)]
        period: String,
    },
}

pub async fn run(base: BaseArgs, args: IndexArgs) -> Result<()> {
    match args.command {
        IndexCommands::Name { epoch } => name(&base, epoch),
        IndexCommands::Bounds { label } => bounds(&base, &label),
        IndexCommands::List => list(&base).await,
        IndexCommands::Delete { names, force } => delete(&base, names, force).await,
        IndexCommands::Refresh { period } => refresh(&base, &period).await,
    }
}

fn name(base: &BaseArgs, epoch: Option<i64>) -> Result<()> {
    let context = resolve_context(base)?;
    let index = context.identity.index_name(epoch)?;
    if base.json {
        println!("{}", json!({ "index": index }));
    } else {
        println!("{index}");
    }
    Ok(())
}

fn bounds(base: &BaseArgs, label: &str) -> Result<()> {
    let context = resolve_context(base)?;
    let span_type = context.identity.span_type();
    let start = span_start(span_type, label)?;
    let end = span_end(span_type, label)?;

    if base.json {
        println!("{}", json!({ "label": label, "start": start, "end": end }));
        return Ok(());
    }
    match (start, end) {
        (Some(start), Some(end)) => {
            println!("start {start} {}", local_time(start));
            println!("end   {end} {}", local_time(end));
        }
        _ => println!("span type {span_type} has no time bounds"),
    }
    Ok(())
}

fn local_time(epoch: i64) -> String {
    Local
        .timestamp_opt(epoch, 0)
        .single()
        .map(|time| time.to_rfc3339())
        .unwrap_or_default()
}

async fn list(base: &BaseArgs) -> Result<()> {
    let session = connect(base)?;
    let names = with_spinner("Listing indexes...", session.admin().list()).await?;

    if base.json {
        println!("{}", serde_json::to_string(&names)?);
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} indexes match {}\n",
        console::style(names.len()),
        console::style(session.identity().pattern()).bold()
    )?;
    let mut table = styled_table();
    table.set_header(vec![header("Index")]);
    apply_column_padding(&mut table, (0, 6));
    for name in &names {
        table.add_row(vec![name]);
    }
    write!(output, "{table}")?;
    println!("{output}");
    Ok(())
}

async fn delete(base: &BaseArgs, names: Vec<String>, force: bool) -> Result<()> {
    let session = connect(base)?;
    let admin = session.admin();
    let targets = if names.is_empty() {
        with_spinner("Listing indexes...", admin.list()).await?
    } else {
        names
    };
    if targets.is_empty() {
        print_command_status(CommandStatus::Warning, "No indexes to delete");
        return Ok(());
    }

    if !force {
        if !is_interactive() {
            bail!("refusing to delete {} index(es) without --force", targets.len());
        }
        let confirm = Confirm::new()
            .with_prompt(format!("Delete {}?", targets.join(", ")))
            .default(false)
            .interact()?;
        if !confirm {
            return Ok(());
        }
    }

    let ok = with_spinner("Deleting indexes...", admin.delete(&targets)).await?;
    if base.json {
        println!("{}", json!({ "deleted": &targets, "ok": ok }));
    }
    if ok {
        print_command_status(
            CommandStatus::Success,
            &format!("Deleted {} index(es)", targets.len()),
        );
        Ok(())
    } else {
        print_command_status(CommandStatus::Error, "Some indexes were not deleted");
        bail!("index deletion failed")
    }
}

async fn refresh(base: &BaseArgs, period: &str) -> Result<()> {
    let session = connect(base)?;
    let pattern = session.identity().pattern();
    if with_spinner("Updating settings...", session.admin().set_refresh(period)).await {
        print_command_status(
            CommandStatus::Success,
            &format!("Refresh interval of {pattern} set to {period}"),
        );
        Ok(())
    } else {
        bail!("failed to set the refresh interval of {pattern}")
    }
}
