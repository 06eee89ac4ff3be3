use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use indicatif::ProgressBar;
use serde_json::{json, Value};

use shardex::transport::BulkItemFailure;
use shardex::{BulkOptions, BulkWriter, Refresh, Session, Transport, WriteAction};

use crate::args::{query_body, BaseArgs};
use crate::connect::connect;
use crate::ui::{print_command_status, progress_bar, CommandStatus};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RefreshArg {
    /// Refresh the affected shards immediately
    True,
    /// Wait until the next scheduled refresh
    WaitFor,
}

impl From<RefreshArg> for Refresh {
    fn from(value: RefreshArg) -> Self {
        match value {
            RefreshArg::True => Refresh::Immediate,
            RefreshArg::WaitFor => Refresh::WaitFor,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct PushArgs {
    /// NDJSON file with one document per line
    #[arg(long = "in", value_name = "FILE")]
    input: PathBuf,

    /// Use this document field as the document id
    #[arg(long)]
    id_field: Option<String>,

    /// Documents per bulk request (defaults to index_bulk from the config)
    #[arg(long)]
    bulk_size: Option<usize>,

    /// Refresh policy of the last bulk request
    #[arg(long, value_enum)]
    refresh: Option<RefreshArg>,

    /// Refresh interval while loading, e.g. -1 to pause refreshing
    #[arg(long, allow_hyphen_values = true)]
    load_interval: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct PullArgs {
    /// Query clause as JSON
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Output file (stdout when omitted)
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,

    /// Documents per scroll page (defaults to scroll_size from the config)
    #[arg(long)]
    page_size: Option<usize>,

    /// Write whole hits (index, id, source) instead of sources only
    #[arg(long)]
    hits: bool,
}

/// Parses one NDJSON line; `None` for blank lines.
fn parse_document(line: &str, origin: &str, line_no: usize) -> Result<Option<Value>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let document: Value =
        serde_json::from_str(line).with_context(|| format!("{origin}:{line_no}: invalid JSON"))?;
    if !document.is_object() {
        bail!("{origin}:{line_no}: expected a JSON object");
    }
    Ok(Some(document))
}

fn document_id(document: &Value, id_field: Option<&str>) -> Option<String> {
    match document.get(id_field?)? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Streams NDJSON documents into an open writer, one line at a time.
async fn append_documents<T: Transport>(
    writer: &mut BulkWriter<'_, T>,
    input: impl BufRead,
    origin: &str,
    id_field: Option<&str>,
    pb: &ProgressBar,
) -> Result<()> {
    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("failed to read {origin}"))?;
        let Some(document) = parse_document(&line, origin, line_no)? else {
            continue;
        };
        let id = document_id(&document, id_field);
        writer
            .append(document, WriteAction::Index, id)
            .await
            .with_context(|| format!("{origin}:{line_no}: document not indexed"))?;
        pb.inc(1);
    }
    Ok(())
}

struct PushReport {
    sent: usize,
    ok: bool,
    failures: Vec<BulkItemFailure>,
}

/// Loads `input` through a bulk writer. The writer is always closed, so
/// buffered documents are sent and the refresh interval is restored even when
/// a line is rejected.
async fn push_documents<T: Transport>(
    session: &Session<T>,
    options: BulkOptions,
    input: impl BufRead,
    origin: &str,
    id_field: Option<&str>,
    pb: &ProgressBar,
) -> Result<PushReport> {
    let mut writer = session.open_bulk(options).await?;
    let appended = append_documents(&mut writer, input, origin, id_field, pb).await;
    let closed = writer.close().await;
    if let Err(err) = appended {
        if writer.sent() > 0 {
            eprintln!("{} documents were indexed before the error", writer.sent());
        }
        return Err(err);
    }
    Ok(PushReport {
        sent: writer.sent(),
        ok: closed?,
        failures: writer.failures().to_vec(),
    })
}

pub async fn push(base: BaseArgs, args: PushArgs) -> Result<()> {
    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let session = connect(&base)?;

    let mut options = session.bulk_options();
    if let Some(bulk_size) = args.bulk_size {
        options.capacity = bulk_size;
    }
    let options = BulkOptions {
        refresh: args.refresh.map(Refresh::from),
        refresh_interval: args.load_interval.clone(),
        ..options
    };

    let pb = progress_bar(None, "Indexing");
    let report = push_documents(
        &session,
        options,
        BufReader::new(file),
        &args.input.display().to_string(),
        args.id_field.as_deref(),
        &pb,
    )
    .await;
    pb.finish_and_clear();
    let report = report?;

    if base.json {
        println!(
            "{}",
            json!({
                "sent": report.sent,
                "failed": report.failures.len(),
                "ok": report.ok,
            })
        );
    }
    if report.ok {
        print_command_status(
            CommandStatus::Success,
            &format!("Indexed {} documents into {}", report.sent, session.identity().pattern()),
        );
        return Ok(());
    }

    for failure in report.failures.iter().take(10) {
        print_command_status(
            CommandStatus::Error,
            &format!(
                "{} {}: {} ({})",
                failure.index,
                failure.id.as_deref().unwrap_or("-"),
                failure.reason,
                failure.status
            ),
        );
    }
    if report.failures.len() > 10 {
        eprintln!("... and {} more", report.failures.len() - 10);
    }
    bail!("bulk load finished with errors ({} failed documents)", report.failures.len())
}

pub async fn pull(base: BaseArgs, args: PullArgs) -> Result<()> {
    let session = connect(&base)?;
    let body = query_body(args.query.as_deref())?;
    let mut options = shardex::ScrollOptions {
        page_size: session.settings().scroll_size,
        keep_alive: session.settings().keep_alive,
    };
    if let Some(page_size) = args.page_size {
        options.page_size = page_size;
    }

    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut cursor = session.scroll_with(body.as_ref(), options)?;
    let total = cursor.total().await.ok();
    let pb = progress_bar(total, "Pulling");
    let mut written = 0u64;
    let drained: Result<()> = async {
        while let Some(hit) = cursor.next().await? {
            let line = if args.hits {
                serde_json::to_string(&hit)?
            } else {
                serde_json::to_string(&hit.source.unwrap_or(Value::Null))?
            };
            writeln!(out, "{line}")?;
            written += 1;
            pb.inc(1);
        }
        Ok(())
    }
    .await;
    cursor.close().await;
    pb.finish_and_clear();
    drained?;
    out.flush()?;

    if let Some(path) = &args.out {
        print_command_status(
            CommandStatus::Success,
            &format!("Wrote {written} documents to {}", path.display()),
        );
    }
    Ok(())
}
