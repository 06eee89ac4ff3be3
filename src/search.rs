use std::fmt::Write as _;

use anyhow::{anyhow, Result};
use clap::Args;
use dialoguer::console;
use serde_json::{json, Value};

use crate::args::{query_body, BaseArgs};
use crate::connect::connect;
use crate::ui::{apply_column_padding, header, styled_table, truncate, with_spinner};

#[derive(Debug, Clone, Args)]
pub struct CountArgs {
    /// Query clause as JSON, e.g. '{"term": {"name": "John"}}'
    #[arg(long, short = 'q')]
    query: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Query clause as JSON
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Number of hits to return
    #[arg(long, default_value_t = 10)]
    size: usize,
}

#[derive(Debug, Clone, Args)]
pub struct BucketsArgs {
    /// Field to aggregate on
    field: String,

    /// Query clause as JSON
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Maximum number of buckets (defaults to max_buckets from the config)
    #[arg(long)]
    max: Option<usize>,
}

#[derive(Debug, Clone, Args)]
pub struct GetArgs {
    /// Document id
    id: String,

    /// Epoch seconds of the document's date; searches every span when omitted
    #[arg(long, allow_hyphen_values = true)]
    epoch: Option<i64>,
}

pub async fn count(base: BaseArgs, args: CountArgs) -> Result<()> {
    let session = connect(&base)?;
    let body = query_body(args.query.as_deref())?;
    let count = with_spinner("Counting...", session.reader().count(body.as_ref())).await?;
    if base.json {
        println!("{}", json!({ "count": count }));
    } else {
        println!("{count}");
    }
    Ok(())
}

pub async fn query(base: BaseArgs, args: QueryArgs) -> Result<()> {
    let session = connect(&base)?;
    let mut body = query_body(args.query.as_deref())?.unwrap_or_else(|| json!({}));
    body["size"] = json!(args.size);
    let (hits, total) = with_spinner("Searching...", session.reader().query(Some(&body))).await?;

    if base.json {
        for hit in &hits {
            println!("{}", serde_json::to_string(hit)?);
        }
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} of {} hits\n",
        console::style(hits.len()),
        console::style(total).bold()
    )?;
    let mut table = styled_table();
    table.set_header(vec![header("Id"), header("Index"), header("Source")]);
    apply_column_padding(&mut table, (0, 4));
    for hit in &hits {
        let source = hit
            .source
            .as_ref()
            .map(|source| truncate(&source.to_string(), 80))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![hit.id.as_str(), hit.index.as_str(), source.as_str()]);
    }
    write!(output, "{table}")?;
    println!("{output}");
    Ok(())
}

pub async fn buckets(base: BaseArgs, args: BucketsArgs) -> Result<()> {
    let session = connect(&base)?;
    let query = query_body(args.query.as_deref())?.and_then(|body| body.get("query").cloned());
    let buckets = with_spinner(
        "Aggregating...",
        session.reader().buckets(&args.field, query.as_ref(), args.max),
    )
    .await?;

    if base.json {
        println!("{}", serde_json::to_string(&buckets)?);
        return Ok(());
    }

    let mut rows: Vec<(&String, &u64)> = buckets.counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let mut table = styled_table();
    table.set_header(vec![header(&args.field), header("Count")]);
    apply_column_padding(&mut table, (0, 4));
    for (key, count) in rows {
        table.add_row(vec![key.clone(), count.to_string()]);
    }
    println!("{table}");
    if buckets.other > 0 {
        println!(
            "\n{} more documents in other buckets",
            console::style(buckets.other).yellow()
        );
    }
    Ok(())
}

pub async fn get(base: BaseArgs, args: GetArgs) -> Result<()> {
    let session = connect(&base)?;
    let document = with_spinner("Loading document...", session.reader().get(&args.id, args.epoch))
        .await?
        .ok_or_else(|| anyhow!("document '{}' not found", args.id))?;

    if base.json {
        println!("{}", serde_json::to_string(&document)?);
    } else {
        println!("{} {}", console::style(&document.index).dim(), document.id);
        if let (Some(seq_no), Some(term)) = (document.seq_no, document.primary_term) {
            println!("{}", console::style(format!("seq_no {seq_no} primary_term {term}")).dim());
        }
        println!("{}", serde_json::to_string_pretty(&document.source).unwrap_or_else(|_| Value::Null.to_string()));
    }
    Ok(())
}
