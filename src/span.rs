//! Calendar buckets used to split an index stream by time.
//!
//! A span label is derived from an epoch timestamp in local time and has one
//! of the forms `YYYY`, `YYYY-Q`, `YYYY-MM` or `YYYY-MM-DD`. Indexes that are
//! not split by time use the single label `all`; `*` addresses every bucket.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Local, LocalResult, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const SPAN_ALL: &str = "all";
pub const SPAN_WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SpanType {
    #[default]
    #[serde(rename = "n", alias = "none")]
    None,
    #[serde(rename = "d", alias = "daily")]
    Daily,
    #[serde(rename = "m", alias = "monthly")]
    Monthly,
    #[serde(rename = "q", alias = "quarterly")]
    Quarterly,
    #[serde(rename = "y", alias = "yearly")]
    Yearly,
}

impl SpanType {
    pub fn code(self) -> &'static str {
        match self {
            SpanType::None => "n",
            SpanType::Daily => "d",
            SpanType::Monthly => "m",
            SpanType::Quarterly => "q",
            SpanType::Yearly => "y",
        }
    }

    /// Whether documents of this span type need a date to pick their index.
    pub fn is_timed(self) -> bool {
        self != SpanType::None
    }
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for SpanType {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "n" | "none" => Ok(SpanType::None),
            "d" | "daily" => Ok(SpanType::Daily),
            "m" | "monthly" => Ok(SpanType::Monthly),
            "q" | "quarterly" => Ok(SpanType::Quarterly),
            "y" | "yearly" => Ok(SpanType::Yearly),
            other => Err(StoreError::Configuration(format!(
                "unknown span type '{other}' (expected one of n, d, m, q, y)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanLabel(String);

impl SpanLabel {
    pub fn all() -> Self {
        SpanLabel(SPAN_ALL.to_string())
    }

    pub fn wildcard() -> Self {
        SpanLabel(SPAN_WILDCARD.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == SPAN_WILDCARD
    }
}

impl fmt::Display for SpanLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SpanLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn label(span_type: SpanType, epoch: Option<i64>) -> Result<SpanLabel> {
    label_in(&Local, span_type, epoch)
}

pub fn label_in<Tz: TimeZone>(tz: &Tz, span_type: SpanType, epoch: Option<i64>) -> Result<SpanLabel> {
    if span_type == SpanType::None {
        return Ok(SpanLabel::all());
    }
    let Some(epoch) = epoch else {
        return Ok(SpanLabel::wildcard());
    };

    let date = tz
        .timestamp_opt(epoch, 0)
        .single()
        .ok_or_else(|| StoreError::format("epoch", epoch.to_string(), "outside the calendar range"))?
        .date_naive();

    let text = match span_type {
        SpanType::Yearly => format!("{:04}", date.year()),
        SpanType::Quarterly => format!("{:04}-{}", date.year(), (date.month() - 1) / 3 + 1),
        SpanType::Monthly => format!("{:04}-{:02}", date.year(), date.month()),
        SpanType::Daily => format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day()),
        SpanType::None => unreachable!("handled above"),
    };
    Ok(SpanLabel(text))
}

pub fn span_start(span_type: SpanType, label: &str) -> Result<Option<i64>> {
    span_start_in(&Local, span_type, label)
}

pub fn span_end(span_type: SpanType, label: &str) -> Result<Option<i64>> {
    span_end_in(&Local, span_type, label)
}

/// First instant of the bucket named by `label`.
pub fn span_start_in<Tz: TimeZone>(tz: &Tz, span_type: SpanType, label: &str) -> Result<Option<i64>> {
    let Some(first_day) = first_day(span_type, label)? else {
        return Ok(None);
    };
    local_midnight(tz, first_day).map(Some)
}

/// First instant of the bucket following the one named by `label`.
pub fn span_end_in<Tz: TimeZone>(tz: &Tz, span_type: SpanType, label: &str) -> Result<Option<i64>> {
    let Some(first_day) = first_day(span_type, label)? else {
        return Ok(None);
    };
    let next = match span_type {
        SpanType::Daily => first_day + Duration::days(1),
        SpanType::Monthly => {
            let (year, month) = next_month(first_day.year(), first_day.month());
            ymd(label, year, month, 1)?
        }
        SpanType::Quarterly => {
            let (year, month) = next_month(first_day.year(), first_day.month() + 2);
            ymd(label, year, month, 1)?
        }
        SpanType::Yearly => ymd(label, first_day.year() + 1, 1, 1)?,
        SpanType::None => return Ok(None),
    };
    local_midnight(tz, next).map(Some)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month < 12 {
        (year, month + 1)
    } else {
        (year + 1, 1)
    }
}

fn first_day(span_type: SpanType, label: &str) -> Result<Option<NaiveDate>> {
    // Digits per component, matching what `label` produces.
    let widths: &[usize] = match span_type {
        SpanType::None => return Ok(None),
        SpanType::Yearly => &[4],
        SpanType::Quarterly => &[4, 1],
        SpanType::Monthly => &[4, 2],
        SpanType::Daily => &[4, 2, 2],
    };
    let expected = widths.len();

    let parts: Vec<&str> = label.split('-').collect();
    if parts.len() != expected {
        return Err(StoreError::format(
            "span label",
            label,
            format!(
                "expected {expected} component(s) for span type {span_type}, found {}",
                parts.len()
            ),
        ));
    }
    let numbers = parts
        .iter()
        .zip(widths)
        .map(|(part, &width)| parse_component(label, part, width))
        .collect::<Result<Vec<u32>>>()?;
    let year = i32::try_from(numbers[0])
        .map_err(|_| StoreError::format("span label", label, "year out of range"))?;

    let date = match span_type {
        SpanType::Yearly => ymd(label, year, 1, 1)?,
        SpanType::Quarterly => {
            let quarter = numbers[1];
            if !(1..=4).contains(&quarter) {
                return Err(StoreError::format(
                    "span label",
                    label,
                    format!("quarter {quarter} is not between 1 and 4"),
                ));
            }
            ymd(label, year, 3 * (quarter - 1) + 1, 1)?
        }
        SpanType::Monthly => ymd(label, year, numbers[1], 1)?,
        SpanType::Daily => ymd(label, year, numbers[1], numbers[2])?,
        SpanType::None => return Ok(None),
    };
    Ok(Some(date))
}

fn parse_component(label: &str, part: &str, width: usize) -> Result<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StoreError::format(
            "span label",
            label,
            format!("component '{part}' is not numeric"),
        ));
    }
    if part.len() != width {
        return Err(StoreError::format(
            "span label",
            label,
            format!("component '{part}' must have {width} digit(s)"),
        ));
    }
    part.parse::<u32>()
        .map_err(|err| StoreError::format("span label", label, err.to_string()))
}

fn ymd(label: &str, year: i32, month: u32, day: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        StoreError::format(
            "span label",
            label,
            format!("{year:04}-{month:02}-{day:02} is not a calendar date"),
        )
    })
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> Result<i64> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    let resolved = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        // Midnight skipped by a DST jump: the day starts at the first valid minute.
        LocalResult::None => (1..=180)
            .map(|minutes| midnight + Duration::minutes(minutes))
            .find_map(|candidate| tz.from_local_datetime(&candidate).earliest()),
    };
    resolved
        .map(|dt| dt.timestamp())
        .ok_or_else(|| StoreError::format("date", date.to_string(), "no valid local start time"))
}
