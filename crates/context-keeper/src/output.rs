//! Text and JSON rendering shared by the command handlers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use ckp_buffer::FlushResult;
use ckp_core::{OutputFormat, Record};
use ckp_store::StoredRecord;
use serde::Serialize;

const CONTENT_WIDTH: usize = 100;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate to `max` chars, marking the cut with `...`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let kept: String = flat.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

pub(crate) fn record_line(record: &Record) -> String {
    format!(
        "{}  {:<19} {:<6}  {}",
        format_timestamp(record.created_at),
        record.entry_type.as_str(),
        record.importance.as_str(),
        truncate_chars(&record.content, CONTENT_WIDTH)
    )
}

pub(crate) fn stored_line(stored: &StoredRecord) -> String {
    format!(
        "#{:<5} [{}] {}",
        stored.id,
        stored.session_id,
        record_line(&stored.record)
    )
}

pub(crate) fn print_records(records: &[Record], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(records),
        OutputFormat::Text => {
            for record in records {
                println!("{}", record_line(record));
            }
            Ok(())
        }
    }
}

pub(crate) fn print_stored(records: &[StoredRecord], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(records),
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No records.");
            }
            for record in records {
                println!("{}", stored_line(record));
            }
            Ok(())
        }
    }
}

/// Print a flush outcome and return the process exit code for it.
pub(crate) fn report_flush(result: &FlushResult, format: OutputFormat) -> Result<i32> {
    match format {
        OutputFormat::Json => print_json(result)?,
        OutputFormat::Text => match (&result.reason, result.success) {
            (None, _) => println!("Flushed {} record(s).", result.entries_flushed),
            (Some(reason), true) => println!("OK: {reason}"),
            (Some(reason), false) => println!("Flush failed: {reason}"),
        },
    }
    Ok(if result.success { 0 } else { 1 })
}
