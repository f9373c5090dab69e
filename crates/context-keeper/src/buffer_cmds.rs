use std::io::BufRead;

use anyhow::{Context, Result, bail};
use ckp_buffer::create_flush_log_writer;
use ckp_core::{EnhancedFields, EntryType, Importance, OutputFormat, Record, Source};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::output::{print_json, print_records, report_flush};

/// Fields of `ckp append` when the record comes from flags.
pub(crate) struct AppendArgs {
    pub entry_type: Option<EntryType>,
    pub content: Option<String>,
    pub importance: Importance,
    pub source: Option<Source>,
    pub enhanced: EnhancedFields,
    pub metadata: Option<String>,
}

impl AppendArgs {
    fn into_record(self) -> Result<Record> {
        let (Some(entry_type), Some(content)) = (self.entry_type, self.content) else {
            bail!("append needs --type and content, or --stdin");
        };
        let mut record = Record::new(entry_type, content)
            .with_importance(self.importance)
            .with_enhanced(self.enhanced);
        if let Some(source) = self.source {
            record = record.with_source(source);
        }
        if let Some(raw) = self.metadata {
            let metadata: serde_json::Value =
                serde_json::from_str(&raw).context("--metadata must be valid JSON")?;
            record = record.with_metadata(metadata);
        }
        Ok(record)
    }
}

/// Parse stdin JSONL, keeping valid records. Bad lines are reported and
/// skipped so one broken producer line does not lose the rest.
fn read_stdin_records(input: impl BufRead) -> Result<(Vec<Record>, usize)> {
    let mut records = Vec::new();
    let mut rejected = 0;
    for (index, line) in input.lines().enumerate() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match Record::from_json_line(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(line = index + 1, %err, "Rejected stdin record");
                rejected += 1;
            }
        }
    }
    Ok((records, rejected))
}

pub(crate) fn handle_append(
    ctx: &AppContext,
    session_id: &str,
    args: AppendArgs,
    from_stdin: bool,
    no_flush: bool,
) -> Result<()> {
    let buffer = ctx.buffer();
    let (appended, rejected) = if from_stdin {
        let (records, parse_rejected) = read_stdin_records(std::io::stdin().lock())?;
        let appended = buffer.append_many(session_id, &records)?;
        (appended, parse_rejected + records.len() - appended)
    } else {
        let record = args.into_record()?;
        let appended = usize::from(buffer.append(session_id, &record)?);
        (appended, 1 - appended)
    };

    let mut flush = None;
    if appended > 0 && !no_flush && buffer.flush_due(session_id, &ctx.settings.buffer)? {
        debug!(session_id, "Buffer due for flush");
        flush = Some(ctx.flush(&buffer, session_id, ctx.settings.buffer.async_flush));
    }

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "session_id": session_id,
            "appended": appended,
            "rejected": rejected,
            "flush": flush,
        }))?,
        OutputFormat::Text => {
            println!("Appended {appended} record(s), rejected {rejected}.");
            if let Some(result) = &flush {
                report_flush(result, OutputFormat::Text)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn handle_read(ctx: &AppContext, session_id: &str) -> Result<()> {
    let records = ctx.buffer().read(session_id)?;
    print_records(&records, ctx.format)
}

pub(crate) fn handle_count(ctx: &AppContext, session_id: &str) -> Result<()> {
    let count = ctx.buffer().count(session_id)?;
    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "session_id": session_id, "count": count })),
        OutputFormat::Text => {
            println!("{count}");
            Ok(())
        }
    }
}

pub(crate) fn handle_status(ctx: &AppContext, session_id: &str) -> Result<()> {
    let buffer = ctx.buffer();
    let buffered = buffer.count(session_id)?;
    let flushing = buffer.flush_in_progress(session_id);
    let flush_due = buffer.flush_due(session_id, &ctx.settings.buffer)?;
    let last_flush = buffer.last_flush_holder(session_id);
    let stored = if ctx.paths.db_path(&ctx.settings).exists() {
        ctx.open_store()?.count_by_session(session_id)?
    } else {
        0
    };

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "session_id": session_id,
            "buffered": buffered,
            "flush_in_progress": flushing,
            "flush_due": flush_due,
            "stored": stored,
            "last_flush": last_flush,
        })),
        OutputFormat::Text => {
            println!("Session:           {session_id}");
            println!("Buffered records:  {buffered}");
            println!("Stored records:    {stored}");
            println!("Flush in progress: {}", if flushing { "yes" } else { "no" });
            println!("Flush due:         {}", if flush_due { "yes" } else { "no" });
            if let Some(holder) = last_flush {
                println!(
                    "Last flush lock:   PID {} at {} ({})",
                    holder.pid, holder.acquired_at, holder.reason
                );
            }
            Ok(())
        }
    }
}

pub(crate) fn handle_clear(ctx: &AppContext, session_id: &str) -> Result<()> {
    if !ctx.buffer().clear(session_id)? {
        bail!("Invalid session id: '{session_id}'");
    }
    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "session_id": session_id, "cleared": true })),
        OutputFormat::Text => {
            println!("Cleared buffer for {session_id}.");
            Ok(())
        }
    }
}

/// Returns the process exit code.
pub(crate) fn handle_flush(
    ctx: &AppContext,
    session_id: &str,
    run_async: bool,
    sync: bool,
) -> Result<i32> {
    let run_async = run_async || (!sync && ctx.settings.buffer.async_flush);
    let buffer = ctx.buffer();
    let result = ctx.flush(&buffer, session_id, run_async);
    report_flush(&result, ctx.format)
}

pub(crate) fn handle_recover(ctx: &AppContext, session_id: Option<&str>) -> Result<()> {
    let buffer = ctx.buffer();
    let recovered = match session_id {
        Some(id) => buffer.process_orphaned_flushing_file(id)?,
        None => buffer.recover_all()?,
    };
    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "recovered": recovered })),
        OutputFormat::Text => {
            println!("Recovered {recovered} record(s).");
            Ok(())
        }
    }
}

/// Detached worker behind `flush --async`. Logs to the session's log file,
/// since stdio is closed.
pub(crate) fn run_flush_worker(ctx: &AppContext, session_id: &str) -> Result<i32> {
    let buffer = ctx.buffer();
    let (writer, _guard) = create_flush_log_writer(&buffer.session_dir(session_id))?;
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(crate::env_filter(&ctx.settings))
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        info!(session_id, pid = std::process::id(), "Flush worker started");
        let result = buffer.flush_sync(session_id);
        if result.success {
            info!(session_id, entries_flushed = result.entries_flushed, reason = ?result.reason, "Flush worker finished");
            Ok(0)
        } else {
            warn!(session_id, reason = ?result.reason, "Flush worker failed");
            Ok(1)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(entry_type: Option<EntryType>, content: Option<&str>) -> AppendArgs {
        AppendArgs {
            entry_type,
            content: content.map(str::to_string),
            importance: Importance::Medium,
            source: None,
            enhanced: EnhancedFields::default(),
            metadata: None,
        }
    }

    #[test]
    fn test_into_record_from_flags() {
        let mut input = args(Some(EntryType::Guideline), Some("keep functions small"));
        input.importance = Importance::High;
        input.source = Some(Source::User);
        input.metadata = Some(r#"{"turn": 3}"#.to_string());

        let record = input.into_record().unwrap();
        assert_eq!(record.entry_type, EntryType::Guideline);
        assert_eq!(record.importance, Importance::High);
        assert_eq!(record.source, Some(Source::User));
        assert_eq!(record.metadata, Some(json!({"turn": 3})));
    }

    #[test]
    fn test_into_record_rejects_bad_metadata_and_missing_fields() {
        let mut input = args(Some(EntryType::Learning), Some("x"));
        input.metadata = Some("{not json".to_string());
        assert!(input.into_record().is_err());
        assert!(args(None, Some("x")).into_record().is_err());
        assert!(args(Some(EntryType::Learning), None).into_record().is_err());
    }

    #[test]
    fn test_read_stdin_records_counts_rejects() {
        let input = concat!(
            r#"{"entry_type":"learning","content":"ok"}"#,
            "\n\n",
            r#"{"entry_type":"nope","content":"bad type"}"#,
            "\n",
            "garbage\n",
            r#"{"entry_type":"decision","content":"also ok","importance":"high"}"#,
            "\n",
        );
        let (records, rejected) = read_stdin_records(input.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(rejected, 2);
        assert_eq!(records[1].importance, Importance::High);
    }
}
