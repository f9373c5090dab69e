use anyhow::{Context, Result};
use ckp_buffer::LOGS_DIR_NAME;
use ckp_core::{EntryType, Importance, OutputFormat};
use ckp_store::{Restoration, RestorationLimits, SearchOptions, StoredRecord};
use serde_json::json;

use crate::context::AppContext;
use crate::output::{format_timestamp, print_json, print_stored, stored_line};

pub(crate) struct SearchArgs {
    pub query: String,
    pub session: Option<String>,
    pub entry_type: Option<EntryType>,
    pub importance: Option<Importance>,
    pub exact: bool,
    pub limit: Option<usize>,
}

pub(crate) fn handle_search(ctx: &AppContext, args: SearchArgs) -> Result<()> {
    let default_limit = usize::try_from(ctx.settings.storage.search_limit).unwrap_or(usize::MAX);
    let options = SearchOptions {
        entry_type: args.entry_type,
        importance: args.importance,
        session_id: args.session,
        prefix_match: !args.exact,
        limit: Some(args.limit.unwrap_or(default_limit)),
    };
    let hits = ctx.open_store()?.search(&args.query, &options)?;

    if ctx.format == OutputFormat::Text {
        println!("Search results ({} matches):", hits.len());
    }
    print_stored(&hits, ctx.format)
}

pub(crate) fn handle_query(
    ctx: &AppContext,
    session_id: &str,
    entry_type: Option<EntryType>,
    importance: Option<Importance>,
    limit: Option<usize>,
) -> Result<()> {
    let store = ctx.open_store()?;
    let mut records = match (entry_type, importance) {
        (Some(entry_type), _) => store.query_by_type(session_id, entry_type)?,
        (None, Some(importance)) => store.query_by_importance(session_id, importance)?,
        (None, None) => store.query_by_session(session_id, limit)?,
    };
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    print_stored(&records, ctx.format)
}

pub(crate) fn handle_recent(ctx: &AppContext, limit: usize) -> Result<()> {
    let records = ctx.open_store()?.query_recent(Some(limit))?;
    print_stored(&records, ctx.format)
}

fn print_section(title: &str, records: &[StoredRecord]) {
    if records.is_empty() {
        return;
    }
    println!("## {title} ({})", records.len());
    for record in records {
        println!("{}", stored_line(record));
    }
    println!();
}

fn print_restoration(restoration: &Restoration) {
    let tier1 = &restoration.tier1;
    let tier2 = &restoration.tier2;
    println!("# Tier 1 ({} records)", tier1.total_count);
    print_section("Guidelines", &tier1.guidelines);
    print_section("Implementation plans", &tier1.implementation_plans);
    print_section("Key decisions", &tier1.high_importance_decisions);
    println!("# Tier 2 ({} records)", tier2.total_count);
    print_section("Learnings", &tier2.learnings);
    print_section("File edits", &tier2.file_edits);
    print_section("Other decisions", &tier2.medium_decisions);
}

pub(crate) fn handle_restore(ctx: &AppContext, session_id: &str, budget: Option<usize>) -> Result<()> {
    let limits = RestorationLimits::from(&ctx.settings.restoration);
    let budget = budget.unwrap_or_else(|| {
        usize::try_from(ctx.settings.restoration.token_budget).unwrap_or(usize::MAX)
    });

    let mut restoration = ctx.open_store()?.query_for_restoration(session_id, limits)?;
    let dropped = restoration.trim_to_budget(budget);
    let estimated_tokens = restoration.estimated_tokens();

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "session_id": session_id,
            "token_budget": budget,
            "estimated_tokens": estimated_tokens,
            "dropped": dropped,
            "restoration": restoration,
        })),
        OutputFormat::Text => {
            print_restoration(&restoration);
            println!(
                "~{estimated_tokens} tokens of {budget} budget; {} record(s), {dropped} dropped",
                restoration.total_count
            );
            Ok(())
        }
    }
}

pub(crate) fn handle_stats(ctx: &AppContext) -> Result<()> {
    let store = ctx.open_store()?;
    let stats = store.session_stats()?;

    match ctx.format {
        OutputFormat::Json => print_json(&json!({
            "total": store.count()?,
            "sessions": stats,
        })),
        OutputFormat::Text => {
            if stats.is_empty() {
                println!("No stored records.");
                return Ok(());
            }
            println!(
                "{:<28} {:>7} {:>6}  {:<19}  {:<19}",
                "SESSION", "RECORDS", "HIGH", "FIRST", "LAST"
            );
            for row in &stats {
                println!(
                    "{:<28} {:>7} {:>6}  {:<19}  {:<19}",
                    row.session_id,
                    row.entry_count,
                    row.high_importance_count,
                    format_timestamp(row.first_created_at),
                    format_timestamp(row.last_created_at)
                );
            }
            Ok(())
        }
    }
}

/// Drop everything known about a session: stored records, the buffer and
/// flush logs.
/// Holds the flush lock so a concurrent flush cannot re-insert mid-way.
pub(crate) fn handle_forget(ctx: &AppContext, session_id: &str) -> Result<()> {
    let buffer = ctx.buffer();
    let _flush_guard = buffer.hold_flush_lock(session_id, "forget")?;

    let deleted = ctx.open_store()?.delete_session(session_id)?;
    buffer.clear(session_id)?;
    // With the flush lock held, any snapshot is an orphan that recovery
    // would otherwise bring back.
    if buffer.flush_in_progress(session_id) {
        let snapshot = buffer.flushing_path(session_id);
        std::fs::remove_file(&snapshot)
            .with_context(|| format!("Failed to remove snapshot: {}", snapshot.display()))?;
    }
    let logs = buffer.session_dir(session_id).join(LOGS_DIR_NAME);
    if logs.is_dir() {
        std::fs::remove_dir_all(&logs)
            .with_context(|| format!("Failed to remove flush logs: {}", logs.display()))?;
    }

    match ctx.format {
        OutputFormat::Json => print_json(&json!({ "session_id": session_id, "deleted": deleted })),
        OutputFormat::Text => {
            println!("Forgot session {session_id}: {deleted} stored record(s) deleted.");
            Ok(())
        }
    }
}
