//! Full-text search over record content.
//!
//! User queries are rewritten into FTS5 syntax before they reach SQLite:
//!
//! - bare terms are quoted if needed and, with `prefix_match`, get a `*`
//!   suffix so `trail` matches `trailing`;
//! - terms already ending in `*`, quoted phrases, `AND` / `OR` / `NOT`, and
//!   `content:term` filters pass through unchanged. Other `word:...` tokens
//!   (`std::fs`, `http://...`) are ordinary terms;
//! - `+term` is a required term and `-term` an excluded one; neither is
//!   wildcarded. Exclusions become trailing `NOT` clauses applied to the
//!   whole positive expression.

use anyhow::Result;
use ckp_core::{EntryType, Importance};
use rusqlite::params;
use tracing::warn;

use crate::store::{ContextStore, RECORD_COLUMNS, StoredRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    pub entry_type: Option<EntryType>,
    pub importance: Option<Importance>,
    pub session_id: Option<String>,
    pub prefix_match: bool,
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            entry_type: None,
            importance: None,
            session_id: None,
            prefix_match: true,
            limit: None,
        }
    }
}

const OPERATORS: [&str; 3] = ["AND", "OR", "NOT"];

/// Columns of `entries_fts` a query may filter on.
const FTS_COLUMNS: [&str; 1] = ["content"];

/// Split on whitespace, keeping double-quoted runs (including any text glued
/// to them, as in `content:"two words"`) inside one token.
fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in query.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn is_bareword(term: &str) -> bool {
    term.chars()
        .all(|c| c.is_alphanumeric() || c == '_' || !c.is_ascii())
}

fn has_searchable_text(term: &str) -> bool {
    term.chars().any(char::is_alphanumeric)
}

fn is_column_filter(token: &str) -> bool {
    match token.split_once(':') {
        Some((column, rest)) => {
            !rest.is_empty()
                && !rest.starts_with(':')
                && FTS_COLUMNS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(column))
        }
        None => false,
    }
}

/// A term as an FTS5 string, quoted unless it is a plain bareword.
fn quote_term(term: &str) -> String {
    if is_bareword(term) {
        term.to_string()
    } else {
        format!("\"{}\"", term.replace('"', "\"\""))
    }
}

/// Rewrite a user query into an FTS5 MATCH expression.
///
/// Returns `None` when nothing searchable remains (empty input, or only
/// exclusions), in which case the search has no results.
pub fn rewrite_query(query: &str, prefix_match: bool) -> Option<String> {
    let mut positive = Vec::new();
    let mut excluded = Vec::new();

    for token in tokenize(query) {
        if OPERATORS.contains(&token.as_str())
            || token.starts_with('"')
            || is_column_filter(&token)
        {
            positive.push(token);
        } else if let Some(term) = token.strip_prefix('-').filter(|t| has_searchable_text(t)) {
            excluded.push(quote_term(term));
        } else if let Some(term) = token.strip_prefix('+').filter(|t| has_searchable_text(t)) {
            positive.push(quote_term(term));
        } else if let Some(stem) = token.strip_suffix('*') {
            if has_searchable_text(stem) {
                positive.push(format!("{}*", quote_term(stem)));
            }
        } else if has_searchable_text(&token) {
            let quoted = quote_term(&token);
            positive.push(if prefix_match {
                format!("{quoted}*")
            } else {
                quoted
            });
        }
    }

    if positive.is_empty() {
        return None;
    }

    let mut expression = positive.join(" ");
    // NOT binds tighter than OR, so group before excluding.
    if !excluded.is_empty() && positive.len() > 1 {
        expression = format!("({expression})");
    }
    for term in excluded {
        expression.push_str(" NOT ");
        expression.push_str(&term);
    }
    Some(expression)
}

/// SQLite reports a malformed MATCH expression (or an unknown column
/// filter) as a plain SQL error at step time.
fn is_query_syntax_error(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<rusqlite::Error>() {
        Some(rusqlite::Error::SqliteFailure(_, Some(message))) => {
            message.starts_with("fts5:") || message.contains("no such column")
        }
        _ => false,
    }
}

impl ContextStore {
    /// Full-text search over content, best matches first, then newest.
    ///
    /// Empty queries return no results. A query SQLite cannot parse is
    /// logged and also returns no results.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<StoredRecord>> {
        let Some(expression) = rewrite_query(query, options.prefix_match) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT {RECORD_COLUMNS}
             FROM entries_fts
             JOIN entries e ON e.id = entries_fts.rowid
             WHERE entries_fts MATCH ?1
               AND (?2 IS NULL OR e.entry_type = ?2)
               AND (?3 IS NULL OR e.importance = ?3)
               AND (?4 IS NULL OR e.session_id = ?4)
             ORDER BY entries_fts.rank, e.created_at DESC, e.id DESC
             LIMIT ?5"
        );
        let limit = options
            .limit
            .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));

        let result = self.query_records(
            &sql,
            params![
                expression,
                options.entry_type.map(|t| t.as_str()),
                options.importance.map(|i| i.as_str()),
                options.session_id.as_deref(),
                limit,
            ],
        );

        match result {
            Err(err) if is_query_syntax_error(&err) => {
                warn!(query, expression = %expression, error = %format!("{err:#}"), "Unusable search query");
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// [`ContextStore::search`] restricted to one session.
    pub fn search_in_session(
        &self,
        session_id: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<StoredRecord>> {
        let options = SearchOptions {
            session_id: Some(session_id.to_string()),
            ..options.clone()
        };
        self.search(query, &options)
    }
}
