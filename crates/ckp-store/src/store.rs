use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use ckp_core::{EnhancedFields, EntryType, Importance, Record, Source};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::schema::apply_schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Column list shared by every record query; the table is aliased `e`.
pub(crate) const RECORD_COLUMNS: &str = "e.id, e.session_id, e.entry_type, e.content, \
     e.importance, e.source, e.created_at, e.metadata, e.category, e.keywords, \
     e.applies_when, e.source_file, e.content_hash";

pub(crate) const NEWEST_FIRST: &str = "ORDER BY e.created_at DESC, e.id DESC";

/// A record as persisted, with its store identity and dedup key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub session_id: String,
    pub content_hash: String,
    #[serde(flatten)]
    pub record: Record,
}

/// Per-session aggregate returned by [`ContextStore::session_stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub session_id: String,
    pub entry_count: usize,
    pub high_importance_count: usize,
    pub first_created_at: DateTime<Utc>,
    pub last_created_at: DateTime<Utc>,
}

/// Destination for flushed batches. The buffer only needs this much of the
/// store, which keeps flush testable against failing sinks.
pub trait RecordSink {
    /// Persist `records` for `session_id`, returning how many were new.
    /// Invalid and duplicate records are skipped, not errors.
    fn insert_batch(&mut self, session_id: &str, records: &[Record]) -> Result<usize>;
}

/// SQLite-backed durable store.
pub struct ContextStore {
    pub(crate) conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("path", &self.path)
            .finish()
    }
}

/// SHA-256 over `entry_type`, a NUL separator, and `content`, as 64
/// lowercase hex chars.
pub fn content_hash(entry_type: EntryType, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing to String cannot fail.
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // Fixed-width so that text order equals time order.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|text| serde_json::from_str(&text).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    let source = row
        .get::<_, Option<String>>(5)?
        .map(|raw| Source::from_str(&raw).map_err(|e| conversion_error(5, e)))
        .transpose()?;

    let record = Record {
        entry_type: parse_column::<EntryType>(row, 2)?,
        content: row.get(3)?,
        importance: parse_column::<Importance>(row, 4)?,
        source,
        created_at: parse_timestamp(row, 6)?,
        metadata: parse_json_column(row, 7)?,
        enhanced: EnhancedFields {
            category: row.get(8)?,
            keywords: parse_json_column::<Vec<String>>(row, 9)?.unwrap_or_default(),
            applies_when: row.get(10)?,
            source_file: row.get(11)?,
        },
    };

    Ok(StoredRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        content_hash: row.get(12)?,
        record,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Insert one record on `conn` (a connection or an open transaction).
fn insert_on(conn: &Connection, session_id: &str, record: &Record) -> Result<bool> {
    if session_id.is_empty() {
        return Ok(false);
    }
    if let Err(reason) = record.validate() {
        debug!(session_id, %reason, "Skipping invalid record");
        return Ok(false);
    }

    let hash = content_hash(record.entry_type, &record.content);
    let already_stored: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM entries WHERE session_id = ?1 AND content_hash = ?2)",
            params![session_id, hash],
            |row| row.get(0),
        )
        .context("failed to check for duplicate record")?;
    if already_stored {
        debug!(session_id, content_hash = %hash, "Skipping duplicate record");
        return Ok(false);
    }

    let metadata = record
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize record metadata")?;
    let keywords = if record.enhanced.keywords.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&record.enhanced.keywords).context("failed to serialize keywords")?)
    };

    let inserted = conn.execute(
        "INSERT INTO entries (session_id, entry_type, content, importance, source, created_at,
                              metadata, category, keywords, applies_when, source_file, content_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            session_id,
            record.entry_type.as_str(),
            record.content,
            record.importance.as_str(),
            record.source.map(|s| s.as_str()),
            format_timestamp(&record.created_at),
            metadata,
            record.enhanced.category,
            keywords,
            record.enhanced.applies_when,
            record.enhanced.source_file,
            hash,
        ],
    );

    match inserted {
        Ok(_) => Ok(true),
        // Lost a race with another writer; the constraint did its job.
        Err(err) if is_unique_violation(&err) => Ok(false),
        Err(err) => Err(err).context("failed to insert record"),
    }
}

impl ContextStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("failed to set busy timeout")?;
        // WAL lets readers proceed while a flush is inserting.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("failed to enable WAL journal")?;
        apply_schema(&conn)?;

        debug!(path = %path.display(), "Context store opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        apply_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store one record. `false` for an empty session id, an invalid record,
    /// or a duplicate `(session_id, content_hash)`.
    pub fn insert(&self, session_id: &str, record: &Record) -> Result<bool> {
        insert_on(&self.conn, session_id, record)
    }

    /// Store a batch atomically, returning the number of newly stored
    /// records. On error nothing from the batch is kept.
    pub fn insert_many(&mut self, session_id: &str, records: &[Record]) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("failed to begin insert transaction")?;
        let mut inserted = 0;
        for record in records {
            if insert_on(&tx, session_id, record)? {
                inserted += 1;
            }
        }
        tx.commit().context("failed to commit insert transaction")?;
        debug!(session_id, inserted, total = records.len(), "Inserted batch");
        Ok(inserted)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<usize> {
        if session_id.is_empty() {
            return Ok(0);
        }
        self.conn
            .execute("DELETE FROM entries WHERE session_id = ?1", [session_id])
            .with_context(|| format!("failed to delete records for session {session_id}"))
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .context("failed to count records")?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    pub fn count_by_session(&self, session_id: &str) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM entries WHERE session_id = ?1",
                [session_id],
                |row| row.get(0),
            )
            .context("failed to count session records")?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    /// Look up one stored record by row id.
    pub fn get(&self, id: i64) -> Result<Option<StoredRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM entries e WHERE e.id = ?1"),
                [id],
                row_to_stored,
            )
            .optional()
            .context("failed to load record")
    }

    /// Records of one session, most recent first.
    pub fn query_by_session(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM entries e WHERE e.session_id = ?1 {NEWEST_FIRST} LIMIT ?2"
            ),
            params![session_id, sql_limit(limit)],
        )
    }

    pub fn query_by_type(
        &self,
        session_id: &str,
        entry_type: EntryType,
    ) -> Result<Vec<StoredRecord>> {
        self.query_filtered(session_id, &[entry_type], None, None)
    }

    pub fn query_by_importance(
        &self,
        session_id: &str,
        importance: Importance,
    ) -> Result<Vec<StoredRecord>> {
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM entries e
                 WHERE e.session_id = ?1 AND e.importance = ?2 {NEWEST_FIRST}"
            ),
            params![session_id, importance.as_str()],
        )
    }

    /// Records across all sessions, most recent first.
    pub fn query_recent(&self, limit: Option<usize>) -> Result<Vec<StoredRecord>> {
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM entries e {NEWEST_FIRST} LIMIT ?1"),
            params![sql_limit(limit)],
        )
    }

    /// Aggregates per session, most recently active first.
    pub fn session_stats(&self) -> Result<Vec<SessionStats>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT session_id,
                        COUNT(*),
                        SUM(CASE WHEN importance = 'high' THEN 1 ELSE 0 END),
                        MIN(created_at),
                        MAX(created_at)
                 FROM entries
                 GROUP BY session_id
                 ORDER BY MAX(created_at) DESC, session_id",
            )
            .context("failed to prepare session stats query")?;

        let rows = stmt
            .query_map([], |row| {
                let entry_count: i64 = row.get(1)?;
                let high: i64 = row.get(2)?;
                Ok(SessionStats {
                    session_id: row.get(0)?,
                    entry_count: usize::try_from(entry_count).unwrap_or_default(),
                    high_importance_count: usize::try_from(high).unwrap_or_default(),
                    first_created_at: parse_timestamp(row, 3)?,
                    last_created_at: parse_timestamp(row, 4)?,
                })
            })
            .context("failed to run session stats query")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read session stats")
    }

    /// Records of `session_id` whose type is in `entry_types`, optionally
    /// narrowed by importance, newest first.
    pub(crate) fn query_filtered(
        &self,
        session_id: &str,
        entry_types: &[EntryType],
        importance: Option<Importance>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        // Type names come from a closed enum, so inlining them is safe.
        let type_list = entry_types
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        self.query_records(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM entries e
                 WHERE e.session_id = ?1
                   AND e.entry_type IN ({type_list})
                   AND (?2 IS NULL OR e.importance = ?2)
                 {NEWEST_FIRST}
                 LIMIT ?3"
            ),
            params![session_id, importance.map(|i| i.as_str()), sql_limit(limit)],
        )
    }

    pub(crate) fn query_records<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<StoredRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("failed to prepare record query")?;
        let rows = stmt
            .query_map(params, row_to_stored)
            .context("failed to run record query")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read record rows")
    }
}

impl RecordSink for ContextStore {
    fn insert_batch(&mut self, session_id: &str, records: &[Record]) -> Result<usize> {
        self.insert_many(session_id, records)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
