//! Durable store schema.
//!
//! `entries_fts` is an external-content FTS5 table over `entries.content`;
//! the triggers below are the only writers to it.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id   TEXT NOT NULL,
    entry_type   TEXT NOT NULL,
    content      TEXT NOT NULL,
    importance   TEXT NOT NULL DEFAULT 'medium',
    source       TEXT,
    created_at   TEXT NOT NULL,
    metadata     TEXT,
    category     TEXT,
    keywords     TEXT,
    applies_when TEXT,
    source_file  TEXT,
    content_hash TEXT NOT NULL,
    UNIQUE (session_id, content_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id);
CREATE INDEX IF NOT EXISTS idx_entries_session_type ON entries(session_id, entry_type);
CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(source);
CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at);
CREATE INDEX IF NOT EXISTS idx_entries_importance ON entries(importance);

CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
    content,
    content='entries',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS entries_fts_ai AFTER INSERT ON entries BEGIN
    INSERT INTO entries_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_fts_ad AFTER DELETE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, content) VALUES ('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS entries_fts_au AFTER UPDATE ON entries BEGIN
    INSERT INTO entries_fts(entries_fts, rowid, content) VALUES ('delete', old.id, old.content);
    INSERT INTO entries_fts(rowid, content) VALUES (new.id, new.content);
END;
"#;

pub(crate) fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)
        .context("failed to apply store schema")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_names(conn: &Connection, kind: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap();
        stmt.query_map([kind], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_schema_creates_indexes_and_triggers() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let indexes = object_names(&conn, "index");
        for name in [
            "idx_entries_session",
            "idx_entries_session_type",
            "idx_entries_source",
            "idx_entries_created_at",
            "idx_entries_importance",
        ] {
            assert!(indexes.iter().any(|idx| idx == name), "missing {name}");
        }

        let triggers = object_names(&conn, "trigger");
        assert_eq!(
            triggers,
            vec!["entries_fts_ad", "entries_fts_ai", "entries_fts_au"]
        );
    }

    #[test]
    fn test_fts_follows_update_and_delete() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO entries (session_id, entry_type, content, created_at, content_hash)
             VALUES ('s', 'learning', 'alpha token', '2024-01-01T00:00:00.000000000Z', 'h')",
            [],
        )
        .unwrap();

        let hits = |term: &str| -> i64 {
            conn.query_row(
                "SELECT COUNT(*) FROM entries_fts WHERE entries_fts MATCH ?1",
                [term],
                |row| row.get(0),
            )
            .unwrap()
        };
        assert_eq!(hits("alpha"), 1);

        conn.execute("UPDATE entries SET content = 'beta token'", [])
            .unwrap();
        assert_eq!(hits("alpha"), 0);
        assert_eq!(hits("beta"), 1);

        conn.execute("DELETE FROM entries", []).unwrap();
        assert_eq!(hits("beta"), 0);
    }
}
