use ducky_core::{DuckyError, Result};
use rusqlite::Connection;

/// Single local relational store: file records, entity rows with embeddings
/// and dependency edges, and feedback decisions for session dedup. Survives
/// process restarts.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path     TEXT PRIMARY KEY,
    modified TEXT NOT NULL,
    digest   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id             TEXT PRIMARY KEY,
    path           TEXT NOT NULL,
    short_name     TEXT NOT NULL,
    qualified_name TEXT NOT NULL,
    kind           TEXT NOT NULL,
    language       TEXT NOT NULL,
    start_byte     INTEGER NOT NULL,
    end_byte       INTEGER NOT NULL,
    start_line     INTEGER NOT NULL,
    end_line       INTEGER NOT NULL,
    digest         TEXT NOT NULL,
    raw_text       TEXT NOT NULL,
    embedding      BLOB,
    last_seen      TEXT NOT NULL,
    parsed         INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_entities_path ON entities(path);
CREATE INDEX IF NOT EXISTS idx_entities_short_name ON entities(short_name);

CREATE TABLE IF NOT EXISTS edges (
    source_id   TEXT NOT NULL,
    target_name TEXT NOT NULL,
    PRIMARY KEY (source_id, target_name)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_name);

CREATE TABLE IF NOT EXISTS feedback_decisions (
    entity_id     TEXT NOT NULL,
    digest        TEXT NOT NULL,
    record_id     TEXT NOT NULL,
    should_notify INTEGER NOT NULL,
    message       TEXT,
    tag           TEXT,
    created_at    TEXT NOT NULL,
    PRIMARY KEY (entity_id, digest)
);
"#;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)
        .map_err(|e| DuckyError::IndexUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(count >= 4);
    }
}
