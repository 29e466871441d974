//! SQL DDL for the store's own bookkeeping tables.
//!
//! Defines `agents` (the per-agent schema-version marker), `record_log` (audit log) and
//! `schema_meta`. Agent payload tables are compiled from descriptors and created by the
//! migration engine instead. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One row per agent: descriptors plus the last successfully applied definitions
CREATE TABLE IF NOT EXISTS agents (
    name TEXT PRIMARY KEY,
    input_descriptor TEXT NOT NULL,
    output_descriptor TEXT NOT NULL,
    definitions TEXT NOT NULL,
    dimension INTEGER NOT NULL CHECK(dimension > 0),
    schema_version INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Audit log
CREATE TABLE IF NOT EXISTS record_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent TEXT NOT NULL,
    operation TEXT NOT NULL CHECK(operation IN ('create','edit','delete','embed','migrate','erase')),
    record_id INTEGER,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_record_log_agent ON record_log(agent, record_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all bookkeeping tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
