//! Database schema creation
//!
//! Creates all tables and indexes. Statements are idempotent
//! (`IF NOT EXISTS`) so startup can run them unconditionally.

use rusqlite::Connection;

use crate::error::DbResult;

/// SQL statements for creating the database schema
pub const CREATE_TABLES_SQL: &str = r#"
-- Authoritative service registry. AUTOINCREMENT keeps ids from ever
-- being reused after a delete.
CREATE TABLE IF NOT EXISTS services (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    version TEXT,
    endpoint TEXT,
    visibility TEXT NOT NULL DEFAULT '"open"',
    version_tag INTEGER NOT NULL DEFAULT 1,
    created_ts INTEGER NOT NULL,
    updated_ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_services_status ON services(status);

-- Capabilities, ordered per service
CREATE TABLE IF NOT EXISTS capabilities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    name TEXT,
    description TEXT NOT NULL,
    input_schema TEXT,
    output_schema TEXT,
    position INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_capabilities_service ON capabilities(service_id, position);

-- Domain tags, ordered per service
CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    position INTEGER NOT NULL,
    UNIQUE(service_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_domains_service ON domains(service_id, position);

-- API keys, stored hashed only
CREATE TABLE IF NOT EXISTS api_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_hash TEXT NOT NULL UNIQUE,
    principal_id TEXT NOT NULL,
    roles TEXT NOT NULL DEFAULT '[]',
    attributes TEXT NOT NULL DEFAULT '{}',
    revoked INTEGER NOT NULL DEFAULT 0,
    expires_ts INTEGER,
    created_ts INTEGER NOT NULL,
    last_used_ts INTEGER
);

-- Append-only feedback log (impressions and selections)
CREATE TABLE IF NOT EXISTS feedback_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    search_id TEXT NOT NULL,
    query_hash TEXT NOT NULL,
    service_id INTEGER NOT NULL,
    rank_position INTEGER NOT NULL,
    selected INTEGER NOT NULL DEFAULT 0,
    created_ts INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feedback_prior
    ON feedback_events(query_hash, service_id, created_ts);
CREATE INDEX IF NOT EXISTS idx_feedback_search ON feedback_events(search_id);
CREATE INDEX IF NOT EXISTS idx_feedback_created ON feedback_events(created_ts);
"#;

/// Create the schema when missing.
///
/// # Errors
/// Returns `DbError` on SQLite failures.
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    Ok(())
}
