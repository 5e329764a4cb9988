//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::CoreError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, CoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), CoreError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(SKILLS_SCHEMA)?;
    conn.execute_batch(GOVERNANCE_SCHEMA)?;
    conn.execute_batch(ACCOUNTABILITY_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), CoreError> {
    // Migration steps go here as the schema evolves
    match from_version {
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Skill index plus full-text mirror
const SKILLS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS skills_index (
    skill_id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    triggers_json TEXT NOT NULL DEFAULT '[]',
    category TEXT NOT NULL DEFAULT 'general',
    version TEXT NOT NULL DEFAULT '0.0.0',
    workflow_steps INTEGER NOT NULL DEFAULT 0,
    file_path TEXT NOT NULL,
    last_modified TEXT,
    indexed_at TEXT NOT NULL DEFAULT (datetime('now')),
    hash TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed TEXT,

    -- Lazily populated on first read
    body TEXT
);

-- Ranked search over name/description/triggers
CREATE VIRTUAL TABLE IF NOT EXISTS skills_fts USING fts5(
    skill_id UNINDEXED,
    name,
    description,
    triggers
);
"#;

/// Governance document cache and precedence table
const GOVERNANCE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS governance_cache (
    doc_name TEXT PRIMARY KEY NOT NULL,
    path TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    required_tokens_json TEXT NOT NULL DEFAULT '[]',
    class TEXT NOT NULL DEFAULT 'reference',
    precedence INTEGER NOT NULL DEFAULT 0,

    -- Written back by every validation pass
    file_hash TEXT,
    hash_drift INTEGER NOT NULL DEFAULT 0,
    last_checked TEXT
);

CREATE TABLE IF NOT EXISTS governance_precedence (
    precedence_order INTEGER PRIMARY KEY NOT NULL,
    path TEXT NOT NULL
);
"#;

/// Task sign-off state plus append-only audit logs
const ACCOUNTABILITY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS task_accountability (
    task_id TEXT PRIMARY KEY NOT NULL,
    slug TEXT NOT NULL,
    perspectives_json TEXT NOT NULL,
    risk_score INTEGER NOT NULL DEFAULT 50,
    can_proceed INTEGER NOT NULL DEFAULT 0,
    blocked INTEGER NOT NULL DEFAULT 0,
    blocked_by TEXT,
    blocked_reason TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    completed_at TEXT,
    last_updated TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Append-only; never updated or deleted
CREATE TABLE IF NOT EXISTS sign_off_receipts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    perspective TEXT NOT NULL,
    decision TEXT NOT NULL,
    signed_by TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    notes TEXT
);

-- Append-only
CREATE TABLE IF NOT EXISTS ai_mode_transitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    from_mode TEXT NOT NULL,
    to_mode TEXT NOT NULL,
    reason TEXT NOT NULL,
    triggered_by TEXT NOT NULL,
    risk_score INTEGER,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS index_metadata (
    id TEXT PRIMARY KEY NOT NULL,
    last_indexed_at TEXT NOT NULL,
    items_indexed INTEGER NOT NULL DEFAULT 0,
    index_duration_ms INTEGER,
    status TEXT NOT NULL,
    error_message TEXT
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_skills_category ON skills_index(category);
CREATE INDEX IF NOT EXISTS idx_skills_path ON skills_index(file_path);
CREATE INDEX IF NOT EXISTS idx_governance_precedence ON governance_cache(precedence);
CREATE INDEX IF NOT EXISTS idx_receipts_task ON sign_off_receipts(task_id);
CREATE INDEX IF NOT EXISTS idx_transitions_task ON ai_mode_transitions(task_id);
"#;
