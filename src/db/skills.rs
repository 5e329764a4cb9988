//! Skill index CRUD and search

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Indexed skill row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRow {
    pub skill_id: String,
    pub name: String,
    pub description: String,
    pub triggers: Vec<String>,
    pub category: String,
    pub version: String,
    pub workflow_steps: i64,
    pub file_path: String,
    pub last_modified: Option<String>,
    pub indexed_at: String,
    pub hash: String,
    pub access_count: i64,
    pub last_accessed: Option<String>,
    /// Full document body, lazily populated on first read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl SkillRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let triggers_json: String = row.get("triggers_json")?;
        Ok(Self {
            skill_id: row.get("skill_id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            triggers: serde_json::from_str(&triggers_json).unwrap_or_default(),
            category: row.get("category")?,
            version: row.get("version")?,
            workflow_steps: row.get("workflow_steps")?,
            file_path: row.get("file_path")?,
            last_modified: row.get("last_modified")?,
            indexed_at: row.get("indexed_at")?,
            hash: row.get("hash")?,
            access_count: row.get("access_count")?,
            last_accessed: row.get("last_accessed")?,
            body: row.get("body")?,
        })
    }
}

/// Get a skill by id
pub fn get_skill(conn: &Connection, skill_id: &str) -> Result<Option<SkillRow>, CoreError> {
    let row = conn
        .query_row(
            "SELECT * FROM skills_index WHERE skill_id = ?",
            params![skill_id],
            SkillRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Stored content hash for a descriptor path, used for the skip check
pub fn get_hash_by_path(conn: &Connection, file_path: &str) -> Result<Option<String>, CoreError> {
    let hash = conn
        .query_row(
            "SELECT hash FROM skills_index WHERE file_path = ?",
            params![file_path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(hash)
}

/// Insert or update an indexed skill, preserving access stats across
/// re-indexes of the same skill id. The body is invalidated because the
/// file content changed (hash differs, or the row is new).
pub fn upsert_skill(conn: &mut Connection, skill: &SkillRow) -> Result<(), CoreError> {
    let triggers_json = serde_json::to_string(&skill.triggers)?;
    let tx = conn.transaction()?;

    tx.execute(
        r#"
        INSERT INTO skills_index (
            skill_id, name, description, triggers_json, category, version,
            workflow_steps, file_path, last_modified, indexed_at, hash, body
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT(skill_id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            triggers_json = excluded.triggers_json,
            category = excluded.category,
            version = excluded.version,
            workflow_steps = excluded.workflow_steps,
            file_path = excluded.file_path,
            last_modified = excluded.last_modified,
            indexed_at = excluded.indexed_at,
            hash = excluded.hash,
            body = NULL
        "#,
        params![
            skill.skill_id,
            skill.name,
            skill.description,
            triggers_json,
            skill.category,
            skill.version,
            skill.workflow_steps,
            skill.file_path,
            skill.last_modified,
            skill.indexed_at,
            skill.hash,
        ],
    )?;

    // Refresh the full-text mirror
    tx.execute(
        "DELETE FROM skills_fts WHERE skill_id = ?",
        params![skill.skill_id],
    )?;
    tx.execute(
        "INSERT INTO skills_fts (skill_id, name, description, triggers) VALUES (?, ?, ?, ?)",
        params![
            skill.skill_id,
            skill.name,
            skill.description,
            skill.triggers.join(" "),
        ],
    )?;

    tx.commit()?;
    Ok(())
}

/// Skill id indexed from the given descriptor path
pub fn get_id_by_path(conn: &Connection, file_path: &str) -> Result<Option<String>, CoreError> {
    let id = conn
        .query_row(
            "SELECT skill_id FROM skills_index WHERE file_path = ?",
            params![file_path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Remove a skill and its full-text mirror row
pub fn delete_skill(conn: &mut Connection, skill_id: &str) -> Result<bool, CoreError> {
    let tx = conn.transaction()?;
    let changed = tx.execute(
        "DELETE FROM skills_index WHERE skill_id = ?",
        params![skill_id],
    )?;
    tx.execute(
        "DELETE FROM skills_fts WHERE skill_id = ?",
        params![skill_id],
    )?;
    tx.commit()?;
    Ok(changed > 0)
}

/// Record a read access. Returns the timestamp written so callers can
/// keep their in-memory copy in step with the row.
pub fn record_access(conn: &Connection, skill_id: &str) -> Result<String, CoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE skills_index SET access_count = access_count + 1, last_accessed = ? WHERE skill_id = ?",
        params![now, skill_id],
    )?;
    Ok(now)
}

/// Persist the lazily loaded body
pub fn set_body(conn: &Connection, skill_id: &str, body: &str) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE skills_index SET body = ? WHERE skill_id = ?",
        params![body, skill_id],
    )?;
    Ok(())
}

/// Ranked full-text search over name, description, and triggers
pub fn search_skills(
    conn: &Connection,
    query: &str,
    limit: u32,
) -> Result<Vec<SkillRow>, CoreError> {
    // Quote each term so user input cannot inject FTS syntax
    let match_expr: Vec<String> = query
        .split_whitespace()
        .map(|t| format!("\"{}\"", t.replace('"', "")))
        .collect();
    if match_expr.is_empty() {
        return Ok(vec![]);
    }
    let match_expr = match_expr.join(" OR ");

    let mut stmt = conn.prepare(
        r#"
        SELECT s.* FROM skills_fts
        JOIN skills_index s ON s.skill_id = skills_fts.skill_id
        WHERE skills_fts MATCH ?1
        ORDER BY rank
        LIMIT ?2
        "#,
    )?;

    let rows = stmt
        .query_map(params![match_expr, limit as i64], SkillRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Skills carrying the given trigger, ordered by popularity then recency
pub fn find_by_trigger(
    conn: &Connection,
    trigger: &str,
    limit: u32,
) -> Result<Vec<SkillRow>, CoreError> {
    // triggers_json is a JSON string array, so exact membership matches
    // the quoted element
    let pattern = format!("%\"{}\"%", trigger.replace('%', "").replace('_', ""));

    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM skills_index
        WHERE triggers_json LIKE ?1
        ORDER BY access_count DESC, last_accessed DESC
        LIMIT ?2
        "#,
    )?;

    let rows = stmt
        .query_map(params![pattern, limit as i64], SkillRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// All indexed skills (startup cache warming)
pub fn list_skills(conn: &Connection, limit: u32) -> Result<Vec<SkillRow>, CoreError> {
    let mut stmt =
        conn.prepare("SELECT * FROM skills_index ORDER BY access_count DESC LIMIT ?")?;
    let rows = stmt
        .query_map(params![limit as i64], SkillRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
