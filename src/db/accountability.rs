//! Task accountability rows and the append-only audit tables.
//!
//! Every function takes a `&Connection` (or transaction deref) so the
//! engine can run a full sign-off inside one transaction.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::accountability::ai_mode::AiMode;
use crate::accountability::{FourPerspectives, Perspective, SignOffReceipt, SignOffStatus};
use crate::error::CoreError;

/// One unit of work with its four-perspective sign-off state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRow {
    pub task_id: String,
    pub slug: String,
    pub perspectives: FourPerspectives,
    pub risk_score: i64,
    pub can_proceed: bool,
    pub blocked: bool,
    pub blocked_by: Option<Perspective>,
    pub blocked_reason: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub last_updated: String,
}

impl TaskRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let perspectives_json: String = row.get("perspectives_json")?;
        let perspectives: FourPerspectives = serde_json::from_str(&perspectives_json)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
        let blocked_by: Option<String> = row.get("blocked_by")?;
        Ok(Self {
            task_id: row.get("task_id")?,
            slug: row.get("slug")?,
            perspectives,
            risk_score: row.get("risk_score")?,
            can_proceed: row.get::<_, i64>("can_proceed")? != 0,
            blocked: row.get::<_, i64>("blocked")? != 0,
            blocked_by: blocked_by.as_deref().and_then(Perspective::parse),
            blocked_reason: row.get("blocked_reason")?,
            created_at: row.get("created_at")?,
            completed_at: row.get("completed_at")?,
            last_updated: row.get("last_updated")?,
        })
    }
}

/// Create a fresh task record. Fails if the task id already exists.
pub fn insert_task(
    conn: &Connection,
    task_id: &str,
    slug: &str,
    perspectives: &FourPerspectives,
) -> Result<(), CoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        r#"
        INSERT INTO task_accountability (
            task_id, slug, perspectives_json, created_at, last_updated
        ) VALUES (?, ?, ?, ?, ?)
        "#,
        params![
            task_id,
            slug,
            serde_json::to_string(perspectives)?,
            now,
            now
        ],
    )?;
    Ok(())
}

pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<TaskRow>, CoreError> {
    let row = conn
        .query_row(
            "SELECT * FROM task_accountability WHERE task_id = ?",
            params![task_id],
            TaskRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_tasks(conn: &Connection) -> Result<Vec<TaskRow>, CoreError> {
    let mut stmt =
        conn.prepare("SELECT * FROM task_accountability ORDER BY created_at DESC")?;
    let rows = stmt
        .query_map([], TaskRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Persist the recomputed sign-off state of an existing task
pub fn update_task(conn: &Connection, task: &TaskRow) -> Result<(), CoreError> {
    conn.execute(
        r#"
        UPDATE task_accountability SET
            perspectives_json = ?,
            risk_score = ?,
            can_proceed = ?,
            blocked = ?,
            blocked_by = ?,
            blocked_reason = ?,
            last_updated = ?
        WHERE task_id = ?
        "#,
        params![
            serde_json::to_string(&task.perspectives)?,
            task.risk_score,
            task.can_proceed as i64,
            task.blocked as i64,
            task.blocked_by.map(|p| p.as_str()),
            task.blocked_reason,
            chrono::Utc::now().to_rfc3339(),
            task.task_id,
        ],
    )?;
    Ok(())
}

/// Mark a task completed. Returns false when no such task exists.
pub fn set_completed(conn: &Connection, task_id: &str) -> Result<bool, CoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE task_accountability SET completed_at = ?, last_updated = ? WHERE task_id = ?",
        params![now, now, task_id],
    )?;
    Ok(changed > 0)
}

/// Append a sign-off receipt. Receipts are never updated or deleted.
pub fn insert_receipt(conn: &Connection, receipt: &SignOffReceipt) -> Result<(), CoreError> {
    conn.execute(
        r#"
        INSERT INTO sign_off_receipts (
            task_id, perspective, decision, signed_by, timestamp, notes
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
        params![
            receipt.task_id,
            receipt.perspective.as_str(),
            receipt.decision.as_str(),
            receipt.signed_by,
            receipt.timestamp,
            receipt.notes,
        ],
    )?;
    Ok(())
}

pub fn receipts_for(conn: &Connection, task_id: &str) -> Result<Vec<SignOffReceipt>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, perspective, decision, signed_by, timestamp, notes
         FROM sign_off_receipts WHERE task_id = ? ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![task_id], |row| {
            let perspective: String = row.get("perspective")?;
            let decision: String = row.get("decision")?;
            Ok(SignOffReceipt {
                id: row.get("id")?,
                task_id: row.get("task_id")?,
                // A receipt row with an unknown perspective is corrupt;
                // surface it rather than reattribute the decision
                perspective: Perspective::parse(&perspective).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        format!("unknown perspective: {}", perspective).into(),
                    )
                })?,
                decision: SignOffStatus::parse(&decision),
                signed_by: row.get("signed_by")?,
                timestamp: row.get("timestamp")?,
                notes: row.get("notes")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Recorded autonomy mode change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiModeTransition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub task_id: String,
    pub from_mode: AiMode,
    pub to_mode: AiMode,
    pub reason: String,
    pub triggered_by: String,
    pub risk_score: Option<i64>,
    pub timestamp: String,
}

/// Append a mode transition. Transitions are never updated or deleted.
pub fn insert_transition(conn: &Connection, t: &AiModeTransition) -> Result<(), CoreError> {
    conn.execute(
        r#"
        INSERT INTO ai_mode_transitions (
            task_id, from_mode, to_mode, reason, triggered_by, risk_score, timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            t.task_id,
            t.from_mode.as_str(),
            t.to_mode.as_str(),
            t.reason,
            t.triggered_by,
            t.risk_score,
            t.timestamp,
        ],
    )?;
    Ok(())
}

pub fn transitions_for(
    conn: &Connection,
    task_id: &str,
) -> Result<Vec<AiModeTransition>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, from_mode, to_mode, reason, triggered_by, risk_score, timestamp
         FROM ai_mode_transitions WHERE task_id = ? ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![task_id], |row| {
            let from_mode: String = row.get("from_mode")?;
            let to_mode: String = row.get("to_mode")?;
            Ok(AiModeTransition {
                id: row.get("id")?,
                task_id: row.get("task_id")?,
                from_mode: AiMode::parse(&from_mode),
                to_mode: AiMode::parse(&to_mode),
                reason: row.get("reason")?,
                triggered_by: row.get("triggered_by")?,
                risk_score: row.get("risk_score")?,
                timestamp: row.get("timestamp")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreDb;

    #[test]
    fn test_task_roundtrip() {
        let db = StoreDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_task(conn, "t-1", "add-search-endpoint", &FourPerspectives::new())
        })
        .unwrap();

        let task = db.with_conn(|conn| get_task(conn, "t-1")).unwrap().unwrap();
        assert_eq!(task.slug, "add-search-endpoint");
        assert_eq!(task.risk_score, 50);
        assert!(!task.blocked);
        assert!(!task.can_proceed);
        assert_eq!(task.perspectives.product.status, SignOffStatus::Pending);
    }

    #[test]
    fn test_duplicate_task_id_rejected() {
        let db = StoreDb::open_in_memory().unwrap();
        db.with_conn(|conn| insert_task(conn, "t-1", "a", &FourPerspectives::new()))
            .unwrap();
        let dup =
            db.with_conn(|conn| insert_task(conn, "t-1", "b", &FourPerspectives::new()));
        assert!(dup.is_err());
    }

    #[test]
    fn test_receipts_append_in_order() {
        let db = StoreDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_task(conn, "t-1", "a", &FourPerspectives::new())?;
            insert_receipt(
                conn,
                &SignOffReceipt {
                    id: None,
                    task_id: "t-1".to_string(),
                    perspective: Perspective::Product,
                    decision: SignOffStatus::Approved,
                    signed_by: "ana".to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    notes: None,
                },
            )?;
            insert_receipt(
                conn,
                &SignOffReceipt {
                    id: None,
                    task_id: "t-1".to_string(),
                    perspective: Perspective::Qa,
                    decision: SignOffStatus::Vetoed,
                    signed_by: "kim".to_string(),
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    notes: Some("flaky tests".to_string()),
                },
            )
        })
        .unwrap();

        let receipts = db.with_conn(|conn| receipts_for(conn, "t-1")).unwrap();
        assert_eq!(receipts.len(), 2);
        assert_eq!(receipts[0].perspective, Perspective::Product);
        assert_eq!(receipts[1].decision, SignOffStatus::Vetoed);
    }

    #[test]
    fn test_corrupt_receipt_perspective_is_an_error() {
        let db = StoreDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_task(conn, "t-1", "a", &FourPerspectives::new())?;
            conn.execute(
                "INSERT INTO sign_off_receipts (
                    task_id, perspective, decision, signed_by, timestamp
                 ) VALUES ('t-1', 'legal', 'approved', 'ana', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let err = db.with_conn(|conn| receipts_for(conn, "t-1")).unwrap_err();
        assert!(err.to_string().contains("unknown perspective"));
    }

    #[test]
    fn test_set_completed_missing_task() {
        let db = StoreDb::open_in_memory().unwrap();
        let hit = db.with_conn(|conn| set_completed(conn, "missing")).unwrap();
        assert!(!hit);
    }
}
