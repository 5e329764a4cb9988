//! Indexer run bookkeeping

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Outcome of the most recent run of one indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    /// Indexer identifier ("skills" or "governance")
    pub id: String,
    pub last_indexed_at: String,
    pub items_indexed: i64,
    pub index_duration_ms: Option<i64>,
    /// "ok", "partial", or "failed"
    pub status: String,
    pub error_message: Option<String>,
}

impl IndexMetadata {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            last_indexed_at: row.get("last_indexed_at")?,
            items_indexed: row.get("items_indexed")?,
            index_duration_ms: row.get("index_duration_ms")?,
            status: row.get("status")?,
            error_message: row.get("error_message")?,
        })
    }
}

pub fn write_metadata(conn: &Connection, meta: &IndexMetadata) -> Result<(), CoreError> {
    conn.execute(
        r#"
        INSERT INTO index_metadata (
            id, last_indexed_at, items_indexed, index_duration_ms, status, error_message
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            last_indexed_at = excluded.last_indexed_at,
            items_indexed = excluded.items_indexed,
            index_duration_ms = excluded.index_duration_ms,
            status = excluded.status,
            error_message = excluded.error_message
        "#,
        params![
            meta.id,
            meta.last_indexed_at,
            meta.items_indexed,
            meta.index_duration_ms,
            meta.status,
            meta.error_message,
        ],
    )?;
    Ok(())
}

pub fn get_metadata(conn: &Connection, id: &str) -> Result<Option<IndexMetadata>, CoreError> {
    let row = conn
        .query_row(
            "SELECT * FROM index_metadata WHERE id = ?",
            params![id],
            IndexMetadata::from_row,
        )
        .optional()?;
    Ok(row)
}
