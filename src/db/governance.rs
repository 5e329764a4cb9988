//! Governance document cache rows and precedence table

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Governance document classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocClass {
    Normative,
    Infra,
    Reference,
}

impl DocClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocClass::Normative => "normative",
            DocClass::Infra => "infra",
            DocClass::Reference => "reference",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "normative" => DocClass::Normative,
            "infra" => DocClass::Infra,
            _ => DocClass::Reference,
        }
    }
}

/// Cached governance document, manifest-derived with validation state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceDocRow {
    pub doc_name: String,
    pub path: String,
    /// Expected content hash from the manifest
    pub sha256: String,
    pub required_tokens: Vec<String>,
    pub class: DocClass,
    pub precedence: i64,
    /// Hash observed by the most recent validation pass
    pub file_hash: Option<String>,
    pub hash_drift: bool,
    pub last_checked: Option<String>,
}

impl GovernanceDocRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let tokens_json: String = row.get("required_tokens_json")?;
        let class: String = row.get("class")?;
        Ok(Self {
            doc_name: row.get("doc_name")?,
            path: row.get("path")?,
            sha256: row.get("sha256")?,
            required_tokens: serde_json::from_str(&tokens_json).unwrap_or_default(),
            class: DocClass::parse(&class),
            precedence: row.get("precedence")?,
            file_hash: row.get("file_hash")?,
            hash_drift: row.get::<_, i64>("hash_drift")? != 0,
            last_checked: row.get("last_checked")?,
        })
    }
}

/// Insert or update a manifest-derived row, preserving validation state
/// across manifest reloads
pub fn upsert_document(conn: &Connection, doc: &GovernanceDocRow) -> Result<(), CoreError> {
    let tokens_json = serde_json::to_string(&doc.required_tokens)?;
    conn.execute(
        r#"
        INSERT INTO governance_cache (
            doc_name, path, sha256, required_tokens_json, class, precedence
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(doc_name) DO UPDATE SET
            path = excluded.path,
            sha256 = excluded.sha256,
            required_tokens_json = excluded.required_tokens_json,
            class = excluded.class,
            precedence = excluded.precedence
        "#,
        params![
            doc.doc_name,
            doc.path,
            doc.sha256,
            tokens_json,
            doc.class.as_str(),
            doc.precedence,
        ],
    )?;
    Ok(())
}

/// Get a document by name
pub fn get_document(conn: &Connection, doc_name: &str) -> Result<Option<GovernanceDocRow>, CoreError> {
    let row = conn
        .query_row(
            "SELECT * FROM governance_cache WHERE doc_name = ?",
            params![doc_name],
            GovernanceDocRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// All documents, highest precedence first (lowest ordinal)
pub fn list_documents(conn: &Connection) -> Result<Vec<GovernanceDocRow>, CoreError> {
    let mut stmt =
        conn.prepare("SELECT * FROM governance_cache ORDER BY precedence ASC, doc_name ASC")?;
    let rows = stmt
        .query_map([], GovernanceDocRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Documents flagged as drifted
pub fn list_drifted(conn: &Connection) -> Result<Vec<GovernanceDocRow>, CoreError> {
    let mut stmt = conn
        .prepare("SELECT * FROM governance_cache WHERE hash_drift = 1 ORDER BY precedence ASC")?;
    let rows = stmt
        .query_map([], GovernanceDocRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Documents not yet flagged as drifted (drift scan candidates)
pub fn list_unflagged(conn: &Connection) -> Result<Vec<GovernanceDocRow>, CoreError> {
    let mut stmt = conn
        .prepare("SELECT * FROM governance_cache WHERE hash_drift = 0 ORDER BY precedence ASC")?;
    let rows = stmt
        .query_map([], GovernanceDocRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Write back the result of a validation pass
pub fn update_check(
    conn: &Connection,
    doc_name: &str,
    file_hash: Option<&str>,
    drifted: bool,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE governance_cache SET file_hash = ?, hash_drift = ?, last_checked = ? WHERE doc_name = ?",
        params![
            file_hash,
            drifted as i64,
            chrono::Utc::now().to_rfc3339(),
            doc_name
        ],
    )?;
    Ok(())
}

/// Replace the precedence table wholesale from a manifest reload
pub fn replace_precedence(conn: &mut Connection, paths: &[String]) -> Result<(), CoreError> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM governance_precedence", [])?;
    for (ordinal, path) in paths.iter().enumerate() {
        tx.execute(
            "INSERT INTO governance_precedence (precedence_order, path) VALUES (?, ?)",
            params![ordinal as i64, path],
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Precedence-ordered paths
pub fn precedence_paths(conn: &Connection) -> Result<Vec<String>, CoreError> {
    let mut stmt =
        conn.prepare("SELECT path FROM governance_precedence ORDER BY precedence_order ASC")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
