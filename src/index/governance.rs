//! Governance document indexer and drift detection.
//!
//! The manifest is the source of truth for which documents exist, their
//! expected content hashes, and their precedence order. Validation
//! recomputes file hashes and writes the drift flag back to the store;
//! drift is always reported and never repaired.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::CacheManager;
use crate::db::governance::{self as gov_db, DocClass, GovernanceDocRow};
use crate::db::meta::{self, IndexMetadata};
use crate::db::StoreDb;
use crate::error::CoreError;

use super::skills::content_hash;

/// Strictly typed manifest schema
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceManifest {
    pub documents: Vec<ManifestDocument>,
    /// Paths in descending authority, highest first
    #[serde(default)]
    pub precedence: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// Defaults to the path's file stem
    pub name: Option<String>,
    pub path: String,
    pub sha256: String,
    #[serde(default)]
    pub required_tokens: Vec<String>,
    #[serde(default = "default_class")]
    pub class: DocClass,
}

fn default_class() -> DocClass {
    DocClass::Reference
}

/// Result of validating one document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocValidation {
    pub name: String,
    pub path: String,
    pub valid: bool,
    pub drifted: bool,
    pub actual_hash: Option<String>,
    pub expected_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub valid: usize,
    pub invalid: usize,
    pub results: Vec<DocValidation>,
}

pub struct GovernanceIndexer {
    db: Arc<StoreDb>,
    cache: CacheManager,
    root: PathBuf,
    manifest_path: PathBuf,
}

impl GovernanceIndexer {
    pub fn new(
        db: Arc<StoreDb>,
        cache: CacheManager,
        root: PathBuf,
        manifest_path: PathBuf,
    ) -> Self {
        Self {
            db,
            cache,
            root,
            manifest_path,
        }
    }

    /// Load the manifest and persist one row per document plus the
    /// precedence table. Returns the number of documents indexed.
    pub fn load_and_cache_index(&self) -> Result<usize, CoreError> {
        let started = std::time::Instant::now();
        let content = std::fs::read_to_string(&self.manifest_path)?;
        let manifest: GovernanceManifest = serde_json::from_str(&content)
            .map_err(|e| CoreError::Manifest(format!("{}: {}", self.manifest_path.display(), e)))?;

        self.db
            .with_conn_mut(|conn| gov_db::replace_precedence(conn, &manifest.precedence))?;

        let mut indexed = 0;
        for doc in &manifest.documents {
            let name = doc
                .name
                .clone()
                .unwrap_or_else(|| stem_of(&doc.path));
            let precedence = manifest
                .precedence
                .iter()
                .position(|p| *p == doc.path)
                .map(|i| i as i64)
                .unwrap_or(manifest.precedence.len() as i64);

            let row = GovernanceDocRow {
                doc_name: name.clone(),
                path: doc.path.clone(),
                sha256: doc.sha256.clone(),
                required_tokens: doc.required_tokens.clone(),
                class: doc.class,
                precedence,
                file_hash: None,
                hash_drift: false,
                last_checked: None,
            };
            self.db.with_conn(|conn| gov_db::upsert_document(conn, &row))?;
            self.cache.invalidate_governance(&name);
            indexed += 1;
        }

        let duration_ms = started.elapsed().as_millis() as i64;
        self.db.with_conn(|conn| {
            meta::write_metadata(
                conn,
                &IndexMetadata {
                    id: "governance".to_string(),
                    last_indexed_at: chrono::Utc::now().to_rfc3339(),
                    items_indexed: indexed as i64,
                    index_duration_ms: Some(duration_ms),
                    status: "ok".to_string(),
                    error_message: None,
                },
            )
        })?;

        info!(indexed, "Governance index loaded");
        Ok(indexed)
    }

    /// Recompute one document's hash and write the check back. A
    /// missing file reads as drifted, not an error.
    pub fn validate_document(&self, name: &str) -> Result<DocValidation, CoreError> {
        let doc = self
            .db
            .with_conn(|conn| gov_db::get_document(conn, name))?
            .ok_or_else(|| CoreError::DocumentNotFound(name.to_string()))?;

        let actual_hash = std::fs::read_to_string(self.root.join(&doc.path))
            .ok()
            .map(|c| content_hash(&c));
        let valid = actual_hash.as_deref() == Some(doc.sha256.as_str());
        let drifted = !valid;

        if drifted {
            warn!(name, path = %doc.path, "Governance document drift detected");
        }

        self.db.with_conn(|conn| {
            gov_db::update_check(conn, name, actual_hash.as_deref(), drifted)
        })?;
        self.cache.invalidate_governance(name);

        Ok(DocValidation {
            name: name.to_string(),
            path: doc.path,
            valid,
            drifted,
            actual_hash,
            expected_hash: doc.sha256,
        })
    }

    pub fn validate_all(&self) -> Result<ValidationSummary, CoreError> {
        let docs = self.db.with_conn(gov_db::list_documents)?;
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            results.push(self.validate_document(&doc.doc_name)?);
        }
        let valid = results.iter().filter(|r| r.valid).count();
        let invalid = results.len() - valid;
        Ok(ValidationSummary {
            valid,
            invalid,
            results,
        })
    }

    /// Documents currently drifted. Re-validates documents not already
    /// flagged so a stale flag cannot hide fresh drift.
    pub fn detect_drift(&self) -> Result<Vec<GovernanceDocRow>, CoreError> {
        let unflagged = self.db.with_conn(gov_db::list_unflagged)?;
        for doc in unflagged {
            self.validate_document(&doc.doc_name)?;
        }
        self.db.with_conn(gov_db::list_drifted)
    }

    pub fn get_document(&self, name: &str) -> Result<GovernanceDocRow, CoreError> {
        if let Some(cached) = self.cache.get_governance(name) {
            return Ok(cached);
        }
        let doc = self
            .db
            .with_conn(|conn| gov_db::get_document(conn, name))?
            .ok_or_else(|| CoreError::DocumentNotFound(name.to_string()))?;
        self.cache.set_governance(&doc);
        Ok(doc)
    }

    pub fn list_documents(&self) -> Result<Vec<GovernanceDocRow>, CoreError> {
        self.db.with_conn(gov_db::list_documents)
    }

    pub fn warm_cache(&self) -> Result<usize, CoreError> {
        let docs = self.db.with_conn(gov_db::list_documents)?;
        Ok(self.cache.warm_governance(docs))
    }
}

fn stem_of(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
