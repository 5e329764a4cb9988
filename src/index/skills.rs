//! Skill descriptor indexer.
//!
//! Scans the skills root for `SKILL.md` descriptors, content-hashes
//! each one, and upserts changed descriptors into the store. Unchanged
//! files are skipped by hash. Read paths go through the cache manager.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cache::CacheManager;
use crate::db::meta::{self, IndexMetadata};
use crate::db::skills::{self as skill_db, SkillRow};
use crate::db::StoreDb;
use crate::error::CoreError;
use crate::events::Envelope;

const DESCRIPTOR_NAME: &str = "SKILL.md";

/// Outcome of one indexing run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub total: usize,
    pub duration_ms: u64,
    pub failures: Vec<IndexFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFailure {
    pub path: String,
    pub error: String,
}

/// Integrity check result for one skill
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillValidation {
    pub skill_id: String,
    pub valid: bool,
    pub actual_hash: Option<String>,
    pub expected_hash: String,
}

/// Parsed `## Metadata` block of a descriptor
#[derive(Debug, Clone, PartialEq)]
struct SkillMeta {
    name: String,
    description: String,
    triggers: Vec<String>,
    version: String,
    workflow_steps: i64,
}

pub struct SkillIndexer {
    db: Arc<StoreDb>,
    cache: CacheManager,
    root: PathBuf,
    events: Option<broadcast::Sender<Envelope>>,
}

impl SkillIndexer {
    pub fn new(db: Arc<StoreDb>, cache: CacheManager, root: PathBuf) -> Self {
        Self {
            db,
            cache,
            root,
            events: None,
        }
    }

    /// Attach a channel for skill-change and cache-invalidation notices
    pub fn with_events(mut self, events: broadcast::Sender<Envelope>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event_type: &str, data: serde_json::Value) {
        if let Some(tx) = &self.events {
            // Send fails only with zero subscribers
            let _ = tx.send(Envelope::new(event_type, data, Some("skills".to_string())));
        }
    }

    /// Index every descriptor under the root. Per-file failures are
    /// itemized and never abort the batch.
    pub fn index_all(&self) -> Result<IndexReport, CoreError> {
        let started = Instant::now();
        let mut report = IndexReport {
            indexed: 0,
            skipped: 0,
            total: 0,
            duration_ms: 0,
            failures: Vec::new(),
        };

        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || entry.file_name() != DESCRIPTOR_NAME {
                continue;
            }
            report.total += 1;

            match self.index_file(entry.path()) {
                Ok(true) => report.indexed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to index skill");
                    report.failures.push(IndexFailure {
                        path: entry.path().display().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        // Cached result sets may reference rows this run replaced
        self.cache.invalidate_search();
        self.emit(
            "cache_invalidated",
            json!({ "scope": "search", "reason": "reindex" }),
        );

        let status = if report.failures.is_empty() { "ok" } else { "partial" };
        self.db.with_conn(|conn| {
            meta::write_metadata(
                conn,
                &IndexMetadata {
                    id: "skills".to_string(),
                    last_indexed_at: chrono::Utc::now().to_rfc3339(),
                    items_indexed: report.indexed as i64,
                    index_duration_ms: Some(report.duration_ms as i64),
                    status: status.to_string(),
                    error_message: report.failures.first().map(|f| f.error.clone()),
                },
            )
        })?;

        info!(
            indexed = report.indexed,
            skipped = report.skipped,
            total = report.total,
            failures = report.failures.len(),
            duration_ms = report.duration_ms,
            "Skill indexing complete"
        );
        Ok(report)
    }

    /// Index one descriptor; returns false when skipped by hash
    fn index_file(&self, path: &Path) -> Result<bool, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let hash = content_hash(&content);
        let path_str = path.display().to_string();

        let stored = self
            .db
            .with_conn(|conn| skill_db::get_hash_by_path(conn, &path_str))?;
        if stored.as_deref() == Some(hash.as_str()) {
            return Ok(false);
        }

        let meta = parse_metadata(&content)
            .map_err(|e| CoreError::Parse(format!("{}: {}", path_str, e)))?;
        let skill_id = slugify(&meta.name);

        let last_modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).to_rfc3339());

        let row = SkillRow {
            skill_id: skill_id.clone(),
            name: meta.name,
            description: meta.description,
            triggers: meta.triggers,
            category: category_of(path, &self.root),
            version: meta.version,
            workflow_steps: meta.workflow_steps,
            file_path: path_str,
            last_modified,
            indexed_at: chrono::Utc::now().to_rfc3339(),
            hash,
            access_count: 0,
            last_accessed: None,
            body: None,
        };

        self.db.with_conn_mut(|conn| skill_db::upsert_skill(conn, &row))?;
        self.cache.invalidate_skill(&skill_id);
        Ok(true)
    }

    /// Get a skill, recording the access and lazily loading its body
    pub fn get_skill(&self, skill_id: &str) -> Result<SkillRow, CoreError> {
        if let Some(mut cached) = self.cache.get_skill(skill_id) {
            let accessed = self
                .db
                .with_conn(|conn| skill_db::record_access(conn, skill_id))?;
            // Keep the cached copy in step with the stored access stats
            cached.access_count += 1;
            cached.last_accessed = Some(accessed);
            self.cache.set_skill(&cached);
            return Ok(cached);
        }

        let mut skill = self
            .db
            .with_conn(|conn| skill_db::get_skill(conn, skill_id))?
            .ok_or_else(|| CoreError::SkillNotFound(skill_id.to_string()))?;

        let accessed = self
            .db
            .with_conn(|conn| skill_db::record_access(conn, skill_id))?;
        skill.access_count += 1;
        skill.last_accessed = Some(accessed);

        if skill.body.is_none() {
            let body = std::fs::read_to_string(&skill.file_path)?;
            self.db.with_conn(|conn| skill_db::set_body(conn, skill_id, &body))?;
            skill.body = Some(body);
        }

        self.cache.set_skill(&skill);
        Ok(skill)
    }

    /// Drop the skill indexed from a deleted descriptor. Returns the
    /// removed skill id, or `None` when the path was never indexed.
    /// Cached search results may reference the row, so they are cleared
    /// along with the skill's own cache entry.
    pub fn remove_by_path(&self, path: &Path) -> Result<Option<String>, CoreError> {
        let path_str = path.display().to_string();
        let Some(skill_id) = self
            .db
            .with_conn(|conn| skill_db::get_id_by_path(conn, &path_str))?
        else {
            return Ok(None);
        };

        self.db
            .with_conn_mut(|conn| skill_db::delete_skill(conn, &skill_id))?;
        self.cache.invalidate_skill(&skill_id);
        self.cache.invalidate_search();

        info!(skill_id = %skill_id, path = %path_str, "Removed deleted skill");
        self.emit(
            "skill_removed",
            json!({ "skillId": skill_id, "path": path_str }),
        );
        self.emit(
            "cache_invalidated",
            json!({ "scope": "search", "reason": "skill_removed" }),
        );
        Ok(Some(skill_id))
    }

    /// Ranked full-text search, cached per query+limit until the next
    /// re-index or TTL expiry
    pub fn search_skills(&self, query: &str, limit: u32) -> Result<Vec<SkillRow>, CoreError> {
        let key = CacheManager::search_key(query, limit);
        if let Some(cached) = self.cache.get_search(&key) {
            return Ok(cached);
        }

        let results = self
            .db
            .with_conn(|conn| skill_db::search_skills(conn, query, limit))?;
        self.cache.set_search(&key, results.clone());
        Ok(results)
    }

    pub fn find_by_trigger(&self, trigger: &str, limit: u32) -> Result<Vec<SkillRow>, CoreError> {
        self.db
            .with_conn(|conn| skill_db::find_by_trigger(conn, trigger, limit))
    }

    /// Compare the descriptor on disk against the stored hash
    pub fn validate_skill(&self, skill_id: &str) -> Result<SkillValidation, CoreError> {
        let skill = self
            .db
            .with_conn(|conn| skill_db::get_skill(conn, skill_id))?
            .ok_or_else(|| CoreError::SkillNotFound(skill_id.to_string()))?;

        let actual_hash = std::fs::read_to_string(&skill.file_path)
            .ok()
            .map(|c| content_hash(&c));

        Ok(SkillValidation {
            skill_id: skill_id.to_string(),
            valid: actual_hash.as_deref() == Some(skill.hash.as_str()),
            actual_hash,
            expected_hash: skill.hash,
        })
    }

    /// Warm the skill cache from the most-accessed rows
    pub fn warm_cache(&self, limit: u32) -> Result<usize, CoreError> {
        let rows = self.db.with_conn(|conn| skill_db::list_skills(conn, limit))?;
        Ok(self.cache.warm_skills(rows))
    }
}

pub(crate) fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

// The descriptor's immediate parent directory names its category,
// unless the descriptor sits directly in the root
fn category_of(path: &Path, root: &Path) -> String {
    path.parent()
        .filter(|p| *p != root)
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "general".to_string())
}

fn parse_metadata(content: &str) -> Result<SkillMeta, String> {
    let mut in_block = false;
    let mut name = None;
    let mut description = String::new();
    let mut triggers = Vec::new();
    let mut version = "0.0.0".to_string();
    let mut workflow_steps = 0i64;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("## Metadata") {
            in_block = true;
            continue;
        }
        if in_block && trimmed.starts_with("## ") {
            break;
        }
        if !in_block {
            continue;
        }

        let Some(item) = trimmed.strip_prefix("- ") else {
            continue;
        };
        let Some((key, value)) = item.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim().to_lowercase().as_str() {
            "name" => name = Some(value.to_string()),
            "description" => description = value.to_string(),
            "triggers" => {
                let inner = value.trim_start_matches('[').trim_end_matches(']');
                triggers = inner
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            "version" => version = value.to_string(),
            "workflow_steps" => {
                workflow_steps = value
                    .parse()
                    .map_err(|_| format!("invalid workflow_steps: {}", value))?;
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| "missing metadata field: name".to_string())?;
    if name.is_empty() {
        return Err("empty metadata field: name".to_string());
    }

    Ok(SkillMeta {
        name,
        description,
        triggers,
        version,
        workflow_steps,
    })
}
