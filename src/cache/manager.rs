//! Per-domain caches behind one shared manager.
//!
//! The manager owns three caches (skill bodies, governance documents,
//! search results) behind mutexes so it can be shared across tasks via
//! `Arc`. Lock scope is a single cache operation; nothing holds two
//! locks at once.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::cache::bounded::{BoundedCache, CacheStats};
use crate::cache::expiring::TtlCache;
use crate::config::CacheConfig;
use crate::db::governance::GovernanceDocRow;
use crate::db::skills::SkillRow;

/// Merged statistics across every cache
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub skills: CacheStats,
    pub governance: CacheStats,
    pub search_entries: usize,
    pub search_hits: u64,
    pub search_misses: u64,
}

#[derive(Clone)]
pub struct CacheManager {
    skills: Arc<Mutex<BoundedCache<SkillRow>>>,
    governance: Arc<Mutex<BoundedCache<GovernanceDocRow>>>,
    search: Arc<Mutex<TtlCache<Vec<SkillRow>>>>,
}

// Byte length of the serialized value; a flat fallback keeps the byte
// budget meaningful even if serialization fails
fn sizeof<T: Serialize>(value: &T) -> u64 {
    serde_json::to_vec(value).map(|v| v.len() as u64).unwrap_or(1024)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CacheManager {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            skills: Arc::new(Mutex::new(BoundedCache::new(
                config.skill_max_items,
                config.skill_max_bytes,
            ))),
            governance: Arc::new(Mutex::new(BoundedCache::new(
                config.governance_max_items,
                config.governance_max_bytes,
            ))),
            search: Arc::new(Mutex::new(TtlCache::new(
                config.search_max_entries,
                Duration::from_secs(config.search_ttl_secs),
            ))),
        }
    }

    // Skills

    pub fn get_skill(&self, skill_id: &str) -> Option<SkillRow> {
        lock(&self.skills).get(skill_id).cloned()
    }

    pub fn set_skill(&self, skill: &SkillRow) -> bool {
        let size = sizeof(skill);
        lock(&self.skills).set(&skill.skill_id, skill.clone(), size)
    }

    pub fn invalidate_skill(&self, skill_id: &str) {
        lock(&self.skills).delete(skill_id);
    }

    pub fn warm_skills(&self, skills: Vec<SkillRow>) -> usize {
        let entries = skills
            .into_iter()
            .map(|s| {
                let size = sizeof(&s);
                (s.skill_id.clone(), s, size)
            })
            .collect();
        let loaded = lock(&self.skills).warm(entries);
        info!(loaded, "Warmed skill cache");
        loaded
    }

    // Governance

    pub fn get_governance(&self, doc_name: &str) -> Option<GovernanceDocRow> {
        lock(&self.governance).get(doc_name).cloned()
    }

    pub fn set_governance(&self, doc: &GovernanceDocRow) -> bool {
        let size = sizeof(doc);
        lock(&self.governance).set(&doc.doc_name, doc.clone(), size)
    }

    pub fn invalidate_governance(&self, doc_name: &str) {
        lock(&self.governance).delete(doc_name);
    }

    pub fn warm_governance(&self, docs: Vec<GovernanceDocRow>) -> usize {
        let entries = docs
            .into_iter()
            .map(|d| {
                let size = sizeof(&d);
                (d.doc_name.clone(), d, size)
            })
            .collect();
        let loaded = lock(&self.governance).warm(entries);
        info!(loaded, "Warmed governance cache");
        loaded
    }

    // Search results

    pub fn search_key(query: &str, limit: u32) -> String {
        format!("search:{}:{}", query, limit)
    }

    pub fn get_search(&self, key: &str) -> Option<Vec<SkillRow>> {
        lock(&self.search).get(key).cloned()
    }

    pub fn set_search(&self, key: &str, results: Vec<SkillRow>) {
        lock(&self.search).set(key, results);
    }

    /// Drop every cached search result. Called after any re-index since
    /// cached result sets may reference stale rows.
    pub fn invalidate_search(&self) {
        lock(&self.search).clear();
    }

    pub fn clear_all(&self) {
        lock(&self.skills).clear();
        lock(&self.governance).clear();
        lock(&self.search).clear();
    }

    pub fn stats(&self) -> ManagerStats {
        let search = lock(&self.search);
        ManagerStats {
            skills: lock(&self.skills).stats(),
            governance: lock(&self.governance).stats(),
            search_entries: search.len(),
            search_hits: search.hits(),
            search_misses: search.misses(),
        }
    }
}
