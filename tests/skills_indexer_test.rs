//! Integration tests for skill descriptor indexing

use std::path::Path;
use std::sync::Arc;

use accord_node::cache::CacheManager;
use accord_node::config::CacheConfig;
use accord_node::db::StoreDb;
use accord_node::events::Envelope;
use accord_node::index::SkillIndexer;
use accord_node::CoreError;
use tokio::sync::broadcast;

fn write_descriptor(root: &Path, category: &str, name: &str, triggers: &str) {
    let dir = root.join(category);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("SKILL.md"),
        format!(
            "# {name}\n\n## Metadata\n- name: {name}\n- description: Does {name} things\n- triggers: [{triggers}]\n- version: 1.0\n- workflow_steps: 2\n\n## Workflow\n1. Step one\n"
        ),
    )
    .unwrap();
}

fn indexer(root: &Path) -> SkillIndexer {
    let db = Arc::new(StoreDb::open_in_memory().unwrap());
    let cache = CacheManager::new(&CacheConfig::default());
    SkillIndexer::new(db, cache, root.to_path_buf())
}

#[test]
fn indexes_descriptors_and_skips_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review, pr");
    write_descriptor(dir.path(), "deploy", "Deploy Check", "deploy");

    let indexer = indexer(dir.path());

    let first = indexer.index_all().unwrap();
    assert_eq!(first.total, 2);
    assert_eq!(first.indexed, 2);
    assert_eq!(first.skipped, 0);
    assert!(first.failures.is_empty());

    // No filesystem change: everything is skipped by hash
    let second = indexer.index_all().unwrap();
    assert_eq!(second.total, 2);
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);
}

#[test]
fn changed_descriptor_is_reindexed() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");

    let indexer = indexer(dir.path());
    indexer.index_all().unwrap();

    write_descriptor(dir.path(), "review", "PR Review", "review, pull-request");
    let report = indexer.index_all().unwrap();
    assert_eq!(report.indexed, 1);
    assert_eq!(report.skipped, 0);

    let skill = indexer.get_skill("pr-review").unwrap();
    assert!(skill.triggers.contains(&"pull-request".to_string()));
}

#[test]
fn get_skill_loads_body_and_records_access() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");

    let indexer = indexer(dir.path());
    indexer.index_all().unwrap();

    let skill = indexer.get_skill("pr-review").unwrap();
    assert_eq!(skill.category, "review");
    assert!(skill.body.as_deref().unwrap().contains("## Metadata"));
    assert_eq!(skill.access_count, 1);

    let missing = indexer.get_skill("nope");
    assert!(matches!(missing, Err(CoreError::SkillNotFound(_))));
}

#[test]
fn repeated_gets_keep_cached_access_count_in_step() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");

    let db = Arc::new(StoreDb::open_in_memory().unwrap());
    let cache = CacheManager::new(&CacheConfig::default());
    let indexer = SkillIndexer::new(db.clone(), cache, dir.path().to_path_buf());
    indexer.index_all().unwrap();

    let first = indexer.get_skill("pr-review").unwrap();
    assert_eq!(first.access_count, 1);

    // Second read is a cache hit; the returned row must still carry
    // the incremented count
    let second = indexer.get_skill("pr-review").unwrap();
    assert_eq!(second.access_count, 2);

    let stored = db
        .with_conn(|conn| accord_node::db::skills::get_skill(conn, "pr-review"))
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_count, 2);
    assert_eq!(second.last_accessed, stored.last_accessed);
}

#[test]
fn removed_descriptor_is_pruned_from_index_and_search() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");
    write_descriptor(dir.path(), "deploy", "Deploy Check", "deploy");

    let (tx, mut rx) = broadcast::channel::<Envelope>(16);
    let db = Arc::new(StoreDb::open_in_memory().unwrap());
    let cache = CacheManager::new(&CacheConfig::default());
    let indexer = SkillIndexer::new(db, cache, dir.path().to_path_buf()).with_events(tx);
    indexer.index_all().unwrap();

    // Prime the caches the removal must clear
    indexer.get_skill("pr-review").unwrap();
    assert_eq!(indexer.search_skills("review", 10).unwrap().len(), 1);
    while rx.try_recv().is_ok() {}

    let descriptor = dir.path().join("review/SKILL.md");
    std::fs::remove_file(&descriptor).unwrap();
    let removed = indexer.remove_by_path(&descriptor).unwrap();
    assert_eq!(removed.as_deref(), Some("pr-review"));

    let gone = indexer.get_skill("pr-review");
    assert!(matches!(gone, Err(CoreError::SkillNotFound(_))));
    assert!(indexer.search_skills("review", 10).unwrap().is_empty());
    // The other skill is untouched
    assert!(indexer.get_skill("deploy-check").is_ok());

    let notice = rx.try_recv().unwrap();
    assert_eq!(notice.event_type, "skill_removed");
    assert_eq!(notice.data["skillId"], "pr-review");

    // Unindexed paths are a no-op
    let again = indexer.remove_by_path(&descriptor).unwrap();
    assert!(again.is_none());
}

#[test]
fn reindex_emits_cache_invalidation_notice() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");

    let (tx, mut rx) = broadcast::channel::<Envelope>(16);
    let db = Arc::new(StoreDb::open_in_memory().unwrap());
    let cache = CacheManager::new(&CacheConfig::default());
    let indexer = SkillIndexer::new(db, cache, dir.path().to_path_buf()).with_events(tx);

    indexer.index_all().unwrap();

    let notice = rx.try_recv().unwrap();
    assert_eq!(notice.event_type, "cache_invalidated");
    assert_eq!(notice.source.as_deref(), Some("skills"));
    assert_eq!(notice.data["scope"], "search");
}

#[test]
fn search_and_trigger_lookup() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review, pr");
    write_descriptor(dir.path(), "deploy", "Deploy Check", "deploy");

    let indexer = indexer(dir.path());
    indexer.index_all().unwrap();

    let hits = indexer.search_skills("deploy", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].skill_id, "deploy-check");

    // Second call hits the search cache and agrees
    let cached = indexer.search_skills("deploy", 10).unwrap();
    assert_eq!(cached.len(), 1);

    let by_trigger = indexer.find_by_trigger("pr", 10).unwrap();
    assert_eq!(by_trigger.len(), 1);
    assert_eq!(by_trigger[0].skill_id, "pr-review");
}

#[test]
fn malformed_descriptor_is_itemized_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");

    let bad_dir = dir.path().join("broken");
    std::fs::create_dir_all(&bad_dir).unwrap();
    std::fs::write(bad_dir.join("SKILL.md"), "# No metadata here\n").unwrap();

    let indexer = indexer(dir.path());
    let report = indexer.index_all().unwrap();

    assert_eq!(report.total, 2);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.contains("broken"));
}

#[test]
fn validate_skill_detects_modified_file() {
    let dir = tempfile::tempdir().unwrap();
    write_descriptor(dir.path(), "review", "PR Review", "review");

    let indexer = indexer(dir.path());
    indexer.index_all().unwrap();

    let clean = indexer.validate_skill("pr-review").unwrap();
    assert!(clean.valid);
    assert_eq!(clean.actual_hash.as_deref(), Some(clean.expected_hash.as_str()));

    std::fs::write(
        dir.path().join("review/SKILL.md"),
        "## Metadata\n- name: PR Review\n\ntampered\n",
    )
    .unwrap();

    let tampered = indexer.validate_skill("pr-review").unwrap();
    assert!(!tampered.valid);
    assert_ne!(tampered.actual_hash.as_deref(), Some(tampered.expected_hash.as_str()));
}
