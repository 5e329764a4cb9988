//! Integration tests for governance indexing and drift detection

use std::path::Path;
use std::sync::Arc;

use accord_node::cache::CacheManager;
use accord_node::config::CacheConfig;
use accord_node::db::StoreDb;
use accord_node::index::GovernanceIndexer;
use accord_node::CoreError;
use sha2::{Digest, Sha256};

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    indexer: GovernanceIndexer,
}

/// Two documents on disk, one manifest; charter's manifest hash matches
/// the file, process's does not
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("governance");
    std::fs::create_dir_all(&root).unwrap();

    let charter = "# Charter\n\nAll changes MUST be signed off.\n";
    let process = "# Process\n\nTasks flow through four perspectives.\n";
    std::fs::write(root.join("charter.md"), charter).unwrap();
    std::fs::write(root.join("process.md"), process).unwrap();

    let manifest = serde_json::json!({
        "documents": [
            {
                "name": "charter",
                "path": "charter.md",
                "sha256": sha256_hex(charter),
                "requiredTokens": ["MUST"],
                "class": "normative"
            },
            {
                "name": "process",
                "path": "process.md",
                "sha256": "0000000000000000000000000000000000000000000000000000000000000000",
                "class": "infra"
            },
            {
                "name": "missing",
                "path": "missing.md",
                "sha256": sha256_hex("never written")
            }
        ],
        "precedence": ["charter.md", "process.md", "missing.md"]
    });
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();

    let db = Arc::new(StoreDb::open_in_memory().unwrap());
    let cache = CacheManager::new(&CacheConfig::default());
    let indexer = GovernanceIndexer::new(db, cache, root.clone(), manifest_path);

    Fixture {
        _dir: dir,
        root,
        indexer,
    }
}

#[test]
fn manifest_load_persists_docs_and_precedence() {
    let f = fixture();
    assert_eq!(f.indexer.load_and_cache_index().unwrap(), 3);

    let docs = f.indexer.list_documents().unwrap();
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[0].doc_name, "charter");
    assert_eq!(docs[0].precedence, 0);
    assert_eq!(docs[1].doc_name, "process");
    assert_eq!(docs[2].doc_name, "missing");
}

#[test]
fn validate_document_hash_idempotence() {
    let f = fixture();
    f.indexer.load_and_cache_index().unwrap();

    let first = f.indexer.validate_document("charter").unwrap();
    let second = f.indexer.validate_document("charter").unwrap();

    assert!(first.valid && !first.drifted);
    assert_eq!(first.actual_hash, second.actual_hash);
    assert!(!second.drifted);
}

#[test]
fn mismatched_hash_surfaces_as_drift() {
    let f = fixture();
    f.indexer.load_and_cache_index().unwrap();

    let result = f.indexer.validate_document("process").unwrap();
    assert!(!result.valid);
    assert!(result.drifted);
    assert!(result.actual_hash.is_some());
    assert_ne!(result.actual_hash.as_deref(), Some(result.expected_hash.as_str()));

    // The check writes back to the store
    let stored = f.indexer.get_document("process").unwrap();
    assert!(stored.hash_drift);
    assert!(stored.last_checked.is_some());
}

#[test]
fn missing_file_is_drift_not_an_error() {
    let f = fixture();
    f.indexer.load_and_cache_index().unwrap();

    let result = f.indexer.validate_document("missing").unwrap();
    assert!(!result.valid);
    assert!(result.drifted);
    assert!(result.actual_hash.is_none());
}

#[test]
fn validate_all_aggregates_counts() {
    let f = fixture();
    f.indexer.load_and_cache_index().unwrap();

    let summary = f.indexer.validate_all().unwrap();
    assert_eq!(summary.valid, 1);
    assert_eq!(summary.invalid, 2);
    assert_eq!(summary.results.len(), 3);
}

#[test]
fn detect_drift_revalidates_unflagged_documents() {
    let f = fixture();
    f.indexer.load_and_cache_index().unwrap();

    // Charter is clean at first check
    assert!(f.indexer.validate_document("charter").unwrap().valid);

    // Tamper after the check; the stale clean flag must not hide it
    std::fs::write(f.root.join("charter.md"), "# Charter\n\nedited\n").unwrap();

    let drifted = f.indexer.detect_drift().unwrap();
    let names: Vec<&str> = drifted.iter().map(|d| d.doc_name.as_str()).collect();
    assert!(names.contains(&"charter"));

    // Drift is reported, never repaired
    assert!(Path::new(&f.root.join("charter.md")).exists());
    let again = f.indexer.validate_document("charter").unwrap();
    assert!(again.drifted);
}

#[test]
fn unknown_document_is_an_error() {
    let f = fixture();
    f.indexer.load_and_cache_index().unwrap();
    let err = f.indexer.validate_document("nope");
    assert!(matches!(err, Err(CoreError::DocumentNotFound(_))));
}
