//! Error types for accord-node

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Skill not found: {0}")]
    SkillNotFound(String),

    #[error("Governance document not found: {0}")]
    DocumentNotFound(String),

    #[error("Perspective already signed off: {0}")]
    AlreadySignedOff(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
