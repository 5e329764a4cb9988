//! Typed events shared by the file watcher and the event hub.
//!
//! Two families live here:
//!
//! - `FileChangeEvent` - ephemeral, in-process notifications emitted by the
//!   watcher and consumed by indexer re-runs.
//! - `Envelope` - the JSON wire format pushed to connected observers:
//!   `{"type": ..., "data": ..., "timestamp": epoch-ms, "source"?: ...}`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Which watched root an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchTarget {
    Skills,
    Governance,
    Tasks,
}

impl WatchTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchTarget::Skills => "skills",
            WatchTarget::Governance => "governance",
            WatchTarget::Tasks => "tasks",
        }
    }
}

/// Kind of filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// A filtered filesystem change on one of the watched roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub change: ChangeKind,
    pub target: WatchTarget,
    pub path: PathBuf,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl FileChangeEvent {
    pub fn new(change: ChangeKind, target: WatchTarget, path: PathBuf) -> Self {
        Self {
            change,
            target,
            path,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Wire envelope for every event pushed to observers.
///
/// The `data` payload is domain-specific and documented by each broadcaster
/// call site; the envelope shape is fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, data: Value, source: Option<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now().timestamp_millis(),
            source,
        }
    }
}
