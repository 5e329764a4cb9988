//! Governance acceleration layer: indexes skill and governance
//! documents into an embedded store, tracks four-perspective task
//! sign-off with risk scoring and AI autonomy modes, watches the
//! source directories for changes, and pushes events to WebSocket
//! observers.

pub mod accountability;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod index;
pub mod watcher;

pub use error::CoreError;
