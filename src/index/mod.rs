//! Filesystem indexers feeding the embedded store.

pub mod governance;
pub mod skills;

pub use governance::{GovernanceIndexer, GovernanceManifest, ValidationSummary};
pub use skills::{IndexReport, SkillIndexer};
