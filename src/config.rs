//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub roots: RootsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub autonomy: AutonomyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Data directory (holds the embedded store)
    pub data_dir: PathBuf,
}

/// Directory roots this node indexes and watches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootsConfig {
    #[serde(default = "default_skills_root")]
    pub skills: PathBuf,

    #[serde(default = "default_governance_root")]
    pub governance: PathBuf,

    #[serde(default = "default_tasks_root")]
    pub tasks: PathBuf,

    /// Manifest of expected governance documents
    #[serde(default = "default_manifest_path")]
    pub manifest: PathBuf,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            skills: default_skills_root(),
            governance: default_governance_root(),
            tasks: default_tasks_root(),
            manifest: default_manifest_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// WebSocket event feed port
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_skill_max_items")]
    pub skill_max_items: usize,

    #[serde(default = "default_skill_max_bytes")]
    pub skill_max_bytes: u64,

    #[serde(default = "default_governance_max_items")]
    pub governance_max_items: usize,

    #[serde(default = "default_governance_max_bytes")]
    pub governance_max_bytes: u64,

    #[serde(default = "default_search_max_entries")]
    pub search_max_entries: usize,

    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            skill_max_items: default_skill_max_items(),
            skill_max_bytes: default_skill_max_bytes(),
            governance_max_items: default_governance_max_items(),
            governance_max_bytes: default_governance_max_bytes(),
            search_max_entries: default_search_max_entries(),
            search_ttl_secs: default_search_ttl_secs(),
        }
    }
}

/// Risk thresholds for autonomy mode selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomyConfig {
    /// Risk score at or above which the AI runs consultative
    #[serde(default = "default_consultative_threshold")]
    pub consultative_threshold: u8,

    /// Risk score at or above which the AI runs collaborative
    #[serde(default = "default_collaborative_threshold")]
    pub collaborative_threshold: u8,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            consultative_threshold: default_consultative_threshold(),
            collaborative_threshold: default_collaborative_threshold(),
        }
    }
}

// Defaults
fn default_skills_root() -> PathBuf { PathBuf::from("skills") }
fn default_governance_root() -> PathBuf { PathBuf::from("governance") }
fn default_tasks_root() -> PathBuf { PathBuf::from("tasks") }
fn default_manifest_path() -> PathBuf { PathBuf::from("governance/manifest.json") }
fn default_ws_port() -> u16 { 8714 }
fn default_skill_max_items() -> usize { 100 }
fn default_skill_max_bytes() -> u64 { 10 * 1024 * 1024 } // 10 MiB
fn default_governance_max_items() -> usize { 50 }
fn default_governance_max_bytes() -> u64 { 5 * 1024 * 1024 } // 5 MiB
fn default_search_max_entries() -> usize { 500 }
fn default_search_ttl_secs() -> u64 { 300 }
fn default_consultative_threshold() -> u8 { 70 }
fn default_collaborative_threshold() -> u8 { 40 }

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                id: "accord-1".to_string(),
                data_dir: PathBuf::from("/var/lib/accord"),
            },
            roots: RootsConfig::default(),
            api: ApiConfig::default(),
            cache: CacheConfig::default(),
            autonomy: AutonomyConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }
}
