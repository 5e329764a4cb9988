//! accord-node: governance acceleration daemon
//!
//! Indexes skill descriptors and governance documents into an embedded
//! store, serves them through bounded caches, tracks four-perspective
//! task sign-off, watches the source roots for changes, and pushes
//! change events to WebSocket observers.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde_json::json;
use tracing::{debug, error, info, warn};

use accord_node::accountability::{AccountabilityEngine, AiModeEngine, ModeThresholds};
use accord_node::broadcast::EventHub;
use accord_node::cache::CacheManager;
use accord_node::config::Config;
use accord_node::db::StoreDb;
use accord_node::events::{ChangeKind, Envelope, WatchTarget};
use accord_node::index::{GovernanceIndexer, SkillIndexer};
use accord_node::watcher::FileWatcher;
use accord_node::CoreError;

#[derive(Parser)]
#[command(name = "accord-node")]
#[command(about = "Governance acceleration daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "accord-node.toml")]
    config: String,

    /// Data directory
    #[arg(short, long, env = "ACCORD_DATA_DIR")]
    data_dir: Option<String>,

    /// Node ID (overrides config file)
    #[arg(long, env = "ACCORD_NODE_ID")]
    node_id: Option<String>,

    /// WebSocket event feed port (overrides config file)
    #[arg(long, env = "ACCORD_WS_PORT")]
    ws_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("accord_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    info!("Starting accord-node");
    info!("Config file: {}", cli.config);

    let mut config = if std::path::Path::new(&cli.config).exists() {
        Config::load(std::path::Path::new(&cli.config))?
    } else {
        info!("Config file not found, using defaults");
        Config::default()
    };

    if let Some(node_id) = cli.node_id {
        config.node.id = node_id;
    }
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = PathBuf::from(data_dir);
    }
    if let Some(ws_port) = cli.ws_port {
        config.api.ws_port = ws_port;
    }

    info!("Node ID: {}", config.node.id);
    info!("Data dir: {}", config.node.data_dir.display());

    std::fs::create_dir_all(&config.node.data_dir)?;
    let db = Arc::new(StoreDb::open(&config.node.data_dir)?);
    let cache = CacheManager::new(&config.cache);

    // Engines and indexers push their notices here; the main loop
    // forwards them to the hub alongside watcher events
    let (events_tx, mut notices) = tokio::sync::broadcast::channel::<Envelope>(256);

    let skills = Arc::new(
        SkillIndexer::new(db.clone(), cache.clone(), config.roots.skills.clone())
            .with_events(events_tx.clone()),
    );
    let governance = Arc::new(GovernanceIndexer::new(
        db.clone(),
        cache.clone(),
        config.roots.governance.clone(),
        config.roots.manifest.clone(),
    ));
    let accountability = Arc::new(
        AccountabilityEngine::new(db.clone()).with_events(events_tx.clone()),
    );
    let ai_modes = Arc::new(
        AiModeEngine::new(db.clone(), ModeThresholds::from(&config.autonomy))
            .with_events(events_tx.clone()),
    );
    let stats = db.stats()?;
    info!(
        skills = stats.skills,
        governance_docs = stats.governance_docs,
        tasks = stats.tasks,
        "Store opened"
    );

    let hub = Arc::new(EventHub::new());
    hub.clone().start(config.api.ws_port).await?;

    // Initial index of both roots
    {
        let skills = skills.clone();
        match tokio::task::spawn_blocking(move || skills.index_all()).await? {
            Ok(report) => {
                hub.broadcast("index_complete", json!(report), Some("skills".into())).await;
            }
            Err(e) => error!(error = %e, "Initial skill indexing failed"),
        }
    }
    if let Err(e) = skills.warm_cache(config.cache.skill_max_items as u32) {
        warn!(error = %e, "Skill cache warm failed");
    }

    {
        let governance = governance.clone();
        match tokio::task::spawn_blocking(move || governance.load_and_cache_index()).await? {
            Ok(indexed) => {
                hub.broadcast("index_complete", json!({ "indexed": indexed }), Some("governance".into())).await;
            }
            Err(e) => error!(error = %e, "Governance manifest load failed"),
        }
    }
    match governance.validate_all() {
        Ok(summary) => {
            if summary.invalid > 0 {
                warn!(invalid = summary.invalid, "Governance documents drifted at startup");
            }
            hub.broadcast("governance_validated", json!(summary), Some("governance".into())).await;
        }
        Err(e) => warn!(error = %e, "Governance validation failed"),
    }

    let mut watcher = FileWatcher::new(&config.roots);
    if let Err(e) = watcher.start() {
        warn!(error = %e, "File watching disabled");
    }
    let mut changes = watcher.subscribe();

    info!("accord-node ready");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            notice = notices.recv() => {
                match notice {
                    Ok(envelope) => hub.broadcast_envelope(envelope).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Notice stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            change = changes.recv() => {
                let event = match change {
                    Ok(ev) => ev,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Change event stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                hub.broadcast("file_change", json!(event), Some("watcher".into())).await;

                match event.target {
                    WatchTarget::Skills if event.change == ChangeKind::Removed => {
                        let skills = skills.clone();
                        let path = event.path.clone();
                        tokio::spawn(async move {
                            match tokio::task::spawn_blocking(move || skills.remove_by_path(&path)).await {
                                Ok(Ok(Some(skill_id))) => {
                                    info!(skill_id = %skill_id, "Dropped removed skill from index");
                                }
                                Ok(Ok(None)) => {}
                                Ok(Err(e)) => warn!(error = %e, "Skill removal failed"),
                                Err(e) => warn!(error = %e, "Skill removal panicked"),
                            }
                        });
                    }
                    WatchTarget::Skills => {
                        let skills = skills.clone();
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            match tokio::task::spawn_blocking(move || skills.index_all()).await {
                                Ok(Ok(report)) => {
                                    hub.broadcast("index_complete", json!(report), Some("skills".into())).await;
                                }
                                Ok(Err(e)) => warn!(error = %e, "Skill re-index failed"),
                                Err(e) => warn!(error = %e, "Skill re-index panicked"),
                            }
                        });
                    }
                    WatchTarget::Governance => {
                        let governance = governance.clone();
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            let result = tokio::task::spawn_blocking(move || {
                                governance.load_and_cache_index()?;
                                governance.detect_drift()
                            })
                            .await;
                            match result {
                                Ok(Ok(drifted)) if !drifted.is_empty() => {
                                    hub.broadcast("governance_drift", json!(drifted), Some("governance".into())).await;
                                }
                                Ok(Ok(_)) => {}
                                Ok(Err(e)) => warn!(error = %e, "Governance re-check failed"),
                                Err(e) => warn!(error = %e, "Governance re-check panicked"),
                            }
                        });
                    }
                    WatchTarget::Tasks => {
                        // Run manifests live at tasks/<task-id>/run-manifest.json
                        // and are owned by the task runner; a change means the
                        // task's risk picture may have moved
                        let Some(task_id) = event
                            .path
                            .parent()
                            .and_then(|p| p.file_name())
                            .map(|n| n.to_string_lossy().to_string())
                        else {
                            continue;
                        };
                        let accountability = accountability.clone();
                        let ai_modes = ai_modes.clone();
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            let result = tokio::task::spawn_blocking(move || {
                                let task = accountability.get_task(&task_id)?;
                                ai_modes.auto_evaluate_mode(&task.task_id)?;
                                accountability.get_task(&task.task_id)
                            })
                            .await;
                            match result {
                                Ok(Ok(task)) => {
                                    hub.broadcast("task_updated", json!(task), Some("tasks".into())).await;
                                }
                                // Manifests without a tracked task are not ours
                                Ok(Err(CoreError::TaskNotFound(id))) => {
                                    debug!(task_id = %id, "Run manifest for untracked task");
                                }
                                Ok(Err(e)) => warn!(error = %e, "Task re-evaluation failed"),
                                Err(e) => warn!(error = %e, "Task re-evaluation panicked"),
                            }
                        });
                    }
                }
            }
        }
    }

    watcher.stop();
    hub.stop().await;
    info!("accord-node stopped");
    Ok(())
}
