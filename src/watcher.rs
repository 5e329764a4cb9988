//! Filesystem watcher over the skills, governance, and tasks roots.
//!
//! One non-recursive watch per root, filtered to the filenames each
//! domain cares about. Matching changes become `FileChangeEvent`s on a
//! broadcast channel; indexers and the event hub subscribe
//! independently. Raw events outside the filters never surface.

use std::path::{Path, PathBuf};

use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::RootsConfig;
use crate::events::{ChangeKind, FileChangeEvent, WatchTarget};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct FileWatcher {
    roots: Vec<(WatchTarget, PathBuf)>,
    tx: broadcast::Sender<FileChangeEvent>,
    watchers: Vec<RecommendedWatcher>,
}

impl FileWatcher {
    pub fn new(roots: &RootsConfig) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            roots: vec![
                (WatchTarget::Skills, roots.skills.clone()),
                (WatchTarget::Governance, roots.governance.clone()),
                (WatchTarget::Tasks, roots.tasks.clone()),
            ],
            tx,
            watchers: Vec::new(),
        }
    }

    /// Subscribe to filtered change events. Each receiver sees every
    /// event from the point of subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.tx.subscribe()
    }

    /// Start watching every root. Idempotent; a failed root is logged
    /// and the others keep watching. Fails only when no root could be
    /// watched at all.
    pub fn start(&mut self) -> Result<(), crate::error::CoreError> {
        if !self.watchers.is_empty() {
            debug!("File watcher already running");
            return Ok(());
        }

        for (target, root) in self.roots.clone() {
            let tx = self.tx.clone();
            let handler = move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some(change) = map_kind(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        if !matches_target(target, &path) {
                            continue;
                        }
                        // Send fails only with zero subscribers
                        let _ = tx.send(FileChangeEvent::new(change, target, path));
                    }
                }
                Err(e) => warn!(target = target.as_str(), error = %e, "Watch error"),
            };

            let mut watcher = match RecommendedWatcher::new(handler, NotifyConfig::default()) {
                Ok(w) => w,
                Err(e) => {
                    warn!(target = target.as_str(), error = %e, "Failed to create watcher");
                    continue;
                }
            };
            if let Err(e) = watcher.watch(&root, RecursiveMode::NonRecursive) {
                warn!(
                    target = target.as_str(),
                    root = %root.display(),
                    error = %e,
                    "Failed to watch root"
                );
                continue;
            }

            info!(target = target.as_str(), root = %root.display(), "Watching root");
            self.watchers.push(watcher);
        }

        if self.watchers.is_empty() {
            return Err(crate::error::CoreError::Watch(
                "no watchable roots".to_string(),
            ));
        }

        Ok(())
    }

    /// Drop every watch handle. Idempotent.
    pub fn stop(&mut self) {
        if !self.watchers.is_empty() {
            info!("Stopping file watcher");
            self.watchers.clear();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.watchers.is_empty()
    }
}

fn map_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Added),
        EventKind::Modify(_) => Some(ChangeKind::Changed),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

fn matches_target(target: WatchTarget, path: &Path) -> bool {
    match target {
        WatchTarget::Skills => path.file_name().is_some_and(|n| n == "SKILL.md"),
        WatchTarget::Governance => path.extension().is_some_and(|e| e == "md"),
        WatchTarget::Tasks => path.file_name().is_some_and(|n| n == "run-manifest.json"),
    }
}
