//! Configuration file watcher for hot reload.
//!
//! # Reload Path
//! ```text
//! notify event (modify/create)
//!     → change signal
//!     → debounce: wait until the file has been quiet for `debounce`
//!     → load + validate
//!     → differs from the last applied config? → forward update
//! ```
//!
//! One editor save usually produces several notify events; they collapse
//! into a single reload. Invalid or unchanged files never reach the receiver.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::loader::load_config;
use crate::config::schema::ToolkitConfig;
use crate::resilience::ResilienceRegistry;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches a config file and yields validated, changed configurations.
pub struct ConfigWatcher {
    path: PathBuf,
    current: ToolkitConfig,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<ToolkitConfig>,
}

impl ConfigWatcher {
    /// Create a watcher for `path`, where `current` is the config already applied.
    ///
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path, current: ToolkitConfig) -> (Self, mpsc::UnboundedReceiver<ToolkitConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    /// Quiet period required after the last file event before reloading.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching the file. The returned handle must be kept alive;
    /// dropping it stops the reload task.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce_ms = self.debounce.as_millis() as u64, "Config watcher started");
        tokio::spawn(coalesce_changes(
            self.path,
            change_rx,
            self.update_tx,
            self.current,
            self.debounce,
        ));
        Ok(watcher)
    }
}

/// Apply every update from `updates` to `registry` until `shutdown` fires.
pub fn spawn_registry_reload(
    registry: Arc<ResilienceRegistry>,
    mut updates: mpsc::UnboundedReceiver<ToolkitConfig>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Some(config) => registry.reload(config),
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Config reload task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

/// Turn bursts of change signals into at most one forwarded config each.
async fn coalesce_changes(
    path: PathBuf,
    mut changes: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<ToolkitConfig>,
    mut current: ToolkitConfig,
    debounce: Duration,
) {
    while changes.recv().await.is_some() {
        // Restart the quiet period on every further event.
        while let Ok(Some(())) = time::timeout(debounce, changes.recv()).await {}

        if let Some(config) = reload_if_changed(&path, &mut current) {
            if updates.send(config).is_err() {
                break;
            }
        }
    }
    tracing::debug!(path = ?path, "Config watcher stopped");
}

/// Load `path`; return the config only if it is valid and differs from `current`.
fn reload_if_changed(path: &Path, current: &mut ToolkitConfig) -> Option<ToolkitConfig> {
    match load_config(path) {
        Ok(config) if config == *current => {
            tracing::debug!(path = ?path, "Config file touched without changes, skipping reload");
            None
        }
        Ok(config) => {
            tracing::info!(path = ?path, "Config file changed, reloading");
            *current = config.clone();
            Some(config)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            None
        }
    }
}
