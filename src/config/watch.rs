// Config file watching.
//
// notify delivers events on its own thread; they get bridged over an mpsc
// channel into the runtime, where each hit schedules a debounced reload on
// the ConfigStore.

use crate::config::ConfigStore;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;

/// Start watching the store's config file for changes.
///
/// The parent directory is watched rather than the file so editors that
/// replace the file on save keep triggering reloads. The returned watcher
/// must be kept alive for the lifetime of the daemon.
pub fn spawn_config_watcher(store: Arc<ConfigStore>) -> Result<RecommendedWatcher> {
    let config_path = store.path().to_path_buf();
    let watch_dir = config_path
        .parent()
        .with_context(|| format!("Config path has no parent directory: {config_path}"))?
        .to_path_buf();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(16);

    let target = config_path.clone();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Config watch error: {e}");
                return;
            }
        };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        if event
            .paths
            .iter()
            .any(|path| path.as_path() == target.as_std_path())
        {
            // Full channel just means a reload is already queued up.
            let _ = tx.try_send(());
        }
    })
    .context("Failed to create config file watcher")?;

    watcher
        .watch(watch_dir.as_std_path(), RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch config directory {watch_dir}"))?;
    tracing::debug!("Watching {} for config changes", config_path);

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tracing::debug!("Config file changed on disk");
            store.notify_changed();
        }
    });

    Ok(watcher)
}
