//! Device node monitoring.
//!
//! Watches `/dev` for partition nodes appearing and disappearing and turns
//! them into [`DeviceEvent`]s. Newly added nodes are probed with `blkid`
//! so the router can derive a card name from the filesystem label.

use crate::router::{DeviceAction, DeviceEvent, DevicePatterns};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::mpsc;

const DEVICE_DIR: &str = "/dev";

/// Start watching for partition nodes, delivering events to `tx`.
///
/// The returned watcher must stay alive for events to keep flowing.
pub fn spawn_device_monitor(tx: mpsc::Sender<DeviceEvent>) -> anyhow::Result<RecommendedWatcher> {
    let watcher = watch_device_nodes(Path::new(DEVICE_DIR), tx)?;
    tracing::info!("Waiting for events...");
    Ok(watcher)
}

fn watch_device_nodes(
    dir: &Path,
    tx: mpsc::Sender<DeviceEvent>,
) -> anyhow::Result<RecommendedWatcher> {
    let patterns = DevicePatterns::new();

    let mut watcher =
        notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Device watch error: {}", e);
                    return;
                }
            };

            let action = match event.kind {
                EventKind::Create(_) => DeviceAction::Add,
                EventKind::Remove(_) => DeviceAction::Remove,
                _ => return,
            };

            for path in &event.paths {
                let Some(sys_name) = path.file_name().and_then(|name| name.to_str()) else {
                    continue;
                };
                if !patterns.matches(sys_name) {
                    continue;
                }

                let device_node = path.to_string_lossy().to_string();
                let properties = match action {
                    // The node is gone by the time a remove arrives, so
                    // only additions get probed.
                    DeviceAction::Add => probe_device(&device_node),
                    DeviceAction::Remove => HashMap::new(),
                };

                let device_event = DeviceEvent {
                    action,
                    device_node,
                    sys_name: sys_name.to_string(),
                    properties,
                };
                if tx.try_send(device_event).is_err() {
                    tracing::warn!("Device event queue full, dropping event for {}", sys_name);
                }
            }
        })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Read filesystem properties for a device node via `blkid`.
///
/// Runs on the watcher thread, so this blocks only the monitor. Any
/// failure yields an empty property map; the router falls back to the
/// kernel name for display.
fn probe_device(device_node: &str) -> HashMap<String, String> {
    let output = std::process::Command::new("blkid")
        .args(["-o", "export", device_node])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            parse_blkid_export(&String::from_utf8_lossy(&output.stdout))
        }
        Ok(output) => {
            tracing::debug!(
                "blkid exited with {} for {}",
                output.status.code().unwrap_or(-1),
                device_node
            );
            HashMap::new()
        }
        Err(e) => {
            tracing::warn!("Failed to probe {}: {}", device_node, e);
            HashMap::new()
        }
    }
}

/// Parse `blkid -o export` output into a property map, translating the
/// label key to the name the router looks up.
fn parse_blkid_export(output: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    for line in output.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = match key {
            "LABEL" => "ID_FS_LABEL",
            other => other,
        };
        properties.insert(key.to_string(), value.to_string());
    }
    properties
}
