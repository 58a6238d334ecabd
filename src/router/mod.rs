//! Device event routing.
//!
//! Receives block-partition add/remove events from the device monitor,
//! filters them down to card-like partitions, and starts at most one
//! ingestion run per device node. Removal of a card that is still being
//! ingested is logged as unsafe but does not cancel the run.

pub mod monitor;

use crate::services::IngestionPipeline;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What happened to a device node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Add,
    Remove,
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAction::Add => write!(f, "add"),
            DeviceAction::Remove => write!(f, "remove"),
        }
    }
}

/// One block-partition event as delivered by the device monitor.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    /// Full device node path, e.g. `/dev/sdb1`.
    pub device_node: String,
    /// Kernel name of the partition, e.g. `sdb1`.
    pub sys_name: String,
    /// Probed device properties, may be empty for remove events.
    pub properties: HashMap<String, String>,
}

impl DeviceEvent {
    /// Human-facing card name: the filesystem label when present, then
    /// name/model with an optional serial suffix, then the kernel name.
    pub fn display_name(&self) -> String {
        if let Some(label) = self.properties.get("ID_FS_LABEL") {
            if !label.is_empty() {
                return label.clone();
            }
        }

        let mut name = self
            .properties
            .get("ID_NAME")
            .or_else(|| self.properties.get("ID_MODEL"))
            .cloned()
            .unwrap_or_default();
        if !name.is_empty() {
            if let Some(serial) = self.properties.get("ID_SERIAL_SHORT") {
                if !serial.is_empty() {
                    name = format!("{name}_{serial}");
                }
            }
        }

        if name.is_empty() {
            self.sys_name.clone()
        } else {
            name
        }
    }
}

/// Device nodes with an ingestion run currently in flight.
///
/// A node is a member exactly while its run is active; the router claims
/// it before starting a run and the pipeline releases it during cleanup.
#[derive(Debug, Default)]
pub struct ActiveCards {
    nodes: Mutex<HashSet<String>>,
}

impl ActiveCards {
    /// Mark a node as under ingestion. Returns false if it already was.
    pub fn claim(&self, device_node: &str) -> bool {
        self.nodes.lock().unwrap().insert(device_node.to_string())
    }

    /// Clear a node's claim. Returns false if it was not claimed.
    pub fn release(&self, device_node: &str) -> bool {
        self.nodes.lock().unwrap().remove(device_node)
    }

    pub fn contains(&self, device_node: &str) -> bool {
        self.nodes.lock().unwrap().contains(device_node)
    }
}

/// Compiled name patterns for the partition kinds treated as cards.
#[derive(Debug, Clone)]
pub struct DevicePatterns {
    disk: Regex,
    mmc: Regex,
}

impl DevicePatterns {
    pub fn new() -> Self {
        Self {
            disk: Regex::new(r"^[hs]d[a-z]\d+$").expect("Invalid disk partition regex"),
            mmc: Regex::new(r"^mmcblk\d+p\d+$").expect("Invalid mmc partition regex"),
        }
    }

    /// Whether a kernel partition name looks like a removable card.
    pub fn matches(&self, sys_name: &str) -> bool {
        self.disk.is_match(sys_name) || self.mmc.is_match(sys_name)
    }
}

impl Default for DevicePatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedupes device events and hands accepted cards to the pipeline.
pub struct DeviceEventRouter {
    pipeline: Arc<IngestionPipeline>,
    active: Arc<ActiveCards>,
    patterns: DevicePatterns,
}

impl DeviceEventRouter {
    pub fn new(pipeline: Arc<IngestionPipeline>, active: Arc<ActiveCards>) -> Self {
        Self {
            pipeline,
            active,
            patterns: DevicePatterns::new(),
        }
    }

    /// Process events until the monitor side closes the channel.
    pub async fn run(self, mut events: mpsc::Receiver<DeviceEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(&event);
        }
        tracing::debug!("Device event channel closed");
    }

    /// Route a single event.
    ///
    /// Returns the handle of the ingestion task when one was started, so
    /// callers can await completion.
    pub fn handle_event(&self, event: &DeviceEvent) -> Option<JoinHandle<()>> {
        if !self.patterns.matches(&event.sys_name) {
            tracing::warn!("Unknown device pattern: {}", event.sys_name);
            return None;
        }

        let card_id = event.display_name();
        tracing::debug!(
            "Detected device ({}): {} ({})",
            event.action,
            card_id,
            event.device_node
        );

        match event.action {
            DeviceAction::Add => {
                if !self.active.claim(&event.device_node) {
                    // A run for this node is already in flight.
                    return None;
                }
                let pipeline = Arc::clone(&self.pipeline);
                let device_node = event.device_node.clone();
                Some(tokio::spawn(async move {
                    pipeline.run(&device_node, &card_id).await;
                }))
            }
            DeviceAction::Remove => {
                if self.active.release(&event.device_node) {
                    tracing::warn!("Card UNSAFELY removed: {}", card_id);
                } else {
                    tracing::info!("Card removed: {}", card_id);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(action: DeviceAction, sys_name: &str) -> DeviceEvent {
        DeviceEvent {
            action,
            device_node: format!("/dev/{sys_name}"),
            sys_name: sys_name.to_string(),
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_patterns_accept_partition_names() {
        let patterns = DevicePatterns::new();
        for name in ["sda1", "sdb12", "hdc3", "mmcblk0p1", "mmcblk12p3"] {
            assert!(patterns.matches(name), "expected match for {name}");
        }
    }

    #[test]
    fn test_patterns_reject_non_partitions() {
        let patterns = DevicePatterns::new();
        for name in ["sda", "mmcblk0", "loop0", "sr0", "xsdb1", "sdb1x", "nvme0n1p1", ""] {
            assert!(!patterns.matches(name), "expected no match for {name}");
        }
    }

    #[test]
    fn test_display_name_prefers_label() {
        let mut ev = event(DeviceAction::Add, "sdb1");
        ev.properties
            .insert("ID_FS_LABEL".to_string(), "CARD1".to_string());
        ev.properties
            .insert("ID_MODEL".to_string(), "SD_Reader".to_string());

        assert_eq!(ev.display_name(), "CARD1");
    }

    #[test]
    fn test_display_name_model_with_serial() {
        let mut ev = event(DeviceAction::Add, "sdb1");
        ev.properties
            .insert("ID_MODEL".to_string(), "SD_Reader".to_string());
        ev.properties
            .insert("ID_SERIAL_SHORT".to_string(), "0451".to_string());

        assert_eq!(ev.display_name(), "SD_Reader_0451");
    }

    #[test]
    fn test_display_name_falls_back_to_sys_name() {
        let ev = event(DeviceAction::Add, "mmcblk0p1");
        assert_eq!(ev.display_name(), "mmcblk0p1");
    }

    #[test]
    fn test_display_name_ignores_blank_label() {
        let mut ev = event(DeviceAction::Add, "sdb1");
        ev.properties
            .insert("ID_FS_LABEL".to_string(), String::new());
        ev.properties
            .insert("ID_NAME".to_string(), "Card".to_string());

        assert_eq!(ev.display_name(), "Card");
    }

    #[test]
    fn test_active_cards_claim_is_exclusive() {
        let active = ActiveCards::default();

        assert!(active.claim("/dev/sdb1"));
        assert!(!active.claim("/dev/sdb1"));
        assert!(active.contains("/dev/sdb1"));

        assert!(active.release("/dev/sdb1"));
        assert!(!active.release("/dev/sdb1"));
        assert!(!active.contains("/dev/sdb1"));
    }
}
