use serde::Serialize;
use std::fmt;

/// Coarse daemon status as reported to state consumers.
///
/// Exactly one of these is ever active. `Error` is sticky until the next
/// card insertion starts a fresh run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AppStatus {
    /// Idle, waiting for a card.
    #[default]
    Ready,
    /// An ingestion run is in flight.
    Busy,
    /// The last run failed.
    Error,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppStatus::Ready => "Ready",
            AppStatus::Busy => "Busy",
            AppStatus::Error => "Error",
        };
        write!(f, "{name}")
    }
}

/// Single source of truth for what the daemon is doing right now.
///
/// # Thread Safety
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by
/// [`crate::state::StateManager`]. Never hold a direct reference across
/// await points; use [`read()`](crate::state::StateManager::read) and
/// [`update()`](crate::state::StateManager::update) instead. Mutations do
/// not notify consumers on their own; call
/// [`publish()`](crate::state::StateManager::publish) at the points a
/// snapshot should go out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppState {
    pub status: AppStatus,
    /// Matching files found on the card during the current or last run.
    pub media_count: u64,
    /// Percentage 0 to 100 of the current run.
    pub progress: u8,
    /// Display name of the card being, or last, ingested.
    pub card_id: String,
}

impl AppState {
    /// Reset counters and switch to `Busy` for a new card.
    pub fn begin_run(&mut self, card_id: &str) {
        self.status = AppStatus::Busy;
        self.media_count = 0;
        self.progress = 0;
        self.card_id = card_id.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state() {
        let state = AppState::default();
        assert_eq!(state.status, AppStatus::Ready);
        assert_eq!(state.media_count, 0);
        assert_eq!(state.progress, 0);
        assert!(state.card_id.is_empty());
    }

    #[test]
    fn test_begin_run_resets_counters() {
        let mut state = AppState {
            status: AppStatus::Error,
            media_count: 42,
            progress: 63,
            card_id: "OLD_CARD".to_string(),
        };

        state.begin_run("NEW_CARD");

        assert_eq!(state.status, AppStatus::Busy);
        assert_eq!(state.media_count, 0);
        assert_eq!(state.progress, 0);
        assert_eq!(state.card_id, "NEW_CARD");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AppStatus::Ready.to_string(), "Ready");
        assert_eq!(AppStatus::Busy.to_string(), "Busy");
        assert_eq!(AppStatus::Error.to_string(), "Error");
    }

    #[test]
    fn test_status_serializes_as_name() {
        let json = serde_json::to_string(&AppStatus::Busy).unwrap();
        assert_eq!(json, "\"Busy\"");
    }
}
