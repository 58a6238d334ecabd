// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe
// access using Arc<RwLock<T>> and publishes whole-state snapshots to
// subscribers on demand.

use crate::models::{AppState, AppStatus};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Thread-safe state manager with snapshot publication
///
/// This is the central state component that:
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Publishes full [`AppState`] snapshots over a tokio broadcast channel
///
/// Mutation and publication are deliberately separate. The ingestion
/// pipeline updates progress on every unit of work but only publishes at
/// its throttled push points, so subscribers (the Home Assistant notifier)
/// see exactly the cadence the pipeline chooses.
///
/// # Usage
///
/// - [`read()`](Self::read) / [`snapshot()`](Self::snapshot) for reads
/// - [`update()`](Self::update) for mutations (no publication)
/// - [`publish()`](Self::publish) to send the current snapshot out
/// - [`subscribe()`](Self::subscribe) for listening to published snapshots
pub struct StateManager {
    /// The daemon state protected by RwLock for thread-safe access
    state: Arc<RwLock<AppState>>,

    /// Broadcast channel carrying published state snapshots
    /// Multiple subscribers can listen simultaneously
    state_tx: broadcast::Sender<AppState>,
}

impl StateManager {
    /// Create a new StateManager in the `Ready` state
    ///
    /// # Returns
    /// A new StateManager with a broadcast buffer of 100 snapshots
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    /// Get a read-only snapshot of the current state
    ///
    /// This clones the entire state, so it's safe to use without holding locks.
    pub fn snapshot(&self) -> AppState {
        self.state.read().unwrap().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let card = state_manager.read(|state| state.card_id.clone());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.state.read().unwrap();
        f(&state)
    }

    /// Mutate the state without publishing
    ///
    /// # Example
    /// ```ignore
    /// state_manager.update(|state| {
    ///     state.progress = 40;
    /// });
    /// ```
    pub fn update<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.state.write().unwrap();
        update_fn(&mut state);
    }

    /// Publish the current snapshot to all subscribers
    ///
    /// Send errors are ignored; it's OK if no one is listening.
    pub fn publish(&self) {
        let snapshot = self.snapshot();
        let _ = self.state_tx.send(snapshot);
    }

    /// Subscribe to published state snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<AppState> {
        self.state_tx.subscribe()
    }

    /// True while an ingestion run is in flight
    pub fn is_busy(&self) -> bool {
        self.read(|state| state.status == AppStatus::Busy)
    }

    // Convenience methods for common transitions

    /// Switch to `Busy` and reset counters for a new card
    pub fn begin_run(&self, card_id: &str) {
        self.update(|state| state.begin_run(card_id));
    }

    /// Record the final status of a run
    pub fn set_status(&self, status: AppStatus) {
        self.update(|state| state.status = status);
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

// Make StateManager cloneable for sharing across tasks
impl Clone for StateManager {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            state_tx: self.state_tx.clone(),
        }
    }
}
