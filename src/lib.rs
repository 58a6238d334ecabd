// cardgrab - Automatic ingestion of removable media cards
//
// This is the library crate containing the core business logic and data structures.
// The binary crate (main.rs) provides the daemon entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod router;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigStore;
pub use models::{AppConfig, AppState, AppStatus, GrabConfig};
pub use router::{DeviceEvent, DeviceEventRouter};
pub use services::{IngestContext, IngestionPipeline};
pub use state::StateManager;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
