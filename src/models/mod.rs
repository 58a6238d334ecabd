//! Data models for the cardgrab daemon.
//!
//! This module contains the core data structures used throughout the daemon:
//! - [`AppState`]: The central state snapshot pushed to state consumers
//! - [`AppStatus`]: The Ready/Busy/Error lifecycle of the daemon
//! - [`AppConfig`]: The resolved runtime configuration
//! - [`ConfigFile`]: The serde mirror of the YAML config file
//! - [`GrabConfig`] / [`RenameMethod`] / [`MediaInfoTag`]: Per-grab ingestion rules
//!
//! # Architecture Note
//!
//! The file-schema structs ([`ConfigFile`] and friends) stay close to the
//! YAML key names and derive `Serialize`/`Deserialize`; the resolved structs
//! carry normalized values (lowercased types, absolute base paths) and no
//! serde baggage. Conversion is one-way via `From<ConfigFile>`.

pub mod app_state;
pub mod config;

pub use app_state::{AppState, AppStatus};
pub use config::{
    AppConfig, ChownIds, ConfigFile, GrabConfig, HomeAssistantConfig, MediaInfoTag, RenameMethod,
};
