//! Services module - Core logic for ingesting removable-media cards.
//!
//! This module contains everything that happens between a device event and a
//! finished ingestion. The services are **transport-agnostic** and have no
//! dependencies on the device monitor or the notifier, making them testable
//! against plain directories.
//!
//! # Components
//!
//! - [`IngestionPipeline`]: Orchestrates one card's ingestion run. Handles:
//!   - Mounting the card (via [`MountManager`]) under the configured base
//!   - Scanning each grab's source folder for matching media files
//!   - Copying matches into a timestamped destination, preserving mtimes
//!   - Deleting originals when configured, then organizing the copies
//!
//! - [`MountManager`]: Idempotent mount and best-effort unmount of a device
//!   node, backed by the system mounts table and the OS mount utilities.
//!
//! - [`organizer`]: Date-derivation and rename/move policy for a flat folder
//!   of copied files, including media-tag date extraction via `mediainfo`.
//!
//! # Design Philosophy
//!
//! The services layer is designed to be:
//! - **Contained**: A failed run never escalates past [`IngestionPipeline::run`]
//! - **Async**: Subprocess calls and long waits use tokio for non-blocking I/O
//! - **Testable**: Mount state and file layout are injectable via plain paths
//!
//! # Usage Example
//!
//! ```ignore
//! use cardgrab::services::{IngestContext, IngestionPipeline};
//!
//! let ctx = IngestContext::new(store);
//! let pipeline = IngestionPipeline::new(ctx);
//!
//! // Ingest one card end to end; errors are reported via state, not returned.
//! pipeline.run("/dev/sdb1", "CARD1").await;
//! ```

pub mod mediainfo;
pub mod mount;
pub mod organizer;
pub mod ownership;
pub mod pipeline;

pub use mediainfo::{MediaTagError, MediaTrack};
pub use mount::{MountError, MountManager, UnmountError};
pub use organizer::{organize, OrganizeError};
pub use pipeline::{IngestContext, IngestError, IngestionPipeline};
