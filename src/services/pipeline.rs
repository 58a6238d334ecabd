use crate::config::ConfigStore;
use crate::metrics::Metrics;
use crate::models::{AppConfig, AppStatus, ChownIds, GrabConfig};
use crate::router::ActiveCards;
use crate::services::mount::MountManager;
use crate::services::organizer::{self, OrganizeError};
use crate::services::ownership;
use crate::state::StateManager;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use filetime::FileTime;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors that abort an ingestion run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to scan {path}: {source}")]
    Scan {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to copy media: {path}: {source}")]
    Copy {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Organize(#[from] OrganizeError),
}

/// Shared handles every long-lived component works against.
///
/// Owns the configuration store, the published application state, the set
/// of cards currently being ingested and the process metrics. Cloning is
/// cheap; all clones observe the same underlying state.
#[derive(Clone)]
pub struct IngestContext {
    pub config: Arc<ConfigStore>,
    pub state: StateManager,
    pub active: Arc<ActiveCards>,
    pub metrics: Arc<Metrics>,
}

impl IngestContext {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            state: StateManager::new(),
            active: Arc::new(ActiveCards::default()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Publish the current state snapshot, counting the publication.
    pub fn publish_state(&self) {
        self.state.publish();
        self.metrics.record_state_publish();
    }
}

/// Runs the mount, copy, delete and organize sequence for one card.
pub struct IngestionPipeline {
    ctx: IngestContext,
    mounts_table: Option<Utf8PathBuf>,
}

/// One grab paired with the file names matched during the scan pass.
struct GrabScan<'a> {
    grab: &'a GrabConfig,
    files: Vec<String>,
}

impl IngestionPipeline {
    pub fn new(ctx: IngestContext) -> Self {
        Self {
            ctx,
            mounts_table: None,
        }
    }

    /// Override the mounts table consulted before mounting. Lets the
    /// pipeline run against a fixture table instead of `/proc/self/mounts`.
    pub fn with_mounts_table<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.mounts_table = Some(path.as_ref().to_path_buf());
        self
    }

    /// Ingest one card end to end.
    ///
    /// Never returns an error: every failure is logged, reflected in the
    /// published state and contained here so the device router outlives
    /// any single bad run. The configuration lock is held for the whole
    /// run, so a pending reload applies only after cleanup.
    pub async fn run(&self, device_node: &str, card_id: &str) {
        tracing::info!("Card inserted: {}", card_id);

        let run_lock = self.ctx.config.lock().await;
        let config = self.ctx.config.config();

        self.ctx.state.begin_run(card_id);
        self.ctx.publish_state();

        let mounts = match &self.mounts_table {
            Some(table) => MountManager::new(&config.mount_base).with_mounts_table(table),
            None => MountManager::new(&config.mount_base),
        };

        let started = Instant::now();
        let unmount_target = match mounts.mount(device_node).await {
            Ok(mountpoint) => {
                match self.ingest(&config, &mountpoint, card_id).await {
                    Ok(()) => {
                        self.ctx.state.update(|state| {
                            state.progress = 100;
                            state.status = AppStatus::Ready;
                        });
                        self.ctx.metrics.record_ingest(started.elapsed());
                    }
                    Err(e) => {
                        tracing::error!("Error handling card {}: {}", card_id, e);
                        self.ctx.state.set_status(AppStatus::Error);
                        self.ctx.metrics.record_run_failure();
                    }
                }
                mountpoint
            }
            Err(e) => {
                tracing::error!("Failed to mount {}: {}", device_node, e);
                self.ctx.state.set_status(AppStatus::Error);
                self.ctx.metrics.record_run_failure();
                config.mount_base.clone()
            }
        };

        self.ctx.active.release(device_node);
        self.ctx.publish_state();

        drop(run_lock);

        // The card may already be gone or never have mounted; either way
        // an unmount failure here is not worth reporting beyond debug.
        if let Err(e) = mounts.unmount(&unmount_target).await {
            tracing::debug!("Unmount of {} skipped: {}", unmount_target, e);
        }
    }

    /// The scan, copy, delete and organize passes against a mounted card.
    async fn ingest(
        &self,
        config: &AppConfig,
        card_root: &Utf8Path,
        card_id: &str,
    ) -> Result<(), IngestError> {
        // Scan pass. Nothing is copied yet; this sizes the run so progress
        // can be reported as a percentage.
        let mut scans = Vec::new();
        let mut total_weight: u32 = 0;
        let mut media_count: u64 = 0;
        for grab in &config.grabs {
            total_weight += 1;
            if grab.rename_method.is_active() {
                total_weight += 1;
            }

            let files = scan_folder(&card_root.join(&grab.path), &grab.types)?;
            media_count += files.len() as u64;
            total_weight += files.len() as u32;
            scans.push(GrabScan { grab, files });
        }
        self.ctx.state.update(|state| state.media_count = media_count);

        if media_count == 0 {
            tracing::warn!("No media files found to copy");
            return Ok(());
        }

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let dest_root = config
            .destination_base
            .join(format!("{card_id}-{timestamp}"));
        fs::create_dir_all(&dest_root).map_err(|source| copy_error(&dest_root, source))?;
        ownership::apply(&dest_root, config.chown.as_ref()).await;

        // Copy pass, then per-grab deletion of the originals.
        let mut units: u32 = 0;
        for scan in &scans {
            let source = card_root.join(&scan.grab.path);
            let target = dest_root.join(scan.grab.target_name());
            fs::create_dir_all(&target).map_err(|e| copy_error(&target, e))?;
            ownership::apply(&target, config.chown.as_ref()).await;

            for name in &scan.files {
                let src = source.join(name);
                let dest = target.join(name);
                tracing::info!("Copying {} -> {}", src, dest);
                let bytes = copy_preserving_mtime(&src, &dest)?;
                self.ctx.metrics.record_copy(bytes);

                units += 1;
                self.update_progress(units, total_weight);
            }

            if config.delete_after_copy && !scan.grab.never_delete {
                tracing::info!("Deleting files in {}", source);
                clear_folder(&source, config.chown.as_ref()).await?;
            } else {
                tracing::info!("Skipping deletion per config: {}", source);
            }

            units += 1;
            self.update_progress(units, total_weight);
        }

        // Organize pass for every grab with an active rename method.
        for scan in &scans {
            let grab = scan.grab;
            if !grab.rename_method.is_active() {
                continue;
            }

            let target = dest_root.join(grab.target_name());
            tracing::debug!("Organizing {}", target);
            organizer::organize(
                &target,
                grab.rename_method,
                grab.rename_as_prefix,
                grab.use_mtime,
                grab.media_tag.as_ref(),
                config.chown.as_ref(),
            )
            .await?;

            units += 1;
            self.update_progress(units, total_weight);
        }

        Ok(())
    }

    /// Record one completed step, publishing a snapshot every tenth step.
    fn update_progress(&self, units: u32, total_weight: u32) {
        let pct = progress_pct(units, total_weight);
        tracing::debug!("Progress {}% ({}/{} steps)", pct, units, total_weight);
        self.ctx.state.update(|state| state.progress = pct);
        if units % 10 == 0 {
            self.ctx.publish_state();
        }
    }
}

/// Names of the regular files in `source` whose lowercased name ends with
/// one of the configured types. Direct entries only.
fn scan_folder(source: &Utf8Path, types: &[String]) -> Result<Vec<String>, IngestError> {
    let entries = source.read_dir_utf8().map_err(|e| scan_error(source, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| scan_error(source, e))?;
        let file_type = entry.file_type().map_err(|e| scan_error(entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }

        tracing::debug!("Found {}", entry.path());
        let lower = entry.file_name().to_lowercase();
        if types.iter().any(|t| lower.ends_with(t.as_str())) {
            files.push(entry.file_name().to_string());
        }
    }
    Ok(files)
}

/// Copy one file and carry the source's modification time over to the copy.
fn copy_preserving_mtime(src: &Utf8Path, dest: &Utf8Path) -> Result<u64, IngestError> {
    let bytes = fs::copy(src, dest).map_err(|e| copy_error(src, e))?;
    let metadata = fs::metadata(src).map_err(|e| copy_error(src, e))?;
    filetime::set_file_mtime(dest, FileTime::from_last_modification_time(&metadata))
        .map_err(|e| copy_error(dest, e))?;
    Ok(bytes)
}

/// Remove a grab's source folder and recreate it empty.
///
/// A failed removal leaves the originals in place and the run continues;
/// a failed recreate aborts the run.
async fn clear_folder(source: &Utf8Path, chown: Option<&ChownIds>) -> Result<(), IngestError> {
    if let Err(e) = fs::remove_dir_all(source) {
        tracing::warn!("Failed to remove {}: {}", source, e);
    }
    fs::create_dir_all(source).map_err(|e| copy_error(source, e))?;
    ownership::apply(source, chown).await;
    Ok(())
}

fn progress_pct(units: u32, total_weight: u32) -> u8 {
    if total_weight == 0 {
        return 100;
    }
    (units.saturating_mul(100) / total_weight).min(100) as u8
}

fn scan_error(path: &Utf8Path, source: std::io::Error) -> IngestError {
    IngestError::Scan {
        path: path.to_path_buf(),
        source,
    }
}

fn copy_error(path: &Utf8Path, source: std::io::Error) -> IngestError {
    IngestError::Copy {
        path: path.to_path_buf(),
        source,
    }
}
