// Configuration loading, hot reload and the run lock.
//
// The ConfigStore owns the parsed configuration and hands out cheap
// Arc snapshots. Reloads are debounced through a TaskSlot and mutually
// exclusive with ingestion runs via the run lock.

pub mod watch;

use crate::models::{AppConfig, ConfigFile};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Delay between a file-change notification and the actual reload, so a
/// burst of editor writes results in a single reload.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no config file found at {0}")]
    NotFound(Utf8PathBuf),

    #[error("invalid config path: {0}")]
    InvalidPath(Utf8PathBuf),

    #[error("failed to resolve config path {path}: {source}")]
    Resolve {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        source: serde_yaml_ng::Error,
    },

    #[error("failed to serialize default config: {0}")]
    Serialize(#[source] serde_yaml_ng::Error),

    #[error("failed to write config {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Guard held for the duration of an ingestion run.
///
/// While any `ConfigLock` is alive, reloads wait. Dropping the guard
/// releases the run lock.
#[derive(Debug)]
pub struct ConfigLock {
    _guard: OwnedMutexGuard<()>,
}

/// Single-slot holder for one scheduled background task.
///
/// Scheduling a replacement aborts whatever was pending, so only the most
/// recently scheduled task ever runs.
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new task, aborting any previously scheduled one.
    pub fn replace(&self, handle: JoinHandle<()>) {
        let mut slot = self.handle.lock().unwrap();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(handle);
    }

    /// Abort and clear the pending task, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.handle.lock().unwrap().take() {
            previous.abort();
        }
    }
}

/// Owner of the parsed configuration file.
///
/// Consumers call [`config()`](Self::config) for an `Arc` snapshot that
/// stays valid for the whole operation they are performing; a reload in
/// between never mutates a snapshot already handed out.
#[derive(Debug)]
pub struct ConfigStore {
    path: Utf8PathBuf,
    current: RwLock<Arc<AppConfig>>,
    run_lock: Arc<Mutex<()>>,
    reload_slot: TaskSlot,
}

impl ConfigStore {
    /// Open the configuration at `path`.
    ///
    /// `path` may be the config file itself or a directory containing one
    /// named after the daemon. A nonexistent path ending in `.yaml` gets a
    /// commented default file written in its place.
    pub fn open<P: AsRef<Utf8Path>>(path: P) -> Result<Self, ConfigError> {
        let path = resolve_config_path(path.as_ref())?;
        let config = load_config_file(&path)?;
        tracing::info!("Loaded configuration from {}", path);

        Ok(Self {
            path,
            current: RwLock::new(Arc::new(config)),
            run_lock: Arc::new(Mutex::new(())),
            reload_slot: TaskSlot::new(),
        })
    }

    /// Canonical path of the config file on disk.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Current configuration snapshot. Never blocks on a reload in progress.
    pub fn config(&self) -> Arc<AppConfig> {
        self.current.read().unwrap().clone()
    }

    /// Take the run lock, waiting for any reload in flight.
    ///
    /// The ingestion pipeline holds this for the whole run so a reload can
    /// never swap the configuration midway through one.
    pub async fn lock(&self) -> ConfigLock {
        ConfigLock {
            _guard: Arc::clone(&self.run_lock).lock_owned().await,
        }
    }

    /// True while a run (or reload) currently holds the run lock.
    pub fn is_locked(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Re-read and re-parse the config file, swapping the snapshot on
    /// success. On failure the previous configuration stays in effect.
    pub async fn reload(&self) -> Result<(), ConfigError> {
        let _guard = self.run_lock.lock().await;
        tracing::info!("Reloading configuration from {}", self.path);

        let fresh = load_config_file(&self.path)?;
        *self.current.write().unwrap() = Arc::new(fresh);
        Ok(())
    }

    /// Note that the config file changed on disk.
    ///
    /// Schedules a debounced reload; repeated notifications within
    /// [`RELOAD_DEBOUNCE`] restart the delay. Must be called from within
    /// the tokio runtime.
    pub fn notify_changed(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            if let Err(e) = store.reload().await {
                tracing::error!("Config reload failed, keeping previous configuration: {e}");
            }
        });
        self.reload_slot.replace(handle);
    }
}

fn default_file_name() -> String {
    format!("{}.yaml", crate::APP_NAME)
}

// path may be the config file itself, or a directory containing it.
fn resolve_config_path(path: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let resolved = if path.is_dir() {
        let candidate = path.join(default_file_name());
        if !candidate.is_file() {
            return Err(ConfigError::NotFound(candidate));
        }
        candidate
    } else if path.is_file() {
        path.to_path_buf()
    } else if path.extension() == Some("yaml") {
        write_default_file(path)?;
        path.to_path_buf()
    } else {
        return Err(ConfigError::InvalidPath(path.to_path_buf()));
    };

    // Canonical so the file watcher can match notify's absolute event
    // paths even when the daemon was started with a relative path.
    resolved
        .canonicalize_utf8()
        .map_err(|source| ConfigError::Resolve {
            path: resolved.clone(),
            source,
        })
}

fn load_config_file(path: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let file: ConfigFile =
        serde_yaml_ng::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(AppConfig::from(file))
}

fn write_default_file(path: &Utf8Path) -> Result<(), ConfigError> {
    let yaml = serde_yaml_ng::to_string(&ConfigFile::default()).map_err(ConfigError::Serialize)?;
    let contents = format!("# {} configuration\n{}", crate::APP_NAME, yaml);

    fs::write(path, contents).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!("Wrote default configuration to {}", path);
    Ok(())
}
