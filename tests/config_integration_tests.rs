//! Integration tests for ConfigStore and configuration file handling
//!
//! These tests verify:
//! - Configuration loading from YAML files
//! - Default configuration bootstrapping
//! - Reload semantics (swap on success, retain on failure)
//! - The exclusive lock shared with ingestion runs
//! - The file watcher feeding debounced reloads

use camino::Utf8PathBuf;
use cardgrab::config::watch::spawn_config_watcher;
use cardgrab::config::{ConfigError, ConfigStore};
use cardgrab::models::RenameMethod;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_dir)
}

fn write_config(path: &Utf8PathBuf, yaml: &str) {
    fs::write(path, yaml).unwrap();
}

const FULL_CONFIG: &str = r#"
delete_after_copy: false
destination_base: /data/grabs
mount_base: /mnt/cards
log_level: debug
chown:
  user: media
  group: media
home_assistant:
  base_url: http://hass.local:8123
  api_token: secret
grabs:
  DCIM/100MSDCF:
    types: [".jpg", ".arw"]
    rename:
      method: tree
      as_prefix: true
      mtime: true
      mediainfo:
        name: Encoded date
  PRIVATE/M4ROOT/CLIP:
    never_delete: true
    types: [".mp4"]
"#;

#[test]
fn test_open_parses_full_config() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let config_path = config_dir.join("cardgrab.yaml");
    write_config(&config_path, FULL_CONFIG);

    let store = ConfigStore::open(&config_path).unwrap();
    let config = store.config();

    assert!(!config.delete_after_copy);
    assert_eq!(config.destination_base, "/data/grabs");
    assert_eq!(config.mount_base, "/mnt/cards");
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.chown.as_ref().unwrap().spec(), "media:media");
    assert_eq!(
        config.home_assistant.as_ref().unwrap().base_url,
        "http://hass.local:8123"
    );

    // Grabs stay in file order
    assert_eq!(config.grabs.len(), 2);
    let photos = &config.grabs[0];
    assert_eq!(photos.path, "DCIM/100MSDCF");
    assert_eq!(photos.types, vec![".jpg", ".arw"]);
    assert_eq!(photos.rename_method, RenameMethod::Tree);
    assert!(photos.rename_as_prefix);
    assert!(photos.use_mtime);
    assert_eq!(photos.media_tag.as_ref().unwrap().name, "Encoded date");

    let clips = &config.grabs[1];
    assert_eq!(clips.path, "PRIVATE/M4ROOT/CLIP");
    assert!(clips.never_delete);
    assert_eq!(clips.rename_method, RenameMethod::None);
    assert!(clips.media_tag.is_none());
}

#[test]
fn test_open_bootstraps_missing_yaml_file() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let config_path = config_dir.join("fresh.yaml");

    let store = ConfigStore::open(&config_path).unwrap();

    // The default file was written and is loadable again
    assert!(config_path.is_file());
    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.starts_with("# cardgrab configuration"));

    let reopened = ConfigStore::open(&config_path).unwrap();
    assert_eq!(
        store.config().destination_base,
        reopened.config().destination_base
    );
    assert!(reopened.config().grabs.is_empty());
}

#[test]
fn test_open_directory_requires_existing_file() {
    let (_temp_dir, config_dir) = create_test_config_dir();

    let err = ConfigStore::open(&config_dir).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));

    write_config(&config_dir.join("cardgrab.yaml"), "grabs: {}\n");
    let store = ConfigStore::open(&config_dir).unwrap();
    assert_eq!(
        store.path(),
        config_dir.join("cardgrab.yaml").canonicalize_utf8().unwrap()
    );
}

#[tokio::test]
async fn test_reload_swaps_snapshot_but_not_old_handles() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let config_path = config_dir.join("cardgrab.yaml");
    write_config(&config_path, "log_level: info\ngrabs: {}\n");

    let store = ConfigStore::open(&config_path).unwrap();
    let before = store.config();

    write_config(&config_path, "log_level: warn\ngrabs: {}\n");
    store.reload().await.unwrap();

    // A snapshot taken before the reload is unaffected
    assert_eq!(before.log_level, "info");
    assert_eq!(store.config().log_level, "warn");
}

#[tokio::test]
async fn test_reload_failure_keeps_previous_config() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let config_path = config_dir.join("cardgrab.yaml");
    write_config(&config_path, "log_level: warn\ngrabs: {}\n");

    let store = ConfigStore::open(&config_path).unwrap();

    write_config(&config_path, "grabs: [not, a, map]\n");
    let err = store.reload().await.unwrap_err();

    assert!(matches!(err, ConfigError::Parse { .. }));
    assert_eq!(store.config().log_level, "warn");
}

#[tokio::test]
async fn test_lock_defers_reload_until_released() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let config_path = config_dir.join("cardgrab.yaml");
    write_config(&config_path, "log_level: info\ngrabs: {}\n");

    let store = Arc::new(ConfigStore::open(&config_path).unwrap());
    let guard = store.lock().await;
    assert!(store.is_locked());

    write_config(&config_path, "log_level: error\ngrabs: {}\n");
    let reloader = Arc::clone(&store);
    let reload_task = tokio::spawn(async move { reloader.reload().await });

    // The reload must sit behind the lock
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.config().log_level, "info");

    drop(guard);
    reload_task.await.unwrap().unwrap();

    assert!(!store.is_locked());
    assert_eq!(store.config().log_level, "error");
}

#[tokio::test]
async fn test_watcher_applies_last_write() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let config_path = config_dir.join("cardgrab.yaml");
    write_config(&config_path, "log_level: info\ngrabs: {}\n");

    let store = Arc::new(ConfigStore::open(&config_path).unwrap());
    let _watcher = spawn_config_watcher(Arc::clone(&store)).unwrap();

    // Let the watcher registration settle before modifying the file
    tokio::time::sleep(Duration::from_millis(300)).await;
    write_config(&config_path, "log_level: debug\ngrabs: {}\n");
    tokio::time::sleep(Duration::from_millis(100)).await;
    write_config(&config_path, "log_level: trace\ngrabs: {}\n");

    // Both writes fall inside one debounce window, so the reload that
    // eventually runs picks up the final contents
    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        if store.config().log_level == "trace" {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "watcher never applied the config change"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_watcher_reloads_relative_config_path() {
    let (_temp_dir, config_dir) = create_test_config_dir();
    let previous_cwd = std::env::current_dir().unwrap();
    std::env::set_current_dir(&config_dir).unwrap();

    // The default invocation passes a bare file name resolved against the
    // working directory; opening it bootstraps the default file there.
    let store = Arc::new(ConfigStore::open("cardgrab.yaml").unwrap());
    assert!(store.path().is_absolute());
    assert!(config_dir.join("cardgrab.yaml").is_file());

    let _watcher = spawn_config_watcher(Arc::clone(&store)).unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    write_config(
        &config_dir.join("cardgrab.yaml"),
        "log_level: warn\ngrabs: {}\n",
    );

    let deadline = std::time::Instant::now() + Duration::from_secs(15);
    let mut reloaded = false;
    while std::time::Instant::now() < deadline {
        if store.config().log_level == "warn" {
            reloaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    std::env::set_current_dir(previous_cwd).unwrap();
    assert!(
        reloaded,
        "watcher never applied a change to a relatively-opened config"
    );
}
