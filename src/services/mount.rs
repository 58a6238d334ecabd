use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Where already-established mounts are looked up.
pub const DEFAULT_MOUNTS_TABLE: &str = "/proc/self/mounts";

/// Ceiling for mount(8) and umount(8); slow cards can take a while to settle.
const MOUNT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors that can occur while mounting a card
#[derive(Error, Debug)]
pub enum MountError {
    #[error("Failed to read mounts table {path}: {source}")]
    MountsTable {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create mount base {path}: {source}")]
    CreateBase {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("mount of {device_node} exited with {code}: {stderr}")]
    CommandFailed {
        device_node: String,
        code: i32,
        stderr: String,
    },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),
}

/// Errors that can occur while unmounting a card
#[derive(Error, Debug)]
pub enum UnmountError {
    #[error("Must provide a mountpoint path")]
    MissingMountpoint,

    #[error("umount of {mountpoint} exited with {code}: {stderr}")]
    CommandFailed {
        mountpoint: Utf8PathBuf,
        code: i32,
        stderr: String,
    },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),
}

/// Service for mounting and unmounting card partitions
///
/// Mounting is idempotent: a device node that already appears in the
/// mounts table is reported at its existing mountpoint without invoking
/// any external command. Only unmounted devices get mounted, onto the
/// configured mount base.
#[derive(Debug, Clone)]
pub struct MountManager {
    mount_base: Utf8PathBuf,
    mounts_table: Utf8PathBuf,
}

impl MountManager {
    /// Create a new MountManager mounting onto `mount_base`
    pub fn new<P: AsRef<Utf8Path>>(mount_base: P) -> Self {
        Self {
            mount_base: mount_base.as_ref().to_path_buf(),
            mounts_table: Utf8PathBuf::from(DEFAULT_MOUNTS_TABLE),
        }
    }

    /// Override the mounts table location. Tests point this at a fixture.
    pub fn with_mounts_table<P: AsRef<Utf8Path>>(mut self, table: P) -> Self {
        self.mounts_table = table.as_ref().to_path_buf();
        self
    }

    /// Look up the mountpoint of `device_node` in the mounts table.
    pub fn find_mountpoint(&self, device_node: &str) -> Result<Option<Utf8PathBuf>, MountError> {
        let contents =
            fs::read_to_string(&self.mounts_table).map_err(|source| MountError::MountsTable {
                path: self.mounts_table.clone(),
                source,
            })?;
        Ok(parse_mounts_table(&contents, device_node))
    }

    /// Mount `device_node` and return its mountpoint.
    ///
    /// If the device is already mounted, the existing mountpoint is
    /// returned as-is.
    pub async fn mount(&self, device_node: &str) -> Result<Utf8PathBuf, MountError> {
        if let Some(existing) = self.find_mountpoint(device_node)? {
            tracing::info!("{} is already mounted at {}", device_node, existing);
            return Ok(existing);
        }

        fs::create_dir_all(&self.mount_base).map_err(|source| MountError::CreateBase {
            path: self.mount_base.clone(),
            source,
        })?;

        tracing::info!("Mounting {} at {}", device_node, self.mount_base);
        let start = Instant::now();

        let output = timeout(
            MOUNT_COMMAND_TIMEOUT,
            Command::new("mount")
                .arg(device_node)
                .arg(self.mount_base.as_str())
                .output(),
        )
        .await
        .map_err(|_| {
            tracing::warn!("mount timed out after {:?}", MOUNT_COMMAND_TIMEOUT);
            MountError::Timeout(MOUNT_COMMAND_TIMEOUT)
        })??;

        if !output.status.success() {
            return Err(MountError::CommandFailed {
                device_node: device_node.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!(
            "Mounted {} in {:.2}s",
            device_node,
            start.elapsed().as_secs_f32()
        );
        Ok(self.mount_base.clone())
    }

    /// Unmount whatever is mounted at `mountpoint`.
    pub async fn unmount(&self, mountpoint: &Utf8Path) -> Result<(), UnmountError> {
        if mountpoint.as_str().trim().is_empty() {
            return Err(UnmountError::MissingMountpoint);
        }

        tracing::info!("Unmounting {}", mountpoint);

        let output = timeout(
            MOUNT_COMMAND_TIMEOUT,
            Command::new("umount").arg(mountpoint.as_str()).output(),
        )
        .await
        .map_err(|_| {
            tracing::warn!("umount timed out after {:?}", MOUNT_COMMAND_TIMEOUT);
            UnmountError::Timeout(MOUNT_COMMAND_TIMEOUT)
        })??;

        if !output.status.success() {
            return Err(UnmountError::CommandFailed {
                mountpoint: mountpoint.to_path_buf(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Find the first mountpoint recorded for `device_node`.
///
/// Lines follow fstab(5) layout: device, mountpoint, type, options, dump,
/// pass, whitespace separated with octal escapes in paths.
fn parse_mounts_table(contents: &str, device_node: &str) -> Option<Utf8PathBuf> {
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) else {
            continue;
        };
        if device == device_node {
            return Some(Utf8PathBuf::from(unescape_mount_path(mountpoint)));
        }
    }
    None
}

// The kernel escapes space, tab, newline and backslash in mount paths.
fn unescape_mount_path(field: &str) -> String {
    let mut result = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        let escape: String = chars.clone().take(3).collect();
        match escape.as_str() {
            "040" => result.push(' '),
            "011" => result.push('\t'),
            "012" => result.push('\n'),
            "134" => result.push('\\'),
            _ => {
                result.push(c);
                continue;
            }
        }
        chars.nth(2);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const SAMPLE_TABLE: &str = "\
/dev/root / ext4 rw,noatime 0 0\n\
devtmpfs /dev devtmpfs rw,relatime 0 0\n\
/dev/sdb1 /home/pi/cardgrab/mounts vfat rw,relatime 0 0\n\
/dev/mmcblk0p2 /media/card\\040two ext4 rw 0 0\n";

    #[test]
    fn test_parse_mounts_table_finds_device() {
        let found = parse_mounts_table(SAMPLE_TABLE, "/dev/sdb1");
        assert_eq!(
            found,
            Some(Utf8PathBuf::from("/home/pi/cardgrab/mounts"))
        );
    }

    #[test]
    fn test_parse_mounts_table_missing_device() {
        assert_eq!(parse_mounts_table(SAMPLE_TABLE, "/dev/sdc1"), None);
    }

    #[test]
    fn test_parse_mounts_table_unescapes_spaces() {
        let found = parse_mounts_table(SAMPLE_TABLE, "/dev/mmcblk0p2");
        assert_eq!(found, Some(Utf8PathBuf::from("/media/card two")));
    }

    #[test]
    fn test_parse_mounts_table_first_entry_wins() {
        let table = "\
/dev/sdb1 /first vfat rw 0 0\n\
/dev/sdb1 /second vfat rw 0 0\n";
        assert_eq!(
            parse_mounts_table(table, "/dev/sdb1"),
            Some(Utf8PathBuf::from("/first"))
        );
    }

    #[test]
    fn test_unescape_mount_path() {
        assert_eq!(unescape_mount_path("/plain/path"), "/plain/path");
        assert_eq!(unescape_mount_path("/with\\040space"), "/with space");
        assert_eq!(unescape_mount_path("/back\\134slash"), "/back\\slash");
        assert_eq!(unescape_mount_path("/odd\\0"), "/odd\\0");
    }

    #[test]
    fn test_find_mountpoint_reads_table_file() {
        let mut table = NamedTempFile::new().unwrap();
        write!(table, "{SAMPLE_TABLE}").unwrap();
        table.flush().unwrap();
        let table_path = Utf8PathBuf::try_from(table.path().to_path_buf()).unwrap();

        let manager = MountManager::new("/tmp/mounts").with_mounts_table(&table_path);

        let found = manager.find_mountpoint("/dev/sdb1").unwrap();
        assert_eq!(found, Some(Utf8PathBuf::from("/home/pi/cardgrab/mounts")));
        assert_eq!(manager.find_mountpoint("/dev/nope").unwrap(), None);
    }

    #[tokio::test]
    async fn test_mount_is_idempotent_for_mounted_device() {
        let mut table = NamedTempFile::new().unwrap();
        write!(table, "{SAMPLE_TABLE}").unwrap();
        table.flush().unwrap();
        let table_path = Utf8PathBuf::try_from(table.path().to_path_buf()).unwrap();

        let manager = MountManager::new("/tmp/mounts").with_mounts_table(&table_path);

        // Succeeding here proves no external command ran; mounting this
        // fake node for real would fail.
        let mountpoint = manager.mount("/dev/sdb1").await.unwrap();
        assert_eq!(mountpoint, Utf8PathBuf::from("/home/pi/cardgrab/mounts"));
    }

    #[tokio::test]
    async fn test_unmount_requires_mountpoint() {
        let manager = MountManager::new("/tmp/mounts");

        let err = manager.unmount(Utf8Path::new("")).await.unwrap_err();
        assert!(matches!(err, UnmountError::MissingMountpoint));

        let err = manager.unmount(Utf8Path::new("   ")).await.unwrap_err();
        assert!(matches!(err, UnmountError::MissingMountpoint));
    }

    #[tokio::test]
    async fn test_mount_failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let dir_path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        // Empty table: the node counts as unmounted, so mount(8) runs.
        let table = NamedTempFile::new().unwrap();
        let table_path = Utf8PathBuf::try_from(table.path().to_path_buf()).unwrap();

        let manager =
            MountManager::new(dir_path.join("base")).with_mounts_table(&table_path);

        // A node that does not exist fails regardless of privileges.
        let node = dir_path.join("missing-node");
        let err = manager.mount(node.as_str()).await.unwrap_err();

        match err {
            MountError::CommandFailed { code, stderr, .. } => {
                assert_ne!(code, 0);
                assert!(!stderr.is_empty(), "mount diagnostics were not captured");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmount_failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let dir_path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let manager = MountManager::new("/tmp/mounts");

        // A plain directory is never a mountpoint, so umount(8) refuses.
        let err = manager.unmount(&dir_path).await.unwrap_err();

        match err {
            UnmountError::CommandFailed { code, stderr, .. } => {
                assert_ne!(code, 0);
                assert!(!stderr.is_empty(), "umount diagnostics were not captured");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }
}
