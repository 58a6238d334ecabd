// Configuration models for cardgrab
//
// Two layers: the serde structs that mirror the YAML file exactly
// (ConfigFile and friends), and the resolved AppConfig the rest of the
// daemon consumes. Conversion applies defaults and normalization.

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the organizer renames copied media, from least to most invasive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameMethod {
    /// Leave copied files untouched.
    #[default]
    None,
    /// Rename files in place inside the grab folder.
    Overwrite,
    /// Move files into a year/month/day tree below the grab folder.
    Tree,
}

impl RenameMethod {
    /// True for methods that actually rename or move files.
    pub fn is_active(&self) -> bool {
        !matches!(self, RenameMethod::None)
    }
}

impl FromStr for RenameMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(RenameMethod::None),
            "overwrite" => Ok(RenameMethod::Overwrite),
            "tree" => Ok(RenameMethod::Tree),
            other => Err(format!("unknown rename method: {other:?}")),
        }
    }
}

impl<'de> Deserialize<'de> for RenameMethod {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for RenameMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenameMethod::None => "none",
            RenameMethod::Overwrite => "overwrite",
            RenameMethod::Tree => "tree",
        };
        write!(f, "{name}")
    }
}

/// Where to find a capture date inside a mediainfo report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfoTag {
    /// Track type the tag lives on, e.g. "General" or "Video".
    pub group: String,
    /// Tag name as mediainfo prints it, e.g. "Encoded date".
    pub name: String,
    /// Timezone the tag value is assumed to be in when it carries no offset.
    pub timezone: String,
    /// Substrings stripped from the raw value before date parsing.
    pub noise_substrings: Vec<String>,
}

impl Default for MediaInfoTag {
    fn default() -> Self {
        Self {
            group: default_tag_group(),
            name: default_tag_name(),
            timezone: default_tag_timezone(),
            noise_substrings: vec!["UTC ".to_string()],
        }
    }
}

/// user:group pair applied to everything the daemon creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChownIds {
    pub user: String,
    pub group: String,
}

impl ChownIds {
    /// Ownership spec in the form chown(1) expects.
    pub fn spec(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}

/// Home Assistant endpoint for state updates.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    pub api_token: String,
}

// Keep the long-lived bearer token out of logs.
impl fmt::Debug for HomeAssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HomeAssistantConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// One card subfolder to ingest, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabConfig {
    /// Relative path of the folder on the card, e.g. "DCIM/100MSDCF".
    pub path: Utf8PathBuf,
    /// Exempt this grab from source deletion even when deletion is on.
    pub never_delete: bool,
    /// Lowercased name endings that count as media, e.g. "jpg".
    pub types: Vec<String>,
    pub rename_method: RenameMethod,
    /// Dated names keep the original name as a suffix instead of a sequence number.
    pub rename_as_prefix: bool,
    /// Fall back to the file modification time when no media tag date is found.
    pub use_mtime: bool,
    pub media_tag: Option<MediaInfoTag>,
}

impl GrabConfig {
    /// Final path segment, used as the folder name inside the destination.
    pub fn target_name(&self) -> &str {
        self.path.file_name().unwrap_or_else(|| self.path.as_str())
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Delete source files from the card after a successful copy.
    pub delete_after_copy: bool,
    /// Parent folder for per-run destination folders.
    pub destination_base: Utf8PathBuf,
    /// Where cards get mounted.
    pub mount_base: Utf8PathBuf,
    /// Log level name: trace, debug, info, warn or error.
    pub log_level: String,
    pub chown: Option<ChownIds>,
    pub home_assistant: Option<HomeAssistantConfig>,
    /// Grabs in file order.
    pub grabs: Vec<GrabConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        ConfigFile::default().into()
    }
}

/// On-disk YAML schema. Field and key names match the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_true")]
    pub delete_after_copy: bool,
    #[serde(default)]
    pub destination_base: Option<String>,
    #[serde(default)]
    pub mount_base: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub chown: Option<ChownIds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_assistant: Option<HomeAssistantConfig>,
    /// Keyed by the grab folder path, in file order.
    #[serde(default)]
    pub grabs: IndexMap<String, GrabEntry>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            delete_after_copy: true,
            destination_base: Some(default_destination_base().into_string()),
            mount_base: Some(default_mount_base().into_string()),
            log_level: default_log_level(),
            chown: None,
            home_assistant: None,
            grabs: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrabEntry {
    #[serde(default)]
    pub never_delete: bool,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub rename: Option<RenameEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameEntry {
    #[serde(default)]
    pub method: RenameMethod,
    #[serde(default = "default_true")]
    pub as_prefix: bool,
    #[serde(default)]
    pub mtime: bool,
    #[serde(default)]
    pub mediainfo: Option<MediaInfoEntry>,
}

impl Default for RenameEntry {
    fn default() -> Self {
        Self {
            method: RenameMethod::None,
            as_prefix: true,
            mtime: false,
            mediainfo: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfoEntry {
    #[serde(default = "default_tag_group")]
    pub group: String,
    #[serde(default = "default_tag_name")]
    pub name: String,
    #[serde(default = "default_tag_timezone")]
    pub tz: String,
    #[serde(default)]
    pub substrs: Option<Vec<String>>,
}

impl From<ConfigFile> for AppConfig {
    fn from(file: ConfigFile) -> Self {
        let grabs = file
            .grabs
            .into_iter()
            .map(|(path, entry)| {
                let rename = entry.rename.unwrap_or_default();
                let media_tag = rename.mediainfo.map(|tag| MediaInfoTag {
                    group: tag.group,
                    name: tag.name,
                    timezone: tag.tz,
                    noise_substrings: tag.substrs.unwrap_or_default(),
                });
                GrabConfig {
                    path: Utf8PathBuf::from(path),
                    never_delete: entry.never_delete,
                    types: entry.types.iter().map(|t| t.to_lowercase()).collect(),
                    rename_method: rename.method,
                    rename_as_prefix: rename.as_prefix,
                    use_mtime: rename.mtime,
                    media_tag,
                }
            })
            .collect();

        Self {
            delete_after_copy: file.delete_after_copy,
            destination_base: file
                .destination_base
                .filter(|base| !base.is_empty())
                .map(Utf8PathBuf::from)
                .unwrap_or_else(default_destination_base),
            mount_base: file
                .mount_base
                .filter(|base| !base.is_empty())
                .map(Utf8PathBuf::from)
                .unwrap_or_else(default_mount_base),
            log_level: normalize_log_level(&file.log_level),
            chown: file.chown,
            home_assistant: file.home_assistant,
            grabs,
        }
    }
}

/// Accept the usual level names case-insensitively; anything else falls
/// back to the default rather than failing the whole config.
fn normalize_log_level(raw: &str) -> String {
    let level = raw.to_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => level,
        _ => {
            tracing::warn!("Unknown log level {raw:?}, using {:?}", default_log_level());
            default_log_level()
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tag_group() -> String {
    "General".to_string()
}

fn default_tag_name() -> String {
    "Encoded date".to_string()
}

fn default_tag_timezone() -> String {
    "UTC".to_string()
}

fn home_base() -> Utf8PathBuf {
    dirs::home_dir()
        .and_then(|home| Utf8PathBuf::from_path_buf(home).ok())
        .unwrap_or_else(|| Utf8PathBuf::from("."))
        .join(crate::APP_NAME)
}

/// Default parent for per-run destination folders: ~/cardgrab/grabs
pub fn default_destination_base() -> Utf8PathBuf {
    home_base().join("grabs")
}

/// Default mount location for cards: ~/cardgrab/mounts
pub fn default_mount_base() -> Utf8PathBuf {
    home_base().join("mounts")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_method_parses_case_insensitively() {
        assert_eq!("tree".parse::<RenameMethod>(), Ok(RenameMethod::Tree));
        assert_eq!("TREE".parse::<RenameMethod>(), Ok(RenameMethod::Tree));
        assert_eq!(
            "Overwrite".parse::<RenameMethod>(),
            Ok(RenameMethod::Overwrite)
        );
        assert_eq!("none".parse::<RenameMethod>(), Ok(RenameMethod::None));
        assert!("shuffle".parse::<RenameMethod>().is_err());
    }

    #[test]
    fn test_rename_method_activity() {
        assert!(!RenameMethod::None.is_active());
        assert!(RenameMethod::Overwrite.is_active());
        assert!(RenameMethod::Tree.is_active());
    }

    #[test]
    fn test_empty_file_resolves_to_defaults() {
        let file: ConfigFile = serde_yaml_ng::from_str("{}").unwrap();
        let config = AppConfig::from(file);

        assert!(config.delete_after_copy);
        assert_eq!(config.log_level, "info");
        assert!(config.destination_base.ends_with("grabs"));
        assert!(config.mount_base.ends_with("mounts"));
        assert!(config.chown.is_none());
        assert!(config.home_assistant.is_none());
        assert!(config.grabs.is_empty());
    }

    #[test]
    fn test_blank_bases_fall_back_to_defaults() {
        let yaml = r#"
destination_base: ""
mount_base: ""
"#;
        let file: ConfigFile = serde_yaml_ng::from_str(yaml).unwrap();
        let config = AppConfig::from(file);

        assert!(config.destination_base.ends_with("grabs"));
        assert!(config.mount_base.ends_with("mounts"));
    }

    #[test]
    fn test_log_level_normalization() {
        let file: ConfigFile = serde_yaml_ng::from_str("log_level: DEBUG").unwrap();
        assert_eq!(AppConfig::from(file).log_level, "debug");

        let file: ConfigFile = serde_yaml_ng::from_str("log_level: loudest").unwrap();
        assert_eq!(AppConfig::from(file).log_level, "info");
    }

    #[test]
    fn test_grab_parsing_applies_defaults_and_lowercases_types() {
        let yaml = r#"
grabs:
  "DCIM/100MSDCF":
    types: ["JPG", "Arw"]
"#;
        let file: ConfigFile = serde_yaml_ng::from_str(yaml).unwrap();
        let config = AppConfig::from(file);

        assert_eq!(config.grabs.len(), 1);
        let grab = &config.grabs[0];
        assert_eq!(grab.path, Utf8PathBuf::from("DCIM/100MSDCF"));
        assert_eq!(grab.types, vec!["jpg", "arw"]);
        assert!(!grab.never_delete);
        assert_eq!(grab.rename_method, RenameMethod::None);
        assert!(grab.rename_as_prefix);
        assert!(!grab.use_mtime);
        assert!(grab.media_tag.is_none());
    }

    #[test]
    fn test_rename_block_defaults() {
        let yaml = r#"
grabs:
  CLIP:
    types: ["mp4"]
    rename:
      method: tree
"#;
        let file: ConfigFile = serde_yaml_ng::from_str(yaml).unwrap();
        let config = AppConfig::from(file);
        let grab = &config.grabs[0];

        assert_eq!(grab.rename_method, RenameMethod::Tree);
        assert!(grab.rename_as_prefix);
        assert!(!grab.use_mtime);
    }

    #[test]
    fn test_mediainfo_tag_parsing() {
        let yaml = r#"
grabs:
  CLIP:
    types: ["mp4"]
    rename:
      method: tree
      as_prefix: false
      mtime: true
      mediainfo:
        group: General
        name: Encoded date
        tz: UTC
        substrs: ["UTC "]
"#;
        let file: ConfigFile = serde_yaml_ng::from_str(yaml).unwrap();
        let config = AppConfig::from(file);
        let grab = &config.grabs[0];

        assert!(!grab.rename_as_prefix);
        assert!(grab.use_mtime);
        let tag = grab.media_tag.as_ref().unwrap();
        assert_eq!(tag.group, "General");
        assert_eq!(tag.name, "Encoded date");
        assert_eq!(tag.timezone, "UTC");
        assert_eq!(tag.noise_substrings, vec!["UTC ".to_string()]);
    }

    #[test]
    fn test_mediainfo_entry_fills_missing_keys() {
        let yaml = r#"
grabs:
  CLIP:
    rename:
      method: overwrite
      mediainfo:
        name: Recorded date
"#;
        let file: ConfigFile = serde_yaml_ng::from_str(yaml).unwrap();
        let config = AppConfig::from(file);
        let tag = config.grabs[0].media_tag.as_ref().unwrap();

        assert_eq!(tag.group, "General");
        assert_eq!(tag.name, "Recorded date");
        assert_eq!(tag.timezone, "UTC");
        assert!(tag.noise_substrings.is_empty());
    }

    #[test]
    fn test_grab_order_follows_file_order() {
        let yaml = r#"
grabs:
  ZED: {}
  ALPHA: {}
  MID: {}
"#;
        let file: ConfigFile = serde_yaml_ng::from_str(yaml).unwrap();
        let config = AppConfig::from(file);
        let order: Vec<&str> = config.grabs.iter().map(|g| g.path.as_str()).collect();

        assert_eq!(order, vec!["ZED", "ALPHA", "MID"]);
    }

    #[test]
    fn test_target_name_is_final_segment() {
        let file: ConfigFile = serde_yaml_ng::from_str(
            r#"
grabs:
  "DCIM/100MSDCF": {}
  PRIVATE: {}
"#,
        )
        .unwrap();
        let config = AppConfig::from(file);

        assert_eq!(config.grabs[0].target_name(), "100MSDCF");
        assert_eq!(config.grabs[1].target_name(), "PRIVATE");
    }

    #[test]
    fn test_chown_spec_format() {
        let ids = ChownIds {
            user: "media".to_string(),
            group: "users".to_string(),
        };
        assert_eq!(ids.spec(), "media:users");
    }

    #[test]
    fn test_home_assistant_debug_redacts_token() {
        let ha = HomeAssistantConfig {
            base_url: "http://hass.local:8123".to_string(),
            api_token: "very-secret".to_string(),
        };
        let rendered = format!("{ha:?}");

        assert!(rendered.contains("http://hass.local:8123"));
        assert!(!rendered.contains("very-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_default_tag_matches_common_cameras() {
        let tag = MediaInfoTag::default();
        assert_eq!(tag.group, "General");
        assert_eq!(tag.name, "Encoded date");
        assert_eq!(tag.timezone, "UTC");
        assert_eq!(tag.noise_substrings, vec!["UTC ".to_string()]);
    }
}
