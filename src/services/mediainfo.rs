use crate::models::MediaInfoTag;
use camino::Utf8Path;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Ceiling for one mediainfo invocation.
const MEDIAINFO_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while reading a capture date from a media file
#[derive(Error, Debug)]
pub enum MediaTagError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("mediainfo exited with {code}: {stderr}")]
    CommandFailed { code: i32, stderr: String },

    #[error("Failed to parse mediainfo report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("Invalid timezone {0:?}")]
    Timezone(String),

    #[error("Unparsable datetime {0:?}")]
    Datetime(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),
}

/// One track from a mediainfo report: its type plus all string attributes.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    pub track_type: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Deserialize)]
struct Report {
    #[serde(default)]
    media: Option<MediaSection>,
}

#[derive(Deserialize)]
struct MediaSection {
    #[serde(default, rename = "track")]
    tracks: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Read the configured tag from a media file and convert it to a local date.
///
/// Returns `Ok(None)` when the tag is absent from the report; that is an
/// everyday occurrence, not an error. Everything else (missing binary,
/// unparsable value, bad timezone) surfaces as a `MediaTagError`.
pub async fn local_tag_date(
    path: &Utf8Path,
    tag: &MediaInfoTag,
) -> Result<Option<NaiveDate>, MediaTagError> {
    let tracks = probe(path).await?;

    let Some(raw) = tag_value(&tracks, tag) else {
        tracing::warn!("Tag {:?} not found in {}", tag.name, path);
        return Ok(None);
    };

    let local = parse_tag_datetime(raw, tag)?;
    tracing::debug!("{}: {:?} = {:?} -> {}", path, tag.name, raw, local);
    Ok(Some(local.date_naive()))
}

/// Run `mediainfo --Output=JSON` on a file and parse the report.
pub async fn probe(path: &Utf8Path) -> Result<Vec<MediaTrack>, MediaTagError> {
    let output = timeout(
        MEDIAINFO_TIMEOUT,
        Command::new("mediainfo")
            .arg("--Output=JSON")
            .arg(path.as_str())
            .output(),
    )
    .await
    .map_err(|_| {
        tracing::warn!("mediainfo timed out after {:?}", MEDIAINFO_TIMEOUT);
        MediaTagError::Timeout(MEDIAINFO_TIMEOUT)
    })??;

    if !output.status.success() {
        return Err(MediaTagError::CommandFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    parse_report(&String::from_utf8_lossy(&output.stdout))
}

/// Parse a mediainfo JSON report into tracks.
///
/// Only string-valued attributes are kept; `@`-prefixed bookkeeping keys
/// other than the track type are dropped.
pub fn parse_report(json: &str) -> Result<Vec<MediaTrack>, MediaTagError> {
    let report: Report = serde_json::from_str(json)?;

    let tracks = report
        .media
        .map(|media| media.tracks)
        .unwrap_or_default()
        .into_iter()
        .map(|raw| {
            let track_type = raw
                .get("@type")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_string();
            let attributes = raw
                .iter()
                .filter(|(key, _)| !key.starts_with('@'))
                .filter_map(|(key, value)| {
                    value.as_str().map(|text| (key.clone(), text.to_string()))
                })
                .collect();
            MediaTrack {
                track_type,
                attributes,
            }
        })
        .collect();

    Ok(tracks)
}

/// Look up a tag value across all tracks of the tag's group.
///
/// Tag names are matched the way mediainfo mangles them in reports:
/// case-insensitively with spaces as underscores, so a configured
/// "Encoded date" finds the report's "Encoded_Date". Tracks of the right
/// group missing the tag (or carrying it empty) are skipped in favor of
/// later ones.
pub fn tag_value<'a>(tracks: &'a [MediaTrack], tag: &MediaInfoTag) -> Option<&'a str> {
    let wanted = normalize_key(&tag.name);

    tracks
        .iter()
        .filter(|track| track.track_type == tag.group)
        .find_map(|track| {
            track.attributes.iter().find_map(|(key, value)| {
                (normalize_key(key) == wanted && !value.is_empty()).then_some(value.as_str())
            })
        })
}

/// Parse a raw tag value into a local-timezone datetime.
///
/// Noise substrings are stripped first. A value carrying its own UTC
/// offset is honored directly; naive values are interpreted in the tag's
/// configured timezone and then converted to local time.
pub fn parse_tag_datetime(raw: &str, tag: &MediaInfoTag) -> Result<DateTime<Local>, MediaTagError> {
    let cleaned = strip_noise(raw, &tag.noise_substrings);

    if let Ok(with_offset) = DateTime::parse_from_rfc3339(&cleaned) {
        return Ok(with_offset.with_timezone(&Local));
    }

    let tz: Tz = tag
        .timezone
        .parse()
        .map_err(|_| MediaTagError::Timezone(tag.timezone.clone()))?;

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        // EXIF-style colons in the date part
        "%Y:%m:%d %H:%M:%S",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, format) {
            return localize(naive, tz, &cleaned);
        }
    }

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y:%m:%d"];
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return localize(date.and_time(NaiveTime::MIN), tz, &cleaned);
        }
    }

    Err(MediaTagError::Datetime(cleaned))
}

fn localize(naive: NaiveDateTime, tz: Tz, original: &str) -> Result<DateTime<Local>, MediaTagError> {
    // Ambiguous wall times (DST fall-back) resolve to the earlier instant;
    // nonexistent ones (spring-forward gap) are rejected.
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Local))
        .ok_or_else(|| MediaTagError::Datetime(original.to_string()))
}

fn strip_noise(raw: &str, noise_substrings: &[String]) -> String {
    let mut value = raw.to_string();
    for noise in noise_substrings {
        value = value.replace(noise.as_str(), "");
    }
    value.trim().to_string()
}

fn normalize_key(key: &str) -> String {
    key.to_lowercase().replace(' ', "_")
}
