use crate::models::{ChownIds, MediaInfoTag, RenameMethod};
use crate::services::{mediainfo, ownership};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Datelike, Local, NaiveDate};
use std::fs;
use thiserror::Error;

/// Errors that can occur while organizing a folder of copied media
#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("Directory not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Organizing requires an active rename method")]
    InactiveMethod,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
}

/// Rename and place every regular file directly inside `directory`.
///
/// Subdirectories and their contents are left alone. For each file a date
/// is derived (media tag first, then modification time if `use_mtime`) and
/// drives the new name:
///
/// - with a date and `as_prefix`: `YYYYMMDD_<collapsed original name>`
/// - with a date, no prefix: `YYYYMMDD-NNNNN.<ext>` numbered per file
/// - without a date: just the collapsed original name
///
/// Collapsing strips chained extensions down to the final one, so
/// `clip.tmp.mp4` becomes `clip.mp4`. `Tree` places results in a
/// year/month/day folder chain below `directory`; `Overwrite` renames in
/// place. Moves overwrite existing targets.
pub async fn organize(
    directory: &Utf8Path,
    method: RenameMethod,
    as_prefix: bool,
    use_mtime: bool,
    media_tag: Option<&MediaInfoTag>,
    chown: Option<&ChownIds>,
) -> Result<(), OrganizeError> {
    if !directory.is_dir() {
        return Err(OrganizeError::NotFound(directory.to_path_buf()));
    }
    if !method.is_active() {
        return Err(OrganizeError::InactiveMethod);
    }

    // Materialize the listing up front; the moves below must not feed
    // back into the iteration.
    let mut names = Vec::new();
    let entries = directory
        .read_dir_utf8()
        .map_err(|source| io_error(directory, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| io_error(directory, source))?;
        let file_type = entry
            .file_type()
            .map_err(|source| io_error(entry.path(), source))?;
        if file_type.is_file() {
            names.push(entry.file_name().to_string());
        }
    }

    tracing::debug!("Organizing {} files in {}", names.len(), directory);

    let mut sequence: u32 = 0;
    for name in &names {
        sequence += 1;
        organize_file(
            directory, name, sequence, method, as_prefix, use_mtime, media_tag, chown,
        )
        .await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn organize_file(
    directory: &Utf8Path,
    name: &str,
    sequence: u32,
    method: RenameMethod,
    as_prefix: bool,
    use_mtime: bool,
    media_tag: Option<&MediaInfoTag>,
    chown: Option<&ChownIds>,
) -> Result<(), OrganizeError> {
    let path = directory.join(name);

    let metadata = fs::metadata(&path).map_err(|source| io_error(&path, source))?;
    let modified = metadata
        .modified()
        .map_err(|source| io_error(&path, source))?;
    let mtime_date = DateTime::<Local>::from(modified).date_naive();

    let media_date = match media_tag {
        Some(tag) => match mediainfo::local_tag_date(&path, tag).await {
            Ok(date) => date,
            Err(e) => {
                // Any trouble reading the tag just means this file gets no
                // media date; the modification time may still apply.
                tracing::warn!("No media date for {}: {}", path, e);
                None
            }
        },
        None => None,
    };
    let derived = pick_date(media_date, use_mtime, mtime_date);

    let dest_dir = match method {
        RenameMethod::Tree => {
            // The tree level must exist even for files whose name carries
            // no date; the folders fall back to the modification time.
            make_dated_tree(directory, derived.unwrap_or(mtime_date), chown).await?
        }
        RenameMethod::Overwrite => directory.to_path_buf(),
        RenameMethod::None => return Err(OrganizeError::InactiveMethod),
    };

    let dest = dest_dir.join(build_file_name(name, derived, as_prefix, sequence));
    fs::rename(&path, &dest).map_err(|source| io_error(&path, source))?;
    tracing::info!("Moved {} -> {}", path, dest);
    ownership::apply(&dest, chown).await;

    Ok(())
}

/// Create (and chown) each missing level of `<directory>/<year>/<month>/<day>`.
async fn make_dated_tree(
    directory: &Utf8Path,
    date: NaiveDate,
    chown: Option<&ChownIds>,
) -> Result<Utf8PathBuf, OrganizeError> {
    let mut dir = directory.to_path_buf();
    let levels = [
        date.year().to_string(),
        format!("{:02}", date.month()),
        format!("{:02}", date.day()),
    ];
    for level in levels {
        dir.push(level);
        if !dir.exists() {
            fs::create_dir(&dir).map_err(|source| io_error(&dir, source))?;
            ownership::apply(&dir, chown).await;
        }
    }
    Ok(dir)
}

/// Media tag date wins; the modification time only applies when enabled.
fn pick_date(
    media_date: Option<NaiveDate>,
    use_mtime: bool,
    mtime_date: NaiveDate,
) -> Option<NaiveDate> {
    media_date.or_else(|| use_mtime.then_some(mtime_date))
}

fn build_file_name(
    original: &str,
    date: Option<NaiveDate>,
    as_prefix: bool,
    sequence: u32,
) -> String {
    let collapsed = collapse_suffixes(original);
    let Some(date) = date else {
        return collapsed;
    };

    if as_prefix {
        format!("{}_{}", date_stamp(date), collapsed)
    } else {
        let suffix = Utf8Path::new(original)
            .extension()
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        format!("{}-{:05}{}", date_stamp(date), sequence, suffix)
    }
}

/// Strip chained extensions, keeping only the final one:
/// `clip.tmp.mp4` -> `clip.mp4`.
fn collapse_suffixes(name: &str) -> String {
    let path = Utf8Path::new(name);
    let Some(extension) = path.extension() else {
        return name.to_string();
    };

    let mut stem = path.file_stem().unwrap_or(name);
    loop {
        let inner = Utf8Path::new(stem);
        match (inner.file_stem(), inner.extension()) {
            (Some(next), Some(_)) => stem = next,
            _ => break,
        }
    }
    format!("{stem}.{extension}")
}

fn date_stamp(date: NaiveDate) -> String {
    format!("{}{:02}{:02}", date.year(), date.month(), date.day())
}

fn io_error<P: AsRef<Utf8Path>>(path: P, source: std::io::Error) -> OrganizeError {
    OrganizeError::Io {
        path: path.as_ref().to_path_buf(),
        source,
    }
}
