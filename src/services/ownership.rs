use crate::models::ChownIds;
use camino::Utf8Path;
use tokio::process::Command;

/// Apply the configured ownership to a path.
///
/// Best-effort: when no ownership is configured this is a no-op, and
/// failures are logged without escalating. The daemon usually runs as
/// root while the copied media belongs to a regular user.
pub async fn apply(path: &Utf8Path, chown: Option<&ChownIds>) {
    let Some(ids) = chown else {
        return;
    };

    let result = Command::new("chown")
        .arg(ids.spec())
        .arg(path.as_str())
        .output()
        .await;

    match result {
        Ok(output) if output.status.success() => {
            tracing::debug!("Set ownership {} on {}", ids.spec(), path);
        }
        Ok(output) => {
            tracing::warn!(
                "chown {} on {} exited with {}: {}",
                ids.spec(),
                path,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Err(e) => {
            tracing::warn!("Failed to run chown on {}: {}", path, e);
        }
    }
}
