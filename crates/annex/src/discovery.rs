// Manifest Discovery - Finds plugin descriptors among installed artifacts
//
// Scans the immediate subdirectories of the artifact root. A missing
// descriptor means "not a plugin for this host" and is skipped silently; a
// malformed one becomes a warning, and so does an error while listing the
// root (the artifacts found before it are kept). Nothing here aborts the scan
// except failing to open the root itself.

use std::path::{Path, PathBuf};

use annex_types::PluginManifest;
use futures::{Stream, StreamExt};

/// An artifact directory with a parsed descriptor
#[derive(Debug, Clone)]
pub struct DiscoveredArtifact {
    /// Artifact directory
    pub path: PathBuf,
    /// Directory name (the installed package name)
    pub dir_name: String,
    pub manifest: PluginManifest,
}

/// A descriptor that could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub artifacts: Vec<DiscoveredArtifact>,
    pub warnings: Vec<DiscoveryWarning>,
}

impl Discovery {
    /// Artifact for an installed package directory, if one was found
    pub fn find(&self, dir_name: &str) -> Option<&DiscoveredArtifact> {
        let key = annex_types::normalize_package(dir_name);
        self.artifacts
            .iter()
            .find(|artifact| annex_types::normalize_package(&artifact.dir_name) == key)
    }

    fn warn(&mut self, path: PathBuf, reason: String) {
        let warning = DiscoveryWarning { path, reason };
        tracing::warn!("Skipping plugin descriptor {}", warning);
        self.warnings.push(warning);
    }
}

/// Scan `artifact_root` for `<dir>/<descriptor>` files
///
/// ```text
/// plugins/
/// ├── acme-weather/
/// │   └── annex.json   <- Found
/// ├── requests/        <- Skipped, not a plugin
/// └── broken/
///     └── annex.json   <- Warning, invalid JSON
/// ```
pub async fn discover(artifact_root: &Path, descriptor: &Path) -> std::io::Result<Discovery> {
    let mut discovery = Discovery::default();

    if !tokio::fs::try_exists(artifact_root).await? {
        tracing::debug!(
            "Artifact directory does not exist: {}",
            artifact_root.display()
        );
        return Ok(discovery);
    }

    let entries = tokio::fs::read_dir(artifact_root).await?;
    let paths = futures::stream::unfold(entries, |mut entries| async move {
        match entries.next_entry().await {
            Ok(Some(entry)) => Some((Ok(entry.path()), entries)),
            Ok(None) => None,
            Err(e) => Some((Err(e), entries)),
        }
    });
    scan(&mut discovery, artifact_root, descriptor, paths).await;

    Ok(discovery)
}

async fn scan<S>(discovery: &mut Discovery, artifact_root: &Path, descriptor: &Path, paths: S)
where
    S: Stream<Item = std::io::Result<PathBuf>>,
{
    let mut paths = std::pin::pin!(paths);
    while let Some(next) = paths.next().await {
        let path = match next {
            Ok(path) => path,
            Err(e) => {
                // Keep what was found so far
                discovery.warn(artifact_root.to_path_buf(), format!("scan stopped early: {e}"));
                break;
            }
        };
        let Some(dir_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if !tokio::fs::metadata(&path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
        {
            continue;
        }

        let descriptor_path = path.join(descriptor);
        let text = match tokio::fs::read_to_string(&descriptor_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                discovery.warn(descriptor_path, e.to_string());
                continue;
            }
        };

        match PluginManifest::from_json(&text) {
            Ok(manifest) => {
                tracing::debug!("Discovered plugin {} at {}", manifest.name, path.display());
                discovery.artifacts.push(DiscoveredArtifact {
                    path,
                    dir_name,
                    manifest,
                });
            }
            Err(e) => discovery.warn(descriptor_path, format!("invalid descriptor: {e}")),
        }
    }
}

/// Read the descriptor of one artifact directory
pub async fn load_descriptor(
    artifact_dir: &Path,
    descriptor: &Path,
) -> Result<PluginManifest, DiscoveryWarning> {
    let path = artifact_dir.join(descriptor);
    let text = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| DiscoveryWarning {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    PluginManifest::from_json(&text).map_err(|e| DiscoveryWarning {
        path,
        reason: format!("invalid descriptor: {e}"),
    })
}
