// Environment Builder - Materializes the bundled runtime directory
//
// Always a full rebuild: the work directory is recreated, the service tree is
// linked in, the merged manifest written, and the resolver locks and installs.
//
// The live directory survives any failed or cancelled build. By default it is
// moved aside to `<dir>.previous` and the build runs in place, restoring the
// backup on failure. With staging enabled the build runs in `<dir>.staging`
// and is swapped in once lock and install succeed. A backup left behind by a
// build that never finished is restored before the next one starts.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use annex_types::{DependencySpec, PluginRecord};

use crate::config::{AnnexConfig, BundleConfig, ManifestLayout, ServiceConfig};

use super::link::{LinkError, ServiceTree};
use super::manifest::{ManifestError, MergedManifest};
use super::probe::{ConflictProbe, ProbeError};
use super::resolver::{
    ResolveMode, Resolver, ResolverError, resolve_with_timeout, truncate_diagnostic,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Re-verification rejected the accepted set; nothing was touched
    #[error("accepted plugin set no longer resolves: {diagnostic}")]
    Rejected { diagnostic: String },

    /// Lock or install failed
    #[error("resolver failed to build the bundled environment: {diagnostic}")]
    Failed { diagnostic: String },

    #[error("bundled environment build timed out after {0:?}")]
    TimedOut(Duration),

    #[error("bundle directory {target} must not be inside the service root {root}")]
    InsideServiceRoot { target: PathBuf, root: PathBuf },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),
}

fn fs_err(path: &Path) -> impl FnOnce(std::io::Error) -> BuildError + '_ {
    move |source| BuildError::Filesystem {
        path: path.to_path_buf(),
        source,
    }
}

/// What a successful build produced
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub target: PathBuf,
    /// Plugin dependencies merged into the manifest
    pub plugins: Vec<DependencySpec>,
    pub linked: Vec<PathBuf>,
}

pub struct EnvironmentBuilder {
    service: ServiceConfig,
    layout: ManifestLayout,
    bundle: BundleConfig,
    resolver: Arc<dyn Resolver>,
    probe: ConflictProbe,
    timeout: Duration,
    max_diagnostic_len: usize,
}

impl EnvironmentBuilder {
    pub fn new(config: &AnnexConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            service: config.service.clone(),
            layout: config.manifest.clone(),
            bundle: config.bundle.clone(),
            probe: ConflictProbe::new(config, resolver.clone()),
            resolver,
            timeout: config.resolver.timeout(),
            max_diagnostic_len: config.resolver.max_diagnostic_len,
        }
    }

    /// The live bundle directory
    pub fn target(&self) -> &Path {
        &self.bundle.dir
    }

    /// Build the bundled environment for the accepted records
    pub async fn build(&self, accepted: &[PluginRecord]) -> Result<BuildReport, BuildError> {
        let tree = ServiceTree::locate(&self.service)?;
        ensure_outside(tree.root(), &self.bundle.dir)?;

        let merged = tree.load_manifest()?.merge(
            accepted,
            &self.layout,
            &self.service.bundled_suffix,
        )?;

        // Acceptance at create time does not guarantee the set still resolves
        let verdict = self.probe.probe(accepted).await?;
        if !verdict.accepted {
            return Err(BuildError::Rejected {
                diagnostic: verdict.diagnostic.unwrap_or_default(),
            });
        }

        let live = self.bundle.dir.clone();
        let backup = sibling(&live, "previous")?;
        recover_interrupted(&live, &backup).await?;

        let work_dir = if self.bundle.staging {
            sibling(&live, "staging")?
        } else {
            set_aside(&live, &backup).await?;
            live.clone()
        };

        tracing::info!(
            "Building bundled environment in {} with {} plugin(s)",
            work_dir.display(),
            merged.plugins.len()
        );

        let linked = match self.materialize(&tree, &merged, &work_dir).await {
            Ok(linked) => linked,
            Err(e) => {
                tracing::warn!("Bundled environment build failed: {}", e);
                if self.bundle.staging {
                    discard(&work_dir).await;
                } else {
                    restore(&live, &backup).await?;
                }
                return Err(e);
            }
        };

        if self.bundle.staging {
            swap_into_place(&work_dir, &live, &backup).await?;
        } else {
            discard(&backup).await;
        }

        tracing::info!("Bundled environment ready at {}", live.display());
        Ok(BuildReport {
            target: live.clone(),
            plugins: merged.plugins,
            linked: linked
                .into_iter()
                .filter_map(|link| {
                    link.strip_prefix(&work_dir)
                        .ok()
                        .map(|relative| live.join(relative))
                })
                .collect(),
        })
    }

    /// Populate `work_dir` and run lock and install inside it
    async fn materialize(
        &self,
        tree: &ServiceTree,
        merged: &MergedManifest,
        work_dir: &Path,
    ) -> Result<Vec<PathBuf>, BuildError> {
        recreate(work_dir).await?;
        let linked = tree.link_into(work_dir)?;
        let manifest_path = work_dir.join(tree.manifest_name());
        merged.write(&manifest_path).await?;

        let output = match resolve_with_timeout(
            self.resolver.as_ref(),
            &manifest_path,
            ResolveMode::LockAndInstall,
            work_dir,
            self.timeout,
        )
        .await
        {
            Ok(output) => output,
            Err(ResolverError::TimedOut(after)) => return Err(BuildError::TimedOut(after)),
            Err(err) => return Err(err.into()),
        };
        if !output.success {
            return Err(BuildError::Failed {
                diagnostic: truncate_diagnostic(&output.diagnostic, self.max_diagnostic_len),
            });
        }
        Ok(linked)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filesystem helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Refuse targets inside the service root, and service roots inside the target
fn ensure_outside(root: &Path, target: &Path) -> Result<(), BuildError> {
    let resolved_root = resolve_lenient(root).map_err(fs_err(root))?;
    let resolved_target = resolve_lenient(target).map_err(fs_err(target))?;

    if resolved_target.starts_with(&resolved_root) || resolved_root.starts_with(&resolved_target) {
        return Err(BuildError::InsideServiceRoot {
            target: resolved_target,
            root: resolved_root,
        });
    }
    Ok(())
}

/// Canonicalize the longest existing prefix and re-append the rest
fn resolve_lenient(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut base = absolute.as_path();
    let mut tail: Vec<OsString> = Vec::new();
    loop {
        if let Ok(resolved) = base.canonicalize() {
            return Ok(tail.iter().rev().fold(resolved, |acc, part| acc.join(part)));
        }
        match (base.parent(), base.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                base = parent;
            }
            _ => return Ok(absolute),
        }
    }
}

/// `<dir>` -> `<dir>.<suffix>`
fn sibling(dir: &Path, suffix: &str) -> Result<PathBuf, BuildError> {
    let name = dir.file_name().ok_or_else(|| BuildError::Filesystem {
        path: dir.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "bundle directory has no file name",
        ),
    })?;
    let mut name = name.to_os_string();
    name.push(".");
    name.push(suffix);
    Ok(dir.with_file_name(name))
}

async fn recreate(dir: &Path) -> Result<(), BuildError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("Removed previous {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(fs_err(dir)(e)),
    }
    tokio::fs::create_dir_all(dir).await.map_err(fs_err(dir))
}

async fn exists(path: &Path) -> Result<bool, BuildError> {
    tokio::fs::try_exists(path).await.map_err(fs_err(path))
}

async fn remove(path: &Path) -> Result<(), BuildError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(fs_err(path)(e)),
    }
}

/// Best-effort removal; a leftover is clobbered by the next build anyway
async fn discard(path: &Path) {
    if let Err(e) = remove(path).await {
        tracing::warn!("{}", e);
    }
}

/// A backup only outlives a build that was interrupted, in which case the
/// live directory (if any) is partial and the backup is the last good build.
async fn recover_interrupted(live: &Path, backup: &Path) -> Result<(), BuildError> {
    if !exists(backup).await? {
        return Ok(());
    }
    tracing::warn!(
        "Restoring {} left by an interrupted build",
        backup.display()
    );
    restore(live, backup).await
}

async fn set_aside(live: &Path, backup: &Path) -> Result<(), BuildError> {
    if exists(live).await? {
        tokio::fs::rename(live, backup)
            .await
            .map_err(fs_err(live))?;
        tracing::debug!("Moved {} aside to {}", live.display(), backup.display());
    }
    Ok(())
}

/// Put the backup (if any) back in place of whatever is at `live`
async fn restore(live: &Path, backup: &Path) -> Result<(), BuildError> {
    if !exists(backup).await? {
        return remove(live).await;
    }
    remove(live).await?;
    tokio::fs::rename(backup, live)
        .await
        .map_err(fs_err(backup))?;
    tracing::info!("Previous bundled environment restored at {}", live.display());
    Ok(())
}

async fn swap_into_place(staging: &Path, live: &Path, backup: &Path) -> Result<(), BuildError> {
    set_aside(live, backup).await?;
    if let Err(e) = tokio::fs::rename(staging, live).await {
        restore(live, backup).await?;
        return Err(fs_err(staging)(e));
    }
    discard(backup).await;
    Ok(())
}
