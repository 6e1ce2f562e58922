// Link Tree - Aliases the service's source into a bundled directory
//
// Links point back at the canonical service files; nothing is copied and the
// builder never writes through a link.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::ServiceConfig;

use super::manifest::{ManifestError, ServiceManifest, original_name};

#[derive(Debug, thiserror::Error)]
#[error("failed to link {link} -> {target}: {source}")]
pub struct LinkError {
    pub link: PathBuf,
    pub target: PathBuf,
    #[source]
    pub source: io::Error,
}

/// The service project as located on disk
#[derive(Debug, Clone)]
pub struct ServiceTree {
    root: PathBuf,
    manifest_path: PathBuf,
    manifest_name: String,
    source_units: Vec<String>,
    optional_links: Vec<String>,
}

impl ServiceTree {
    /// Locate the service manifest from `config.root`; the manifest's
    /// directory becomes the service root.
    pub fn locate(config: &ServiceConfig) -> Result<Self, ManifestError> {
        let manifest_path = ServiceManifest::locate(&config.root, &config.manifest)?;
        let root = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ManifestError::Layout(format!(
                "manifest {} has no parent directory",
                manifest_path.display()
            )))?;

        Ok(Self {
            root,
            manifest_path,
            manifest_name: config.manifest.clone(),
            source_units: config.source_units.clone(),
            optional_links: config.optional_links.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    pub fn load_manifest(&self) -> Result<ServiceManifest, ManifestError> {
        ServiceManifest::load(&self.manifest_path)
    }

    /// Create the link tree inside `target` (which must already exist).
    ///
    /// Links every source unit, the clean manifest as its `.original`
    /// variant, and each optional link that exists. Returns the links made.
    pub fn link_into(&self, target: &Path) -> Result<Vec<PathBuf>, LinkError> {
        let mut linked = Vec::new();

        let original = target.join(original_name(&self.manifest_name));
        symlink(&self.manifest_path, &original)?;
        linked.push(original);

        for unit in &self.source_units {
            // The merged manifest owns this name in the target
            if unit == &self.manifest_name {
                continue;
            }
            let source = self.root.join(unit);
            let link = target.join(unit);
            symlink(&source, &link)?;
            linked.push(link);
        }

        for optional in &self.optional_links {
            let source = self.root.join(optional);
            if !source.exists() {
                continue;
            }
            let link = target.join(optional);
            symlink(&source, &link)?;
            linked.push(link);
        }

        tracing::debug!(
            "Linked {} entries from {} into {}",
            linked.len(),
            self.root.display(),
            target.display()
        );
        Ok(linked)
    }
}

fn symlink(source: &Path, link: &Path) -> Result<(), LinkError> {
    let err = |source_err: io::Error| LinkError {
        link: link.to_path_buf(),
        target: source.to_path_buf(),
        source: source_err,
    };

    // A dangling link would only fail later inside the resolver
    if !source.exists() {
        return Err(err(io::Error::new(
            io::ErrorKind::NotFound,
            "link target does not exist",
        )));
    }
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent).map_err(err)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(source, link).map_err(err)
    }
    #[cfg(windows)]
    {
        if source.is_dir() {
            std::os::windows::fs::symlink_dir(source, link).map_err(err)
        } else {
            std::os::windows::fs::symlink_file(source, link).map_err(err)
        }
    }
}
