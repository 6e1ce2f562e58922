// Activator - Turns an installed record into a registered plugin
//
// descriptor -> entry point -> catalog factory -> instance -> registry (and
// route table when a prefix is declared). A binding made here is immutable for
// the life of the process: a record that is already active is never
// re-instantiated, and a newer version only takes effect after a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use annex_types::{EntryPointError, PluginRecord};
use dashmap::DashMap;

use crate::config::PluginsConfig;
use crate::discovery::load_descriptor;

use super::catalog::PluginCatalog;
use super::host::{PluginContext, PluginError};
use super::registry::{PluginRegistry, RegistryError, RouteRegistrar};

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("no plugin descriptor for '{package}' at {path}")]
    DescriptorNotFound { package: String, path: PathBuf },

    #[error("invalid plugin descriptor {path}: {reason}")]
    DescriptorInvalid { path: PathBuf, reason: String },

    #[error(transparent)]
    InvalidEntryPoint(#[from] EntryPointError),

    #[error("entry point `{0}` is not available in this host")]
    Unresolved(String),

    #[error("failed to instantiate `{entry_point}`: {source}")]
    Instantiation {
        entry_point: String,
        #[source]
        source: PluginError,
    },

    #[error(transparent)]
    Registration(#[from] RegistryError),
}

/// Result of a successful `activate` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Instantiated and registered now
    Activated,
    /// Already bound in this process at the same version
    AlreadyActive,
    /// Bound at another version; the new one needs a restart
    RestartRequired {
        active: Option<String>,
        requested: Option<String>,
    },
}

#[derive(Debug, Clone)]
struct Binding {
    version: Option<String>,
    entry_point: String,
}

pub struct Activator {
    catalog: Arc<PluginCatalog>,
    registry: Arc<dyn PluginRegistry>,
    routes: Arc<dyn RouteRegistrar>,
    artifact_root: PathBuf,
    descriptor: PathBuf,
    active: DashMap<String, Binding>,
}

impl Activator {
    pub fn new(
        config: &PluginsConfig,
        catalog: Arc<PluginCatalog>,
        registry: Arc<dyn PluginRegistry>,
        routes: Arc<dyn RouteRegistrar>,
    ) -> Self {
        Self {
            catalog,
            registry,
            routes,
            artifact_root: config.artifact_root.clone(),
            descriptor: config.descriptor.clone(),
            active: DashMap::new(),
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    /// Entry point bound for a record in this process
    pub fn bound_entry_point(&self, id: &str) -> Option<String> {
        self.active.get(id).map(|b| b.entry_point.clone())
    }

    pub async fn activate(&self, record: &PluginRecord) -> Result<Activation, ActivationError> {
        if let Some(binding) = self.active.get(&record.id) {
            if binding.version == record.installed_version {
                return Ok(Activation::AlreadyActive);
            }
            tracing::warn!(
                "Plugin {} is bound at {:?}; {:?} takes effect after a restart",
                record.name,
                binding.version,
                record.installed_version
            );
            return Ok(Activation::RestartRequired {
                active: binding.version.clone(),
                requested: record.installed_version.clone(),
            });
        }

        let package = record.package_name();
        let artifact_dir = self.locate_artifact(&package).await.ok_or_else(|| {
            ActivationError::DescriptorNotFound {
                package: package.clone(),
                path: self.artifact_root.join(&package).join(&self.descriptor),
            }
        })?;

        let manifest = load_descriptor(&artifact_dir, &self.descriptor)
            .await
            .map_err(|warning| ActivationError::DescriptorInvalid {
                path: warning.path,
                reason: warning.reason,
            })?;
        let entry_point = manifest.entry_point()?;
        let factory = self
            .catalog
            .resolve(&entry_point)
            .ok_or_else(|| ActivationError::Unresolved(entry_point.to_string()))?;

        let prefix = manifest.route_prefix().map(str::to_string);
        let plugin = factory(PluginContext {
            manifest,
            artifact_dir,
        })
        .await
        .map_err(|source| ActivationError::Instantiation {
            entry_point: entry_point.to_string(),
            source,
        })?;

        // Nothing is mounted or registered unless both sides accept the plugin
        if self.registry.is_registered(plugin.name()) {
            return Err(RegistryError::AlreadyRegistered(plugin.name().to_string()).into());
        }
        if let Some(prefix) = prefix.as_deref() {
            self.routes.register_routes(plugin.clone(), prefix)?;
        }
        if let Err(e) = self.registry.register(plugin) {
            if let Some(prefix) = prefix.as_deref() {
                self.routes.unregister_routes(prefix);
            }
            return Err(e.into());
        }

        self.active.insert(
            record.id.clone(),
            Binding {
                version: record.installed_version.clone(),
                entry_point: entry_point.to_string(),
            },
        );
        tracing::info!(
            "Activated plugin {} ({}) via {}",
            record.name,
            record.id,
            entry_point
        );
        Ok(Activation::Activated)
    }

    /// Artifact directory for a package; installers may normalize the name
    async fn locate_artifact(&self, package: &str) -> Option<PathBuf> {
        let exact = self.artifact_root.join(package);
        if has_descriptor(&exact, &self.descriptor).await {
            return Some(exact);
        }

        let key = annex_types::normalize_package(package);
        let mut entries = tokio::fs::read_dir(&self.artifact_root).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if annex_types::normalize_package(&name.to_string_lossy()) == key
                && has_descriptor(&entry.path(), &self.descriptor).await
            {
                return Some(entry.path());
            }
        }
        None
    }
}

async fn has_descriptor(dir: &Path, descriptor: &Path) -> bool {
    tokio::fs::try_exists(dir.join(descriptor))
        .await
        .unwrap_or(false)
}
