// Lifecycle Orchestrator - Startup reconciliation
//
// 1. discovery sync: artifacts with no record get an uninstalled record
// 2. promotion: pending -> installed (the bundle we booted into has them)
// 3. activation: every installed record is bound through the Activator
//
// Each step tolerates being re-applied to consistent state, so running it
// twice changes nothing the second time. Activation failures are isolated per
// record.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use annex_types::{PluginRecord, PluginStatus, normalize_package};

use crate::config::PluginsConfig;
use crate::discovery::{Discovery, DiscoveryWarning, discover};
use crate::error::Result;
use crate::plugin::{Activation, Activator};
use crate::store::PluginStore;

use super::lock::OperationLock;

/// What one reconciliation pass did, by record id
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub discovered: Vec<String>,
    pub promoted: Vec<String>,
    pub activated: Vec<String>,
    pub already_active: Vec<String>,
    pub restart_required: Vec<String>,
    /// (id, error message)
    pub failed: Vec<(String, String)>,
    pub warnings: Vec<DiscoveryWarning>,
}

impl ReconcileReport {
    /// Persisted state transitions made by this pass
    pub fn transitions(&self) -> usize {
        self.discovered.len() + self.promoted.len() + self.failed.len()
    }
}

pub struct LifecycleOrchestrator {
    store: Arc<dyn PluginStore>,
    activator: Arc<Activator>,
    lock: Arc<OperationLock>,
    artifact_root: PathBuf,
    descriptor: PathBuf,
}

impl LifecycleOrchestrator {
    pub fn new(
        config: &PluginsConfig,
        store: Arc<dyn PluginStore>,
        activator: Arc<Activator>,
        lock: Arc<OperationLock>,
    ) -> Self {
        Self {
            store,
            activator,
            lock,
            artifact_root: config.artifact_root.clone(),
            descriptor: config.descriptor.clone(),
        }
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.lock.acquire("reconcile").await?;
        let mut report = ReconcileReport::default();

        let discovery = match discover(&self.artifact_root, &self.descriptor).await {
            Ok(discovery) => discovery,
            Err(e) => {
                tracing::warn!(
                    "Failed to scan plugin artifacts in {}: {}",
                    self.artifact_root.display(),
                    e
                );
                Discovery::default()
            }
        };
        report.warnings = discovery.warnings.clone();
        self.sync_discovered(&discovery, &mut report)?;
        self.promote_pending(&mut report)?;
        self.activate_installed(&mut report).await?;

        tracing::info!(
            "Reconciled plugins: {} discovered, {} promoted, {} activated, {} already active, {} failed",
            report.discovered.len(),
            report.promoted.len(),
            report.activated.len(),
            report.already_active.len(),
            report.failed.len()
        );
        Ok(report)
    }

    fn sync_discovered(&self, discovery: &Discovery, report: &mut ReconcileReport) -> Result<()> {
        let known: HashSet<String> = self
            .store
            .list_all()?
            .iter()
            .map(|record| normalize_package(&record.package_name()))
            .collect();

        for artifact in &discovery.artifacts {
            if known.contains(&normalize_package(&artifact.dir_name)) {
                continue;
            }
            let record = PluginRecord::discovered(&artifact.manifest.name, &artifact.dir_name);
            self.store.insert(&record)?;
            tracing::info!(
                "Found unregistered plugin {} at {}, recorded as uninstalled",
                artifact.manifest.name,
                artifact.path.display()
            );
            report.discovered.push(record.id);
        }
        Ok(())
    }

    fn promote_pending(&self, report: &mut ReconcileReport) -> Result<()> {
        for record in self.store.list_all()? {
            if record.status != PluginStatus::Pending {
                continue;
            }
            match self.store.promote_version(&record.id) {
                Ok(promoted) => {
                    tracing::info!(
                        "Promoted {} ({}) to installed {}",
                        promoted.name,
                        promoted.id,
                        promoted.installed_version.as_deref().unwrap_or_default()
                    );
                    report.promoted.push(promoted.id);
                }
                Err(e) => tracing::warn!("Failed to promote {} ({}): {}", record.name, record.id, e),
            }
        }
        Ok(())
    }

    async fn activate_installed(&self, report: &mut ReconcileReport) -> Result<()> {
        for record in self.store.list_all()? {
            if record.status != PluginStatus::Installed {
                continue;
            }
            match self.activator.activate(&record).await {
                Ok(Activation::Activated) => report.activated.push(record.id),
                Ok(Activation::AlreadyActive) => report.already_active.push(record.id),
                Ok(Activation::RestartRequired { .. }) => report.restart_required.push(record.id),
                Err(e) => {
                    let message = e.to_string();
                    tracing::error!(
                        "Activation of {} ({}) failed: {}",
                        record.name,
                        record.id,
                        message
                    );
                    if let Err(store_err) = self.store.update_status(
                        &record.id,
                        PluginStatus::Failed,
                        Some(message.clone()),
                    ) {
                        tracing::warn!("Failed to record activation failure: {}", store_err);
                    }
                    report.failed.push((record.id, message));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{HostPlugin, PluginCatalog, RouteTable, ServicePluginRegistry};
    use crate::store::MemoryStore;
    use annex_types::{NewPlugin, SourceType};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Lights;

    impl HostPlugin for Lights {
        fn name(&self) -> &str {
            "lights"
        }
    }

    struct Fixture {
        _artifacts: TempDir,
        store: Arc<MemoryStore>,
        registry: Arc<ServicePluginRegistry>,
        orchestrator: LifecycleOrchestrator,
    }

    fn fixture() -> Fixture {
        let artifacts = TempDir::new().unwrap();
        let descriptor = |dir: &str, entry_point: &str| {
            let path = artifacts.path().join(dir);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(
                path.join("annex.json"),
                format!(r#"{{"name": "{dir}", "version": "1.0.0", "entry_point": "{entry_point}"}}"#),
            )
            .unwrap();
        };
        descriptor("lights", "lights::Lights");
        descriptor("orphan", "orphan::Orphan");
        descriptor("ghost", "ghost::Ghost");

        let config = PluginsConfig {
            artifact_root: artifacts.path().to_path_buf(),
            descriptor: PathBuf::from("annex.json"),
        };
        let catalog = PluginCatalog::builder()
            .register("lights::Lights", |_| Ok(Lights))
            .build()
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ServicePluginRegistry::new());
        let activator = Arc::new(Activator::new(
            &config,
            Arc::new(catalog),
            registry.clone(),
            Arc::new(RouteTable::new()),
        ));
        let orchestrator = LifecycleOrchestrator::new(
            &config,
            store.clone(),
            activator,
            Arc::new(OperationLock::new(Duration::from_secs(1))),
        );
        Fixture {
            _artifacts: artifacts,
            store,
            registry,
            orchestrator,
        }
    }

    fn pending(source: &str) -> PluginRecord {
        let mut record = PluginRecord::new(NewPlugin {
            name: source.to_string(),
            source: source.to_string(),
            source_type: SourceType::Registry,
            version: "1.0.0".to_string(),
            package_name: None,
        });
        record.accept().unwrap();
        record
    }

    #[tokio::test]
    async fn test_reconcile_pass() {
        let fx = fixture();
        let lights = pending("lights");
        let ghost = pending("ghost");
        fx.store.insert(&lights).unwrap();
        fx.store.insert(&ghost).unwrap();

        let report = fx.orchestrator.reconcile().await.unwrap();

        // orphan has an artifact but no record
        assert_eq!(report.discovered.len(), 1);
        let orphan = fx.store.get(&report.discovered[0]).unwrap().unwrap();
        assert_eq!(orphan.status, PluginStatus::Uninstalled);
        assert_eq!(orphan.package_name(), "orphan");

        assert_eq!(report.promoted.len(), 2);
        assert_eq!(report.activated, vec![lights.id.clone()]);

        let lights = fx.store.get(&lights.id).unwrap().unwrap();
        assert_eq!(lights.status, PluginStatus::Installed);
        assert_eq!(lights.installed_version.as_deref(), Some("1.0.0"));
        assert!(lights.updated_version.is_none());

        // The unresolvable plugin failed without blocking the other
        let ghost = fx.store.get(&ghost.id).unwrap().unwrap();
        assert_eq!(ghost.status, PluginStatus::Failed);
        assert!(!ghost.error_message.unwrap().is_empty());
        assert_eq!(ghost.installed_version.as_deref(), Some("1.0.0"));
        assert_eq!(fx.registry.names(), vec!["lights"]);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let fx = fixture();
        fx.store.insert(&pending("lights")).unwrap();
        fx.store.insert(&pending("ghost")).unwrap();

        let first = fx.orchestrator.reconcile().await.unwrap();
        assert!(first.transitions() > 0);
        let snapshot = fx.store.list_all().unwrap();

        let second = fx.orchestrator.reconcile().await.unwrap();
        assert_eq!(second.transitions(), 0);
        assert!(second.activated.is_empty());
        assert_eq!(second.already_active.len(), 1);
        assert_eq!(fx.store.list_all().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_missing_artifact_root_is_not_fatal() {
        let fx = fixture();
        let config = PluginsConfig {
            artifact_root: PathBuf::from("/nonexistent/annex/plugins"),
            descriptor: PathBuf::from("annex.json"),
        };
        let orchestrator = LifecycleOrchestrator::new(
            &config,
            fx.store.clone(),
            Arc::new(Activator::new(
                &config,
                Arc::new(PluginCatalog::default()),
                Arc::new(ServicePluginRegistry::new()),
                Arc::new(RouteTable::new()),
            )),
            Arc::new(OperationLock::new(Duration::from_secs(1))),
        );
        let report = orchestrator.reconcile().await.unwrap();
        assert_eq!(report.transitions(), 0);
    }
}
