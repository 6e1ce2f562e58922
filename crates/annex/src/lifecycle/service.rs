// Plugin Lifecycle - Record mutations gated by the conflict probe
//
// create and update are two-step: probe the candidate set first, then persist.
// A record only becomes pending after the probe accepts it. Every operation
// runs inside the operation lock so the probe always sees the true accepted
// set.

use std::sync::Arc;

use annex_types::{NewPlugin, PluginRecord, PluginStatus};

use crate::environment::{BuildReport, ConflictProbe, EnvironmentBuilder};
use crate::error::{Error, Result};
use crate::store::PluginStore;

use super::lock::OperationLock;

pub struct PluginLifecycle {
    store: Arc<dyn PluginStore>,
    probe: ConflictProbe,
    builder: EnvironmentBuilder,
    lock: Arc<OperationLock>,
}

impl PluginLifecycle {
    pub fn new(
        store: Arc<dyn PluginStore>,
        probe: ConflictProbe,
        builder: EnvironmentBuilder,
        lock: Arc<OperationLock>,
    ) -> Self {
        Self {
            store,
            probe,
            builder,
            lock,
        }
    }

    pub fn store(&self) -> &Arc<dyn PluginStore> {
        &self.store
    }

    /// Register a new plugin.
    ///
    /// Accepted: persisted as pending. Rejected: persisted as failed with the
    /// probe diagnostic, and `Error::Conflict` is returned.
    pub async fn create(&self, request: NewPlugin) -> Result<PluginRecord> {
        let _guard = self.lock.acquire("create").await?;

        let mut record = PluginRecord::new(request);
        let mut candidates = self.accepted()?;
        candidates.push(record.clone());

        let outcome = self.probe.probe(&candidates).await?;
        if outcome.accepted {
            record.accept()?;
            self.store.insert(&record)?;
            tracing::info!("Plugin {} ({}) accepted, pending build", record.name, record.id);
            return Ok(record);
        }

        let diagnostic = outcome.diagnostic.unwrap_or_default();
        record.reject(diagnostic.clone());
        self.store.insert(&record)?;
        tracing::warn!("Plugin {} ({}) rejected by probe", record.name, record.id);
        Err(Error::Conflict {
            id: record.id,
            diagnostic: record.error_message.unwrap_or(diagnostic),
        })
    }

    /// Request a new version for an existing plugin.
    ///
    /// Accepted: the record becomes pending with the new `updated_version`,
    /// from any state. Rejected: the stored record is left as it was.
    pub async fn update_version(&self, id: &str, version: &str) -> Result<PluginRecord> {
        let _guard = self.lock.acquire("update").await?;

        let current = self.get(id)?;
        let mut candidate = current.clone();
        candidate.request_version(version);
        candidate.accept()?;

        let mut candidates: Vec<PluginRecord> = self
            .accepted()?
            .into_iter()
            .filter(|record| record.id != current.id)
            .collect();
        candidates.push(candidate);

        let outcome = self.probe.probe(&candidates).await?;
        if !outcome.accepted {
            tracing::warn!(
                "Version {} of {} ({}) rejected by probe",
                version,
                current.name,
                current.id
            );
            return Err(Error::Conflict {
                id: current.id,
                diagnostic: outcome.diagnostic.unwrap_or_default(),
            });
        }

        let updated = self.store.set_updated_version(id, version)?;
        tracing::info!(
            "Plugin {} ({}) {} -> pending {}",
            updated.name,
            updated.id,
            current.status,
            version
        );
        Ok(updated)
    }

    /// Remove a record. The built environment is not touched; the next build
    /// simply omits the plugin.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.lock.acquire("delete").await?;

        if !self.store.delete(id)? {
            return Err(Error::NotFound(id.to_string()));
        }
        tracing::info!("Plugin {} deleted", id);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<PluginRecord> {
        self.store
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<PluginRecord>> {
        Ok(self.store.list_all()?)
    }

    /// Rebuild the bundled environment from the accepted set
    pub async fn build(&self) -> Result<BuildReport> {
        let _guard = self.lock.acquire("build").await?;

        let accepted = self.accepted()?;
        let report = self.builder.build(&accepted).await?;
        tracing::info!(
            "Build complete: {} plugin dependencies in {}",
            report.plugins.len(),
            report.target.display()
        );
        Ok(report)
    }

    /// Records whose dependencies belong in the bundle
    fn accepted(&self) -> Result<Vec<PluginRecord>> {
        Ok(self
            .store
            .list_all()?
            .into_iter()
            .filter(PluginRecord::is_accepted)
            .collect())
    }
}

/// Count of records per status, for listings and logs
pub fn status_counts(records: &[PluginRecord]) -> [(PluginStatus, usize); 4] {
    [
        PluginStatus::Uninstalled,
        PluginStatus::Pending,
        PluginStatus::Installed,
        PluginStatus::Failed,
    ]
    .map(|status| (status, records.iter().filter(|r| r.status == status).count()))
}
