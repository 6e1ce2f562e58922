// Plugin Records - Persisted plugin descriptors and their lifecycle state
//
// A record is created by the CRUD surface after a conflict probe, mutated by
// the lifecycle orchestrator (promotion, activation failure) and removed by an
// explicit delete. Every mutation goes through the transition methods below so
// the status/version/error invariants hold no matter which store is used.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Where a plugin's code is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Package-registry coordinate (default index)
    Registry,
    /// Version-control URL, resolved through a source override
    Vcs,
}

/// Lifecycle state of a plugin record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Artifact found on disk, or record never part of a successful build
    Uninstalled,
    /// Accepted by the conflict probe, waiting for the next build + restart
    Pending,
    /// Active in the last successful build and registered with the host
    Installed,
    /// The last attempted transition errored (see `error_message`)
    Failed,
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Uninstalled => "uninstalled",
            Self::Pending => "pending",
            Self::Installed => "installed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// A record mutation that would break the lifecycle invariants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move plugin {id} from {from} to {to}")]
    Illegal {
        id: String,
        from: PluginStatus,
        to: PluginStatus,
    },

    #[error("plugin {id} is {status} but has no version")]
    MissingVersion { id: String, status: PluginStatus },

    #[error("plugin {id}: an error message is required exactly when the status is failed")]
    ErrorMessageMismatch { id: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Request to register a new plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPlugin {
    /// Display label
    pub name: String,
    /// Registry coordinate or VCS URL
    pub source: String,
    pub source_type: SourceType,
    /// Requested version (registry version or VCS branch)
    pub version: String,
    /// Distribution name when it differs from the source
    #[serde(default)]
    pub package_name: Option<String>,
}

/// One registered plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRecord {
    pub id: String,
    pub name: String,
    pub source: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub package_name: Option<String>,
    #[serde(default)]
    pub installed_version: Option<String>,
    #[serde(default)]
    pub updated_version: Option<String>,
    pub status: PluginStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PluginRecord {
    /// Create an uninstalled record for a create request; the caller decides
    /// whether it becomes pending or failed after probing.
    pub fn new(request: NewPlugin) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            source: request.source,
            source_type: request.source_type,
            package_name: request.package_name,
            installed_version: None,
            updated_version: Some(request.version),
            status: PluginStatus::Uninstalled,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create an uninstalled record for an artifact found on disk with no
    /// matching record.
    pub fn discovered(name: impl Into<String>, package: impl Into<String>) -> Self {
        let package = package.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            source: package.clone(),
            source_type: SourceType::Registry,
            package_name: Some(package),
            installed_version: None,
            updated_version: None,
            status: PluginStatus::Uninstalled,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Name of the installed distribution, which is also the artifact
    /// directory name the resolver installs it under.
    pub fn package_name(&self) -> String {
        if let Some(package) = self.package_name.as_ref() {
            return package.clone();
        }

        match self.source_type {
            SourceType::Registry => self.source.clone(),
            SourceType::Vcs => repo_slug(&self.source),
        }
    }

    /// Version the next build should use for this record
    pub fn target_version(&self) -> Option<&str> {
        self.updated_version
            .as_deref()
            .or(self.installed_version.as_deref())
    }

    /// Whether the record belongs in the accepted dependency set.
    ///
    /// Pending and installed records passed a probe. A failed record that
    /// still has an installed version failed at activation, not at probing,
    /// so its dependencies stay in the bundle.
    pub fn is_accepted(&self) -> bool {
        match self.status {
            PluginStatus::Pending | PluginStatus::Installed => true,
            PluginStatus::Failed => self.installed_version.is_some(),
            PluginStatus::Uninstalled => false,
        }
    }

    /// Request a new version; the record keeps its status until re-probed.
    pub fn request_version(&mut self, version: impl Into<String>) {
        self.updated_version = Some(version.into());
        self.touch();
    }

    /// Probe accepted the record: any state → pending
    pub fn accept(&mut self) -> Result<(), TransitionError> {
        if self.updated_version.is_none() {
            return Err(TransitionError::MissingVersion {
                id: self.id.clone(),
                status: PluginStatus::Pending,
            });
        }
        self.status = PluginStatus::Pending;
        self.error_message = None;
        self.touch();
        Ok(())
    }

    /// Probe rejected the record: it is persisted as failed with the diagnostic
    pub fn reject(&mut self, diagnostic: impl Into<String>) {
        self.status = PluginStatus::Failed;
        self.error_message = Some(non_empty(diagnostic.into()));
        self.touch();
    }

    /// Pending → installed after a successful build
    pub fn promote(&mut self) -> Result<(), TransitionError> {
        if self.status != PluginStatus::Pending {
            return Err(TransitionError::Illegal {
                id: self.id.clone(),
                from: self.status,
                to: PluginStatus::Installed,
            });
        }
        if let Some(version) = self.updated_version.take() {
            self.installed_version = Some(version);
        }
        if self.installed_version.is_none() {
            return Err(TransitionError::MissingVersion {
                id: self.id.clone(),
                status: PluginStatus::Installed,
            });
        }
        self.status = PluginStatus::Installed;
        self.touch();
        Ok(())
    }

    /// Installed → failed when activation fails; the installed version is
    /// kept for diagnostics.
    pub fn fail_activation(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        if self.status != PluginStatus::Installed {
            return Err(TransitionError::Illegal {
                id: self.id.clone(),
                from: self.status,
                to: PluginStatus::Failed,
            });
        }
        self.status = PluginStatus::Failed;
        self.error_message = Some(non_empty(error.into()));
        self.touch();
        Ok(())
    }

    /// Generic status write used by stores; validates the invariants after
    /// the write and leaves the record untouched on error.
    pub fn set_status(
        &mut self,
        status: PluginStatus,
        error_message: Option<String>,
    ) -> Result<(), TransitionError> {
        let mut next = self.clone();
        next.status = status;
        next.error_message = error_message;
        next.validate()?;
        *self = next;
        self.touch();
        Ok(())
    }

    /// Check the status/version/error invariants
    pub fn validate(&self) -> Result<(), TransitionError> {
        let failed = self.status == PluginStatus::Failed;
        let has_error = self
            .error_message
            .as_ref()
            .is_some_and(|message| !message.trim().is_empty());
        if failed != has_error {
            return Err(TransitionError::ErrorMessageMismatch {
                id: self.id.clone(),
            });
        }

        let needs_version = matches!(
            self.status,
            PluginStatus::Pending | PluginStatus::Installed
        );
        if needs_version && self.installed_version.is_none() && self.updated_version.is_none() {
            return Err(TransitionError::MissingVersion {
                id: self.id.clone(),
                status: self.status,
            });
        }

        Ok(())
    }

    /// Bump the modification timestamp
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Derive a package name from a repository URL (last path segment without `.git`)
pub fn repo_slug(repo: &str) -> String {
    let trimmed = repo.trim_end_matches('/').trim_end_matches(".git");
    trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("plugin")
        .to_string()
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "unknown error".to_string()
    } else {
        message
    }
}
