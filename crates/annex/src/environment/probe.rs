// Conflict Probe - Tentative resolution of a candidate plugin set
//
// Builds the merged manifest in a throwaway scratch directory and asks the
// resolver for a plan only. Never mutates records; the caller decides what to
// persist from the outcome.

use std::sync::Arc;
use std::time::Duration;

use annex_types::PluginRecord;

use crate::config::{AnnexConfig, ManifestLayout, ServiceConfig};

use super::link::{LinkError, ServiceTree};
use super::manifest::ManifestError;
use super::resolver::{ResolveMode, Resolver, resolve_with_timeout, truncate_diagnostic};

/// Infrastructure failures; a resolver rejection is a [`ProbeOutcome`], not an error
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("failed to prepare probe scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub accepted: bool,
    /// Bounded resolver output when rejected
    pub diagnostic: Option<String>,
}

impl ProbeOutcome {
    fn accepted() -> Self {
        Self {
            accepted: true,
            diagnostic: None,
        }
    }

    fn rejected(diagnostic: &str, max_len: usize) -> Self {
        Self {
            accepted: false,
            diagnostic: Some(truncate_diagnostic(diagnostic, max_len)),
        }
    }
}

pub struct ConflictProbe {
    service: ServiceConfig,
    layout: ManifestLayout,
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
    max_diagnostic_len: usize,
}

impl ConflictProbe {
    pub fn new(config: &AnnexConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            service: config.service.clone(),
            layout: config.manifest.clone(),
            resolver,
            timeout: config.resolver.timeout(),
            max_diagnostic_len: config.resolver.max_diagnostic_len,
        }
    }

    /// Probe the service's dependencies plus `candidates`
    pub async fn probe(&self, candidates: &[PluginRecord]) -> Result<ProbeOutcome, ProbeError> {
        let tree = ServiceTree::locate(&self.service)?;
        let merged = tree.load_manifest()?.merge(
            candidates,
            &self.layout,
            &self.service.bundled_suffix,
        )?;

        let scratch = tempfile::Builder::new()
            .prefix("annex-probe-")
            .tempdir()
            .map_err(ProbeError::Scratch)?;
        tree.link_into(scratch.path())?;
        let manifest_path = scratch.path().join(tree.manifest_name());
        merged.write(&manifest_path).await?;

        tracing::debug!(
            "Probing {} plugin dependencies in {}",
            merged.plugins.len(),
            scratch.path().display()
        );

        let outcome = match resolve_with_timeout(
            self.resolver.as_ref(),
            &manifest_path,
            ResolveMode::PlanOnly,
            scratch.path(),
            self.timeout,
        )
        .await
        {
            Ok(output) if output.success => ProbeOutcome::accepted(),
            Ok(output) => ProbeOutcome::rejected(&output.diagnostic, self.max_diagnostic_len),
            // Timeouts and spawn failures count as a rejection
            Err(err) => ProbeOutcome::rejected(
                &format!("dependency probe failed: {err}"),
                self.max_diagnostic_len,
            ),
        };

        if outcome.accepted {
            tracing::info!("Probe accepted {} plugin(s)", candidates.len());
        } else {
            tracing::warn!(
                "Probe rejected {} plugin(s): {}",
                candidates.len(),
                outcome.diagnostic.as_deref().unwrap_or_default()
            );
        }
        Ok(outcome)
    }
}
