// Host Plugin - The capability interface every plugin implements
//
// Lifecycle hooks plus route registration. The host never looks a plugin up by
// name outside the Activator; everything else sees `Arc<dyn HostPlugin>`.

use std::path::PathBuf;
use std::sync::Arc;

use annex_types::PluginManifest;
use async_trait::async_trait;
use axum::Router;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("invalid plugin configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Failed(String),
}

/// Handed to a plugin constructor
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub manifest: PluginManifest,
    /// Installed artifact directory
    pub artifact_dir: PathBuf,
}

#[async_trait]
pub trait HostPlugin: Send + Sync + 'static {
    /// Registry key; unique within a process
    fn name(&self) -> &str;

    /// Routes mounted under the manifest's `url_prefix`
    fn routes(self: Arc<Self>) -> Router {
        Router::new()
    }

    /// Called once the server is about to accept requests
    async fn on_start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called during graceful shutdown. Errors are logged, never fatal.
    async fn on_stop(&self) -> Result<(), PluginError> {
        Ok(())
    }
}
