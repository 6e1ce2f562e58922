//! Built-in plugins
//!
//! Entry points compiled into the `annex` binary. Embedding hosts build their
//! own catalog and may start from [`catalog_builder`].

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::plugin::{CatalogBuilder, CatalogError, HostPlugin, PluginCatalog, PluginContext, PluginError};

pub const STATUS_ENTRY_POINT: &str = "annex::builtin::StatusPlugin";

/// Reports its own name, version and start time at the root of its prefix
pub struct StatusPlugin {
    name: String,
    version: String,
    started_at: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

#[derive(Serialize)]
struct StatusResponse {
    plugin: String,
    version: String,
    started_at: Option<String>,
}

impl StatusPlugin {
    pub fn new(ctx: &PluginContext) -> Result<Self, PluginError> {
        if ctx.manifest.name.trim().is_empty() {
            return Err(PluginError::Config("descriptor has an empty name".to_string()));
        }
        Ok(Self {
            name: ctx.manifest.name.clone(),
            version: ctx.manifest.version.clone(),
            started_at: parking_lot::Mutex::new(None),
        })
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            plugin: self.name.clone(),
            version: self.version.clone(),
            started_at: self.started_at.lock().as_ref().map(DateTime::to_rfc3339),
        }
    }
}

#[async_trait::async_trait]
impl HostPlugin for StatusPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn routes(self: Arc<Self>) -> Router {
        Router::new().route("/", get(move || async move { Json(self.status()) }))
    }

    async fn on_start(&self) -> Result<(), PluginError> {
        *self.started_at.lock() = Some(Utc::now());
        tracing::info!("Status plugin {} started", self.name);
        Ok(())
    }
}

/// Builder preloaded with every built-in entry point
pub fn catalog_builder() -> CatalogBuilder {
    PluginCatalog::builder().register(STATUS_ENTRY_POINT, StatusPlugin::new)
}

pub fn catalog() -> Result<PluginCatalog, CatalogError> {
    catalog_builder().build()
}
