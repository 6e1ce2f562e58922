// Plugin Registry & Route Table - Where activated plugins end up
//
// Both are process-wide and append-only: once a plugin is registered it stays
// registered until the process exits.

use std::sync::Arc;

use axum::Router;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::host::{HostPlugin, PluginError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{0}' already registered")]
    AlreadyRegistered(String),

    #[error("route prefix '/{0}' already in use")]
    PrefixInUse(String),

    #[error("route prefix must not be empty")]
    EmptyPrefix,

    #[error("plugin '{name}' failed to start: {source}")]
    Start {
        name: String,
        #[source]
        source: PluginError,
    },
}

/// Receives activated plugins
pub trait PluginRegistry: Send + Sync {
    fn register(&self, plugin: Arc<dyn HostPlugin>) -> Result<(), RegistryError>;

    fn is_registered(&self, name: &str) -> bool;
}

/// Mounts a plugin's routes under a prefix
pub trait RouteRegistrar: Send + Sync {
    fn register_routes(&self, plugin: Arc<dyn HostPlugin>, prefix: &str)
    -> Result<(), RegistryError>;

    /// Drop the routes mounted at `prefix`, if any
    fn unregister_routes(&self, prefix: &str);
}

// ─────────────────────────────────────────────────────────────────────────────
// Service registry
// ─────────────────────────────────────────────────────────────────────────────

/// Registered plugins, started and stopped with the server
#[derive(Default)]
pub struct ServicePluginRegistry {
    plugins: DashMap<String, Arc<dyn HostPlugin>>,
}

impl ServicePluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HostPlugin>> {
        self.plugins.get(name).map(|entry| entry.value().clone())
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn HostPlugin>> {
        self.plugins.iter().map(|e| e.value().clone()).collect()
    }

    /// Start every plugin; a failing plugin is logged and skipped
    pub async fn start_all(&self) -> Vec<RegistryError> {
        let mut errors = Vec::new();
        for plugin in self.snapshot() {
            match plugin.on_start().await {
                Ok(()) => tracing::info!("Started plugin: {}", plugin.name()),
                Err(source) => {
                    let err = RegistryError::Start {
                        name: plugin.name().to_string(),
                        source,
                    };
                    tracing::error!("{}", err);
                    errors.push(err);
                }
            }
        }
        errors
    }

    pub async fn stop_all(&self) {
        for plugin in self.snapshot() {
            if let Err(e) = plugin.on_stop().await {
                tracing::warn!("Error stopping plugin '{}': {}", plugin.name(), e);
            }
        }
    }
}

impl PluginRegistry for ServicePluginRegistry {
    fn register(&self, plugin: Arc<dyn HostPlugin>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        match self.plugins.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RegistryError::AlreadyRegistered(name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(plugin);
                tracing::info!("Registered plugin: {}", name);
                Ok(())
            }
        }
    }

    fn is_registered(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Route table
// ─────────────────────────────────────────────────────────────────────────────

/// Plugin routers keyed by prefix, merged into the server router at startup
#[derive(Default)]
pub struct RouteTable {
    routes: Mutex<Vec<(String, Router)>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.routes.lock().iter().map(|(p, _)| p.clone()).collect()
    }

    /// All plugin routers nested under `/<prefix>`
    pub fn router(&self) -> Router {
        self.routes
            .lock()
            .iter()
            .fold(Router::new(), |app, (prefix, routes)| {
                app.nest(&format!("/{prefix}"), routes.clone())
            })
    }
}

impl RouteRegistrar for RouteTable {
    fn register_routes(
        &self,
        plugin: Arc<dyn HostPlugin>,
        prefix: &str,
    ) -> Result<(), RegistryError> {
        let prefix = prefix.trim_matches('/').to_string();
        if prefix.is_empty() {
            return Err(RegistryError::EmptyPrefix);
        }
        let mut routes = self.routes.lock();
        if routes.iter().any(|(existing, _)| *existing == prefix) {
            return Err(RegistryError::PrefixInUse(prefix));
        }
        let name = plugin.name().to_string();
        routes.push((prefix.clone(), plugin.routes()));
        tracing::info!("Mounted routes for {} at /{}", name, prefix);
        Ok(())
    }

    fn unregister_routes(&self, prefix: &str) {
        let prefix = prefix.trim_matches('/');
        let mut routes = self.routes.lock();
        let before = routes.len();
        routes.retain(|(existing, _)| existing != prefix);
        if routes.len() < before {
            tracing::info!("Unmounted routes at /{}", prefix);
        }
    }
}
