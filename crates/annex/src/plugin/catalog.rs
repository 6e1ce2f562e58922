// Plugin Catalog - Entry point string -> constructor
//
// Built once at startup and frozen. This is the only place an entry-point
// string turns into an implementation; an entry point missing here is an
// activation error, not a panic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use annex_types::{EntryPoint, EntryPointError};
use futures::future::BoxFuture;

use super::host::{HostPlugin, PluginContext, PluginError};

pub type PluginFactory = Arc<
    dyn Fn(PluginContext) -> BoxFuture<'static, Result<Arc<dyn HostPlugin>, PluginError>>
        + Send
        + Sync,
>;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    InvalidEntryPoint(#[from] EntryPointError),

    #[error("entry point `{0}` registered twice")]
    Duplicate(String),
}

/// Frozen table of known plugin constructors
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: HashMap<String, PluginFactory>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("entry_points", &self.entry_points())
            .finish()
    }
}

impl PluginCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn resolve(&self, entry_point: &EntryPoint) -> Option<PluginFactory> {
        self.factories.get(entry_point.as_str()).cloned()
    }

    /// Registered entry points, sorted
    pub fn entry_points(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[derive(Default)]
pub struct CatalogBuilder {
    factories: HashMap<String, PluginFactory>,
    errors: Vec<CatalogError>,
}

impl CatalogBuilder {
    /// Register a synchronous constructor
    pub fn register<P, F>(self, entry_point: &str, constructor: F) -> Self
    where
        P: HostPlugin,
        F: Fn(&PluginContext) -> Result<P, PluginError> + Send + Sync + 'static,
    {
        let factory: PluginFactory = Arc::new(move |ctx: PluginContext| {
            let result = constructor(&ctx).map(|plugin| Arc::new(plugin) as Arc<dyn HostPlugin>);
            Box::pin(futures::future::ready(result)) as BoxFuture<'static, _>
        });
        self.insert(entry_point, factory)
    }

    /// Register an async constructor
    pub fn register_async<F, Fut>(self, entry_point: &str, constructor: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn HostPlugin>, PluginError>> + Send + 'static,
    {
        let factory: PluginFactory =
            Arc::new(move |ctx: PluginContext| Box::pin(constructor(ctx)) as BoxFuture<'static, _>);
        self.insert(entry_point, factory)
    }

    fn insert(mut self, entry_point: &str, factory: PluginFactory) -> Self {
        match entry_point.parse::<EntryPoint>() {
            Ok(parsed) => {
                let key = parsed.as_str().to_string();
                if self.factories.contains_key(&key) {
                    self.errors.push(CatalogError::Duplicate(key));
                } else {
                    self.factories.insert(key, factory);
                }
            }
            Err(e) => self.errors.push(e.into()),
        }
        self
    }

    /// Freeze the catalog; fails on the first invalid or duplicate registration
    pub fn build(self) -> Result<PluginCatalog, CatalogError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        Ok(PluginCatalog {
            factories: self.factories,
        })
    }
}
