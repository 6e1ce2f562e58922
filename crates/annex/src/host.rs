// Host assembly - wires config, store, resolver and catalog into one value

use std::sync::Arc;

use crate::config::AnnexConfig;
use crate::environment::{ConflictProbe, EnvironmentBuilder, Resolver};
use crate::lifecycle::{LifecycleOrchestrator, OperationLock, PluginLifecycle};
use crate::plugin::{Activator, PluginCatalog, RouteTable, ServicePluginRegistry};
use crate::store::PluginStore;

/// Everything a running host needs, sharing one operation lock
pub struct AnnexHost {
    pub lifecycle: Arc<PluginLifecycle>,
    pub orchestrator: LifecycleOrchestrator,
    pub registry: Arc<ServicePluginRegistry>,
    pub routes: Arc<RouteTable>,
}

impl AnnexHost {
    pub fn new(
        config: &AnnexConfig,
        store: Arc<dyn PluginStore>,
        resolver: Arc<dyn Resolver>,
        catalog: PluginCatalog,
    ) -> Self {
        let lock = Arc::new(OperationLock::new(config.lock.wait()));
        let registry = Arc::new(ServicePluginRegistry::new());
        let routes = Arc::new(RouteTable::new());

        let lifecycle = Arc::new(PluginLifecycle::new(
            store.clone(),
            ConflictProbe::new(config, resolver.clone()),
            EnvironmentBuilder::new(config, resolver),
            lock.clone(),
        ));
        let activator = Arc::new(Activator::new(
            &config.plugins,
            Arc::new(catalog),
            registry.clone(),
            routes.clone(),
        ));
        let orchestrator = LifecycleOrchestrator::new(&config.plugins, store, activator, lock);

        Self {
            lifecycle,
            orchestrator,
            registry,
            routes,
        }
    }
}
