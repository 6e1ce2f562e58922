//! Plugin Hosting
//!
//! Plugins implement [`HostPlugin`]. The [`PluginCatalog`] maps fully
//! qualified entry points to constructors and is the only place an
//! entry-point string becomes an implementation. The [`Activator`] binds
//! installed records to catalog entries and hands the instances to the
//! registry and route table.

mod activator;
mod catalog;
mod host;
mod registry;

pub use activator::{Activation, ActivationError, Activator};
pub use catalog::{CatalogBuilder, CatalogError, PluginCatalog, PluginFactory};
pub use host::{HostPlugin, PluginContext, PluginError};
pub use registry::{
    PluginRegistry, RegistryError, RouteRegistrar, RouteTable, ServicePluginRegistry,
};
