//! Plugin Lifecycle
//!
//! Record mutations ([`PluginLifecycle`]), startup reconciliation
//! ([`LifecycleOrchestrator`]) and the [`OperationLock`] they share.

mod lock;
mod orchestrator;
mod service;

pub use lock::{LockContention, OperationGuard, OperationLock};
pub use orchestrator::{LifecycleOrchestrator, ReconcileReport};
pub use service::{PluginLifecycle, status_counts};
