//! Server Application State
//!
//! Shared by all HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::lifecycle::PluginLifecycle;
use crate::plugin::ServicePluginRegistry;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    lifecycle: Arc<PluginLifecycle>,
    registry: Arc<ServicePluginRegistry>,
    /// Suggested client backoff on lock contention
    retry_after: Duration,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        lifecycle: Arc<PluginLifecycle>,
        registry: Arc<ServicePluginRegistry>,
        retry_after: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                lifecycle,
                registry,
                retry_after,
                started_at: Utc::now(),
            }),
        }
    }

    pub fn lifecycle(&self) -> &PluginLifecycle {
        &self.inner.lifecycle
    }

    pub fn registry(&self) -> &ServicePluginRegistry {
        &self.inner.registry
    }

    pub fn retry_after(&self) -> Duration {
        self.inner.retry_after
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
