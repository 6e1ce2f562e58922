//! Plugin Record Store
//!
//! Durable table of plugin records. The lifecycle core only needs the
//! operations on [`PluginStore`]; any backend that upholds the record
//! invariants qualifies.

mod database;
mod memory;

pub use database::RedbStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use annex_types::{PluginRecord, PluginStatus, TransitionError};

/// Errors raised by a record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("plugin not found: {0}")]
    NotFound(String),

    #[error("plugin already exists: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Invalid(#[from] TransitionError),

    #[error("failed to encode plugin record: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Another process (usually a running server) holds the database
    #[error("plugin store {} is in use by another annex process; stop the server first or retry", .0.display())]
    InUse(PathBuf),

    #[error("database error: {0}")]
    Database(String),
}

/// Operations the lifecycle core consumes
pub trait PluginStore: Send + Sync {
    /// Persist a new record; fails if the id already exists
    fn insert(&self, record: &PluginRecord) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<Option<PluginRecord>, StoreError>;

    /// All records ordered by creation time
    fn list_all(&self) -> Result<Vec<PluginRecord>, StoreError>;

    /// Write a status (and error message for `Failed`)
    fn update_status(
        &self,
        id: &str,
        status: PluginStatus,
        error_message: Option<String>,
    ) -> Result<PluginRecord, StoreError>;

    /// Pending → installed, moving `updated_version` into `installed_version`
    fn promote_version(&self, id: &str) -> Result<PluginRecord, StoreError>;

    /// Replace the requested version and mark the record pending
    fn set_updated_version(&self, id: &str, version: &str) -> Result<PluginRecord, StoreError>;

    /// Remove a record; returns whether it existed
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Apply the shared mutation rules; both backends call this inside their
/// write section so validation cannot diverge.
pub(crate) fn apply_status(
    record: &mut PluginRecord,
    status: PluginStatus,
    error_message: Option<String>,
) -> Result<(), StoreError> {
    if record.status == PluginStatus::Installed && status == PluginStatus::Failed {
        if let Some(message) = error_message {
            record.fail_activation(message)?;
            return Ok(());
        }
    }
    record.set_status(status, error_message)?;
    Ok(())
}

pub(crate) fn apply_updated_version(
    record: &mut PluginRecord,
    version: &str,
) -> Result<(), StoreError> {
    record.request_version(version);
    record.accept()?;
    Ok(())
}

pub(crate) fn sort_records(records: &mut [PluginRecord]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
