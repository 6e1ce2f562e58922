// In-memory record store for tests and embedding hosts that bring their own persistence

use std::collections::HashMap;

use annex_types::{PluginRecord, PluginStatus};
use parking_lot::RwLock;

use super::{PluginStore, StoreError, apply_status, apply_updated_version, sort_records};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, PluginRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<PluginRecord, StoreError>
    where
        F: FnOnce(&mut PluginRecord) -> Result<(), StoreError>,
    {
        let mut records = self.records.write();
        let existing = records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        // Mutate a copy so a failed transition leaves the stored record intact
        let mut record = existing.clone();
        f(&mut record)?;
        records.insert(id.to_string(), record.clone());
        Ok(record)
    }
}

impl PluginStore for MemoryStore {
    fn insert(&self, record: &PluginRecord) -> Result<(), StoreError> {
        record.validate()?;
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<PluginRecord>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn list_all(&self) -> Result<Vec<PluginRecord>, StoreError> {
        let mut records: Vec<PluginRecord> = self.records.read().values().cloned().collect();
        sort_records(&mut records);
        Ok(records)
    }

    fn update_status(
        &self,
        id: &str,
        status: PluginStatus,
        error_message: Option<String>,
    ) -> Result<PluginRecord, StoreError> {
        self.modify(id, |record| apply_status(record, status, error_message))
    }

    fn promote_version(&self, id: &str) -> Result<PluginRecord, StoreError> {
        self.modify(id, |record| Ok(record.promote()?))
    }

    fn set_updated_version(&self, id: &str, version: &str) -> Result<PluginRecord, StoreError> {
        self.modify(id, |record| apply_updated_version(record, version))
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(id).is_some())
    }
}
