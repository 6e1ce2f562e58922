// redb-backed record store
//
// One table keyed by plugin id; values are JSON-encoded records. Every
// mutation is a single write transaction so a read-modify-write can never
// interleave with another writer.

use std::path::Path;

use annex_types::{PluginRecord, PluginStatus};
use redb::{Database, DatabaseError, ReadableTable, TableDefinition};

use super::{PluginStore, StoreError, apply_status, apply_updated_version, sort_records};

const PLUGINS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("plugins");

pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

fn db_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Database(err.to_string())
}

impl RedbStore {
    /// Open (or create) the database and make sure the table exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }

        let db = Database::create(path).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => StoreError::InUse(path.to_path_buf()),
            other => StoreError::Database(format!("failed to open {}: {other}", path.display())),
        })?;

        let write_txn = db.begin_write().map_err(db_err)?;
        write_txn.open_table(PLUGINS_TABLE).map_err(db_err)?;
        write_txn.commit().map_err(db_err)?;

        tracing::info!("Plugin store opened at {}", path.display());
        Ok(Self { db })
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<PluginRecord, StoreError>
    where
        F: FnOnce(&mut PluginRecord) -> Result<(), StoreError>,
    {
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let record = {
            let mut table = write_txn.open_table(PLUGINS_TABLE).map_err(db_err)?;
            let existing = table
                .get(id)
                .map_err(db_err)?
                .map(|guard| guard.value().to_vec());
            let Some(bytes) = existing else {
                return Err(StoreError::NotFound(id.to_string()));
            };

            let mut record: PluginRecord = serde_json::from_slice(&bytes)?;
            f(&mut record)?;

            let encoded = serde_json::to_vec(&record)?;
            table.insert(id, encoded.as_slice()).map_err(db_err)?;
            record
        };
        write_txn.commit().map_err(db_err)?;
        Ok(record)
    }
}

impl PluginStore for RedbStore {
    fn insert(&self, record: &PluginRecord) -> Result<(), StoreError> {
        record.validate()?;
        let encoded = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = write_txn.open_table(PLUGINS_TABLE).map_err(db_err)?;
            if table.get(record.id.as_str()).map_err(db_err)?.is_some() {
                return Err(StoreError::Duplicate(record.id.clone()));
            }
            table
                .insert(record.id.as_str(), encoded.as_slice())
                .map_err(db_err)?;
        }
        write_txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<PluginRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(PLUGINS_TABLE).map_err(db_err)?;
        match table.get(id).map_err(db_err)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_all(&self) -> Result<Vec<PluginRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(db_err)?;
        let table = read_txn.open_table(PLUGINS_TABLE).map_err(db_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_key, value) = entry.map_err(db_err)?;
            records.push(serde_json::from_slice::<PluginRecord>(value.value())?);
        }
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
        let write_txn = self.db.begin_write().map_err(db_err)?;
        let existed = {
            let mut table = write_txn.open_table(PLUGINS_TABLE).map_err(db_err)?;
            let removed = table.remove(id).map_err(db_err)?;
            removed.is_some()
        };
        write_txn.commit().map_err(db_err)?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::tempdir;

    #[test]
    fn test_redb_store_contract() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("annex.redb")).unwrap();
        contract::exercise(&store);
    }

    #[test]
    fn test_second_open_reports_store_in_use() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("annex.redb");
        let _held = RedbStore::open(&path).unwrap();

        let err = RedbStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::InUse(ref p) if *p == path));
        assert!(err.to_string().contains("stop the server"));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("annex.redb");
        let record = contract::pending("Lights");

        {
            let store = RedbStore::open(&path).unwrap();
            store.insert(&record).unwrap();
            store.promote_version(&record.id).unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        let reopened = store.get(&record.id).unwrap().unwrap();
        assert_eq!(reopened.status, PluginStatus::Installed);
        assert_eq!(reopened.installed_version.as_deref(), Some("1.0.0"));
    }
}
