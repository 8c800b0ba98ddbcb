//! Snapshots of the schema and of the status rows.
//!
//! Both caches are owned by the job loop and only change inside their own
//! `update`. The loop refreshes each on its own ticker, so between refreshes
//! they may be stale by up to one interval.

use std::collections::HashMap;

use sweepd_core::TableId;

use crate::schema::{PhysicalTable, SchemaSource};
use crate::store::{StoreError, TableStatus, TtlStore};

/// Tables with expiry settings, keyed by physical id.
#[derive(Debug, Clone, Default)]
pub struct InfoSchemaCache {
    version: i64,
    tables: HashMap<TableId, PhysicalTable>,
}

impl InfoSchemaCache {
    pub async fn update<S>(&mut self, source: &S) -> Result<(), StoreError>
    where
        S: SchemaSource + ?Sized,
    {
        let snapshot = source.load().await?;
        self.version = snapshot.version;
        self.tables = snapshot.tables.into_iter().map(|t| (t.id, t)).collect();
        Ok(())
    }

    pub fn get(&self, physical_id: TableId) -> Option<&PhysicalTable> {
        self.tables.get(&physical_id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &PhysicalTable> {
        self.tables.values()
    }

    pub fn ids(&self) -> Vec<TableId> {
        self.tables.keys().copied().collect()
    }

    pub fn version(&self) -> i64 {
        self.version
    }
}

/// Status rows, keyed by physical table id.
#[derive(Debug, Clone, Default)]
pub struct TableStatusCache {
    tables: HashMap<TableId, TableStatus>,
}

impl TableStatusCache {
    pub async fn update<S>(&mut self, store: &S) -> Result<(), StoreError>
    where
        S: TtlStore + ?Sized,
    {
        let rows = store.load_table_status().await?;
        self.tables = rows.into_iter().map(|r| (r.table_id, r)).collect();
        Ok(())
    }

    pub fn get(&self, table_id: TableId) -> Option<&TableStatus> {
        self.tables.get(&table_id)
    }

    pub fn rows(&self) -> impl Iterator<Item = &TableStatus> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaCatalog, test_table};
    use crate::store::InMemoryTtlStore;

    #[tokio::test]
    async fn info_schema_cache_tracks_catalog() {
        let store = InMemoryTtlStore::new();
        store.put_table(&test_table(1, "t1")).await.unwrap();
        store.put_table(&test_table(2, "t2")).await.unwrap();

        let mut cache = InfoSchemaCache::default();
        cache.update(&store).await.unwrap();
        assert_eq!(cache.tables().count(), 2);
        assert_eq!(cache.version(), 2);

        store.drop_table(TableId::new(2)).await.unwrap();
        cache.update(&store).await.unwrap();
        assert!(cache.get(TableId::new(2)).is_none());
        assert_eq!(cache.ids(), vec![TableId::new(1)]);
    }

    #[tokio::test]
    async fn status_cache_reloads_rows() {
        let store = InMemoryTtlStore::new();
        store.put_status(TableStatus::new(TableId::new(5), TableId::new(5)));

        let mut cache = TableStatusCache::default();
        assert_eq!(cache.rows().count(), 0);
        cache.update(&store).await.unwrap();
        assert!(cache.get(TableId::new(5)).is_some());
    }
}
