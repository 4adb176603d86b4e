//! StateStore — redb-backed record persistence for slicegrid.
//!
//! Every value is a JSON `Versioned<T>` document. Version checks and the
//! write happen inside one redb write transaction; redb serializes write
//! transactions, so a compare-and-set cannot interleave with another
//! writer. Both on-disk and in-memory backends are supported (the latter
//! for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::accessor::{ChangeEvent, ResourceAccessor};
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Buffered change events per subscriber before it starts lagging.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// Version header decoded without touching the record body.
#[derive(Deserialize)]
struct VersionHeader {
    version: u64,
}

/// Thread-safe record store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<ChangeEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::with_database(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn with_database(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(INVENTORIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to the change feed. Only writes made after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Create or overwrite a workload regardless of its stored version.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<u64> {
        let key = workload.key();
        let version = self.write_record(WORKLOADS, &key.table_key(), workload, None)?;
        self.publish(ChangeEvent::Workload(key));
        Ok(version)
    }

    /// Delete a workload. Returns true if it existed.
    pub fn delete_workload(&self, key: &WorkloadKey) -> StateResult<bool> {
        let existed = self.remove_record(WORKLOADS, &key.table_key())?;
        if existed {
            self.publish(ChangeEvent::Workload(key.clone()));
        }
        debug!(workload = %key, existed, "workload deleted");
        Ok(existed)
    }

    // ── Inventories ────────────────────────────────────────────────

    /// Create or overwrite an inventory regardless of its stored version.
    pub fn put_inventory(&self, inventory: &NodeInventory) -> StateResult<u64> {
        let version = self.write_record(INVENTORIES, &inventory.node, inventory, None)?;
        self.publish(ChangeEvent::Inventory(inventory.node.clone()));
        Ok(version)
    }

    /// Delete an inventory. Returns true if it existed.
    pub fn delete_inventory(&self, node: &str) -> StateResult<bool> {
        let existed = self.remove_record(INVENTORIES, node)?;
        if existed {
            self.publish(ChangeEvent::Inventory(node.to_string()));
        }
        debug!(%node, existed, "inventory deleted");
        Ok(existed)
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn publish(&self, event: ChangeEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn read_record<T: DeserializeOwned>(
        &self,
        def: RecordTable,
        key: &str,
    ) -> StateResult<Option<Versioned<T>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: Versioned<T> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn list_records<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<Versioned<T>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: Versioned<T> =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Write a record. With `expected` set, the stored version must match
    /// it; without, the record is created or overwritten.
    fn write_record<T: Serialize>(
        &self,
        def: RecordTable,
        key: &str,
        value: &T,
        expected: Option<u64>,
    ) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let version;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let header: VersionHeader = serde_json::from_slice(guard.value())
                        .map_err(map_err!(Deserialize))?;
                    Some(header.version)
                }
                None => None,
            };
            version = match (expected, current) {
                (None, current) => current.unwrap_or(0) + 1,
                (Some(_), None) => return Err(StateError::NotFound(key.to_string())),
                (Some(expected), Some(found)) if expected != found => {
                    return Err(StateError::Conflict {
                        key: key.to_string(),
                        expected,
                        found,
                    });
                }
                (Some(_), Some(found)) => found + 1,
            };
            let bytes = serde_json::to_vec(&Versioned::new(version, value))
                .map_err(map_err!(Serialize))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = def.name(), %key, version, "record stored");
        Ok(version)
    }

    fn remove_record(&self, def: RecordTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

impl ResourceAccessor for StateStore {
    fn get_workload(&self, key: &WorkloadKey) -> StateResult<Option<Versioned<Workload>>> {
        self.read_record(WORKLOADS, &key.table_key())
    }

    fn list_workloads(&self) -> StateResult<Vec<Versioned<Workload>>> {
        self.list_records(WORKLOADS)
    }

    fn update_workload(&self, record: &Versioned<Workload>) -> StateResult<u64> {
        let key = record.value.key();
        let version = self.write_record(
            WORKLOADS,
            &key.table_key(),
            &record.value,
            Some(record.version),
        )?;
        self.publish(ChangeEvent::Workload(key));
        Ok(version)
    }

    fn get_inventory(&self, node: &str) -> StateResult<Option<Versioned<NodeInventory>>> {
        self.read_record(INVENTORIES, node)
    }

    fn list_inventories(&self) -> StateResult<Vec<Versioned<NodeInventory>>> {
        self.list_records(INVENTORIES)
    }

    fn update_inventory(&self, record: &Versioned<NodeInventory>) -> StateResult<u64> {
        let node = record.value.node.clone();
        let version =
            self.write_record(INVENTORIES, &node, &record.value, Some(record.version))?;
        self.publish(ChangeEvent::Inventory(node));
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_workload(namespace: &str, name: &str) -> Workload {
        Workload {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: format!("uid-{name}"),
            scheduling_gates: vec!["org.instaslice/accelerator".to_string()],
            finalizers: vec!["org.instaslice/accelerator".to_string()],
            containers: vec![ContainerSpec {
                name: "main".to_string(),
                limits: BTreeMap::from([("nvidia.com/mig-1g.5gb".to_string(), 1)]),
            }],
            ..Workload::default()
        }
    }

    fn test_inventory(node: &str) -> NodeInventory {
        NodeInventory {
            node: node.to_string(),
            accelerators: vec!["GPU-0".to_string()],
            slot_count: Some(8),
            placements: BTreeMap::from([(
                "1g.5gb".to_string(),
                PlacementEntry {
                    length: 1,
                    starts: (0..7).collect(),
                    provisioning: ProvisioningIds::default(),
                },
            )]),
            ..NodeInventory::default()
        }
    }

    // ── Workloads ──────────────────────────────────────────────────

    #[test]
    fn workload_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let workload = test_workload("default", "trainer");

        let version = store.put_workload(&workload).unwrap();
        let retrieved = store
            .get_workload(&WorkloadKey::new("default", "trainer"))
            .unwrap()
            .unwrap();

        assert_eq!(version, 1);
        assert_eq!(retrieved, Versioned::new(1, workload));
    }

    #[test]
    fn workload_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store.get_workload(&WorkloadKey::new("nope", "nothing")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn put_bumps_version() {
        let store = StateStore::open_in_memory().unwrap();
        let workload = test_workload("default", "trainer");
        assert_eq!(store.put_workload(&workload).unwrap(), 1);
        assert_eq!(store.put_workload(&workload).unwrap(), 2);
    }

    #[test]
    fn update_with_current_version_succeeds() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workload(&test_workload("default", "trainer")).unwrap();

        let mut record = store
            .get_workload(&WorkloadKey::new("default", "trainer"))
            .unwrap()
            .unwrap();
        record.value.scheduling_gates.clear();

        assert_eq!(store.update_workload(&record).unwrap(), 2);
        let stored = store
            .get_workload(&WorkloadKey::new("default", "trainer"))
            .unwrap()
            .unwrap();
        assert!(stored.value.scheduling_gates.is_empty());
    }

    #[test]
    fn update_with_stale_version_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_workload(&test_workload("default", "trainer")).unwrap();
        let key = WorkloadKey::new("default", "trainer");

        let first = store.get_workload(&key).unwrap().unwrap();
        let second = first.clone();

        store.update_workload(&first).unwrap();
        let err = store.update_workload(&second).unwrap_err();
        assert!(err.is_conflict());
        assert!(matches!(
            err,
            StateError::Conflict {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn update_of_missing_record_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let record = Versioned::new(1, test_workload("default", "ghost"));
        let err = store.update_workload(&record).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn workload_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let key = WorkloadKey::new("default", "trainer");
        store.put_workload(&test_workload("default", "trainer")).unwrap();

        assert!(store.delete_workload(&key).unwrap());
        assert!(!store.delete_workload(&key).unwrap());
        assert!(store.get_workload(&key).unwrap().is_none());
    }

    // ── Inventories ────────────────────────────────────────────────

    #[test]
    fn inventories_list_in_node_order() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_inventory(&test_inventory("node-b")).unwrap();
        store.put_inventory(&test_inventory("node-a")).unwrap();
        store.put_inventory(&test_inventory("node-c")).unwrap();

        let nodes: Vec<String> = store
            .list_inventories()
            .unwrap()
            .into_iter()
            .map(|r| r.value.node)
            .collect();
        assert_eq!(nodes, vec!["node-a", "node-b", "node-c"]);
    }

    #[test]
    fn inventory_conflict_detected() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_inventory(&test_inventory("node-1")).unwrap();

        let stale = store.get_inventory("node-1").unwrap().unwrap();
        // The realization agent overwrites the record in between.
        store.put_inventory(&test_inventory("node-1")).unwrap();

        assert!(store.update_inventory(&stale).unwrap_err().is_conflict());
    }

    #[test]
    fn inventory_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_inventory(&test_inventory("node-1")).unwrap();
        assert!(store.delete_inventory("node-1").unwrap());
        assert!(store.get_inventory("node-1").unwrap().is_none());
    }

    // ── Change feed ────────────────────────────────────────────────

    #[test]
    fn writes_publish_change_events() {
        let store = StateStore::open_in_memory().unwrap();
        let mut feed = store.subscribe();

        store.put_workload(&test_workload("default", "trainer")).unwrap();
        store.put_inventory(&test_inventory("node-1")).unwrap();

        assert_eq!(
            feed.try_recv().unwrap(),
            ChangeEvent::Workload(WorkloadKey::new("default", "trainer"))
        );
        assert_eq!(
            feed.try_recv().unwrap(),
            ChangeEvent::Inventory("node-1".to_string())
        );
        assert!(feed.try_recv().is_err());
    }

    #[test]
    fn failed_update_publishes_nothing() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_inventory(&test_inventory("node-1")).unwrap();
        let stale = store.get_inventory("node-1").unwrap().unwrap();
        store.put_inventory(&test_inventory("node-1")).unwrap();

        let mut feed = store.subscribe();
        assert!(store.update_inventory(&stale).is_err());
        assert!(feed.try_recv().is_err());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_inventory(&test_inventory("node-1")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let record = store.get_inventory("node-1").unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.value.accelerators, vec!["GPU-0".to_string()]);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_workloads().unwrap().is_empty());
        assert!(store.list_inventories().unwrap().is_empty());
        assert!(!store.delete_inventory("nope").unwrap());
        assert!(!store.delete_workload(&WorkloadKey::new("a", "b")).unwrap());
    }
}
