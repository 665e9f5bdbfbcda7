//! StateStore: redb-backed reservation persistence for VMGrid.
//!
//! Provides typed operations over reservation records, tracked VMs and the
//! reconciliation marker. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing and ephemeral deployments).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;
use vmgrid_core::{Parameters, StoreConfig};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Persistence seam used by the lifecycle engine.
///
/// Implementations must tolerate concurrent calls for distinct keys from
/// any number of tasks.
pub trait ReservationStore: Send + Sync {
    /// Fetch a reservation record, `None` when the id was never accepted.
    fn get_reservation(&self, reservation_id: &str) -> StateResult<Option<ReservationStatus>>;

    /// Insert or overwrite a reservation record. Writing a terminal record
    /// drops the request saved with it.
    fn put_reservation(&self, status: &ReservationStatus) -> StateResult<()>;

    /// Insert a record and the request that produced it, only if the id is
    /// unused. Returns false when the id already exists, leaving the stored
    /// record untouched.
    fn create_reservation(&self, status: &ReservationStatus, request: &Parameters) -> StateResult<bool>;

    /// Request saved for a reservation that has not reached a terminal state.
    fn pending_request(&self, reservation_id: &str) -> StateResult<Option<Parameters>>;

    /// List all reservation records.
    fn list_reservations(&self) -> StateResult<Vec<ReservationStatus>>;

    /// Last reconciliation time, `None` if reconciliation never ran.
    fn last_sync(&self) -> StateResult<Option<u64>>;

    /// Record the last reconciliation time.
    fn set_last_sync(&self, epoch: u64) -> StateResult<()>;

    /// Insert or update a tracked VM.
    fn put_vm(&self, vm: &TrackedVm) -> StateResult<()>;

    /// List tracked VMs for one provider.
    fn list_vms(&self, infrastructure: &str) -> StateResult<Vec<TrackedVm>>;

    /// Fetch a reservation record, defaulting to a pending one when absent.
    fn load_reservation(&self, reservation_id: &str) -> StateResult<ReservationStatus> {
        Ok(self
            .get_reservation(reservation_id)?
            .unwrap_or_else(|| ReservationStatus::pending(reservation_id)))
    }
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open the storage provider selected by configuration.
    pub fn from_config(config: &StoreConfig) -> StateResult<Self> {
        match config {
            StoreConfig::Redb { path } => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
                }
                Self::open(path)
            }
            StoreConfig::Memory => Self::open_in_memory(),
        }
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        txn.open_table(REQUESTS).map_err(map_err!(Table))?;
        txn.open_table(VMS).map_err(map_err!(Table))?;
        txn.open_table(SYNC_MARKERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl ReservationStore for StateStore {
    // ── Reservations ───────────────────────────────────────────────

    fn get_reservation(&self, reservation_id: &str) -> StateResult<Option<ReservationStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        match table.get(reservation_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let status: ReservationStatus =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(status))
            }
            None => Ok(None),
        }
    }

    fn put_reservation(&self, status: &ReservationStatus) -> StateResult<()> {
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            table
                .insert(status.reservation_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            if status.is_terminal() {
                let mut requests = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
                requests
                    .remove(status.reservation_id.as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(reservation_id = %status.reservation_id, state = status.state.as_str(), "reservation stored");
        Ok(())
    }

    fn create_reservation(&self, status: &ReservationStatus, request: &Parameters) -> StateResult<bool> {
        let value = serde_json::to_vec(status).map_err(map_err!(Serialize))?;
        let request = serde_json::to_vec(request).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
            let exists = table
                .get(status.reservation_id.as_str())
                .map_err(map_err!(Read))?
                .is_some();
            if !exists {
                table
                    .insert(status.reservation_id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                let mut requests = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
                requests
                    .insert(status.reservation_id.as_str(), request.as_slice())
                    .map_err(map_err!(Write))?;
            }
            created = !exists;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(reservation_id = %status.reservation_id, created, "reservation created");
        Ok(created)
    }

    fn list_reservations(&self) -> StateResult<Vec<ReservationStatus>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RESERVATIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let status: ReservationStatus =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(status);
        }
        Ok(results)
    }

    fn pending_request(&self, reservation_id: &str) -> StateResult<Option<Parameters>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REQUESTS).map_err(map_err!(Table))?;
        match table.get(reservation_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let request: Parameters =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    // ── Sync marker ────────────────────────────────────────────────

    fn last_sync(&self) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SYNC_MARKERS).map_err(map_err!(Table))?;
        match table.get(LAST_SYNC_KEY).map_err(map_err!(Read))? {
            Some(guard) => {
                let marker: SyncMarker =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(marker.last_sync))
            }
            None => Ok(None),
        }
    }

    fn set_last_sync(&self, epoch: u64) -> StateResult<()> {
        let marker = SyncMarker { last_sync: epoch };
        let value = serde_json::to_vec(&marker).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SYNC_MARKERS).map_err(map_err!(Table))?;
            table
                .insert(LAST_SYNC_KEY, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(last_sync = epoch, "sync marker stored");
        Ok(())
    }

    // ── Tracked VMs ────────────────────────────────────────────────

    fn put_vm(&self, vm: &TrackedVm) -> StateResult<()> {
        let key = vm.table_key();
        let value = serde_json::to_vec(vm).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VMS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn list_vms(&self, infrastructure: &str) -> StateResult<Vec<TrackedVm>> {
        let prefix = format!("{infrastructure}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VMS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let vm: TrackedVm =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(vm);
            }
        }
        Ok(results)
    }
}
