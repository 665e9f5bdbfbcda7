//! redb table definitions for the VMGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Reservation status records keyed by `{reservation_id}`.
pub const RESERVATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("reservations");

/// Request parameters of reservations still pending, keyed by `{reservation_id}`.
/// A row is dropped when its reservation reaches a terminal state.
pub const REQUESTS: TableDefinition<&str, &[u8]> = TableDefinition::new("requests");

/// Tracked provider VMs keyed by `{infrastructure}:{instance_id}`.
pub const VMS: TableDefinition<&str, &[u8]> = TableDefinition::new("vms");

/// Reconciliation markers keyed by marker name.
pub const SYNC_MARKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_markers");

/// The single marker holding the last reconciliation time.
pub const LAST_SYNC_KEY: &str = "last_sync";
