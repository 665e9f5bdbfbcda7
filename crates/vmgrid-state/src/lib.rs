//! vmgrid-state: durable reservation store for VMGrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds one status record per
//! reservation, the request of every reservation still pending, the provider VMs the engine has brought up, and the
//! reconciliation marker.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Tracked VMs use `{infrastructure}:{instance_id}` keys so a provider's VMs
//! can be listed with a prefix scan.
//!
//! The engine only sees the [`ReservationStore`] trait; [`StateStore`] is the
//! redb implementation, `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ReservationStore, StateStore};
pub use types::*;
