//! Domain types for the VMGrid state store.
//!
//! These types represent the persisted state of reservations, the provider
//! VMs brought up for them, and the reconciliation marker. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Caller-assigned identifier tracking one VM-group provisioning attempt.
pub type ReservationId = String;

/// Provider-assigned identifier of a single VM.
pub type InstanceId = String;

// ── Reservation ───────────────────────────────────────────────────

/// Lifecycle state of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    #[default]
    Pending,
    Running,
    Failed,
}

impl ReservationState {
    /// Running and failed are final for a reservation id.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Pending => "pending",
            ReservationState::Running => "running",
            ReservationState::Failed => "failed",
        }
    }
}

/// Addresses of the VMs behind a running reservation.
///
/// Index `i` of each sequence refers to the same VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VmInfo {
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
    pub instance_ids: Vec<InstanceId>,
}

/// Status record for one reservation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReservationStatus {
    pub reservation_id: ReservationId,
    pub state: ReservationState,
    /// Set only while `state` is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_info: Option<VmInfo>,
    /// Set only while `state` is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Unix timestamp (seconds) when the reservation was accepted.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    #[serde(default)]
    pub updated_at: u64,
}

/// Rejected attempt to move a reservation out of a terminal state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reservation {reservation_id} is already {state}")]
pub struct TransitionError {
    pub reservation_id: ReservationId,
    pub state: &'static str,
}

impl ReservationStatus {
    /// A freshly accepted reservation.
    pub fn pending(reservation_id: impl Into<ReservationId>) -> Self {
        let now = epoch_secs();
        Self {
            reservation_id: reservation_id.into(),
            state: ReservationState::Pending,
            vm_info: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// pending → running.
    pub fn complete_running(&mut self, vm_info: VmInfo) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        self.state = ReservationState::Running;
        self.vm_info = Some(vm_info);
        self.reason = None;
        self.updated_at = epoch_secs();
        Ok(())
    }

    /// pending → failed.
    pub fn complete_failed(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        self.state = ReservationState::Failed;
        self.vm_info = None;
        self.reason = Some(reason.into());
        self.updated_at = epoch_secs();
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                reservation_id: self.reservation_id.clone(),
                state: self.state.as_str(),
            });
        }
        Ok(())
    }
}

// ── Tracked VMs ───────────────────────────────────────────────────

/// Last known state of a provider VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Running,
    Stopped,
    Terminated,
}

/// A provider VM the manager knows about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedVm {
    pub instance_id: InstanceId,
    /// Provider name the VM belongs to.
    pub infrastructure: String,
    /// Reservation that brought the VM up, if it came through this manager.
    pub reservation_id: Option<ReservationId>,
    pub public_ip: String,
    pub private_ip: String,
    pub state: VmState,
    /// Unix timestamp of last state change.
    pub updated_at: u64,
}

impl TrackedVm {
    /// Build the composite key for the vms table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.infrastructure, self.instance_id)
    }
}

// ── Reconciliation ────────────────────────────────────────────────

/// Durable record of the last reconciliation run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncMarker {
    /// Unix timestamp (seconds).
    pub last_sync: u64,
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
