//! Pipelines executed either inline (blocking mode) or by a task worker.
//!
//! Each function takes everything it needs by argument so the same code
//! runs on both paths.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use vmgrid_agent::{AgentError, InfrastructureAgent, ObservedState, PreparedInstances};
use vmgrid_core::Parameters;
use vmgrid_state::*;

use crate::error::EngineResult;

/// Provision the VMs of one reservation and persist the outcome.
///
/// A provider runtime failure becomes a failed record; every other error
/// propagates and leaves the record pending. A reservation that is already
/// terminal (a redelivered task) is returned untouched.
pub async fn prepare_vms(
    store: &dyn ReservationStore,
    agent: &dyn InfrastructureAgent,
    count: usize,
    params: &Parameters,
    reservation_id: &str,
) -> EngineResult<ReservationStatus> {
    let mut status = store.load_reservation(reservation_id)?;
    if status.is_terminal() {
        warn!(%reservation_id, state = status.state.as_str(), "reservation already complete, skipping");
        return Ok(status);
    }

    debug!(%reservation_id, count, agent = agent.name(), "preparing instances");
    let outcome = async {
        let security = agent.configure_instance_security(params).await?;
        agent.prepare_instances(count, params, &security).await
    }
    .await;

    match outcome {
        Ok(prepared) if is_correlated(&prepared, count) => {
            status.complete_running(VmInfo {
                public_ips: prepared.public_ips,
                private_ips: prepared.private_ips,
                instance_ids: prepared.instance_ids,
            })?;
            info!(%reservation_id, count, "reservation running");
        }
        Ok(prepared) => {
            let reason = format!(
                "agent returned {} instance ids, {} public ips and {} private ips for {count} vms",
                prepared.instance_ids.len(),
                prepared.public_ips.len(),
                prepared.private_ips.len()
            );
            warn!(%reservation_id, %reason, "reservation failed");
            status.complete_failed(reason)?;
        }
        Err(AgentError::Runtime(reason)) => {
            warn!(%reservation_id, %reason, "reservation failed");
            status.complete_failed(reason)?;
        }
        Err(e) => return Err(e.into()),
    }

    store.put_reservation(&status)?;

    if let Some(vm_info) = &status.vm_info {
        track_vms(store, agent.name(), reservation_id, vm_info)?;
    }

    Ok(status)
}

/// Fail a reservation that could not be provisioned. A record that is
/// already terminal is returned as stored.
pub fn fail_reservation(
    store: &dyn ReservationStore,
    reservation_id: &str,
    reason: &str,
) -> EngineResult<ReservationStatus> {
    let mut status = store.load_reservation(reservation_id)?;
    if status.is_terminal() {
        return Ok(status);
    }
    status.complete_failed(reason)?;
    store.put_reservation(&status)?;
    warn!(%reservation_id, %reason, "reservation failed");
    Ok(status)
}

fn is_correlated(prepared: &PreparedInstances, count: usize) -> bool {
    prepared.len() == count
        && prepared.public_ips.len() == count
        && prepared.private_ips.len() == count
}

fn track_vms(
    store: &dyn ReservationStore,
    infrastructure: &str,
    reservation_id: &str,
    vm_info: &VmInfo,
) -> EngineResult<()> {
    let now = epoch_secs();
    for (i, instance_id) in vm_info.instance_ids.iter().enumerate() {
        store.put_vm(&TrackedVm {
            instance_id: instance_id.clone(),
            infrastructure: infrastructure.to_string(),
            reservation_id: Some(reservation_id.to_string()),
            public_ip: vm_info.public_ips[i].clone(),
            private_ip: vm_info.private_ips[i].clone(),
            state: VmState::Running,
            updated_at: now,
        })?;
    }
    Ok(())
}

/// Deregister (and optionally terminate) VMs. Writes no reservation record.
pub async fn deregister_vms(
    agent: &dyn InfrastructureAgent,
    params: &Parameters,
    terminate: bool,
) -> EngineResult<()> {
    agent.deregister_instances(params, terminate).await?;
    info!(agent = agent.name(), terminate, "instances deregistered");
    Ok(())
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Tracked VMs whose state or addresses changed.
    pub updated: usize,
    /// Provider instances seen for the first time.
    pub added: usize,
    /// Tracked VMs the provider no longer reports.
    pub lost: usize,
}

/// Bring tracked VM state for the agent's provider in line with what the
/// provider reports.
pub async fn synchronize_vms(
    store: &dyn ReservationStore,
    agent: &dyn InfrastructureAgent,
    params: &Parameters,
) -> EngineResult<SyncReport> {
    let infrastructure = agent.name();
    let observed = agent.observed_instances(params).await?;
    let mut observed: HashMap<String, _> = observed
        .into_iter()
        .map(|o| (o.instance_id.clone(), o))
        .collect();

    let now = epoch_secs();
    let mut report = SyncReport::default();

    for mut vm in store.list_vms(infrastructure)? {
        match observed.remove(&vm.instance_id) {
            Some(seen) => {
                let state = vm_state(seen.state);
                if vm.state != state || vm.public_ip != seen.public_ip || vm.private_ip != seen.private_ip {
                    vm.state = state;
                    vm.public_ip = seen.public_ip;
                    vm.private_ip = seen.private_ip;
                    vm.updated_at = now;
                    store.put_vm(&vm)?;
                    report.updated += 1;
                }
            }
            None if vm.state != VmState::Terminated => {
                vm.state = VmState::Terminated;
                vm.updated_at = now;
                store.put_vm(&vm)?;
                report.lost += 1;
            }
            None => {}
        }
    }

    for (instance_id, seen) in observed {
        store.put_vm(&TrackedVm {
            instance_id,
            infrastructure: infrastructure.to_string(),
            reservation_id: None,
            public_ip: seen.public_ip,
            private_ip: seen.private_ip,
            state: vm_state(seen.state),
            updated_at: now,
        })?;
        report.added += 1;
    }

    info!(
        %infrastructure,
        updated = report.updated,
        added = report.added,
        lost = report.lost,
        "vm state synchronized"
    );
    Ok(report)
}

fn vm_state(state: ObservedState) -> VmState {
    match state {
        ObservedState::Running => VmState::Running,
        ObservedState::Stopped => VmState::Stopped,
        ObservedState::Terminated => VmState::Terminated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[tokio::test]
    async fn successful_prepare_records_running_with_correlated_ips() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = ScriptedAgent::succeeding(two_vms());

        let status = prepare_vms(&store, &agent, 2, &prepare_params("r1"), "r1").await.unwrap();

        assert_eq!(status.state, ReservationState::Running);
        let vm_info = status.vm_info.clone().unwrap();
        assert_eq!(vm_info.instance_ids, vec!["i-1", "i-2"]);
        assert_eq!(vm_info.public_ips, vec!["1.2.3.4", "1.2.3.5"]);
        assert_eq!(vm_info.private_ips, vec!["10.0.0.1", "10.0.0.2"]);
        assert_eq!(store.get_reservation("r1").unwrap(), Some(status));

        let vms = store.list_vms("scripted").unwrap();
        assert_eq!(vms.len(), 2);
        assert!(vms.iter().all(|vm| vm.reservation_id.as_deref() == Some("r1")));
    }

    #[tokio::test]
    async fn runtime_failure_records_failed_without_vm_info() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = ScriptedAgent::failing("quota exceeded");

        let status = prepare_vms(&store, &agent, 2, &prepare_params("r1"), "r1").await.unwrap();

        assert_eq!(status.state, ReservationState::Failed);
        assert_eq!(status.reason.as_deref(), Some("quota exceeded"));
        assert!(status.vm_info.is_none());
        assert_eq!(store.get_reservation("r1").unwrap(), Some(status));
        assert!(store.list_vms("scripted").unwrap().is_empty());
    }

    #[tokio::test]
    async fn internal_agent_error_propagates_and_leaves_pending() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_reservation(&ReservationStatus::pending("r1")).unwrap();
        let agent = ScriptedAgent::crashing("segfault in sdk");

        let err = prepare_vms(&store, &agent, 2, &prepare_params("r1"), "r1").await.unwrap_err();

        assert!(matches!(err, crate::EngineError::Agent(AgentError::Internal(_))));
        let stored = store.get_reservation("r1").unwrap().unwrap();
        assert_eq!(stored.state, ReservationState::Pending);
    }

    #[tokio::test]
    async fn fail_reservation_keeps_terminal_records() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .create_reservation(&ReservationStatus::pending("r1"), &prepare_params("r1"))
            .unwrap();

        let status = fail_reservation(&store, "r1", "interrupted").unwrap();
        assert_eq!(status.state, ReservationState::Failed);
        assert_eq!(status.reason.as_deref(), Some("interrupted"));
        assert!(store.pending_request("r1").unwrap().is_none());

        let again = fail_reservation(&store, "r1", "second reason").unwrap();
        assert_eq!(again.reason.as_deref(), Some("interrupted"));

        let agent = ScriptedAgent::succeeding(two_vms());
        let status = prepare_vms(&store, &agent, 2, &prepare_params("r2"), "r2").await.unwrap();
        let kept = fail_reservation(&store, "r2", "late").unwrap();
        assert_eq!(kept, status);
    }

    #[tokio::test]
    async fn mismatched_agent_output_fails_reservation() {
        let store = StateStore::open_in_memory().unwrap();
        let mut prepared = two_vms();
        prepared.private_ips.pop();
        let agent = ScriptedAgent::succeeding(prepared);

        let status = prepare_vms(&store, &agent, 2, &prepare_params("r1"), "r1").await.unwrap();
        assert_eq!(status.state, ReservationState::Failed);
        assert!(status.reason.unwrap().contains("1 private ips"));
    }

    #[tokio::test]
    async fn redelivered_task_does_not_overwrite_terminal_state() {
        let store = StateStore::open_in_memory().unwrap();
        let first = ScriptedAgent::failing("quota exceeded");
        prepare_vms(&store, &first, 2, &prepare_params("r1"), "r1").await.unwrap();

        let second = ScriptedAgent::succeeding(two_vms());
        let status = prepare_vms(&store, &second, 2, &prepare_params("r1"), "r1").await.unwrap();

        assert_eq!(status.state, ReservationState::Failed);
        assert_eq!(second.prepare_calls(), 0);
    }

    #[tokio::test]
    async fn synchronize_updates_adds_and_loses_vms() {
        let store = StateStore::open_in_memory().unwrap();
        let agent = ScriptedAgent::succeeding(two_vms());
        prepare_vms(&store, &agent, 2, &prepare_params("r1"), "r1").await.unwrap();

        // i-1 stopped, i-2 gone, i-3 new.
        let agent = ScriptedAgent::succeeding(two_vms()).with_observed(vec![
            observed("i-1", ObservedState::Stopped),
            observed("i-3", ObservedState::Running),
        ]);

        let report = synchronize_vms(&store, &agent, &Parameters::new()).await.unwrap();
        assert_eq!(report, SyncReport { updated: 1, added: 1, lost: 1 });

        let vms: HashMap<String, TrackedVm> = store
            .list_vms("scripted")
            .unwrap()
            .into_iter()
            .map(|vm| (vm.instance_id.clone(), vm))
            .collect();
        assert_eq!(vms["i-1"].state, VmState::Stopped);
        assert_eq!(vms["i-2"].state, VmState::Terminated);
        assert_eq!(vms["i-3"].state, VmState::Running);
        assert_eq!(vms["i-3"].reservation_id, None);

        // A second pass with the same view changes nothing.
        let report = synchronize_vms(&store, &agent, &Parameters::new()).await.unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn deregister_calls_agent() {
        let agent = ScriptedAgent::succeeding(two_vms());
        deregister_vms(&agent, &Parameters::new(), true).await.unwrap();
        assert_eq!(agent.deregister_calls(), 1);
    }
}
